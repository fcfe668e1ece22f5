/*!
 * Response parsing for the literature service
 *
 * Search responses are E-utilities JSON (`esearchresult.idlist`). Detail
 * responses are PubMed XML: one `PubmedArticle` per record, with `Author`
 * entries (`LastName`, `ForeName`) and `Affiliation` text anywhere inside it.
 */

use std::borrow::Cow;

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;

use crate::data_types::LiteratureRecord;
use crate::{PubMatchError, Result};

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    esearchresult: Option<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    idlist: Option<Vec<String>>,
    #[serde(rename = "ERROR")]
    error: Option<String>,
}

/// Candidate record identifiers from a search response
pub fn parse_search_response(body: &str) -> Result<Vec<String>> {
    let envelope: SearchEnvelope = serde_json::from_str(body).map_err(|e| PubMatchError::ResponseFormat {
        endpoint: "search",
        message: format!("invalid JSON: {}", e),
    })?;

    let result = envelope.esearchresult.ok_or_else(|| PubMatchError::ResponseFormat {
        endpoint: "search",
        message: "missing 'esearchresult'".to_string(),
    })?;

    match (result.idlist, result.error) {
        (Some(ids), _) => Ok(ids),
        (None, Some(error)) => Err(PubMatchError::ResponseFormat {
            endpoint: "search",
            message: error,
        }),
        (None, None) => Err(PubMatchError::ResponseFormat {
            endpoint: "search",
            message: "missing 'esearchresult.idlist'".to_string(),
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    Pmid,
    LastName,
    ForeName,
    Affiliation,
}

#[derive(Debug, Default)]
struct AuthorBuilder {
    last_name: String,
    fore_name: String,
}

#[derive(Debug, Default)]
struct ArticleBuilder {
    pmid: Option<String>,
    authors: Vec<(String, String)>,
    affiliations: Vec<String>,
}

impl ArticleBuilder {
    fn finish(self) -> LiteratureRecord {
        LiteratureRecord {
            pmid: self.pmid,
            authors: self.authors,
            affiliation_text: self.affiliations.join(" "),
        }
    }
}

/// Records of a detail response, in document order
///
/// Authors without a `LastName` (collective names) are kept with an empty
/// surname so they can never match on their own.
pub fn parse_detail_records(xml: &str) -> Result<Vec<LiteratureRecord>> {
    let mut reader = Reader::from_str(xml);

    let mut records = Vec::new();
    let mut article: Option<ArticleBuilder> = None;
    let mut author: Option<AuthorBuilder> = None;
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut capture: Option<(Capture, usize, String)> = None;

    loop {
        let event = reader.read_event().map_err(|e| PubMatchError::ResponseFormat {
            endpoint: "detail",
            message: format!("malformed XML at byte {}: {}", reader.error_position(), e),
        })?;

        match event {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                let parent_is_author = stack.last().is_some_and(|p| p.as_slice() == b"Author");

                match name.as_slice() {
                    b"PubmedArticle" => article = Some(ArticleBuilder::default()),
                    b"Author" if article.is_some() => author = Some(AuthorBuilder::default()),
                    b"PMID" if article.as_ref().is_some_and(|a| a.pmid.is_none()) && capture.is_none() => {
                        capture = Some((Capture::Pmid, stack.len(), String::new()));
                    }
                    b"LastName" if parent_is_author && author.is_some() && capture.is_none() => {
                        capture = Some((Capture::LastName, stack.len(), String::new()));
                    }
                    b"ForeName" if parent_is_author && author.is_some() && capture.is_none() => {
                        capture = Some((Capture::ForeName, stack.len(), String::new()));
                    }
                    b"Affiliation" if article.is_some() && capture.is_none() => {
                        capture = Some((Capture::Affiliation, stack.len(), String::new()));
                    }
                    _ => {}
                }
                stack.push(name);
            }
            Event::End(e) => {
                stack.pop();

                if let Some((field, depth, _)) = &capture {
                    if *depth == stack.len() {
                        let field = *field;
                        let text = capture.take().map(|(_, _, text)| text).unwrap_or_default();
                        store_capture(field, text, article.as_mut(), author.as_mut());
                    }
                }

                match e.name().as_ref() {
                    b"Author" => {
                        if let (Some(done), Some(current)) = (author.take(), article.as_mut()) {
                            current.authors.push((done.last_name, done.fore_name));
                        }
                    }
                    b"PubmedArticle" => {
                        if let Some(done) = article.take() {
                            records.push(done.finish());
                        }
                    }
                    _ => {}
                }
            }
            Event::Empty(e) => {
                // <Author/> still counts as an (empty) author entry
                if e.name().as_ref() == b"Author" {
                    if let Some(current) = article.as_mut() {
                        current.authors.push((String::new(), String::new()));
                    }
                }
            }
            Event::Text(e) => {
                if let Some((_, _, text)) = capture.as_mut() {
                    text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Event::CData(e) => {
                if let Some((_, _, text)) = capture.as_mut() {
                    text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Event::GeneralRef(e) => {
                if let Some((_, _, text)) = capture.as_mut() {
                    let name = String::from_utf8_lossy(&e);
                    text.push_str(&resolve_reference(&name));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if article.is_some() {
        return Err(PubMatchError::ResponseFormat {
            endpoint: "detail",
            message: "document ended inside a PubmedArticle".to_string(),
        });
    }

    Ok(records)
}

fn store_capture(field: Capture, text: String, article: Option<&mut ArticleBuilder>, author: Option<&mut AuthorBuilder>) {
    let text = normalize_whitespace(&text);
    match field {
        Capture::Pmid => {
            if let Some(article) = article {
                article.pmid = Some(text);
            }
        }
        Capture::LastName => {
            if let Some(author) = author {
                author.last_name = text;
            }
        }
        Capture::ForeName => {
            if let Some(author) = author {
                author.fore_name = text;
            }
        }
        Capture::Affiliation => {
            if let Some(article) = article {
                if !text.is_empty() {
                    article.affiliations.push(text);
                }
            }
        }
    }
}

/// Collapse runs of whitespace (including newlines inside long
/// affiliations) to single spaces
fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text for an entity or character reference name (the part between `&` and `;`)
fn resolve_reference(name: &str) -> Cow<'static, str> {
    match name {
        "amp" => Cow::Borrowed("&"),
        "lt" => Cow::Borrowed("<"),
        "gt" => Cow::Borrowed(">"),
        "quot" => Cow::Borrowed("\""),
        "apos" => Cow::Borrowed("'"),
        _ => {
            let code = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok()
            } else if let Some(dec) = name.strip_prefix('#') {
                dec.parse::<u32>().ok()
            } else {
                None
            };
            match code.and_then(char::from_u32) {
                Some(c) => Cow::Owned(c.to_string()),
                // Unknown named entity: keep it verbatim
                None => Cow::Owned(format!("&{};", name)),
            }
        }
    }
}
