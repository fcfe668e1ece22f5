/*!
 * Publication matching against an in-memory literature source
 *
 * The scripted source answers searches from a term table, serves PubMed
 * style XML for fetched identifiers and records every call, so the tests can
 * check both the counts and the requests the matcher makes.
 */

use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nppes_pubmatch::pipeline::{self, PipelineState, Stage};
use nppes_pubmatch::prelude::*;
use tempfile::TempDir;

#[derive(Default)]
struct ScriptedSource {
    hits: HashMap<String, Vec<String>>,
    articles: HashMap<String, String>,
    failing_terms: HashSet<String>,
    delays_ms: HashMap<String, u64>,
    cancel_after: Option<(String, Arc<AtomicBool>)>,
    searches: Mutex<Vec<String>>,
    fetches: Mutex<Vec<Vec<String>>>,
}

fn article(pmid: &str, authors: &[&str], affiliation: &str) -> String {
    let authors: String = authors
        .iter()
        .map(|last| {
            format!(
                "<Author ValidYN=\"Y\"><LastName>{}</LastName><ForeName>X</ForeName>\
                 <AffiliationInfo><Affiliation>{}</Affiliation></AffiliationInfo></Author>",
                last, affiliation
            )
        })
        .collect();
    format!(
        "<PubmedArticle><MedlineCitation><PMID Version=\"1\">{}</PMID><Article>\
         <AuthorList>{}</AuthorList></Article></MedlineCitation></PubmedArticle>",
        pmid, authors
    )
}

impl ScriptedSource {
    /// Register a search term and the articles it returns as (pmid, authors, affiliation)
    fn with_term(mut self, term: &str, articles: &[(&str, &[&str], &str)]) -> Self {
        let ids = articles.iter().map(|(pmid, _, _)| pmid.to_string()).collect();
        self.hits.insert(term.to_string(), ids);
        for (pmid, authors, affiliation) in articles {
            self.articles.insert(pmid.to_string(), article(pmid, authors, affiliation));
        }
        self
    }

    fn failing(mut self, term: &str) -> Self {
        self.failing_terms.insert(term.to_string());
        self
    }

    fn delayed(mut self, term: &str, millis: u64) -> Self {
        self.delays_ms.insert(term.to_string(), millis);
        self
    }

    fn cancelling_after(mut self, term: &str, flag: Arc<AtomicBool>) -> Self {
        self.cancel_after = Some((term.to_string(), flag));
        self
    }

    fn searches(&self) -> Vec<String> {
        self.searches.lock().unwrap().clone()
    }

    fn fetches(&self) -> Vec<Vec<String>> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl LiteratureSource for ScriptedSource {
    async fn search(&self, term: &str, _max_results: usize) -> Result<Vec<String>> {
        self.searches.lock().unwrap().push(term.to_string());

        if let Some(millis) = self.delays_ms.get(term) {
            tokio::time::sleep(Duration::from_millis(*millis)).await;
        }
        if let Some((cancel_term, flag)) = &self.cancel_after {
            if cancel_term == term {
                flag.store(true, Ordering::SeqCst);
            }
        }
        if self.failing_terms.contains(term) {
            return Err(PubMatchError::http_status(503, "https://eutils.example/esearch.fcgi"));
        }
        Ok(self.hits.get(term).cloned().unwrap_or_default())
    }

    async fn fetch(&self, ids: &[String]) -> Result<String> {
        self.fetches.lock().unwrap().push(ids.to_vec());
        let body: String = ids.iter().filter_map(|id| self.articles.get(id).cloned()).collect();
        Ok(format!("<?xml version=\"1.0\" ?><PubmedArticleSet>{}</PubmedArticleSet>", body))
    }
}

fn not_cancelled() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

fn matcher(source: &Arc<ScriptedSource>) -> PublicationMatcher<Arc<ScriptedSource>> {
    PublicationMatcher::new(Arc::clone(source), MatchScoring::default())
}

#[tokio::test]
async fn test_jane_smith_in_boston() {
    let source = Arc::new(ScriptedSource::default().with_term(
        "Smith J[Author]",
        &[
            ("101", &["Smith", "Brown"], "Boston General Hospital, Boston, MA"),
            ("102", &["Kowalczyk"], "Warsaw Medical University"),
        ],
    ));

    let doctor = DoctorQuery::new("Jane", "Smith", "Boston").with_npi("1000000001");
    let result = matcher(&source).match_doctor(&doctor).await;

    assert_eq!(result.doctor, "Jane Smith");
    assert_eq!(result.npi.as_deref(), Some("1000000001"));
    assert_eq!(result.status, MatchStatus::Matched);
    assert_eq!(result.candidates, Some(2));
    assert_eq!(result.matched_publications, 1);

    assert_eq!(source.searches(), vec!["Smith J[Author]"]);
    assert_eq!(source.fetches(), vec![vec!["101".to_string(), "102".to_string()]]);
}

#[tokio::test]
async fn test_no_candidates_skips_fetch() {
    let source = Arc::new(ScriptedSource::default());
    let result = matcher(&source).match_doctor(&DoctorQuery::new("John", "Doe", "Denver")).await;

    assert_eq!(result.doctor, "John Doe");
    assert_eq!(result.status, MatchStatus::NoCandidates);
    assert_eq!(result.matched_publications, 0);
    assert_eq!(source.searches(), vec!["Doe J[Author]"]);
    assert!(source.fetches().is_empty());
}

#[tokio::test]
async fn test_doctor_without_first_name_makes_no_requests() {
    let source = Arc::new(ScriptedSource::default());
    let result = matcher(&source).match_doctor(&DoctorQuery::new("", "Doe", "Denver")).await;

    assert_eq!(result.status, MatchStatus::Skipped);
    assert_eq!(result.matched_publications, 0);
    assert!(source.searches().is_empty());
}

#[tokio::test]
async fn test_threshold_boundary() {
    fn seventy(_: &str, _: &str) -> f64 {
        70.0
    }
    fn seventy_one(_: &str, _: &str) -> f64 {
        71.0
    }

    let source = Arc::new(
        ScriptedSource::default().with_term("Smith J[Author]", &[("201", &["Smyth"], "Chicago")]),
    );
    let doctor = DoctorQuery::new("Jane", "Smith", "");

    let at = PublicationMatcher::new(Arc::clone(&source), MatchScoring::default().with_similarity(seventy));
    assert_eq!(at.match_doctor(&doctor).await.matched_publications, 0);

    let above = PublicationMatcher::new(Arc::clone(&source), MatchScoring::default().with_similarity(seventy_one));
    assert_eq!(above.match_doctor(&doctor).await.matched_publications, 1);
}

#[tokio::test]
async fn test_city_bonus_in_affiliation() {
    fn fifty_one(_: &str, _: &str) -> f64 {
        51.0
    }

    let source = Arc::new(
        ScriptedSource::default()
            .with_term("Smith J[Author]", &[("301", &["Smyth"], "Dept. of Surgery, BOSTON")]),
    );
    let matcher = PublicationMatcher::new(Arc::clone(&source), MatchScoring::default().with_similarity(fifty_one));

    let local = matcher.match_doctor(&DoctorQuery::new("Jane", "Smith", "Boston")).await;
    assert_eq!(local.matched_publications, 1);

    let elsewhere = matcher.match_doctor(&DoctorQuery::new("Jane", "Smith", "Denver")).await;
    assert_eq!(elsewhere.matched_publications, 0);
    assert_eq!(elsewhere.status, MatchStatus::Matched);
}

#[tokio::test]
async fn test_one_failure_does_not_stop_the_batch() {
    let source = Arc::new(
        ScriptedSource::default()
            .failing("Doe J[Author]")
            .with_term("Smith J[Author]", &[("401", &["Smith"], "")]),
    );
    let doctors = vec![
        DoctorQuery::new("John", "Doe", "Denver"),
        DoctorQuery::new("Jane", "Smith", "Boston"),
    ];

    let outcome = matcher(&source).match_batch(&doctors, not_cancelled(), 2).await;

    assert!(!outcome.interrupted);
    assert_eq!(outcome.results.len(), 2);
    assert_eq!(outcome.results[0].status, MatchStatus::Failed);
    assert!(outcome.results[0].error.as_deref().unwrap().contains("503"));
    assert_eq!(outcome.results[1].status, MatchStatus::Matched);
    assert_eq!(outcome.results[1].matched_publications, 1);
    assert_eq!(outcome.count_with_status(MatchStatus::Failed), 1);
}

#[tokio::test]
async fn test_results_keep_input_order() {
    let source = Arc::new(
        ScriptedSource::default()
            .with_term("Adams A[Author]", &[("501", &["Adams"], "")])
            .with_term("Baker B[Author]", &[("502", &["Baker"], ""), ("503", &["Baker"], "")])
            .delayed("Adams A[Author]", 60)
            .delayed("Baker B[Author]", 30)
            .delayed("Clark C[Author]", 10),
    );
    let doctors = vec![
        DoctorQuery::new("Ann", "Adams", ""),
        DoctorQuery::new("Bob", "Baker", ""),
        DoctorQuery::new("Cy", "Clark", ""),
        DoctorQuery::new("Dee", "Dunn", ""),
    ];

    let outcome = matcher(&source).match_batch(&doctors, not_cancelled(), 4).await;

    let names: Vec<&str> = outcome.results.iter().map(|r| r.doctor.as_str()).collect();
    assert_eq!(names, vec!["Ann Adams", "Bob Baker", "Cy Clark", "Dee Dunn"]);
    let counts: Vec<usize> = outcome.results.iter().map(|r| r.matched_publications).collect();
    assert_eq!(counts, vec![1, 2, 0, 0]);
    assert_eq!(outcome.total_publications(), 3);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let source = Arc::new(ScriptedSource::default());
    let doctors = vec![DoctorQuery::new("Jane", "Smith", "Boston")];

    let outcome = matcher(&source)
        .match_batch(&doctors, Arc::new(AtomicBool::new(true)), 1)
        .await;

    assert!(outcome.interrupted);
    assert!(outcome.results.is_empty());
    assert!(source.searches().is_empty());
}

#[tokio::test]
async fn test_cancellation_keeps_finished_doctors() {
    let cancel = not_cancelled();
    let source = Arc::new(
        ScriptedSource::default()
            .with_term("Adams A[Author]", &[("601", &["Adams"], "")])
            .cancelling_after("Baker B[Author]", Arc::clone(&cancel)),
    );
    let doctors = vec![
        DoctorQuery::new("Ann", "Adams", ""),
        DoctorQuery::new("Bob", "Baker", ""),
        DoctorQuery::new("Cy", "Clark", ""),
    ];

    let outcome = matcher(&source).match_batch(&doctors, cancel, 1).await;

    assert!(outcome.interrupted);
    assert_eq!(outcome.results.len(), 2);
    assert_eq!(outcome.results[0].matched_publications, 1);
    assert_eq!(outcome.results[1].status, MatchStatus::NoCandidates);
    assert_eq!(source.searches(), vec!["Adams A[Author]", "Baker B[Author]"]);
}

const ENRICHED_PROVIDERS: &str = "\
NPI,Entity Type Code,Provider Last Name (Legal Name),Provider First Name,Provider Business Practice Location Address City Name,Healthcare Provider Taxonomy Code_1,Healthcare Provider Primary Taxonomy Switch_1
1000000001,1,Smith,Jane,Boston,207Q00000X,Y
1000000003,1,Doe,John,Denver,207Q00000X,Y
1000000005,1,,Mai,Seattle,,
";

const TAXONOMY: &str = "\
Code,Grouping,Classification,Specialization,Definition,Notes,Display Name,Section
207Q00000X,Allopathic & Osteopathic Physicians,Family Medicine,,,,Family Medicine Physician,Individual
";

#[tokio::test]
async fn test_match_stage_over_enriched_table() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("npidata_pfile.csv"), ENRICHED_PROVIDERS).unwrap();
    fs::write(dir.path().join("nucc_taxonomy.csv"), TAXONOMY).unwrap();
    let config = ConfigBuilder::new()
        .provider_extract(dir.path().join("npidata_pfile.csv"))
        .taxonomy(dir.path().join("nucc_taxonomy.csv"))
        .enriched_output(dir.path().join("results.csv"))
        .state_file(dir.path().join("pipeline_state.json"))
        .match_results(dir.path().join("matches.jsonl"))
        .output_format(ExportFormat::JsonLines)
        .progress(false)
        .build();

    let source = Arc::new(ScriptedSource::default().with_term(
        "Smith J[Author]",
        &[("701", &["Smith"], "Boston"), ("702", &["Smithe"], "Boston")],
    ));

    let outcome = pipeline::run(&config, Arc::clone(&source), false, not_cancelled()).await.unwrap();

    assert!(!outcome.interrupted);
    assert_eq!(outcome.results.len(), 3);
    assert_eq!(outcome.results[0].doctor, "Jane Smith");
    assert_eq!(outcome.results[0].npi.as_deref(), Some("1000000001"));
    assert_eq!(outcome.results[0].matched_publications, 2);
    assert_eq!(outcome.results[1].status, MatchStatus::NoCandidates);
    assert_eq!(outcome.results[2].status, MatchStatus::Skipped);

    let saved: Vec<MatchResult> = fs::read_to_string(dir.path().join("matches.jsonl"))
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(saved, outcome.results);

    let state = PipelineState::load(&config.paths.state_file).unwrap().unwrap();
    assert_eq!(state.stage, Stage::Matching);
    // Enrichment ran in the same invocation, before matching
    assert!(config.paths.enriched_output.exists());
    assert_eq!(state.rows_written, 3);
    assert_eq!(state.enrichment.as_ref(), Some(&config.enrichment));
    let run = state.matching.unwrap();
    assert_eq!((run.doctors, run.matched, run.no_candidates, run.skipped), (3, 1, 1, 1));

    // A second run reuses the enriched table and only matches again
    let before = fs::metadata(&config.paths.enriched_output).unwrap().modified().unwrap();
    pipeline::run(&config, Arc::clone(&source), false, not_cancelled()).await.unwrap();
    let after = fs::metadata(&config.paths.enriched_output).unwrap().modified().unwrap();
    assert_eq!(before, after);
    assert_eq!(source.searches().len(), 4);
}
