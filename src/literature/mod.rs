/*!
 * Literature search and detail retrieval
 *
 * `LiteratureSource` is the seam between the matcher and the network: the
 * matcher only needs "search for identifiers" and "fetch the records for
 * these identifiers". `EntrezClient` implements it against NCBI
 * E-utilities; tests substitute an in-memory source.
 */

use std::sync::Arc;

use async_trait::async_trait;

use crate::Result;

pub mod client;
pub mod parse;

pub use client::EntrezClient;
pub use parse::{parse_detail_records, parse_search_response};

/// A searchable literature index
#[async_trait]
pub trait LiteratureSource: Send + Sync {
    /// Identifiers of records matching `term`, at most `max_results`
    async fn search(&self, term: &str, max_results: usize) -> Result<Vec<String>>;

    /// Raw detail document (PubMed XML) for the given identifiers
    async fn fetch(&self, ids: &[String]) -> Result<String>;
}

#[async_trait]
impl<S: LiteratureSource + ?Sized> LiteratureSource for Arc<S> {
    async fn search(&self, term: &str, max_results: usize) -> Result<Vec<String>> {
        (**self).search(term, max_results).await
    }

    async fn fetch(&self, ids: &[String]) -> Result<String> {
        (**self).fetch(ids).await
    }
}
