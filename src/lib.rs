/*!
 * # NPPES Publication Matcher
 *
 * A two-stage pipeline over the NPPES provider registry.
 *
 * ## Stages
 *
 * 1. **Enrichment**: join the provider extract (`npidata_pfile_*.csv`) with
 *    the NUCC taxonomy table on each of the first three taxonomy slots,
 *    keep individual providers only, and write a 45-column enriched CSV.
 * 2. **Publication matching**: for each enriched provider, search PubMed
 *    for `"<last> <first initial>[Author]"`, fetch the candidate records,
 *    and count the records with an author whose surname is close enough
 *    (partial ratio, with a bonus when the practice city appears in the
 *    affiliations).
 *
 * ## Quick Start
 *
 * ```no_run
 * use nppes_pubmatch::prelude::*;
 *
 * # fn main() -> Result<()> {
 * let config = ConfigBuilder::new()
 *     .provider_extract("data/npidata_pfile_20240101-20240107.csv")
 *     .taxonomy("data/nucc_taxonomy_251.csv")
 *     .read_limit(Some(1_000))
 *     .build();
 *
 * let summary = run_enrichment(&config)?;
 * println!("Wrote {} individual providers", summary.rows_written);
 * # Ok(())
 * # }
 * ```
 *
 * ## Matching
 *
 * ```no_run
 * # use nppes_pubmatch::prelude::*;
 * # use std::sync::Arc;
 * # use std::sync::atomic::AtomicBool;
 * # async fn demo() -> Result<()> {
 * let config = PipelineConfig::default();
 * let records = ProviderReader::new().load_enriched(&config.paths.enriched_output)?;
 * let queries: Vec<DoctorQuery> = records.iter().map(DoctorQuery::from_record).collect();
 *
 * let client = EntrezClient::from_config(&config.matcher)?;
 * let matcher = PublicationMatcher::new(client, MatchScoring::from_config(&config.matcher));
 * let outcome = matcher
 *     .match_batch(&queries, Arc::new(AtomicBool::new(false)), config.matcher.concurrency)
 *     .await;
 *
 * for result in &outcome.results {
 *     println!("{}: {}", result.doctor, result.matched_publications);
 * }
 * # Ok(())
 * # }
 * ```
 *
 * ## Data Files
 *
 * - **Provider extract**: `npidata_pfile_YYYYMMDD-YYYYMMDD.csv` from
 *   https://download.cms.gov/nppes/NPI_Files.html
 * - **Taxonomy reference**: `nucc_taxonomy_XXX.csv` from https://www.nucc.org
 */

// Re-export error types from root
pub use error::{PubMatchError, Result, ErrorContext, ExportFormat};

// Public modules
pub mod data_types;
pub mod reader;
pub mod schema;
pub mod error;
pub mod config;
pub mod logging;
pub mod enrichment;
pub mod export;
pub mod pipeline;
pub mod similarity;
pub mod literature;
pub mod matcher;

/// Prelude module for convenient imports
///
/// Import everything you need with:
/// ```
/// use nppes_pubmatch::prelude::*;
/// ```
pub mod prelude {
    pub use crate::data_types::*;
    pub use crate::reader::{ProviderReader, ProviderTable};
    pub use crate::schema::*;
    pub use crate::error::{PubMatchError, Result};
    pub use crate::config::{ConfigBuilder, PipelineConfig, MatcherConfig};
    pub use crate::enrichment::{enrich, run_enrichment, EnrichmentSummary, TaxonomyIndex};
    pub use crate::export::{EnrichedCsvWriter, ResultExporter, exporter_for};
    pub use crate::pipeline::{PipelineState, Stage};
    pub use crate::similarity::{partial_ratio, ratio};
    pub use crate::literature::{EntrezClient, LiteratureSource};
    pub use crate::matcher::{BatchOutcome, DoctorQuery, MatchScoring, PublicationMatcher};
    pub use crate::ExportFormat;
}

/// Pipeline constants
pub mod constants {
    /// Number of taxonomy slots joined against the reference table
    pub const MAX_TAXONOMY_SLOTS: usize = 3;

    /// Entity type code for Individual providers
    pub const ENTITY_TYPE_INDIVIDUAL: &str = "1";

    /// Entity type code for Organization providers
    pub const ENTITY_TYPE_ORGANIZATION: &str = "2";

    /// Author scores must exceed this to count
    pub const DEFAULT_MATCH_THRESHOLD: f64 = 70.0;

    /// Added to an author's score when the practice city appears in the
    /// record's affiliations
    pub const DEFAULT_CITY_BONUS: f64 = 20.0;

    /// `retmax` of the search request
    pub const DEFAULT_MAX_SEARCH_RESULTS: usize = 200;

    /// NCBI E-utilities endpoints
    pub const ESEARCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi";
    pub const EFETCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi";
    pub const DEFAULT_DATABASE: &str = "pubmed";

    /// Default pipeline file locations
    pub const DEFAULT_ENRICHED_OUTPUT: &str = "results.csv";
    pub const DEFAULT_STATE_FILE: &str = "pipeline_state.json";
}
