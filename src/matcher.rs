/*!
 * Publication matching
 *
 * For each doctor: search the literature index for
 * `"<last> <first initial>[Author]"`, fetch the candidate records in one
 * request, and count the records with at least one author whose surname
 * scores above the threshold. The score is the partial ratio of the
 * lowercased surnames, plus a bonus when the doctor's practice city occurs
 * in the record's affiliation text.
 *
 * Every doctor ends in exactly one `MatchStatus`; a failure for one doctor
 * never stops the batch.
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[cfg(feature = "progress")]
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::MatcherConfig;
use crate::constants::{DEFAULT_CITY_BONUS, DEFAULT_MATCH_THRESHOLD, DEFAULT_MAX_SEARCH_RESULTS};
use crate::data_types::*;
use crate::literature::{parse_detail_records, LiteratureSource};
use crate::similarity::partial_ratio;
use crate::Result;

/// Author scoring rule
#[derive(Debug, Clone, Copy)]
pub struct MatchScoring {
    /// Scores must be strictly greater than this
    pub threshold: f64,
    pub city_bonus: f64,
    /// Surname similarity, 0-100; `partial_ratio` unless replaced
    pub similarity: fn(&str, &str) -> f64,
}

impl Default for MatchScoring {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
            city_bonus: DEFAULT_CITY_BONUS,
            similarity: partial_ratio,
        }
    }
}

impl MatchScoring {
    pub fn from_config(config: &MatcherConfig) -> Self {
        Self {
            threshold: config.threshold,
            city_bonus: config.city_bonus,
            ..Self::default()
        }
    }

    pub fn with_similarity(mut self, similarity: fn(&str, &str) -> f64) -> Self {
        self.similarity = similarity;
        self
    }

    /// Whether the bonus applies: non-empty city contained in the affiliations
    pub fn city_matches(city: &str, affiliation_text: &str) -> bool {
        !city.is_empty() && affiliation_text.to_lowercase().contains(&city.to_lowercase())
    }

    /// Score of one author entry against a doctor's surname and city
    pub fn score_author(&self, doctor_last: &str, doctor_city: &str, candidate: &MatchCandidate) -> f64 {
        let mut score = (self.similarity)(&doctor_last.to_lowercase(), &candidate.last_name.to_lowercase());
        if Self::city_matches(doctor_city, &candidate.affiliation_text) {
            score += self.city_bonus;
        }
        score
    }

    pub fn is_match(&self, score: f64) -> bool {
        score > self.threshold
    }

    /// A record counts when any of its authors scores above the threshold
    pub fn record_matches(&self, doctor: &DoctorQuery, record: &LiteratureRecord) -> bool {
        let last = doctor.last.to_lowercase();
        let bonus = if Self::city_matches(&doctor.city, &record.affiliation_text) {
            self.city_bonus
        } else {
            0.0
        };

        record
            .authors
            .iter()
            .any(|(author_last, _)| self.is_match((self.similarity)(&last, &author_last.to_lowercase()) + bonus))
    }

    /// Number of matching records; each record counts at most once
    pub fn count_matches(&self, doctor: &DoctorQuery, records: &[LiteratureRecord]) -> usize {
        records.iter().filter(|r| self.record_matches(doctor, r)).count()
    }
}

/// The doctor fields the matcher uses
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorQuery {
    pub first: String,
    pub last: String,
    pub city: String,
    pub npi: Option<String>,
    /// Display name of taxonomy slot 1, for progress output
    pub specialty: Option<String>,
}

impl DoctorQuery {
    pub fn new(first: impl Into<String>, last: impl Into<String>, city: impl Into<String>) -> Self {
        Self {
            first: first.into(),
            last: last.into(),
            city: city.into(),
            ..Default::default()
        }
    }

    pub fn with_npi(mut self, npi: impl Into<String>) -> Self {
        self.npi = Some(npi.into());
        self
    }

    pub fn from_record(record: &EnrichedRecord) -> Self {
        let provider = &record.provider;
        Self {
            first: provider.provider_name.first.clone().unwrap_or_default(),
            last: provider.provider_name.last.clone().unwrap_or_default(),
            city: provider.practice_address.city.clone().unwrap_or_default(),
            npi: Some(provider.npi.to_string()),
            specialty: record.primary_display_name().map(str::to_string),
        }
    }

    /// "First Last", as reported in results
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first, self.last)
    }

    /// `"<last> <first initial>[Author]"`; None when either name is empty
    pub fn search_term(&self) -> Option<String> {
        let initial = self.first.chars().next()?;
        if self.last.is_empty() {
            return None;
        }
        Some(format!("{} {}[Author]", self.last, initial))
    }
}

/// Results of a batch, in input order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub results: Vec<MatchResult>,
    /// Cancellation stopped the batch before every doctor was processed
    pub interrupted: bool,
}

impl BatchOutcome {
    pub fn count_with_status(&self, status: MatchStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn total_publications(&self) -> usize {
        self.results.iter().map(|r| r.matched_publications).sum()
    }
}

/// Matches doctors against a literature source
pub struct PublicationMatcher<S> {
    source: S,
    scoring: MatchScoring,
    max_results: usize,
    #[cfg(feature = "progress")]
    show_progress_bar: bool,
}

impl<S: LiteratureSource> PublicationMatcher<S> {
    pub fn new(source: S, scoring: MatchScoring) -> Self {
        Self {
            source,
            scoring,
            max_results: DEFAULT_MAX_SEARCH_RESULTS,
            #[cfg(feature = "progress")]
            show_progress_bar: false,
        }
    }

    /// Cap on identifiers requested per search
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    #[cfg(feature = "progress")]
    /// Enable or disable the progress bar
    pub fn with_progress_bar(mut self, show: bool) -> Self {
        self.show_progress_bar = show;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn scoring(&self) -> &MatchScoring {
        &self.scoring
    }

    /// Search, fetch and score; returns (identifiers found, matched records)
    async fn lookup(&self, query: &DoctorQuery, term: &str) -> Result<(usize, usize)> {
        let ids = self.source.search(term, self.max_results).await?;
        if ids.is_empty() {
            return Ok((0, 0));
        }

        let xml = self.source.fetch(&ids).await?;
        let records = parse_detail_records(&xml)?;
        Ok((ids.len(), self.scoring.count_matches(query, &records)))
    }

    /// Process one doctor; never fails, errors become `MatchStatus::Failed`
    pub async fn match_doctor(&self, query: &DoctorQuery) -> MatchResult {
        let mut result = MatchResult::new(query.display_name(), query.npi.clone(), MatchStatus::Skipped);

        let Some(term) = query.search_term() else {
            warn!(doctor = %result.doctor, npi = ?query.npi, "skipping doctor without first and last name");
            return result;
        };

        match self.lookup(query, &term).await {
            Ok((0, _)) => {
                result.status = MatchStatus::NoCandidates;
                result.candidates = Some(0);
            }
            Ok((candidates, matched)) => {
                result.status = MatchStatus::Matched;
                result.candidates = Some(candidates);
                result.matched_publications = matched;
            }
            Err(e) => {
                warn!(doctor = %result.doctor, npi = ?query.npi, "lookup failed: {}", e);
                result.status = MatchStatus::Failed;
                result.error = Some(e.to_string());
            }
        }

        result
    }

    /// Process doctors in order, at most `concurrency` at a time
    ///
    /// `cancel` is checked before each doctor starts; doctors already in
    /// flight finish, the rest are left out and the outcome is marked
    /// interrupted.
    pub async fn match_batch(&self, queries: &[DoctorQuery], cancel: Arc<AtomicBool>, concurrency: usize) -> BatchOutcome {
        let cancel = cancel.as_ref();

        #[cfg(feature = "progress")]
        let progress_bar = if self.show_progress_bar {
            let pb = ProgressBar::new(queries.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} doctors ({eta})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-")
            );
            Some(pb)
        } else {
            None
        };
        #[cfg(feature = "progress")]
        let progress = progress_bar.as_ref();

        let processed: Vec<Option<MatchResult>> = stream::iter(queries.iter())
            .map(|query| async move {
                if cancel.load(Ordering::SeqCst) {
                    return None;
                }

                info!(
                    "Finding data for {} - {}",
                    query.display_name(),
                    query.specialty.as_deref().unwrap_or("")
                );
                let result = self.match_doctor(query).await;

                #[cfg(feature = "progress")]
                if let Some(pb) = progress {
                    pb.inc(1);
                }

                Some(result)
            })
            .buffered(concurrency.max(1))
            .collect()
            .await;

        #[cfg(feature = "progress")]
        if let Some(pb) = progress_bar {
            pb.finish_and_clear();
        }

        let interrupted = processed.iter().any(Option::is_none);
        let results: Vec<MatchResult> = processed.into_iter().flatten().collect();

        if interrupted {
            warn!(
                processed = results.len(),
                total = queries.len(),
                "matching interrupted; returning partial results"
            );
        }

        BatchOutcome { results, interrupted }
    }
}
