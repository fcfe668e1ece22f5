/*!
 * Stage orchestration and the pipeline state record
 *
 * Completion of the enrichment stage is recorded in a small JSON state file
 * together with fingerprints (size, modification time) of the inputs it was
 * built from. `run` consults that record instead of the mere existence of
 * the enriched table, so stale or partial output is not silently reused.
 */

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::{EnrichmentConfig, PipelineConfig};
use crate::data_types::MatchStatus;
use crate::enrichment::{run_enrichment, EnrichmentSummary};
use crate::export::{exporter_for, write_atomically};
use crate::literature::LiteratureSource;
use crate::matcher::{BatchOutcome, DoctorQuery, MatchScoring, PublicationMatcher};
use crate::reader::ProviderReader;
use crate::{PubMatchError, Result};

/// Last completed stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Enrichment,
    Matching,
}

/// Identity of an input file at the time it was read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFingerprint {
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl FileFingerprint {
    pub fn of<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        })
    }
}

/// Summary of the most recent matching run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchingRun {
    pub doctors: usize,
    pub matched: usize,
    pub no_candidates: usize,
    pub skipped: usize,
    pub failed: usize,
    pub interrupted: bool,
    pub completed_at: DateTime<Utc>,
}

/// Contents of the state file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub stage: Stage,
    pub enriched_output: PathBuf,
    pub rows_written: usize,
    pub provider_extract: Option<FileFingerprint>,
    pub taxonomy: Option<FileFingerprint>,
    /// Row caps and invalid-row handling the table was built with
    #[serde(default)]
    pub enrichment: Option<EnrichmentConfig>,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matching: Option<MatchingRun>,
}

impl PipelineState {
    /// State after a successful enrichment run
    pub fn after_enrichment(config: &PipelineConfig, summary: &EnrichmentSummary) -> Result<Self> {
        let fingerprint = |path: &Option<PathBuf>| path.as_ref().map(FileFingerprint::of).transpose();
        Ok(Self {
            stage: Stage::Enrichment,
            enriched_output: summary.output.clone(),
            rows_written: summary.rows_written,
            provider_extract: fingerprint(&config.paths.provider_extract)?,
            taxonomy: fingerprint(&config.paths.taxonomy)?,
            enrichment: Some(config.enrichment.clone()),
            completed_at: Utc::now(),
            matching: None,
        })
    }

    /// Read the state file; a missing file is `Ok(None)`
    ///
    /// An unreadable or corrupt state file is reported and treated as
    /// missing, which makes `run` rebuild the enriched table.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str(&contents) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!(file = %path.display(), "ignoring unreadable pipeline state: {}", e);
                Ok(None)
            }
        }
    }

    /// Write the state file atomically
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_atomically(path.as_ref(), |out| {
            serde_json::to_writer_pretty(&mut *out, self)?;
            writeln!(out)?;
            Ok(())
        })
    }

    /// Why the recorded enrichment can't be reused, if it can't
    pub fn staleness(&self, config: &PipelineConfig) -> Option<String> {
        if self.enriched_output != config.paths.enriched_output {
            return Some(format!(
                "state records output '{}' but '{}' is configured",
                self.enriched_output.display(),
                config.paths.enriched_output.display()
            ));
        }
        if !self.enriched_output.exists() {
            return Some(format!("enriched output '{}' is missing", self.enriched_output.display()));
        }

        if self.enrichment.as_ref() != Some(&config.enrichment) {
            return Some("enrichment settings changed since the last enrichment".to_string());
        }

        let inputs = [
            ("provider extract", &config.paths.provider_extract, &self.provider_extract),
            ("taxonomy table", &config.paths.taxonomy, &self.taxonomy),
        ];
        for (label, configured, recorded) in inputs {
            // Inputs that are not configured (or no longer present) can't be checked
            let Some(path) = configured else { continue };
            let Ok(current) = FileFingerprint::of(path) else { continue };
            if recorded.as_ref() != Some(&current) {
                return Some(format!("{} '{}' changed since the last enrichment", label, path.display()));
            }
        }
        None
    }
}

/// What `run` does about stage 1
#[derive(Debug, Clone, PartialEq)]
pub enum EnrichmentPlan {
    /// Build (or rebuild) the enriched table
    Enrich { reason: String },
    /// The recorded enrichment is current
    Reuse(PipelineState),
    /// An enriched table exists without a state record and the inputs are
    /// unavailable, so it is used as is
    UseExisting,
}

fn inputs_available(config: &PipelineConfig) -> bool {
    let present = |path: &Option<PathBuf>| path.as_ref().is_some_and(|p| p.exists());
    present(&config.paths.provider_extract) && present(&config.paths.taxonomy)
}

/// Decide whether stage 1 must run
pub fn plan_enrichment(config: &PipelineConfig, force: bool) -> Result<EnrichmentPlan> {
    if force {
        return Ok(EnrichmentPlan::Enrich { reason: "forced".to_string() });
    }

    match PipelineState::load(&config.paths.state_file)? {
        Some(state) => match state.staleness(config) {
            Some(reason) => Ok(EnrichmentPlan::Enrich { reason }),
            None => Ok(EnrichmentPlan::Reuse(state)),
        },
        None if config.paths.enriched_output.exists() => {
            if inputs_available(config) {
                warn!(
                    output = %config.paths.enriched_output.display(),
                    "enriched output has no state record; rebuilding it"
                );
                Ok(EnrichmentPlan::Enrich { reason: "no state record for existing output".to_string() })
            } else {
                warn!(
                    output = %config.paths.enriched_output.display(),
                    "enriched output has no state record and inputs are unavailable; using it as is"
                );
                Ok(EnrichmentPlan::UseExisting)
            }
        }
        None => Ok(EnrichmentPlan::Enrich { reason: "no enriched output yet".to_string() }),
    }
}

/// Run stage 1 and record its completion
pub fn enrich_stage(config: &PipelineConfig) -> Result<EnrichmentSummary> {
    let summary = run_enrichment(config)?;
    let state = PipelineState::after_enrichment(config, &summary)?;
    state.save(&config.paths.state_file)?;
    Ok(summary)
}

async fn enrich_blocking(config: &PipelineConfig) -> Result<EnrichmentSummary> {
    let owned = config.clone();
    tokio::task::spawn_blocking(move || enrich_stage(&owned))
        .await
        .map_err(|e| PubMatchError::Custom {
            message: format!("enrichment task failed: {}", e),
            suggestion: None,
        })?
}

/// Run stage 2 over the enriched table
///
/// Results are persisted when `paths.match_results` is set, and the state
/// record (if any) notes the run.
pub async fn match_stage<S: LiteratureSource>(
    config: &PipelineConfig,
    source: S,
    cancel: Arc<AtomicBool>,
) -> Result<BatchOutcome> {
    let records = ProviderReader::new().load_enriched(&config.paths.enriched_output)?;
    let queries: Vec<DoctorQuery> = records.iter().map(DoctorQuery::from_record).collect();
    info!(doctors = queries.len(), "starting publication matching");

    let matcher = PublicationMatcher::new(source, MatchScoring::from_config(&config.matcher))
        .with_max_results(config.matcher.max_results);
    #[cfg(feature = "progress")]
    let matcher = matcher.with_progress_bar(config.output.progress);

    let outcome = matcher.match_batch(&queries, cancel, config.matcher.concurrency).await;

    if let Some(path) = &config.paths.match_results {
        exporter_for(config.output.format, config.output.pretty).export(&outcome.results, path)?;
        info!("saved match results to {}", path.display());
    }

    if let Some(mut state) = PipelineState::load(&config.paths.state_file)? {
        state.stage = Stage::Matching;
        state.matching = Some(MatchingRun {
            doctors: queries.len(),
            matched: outcome.count_with_status(MatchStatus::Matched),
            no_candidates: outcome.count_with_status(MatchStatus::NoCandidates),
            skipped: outcome.count_with_status(MatchStatus::Skipped),
            failed: outcome.count_with_status(MatchStatus::Failed),
            interrupted: outcome.interrupted,
            completed_at: Utc::now(),
        });
        state.save(&config.paths.state_file)?;
    }

    info!(
        processed = outcome.results.len(),
        publications = outcome.total_publications(),
        interrupted = outcome.interrupted,
        "publication matching finished"
    );
    Ok(outcome)
}

/// Stage 1 if needed, then stage 2, in one invocation
///
/// Enrichment runs on the blocking pool so the runtime stays free. A failed
/// enrichment is logged; matching then proceeds only if an enriched table
/// from an earlier run exists.
pub async fn run<S: LiteratureSource>(
    config: &PipelineConfig,
    source: S,
    force_enrich: bool,
    cancel: Arc<AtomicBool>,
) -> Result<BatchOutcome> {
    match plan_enrichment(config, force_enrich)? {
        EnrichmentPlan::Enrich { reason } => {
            info!(reason = %reason, "running enrichment");
            if let Err(e) = enrich_blocking(config).await {
                error!("Error in enrichment: {}", e.user_message());
                if !config.paths.enriched_output.exists() {
                    return Err(e);
                }
                warn!(
                    "continuing with the previous enriched output {}",
                    config.paths.enriched_output.display()
                );
            }
        }
        EnrichmentPlan::Reuse(state) => {
            info!(
                rows = state.rows_written,
                completed_at = %state.completed_at,
                "{} is current, skipping enrichment",
                state.enriched_output.display()
            );
        }
        EnrichmentPlan::UseExisting => {}
    }

    if cancel.load(Ordering::SeqCst) {
        return Err(PubMatchError::Cancelled {
            message: "cancelled before matching started".to_string(),
        });
    }

    match_stage(config, source, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use tempfile::TempDir;

    fn config_in(dir: &Path) -> PipelineConfig {
        ConfigBuilder::new()
            .provider_extract(dir.join("npidata.csv"))
            .taxonomy(dir.join("nucc_taxonomy.csv"))
            .enriched_output(dir.join("results.csv"))
            .state_file(dir.join("pipeline_state.json"))
            .build()
    }

    fn summary(config: &PipelineConfig) -> EnrichmentSummary {
        EnrichmentSummary {
            rows_written: 3,
            output: config.paths.enriched_output.clone(),
            ..Default::default()
        }
    }

    #[test]
    fn test_plan_without_anything_enriches() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());
        assert!(matches!(plan_enrichment(&config, false).unwrap(), EnrichmentPlan::Enrich { .. }));
    }

    #[test]
    fn test_plan_reuses_current_state_and_detects_changes() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());
        std::fs::write(dir.path().join("npidata.csv"), "NPI,Entity Type Code\n").unwrap();
        std::fs::write(dir.path().join("nucc_taxonomy.csv"), "Code\n").unwrap();
        std::fs::write(&config.paths.enriched_output, "NPI\n").unwrap();

        let state = PipelineState::after_enrichment(&config, &summary(&config)).unwrap();
        state.save(&config.paths.state_file).unwrap();

        match plan_enrichment(&config, false).unwrap() {
            EnrichmentPlan::Reuse(loaded) => assert_eq!(loaded, state),
            other => panic!("expected reuse, got {other:?}"),
        }
        assert!(matches!(plan_enrichment(&config, true).unwrap(), EnrichmentPlan::Enrich { .. }));

        // Growing the extract changes its fingerprint
        std::fs::write(dir.path().join("npidata.csv"), "NPI,Entity Type Code\n1000000001,1\n").unwrap();
        match plan_enrichment(&config, false).unwrap() {
            EnrichmentPlan::Enrich { reason } => assert!(reason.contains("provider extract")),
            other => panic!("expected enrich, got {other:?}"),
        }
    }

    #[test]
    fn test_plan_detects_changed_row_caps() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(dir.path());
        config.enrichment.output_limit = Some(1);
        std::fs::write(dir.path().join("npidata.csv"), "NPI,Entity Type Code\n").unwrap();
        std::fs::write(dir.path().join("nucc_taxonomy.csv"), "Code\n").unwrap();
        std::fs::write(&config.paths.enriched_output, "NPI\n").unwrap();
        PipelineState::after_enrichment(&config, &summary(&config))
            .unwrap()
            .save(&config.paths.state_file)
            .unwrap();
        assert!(matches!(plan_enrichment(&config, false).unwrap(), EnrichmentPlan::Reuse(_)));

        config.enrichment.output_limit = None;
        match plan_enrichment(&config, false).unwrap() {
            EnrichmentPlan::Enrich { reason } => assert!(reason.contains("settings")),
            other => panic!("expected enrich, got {other:?}"),
        }

        config.enrichment.output_limit = Some(1);
        config.enrichment.skip_invalid_records = true;
        assert!(matches!(plan_enrichment(&config, false).unwrap(), EnrichmentPlan::Enrich { .. }));
    }

    #[test]
    fn test_state_without_settings_is_stale() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());
        std::fs::write(dir.path().join("npidata.csv"), "NPI,Entity Type Code\n").unwrap();
        std::fs::write(dir.path().join("nucc_taxonomy.csv"), "Code\n").unwrap();
        std::fs::write(&config.paths.enriched_output, "NPI\n").unwrap();
        let mut state = PipelineState::after_enrichment(&config, &summary(&config)).unwrap();
        state.enrichment = None;
        assert!(state.staleness(&config).is_some());
    }

    #[test]
    fn test_plan_with_missing_output_enriches() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());
        std::fs::write(dir.path().join("npidata.csv"), "NPI,Entity Type Code\n").unwrap();
        std::fs::write(dir.path().join("nucc_taxonomy.csv"), "Code\n").unwrap();
        let state = PipelineState::after_enrichment(&config, &summary(&config)).unwrap();
        state.save(&config.paths.state_file).unwrap();

        match plan_enrichment(&config, false).unwrap() {
            EnrichmentPlan::Enrich { reason } => assert!(reason.contains("missing")),
            other => panic!("expected enrich, got {other:?}"),
        }
    }

    #[test]
    fn test_legacy_output_without_state() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());
        std::fs::write(&config.paths.enriched_output, "NPI\n").unwrap();

        // Inputs absent: keep the existing table
        assert_eq!(plan_enrichment(&config, false).unwrap(), EnrichmentPlan::UseExisting);

        // Inputs present: rebuild
        std::fs::write(dir.path().join("npidata.csv"), "NPI,Entity Type Code\n").unwrap();
        std::fs::write(dir.path().join("nucc_taxonomy.csv"), "Code\n").unwrap();
        assert!(matches!(plan_enrichment(&config, false).unwrap(), EnrichmentPlan::Enrich { .. }));
    }

    #[test]
    fn test_corrupt_state_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pipeline_state.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(PipelineState::load(&path).unwrap().is_none());
    }
}
