/*!
 * Taxonomy enrichment of provider records
 *
 * Each provider's taxonomy slots are left-joined against the NUCC reference
 * table by exact code. Every input row yields exactly one output row, with
 * unmatched or empty slots carrying no description. Organizations are then
 * dropped and the result optionally truncated.
 *
 * The join itself is pure; `run_enrichment` adds file reading and the atomic
 * CSV write around it.
 */

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::data_types::*;
use crate::export::EnrichedCsvWriter;
use crate::reader::ProviderReader;
use crate::{PubMatchError, Result};

/// Taxonomy lookup by code
///
/// The reference table should have unique codes; when it doesn't, the first
/// row for a code is kept so the join never multiplies provider rows.
#[derive(Debug, Clone, Default)]
pub struct TaxonomyIndex {
    entries: HashMap<String, TaxonomyEntry>,
    duplicates: Vec<String>,
}

impl TaxonomyIndex {
    pub fn from_entries(entries: impl IntoIterator<Item = TaxonomyEntry>) -> Self {
        let mut index = Self::default();
        for entry in entries {
            let code = entry.code.trim().to_string();
            if index.entries.contains_key(&code) {
                index.duplicates.push(code);
                continue;
            }
            index.entries.insert(code, entry);
        }
        index
    }

    /// Exact, case-sensitive lookup
    pub fn get(&self, code: &str) -> Option<&TaxonomyEntry> {
        self.entries.get(code)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Codes that appeared more than once, one element per extra row
    pub fn duplicates(&self) -> &[String] {
        &self.duplicates
    }
}

/// Join one provider's taxonomy slots against the index
pub fn enrich_record(provider: ProviderRecord, index: &TaxonomyIndex) -> EnrichedRecord {
    let enrichments = provider
        .taxonomy_slots
        .iter()
        .map(|slot| SlotEnrichment {
            slot: slot.slot,
            entry: slot.code.as_deref().and_then(|code| index.get(code)).cloned(),
        })
        .collect();

    EnrichedRecord { provider, enrichments }
}

/// Left-join every provider against the index, preserving input order
pub fn enrich(providers: Vec<ProviderRecord>, index: &TaxonomyIndex) -> Vec<EnrichedRecord> {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        providers
            .into_par_iter()
            .map(|provider| enrich_record(provider, index))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        providers
            .into_iter()
            .map(|provider| enrich_record(provider, index))
            .collect()
    }
}

/// Keep entity type 1 only; blank or unknown entity types are dropped too
pub fn retain_individuals(records: Vec<EnrichedRecord>) -> Vec<EnrichedRecord> {
    records.into_iter().filter(|r| r.provider.is_individual()).collect()
}

/// Join outcome counts for one taxonomy slot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotStats {
    pub slot: usize,
    /// Code found in the reference table
    pub matched: usize,
    /// Code present but unknown to the reference table
    pub unmatched: usize,
    /// No code in this slot
    pub empty: usize,
}

impl SlotStats {
    /// Tally slot outcomes over `records`
    pub fn collect(records: &[EnrichedRecord], slots: &[usize]) -> Vec<SlotStats> {
        slots
            .iter()
            .map(|&slot| {
                let mut stats = SlotStats { slot, ..Default::default() };
                for record in records {
                    let has_code = record
                        .provider
                        .taxonomy_slot(slot)
                        .is_some_and(|s| s.code.is_some());
                    match (has_code, record.slot_entry(slot).is_some()) {
                        (true, true) => stats.matched += 1,
                        (true, false) => stats.unmatched += 1,
                        (false, _) => stats.empty += 1,
                    }
                }
                stats
            })
            .collect()
    }
}

/// What one enrichment run did
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentSummary {
    /// Data rows consumed from the provider extract
    pub rows_read: usize,
    pub invalid_rows: usize,
    /// Rows after the join; equals `rows_read - invalid_rows`
    pub joined_rows: usize,
    pub individuals: usize,
    /// Organizations and rows without a usable entity type
    pub non_individuals_dropped: usize,
    pub rows_written: usize,
    pub taxonomy_codes: usize,
    pub duplicate_taxonomy_codes: usize,
    pub slots: Vec<SlotStats>,
    pub output: PathBuf,
    pub elapsed_ms: u128,
}

/// Read both inputs, enrich, filter, cap and write the enriched table
///
/// Nothing is written unless every step succeeds; the destination is
/// replaced atomically.
pub fn run_enrichment(config: &PipelineConfig) -> Result<EnrichmentSummary> {
    let start = Instant::now();

    let provider_path = config.paths.provider_extract.as_ref().ok_or_else(|| PubMatchError::Configuration {
        message: "No provider extract configured".to_string(),
        suggestion: Some("Pass --provider-extract or set paths.provider_extract".to_string()),
    })?;
    let taxonomy_path = config.paths.taxonomy.as_ref().ok_or_else(|| PubMatchError::Configuration {
        message: "No taxonomy reference table configured".to_string(),
        suggestion: Some("Pass --taxonomy or set paths.taxonomy".to_string()),
    })?;

    info!(
        provider_extract = %provider_path.display(),
        taxonomy = %taxonomy_path.display(),
        "starting enrichment"
    );

    let reader = ProviderReader::new()
        .with_row_limit(config.enrichment.read_limit)
        .with_skip_invalid_records(config.enrichment.skip_invalid_records);
    #[cfg(feature = "progress")]
    let reader = reader.with_progress_bar(config.output.progress);

    let table = reader.load_providers(provider_path)?;
    let index = TaxonomyIndex::from_entries(reader.load_taxonomy(taxonomy_path)?);

    if !index.duplicates().is_empty() {
        warn!(
            count = index.duplicates().len(),
            first = %index.duplicates()[0],
            "taxonomy table has duplicate codes; keeping the first row of each"
        );
    }

    let rows_read = table.rows_read;
    let invalid_rows = table.invalid_rows;
    let slots_present = table.slots_present;

    let joined = enrich(table.records, &index);
    let joined_rows = joined.len();

    let mut individuals = retain_individuals(joined);
    let individual_count = individuals.len();

    if let Some(limit) = config.enrichment.output_limit {
        individuals.truncate(limit);
    }

    let output = config.paths.enriched_output.clone();
    EnrichedCsvWriter::new().write(&individuals, &output)?;

    let summary = EnrichmentSummary {
        rows_read,
        invalid_rows,
        joined_rows,
        individuals: individual_count,
        non_individuals_dropped: joined_rows - individual_count,
        rows_written: individuals.len(),
        taxonomy_codes: index.len(),
        duplicate_taxonomy_codes: index.duplicates().len(),
        slots: SlotStats::collect(&individuals, &slots_present),
        output,
        elapsed_ms: start.elapsed().as_millis(),
    };

    info!(
        rows_read = summary.rows_read,
        rows_written = summary.rows_written,
        dropped = summary.non_individuals_dropped,
        "enrichment complete, wrote {}",
        summary.output.display()
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(code: &str, display: &str) -> TaxonomyEntry {
        TaxonomyEntry {
            code: code.to_string(),
            grouping: Some("Allopathic & Osteopathic Physicians".to_string()),
            classification: Some(display.to_string()),
            specialization: None,
            display_name: Some(format!("{} Physician", display)),
        }
    }

    fn provider(npi: &str, entity: Option<EntityType>, codes: &[Option<&str>]) -> ProviderRecord {
        ProviderRecord {
            npi: Npi::new(npi.to_string()).unwrap(),
            entity_type: entity,
            provider_name: ProviderName::default(),
            provider_other_name: ProviderName::default(),
            mailing_address: Address::default(),
            practice_address: Address::default(),
            sex_code: None,
            authorized_official: AuthorizedOfficial::default(),
            taxonomy_slots: codes
                .iter()
                .enumerate()
                .map(|(i, code)| TaxonomySlot {
                    code: code.map(str::to_string),
                    ..TaxonomySlot::empty(i + 1)
                })
                .collect(),
        }
    }

    #[test]
    fn test_index_keeps_first_duplicate() {
        let index = TaxonomyIndex::from_entries(vec![
            entry("207Q00000X", "Family Medicine"),
            entry("207Q00000X", "Shadowed"),
            entry("208D00000X", "General Practice"),
        ]);
        assert_eq!(index.len(), 2);
        assert_eq!(index.duplicates(), ["207Q00000X".to_string()]);
        assert_eq!(
            index.get("207Q00000X").unwrap().classification.as_deref(),
            Some("Family Medicine")
        );
        assert!(index.get("207q00000x").is_none());
    }

    #[test]
    fn test_left_join_preserves_rows_and_order() {
        let index = TaxonomyIndex::from_entries(vec![entry("207Q00000X", "Family Medicine")]);
        let providers = vec![
            provider("1000000001", Some(EntityType::Individual), &[Some("207Q00000X"), Some("UNKNOWN"), None]),
            provider("1000000002", Some(EntityType::Organization), &[None, None, None]),
            provider("1000000003", None, &[Some("207Q00000X")]),
        ];

        let enriched = enrich(providers, &index);
        assert_eq!(enriched.len(), 3);
        assert_eq!(enriched[0].provider.npi.as_str(), "1000000001");
        assert_eq!(enriched[2].provider.npi.as_str(), "1000000003");

        let first = &enriched[0];
        assert_eq!(first.primary_display_name(), Some("Family Medicine Physician"));
        assert!(first.slot_entry(2).is_none());
        assert!(first.slot_entry(3).is_none());
    }

    #[test]
    fn test_retain_individuals_drops_organizations_and_blanks() {
        let index = TaxonomyIndex::default();
        let enriched = enrich(
            vec![
                provider("1000000001", Some(EntityType::Individual), &[]),
                provider("1000000002", Some(EntityType::Organization), &[]),
                provider("1000000003", None, &[]),
            ],
            &index,
        );
        let kept = retain_individuals(enriched);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].provider.npi.as_str(), "1000000001");
    }

    #[test]
    fn test_slot_stats() {
        let index = TaxonomyIndex::from_entries(vec![entry("207Q00000X", "Family Medicine")]);
        let enriched = enrich(
            vec![
                provider("1000000001", Some(EntityType::Individual), &[Some("207Q00000X"), Some("BOGUS")]),
                provider("1000000002", Some(EntityType::Individual), &[None, Some("207Q00000X")]),
            ],
            &index,
        );
        let stats = SlotStats::collect(&enriched, &[1, 2]);
        assert_eq!(stats[0], SlotStats { slot: 1, matched: 1, unmatched: 0, empty: 1 });
        assert_eq!(stats[1], SlotStats { slot: 2, matched: 1, unmatched: 1, empty: 0 });
    }

    #[test]
    fn test_run_enrichment_requires_inputs() {
        let err = run_enrichment(&PipelineConfig::default()).unwrap_err();
        assert!(matches!(err, PubMatchError::Configuration { .. }));
    }
}
