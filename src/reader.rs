/*!
 * CSV readers for the pipeline's input tables
 *
 * Reads the NPPES provider extract (with an optional row cap), the NUCC
 * taxonomy reference table, and the enriched table written by the
 * enrichment stage. Columns are resolved by header name; cells are trimmed
 * and empty cells become `None`.
 */

use std::fs::File;
use std::path::Path;
use std::time::Instant;

use csv::{ReaderBuilder, StringRecord};
use tracing::{debug, info, warn};

#[cfg(feature = "progress")]
use indicatif::{ProgressBar, ProgressStyle};

use crate::{
    Result, PubMatchError, ErrorContext,
    data_types::*,
    schema::*,
};

/// Provider rows loaded from an extract, with bookkeeping for the summary
#[derive(Debug, Clone, Default)]
pub struct ProviderTable {
    pub records: Vec<ProviderRecord>,
    /// Data rows consumed from the file (valid or not)
    pub rows_read: usize,
    /// Rows skipped because they failed to parse
    pub invalid_rows: usize,
    /// Taxonomy slots whose code column exists in the file
    pub slots_present: Vec<usize>,
}

/// CSV reader for provider, taxonomy and enriched tables
pub struct ProviderReader {
    /// Maximum number of data rows to read from the provider extract
    row_limit: Option<usize>,
    /// Whether to skip invalid records (true) or fail on first error (false)
    skip_invalid_records: bool,
    /// Whether to show progress bar
    #[cfg(feature = "progress")]
    show_progress_bar: bool,
}

impl Default for ProviderReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderReader {
    /// Create a new reader with default settings
    pub fn new() -> Self {
        Self {
            row_limit: None,
            skip_invalid_records: false,
            #[cfg(feature = "progress")]
            show_progress_bar: false,
        }
    }

    /// Cap the number of provider rows read (None reads everything)
    pub fn with_row_limit(mut self, limit: Option<usize>) -> Self {
        self.row_limit = limit;
        self
    }

    /// Enable or disable skipping invalid records
    pub fn with_skip_invalid_records(mut self, skip: bool) -> Self {
        self.skip_invalid_records = skip;
        self
    }

    #[cfg(feature = "progress")]
    /// Enable or disable the progress bar
    pub fn with_progress_bar(mut self, show: bool) -> Self {
        self.show_progress_bar = show;
        self
    }

    /// Load provider rows from an NPPES extract
    pub fn load_providers<P: AsRef<Path>>(&self, path: P) -> Result<ProviderTable> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(PubMatchError::file_not_found_with_suggestion(path.to_path_buf()));
        }

        let file = File::open(path)?;
        #[cfg(feature = "progress")]
        let file_size = file.metadata()?.len();

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let headers: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();
        let index = ProviderExtractSchema::validate_headers(&headers, Some(path))?;

        let missing = index.missing(&ProviderExtractSchema::descriptive_columns());
        if !missing.is_empty() {
            warn!(file = %path.display(), columns = ?missing, "provider extract lacks columns; reading them as empty");
        }

        let slots_present: Vec<usize> = ProviderExtractSchema::taxonomy_slots()
            .iter()
            .filter(|slot| index.contains(slot.code))
            .map(|slot| slot.slot)
            .collect();
        debug!(slots = ?slots_present, "taxonomy slots present in extract");

        #[cfg(feature = "progress")]
        let progress_bar = if self.show_progress_bar {
            let pb = ProgressBar::new(file_size);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-")
            );
            Some(pb)
        } else {
            None
        };

        let mut table = ProviderTable {
            slots_present,
            ..Default::default()
        };
        let start_time = Instant::now();
        let mut csv_record = StringRecord::new();

        loop {
            if let Some(limit) = self.row_limit {
                if table.rows_read >= limit {
                    break;
                }
            }

            // header is line 1
            let line_number = table.rows_read + 2;
            let has_row = match reader.read_record(&mut csv_record) {
                Ok(has_row) => has_row,
                Err(e) => {
                    let error = PubMatchError::CsvParse {
                        message: format!("CSV error: {}", e),
                        line: Some(line_number),
                        column: None,
                        context: ErrorContext {
                            file_path: Some(path.to_path_buf()),
                            line_number: Some(line_number),
                            ..Default::default()
                        },
                    };
                    if self.skip_invalid_records && !is_io_error(&e) {
                        table.rows_read += 1;
                        table.invalid_rows += 1;
                        if table.invalid_rows <= 10 {
                            warn!("{}", error);
                        }
                        continue;
                    }
                    return Err(error);
                }
            };
            if !has_row {
                break;
            }
            table.rows_read += 1;

            #[cfg(feature = "progress")]
            if let Some(ref pb) = progress_bar {
                if table.rows_read % 1000 == 0 {
                    pb.set_position(reader.position().byte());
                }
            }

            match parse_provider_row(&csv_record, &index, line_number, None) {
                Ok(record) => table.records.push(record),
                Err(e) => {
                    table.invalid_rows += 1;
                    if self.skip_invalid_records {
                        if table.invalid_rows <= 10 {
                            warn!("Skipping invalid record {}: {}", line_number, e);
                        }
                    } else {
                        return Err(e);
                    }
                }
            }
        }

        #[cfg(feature = "progress")]
        if let Some(pb) = progress_bar {
            pb.finish_with_message("Loading complete");
        }

        let elapsed = start_time.elapsed();
        info!(
            "Loaded {} provider records from {} in {:.2}s",
            table.records.len(),
            path.display(),
            elapsed.as_secs_f64()
        );
        if table.invalid_rows > 0 {
            warn!("Skipped {} invalid provider records", table.invalid_rows);
        }

        Ok(table)
    }

    /// Load taxonomy reference data from CSV file
    pub fn load_taxonomy<P: AsRef<Path>>(&self, path: P) -> Result<Vec<TaxonomyEntry>> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(PubMatchError::file_not_found_with_suggestion(path.to_path_buf()));
        }

        let file = File::open(path)?;
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let headers: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();
        let index = TaxonomySchema::validate_headers(&headers, Some(path))?;

        let mut records = Vec::new();
        let start_time = Instant::now();

        for (idx, result) in reader.records().enumerate() {
            let csv_record = result.map_err(|e| PubMatchError::CsvParse {
                message: e.to_string(),
                line: Some(idx + 2), // +2 for header and 0-based index
                column: None,
                context: ErrorContext {
                    file_path: Some(path.to_path_buf()),
                    line_number: Some(idx + 2),
                    ..Default::default()
                },
            })?;

            let get = |column: &str| field(&csv_record, index.get(column));

            // Rows without a code can never be joined
            let Some(code) = get(TaxonomySchema::CODE) else {
                continue;
            };

            records.push(TaxonomyEntry {
                code,
                grouping: get(TaxonomySchema::GROUPING),
                classification: get(TaxonomySchema::CLASSIFICATION),
                specialization: get(TaxonomySchema::SPECIALIZATION),
                display_name: get(TaxonomySchema::DISPLAY_NAME),
            });
        }

        info!(
            "Loaded {} taxonomy reference records in {:.2}s",
            records.len(),
            start_time.elapsed().as_secs_f64()
        );

        Ok(records)
    }

    /// Load the enriched table written by the enrichment stage
    pub fn load_enriched<P: AsRef<Path>>(&self, path: P) -> Result<Vec<EnrichedRecord>> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(PubMatchError::FileNotFound {
                path: path.to_path_buf(),
                suggestion: "Run the enrichment stage first (`pubmatch enrich`)".to_string(),
            });
        }

        let file = File::open(path)?;
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let headers: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();
        let index = EnrichedSchema::validate_headers(&headers, Some(path))?;

        let mut records = Vec::new();
        for (idx, result) in reader.records().enumerate() {
            let line_number = idx + 2;
            let csv_record = result.map_err(|e| PubMatchError::CsvParse {
                message: e.to_string(),
                line: Some(line_number),
                column: None,
                context: ErrorContext {
                    file_path: Some(path.to_path_buf()),
                    line_number: Some(line_number),
                    ..Default::default()
                },
            })?;

            // The enriched table only ever holds individual providers
            let provider = parse_provider_row(&csv_record, &index, line_number, Some(EntityType::Individual))?;

            let enrichments = EnrichedSchema::enrichment_slots()
                .iter()
                .filter(|cols| provider.taxonomy_slot(cols.slot).is_some())
                .map(|cols| {
                    let grouping = field(&csv_record, index.get(cols.grouping));
                    let classification = field(&csv_record, index.get(cols.classification));
                    let specialization = field(&csv_record, index.get(cols.specialization));
                    let display_name = field(&csv_record, index.get(cols.display_name));
                    let code = provider.taxonomy_slot(cols.slot).and_then(|s| s.code.clone());

                    let matched = grouping.is_some()
                        || classification.is_some()
                        || specialization.is_some()
                        || display_name.is_some();
                    let entry = match (code, matched) {
                        (Some(code), true) => Some(TaxonomyEntry {
                            code,
                            grouping,
                            classification,
                            specialization,
                            display_name,
                        }),
                        _ => None,
                    };
                    SlotEnrichment { slot: cols.slot, entry }
                })
                .collect();

            records.push(EnrichedRecord { provider, enrichments });
        }

        info!("Loaded {} enriched records from {}", records.len(), path.display());
        Ok(records)
    }
}

/// Trimmed, non-empty cell at `index`
fn field(record: &StringRecord, index: Option<usize>) -> Option<String> {
    index
        .and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn is_io_error(err: &csv::Error) -> bool {
    matches!(err.kind(), csv::ErrorKind::Io(_))
}

/// Build a provider record from a row of either the extract or the
/// enriched table; both share the NPPES column names
fn parse_provider_row(
    record: &StringRecord,
    index: &HeaderIndex,
    line_number: usize,
    default_entity_type: Option<EntityType>,
) -> Result<ProviderRecord> {
    let get = |column: &str| field(record, index.get(column));

    let npi_str = get(COL_NPI).ok_or_else(|| PubMatchError::DataValidation {
        message: "Missing required field: NPI".to_string(),
        field: Some(COL_NPI.to_string()),
        value: None,
        context: ErrorContext {
            line_number: Some(line_number),
            ..Default::default()
        },
    })?;
    let npi = Npi::new(npi_str)?;

    let entity_type = if index.contains(COL_ENTITY_TYPE) {
        get(COL_ENTITY_TYPE).and_then(|code| EntityType::from_code(&code).ok())
    } else {
        default_entity_type
    };

    let taxonomy_slots = ProviderExtractSchema::taxonomy_slots()
        .iter()
        .filter(|cols| index.contains(cols.code))
        .map(|cols| TaxonomySlot {
            slot: cols.slot,
            code: get(cols.code),
            license_number: get(cols.license_number),
            license_state: get(cols.license_state),
            primary_switch: get(cols.primary_switch),
        })
        .collect();

    Ok(ProviderRecord {
        npi,
        entity_type,
        provider_name: ProviderName {
            prefix: get(COL_NAME_PREFIX),
            first: get(COL_FIRST_NAME),
            middle: get(COL_MIDDLE_NAME),
            last: get(COL_LAST_NAME),
            credential: get(COL_CREDENTIAL),
        },
        provider_other_name: ProviderName {
            prefix: get(COL_OTHER_NAME_PREFIX),
            first: get(COL_OTHER_FIRST_NAME),
            middle: get(COL_OTHER_MIDDLE_NAME),
            last: get(COL_OTHER_LAST_NAME),
            credential: get(COL_OTHER_CREDENTIAL),
        },
        mailing_address: Address {
            line_1: get(COL_MAILING_LINE_1),
            line_2: None,
            city: get(COL_MAILING_CITY),
        },
        practice_address: Address {
            line_1: get(COL_PRACTICE_LINE_1),
            line_2: get(COL_PRACTICE_LINE_2),
            city: get(COL_PRACTICE_CITY),
        },
        sex_code: get(COL_SEX_CODE),
        authorized_official: AuthorizedOfficial {
            first_name: get(COL_OFFICIAL_FIRST_NAME),
            middle_name: get(COL_OFFICIAL_MIDDLE_NAME),
            last_name: get(COL_OFFICIAL_LAST_NAME),
            title: get(COL_OFFICIAL_TITLE),
        },
        taxonomy_slots,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_providers_respects_row_limit() {
        let file = write_csv(
            "NPI,Entity Type Code,Provider First Name,Provider Last Name (Legal Name)\n\
             1000000001,1,Jane,Smith\n\
             1000000002,2,,\n\
             1000000003,1,John,Doe\n",
        );

        let table = ProviderReader::new().with_row_limit(Some(2)).load_providers(file.path()).unwrap();
        assert_eq!(table.rows_read, 2);
        assert_eq!(table.records.len(), 2);
        assert_eq!(table.records[1].entity_type, Some(EntityType::Organization));
        assert!(table.slots_present.is_empty());

        let all = ProviderReader::new().load_providers(file.path()).unwrap();
        assert_eq!(all.records.len(), 3);
    }

    #[test]
    fn test_load_providers_reads_present_slots_only() {
        let file = write_csv(
            "NPI,Entity Type Code,Healthcare Provider Taxonomy Code_1,Healthcare Provider Primary Taxonomy Switch_1,Healthcare Provider Taxonomy Code_3\n\
             1000000001,1, 207Q00000X ,Y,\n",
        );

        let table = ProviderReader::new().load_providers(file.path()).unwrap();
        assert_eq!(table.slots_present, vec![1, 3]);
        let record = &table.records[0];
        assert_eq!(record.taxonomy_slots.len(), 2);
        assert_eq!(record.taxonomy_slot(1).unwrap().code.as_deref(), Some("207Q00000X"));
        assert!(record.taxonomy_slot(1).unwrap().is_primary());
        assert_eq!(record.taxonomy_slot(3).unwrap().code, None);
        assert!(record.taxonomy_slot(2).is_none());
    }

    #[test]
    fn test_invalid_npi_fails_or_is_skipped() {
        let file = write_csv("NPI,Entity Type Code\nABC,1\n1000000001,1\n");

        let err = ProviderReader::new().load_providers(file.path()).unwrap_err();
        assert!(matches!(err, PubMatchError::InvalidNpi { .. }));

        let table = ProviderReader::new()
            .with_skip_invalid_records(true)
            .load_providers(file.path())
            .unwrap();
        assert_eq!(table.records.len(), 1);
        assert_eq!(table.invalid_rows, 1);
    }

    #[test]
    fn test_missing_entity_type_column_is_schema_error() {
        let file = write_csv("NPI,Provider First Name\n1000000001,Jane\n");
        let err = ProviderReader::new().load_providers(file.path()).unwrap_err();
        assert!(matches!(err, PubMatchError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_load_taxonomy_skips_rows_without_code() {
        let file = write_csv(
            "Code,Grouping,Classification,Specialization,Definition,Display Name\n\
             207Q00000X,Allopathic & Osteopathic Physicians,Family Medicine,,def,Family Medicine Physician\n\
             ,orphan,,,,\n",
        );

        let entries = ProviderReader::new().load_taxonomy(file.path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].specialization, None);
        assert_eq!(entries[0].display_name.as_deref(), Some("Family Medicine Physician"));
    }

    #[test]
    fn test_missing_files_are_reported() {
        let err = ProviderReader::new().load_taxonomy("/nonexistent/nucc_taxonomy_251.csv").unwrap_err();
        assert!(matches!(err, PubMatchError::FileNotFound { .. }));
        let err = ProviderReader::new().load_enriched("/nonexistent/results.csv").unwrap_err();
        assert!(matches!(err, PubMatchError::FileNotFound { .. }));
    }
}
