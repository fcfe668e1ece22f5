/*!
 * Export functionality for enriched tables and match results
 *
 * The enriched table is written as the 45-column CSV read back by the
 * matching stage. Match results can be written as JSON, JSON Lines or CSV.
 * Files are written to a temporary sibling and renamed into place, so a
 * failed export never leaves a partial file behind.
 */

use std::io::{BufWriter, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::data_types::*;
use crate::schema::{EnrichedSchema, ProviderExtractSchema};
use crate::{ExportFormat, PubMatchError, Result};

/// Write `path` through a temporary file in the same directory
///
/// The destination is only replaced after `write` succeeds and the data
/// is flushed; on error the temporary file is removed.
pub fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }

    let mut temp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        write(&mut writer)?;
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| PubMatchError::from(e.error))?;

    debug!("wrote {}", path.display());
    Ok(())
}

fn export_error(err: impl std::fmt::Display, format: ExportFormat) -> PubMatchError {
    PubMatchError::Export {
        message: err.to_string(),
        format,
        suggestion: None,
    }
}

fn cell(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

/// Writer for the enriched provider table
#[derive(Debug, Clone)]
pub struct EnrichedCsvWriter {
    /// Field delimiter
    pub delimiter: u8,
}

impl Default for EnrichedCsvWriter {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

impl EnrichedCsvWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Replace `path` with the given records, header first
    pub fn write<P: AsRef<Path>>(&self, records: &[EnrichedRecord], path: P) -> Result<()> {
        write_atomically(path.as_ref(), |out| self.write_to(records, out))
    }

    /// Write header and rows to any writer
    pub fn write_to(&self, records: &[EnrichedRecord], out: &mut dyn Write) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(false)
            .from_writer(out);

        writer
            .write_record(EnrichedSchema::column_names())
            .map_err(|e| export_error(e, ExportFormat::Csv))?;
        for record in records {
            writer
                .write_record(Self::row(record))
                .map_err(|e| export_error(e, ExportFormat::Csv))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Cells of one record in `EnrichedSchema::column_names` order
    fn row(record: &EnrichedRecord) -> Vec<&str> {
        let p = &record.provider;
        let mut row = vec![
            p.npi.as_str(),
            cell(&p.provider_name.first),
            cell(&p.provider_name.middle),
            cell(&p.provider_name.last),
            cell(&p.provider_name.prefix),
            cell(&p.provider_name.credential),
            cell(&p.provider_other_name.first),
            cell(&p.provider_other_name.middle),
            cell(&p.provider_other_name.last),
            cell(&p.provider_other_name.prefix),
            cell(&p.provider_other_name.credential),
            cell(&p.mailing_address.line_1),
            cell(&p.mailing_address.city),
            cell(&p.practice_address.line_1),
            cell(&p.practice_address.line_2),
            cell(&p.practice_address.city),
            cell(&p.sex_code),
            cell(&p.authorized_official.first_name),
            cell(&p.authorized_official.middle_name),
            cell(&p.authorized_official.last_name),
            cell(&p.authorized_official.title),
        ];

        for cols in ProviderExtractSchema::taxonomy_slots() {
            match p.taxonomy_slot(cols.slot) {
                Some(slot) => row.extend([
                    cell(&slot.code),
                    cell(&slot.license_number),
                    cell(&slot.license_state),
                    cell(&slot.primary_switch),
                ]),
                None => row.extend(["", "", "", ""]),
            }
        }

        for cols in EnrichedSchema::enrichment_slots() {
            match record.slot_entry(cols.slot) {
                Some(entry) => row.extend([
                    cell(&entry.grouping),
                    cell(&entry.classification),
                    cell(&entry.specialization),
                    cell(&entry.display_name),
                ]),
                None => row.extend(["", "", "", ""]),
            }
        }

        row
    }
}

/// Trait for match result exporters
pub trait ResultExporter {
    /// Serialize results to a writer
    fn write_to(&self, results: &[MatchResult], out: &mut dyn Write) -> Result<()>;

    /// Get the export format
    fn format(&self) -> ExportFormat;

    /// Replace `path` with the serialized results
    fn export(&self, results: &[MatchResult], path: &Path) -> Result<()> {
        write_atomically(path, |out| self.write_to(results, out))
    }
}

/// JSON exporter for match results
pub struct JsonExporter {
    /// Whether to pretty-print the JSON
    pub pretty_print: bool,
    /// Whether to export as JSON Lines (one record per line)
    pub json_lines: bool,
}

impl Default for JsonExporter {
    fn default() -> Self {
        Self {
            pretty_print: true,
            json_lines: false,
        }
    }
}

impl JsonExporter {
    /// Create a new JSON exporter
    pub fn new() -> Self {
        Self::default()
    }

    /// Set pretty printing
    pub fn with_pretty_print(mut self, pretty: bool) -> Self {
        self.pretty_print = pretty;
        self
    }

    /// Set JSON Lines format
    pub fn as_json_lines(mut self) -> Self {
        self.json_lines = true;
        self.pretty_print = false; // JSON Lines shouldn't be pretty printed
        self
    }
}

impl ResultExporter for JsonExporter {
    fn write_to(&self, results: &[MatchResult], out: &mut dyn Write) -> Result<()> {
        if self.json_lines {
            for result in results {
                serde_json::to_writer(&mut *out, result)?;
                writeln!(out)?;
            }
        } else if self.pretty_print {
            serde_json::to_writer_pretty(&mut *out, results)?;
            writeln!(out)?;
        } else {
            serde_json::to_writer(&mut *out, results)?;
            writeln!(out)?;
        }
        Ok(())
    }

    fn format(&self) -> ExportFormat {
        if self.json_lines {
            ExportFormat::JsonLines
        } else {
            ExportFormat::Json
        }
    }
}

/// CSV exporter for match results
pub struct CsvExporter {
    /// Whether to include headers
    pub include_headers: bool,
    /// Field delimiter
    pub delimiter: u8,
}

impl Default for CsvExporter {
    fn default() -> Self {
        Self {
            include_headers: true,
            delimiter: b',',
        }
    }
}

impl CsvExporter {
    /// Create a new CSV exporter
    pub fn new() -> Self {
        Self::default()
    }

    /// Set delimiter
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }
}

impl ResultExporter for CsvExporter {
    fn write_to(&self, results: &[MatchResult], out: &mut dyn Write) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(false)
            .from_writer(out);

        if self.include_headers {
            writer
                .write_record(["doctor", "NPI", "matched_publications", "status", "candidates", "error"])
                .map_err(|e| export_error(e, ExportFormat::Csv))?;
        }

        for result in results {
            let matched = result.matched_publications.to_string();
            let candidates = result.candidates.map(|c| c.to_string()).unwrap_or_default();
            let status = result.status.to_string();
            writer
                .write_record([
                    result.doctor.as_str(),
                    cell(&result.npi),
                    matched.as_str(),
                    status.as_str(),
                    candidates.as_str(),
                    cell(&result.error),
                ])
                .map_err(|e| export_error(e, ExportFormat::Csv))?;
        }
        writer.flush()?;
        Ok(())
    }

    fn format(&self) -> ExportFormat {
        ExportFormat::Csv
    }
}

/// Exporter for a configured output format
pub fn exporter_for(format: ExportFormat, pretty: bool) -> Box<dyn ResultExporter> {
    match format {
        ExportFormat::Json => Box::new(JsonExporter::new().with_pretty_print(pretty)),
        ExportFormat::JsonLines => Box::new(JsonExporter::new().as_json_lines()),
        ExportFormat::Csv => Box::new(CsvExporter::new()),
    }
}
