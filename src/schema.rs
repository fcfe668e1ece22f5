/*!
 * Schema definitions for the pipeline's tabular files
 *
 * Column names for the NPPES provider extract, the NUCC taxonomy table and
 * the enriched output table, plus a header index that resolves columns by
 * name. The NPPES extract has 330 columns; only the ones listed here are
 * read, so lookup is by name rather than by position.
 */

use std::collections::HashMap;
use std::path::Path;

use crate::constants::MAX_TAXONOMY_SLOTS;
use crate::PubMatchError;

pub const COL_NPI: &str = "NPI";
pub const COL_ENTITY_TYPE: &str = "Entity Type Code";

pub const COL_LAST_NAME: &str = "Provider Last Name (Legal Name)";
pub const COL_FIRST_NAME: &str = "Provider First Name";
pub const COL_MIDDLE_NAME: &str = "Provider Middle Name";
pub const COL_NAME_PREFIX: &str = "Provider Name Prefix Text";
pub const COL_CREDENTIAL: &str = "Provider Credential Text";

pub const COL_OTHER_LAST_NAME: &str = "Provider Other Last Name";
pub const COL_OTHER_FIRST_NAME: &str = "Provider Other First Name";
pub const COL_OTHER_MIDDLE_NAME: &str = "Provider Other Middle Name";
pub const COL_OTHER_NAME_PREFIX: &str = "Provider Other Name Prefix Text";
pub const COL_OTHER_CREDENTIAL: &str = "Provider Other Credential Text";

pub const COL_MAILING_LINE_1: &str = "Provider First Line Business Mailing Address";
pub const COL_MAILING_CITY: &str = "Provider Business Mailing Address City Name";

pub const COL_PRACTICE_LINE_1: &str = "Provider First Line Business Practice Location Address";
pub const COL_PRACTICE_LINE_2: &str = "Provider Second Line Business Practice Location Address";
pub const COL_PRACTICE_CITY: &str = "Provider Business Practice Location Address City Name";

pub const COL_SEX_CODE: &str = "Provider Sex Code";

pub const COL_OFFICIAL_LAST_NAME: &str = "Authorized Official Last Name";
pub const COL_OFFICIAL_FIRST_NAME: &str = "Authorized Official First Name";
pub const COL_OFFICIAL_MIDDLE_NAME: &str = "Authorized Official Middle Name";
pub const COL_OFFICIAL_TITLE: &str = "Authorized Official Title or Position";

/// Column names of one taxonomy slot in the provider extract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaxonomySlotColumns {
    pub slot: usize,
    pub code: &'static str,
    pub license_number: &'static str,
    pub license_state: &'static str,
    pub primary_switch: &'static str,
}

/// Column names of the taxonomy description fields joined for one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrichmentColumns {
    pub slot: usize,
    pub grouping: &'static str,
    pub classification: &'static str,
    pub specialization: &'static str,
    pub display_name: &'static str,
}

const TAXONOMY_SLOTS: [TaxonomySlotColumns; MAX_TAXONOMY_SLOTS] = [
    TaxonomySlotColumns {
        slot: 1,
        code: "Healthcare Provider Taxonomy Code_1",
        license_number: "Provider License Number_1",
        license_state: "Provider License Number State Code_1",
        primary_switch: "Healthcare Provider Primary Taxonomy Switch_1",
    },
    TaxonomySlotColumns {
        slot: 2,
        code: "Healthcare Provider Taxonomy Code_2",
        license_number: "Provider License Number_2",
        license_state: "Provider License Number State Code_2",
        primary_switch: "Healthcare Provider Primary Taxonomy Switch_2",
    },
    TaxonomySlotColumns {
        slot: 3,
        code: "Healthcare Provider Taxonomy Code_3",
        license_number: "Provider License Number_3",
        license_state: "Provider License Number State Code_3",
        primary_switch: "Healthcare Provider Primary Taxonomy Switch_3",
    },
];

const ENRICHMENT_SLOTS: [EnrichmentColumns; MAX_TAXONOMY_SLOTS] = [
    EnrichmentColumns {
        slot: 1,
        grouping: "Grouping_1",
        classification: "Classification_1",
        specialization: "Specialization_1",
        display_name: "Display Name_1",
    },
    EnrichmentColumns {
        slot: 2,
        grouping: "Grouping_2",
        classification: "Classification_2",
        specialization: "Specialization_2",
        display_name: "Display Name_2",
    },
    EnrichmentColumns {
        slot: 3,
        grouping: "Grouping_3",
        classification: "Classification_3",
        specialization: "Specialization_3",
        display_name: "Display Name_3",
    },
];

/// Provider extract (npidata_pfile) schema, restricted to the columns we read
pub struct ProviderExtractSchema;

impl ProviderExtractSchema {
    /// Columns without which the file cannot be processed at all
    pub fn mandatory_columns() -> Vec<&'static str> {
        vec![COL_NPI, COL_ENTITY_TYPE]
    }

    /// Name, address, sex and authorized-official columns
    ///
    /// Missing ones are read as null.
    pub fn descriptive_columns() -> Vec<&'static str> {
        vec![
            // Provider name
            COL_LAST_NAME,
            COL_FIRST_NAME,
            COL_MIDDLE_NAME,
            COL_NAME_PREFIX,
            COL_CREDENTIAL,
            // Provider other name
            COL_OTHER_LAST_NAME,
            COL_OTHER_FIRST_NAME,
            COL_OTHER_MIDDLE_NAME,
            COL_OTHER_NAME_PREFIX,
            COL_OTHER_CREDENTIAL,
            // Mailing address
            COL_MAILING_LINE_1,
            COL_MAILING_CITY,
            // Practice location address
            COL_PRACTICE_LINE_1,
            COL_PRACTICE_LINE_2,
            COL_PRACTICE_CITY,
            COL_SEX_CODE,
            // Authorized official
            COL_OFFICIAL_LAST_NAME,
            COL_OFFICIAL_FIRST_NAME,
            COL_OFFICIAL_MIDDLE_NAME,
            COL_OFFICIAL_TITLE,
        ]
    }

    /// Taxonomy slot column groups, slot 1 first
    pub fn taxonomy_slots() -> &'static [TaxonomySlotColumns] {
        &TAXONOMY_SLOTS
    }

    /// Every column the pipeline reads from the extract
    pub fn column_names() -> Vec<&'static str> {
        let mut columns = Self::mandatory_columns();
        columns.extend(Self::descriptive_columns());
        for slot in Self::taxonomy_slots() {
            columns.extend([slot.code, slot.license_number, slot.license_state, slot.primary_switch]);
        }
        columns
    }

    /// Check that the header row carries the mandatory columns
    pub fn validate_headers(headers: &[String], file: Option<&Path>) -> Result<HeaderIndex, PubMatchError> {
        let index = HeaderIndex::new(headers);
        index.require_all(&Self::mandatory_columns(), file)?;
        Ok(index)
    }
}

/// NUCC taxonomy reference file schema
pub struct TaxonomySchema;

impl TaxonomySchema {
    pub const CODE: &'static str = "Code";
    pub const GROUPING: &'static str = "Grouping";
    pub const CLASSIFICATION: &'static str = "Classification";
    pub const SPECIALIZATION: &'static str = "Specialization";
    pub const DISPLAY_NAME: &'static str = "Display Name";

    /// Columns read from the reference table; the file may carry more
    /// (Definition, Notes, Section)
    pub fn column_names() -> Vec<&'static str> {
        vec![
            Self::CODE,
            Self::GROUPING,
            Self::CLASSIFICATION,
            Self::SPECIALIZATION,
            Self::DISPLAY_NAME,
        ]
    }

    pub fn validate_headers(headers: &[String], file: Option<&Path>) -> Result<HeaderIndex, PubMatchError> {
        let index = HeaderIndex::new(headers);
        index.require_all(&Self::column_names(), file)?;
        Ok(index)
    }
}

/// Enriched output table schema
pub struct EnrichedSchema;

impl EnrichedSchema {
    /// Display columns in output order
    pub fn column_names() -> Vec<&'static str> {
        let mut columns = vec![
            COL_NPI,
            COL_FIRST_NAME,
            COL_MIDDLE_NAME,
            COL_LAST_NAME,
            COL_NAME_PREFIX,
            COL_CREDENTIAL,
            COL_OTHER_FIRST_NAME,
            COL_OTHER_MIDDLE_NAME,
            COL_OTHER_LAST_NAME,
            COL_OTHER_NAME_PREFIX,
            COL_OTHER_CREDENTIAL,
            COL_MAILING_LINE_1,
            COL_MAILING_CITY,
            COL_PRACTICE_LINE_1,
            COL_PRACTICE_LINE_2,
            COL_PRACTICE_CITY,
            COL_SEX_CODE,
            COL_OFFICIAL_FIRST_NAME,
            COL_OFFICIAL_MIDDLE_NAME,
            COL_OFFICIAL_LAST_NAME,
            COL_OFFICIAL_TITLE,
        ];
        for slot in &TAXONOMY_SLOTS {
            columns.extend([slot.code, slot.license_number, slot.license_state, slot.primary_switch]);
        }
        for slot in &ENRICHMENT_SLOTS {
            columns.extend([slot.grouping, slot.classification, slot.specialization, slot.display_name]);
        }
        columns
    }

    pub fn column_count() -> usize {
        Self::column_names().len()
    }

    /// Taxonomy description column groups, slot 1 first
    pub fn enrichment_slots() -> &'static [EnrichmentColumns] {
        &ENRICHMENT_SLOTS
    }

    /// The matching stage needs the identity, name and practice city columns
    pub fn validate_headers(headers: &[String], file: Option<&Path>) -> Result<HeaderIndex, PubMatchError> {
        let index = HeaderIndex::new(headers);
        index.require_all(&[COL_NPI, COL_FIRST_NAME, COL_LAST_NAME, COL_PRACTICE_CITY], file)?;
        Ok(index)
    }
}

/// Column lookup by header name
#[derive(Debug, Clone, Default)]
pub struct HeaderIndex {
    positions: HashMap<String, usize>,
}

impl HeaderIndex {
    /// Build an index from a header row; on duplicate names the first wins
    pub fn new(headers: &[String]) -> Self {
        let mut positions = HashMap::with_capacity(headers.len());
        for (idx, name) in headers.iter().enumerate() {
            positions.entry(name.trim().to_string()).or_insert(idx);
        }
        Self { positions }
    }

    pub fn get(&self, column: &str) -> Option<usize> {
        self.positions.get(column).copied()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.positions.contains_key(column)
    }

    /// Columns from `columns` that the header row lacks
    pub fn missing<'a>(&self, columns: &[&'a str]) -> Vec<&'a str> {
        columns.iter().copied().filter(|c| !self.contains(c)).collect()
    }

    pub fn require_all(&self, columns: &[&str], file: Option<&Path>) -> Result<(), PubMatchError> {
        let missing = self.missing(columns);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PubMatchError::missing_columns(
                file.map(Path::to_path_buf),
                missing.into_iter().map(str::to_string).collect(),
            ))
        }
    }
}
