/*!
 * Data type definitions for provider, taxonomy and matching records
 *
 * Provider fields follow the NPPES Data Dissemination naming; taxonomy
 * fields follow the NUCC reference table. Matching types describe the
 * literature-side candidates and the per-doctor outcome.
 */

use serde::{Deserialize, Serialize};

use crate::constants::{ENTITY_TYPE_INDIVIDUAL, ENTITY_TYPE_ORGANIZATION};

/// NPI (National Provider Identifier) - 10 digit unique identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Npi(pub String);

impl Npi {
    /// Create a new NPI, validating format
    pub fn new(npi: String) -> Result<Self, crate::PubMatchError> {
        if npi.len() != 10 || !npi.chars().all(|c| c.is_ascii_digit()) {
            return Err(crate::PubMatchError::invalid_npi(&npi));
        }
        Ok(Npi(npi))
    }

    /// Get the NPI as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Npi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entity Type Code (1 = Individual, 2 = Organization)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Individual,
    Organization,
}

impl EntityType {
    pub fn from_code(code: &str) -> Result<Self, crate::PubMatchError> {
        match code {
            ENTITY_TYPE_INDIVIDUAL => Ok(EntityType::Individual),
            ENTITY_TYPE_ORGANIZATION => Ok(EntityType::Organization),
            _ => Err(crate::PubMatchError::invalid_entity_type(code)),
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityType::Individual => write!(f, "Individual"),
            EntityType::Organization => write!(f, "Organization"),
        }
    }
}

/// Sex Code (M, F, U, X)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SexCode {
    Male,        // M
    Female,      // F
    Undisclosed, // U or X
}

impl SexCode {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "M" => Some(SexCode::Male),
            "F" => Some(SexCode::Female),
            "U" | "X" => Some(SexCode::Undisclosed),
            _ => None,
        }
    }
}

/// Primary Taxonomy Switch (X, Y, N)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimaryTaxonomySwitch {
    NotAnswered, // X
    Yes,         // Y
    No,          // N
}

impl PrimaryTaxonomySwitch {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "X" => Some(PrimaryTaxonomySwitch::NotAnswered),
            "Y" => Some(PrimaryTaxonomySwitch::Yes),
            "N" => Some(PrimaryTaxonomySwitch::No),
            _ => None,
        }
    }
}

/// Provider name information
///
/// Prefix and credential are kept as the free text found in the extract so
/// the enriched table reproduces them verbatim.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProviderName {
    pub prefix: Option<String>,
    pub first: Option<String>,
    pub middle: Option<String>,
    pub last: Option<String>,
    pub credential: Option<String>,
}

/// Address information (mailing or practice location)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Address {
    pub line_1: Option<String>,
    pub line_2: Option<String>,
    pub city: Option<String>,
}

/// Authorized Official information
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AuthorizedOfficial {
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub title: Option<String>,
}

/// One `Healthcare Provider Taxonomy Code_<n>` slot of a provider row
///
/// A slot exists only when the extract carries its code column; the code
/// itself may still be empty for a given provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomySlot {
    /// 1-based slot number
    pub slot: usize,
    pub code: Option<String>,
    pub license_number: Option<String>,
    pub license_state: Option<String>,
    /// Raw primary switch text (Y, N or X)
    pub primary_switch: Option<String>,
}

impl TaxonomySlot {
    pub fn empty(slot: usize) -> Self {
        Self {
            slot,
            code: None,
            license_number: None,
            license_state: None,
            primary_switch: None,
        }
    }

    pub fn is_primary(&self) -> bool {
        self.primary_switch.as_deref().and_then(PrimaryTaxonomySwitch::from_code)
            == Some(PrimaryTaxonomySwitch::Yes)
    }
}

/// Provider row from the NPPES extract, restricted to the columns the
/// pipeline carries forward
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub npi: Npi,
    pub entity_type: Option<EntityType>,

    pub provider_name: ProviderName,
    pub provider_other_name: ProviderName,

    pub mailing_address: Address,
    pub practice_address: Address,

    /// Raw sex code text
    pub sex_code: Option<String>,

    pub authorized_official: AuthorizedOfficial,

    // Up to three taxonomy slots, in slot order
    pub taxonomy_slots: Vec<TaxonomySlot>,
}

impl ProviderRecord {
    pub fn is_individual(&self) -> bool {
        self.entity_type == Some(EntityType::Individual)
    }

    pub fn sex(&self) -> Option<SexCode> {
        self.sex_code.as_deref().and_then(SexCode::from_code)
    }

    pub fn taxonomy_slot(&self, slot: usize) -> Option<&TaxonomySlot> {
        self.taxonomy_slots.iter().find(|s| s.slot == slot)
    }

    /// Get the primary taxonomy slot
    pub fn primary_taxonomy(&self) -> Option<&TaxonomySlot> {
        self.taxonomy_slots.iter().find(|t| t.is_primary())
    }

    /// "First Last" as used in match results
    pub fn display_name(&self) -> String {
        format!(
            "{} {}",
            self.provider_name.first.as_deref().unwrap_or(""),
            self.provider_name.last.as_deref().unwrap_or("")
        )
    }
}

/// Healthcare Provider Taxonomy Reference
///
/// Reference data for taxonomy codes from NUCC
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyEntry {
    pub code: String,
    pub grouping: Option<String>,
    pub classification: Option<String>,
    pub specialization: Option<String>,
    pub display_name: Option<String>,
}

/// Result of joining one taxonomy slot against the reference table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotEnrichment {
    pub slot: usize,
    /// None when the slot's code is empty or absent from the reference table
    pub entry: Option<TaxonomyEntry>,
}

/// Provider record plus taxonomy descriptions for each joined slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub provider: ProviderRecord,
    pub enrichments: Vec<SlotEnrichment>,
}

impl EnrichedRecord {
    /// Taxonomy description joined for a slot, if any
    pub fn slot_entry(&self, slot: usize) -> Option<&TaxonomyEntry> {
        self.enrichments
            .iter()
            .find(|e| e.slot == slot)
            .and_then(|e| e.entry.as_ref())
    }

    /// Display name of the first taxonomy slot, used in progress output
    pub fn primary_display_name(&self) -> Option<&str> {
        self.slot_entry(1).and_then(|e| e.display_name.as_deref())
    }
}

/// An author entry of a literature record together with the article's
/// concatenated affiliation text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub last_name: String,
    pub fore_name: String,
    pub affiliation_text: String,
}

/// One article of a detail response
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LiteratureRecord {
    pub pmid: Option<String>,
    /// (last name, fore name) pairs in document order
    pub authors: Vec<(String, String)>,
    /// All affiliation texts of the article joined by single spaces
    pub affiliation_text: String,
}

impl LiteratureRecord {
    /// Author entries as match candidates sharing this record's affiliation text
    pub fn candidates(&self) -> impl Iterator<Item = MatchCandidate> + '_ {
        self.authors.iter().map(move |(last, fore)| MatchCandidate {
            last_name: last.clone(),
            fore_name: fore.clone(),
            affiliation_text: self.affiliation_text.clone(),
        })
    }
}

/// Outcome classification for one doctor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Candidates were fetched and scored
    Matched,
    /// The search returned no identifiers; no detail fetch was issued
    NoCandidates,
    /// The doctor lacks a first or last name; no request was issued
    Skipped,
    /// A request or response failed for this doctor
    Failed,
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            MatchStatus::Matched => "matched",
            MatchStatus::NoCandidates => "no_candidates",
            MatchStatus::Skipped => "skipped",
            MatchStatus::Failed => "failed",
        };
        write!(f, "{}", text)
    }
}

/// Publication estimate for one doctor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub doctor: String,
    pub matched_publications: usize,
    #[serde(rename = "NPI", skip_serializing_if = "Option::is_none", default)]
    pub npi: Option<String>,
    pub status: MatchStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub candidates: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl MatchResult {
    pub fn new(doctor: String, npi: Option<String>, status: MatchStatus) -> Self {
        Self {
            doctor,
            matched_publications: 0,
            npi,
            status,
            candidates: None,
            error: None,
        }
    }
}
