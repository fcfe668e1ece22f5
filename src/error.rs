/*!
 * Error handling for the enrichment and publication matching pipeline
 *
 * Provides detailed error types with context, suggestions, and a
 * transient/permanent classification used by the literature client.
 */

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use serde::{Serialize, Deserialize};

/// Crate result type
pub type Result<T> = std::result::Result<T, PubMatchError>;

/// Error types with context and suggestions
#[derive(Error, Debug)]
pub enum PubMatchError {
    /// File I/O errors with context
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
        context: ErrorContext,
    },

    /// CSV parsing errors with location information
    #[error("CSV parsing error at line {line:?}: {message}")]
    CsvParse {
        message: String,
        line: Option<usize>,
        column: Option<String>,
        context: ErrorContext,
    },

    /// Data validation errors with detailed information
    #[error("Data validation error: {message}")]
    DataValidation {
        message: String,
        field: Option<String>,
        value: Option<String>,
        context: ErrorContext,
    },

    /// File not found with suggestions
    #[error("File not found: {path}")]
    FileNotFound {
        path: PathBuf,
        suggestion: String,
    },

    /// Invalid NPI with format guidance
    #[error("Invalid NPI '{npi}': {reason}")]
    InvalidNpi {
        npi: String,
        reason: String,
        suggestion: String,
    },

    /// Invalid entity type with valid options
    #[error("Invalid entity type code '{code}'")]
    InvalidEntityType {
        code: String,
        valid_options: Vec<String>,
    },

    /// Header row does not carry the columns we need
    #[error("Schema mismatch: {message}")]
    SchemaMismatch {
        message: String,
        file: Option<PathBuf>,
        missing_columns: Vec<String>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        suggestion: Option<String>,
    },

    /// Export errors
    #[error("Export error: {message}")]
    Export {
        message: String,
        format: ExportFormat,
        suggestion: Option<String>,
    },

    /// Transport or status errors from the literature service
    #[error("HTTP error: {message}")]
    Http {
        message: String,
        url: Option<String>,
        status: Option<u16>,
        retryable: bool,
    },

    /// The literature service answered with something we cannot interpret
    #[error("Unexpected {endpoint} response: {message}")]
    ResponseFormat {
        endpoint: &'static str,
        message: String,
    },

    /// Work stopped because cancellation was requested
    #[error("Cancelled: {message}")]
    Cancelled {
        message: String,
    },

    /// Generic errors with custom message
    #[error("{message}")]
    Custom {
        message: String,
        suggestion: Option<String>,
    },
}

/// Error context providing additional information
#[derive(Debug, Default, Clone)]
pub struct ErrorContext {
    pub file_path: Option<PathBuf>,
    pub line_number: Option<usize>,
    pub column_name: Option<String>,
    pub record_npi: Option<String>,
}

/// Output format for match results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ExportFormat {
    #[default]
    Json,
    JsonLines,
    Csv,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Json => write!(f, "JSON"),
            ExportFormat::JsonLines => write!(f, "JSON Lines"),
            ExportFormat::Csv => write!(f, "CSV"),
        }
    }
}

impl PubMatchError {
    /// Create a file not found error with helpful suggestion
    pub fn file_not_found_with_suggestion(path: PathBuf) -> Self {
        let suggestion = if path.to_string_lossy().contains("npidata") {
            format!(
                "Check if the file exists at '{}'. Provider extracts follow the pattern 'npidata_pfile_YYYYMMDD-YYYYMMDD.csv'. \
                You can download the latest file from https://download.cms.gov/nppes/NPI_Files.html",
                path.display()
            )
        } else if path.to_string_lossy().contains("taxonomy") {
            format!(
                "Check if the taxonomy file exists at '{}'. The NUCC taxonomy file can be downloaded from \
                https://www.nucc.org/index.php/code-sets-mainmenu-41/provider-taxonomy-mainmenu-40",
                path.display()
            )
        } else {
            format!(
                "Check if the file exists at '{}'. Make sure the path is correct and you have read permissions.",
                path.display()
            )
        };

        Self::FileNotFound { path, suggestion }
    }

    /// Create an invalid NPI error with validation details
    pub fn invalid_npi(npi: &str) -> Self {
        let (reason, suggestion) = if npi.is_empty() {
            ("NPI cannot be empty".to_string(),
             "Provide a valid 10-digit NPI number".to_string())
        } else if npi.len() != 10 {
            (format!("NPI must be exactly 10 digits, found {}", npi.len()),
             "Ensure the NPI is exactly 10 digits without spaces or special characters".to_string())
        } else if !npi.chars().all(|c| c.is_ascii_digit()) {
            ("NPI must contain only digits".to_string(),
             "Remove any non-numeric characters from the NPI".to_string())
        } else {
            ("Invalid NPI format".to_string(),
             "Verify the NPI number is correct".to_string())
        };

        Self::InvalidNpi {
            npi: npi.to_string(),
            reason,
            suggestion,
        }
    }

    /// Create an invalid entity type error with valid options
    pub fn invalid_entity_type(code: &str) -> Self {
        Self::InvalidEntityType {
            code: code.to_string(),
            valid_options: vec![
                "1 (Individual)".to_string(),
                "2 (Organization)".to_string(),
            ],
        }
    }

    /// Create a schema mismatch error listing the columns a file lacks
    pub fn missing_columns(file: Option<PathBuf>, missing: Vec<String>) -> Self {
        let message = match &file {
            Some(path) => format!(
                "'{}' is missing required column(s): {}",
                path.display(),
                missing.join(", ")
            ),
            None => format!("missing required column(s): {}", missing.join(", ")),
        };

        Self::SchemaMismatch {
            message,
            file,
            missing_columns: missing,
        }
    }

    /// Create an HTTP status error; 429 and 5xx are worth retrying
    pub fn http_status(status: u16, url: &str) -> Self {
        Self::Http {
            message: format!("request to {} failed with status {}", url, status),
            url: Some(url.to_string()),
            status: Some(status),
            retryable: status == 429 || status >= 500,
        }
    }

    /// Whether a retry of the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { retryable, .. } => *retryable,
            Self::Io { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            Self::FileNotFound { suggestion, .. } => {
                format!("{}\n\nSuggestion: {}", self, suggestion)
            }
            Self::InvalidNpi { suggestion, .. } => {
                format!("{}\n\nSuggestion: {}", self, suggestion)
            }
            Self::InvalidEntityType { valid_options, .. } => {
                format!("{}\n\nValid options: {}", self, valid_options.join(", "))
            }
            Self::Configuration { suggestion: Some(sug), .. } => {
                format!("{}\n\nSuggestion: {}", self, sug)
            }
            Self::Export { suggestion: Some(sug), .. } => {
                format!("{}\n\nSuggestion: {}", self, sug)
            }
            Self::Custom { suggestion: Some(sug), .. } => {
                format!("{}\n\nSuggestion: {}", self, sug)
            }
            _ => self.to_string(),
        }
    }
}

// Convenience conversions
impl From<std::io::Error> for PubMatchError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: err,
            context: ErrorContext::default(),
        }
    }
}

impl From<csv::Error> for PubMatchError {
    fn from(err: csv::Error) -> Self {
        let (line, message) = match err.position() {
            Some(pos) => (Some(pos.line() as usize), err.to_string()),
            None => (None, err.to_string()),
        };

        Self::CsvParse {
            message,
            line,
            column: None,
            context: ErrorContext::default(),
        }
    }
}

impl From<serde_json::Error> for PubMatchError {
    fn from(err: serde_json::Error) -> Self {
        PubMatchError::Export {
            message: err.to_string(),
            format: ExportFormat::Json,
            suggestion: Some("Check if the data is serializable to JSON.".to_string()),
        }
    }
}

impl From<reqwest::Error> for PubMatchError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        let retryable = err.is_timeout()
            || err.is_connect()
            || err.is_request()
            || status.map(|s| s == 429 || s >= 500).unwrap_or(false);

        Self::Http {
            message: err.to_string(),
            url: err.url().map(|u| u.to_string()),
            status,
            retryable,
        }
    }
}

impl From<quick_xml::Error> for PubMatchError {
    fn from(err: quick_xml::Error) -> Self {
        Self::ResponseFormat {
            endpoint: "detail",
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_classification() {
        assert!(PubMatchError::http_status(503, "https://example.org").is_retryable());
        assert!(PubMatchError::http_status(429, "https://example.org").is_retryable());
        assert!(!PubMatchError::http_status(400, "https://example.org").is_retryable());
        assert!(!PubMatchError::ResponseFormat { endpoint: "search", message: "bad".into() }.is_retryable());
    }

    #[test]
    fn test_missing_columns_message() {
        let err = PubMatchError::missing_columns(
            Some(PathBuf::from("npidata.csv")),
            vec!["NPI".to_string(), "Entity Type Code".to_string()],
        );
        let message = err.to_string();
        assert!(message.contains("npidata.csv"));
        assert!(message.contains("NPI, Entity Type Code"));
    }

    #[test]
    fn test_user_message_includes_suggestion() {
        let err = PubMatchError::file_not_found_with_suggestion(PathBuf::from("nucc_taxonomy_251.csv"));
        assert!(err.user_message().contains("nucc.org"));
    }
}
