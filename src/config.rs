/*!
 * Configuration support for the pipeline
 *
 * Settings are layered: built-in defaults, then a TOML file (explicit path
 * or the platform default location), then `PUBMATCH_*` environment
 * variables. Nested keys use a double underscore, e.g.
 * `PUBMATCH_MATCHER__CONCURRENCY=4`.
 */

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::{ExportFormat, PubMatchError, Result};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "PUBMATCH";

/// Top-level pipeline configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub enrichment: EnrichmentConfig,
    pub matcher: MatcherConfig,
    pub output: OutputConfig,
}

/// Input and output locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// NPPES provider extract (npidata_pfile_*.csv)
    pub provider_extract: Option<PathBuf>,
    /// NUCC taxonomy reference table
    pub taxonomy: Option<PathBuf>,
    /// Enriched table written by stage 1 and read by stage 2
    pub enriched_output: PathBuf,
    /// Stage status record
    pub state_file: PathBuf,
    /// Where to persist match results, if anywhere
    pub match_results: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            provider_extract: None,
            taxonomy: None,
            enriched_output: PathBuf::from(DEFAULT_ENRICHED_OUTPUT),
            state_file: PathBuf::from(DEFAULT_STATE_FILE),
            match_results: None,
        }
    }
}

/// Enrichment stage settings
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Maximum provider rows read from the extract (None = all)
    pub read_limit: Option<usize>,
    /// Maximum enriched rows written (None = all)
    pub output_limit: Option<usize>,
    /// Skip unparseable rows instead of failing the stage
    pub skip_invalid_records: bool,
}

/// Publication matcher and literature client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub threshold: f64,
    pub city_bonus: f64,
    pub max_results: usize,
    pub search_url: String,
    pub fetch_url: String,
    pub database: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    /// Doctors processed at once; 1 keeps the original sequential order of requests
    pub concurrency: usize,
    /// Minimum spacing between any two requests
    pub request_interval_ms: u64,
    pub user_agent: String,
    /// E-utilities `tool` parameter
    pub tool: Option<String>,
    /// E-utilities `email` parameter
    pub email: Option<String>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
            city_bonus: DEFAULT_CITY_BONUS,
            max_results: DEFAULT_MAX_SEARCH_RESULTS,
            search_url: ESEARCH_URL.to_string(),
            fetch_url: EFETCH_URL.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            timeout_seconds: 30,
            max_retries: 3,
            retry_base_delay_ms: 500,
            concurrency: 1,
            request_interval_ms: 350,
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            tool: None,
            email: None,
        }
    }
}

impl MatcherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }
}

/// How match results are printed and persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub format: ExportFormat,
    pub pretty: bool,
    /// Show progress bars during long operations
    pub progress: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: ExportFormat::Json,
            pretty: true,
            progress: true,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PubMatchError::Configuration {
                message: format!("Config file '{}' does not exist", path.display()),
                suggestion: Some("Pass an existing file to --config or omit the flag".to_string()),
            });
        }
        Self::layered(Some(path), true)
    }

    /// Defaults overlaid with `PUBMATCH_*` environment variables only
    pub fn from_env() -> Result<Self> {
        Self::layered(None, false)
    }

    /// Load configuration from the default location, environment, or defaults
    ///
    /// Priority order (highest first):
    /// 1. Environment variables
    /// 2. Explicit config file, or the default config file if it exists
    /// 3. Built-in defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_config_path() {
                Some(path) => Self::layered(Some(&path), false)?,
                None => Self::from_env()?,
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn layered(file: Option<&Path>, required: bool) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(required),
            );
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|c| c.try_deserialize::<Self>())
            .map_err(|e| PubMatchError::Configuration {
                message: format!("Failed to load configuration: {}", e),
                suggestion: Some("Check the config file is valid TOML and PUBMATCH_* variables are well-formed".to_string()),
            })
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| PubMatchError::Configuration {
                message: format!("Failed to serialize config: {}", e),
                suggestion: None,
            })?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/nppes-pubmatch/config.toml` on Linux
    /// or `%APPDATA%\nppes-pubmatch\config.toml` on Windows
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "nppes-pubmatch")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String, suggestion: &str| PubMatchError::Configuration {
            message,
            suggestion: Some(suggestion.to_string()),
        };

        if self.matcher.concurrency == 0 {
            return Err(invalid(
                "matcher.concurrency must be at least 1".to_string(),
                "Use 1 for sequential processing",
            ));
        }
        if !(0.0..=100.0).contains(&self.matcher.threshold) {
            return Err(invalid(
                format!("matcher.threshold {} is outside 0..=100", self.matcher.threshold),
                "Similarity scores range from 0 to 100; the usual threshold is 70",
            ));
        }
        if self.matcher.search_url.trim().is_empty() || self.matcher.fetch_url.trim().is_empty() {
            return Err(invalid(
                "matcher.search_url and matcher.fetch_url must not be empty".to_string(),
                "Remove the keys to use the NCBI E-utilities defaults",
            ));
        }
        if self.matcher.database.trim().is_empty() {
            return Err(invalid(
                "matcher.database must not be empty".to_string(),
                "The literature database is normally 'pubmed'",
            ));
        }
        Ok(())
    }
}

/// Builder for customizing configuration
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: PipelineConfig,
}

impl ConfigBuilder {
    /// Start building from the defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Start building from an existing configuration
    pub fn from_config(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn provider_extract<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.paths.provider_extract = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn taxonomy<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.paths.taxonomy = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn enriched_output<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.paths.enriched_output = path.as_ref().to_path_buf();
        self
    }

    pub fn state_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.paths.state_file = path.as_ref().to_path_buf();
        self
    }

    pub fn match_results<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.paths.match_results = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the provider row cap
    pub fn read_limit(mut self, limit: Option<usize>) -> Self {
        self.config.enrichment.read_limit = limit;
        self
    }

    /// Set the enriched row cap
    pub fn output_limit(mut self, limit: Option<usize>) -> Self {
        self.config.enrichment.output_limit = limit;
        self
    }

    /// Set skip invalid records
    pub fn skip_invalid_records(mut self, skip: bool) -> Self {
        self.config.enrichment.skip_invalid_records = skip;
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.config.matcher.threshold = threshold;
        self
    }

    pub fn city_bonus(mut self, bonus: f64) -> Self {
        self.config.matcher.city_bonus = bonus;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.matcher.concurrency = concurrency;
        self
    }

    /// Point the literature client at other endpoints (mirrors, test servers)
    pub fn endpoints(mut self, search_url: impl Into<String>, fetch_url: impl Into<String>) -> Self {
        self.config.matcher.search_url = search_url.into();
        self.config.matcher.fetch_url = fetch_url.into();
        self
    }

    pub fn output_format(mut self, format: ExportFormat) -> Self {
        self.config.output.format = format;
        self
    }

    /// Set progress bar enabled
    pub fn progress(mut self, enabled: bool) -> Self {
        self.config.output.progress = enabled;
        self
    }

    /// Build the configuration
    pub fn build(self) -> PipelineConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.paths.enriched_output, PathBuf::from("results.csv"));
        assert_eq!(config.paths.state_file, PathBuf::from("pipeline_state.json"));
        assert_eq!(config.enrichment.read_limit, None);
        assert_eq!(config.matcher.threshold, 70.0);
        assert_eq!(config.matcher.city_bonus, 20.0);
        assert_eq!(config.matcher.max_results, 200);
        assert_eq!(config.matcher.concurrency, 1);
        assert_eq!(config.output.format, ExportFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .provider_extract("npidata.csv")
            .read_limit(Some(1000))
            .skip_invalid_records(true)
            .threshold(80.0)
            .concurrency(4)
            .output_format(ExportFormat::Csv)
            .build();

        assert_eq!(config.paths.provider_extract, Some(PathBuf::from("npidata.csv")));
        assert_eq!(config.enrichment.read_limit, Some(1000));
        assert!(config.enrichment.skip_invalid_records);
        assert_eq!(config.matcher.threshold, 80.0);
        assert_eq!(config.matcher.concurrency, 4);
        assert_eq!(config.output.format, ExportFormat::Csv);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(ConfigBuilder::new().concurrency(0).build().validate().is_err());
        assert!(ConfigBuilder::new().threshold(101.0).build().validate().is_err());
        assert!(ConfigBuilder::new().endpoints("", "x").build().validate().is_err());
    }

    #[test]
    fn test_save_and_reload_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let config = ConfigBuilder::new()
            .taxonomy("nucc_taxonomy_251.csv")
            .output_limit(Some(100))
            .city_bonus(25.0)
            .build();
        config.save(&path).unwrap();

        let loaded = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(loaded.paths.taxonomy, Some(PathBuf::from("nucc_taxonomy_251.csv")));
        assert_eq!(loaded.enrichment.output_limit, Some(100));
        assert_eq!(loaded.matcher.city_bonus, 25.0);

        // Keys left out of the file fall back to defaults
        let partial = dir.path().join("partial.toml");
        std::fs::write(&partial, "[matcher]\nthreshold = 75.0\n").unwrap();
        let loaded = PipelineConfig::from_file(&partial).unwrap();
        assert_eq!(loaded.matcher.threshold, 75.0);
        assert_eq!(loaded.matcher.max_results, 200);
        assert_eq!(loaded.paths.enriched_output, PathBuf::from("results.csv"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = PipelineConfig::from_file("/nonexistent/pubmatch.toml").unwrap_err();
        assert!(matches!(err, PubMatchError::Configuration { .. }));
    }
}
