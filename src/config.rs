use crate::error::{AppError, Result};
use crate::filters::FilterParams;
use crate::models::{parse_date, TimeRange};
use crate::spatial::FeatureId;
use crate::stats::QuantileRange;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::str::FromStr;

const DEFAULT_CORE_STATION_CODES: [&str; 21] = [
    "GRBAP", "GRBCL", "GRBLR", "GRBCML", "GRBGB", "GRBGBE", "GRBGBW", "GRBOR", "GRBSF", "GRBSQ",
    "GRBULB", "GRBUPR", "HHHR", "02-GWR", "05-SFR", "07-CCH", "05-OYS", "05-LMP", "09-EXT",
    "05-BLM", "02-WNC",
];

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub explorer: ExplorerConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub base_url: String,
    #[serde(default)]
    pub gis_base_url: Option<String>,
    #[serde(default = "default_timeout_seconds", deserialize_with = "deserialize_number")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    60
}

impl SourceConfig {
    pub fn gis_base_url(&self) -> &str {
        self.gis_base_url.as_deref().unwrap_or(&self.base_url)
    }
}

/// Custom deserializer that handles numbers given as both number and string
///
/// Accepts:
/// - `timeout_seconds: 60` (number)
/// - `timeout_seconds: "60"` (string that parses to number)
/// - `timeout_seconds: ${TIMEOUT}` (env var substituted to either)
fn deserialize_number<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberValue<T> {
        Number(T),
        String(String),
    }

    match NumberValue::<T>::deserialize(deserializer)? {
        NumberValue::Number(n) => Ok(n),
        NumberValue::String(s) => s
            .trim()
            .parse::<T>()
            .map_err(|_| serde::de::Error::custom(format!("Invalid number: '{}'", s))),
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExplorerConfig {
    #[serde(default = "default_core_station_codes")]
    pub core_station_codes: Vec<String>,
    #[serde(default = "default_true")]
    pub core_only: bool,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub stations: Vec<i64>,
    #[serde(default)]
    pub variables: Vec<i64>,
    #[serde(default)]
    pub quantiles: QuantileConfig,
    #[serde(default)]
    pub spatial_filter: Option<SpatialFilterConfig>,
}

fn default_core_station_codes() -> Vec<String> {
    DEFAULT_CORE_STATION_CODES.iter().map(|s| s.to_string()).collect()
}

fn default_true() -> bool {
    true
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            core_station_codes: default_core_station_codes(),
            core_only: true,
            start: None,
            end: None,
            stations: Vec::new(),
            variables: Vec::new(),
            quantiles: QuantileConfig::default(),
            spatial_filter: None,
        }
    }
}

impl ExplorerConfig {
    /// Filter parameters before any selection is checked against the catalogue.
    /// Station and variable ids are applied by the session once data is loaded.
    pub fn filter_params(&self) -> Result<FilterParams> {
        let start = self.start.as_deref().map(parse_date).transpose()?;
        let end = self.end.as_deref().map(parse_date).transpose()?;
        Ok(FilterParams {
            core_only: self.core_only,
            time_range: TimeRange::from_dates(start, end),
            ..FilterParams::default()
        })
    }

    pub fn quantile_range(&self) -> Result<QuantileRange> {
        QuantileRange::new(self.quantiles.lower, self.quantiles.upper)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuantileConfig {
    #[serde(default)]
    pub lower: f64,
    #[serde(default = "default_upper_quantile")]
    pub upper: f64,
}

fn default_upper_quantile() -> f64 {
    100.0
}

impl Default for QuantileConfig {
    fn default() -> Self {
        Self {
            lower: 0.0,
            upper: 100.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SpatialFilterConfig {
    pub overlay: String,
    pub feature: FeatureId,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExportConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_source_url")]
    pub source_url: String,
    #[serde(default = "default_note")]
    pub note: String,
    #[serde(default = "default_batch_size", deserialize_with = "deserialize_number")]
    pub batch_size: usize,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_file_prefix() -> String {
    "PREP".to_string()
}

fn default_timezone() -> String {
    "America/New_York".to_string()
}

fn default_title() -> String {
    "PREP | Piscataqua Watershed Data Explorer".to_string()
}

fn default_source_url() -> String {
    "https://prepestuaries.org/".to_string()
}

fn default_note() -> String {
    "Provisional monitoring data from the PREP database; values may be revised.".to_string()
}

fn default_batch_size() -> usize {
    10_000
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            output_dir: default_output_dir(),
            file_prefix: default_file_prefix(),
            timezone: default_timezone(),
            title: default_title(),
            source_url: default_source_url(),
            note: default_note(),
            batch_size: default_batch_size(),
        }
    }
}

impl ExportConfig {
    pub fn timezone(&self) -> Result<chrono_tz::Tz> {
        self.timezone.parse::<chrono_tz::Tz>().map_err(|e| {
            AppError::Config(format!("Invalid export timezone '{}': {}", self.timezone, e))
        })
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AppError::Config(format!("Failed to read config file: {}", e)))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        // Substitute environment variables
        let expanded = expand_env_vars(content)?;

        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {}", e)))?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    ///
    /// Checks for:
    /// - Unexpanded environment variables
    /// - Valid URL formats and schemes
    /// - Positive timeout and batch size
    /// - Valid dates, quantile bounds and timezone
    fn validate(&self) -> Result<()> {
        if self.source.base_url.contains("${") {
            return Err(AppError::Config(
                "PREP_API_URL environment variable is not set. \
                 Please set it or create a .env file. \
                 See .env.example for required variables."
                    .to_string(),
            ));
        }

        validate_url("source base_url", &self.source.base_url)?;
        if let Some(gis) = &self.source.gis_base_url {
            validate_url("source gis_base_url", gis)?;
        }

        if self.source.timeout_seconds == 0 {
            return Err(AppError::Config(
                "Source timeout_seconds must be greater than 0".to_string(),
            ));
        }

        self.explorer
            .filter_params()
            .map_err(|e| AppError::Config(format!("Invalid explorer date range: {}", e)))?;

        self.explorer
            .quantile_range()
            .map_err(|e| AppError::Config(format!("Invalid explorer quantiles: {}", e)))?;

        if let Some(spatial) = &self.explorer.spatial_filter {
            if crate::overlay::Overlay::from_id(&spatial.overlay).is_none() {
                return Err(AppError::Config(format!(
                    "Unknown spatial_filter overlay '{}'",
                    spatial.overlay
                )));
            }
        }

        if self.export.batch_size == 0 {
            return Err(AppError::Config(
                "Export batch_size must be at least 1".to_string(),
            ));
        }

        // Warn if batches are so large that rendering stalls between yields
        if self.export.batch_size > 100_000 {
            tracing::warn!(
                "Export batch_size of {} rows is very large, consider at most 100000",
                self.export.batch_size
            );
        }

        if self.export.file_prefix.is_empty()
            || self.export.file_prefix.contains(['/', '\\'])
        {
            return Err(AppError::Config(format!(
                "Export file_prefix '{}' must be non-empty and contain no path separators",
                self.export.file_prefix
            )));
        }

        self.export.timezone()?;

        Ok(())
    }
}

fn validate_url(field: &str, value: &str) -> Result<()> {
    let parsed = url::Url::parse(value)
        .map_err(|e| AppError::Config(format!("Invalid {} '{}': {}", field, value, e)))?;

    if parsed.scheme() != "https" && parsed.scheme() != "http" {
        return Err(AppError::Config(format!(
            "{} must use HTTP or HTTPS, got: {}",
            field,
            parsed.scheme()
        )));
    }

    Ok(())
}

fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = content.to_string();
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| AppError::Config(format!("Invalid substitution pattern: {}", e)))?;

    let mut missing_vars = Vec::new();

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(value) => {
                result = result.replace(&cap[0], &value);
            }
            Err(_) => {
                missing_vars.push(var_name.to_string());
            }
        }
    }

    if !missing_vars.is_empty() {
        return Err(AppError::Config(format!(
            "Missing required environment variable{}: {}\n\n\
             To fix this:\n\
             1. Create a .env file in the project root (copy .env.example)\n\
             2. Set the missing variable{}: export {}=<value>\n\
             3. Or set {} in your environment before running",
            if missing_vars.len() > 1 { "s" } else { "" },
            missing_vars.join(", "),
            if missing_vars.len() > 1 { "s" } else { "" },
            missing_vars[0],
            missing_vars.join(", ")
        )));
    }

    Ok(result)
}
