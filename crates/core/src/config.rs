use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cpq::rules::{DEFAULT_MAX_PASSES, MAX_PASSES_LIMIT};

/// One day.
pub const MAX_FLUSH_INTERVAL_SECS: u64 = 86_400;
pub const CONFIG_FILE_CANDIDATES: [&str; 2] = ["kitwright.toml", "config/kitwright.toml"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub catalog: CatalogConfig,
    pub engine: EngineConfig,
    pub pricing: PricingConfig,
    pub tracker: TrackerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogConfig {
    pub data_dir: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub max_passes: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PricingConfig {
    pub demand_model: DemandModelKind,
    pub demand_seed: Option<u64>,
    pub business_hours_start: u32,
    pub business_hours_end: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackerConfig {
    pub flush_interval_secs: u64,
    pub max_buffered_events: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemandModelKind {
    None,
    TimeOfDay,
    Randomized,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub data_dir: Option<PathBuf>,
    pub max_passes: Option<usize>,
    pub demand_model: Option<DemandModelKind>,
    pub demand_seed: Option<u64>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            catalog: CatalogConfig { data_dir: PathBuf::from("data") },
            engine: EngineConfig { max_passes: DEFAULT_MAX_PASSES },
            pricing: PricingConfig {
                demand_model: DemandModelKind::TimeOfDay,
                demand_seed: None,
                business_hours_start: 9,
                business_hours_end: 17,
            },
            tracker: TrackerConfig { flush_interval_secs: 30, max_buffered_events: 500 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for DemandModelKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "none" => Ok(Self::None),
            "time_of_day" => Ok(Self::TimeOfDay),
            "randomized" => Ok(Self::Randomized),
            other => Err(ConfigError::Validation(format!(
                "unsupported demand model `{other}` (expected none|time_of_day|randomized)"
            ))),
        }
    }
}

impl std::fmt::Display for DemandModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::None => "none",
            Self::TimeOfDay => "time_of_day",
            Self::Randomized => "randomized",
        };
        f.write_str(label)
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_CANDIDATES[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(catalog) = patch.catalog {
            if let Some(data_dir) = catalog.data_dir {
                self.catalog.data_dir = data_dir;
            }
        }

        if let Some(engine) = patch.engine {
            if let Some(max_passes) = engine.max_passes {
                self.engine.max_passes = max_passes;
            }
        }

        if let Some(pricing) = patch.pricing {
            if let Some(demand_model) = pricing.demand_model {
                self.pricing.demand_model = demand_model;
            }
            if let Some(demand_seed) = pricing.demand_seed {
                self.pricing.demand_seed = Some(demand_seed);
            }
            if let Some(start) = pricing.business_hours_start {
                self.pricing.business_hours_start = start;
            }
            if let Some(end) = pricing.business_hours_end {
                self.pricing.business_hours_end = end;
            }
        }

        if let Some(tracker) = patch.tracker {
            if let Some(flush_interval_secs) = tracker.flush_interval_secs {
                self.tracker.flush_interval_secs = flush_interval_secs;
            }
            if let Some(max_buffered_events) = tracker.max_buffered_events {
                self.tracker.max_buffered_events = max_buffered_events;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("KITWRIGHT_CATALOG_DATA_DIR") {
            self.catalog.data_dir = PathBuf::from(value);
        }

        if let Some(value) = read_env("KITWRIGHT_ENGINE_MAX_PASSES") {
            self.engine.max_passes = parse_usize("KITWRIGHT_ENGINE_MAX_PASSES", &value)?;
        }

        if let Some(value) = read_env("KITWRIGHT_PRICING_DEMAND_MODEL") {
            self.pricing.demand_model = value.parse()?;
        }
        if let Some(value) = read_env("KITWRIGHT_PRICING_DEMAND_SEED") {
            self.pricing.demand_seed = Some(parse_u64("KITWRIGHT_PRICING_DEMAND_SEED", &value)?);
        }
        if let Some(value) = read_env("KITWRIGHT_PRICING_BUSINESS_HOURS_START") {
            self.pricing.business_hours_start =
                parse_u32("KITWRIGHT_PRICING_BUSINESS_HOURS_START", &value)?;
        }
        if let Some(value) = read_env("KITWRIGHT_PRICING_BUSINESS_HOURS_END") {
            self.pricing.business_hours_end =
                parse_u32("KITWRIGHT_PRICING_BUSINESS_HOURS_END", &value)?;
        }

        if let Some(value) = read_env("KITWRIGHT_TRACKER_FLUSH_INTERVAL_SECS") {
            self.tracker.flush_interval_secs =
                parse_u64("KITWRIGHT_TRACKER_FLUSH_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("KITWRIGHT_TRACKER_MAX_BUFFERED_EVENTS") {
            self.tracker.max_buffered_events =
                parse_usize("KITWRIGHT_TRACKER_MAX_BUFFERED_EVENTS", &value)?;
        }

        let log_level =
            read_env("KITWRIGHT_LOGGING_LEVEL").or_else(|| read_env("KITWRIGHT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("KITWRIGHT_LOGGING_FORMAT").or_else(|| read_env("KITWRIGHT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(data_dir) = overrides.data_dir {
            self.catalog.data_dir = data_dir;
        }
        if let Some(max_passes) = overrides.max_passes {
            self.engine.max_passes = max_passes;
        }
        if let Some(demand_model) = overrides.demand_model {
            self.pricing.demand_model = demand_model;
        }
        if let Some(demand_seed) = overrides.demand_seed {
            self.pricing.demand_seed = Some(demand_seed);
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_catalog(&self.catalog)?;
        validate_engine(&self.engine)?;
        validate_pricing(&self.pricing)?;
        validate_tracker(&self.tracker)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    CONFIG_FILE_CANDIDATES.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_catalog(catalog: &CatalogConfig) -> Result<(), ConfigError> {
    if catalog.data_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation("catalog.data_dir must not be empty".to_string()));
    }
    Ok(())
}

fn validate_engine(engine: &EngineConfig) -> Result<(), ConfigError> {
    if engine.max_passes == 0 || engine.max_passes > MAX_PASSES_LIMIT {
        return Err(ConfigError::Validation(format!(
            "engine.max_passes must be in range 1..={MAX_PASSES_LIMIT}"
        )));
    }
    Ok(())
}

fn validate_pricing(pricing: &PricingConfig) -> Result<(), ConfigError> {
    if pricing.business_hours_start > 23 || pricing.business_hours_end > 23 {
        return Err(ConfigError::Validation(
            "pricing.business_hours_start and pricing.business_hours_end must be in range 0..=23"
                .to_string(),
        ));
    }
    if pricing.business_hours_start > pricing.business_hours_end {
        return Err(ConfigError::Validation(
            "pricing.business_hours_start must not be after pricing.business_hours_end"
                .to_string(),
        ));
    }
    Ok(())
}

fn validate_tracker(tracker: &TrackerConfig) -> Result<(), ConfigError> {
    if tracker.flush_interval_secs == 0 || tracker.flush_interval_secs > MAX_FLUSH_INTERVAL_SECS {
        return Err(ConfigError::Validation(format!(
            "tracker.flush_interval_secs must be in range 1..={MAX_FLUSH_INTERVAL_SECS}"
        )));
    }
    if tracker.max_buffered_events == 0 {
        return Err(ConfigError::Validation(
            "tracker.max_buffered_events must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    catalog: Option<CatalogPatch>,
    engine: Option<EnginePatch>,
    pricing: Option<PricingPatch>,
    tracker: Option<TrackerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct CatalogPatch {
    data_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct EnginePatch {
    max_passes: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct PricingPatch {
    demand_model: Option<DemandModelKind>,
    demand_seed: Option<u64>,
    business_hours_start: Option<u32>,
    business_hours_end: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct TrackerPatch {
    flush_interval_secs: Option<u64>,
    max_buffered_events: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
