use config::{Config, File, FileFormat, Source};
pub use config::ConfigError;
use serde::Deserialize;

use crate::ladder::{InstrumentMeta, LadderConfig, RunnerConfig};
use crate::paper::PaperSettings;
use crate::signal::SignalSettings;

/// Main configuration struct
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Ladder configuration (entry mode, progressions, stops, risk)
    pub ladder: LadderConfig,
    /// Instrument steps; missing values fall back to conservative defaults
    #[serde(default)]
    pub instrument: InstrumentMeta,
    /// Signal source selection
    #[serde(default)]
    pub signal: SignalSettings,
    /// Runner loop settings
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Paper account used by replays
    #[serde(default)]
    pub paper: PaperSettings,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize)]
pub struct LogConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Load settings from a configuration file
    pub fn new(config_path: &str) -> Result<Self, ConfigError> {
        Self::build(File::with_name(config_path))
    }

    /// Load settings from TOML text
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Self::build(File::from_str(contents, FileFormat::Toml))
    }

    fn build<S>(source: S) -> Result<Self, ConfigError>
    where
        S: Source + Send + Sync + 'static,
    {
        let s = Config::builder()
            .add_source(source)
            // Environment variables override the file
            // e.g. APP_LADDER__MAX_STAGES=5
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }
}
