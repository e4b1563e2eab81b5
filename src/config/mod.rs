//! Engine configuration.
//!
//! A [`Config`] is built once by the caller (normally `run()` from the CLI
//! flags plus an optional TOML file) and handed to [`crate::Engine`]. Every
//! field has a default, so an empty or partial file is valid:
//!
//! ```toml
//! history_dir = ".pinecheck/history"
//!
//! [validation]
//! ceiling_ms = 180000
//! large_script_threshold = 10000
//! progress_interval_ms = 500
//!
//! [format]
//! indent_size = 4
//! use_tabs = false
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::model::MAX_LINE_LENGTH;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub history_dir: PathBuf,
    pub validation: ValidationBudget,
    pub format: FormatOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            history_dir: PathBuf::from(".pinecheck/history"),
            validation: ValidationBudget::default(),
            format: FormatOptions::default(),
        }
    }
}

impl Config {
    /// Load `path` if given, otherwise fall back to the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }
}

/// Time and size limits for a single validation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationBudget {
    /// Wall-clock ceiling; reaching it aborts validation.
    #[serde(rename = "ceiling_ms", with = "millis")]
    pub ceiling: Duration,
    /// Scripts at least this many characters long are logged as large.
    pub large_script_threshold: usize,
    #[serde(rename = "progress_interval_ms", with = "millis")]
    pub progress_interval: Duration,
}

impl Default for ValidationBudget {
    fn default() -> Self {
        Self {
            ceiling: Duration::from_secs(180),
            large_script_threshold: 10_000,
            progress_interval: Duration::from_millis(500),
        }
    }
}

/// Knobs of the formatter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatOptions {
    pub indent_size: usize,
    pub use_tabs: bool,
    pub operator_spacing: bool,
    pub comma_spacing: bool,
    /// Lines longer than this are reported, never wrapped.
    pub max_line_length: usize,
    pub collapse_blank_lines: bool,
    pub brace_on_new_line: bool,
    pub align_comments: bool,
    pub sync_version_comment: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            indent_size: 4,
            use_tabs: false,
            operator_spacing: true,
            comma_spacing: true,
            max_line_length: MAX_LINE_LENGTH,
            collapse_blank_lines: true,
            brace_on_new_line: false,
            align_comments: true,
            sync_version_comment: true,
        }
    }
}

impl FormatOptions {
    /// One level of indentation.
    pub fn indent_unit(&self) -> String {
        if self.use_tabs {
            "\t".to_string()
        } else {
            " ".repeat(self.indent_size.max(1))
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
