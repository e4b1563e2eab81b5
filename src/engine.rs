//! The boundary every caller goes through.
//!
//! An [`Engine`] owns its [`Config`] and [`History`]; there is no global
//! instance. All operations except the history ones are pure.

use tracing::{debug, info, warn};

use crate::config::{Config, FormatOptions};
use crate::error::EngineResult;
use crate::model::{
    FixResult, FormatResult, PipelineReport, Progress, Script, ScriptVersionRecord, ValidationResult,
    Version,
};
use crate::processor::{self, converter, fixer, formatter, rules, validator};
use crate::writer::{History, compare_versions};

pub struct Engine {
    config: Config,
    history: History,
}

fn parse_version(version: Option<&str>) -> EngineResult<Option<Version>> {
    version.map(str::parse).transpose()
}

impl Engine {
    pub fn from_config(config: Config) -> Self {
        let history = History::new(config.history_dir.clone());
        Self { config, history }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Validate `script`, optionally against the version the caller expects.
    pub fn validate(&self, script: &str, version: Option<&str>) -> EngineResult<ValidationResult> {
        let declared = parse_version(version)?;
        validator::validate_with(&Script::new(script), declared, &self.config.validation, None)
    }

    /// Like [`Engine::validate`], reporting progress as lines are checked.
    pub fn validate_with_progress(
        &self,
        script: &str,
        version: Option<&str>,
        progress: &mut dyn FnMut(Progress),
    ) -> EngineResult<ValidationResult> {
        let declared = parse_version(version)?;
        validator::validate_with(&Script::new(script), declared, &self.config.validation, Some(progress))
    }

    pub fn fix(&self, script: &str) -> FixResult {
        let result = fixer::fix(&Script::new(script));
        debug!(changes = result.changes.len(), "fix done");
        result
    }

    /// Format with `options`, or the configured ones.
    pub fn format(&self, script: &str, options: Option<&FormatOptions>) -> FormatResult {
        formatter::format(&Script::new(script), options.unwrap_or(&self.config.format))
    }

    /// Validate, repair when invalid, re-validate and format in one go.
    pub fn process(&self, script: &str, version: Option<&str>) -> EngineResult<PipelineReport> {
        let declared = parse_version(version)?;
        processor::run(&Script::new(script), declared, &self.config.validation, &self.config.format)
    }

    pub fn convert_version(&self, script: &str, target: &str) -> EngineResult<String> {
        let target: Version = target.parse()?;
        Ok(converter::convert(&Script::new(script), target).into_string())
    }

    pub fn detect_version(&self, script: &str) -> Option<Version> {
        rules::detect_version(script)
    }

    /// Snapshot `script` into the history and return its id.
    ///
    /// The stored validity comes from re-validating the script; a validation
    /// that aborts is stored as invalid.
    pub fn save_version(&self, script: &str, notes: Option<&str>) -> EngineResult<String> {
        let parsed = Script::new(script);
        let valid = match validator::validate_with(&parsed, None, &self.config.validation, None) {
            Ok(result) => result.valid,
            Err(err) => {
                warn!(error = %err, "validation aborted while saving, storing as invalid");
                false
            }
        };
        let record = self
            .history
            .append(script, parsed.version(), valid, notes.map(str::to_string))?;
        info!(id = %record.id, valid, "script version saved");
        Ok(record.id)
    }

    pub fn get_history(&self, id: &str) -> EngineResult<Vec<ScriptVersionRecord>> {
        Ok(self.history.entries(id)?)
    }

    /// Stored entry `index` of `id`; the latest when `index` is `None`.
    pub fn get_version(&self, id: &str, index: Option<usize>) -> EngineResult<ScriptVersionRecord> {
        Ok(self.history.entry(id, index)?)
    }

    pub fn compare_versions(&self, old: &str, new: &str) -> Vec<String> {
        compare_versions(old, new)
    }

    pub fn diff_records(&self, id: &str, a: usize, b: usize) -> EngineResult<Vec<String>> {
        Ok(self.history.diff(id, a, b)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use std::time::Duration;
    use tempfile::TempDir;

    fn engine(dir: &TempDir) -> Engine {
        Engine::from_config(Config {
            history_dir: dir.path().to_path_buf(),
            ..Config::default()
        })
    }

    #[test]
    fn test_unsupported_version_is_rejected() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        assert!(matches!(
            engine.validate("indicator(\"x\")", Some("v3")),
            Err(EngineError::UnsupportedVersion(_))
        ));
        assert!(engine.convert_version("x", "seven").is_err());
    }

    #[test]
    fn test_zero_ceiling_times_out() {
        let dir = TempDir::new().unwrap();
        let mut config = Config {
            history_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        config.validation.ceiling = Duration::ZERO;
        let engine = Engine::from_config(config);
        let err = engine.validate("//@version=5\nindicator(\"x\")", None).unwrap_err();
        assert!(matches!(err, EngineError::Timeout { .. }));
    }

    #[test]
    fn test_progress_is_reported() {
        let dir = TempDir::new().unwrap();
        let mut config = Config {
            history_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        config.validation.progress_interval = Duration::ZERO;
        let engine = Engine::from_config(config);

        let mut seen = Vec::new();
        let result = engine
            .validate_with_progress("//@version=5\nindicator(\"x\")", None, &mut |p| seen.push(p))
            .unwrap();
        assert!(result.valid);
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|p| p.steps_done <= p.total_steps));
    }

    #[test]
    fn test_save_and_read_back() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let script = "//@version=6\nindicator(\"x\")";

        let id = engine.save_version(script, Some("first")).unwrap();
        assert_eq!(id, crate::writer::content_id(script));

        let record = engine.get_version(&id, None).unwrap();
        assert_eq!(record.content, script);
        assert_eq!(record.version, Version::V6);
        assert_eq!(record.notes.as_deref(), Some("first"));
        // v6 without import: warnings only
        assert!(record.valid);

        engine.save_version(script, None).unwrap();
        assert_eq!(engine.get_history(&id).unwrap().len(), 2);
        assert!(engine.diff_records(&id, 0, 1).unwrap().is_empty());
    }
}
