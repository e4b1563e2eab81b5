use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::processor::rules;

pub const DEFAULT_VERSION: Version = Version::V5;
pub const MAX_LINE_LENGTH: usize = 120;

/// Language revision a script is written against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Version {
    #[serde(rename = "v4")]
    V4,
    #[serde(rename = "v5")]
    V5,
    #[serde(rename = "v6")]
    V6,
}

impl Version {
    pub const ALL: [Version; 3] = [Version::V4, Version::V5, Version::V6];

    pub fn number(self) -> u32 {
        match self {
            Version::V4 => 4,
            Version::V5 => 5,
            Version::V6 => 6,
        }
    }

    pub fn from_number(n: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.number() == n)
    }

    /// Canonical in-text marker, e.g. `//@version=5`.
    pub fn marker(self) -> String {
        format!("//@version={}", self.number())
    }

    /// Next revision towards `target`, if any.
    pub fn step_towards(self, target: Version) -> Option<Version> {
        let n = self.number();
        match target.number().cmp(&n) {
            std::cmp::Ordering::Greater => Version::from_number(n + 1),
            std::cmp::Ordering::Less => Version::from_number(n - 1),
            std::cmp::Ordering::Equal => None,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.number())
    }
}

impl FromStr for Version {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        digits
            .parse::<u32>()
            .ok()
            .and_then(Version::from_number)
            .ok_or_else(|| EngineError::UnsupportedVersion(s.to_string()))
    }
}

/// ─────────────────────────────────────────────────────
/// Scripts
/// ─────────────────────────────────────────────────────

/// Raw script text plus its lazily detected version marker.
///
/// A `Script` is never mutated: every stage hands back a new one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Script {
    text: String,
    marker: OnceCell<Option<Version>>,
}

impl Script {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            marker: OnceCell::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }

    /// Version named by the in-text marker, if there is a supported one.
    pub fn declared_version(&self) -> Option<Version> {
        *self.marker.get_or_init(|| rules::detect_version(&self.text))
    }

    /// Declared version, falling back to [`DEFAULT_VERSION`].
    pub fn version(&self) -> Version {
        self.declared_version().unwrap_or(DEFAULT_VERSION)
    }
}

impl PartialEq for Script {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for Script {}

impl From<String> for Script {
    fn from(text: String) -> Self {
        Script::new(text)
    }
}

impl From<&str> for Script {
    fn from(text: &str) -> Self {
        Script::new(text)
    }
}

impl From<Script> for String {
    fn from(script: Script) -> Self {
        script.text
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// ─────────────────────────────────────────────────────
/// Diagnostics
/// ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Which family of problem a diagnostic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Unbalanced brackets, quotes or block comments.
    Structural,
    /// Missing or conflicting top-level declaration call.
    Declaration,
    /// Construct not allowed in the script's version.
    VersionSyntax,
    /// Still works, but has a modern replacement.
    Deprecated,
    /// Version marker missing, unsupported or contradicting the caller.
    VersionMarker,
    /// Layout issues such as long lines.
    Style,
    /// Pattern-based suspicion (named arguments, missing commas).
    Heuristic,
    Timeout,
    Storage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl Diagnostic {
    pub fn error(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            message: message.into(),
            line: None,
        }
    }

    pub fn warning(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            kind,
            message: message.into(),
            line: None,
        }
    }

    pub fn at(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match self.line {
            Some(line) => write!(f, "{label} (line {line}): {}", self.message),
            None => write!(f, "{label}: {}", self.message),
        }
    }
}

/// ─────────────────────────────────────────────────────
/// Stage results
/// ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Split diagnostics by severity; `valid` follows from the error count.
    pub fn from_diagnostics(diagnostics: Vec<Diagnostic>) -> Self {
        let (errors, warnings): (Vec<_>, Vec<_>) = diagnostics
            .into_iter()
            .partition(|d| d.severity == Severity::Error);
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    pub fn errors_of(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.errors.iter().filter(move |d| d.kind == kind)
    }

    pub fn warnings_of(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.warnings.iter().filter(move |d| d.kind == kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixResult {
    pub fixed: bool,
    pub script: Script,
    pub changes: Vec<String>,
}

impl FixResult {
    pub fn new(script: Script, changes: Vec<String>) -> Self {
        Self {
            fixed: !changes.is_empty(),
            script,
            changes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatResult {
    pub formatted: Script,
    pub changes: Vec<String>,
    pub warnings: Vec<Diagnostic>,
}

/// Outcome of the full validate → fix → re-validate → format chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub initial: ValidationResult,
    /// Present only when the initial validation failed.
    pub fix: Option<FixResult>,
    pub revalidated: Option<ValidationResult>,
    pub formatted: FormatResult,
}

/// One persisted snapshot of a script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptVersionRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub version: Version,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Observational progress report emitted during long validations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub steps_done: usize,
    pub total_steps: usize,
}
