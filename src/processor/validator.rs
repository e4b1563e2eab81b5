//! Script validator.
//!
//! Runs the checks in a fixed order and collects diagnostics:
//!
//!   1. empty script
//!   2. version marker presence / agreement with the caller
//!   3. bracket balance
//!   4. quote and block-comment balance
//!   5. exactly one top-level declaration
//!   6. version-specific rule tables
//!   7. line length
//!
//! Every line-based check advances a [`Clock`] that enforces the time
//! budget and reports progress.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::rules;
use super::scanner::{BracketIssue, BracketStack, LexState, ScannedLine, final_state, scan_lines};
use crate::config::ValidationBudget;
use crate::error::{EngineError, EngineResult};
use crate::model::{
    DEFAULT_VERSION, Diagnostic, DiagnosticKind, MAX_LINE_LENGTH, Progress, Script, Severity,
    ValidationResult, Version,
};

/// Number of passes that walk every line (brackets, quotes, declarations,
/// version rules, line length).
const LINE_PASSES: usize = 5;

/// Validate with the default budget and no progress reporting.
pub fn validate(script: &Script, declared: Option<Version>) -> EngineResult<ValidationResult> {
    validate_with(script, declared, &ValidationBudget::default(), None)
}

pub fn validate_with(
    script: &Script,
    declared: Option<Version>,
    budget: &ValidationBudget,
    progress: Option<&mut dyn FnMut(Progress)>,
) -> EngineResult<ValidationResult> {
    let text = script.as_str();
    let mut diags = Vec::<Diagnostic>::new();

    // 1. ── Empty ─────────────────────────────────────────────────────
    if text.trim().is_empty() {
        diags.push(Diagnostic::error(DiagnosticKind::Structural, "script is empty"));
        return Ok(ValidationResult::from_diagnostics(diags));
    }

    if text.chars().count() >= budget.large_script_threshold {
        warn!(chars = text.len(), "large script, validation may be slow");
    }

    let lines = scan_lines(text);
    let mut clock = Clock::new(budget, lines.len() * LINE_PASSES, progress);

    // 2. ── Version marker ────────────────────────────────────────────
    let version = check_marker(script, declared, &mut diags);

    // 3. ── Brackets ──────────────────────────────────────────────────
    let mut stack = BracketStack::default();
    for line in &lines {
        clock.step()?;
        stack.feed(line);
    }
    let report = stack.finish();
    for issue in &report.issues {
        diags.push(match *issue {
            BracketIssue::Unmatched { ch, line } => Diagnostic::error(
                DiagnosticKind::Structural,
                format!("unexpected closing '{ch}' with no matching opener"),
            )
            .at(line),
            BracketIssue::Mismatched { ch, line, open } => Diagnostic::error(
                DiagnosticKind::Structural,
                format!(
                    "mismatched closing '{ch}': '{}' opened on line {} is still open",
                    open.ch, open.line
                ),
            )
            .at(line),
        });
    }
    if let Some(first) = report.open.first() {
        let k = report.open.len();
        diags.push(
            Diagnostic::error(
                DiagnosticKind::Structural,
                format!(
                    "missing {k} closing bracket(s): expected '{}' before end of script",
                    report.missing_closers()
                ),
            )
            .at(first.line),
        );
    }

    // 4. ── Quotes / block comments ───────────────────────────────────
    for line in &lines {
        clock.step()?;
        if let Some(q) = line.open_string {
            if line.number < lines.len() || text.ends_with('\n') {
                diags.push(
                    Diagnostic::error(
                        DiagnosticKind::Structural,
                        format!("unclosed string literal (missing {q})"),
                    )
                    .at(line.number),
                );
            }
        }
    }
    match final_state(text) {
        LexState::SingleQuoteString | LexState::DoubleQuoteString => diags.push(
            Diagnostic::error(DiagnosticKind::Structural, "unclosed string literal at end of script")
                .at(lines.len()),
        ),
        LexState::BlockComment => diags.push(Diagnostic::error(
            DiagnosticKind::Structural,
            "unterminated block comment at end of script",
        )),
        LexState::Normal | LexState::LineComment => {}
    }

    // 5. ── Declaration ───────────────────────────────────────────────
    let mut declarations = Vec::<(String, usize)>::new();
    for line in &lines {
        clock.step()?;
        if let Some(name) = rules::declaration_name(line) {
            declarations.push((name, line.number));
        }
    }
    match declarations.as_slice() {
        [] => diags.push(Diagnostic::error(
            DiagnosticKind::Declaration,
            "missing declaration: call exactly one of indicator(), strategy() or library()",
        )),
        [_] => {}
        [_, (_, second), ..] => {
            let found: Vec<String> = declarations
                .iter()
                .map(|(name, line)| format!("{name}() on line {line}"))
                .collect();
            diags.push(
                Diagnostic::error(
                    DiagnosticKind::Declaration,
                    format!(
                        "multiple declarations found ({}); only one is allowed",
                        found.join(", ")
                    ),
                )
                .at(*second),
            );
        }
    }

    // 6. ── Version rules ─────────────────────────────────────────────
    for line in &lines {
        clock.step()?;
        if !line.has_code() {
            continue;
        }
        for rule in rules::line_rules_for(version) {
            if (rule.predicate)(line) {
                diags.push(diagnostic(rule.severity, rule.kind, rule.message).at(line.number));
            }
        }
    }
    for rule in rules::script_rules_for(version) {
        if (rule.predicate)(&lines) {
            diags.push(diagnostic(rule.severity, rule.kind, rule.message));
        }
    }

    // 7. ── Line length ───────────────────────────────────────────────
    for line in &lines {
        clock.step()?;
        check_length(line, &mut diags);
    }

    let result = ValidationResult::from_diagnostics(diags);
    debug!(
        %version,
        errors = result.errors.len(),
        warnings = result.warnings.len(),
        "validation finished"
    );
    Ok(result)
}

fn diagnostic(severity: Severity, kind: DiagnosticKind, message: &str) -> Diagnostic {
    match severity {
        Severity::Error => Diagnostic::error(kind, message),
        Severity::Warning => Diagnostic::warning(kind, message),
    }
}

/// Record marker diagnostics and pick the version the rule tables run for.
fn check_marker(script: &Script, declared: Option<Version>, diags: &mut Vec<Diagnostic>) -> Version {
    let detected = match rules::find_marker(script.as_str()) {
        None => {
            diags.push(Diagnostic::warning(
                DiagnosticKind::VersionMarker,
                format!("missing version marker; add {} as the first line", DEFAULT_VERSION.marker()),
            ));
            None
        }
        Some((idx, n)) => match Version::from_number(n) {
            Some(v) => Some(v),
            None => {
                diags.push(
                    Diagnostic::warning(
                        DiagnosticKind::VersionMarker,
                        format!("unsupported version marker //@version={n}; assuming {DEFAULT_VERSION}"),
                    )
                    .at(idx + 1),
                );
                None
            }
        },
    };

    if let (Some(declared), Some(detected)) = (declared, detected) {
        if declared != detected {
            diags.push(Diagnostic::warning(
                DiagnosticKind::VersionMarker,
                format!("requested {declared} but the script is marked {detected}"),
            ));
        }
    }

    declared.or(detected).unwrap_or(DEFAULT_VERSION)
}

fn check_length(line: &ScannedLine<'_>, diags: &mut Vec<Diagnostic>) {
    let len = line.text.chars().count();
    if len > MAX_LINE_LENGTH {
        diags.push(
            Diagnostic::warning(
                DiagnosticKind::Style,
                format!("line is {len} characters long (limit {MAX_LINE_LENGTH})"),
            )
            .at(line.number),
        );
    }
}

/// ─────────────────────────────────────────────────────
/// Time budget
/// ─────────────────────────────────────────────────────

struct Clock<'p> {
    started: Instant,
    last_report: Instant,
    ceiling: Duration,
    interval: Duration,
    done: usize,
    total: usize,
    progress: Option<&'p mut dyn FnMut(Progress)>,
}

impl<'p> Clock<'p> {
    fn new(budget: &ValidationBudget, total: usize, progress: Option<&'p mut dyn FnMut(Progress)>) -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last_report: now,
            ceiling: budget.ceiling,
            interval: budget.progress_interval,
            done: 0,
            total,
            progress,
        }
    }

    /// Count one unit of work; fails once the ceiling is reached.
    fn step(&mut self) -> EngineResult<()> {
        let elapsed = self.started.elapsed();
        if elapsed >= self.ceiling {
            return Err(EngineError::Timeout {
                elapsed,
                limit: self.ceiling,
                steps_done: self.done,
                total_steps: self.total,
            });
        }
        self.done += 1;

        if let Some(report) = self.progress.as_mut() {
            if self.last_report.elapsed() >= self.interval {
                self.last_report = Instant::now();
                report(Progress {
                    steps_done: self.done,
                    total_steps: self.total,
                });
            }
        }
        Ok(())
    }
}
