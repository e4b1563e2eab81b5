//! The analysis core.
//!
//! Every pass here is a pure function over a [`Script`] plus configuration.

pub mod converter;
pub mod fixer;
pub mod formatter;
pub mod rules;
pub mod scanner;
pub mod validator;

pub use crate::model::Script;

use tracing::debug;

use crate::config::{FormatOptions, ValidationBudget};
use crate::error::EngineResult;
use crate::model::{PipelineReport, Version};

/// Runs the whole chain: validate, repair if invalid, re-validate, format.
pub fn run(
    script: &Script,
    declared: Option<Version>,
    budget: &ValidationBudget,
    options: &FormatOptions,
) -> EngineResult<PipelineReport> {
    // 1. ── Validate ───────────────────────────────────────────────────
    let initial = validator::validate_with(script, declared, budget, None)?;

    // 2. ── Repair ─────────────────────────────────────────────────────
    let (fix, revalidated) = if initial.valid {
        (None, None)
    } else {
        let fix = fixer::fix(script);
        let again = validator::validate_with(&fix.script, declared, budget, None)?;
        debug!(before = initial.errors.len(), after = again.errors.len(), "repair pass done");
        (Some(fix), Some(again))
    };

    // 3. ── Format ─────────────────────────────────────────────────────
    let source = fix.as_ref().map_or(script, |f| &f.script);
    let formatted = formatter::format(source, options);

    Ok(PipelineReport {
        initial,
        fix,
        revalidated,
        formatted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_script_skips_repair() {
        let script = Script::new("//@version=5\nindicator(\"x\")\nplot(close)\n");
        let report = run(&script, None, &ValidationBudget::default(), &FormatOptions::default()).unwrap();
        assert!(report.initial.valid);
        assert!(report.fix.is_none());
        assert_eq!(report.formatted.formatted, script);
    }

    #[test]
    fn test_invalid_script_is_repaired_then_formatted() {
        let script = Script::new("indicator(\"x\", overlay=true");
        let report = run(&script, None, &ValidationBudget::default(), &FormatOptions::default()).unwrap();
        assert!(!report.initial.valid);
        assert!(report.fix.as_ref().is_some_and(|f| f.fixed));
        assert!(report.revalidated.as_ref().is_some_and(|r| r.valid));
        assert_eq!(
            report.formatted.formatted.as_str(),
            "//@version=5\nindicator(\"x\", overlay = true)\n"
        );
    }
}
