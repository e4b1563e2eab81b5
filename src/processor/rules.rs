//! Rule tables shared by the validator, the fixer and the converter.
//!
//! Everything version specific lives here so the three passes cannot drift
//! apart: the validator flags what the fixer repairs and the converter
//! rewrites with the same patterns. Every pattern runs on *masked* lines
//! (see [`super::scanner::ScannedLine::masked`]).

use once_cell::sync::Lazy;
use regex::Regex;

use super::scanner::{ScannedLine, find_calls, matching_close, scan_lines, split_args};
use crate::model::{DiagnosticKind, Severity, Version};

/// ─────────────────────────────────────────────────────
/// Patterns
/// ─────────────────────────────────────────────────────

pub static VERSION_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*//\s*@version\s*=\s*(\d+)\s*$").expect("valid regex"));

pub static DECLARATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(indicator|strategy|library|study)\s*\(").expect("valid regex"));

pub static EXPORT_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\s*)export\s+(var|const)\s+([A-Za-z_]\w*)\s*=").expect("valid regex")
});

pub static ARROW_FUNCTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\s*)([A-Za-z_]\w*)\s*\([^()]*\)\s*=>").expect("valid regex"));

pub static METHOD_FUNCTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\s*)method\s+([A-Za-z_]\w*\s*\()").expect("valid regex"));

const TYPE_PATTERN: &str = r"(?:(?:series|simple|const)\s+)?(?:int|float|bool|string|color|label|line|box|table|linefill|polyline|(?:array|matrix|map)<[^<>]*(?:<[^<>]*>[^<>]*)*>)";

pub static FUNCTION_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^\s*(?:export\s+)?(?:method\s+)?(?:({TYPE_PATTERN})\s+)?([A-Za-z_]\w*)\s*\([^()]*\)\s*=>"
    ))
    .expect("valid regex")
});

pub static LEGACY_MUTABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*let\s+[A-Za-z_]\w*").expect("valid regex"));

pub static MUTABLE_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^(\s*)var\s+(?:{TYPE_PATTERN}\s+)?([A-Za-z_]\w*)\s*="))
        .expect("valid regex")
});

pub static CONST_DECL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\s*)const\s+").expect("valid regex"));

pub static IMPORT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*import\s+\S").expect("valid regex"));

pub static NAMED_ARG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[A-Za-z_]\w*\s*=[^=]").expect("valid regex"));

/// Import line added when moving a script to v6.
pub const DEFAULT_IMPORT: &str = "import TradingView/ta/7 as tvta";

pub const KEYWORDS: &[&str] = &[
    "if", "else", "for", "to", "by", "in", "while", "switch", "and", "or", "not", "var", "varip",
    "const", "let", "method", "export", "import", "type", "true", "false", "na", "continue",
    "break", "return",
];

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

/// Bare built-ins that moved into a namespace, and where they went.
pub const DEPRECATED_BUILTINS: &[(&str, &str)] = &[
    ("sma", "ta.sma"),
    ("ema", "ta.ema"),
    ("wma", "ta.wma"),
    ("rma", "ta.rma"),
    ("vwma", "ta.vwma"),
    ("rsi", "ta.rsi"),
    ("macd", "ta.macd"),
    ("stoch", "ta.stoch"),
    ("atr", "ta.atr"),
    ("tr", "ta.tr"),
    ("cci", "ta.cci"),
    ("mom", "ta.mom"),
    ("roc", "ta.roc"),
    ("change", "ta.change"),
    ("highest", "ta.highest"),
    ("lowest", "ta.lowest"),
    ("stdev", "ta.stdev"),
    ("crossover", "ta.crossover"),
    ("crossunder", "ta.crossunder"),
    ("cross", "ta.cross"),
    ("pivothigh", "ta.pivothigh"),
    ("pivotlow", "ta.pivotlow"),
    ("valuewhen", "ta.valuewhen"),
    ("barssince", "ta.barssince"),
    ("cum", "ta.cum"),
    ("falling", "ta.falling"),
    ("rising", "ta.rising"),
    ("abs", "math.abs"),
    ("max", "math.max"),
    ("min", "math.min"),
    ("round", "math.round"),
    ("sqrt", "math.sqrt"),
    ("pow", "math.pow"),
    ("log", "math.log"),
    ("exp", "math.exp"),
    ("floor", "math.floor"),
    ("ceil", "math.ceil"),
    ("avg", "math.avg"),
    ("sign", "math.sign"),
    ("tostring", "str.tostring"),
    ("tonumber", "str.tonumber"),
    ("security", "request.security"),
];

/// Legacy declaration call and its modern name.
pub const DEPRECATED_DECLARATION: (&str, &str) = ("study", "indicator");

/// Built-ins whose multi-argument calls read better with named arguments.
pub const NAMED_ARG_BUILTINS: &[&str] = &[
    "plot",
    "plotshape",
    "plotchar",
    "plotcandle",
    "hline",
    "fill",
    "bgcolor",
    "barcolor",
    "alertcondition",
    "input",
    "input.int",
    "input.float",
    "input.bool",
    "input.string",
    "input.source",
    "input.color",
    "strategy.entry",
    "strategy.exit",
    "strategy.close",
    "strategy.order",
    "label.new",
    "line.new",
    "box.new",
    "table.new",
];

/// ─────────────────────────────────────────────────────
/// Version marker
/// ─────────────────────────────────────────────────────

/// First version marker in `text`: (0-based line index, raw number).
///
/// Lines that start inside a block comment are skipped.
pub fn find_marker(text: &str) -> Option<(usize, u32)> {
    scan_lines(text).iter().enumerate().find_map(|(i, line)| {
        if line.starts_in_block_comment {
            return None;
        }
        let caps = VERSION_MARKER.captures(line.text)?;
        let n = caps[1].parse().unwrap_or(u32::MAX);
        Some((i, n))
    })
}

pub fn detect_version(text: &str) -> Option<Version> {
    find_marker(text).and_then(|(_, n)| Version::from_number(n))
}

/// ─────────────────────────────────────────────────────
/// Line predicates
/// ─────────────────────────────────────────────────────

pub fn declaration_name(line: &ScannedLine<'_>) -> Option<String> {
    DECLARATION.captures(&line.masked).map(|c| c[1].to_string())
}

fn uses_study(line: &ScannedLine<'_>) -> bool {
    !find_calls(&line.masked, DEPRECATED_DECLARATION.0).is_empty()
}

fn is_export_declaration(line: &ScannedLine<'_>) -> bool {
    EXPORT_DECL.is_match(&line.masked)
}

pub fn is_arrow_function(line: &ScannedLine<'_>) -> bool {
    ARROW_FUNCTION
        .captures(&line.masked)
        .is_some_and(|c| !is_keyword(&c[2]))
}

fn uses_legacy_mutable(line: &ScannedLine<'_>) -> bool {
    LEGACY_MUTABLE.is_match(&line.masked)
}

fn lacks_return_type(line: &ScannedLine<'_>) -> bool {
    FUNCTION_DECL
        .captures(&line.masked)
        .is_some_and(|c| c.get(1).is_none() && !is_keyword(&c[2]))
}

/// Built-in calls with two or more arguments, none of them named.
pub fn positional_builtin_calls(line: &ScannedLine<'_>) -> Vec<&'static str> {
    let mut hits = Vec::new();
    for name in NAMED_ARG_BUILTINS {
        for (_, open) in find_calls(&line.masked, name) {
            let Some(close) = matching_close(&line.masked, open) else {
                continue;
            };
            let args = split_args(&line.text[open + 1..close]);
            if args.len() >= 2 && !args.iter().any(|a| NAMED_ARG.is_match(a)) {
                hits.push(*name);
            }
        }
    }
    hits
}

fn has_positional_builtin_call(line: &ScannedLine<'_>) -> bool {
    !positional_builtin_calls(line).is_empty()
}

fn lacks_import(lines: &[ScannedLine<'_>]) -> bool {
    !lines.iter().any(|l| IMPORT.is_match(&l.masked))
}

/// ─────────────────────────────────────────────────────
/// Version rule tables
/// ─────────────────────────────────────────────────────

/// A check evaluated once per scanned line.
pub struct LineRule {
    pub versions: &'static [Version],
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub predicate: fn(&ScannedLine<'_>) -> bool,
    pub message: &'static str,
}

/// A check evaluated once per script.
pub struct ScriptRule {
    pub versions: &'static [Version],
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub predicate: fn(&[ScannedLine<'_>]) -> bool,
    pub message: &'static str,
}

pub const LINE_RULES: &[LineRule] = &[
    LineRule {
        versions: &[Version::V5, Version::V6],
        severity: Severity::Warning,
        kind: DiagnosticKind::Deprecated,
        predicate: uses_study,
        message: "`study()` is deprecated; use `indicator()` instead",
    },
    LineRule {
        versions: &[Version::V5, Version::V6],
        severity: Severity::Error,
        kind: DiagnosticKind::Declaration,
        predicate: is_export_declaration,
        message: "`export var`/`export const` is not valid; declare the variable, then `export` it on its own line",
    },
    LineRule {
        versions: &[Version::V6],
        severity: Severity::Error,
        kind: DiagnosticKind::VersionSyntax,
        predicate: is_arrow_function,
        message: "arrow-style function definitions are not allowed in v6; use `method name(...) =>`",
    },
    LineRule {
        versions: &[Version::V6],
        severity: Severity::Error,
        kind: DiagnosticKind::VersionSyntax,
        predicate: uses_legacy_mutable,
        message: "`let` is no longer supported in v6; declare mutable variables with `var`",
    },
    LineRule {
        versions: &[Version::V6],
        severity: Severity::Warning,
        kind: DiagnosticKind::VersionSyntax,
        predicate: lacks_return_type,
        message: "function declaration has no explicit return type",
    },
    LineRule {
        versions: &[Version::V6],
        severity: Severity::Warning,
        kind: DiagnosticKind::Heuristic,
        predicate: has_positional_builtin_call,
        message: "built-in call passes several arguments without naming any of them",
    },
];

pub const SCRIPT_RULES: &[ScriptRule] = &[ScriptRule {
    versions: &[Version::V6],
    severity: Severity::Warning,
    kind: DiagnosticKind::VersionSyntax,
    predicate: lacks_import,
    message: "v6 script has no import statement",
}];

pub fn line_rules_for(version: Version) -> impl Iterator<Item = &'static LineRule> {
    LINE_RULES.iter().filter(move |r| r.versions.contains(&version))
}

pub fn script_rules_for(version: Version) -> impl Iterator<Item = &'static ScriptRule> {
    SCRIPT_RULES.iter().filter(move |r| r.versions.contains(&version))
}

/// ─────────────────────────────────────────────────────
/// Call renaming
/// ─────────────────────────────────────────────────────

/// Rename every `from(` call on a scanned line to `to(`.
///
/// Only code positions are considered, and a name preceded by `.` or an
/// identifier character is left alone, so `ta.sma(` never becomes
/// `ta.ta.sma(`. Returns `None` when nothing matched.
pub fn rename_calls(line: &ScannedLine<'_>, from: &str, to: &str) -> Option<String> {
    let calls = find_calls(&line.masked, from);
    if calls.is_empty() {
        return None;
    }
    let mut out = String::with_capacity(line.text.len() + calls.len() * to.len());
    let mut last = 0;
    for (start, _) in calls {
        out.push_str(&line.text[last..start]);
        out.push_str(to);
        last = start + from.len();
    }
    out.push_str(&line.text[last..]);
    Some(out)
}
