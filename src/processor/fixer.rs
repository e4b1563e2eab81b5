//! Best-effort automatic repairs.
//!
//! Repairs run in a fixed confidence order. Each one looks at the *current*
//! text (already patched by the repairs before it) and decides on its own
//! whether it applies, so they compose without a shared diagnostic list.
//! A repair that would leave the script less balanced than it found it is
//! thrown away.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::rules::{self, DEPRECATED_BUILTINS, DEPRECATED_DECLARATION, EXPORT_DECL};
use super::scanner::{
    LexState, ScannedLine, bracket_report, final_state, matching_close, rewrite_lines,
    structural_imbalance,
};
use crate::model::{DEFAULT_VERSION, FixResult, Script, Version};

struct Patch {
    text: String,
    changes: Vec<String>,
}

type Repair = fn(&str) -> Option<Patch>;

/// Repairs in the order they are attempted.
const REPAIRS: &[(&str, Repair)] = &[
    ("version-marker", add_version_marker),
    ("unclosed-strings", close_strings),
    ("missing-closers", close_brackets),
    ("input-comma", insert_input_commas),
    ("call-comma", insert_call_commas),
    ("deprecated-declaration", rewrite_study),
    ("deprecated-builtins", namespace_builtins),
    ("export-declaration", split_export_declarations),
];

pub fn fix(script: &Script) -> FixResult {
    let mut text = script.as_str().to_string();
    let mut changes = Vec::<String>::new();

    for (name, repair) in REPAIRS {
        let Some(patch) = repair(&text) else {
            continue;
        };
        let before = structural_imbalance(&text);
        let after = structural_imbalance(&patch.text);
        if after > before {
            debug!(repair = name, before, after, "repair would unbalance the script, skipped");
            continue;
        }
        debug!(repair = name, changes = patch.changes.len(), "repair applied");
        text = patch.text;
        changes.extend(patch.changes);
    }

    FixResult::new(Script::new(text), changes)
}

fn effective_version(text: &str) -> Version {
    rules::detect_version(text).unwrap_or(DEFAULT_VERSION)
}

/// ─────────────────────────────────────────────────────
/// Structural repairs
/// ─────────────────────────────────────────────────────

fn add_version_marker(text: &str) -> Option<Patch> {
    if text.trim().is_empty() || rules::find_marker(text).is_some() {
        return None;
    }
    let marker = DEFAULT_VERSION.marker();
    Some(Patch {
        text: format!("{marker}\n{text}"),
        changes: vec![format!("Added missing version marker {marker}")],
    })
}

fn close_strings(text: &str) -> Option<Patch> {
    let (fixed, changed) = rewrite_lines(text, |line| {
        let quote = line.open_string?;
        let trailing_backslashes = line.text.chars().rev().take_while(|&c| c == '\\').count();
        let mut out = line.text.to_string();
        if trailing_backslashes % 2 == 1 {
            out.push('\\');
        }
        out.push(quote);
        Some(out)
    });
    if changed.is_empty() {
        return None;
    }
    let changes = changed
        .into_iter()
        .map(|n| format!("Closed unterminated string on line {n}"))
        .collect();
    Some(Patch { text: fixed, changes })
}

fn close_brackets(text: &str) -> Option<Patch> {
    let report = bracket_report(text);
    if report.open.is_empty() {
        return None;
    }

    let body = text.trim_end();
    let tail = &text[body.len()..];
    let closers = report.missing_closers();
    let patched = match final_state(body) {
        LexState::Normal => format!("{body}{closers}{tail}"),
        LexState::BlockComment => return None,
        // ends in a line comment: closers go on their own line
        _ => format!("{body}\n{closers}{tail}"),
    };

    Some(Patch {
        text: patched,
        changes: vec![format!(
            "Appended missing closing bracket(s) '{closers}' for {} unclosed opener(s)",
            report.open.len()
        )],
    })
}

/// ─────────────────────────────────────────────────────
/// Missing commas
/// ─────────────────────────────────────────────────────

static CALL_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Za-z_][\w.]*)\s*\(").expect("valid regex"));

/// Leading words of typed parameters (`f(float x) =>`), never arguments.
const TYPE_WORDS: &[&str] = &[
    "int", "float", "bool", "string", "color", "series", "simple", "const", "label", "line",
    "box", "table",
];

/// Narrow, high-confidence pass: only bare `input(...)` calls.
fn insert_input_commas(text: &str) -> Option<Patch> {
    insert_commas(text, |name| name == "input")
}

/// Same shape for every other call.
fn insert_call_commas(text: &str) -> Option<Patch> {
    insert_commas(text, |name| name != "input")
}

fn insert_commas(text: &str, accept: impl Fn(&str) -> bool) -> Option<Patch> {
    let mut changes = Vec::new();
    let (fixed, _) = rewrite_lines(text, |line| {
        let mut out = line.text.to_string();
        let mut touched = Vec::new();
        // right to left so earlier offsets stay valid
        let calls: Vec<_> = CALL_OPEN.captures_iter(&line.masked).collect();
        for caps in calls.iter().rev() {
            let (Some(name), Some(whole)) = (caps.get(1), caps.get(0)) else {
                continue;
            };
            if rules::is_keyword(name.as_str()) || !accept(name.as_str()) {
                continue;
            }
            let open = whole.end() - 1;
            let Some((close, replacement)) = comma_separated(line, open) else {
                continue;
            };
            out.replace_range(open + 1..close, &replacement);
            touched.push(name.as_str().to_string());
        }
        if touched.is_empty() {
            return None;
        }
        for name in touched.iter().rev() {
            changes.push(format!("Inserted missing comma in {name}() call on line {}", line.number));
        }
        Some(out)
    });
    if changes.is_empty() {
        return None;
    }
    Some(Patch { text: fixed, changes })
}

/// Index of the closing `)` and the new argument text for the call whose
/// `(` sits at `open`, when its arguments are exactly two bare tokens
/// separated only by whitespace.
fn comma_separated(line: &ScannedLine<'_>, open: usize) -> Option<(usize, String)> {
    let close = matching_close(&line.masked, open)?;
    if line.masked[close + 1..].trim_start().starts_with("=>") {
        return None;
    }
    let masked_args = &line.masked[open + 1..close];
    if masked_args.contains(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.' || c.is_whitespace())) {
        return None;
    }

    let raw = &line.text[open + 1..close];
    let tokens = bare_tokens(raw)?;
    let [first, second] = tokens.as_slice() else {
        return None;
    };
    if [*first, *second]
        .iter()
        .any(|t| rules::is_keyword(t) || TYPE_WORDS.contains(t))
    {
        return None;
    }

    let lead = &raw[..raw.len() - raw.trim_start().len()];
    let trail = &raw[raw.trim_end().len()..];
    Some((close, format!("{lead}{first}, {second}{trail}")))
}

/// Split `raw` into whitespace-separated numbers, (dotted) identifiers and
/// string literals; `None` if anything else shows up.
fn bare_tokens(raw: &str) -> Option<Vec<&str>> {
    let mut tokens = Vec::new();
    let mut chars = raw.char_indices().peekable();
    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let end = if c == '"' || c == '\'' {
            chars.next();
            let mut end = None;
            while let Some((i, ch)) = chars.next() {
                if ch == '\\' {
                    chars.next();
                } else if ch == c {
                    end = Some(i + 1);
                    break;
                }
            }
            end?
        } else if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
            let mut end = start;
            while let Some(&(i, ch)) = chars.peek() {
                if ch.is_ascii_alphanumeric() || ch == '_' || ch == '.' {
                    end = i + ch.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            end
        } else {
            return None;
        };
        // tokens must be separated by whitespace
        if chars.peek().is_some_and(|&(_, ch)| !ch.is_whitespace()) {
            return None;
        }
        tokens.push(&raw[start..end]);
    }
    Some(tokens)
}

/// ─────────────────────────────────────────────────────
/// Version repairs (v5 and later)
/// ─────────────────────────────────────────────────────

fn rewrite_study(text: &str) -> Option<Patch> {
    if effective_version(text) < Version::V5 {
        return None;
    }
    let (from, to) = DEPRECATED_DECLARATION;
    let (fixed, changed) = rewrite_lines(text, |line| rules::rename_calls(line, from, to));
    if changed.is_empty() {
        return None;
    }
    let changes = changed
        .into_iter()
        .map(|n| format!("Replaced deprecated {from}() with {to}() on line {n}"))
        .collect();
    Some(Patch { text: fixed, changes })
}

fn namespace_builtins(text: &str) -> Option<Patch> {
    if effective_version(text) < Version::V5 {
        return None;
    }
    let mut current = text.to_string();
    let mut changes = Vec::new();
    for (old, new) in DEPRECATED_BUILTINS {
        let (fixed, changed) = rewrite_lines(&current, |line| rules::rename_calls(line, old, new));
        if changed.is_empty() {
            continue;
        }
        let lines: Vec<String> = changed.iter().map(|n| n.to_string()).collect();
        changes.push(format!(
            "Replaced deprecated {old}() with {new}() on line(s) {}",
            lines.join(", ")
        ));
        current = fixed;
    }
    if changes.is_empty() {
        return None;
    }
    Some(Patch {
        text: current,
        changes,
    })
}

fn split_export_declarations(text: &str) -> Option<Patch> {
    if effective_version(text) < Version::V5 {
        return None;
    }
    let mut changes = Vec::new();
    let (fixed, _) = rewrite_lines(text, |line| {
        let caps = EXPORT_DECL.captures(&line.masked)?;
        let indent = &line.text[..caps.get(1)?.end()];
        let name = caps.get(3)?;
        let declaration = format!("{indent}var {}", &line.text[name.start()..]);
        let export = format!("{indent}export {}", name.as_str());
        changes.push(format!(
            "Split `export {} {}` into a declaration and an export statement on line {}",
            &caps[2],
            name.as_str(),
            line.number
        ));
        let newline = if line.crlf { "\r\n" } else { "\n" };
        Some(format!("{declaration}{newline}{export}"))
    });
    if changes.is_empty() {
        return None;
    }
    Some(Patch { text: fixed, changes })
}
