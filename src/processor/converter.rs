//! Surface rewrites between language versions.
//!
//! Each adjacent pair of versions has a step in each direction; a wider jump
//! runs the steps in sequence. The marker is rewritten last. Nothing here
//! checks that the result behaves like the input.

use std::borrow::Cow;

use tracing::debug;

use super::rules::{
    self, CONST_DECL, DEFAULT_IMPORT, DEPRECATED_BUILTINS, DEPRECATED_DECLARATION, IMPORT,
    METHOD_FUNCTION, MUTABLE_DECL,
};
use super::scanner::{ScannedLine, is_ident_char, join_lines, rewrite_lines, scan_lines};
use crate::model::{Script, Version};

/// Calls renamed by the v4 → v5 step. The v5 → v4 step applies them backwards.
fn call_renames() -> impl Iterator<Item = (&'static str, &'static str)> {
    std::iter::once(DEPRECATED_DECLARATION).chain(DEPRECATED_BUILTINS.iter().copied())
}

pub fn convert(script: &Script, target: Version) -> Script {
    let mut current = script.version();
    if current == target {
        return script.clone();
    }

    let mut text = script.as_str().to_string();
    while let Some(next) = current.step_towards(target) {
        text = match (current, next) {
            (Version::V4, Version::V5) => upgrade_to_v5(&text),
            (Version::V5, Version::V6) => upgrade_to_v6(&text),
            (Version::V6, Version::V5) => downgrade_to_v5(&text),
            (Version::V5, Version::V4) => downgrade_to_v4(&text),
            _ => text,
        };
        debug!(from = %current, to = %next, "conversion step applied");
        current = next;
    }

    Script::new(set_marker(&text, target))
}

fn set_marker(text: &str, version: Version) -> String {
    let marker = version.marker();
    match rules::find_marker(text) {
        Some((idx, _)) => rewrite_lines(text, |line| (line.number == idx + 1).then(|| marker.clone())).0,
        None => format!("{marker}\n{text}"),
    }
}

fn rename_all(text: &str, renames: impl Iterator<Item = (&'static str, &'static str)>) -> String {
    renames.fold(text.to_string(), |current, (from, to)| {
        rewrite_lines(&current, |line| rules::rename_calls(line, from, to)).0
    })
}

/// ─────────────────────────────────────────────────────
/// v4 ↔ v5
/// ─────────────────────────────────────────────────────

fn upgrade_to_v5(text: &str) -> String {
    rename_all(text, call_renames())
}

fn downgrade_to_v4(text: &str) -> String {
    rename_all(text, call_renames().map(|(old, new)| (new, old)))
}

/// ─────────────────────────────────────────────────────
/// v5 ↔ v6
/// ─────────────────────────────────────────────────────

const REASSIGNMENT_OPS: &[&str] = &[":=", "+=", "-=", "*=", "/=", "%="];

/// Whether `masked` assigns to `name` again.
fn reassigns(masked: &str, name: &str) -> bool {
    let mut from = 0;
    while let Some(rel) = masked[from..].find(name) {
        let start = from + rel;
        let end = start + name.len();
        from = end;

        let before = masked[..start].chars().next_back();
        let after = masked[end..].chars().next();
        if before.is_some_and(|c| is_ident_char(c) || c == '.') || after.is_some_and(is_ident_char) {
            continue;
        }
        let rest = masked[end..].trim_start();
        if REASSIGNMENT_OPS.iter().any(|op| rest.starts_with(op)) {
            return true;
        }
    }
    false
}

fn upgrade_to_v6(text: &str) -> String {
    let lines = scan_lines(text);

    // `var` declarations nobody assigns to afterwards
    let frozen: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter_map(|(i, line)| {
            let caps = MUTABLE_DECL.captures(&line.masked)?;
            let name = caps.get(2)?.as_str();
            let reassigned = lines[i + 1..].iter().any(|later| reassigns(&later.masked, name));
            (!reassigned).then_some(line.number)
        })
        .collect();

    let (mut out, _) = rewrite_lines(text, |line| {
        if frozen.contains(&line.number) {
            let indent = MUTABLE_DECL.captures(&line.masked)?.get(1)?.end();
            return Some(format!("{}const{}", &line.text[..indent], &line.text[indent + "var".len()..]));
        }
        if rules::is_arrow_function(line) {
            let indent = line.text.len() - line.text.trim_start().len();
            return Some(format!("{}method {}", &line.text[..indent], &line.text[indent..]));
        }
        None
    });

    if !lines.iter().any(|l| IMPORT.is_match(&l.masked)) {
        out = insert_import(&out);
    }
    out
}

/// Put the default import right after the version marker, or on top.
fn insert_import(text: &str) -> String {
    let Some((idx, _)) = rules::find_marker(text) else {
        return format!("{DEFAULT_IMPORT}\n{text}");
    };
    rewrite_lines(text, |line| {
        (line.number == idx + 1).then(|| format!("{}\n{DEFAULT_IMPORT}", line.text))
    })
    .0
}

fn downgrade_to_v5(text: &str) -> String {
    let kept: Vec<ScannedLine<'_>> = scan_lines(text)
        .into_iter()
        .filter(|line| line.text.trim() != DEFAULT_IMPORT)
        .collect();
    let stripped = join_lines(
        kept.iter().map(|l| (Cow::Borrowed(l.text), l.crlf)),
        text.ends_with('\n'),
    );

    rewrite_lines(&stripped, |line| {
        if let Some(caps) = CONST_DECL.captures(&line.masked) {
            let indent = caps.get(1)?.end();
            let rest = line.text[indent + "const".len()..].to_string();
            return Some(format!("{}var{rest}", &line.text[..indent]));
        }
        let caps = METHOD_FUNCTION.captures(&line.masked)?;
        let indent = caps.get(1)?.end();
        let name = caps.get(2)?.start();
        Some(format!("{}{}", &line.text[..indent], &line.text[name..]))
    })
    .0
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn run(src: &str, target: Version) -> String {
        convert(&Script::new(src), target).into_string()
    }

    #[test]
    fn test_same_version_is_untouched() {
        let src = "//@version=5\nstudy(\"x\")";
        assert_eq!(run(src, Version::V5), src);
        // no marker means the default version
        assert_eq!(run("plot(close)", Version::V5), "plot(close)");
    }

    #[test]
    fn test_v4_to_v5() {
        let src = "//@version=4\nstudy(\"x\")\ns = security(syminfo.tickerid, \"D\", sma(close, 2))\nlabel = \"study(\" // rsi(close)";
        let expected = "//@version=5\nindicator(\"x\")\ns = request.security(syminfo.tickerid, \"D\", ta.sma(close, 2))\nlabel = \"study(\" // rsi(close)";
        assert_eq!(run(src, Version::V5), expected);
    }

    #[test]
    fn test_v5_to_v4() {
        let src = "//@version=5\nindicator(\"x\")\nx = ta.ema(close, 3) + math.max(1, 2)\ny = request.security(syminfo.tickerid, \"D\", close)";
        let expected = "//@version=4\nstudy(\"x\")\nx = ema(close, 3) + max(1, 2)\ny = security(syminfo.tickerid, \"D\", close)";
        assert_eq!(run(src, Version::V4), expected);
    }

    #[test]
    fn test_v5_to_v6() {
        let src = "//@version=5\nindicator(\"x\")\nvar a = 0\nvar float b = 0\nb += 1\nf(x) => x * 2\n";
        let expected = "//@version=6\nimport TradingView/ta/7 as tvta\nindicator(\"x\")\nconst a = 0\nvar float b = 0\nb += 1\nmethod f(x) => x * 2\n";
        assert_eq!(run(src, Version::V6), expected);
    }

    #[test]
    fn test_existing_import_is_kept() {
        let src = "//@version=5\nimport Me/lib/1 as lib\nindicator(\"x\")";
        let out = run(src, Version::V6);
        assert!(!out.contains(DEFAULT_IMPORT));
        assert!(out.starts_with("//@version=6\nimport Me/lib/1 as lib"));
    }

    #[test]
    fn test_round_trip_v5_v6_v5() {
        let test_cases = vec![
            "//@version=5\nindicator(\"x\")\nvar a = 0\nvar b = 0\nb := b + 1\nf(x) => x * 2\nplot(f(a))\n",
            "//@version=5\nstrategy(\"s\")\nif close > open\n    strategy.entry(\"L\", strategy.long)\n",
        ];
        for src in test_cases {
            let up = run(src, Version::V6);
            let down = run(&up, Version::V5);
            assert_eq!(down, src, "via {up:?}");
        }
    }

    #[test]
    fn test_chained_conversion() {
        let src = "//@version=4\nstudy(\"x\")\nplot(sma(close, 2))";
        let expected = "//@version=6\nimport TradingView/ta/7 as tvta\nindicator(\"x\")\nplot(ta.sma(close, 2))";
        assert_eq!(run(src, Version::V6), expected);
        assert_eq!(run(expected, Version::V4), src);
    }

    #[test]
    fn test_missing_marker_is_added() {
        assert_eq!(run("plot(close)", Version::V4), "//@version=4\nplot(close)");
    }

    #[test]
    fn test_reassigns() {
        let test_cases = vec![
            ("x := 1", true),
            ("x+=1", true),
            ("xx := 1", false),
            ("a.x := 1", false),
            ("y = x == 1", false),
        ];
        for (masked, expected) in test_cases {
            assert_eq!(reassigns(masked, "x"), expected, "source {masked:?}");
        }
    }
}
