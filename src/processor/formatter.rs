//! Canonical re-rendering of a script.
//!
//! The pipeline is a list of whitespace-only stages, each re-scanning the
//! text it is given:
//!
//!   normalize → version marker → braces → indentation → spacing
//!             → blank lines → comment alignment → line-length report
//!
//! None of the stages look inside string literals or comments, and every
//! stage is a fixed point on its own output, which is what makes
//! `format(format(s)) == format(s)` hold.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::rules;
use super::scanner::{Classified, LexState, ScannedLine, Scanner, closer_for, opener_for, scan_lines};
use crate::config::FormatOptions;
use crate::model::{DEFAULT_VERSION, Diagnostic, DiagnosticKind, FormatResult, Script, Version};

pub fn format(script: &Script, options: &FormatOptions) -> FormatResult {
    let mut changes = Vec::new();

    let mut text = normalize(script.as_str());
    if text != script.as_str() {
        changes.push("Normalized line endings and trailing whitespace".to_string());
    }
    if text.is_empty() {
        return FormatResult {
            formatted: Script::new(text),
            changes,
            warnings: Vec::new(),
        };
    }

    if options.sync_version_comment {
        if let Some((synced, change)) = sync_version(&text) {
            text = synced;
            changes.push(change);
        }
    }

    let (braced, moved) = place_braces(&text, options.brace_on_new_line);
    if moved > 0 {
        text = braced;
        changes.push(format!("Moved {moved} opening brace(s)"));
    }

    let (indented, reindented) = reindent(&text, options);
    if reindented > 0 {
        text = indented;
        changes.push(format!("Re-indented {reindented} line(s)"));
    }

    if options.operator_spacing || options.comma_spacing {
        let (spaced, respaced) = respace(&text, options);
        if respaced > 0 {
            text = spaced;
            changes.push(format!("Normalized spacing on {respaced} line(s)"));
        }
    }

    if options.collapse_blank_lines {
        let (collapsed, removed) = collapse_blank_lines(&text);
        if removed > 0 {
            text = collapsed;
            changes.push(format!("Collapsed {removed} redundant blank line(s)"));
        }
    }

    if options.align_comments {
        let (aligned, moved) = align_comments(&text, options.indent_size.max(1));
        if moved > 0 {
            text = aligned;
            changes.push(format!("Aligned {moved} comment line(s)"));
        }
    }

    let warnings = long_lines(&text, options.max_line_length);
    debug!(changes = changes.len(), warnings = warnings.len(), "format done");

    FormatResult {
        formatted: Script::new(text),
        changes,
        warnings,
    }
}

/// LF endings, no trailing whitespace, exactly one final newline.
fn normalize(text: &str) -> String {
    let lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    let used = lines.iter().rposition(|l| !l.is_empty()).map_or(0, |i| i + 1);
    assemble(lines[..used].iter().copied())
}

fn assemble<S: AsRef<str>>(lines: impl IntoIterator<Item = S>) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(line.as_ref());
        out.push('\n');
    }
    out
}

fn leading_ws(text: &str) -> &str {
    &text[..text.len() - text.trim_start().len()]
}

/// ─────────────────────────────────────────────────────
/// Version marker and braces
/// ─────────────────────────────────────────────────────

fn sync_version(text: &str) -> Option<(String, String)> {
    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
    match rules::find_marker(text) {
        None => {
            let marker = DEFAULT_VERSION.marker();
            lines.insert(0, marker.clone());
            Some((assemble(lines), format!("Inserted version marker {marker}")))
        }
        Some((idx, number)) => {
            let marker = Version::from_number(number)?.marker();
            if lines[idx] == marker {
                return None;
            }
            lines[idx] = marker.clone();
            Some((assemble(lines), format!("Rewrote version marker as {marker}")))
        }
    }
}

fn place_braces(text: &str, on_new_line: bool) -> (String, usize) {
    let mut out: Vec<String> = Vec::new();
    // whether the last emitted line may take a `{` appended to it
    let mut joinable = false;
    let mut moved = 0;

    for line in scan_lines(text) {
        let code_line = !line.starts_in_block_comment && line.has_code();
        let code_end = line.masked.trim_end().len();
        let brace_only = code_line && line.code() == "{";

        if on_new_line && code_line && !brace_only && line.masked[..code_end].ends_with('{') {
            let before = line.text[..code_end - 1].trim_end();
            out.push(before.to_string());
            out.push(format!("{}{}", leading_ws(line.text), &line.text[code_end - 1..]));
            joinable = false;
            moved += 1;
            continue;
        }

        if !on_new_line && brace_only && joinable {
            if let Some(prev) = out.last_mut() {
                prev.push(' ');
                prev.push_str(line.text.trim_start());
                moved += 1;
                joinable = false;
                continue;
            }
        }

        joinable = code_line && line.comment_start.is_none() && !line.ends_in_block_comment;
        out.push(line.text.to_string());
    }

    (assemble(out), moved)
}

/// ─────────────────────────────────────────────────────
/// Indentation
/// ─────────────────────────────────────────────────────

static BLOCK_KEYWORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:if|else|for|while|switch|type)\b").expect("valid regex"));

static BLOCK_EXPRESSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^=!<>])(?::=|=)\s*(?:if|switch|for|while)\b").expect("valid regex"));

/// An indentation anchor: original width of a line and the level it was
/// emitted at.
#[derive(Debug, Clone, Copy, Default)]
struct Frame {
    width: usize,
    level: usize,
}

/// Whether the code of a statement's first line opens an indented block.
fn opens_block(code: &str) -> bool {
    BLOCK_KEYWORD.is_match(code) || BLOCK_EXPRESSION.is_match(code)
}

/// Whether the next line continues this one.
///
/// `code` is the raw code of a line and `masked` its masked form. A trailing
/// `>` is an operator unless it closes a generic argument list, which reads
/// the same whether or not spacing has run.
fn ends_with_operator(code: &str, masked: &str) -> bool {
    if code.ends_with("=>") {
        return false;
    }
    let trimmed = code.trim_end();
    for word in ["and", "or", "not"] {
        if let Some(head) = trimmed.strip_suffix(word) {
            if !head.ends_with(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
                return true;
            }
        }
    }
    match trimmed.chars().next_back() {
        Some('>') => !generic_args(&masked[..trimmed.len()])
            .iter()
            .any(|&(_, end)| end == trimmed.len()),
        Some(c) => "+-*/%,?:=<".contains(c),
        None => false,
    }
}

/// Rebuild leading whitespace from block structure.
///
/// Blocks are opened by keyword lines and by lines ending in `=>`, and closed
/// by dedenting to the opener's original width or less. Bracket depth and
/// operator continuations add levels on top. Comment-only lines and block
/// comment interiors are left alone.
fn reindent(text: &str, options: &FormatOptions) -> (String, usize) {
    let unit = options.indent_unit();
    let tab_width = options.indent_size.max(1);

    let mut stack: Vec<Frame> = Vec::new();
    let mut anchor = Frame::default();
    let mut anchor_opens = false;
    let mut statement_level = 0;
    let mut depth = 0usize;
    let mut continuation = false;

    let mut lines: Vec<String> = Vec::new();
    let mut changed = 0;
    for line in scan_lines(text) {
        if line.is_blank() || line.starts_in_block_comment || !line.has_code() {
            lines.push(line.text.to_string());
            continue;
        }

        let code = line.code();
        let width = line.indent_width(tab_width);
        let level = if depth > 0 {
            let closes_first = code.starts_with(|c: char| opener_for(c).is_some());
            (anchor.level + depth).saturating_sub(usize::from(closes_first))
        } else if continuation {
            let level = statement_level + 1;
            anchor = Frame { width, level };
            anchor_opens = opens_block(code);
            level
        } else {
            let mut sibling = None;
            while let Some(&top) = stack.last() {
                if top.width < width {
                    break;
                }
                sibling = Some(top);
                stack.pop();
            }
            let level = match sibling {
                Some(frame) if frame.width == width => frame.level,
                _ => stack.last().map_or(0, |top| top.level + 1),
            };
            statement_level = level;
            anchor = Frame { width, level };
            anchor_opens = opens_block(code);
            level
        };

        // endings are read on the raw text: a trailing string is an operand
        let code_text = line.text[..line.comment_start.unwrap_or(line.text.len())].trim_end();
        depth = bracket_depth_after(depth, &line);
        if depth == 0 && (anchor_opens || code_text.ends_with("=>")) {
            stack.push(anchor);
            anchor_opens = false;
        }
        continuation = depth == 0 && ends_with_operator(code_text, &line.masked[..code_text.len()]);

        let rendered = format!("{}{}", unit.repeat(level), line.text.trim_start());
        if rendered != line.text {
            changed += 1;
        }
        lines.push(rendered);
    }

    (assemble(lines), changed)
}

fn bracket_depth_after(depth: usize, line: &ScannedLine<'_>) -> usize {
    line.masked.chars().fold(depth, |depth, ch| {
        if closer_for(ch).is_some() {
            depth + 1
        } else if opener_for(ch).is_some() {
            depth.saturating_sub(1)
        } else {
            depth
        }
    })
}

/// ─────────────────────────────────────────────────────
/// Spacing
/// ─────────────────────────────────────────────────────

/// Longest first.
const OPERATORS: &[&str] = &[
    "=>", ":=", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "=", "<", ">", "+", "-", "*",
    "/", "%", "?", ":",
];

/// Where a generic argument list may start: `array<`, `map<`, `.new<`.
static GENERIC_HEAD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\b(?:array|matrix|map)|\.new)<").expect("valid regex"));

/// Byte spans of generic argument lists in masked code, kept verbatim by
/// the spacing stage: `<float>`, `<string, int>`, `<string, array<int>>`.
fn generic_args(masked: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut from = 0;
    while let Some(head) = GENERIC_HEAD.find_at(masked, from) {
        let open = head.end() - 1;
        match angle_list_len(&masked[open..]) {
            Some(len) => {
                spans.push((open, open + len));
                from = open + len;
            }
            None => from = head.end(),
        }
    }
    spans
}

/// Length of the balanced `<...>` type list at the start of `text`.
fn angle_list_len(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    // after `<` or `,` a type name must follow
    let mut want_name = false;
    for (i, c) in text.char_indices() {
        match c {
            '<' => {
                if depth > 0 && want_name {
                    return None;
                }
                depth += 1;
                want_name = true;
            }
            '>' => {
                if want_name {
                    return None;
                }
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            ',' => {
                if want_name {
                    return None;
                }
                want_name = true;
            }
            c if c == ' ' || c == '\t' => {}
            c if c.is_ascii_alphabetic() || c == '_' => want_name = false,
            c if (c.is_ascii_digit() || c == '.') && !want_name => {}
            _ => return None,
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Word(&'a str),
    /// String literal, inline block comment or generic argument list.
    Opaque(&'a str),
    Op(&'a str),
    Comma,
    Open(char),
    Close(char),
    Other(&'a str),
}

impl<'a> Token<'a> {
    fn text(&self) -> &'a str {
        match *self {
            Token::Word(s) | Token::Opaque(s) | Token::Op(s) | Token::Other(s) => s,
            Token::Comma => ",",
            Token::Open(c) | Token::Close(c) => bracket_str(c),
        }
    }
}

fn bracket_str(c: char) -> &'static str {
    match c {
        '(' => "(",
        ')' => ")",
        '[' => "[",
        ']' => "]",
        '{' => "{",
        _ => "}",
    }
}

/// A line body split into tokens (each flagged with whether whitespace
/// preceded it) and an optional trailing `//` comment with its gap.
#[derive(Debug, Default)]
struct Lexed<'a> {
    tokens: Vec<(Token<'a>, bool)>,
    comment: Option<(&'a str, &'a str)>,
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '#'
}

fn lex(body: &str) -> Lexed<'_> {
    let chars: Vec<Classified> = Scanner::new(body).collect();
    let masked: String = chars
        .iter()
        .map(|c| if c.state == LexState::Normal { c.ch.to_string() } else { " ".repeat(c.ch.len_utf8()) })
        .collect();
    let generics = generic_args(&masked);

    let mut lexed = Lexed::default();
    let mut space = false;
    let mut ws_start = None;
    let mut i = 0;

    // first char at or after byte offset `end`
    let skip_to = |end: usize| chars.iter().position(|c| c.index >= end).unwrap_or(chars.len());

    while i < chars.len() {
        let c = chars[i];
        let start = c.index;

        if c.state == LexState::LineComment {
            let gap = &body[ws_start.unwrap_or(start)..start];
            lexed.comment = Some((gap, &body[start..]));
            break;
        }

        if c.state != LexState::Normal {
            let mut j = i;
            while j < chars.len() && chars[j].state == c.state {
                j += 1;
            }
            let end = chars.get(j).map_or(body.len(), |n| n.index);
            lexed.tokens.push((Token::Opaque(&body[start..end]), space));
            (space, ws_start, i) = (false, None, j);
            continue;
        }

        if c.ch.is_whitespace() {
            if !space {
                ws_start = Some(start);
            }
            space = true;
            i += 1;
            continue;
        }

        if let Some(&(_, end)) = generics.iter().find(|&&(s, _)| s == start) {
            lexed.tokens.push((Token::Opaque(&body[start..end]), space));
            (space, ws_start, i) = (false, None, skip_to(end));
            continue;
        }

        let rest = &body[start..];
        let (token, end) = if is_word_char(c.ch) {
            let end = word_end(body, start);
            (Token::Word(&body[start..end]), end)
        } else if let Some(op) = OPERATORS.iter().copied().find(|op| rest.starts_with(op)) {
            (Token::Op(op), start + op.len())
        } else if c.ch == ',' {
            (Token::Comma, start + 1)
        } else if closer_for(c.ch).is_some() {
            (Token::Open(c.ch), start + 1)
        } else if opener_for(c.ch).is_some() {
            (Token::Close(c.ch), start + 1)
        } else {
            let end = start + c.ch.len_utf8();
            (Token::Other(&body[start..end]), end)
        };
        lexed.tokens.push((token, space));
        (space, ws_start, i) = (false, None, skip_to(end));
    }

    lexed
}

/// End of the word starting at `start`, folding exponents (`1e-5`) in.
fn word_end(body: &str, start: usize) -> usize {
    let bytes = body.as_bytes();
    let numeric = bytes[start].is_ascii_digit()
        || (bytes[start] == b'.' && bytes.get(start + 1).is_some_and(u8::is_ascii_digit));
    let mut end = start;
    while end < bytes.len() {
        let b = bytes[end];
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || b == b'#' {
            end += 1;
        } else if numeric
            && (b == b'+' || b == b'-')
            && matches!(bytes[end - 1], b'e' | b'E')
            && bytes.get(end + 1).is_some_and(u8::is_ascii_digit)
        {
            end += 1;
        } else {
            break;
        }
    }
    end
}

fn is_unary(op: &str, prev: Option<Token<'_>>) -> bool {
    if op != "-" && op != "+" {
        return false;
    }
    match prev {
        None | Some(Token::Op(_) | Token::Comma | Token::Open(_)) => true,
        Some(Token::Word(w)) => rules::is_keyword(w),
        _ => false,
    }
}

fn render(lexed: &Lexed<'_>, options: &FormatOptions) -> String {
    let mut out = String::new();
    let mut force_space = false;
    let mut glue = false;
    let mut prev = None;

    for (k, &(token, space)) in lexed.tokens.iter().enumerate() {
        let next = lexed.tokens.get(k + 1).map(|&(t, _)| t);
        match token {
            Token::Op(op) if options.operator_spacing && is_unary(op, prev) => {
                separate(&mut out, space, force_space, glue);
                out.push_str(op);
                (force_space, glue) = (false, true);
            }
            Token::Op(op) if options.operator_spacing => {
                trim_spaces(&mut out);
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(op);
                (force_space, glue) = (true, false);
            }
            Token::Comma if options.comma_spacing => {
                trim_spaces(&mut out);
                out.push(',');
                force_space = !matches!(next, Some(Token::Close(_)));
                glue = false;
            }
            _ => {
                separate(&mut out, space, force_space, glue);
                out.push_str(token.text());
                (force_space, glue) = (false, false);
            }
        }
        prev = Some(token);
    }

    if let Some((gap, comment)) = lexed.comment {
        if !out.is_empty() {
            out.push_str(gap);
        }
        out.push_str(comment);
    }
    out
}

fn separate(out: &mut String, space: bool, force: bool, glue: bool) {
    if glue || out.is_empty() {
        return;
    }
    if force || space {
        out.push(' ');
    }
}

fn trim_spaces(out: &mut String) {
    while out.ends_with(' ') {
        out.pop();
    }
}

fn respace(text: &str, options: &FormatOptions) -> (String, usize) {
    let mut changed = 0;
    let lines: Vec<String> = scan_lines(text)
        .iter()
        .map(|line| {
            if line.starts_in_block_comment || !line.has_code() || rules::IMPORT.is_match(&line.masked) {
                return line.text.to_string();
            }
            let indent = leading_ws(line.text);
            let rendered = format!("{indent}{}", render(&lex(&line.text[indent.len()..]), options));
            if rendered != line.text {
                changed += 1;
            }
            rendered
        })
        .collect();
    (assemble(lines), changed)
}

/// ─────────────────────────────────────────────────────
/// Blank lines, comments, length
/// ─────────────────────────────────────────────────────

fn collapse_blank_lines(text: &str) -> (String, usize) {
    let mut removed = 0;
    let mut kept: Vec<&str> = Vec::new();
    let mut previous_blank = false;
    for line in scan_lines(text) {
        let blank = line.is_blank() && !line.starts_in_block_comment;
        let redundant = blank && previous_blank;
        previous_blank = blank;
        if redundant {
            removed += 1;
            continue;
        }
        kept.push(line.text);
    }
    (assemble(kept), removed)
}

fn is_line_comment(line: &ScannedLine<'_>) -> bool {
    !line.starts_in_block_comment && line.is_comment_only() && line.text.trim_start().starts_with("//")
}

/// Re-indent each run of consecutive comment lines to the shallowest
/// indentation found in the run.
fn align_comments(text: &str, tab_width: usize) -> (String, usize) {
    let lines = scan_lines(text);
    let mut out: Vec<String> = lines.iter().map(|l| l.text.to_string()).collect();
    let mut moved = 0;

    let mut i = 0;
    while i < lines.len() {
        if !is_line_comment(&lines[i]) {
            i += 1;
            continue;
        }
        let start = i;
        while i < lines.len() && is_line_comment(&lines[i]) {
            i += 1;
        }
        let run = &lines[start..i];
        let Some(shallowest) = run.iter().min_by_key(|l| l.indent_width(tab_width)) else {
            continue;
        };
        let indent = leading_ws(shallowest.text);
        for (offset, line) in run.iter().enumerate() {
            let aligned = format!("{indent}{}", line.text.trim_start());
            if aligned != line.text {
                moved += 1;
                out[start + offset] = aligned;
            }
        }
    }

    (assemble(out), moved)
}

fn long_lines(text: &str, max: usize) -> Vec<Diagnostic> {
    text.lines()
        .enumerate()
        .filter_map(|(i, line)| {
            let len = line.chars().count();
            (len > max).then(|| {
                Diagnostic::warning(
                    DiagnosticKind::Style,
                    format!("line is {len} characters long (limit {max})"),
                )
                .at(i + 1)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fmt(src: &str) -> String {
        format(&Script::new(src), &FormatOptions::default()).formatted.into_string()
    }

    fn fmt_with(src: &str, options: &FormatOptions) -> String {
        format(&Script::new(src), options).formatted.into_string()
    }

    #[test]
    fn test_normalization() {
        let test_cases = vec![
            ("", ""),
            ("  \n\t\n", ""),
            ("//@version=5\r\nx = 1   \r\n\r\n", "//@version=5\nx = 1\n"),
            ("//@version=5\nx = 1", "//@version=5\nx = 1\n"),
        ];
        for (src, expected) in test_cases {
            assert_eq!(fmt(src), expected, "source {src:?}");
        }
    }

    #[test]
    fn test_version_marker_sync() {
        assert_eq!(fmt("x = 1"), "//@version=5\nx = 1\n");
        assert_eq!(fmt("// @version = 6\nx = 1"), "//@version=6\nx = 1\n");
        assert_eq!(fmt("//@version=3\nx = 1"), "//@version=3\nx = 1\n");

        let options = FormatOptions {
            sync_version_comment: false,
            ..FormatOptions::default()
        };
        assert_eq!(fmt_with("x = 1", &options), "x = 1\n");
    }

    #[test]
    fn test_indentation() {
        let src = "//@version=5
indicator(\"t\")
f(x) =>
  y = x * 2
  y
if close > open
      plot(close)
else
 plot(open)
x = math.max(1,
2)
y = a +
b
z = f(
a,
)
";
        let expected = "//@version=5
indicator(\"t\")
f(x) =>
    y = x * 2
    y
if close > open
    plot(close)
else
    plot(open)
x = math.max(1,
    2)
y = a +
    b
z = f(
    a,
)
";
        assert_eq!(fmt(src), expected);
    }

    #[test]
    fn test_nested_blocks_and_expression_blocks() {
        let src = "//@version=5
for i = 0 to 10
  if i > 5
    x := i
  else if i > 2
    x := 2
label = switch
  x > 1 => \"big\"
  => \"small\"
plot(x)
";
        let expected = "//@version=5
for i = 0 to 10
    if i > 5
        x := i
    else if i > 2
        x := 2
label = switch
    x > 1 => \"big\"
    => \"small\"
plot(x)
";
        assert_eq!(fmt(src), expected);
    }

    #[test]
    fn test_tabs() {
        let options = FormatOptions {
            use_tabs: true,
            ..FormatOptions::default()
        };
        assert_eq!(
            fmt_with("//@version=5\nif c\n  x := 1\n", &options),
            "//@version=5\nif c\n\tx := 1\n"
        );
    }

    #[test]
    fn test_spacing() {
        let test_cases = vec![
            ("x=a+b", "x = a + b"),
            ("plot(close,open)", "plot(close, open)"),
            ("plot(close ,  open)", "plot(close, open)"),
            ("x = -1", "x = -1"),
            ("y=a*-b", "y = a * -b"),
            ("s = \"a+b,c\"", "s = \"a+b,c\""),
            ("z = 1e-5", "z = 1e-5"),
            ("var array<float> a = array.new<float>(0)", "var array<float> a = array.new<float>(0)"),
            ("m = map.new<string, int>()", "m = map.new<string, int>()"),
            ("var map<string, array<int>> m = na", "var map<string, array<int>> m = na"),
            ("m = map.new<string, array<float>>()", "m = map.new<string, array<float>>()"),
            ("b = map<c", "b = map < c"),
            ("x := a>=b ? 1:-1", "x := a >= b ? 1 : -1"),
            ("f(x)=>x*2", "f(x) => x * 2"),
            ("x = a  // c+d", "x = a  // c+d"),
            ("import TradingView/ta/7 as tvta", "import TradingView/ta/7 as tvta"),
            ("x = close[1]-open", "x = close[1] - open"),
            ("x = f(-1, +2)", "x = f(-1, +2)"),
            ("c = a /* keep  it */+b", "c = a /* keep  it */ + b"),
        ];
        for (src, expected) in test_cases {
            let out = fmt(&format!("//@version=5\n{src}\n"));
            assert_eq!(out, format!("//@version=5\n{expected}\n"), "source {src:?}");
        }
    }

    #[test]
    fn test_spacing_switches() {
        let options = FormatOptions {
            operator_spacing: false,
            ..FormatOptions::default()
        };
        assert_eq!(fmt_with("//@version=5\nx=a+b,c\n", &options), "//@version=5\nx=a+b, c\n");

        let options = FormatOptions {
            comma_spacing: false,
            ..FormatOptions::default()
        };
        assert_eq!(fmt_with("//@version=5\nf(a,b)\n", &options), "//@version=5\nf(a,b)\n");
    }

    #[test]
    fn test_blank_lines_and_comments() {
        let src = "//@version=5\nx = 1\n\n\n\ny = 2\nif c\n        // one\n    // two\n    z := 1\n";
        let expected = "//@version=5\nx = 1\n\ny = 2\nif c\n    // one\n    // two\n    z := 1\n";
        assert_eq!(fmt(src), expected);

        let options = FormatOptions {
            collapse_blank_lines: false,
            ..FormatOptions::default()
        };
        assert_eq!(fmt_with("//@version=5\na\n\n\nb\n", &options), "//@version=5\na\n\n\nb\n");
    }

    #[test]
    fn test_block_comments_are_untouched() {
        let src = "//@version=5\n/* a=b\n      c+d\n\n\n*/\nx=1\n";
        let expected = "//@version=5\n/* a=b\n      c+d\n\n\n*/\nx = 1\n";
        assert_eq!(fmt(src), expected);
    }

    #[test]
    fn test_brace_placement() {
        let join = FormatOptions::default();
        assert_eq!(fmt_with("//@version=5\nm = f(\n{\n})\n", &join), "//@version=5\nm = f( {\n    })\n");

        let split = FormatOptions {
            brace_on_new_line: true,
            ..FormatOptions::default()
        };
        assert_eq!(fmt_with("//@version=5\nm = f( {\n})\n", &split), "//@version=5\nm = f(\n    {\n    })\n");
    }

    #[test]
    fn test_long_lines_warn() {
        let long = format!("//@version=5\nx = \"{}\"\n", "a".repeat(130));
        let result = format(&Script::new(long), &FormatOptions::default());
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].line, Some(2));
        assert_eq!(result.warnings[0].kind, DiagnosticKind::Style);
    }

    #[test]
    fn test_change_log() {
        let result = format(&Script::new("x=1\n\n\ny=2"), &FormatOptions::default());
        assert_eq!(
            result.changes,
            vec![
                "Normalized line endings and trailing whitespace".to_string(),
                "Inserted version marker //@version=5".to_string(),
                "Normalized spacing on 2 line(s)".to_string(),
                "Collapsed 1 redundant blank line(s)".to_string(),
            ]
        );
        let again = format(&result.formatted, &FormatOptions::default());
        assert!(again.changes.is_empty(), "{:?}", again.changes);
    }

    #[test]
    fn test_operator_continuations() {
        let test_cases = vec![
            ("cond = close>\nopen", "cond = close >\n    open"),
            ("cond = close >\nopen", "cond = close >\n    open"),
            ("ok = a and\nb", "ok = a and\n    b"),
            ("var array<float>\nx = 1", "var array<float>\nx = 1"),
            ("var map<string, array<int>>\nx = 1", "var map<string, array<int>>\nx = 1"),
            ("f(x) =>\nx", "f(x) =>\n    x"),
        ];
        for (src, expected) in test_cases {
            let once = fmt(&format!("//@version=5\n{src}\n"));
            assert_eq!(once, format!("//@version=5\n{expected}\n"), "source {src:?}");
            assert_eq!(fmt(&once), once, "source {src:?}");
        }
    }

    #[test]
    fn test_idempotent() {
        let test_cases = vec![
            "indicator(\"x\")\nf(a, b)=>\n   a+b\nplot(f(1,2))",
            "x =\n  if c\n       1\n  else\n       2\n",
            "  // lead\nif a and\n b\n  c := 1\n// tail\n      // tail2",
            "x = f(a,\n        g(b,\n   c))\ny = [1,\n2]\n",
            "/* open\n  comment */ x=1\n{\n}\n",
            "s = \"unterminated\nt = 'x'+'y'\n",
            "cond = close>\nopen\nz = a-\n  b\n",
        ];
        for options in [
            FormatOptions::default(),
            FormatOptions {
                use_tabs: true,
                brace_on_new_line: true,
                ..FormatOptions::default()
            },
            FormatOptions {
                indent_size: 2,
                operator_spacing: false,
                align_comments: false,
                ..FormatOptions::default()
            },
        ] {
            for src in &test_cases {
                let once = fmt_with(src, &options);
                let twice = fmt_with(&once, &options);
                assert_eq!(twice, once, "source {src:?} with {options:?}");
            }
        }
    }
}
