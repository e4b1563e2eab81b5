//! Hand-written lexical state scanner.
//!
//! We do *not* tokenize the language. The scanner only tells every other
//! pass whether a character sits in code, in a comment or in a string
//! literal, so bracket, keyword and operator matching can skip the rest.
//
//  States:
//
//      Normal             ::= code
//      LineComment        ::= '//' .* (until, not including, newline)
//      BlockComment       ::= '/*' .*? '*/'   (may span lines)
//      Single/DoubleQuote ::= quote ( '\' any | [^quote \n] )* quote
//
//  Strings never span lines: a newline inside a string is classified with
//  the string's state and resets the scanner to Normal.

use std::iter::Peekable;
use std::str::CharIndices;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexState {
    Normal,
    LineComment,
    BlockComment,
    SingleQuoteString,
    DoubleQuoteString,
}

impl LexState {
    pub fn is_string(self) -> bool {
        matches!(self, LexState::SingleQuoteString | LexState::DoubleQuoteString)
    }

    /// Quote character that closes this state, for string states.
    pub fn quote(self) -> Option<char> {
        match self {
            LexState::SingleQuoteString => Some('\''),
            LexState::DoubleQuoteString => Some('"'),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classified {
    pub index: usize,
    pub ch: char,
    pub state: LexState,
}

#[derive(Clone)]
pub struct Scanner<'a> {
    chars: Peekable<CharIndices<'a>>,
    state: LexState,
    /// Classification owed to the second half of `//`, `/*`, `*/` or an
    /// escape sequence: (state of that char, state after it).
    pending: Option<(LexState, LexState)>,
}

impl<'a> Scanner<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            chars: src.char_indices().peekable(),
            state: LexState::Normal,
            pending: None,
        }
    }

    /// State in effect after the last character handed out.
    pub fn state(&self) -> LexState {
        self.state
    }

    fn next_char(&mut self) -> Option<(usize, char)> {
        self.chars.next()
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Classified;

    fn next(&mut self) -> Option<Self::Item> {
        let (index, ch) = self.next_char()?;

        if let Some((state, after)) = self.pending.take() {
            if ch == '\n' && state.is_string() {
                // `"abc\` at end of line: the escape cannot reach past it
                self.state = LexState::Normal;
            } else {
                self.state = after;
            }
            return Some(Classified { index, ch, state });
        }

        let state = match self.state {
            LexState::Normal => match ch {
                '/' if self.peek_char() == Some('/') => {
                    self.state = LexState::LineComment;
                    self.pending = Some((LexState::LineComment, LexState::LineComment));
                    LexState::LineComment
                }
                '/' if self.peek_char() == Some('*') => {
                    self.state = LexState::BlockComment;
                    self.pending = Some((LexState::BlockComment, LexState::BlockComment));
                    LexState::BlockComment
                }
                '"' => {
                    self.state = LexState::DoubleQuoteString;
                    LexState::DoubleQuoteString
                }
                '\'' => {
                    self.state = LexState::SingleQuoteString;
                    LexState::SingleQuoteString
                }
                _ => LexState::Normal,
            },
            LexState::LineComment => {
                if ch == '\n' {
                    self.state = LexState::Normal;
                    LexState::Normal
                } else {
                    LexState::LineComment
                }
            }
            LexState::BlockComment => {
                if ch == '*' && self.peek_char() == Some('/') {
                    self.pending = Some((LexState::BlockComment, LexState::Normal));
                }
                LexState::BlockComment
            }
            string => {
                if ch == '\n' || Some(ch) == string.quote() {
                    self.state = LexState::Normal;
                } else if ch == '\\' {
                    self.pending = Some((string, string));
                }
                string
            }
        };

        Some(Classified { index, ch, state })
    }
}

/// Classify every character position of `text` (byte index, state).
pub fn classify(text: &str) -> Vec<(usize, LexState)> {
    Scanner::new(text).map(|c| (c.index, c.state)).collect()
}

/// State the scanner is left in after consuming all of `text`.
pub fn final_state(text: &str) -> LexState {
    let mut scanner = Scanner::new(text);
    scanner.by_ref().for_each(drop);
    scanner.state()
}

/// ─────────────────────────────────────────────────────
/// Line view
/// ─────────────────────────────────────────────────────

/// One physical line together with its lexical summary.
#[derive(Debug, Clone)]
pub struct ScannedLine<'a> {
    /// 1-based line number.
    pub number: usize,
    /// Line text without the terminating `\n` / `\r\n`.
    pub text: &'a str,
    /// `text` with every non-code byte replaced by a space.
    pub masked: String,
    /// Quote of a string literal still open when the line ended.
    pub open_string: Option<char>,
    pub starts_in_block_comment: bool,
    pub ends_in_block_comment: bool,
    /// Byte offset of a `//` comment within the line.
    pub comment_start: Option<usize>,
    pub crlf: bool,
}

impl<'a> ScannedLine<'a> {
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Code portion of the line, trimmed; empty for comment-only lines.
    pub fn code(&self) -> &str {
        self.masked.trim()
    }

    pub fn has_code(&self) -> bool {
        !self.code().is_empty()
    }

    pub fn is_comment_only(&self) -> bool {
        !self.is_blank() && !self.has_code()
    }

    pub fn indent_width(&self, tab_width: usize) -> usize {
        self.text
            .chars()
            .take_while(|c| c.is_whitespace())
            .map(|c| if c == '\t' { tab_width } else { 1 })
            .sum()
    }
}

/// Split `text` into lines (same boundaries as [`str::lines`]) and scan them.
pub fn scan_lines(text: &str) -> Vec<ScannedLine<'_>> {
    let mut lines = Vec::new();
    let mut scanner = Scanner::new(text);

    let mut line = LineBuilder::default();
    while let Some(c) = scanner.next() {
        if c.ch == '\n' {
            let next_start = c.index + 1;
            let finished = std::mem::replace(
                &mut line,
                LineBuilder {
                    start: next_start,
                    starts_in_block: scanner.state() == LexState::BlockComment,
                    ..LineBuilder::default()
                },
            );
            lines.push(finished.build(text, c.index, lines.len() + 1, c.state));
            continue;
        }

        if c.state == LexState::Normal {
            line.masked.push(c.ch);
        } else {
            if c.state == LexState::LineComment && line.comment_start.is_none() {
                line.comment_start = Some(c.index - line.start);
            }
            line.masked.extend(std::iter::repeat_n(' ', c.ch.len_utf8()));
        }
    }

    if line.start < text.len() {
        let number = lines.len() + 1;
        lines.push(line.build(text, text.len(), number, scanner.state()));
    }

    lines
}

#[derive(Default)]
struct LineBuilder {
    start: usize,
    masked: String,
    comment_start: Option<usize>,
    starts_in_block: bool,
}

impl LineBuilder {
    /// `end_state` is the state of the terminating newline, or the scanner
    /// state at end of input for an unterminated last line.
    fn build(mut self, text: &str, end: usize, number: usize, end_state: LexState) -> ScannedLine<'_> {
        let mut body = &text[self.start..end];
        let crlf = body.ends_with('\r');
        if crlf {
            body = &body[..body.len() - 1];
            self.masked.pop();
        }
        ScannedLine {
            number,
            text: body,
            masked: self.masked,
            open_string: end_state.quote(),
            starts_in_block_comment: self.starts_in_block,
            ends_in_block_comment: end_state == LexState::BlockComment,
            comment_start: self.comment_start.filter(|&c| c < body.len()),
            crlf,
        }
    }
}

/// Re-assemble lines produced by an edit pass, keeping line endings.
pub fn join_lines<'s>(lines: impl IntoIterator<Item = (std::borrow::Cow<'s, str>, bool)>, trailing_newline: bool) -> String {
    let mut out = String::new();
    let mut first = true;
    let mut last_crlf = false;
    for (line, crlf) in lines {
        if !first {
            out.push_str(if last_crlf { "\r\n" } else { "\n" });
        }
        out.push_str(&line);
        last_crlf = crlf;
        first = false;
    }
    if trailing_newline && !first {
        out.push_str(if last_crlf { "\r\n" } else { "\n" });
    }
    out
}

/// Apply `edit` to every scanned line; `None` keeps the line as is.
///
/// Returns the new text and the numbers of the lines that changed.
pub fn rewrite_lines<F>(text: &str, mut edit: F) -> (String, Vec<usize>)
where
    F: FnMut(&ScannedLine<'_>) -> Option<String>,
{
    let lines = scan_lines(text);
    let mut changed = Vec::new();
    let rebuilt = join_lines(
        lines.iter().map(|line| match edit(line) {
            Some(new) if new != line.text => {
                changed.push(line.number);
                (std::borrow::Cow::Owned(new), line.crlf)
            }
            _ => (std::borrow::Cow::Borrowed(line.text), line.crlf),
        }),
        text.ends_with('\n'),
    );
    (rebuilt, changed)
}

/// ─────────────────────────────────────────────────────
/// Brackets
/// ─────────────────────────────────────────────────────

pub const BRACKET_PAIRS: [(char, char); 3] = [('(', ')'), ('[', ']'), ('{', '}')];

pub fn closer_for(open: char) -> Option<char> {
    BRACKET_PAIRS.iter().find(|(o, _)| *o == open).map(|&(_, c)| c)
}

pub fn opener_for(close: char) -> Option<char> {
    BRACKET_PAIRS.iter().find(|(_, c)| *c == close).map(|&(o, _)| o)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenBracket {
    pub ch: char,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BracketIssue {
    /// Closer with nothing open.
    Unmatched { ch: char, line: usize },
    /// Closer that does not match the innermost opener (which is dropped).
    Mismatched { ch: char, line: usize, open: OpenBracket },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BracketReport {
    pub issues: Vec<BracketIssue>,
    /// Openers never closed, in opening order.
    pub open: Vec<OpenBracket>,
}

impl BracketReport {
    pub fn is_balanced(&self) -> bool {
        self.issues.is_empty() && self.open.is_empty()
    }

    /// Closers needed to close every leftover opener, innermost first.
    pub fn missing_closers(&self) -> String {
        self.open.iter().rev().filter_map(|b| closer_for(b.ch)).collect()
    }
}

/// Bracket stack fed one scanned line at a time.
#[derive(Debug, Default)]
pub struct BracketStack {
    report: BracketReport,
}

impl BracketStack {
    pub fn feed(&mut self, line: &ScannedLine<'_>) {
        for ch in line.masked.chars() {
            if closer_for(ch).is_some() {
                self.report.open.push(OpenBracket { ch, line: line.number });
            } else if let Some(expected_open) = opener_for(ch) {
                match self.report.open.pop() {
                    Some(top) if top.ch == expected_open => {}
                    Some(top) => self.report.issues.push(BracketIssue::Mismatched {
                        ch,
                        line: line.number,
                        open: top,
                    }),
                    None => self
                        .report
                        .issues
                        .push(BracketIssue::Unmatched { ch, line: line.number }),
                }
            }
        }
    }

    pub fn finish(self) -> BracketReport {
        self.report
    }
}

pub fn bracket_report(text: &str) -> BracketReport {
    let mut stack = BracketStack::default();
    for line in scan_lines(text) {
        stack.feed(&line);
    }
    stack.finish()
}

/// Count of structural defects: bracket issues, leftover openers and
/// string literals left open at a line boundary or at the end.
pub fn structural_imbalance(text: &str) -> usize {
    let report = bracket_report(text);
    let open_strings = scan_lines(text)
        .iter()
        .filter(|l| l.open_string.is_some())
        .count();
    report.issues.len() + report.open.len() + open_strings
}

/// ─────────────────────────────────────────────────────
/// Call helpers
/// ─────────────────────────────────────────────────────

/// Byte index of the bracket closing the one at `open_idx`, scanning `masked`.
pub fn matching_close(masked: &str, open_idx: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, ch) in masked[open_idx..].char_indices() {
        if closer_for(ch).is_some() {
            depth += 1;
        } else if opener_for(ch).is_some() {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(open_idx + i);
            }
        }
    }
    None
}

/// Split a raw argument list at top-level commas, ignoring commas nested in
/// brackets, strings or comments.
pub fn split_args(args: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for c in Scanner::new(args) {
        if c.state != LexState::Normal {
            continue;
        }
        match c.ch {
            ch if closer_for(ch).is_some() => depth += 1,
            ch if opener_for(ch).is_some() => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&args[start..c.index]);
                start = c.index + 1;
            }
            _ => {}
        }
    }
    parts.push(&args[start..]);
    if parts.len() == 1 && parts[0].trim().is_empty() {
        parts.clear();
    }
    parts
}

pub fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Positions of `name(` calls in `masked` that are not member accesses or
/// the tail of a longer identifier. Yields (start of name, index of `(`).
pub fn find_calls(masked: &str, name: &str) -> Vec<(usize, usize)> {
    let mut found = Vec::new();
    let mut from = 0;
    while let Some(rel) = masked[from..].find(name) {
        let start = from + rel;
        let end = start + name.len();
        from = end;

        let before = masked[..start].chars().next_back();
        if before.is_some_and(|c| is_ident_char(c) || c == '.') {
            continue;
        }
        let rest = &masked[end..];
        let gap = rest.len() - rest.trim_start_matches([' ', '\t']).len();
        if rest[gap..].starts_with('(') {
            found.push((start, end + gap));
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn states(src: &str) -> Vec<LexState> {
        Scanner::new(src).map(|c| c.state).collect()
    }

    #[test]
    fn test_classification() {
        use LexState::*;
        let test_cases = vec![
            ("a//b", vec![Normal, LineComment, LineComment, LineComment]),
            (
                "a/*b*/c",
                vec![Normal, BlockComment, BlockComment, BlockComment, BlockComment, BlockComment, Normal],
            ),
            ("'x'y", vec![SingleQuoteString, SingleQuoteString, SingleQuoteString, Normal]),
            (
                "\"a\\\"b\"c",
                vec![
                    DoubleQuoteString,
                    DoubleQuoteString,
                    DoubleQuoteString,
                    DoubleQuoteString,
                    DoubleQuoteString,
                    DoubleQuoteString,
                    Normal,
                ],
            ),
            ("\"it's\"", vec![DoubleQuoteString; 6]),
            ("/*/x", vec![BlockComment; 4]),
        ];

        for (src, expected) in test_cases {
            assert_eq!(states(src), expected, "source {src:?}");
        }
    }

    #[test]
    fn test_escaped_backslash_closes_string() {
        assert_eq!(final_state("\"a\\\\\""), LexState::Normal);
        assert_eq!(final_state("\"a\\\""), LexState::DoubleQuoteString);
    }

    #[test]
    fn test_comment_markers_inside_strings_are_text() {
        let lines = scan_lines("x = \"http://a\" // real\n");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].comment_start, Some(15));
        assert_eq!(lines[0].code(), "x =");
    }

    #[test]
    fn test_string_does_not_cross_newline() {
        let lines = scan_lines("a = \"open\nb = (1)\n");
        assert_eq!(lines[0].open_string, Some('"'));
        assert_eq!(lines[1].open_string, None);
        assert_eq!(lines[1].masked, "b = (1)");
    }

    #[test]
    fn test_block_comment_spans_lines() {
        let lines = scan_lines("a /* one\ntwo ( */ b\nc");
        assert!(lines[0].ends_in_block_comment);
        assert!(lines[1].starts_in_block_comment);
        assert!(!lines[1].ends_in_block_comment);
        assert_eq!(lines[1].code(), "b");
        assert!(!lines[2].starts_in_block_comment);
        assert!(bracket_report("a /* one\ntwo ( */ b\nc").is_balanced());
    }

    #[test]
    fn test_lines_match_str_lines() {
        let test_cases = vec!["", "a", "a\n", "a\n\nb", "a\r\nb\r\n"];
        for src in test_cases {
            let scanned: Vec<&str> = scan_lines(src).iter().map(|l| l.text).collect();
            let expected: Vec<&str> = src.lines().collect();
            assert_eq!(scanned, expected, "source {src:?}");
        }
    }

    #[test]
    fn test_rewrite_lines_keeps_endings() {
        let (out, changed) = rewrite_lines("a\r\nb\r\n", |l| (l.text == "b").then(|| "c".to_string()));
        assert_eq!(out, "a\r\nc\r\n");
        assert_eq!(changed, vec![2]);
    }

    #[test]
    fn test_bracket_report() {
        let report = bracket_report("f(a[1]\ng({)");
        assert_eq!(
            report.issues,
            vec![BracketIssue::Mismatched {
                ch: ')',
                line: 2,
                open: OpenBracket { ch: '{', line: 2 },
            }]
        );
        assert_eq!(report.open, vec![OpenBracket { ch: '(', line: 1 }, OpenBracket { ch: '(', line: 2 }]);
        assert_eq!(report.missing_closers(), "))");

        let report = bracket_report("x = \")\" + ]");
        assert_eq!(report.issues, vec![BracketIssue::Unmatched { ch: ']', line: 1 }]);
        assert!(report.open.is_empty());
    }

    #[test]
    fn test_split_args() {
        let test_cases = vec![
            ("", vec![]),
            ("close, 14", vec!["close", " 14"]),
            ("f(a, b), \"x, y\", [1, 2]", vec!["f(a, b)", " \"x, y\"", " [1, 2]"]),
        ];
        for (src, expected) in test_cases {
            assert_eq!(split_args(src), expected, "source {src:?}");
        }
    }

    #[test]
    fn test_find_calls() {
        let masked = "x = sma(close, 1) + ta.sma(close, 2) + mysma (a) + sma (b)";
        let calls = find_calls(masked, "sma");
        assert_eq!(calls, vec![(4, 7), (51, 55)]);
        assert_eq!(matching_close(masked, 7), Some(16));
    }
}
