//! Preempt Instrumenter (spec §4.1).
//!
//! Rewrites source text so that a checkpoint call, `__pc();`, is inserted
//! immediately after the keywords `do`, `then`, `else` (but not `elseif`)
//! and `repeat`, wherever they appear as top-level code — never inside a
//! string, a short (`--`) comment, or a long (`--[=[ ]=]`/`[=[ ]=]`)
//! bracketed string or comment, and only on whole-word matches.
//!
//! The scanner is a single left-to-right pass over the source text's
//! characters, tracking line/column as it goes, with no backtracking
//! beyond the bounded lookahead needed to recognize a long-bracket level
//! or an already-inserted checkpoint call (see [`instrument`]'s
//! idempotence note below).

use std::fmt;

use thiserror::Error;

/// A 1-based line/column pair into the original source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstrumentError {
    #[error("{name}:{location}: unterminated string")]
    UnterminatedString { name: String, location: SourceLocation },
    #[error("{name}:{location}: unterminated long bracket (level {level})")]
    UnterminatedLongBracket {
        name: String,
        location: SourceLocation,
        level: usize,
    },
}

const KEYWORDS: &[&str] = &["do", "then", "else", "repeat"];

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn advance(line: &mut u32, col: &mut u32, c: char) {
    if c == '\n' {
        *line += 1;
        *col = 1;
    } else {
        *col += 1;
    }
}

/// If `chars[i]` is the start of a long-bracket opener (`[`, zero or more
/// `=`, `[`), consumes it into `out`, advances `i`/`line`/`col` past it,
/// and returns its level. Otherwise leaves everything untouched and
/// returns `None`.
fn try_consume_long_open(
    chars: &[char],
    i: &mut usize,
    out: &mut String,
    line: &mut u32,
    col: &mut u32,
) -> Option<usize> {
    let start = *i;
    if chars.get(start) != Some(&'[') {
        return None;
    }
    let mut j = start + 1;
    let mut level = 0usize;
    while chars.get(j) == Some(&'=') {
        level += 1;
        j += 1;
    }
    if chars.get(j) != Some(&'[') {
        return None;
    }
    for k in start..=j {
        out.push(chars[k]);
        advance(line, col, chars[k]);
    }
    *i = j + 1;
    Some(level)
}

/// Consumes the body of a long string/comment of the given `level`,
/// copying it verbatim (including the closing bracket) into `out`.
fn consume_long_bracket_body(
    chars: &[char],
    i: &mut usize,
    out: &mut String,
    line: &mut u32,
    col: &mut u32,
    level: usize,
    name: &str,
    open_loc: SourceLocation,
) -> Result<(), InstrumentError> {
    loop {
        let Some(&c) = chars.get(*i) else {
            return Err(InstrumentError::UnterminatedLongBracket {
                name: name.to_string(),
                location: open_loc,
                level,
            });
        };
        if c == ']' {
            let mut j = *i + 1;
            let mut eqs = 0usize;
            while chars.get(j) == Some(&'=') {
                eqs += 1;
                j += 1;
            }
            if eqs == level && chars.get(j) == Some(&']') {
                for k in *i..=j {
                    out.push(chars[k]);
                    advance(line, col, chars[k]);
                }
                *i = j + 1;
                return Ok(());
            }
        }
        out.push(c);
        advance(line, col, c);
        *i += 1;
    }
}

/// Returns `true` if, starting at `j` (skipping intervening whitespace),
/// the text is already a checkpoint call `__pc ( ) ;`. Used so that
/// instrumenting already-instrumented source is a no-op (idempotence).
fn already_checkpointed(chars: &[char], mut j: usize) -> bool {
    fn skip_ws(chars: &[char], j: &mut usize) {
        while matches!(chars.get(*j), Some(c) if c.is_whitespace()) {
            *j += 1;
        }
    }
    skip_ws(chars, &mut j);
    for expected in "__pc".chars() {
        if chars.get(j) != Some(&expected) {
            return false;
        }
        j += 1;
    }
    skip_ws(chars, &mut j);
    if chars.get(j) != Some(&'(') {
        return false;
    }
    j += 1;
    skip_ws(chars, &mut j);
    if chars.get(j) != Some(&')') {
        return false;
    }
    j += 1;
    skip_ws(chars, &mut j);
    chars.get(j) == Some(&';')
}

/// Rewrites `source` (whose diagnostic name is `name`, used only in error
/// messages), returning the instrumented text and the number of
/// checkpoints actually inserted (excludes no-ops from re-instrumenting
/// already-instrumented text).
pub fn instrument(source: &str, name: &str) -> Result<(String, usize), InstrumentError> {
    let chars: Vec<char> = source.chars().collect();
    let n = chars.len();
    let mut out = String::with_capacity(source.len() + 64);
    let mut i = 0usize;
    let mut line = 1u32;
    let mut col = 1u32;
    let mut count = 0usize;

    while i < n {
        let c = chars[i];
        match c {
            '-' if chars.get(i + 1) == Some(&'-') => {
                out.push('-');
                out.push('-');
                advance(&mut line, &mut col, '-');
                advance(&mut line, &mut col, '-');
                i += 2;

                if chars.get(i) == Some(&'[') {
                    let open_loc = SourceLocation { line, column: col };
                    if let Some(level) =
                        try_consume_long_open(&chars, &mut i, &mut out, &mut line, &mut col)
                    {
                        consume_long_bracket_body(
                            &chars, &mut i, &mut out, &mut line, &mut col, level, name, open_loc,
                        )?;
                        continue;
                    }
                }

                while i < n && chars[i] != '\n' {
                    out.push(chars[i]);
                    advance(&mut line, &mut col, chars[i]);
                    i += 1;
                }
            }
            '"' | '\'' => {
                let quote = c;
                let open_loc = SourceLocation { line, column: col };
                out.push(c);
                advance(&mut line, &mut col, c);
                i += 1;
                loop {
                    let Some(&ch) = chars.get(i) else {
                        return Err(InstrumentError::UnterminatedString {
                            name: name.to_string(),
                            location: open_loc,
                        });
                    };
                    if ch == '\n' {
                        return Err(InstrumentError::UnterminatedString {
                            name: name.to_string(),
                            location: open_loc,
                        });
                    }
                    if ch == '\\' && chars.get(i + 1).is_some() {
                        out.push(ch);
                        advance(&mut line, &mut col, ch);
                        out.push(chars[i + 1]);
                        advance(&mut line, &mut col, chars[i + 1]);
                        i += 2;
                        continue;
                    }
                    out.push(ch);
                    advance(&mut line, &mut col, ch);
                    i += 1;
                    if ch == quote {
                        break;
                    }
                }
            }
            '[' => {
                let open_loc = SourceLocation { line, column: col };
                if let Some(level) =
                    try_consume_long_open(&chars, &mut i, &mut out, &mut line, &mut col)
                {
                    consume_long_bracket_body(
                        &chars, &mut i, &mut out, &mut line, &mut col, level, name, open_loc,
                    )?;
                } else {
                    out.push('[');
                    advance(&mut line, &mut col, '[');
                    i += 1;
                }
            }
            c if is_ident_start(c) => {
                let mut word = String::new();
                while i < n && is_ident_continue(chars[i]) {
                    word.push(chars[i]);
                    out.push(chars[i]);
                    advance(&mut line, &mut col, chars[i]);
                    i += 1;
                }
                if KEYWORDS.contains(&word.as_str()) && !already_checkpointed(&chars, i) {
                    out.push_str(" __pc();");
                    count += 1;
                }
            }
            _ => {
                out.push(c);
                advance(&mut line, &mut col, c);
                i += 1;
            }
        }
    }

    Ok((out, count))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injects_after_do_in_while_loop() {
        let (out, count) = instrument("while x do foo(); end", "t").unwrap();
        assert_eq!(count, 1);
        assert_eq!(out, "while x do __pc(); foo(); end");
    }

    #[test]
    fn does_not_match_elseif() {
        let (out, count) = instrument("if a then elseif b then c end", "t").unwrap();
        // two "then" tokens get instrumented, "elseif" itself never does
        assert_eq!(count, 2);
        assert!(!out.contains("elseif __pc"));
    }

    #[test]
    fn whole_word_only() {
        let (out, count) = instrument("redo() done() do_x()", "t").unwrap();
        assert_eq!(count, 0);
        assert_eq!(out, "redo() done() do_x()");
    }

    #[test]
    fn leaves_do_inside_short_string_untouched() {
        let (out, count) = instrument(r#"x = "do""#, "t").unwrap();
        assert_eq!(count, 0);
        assert_eq!(out, r#"x = "do""#);
    }

    #[test]
    fn leaves_do_inside_line_comment_untouched() {
        let (out, count) = instrument("-- do\nrepeat x = 1 until true", "t").unwrap();
        assert_eq!(count, 1);
        assert_eq!(out, "-- do\nrepeat __pc(); x = 1 until true");
    }

    #[test]
    fn leaves_do_inside_long_string_untouched() {
        let (out, count) = instrument("x = [[ do ]]", "t").unwrap();
        assert_eq!(count, 0);
        assert_eq!(out, "x = [[ do ]]");
    }

    #[test]
    fn long_comment_level_must_match() {
        let src = "--[==[ ]] still inside ]==] do end";
        let (out, count) = instrument(src, "t").unwrap();
        assert_eq!(count, 1);
        assert!(out.ends_with("]==] do __pc(); end"));
    }

    #[test]
    fn unterminated_string_reports_location() {
        let err = instrument("x = \"abc", "t").unwrap_err();
        match err {
            InstrumentError::UnterminatedString { location, .. } => {
                assert_eq!(location, SourceLocation { line: 1, column: 5 });
            }
            other => panic!("wrong error: {other:?}"),
        }
    }

    #[test]
    fn unterminated_long_bracket_reports_location() {
        let err = instrument("x = [=[ abc", "t").unwrap_err();
        match err {
            InstrumentError::UnterminatedLongBracket { location, level, .. } => {
                assert_eq!(location, SourceLocation { line: 1, column: 5 });
                assert_eq!(level, 1);
            }
            other => panic!("wrong error: {other:?}"),
        }
    }

    #[test]
    fn instrumentation_is_idempotent() {
        let once = instrument("while x do foo(); end", "t").unwrap().0;
        let (twice, second_count) = instrument(&once, "t").unwrap();
        assert_eq!(once, twice);
        assert_eq!(second_count, 0);
    }
}
