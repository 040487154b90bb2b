//! Script tokenizer.
//!
//! Splits a script into tokens one at a time.  The evaluator concatenates
//! adjacent tokens into words and dispatches a command at each end-of-line
//! token.
//!
//! | Token  | Produced by                                   | Evaluator does            |
//! |--------|-----------------------------------------------|---------------------------|
//! | `Esc`  | bare or `"quoted"` text                       | backslash escapes          |
//! | `Str`  | `{braced}` text, lone `$`                     | nothing (verbatim)         |
//! | `Cmd`  | `[script]`                                    | evaluate, use the result   |
//! | `Var`  | `$name`                                       | variable lookup            |
//! | `Sep`  | blanks between words                          | start a new word           |
//! | `Eol`  | newline, `;`, end of script                   | dispatch the command       |
//! | `Eof`  | end of script after the final `Eol`           | stop                       |
//!
//! Braces and quotes only group at the start of a word.  A `#` at the start
//! of a command comments out the rest of the line.

use std::borrow::Cow;

use thiserror::Error;

// ── Tokens ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Esc,
    Str,
    Cmd,
    Var,
    Sep,
    Eol,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    /// Token contents with grouping characters stripped.
    pub text: &'a [u8],
    /// Line the token ends on (1-based).
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    #[error("line {line}: unbalanced braces")]
    UnbalancedBrace { line: usize },
    #[error("line {line}: unbalanced brackets")]
    UnbalancedBracket { line: usize },
    #[error("line {line}: unterminated quote")]
    UnterminatedQuote { line: usize },
}

// ── Lexer ─────────────────────────────────────────────────────────────────────

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: usize,
    /// Kind of the previously returned token.
    kind: TokenKind,
    inside_quote: bool,
    /// Substitution-only mode: the whole input behaves like the inside of a
    /// quoted word that never closes.
    subst_only: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a [u8]) -> Self {
        Lexer {
            src,
            pos: 0,
            line: 1,
            kind: TokenKind::Eol,
            inside_quote: false,
            subst_only: false,
        }
    }

    /// Lexer for `subst`-style processing: variables, commands and escapes
    /// are recognised, but whitespace, quotes and braces are plain text.
    pub fn for_subst(src: &'a [u8]) -> Self {
        Lexer {
            inside_quote: true,
            subst_only: true,
            ..Self::new(src)
        }
    }

    pub fn line(&self) -> usize {
        self.line
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn bump(&mut self) {
        if self.src.get(self.pos) == Some(&b'\n') {
            self.line += 1;
        }
        self.pos += 1;
    }

    fn emit(&mut self, kind: TokenKind, start: usize, end: usize) -> Token<'a> {
        self.kind = kind;
        Token { kind, text: &self.src[start..end], line: self.line }
    }

    /// Next token, or an error for unbalanced grouping.
    pub fn next_token(&mut self) -> Result<Token<'a>, LexError> {
        loop {
            let Some(c) = self.peek() else {
                if self.inside_quote && !self.subst_only {
                    return Err(LexError::UnterminatedQuote { line: self.line });
                }
                let kind = match self.kind {
                    TokenKind::Eol | TokenKind::Eof => TokenKind::Eof,
                    _ => TokenKind::Eol,
                };
                return Ok(self.emit(kind, self.pos, self.pos));
            };
            return match c {
                b' ' | b'\t' | b'\r' if !self.inside_quote => Ok(self.parse_sep()),
                b'\n' | b';' if !self.inside_quote => Ok(self.parse_eol()),
                b'[' => self.parse_command(),
                b'$' => Ok(self.parse_var()),
                b'#' if self.kind == TokenKind::Eol && !self.inside_quote => {
                    self.skip_comment();
                    continue;
                }
                _ => self.parse_string(),
            };
        }
    }

    fn parse_sep(&mut self) -> Token<'a> {
        let start = self.pos;
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r')) {
            self.bump();
        }
        self.emit(TokenKind::Sep, start, self.pos)
    }

    fn parse_eol(&mut self) -> Token<'a> {
        let start = self.pos;
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n' | b';')) {
            self.bump();
        }
        self.emit(TokenKind::Eol, start, self.pos)
    }

    fn skip_comment(&mut self) {
        while !matches!(self.peek(), None | Some(b'\n')) {
            self.bump();
        }
    }

    fn parse_command(&mut self) -> Result<Token<'a>, LexError> {
        self.bump();
        let start = self.pos;
        let (mut level, mut braces) = (1usize, 0usize);
        loop {
            match self.peek() {
                None => return Err(LexError::UnbalancedBracket { line: self.line }),
                Some(b'[') if braces == 0 => level += 1,
                Some(b']') if braces == 0 => {
                    level -= 1;
                    if level == 0 {
                        let end = self.pos;
                        self.bump();
                        return Ok(self.emit(TokenKind::Cmd, start, end));
                    }
                }
                Some(b'{') => braces += 1,
                Some(b'}') => braces = braces.saturating_sub(1),
                Some(b'\\') => self.bump(),
                Some(_) => {}
            }
            self.bump();
        }
    }

    fn parse_var(&mut self) -> Token<'a> {
        let dollar = self.pos;
        self.bump();
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_') {
            self.bump();
        }
        if self.pos == start {
            // A lone `$` is literal text.
            return self.emit(TokenKind::Str, dollar, start);
        }
        self.emit(TokenKind::Var, start, self.pos)
    }

    fn parse_brace(&mut self) -> Result<Token<'a>, LexError> {
        self.bump();
        let start = self.pos;
        let mut level = 1usize;
        loop {
            match self.peek() {
                None => return Err(LexError::UnbalancedBrace { line: self.line }),
                Some(b'\\') => self.bump(),
                Some(b'{') => level += 1,
                Some(b'}') => {
                    level -= 1;
                    if level == 0 {
                        let end = self.pos;
                        self.bump();
                        return Ok(self.emit(TokenKind::Str, start, end));
                    }
                }
                Some(_) => {}
            }
            self.bump();
        }
    }

    fn parse_string(&mut self) -> Result<Token<'a>, LexError> {
        let new_word = matches!(self.kind, TokenKind::Sep | TokenKind::Eol | TokenKind::Str);
        if new_word && !self.inside_quote {
            match self.peek() {
                Some(b'{') => return self.parse_brace(),
                Some(b'"') => {
                    self.inside_quote = true;
                    self.bump();
                }
                _ => {}
            }
        }
        let start = self.pos;
        loop {
            let Some(c) = self.peek() else {
                return Ok(self.emit(TokenKind::Esc, start, self.pos));
            };
            match c {
                b'\\' => {
                    if self.pos + 1 < self.src.len() {
                        self.bump();
                    }
                }
                b'$' | b'[' => return Ok(self.emit(TokenKind::Esc, start, self.pos)),
                b' ' | b'\t' | b'\n' | b'\r' | b';' if !self.inside_quote => {
                    return Ok(self.emit(TokenKind::Esc, start, self.pos));
                }
                b'"' if self.inside_quote && !self.subst_only => {
                    let end = self.pos;
                    self.bump();
                    self.inside_quote = false;
                    return Ok(self.emit(TokenKind::Esc, start, end));
                }
                _ => {}
            }
            self.bump();
        }
    }
}

// ── Escapes ───────────────────────────────────────────────────────────────────

fn hex_digit(c: u8) -> Option<u8> {
    (c as char).to_digit(16).map(|d| d as u8)
}

/// Apply backslash escapes.  Unrecognised escapes are kept verbatim,
/// backslash included.
pub fn unescape(raw: &[u8]) -> Cow<'_, [u8]> {
    if !raw.contains(&b'\\') {
        return Cow::Borrowed(raw);
    }
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let c = raw[i];
        if c != b'\\' || i + 1 == raw.len() {
            out.push(c);
            i += 1;
            continue;
        }
        let next = raw[i + 1];
        i += 2;
        let mapped = match next {
            b'a' => 0x07,
            b'b' => 0x08,
            b'e' => 0x1b,
            b'f' => 0x0c,
            b'n' => b'\n',
            b'r' => b'\r',
            b't' => b'\t',
            b'v' => 0x0b,
            b'\\' | b'"' | b'[' | b']' | b'{' | b'}' | b'$' | b';' | b' ' => next,
            b'x' => {
                let hi = raw.get(i).copied().and_then(hex_digit);
                let lo = raw.get(i + 1).copied().and_then(hex_digit);
                match (hi, lo) {
                    (Some(h), Some(l)) => {
                        i += 2;
                        h << 4 | l
                    }
                    (Some(h), None) => {
                        i += 1;
                        h
                    }
                    _ => {
                        out.extend_from_slice(b"\\x");
                        continue;
                    }
                }
            }
            _ => {
                out.push(b'\\');
                next
            }
        };
        out.push(mapped);
    }
    Cow::Owned(out)
}

// ── Lists ─────────────────────────────────────────────────────────────────────

fn is_blank(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\n' | b'\r')
}

/// Split a list into its elements.  Elements are separated by whitespace;
/// `{braced}` elements are taken verbatim, `"quoted"` and bare elements have
/// their escapes applied.
pub fn split_list(src: &[u8]) -> Result<Vec<Cow<'_, [u8]>>, LexError> {
    let mut items = Vec::new();
    let mut pos = 0;
    let line = |upto: usize| 1 + src[..upto].iter().filter(|&&c| c == b'\n').count();
    loop {
        while pos < src.len() && is_blank(src[pos]) {
            pos += 1;
        }
        if pos >= src.len() {
            break;
        }
        match src[pos] {
            b'{' => {
                let mut level = 0usize;
                let mut end = None;
                let mut i = pos;
                while i < src.len() {
                    match src[i] {
                        b'\\' => i += 1,
                        b'{' => level += 1,
                        b'}' => {
                            level -= 1;
                            if level == 0 {
                                end = Some(i);
                                break;
                            }
                        }
                        _ => {}
                    }
                    i += 1;
                }
                let end = end.ok_or(LexError::UnbalancedBrace { line: line(pos) })?;
                items.push(Cow::Borrowed(&src[pos + 1..end]));
                pos = end + 1;
            }
            b'"' => {
                let mut i = pos + 1;
                while i < src.len() && src[i] != b'"' {
                    if src[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
                if i >= src.len() {
                    return Err(LexError::UnterminatedQuote { line: line(pos) });
                }
                items.push(unescape(&src[pos + 1..i]));
                pos = i + 1;
            }
            _ => {
                let start = pos;
                while pos < src.len() && !is_blank(src[pos]) {
                    if src[pos] == b'\\' {
                        pos += 1;
                    }
                    pos += 1;
                }
                let end = pos.min(src.len());
                items.push(unescape(&src[start..end]));
            }
        }
    }
    Ok(items)
}

fn braces_balanced(elem: &[u8]) -> bool {
    let mut level = 0isize;
    let mut i = 0;
    while i < elem.len() {
        match elem[i] {
            b'\\' => i += 1,
            b'{' => level += 1,
            b'}' => {
                level -= 1;
                if level < 0 {
                    return false;
                }
            }
            _ => {}
        }
        i += 1;
    }
    level == 0 && elem.last() != Some(&b'\\')
}

/// Append `elem` to `out` quoted so that [`split_list`] reads it back as a
/// single element.
pub fn quote_element(elem: &[u8], out: &mut Vec<u8>) {
    const SPECIAL: &[u8] = b" \t\n\r{}[]$\"\\;";
    if elem.is_empty() {
        out.extend_from_slice(b"{}");
    } else if !elem.iter().any(|c| SPECIAL.contains(c)) {
        out.extend_from_slice(elem);
    } else if braces_balanced(elem) {
        out.push(b'{');
        out.extend_from_slice(elem);
        out.push(b'}');
    } else {
        for &c in elem {
            match c {
                b'\n' => out.extend_from_slice(b"\\n"),
                b'\t' => out.extend_from_slice(b"\\t"),
                b'\r' => out.extend_from_slice(b"\\r"),
                c if SPECIAL.contains(&c) => {
                    out.push(b'\\');
                    out.push(c);
                }
                c => out.push(c),
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<(TokenKind, String)> {
        let mut lx = Lexer::new(src.as_bytes());
        let mut out = Vec::new();
        loop {
            let t = lx.next_token().unwrap();
            out.push((t.kind, String::from_utf8_lossy(t.text).into_owned()));
            if t.kind == TokenKind::Eof {
                break;
            }
        }
        out
    }

    use TokenKind::*;

    #[test]
    fn simple_command() {
        let toks = kinds("set x 1");
        let expect: Vec<(TokenKind, String)> = vec![
            (Esc, "set".into()),
            (Sep, " ".into()),
            (Esc, "x".into()),
            (Sep, " ".into()),
            (Esc, "1".into()),
            (Eol, "".into()),
            (Eof, "".into()),
        ];
        assert_eq!(toks, expect);
    }

    #[test]
    fn braces_are_verbatim_and_nested() {
        let toks = kinds("p {a {b} $c [d]}");
        assert_eq!(toks[2], (Str, "a {b} $c [d]".into()));
    }

    #[test]
    fn quotes_group_and_allow_substitution() {
        let toks = kinds("p \"a $b c\"");
        assert_eq!(toks[2], (Esc, "a ".into()));
        assert_eq!(toks[3], (Var, "b".into()));
        assert_eq!(toks[4], (Esc, " c".into()));
        assert_eq!(toks[5].0, Eol);
    }

    #[test]
    fn command_substitution_nests() {
        let toks = kinds("p [a [b] {]}]x");
        assert_eq!(toks[2], (Cmd, "a [b] {]}".into()));
        assert_eq!(toks[3], (Esc, "x".into()));
    }

    #[test]
    fn lone_dollar_is_literal() {
        let toks = kinds("p $ x");
        assert_eq!(toks[2], (Str, "$".into()));
    }

    #[test]
    fn comments_only_at_command_start() {
        let toks = kinds("# note\np a#b");
        assert_eq!(toks[0].0, Eol);
        assert_eq!(toks[1], (Esc, "p".into()));
        assert_eq!(toks[3], (Esc, "a#b".into()));
    }

    #[test]
    fn semicolon_ends_command() {
        let toks = kinds("a;b");
        assert_eq!(toks[1].0, Eol);
        assert_eq!(toks[2], (Esc, "b".into()));
    }

    #[test]
    fn unbalanced_grouping_fails() {
        let mut lx = Lexer::new(b"p {abc");
        lx.next_token().unwrap();
        lx.next_token().unwrap();
        assert_eq!(lx.next_token(), Err(LexError::UnbalancedBrace { line: 1 }));

        let mut lx = Lexer::new(b"p [abc");
        lx.next_token().unwrap();
        lx.next_token().unwrap();
        assert_eq!(lx.next_token(), Err(LexError::UnbalancedBracket { line: 1 }));

        let mut lx = Lexer::new(b"p \"abc");
        let mut result = Ok(());
        for _ in 0..5 {
            if let Err(e) = lx.next_token() {
                result = Err(e);
                break;
            }
        }
        assert_eq!(result, Err(LexError::UnterminatedQuote { line: 1 }));
    }

    #[test]
    fn lines_are_counted() {
        let mut lx = Lexer::new(b"a\nb\nc");
        let mut last = 0;
        loop {
            let t = lx.next_token().unwrap();
            if t.kind == Eof {
                break;
            }
            last = t.line;
        }
        assert_eq!(last, 3);
    }

    #[test]
    fn subst_mode_keeps_whitespace_and_quotes() {
        let mut lx = Lexer::for_subst(b"a \"b\" {c} $d");
        let t = lx.next_token().unwrap();
        assert_eq!((t.kind, t.text), (Esc, &b"a \"b\" {c} "[..]));
        let t = lx.next_token().unwrap();
        assert_eq!((t.kind, t.text), (Var, &b"d"[..]));
    }

    #[test]
    fn escapes() {
        assert_eq!(&*unescape(br"a\tb\n"), b"a\tb\n");
        assert_eq!(&*unescape(br"\x41\x4"), b"A\x04");
        assert_eq!(&*unescape(br"\q\$"), b"\\q$");
        assert!(matches!(unescape(b"plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn list_split() {
        let items = split_list(b" a {b c} \"d e\" f\\ g ").unwrap();
        let items: Vec<&[u8]> = items.iter().map(|c| &**c).collect();
        assert_eq!(items, vec![&b"a"[..], b"b c", b"d e", b"f g"]);
        assert!(split_list(b"{a").is_err());
    }

    #[test]
    fn list_quote_round_trip() {
        let elems: Vec<&[u8]> = vec![b"", b"plain", b"two words", b"{", b"a}b", b"x$y", b"tab\there"];
        let mut list = Vec::new();
        for (i, e) in elems.iter().enumerate() {
            if i > 0 {
                list.push(b' ');
            }
            quote_element(e, &mut list);
        }
        let back = split_list(&list).unwrap();
        let back: Vec<&[u8]> = back.iter().map(|c| &**c).collect();
        assert_eq!(back, elems);
    }
}
