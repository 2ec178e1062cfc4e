//! Lexer: source text → token stream
//!
//! Music-specific literals make this more involved than a typical
//! expression lexer:
//!
//! - pitch literals (`C4`, `F#3`, `Bb-1`) are disambiguated from
//!   identifiers by trial: at an identifier-start position beginning with
//!   `A`..`G`, the longest prefix that parses as a pitch and is not
//!   followed by an identifier character wins, otherwise the scanner falls
//!   through to identifier recognition
//! - duration letters (`w h q e s t x`) with optional augmentation dots
//! - `BAR:BEAT` position references (adjacent digits around `:`)
//! - numbers with an optional `bpm` suffix
//! - template literals, emitted as head/middle/tail segments around the
//!   interpolated token runs

use crate::diagnostics::{Code, Diagnostic, Pos, Span};
use crate::models::Pitch;
use crate::parse::tokens::{Keyword, Token, TokenKind};

/// Longest prefix tried when matching a pitch literal
const PITCH_TRIAL_MAX: usize = 10;

/// Tokenize a source string
///
/// Returns the token stream (terminated by `Eof`) and any accumulated
/// warnings, or the first lexical error.
pub fn tokenize(
    source: &str,
    path: Option<&str>,
) -> Result<(Vec<Token>, Vec<Diagnostic>), Diagnostic> {
    let mut lexer = Lexer::new(source, path);
    lexer.run()?;
    log::debug!("lexed {} token(s)", lexer.tokens.len());
    Ok((lexer.tokens, lexer.warnings))
}

struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
    path: Option<&'a str>,
    tokens: Vec<Token>,
    warnings: Vec<Diagnostic>,
    /// Brace depth per open template interpolation; the top entry at 0
    /// means the next `}` resumes template text
    interp: Vec<u32>,
}

impl<'a> Lexer<'a> {
    fn new(source: &str, path: Option<&'a str>) -> Lexer<'a> {
        Lexer {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            path,
            tokens: Vec::new(),
            warnings: Vec::new(),
            interp: Vec::new(),
        }
    }

    fn run(&mut self) -> Result<(), Diagnostic> {
        loop {
            self.skip_trivia()?;
            if self.at_end() {
                let here = self.here();
                self.push(TokenKind::Eof, Span::at(here));
                return Ok(());
            }
            if self.peek() == Some('}') && self.interp.last() == Some(&0) {
                self.continue_template()?;
                continue;
            }
            self.next_token()?;
        }
    }

    // --- low-level cursor ---

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn here(&self) -> Pos {
        Pos::new(self.line, self.col)
    }

    fn push(&mut self, kind: TokenKind, span: Span) {
        self.tokens.push(Token::new(kind, span));
    }

    fn error(&self, message: impl Into<String>, span: Span) -> Diagnostic {
        let mut d = Diagnostic::error(Code::LexError, message, span);
        if let Some(p) = self.path {
            d = d.with_path(p);
        }
        d
    }

    // --- trivia ---

    fn skip_trivia(&mut self) -> Result<(), Diagnostic> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    let start = self.here();
                    self.advance();
                    self.advance();
                    // block comments do not nest
                    loop {
                        match self.peek() {
                            Some('*') if self.peek_at(1) == Some('/') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            Some(_) => {
                                self.advance();
                            }
                            None => {
                                return Err(self.error(
                                    "unterminated block comment",
                                    Span::at(start),
                                ));
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    // --- token dispatch ---

    fn next_token(&mut self) -> Result<(), Diagnostic> {
        let start = self.here();
        let c = self.peek().expect("next_token called at end");

        if c.is_ascii_digit() {
            return self.lex_number(start);
        }
        if c == '"' {
            return self.lex_string(start);
        }
        if c == '`' {
            return self.start_template(start);
        }
        if ('A'..='G').contains(&c) {
            if let Some(()) = self.try_pitch(start) {
                return Ok(());
            }
        }
        if is_dur_letter(c) && !self.peek_at(1).map_or(false, is_ident_continue) {
            return self.lex_duration(start);
        }
        if is_ident_start(c) {
            return self.lex_ident(start);
        }
        self.lex_operator(start)
    }

    // --- literals ---

    fn lex_number(&mut self, start: Pos) -> Result<(), Diagnostic> {
        let digits = self.take_digits();

        // BAR:BEAT position reference: digits adjacent around a colon
        if self.peek() == Some(':') && self.peek_at(1).map_or(false, |c| c.is_ascii_digit()) {
            self.advance();
            let beat_digits = self.take_digits();
            let span = Span::new(start, self.here());
            let bar: u32 = digits
                .parse()
                .map_err(|_| self.error("bar number too large", span))?;
            let beat: u32 = beat_digits
                .parse()
                .map_err(|_| self.error("beat number too large", span))?;
            self.push(TokenKind::PosRef { bar, beat }, span);
            return Ok(());
        }

        let mut text = digits;
        let mut is_float = false;
        if self.peek() == Some('.') && self.peek_at(1).map_or(false, |c| c.is_ascii_digit()) {
            is_float = true;
            self.advance();
            text.push('.');
            text.push_str(&self.take_digits());
        }

        // `bpm` suffix makes a tempo literal
        if self.peek() == Some('b')
            && self.peek_at(1) == Some('p')
            && self.peek_at(2) == Some('m')
            && !self.peek_at(3).map_or(false, is_ident_continue)
        {
            self.advance();
            self.advance();
            self.advance();
            let span = Span::new(start, self.here());
            let value: f64 = text
                .parse()
                .map_err(|_| self.error("malformed tempo literal", span))?;
            self.push(TokenKind::Bpm(value), span);
            return Ok(());
        }

        let span = Span::new(start, self.here());
        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| self.error("malformed number literal", span))?;
            self.push(TokenKind::Float(value), span);
        } else {
            let value: i64 = text
                .parse()
                .map_err(|_| self.error("number literal too large", span))?;
            self.push(TokenKind::Int(value), span);
        }
        Ok(())
    }

    fn take_digits(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if !c.is_ascii_digit() {
                break;
            }
            out.push(c);
            self.advance();
        }
        out
    }

    fn lex_string(&mut self, start: Pos) -> Result<(), Diagnostic> {
        self.advance(); // opening quote
        let mut text = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => {
                    return Err(self
                        .error("unterminated string literal", Span::at(start))
                        .with_label("string starts here"));
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    let esc_pos = self.here();
                    self.advance();
                    self.read_escape(&mut text, esc_pos, false)?;
                }
                Some(c) => {
                    text.push(c);
                    self.advance();
                }
            }
        }
        self.push(TokenKind::Str(text), Span::new(start, self.here()));
        Ok(())
    }

    /// Read the character after a backslash into `out`
    ///
    /// Unknown escapes pass through verbatim (backslash kept) with a
    /// warning rather than failing the compilation.
    fn read_escape(
        &mut self,
        out: &mut String,
        esc_pos: Pos,
        in_template: bool,
    ) -> Result<(), Diagnostic> {
        let c = match self.peek() {
            Some(c) => c,
            None => {
                return Err(self.error("unterminated escape sequence", Span::at(esc_pos)));
            }
        };
        self.advance();
        match c {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '\\' => out.push('\\'),
            '"' => out.push('"'),
            '`' if in_template => out.push('`'),
            '$' if in_template => out.push('$'),
            'x' => {
                let mut value = 0u32;
                for _ in 0..2 {
                    let d = self
                        .peek()
                        .and_then(|c| c.to_digit(16))
                        .ok_or_else(|| {
                            self.error("expected two hex digits after \\x", Span::at(esc_pos))
                        })?;
                    value = value * 16 + d;
                    self.advance();
                }
                // two hex digits always form a valid char
                out.push(char::from_u32(value).unwrap_or('\u{FFFD}'));
            }
            other => {
                self.warnings.push(
                    Diagnostic::warning(
                        Code::UnknownEscape,
                        format!("unknown escape `\\{}` passed through verbatim", other),
                        Span::at(esc_pos),
                    ),
                );
                out.push('\\');
                out.push(other);
            }
        }
        Ok(())
    }

    // --- templates ---

    fn start_template(&mut self, start: Pos) -> Result<(), Diagnostic> {
        self.advance(); // opening backtick
        let (text, ended) = self.scan_template_text(start)?;
        if ended {
            // no interpolation: plain string value
            self.push(TokenKind::Str(text), Span::new(start, self.here()));
        } else {
            self.push(TokenKind::TemplateHead(text), Span::new(start, self.here()));
            self.interp.push(0);
        }
        Ok(())
    }

    fn continue_template(&mut self) -> Result<(), Diagnostic> {
        let start = self.here();
        self.interp.pop();
        self.advance(); // closing `}` of the interpolation
        let (text, ended) = self.scan_template_text(start)?;
        if ended {
            self.push(TokenKind::TemplateTail(text), Span::new(start, self.here()));
        } else {
            self.push(TokenKind::TemplateMiddle(text), Span::new(start, self.here()));
            self.interp.push(0);
        }
        Ok(())
    }

    /// Scan template text until a backtick (returns `true`) or `${`
    /// (returns `false`)
    fn scan_template_text(&mut self, start: Pos) -> Result<(String, bool), Diagnostic> {
        let mut text = String::new();
        loop {
            match self.peek() {
                None => {
                    return Err(self
                        .error("unterminated template literal", Span::at(start))
                        .with_label("template starts here"));
                }
                Some('`') => {
                    self.advance();
                    return Ok((text, true));
                }
                Some('$') if self.peek_at(1) == Some('{') => {
                    self.advance();
                    self.advance();
                    return Ok((text, false));
                }
                Some('\\') => {
                    let esc_pos = self.here();
                    self.advance();
                    self.read_escape(&mut text, esc_pos, true)?;
                }
                Some(c) => {
                    text.push(c);
                    self.advance();
                }
            }
        }
    }

    // --- pitches, durations, identifiers ---

    /// Trial-match a pitch literal at the current position
    ///
    /// Tries prefixes of increasing length and keeps the longest one that
    /// parses as a pitch and is not immediately followed by an identifier
    /// character. Returns `None` (consuming nothing) when no prefix works.
    fn try_pitch(&mut self, start: Pos) -> Option<()> {
        let mut best: Option<(usize, Pitch)> = None;
        for len in 1..=PITCH_TRIAL_MAX {
            if self.pos + len > self.chars.len() {
                break;
            }
            let candidate: String = self.chars[self.pos..self.pos + len].iter().collect();
            let next = self.chars.get(self.pos + len).copied();
            if next.map_or(false, is_ident_continue) {
                continue;
            }
            if let Some(pitch) = Pitch::parse(&candidate) {
                best = Some((len, pitch));
            }
        }
        let (len, pitch) = best?;
        for _ in 0..len {
            self.advance();
        }
        self.push(TokenKind::Pitch(pitch.key()), Span::new(start, self.here()));
        Some(())
    }

    fn lex_duration(&mut self, start: Pos) -> Result<(), Diagnostic> {
        let letter = self.advance().expect("duration letter");
        let den = match letter {
            'w' => 1,
            'h' => 2,
            'q' => 4,
            'e' => 8,
            's' => 16,
            't' => 32,
            'x' => 64,
            _ => unreachable!("checked by caller"),
        };
        let mut dots = 0u8;
        while dots < 3 && self.peek() == Some('.') {
            self.advance();
            dots += 1;
        }
        self.push(TokenKind::Dur { den, dots }, Span::new(start, self.here()));
        Ok(())
    }

    fn lex_ident(&mut self, start: Pos) -> Result<(), Diagnostic> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if !is_ident_continue(c) {
                break;
            }
            text.push(c);
            self.advance();
        }
        let span = Span::new(start, self.here());
        match Keyword::from_str(&text) {
            Some(kw) => self.push(TokenKind::Keyword(kw), span),
            None => self.push(TokenKind::Ident(text), span),
        }
        Ok(())
    }

    // --- operators & punctuation ---

    fn lex_operator(&mut self, start: Pos) -> Result<(), Diagnostic> {
        let c = self.advance().expect("operator char");
        let kind = match c {
            '+' => TokenKind::Plus,
            '-' => {
                if self.eat('>') {
                    TokenKind::Arrow
                } else {
                    TokenKind::Minus
                }
            }
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '=' => {
                if self.eat('=') {
                    TokenKind::EqEq
                } else if self.eat('>') {
                    TokenKind::FatArrow
                } else {
                    TokenKind::Assign
                }
            }
            '!' => {
                if self.eat('=') {
                    TokenKind::NotEq
                } else {
                    TokenKind::Bang
                }
            }
            '<' => {
                if self.eat('=') {
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.eat('=') {
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            '&' => {
                if self.eat('&') {
                    TokenKind::AndAnd
                } else {
                    return Err(self.error("unexpected character `&`", Span::at(start)));
                }
            }
            '|' => {
                if self.eat('|') {
                    TokenKind::OrOr
                } else if self.eat('>') {
                    TokenKind::Pipe
                } else {
                    TokenKind::Bar
                }
            }
            '?' => {
                if self.eat('?') {
                    TokenKind::Coalesce
                } else if self.eat('.') {
                    TokenKind::QuestionDot
                } else {
                    TokenKind::Question
                }
            }
            '.' => {
                if self.peek() == Some('.') && self.peek_at(1) == Some('.') {
                    self.advance();
                    self.advance();
                    TokenKind::Ellipsis
                } else if self.eat('.') {
                    TokenKind::DotDot
                } else {
                    TokenKind::Dot
                }
            }
            ':' => TokenKind::Colon,
            ';' => TokenKind::Semi,
            ',' => TokenKind::Comma,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '{' => {
                if let Some(depth) = self.interp.last_mut() {
                    *depth += 1;
                }
                TokenKind::LBrace
            }
            '}' => {
                // a `}` at interpolation depth 0 is handled in run()
                if let Some(depth) = self.interp.last_mut() {
                    *depth -= 1;
                }
                TokenKind::RBrace
            }
            other => {
                return Err(self.error(
                    format!("unexpected character `{}`", other),
                    Span::at(start),
                ));
            }
        };
        self.push(kind, Span::new(start, self.here()));
        Ok(())
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_dur_letter(c: char) -> bool {
    matches!(c, 'w' | 'h' | 'q' | 'e' | 's' | 't' | 'x')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let (tokens, _) = tokenize(source, None).unwrap();
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("42"), vec![TokenKind::Int(42), TokenKind::Eof]);
        assert_eq!(kinds("3.25"), vec![TokenKind::Float(3.25), TokenKind::Eof]);
        assert_eq!(kinds("120bpm"), vec![TokenKind::Bpm(120.0), TokenKind::Eof]);
        assert_eq!(kinds("92.5bpm"), vec![TokenKind::Bpm(92.5), TokenKind::Eof]);
    }

    #[test]
    fn test_posref() {
        assert_eq!(
            kinds("9:1"),
            vec![TokenKind::PosRef { bar: 9, beat: 1 }, TokenKind::Eof]
        );
        // spaced colon stays a plain colon
        assert_eq!(
            kinds("9 : 1"),
            vec![TokenKind::Int(9), TokenKind::Colon, TokenKind::Int(1), TokenKind::Eof]
        );
    }

    #[test]
    fn test_pitches() {
        assert_eq!(kinds("C4"), vec![TokenKind::Pitch(60), TokenKind::Eof]);
        assert_eq!(kinds("F#3"), vec![TokenKind::Pitch(54), TokenKind::Eof]);
        assert_eq!(kinds("Bb-1"), vec![TokenKind::Pitch(10), TokenKind::Eof]);
        assert_eq!(kinds("C##5"), vec![TokenKind::Pitch(74), TokenKind::Eof]);
    }

    #[test]
    fn test_pitch_falls_through_to_ident() {
        // followed by an identifier character: not a pitch
        assert_eq!(
            kinds("C4x"),
            vec![TokenKind::Ident("C4x".to_string()), TokenKind::Eof]
        );
        assert_eq!(
            kinds("Count"),
            vec![TokenKind::Ident("Count".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_pitch_minus_is_greedy() {
        // `C-1` is a pitch literal, not subtraction
        assert_eq!(kinds("C-1"), vec![TokenKind::Pitch(0), TokenKind::Eof]);
    }

    #[test]
    fn test_durations() {
        assert_eq!(
            kinds("q"),
            vec![TokenKind::Dur { den: 4, dots: 0 }, TokenKind::Eof]
        );
        assert_eq!(
            kinds("e."),
            vec![TokenKind::Dur { den: 8, dots: 1 }, TokenKind::Eof]
        );
        assert_eq!(
            kinds("w h q e s t x"),
            vec![
                TokenKind::Dur { den: 1, dots: 0 },
                TokenKind::Dur { den: 2, dots: 0 },
                TokenKind::Dur { den: 4, dots: 0 },
                TokenKind::Dur { den: 8, dots: 0 },
                TokenKind::Dur { den: 16, dots: 0 },
                TokenKind::Dur { den: 32, dots: 0 },
                TokenKind::Dur { den: 64, dots: 0 },
                TokenKind::Eof
            ]
        );
        // duration letter followed by ident chars is an identifier
        assert_eq!(
            kinds("quarterly"),
            vec![TokenKind::Ident("quarterly".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(
            kinds(r#""hi\n\t\"there\"""#),
            vec![TokenKind::Str("hi\n\t\"there\"".to_string()), TokenKind::Eof]
        );
        assert_eq!(
            kinds(r#""\x41""#),
            vec![TokenKind::Str("A".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_unknown_escape_warns_and_passes_through() {
        let (tokens, warnings) = tokenize(r#""a\qb""#, None).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Str("a\\qb".to_string()));
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, Code::UnknownEscape);
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("\"oops", None).unwrap_err();
        assert_eq!(err.code, Code::LexError);
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn test_template_segments() {
        let got = kinds("`a${x}b${y}c`");
        assert_eq!(
            got,
            vec![
                TokenKind::TemplateHead("a".to_string()),
                TokenKind::Ident("x".to_string()),
                TokenKind::TemplateMiddle("b".to_string()),
                TokenKind::Ident("y".to_string()),
                TokenKind::TemplateTail("c".to_string()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_template_with_nested_braces() {
        let got = kinds("`v=${ {a: 1}.a }!`");
        assert_eq!(got[0], TokenKind::TemplateHead("v=".to_string()));
        assert_eq!(*got.last().unwrap(), TokenKind::Eof);
        assert_eq!(got[got.len() - 2], TokenKind::TemplateTail("!".to_string()));
    }

    #[test]
    fn test_template_without_interpolation_is_string() {
        assert_eq!(
            kinds("`plain`"),
            vec![TokenKind::Str("plain".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("a |> b ?? c ?. d ... .. ."),
            vec![
                TokenKind::Ident("a".to_string()),
                TokenKind::Pipe,
                TokenKind::Ident("b".to_string()),
                TokenKind::Coalesce,
                TokenKind::Ident("c".to_string()),
                TokenKind::QuestionDot,
                TokenKind::Ident("d".to_string()),
                TokenKind::Ellipsis,
                TokenKind::DotDot,
                TokenKind::Dot,
                TokenKind::Eof
            ]
        );
        assert_eq!(
            kinds("-> => == != <= >="),
            vec![
                TokenKind::Arrow,
                TokenKind::FatArrow,
                TokenKind::EqEq,
                TokenKind::NotEq,
                TokenKind::Le,
                TokenKind::Ge,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_comments() {
        assert_eq!(
            kinds("1 // line\n/* block\nstill */ 2"),
            vec![TokenKind::Int(1), TokenKind::Int(2), TokenKind::Eof]
        );
    }

    #[test]
    fn test_unterminated_block_comment() {
        assert!(tokenize("/* never ends", None).is_err());
    }

    #[test]
    fn test_keywords_vs_idents() {
        assert_eq!(
            kinds("score tempo fanfare"),
            vec![
                TokenKind::Keyword(Keyword::Score),
                TokenKind::Keyword(Keyword::Tempo),
                TokenKind::Ident("fanfare".to_string()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_unexpected_character() {
        let err = tokenize("@", None).unwrap_err();
        assert_eq!(err.code, Code::LexError);
        assert!(err.message.contains('@'));
    }

    #[test]
    fn test_line_and_column_tracking() {
        let (tokens, _) = tokenize("a\n  b", None).unwrap();
        assert_eq!(tokens[0].span.start, Pos::new(1, 1));
        assert_eq!(tokens[1].span.start, Pos::new(2, 3));
    }
}
