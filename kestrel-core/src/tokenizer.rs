// Tokenizer for the reader, with complete position tracking

use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

use crate::parser::ParseError;

// RUST CONCEPT: Source position for rich error messages
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourcePos {
    pub line: usize,
    pub column: usize,
    pub offset: usize, // Byte offset from start of input
}

impl SourcePos {
    pub fn new(line: usize, column: usize, offset: usize) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

// RUST CONCEPT: Token with embedded source position
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: SourcePos,
    pub end_pos: SourcePos,
}

impl Token {
    pub fn new(kind: TokenKind, pos: SourcePos, end_pos: SourcePos) -> Self {
        Self { kind, pos, end_pos }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Open(char),  // ( or [
    Close(char), // ) or ]
    VectorOpen,  // #(
    Quote,
    Dot,
    DatumComment, // #;
    Integer(String),
    Rational(String, String),
    Float(f64),
    Complex(f64, f64),
    Boolean(bool),
    Char(char),
    Keyword(String),
    String(String),
    Bytes(Vec<u8>),
    Symbol(String),
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Open(c) | TokenKind::Close(c) => write!(f, "{}", c),
            TokenKind::VectorOpen => write!(f, "#("),
            TokenKind::Quote => write!(f, "'"),
            TokenKind::Dot => write!(f, "."),
            TokenKind::DatumComment => write!(f, "#;"),
            TokenKind::Integer(s) => write!(f, "{}", s),
            TokenKind::Rational(n, d) => write!(f, "{}/{}", n, d),
            TokenKind::Float(n) => write!(f, "{}", n),
            TokenKind::Complex(re, im) => write!(f, "{}{:+}i", re, im),
            TokenKind::Boolean(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
            TokenKind::Char(c) => write!(f, "#\\{}", c),
            TokenKind::Keyword(s) => write!(f, "#:{}", s),
            TokenKind::String(s) => write!(f, "{:?}", s),
            TokenKind::Bytes(b) => write!(f, "#\"{}\"", String::from_utf8_lossy(b)),
            TokenKind::Symbol(s) => write!(f, "{}", s),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

fn is_delimiter(ch: char) -> bool {
    ch.is_whitespace() || "()[]\";'".contains(ch)
}

// RUST CONCEPT: Cursor struct instead of threading &mut counters everywhere
struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
    column: usize,
    offset: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            line: 1,
            column: 1,
            offset: 0,
        }
    }

    fn pos(&self) -> SourcePos {
        SourcePos::new(self.line, self.column, self.offset)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.chars.next()?;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        self.offset += ch.len_utf8();
        Some(ch)
    }

    // Collects characters up to the next delimiter
    fn read_atom(&mut self, mut text: String) -> String {
        while let Some(ch) = self.peek() {
            if is_delimiter(ch) {
                break;
            }
            text.push(ch);
            self.bump();
        }
        text
    }

    fn read_escape(&mut self, start: SourcePos) -> Result<char, ParseError> {
        match self.bump() {
            Some('n') => Ok('\n'),
            Some('t') => Ok('\t'),
            Some('r') => Ok('\r'),
            Some('0') => Ok('\0'),
            Some('a') => Ok('\u{7}'),
            Some('\\') => Ok('\\'),
            Some('"') => Ok('"'),
            Some(other) => Err(ParseError::BadSyntax {
                message: format!("unknown escape sequence \\{}", other),
                pos: start,
            }),
            None => Err(ParseError::UnexpectedEndOfInput),
        }
    }

    fn read_string(&mut self, start: SourcePos) -> Result<String, ParseError> {
        let mut text = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(text),
                Some('\\') => text.push(self.read_escape(start)?),
                Some(ch) => text.push(ch),
                None => return Err(ParseError::UnexpectedEndOfInput),
            }
        }
    }

    fn read_char(&mut self, start: SourcePos) -> Result<char, ParseError> {
        let first = self.bump().ok_or(ParseError::UnexpectedEndOfInput)?;
        if !first.is_alphabetic() || self.peek().is_none_or(is_delimiter) {
            return Ok(first);
        }
        let name = self.read_atom(first.to_string());
        match name.as_str() {
            "space" => Ok(' '),
            "newline" | "linefeed" => Ok('\n'),
            "tab" => Ok('\t'),
            "return" => Ok('\r'),
            "nul" | "null" => Ok('\0'),
            _ => Err(ParseError::BadSyntax {
                message: format!("bad character constant #\\{}", name),
                pos: start,
            }),
        }
    }

    // Everything after '#'
    fn read_hash(&mut self, start: SourcePos) -> Result<Option<TokenKind>, ParseError> {
        match self.peek() {
            Some('(') => {
                self.bump();
                Ok(Some(TokenKind::VectorOpen))
            }
            Some(';') => {
                self.bump();
                Ok(Some(TokenKind::DatumComment))
            }
            Some('\\') => {
                self.bump();
                Ok(Some(TokenKind::Char(self.read_char(start)?)))
            }
            Some('"') => {
                self.bump();
                Ok(Some(TokenKind::Bytes(self.read_string(start)?.into_bytes())))
            }
            Some(':') => {
                self.bump();
                Ok(Some(TokenKind::Keyword(self.read_atom(String::new()))))
            }
            Some('|') => {
                // block comment, nests
                self.bump();
                let mut depth = 1;
                while depth > 0 {
                    match self.bump() {
                        Some('|') if self.peek() == Some('#') => {
                            self.bump();
                            depth -= 1;
                        }
                        Some('#') if self.peek() == Some('|') => {
                            self.bump();
                            depth += 1;
                        }
                        Some(_) => {}
                        None => return Err(ParseError::UnexpectedEndOfInput),
                    }
                }
                Ok(None)
            }
            _ => {
                let text = self.read_atom(String::new());
                match text.as_str() {
                    "t" | "true" => Ok(Some(TokenKind::Boolean(true))),
                    "f" | "false" => Ok(Some(TokenKind::Boolean(false))),
                    _ => Err(ParseError::BadSyntax {
                        message: format!("bad syntax `#{}`", text),
                        pos: start,
                    }),
                }
            }
        }
    }
}

fn is_integer_text(s: &str) -> bool {
    let digits = s.strip_prefix(['+', '-']).unwrap_or(s);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

fn parse_real(s: &str) -> Option<f64> {
    match s {
        "+inf.0" => return Some(f64::INFINITY),
        "-inf.0" => return Some(f64::NEG_INFINITY),
        "+nan.0" | "-nan.0" => return Some(f64::NAN),
        _ => {}
    }
    // Rust also accepts "inf" and "NaN"; a real literal needs a digit
    if !s.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    if is_integer_text(s) {
        return s.parse::<i64>().ok().map(|i| i as f64).or_else(|| s.parse().ok());
    }
    s.parse::<f64>().ok()
}

// RUST CONCEPT: Classify atom-like strings into number or symbol tokens
fn classify_atom(s: String) -> Result<TokenKind, String> {
    if s == "." {
        return Ok(TokenKind::Dot);
    }
    if is_integer_text(&s) {
        return Ok(TokenKind::Integer(s));
    }

    // Rational (e.g., 3/4, -1/2)
    if let Some((n, d)) = s.split_once('/')
        && is_integer_text(n)
        && d.chars().all(|c| c.is_ascii_digit())
        && !d.is_empty()
    {
        if d.chars().all(|c| c == '0') {
            return Err(s);
        }
        return Ok(TokenKind::Rational(n.to_string(), d.to_string()));
    }

    // Inexact complex (e.g., 1.0+2.0i, -3i)
    if let Some(body) = s.strip_suffix('i')
        && body.chars().any(|c| c.is_ascii_digit())
    {
        let split = body
            .char_indices()
            .skip(1)
            .filter(|&(i, c)| (c == '+' || c == '-') && !body[..i].ends_with(['e', 'E']))
            .map(|(i, _)| i)
            .last();
        match split {
            Some(i) => {
                let imag = &body[i..];
                let imag = if imag.len() == 1 { format!("{}1", imag) } else { imag.to_string() };
                if let (Some(re), Some(im)) = (parse_real(&body[..i]), parse_real(&imag)) {
                    return Ok(TokenKind::Complex(re, im));
                }
            }
            None if body.starts_with(['+', '-']) => {
                if let Some(im) = parse_real(body) {
                    return Ok(TokenKind::Complex(0.0, im));
                }
            }
            None => {}
        }
    }

    if let Some(f) = parse_real(&s) {
        return Ok(TokenKind::Float(f));
    }

    Ok(TokenKind::Symbol(s))
}

pub fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut lexer = Lexer::new(input);

    while let Some(ch) = lexer.peek() {
        let start = lexer.pos();

        let kind = match ch {
            c if c.is_whitespace() => {
                lexer.bump();
                None
            }

            ';' => {
                // Skip comments - consume everything until newline
                while let Some(c) = lexer.bump() {
                    if c == '\n' {
                        break;
                    }
                }
                None
            }

            '(' | '[' => {
                lexer.bump();
                Some(TokenKind::Open(ch))
            }

            ')' | ']' => {
                lexer.bump();
                Some(TokenKind::Close(ch))
            }

            '\'' => {
                lexer.bump();
                Some(TokenKind::Quote)
            }

            '"' => {
                lexer.bump();
                Some(TokenKind::String(lexer.read_string(start)?))
            }

            '#' => {
                lexer.bump();
                lexer.read_hash(start)?
            }

            _ => {
                let atom = lexer.read_atom(String::new());
                Some(classify_atom(atom).map_err(|text| ParseError::InvalidNumber {
                    text,
                    pos: start,
                })?)
            }
        };

        if let Some(kind) = kind {
            tokens.push(Token::new(kind, start, lexer.pos()));
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_tokenize_numbers() {
        let tokens = tokenize("42").unwrap();
        assert_eq!(tokens.len(), 1);
        assert!(matches!(&tokens[0].kind, TokenKind::Integer(s) if s == "42"));
        assert_eq!(tokens[0].pos.line, 1);
        assert_eq!(tokens[0].pos.column, 1);

        assert_eq!(kinds("3.14"), vec![TokenKind::Float(3.14)]);
        assert_eq!(kinds("-17"), vec![TokenKind::Integer("-17".to_string())]);
        assert_eq!(kinds("3/4"), vec![TokenKind::Rational("3".to_string(), "4".to_string())]);
        assert_eq!(kinds("1.0+2.0i"), vec![TokenKind::Complex(1.0, 2.0)]);
        assert_eq!(kinds("-2i"), vec![TokenKind::Complex(0.0, -2.0)]);
        assert_eq!(kinds("1e3"), vec![TokenKind::Float(1000.0)]);
    }

    #[test]
    fn test_number_lookalikes_are_symbols() {
        assert_eq!(kinds("+"), vec![TokenKind::Symbol("+".to_string())]);
        assert_eq!(kinds("..."), vec![TokenKind::Symbol("...".to_string())]);
        assert_eq!(kinds("inf"), vec![TokenKind::Symbol("inf".to_string())]);
        assert_eq!(kinds("1+"), vec![TokenKind::Symbol("1+".to_string())]);
        assert_eq!(kinds("set-car!"), vec![TokenKind::Symbol("set-car!".to_string())]);
    }

    #[test]
    fn test_zero_denominator_is_invalid() {
        let result = tokenize("1/0");
        assert!(matches!(result, Err(ParseError::InvalidNumber { .. })), "Expected InvalidNumber, got {:?}", result);
    }

    #[test]
    fn test_tokenize_strings_and_escapes() {
        assert_eq!(kinds(r#""a\nb\"c""#), vec![TokenKind::String("a\nb\"c".to_string())]);
        assert_eq!(kinds(r#"#"hi""#), vec![TokenKind::Bytes(b"hi".to_vec())]);

        let result = tokenize("\"open");
        assert!(matches!(result, Err(ParseError::UnexpectedEndOfInput)), "Expected end of input, got {:?}", result);
    }

    #[test]
    fn test_tokenize_hash_forms() {
        assert_eq!(
            kinds("#t #false #\\a #\\space #\\( #:key #( #;"),
            vec![
                TokenKind::Boolean(true),
                TokenKind::Boolean(false),
                TokenKind::Char('a'),
                TokenKind::Char(' '),
                TokenKind::Char('('),
                TokenKind::Keyword("key".to_string()),
                TokenKind::VectorOpen,
                TokenKind::DatumComment,
            ]
        );
        assert!(tokenize("#\\bogus").is_err());
    }

    #[test]
    fn test_tokenize_brackets_and_dot() {
        assert_eq!(
            kinds("[a . b)"),
            vec![
                TokenKind::Open('['),
                TokenKind::Symbol("a".to_string()),
                TokenKind::Dot,
                TokenKind::Symbol("b".to_string()),
                TokenKind::Close(')'),
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            kinds("1 ; rest of line\n #| block #| nested |# |# 2"),
            vec![TokenKind::Integer("1".to_string()), TokenKind::Integer("2".to_string())]
        );
    }

    #[test]
    fn test_tokenize_position_tracking() {
        let tokens = tokenize("hello\n  world").unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].pos, SourcePos::new(1, 1, 0));
        assert_eq!(tokens[1].pos.line, 2);
        assert_eq!(tokens[1].pos.column, 3);
        assert_eq!(tokens[1].end_pos.offset, 13);
    }
}
