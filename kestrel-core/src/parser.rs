// This module converts tokens (from the tokenizer) into datums: the same
// Values programs manipulate as data. The expander turns datums into AST.
//
// Literals go through the runtime's constructors, so a literal 5 or #\a is
// the canonical memoized instance, and symbols are interned.

use num_bigint::BigInt;
use num_rational::BigRational;

use crate::interpreter::Runtime;
use crate::tokenizer::{SourcePos, Token, TokenKind, tokenize};
use crate::value::Value;

// RUST CONCEPT: Error types
// Separate from RuntimeError because reading happens before execution;
// RuntimeError::Read wraps it through #[from].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("unexpected `{token}` at {pos}")]
    UnexpectedToken { token: String, pos: SourcePos },

    #[error("unexpected end of input")]
    UnexpectedEndOfInput,

    #[error("mismatched brackets: `{found}` at {pos} does not close `{open}`")]
    MismatchedBrackets {
        open: char,
        found: char,
        pos: SourcePos,
    },

    #[error("invalid number `{text}` at {pos}")]
    InvalidNumber { text: String, pos: SourcePos },

    #[error("{message} at {pos}")]
    BadSyntax { message: String, pos: SourcePos },
}

fn closer_for(open: char) -> char {
    if open == '[' { ']' } else { ')' }
}

struct Parser<'r> {
    tokens: Vec<Token>,
    index: usize,
    rt: &'r mut Runtime,
}

impl<'r> Parser<'r> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index)
    }

    fn next(&mut self) -> Result<Token, ParseError> {
        let token = self
            .tokens
            .get(self.index)
            .cloned()
            .ok_or(ParseError::UnexpectedEndOfInput)?;
        self.index += 1;
        Ok(token)
    }

    // `#;` discards the datum that follows it
    fn skip_datum_comments(&mut self) -> Result<(), ParseError> {
        while matches!(self.peek(), Some(t) if t.kind == TokenKind::DatumComment) {
            self.index += 1;
            self.parse_datum()?;
        }
        Ok(())
    }

    fn parse_datum(&mut self) -> Result<Value, ParseError> {
        self.skip_datum_comments()?;
        let token = self.next()?;
        let pos = token.pos;
        match token.kind {
            TokenKind::Open(open) => self.parse_list(open),
            TokenKind::VectorOpen => self.parse_vector(),
            TokenKind::Quote => {
                let quoted = self.parse_datum()?;
                let quote = self.rt.symbol_value("quote");
                Ok(self.rt.list(vec![quote, quoted]))
            }
            TokenKind::Integer(text) => match text.parse::<i64>() {
                Ok(n) => Ok(self.rt.fixnum(n)),
                Err(_) => text
                    .parse::<BigInt>()
                    .map(Value::integer)
                    .map_err(|_| ParseError::InvalidNumber { text, pos }),
            },
            TokenKind::Rational(n, d) => {
                let (Ok(numer), Ok(denom)) = (n.parse::<BigInt>(), d.parse::<BigInt>()) else {
                    return Err(ParseError::InvalidNumber {
                        text: format!("{}/{}", n, d),
                        pos,
                    });
                };
                Ok(Value::rational(BigRational::new(numer, denom)))
            }
            TokenKind::Float(f) => Ok(self.rt.flonum(f)),
            TokenKind::Complex(re, im) => Ok(self.rt.complex(re, im)),
            TokenKind::Boolean(b) => Ok(Value::Bool(b)),
            TokenKind::Char(c) => Ok(self.rt.char(c)),
            TokenKind::Keyword(name) => Ok(Value::Keyword(self.rt.keyword(&name))),
            TokenKind::String(text) => Ok(Value::immutable_string(&text)),
            TokenKind::Bytes(bytes) => Ok(Value::bytes(bytes, true)),
            TokenKind::Symbol(name) => Ok(self.rt.symbol_value(&name)),
            kind @ (TokenKind::Close(_) | TokenKind::Dot | TokenKind::DatumComment) => {
                Err(ParseError::UnexpectedToken {
                    token: kind.to_string(),
                    pos,
                })
            }
        }
    }

    // RUST CONCEPT: Building a list back to front
    // Elements are collected into a Vec, then folded into pairs with the
    // optional dotted tail as the seed.
    fn parse_list(&mut self, open: char) -> Result<Value, ParseError> {
        let mut items = Vec::new();
        let mut tail = Value::Null;
        loop {
            self.skip_datum_comments()?;
            let token = self.peek().cloned().ok_or(ParseError::UnexpectedEndOfInput)?;
            match token.kind {
                TokenKind::Close(close) => {
                    self.index += 1;
                    if close != closer_for(open) {
                        return Err(ParseError::MismatchedBrackets {
                            open,
                            found: close,
                            pos: token.pos,
                        });
                    }
                    break;
                }
                TokenKind::Dot => {
                    if items.is_empty() {
                        return Err(ParseError::UnexpectedToken {
                            token: ".".to_string(),
                            pos: token.pos,
                        });
                    }
                    self.index += 1;
                    tail = self.parse_datum()?;
                    self.skip_datum_comments()?;
                    let close = self.next()?;
                    match close.kind {
                        TokenKind::Close(c) if c == closer_for(open) => break,
                        TokenKind::Close(c) => {
                            return Err(ParseError::MismatchedBrackets {
                                open,
                                found: c,
                                pos: close.pos,
                            });
                        }
                        other => {
                            return Err(ParseError::UnexpectedToken {
                                token: other.to_string(),
                                pos: close.pos,
                            });
                        }
                    }
                }
                _ => items.push(self.parse_datum()?),
            }
        }
        Ok(Value::list_with(items, tail, self.rt.config.cons_specialization))
    }

    fn parse_vector(&mut self) -> Result<Value, ParseError> {
        let mut items = Vec::new();
        loop {
            self.skip_datum_comments()?;
            let token = self.peek().cloned().ok_or(ParseError::UnexpectedEndOfInput)?;
            match token.kind {
                TokenKind::Close(')') => {
                    self.index += 1;
                    break;
                }
                TokenKind::Close(found) => {
                    return Err(ParseError::MismatchedBrackets {
                        open: '(',
                        found,
                        pos: token.pos,
                    });
                }
                _ => items.push(self.parse_datum()?),
            }
        }
        // vector literals are immutable
        Ok(self.rt.immutable_vector(items))
    }
}

// RUST CONCEPT: Public functions
// Main entry point: takes source text, returns every top-level datum
pub fn parse(input: &str, rt: &mut Runtime) -> Result<Vec<Value>, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, index: 0, rt };
    let mut results = Vec::new();

    loop {
        parser.skip_datum_comments()?;
        if parser.peek().is_none() {
            break;
        }
        results.push(parser.parse_datum()?);
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equal::eq;

    fn read_one(input: &str) -> Value {
        let mut rt = Runtime::new();
        let mut data = parse(input, &mut rt).unwrap();
        assert_eq!(data.len(), 1, "Expected one datum from {:?}", input);
        data.remove(0)
    }

    #[test]
    fn test_parse_lists() {
        assert_eq!(read_one("(1 2 3)").to_string(), "(1 2 3)");
        assert_eq!(read_one("[a (b) ()]").to_string(), "(a (b) ())");
        assert_eq!(read_one("(1 . 2)").to_string(), "(1 . 2)");
        assert_eq!(read_one("(1 2 . 3)").to_string(), "(1 2 . 3)");
    }

    #[test]
    fn test_parse_quote() {
        assert_eq!(read_one("'x").to_string(), "(quote x)");
        assert_eq!(read_one("'(1 'b)").to_string(), "(quote (1 (quote b)))");
    }

    #[test]
    fn test_parse_atoms() {
        assert_eq!(read_one("#t").to_string(), "#t");
        assert_eq!(read_one("\"hi\\n\"").to_string(), "\"hi\\n\"");
        assert_eq!(read_one("#\\space").to_string(), "#\\space");
        assert_eq!(read_one("#:key").to_string(), "#:key");
        assert_eq!(read_one("6/4").to_string(), "3/2");
        assert_eq!(read_one("4/2").to_string(), "2");
        assert_eq!(read_one("123456789012345678901234567890").to_string(), "123456789012345678901234567890");
        assert_eq!(read_one("#(1 2)").to_string(), "#(1 2)");
    }

    #[test]
    fn test_literals_are_canonical() {
        let mut rt = Runtime::new();
        let data = parse("(x 5 #\\a) (x 5 #\\a)", &mut rt).unwrap();
        let first = data[0].list_to_vec().unwrap();
        let second = data[1].list_to_vec().unwrap();
        for (a, b) in first.iter().zip(&second) {
            assert!(a.ptr_eq(b), "Expected identical instances for {}", a);
            assert!(eq(a, b));
        }
    }

    #[test]
    fn test_string_literals_are_immutable() {
        assert!(read_one("\"abc\"").is_immutable());
        assert!(read_one("#(1)").is_immutable());
    }

    #[test]
    fn test_datum_comments() {
        let mut rt = Runtime::new();
        let data = parse("#;(ignored) 1 (2 #;3 4) #;5", &mut rt).unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[1].to_string(), "(2 4)");
    }

    #[test]
    fn test_parse_errors() {
        let mut rt = Runtime::new();

        let result = parse("(1 2", &mut rt);
        assert!(matches!(result, Err(ParseError::UnexpectedEndOfInput)), "Expected end of input, got {:?}", result);

        let result = parse("(1 2]", &mut rt);
        assert!(
            matches!(result, Err(ParseError::MismatchedBrackets { open: '(', found: ']', .. })),
            "Expected MismatchedBrackets, got {:?}",
            result
        );

        let result = parse(")", &mut rt);
        assert!(matches!(result, Err(ParseError::UnexpectedToken { .. })), "Expected UnexpectedToken, got {:?}", result);

        let result = parse("(. 1)", &mut rt);
        assert!(matches!(result, Err(ParseError::UnexpectedToken { .. })), "Expected UnexpectedToken, got {:?}", result);
    }

    #[test]
    fn test_error_message_carries_position() {
        let mut rt = Runtime::new();
        let err = parse("(a\n  b]", &mut rt).unwrap_err();
        assert_eq!(err.to_string(), "mismatched brackets: `]` at 2:4 does not close `(`");
    }
}
