//! Text filter parser.
//!
//! Supports expressions like:
//! - `Sector = 'Energy'`
//! - `Price > 10 and Price <= 99.5`
//! - `Sector in ['Energy', 'Finance']`
//! - `Symbol starts 'AA' or Symbol not starts 'B'`
//! - `(Sector != 'Finance') and IPO not in ['n/a']`

use crate::error::{GridError, Result};
use crate::filter::Filter;
use crate::value::ColumnValue;

/// Turns filter text into a filter AST
pub trait FilterParser {
    fn parse(&self, text: &str) -> Result<Filter>;
}

/// Default parser for the text syntax above
#[derive(Debug, Clone, Copy, Default)]
pub struct TextFilterParser;

impl FilterParser for TextFilterParser {
    fn parse(&self, text: &str) -> Result<Filter> {
        parse_filter(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Null,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    In,
    Starts,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Eof,
}

struct Lexer {
    input: Vec<char>,
    pos: usize,
}

impl Lexer {
    fn new(input: &str) -> Self {
        Lexer {
            input: input.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek();
        self.pos += 1;
        c
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.advance();
        }
    }

    fn read_while(&mut self, accept: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if !accept(c) {
                break;
            }
            out.push(c);
            self.advance();
        }
        out
    }

    fn read_number(&mut self, negative: bool) -> Result<Token> {
        let digits = self.read_while(|c| c.is_ascii_digit() || c == '.');
        let sign = if negative { -1.0 } else { 1.0 };
        if digits.contains('.') {
            digits
                .parse::<f64>()
                .map(|f| Token::Float(sign * f))
                .map_err(|_| GridError::Parse(format!("Invalid number: {}", digits)))
        } else {
            digits
                .parse::<i64>()
                .map(|n| Token::Int(if negative { -n } else { n }))
                .map_err(|_| GridError::Parse(format!("Invalid number: {}", digits)))
        }
    }

    fn read_string(&mut self, quote: char) -> Result<Token> {
        self.advance();
        let mut s = String::new();
        while let Some(c) = self.advance() {
            match c {
                c if c == quote => return Ok(Token::String(s)),
                '\\' => {
                    if let Some(escaped) = self.advance() {
                        s.push(escaped);
                    }
                }
                c => s.push(c),
            }
        }
        Err(GridError::Parse("Unterminated string".to_string()))
    }

    fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace();

        let c = match self.peek() {
            None => return Ok(Token::Eof),
            Some(c) => c,
        };

        let two = |lexer: &mut Lexer, single: Token, double: Token| {
            lexer.advance();
            if lexer.peek() == Some('=') {
                lexer.advance();
                double
            } else {
                single
            }
        };

        match c {
            '(' => { self.advance(); Ok(Token::LParen) }
            ')' => { self.advance(); Ok(Token::RParen) }
            '[' => { self.advance(); Ok(Token::LBracket) }
            ']' => { self.advance(); Ok(Token::RBracket) }
            ',' => { self.advance(); Ok(Token::Comma) }
            '=' => Ok(two(self, Token::Eq, Token::Eq)),
            '<' => Ok(two(self, Token::Lt, Token::Le)),
            '>' => Ok(two(self, Token::Gt, Token::Ge)),
            '!' => match two(self, Token::Not, Token::Ne) {
                Token::Ne => Ok(Token::Ne),
                _ => Ok(Token::Not),
            },
            '\'' | '"' => self.read_string(c),
            '-' if matches!(self.input.get(self.pos + 1), Some(d) if d.is_ascii_digit()) => {
                self.advance();
                self.read_number(true)
            }
            _ if c.is_ascii_digit() => self.read_number(false),
            _ if c.is_alphabetic() || c == '_' => {
                let ident = self.read_while(|c| c.is_alphanumeric() || c == '_' || c == '.');
                Ok(match ident.to_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "in" => Token::In,
                    "starts" => Token::Starts,
                    "null" => Token::Null,
                    "true" => Token::Bool(true),
                    "false" => Token::Bool(false),
                    _ => Token::Ident(ident),
                })
            }
            _ => Err(GridError::Parse(format!("Unexpected character: {}", c))),
        }
    }
}

struct Parser {
    lexer: Lexer,
    current: Token,
}

impl Parser {
    fn new(input: &str) -> Result<Self> {
        let mut lexer = Lexer::new(input);
        let current = lexer.next_token()?;
        Ok(Parser { lexer, current })
    }

    fn advance(&mut self) -> Result<()> {
        self.current = self.lexer.next_token()?;
        Ok(())
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        if &self.current == expected {
            self.advance()
        } else {
            Err(GridError::Parse(format!(
                "Expected {:?}, got {:?}",
                expected, self.current
            )))
        }
    }

    fn parse_or(&mut self) -> Result<Filter> {
        let mut terms = vec![self.parse_and()?];
        while self.current == Token::Or {
            self.advance()?;
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Filter::Or { filters: terms }
        })
    }

    fn parse_and(&mut self) -> Result<Filter> {
        let mut terms = vec![self.parse_term()?];
        while self.current == Token::And {
            self.advance()?;
            terms.push(self.parse_term()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Filter::And { filters: terms }
        })
    }

    fn parse_literal(&mut self) -> Result<ColumnValue> {
        let value = match &self.current {
            Token::Int(n) => ColumnValue::Int64(*n),
            Token::Float(f) => ColumnValue::Float64(*f),
            Token::String(s) => ColumnValue::String(s.clone()),
            Token::Bool(b) => ColumnValue::Bool(*b),
            Token::Null => ColumnValue::Null,
            Token::Ident(s) => ColumnValue::String(s.clone()),
            other => {
                return Err(GridError::Parse(format!("Expected literal value, got {:?}", other)))
            }
        };
        self.advance()?;
        Ok(value)
    }

    fn parse_list(&mut self) -> Result<Vec<ColumnValue>> {
        self.expect(&Token::LBracket)?;
        let mut values = Vec::new();
        while self.current != Token::RBracket {
            values.push(self.parse_literal()?);
            if self.current == Token::Comma {
                self.advance()?;
            } else if self.current != Token::RBracket {
                return Err(GridError::Parse(format!(
                    "Expected ',' or ']', got {:?}",
                    self.current
                )));
            }
        }
        self.advance()?;
        Ok(values)
    }

    fn parse_prefix(&mut self) -> Result<String> {
        match self.parse_literal()? {
            ColumnValue::Null => Err(GridError::Parse("starts requires a prefix".to_string())),
            other => Ok(other.to_key()),
        }
    }

    fn parse_term(&mut self) -> Result<Filter> {
        if self.current == Token::LParen {
            self.advance()?;
            let filter = self.parse_or()?;
            self.expect(&Token::RParen)?;
            return Ok(filter);
        }

        let column = match &self.current {
            Token::Ident(name) => name.clone(),
            Token::String(name) => name.clone(),
            other => {
                return Err(GridError::Parse(format!("Expected column name, got {:?}", other)))
            }
        };
        self.advance()?;

        let op = self.current.clone();
        self.advance()?;
        match op {
            Token::Eq => Ok(Filter::Eq { column, value: self.parse_literal()? }),
            Token::Ne => Ok(Filter::NotIn { column, values: vec![self.parse_literal()?] }),
            Token::Gt => Ok(Filter::Gt { column, value: self.parse_literal()? }),
            Token::Ge => Ok(Filter::Ge { column, value: self.parse_literal()? }),
            Token::Lt => Ok(Filter::Lt { column, value: self.parse_literal()? }),
            Token::Le => Ok(Filter::Le { column, value: self.parse_literal()? }),
            Token::In => Ok(Filter::In { column, values: self.parse_list()? }),
            Token::Starts => Ok(Filter::StartsWith { column, value: self.parse_prefix()? }),
            Token::Not => {
                let negated = self.current.clone();
                self.advance()?;
                match negated {
                    Token::In => Ok(Filter::NotIn { column, values: self.parse_list()? }),
                    Token::Starts => Ok(Filter::NotStartsWith { column, value: self.parse_prefix()? }),
                    other => Err(GridError::Parse(format!(
                        "Expected 'in' or 'starts' after 'not', got {:?}",
                        other
                    ))),
                }
            }
            other => Err(GridError::Parse(format!(
                "Expected comparison operator, got {:?}",
                other
            ))),
        }
    }
}

/// Parse filter text into a filter AST.
pub fn parse_filter(input: &str) -> Result<Filter> {
    let mut parser = Parser::new(input)?;
    let filter = parser.parse_or()?;

    if parser.current != Token::Eof {
        return Err(GridError::Parse(format!(
            "Unexpected token after expression: {:?}",
            parser.current
        )));
    }

    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_comparison() {
        assert_eq!(
            parse_filter("Price > 10").unwrap(),
            Filter::Gt { column: "Price".into(), value: ColumnValue::Int64(10) }
        );
        assert_eq!(
            parse_filter("Sector = 'Energy'").unwrap(),
            Filter::Eq { column: "Sector".into(), value: "Energy".into() }
        );
        assert_eq!(
            parse_filter("Price <= -2.5").unwrap(),
            Filter::Le { column: "Price".into(), value: ColumnValue::Float64(-2.5) }
        );
    }

    #[test]
    fn test_in_and_starts() {
        assert_eq!(
            parse_filter("Sector in ['Energy', \"Finance\"]").unwrap(),
            Filter::is_in("Sector", vec!["Energy".into(), "Finance".into()])
        );
        assert_eq!(
            parse_filter("Sector not in []").unwrap(),
            Filter::not_in("Sector", vec![])
        );
        assert_eq!(
            parse_filter("Symbol NOT STARTS 'AA'").unwrap(),
            Filter::NotStartsWith { column: "Symbol".into(), value: "AA".into() }
        );
        assert_eq!(
            parse_filter("Symbol != 'X'").unwrap(),
            Filter::not_in("Symbol", vec!["X".into()])
        );
    }

    #[test]
    fn test_precedence_and_parentheses() {
        let filter = parse_filter("a = 1 or b = 2 and c = 3").unwrap();
        match filter {
            Filter::Or { filters } => {
                assert_eq!(filters.len(), 2);
                assert!(matches!(&filters[1], Filter::And { filters } if filters.len() == 2));
            }
            other => panic!("expected OR, got {:?}", other),
        }

        let filter = parse_filter("(a = 1 or b = 2) and c starts 'x'").unwrap();
        assert!(matches!(filter, Filter::And { ref filters } if matches!(filters[0], Filter::Or { .. })));
    }

    #[test]
    fn test_errors() {
        assert!(parse_filter("").is_err());
        assert!(parse_filter("a >").is_err());
        assert!(parse_filter("a = 'open").is_err());
        assert!(parse_filter("a = 1 b").is_err());
        assert!(parse_filter("a not = 1").is_err());
    }
}
