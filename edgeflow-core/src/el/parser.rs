//! Template and expression parser
//!
//! Grammar accepted inside `${ ... }`:
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := '-' unary | primary
//! primary := literal | ident | ident '(' (expr (',' expr)*)? ')' | '(' expr ')'
//! literal := 'text' | "text" | number | true | false | null
//! ident   := [A-Za-z_][A-Za-z0-9_:]*
//! ```

use crate::errors::ElError;
use crate::record::Field;

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Constant value
    Literal(Field),
    /// Named variable or pipeline parameter
    Variable(String),
    /// Function call such as `record:value('/a')`
    Call {
        /// Namespaced function name
        name: String,
        /// Argument expressions
        args: Vec<Expr>,
    },
    /// Binary arithmetic or concatenation
    Binary {
        /// Operator symbol
        op: char,
        /// Left operand
        lhs: Box<Expr>,
        /// Right operand
        rhs: Box<Expr>,
    },
    /// Numeric negation
    Negate(Box<Expr>),
}

/// Piece of a template string
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Literal text outside `${}`
    Text(String),
    /// Expression inside `${}`
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Str(String),
    Int(i64),
    Float(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
    Comma,
}

/// Split a template into literal and expression segments
pub fn parse_template(template: &str) -> Result<Vec<Segment>, ElError> {
    let mut segments = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        if start > 0 {
            segments.push(Segment::Text(rest[..start].to_string()));
        }
        let body_start = start + 2;
        let body_len = find_closing_brace(&rest[body_start..]).ok_or_else(|| ElError::Syntax {
            expression: template.to_string(),
            message: "missing closing '}'".to_string(),
        })?;
        let body = &rest[body_start..body_start + body_len];
        segments.push(Segment::Expr(parse_expression(body)?));
        rest = &rest[body_start + body_len + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(rest.to_string()));
    }
    Ok(segments)
}

/// Byte offset of the `}` closing an expression body, skipping quoted text
fn find_closing_brace(body: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (idx, c) in body.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') => quote = Some(c),
            (None, '}') => return Some(idx),
            _ => {}
        }
    }
    None
}

/// Parse a bare expression (the text inside `${}`)
pub fn parse_expression(text: &str) -> Result<Expr, ElError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser {
        source: text,
        tokens,
        pos: 0,
    };
    let expr = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}

fn tokenize(text: &str) -> Result<Vec<Token>, ElError> {
    let syntax = |message: &str| ElError::Syntax {
        expression: text.to_string(),
        message: message.to_string(),
    };
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '+' | '-' | '*' | '/' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '\'' | '"' => {
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(syntax("unterminated string literal")),
                        Some('\\') if chars.get(i + 1).is_some() => {
                            value.push(chars[i + 1]);
                            i += 2;
                        }
                        Some(&q) if q == c => {
                            i += 1;
                            break;
                        }
                        Some(&other) => {
                            value.push(other);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                if literal.contains('.') {
                    let value = literal.parse().map_err(|_| syntax("invalid number"))?;
                    tokens.push(Token::Float(value));
                } else {
                    let value = literal.parse().map_err(|_| syntax("invalid number"))?;
                    tokens.push(Token::Int(value));
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == ':') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => return Err(syntax(&format!("unexpected character '{}'", c))),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, message: &str) -> ElError {
        ElError::Syntax {
            expression: self.source.to_string(),
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> Result<Expr, ElError> {
        let mut lhs = self.term()?;
        while let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            if op != '+' && op != '-' {
                break;
            }
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, ElError> {
        let mut lhs = self.unary()?;
        while let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            if op != '*' && op != '/' {
                break;
            }
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ElError> {
        if let Some(Token::Op('-')) = self.peek() {
            self.pos += 1;
            return Ok(Expr::Negate(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ElError> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Expr::Literal(Field::Text(s))),
            Some(Token::Int(i)) => Ok(Expr::Literal(Field::Integer(i))),
            Some(Token::Float(f)) => Ok(Expr::Literal(Field::Float(f))),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.error("expected ')'")),
                }
            }
            Some(Token::Ident(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.pos += 1;
                    let args = self.arguments()?;
                    return Ok(Expr::Call { name, args });
                }
                Ok(match name.as_str() {
                    "true" => Expr::Literal(Field::Boolean(true)),
                    "false" => Expr::Literal(Field::Boolean(false)),
                    "null" => Expr::Literal(Field::Null),
                    _ => Expr::Variable(name),
                })
            }
            Some(_) => Err(self.error("unexpected token")),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ElError> {
        let mut args = Vec::new();
        if let Some(Token::RParen) = self.peek() {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                _ => return Err(self.error("expected ',' or ')'")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_segments() {
        let segments = parse_template("http://${host}/x").unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0], Segment::Text("http://".into()));
        assert_eq!(segments[1], Segment::Expr(Expr::Variable("host".into())));
        assert_eq!(segments[2], Segment::Text("/x".into()));
    }

    #[test]
    fn test_brace_inside_string_literal() {
        let segments = parse_template("${'}'}").unwrap();
        assert_eq!(segments, vec![Segment::Expr(Expr::Literal(Field::from("}")))]);
    }

    #[test]
    fn test_call_with_concat() {
        let expr = parse_expression("url + \"?a=\" + record:value('/a')").unwrap();
        match expr {
            Expr::Binary { op: '+', rhs, .. } => {
                assert_eq!(
                    *rhs,
                    Expr::Call {
                        name: "record:value".into(),
                        args: vec![Expr::Literal(Field::from("/a"))],
                    }
                );
            }
            other => panic!("unexpected tree {:?}", other),
        }
    }

    #[test]
    fn test_precedence() {
        let expr = parse_expression("1 + 2 * 3").unwrap();
        assert!(matches!(expr, Expr::Binary { op: '+', .. }));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse_template("${unclosed").is_err());
        assert!(parse_expression("a +").is_err());
        assert!(parse_expression("f(1").is_err());
        assert!(parse_expression("'open").is_err());
    }
}
