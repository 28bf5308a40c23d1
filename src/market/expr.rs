//! Arithmetic for derived custom prices.
//!
//! An expression such as `"{Divine Orb} / 10 + 2"` has every `{Name}` token
//! replaced with a chaos value, and the remaining text is evaluated with
//! `+ - * /`, unary minus and parentheses.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    #[error("unknown price reference {{{0}}}")]
    UnknownName(String),
    #[error("unterminated token starting at byte {0}")]
    UnterminatedToken(usize),
    #[error("unexpected character '{ch}' at byte {pos}")]
    UnexpectedChar { ch: char, pos: usize },
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("trailing input at byte {0}")]
    TrailingInput(usize),
}

/// Replace every `{Name}` with `lookup(Name)`.
pub fn substitute<F>(expression: &str, mut lookup: F) -> Result<String, ExprError>
where
    F: FnMut(&str) -> Option<f64>,
{
    let mut out = String::with_capacity(expression.len());
    let mut rest = expression;
    let mut offset = 0;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or(ExprError::UnterminatedToken(offset + open))?;
        let name = after[..close].trim();
        let value = lookup(name).ok_or_else(|| ExprError::UnknownName(name.to_string()))?;
        out.push_str(&format!("({value})"));
        let consumed = open + 1 + close + 1;
        rest = &rest[consumed..];
        offset += consumed;
    }
    out.push_str(rest);
    Ok(out)
}

/// Substitute tokens from a name -> value table and evaluate.
pub fn evaluate_with(
    expression: &str,
    values: &BTreeMap<String, f64>,
) -> Result<f64, ExprError> {
    let text = substitute(expression, |name| values.get(name).copied())?;
    evaluate(&text)
}

/// Evaluate a token-free arithmetic expression.
pub fn evaluate(text: &str) -> Result<f64, ExprError> {
    let mut parser = Parser {
        src: text.as_bytes(),
        pos: 0,
    };
    let value = parser.expr()?;
    parser.skip_ws();
    if parser.pos < parser.src.len() {
        return Err(ExprError::TrailingInput(parser.pos));
    }
    Ok(value)
}

struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn skip_ws(&mut self) {
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.src.get(self.pos).copied()
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<f64, ExprError> {
        let mut acc = self.term()?;
        while let Some(op @ (b'+' | b'-')) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            acc = if op == b'+' { acc + rhs } else { acc - rhs };
        }
        Ok(acc)
    }

    // term := factor (('*' | '/') factor)*
    fn term(&mut self) -> Result<f64, ExprError> {
        let mut acc = self.factor()?;
        while let Some(op @ (b'*' | b'/')) = self.peek() {
            self.pos += 1;
            let rhs = self.factor()?;
            if op == b'*' {
                acc *= rhs;
            } else {
                if rhs == 0.0 {
                    return Err(ExprError::DivisionByZero);
                }
                acc /= rhs;
            }
        }
        Ok(acc)
    }

    // factor := '-' factor | '(' expr ')' | number
    fn factor(&mut self) -> Result<f64, ExprError> {
        match self.peek() {
            None => Err(ExprError::UnexpectedEnd),
            Some(b'-') => {
                self.pos += 1;
                Ok(-self.factor()?)
            }
            Some(b'+') => {
                self.pos += 1;
                self.factor()
            }
            Some(b'(') => {
                self.pos += 1;
                let value = self.expr()?;
                match self.peek() {
                    Some(b')') => {
                        self.pos += 1;
                        Ok(value)
                    }
                    Some(other) => Err(ExprError::UnexpectedChar {
                        ch: other as char,
                        pos: self.pos,
                    }),
                    None => Err(ExprError::UnexpectedEnd),
                }
            }
            Some(c) if c.is_ascii_digit() || c == b'.' => self.number(),
            Some(other) => Err(ExprError::UnexpectedChar {
                ch: other as char,
                pos: self.pos,
            }),
        }
    }

    fn number(&mut self) -> Result<f64, ExprError> {
        let start = self.pos;
        while self.pos < self.src.len() {
            let c = self.src[self.pos];
            let exponent_sign = (c == b'-' || c == b'+')
                && self.pos > start
                && matches!(self.src[self.pos - 1], b'e' | b'E');
            if c.is_ascii_digit() || c == b'.' || c == b'e' || c == b'E' || exponent_sign {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        text.parse::<f64>()
            .map_err(|_| ExprError::InvalidNumber(text))
    }
}
