//! Column expressions for row filters and computed capacities.
//!
//! Targets tables use a small boolean and arithmetic grammar:
//! `zone_id == 1 and persons > 2`, `non_residential_sqft / 250`,
//! `(building_type == 'HS') | ~vacant`.

use crate::domain::model::{Table, Value};
use crate::utils::error::{Result, SpandexError};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(Value),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Column(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) {
            let mut is_float = false;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                is_float |= chars[i] == '.';
                i += 1;
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                is_float = true;
                i += 1;
                if i < chars.len() && (chars[i] == '+' || chars[i] == '-') {
                    i += 1;
                }
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let text: String = chars[start..i].iter().collect();
            let value = if is_float {
                text.parse::<f64>().map(Value::Float).ok()
            } else {
                text.parse::<i64>().map(Value::Int).ok()
            }
            .ok_or_else(|| {
                SpandexError::expression(format!("invalid number '{}' at position {}", text, start))
            })?;
            tokens.push((start, Token::Number(value)));
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            let token = match word.as_str() {
                "and" => Token::Op("and"),
                "or" => Token::Op("or"),
                "not" => Token::Op("not"),
                _ => Token::Ident(word),
            };
            tokens.push((start, token));
            continue;
        }
        if c == '\'' || c == '"' {
            i += 1;
            let mut text = String::new();
            while i < chars.len() && chars[i] != c {
                text.push(chars[i]);
                i += 1;
            }
            if i == chars.len() {
                return Err(SpandexError::expression(format!(
                    "unterminated string starting at position {}",
                    start
                )));
            }
            i += 1;
            tokens.push((start, Token::Str(text)));
            continue;
        }
        let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
        let op = match two.as_str() {
            "==" => Some("=="),
            "!=" => Some("!="),
            "<=" => Some("<="),
            ">=" => Some(">="),
            _ => None,
        };
        if let Some(op) = op {
            tokens.push((start, Token::Op(op)));
            i += 2;
            continue;
        }
        let token = match c {
            '(' => Token::LParen,
            ')' => Token::RParen,
            '+' => Token::Op("+"),
            '-' => Token::Op("-"),
            '*' => Token::Op("*"),
            '/' => Token::Op("/"),
            '<' => Token::Op("<"),
            '>' => Token::Op(">"),
            '&' => Token::Op("and"),
            '|' => Token::Op("or"),
            '~' => Token::Op("not"),
            other => {
                return Err(SpandexError::expression(format!(
                    "unexpected character '{}' at position {}",
                    other, start
                )))
            }
        };
        tokens.push((start, token));
        i += 1;
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    source_len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(o, _)| *o)
            .unwrap_or(self.source_len)
    }

    fn eat_op(&mut self, ops: &[&'static str]) -> Option<&'static str> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_op(&["or"]).is_some() {
            let right = self.parse_and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_not()?;
        while self.eat_op(&["and"]).is_some() {
            let right = self.parse_not()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.eat_op(&["not"]).is_some() {
            let inner = self.parse_not()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let left = self.parse_additive()?;
        if let Some(op) = self.eat_op(&["==", "!=", "<", "<=", ">", ">="]) {
            let right = self.parse_additive()?;
            let op = match op {
                "==" => BinaryOp::Eq,
                "!=" => BinaryOp::Ne,
                "<" => BinaryOp::Lt,
                "<=" => BinaryOp::Le,
                ">" => BinaryOp::Gt,
                _ => BinaryOp::Ge,
            };
            return Ok(Expr::Binary(op, Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;
        while let Some(op) = self.eat_op(&["+", "-"]) {
            let right = self.parse_multiplicative()?;
            let op = if op == "+" { BinaryOp::Add } else { BinaryOp::Sub };
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        while let Some(op) = self.eat_op(&["*", "/"]) {
            let right = self.parse_unary()?;
            let op = if op == "*" { BinaryOp::Mul } else { BinaryOp::Div };
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.eat_op(&["-"]).is_some() {
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(inner)));
        }
        if self.eat_op(&["not"]).is_some() {
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        let offset = self.offset();
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        match token {
            Some(Token::Number(v)) => Ok(Expr::Literal(v)),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
            Some(Token::Ident(name)) => Ok(match name.as_str() {
                "True" | "true" => Expr::Literal(Value::Bool(true)),
                "False" | "false" => Expr::Literal(Value::Bool(false)),
                "None" | "nan" | "NaN" => Expr::Literal(Value::Null),
                _ => Expr::Column(name),
            }),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.peek() {
                    Some(Token::RParen) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    _ => Err(SpandexError::expression(format!(
                        "expected ')' at position {}",
                        self.offset()
                    ))),
                }
            }
            Some(other) => Err(SpandexError::expression(format!(
                "unexpected {:?} at position {}",
                other, offset
            ))),
            None => Err(SpandexError::expression(format!(
                "unexpected end of expression at position {}",
                offset
            ))),
        }
    }
}

/// Parse an expression string.
pub fn parse(input: &str) -> Result<Expr> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(SpandexError::expression("empty expression"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        source_len: input.chars().count(),
    };
    let expr = parser.parse_or()?;
    if parser.pos < parser.tokens.len() {
        return Err(SpandexError::expression(format!(
            "unexpected trailing input at position {} in '{}'",
            parser.offset(),
            input
        )));
    }
    Ok(expr)
}

fn compare(a: &Value, b: &Value) -> Result<Option<Ordering>> {
    if a.is_null() || b.is_null() {
        return Ok(None);
    }
    let numeric = |v: &Value| match v {
        Value::Bool(x) => Some(*x as i64 as f64),
        other => other.as_f64(),
    };
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(Some(x.cmp(y))),
        (Value::Str(_), _) | (_, Value::Str(_)) => Err(SpandexError::expression(format!(
            "cannot compare {} '{}' with {} '{}'",
            a.type_name(),
            a,
            b.type_name(),
            b
        ))),
        _ => match (numeric(a), numeric(b)) {
            (Some(x), Some(y)) => Ok(x.partial_cmp(&y)),
            _ => Ok(None),
        },
    }
}

fn arithmetic(op: BinaryOp, a: &Value, b: &Value) -> Result<Value> {
    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }
    if let (Value::Int(x), Value::Int(y)) = (a, b) {
        let exact = match op {
            BinaryOp::Add => x.checked_add(*y),
            BinaryOp::Sub => x.checked_sub(*y),
            BinaryOp::Mul => x.checked_mul(*y),
            _ => None,
        };
        if let Some(v) = exact {
            return Ok(Value::Int(v));
        }
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => Ok(Value::Float(match op {
            BinaryOp::Add => x + y,
            BinaryOp::Sub => x - y,
            BinaryOp::Mul => x * y,
            _ => x / y,
        })),
        _ => Err(SpandexError::expression(format!(
            "unsupported operand types for {:?}: {} and {}",
            op,
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn logical(value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        v if v.is_null() => Ok(false),
        other => Err(SpandexError::expression(format!(
            "expected a boolean, found {} '{}'",
            other.type_name(),
            other
        ))),
    }
}

impl Expr {
    /// Evaluate against every row of the table.
    pub fn eval(&self, table: &Table) -> Result<Vec<Value>> {
        let n = table.len();
        match self {
            Expr::Literal(v) => Ok(vec![v.clone(); n]),
            Expr::Column(name) => table
                .column(name)
                .map(<[Value]>::to_vec)
                .map_err(|_| SpandexError::expression(format!("undefined column '{}'", name))),
            Expr::Unary(op, inner) => {
                let values = inner.eval(table)?;
                values
                    .into_iter()
                    .map(|v| match op {
                        UnaryOp::Not => Ok(Value::Bool(!logical(&v)?)),
                        UnaryOp::Neg => match v {
                            Value::Int(i) => Ok(i
                                .checked_neg()
                                .map(Value::Int)
                                .unwrap_or(Value::Float(-(i as f64)))),
                            Value::Float(f) => Ok(Value::Float(-f)),
                            Value::Null => Ok(Value::Null),
                            other => Err(SpandexError::expression(format!(
                                "cannot negate {} '{}'",
                                other.type_name(),
                                other
                            ))),
                        },
                    })
                    .collect()
            }
            Expr::Binary(op, left, right) => {
                let lhs = left.eval(table)?;
                let rhs = right.eval(table)?;
                lhs.iter()
                    .zip(rhs.iter())
                    .map(|(a, b)| match op {
                        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                            arithmetic(*op, a, b)
                        }
                        BinaryOp::And => Ok(Value::Bool(logical(a)? && logical(b)?)),
                        BinaryOp::Or => Ok(Value::Bool(logical(a)? || logical(b)?)),
                        BinaryOp::Eq | BinaryOp::Ne => {
                            let ordering = match (a, b) {
                                (Value::Str(_), Value::Str(_)) => compare(a, b)?,
                                (Value::Str(_), _) | (_, Value::Str(_)) => {
                                    Some(Ordering::Less).filter(|_| !a.is_null() && !b.is_null())
                                }
                                _ => compare(a, b)?,
                            };
                            Ok(Value::Bool(match (op, ordering) {
                                (BinaryOp::Ne, None) => true,
                                (_, None) => false,
                                (BinaryOp::Eq, Some(o)) => o == Ordering::Equal,
                                (_, Some(o)) => o != Ordering::Equal,
                            }))
                        }
                        _ => {
                            let ordering = compare(a, b)?;
                            Ok(Value::Bool(match ordering {
                                None => false,
                                Some(o) => match op {
                                    BinaryOp::Lt => o == Ordering::Less,
                                    BinaryOp::Le => o != Ordering::Greater,
                                    BinaryOp::Gt => o == Ordering::Greater,
                                    _ => o != Ordering::Less,
                                },
                            }))
                        }
                    })
                    .collect()
            }
        }
    }

    /// Column names referenced by the expression.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Column(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Expr::Unary(_, inner) => inner.collect_columns(out),
            Expr::Binary(_, l, r) => {
                l.collect_columns(out);
                r.collect_columns(out);
            }
        }
    }
}

/// Evaluate an expression string to one value per row.
pub fn eval_column(table: &Table, expr: &str) -> Result<Vec<Value>> {
    parse(expr)?.eval(table)
}

/// Evaluate a predicate string to a row mask. Null results count as false.
pub fn eval_mask(table: &Table, expr: &str) -> Result<Vec<bool>> {
    eval_column(table, expr)?
        .iter()
        .map(|v| {
            logical(v).map_err(|_| {
                SpandexError::expression(format!("filter '{}' does not evaluate to booleans", expr))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn households() -> Table {
        Table::from_columns(vec![
            ("tract_id", vec![7.into(), 7.into(), 8.into(), Value::Null]),
            ("num_workers", vec![1.into(), 3.into(), 4.into(), 2.into()]),
            ("tenure", vec!["own".into(), "rent".into(), "rent".into(), "own".into()]),
            ("sqft", vec![1000.into(), 1500.5.into(), 0.into(), 750.into()]),
        ])
        .unwrap()
    }

    #[test]
    fn test_comparison_and_boolean_ops() {
        let table = households();
        let mask = eval_mask(&table, "tract_id == 7 and num_workers > 2").unwrap();
        assert_eq!(mask, vec![false, true, false, false]);

        let mask = eval_mask(&table, "(tenure == 'own') | ~(num_workers < 4)").unwrap();
        assert_eq!(mask, vec![true, false, true, true]);

        let mask = eval_mask(&table, "not tract_id == 7").unwrap();
        assert_eq!(mask, vec![false, false, true, true]);
    }

    #[test]
    fn test_null_comparisons() {
        let table = households();
        let mask = eval_mask(&table, "tract_id != 7").unwrap();
        assert_eq!(mask, vec![false, false, true, true]);
        assert_eq!(mask, eval_mask(&table, "not tract_id == 7").unwrap());

        assert_eq!(eval_mask(&table, "tract_id == 8").unwrap(), vec![false, false, true, false]);
        assert_eq!(eval_mask(&table, "tract_id < 9").unwrap(), vec![true, true, true, false]);
        assert_eq!(eval_mask(&table, "tract_id >= 0").unwrap(), vec![true, true, true, false]);
    }

    #[test]
    fn test_negating_min_int_widens_to_float() {
        let table = Table::from_columns(vec![("v", vec![Value::Int(i64::MIN), Value::Int(5)])]).unwrap();
        let values = eval_column(&table, "-v").unwrap();
        assert_eq!(values, vec![Value::Float(9223372036854775808.0), Value::Int(-5)]);
    }

    #[test]
    fn test_arithmetic_precedence_and_division() {
        let table = households();
        let values = eval_column(&table, "sqft / 250 + num_workers * 2").unwrap();
        assert_eq!(values[0], Value::Float(6.0));
        assert_eq!(values[2], Value::Float(8.0));

        let values = eval_column(&table, "-num_workers + 10").unwrap();
        assert_eq!(values[1], Value::Int(7));

        let values = eval_column(&table, "num_workers / 0").unwrap();
        assert_eq!(values[0], Value::Float(f64::INFINITY));
    }

    #[test]
    fn test_string_number_equality_is_false() {
        let table = households();
        let mask = eval_mask(&table, "tenure == 1").unwrap();
        assert_eq!(mask, vec![false; 4]);
        assert!(eval_mask(&table, "tenure > 1").is_err());
    }

    #[test]
    fn test_errors() {
        let table = households();
        assert!(matches!(
            eval_column(&table, "persons > 1"),
            Err(SpandexError::ExpressionError { .. })
        ));
        assert!(parse("a == ").is_err());
        assert!(parse("(a == 1").is_err());
        assert!(parse("a == 'x").is_err());
        assert!(parse("a $ 1").is_err());
        assert!(eval_mask(&table, "sqft * 2").is_err());
    }

    #[test]
    fn test_referenced_columns() {
        let expr = parse("a + b * a > c").unwrap();
        assert_eq!(expr.columns(), vec!["a", "b", "c"]);
    }
}
