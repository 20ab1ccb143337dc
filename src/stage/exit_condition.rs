//! A small expression grammar for exit-condition expressions, parsed once
//! at stage load and interpreted against a `SessionState` at each router
//! visit.
//!
//! Grammar (informal):
//!
//! ```text
//! expr      := or_expr
//! or_expr   := and_expr ( "||" and_expr )*
//! and_expr  := unary ( "&&" unary )*
//! unary     := "!" unary | cmp
//! cmp       := atom ( ("==" | "!=" | ">=" | "<=" | ">" | "<") atom )?
//! atom      := "true" | "false" | number | string | "len(" path ")" | path | "(" expr ")"
//! path      := identifier ( "." identifier )*
//! ```
//!
//! `path` resolves against `executed_agents_per_stage.<stage>` (the length
//! of the executed-roles list for that stage), `done` (bool), `stage`
//! (string), or `rewards.<role>` (number) — the fields an exit condition
//! plausibly needs. Anything else resolves to `null`, which compares equal
//! only to another `null`.

use serde_json::Value;

use crate::error::{OrchestratorError, Result};
use crate::state::SessionState;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    True,
    False,
    Number(f64),
    String(String),
    Ident(String),
    Dot,
    LParen,
    RParen,
    Bang,
    AndAnd,
    OrOr,
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else {
                    tokens.push(Token::Bang);
                    i += 1;
                }
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::AndAnd);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::OrOr);
                i += 2;
            }
            '"' | '\'' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(OrchestratorError::RouterMisconfigured("unterminated string in exit_condition".into()));
                }
                i += 1;
                tokens.push(Token::String(s));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text.parse::<f64>().map_err(|_| OrchestratorError::RouterMisconfigured(format!("bad number '{text}'")))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    _ => Token::Ident(word),
                });
            }
            other => {
                return Err(OrchestratorError::RouterMisconfigured(format!("unexpected character '{other}' in exit_condition")));
            }
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone)]
enum Expr {
    Bool(bool),
    Number(f64),
    Str(String),
    Path(Vec<String>),
    Len(Box<Expr>),
    Not(Box<Expr>),
    Cmp(Box<Expr>, CmpOp, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy)]
enum CmpOp {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect(&mut self, tok: &Token) -> Result<()> {
        match self.bump() {
            Some(t) if &t == tok => Ok(()),
            other => Err(OrchestratorError::RouterMisconfigured(format!("expected {tok:?}, got {other:?}"))),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Token::OrOr)) {
            self.bump();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        while matches!(self.peek(), Some(Token::AndAnd)) {
            self.bump();
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if matches!(self.peek(), Some(Token::Bang)) {
            self.bump();
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_cmp()
    }

    fn parse_cmp(&mut self) -> Result<Expr> {
        let left = self.parse_atom()?;
        let op = match self.peek() {
            Some(Token::Eq) => Some(CmpOp::Eq),
            Some(Token::Ne) => Some(CmpOp::Ne),
            Some(Token::Ge) => Some(CmpOp::Ge),
            Some(Token::Le) => Some(CmpOp::Le),
            Some(Token::Gt) => Some(CmpOp::Gt),
            Some(Token::Lt) => Some(CmpOp::Lt),
            _ => None,
        };
        let Some(op) = op else { return Ok(left) };
        self.bump();
        let right = self.parse_atom()?;
        Ok(Expr::Cmp(Box::new(left), op, Box::new(right)))
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        match self.bump() {
            Some(Token::True) => Ok(Expr::Bool(true)),
            Some(Token::False) => Ok(Expr::Bool(false)),
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::String(s)) => Ok(Expr::Str(s)),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) if name == "len" && matches!(self.peek(), Some(Token::LParen)) => {
                self.bump();
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(Expr::Len(Box::new(inner)))
            }
            Some(Token::Ident(name)) => {
                let mut path = vec![name];
                while matches!(self.peek(), Some(Token::Dot)) {
                    self.bump();
                    match self.bump() {
                        Some(Token::Ident(segment)) => path.push(segment),
                        other => return Err(OrchestratorError::RouterMisconfigured(format!("expected identifier after '.', got {other:?}"))),
                    }
                }
                Ok(Expr::Path(path))
            }
            other => Err(OrchestratorError::RouterMisconfigured(format!("unexpected token {other:?} in exit_condition"))),
        }
    }
}

/// A stage's `exit_condition`, compiled once at stage load.
#[derive(Debug, Clone)]
pub struct ExitCondition {
    source: String,
    expr: Expr,
}

impl ExitCondition {
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(OrchestratorError::RouterMisconfigured(format!("trailing tokens in exit_condition '{source}'")));
        }
        Ok(Self { source: source.to_string(), expr })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn eval(&self, state: &SessionState) -> Result<bool> {
        match eval_expr(&self.expr, state)? {
            Value::Bool(b) => Ok(b),
            other => Err(OrchestratorError::RouterMisconfigured(format!("exit_condition '{}' did not evaluate to a boolean, got {other}", self.source))),
        }
    }
}

fn eval_expr(expr: &Expr, state: &SessionState) -> Result<Value> {
    Ok(match expr {
        Expr::Bool(b) => Value::Bool(*b),
        Expr::Number(n) => Value::from(*n),
        Expr::Str(s) => Value::String(s.clone()),
        Expr::Path(path) => resolve_path(path, state),
        Expr::Len(inner) => {
            let value = eval_expr(inner, state)?;
            let len = match &value {
                Value::Array(a) => a.len(),
                Value::String(s) => s.chars().count(),
                Value::Object(o) => o.len(),
                Value::Null => 0,
                other => return Err(OrchestratorError::RouterMisconfigured(format!("len() on non-sized value {other}"))),
            };
            Value::from(len as f64)
        }
        Expr::Not(inner) => {
            let value = eval_expr(inner, state)?;
            match value {
                Value::Bool(b) => Value::Bool(!b),
                other => return Err(OrchestratorError::RouterMisconfigured(format!("'!' applied to non-boolean {other}"))),
            }
        }
        Expr::And(l, r) => Value::Bool(as_bool(&eval_expr(l, state)?)? && as_bool(&eval_expr(r, state)?)?),
        Expr::Or(l, r) => Value::Bool(as_bool(&eval_expr(l, state)?)? || as_bool(&eval_expr(r, state)?)?),
        Expr::Cmp(l, op, r) => Value::Bool(compare(&eval_expr(l, state)?, *op, &eval_expr(r, state)?)),
    })
}

fn as_bool(value: &Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| OrchestratorError::RouterMisconfigured(format!("expected boolean, got {value}")))
}

fn compare(left: &Value, op: CmpOp, right: &Value) -> bool {
    let ordering = match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l.partial_cmp(&r),
        _ => None,
    };
    match op {
        CmpOp::Eq => left == right,
        CmpOp::Ne => left != right,
        CmpOp::Ge => ordering.map(|o| o.is_ge()).unwrap_or(false),
        CmpOp::Le => ordering.map(|o| o.is_le()).unwrap_or(false),
        CmpOp::Gt => ordering.map(|o| o.is_gt()).unwrap_or(false),
        CmpOp::Lt => ordering.map(|o| o.is_lt()).unwrap_or(false),
    }
}

/// Resolves a dotted path against state. Supported roots:
/// `done`, `stage`, `task`, `session_id`,
/// `executed_agents_per_stage.<stage>` (the role list for that stage),
/// `rewards.<role>` (that role's numeric reward total).
/// Anything unrecognized resolves to `null`.
fn resolve_path(path: &[String], state: &SessionState) -> Value {
    match path {
        [root] => state.field(root),
        [root, key] if root == "executed_agents_per_stage" => {
            serde_json::to_value(state.executed_in(key)).unwrap_or(Value::Null)
        }
        [root, key] if root == "rewards" => state.rewards.get(key).map(|v| Value::from(*v)).unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_executed(stage: &str, roles: &[&str]) -> SessionState {
        let mut state = SessionState::new("s1", "hello", stage);
        state.executed_agents_per_stage.insert(stage.to_string(), roles.iter().map(|r| r.to_string()).collect());
        state
    }

    #[test]
    fn len_equality_on_executed_agents() {
        let cond = ExitCondition::parse("len(executed_agents_per_stage.solo) == 1").unwrap();
        let state = state_with_executed("solo", &["a1"]);
        assert!(cond.eval(&state).unwrap());
    }

    #[test]
    fn boolean_and_combinator() {
        let cond = ExitCondition::parse("len(executed_agents_per_stage.ideate) == 2 && true").unwrap();
        let state = state_with_executed("ideate", &["opt", "crit"]);
        assert!(cond.eval(&state).unwrap());
    }

    #[test]
    fn trivially_true_condition() {
        let cond = ExitCondition::parse("true").unwrap();
        let state = SessionState::new("s1", "hello", "solo");
        assert!(cond.eval(&state).unwrap());
    }

    #[test]
    fn false_literal() {
        let cond = ExitCondition::parse("false").unwrap();
        let state = SessionState::new("s1", "hello", "solo");
        assert!(!cond.eval(&state).unwrap());
    }

    #[test]
    fn rejects_malformed_expression() {
        assert!(ExitCondition::parse("len(executed_agents_per_stage.solo ==").is_err());
    }

    #[test]
    fn unknown_path_is_null_and_compares_unequal_to_number() {
        let cond = ExitCondition::parse("not_a_field == 1").unwrap();
        let state = SessionState::new("s1", "hello", "solo");
        assert!(!cond.eval(&state).unwrap());
    }
}
