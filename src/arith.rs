//! 算術展開 `$(( ))` の評価器。
//!
//! C 風の符号付き 64 ビット整数演算。オーバーフローは折り返し（wrapping）で、
//! 異常終了はしない。`&&`、`||`、`?:` は評価しない側の副作用（代入、ゼロ除算）を起こさない。

use thiserror::Error;

/// 変数の値が式である場合に再帰評価する深さの上限。
const MAX_RECURSION: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArithError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("{0}: invalid number")]
    InvalidNumber(String),
    #[error("{0}")]
    Assign(String),
    #[error("{0}: expression recursion level exceeded")]
    Recursion(String),
}

/// 評価器から見た変数ストア。
pub trait Variables {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&mut self, name: &str, value: i64) -> Result<(), String>;
}

/// 式を評価する。空の式は 0。
pub fn evaluate(expr: &str, vars: &mut dyn Variables) -> Result<i64, ArithError> {
    evaluate_at(expr, vars, 0)
}

fn evaluate_at(expr: &str, vars: &mut dyn Variables, depth: usize) -> Result<i64, ArithError> {
    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return Ok(0);
    }
    let mut p = Evaluator { tokens, pos: 0, vars, depth };
    let value = p.comma(false)?;
    match p.peek() {
        None => Ok(value),
        Some(t) => Err(ArithError::Syntax(format!("unexpected `{}`", t.text()))),
    }
}

/// 整数リテラルを解釈する。`0x` は 16 進、先頭 `0` は 8 進。
pub fn parse_number(text: &str) -> Option<i64> {
    let (neg, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let value = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()? as i64
    } else if body.len() > 1 && body.starts_with('0') {
        u64::from_str_radix(&body[1..], 8).ok()? as i64
    } else {
        body.parse::<u64>().ok()? as i64
    };
    Some(if neg { value.wrapping_neg() } else { value })
}

// ── 字句解析 ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(i64),
    Name(String),
    Op(&'static str),
}

impl Tok {
    fn text(&self) -> String {
        match self {
            Tok::Num(n) => n.to_string(),
            Tok::Name(s) => s.clone(),
            Tok::Op(op) => op.to_string(),
        }
    }
}

/// 長いものから順に並べる（最長一致）。
const OPERATORS: &[&str] = &[
    "<<=", ">>=", "**", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "++", "--", "+=", "-=",
    "*=", "/=", "%=", "&=", "^=", "|=", "+", "-", "*", "/", "%", "<", ">", "=", "!", "~", "&",
    "^", "|", "?", ":", "(", ")", ",",
];

fn tokenize(expr: &str) -> Result<Vec<Tok>, ArithError> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_alphanumeric() {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let n = parse_number(&text).ok_or(ArithError::InvalidNumber(text))?;
            tokens.push(Tok::Num(n));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Tok::Name(chars[start..i].iter().collect()));
        } else {
            let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
            let op = OPERATORS
                .iter()
                .find(|op| rest.starts_with(**op))
                .ok_or_else(|| ArithError::Syntax(format!("unexpected `{c}`")))?;
            // `**` は未対応
            if *op == "**" {
                return Err(ArithError::Syntax("unexpected `*`".into()));
            }
            tokens.push(Tok::Op(op));
            i += op.chars().count();
        }
    }
    Ok(tokens)
}

// ── 評価 ────────────────────────────────────────────────────────────

struct Evaluator<'a> {
    tokens: Vec<Tok>,
    pos: usize,
    vars: &'a mut dyn Variables,
    depth: usize,
}

fn bool_value(b: bool) -> i64 {
    i64::from(b)
}

impl Evaluator<'_> {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn peek_op(&self) -> Option<&'static str> {
        match self.peek() {
            Some(Tok::Op(op)) => Some(op),
            _ => None,
        }
    }

    fn eat(&mut self, op: &str) -> bool {
        if self.peek_op() == Some(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, op: &str) -> Result<(), ArithError> {
        if self.eat(op) {
            Ok(())
        } else {
            Err(ArithError::Syntax(format!("expected `{op}`")))
        }
    }

    fn variable(&mut self, name: &str, skip: bool) -> Result<i64, ArithError> {
        if skip {
            return Ok(0);
        }
        let Some(value) = self.vars.get(name) else {
            return Ok(0);
        };
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Ok(0);
        }
        if let Some(n) = parse_number(trimmed) {
            return Ok(n);
        }
        if self.depth >= MAX_RECURSION {
            return Err(ArithError::Recursion(name.to_string()));
        }
        evaluate_at(trimmed, self.vars, self.depth + 1)
    }

    fn assign(&mut self, name: &str, value: i64, skip: bool) -> Result<i64, ArithError> {
        if !skip {
            self.vars.set(name, value).map_err(ArithError::Assign)?;
        }
        Ok(value)
    }

    fn comma(&mut self, skip: bool) -> Result<i64, ArithError> {
        let mut value = self.assignment(skip)?;
        while self.eat(",") {
            value = self.assignment(skip)?;
        }
        Ok(value)
    }

    fn assignment(&mut self, skip: bool) -> Result<i64, ArithError> {
        if let (Some(Tok::Name(name)), Some(Tok::Op(op))) =
            (self.tokens.get(self.pos).cloned(), self.tokens.get(self.pos + 1).cloned())
        {
            let compound = match op {
                "=" => Some(None),
                "+=" | "-=" | "*=" | "/=" | "%=" | "<<=" | ">>=" | "&=" | "^=" | "|=" => {
                    Some(Some(&op[..op.len() - 1]))
                }
                _ => None,
            };
            if let Some(binop) = compound {
                self.pos += 2;
                let rhs = self.assignment(skip)?;
                let value = match binop {
                    None => rhs,
                    Some(binop) => {
                        let current = self.variable(&name, skip)?;
                        apply_binary(binop, current, rhs, skip)?
                    }
                };
                return self.assign(&name, value, skip);
            }
        }
        self.ternary(skip)
    }

    fn ternary(&mut self, skip: bool) -> Result<i64, ArithError> {
        let cond = self.logical_or(skip)?;
        if !self.eat("?") {
            return Ok(cond);
        }
        let then = self.comma(skip || cond == 0)?;
        self.expect(":")?;
        let otherwise = self.ternary(skip || cond != 0)?;
        Ok(if cond != 0 { then } else { otherwise })
    }

    fn logical_or(&mut self, skip: bool) -> Result<i64, ArithError> {
        let mut value = self.logical_and(skip)?;
        while self.eat("||") {
            let rhs = self.logical_and(skip || value != 0)?;
            value = bool_value(value != 0 || rhs != 0);
        }
        Ok(value)
    }

    fn logical_and(&mut self, skip: bool) -> Result<i64, ArithError> {
        let mut value = self.binary_level(0, skip)?;
        while self.eat("&&") {
            let rhs = self.binary_level(0, skip || value == 0)?;
            value = bool_value(value != 0 && rhs != 0);
        }
        Ok(value)
    }

    /// `|` から `*` までの左結合二項演算子。レベルが上がるほど優先度が高い。
    fn binary_level(&mut self, level: usize, skip: bool) -> Result<i64, ArithError> {
        const LEVELS: &[&[&str]] = &[
            &["|"],
            &["^"],
            &["&"],
            &["==", "!="],
            &["<", "<=", ">", ">="],
            &["<<", ">>"],
            &["+", "-"],
            &["*", "/", "%"],
        ];
        if level == LEVELS.len() {
            return self.unary(skip);
        }
        let mut value = self.binary_level(level + 1, skip)?;
        while let Some(op) = self.peek_op().filter(|op| LEVELS[level].contains(op)) {
            self.pos += 1;
            let rhs = self.binary_level(level + 1, skip)?;
            value = apply_binary(op, value, rhs, skip)?;
        }
        Ok(value)
    }

    fn unary(&mut self, skip: bool) -> Result<i64, ArithError> {
        match self.peek_op() {
            Some("+") => {
                self.pos += 1;
                self.unary(skip)
            }
            Some("-") => {
                self.pos += 1;
                Ok(self.unary(skip)?.wrapping_neg())
            }
            Some("!") => {
                self.pos += 1;
                Ok(bool_value(self.unary(skip)? == 0))
            }
            Some("~") => {
                self.pos += 1;
                Ok(!self.unary(skip)?)
            }
            Some(op @ ("++" | "--")) => {
                self.pos += 1;
                let Some(Tok::Name(name)) = self.peek().cloned() else {
                    return Err(ArithError::Syntax(format!("`{op}` requires a variable")));
                };
                self.pos += 1;
                let current = self.variable(&name, skip)?;
                let value = if op == "++" { current.wrapping_add(1) } else { current.wrapping_sub(1) };
                self.assign(&name, value, skip)
            }
            _ => self.postfix(skip),
        }
    }

    fn postfix(&mut self, skip: bool) -> Result<i64, ArithError> {
        match self.peek().cloned() {
            Some(Tok::Num(n)) => {
                self.pos += 1;
                Ok(n)
            }
            Some(Tok::Name(name)) => {
                self.pos += 1;
                let current = self.variable(&name, skip)?;
                match self.peek_op() {
                    Some(op @ ("++" | "--")) => {
                        self.pos += 1;
                        let value =
                            if op == "++" { current.wrapping_add(1) } else { current.wrapping_sub(1) };
                        self.assign(&name, value, skip)?;
                        Ok(current)
                    }
                    _ => Ok(current),
                }
            }
            Some(Tok::Op("(")) => {
                self.pos += 1;
                let value = self.comma(skip)?;
                self.expect(")")?;
                Ok(value)
            }
            Some(t) => Err(ArithError::Syntax(format!("unexpected `{}`", t.text()))),
            None => Err(ArithError::Syntax("unexpected end of expression".into())),
        }
    }
}

fn apply_binary(op: &str, a: i64, b: i64, skip: bool) -> Result<i64, ArithError> {
    Ok(match op {
        "|" => a | b,
        "^" => a ^ b,
        "&" => a & b,
        "==" => bool_value(a == b),
        "!=" => bool_value(a != b),
        "<" => bool_value(a < b),
        "<=" => bool_value(a <= b),
        ">" => bool_value(a > b),
        ">=" => bool_value(a >= b),
        "<<" => a.wrapping_shl(b as u32),
        ">>" => a.wrapping_shr(b as u32),
        "+" => a.wrapping_add(b),
        "-" => a.wrapping_sub(b),
        "*" => a.wrapping_mul(b),
        "/" | "%" if b == 0 => {
            if skip {
                0
            } else {
                return Err(ArithError::DivisionByZero);
            }
        }
        "/" => a.wrapping_div(b),
        "%" => a.wrapping_rem(b),
        _ => return Err(ArithError::Syntax(format!("unknown operator `{op}`"))),
    })
}
