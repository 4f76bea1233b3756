//! Operator-precedence parser for expression text.
//!
//! Two stacks are kept: operands (where `None` stands for the missing left
//! operand of a prefix operator) and operators, seeded with a level-0
//! sentinel so the stack is never empty while parsing.

use super::func::Func;
use super::Node;
use crate::value::Value;

#[derive(Debug, Clone, Copy)]
struct Op {
    symbol: &'static str,
    level: u8,
    func: Option<Func>,
}

const SENTINEL: Op = Op {
    symbol: "",
    level: 0,
    func: None,
};

// Longer symbols first so `>=` wins over `>`.
const OPERATORS: [Op; 17] = [
    op("||", 2, Some(Func::Or)),
    op("&&", 3, Some(Func::And)),
    op(">=", 4, Some(Func::Ge)),
    op("<=", 4, Some(Func::Le)),
    op("==", 4, Some(Func::Eq)),
    op("!=", 4, Some(Func::Ne)),
    op("~~", 4, Some(Func::Match)),
    op("(", 1, None),
    op(")", 1, None),
    op(">", 4, Some(Func::Gt)),
    op("<", 4, Some(Func::Lt)),
    op("+", 5, Some(Func::Add)),
    op("-", 5, Some(Func::Sub)),
    op("*", 6, Some(Func::Mul)),
    op("/", 6, Some(Func::Div)),
    op("%", 7, Some(Func::Mod)),
    op("!", 7, Some(Func::Not)),
];

const fn op(symbol: &'static str, level: u8, func: Option<Func>) -> Op {
    Op { symbol, level, func }
}

fn operator_at(chars: &[char], pos: usize) -> Option<Op> {
    OPERATORS.into_iter().find(|o| {
        o.symbol
            .chars()
            .enumerate()
            .all(|(i, c)| chars.get(pos + i) == Some(&c))
    })
}

/// Parses expression text into a node tree.
pub(super) fn parse(text: &str) -> Result<Node, String> {
    let chars: Vec<char> = text.chars().collect();
    Parser { chars, pos: 0 }.run()
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn run(mut self) -> Result<Node, String> {
        let mut tokens: Vec<Option<Node>> = Vec::new();
        let mut ops: Vec<Op> = vec![SENTINEL];
        let mut expect_token = true;

        while expect_token || self.pos < self.chars.len() {
            if expect_token {
                let token = self.read_token()?;
                tokens.push(token);
            } else {
                self.skip_ws();
                if self.pos >= self.chars.len() {
                    break;
                }
                let Some(op) = operator_at(&self.chars, self.pos) else {
                    return Err(format!("unexpected '{}'", self.chars[self.pos]));
                };
                self.pos += op.symbol.len();
                match op.symbol {
                    "(" => {
                        if tokens.pop().flatten().is_some() {
                            return Err("unexpected '('".to_string());
                        }
                        ops.push(op);
                    }
                    ")" => {
                        loop {
                            match ops.last() {
                                Some(top) if top.symbol == "(" => break,
                                Some(top) if top.level == 0 => {
                                    return Err("unbalanced ')'".to_string())
                                }
                                _ => process(&mut tokens, &mut ops)?,
                            }
                        }
                        ops.pop();
                        expect_token = true;
                    }
                    _ => {
                        // `-` and `!` with no left operand bind to what follows.
                        let prefix = matches!(op.func, Some(Func::Sub | Func::Not))
                            && tokens.last().is_some_and(Option::is_none);
                        if !prefix {
                            while ops.last().is_some_and(|top| top.level >= op.level) {
                                process(&mut tokens, &mut ops)?;
                            }
                        }
                        ops.push(op);
                    }
                }
            }
            expect_token = !expect_token;
        }

        while ops.len() > 1 {
            if ops.last().is_some_and(|top| top.symbol == "(") {
                return Err("unbalanced '('".to_string());
            }
            process(&mut tokens, &mut ops)?;
        }

        match (tokens.pop(), tokens.is_empty()) {
            (Some(Some(node)), true) => Ok(node),
            (Some(None) | None, _) => Err("empty expression".to_string()),
            (Some(Some(_)), false) => Err("missing operator".to_string()),
        }
    }

    /// Reads an operand: a literal, a variable or a function call.
    fn read_token(&mut self) -> Result<Option<Node>, String> {
        let start = self.pos;
        let mut quote: Option<char> = None;
        let mut escaped = false;
        while self.pos < self.chars.len() {
            let c = self.chars[self.pos];
            if let Some(q) = quote {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
                self.pos += 1;
                continue;
            }
            if c == '"' || c == '\'' {
                quote = Some(c);
                self.pos += 1;
                continue;
            }
            let so_far: String = self.chars[start..self.pos].iter().collect();
            let so_far = so_far.trim();
            if c == '(' && !so_far.is_empty() {
                let name = so_far.to_string();
                self.pos += 1;
                return self.read_call(&name).map(Some);
            }
            let negative_number = c == '-'
                && so_far.is_empty()
                && self.chars.get(self.pos + 1).is_some_and(char::is_ascii_digit);
            if !negative_number && operator_at(&self.chars, self.pos).is_some() {
                break;
            }
            self.pos += 1;
        }
        if quote.is_some() {
            return Err("unterminated string".to_string());
        }
        let token: String = self.chars[start..self.pos].iter().collect();
        let token = token.trim();
        if token.is_empty() {
            return Ok(None);
        }
        literal(token).map(Some)
    }

    /// Reads call arguments after `name(` up to the matching `)`.
    fn read_call(&mut self, name: &str) -> Result<Node, String> {
        let func = Func::from_name(name).ok_or_else(|| format!("unknown function '{name}'"))?;
        let mut args = Vec::new();
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut escaped = false;
        let mut arg_start = self.pos;
        loop {
            let Some(&c) = self.chars.get(self.pos) else {
                return Err(format!("missing ')' for '{name}'"));
            };
            self.pos += 1;
            if let Some(q) = quote {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
                continue;
            }
            match c {
                '"' | '\'' => quote = Some(c),
                '(' => depth += 1,
                ')' if depth > 0 => depth -= 1,
                ',' | ')' if depth == 0 => {
                    let text: String = self.chars[arg_start..self.pos - 1].iter().collect();
                    let text = text.trim();
                    let closing = c == ')';
                    if !(closing && args.is_empty() && text.is_empty()) {
                        args.push(if text.is_empty() {
                            Node::Literal(Value::Null)
                        } else {
                            parse(text)?
                        });
                    }
                    if closing {
                        break;
                    }
                    arg_start = self.pos;
                }
                _ => {}
            }
        }

        let (min, max) = func.arity();
        if args.len() < min || max.is_some_and(|m| args.len() > m) {
            return Err(format!(
                "'{}' called with {} argument(s)",
                func.name(),
                args.len()
            ));
        }
        Ok(Node::Call { func, args })
    }

    fn skip_ws(&mut self) {
        while self.chars.get(self.pos).is_some_and(|c| c.is_whitespace()) {
            self.pos += 1;
        }
    }
}

fn process(tokens: &mut Vec<Option<Node>>, ops: &mut Vec<Op>) -> Result<(), String> {
    let op = ops.pop().ok_or("operator stack underflow")?;
    let func = op.func.ok_or("unbalanced parentheses")?;
    let right = tokens.pop().ok_or("missing operand")?;
    let left = tokens.pop().ok_or("missing operand")?;
    let node = match (left, right) {
        (_, None) => return Err(format!("missing operand after '{}'", op.symbol)),
        (None, Some(r)) if matches!(func, Func::Not | Func::Sub) => Node::Call {
            func,
            args: vec![r],
        },
        (None, Some(_)) => return Err(format!("missing operand before '{}'", op.symbol)),
        (Some(_), Some(_)) if func == Func::Not => {
            return Err("'!' takes a single operand".to_string())
        }
        (Some(l), Some(r)) => Node::Call {
            func,
            args: vec![l, r],
        },
    };
    tokens.push(Some(node));
    Ok(())
}

fn literal(token: &str) -> Result<Node, String> {
    let first = token.chars().next().unwrap_or_default();
    if first == '"' || first == '\'' {
        if token.len() < 2 || !token.ends_with(first) {
            return Err(format!("invalid literal {token}"));
        }
        return Ok(Node::Literal(Value::String(unescape(&token[1..token.len() - 1]))));
    }
    if let Some(name) = token.strip_prefix('?') {
        if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(format!("invalid variable {token}"));
        }
        return Ok(Node::Variable(name.to_string()));
    }
    Ok(Node::Literal(Value::parse_literal(token)))
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}
