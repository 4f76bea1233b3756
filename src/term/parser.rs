//! Text syntax for terms.
//!
//! ```text
//! ?Name            variable         _            anonymous variable
//! "text" 'text'    string           12  -3  2.5  numbers
//! 01:30:00         time span        true false   booleans
//! ident            string atom      f(a, K: b)   compound, named args
//! [a, b | ?T]      list             {x <Name>}   expression template
//! ```

use std::sync::Arc;

use crate::error::SyntaxError;
use crate::expression::Expression;
use crate::value::Value;

use super::{Argument, CompoundTerm, Term, Variable};

/// Maps variable names of one clause to binding slots.
///
/// Every occurrence of `_` gets its own slot.
#[derive(Debug, Clone, Default)]
pub struct VarTable {
    names: Vec<Arc<str>>,
}

impl VarTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the slot for `name`, allocating one on first use.
    pub fn index_of(&mut self, name: &str) -> usize {
        if name != "_" {
            if let Some(i) = self.lookup(name) {
                return i;
            }
        }
        self.names.push(Arc::from(name));
        self.names.len() - 1
    }

    /// Slot of `name`; `_` never has one.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<usize> {
        if name == "_" {
            return None;
        }
        self.names.iter().position(|n| &**n == name)
    }

    /// Builds the variable term for `name`.
    pub fn variable(&mut self, name: &str) -> Variable {
        let index = self.index_of(name);
        Variable::new(Arc::clone(&self.names[index]), index)
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True when no variable has been seen.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Name of the variable in slot `index`.
    #[must_use]
    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(|n| &**n)
    }

    /// Iterates named (non-anonymous) variables with their slots.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.names
            .iter()
            .enumerate()
            .filter(|(_, n)| &***n != "_")
            .map(|(i, n)| (i, &**n))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Recursive-descent parser over a single term.
pub struct TermParser<'a> {
    chars: Vec<char>,
    pos: usize,
    vars: &'a mut VarTable,
}

impl<'a> TermParser<'a> {
    /// A parser over `text` recording variables into `vars`.
    pub fn new(text: &str, vars: &'a mut VarTable) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
            vars,
        }
    }

    /// Parses one term and requires the input to end after it.
    pub fn parse_complete(&mut self) -> Result<Term, SyntaxError> {
        let term = self.parse_term()?;
        self.skip_ws();
        if let Some(c) = self.peek() {
            return Err(self.error(format!("unexpected '{c}' after term")));
        }
        Ok(term)
    }

    /// Parses one term, leaving the rest of the input.
    pub fn parse_term(&mut self) -> Result<Term, SyntaxError> {
        self.skip_ws();
        let Some(c) = self.peek() else {
            return Err(self.error("unexpected end of input"));
        };
        match c {
            '?' => {
                self.pos += 1;
                let name = self.read_ident();
                if name.is_empty() {
                    return Err(self.error("variable name expected after '?'"));
                }
                Ok(Term::Variable(self.vars.variable(&name)))
            }
            '_' if !self.peek_at(1).is_some_and(is_ident_char) => {
                self.pos += 1;
                Ok(Term::Variable(self.vars.variable("_")))
            }
            '"' | '\'' => Ok(Term::Constant(Value::String(self.read_quoted(c)?))),
            '[' => self.parse_list(),
            '{' => self.parse_template(),
            '-' | '0'..='9' => self.parse_number(),
            c if is_ident_start(c) => {
                let ident = self.read_ident();
                self.skip_ws();
                if self.peek() == Some('(') {
                    self.pos += 1;
                    let args = self.parse_args()?;
                    return Ok(Term::compound(CompoundTerm::new(ident, args)));
                }
                Ok(match ident.as_str() {
                    "true" => Term::Constant(Value::Bool(true)),
                    "false" => Term::Constant(Value::Bool(false)),
                    "null" => Term::Constant(Value::Null),
                    _ => Term::Constant(Value::String(ident)),
                })
            }
            other => Err(self.error(format!("unexpected character '{other}'"))),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Argument>, SyntaxError> {
        let mut args = Vec::new();
        self.skip_ws();
        if self.peek() == Some(')') {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.parse_argument()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(')') => {
                    self.pos += 1;
                    return Ok(args);
                }
                Some(c) => return Err(self.error(format!("expected ',' or ')' but found '{c}'"))),
                None => return Err(self.error("missing ')'")),
            }
        }
    }

    fn parse_argument(&mut self) -> Result<Argument, SyntaxError> {
        self.skip_ws();
        let start = self.pos;
        if let Some(name) = self.try_arg_name() {
            let value = self.parse_term()?;
            return Ok(Argument::named(name, value));
        }
        self.pos = start;
        Ok(Argument::positional(self.parse_term()?))
    }

    /// Consumes `Name:` / `Name =` / `0:` when present.
    fn try_arg_name(&mut self) -> Option<String> {
        let first = self.peek()?;
        let name = if first.is_ascii_digit() {
            let digits = self.read_while(|c| c.is_ascii_digit());
            self.skip_ws();
            // `00:30:00` is a time span, not a named argument.
            if self.peek() != Some(':') || self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
                return None;
            }
            digits
        } else if is_ident_start(first) {
            let ident = self.read_ident();
            self.skip_ws();
            match (self.peek(), self.peek_at(1)) {
                (Some(':'), Some('-')) => return None,
                (Some(':'), _) => {}
                (Some('='), next) if next != Some('=') => {}
                _ => return None,
            }
            ident
        } else {
            return None;
        };
        self.pos += 1;
        Some(name)
    }

    fn parse_list(&mut self) -> Result<Term, SyntaxError> {
        self.pos += 1;
        self.skip_ws();
        if self.peek() == Some(']') {
            self.pos += 1;
            return Ok(Term::Nil);
        }
        let mut items = Vec::new();
        loop {
            items.push(self.parse_term()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some('|') => {
                    self.pos += 1;
                    let tail = self.parse_term()?;
                    self.skip_ws();
                    if self.peek() != Some(']') {
                        return Err(self.error("expected ']' after list tail"));
                    }
                    self.pos += 1;
                    return Ok(Term::list(items, tail));
                }
                Some(']') => {
                    self.pos += 1;
                    return Ok(Term::list(items, Term::Nil));
                }
                _ => return Err(self.error("expected ',', '|' or ']' in list")),
            }
        }
    }

    fn parse_template(&mut self) -> Result<Term, SyntaxError> {
        let start = self.pos;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        while let Some(c) = self.peek() {
            self.pos += 1;
            if let Some(q) = quote {
                if c == '\\' {
                    self.pos += 1;
                } else if c == q {
                    quote = None;
                }
                continue;
            }
            match c {
                '"' | '\'' => quote = Some(c),
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                _ => {}
            }
        }
        if depth != 0 {
            return Err(SyntaxError::new("unterminated '{' template", start));
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let expression =
            Expression::build(&text).map_err(|e| SyntaxError::new(e.to_string(), start))?;
        for name in expression.variables() {
            self.vars.index_of(&name);
        }
        Ok(match expression.as_literal() {
            Some(v) => Term::Constant(v.clone()),
            None => Term::Template(Arc::new(expression)),
        })
    }

    fn parse_number(&mut self) -> Result<Term, SyntaxError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        self.read_while(|c| c.is_alphanumeric() || c == '.' || c == ':');
        let token: String = self.chars[start..self.pos].iter().collect();
        match Value::parse_literal(&token) {
            Value::String(_) | Value::Null | Value::Bool(_) => {
                Err(SyntaxError::new(format!("invalid number '{token}'"), start))
            }
            v => Ok(Term::Constant(v)),
        }
    }

    fn read_quoted(&mut self, quote: char) -> Result<String, SyntaxError> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(SyntaxError::new("unterminated string", start)),
                Some('\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some('n') => out.push('\n'),
                        Some('t') => out.push('\t'),
                        Some(c) => out.push(c),
                        None => return Err(SyntaxError::new("unterminated string", start)),
                    }
                }
                Some(c) if c == quote => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(c) => out.push(c),
            }
            self.pos += 1;
        }
    }

    fn read_ident(&mut self) -> String {
        self.read_while(is_ident_char)
    }

    fn read_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn error(&self, reason: impl Into<String>) -> SyntaxError {
        SyntaxError::new(reason, self.pos)
    }
}

/// Parses a complete term, registering its variables in `vars`.
pub fn parse_term(text: &str, vars: &mut VarTable) -> Result<Term, SyntaxError> {
    TermParser::new(text, vars).parse_complete()
}

/// Byte offsets and characters that sit outside quotes and brackets.
pub(crate) fn top_level_chars(text: &str) -> Vec<(usize, char)> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
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
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push((i, c)),
            _ => {}
        }
    }
    out
}

/// Splits `text` on `sep` occurrences outside quotes and brackets.
#[must_use]
pub fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for (i, c) in top_level_chars(text) {
        if c == sep {
            parts.push(text[start..i].trim());
            start = i + c.len_utf8();
        }
    }
    parts.push(text[start..].trim());
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::ArgKey;
    use std::time::Duration;

    fn parse(text: &str) -> Term {
        let mut vars = VarTable::new();
        parse_term(text, &mut vars).unwrap()
    }

    #[test]
    fn test_parse_compound_with_named_args() {
        let t = parse("Mitigate(ErrorCode = \"FO001\", NodeName: ?Node, 3)");
        let c = t.as_compound().unwrap();
        assert_eq!(c.functor(), "Mitigate");
        assert_eq!(c.arity(), 3);
        assert_eq!(
            c.get(&ArgKey::Name("ErrorCode".into())),
            Some(&Term::string("FO001"))
        );
        assert!(c.get(&ArgKey::Name("NodeName".into())).unwrap().is_variable());
        assert_eq!(c.arg(2), Some(&Term::constant(3)));
    }

    #[test]
    fn test_parse_timespan_argument_is_not_named() {
        let t = parse("CheckInsideScheduleInterval(00:30:00)");
        let c = t.as_compound().unwrap();
        assert!(!c.has_named_args());
        assert_eq!(
            c.arg(0),
            Some(&Term::Constant(Value::Duration(Duration::from_secs(1800))))
        );
    }

    #[test]
    fn test_parse_numeric_named_argument() {
        let t = parse("meta(GetRepairHistory, 0: output)");
        let c = t.as_compound().unwrap();
        assert_eq!(c.args()[1].name.as_deref(), Some("0"));
        assert_eq!(c.args()[1].value, Term::string("output"));
    }

    #[test]
    fn test_variables_share_slots() {
        let mut vars = VarTable::new();
        let t = parse_term("p(?X, ?Y, ?X, _, _)", &mut vars).unwrap();
        let c = t.as_compound().unwrap();
        let idx = |i: usize| c.arg(i).unwrap().as_variable().unwrap().index();
        assert_eq!(idx(0), idx(2));
        assert_ne!(idx(0), idx(1));
        assert_ne!(idx(3), idx(4));
        assert_eq!(vars.len(), 4);
        assert_eq!(vars.iter().count(), 2);
    }

    #[test]
    fn test_parse_list_with_tail() {
        let t = parse("[?X | ?Xs]");
        let (items, tail) = t.list_items().unwrap();
        assert_eq!(items.len(), 1);
        assert!(tail.is_variable());
        assert_eq!(parse("[]"), Term::Nil);
    }

    #[test]
    fn test_parse_quoted_escapes() {
        assert_eq!(parse(r#""a\"b""#), Term::string("a\"b"));
        assert_eq!(parse("'fabric:/App'"), Term::string("fabric:/App"));
    }

    #[test]
    fn test_parse_atoms_and_literals() {
        assert_eq!(parse("dynamic"), Term::string("dynamic"));
        assert_eq!(parse("true"), Term::constant(true));
        assert_eq!(parse("-4"), Term::constant(-4));
        assert_eq!(parse("2.5"), Term::constant(2.5));
    }

    #[test]
    fn test_parse_template_registers_variables() {
        let mut vars = VarTable::new();
        let t = parse_term("log({Node <?NodeName> failed})", &mut vars).unwrap();
        let c = t.as_compound().unwrap();
        assert!(matches!(c.arg(0), Some(Term::Template(_))));
        assert!(vars.lookup("NodeName").is_some());
    }

    #[test]
    fn test_constant_template_is_folded() {
        assert_eq!(
            parse("p({disk full})").as_compound().unwrap().arg(0),
            Some(&Term::string("disk full"))
        );
    }

    #[test]
    fn test_parse_errors() {
        let mut vars = VarTable::new();
        assert!(parse_term("p(?X", &mut vars).is_err());
        assert!(parse_term("p(\"open)", &mut vars).is_err());
        assert!(parse_term("p(1) extra", &mut vars).is_err());
        assert!(parse_term("12abc", &mut vars).is_err());
        assert!(parse_term("?", &mut vars).is_err());
    }

    #[test]
    fn test_split_top_level_respects_nesting() {
        let parts = split_top_level("a(1, 2), \"x, y\", [3, 4]", ',');
        assert_eq!(parts, vec!["a(1, 2)", "\"x, y\"", "[3, 4]"]);
    }
}
