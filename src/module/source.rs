//! Rule text: splitting a rule file into logical rules and parsing each
//! rule into a head and a list of goals.

use std::path::Path;

use crate::error::{CompileError, SyntaxError};
use crate::expression::Expression;
use crate::term::parser::top_level_chars;
use crate::term::{parse_term, CompoundTerm, Term, VarTable};
use crate::value::Value;

/// One logical rule with the line it starts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleText {
    /// The rule with comments and continuations removed.
    pub text: String,
    /// 1-based line the rule starts on.
    pub line: usize,
}

impl RuleText {
    /// Creates a rule starting at `line`.
    #[must_use]
    pub fn new(text: impl Into<String>, line: usize) -> Self {
        Self {
            text: text.into(),
            line,
        }
    }
}

/// Splits rule-file contents into logical rules.
///
/// Blank lines and lines starting with `##` are skipped. A line ending in
/// `\` is joined with the next one, and a rule runs until a line whose text
/// ends with `.`; the terminating `.` is dropped.
///
/// # Errors
///
/// Returns [`CompileError::UnterminatedRule`] if the input ends inside a rule.
pub fn split_rules(source: &str) -> Result<Vec<RuleText>, CompileError> {
    let mut rules = Vec::new();
    let mut current = String::new();
    let mut start_line = 0;

    for (idx, raw) in source.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with("##") {
            continue;
        }
        if current.is_empty() {
            start_line = idx + 1;
        } else if !current.ends_with(' ') {
            current.push(' ');
        }

        let line = line.replace('\t', " ");
        if let Some(continued) = line.strip_suffix('\\') {
            current.push_str(continued.trim_end());
            current.push(' ');
            continue;
        }
        if let Some(done) = line.strip_suffix('.') {
            current.push_str(done.trim_end());
            rules.push(RuleText::new(current.trim(), start_line));
            current.clear();
        } else {
            current.push_str(&line);
        }
    }

    if !current.trim().is_empty() {
        return Err(CompileError::UnterminatedRule {
            line: start_line,
            text: current.trim().to_string(),
        });
    }
    Ok(rules)
}

/// Reads and splits a rule file.
pub fn read_rules(path: impl AsRef<Path>) -> Result<Vec<RuleText>, CompileError> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path).map_err(|e| CompileError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    split_rules(&source)
}

/// A goal as written in a rule body, before predicate resolution.
#[derive(Debug, Clone)]
pub enum ParsedGoal {
    /// `!`
    Cut,
    /// A predicate call.
    Call(CompoundTerm),
    /// `not(...)`
    Not(Box<ParsedGoal>),
    /// `a = b`
    Unify(Term, Term),
    /// `?X is expr`
    Is(Term, Expression),
    /// Any other expression, run as a boolean test.
    Test(Expression),
}

/// A rule split into head and body, with its variable table.
#[derive(Debug, Clone)]
pub struct ParsedClause {
    /// Head of the rule.
    pub head: CompoundTerm,
    /// Goals in body order.
    pub body: Vec<ParsedGoal>,
    /// Variables named in the rule.
    pub vars: VarTable,
    /// Source text, for diagnostics.
    pub text: String,
    /// Line the rule starts on.
    pub line: usize,
}

/// Parses `Head :- Goal1, Goal2` or a bare fact `Head`.
///
/// # Errors
///
/// Returns [`CompileError::Syntax`] carrying the rule's line and text.
pub fn parse_clause(rule: &RuleText) -> Result<ParsedClause, CompileError> {
    let syntax = |e: SyntaxError| CompileError::Syntax {
        line: rule.line,
        text: rule.text.clone(),
        reason: e.reason,
    };

    let text = rule.text.as_str();
    let (head_text, body_text) = match find_neck(text) {
        Some(i) => (&text[..i], Some(&text[i + 2..])),
        None => (text, None),
    };

    let mut vars = VarTable::new();
    let head = parse_head(head_text.trim(), &mut vars).map_err(syntax)?;

    let mut body = Vec::new();
    if let Some(body_text) = body_text {
        if body_text.trim().is_empty() {
            return Err(syntax(SyntaxError::new("rule body is empty", text.len())));
        }
        for goal in crate::term::split_top_level(body_text, ',') {
            body.push(parse_goal(goal, &mut vars).map_err(syntax)?);
        }
    }

    Ok(ParsedClause {
        head,
        body,
        vars,
        text: rule.text.clone(),
        line: rule.line,
    })
}

fn find_neck(text: &str) -> Option<usize> {
    let chars = top_level_chars(text);
    chars
        .windows(2)
        .find(|w| w[0].1 == ':' && w[1].1 == '-' && w[1].0 == w[0].0 + 1)
        .map(|w| w[0].0)
}

fn parse_head(text: &str, vars: &mut VarTable) -> Result<CompoundTerm, SyntaxError> {
    let head = to_callable(parse_term(text, vars)?, text)?;
    if head
        .args()
        .iter()
        .any(|a| contains_template(&a.value))
    {
        return Err(SyntaxError::new("templates are not allowed in a rule head", 0));
    }
    Ok(head)
}

fn contains_template(term: &Term) -> bool {
    match term {
        Term::Template(_) => true,
        Term::Compound(c) => c.args().iter().any(|a| contains_template(&a.value)),
        _ => false,
    }
}

fn to_callable(term: Term, text: &str) -> Result<CompoundTerm, SyntaxError> {
    match term {
        Term::Compound(c) => Ok((*c).clone()),
        Term::Constant(Value::String(name)) => Ok(CompoundTerm::new(name, Vec::new())),
        Term::Constant(Value::Bool(true)) => Ok(CompoundTerm::new("true", Vec::new())),
        Term::Constant(Value::Bool(false)) => Ok(CompoundTerm::new("fail", Vec::new())),
        _ => Err(SyntaxError::new(format!("`{text}` is not a predicate"), 0)),
    }
}

/// Parses a single body goal.
pub fn parse_goal(text: &str, vars: &mut VarTable) -> Result<ParsedGoal, SyntaxError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(SyntaxError::new("empty goal", 0));
    }
    if text == "!" {
        return Ok(ParsedGoal::Cut);
    }
    if let Some(inner) = negated(text) {
        return Ok(ParsedGoal::Not(Box::new(parse_goal(inner, vars)?)));
    }

    let top = top_level_chars(text);
    if let Some(&(i, _)) = top
        .iter()
        .find(|(i, c)| *c == ' ' && text[*i..].starts_with(" is "))
    {
        let target = parse_term(text[..i].trim(), vars)?;
        let expr = build_expression(text[i + 4..].trim(), vars)?;
        return Ok(ParsedGoal::Is(target, expr));
    }

    let bytes = text.as_bytes();
    let single_eq = top.iter().find(|(i, c)| {
        *c == '='
            && !(*i > 0 && matches!(bytes[i - 1], b'=' | b'!' | b'<' | b'>'))
            && bytes.get(i + 1) != Some(&b'=')
    });
    if let Some(&(i, _)) = single_eq {
        let left = parse_term(text[..i].trim(), vars)?;
        let right = parse_term(text[i + 1..].trim(), vars)?;
        return Ok(ParsedGoal::Unify(left, right));
    }

    if top
        .iter()
        .any(|(_, c)| matches!(c, '=' | '<' | '>' | '!' | '~' | '&' | '|'))
    {
        return Ok(ParsedGoal::Test(build_expression(text, vars)?));
    }

    Ok(ParsedGoal::Call(to_callable(parse_term(text, vars)?, text)?))
}

fn negated(text: &str) -> Option<&str> {
    let inner = text.strip_prefix("not")?.trim_start().strip_prefix('(')?;
    let inner = inner.strip_suffix(')')?;
    // Rejects `not(a) == not(b)`, where the first ')' closes early.
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in inner.chars() {
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
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    (depth == 0).then_some(inner)
}

fn build_expression(text: &str, vars: &mut VarTable) -> Result<Expression, SyntaxError> {
    let expr = Expression::build(text).map_err(|e| SyntaxError::new(e.to_string(), 0))?;
    for name in expr.variables() {
        vars.index_of(&name);
    }
    Ok(expr)
}
