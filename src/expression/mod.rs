//! Expression engine.
//!
//! Expressions are parsed from infix text into a tree of function calls,
//! constant-folded where every input is a literal, and evaluated against a
//! [`PropertyContext`] that supplies variable and property values.
//!
//! Two bracketed forms build string templates:
//!
//! - `{text <Name> more}` evaluates to a string, with each `<Name>`
//!   replaced by the value of property `Name` (`<?X>` reads variable `X`,
//!   `<f(a)>` calls a function).
//! - `{{text}}` evaluates to a string that is itself expression text, to be
//!   built again with [`Expression::evaluate_expression`].

pub mod func;
mod parser;

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::error::ExpressionError;
use crate::value::Value;

pub use func::Func;

/// Supplies values for variables and named properties during evaluation.
pub trait PropertyContext {
    /// Value of a named property, as read by `get(Name)`.
    fn property(&self, name: &str) -> Option<Value>;

    /// Value of the variable `?name`.
    fn variable(&self, name: &str) -> Option<Value> {
        let _ = name;
        None
    }
}

impl PropertyContext for () {
    fn property(&self, _name: &str) -> Option<Value> {
        None
    }
}

impl PropertyContext for HashMap<String, Value> {
    fn property(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }

    fn variable(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Literal(Value),
    Variable(String),
    Call { func: Func, args: Vec<Node> },
}

/// A parsed, constant-folded expression.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use mendlog::{Expression, Value};
///
/// let expr = Expression::build("?Count >= 3 && ?Code == \"FO001\"").unwrap();
/// let mut vars = HashMap::new();
/// vars.insert("Count".to_string(), Value::Int(4));
/// vars.insert("Code".to_string(), Value::from("FO001"));
/// assert_eq!(expr.evaluate(&vars).unwrap(), Value::Bool(true));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    root: Node,
}

impl Expression {
    /// Builds an expression from text.
    ///
    /// # Errors
    ///
    /// Returns [`ExpressionError::Parse`] for malformed text: unbalanced
    /// parentheses, unknown functions, missing operands or an empty input.
    pub fn build(text: &str) -> Result<Self, ExpressionError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ExpressionError::parse(text, "empty expression"));
        }
        let source = expand_template(trimmed);
        let root = parser::parse(&source).map_err(|reason| ExpressionError::parse(trimmed, reason))?;
        Ok(Self { root: fold(root) })
    }

    /// Wraps a constant.
    #[must_use]
    pub const fn literal(value: Value) -> Self {
        Self {
            root: Node::Literal(value),
        }
    }

    /// Returns the constant this expression folded to, if any.
    #[must_use]
    pub const fn as_literal(&self) -> Option<&Value> {
        match &self.root {
            Node::Literal(v) => Some(v),
            _ => None,
        }
    }

    /// Variable names referenced as `?Name`, without the `?`.
    #[must_use]
    pub fn variables(&self) -> Vec<String> {
        let mut out = BTreeSet::new();
        collect(&self.root, &mut |node| {
            if let Node::Variable(name) = node {
                out.insert(name.clone());
            }
        });
        out.into_iter().collect()
    }

    /// Property names read through `get(Name)` with a constant name.
    #[must_use]
    pub fn properties(&self) -> Vec<String> {
        let mut out = BTreeSet::new();
        collect(&self.root, &mut |node| {
            if let Node::Call {
                func: Func::Get,
                args,
            } = node
            {
                if let [Node::Literal(v)] = args.as_slice() {
                    out.insert(v.to_text());
                }
            }
        });
        out.into_iter().collect()
    }

    /// Evaluates against `ctx`.
    ///
    /// Unknown variables and properties evaluate to [`Value::Null`].
    ///
    /// # Errors
    ///
    /// Returns [`ExpressionError::Evaluation`] naming the innermost
    /// sub-expression whose function failed.
    pub fn evaluate(&self, ctx: &dyn PropertyContext) -> Result<Value, ExpressionError> {
        eval(&self.root, ctx)
    }

    /// Evaluates a `{{...}}` expression and builds the expression its
    /// result spells out.
    ///
    /// With `is_final` the result text is built as-is; otherwise it is
    /// built again as a `{...}` string template.
    pub fn evaluate_expression(
        &self,
        ctx: &dyn PropertyContext,
        is_final: bool,
    ) -> Result<Self, ExpressionError> {
        let text = self.evaluate(ctx)?.to_text();
        if is_final {
            Self::build(&text)
        } else {
            Self::build(&format!("{{{text}}}"))
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(v) => write!(f, "{v}"),
            Self::Variable(name) => write!(f, "?{name}"),
            Self::Call { func, args } => match (func.symbol(), args.as_slice()) {
                (Some(sym), [l, r]) => write!(f, "({l} {sym} {r})"),
                (Some(sym), [only]) => write!(f, "{sym}{only}"),
                _ => {
                    write!(f, "{}(", func.name())?;
                    for (i, a) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{a}")?;
                    }
                    write!(f, ")")
                }
            },
        }
    }
}

fn collect(node: &Node, visit: &mut impl FnMut(&Node)) {
    visit(node);
    if let Node::Call { args, .. } = node {
        for a in args {
            collect(a, visit);
        }
    }
}

fn eval(node: &Node, ctx: &dyn PropertyContext) -> Result<Value, ExpressionError> {
    let wrap = |source| ExpressionError::Evaluation {
        expression: node.to_string(),
        source,
    };
    match node {
        Node::Literal(v) => Ok(v.clone()),
        Node::Variable(name) => Ok(ctx.variable(name).unwrap_or_default()),
        Node::Call {
            func: func @ (Func::And | Func::Or),
            args,
        } => {
            let short_circuit = *func == Func::Or;
            for a in args {
                let v = eval(a, ctx)?;
                let b = func.invoke(&[v]).map_err(wrap)?;
                if b == Value::Bool(short_circuit) {
                    return Ok(b);
                }
            }
            Ok(Value::Bool(!short_circuit))
        }
        Node::Call {
            func: Func::Iif,
            args,
        } => {
            let cond = eval(&args[0], ctx)?;
            let pick = Func::Not.invoke(&[cond]).map_err(wrap)?;
            eval(&args[if pick == Value::Bool(false) { 1 } else { 2 }], ctx)
        }
        Node::Call {
            func: Func::Get,
            args,
        } => {
            let name = eval(&args[0], ctx)?.to_text();
            Ok(ctx.property(&name).unwrap_or_default())
        }
        Node::Call { func, args } => {
            let values = args
                .iter()
                .map(|a| eval(a, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            func.invoke(&values).map_err(wrap)
        }
    }
}

/// Replaces calls whose arguments are all literals by their value.
///
/// A call that fails to evaluate is left in place so the error surfaces,
/// with context, when the expression is evaluated.
fn fold(node: Node) -> Node {
    match node {
        Node::Call { func, args } => {
            let args: Vec<Node> = args.into_iter().map(fold).collect();
            let foldable =
                func.is_foldable() && args.iter().all(|a| matches!(a, Node::Literal(_)));
            let call = Node::Call { func, args };
            if foldable {
                if let Ok(v) = eval(&call, &()) {
                    return Node::Literal(v);
                }
            }
            call
        }
        other => other,
    }
}

/// Rewrites `{...}` / `{{...}}` into `add(...)` / `expression(...)` calls.
fn expand_template(text: &str) -> String {
    let (inner, wrapper) = if text.starts_with("{{") && text.ends_with("}}") && text.len() >= 4 {
        (&text[2..text.len() - 2], "expression")
    } else if text.starts_with('{') && text.ends_with('}') && text.len() >= 2 {
        (&text[1..text.len() - 1], "add")
    } else {
        return text.to_string();
    };

    let mut out = format!("{wrapper}(\"");
    let mut rest = inner;
    while let Some(open) = rest.find('<') {
        let after = &rest[open + 1..];
        let placeholder = after.find('>').map(|close| &after[..close]).filter(|name| {
            !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_alphanumeric() || "_#:.()/?".contains(c))
        });
        match placeholder {
            Some(name) => {
                push_escaped(&mut out, &rest[..open]);
                out.push_str("\",");
                if name.starts_with('?') || name.contains('(') {
                    out.push_str(name);
                } else {
                    out.push_str(&format!("get({name})"));
                }
                out.push_str(",\"");
                rest = &after[name.len() + 1..];
            }
            None => {
                push_escaped(&mut out, &rest[..=open]);
                rest = after;
            }
        }
    }
    push_escaped(&mut out, rest);
    out.push_str("\")");
    out
}

fn push_escaped(out: &mut String, text: &str) {
    for c in text.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_constant_expression_folds() {
        let e = Expression::build("(1 + 2) * 4 == 12").unwrap();
        assert_eq!(e.as_literal(), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_folding_matches_unfolded_evaluation() {
        let text = "((10 % 4) + 3 * 2) / 2";
        let folded = Expression::build(text).unwrap();
        let unfolded = Expression {
            root: parser::parse(text).unwrap(),
        };
        assert!(folded.as_literal().is_some());
        assert!(unfolded.as_literal().is_none());
        assert_eq!(folded.evaluate(&()).unwrap(), unfolded.evaluate(&()).unwrap());
    }

    #[test]
    fn test_variables_are_not_folded() {
        let e = Expression::build("?X + 1").unwrap();
        assert!(e.as_literal().is_none());
        assert_eq!(e.variables(), vec!["X".to_string()]);
        let ctx = vars(&[("X", Value::Int(41))]);
        assert_eq!(e.evaluate(&ctx).unwrap(), Value::Int(42));
    }

    #[test]
    fn test_unbound_variable_is_null() {
        let e = Expression::build("?Missing == null").unwrap();
        assert_eq!(e.evaluate(&()).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_now_is_never_folded() {
        let e = Expression::build("now()").unwrap();
        assert!(e.as_literal().is_none());
        let e = Expression::build("len(guid()) == 36").unwrap();
        assert!(e.as_literal().is_none());
        assert_eq!(e.evaluate(&()).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_short_circuit_skips_failing_branch() {
        let e = Expression::build("?Ok || (1 / 0 == 1)").unwrap();
        let ctx = vars(&[("Ok", Value::Bool(true))]);
        assert_eq!(e.evaluate(&ctx).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_evaluation_error_names_sub_expression() {
        let e = Expression::build("?X + 1 / 0").unwrap();
        let err = e.evaluate(&vars(&[("X", Value::Int(1))])).unwrap_err();
        match err {
            ExpressionError::Evaluation { expression, .. } => assert_eq!(expression, "(1 / 0)"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_integer_overflow_reports_evaluation_error() {
        let ctx = vars(&[("A", Value::Int(i64::MIN)), ("B", Value::Int(-1))]);
        for text in ["?A % ?B", "?A / ?B", "-(?A)"] {
            let err = Expression::build(text).unwrap().evaluate(&ctx).unwrap_err();
            assert!(err.to_string().contains("integer overflow"), "{text}: {err}");
        }

        // Constant folding leaves the failing call for evaluation time.
        let e = Expression::build("-9223372036854775808 % -1").unwrap();
        assert!(e.as_literal().is_none());
        assert!(e.evaluate(&()).is_err());
        assert!(Expression::build("-(-9223372036854775808)").unwrap().evaluate(&()).is_err());
    }

    #[test]
    fn test_negated_operand_after_operator() {
        let ctx = vars(&[("X", Value::Int(5)), ("A", Value::Int(-3))]);
        assert_eq!(Expression::build("2 * -?X").unwrap().evaluate(&ctx).unwrap(), Value::Int(-10));
        assert_eq!(Expression::build("?A > -?X").unwrap().evaluate(&ctx).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_parse_error_reports_original_text() {
        let err = Expression::build("(1 + ").unwrap_err();
        assert!(matches!(err, ExpressionError::Parse { ref expression, .. } if expression == "(1 +"));
    }

    #[test]
    fn test_string_template_substitutes_properties() {
        let e = Expression::build("{Node <NodeName> reported \"<Code>\"}").unwrap();
        assert_eq!(e.properties(), vec!["Code".to_string(), "NodeName".to_string()]);
        let ctx = vars(&[("NodeName", Value::from("_Node_0")), ("Code", Value::from("FO001"))]);
        assert_eq!(
            e.evaluate(&ctx).unwrap(),
            Value::from("Node _Node_0 reported \"FO001\"")
        );
    }

    #[test]
    fn test_template_reads_variables_and_calls() {
        let e = Expression::build("{<?Count> x <lower(?Name)>}").unwrap();
        let ctx = vars(&[("Count", Value::Int(3)), ("Name", Value::from("OK"))]);
        assert_eq!(e.evaluate(&ctx).unwrap(), Value::from("3 x ok"));
    }

    #[test]
    fn test_template_keeps_plain_angle_brackets() {
        let e = Expression::build("{a < b}").unwrap();
        assert_eq!(e.as_literal(), Some(&Value::from("a < b")));
    }

    #[test]
    fn test_expression_template_builds_again() {
        let e = Expression::build("{{<Metric> > 5}}").unwrap();
        let ctx = vars(&[("Metric", Value::Int(9))]);
        let built = e.evaluate_expression(&ctx, true).unwrap();
        assert_eq!(built.as_literal(), Some(&Value::Bool(true)));

        let deferred = e.evaluate_expression(&ctx, false).unwrap();
        assert_eq!(deferred.as_literal(), Some(&Value::from("9 > 5")));
    }

    #[test]
    fn test_match_operator() {
        let e = Expression::build("?Code ~~ \"^FO0[0-9]+$\"").unwrap();
        assert_eq!(
            e.evaluate(&vars(&[("Code", Value::from("FO002"))])).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_display_round_trips() {
        let e = Expression::build("?A > 1 && !contains(?B, \"x\")").unwrap();
        let again = Expression::build(&e.to_string()).unwrap();
        assert_eq!(e, again);
    }
}
