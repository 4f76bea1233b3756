//! Built-in expression functions.

use std::cmp::Ordering;
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use uuid::Uuid;

use crate::error::FunctionError;
use crate::value::Value;

/// A function callable from expressions, by name or through an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Func {
    /// `+`
    Add,
    /// `-`, binary or prefix.
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `&&`
    And,
    /// `||`
    Or,
    /// `!`
    Not,
    /// `~~`, regular expression match.
    Match,
    /// `get(Prop)`: a property from the evaluation context.
    Get,
    /// `concat(a, b, ...)`
    Concat,
    /// `lower(s)`
    Lower,
    /// `upper(s)`
    Upper,
    /// `len(s)`
    Len,
    /// `contains(s, sub)`
    Contains,
    /// `startswith(s, prefix)`
    StartsWith,
    /// `endswith(s, suffix)`
    EndsWith,
    /// `iif(cond, then, else)`
    Iif,
    /// `expression(text)`: parses and evaluates its argument.
    Expression,
    /// `now()`, the current UTC time as RFC 3339 text.
    Now,
    /// `guid()`, a fresh v4 UUID string.
    Guid,
}

const ALL: [Func; 27] = [
    Func::Add,
    Func::Sub,
    Func::Mul,
    Func::Div,
    Func::Mod,
    Func::Eq,
    Func::Ne,
    Func::Lt,
    Func::Le,
    Func::Gt,
    Func::Ge,
    Func::And,
    Func::Or,
    Func::Not,
    Func::Match,
    Func::Get,
    Func::Concat,
    Func::Lower,
    Func::Upper,
    Func::Len,
    Func::Contains,
    Func::StartsWith,
    Func::EndsWith,
    Func::Iif,
    Func::Expression,
    Func::Now,
    Func::Guid,
];

impl Func {
    /// Looks a function up by its call name (case-insensitive).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.trim().to_ascii_lowercase();
        ALL.into_iter().find(|f| f.name() == lower)
    }

    /// Lowercase call name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Mod => "mod",
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::And => "and",
            Self::Or => "or",
            Self::Not => "not",
            Self::Match => "match",
            Self::Get => "get",
            Self::Concat => "concat",
            Self::Lower => "lower",
            Self::Upper => "upper",
            Self::Len => "len",
            Self::Contains => "contains",
            Self::StartsWith => "startswith",
            Self::EndsWith => "endswith",
            Self::Iif => "iif",
            Self::Expression => "expression",
            Self::Now => "now",
            Self::Guid => "guid",
        }
    }

    /// Infix or prefix symbol used when printing.
    #[must_use]
    pub const fn symbol(self) -> Option<&'static str> {
        Some(match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "&&",
            Self::Or => "||",
            Self::Not => "!",
            Self::Match => "~~",
            _ => return None,
        })
    }

    /// Accepted argument counts.
    #[must_use]
    pub const fn arity(self) -> (usize, Option<usize>) {
        match self {
            Self::Now | Self::Guid => (0, Some(0)),
            Self::Not | Self::Lower | Self::Upper | Self::Len | Self::Get => (1, Some(1)),
            Self::Sub => (1, Some(2)),
            Self::Eq
            | Self::Ne
            | Self::Lt
            | Self::Le
            | Self::Gt
            | Self::Ge
            | Self::Div
            | Self::Mod
            | Self::Match
            | Self::Contains
            | Self::StartsWith
            | Self::EndsWith => (2, Some(2)),
            Self::Iif => (3, Some(3)),
            Self::Add | Self::Mul | Self::And | Self::Or | Self::Concat | Self::Expression => {
                (1, None)
            }
        }
    }

    /// Whether a call with constant arguments may be folded at build time.
    #[must_use]
    pub const fn is_foldable(self) -> bool {
        !matches!(self, Self::Now | Self::Guid | Self::Get)
    }

    /// Applies the function to evaluated arguments.
    pub fn invoke(self, args: &[Value]) -> Result<Value, FunctionError> {
        match self {
            Self::Add => add(args),
            Self::Sub => sub(args),
            Self::Mul => fold_numeric(self, args, i64::checked_mul, |a, b| a * b),
            Self::Div => div(args),
            Self::Mod => modulo(args),
            Self::Eq => Ok(Value::Bool(args[0].loosely_equals(&args[1]))),
            Self::Ne => Ok(Value::Bool(!args[0].loosely_equals(&args[1]))),
            Self::Lt => compare(self, args, Ordering::is_lt),
            Self::Le => compare(self, args, Ordering::is_le),
            Self::Gt => compare(self, args, Ordering::is_gt),
            Self::Ge => compare(self, args, Ordering::is_ge),
            Self::And => {
                for a in args {
                    if !truth(self, a)? {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            Self::Or => {
                for a in args {
                    if truth(self, a)? {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Self::Not => Ok(Value::Bool(!truth(self, &args[0])?)),
            Self::Iif => Ok(if truth(self, &args[0])? {
                args[1].clone()
            } else {
                args[2].clone()
            }),
            Self::Match => {
                let text = args[0].to_text();
                let pattern = args[1].to_text();
                let re = Regex::new(&pattern).map_err(|e| FunctionError::InvalidPattern {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })?;
                Ok(Value::Bool(re.is_match(&text)))
            }
            Self::Get => Err(FunctionError::Failed {
                func: "get",
                message: "property lookup needs an evaluation context".to_string(),
            }),
            Self::Concat | Self::Expression => {
                Ok(Value::String(args.iter().map(Value::to_text).collect()))
            }
            Self::Lower => Ok(Value::String(text_arg(self, &args[0])?.to_lowercase())),
            Self::Upper => Ok(Value::String(text_arg(self, &args[0])?.to_uppercase())),
            Self::Len => {
                let n = text_arg(self, &args[0])?.chars().count();
                Ok(Value::Int(i64::try_from(n).unwrap_or(i64::MAX)))
            }
            Self::Contains => {
                let (a, b) = (text_arg(self, &args[0])?, text_arg(self, &args[1])?);
                Ok(Value::Bool(a.contains(b)))
            }
            Self::StartsWith => {
                let (a, b) = (text_arg(self, &args[0])?, text_arg(self, &args[1])?);
                Ok(Value::Bool(a.starts_with(b)))
            }
            Self::EndsWith => {
                let (a, b) = (text_arg(self, &args[0])?, text_arg(self, &args[1])?);
                Ok(Value::Bool(a.ends_with(b)))
            }
            Self::Now => Ok(Value::String(Utc::now().to_rfc3339())),
            Self::Guid => Ok(Value::String(Uuid::new_v4().to_string())),
        }
    }
}

fn mismatch(func: Func, detail: impl Into<String>) -> FunctionError {
    FunctionError::TypeMismatch {
        func: func.name(),
        detail: detail.into(),
    }
}

fn truth(func: Func, v: &Value) -> Result<bool, FunctionError> {
    v.to_bool()
        .ok_or_else(|| mismatch(func, format!("expected bool, got {}", v.type_name())))
}

fn text_arg(func: Func, v: &Value) -> Result<&str, FunctionError> {
    v.as_string()
        .ok_or_else(|| mismatch(func, format!("expected string, got {}", v.type_name())))
}

fn add(args: &[Value]) -> Result<Value, FunctionError> {
    if args.iter().any(Value::is_string) {
        return Ok(Value::String(args.iter().map(Value::to_text).collect()));
    }
    if args.iter().all(Value::is_duration) {
        let total = args
            .iter()
            .filter_map(Value::as_duration)
            .fold(Duration::ZERO, |acc, d| acc.saturating_add(d));
        return Ok(Value::Duration(total));
    }
    fold_numeric(Func::Add, args, i64::checked_add, |a, b| a + b)
}

fn sub(args: &[Value]) -> Result<Value, FunctionError> {
    match args {
        [Value::Int(v)] => v.checked_neg().map(Value::Int).ok_or_else(|| overflow(Func::Sub)),
        [Value::Float(v)] => Ok(Value::Float(-v)),
        [other] => Err(mismatch(Func::Sub, format!("cannot negate {}", other.type_name()))),
        [Value::Duration(a), Value::Duration(b)] => Ok(Value::Duration(a.saturating_sub(*b))),
        _ => fold_numeric(Func::Sub, args, i64::checked_sub, |a, b| a - b),
    }
}

fn overflow(func: Func) -> FunctionError {
    FunctionError::Failed {
        func: func.name(),
        message: "integer overflow".to_string(),
    }
}

fn fold_numeric(
    func: Func,
    args: &[Value],
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, FunctionError> {
    if let Some(bad) = args.iter().find(|a| !a.is_numeric()) {
        return Err(mismatch(func, format!("expected number, got {}", bad.type_name())));
    }
    if args.iter().all(Value::is_int) {
        let mut acc = args[0].as_int().unwrap_or_default();
        for a in &args[1..] {
            let b = a.as_int().unwrap_or_default();
            acc = int_op(acc, b).ok_or_else(|| overflow(func))?;
        }
        return Ok(Value::Int(acc));
    }
    let mut acc = args[0].as_float().unwrap_or_default();
    for a in &args[1..] {
        acc = float_op(acc, a.as_float().unwrap_or_default());
    }
    Ok(Value::Float(acc))
}

fn div(args: &[Value]) -> Result<Value, FunctionError> {
    match (&args[0], &args[1]) {
        (Value::Int(_), Value::Int(0)) => Err(FunctionError::DivisionByZero),
        (Value::Int(a), Value::Int(b)) if a.checked_rem(*b) == Some(0) => {
            a.checked_div(*b).map(Value::Int).ok_or_else(|| overflow(Func::Div))
        }
        (Value::Int(a), Value::Int(b)) if a.checked_rem(*b).is_none() => Err(overflow(Func::Div)),
        (a, b) if a.is_numeric() && b.is_numeric() => {
            let divisor = b.as_float().unwrap_or_default();
            if divisor == 0.0 {
                return Err(FunctionError::DivisionByZero);
            }
            Ok(Value::Float(a.as_float().unwrap_or_default() / divisor))
        }
        (a, b) => Err(mismatch(
            Func::Div,
            format!("cannot divide {} by {}", a.type_name(), b.type_name()),
        )),
    }
}

fn modulo(args: &[Value]) -> Result<Value, FunctionError> {
    match (&args[0], &args[1]) {
        (Value::Int(_), Value::Int(0)) => Err(FunctionError::DivisionByZero),
        (Value::Int(a), Value::Int(b)) => {
            a.checked_rem(*b).map(Value::Int).ok_or_else(|| overflow(Func::Mod))
        }
        (a, b) => Err(mismatch(
            Func::Mod,
            format!("expected integers, got {} and {}", a.type_name(), b.type_name()),
        )),
    }
}

fn compare(func: Func, args: &[Value], test: fn(Ordering) -> bool) -> Result<Value, FunctionError> {
    let ordering = args[0].compare(&args[1]).ok_or_else(|| {
        mismatch(
            func,
            format!(
                "cannot compare {} with {}",
                args[0].type_name(),
                args[1].type_name()
            ),
        )
    })?;
    Ok(Value::Bool(test(ordering)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name_is_case_insensitive() {
        assert_eq!(Func::from_name("Add"), Some(Func::Add));
        assert_eq!(Func::from_name("STARTSWITH"), Some(Func::StartsWith));
        assert_eq!(Func::from_name("frobnicate"), None);
    }

    #[test]
    fn test_add_concatenates_with_strings() {
        let v = Func::Add
            .invoke(&[Value::from("node"), Value::Int(1), Value::Null])
            .unwrap();
        assert_eq!(v, Value::from("node1"));
    }

    #[test]
    fn test_add_numbers_and_durations() {
        assert_eq!(
            Func::Add.invoke(&[Value::Int(2), Value::Int(3)]).unwrap(),
            Value::Int(5)
        );
        assert_eq!(
            Func::Add.invoke(&[Value::Int(2), Value::Float(0.5)]).unwrap(),
            Value::Float(2.5)
        );
        assert_eq!(
            Func::Add
                .invoke(&[
                    Value::Duration(Duration::from_secs(1)),
                    Value::Duration(Duration::from_secs(2))
                ])
                .unwrap(),
            Value::Duration(Duration::from_secs(3))
        );
    }

    #[test]
    fn test_sub_negates_single_argument() {
        assert_eq!(Func::Sub.invoke(&[Value::Int(4)]).unwrap(), Value::Int(-4));
    }

    #[test]
    fn test_div_by_zero() {
        assert_eq!(
            Func::Div.invoke(&[Value::Int(1), Value::Int(0)]),
            Err(FunctionError::DivisionByZero)
        );
        assert_eq!(
            Func::Div.invoke(&[Value::Int(7), Value::Int(2)]).unwrap(),
            Value::Float(3.5)
        );
    }

    #[test]
    fn test_integer_overflow_is_an_error() {
        let overflow = |func: Func, args: &[Value]| {
            matches!(
                func.invoke(args),
                Err(FunctionError::Failed { ref message, .. }) if message == "integer overflow"
            )
        };
        assert!(overflow(Func::Div, &[Value::Int(i64::MIN), Value::Int(-1)]));
        assert!(overflow(Func::Mod, &[Value::Int(i64::MIN), Value::Int(-1)]));
        assert!(overflow(Func::Sub, &[Value::Int(i64::MIN)]));
        assert!(overflow(Func::Mul, &[Value::Int(i64::MAX), Value::Int(2)]));

        assert_eq!(
            Func::Div.invoke(&[Value::Int(i64::MIN), Value::Int(1)]).unwrap(),
            Value::Int(i64::MIN)
        );
        assert_eq!(
            Func::Mod.invoke(&[Value::Int(-7), Value::Int(2)]).unwrap(),
            Value::Int(-1)
        );
    }

    #[test]
    fn test_compare_type_mismatch() {
        let err = Func::Lt
            .invoke(&[Value::Int(1), Value::from("x")])
            .unwrap_err();
        assert!(matches!(err, FunctionError::TypeMismatch { func: "lt", .. }));
    }

    #[test]
    fn test_match_uses_regex() {
        assert_eq!(
            Func::Match
                .invoke(&[Value::from("FO001"), Value::from("^FO0\\d+$")])
                .unwrap(),
            Value::Bool(true)
        );
        assert!(matches!(
            Func::Match.invoke(&[Value::from("x"), Value::from("(")]),
            Err(FunctionError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_non_deterministic_functions_are_not_foldable() {
        assert!(!Func::Now.is_foldable());
        assert!(!Func::Guid.is_foldable());
        assert!(Func::Add.is_foldable());
    }
}
