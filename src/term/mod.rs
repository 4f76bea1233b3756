//! Terms: the data model shared by rules, goals and answers.
//!
//! A term is a constant, a variable, a compound (functor plus arguments,
//! optionally named) or a deferred expression template. Lists are compounds
//! with the `.` functor terminated by [`Term::Nil`].

pub mod parser;

use std::fmt;
use std::sync::Arc;

use crate::expression::Expression;
use crate::query::bindings::BindingLog;
use crate::value::Value;

pub use parser::{parse_term, split_top_level, TermParser, VarTable};

/// Functor used for list cells.
pub const LIST_FUNCTOR: &str = ".";

/// A logic variable.
///
/// `index` is a slot in the binding log. Clause variables are numbered from
/// zero and shifted by a frame base when the clause is activated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Variable {
    name: Arc<str>,
    index: usize,
}

impl Variable {
    /// Creates a variable bound to clause slot `index`.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, index: usize) -> Self {
        Self {
            name: name.into(),
            index,
        }
    }

    /// Name without the leading `?`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Slot in the clause's variable table.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Returns true for the anonymous `_` variable.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        &*self.name == "_"
    }

    /// The same variable shifted into a frame starting at `base`.
    #[must_use]
    pub fn offset(&self, base: usize) -> Self {
        Self {
            name: Arc::clone(&self.name),
            index: self.index + base,
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_anonymous() {
            write!(f, "_")
        } else {
            write!(f, "?{}", self.name)
        }
    }
}

/// A logic term.
#[derive(Debug, Clone)]
pub enum Term {
    /// A constant.
    Constant(Value),
    /// A variable.
    Variable(Variable),
    /// A compound term; lists are `.`/2 cells.
    Compound(Arc<CompoundTerm>),
    /// A `{...}` argument evaluated against the caller's bindings when the
    /// enclosing goal is invoked.
    Template(Arc<Expression>),
    /// The empty list.
    Nil,
}

impl Term {
    /// Wraps a constant.
    #[must_use]
    pub fn constant(value: impl Into<Value>) -> Self {
        Self::Constant(value.into())
    }

    /// A string constant.
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::Constant(Value::String(value.into()))
    }

    /// A variable term.
    #[must_use]
    pub fn var(name: impl Into<Arc<str>>, index: usize) -> Self {
        Self::Variable(Variable::new(name, index))
    }

    /// A compound term.
    #[must_use]
    pub fn compound(term: CompoundTerm) -> Self {
        Self::Compound(Arc::new(term))
    }

    /// Builds a list from `items` ending in `tail` (usually [`Term::Nil`]).
    #[must_use]
    pub fn list(items: Vec<Self>, tail: Self) -> Self {
        items.into_iter().rev().fold(tail, |acc, item| {
            Self::compound(CompoundTerm::positional(LIST_FUNCTOR, vec![item, acc]))
        })
    }

    /// Returns true for an unbound variable.
    pub const fn is_variable(&self) -> bool {
        matches!(self, Self::Variable(_))
    }

    /// Returns true for a constant.
    pub const fn is_constant(&self) -> bool {
        matches!(self, Self::Constant(_))
    }

    /// The constant, if this is one.
    pub const fn as_constant(&self) -> Option<&Value> {
        match self {
            Self::Constant(v) => Some(v),
            _ => None,
        }
    }

    /// The variable, if this is one.
    pub const fn as_variable(&self) -> Option<&Variable> {
        match self {
            Self::Variable(v) => Some(v),
            _ => None,
        }
    }

    /// The compound term, if this is one.
    pub fn as_compound(&self) -> Option<&CompoundTerm> {
        match self {
            Self::Compound(c) => Some(c),
            _ => None,
        }
    }

    /// Returns true when the term contains no variables or templates.
    #[must_use]
    pub fn is_ground(&self) -> bool {
        match self {
            Self::Constant(_) | Self::Nil => true,
            Self::Variable(_) | Self::Template(_) => false,
            Self::Compound(c) => c.is_ground(),
        }
    }

    /// Shifts every variable index by `base`.
    #[must_use]
    pub fn offset(&self, base: usize) -> Self {
        match self {
            Self::Variable(v) => Self::Variable(v.offset(base)),
            Self::Compound(c) if c.has_vars => Self::Compound(Arc::new(c.offset(base))),
            other => other.clone(),
        }
    }

    /// Largest variable index plus one, or zero for variable-free terms.
    #[must_use]
    pub fn var_span(&self) -> usize {
        match self {
            Self::Variable(v) => v.index + 1,
            Self::Compound(c) => c.var_span(),
            _ => 0,
        }
    }

    /// Splits a proper or partial list into its items and tail.
    #[must_use]
    pub fn list_items(&self) -> Option<(Vec<Self>, Self)> {
        let mut items = Vec::new();
        let mut current = self.clone();
        loop {
            match &current {
                Self::Nil => return Some((items, Self::Nil)),
                Self::Compound(c) if c.is_list_cell() => {
                    items.push(c.args[0].value.clone());
                    let next = c.args[1].value.clone();
                    current = next;
                }
                _ if items.is_empty() => return None,
                _ => return Some((items, current)),
            }
        }
    }
}

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Constant(a), Self::Constant(b)) => a == b,
            (Self::Variable(a), Self::Variable(b)) => a == b,
            (Self::Compound(a), Self::Compound(b)) => a == b,
            (Self::Template(a), Self::Template(b)) => a.to_string() == b.to_string(),
            (Self::Nil, Self::Nil) => true,
            _ => false,
        }
    }
}

impl From<Value> for Term {
    fn from(v: Value) -> Self {
        Self::Constant(v)
    }
}

impl From<CompoundTerm> for Term {
    fn from(c: CompoundTerm) -> Self {
        Self::compound(c)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(v) => write!(f, "{v}"),
            Self::Variable(v) => write!(f, "{v}"),
            Self::Template(e) => write!(f, "{{{e}}}"),
            Self::Nil => write!(f, "[]"),
            Self::Compound(c) if c.is_list_cell() => {
                let Some((items, tail)) = self.list_items() else {
                    return write!(f, "{c}");
                };
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                if !matches!(tail, Self::Nil) {
                    write!(f, " | {tail}")?;
                }
                write!(f, "]")
            }
            Self::Compound(c) => write!(f, "{c}"),
        }
    }
}

/// One argument of a compound term.
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    /// Argument name; `None` for positional arguments.
    pub name: Option<String>,
    /// Argument value.
    pub value: Term,
}

impl Argument {
    /// A positional argument.
    #[must_use]
    pub const fn positional(value: Term) -> Self {
        Self { name: None, value }
    }

    /// A named argument.
    #[must_use]
    pub fn named(name: impl Into<String>, value: Term) -> Self {
        Self {
            name: Some(name.into()),
            value,
        }
    }

    /// The key this argument unifies under: its name, or its position.
    #[must_use]
    pub fn key(&self, position: usize) -> ArgKey {
        match &self.name {
            Some(n) => ArgKey::Name(n.clone()),
            None => ArgKey::Position(position),
        }
    }
}

/// Identifies an argument either by position or by name.
///
/// A positional key matches a named argument whose name is that position
/// rendered in decimal, so `0: ?X` and a first positional `?X` are the same.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArgKey {
    /// Zero-based position.
    Position(usize),
    /// Argument name.
    Name(String),
}

impl ArgKey {
    /// Parses `"2"` as a position and anything else as a name.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        text.parse::<usize>()
            .map_or_else(|_| Self::Name(text.to_string()), Self::Position)
    }

    /// True when both keys address the same argument.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Position(a), Self::Position(b)) => a == b,
            (Self::Name(a), Self::Name(b)) => a == b,
            (Self::Position(p), Self::Name(n)) | (Self::Name(n), Self::Position(p)) => {
                n.parse::<usize>().ok() == Some(*p)
            }
        }
    }
}

impl fmt::Display for ArgKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Position(p) => write!(f, "{p}"),
            Self::Name(n) => write!(f, "{n}"),
        }
    }
}

/// A functor applied to arguments.
#[derive(Debug, Clone)]
pub struct CompoundTerm {
    functor: Arc<str>,
    args: Vec<Argument>,
    has_vars: bool,
}

impl CompoundTerm {
    /// Creates a compound term.
    #[must_use]
    pub fn new(functor: impl Into<Arc<str>>, args: Vec<Argument>) -> Self {
        let has_vars = args.iter().any(|a| !a.value.is_ground());
        Self {
            functor: functor.into(),
            args,
            has_vars,
        }
    }

    /// Creates a compound term with positional arguments only.
    #[must_use]
    pub fn positional(functor: impl Into<Arc<str>>, args: Vec<Term>) -> Self {
        Self::new(functor, args.into_iter().map(Argument::positional).collect())
    }

    /// The functor name.
    #[must_use]
    pub fn functor(&self) -> &str {
        &self.functor
    }

    /// All arguments in written order.
    #[must_use]
    pub fn args(&self) -> &[Argument] {
        &self.args
    }

    /// Number of arguments.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// The argument value at `position`.
    #[must_use]
    pub fn arg(&self, position: usize) -> Option<&Term> {
        self.args.get(position).map(|a| &a.value)
    }

    /// True when any argument carries a name.
    #[must_use]
    pub fn has_named_args(&self) -> bool {
        self.args.iter().any(|a| a.name.is_some())
    }

    /// Finds the argument stored under `key`.
    #[must_use]
    pub fn get(&self, key: &ArgKey) -> Option<&Term> {
        self.args
            .iter()
            .enumerate()
            .find(|(i, a)| a.key(*i).matches(key))
            .map(|(_, a)| &a.value)
    }

    /// Finds an argument by name, falling back to `position` when the term
    /// is written positionally.
    #[must_use]
    pub fn lookup(&self, position: usize, name: &str) -> Option<&Term> {
        self.get(&ArgKey::Name(name.to_string()))
            .or_else(|| self.get(&ArgKey::Position(position)))
    }

    /// True when no argument contains a variable.
    #[must_use]
    pub const fn is_ground(&self) -> bool {
        !self.has_vars
    }

    /// True for a `[H|T]` list cell.
    #[must_use]
    pub fn is_list_cell(&self) -> bool {
        &*self.functor == LIST_FUNCTOR && self.args.len() == 2
    }

    /// The term with every variable shifted by `base`.
    #[must_use]
    pub fn offset(&self, base: usize) -> Self {
        if !self.has_vars || base == 0 {
            return self.clone();
        }
        Self {
            functor: Arc::clone(&self.functor),
            args: self
                .args
                .iter()
                .map(|a| Argument {
                    name: a.name.clone(),
                    value: a.value.offset(base),
                })
                .collect(),
            has_vars: true,
        }
    }

    /// One past the highest variable index in the term.
    #[must_use]
    pub fn var_span(&self) -> usize {
        if !self.has_vars {
            return 0;
        }
        self.args.iter().map(|a| a.value.var_span()).max().unwrap_or(0)
    }

    /// Rebuilds the term with every argument mapped through `f`.
    pub fn map_args<E>(&self, mut f: impl FnMut(&Term) -> Result<Term, E>) -> Result<Self, E> {
        let args = self
            .args
            .iter()
            .map(|a| {
                Ok(Argument {
                    name: a.name.clone(),
                    value: f(&a.value)?,
                })
            })
            .collect::<Result<Vec<_>, E>>()?;
        Ok(Self::new(Arc::clone(&self.functor), args))
    }
}

impl PartialEq for CompoundTerm {
    fn eq(&self, other: &Self) -> bool {
        self.functor == other.functor && self.args == other.args
    }
}

impl fmt::Display for CompoundTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.functor)?;
        if self.args.is_empty() {
            return Ok(());
        }
        write!(f, "(")?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if let Some(name) = &arg.name {
                write!(f, "{name}: ")?;
            }
            write!(f, "{}", arg.value)?;
        }
        write!(f, ")")
    }
}

/// Checks whether two terms can be unified, without keeping any bindings.
///
/// Variables in `a` and `b` share one index space, so a variable index that
/// appears in both terms denotes the same variable.
#[must_use]
pub fn unifiable(a: &Term, b: &Term) -> bool {
    let mut log = BindingLog::new();
    log.allocate(a.var_span().max(b.var_span()));
    log.unify(a, b)
}
