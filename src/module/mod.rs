//! Compiled rule modules.
//!
//! A [`Module`] is an immutable set of predicate descriptors compiled from
//! rule text by [`ModuleBuilder`]. Each goal inside a clause body is
//! resolved at compile time to a [`Callee`]: a predicate of this module,
//! a predicate of another module, an asserted-facts predicate, an external
//! predicate supplied by the embedding application, or a built-in.

pub mod builder;
pub mod dynamic;
pub mod provider;
pub mod source;
pub mod system;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CompileError;
use crate::expression::Expression;
use crate::query::predicate::ExternalPredicate;
use crate::term::{ArgKey, CompoundTerm, Term, VarTable};

pub use builder::ModuleBuilder;
pub use dynamic::DynamicModule;
pub use provider::{Lookup, PredicateProvider, PredicateTable};
pub use source::{read_rules, split_rules, RuleText};

/// Contract on one argument of a predicate, checked at every call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgConstraint {
    /// Must be a variable not bound earlier in the calling clause.
    Output,
    /// Must be supplied.
    Input,
    /// Must be supplied and fully bound when the goal runs.
    Ground,
}

impl ArgConstraint {
    /// Parses a constraint name, ignoring case.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "output" => Some(Self::Output),
            "input" => Some(Self::Input),
            "ground" => Some(Self::Ground),
            _ => None,
        }
    }
}

impl fmt::Display for ArgConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Output => write!(f, "output"),
            Self::Input => write!(f, "input"),
            Self::Ground => write!(f, "ground"),
        }
    }
}

/// Whether other modules may call a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Callable from other modules.
    Public,
    /// Local to its module.
    Private,
}

impl Visibility {
    /// Names starting with `_` are private unless declared otherwise.
    #[must_use]
    pub fn default_for(name: &str) -> Self {
        if name.starts_with('_') {
            Self::Private
        } else {
            Self::Public
        }
    }
}

/// Language-level predicates handled directly by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    /// Always succeeds.
    True,
    /// Always fails; also spelled `false`.
    Fail,
    /// Adds a fact at the end; also spelled `assertz`.
    Assert,
    /// Adds a fact at the front.
    AssertA,
    /// Removes the first matching fact.
    Retract,
    /// Succeeds when the argument is unbound.
    Var,
    /// Succeeds when the argument is bound.
    NonVar,
    /// Writes its arguments to the `mendlog::rules` log target.
    Log,
}

impl Builtin {
    /// Looks up a builtin by any of its names.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "true" => Some(Self::True),
            "fail" | "false" => Some(Self::Fail),
            "assert" | "assertz" => Some(Self::Assert),
            "asserta" => Some(Self::AssertA),
            "retract" => Some(Self::Retract),
            "var" => Some(Self::Var),
            "nonvar" => Some(Self::NonVar),
            "log" => Some(Self::Log),
            _ => None,
        }
    }

    /// Canonical name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::True => "true",
            Self::Fail => "fail",
            Self::Assert => "assert",
            Self::AssertA => "asserta",
            Self::Retract => "retract",
            Self::Var => "var",
            Self::NonVar => "nonvar",
            Self::Log => "log",
        }
    }

    /// Minimum and maximum argument counts.
    #[must_use]
    pub const fn arity(self) -> (usize, Option<usize>) {
        match self {
            Self::True | Self::Fail => (0, Some(0)),
            Self::Assert | Self::AssertA | Self::Retract | Self::Var | Self::NonVar => (1, Some(1)),
            Self::Log => (1, None),
        }
    }
}

/// What a goal calls, resolved at compile time.
#[derive(Clone)]
pub enum Callee {
    /// A predicate of the module the clause belongs to.
    Local(usize),
    /// A public predicate of another module.
    Foreign(Arc<Module>, usize),
    /// Facts asserted at run time under this name.
    Dynamic(Arc<str>),
    /// A predicate from the provider.
    External(Arc<dyn ExternalPredicate>),
    /// A language builtin.
    Builtin(Builtin),
}

impl fmt::Debug for Callee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(i) => write!(f, "Local({i})"),
            Self::Foreign(m, i) => write!(f, "Foreign({}, {i})", m.name()),
            Self::Dynamic(name) => write!(f, "Dynamic({name})"),
            Self::External(p) => write!(f, "External({})", p.name()),
            Self::Builtin(b) => write!(f, "Builtin({})", b.name()),
        }
    }
}

/// A compiled body goal.
#[derive(Debug, Clone)]
pub enum Goal {
    /// Calls a predicate.
    Call { callee: Callee, term: CompoundTerm },
    /// Commits to the current clause.
    Cut,
    /// Unifies two terms.
    Unify(Term, Term),
    /// Binds the term to the expression's value.
    Is(Term, Arc<Expression>),
    /// Succeeds when the expression is `true`.
    Test(Arc<Expression>),
    /// Succeeds when the inner goals have no solution.
    Not(Arc<[Goal]>),
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call { term, .. } => write!(f, "{term}"),
            Self::Cut => write!(f, "!"),
            Self::Unify(a, b) => write!(f, "{a} = {b}"),
            Self::Is(t, e) => write!(f, "{t} is {e}"),
            Self::Test(e) => write!(f, "{e}"),
            Self::Not(goals) => {
                write!(f, "not(")?;
                for (i, g) in goals.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{g}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// One rule of a predicate.
#[derive(Debug)]
pub struct Clause {
    /// Head of the clause.
    pub head: CompoundTerm,
    /// Compiled body.
    pub goals: Arc<[Goal]>,
    /// Variables of the clause, numbered from zero.
    pub vars: Arc<VarTable>,
    /// Rule text, for diagnostics.
    pub text: String,
    /// Line the rule starts on.
    pub line: usize,
}

/// How a predicate gets its clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredicateKind {
    /// Defined by rules in the module.
    Rules,
    /// Declared `dynamic`; its facts are asserted at run time.
    Dynamic,
}

/// A predicate defined by a module.
#[derive(Debug)]
pub struct PredicateDescriptor {
    /// Predicate name.
    pub name: Arc<str>,
    /// Rule-defined or dynamic.
    pub kind: PredicateKind,
    /// Public or private.
    pub visibility: Visibility,
    /// Clauses in declaration order.
    pub clauses: Vec<Arc<Clause>>,
    /// Declared argument constraints.
    pub constraints: Vec<(ArgKey, ArgConstraint)>,
}

impl PredicateDescriptor {
    pub(crate) fn new(name: &str, kind: PredicateKind) -> Self {
        Self {
            name: Arc::from(name),
            kind,
            visibility: Visibility::default_for(name),
            clauses: Vec::new(),
            constraints: Vec::new(),
        }
    }

    /// Smallest and largest head arity over the clauses.
    #[must_use]
    pub fn arity_range(&self) -> Option<(usize, usize)> {
        let min = self.clauses.iter().map(|c| c.head.arity()).min()?;
        let max = self.clauses.iter().map(|c| c.head.arity()).max()?;
        Some((min, max))
    }

    /// The constraint declared for `key`, if any.
    #[must_use]
    pub fn constraint(&self, key: &ArgKey) -> Option<ArgConstraint> {
        self.constraints
            .iter()
            .find(|(k, _)| k.matches(key))
            .map(|(_, c)| *c)
    }
}

/// An immutable, compiled set of predicates.
pub struct Module {
    name: String,
    predicates: Vec<PredicateDescriptor>,
    index: HashMap<String, usize>,
    overrides: builder::Overrides,
    provider: Arc<dyn PredicateProvider>,
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("predicates", &self.predicates.len())
            .finish_non_exhaustive()
    }
}

impl Module {
    pub(crate) fn from_parts(
        name: String,
        predicates: Vec<PredicateDescriptor>,
        overrides: builder::Overrides,
        provider: Arc<dyn PredicateProvider>,
    ) -> Self {
        let index = predicates
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.to_string(), i))
            .collect();
        Self {
            name,
            predicates,
            index,
            overrides,
            provider,
        }
    }

    /// Compiles a list of rules, one rule per entry, without the final `.`.
    ///
    /// # Errors
    ///
    /// Returns the first [`CompileError`] found; no module is built.
    pub fn parse(
        name: &str,
        rules: &[&str],
        provider: Arc<dyn PredicateProvider>,
    ) -> Result<Self, CompileError> {
        let rules: Vec<RuleText> = rules
            .iter()
            .enumerate()
            .map(|(i, r)| RuleText::new(*r, i + 1))
            .collect();
        ModuleBuilder::new(name).provider(provider).build(&rules)
    }

    /// Compiles rule-file contents.
    ///
    /// # Errors
    ///
    /// Returns the first [`CompileError`] found; no module is built.
    pub fn from_source(
        name: &str,
        source: &str,
        provider: Arc<dyn PredicateProvider>,
    ) -> Result<Self, CompileError> {
        ModuleBuilder::new(name)
            .provider(provider)
            .build(&split_rules(source)?)
    }

    /// Reads and compiles a rule file.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::Io`] when the file cannot be read, otherwise
    /// the first compile error found.
    pub fn load(
        name: &str,
        path: impl AsRef<Path>,
        provider: Arc<dyn PredicateProvider>,
    ) -> Result<Self, CompileError> {
        ModuleBuilder::new(name)
            .provider(provider)
            .build(&read_rules(path)?)
    }

    /// Module name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index of the predicate named `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Index of `name` if it is visible outside this module.
    #[must_use]
    pub fn public(&self, name: &str) -> Option<usize> {
        self.get(name)
            .filter(|i| self.predicates[*i].visibility == Visibility::Public)
    }

    /// The predicate at `index`.
    #[must_use]
    pub fn descriptor(&self, index: usize) -> Option<&PredicateDescriptor> {
        self.predicates.get(index)
    }

    /// The predicate named `name`.
    #[must_use]
    pub fn predicate(&self, name: &str) -> Option<&PredicateDescriptor> {
        self.get(name).and_then(|i| self.descriptor(i))
    }

    /// Predicates in declaration order.
    pub fn predicates(&self) -> impl Iterator<Item = &PredicateDescriptor> {
        self.predicates.iter()
    }

    /// Number of predicates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    /// True for a module without predicates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Provider used to resolve names this module does not define.
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn PredicateProvider> {
        &self.provider
    }

    /// Resolves a goal against this module the way a clause body goal would
    /// be, for use as a query entry point.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::UndefinedPredicate`] when nothing defines the
    /// goal's functor.
    pub fn resolve_goal(&self, term: CompoundTerm) -> Result<Goal, CompileError> {
        builder::resolve_entry(self, term)
    }

    /// Hex digest over predicate names, kinds, arities and clause texts.
    ///
    /// Two compilations of the same rules have the same fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        let mut sorted: Vec<&PredicateDescriptor> = self.predicates.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));
        for p in sorted {
            hasher.update(p.name.as_bytes());
            hasher.update(&[p.kind as u8, p.visibility as u8]);
            if let Some((min, max)) = p.arity_range() {
                hasher.update(&(min as u64).to_le_bytes());
                hasher.update(&(max as u64).to_le_bytes());
            }
            for clause in &p.clauses {
                hasher.update(clause.text.as_bytes());
                hasher.update(b"\n");
            }
        }
        let mut overrides: Vec<_> = self.overrides.iter().collect();
        overrides.sort_by(|a, b| a.0.cmp(b.0));
        for (name, constraints) in overrides {
            hasher.update(name.as_bytes());
            for (key, constraint) in constraints {
                hasher.update(format!("{key}:{constraint}").as_bytes());
            }
        }
        hasher.finalize().to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(rules: &[&str]) -> Module {
        Module::parse("test", rules, Arc::new(())).unwrap()
    }

    #[test]
    fn test_descriptors_keep_source_order() {
        let m = compile(&["q(1)", "p(?X) :- q(?X)", "q(2)"]);
        assert_eq!(m.len(), 2);
        let q = m.predicate("q").unwrap();
        assert_eq!(q.clauses.len(), 2);
        assert_eq!(q.clauses[0].text, "q(1)");
        assert_eq!(q.clauses[1].text, "q(2)");
        assert_eq!(q.arity_range(), Some((1, 1)));
    }

    #[test]
    fn test_private_names_are_hidden() {
        let m = compile(&["_helper(1)", "p(?X) :- _helper(?X)"]);
        assert!(m.get("_helper").is_some());
        assert!(m.public("_helper").is_none());
        assert!(m.public("p").is_some());
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let rules = ["q(1)", "q(2)", "p(?X) :- q(?X), ?X > 1"];
        assert_eq!(compile(&rules).fingerprint(), compile(&rules).fingerprint());
        assert_ne!(
            compile(&rules).fingerprint(),
            compile(&["q(1)", "p(?X) :- q(?X)"]).fingerprint()
        );
    }

    #[test]
    fn test_builtin_names() {
        assert_eq!(Builtin::from_name("asserta"), Some(Builtin::AssertA));
        assert_eq!(Builtin::from_name("false"), Some(Builtin::Fail));
        assert_eq!(Builtin::from_name("member"), None);
        assert_eq!(Builtin::Log.arity(), (1, None));
    }

    #[test]
    fn test_constraint_lookup_by_position_or_name() {
        let mut p = PredicateDescriptor::new("GetRepairHistory", PredicateKind::Rules);
        p.constraints.push((ArgKey::Position(0), ArgConstraint::Output));
        assert_eq!(
            p.constraint(&ArgKey::Name("0".into())),
            Some(ArgConstraint::Output)
        );
        assert_eq!(p.constraint(&ArgKey::Position(1)), None);
    }
}
