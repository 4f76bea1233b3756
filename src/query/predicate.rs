//! Externally supplied predicates.
//!
//! The embedding application extends the rule language with predicates
//! implemented in Rust. Each call of such a predicate gets a fresh
//! [`PredicateResolver`] that produces answers asynchronously; every answer
//! is unified with the call's arguments.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ResolveError;
use crate::module::ArgConstraint;
use crate::query::context::QueryContext;
use crate::term::{ArgKey, Argument, CompoundTerm, Term};
use crate::value::Value;

/// The arguments of one predicate call, with bindings substituted.
#[derive(Debug, Clone)]
pub struct CallArgs {
    term: CompoundTerm,
}

impl CallArgs {
    /// Wraps the resolved call term.
    #[must_use]
    pub const fn new(term: CompoundTerm) -> Self {
        Self { term }
    }

    /// The call term with every argument resolved.
    #[must_use]
    pub const fn term(&self) -> &CompoundTerm {
        &self.term
    }

    /// Predicate name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.term.functor()
    }

    /// Number of arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.term.arity()
    }

    /// True for a call without arguments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.term.arity() == 0
    }

    /// Argument named `name`, or at `position` for positional calls.
    #[must_use]
    pub fn get(&self, position: usize, name: &str) -> Option<&Term> {
        self.term.lookup(position, name)
    }

    /// Constant value of an argument; `None` when absent or unbound.
    #[must_use]
    pub fn value(&self, position: usize, name: &str) -> Option<&Value> {
        self.get(position, name).and_then(Term::as_constant)
    }

    /// Text rendering of an argument's constant value.
    #[must_use]
    pub fn string(&self, position: usize, name: &str) -> Option<String> {
        self.value(position, name).map(Value::to_text)
    }

    /// True when the argument is present but still a variable.
    #[must_use]
    pub fn is_unbound(&self, position: usize, name: &str) -> bool {
        self.get(position, name).is_some_and(Term::is_variable)
    }

    /// Reads a boolean argument.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::InvalidGoal`] when the argument is present but
    /// not a boolean.
    pub fn bool_arg(&self, position: usize, name: &str) -> Result<Option<bool>, ResolveError> {
        match self.value(position, name) {
            None => Ok(None),
            Some(v) => v.to_bool().map(Some).ok_or_else(|| {
                ResolveError::invalid_goal(&self.term, format!("{name} must be a boolean, got {v}"))
            }),
        }
    }

    /// Reads a timespan argument.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::InvalidGoal`] when the argument is present but
    /// not a timespan.
    pub fn duration_arg(
        &self,
        position: usize,
        name: &str,
    ) -> Result<Option<Duration>, ResolveError> {
        match self.value(position, name) {
            None => Ok(None),
            Some(v) => v.to_duration().map(Some).ok_or_else(|| {
                ResolveError::invalid_goal(
                    &self.term,
                    format!("{name} must be a timespan (hh:mm:ss), got {v}"),
                )
            }),
        }
    }

    /// Reads an integer argument.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::InvalidGoal`] when the argument is present but
    /// not an integer.
    pub fn int_arg(&self, position: usize, name: &str) -> Result<Option<i64>, ResolveError> {
        match self.value(position, name) {
            None => Ok(None),
            Some(v) => v.as_int().map(Some).ok_or_else(|| {
                ResolveError::invalid_goal(&self.term, format!("{name} must be an integer, got {v}"))
            }),
        }
    }
}

/// One answer from a predicate resolver.
///
/// Each argument is unified with the call argument under the same key;
/// call arguments the answer does not mention are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Answer {
    args: Vec<Argument>,
}

impl Answer {
    /// An answer that binds nothing.
    #[must_use]
    pub fn yes() -> Self {
        Self::default()
    }

    /// Binds the argument at `position`.
    #[must_use]
    pub fn with(mut self, position: usize, value: impl Into<Term>) -> Self {
        self.args
            .push(Argument::named(position.to_string(), value.into()));
        self
    }

    /// Binds the argument named `name`.
    #[must_use]
    pub fn with_named(mut self, name: impl Into<String>, value: impl Into<Term>) -> Self {
        self.args.push(Argument::named(name, value.into()));
        self
    }

    /// The bindings collected so far.
    #[must_use]
    pub fn args(&self) -> &[Argument] {
        &self.args
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = (ArgKey, &Term)> {
        self.args.iter().enumerate().map(|(i, a)| {
            let key = a.name.as_deref().map_or(ArgKey::Position(i), ArgKey::parse);
            (key, &a.value)
        })
    }
}

/// Produces the answers of one predicate call, one at a time.
#[async_trait]
pub trait PredicateResolver: Send {
    /// Next answer, or `None` once exhausted.
    ///
    /// Implementations should return promptly once `cx` is cancelled; the
    /// dispatcher also abandons the call at its next await point.
    async fn next(&mut self, cx: &QueryContext) -> Result<Option<Answer>, ResolveError>;
}

/// A predicate implemented by the embedding application.
pub trait ExternalPredicate: Send + Sync {
    /// Name rules call the predicate by.
    fn name(&self) -> &str;

    /// Minimum and maximum arity; `None` means unbounded.
    fn arity(&self) -> (usize, Option<usize>);

    /// Argument contracts checked when rules are compiled.
    fn constraints(&self) -> Vec<(ArgKey, ArgConstraint)> {
        Vec::new()
    }

    /// Starts a call with the given arguments.
    fn resolver(&self, args: CallArgs) -> Box<dyn PredicateResolver>;
}

impl std::fmt::Debug for dyn ExternalPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExternalPredicate({})", self.name())
    }
}

/// A predicate that either succeeds once, binding nothing, or fails.
#[async_trait]
pub trait BooleanPredicate: Send + Sync + 'static {
    /// See [`ExternalPredicate::name`].
    fn name(&self) -> &str;

    /// See [`ExternalPredicate::arity`].
    fn arity(&self) -> (usize, Option<usize>);

    /// See [`ExternalPredicate::constraints`].
    fn constraints(&self) -> Vec<(ArgKey, ArgConstraint)> {
        Vec::new()
    }

    /// Decides the call.
    async fn check(&self, args: &CallArgs, cx: &QueryContext) -> Result<bool, ResolveError>;
}

/// A predicate producing at most one answer.
#[async_trait]
pub trait SinglePredicate: Send + Sync + 'static {
    /// See [`ExternalPredicate::name`].
    fn name(&self) -> &str;

    /// See [`ExternalPredicate::arity`].
    fn arity(&self) -> (usize, Option<usize>);

    /// See [`ExternalPredicate::constraints`].
    fn constraints(&self) -> Vec<(ArgKey, ArgConstraint)> {
        Vec::new()
    }

    /// The answer, or `None` to fail.
    async fn solve(&self, args: &CallArgs, cx: &QueryContext)
        -> Result<Option<Answer>, ResolveError>;
}

/// Adapts a [`BooleanPredicate`] to [`ExternalPredicate`].
#[derive(Debug)]
pub struct Boolean<P>(Arc<P>);

/// Adapts a [`SinglePredicate`] to [`ExternalPredicate`].
#[derive(Debug)]
pub struct Single<P>(Arc<P>);

/// Wraps `predicate` for registration with a provider.
#[must_use]
pub fn boolean<P: BooleanPredicate>(predicate: P) -> Arc<dyn ExternalPredicate> {
    Arc::new(Boolean(Arc::new(predicate)))
}

/// Wraps `predicate` for registration with a provider.
#[must_use]
pub fn single<P: SinglePredicate>(predicate: P) -> Arc<dyn ExternalPredicate> {
    Arc::new(Single(Arc::new(predicate)))
}

struct BooleanResolver<P> {
    predicate: Arc<P>,
    args: CallArgs,
    done: bool,
}

struct SingleResolver<P> {
    predicate: Arc<P>,
    args: CallArgs,
    done: bool,
}

impl<P: BooleanPredicate> ExternalPredicate for Boolean<P> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn arity(&self) -> (usize, Option<usize>) {
        self.0.arity()
    }

    fn constraints(&self) -> Vec<(ArgKey, ArgConstraint)> {
        self.0.constraints()
    }

    fn resolver(&self, args: CallArgs) -> Box<dyn PredicateResolver> {
        Box::new(BooleanResolver {
            predicate: Arc::clone(&self.0),
            args,
            done: false,
        })
    }
}

#[async_trait]
impl<P: BooleanPredicate> PredicateResolver for BooleanResolver<P> {
    async fn next(&mut self, cx: &QueryContext) -> Result<Option<Answer>, ResolveError> {
        if std::mem::replace(&mut self.done, true) {
            return Ok(None);
        }
        let ok = self.predicate.check(&self.args, cx).await?;
        Ok(ok.then(Answer::yes))
    }
}

impl<P: SinglePredicate> ExternalPredicate for Single<P> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn arity(&self) -> (usize, Option<usize>) {
        self.0.arity()
    }

    fn constraints(&self) -> Vec<(ArgKey, ArgConstraint)> {
        self.0.constraints()
    }

    fn resolver(&self, args: CallArgs) -> Box<dyn PredicateResolver> {
        Box::new(SingleResolver {
            predicate: Arc::clone(&self.0),
            args,
            done: false,
        })
    }
}

#[async_trait]
impl<P: SinglePredicate> PredicateResolver for SingleResolver<P> {
    async fn next(&mut self, cx: &QueryContext) -> Result<Option<Answer>, ResolveError> {
        if std::mem::replace(&mut self.done, true) {
            return Ok(None);
        }
        self.predicate.solve(&self.args, cx).await
    }
}
