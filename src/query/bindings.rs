//! Variable bindings with an undo trail.
//!
//! Every binding is recorded on an append-only trail. A [`Checkpoint`]
//! captures the trail height so backtracking can undo exactly the
//! bindings made since, and nothing else.

use std::sync::Arc;

use crate::term::{CompoundTerm, Term};
use crate::value::Value;

/// A position in the binding log to rewind to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    trail: usize,
    slots: usize,
}

/// Slot storage for variable bindings plus the trail of bound slots.
#[derive(Debug, Default, Clone)]
pub struct BindingLog {
    slots: Vec<Option<Term>>,
    trail: Vec<usize>,
}

impl BindingLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `count` fresh slots and returns the first one's index.
    pub fn allocate(&mut self, count: usize) -> usize {
        let base = self.slots.len();
        self.slots.resize(base + count, None);
        base
    }

    /// Number of allocated slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when no slot has been allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Marks the current state for a later [`Self::rewind`].
    #[must_use]
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            trail: self.trail.len(),
            slots: self.slots.len(),
        }
    }

    /// Undoes every binding and allocation made after `cp`.
    pub fn rewind(&mut self, cp: Checkpoint) {
        for slot in self.trail.drain(cp.trail..) {
            if let Some(s) = self.slots.get_mut(slot) {
                *s = None;
            }
        }
        self.slots.truncate(cp.slots);
    }

    /// Binds slot `index` to `term`.
    pub fn bind(&mut self, index: usize, term: Term) {
        if index >= self.slots.len() {
            self.slots.resize(index + 1, None);
        }
        self.slots[index] = Some(term);
        self.trail.push(index);
    }

    /// The term bound to slot `index`, without following chains.
    #[must_use]
    pub fn lookup(&self, index: usize) -> Option<&Term> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Follows variable bindings until reaching an unbound variable or a
    /// non-variable term.
    #[must_use]
    pub fn walk<'a>(&'a self, term: &'a Term) -> &'a Term {
        let mut current = term;
        while let Term::Variable(v) = current {
            match self.lookup(v.index()) {
                Some(next) => current = next,
                None => break,
            }
        }
        current
    }

    /// Substitutes bindings throughout `term`.
    #[must_use]
    pub fn resolve(&self, term: &Term) -> Term {
        match self.walk(term) {
            Term::Compound(c) if !c.is_ground() => {
                let args = c.map_args::<std::convert::Infallible>(|a| Ok(self.resolve(a)));
                match args {
                    Ok(resolved) => Term::Compound(Arc::new(resolved)),
                    Err(never) => match never {},
                }
            }
            other => other.clone(),
        }
    }

    /// Returns the constant `term` is bound to, if any.
    #[must_use]
    pub fn value_of(&self, term: &Term) -> Option<Value> {
        self.walk(term).as_constant().cloned()
    }

    /// Unifies two terms, recording new bindings on the trail.
    ///
    /// On failure some bindings may already have been made; callers rewind
    /// to a checkpoint taken before the attempt.
    pub fn unify(&mut self, a: &Term, b: &Term) -> bool {
        let a = self.walk(a).clone();
        let b = self.walk(b).clone();
        match (&a, &b) {
            (Term::Variable(x), Term::Variable(y)) if x.index() == y.index() => true,
            (Term::Variable(x), _) => {
                self.bind(x.index(), b);
                true
            }
            (_, Term::Variable(y)) => {
                self.bind(y.index(), a);
                true
            }
            (Term::Constant(x), Term::Constant(y)) => {
                x == y || (x.is_numeric() && y.is_numeric() && x.loosely_equals(y))
            }
            (Term::Nil, Term::Nil) => true,
            (Term::Compound(x), Term::Compound(y)) => self.unify_compound(x, y),
            _ => false,
        }
    }

    /// Unifies a goal with a clause head or answer.
    ///
    /// When either side has named arguments, every argument of `head` must
    /// find a `goal` argument under the same key and extra goal arguments
    /// are ignored. Otherwise arities must match and arguments pair up by
    /// position.
    pub fn unify_compound(&mut self, goal: &CompoundTerm, head: &CompoundTerm) -> bool {
        if goal.functor() != head.functor() {
            return false;
        }
        if !goal.has_named_args() && !head.has_named_args() {
            if goal.arity() != head.arity() {
                return false;
            }
            return goal
                .args()
                .iter()
                .zip(head.args())
                .all(|(g, h)| self.unify(&g.value, &h.value));
        }
        head.args().iter().enumerate().all(|(i, h)| {
            let key = h.key(i);
            match goal.get(&key) {
                Some(g) => self.unify(g, &h.value),
                None => false,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::Argument;

    fn var(name: &str, index: usize) -> Term {
        Term::var(name, index)
    }

    #[test]
    fn test_bind_and_rewind() {
        let mut log = BindingLog::new();
        log.allocate(2);
        let cp = log.checkpoint();
        assert!(log.unify(&var("X", 0), &Term::constant(5)));
        assert_eq!(log.value_of(&var("X", 0)), Some(Value::Int(5)));
        log.rewind(cp);
        assert_eq!(log.value_of(&var("X", 0)), None);
    }

    #[test]
    fn test_rewind_releases_allocations() {
        let mut log = BindingLog::new();
        log.allocate(1);
        let cp = log.checkpoint();
        let base = log.allocate(3);
        assert_eq!(base, 1);
        log.rewind(cp);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_variable_chain_resolves() {
        let mut log = BindingLog::new();
        log.allocate(2);
        assert!(log.unify(&var("X", 0), &var("Y", 1)));
        assert!(log.unify(&var("Y", 1), &Term::string("node")));
        assert_eq!(log.value_of(&var("X", 0)), Some(Value::from("node")));
    }

    #[test]
    fn test_resolve_substitutes_nested() {
        let mut log = BindingLog::new();
        log.allocate(1);
        let t = Term::list(vec![var("X", 0)], Term::Nil);
        log.unify(&var("X", 0), &Term::constant(1));
        assert_eq!(log.resolve(&t).to_string(), "[1]");
    }

    #[test]
    fn test_numeric_constants_unify_loosely() {
        let mut log = BindingLog::new();
        assert!(log.unify(&Term::constant(2), &Term::constant(2.0)));
        assert!(!log.unify(&Term::constant(2), &Term::string("2")));
    }

    #[test]
    fn test_named_arguments_ignore_extra_goal_args() {
        let goal = CompoundTerm::new(
            "Mitigate",
            vec![
                Argument::named("ErrorCode", Term::string("FO001")),
                Argument::named("NodeName", Term::string("_Node_0")),
            ],
        );
        let head = CompoundTerm::new(
            "Mitigate",
            vec![Argument::named("ErrorCode", var("Code", 0))],
        );
        let mut log = BindingLog::new();
        log.allocate(1);
        assert!(log.unify_compound(&goal, &head));
        assert_eq!(log.value_of(&var("Code", 0)), Some(Value::from("FO001")));
    }

    #[test]
    fn test_named_head_argument_missing_from_goal_fails() {
        let goal = CompoundTerm::new("Mitigate", vec![Argument::named("AppName", Term::string("a"))]);
        let head = CompoundTerm::new(
            "Mitigate",
            vec![Argument::named("ErrorCode", Term::string("FO001"))],
        );
        assert!(!BindingLog::new().unify_compound(&goal, &head));
    }

    #[test]
    fn test_positional_arity_mismatch_fails() {
        let a = CompoundTerm::positional("p", vec![Term::constant(1)]);
        let b = CompoundTerm::positional("p", vec![Term::constant(1), Term::constant(2)]);
        assert!(!BindingLog::new().unify_compound(&a, &b));
    }
}
