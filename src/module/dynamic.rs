//! Asserted facts, mutable for the life of one query session.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::ResolveError;
use crate::term::CompoundTerm;

/// Facts added with `assert`/`asserta` and removed with `retract`.
///
/// Facts are ground compound terms grouped by functor. Readers take a
/// snapshot, so a goal already iterating over facts is unaffected by later
/// changes.
#[derive(Debug, Default)]
pub struct DynamicModule {
    facts: RwLock<HashMap<String, Vec<Arc<CompoundTerm>>>>,
}

impl DynamicModule {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fact, at the end when `append` is true, otherwise at the front.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::InvalidGoal`] when `fact` still contains
    /// unbound variables.
    pub fn assert(&self, fact: CompoundTerm, append: bool) -> Result<(), ResolveError> {
        if !fact.is_ground() {
            return Err(ResolveError::invalid_goal(
                &fact,
                "asserted facts must be ground",
            ));
        }
        let mut facts = self.facts.write().unwrap_or_else(PoisonError::into_inner);
        let list = facts.entry(fact.functor().to_string()).or_default();
        if append {
            list.push(Arc::new(fact));
        } else {
            list.insert(0, Arc::new(fact));
        }
        Ok(())
    }

    /// Removes the first fact named `functor` accepted by `matches`.
    pub fn retract_first(
        &self,
        functor: &str,
        mut matches: impl FnMut(&CompoundTerm) -> bool,
    ) -> Option<Arc<CompoundTerm>> {
        let mut facts = self.facts.write().unwrap_or_else(PoisonError::into_inner);
        let list = facts.get_mut(functor)?;
        let pos = list.iter().position(|f| matches(f))?;
        Some(list.remove(pos))
    }

    /// Snapshot of the facts named `functor`, in order.
    #[must_use]
    pub fn facts(&self, functor: &str) -> Vec<Arc<CompoundTerm>> {
        self.facts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(functor)
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of facts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.facts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }

    /// True when nothing has been asserted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::Term;

    fn fact(name: &str, v: i64) -> CompoundTerm {
        CompoundTerm::positional(name, vec![Term::constant(v)])
    }

    #[test]
    fn test_assert_append_and_front() {
        let m = DynamicModule::new();
        m.assert(fact("seen", 1), true).unwrap();
        m.assert(fact("seen", 2), true).unwrap();
        m.assert(fact("seen", 0), false).unwrap();
        let order: Vec<String> = m.facts("seen").iter().map(|f| f.to_string()).collect();
        assert_eq!(order, vec!["seen(0)", "seen(1)", "seen(2)"]);
        assert_eq!(m.len(), 3);
    }

    #[test]
    fn test_assert_rejects_variables() {
        let m = DynamicModule::new();
        let open = CompoundTerm::positional("seen", vec![Term::var("X", 0)]);
        assert!(m.assert(open, true).is_err());
        assert!(m.is_empty());
    }

    #[test]
    fn test_retract_first_match() {
        let m = DynamicModule::new();
        m.assert(fact("seen", 1), true).unwrap();
        m.assert(fact("seen", 2), true).unwrap();
        let removed = m
            .retract_first("seen", |f| f.arg(0) == Some(&Term::constant(2)))
            .unwrap();
        assert_eq!(removed.to_string(), "seen(2)");
        assert_eq!(m.facts("seen").len(), 1);
        assert!(m.retract_first("missing", |_| true).is_none());
    }

    #[test]
    fn test_snapshot_is_stable() {
        let m = DynamicModule::new();
        m.assert(fact("seen", 1), true).unwrap();
        let snapshot = m.facts("seen");
        m.assert(fact("seen", 2), true).unwrap();
        assert_eq!(snapshot.len(), 1);
    }
}
