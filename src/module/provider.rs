//! Resolution of goal names a module does not define itself.

use std::collections::HashMap;
use std::sync::Arc;

use crate::module::Module;
use crate::query::predicate::ExternalPredicate;

/// Result of asking a provider for a predicate.
#[derive(Debug, Clone)]
pub enum Lookup {
    /// An external predicate.
    Found(Arc<dyn ExternalPredicate>),
    /// A public predicate of another compiled module.
    Rules { module: Arc<Module>, index: usize },
    /// The name is known but unsupported here; clauses calling it are
    /// dropped from the module being compiled.
    NotApplicable,
    /// Unknown name.
    NotFound,
}

/// Supplies predicates to the module builder.
pub trait PredicateProvider: Send + Sync {
    /// Looks up `name` on behalf of the module named `module`.
    fn lookup(&self, name: &str, module: &str) -> Lookup;
}

impl PredicateProvider for () {
    fn lookup(&self, _name: &str, _module: &str) -> Lookup {
        Lookup::NotFound
    }
}

#[derive(Clone)]
enum Entry {
    Predicate(Arc<dyn ExternalPredicate>),
    NotApplicable,
}

/// A provider backed by a table of predicates and imported modules.
///
/// Registered predicates take precedence over imported modules; modules are
/// searched in the order they were added.
#[derive(Clone, Default)]
pub struct PredicateTable {
    entries: HashMap<String, Entry>,
    modules: Vec<Arc<Module>>,
}

impl std::fmt::Debug for PredicateTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("PredicateTable")
            .field("entries", &names)
            .field("modules", &self.modules.len())
            .finish()
    }
}

impl PredicateTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a predicate under its own name.
    pub fn add(&mut self, predicate: Arc<dyn ExternalPredicate>) -> &mut Self {
        self.entries
            .insert(predicate.name().to_string(), Entry::Predicate(predicate));
        self
    }

    /// Marks `name` as unsupported in this deployment.
    pub fn not_applicable(&mut self, name: impl Into<String>) -> &mut Self {
        self.entries.insert(name.into(), Entry::NotApplicable);
        self
    }

    /// Makes the public predicates of `module` callable.
    pub fn import(&mut self, module: Arc<Module>) -> &mut Self {
        self.modules.push(module);
        self
    }

    /// Number of registered names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is registered or imported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.modules.is_empty()
    }
}

impl PredicateProvider for PredicateTable {
    fn lookup(&self, name: &str, _module: &str) -> Lookup {
        match self.entries.get(name) {
            Some(Entry::Predicate(p)) => return Lookup::Found(Arc::clone(p)),
            Some(Entry::NotApplicable) => return Lookup::NotApplicable,
            None => {}
        }
        self.modules
            .iter()
            .find_map(|m| {
                m.public(name).map(|index| Lookup::Rules {
                    module: Arc::clone(m),
                    index,
                })
            })
            .unwrap_or(Lookup::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::predicate::{boolean, BooleanPredicate, CallArgs};
    use crate::query::QueryContext;
    use crate::error::ResolveError;
    use async_trait::async_trait;

    struct Probe;

    #[async_trait]
    impl BooleanPredicate for Probe {
        fn name(&self) -> &str {
            "Probe"
        }

        fn arity(&self) -> (usize, Option<usize>) {
            (0, Some(0))
        }

        async fn check(&self, _args: &CallArgs, _cx: &QueryContext) -> Result<bool, ResolveError> {
            Ok(true)
        }
    }

    #[test]
    fn test_table_lookup_order() {
        let shared = Arc::new(Module::parse("shared", &["Probe(1)", "helper(2)"], Arc::new(())).unwrap());
        let mut table = PredicateTable::new();
        table.import(shared).add(boolean(Probe)).not_applicable("RestartVm");

        assert!(matches!(table.lookup("Probe", "m"), Lookup::Found(_)));
        assert!(matches!(table.lookup("helper", "m"), Lookup::Rules { index: 1, .. }));
        assert!(matches!(table.lookup("RestartVm", "m"), Lookup::NotApplicable));
        assert!(matches!(table.lookup("nothing", "m"), Lookup::NotFound));
    }

    #[test]
    fn test_unit_provider_finds_nothing() {
        assert!(matches!(().lookup("anything", "m"), Lookup::NotFound));
    }
}
