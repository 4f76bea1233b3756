//! The system library: generic list predicates available to every module.

use std::sync::{Arc, OnceLock};

use crate::error::CompileError;
use crate::module::builder::ModuleBuilder;
use crate::module::source::RuleText;
use crate::module::Module;

const RULES: &[&str] = &[
    "repeat",
    "repeat :- repeat",
    "append([], ?Ys, ?Ys)",
    "append([?X|?Xs], ?Ys, [?X|?Zs]) :- append(?Xs, ?Ys, ?Zs)",
    "member(?X, [?X|_])",
    "member(?X, [_|?Xs]) :- member(?X, ?Xs)",
    "length([], 0)",
    "length([_|?Xs], ?Y) :- length(?Xs, ?Z), ?Y is ?Z + 1",
    "reverse(?Xs, ?Ys) :- _reverse(?Xs, [], ?Ys)",
    "_reverse([], ?Ys, ?Ys)",
    "_reverse([?X|?Xs], ?A, ?Ys) :- _reverse(?Xs, [?X|?A], ?Ys)",
    // Sorted insertion without duplicates.
    "AddToList(?X, [], [?X])",
    "AddToList(?X, [?X|?Ys], [?X|?Ys]) :- !",
    "AddToList(?X, [?Y|?Ys], [?X,?Y|?Ys]) :- ?X < ?Y, !",
    "AddToList(?X, [?Y|?Ys], [?Y|?Zs]) :- AddToList(?X, ?Ys, ?Zs)",
    // Sorted insertion of kv(Key, Value) pairs, replacing an existing key.
    "AddToMap(kv(?K,?V), [], [kv(?K,?V)])",
    "AddToMap(kv(?K,?V), [kv(?K,_)|?Ys], [kv(?K,?V)|?Ys]) :- !",
    "AddToMap(kv(?K,?V), [kv(?K1,?V1)|?Ys], [kv(?K,?V),kv(?K1,?V1)|?Ys]) :- ?K < ?K1, !",
    "AddToMap(kv(?K,?V), [kv(?K1,?V1)|?Ys], [kv(?K1,?V1)|?Zs]) :- AddToMap(kv(?K,?V), ?Ys, ?Zs)",
];

static SYSTEM: OnceLock<Arc<Module>> = OnceLock::new();

/// The compiled system library, built on first use.
///
/// # Errors
///
/// Fails only if the library rules themselves do not compile.
pub fn module() -> Result<Arc<Module>, CompileError> {
    if let Some(m) = SYSTEM.get() {
        return Ok(Arc::clone(m));
    }
    let rules: Vec<RuleText> = RULES
        .iter()
        .enumerate()
        .map(|(i, r)| RuleText::new(*r, i + 1))
        .collect();
    let built = Arc::new(ModuleBuilder::new("System").without_system().build(&rules)?);
    Ok(Arc::clone(SYSTEM.get_or_init(|| built)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_module_compiles() {
        let m = module().unwrap();
        for name in ["repeat", "append", "member", "length", "reverse", "AddToList", "AddToMap"] {
            assert!(m.public(name).is_some(), "{name} should be public");
        }
        assert!(m.public("_reverse").is_none());
        assert_eq!(m.predicate("AddToList").unwrap().clauses.len(), 4);
    }

    #[test]
    fn test_system_module_is_shared() {
        assert!(Arc::ptr_eq(&module().unwrap(), &module().unwrap()));
    }
}
