//! # mendlog - Rule-Driven Repair Decisions
//!
//! mendlog compiles repair rules written in a small Prolog-like language and
//! resolves them with an asynchronous backtracking query engine. Rules call
//! into the embedding application through external predicates, which is how
//! a self-healing agent turns a health report into restart or cleanup
//! actions.
//!
//! ## Core Concepts
//!
//! - **Term**: constants, logic variables, compound terms with positional or
//!   named arguments, and `{...}` templates
//! - **Expression**: infix arithmetic, comparison and string functions used
//!   by `is` goals, tests and templates
//! - **Module**: a compiled set of rules plus the predicates it may call
//! - **QueryContext**: a tree of resolution branches tracking stability,
//!   suspension and cancellation
//! - **QueryDispatcher**: finds solutions lazily, one at a time
//!
//! ## Usage
//!
//! ```
//! use mendlog::{Expression, Value};
//! use mendlog::module::{split_rules, ModuleBuilder};
//!
//! let rules = split_rules("## parity\neven(0).\neven(?N) :- ?N > 0, ?M is ?N - 2, even(?M).").unwrap();
//! let module = ModuleBuilder::new("numbers").build(&rules).unwrap();
//! assert_eq!(module.predicate("even").unwrap().clauses.len(), 2);
//!
//! let expr = Expression::build("1 + 2 * 3").unwrap();
//! assert_eq!(expr.evaluate(&()).unwrap(), Value::Int(7));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod expression;
pub mod module;
pub mod query;
pub mod repair;
pub mod term;
pub mod value;

pub use config::{EngineConfig, RepairConfig, RuleSetConfig};
pub use error::{
    CompileError, ConfigError, ExpressionError, FunctionError, MendError, MendResult, RepairError,
    ResolveError, SyntaxError,
};
pub use expression::{Expression, PropertyContext};
pub use module::{ArgConstraint, Module, ModuleBuilder, PredicateProvider, PredicateTable};
pub use query::{
    boolean, single, Answer, BooleanPredicate, CallArgs, ContextEvent, ContextId,
    ExternalPredicate, PredicateResolver, Query, QueryContext, QueryDispatcher, QueryOptions,
    SinglePredicate, Solution,
};
pub use repair::{
    run_repair_query, InMemoryRepairExecutor, RepairAction, RepairExecutor, RepairFacts,
    RepairPredicates,
};
pub use term::{parse_term, Argument, CompoundTerm, Term, VarTable, Variable};
pub use value::Value;
