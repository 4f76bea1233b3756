//! Query execution: bindings, the context tree, external predicates and
//! the dispatcher that ties them together.

pub mod bindings;
pub mod context;
pub mod dispatcher;
pub mod predicate;

pub use bindings::{BindingLog, Checkpoint};
pub use context::{ContextEvent, ContextId, QueryContext, QueryId};
pub use dispatcher::{Query, QueryDispatcher, QueryOptions, Solution, DEFAULT_MAX_STEPS};
pub use predicate::{
    boolean, single, Answer, BooleanPredicate, CallArgs, ExternalPredicate, PredicateResolver,
    SinglePredicate,
};
