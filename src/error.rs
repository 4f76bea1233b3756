//! Error types for mendlog.
//!
//! All errors in mendlog are strongly typed using thiserror.
//! Unification failures and domain predicates answering `false` are not
//! errors: they drive backtracking and never leave the dispatcher.

use thiserror::Error;

/// Low-level syntax error produced by the term and clause parsers.
///
/// The module builder wraps it into [`CompileError::Syntax`] together with
/// the source line and the original rule text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason} (at offset {offset})")]
pub struct SyntaxError {
    /// What the parser expected or found.
    pub reason: String,
    /// Character offset into the parsed text.
    pub offset: usize,
}

impl SyntaxError {
    /// Creates a syntax error at the given character offset.
    #[must_use]
    pub fn new(reason: impl Into<String>, offset: usize) -> Self {
        Self {
            reason: reason.into(),
            offset,
        }
    }
}

/// Errors raised while compiling rule text into a module.
///
/// Compilation is all-or-nothing: any of these aborts the build and no
/// partial module is returned.
#[derive(Debug, Error)]
pub enum CompileError {
    /// A rule failed to parse.
    #[error("Syntax error at line {line}: {reason} in rule `{text}`")]
    Syntax {
        line: usize,
        text: String,
        reason: String,
    },

    /// The source ended inside a rule.
    #[error("Rule starting at line {line} is not terminated with '.': `{text}`")]
    UnterminatedRule {
        line: usize,
        text: String,
    },

    /// A body goal names nothing the module or its provider knows.
    #[error("Predicate '{name}' is not defined in rule `{clause}`")]
    UndefinedPredicate {
        name: String,
        clause: String,
    },

    /// A `meta(...)` clause is malformed or contradicts another one.
    #[error("Invalid meta-data `{clause}`: {reason}")]
    InvalidMetadata {
        clause: String,
        reason: String,
    },

    /// A call passes an argument its predicate's constraint forbids.
    #[error("Argument {argument} of '{predicate}' violates its constraint in rule `{clause}`: {reason}")]
    ConstraintViolation {
        predicate: String,
        argument: String,
        clause: String,
        reason: String,
    },

    /// A call to an external or built-in predicate has the wrong argument count.
    #[error("Predicate '{predicate}' expects {expected} arguments, got {actual} in rule `{clause}`")]
    ArityMismatch {
        predicate: String,
        expected: String,
        actual: usize,
        clause: String,
    },

    /// The rule file could not be read.
    #[error("Failed to read rules from {path}: {message}")]
    Io {
        path: String,
        message: String,
    },
}

/// Failure raised by a built-in expression function.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FunctionError {
    /// An operand has the wrong type.
    #[error("{func}: {detail}")]
    TypeMismatch {
        func: &'static str,
        detail: String,
    },

    /// Integer or float division by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// A `~~` pattern is not a valid regular expression.
    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern {
        pattern: String,
        message: String,
    },

    /// Any other function failure, such as integer overflow.
    #[error("{func}: {message}")]
    Failed {
        func: &'static str,
        message: String,
    },
}

/// Errors from the expression engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    /// The expression text could not be parsed.
    #[error("Expression `{expression}` not well formed: {reason}")]
    Parse {
        expression: String,
        reason: String,
    },

    /// A function invocation failed; `expression` is the offending sub-expression.
    #[error("Error evaluating the expression {expression}: {source}")]
    Evaluation {
        expression: String,
        #[source]
        source: FunctionError,
    },
}

impl ExpressionError {
    pub(crate) fn parse(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            expression: expression.into(),
            reason: reason.into(),
        }
    }
}

/// Errors that abort a running query.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Evaluating an `is` or test goal failed.
    #[error(transparent)]
    Expression(#[from] ExpressionError),

    /// An external predicate returned an error.
    #[error("Predicate '{name}' failed: {message}")]
    Predicate {
        name: String,
        message: String,
    },

    /// The query context was cancelled.
    #[error("Query was cancelled")]
    Cancelled,

    /// A goal cannot be run, for example an unbound call target.
    #[error("Invalid goal `{goal}`: {reason}")]
    InvalidGoal {
        goal: String,
        reason: String,
    },

    /// The solver ran out of steps.
    #[error("Query exceeded the step limit of {limit}")]
    StepLimitExceeded {
        limit: u64,
    },

    /// An external predicate did not answer in time.
    #[error("Predicate '{name}' timed out after {duration_ms}ms")]
    Timeout {
        name: String,
        duration_ms: u64,
    },
}

impl ResolveError {
    /// Creates a predicate failure.
    #[must_use]
    pub fn predicate(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Predicate {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid-goal failure.
    #[must_use]
    pub fn invalid_goal(goal: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidGoal {
            goal: goal.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by the repair orchestration backend.
#[derive(Debug, Error)]
pub enum RepairError {
    /// The backend refused to schedule the repair.
    #[error("Repair rejected: {reason}")]
    Rejected {
        reason: String,
    },

    /// The backend failed.
    #[error("Repair backend error: {message}")]
    Backend {
        message: String,
    },
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read configuration {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or fails validation.
    #[error("Invalid configuration: {message}")]
    Parse {
        message: String,
    },
}

/// Top-level error type for mendlog.
#[derive(Debug, Error)]
pub enum MendError {
    /// Rule compilation failed.
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    /// Expression parsing or evaluation failed.
    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    /// A query failed.
    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    /// A repair could not be scheduled.
    #[error("Repair error: {0}")]
    Repair(#[from] RepairError),

    /// Configuration could not be loaded.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// A broken internal invariant.
    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl MendError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a compile error.
    #[must_use]
    pub const fn is_compile(&self) -> bool {
        matches!(self, Self::Compile(_))
    }

    /// Returns true if the query was cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Resolve(ResolveError::Cancelled))
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Resolve(e) => matches!(e, ResolveError::Timeout { .. }),
            Self::Repair(e) => matches!(e, RepairError::Backend { .. }),
            Self::Compile(_) | Self::Expression(_) | Self::Config(_) | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for mendlog operations.
pub type MendResult<T> = Result<T, MendError>;
