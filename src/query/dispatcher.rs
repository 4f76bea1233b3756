//! The query dispatcher.
//!
//! Goals are resolved depth-first, left to right, with chronological
//! backtracking. The solver keeps three pieces of state:
//!
//! - a [`BindingLog`] holding every variable of every active clause;
//! - a stack of choice points, each remembering a binding checkpoint and
//!   the untried alternatives of one call;
//! - a continuation, a shared linked list of the goals still to run.
//!
//! Backtracking pops the newest choice point, rewinds bindings to its
//! checkpoint and resumes its next alternative. Cut truncates the choice
//! stack to the height it had when the clause's predicate was called.
//!
//! Each predicate call runs in its own child [`QueryContext`]. The child is
//! unstable while the call is running, stable once it has produced an
//! answer, unstable again while it is retried, and detached once its
//! alternatives are exhausted or cut away.

use std::sync::Arc;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::error::{MendResult, ResolveError};
use crate::expression::{Expression, PropertyContext};
use crate::module::{Builtin, Callee, Goal, Module};
use crate::query::bindings::{BindingLog, Checkpoint};
use crate::query::context::QueryContext;
use crate::query::predicate::{Answer, CallArgs, PredicateResolver};
use crate::term::{parse_term, CompoundTerm, Term, VarTable};
use crate::value::Value;

/// Default solver step limit per query.
///
/// Every predicate call adds one node to the query's context tree and nodes
/// are only released with the tree, so the limit also bounds the tree at
/// `max_steps + 1` nodes.
pub const DEFAULT_MAX_STEPS: u64 = 1_000_000;

/// Limits and diagnostics for one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    /// Goals the solver may resolve before failing with a step-limit error.
    pub max_steps: u64,
    /// Upper bound on each external predicate call.
    pub predicate_timeout: Option<Duration>,
    /// Emit a trace event for every goal.
    pub trace: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            predicate_timeout: None,
            trace: false,
        }
    }
}

impl From<&EngineConfig> for QueryOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_steps: config.max_steps,
            predicate_timeout: config.predicate_timeout_ms.map(Duration::from_millis),
            trace: config.trace,
        }
    }
}

/// Runs queries against a compiled module.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use mendlog::{Module, QueryContext, QueryDispatcher};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let module = Module::parse("demo", &["q(1)", "q(2)", "p(?X) :- q(?X), ?X > 1"], Arc::new(())).unwrap();
/// let dispatcher = QueryDispatcher::new(Arc::new(module));
/// let mut query = dispatcher.query_text("p(?Out)", QueryContext::new_root()).unwrap();
/// let solution = query.next().await.unwrap().unwrap();
/// assert_eq!(solution.get("Out").unwrap().to_string(), "2");
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct QueryDispatcher {
    module: Arc<Module>,
    options: QueryOptions,
}

impl QueryDispatcher {
    /// Creates a dispatcher with default options.
    #[must_use]
    pub fn new(module: Arc<Module>) -> Self {
        Self {
            module,
            options: QueryOptions::default(),
        }
    }

    /// Replaces the query options.
    #[must_use]
    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    /// The module queries run against.
    #[must_use]
    pub const fn module(&self) -> &Arc<Module> {
        &self.module
    }

    /// The options applied to every query.
    #[must_use]
    pub const fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// Starts a lazy query for `goal` in `cx`.
    ///
    /// # Errors
    ///
    /// Returns a compile error when nothing defines the goal's functor.
    pub fn query(&self, goal: CompoundTerm, cx: QueryContext) -> MendResult<Query> {
        self.start(goal, VarTable::new(), cx)
    }

    /// Parses `text` as a goal and starts a lazy query for it.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::InvalidGoal`] when `text` is not a predicate
    /// call, or a compile error when nothing defines it.
    pub fn query_text(&self, text: &str, cx: QueryContext) -> MendResult<Query> {
        let mut vars = VarTable::new();
        let term = parse_term(text, &mut vars)
            .map_err(|e| ResolveError::invalid_goal(text, e.reason))?;
        let goal = match term {
            Term::Compound(c) => CompoundTerm::clone(&c),
            Term::Constant(Value::String(name)) => CompoundTerm::new(name, Vec::new()),
            _ => return Err(ResolveError::invalid_goal(text, "not a predicate call").into()),
        };
        self.start(goal, vars, cx)
    }

    /// Resolves `goal` in a fresh root context and reports whether it has a
    /// solution. Only the first solution is computed.
    ///
    /// # Errors
    ///
    /// Propagates compile, expression, predicate, timeout, step-limit and
    /// cancellation errors.
    pub async fn run_query(&self, goal: CompoundTerm) -> MendResult<bool> {
        self.run_query_in(goal, &QueryContext::new_root()).await
    }

    /// Like [`QueryDispatcher::run_query`], in a caller-supplied context.
    ///
    /// # Errors
    ///
    /// See [`QueryDispatcher::run_query`].
    pub async fn run_query_in(&self, goal: CompoundTerm, cx: &QueryContext) -> MendResult<bool> {
        let mut query = self.query(goal, cx.clone())?;
        let found = query.next().await?.is_some();
        query.close();
        Ok(found)
    }

    fn start(&self, goal: CompoundTerm, vars: VarTable, cx: QueryContext) -> MendResult<Query> {
        let compiled = self.module.resolve_goal(goal.clone())?;

        let mut names = Vec::new();
        collect_names(&Term::compound(goal.clone()), &mut names);

        let mut bindings = BindingLog::new();
        bindings.allocate(vars.len().max(goal.var_span()));
        let initial = bindings.checkpoint();

        let entry = Arc::new(Activation {
            goals: Arc::from(vec![compiled]),
            base: 0,
            scope: Arc::new(vars),
            module: Arc::clone(&self.module),
            cut_barrier: 0,
            ctx: cx.clone(),
        });
        tracing::debug!(
            module = %self.module.name(),
            query = %cx.query_id(),
            goal = %goal,
            "query started"
        );

        Ok(Query {
            machine: Machine {
                bindings,
                choices: Vec::new(),
                steps: 0,
                options: self.options.clone(),
                root: cx,
                initial,
            },
            names,
            state: State::Fresh(Some(Arc::new(Step {
                kind: StepKind::Body { act: entry, pc: 0 },
                next: None,
            }))),
        })
    }
}

/// Variable bindings of one solution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Solution {
    bindings: Vec<(String, Term)>,
}

impl Solution {
    /// The term bound to the query variable `name` (without `?`).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Term> {
        self.bindings
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    /// Like [`Self::get`], for variables bound to constants.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).and_then(Term::as_constant)
    }

    /// Variable names and their terms, in query order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Term)> {
        self.bindings.iter().map(|(n, t)| (n.as_str(), t))
    }
}

enum State {
    Fresh(Cont),
    Yielded,
    Done,
}

/// A running query producing solutions on demand.
pub struct Query {
    machine: Machine,
    names: Vec<(String, usize)>,
    state: State,
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("steps", &self.machine.steps)
            .field("choices", &self.machine.choices.len())
            .finish_non_exhaustive()
    }
}

impl Query {
    /// Computes the next solution, or `None` when there are no more.
    ///
    /// # Errors
    ///
    /// An error ends the query; bindings made by the failed attempt are
    /// discarded.
    pub async fn next(&mut self) -> MendResult<Option<Solution>> {
        let flow = match std::mem::replace(&mut self.state, State::Done) {
            State::Fresh(cont) => Flow::Proceed(cont),
            State::Yielded => Flow::Fail,
            State::Done => return Ok(None),
        };
        match self.machine.run(flow).await {
            Ok(true) => {
                self.state = State::Yielded;
                Ok(Some(self.solution()))
            }
            Ok(false) => {
                self.finish();
                Ok(None)
            }
            Err(e) => {
                self.machine.bindings.rewind(self.machine.initial);
                self.finish();
                Err(e.into())
            }
        }
    }

    /// Stops the query, releasing every pending alternative.
    pub fn close(&mut self) {
        if !matches!(self.state, State::Done) {
            self.state = State::Done;
            self.finish();
        }
    }

    /// Solver steps taken so far.
    #[must_use]
    pub const fn steps(&self) -> u64 {
        self.machine.steps
    }

    fn solution(&self) -> Solution {
        let bindings = self
            .names
            .iter()
            .map(|(name, index)| {
                let var = Term::var(name.as_str(), *index);
                (name.clone(), self.machine.bindings.resolve(&var))
            })
            .collect();
        Solution { bindings }
    }

    fn finish(&mut self) {
        self.machine.release();
        let root = &self.machine.root;
        root.clear_children();
        root.set_stable(true);
        tracing::debug!(
            query = %root.query_id(),
            steps = self.machine.steps,
            "query finished"
        );
    }
}

impl Drop for Query {
    fn drop(&mut self) {
        self.close();
    }
}

type Cont = Option<Arc<Step>>;

/// One clause body being executed.
struct Activation {
    goals: Arc<[Goal]>,
    /// Offset of the clause's variables in the binding log.
    base: usize,
    scope: Arc<VarTable>,
    module: Arc<Module>,
    /// Choice-stack height restored by a cut in this body.
    cut_barrier: usize,
    ctx: QueryContext,
}

struct Step {
    kind: StepKind,
    next: Cont,
}

enum StepKind {
    Body { act: Arc<Activation>, pc: usize },
    /// A call produced an answer.
    Exit(QueryContext),
    /// The goal of a negation succeeded, so the negation fails.
    NegationSucceeded(usize),
}

enum Alternative {
    Clauses {
        module: Arc<Module>,
        predicate: usize,
        next: usize,
    },
    Facts {
        facts: Vec<Arc<CompoundTerm>>,
        next: usize,
    },
    Resolver {
        name: String,
        resolver: Box<dyn PredicateResolver>,
    },
    /// Continues after a negation whose goal failed.
    Resume,
}

struct Choice {
    checkpoint: Checkpoint,
    alt: Alternative,
    goal: CompoundTerm,
    cont: Cont,
    ctx: Option<QueryContext>,
    attempts: u32,
}

enum Flow {
    Proceed(Cont),
    Fail,
}

enum Resumed {
    Next { cont: Cont, more: bool },
    Exhausted,
}

struct Machine {
    bindings: BindingLog,
    choices: Vec<Choice>,
    steps: u64,
    options: QueryOptions,
    root: QueryContext,
    initial: Checkpoint,
}

impl Machine {
    /// Runs until a solution (`true`) or until no alternatives remain.
    async fn run(&mut self, mut flow: Flow) -> Result<bool, ResolveError> {
        loop {
            let cont = match flow {
                Flow::Proceed(cont) => cont,
                Flow::Fail => match self.backtrack().await? {
                    Some(cont) => cont,
                    None => return Ok(false),
                },
            };
            let Some(step) = cont else {
                return Ok(true);
            };
            self.tick()?;
            flow = self.step(&step)?;
        }
    }

    fn tick(&mut self) -> Result<(), ResolveError> {
        self.steps += 1;
        if self.steps > self.options.max_steps {
            return Err(ResolveError::StepLimitExceeded {
                limit: self.options.max_steps,
            });
        }
        if self.root.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }
        Ok(())
    }

    fn step(&mut self, step: &Arc<Step>) -> Result<Flow, ResolveError> {
        match &step.kind {
            StepKind::Exit(ctx) => {
                ctx.set_stable(true);
                Ok(Flow::Proceed(step.next.clone()))
            }
            StepKind::NegationSucceeded(height) => {
                self.cut_to(*height, None);
                Ok(Flow::Fail)
            }
            StepKind::Body { act, pc } => {
                let Some(goal) = act.goals.get(*pc) else {
                    return Ok(Flow::Proceed(step.next.clone()));
                };
                let after = if pc + 1 == act.goals.len() {
                    step.next.clone()
                } else {
                    Some(Arc::new(Step {
                        kind: StepKind::Body {
                            act: Arc::clone(act),
                            pc: pc + 1,
                        },
                        next: step.next.clone(),
                    }))
                };
                if self.options.trace {
                    tracing::trace!(depth = self.choices.len(), goal = %goal, "resolve");
                }
                self.execute(goal, act, after)
            }
        }
    }

    fn execute(&mut self, goal: &Goal, act: &Arc<Activation>, after: Cont) -> Result<Flow, ResolveError> {
        match goal {
            Goal::Cut => {
                self.cut_to(act.cut_barrier, Some(&act.ctx));
                Ok(Flow::Proceed(after))
            }
            Goal::Unify(a, b) => {
                let a = self.instantiate(a, act)?;
                let b = self.instantiate(b, act)?;
                Ok(self.unify_then(&a, &b, after))
            }
            Goal::Is(target, expr) => {
                let value = self.evaluate(expr, act)?;
                let target = self.instantiate(target, act)?;
                Ok(self.unify_then(&target, &Term::Constant(value), after))
            }
            Goal::Test(expr) => {
                let value = self.evaluate(expr, act)?;
                Ok(if value.to_bool() == Some(true) {
                    Flow::Proceed(after)
                } else {
                    Flow::Fail
                })
            }
            Goal::Not(inner) => {
                let height = self.choices.len();
                self.choices.push(Choice {
                    checkpoint: self.bindings.checkpoint(),
                    alt: Alternative::Resume,
                    goal: CompoundTerm::new("not", Vec::new()),
                    cont: after,
                    ctx: None,
                    attempts: 0,
                });
                let guarded = Arc::new(Activation {
                    goals: Arc::clone(inner),
                    base: act.base,
                    scope: Arc::clone(&act.scope),
                    module: Arc::clone(&act.module),
                    cut_barrier: height + 1,
                    ctx: act.ctx.clone(),
                });
                let succeeded = Arc::new(Step {
                    kind: StepKind::NegationSucceeded(height),
                    next: None,
                });
                Ok(Flow::Proceed(Some(Arc::new(Step {
                    kind: StepKind::Body {
                        act: guarded,
                        pc: 0,
                    },
                    next: Some(succeeded),
                }))))
            }
            Goal::Call { callee, term } => self.call(callee, term, act, after),
        }
    }

    /// Pushes a choice point for a predicate call; the caller then
    /// backtracks into it to try the first alternative.
    fn call(
        &mut self,
        callee: &Callee,
        term: &CompoundTerm,
        act: &Arc<Activation>,
        after: Cont,
    ) -> Result<Flow, ResolveError> {
        let goal = self.instantiate_compound(term, act)?;
        let alt = match callee {
            Callee::Builtin(builtin) => return self.builtin(*builtin, &goal, act, after),
            Callee::Local(index) => Alternative::Clauses {
                module: Arc::clone(&act.module),
                predicate: *index,
                next: 0,
            },
            Callee::Foreign(module, index) => Alternative::Clauses {
                module: Arc::clone(module),
                predicate: *index,
                next: 0,
            },
            Callee::Dynamic(name) => Alternative::Facts {
                facts: act.ctx.asserted().facts(name),
                next: 0,
            },
            Callee::External(predicate) => {
                let args = CallArgs::new(self.resolve_compound(&goal));
                Alternative::Resolver {
                    name: predicate.name().to_string(),
                    resolver: predicate.resolver(args),
                }
            }
        };

        let ctx = act.ctx.create_child();
        let exit = Arc::new(Step {
            kind: StepKind::Exit(ctx.clone()),
            next: after,
        });
        self.choices.push(Choice {
            checkpoint: self.bindings.checkpoint(),
            alt,
            goal,
            cont: Some(exit),
            ctx: Some(ctx),
            attempts: 0,
        });
        Ok(Flow::Fail)
    }

    /// Resumes the newest choice point with an untried alternative.
    async fn backtrack(&mut self) -> Result<Option<Cont>, ResolveError> {
        while let Some(mut choice) = self.choices.pop() {
            self.bindings.rewind(choice.checkpoint);
            if choice.attempts > 0 {
                if let Some(ctx) = &choice.ctx {
                    ctx.set_stable(false);
                }
            }
            choice.attempts += 1;

            let height = self.choices.len();
            match self.resume(&mut choice, height).await? {
                Resumed::Next { cont, more } => {
                    if more {
                        self.choices.push(choice);
                    }
                    return Ok(Some(cont));
                }
                Resumed::Exhausted => {
                    if let Some(ctx) = &choice.ctx {
                        ctx.detach();
                    }
                }
            }
        }
        Ok(None)
    }

    async fn resume(&mut self, choice: &mut Choice, height: usize) -> Result<Resumed, ResolveError> {
        let Some(ctx) = choice.ctx.clone() else {
            // Only negations push context-free choices.
            return Ok(match choice.alt {
                Alternative::Resume => Resumed::Next {
                    cont: choice.cont.take(),
                    more: false,
                },
                _ => Resumed::Exhausted,
            });
        };

        match &mut choice.alt {
            Alternative::Clauses {
                module,
                predicate,
                next,
            } => {
                let module = Arc::clone(module);
                let Some(descriptor) = module.descriptor(*predicate) else {
                    return Ok(Resumed::Exhausted);
                };
                while let Some(clause) = descriptor.clauses.get(*next) {
                    *next += 1;
                    self.bindings.rewind(choice.checkpoint);
                    let base = self.bindings.allocate(clause.vars.len());
                    let head = clause.head.offset(base);
                    if !self.bindings.unify_compound(&choice.goal, &head) {
                        continue;
                    }
                    let act = Arc::new(Activation {
                        goals: Arc::clone(&clause.goals),
                        base,
                        scope: Arc::clone(&clause.vars),
                        module: Arc::clone(&module),
                        cut_barrier: height,
                        ctx,
                    });
                    return Ok(Resumed::Next {
                        cont: Some(Arc::new(Step {
                            kind: StepKind::Body { act, pc: 0 },
                            next: choice.cont.clone(),
                        })),
                        more: *next < descriptor.clauses.len(),
                    });
                }
                Ok(Resumed::Exhausted)
            }
            Alternative::Facts { facts, next } => {
                while let Some(fact) = facts.get(*next) {
                    *next += 1;
                    self.bindings.rewind(choice.checkpoint);
                    if self.bindings.unify_compound(&choice.goal, fact) {
                        return Ok(Resumed::Next {
                            cont: choice.cont.clone(),
                            more: *next < facts.len(),
                        });
                    }
                }
                Ok(Resumed::Exhausted)
            }
            Alternative::Resolver { name, resolver } => loop {
                let answer =
                    pull(name, resolver.as_mut(), &ctx, self.options.predicate_timeout).await?;
                let Some(answer) = answer else {
                    return Ok(Resumed::Exhausted);
                };
                self.bindings.rewind(choice.checkpoint);
                if self.unify_answer(&choice.goal, &answer) {
                    return Ok(Resumed::Next {
                        cont: choice.cont.clone(),
                        more: true,
                    });
                }
                self.tick()?;
            },
            Alternative::Resume => Ok(Resumed::Exhausted),
        }
    }

    fn builtin(
        &mut self,
        builtin: Builtin,
        goal: &CompoundTerm,
        act: &Activation,
        after: Cont,
    ) -> Result<Flow, ResolveError> {
        let proceed = match builtin {
            Builtin::True => true,
            Builtin::Fail => false,
            Builtin::Assert | Builtin::AssertA => {
                let fact = self.fact_arg(goal)?;
                act.ctx
                    .asserted()
                    .assert(fact, builtin == Builtin::Assert)?;
                true
            }
            Builtin::Retract => {
                let pattern = self.fact_arg(goal)?;
                let removed = act.ctx.asserted().retract_first(pattern.functor(), |fact| {
                    let mut scratch = BindingLog::new();
                    scratch.allocate(pattern.var_span());
                    scratch.unify_compound(&pattern, fact)
                });
                match removed {
                    Some(fact) => self.bindings.unify_compound(&pattern, &fact),
                    None => false,
                }
            }
            Builtin::Var | Builtin::NonVar => {
                let unbound = goal
                    .arg(0)
                    .is_some_and(|t| self.bindings.walk(t).is_variable());
                unbound == (builtin == Builtin::Var)
            }
            Builtin::Log => {
                let message: String = goal
                    .args()
                    .iter()
                    .map(|a| match self.bindings.resolve(&a.value) {
                        Term::Constant(v) => v.to_text(),
                        other => other.to_string(),
                    })
                    .collect();
                tracing::info!(target: "mendlog::rules", query = %act.ctx.query_id(), "{message}");
                true
            }
        };
        Ok(if proceed {
            Flow::Proceed(after)
        } else {
            Flow::Fail
        })
    }

    fn fact_arg(&self, goal: &CompoundTerm) -> Result<CompoundTerm, ResolveError> {
        match goal.arg(0).map(|t| self.bindings.resolve(t)) {
            Some(Term::Compound(c)) => Ok(CompoundTerm::clone(&c)),
            Some(Term::Constant(Value::String(name))) => Ok(CompoundTerm::new(name, Vec::new())),
            _ => Err(ResolveError::invalid_goal(goal, "expected a fact")),
        }
    }

    fn unify_then(&mut self, a: &Term, b: &Term, after: Cont) -> Flow {
        if self.bindings.unify(a, b) {
            Flow::Proceed(after)
        } else {
            Flow::Fail
        }
    }

    fn unify_answer(&mut self, goal: &CompoundTerm, answer: &Answer) -> bool {
        answer.keys().all(|(key, value)| match goal.get(&key) {
            Some(arg) => self.bindings.unify(arg, value),
            None => true,
        })
    }

    /// Moves a clause term into the binding log's index space and evaluates
    /// its templates.
    fn instantiate(&self, term: &Term, act: &Activation) -> Result<Term, ResolveError> {
        match term {
            Term::Variable(v) => Ok(Term::Variable(v.offset(act.base))),
            Term::Template(expr) => Ok(Term::Constant(self.evaluate(expr, act)?)),
            Term::Compound(c) if !c.is_ground() => {
                Ok(Term::compound(self.instantiate_compound(c, act)?))
            }
            other => Ok(other.clone()),
        }
    }

    fn instantiate_compound(
        &self,
        term: &CompoundTerm,
        act: &Activation,
    ) -> Result<CompoundTerm, ResolveError> {
        if term.is_ground() {
            return Ok(term.clone());
        }
        term.map_args(|a| self.instantiate(a, act))
    }

    fn resolve_compound(&self, term: &CompoundTerm) -> CompoundTerm {
        match self.bindings.resolve(&Term::compound(term.clone())) {
            Term::Compound(c) => CompoundTerm::clone(&c),
            _ => term.clone(),
        }
    }

    fn evaluate(&self, expr: &Expression, act: &Activation) -> Result<Value, ResolveError> {
        let scope = Scope {
            bindings: &self.bindings,
            act,
        };
        Ok(expr.evaluate(&scope)?)
    }

    fn cut_to(&mut self, height: usize, keep: Option<&QueryContext>) {
        if height >= self.choices.len() {
            return;
        }
        for choice in self.choices.drain(height..) {
            if let Some(ctx) = choice.ctx {
                if keep.map_or(true, |k| k.id() != ctx.id()) {
                    ctx.detach();
                }
            }
        }
    }

    /// Drops every pending alternative.
    fn release(&mut self) {
        for choice in self.choices.drain(..) {
            if let Some(ctx) = choice.ctx {
                ctx.detach();
            }
        }
    }
}

/// Awaits the next answer of an external predicate, bounded by the
/// optional timeout and abandoned on cancellation.
async fn pull(
    name: &str,
    resolver: &mut dyn PredicateResolver,
    ctx: &QueryContext,
    timeout: Option<Duration>,
) -> Result<Option<Answer>, ResolveError> {
    let answer = async {
        let next = resolver.next(ctx);
        match timeout {
            Some(limit) => tokio::time::timeout(limit, next).await.map_err(|_| {
                tracing::warn!(predicate = name, timeout_ms = ?limit.as_millis(), "predicate timed out");
                ResolveError::Timeout {
                    name: name.to_string(),
                    duration_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                }
            })?,
            None => next.await,
        }
    };
    tokio::select! {
        biased;
        () = ctx.cancelled() => Err(ResolveError::Cancelled),
        result = answer => result,
    }
}

/// Exposes clause variables and query variables to expressions.
struct Scope<'a> {
    bindings: &'a BindingLog,
    act: &'a Activation,
}

impl PropertyContext for Scope<'_> {
    fn property(&self, name: &str) -> Option<Value> {
        self.act.ctx.get_var(name)
    }

    fn variable(&self, name: &str) -> Option<Value> {
        let index = self.act.scope.lookup(name)? + self.act.base;
        let var = Term::var(name, index);
        match self.bindings.walk(&var) {
            Term::Constant(v) => Some(v.clone()),
            Term::Variable(_) => None,
            other => Some(Value::String(self.bindings.resolve(other).to_string())),
        }
    }
}

fn collect_names(term: &Term, out: &mut Vec<(String, usize)>) {
    match term {
        Term::Variable(v) if !v.is_anonymous() => {
            if !out.iter().any(|(_, i)| *i == v.index()) {
                out.push((v.name().to_string(), v.index()));
            }
        }
        Term::Compound(c) => {
            for arg in c.args() {
                collect_names(&arg.value, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::PredicateTable;
    use crate::query::predicate::{boolean, BooleanPredicate};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dispatcher(rules: &[&str]) -> QueryDispatcher {
        QueryDispatcher::new(Arc::new(Module::parse("test", rules, Arc::new(())).unwrap()))
    }

    async fn all(d: &QueryDispatcher, goal: &str, var: &str) -> Vec<String> {
        let mut query = d.query_text(goal, QueryContext::new_root()).unwrap();
        let mut out = Vec::new();
        while let Some(s) = query.next().await.unwrap() {
            out.push(s.get(var).unwrap().to_string());
        }
        out
    }

    #[tokio::test]
    async fn test_conjunction_filters_in_clause_order() {
        let d = dispatcher(&["q(1)", "q(2)", "q(3)", "r(2)", "r(3)", "p(?X) :- q(?X), r(?X)"]);
        assert_eq!(all(&d, "p(?Out)", "Out").await, vec!["2", "3"]);
    }

    #[tokio::test]
    async fn test_cut_commits_to_clause() {
        let d = dispatcher(&[
            "q(1)",
            "q(2)",
            "first(?X) :- q(?X), !",
            "pick(a) :- !",
            "pick(b)",
        ]);
        assert_eq!(all(&d, "first(?X)", "X").await, vec!["1"]);
        assert_eq!(all(&d, "pick(?P)", "P").await, vec!["\"a\""]);
    }

    #[tokio::test]
    async fn test_cut_is_local_to_the_call() {
        let d = dispatcher(&["q(1)", "q(2)", "one(?X) :- ?X > 0, !", "p(?X) :- q(?X), one(?X)"]);
        assert_eq!(all(&d, "p(?X)", "X").await, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_negation() {
        let d = dispatcher(&["q(1)", "q(2)", "bad(1)", "good(?X) :- q(?X), not(bad(?X))"]);
        assert_eq!(all(&d, "good(?X)", "X").await, vec!["2"]);
    }

    #[tokio::test]
    async fn test_is_and_recursion() {
        let d = dispatcher(&["count(?L, ?N) :- length(?L, ?N)"]);
        assert_eq!(all(&d, "count([a, b, c], ?N)", "N").await, vec!["3"]);
    }

    #[tokio::test]
    async fn test_system_list_predicates() {
        let d = dispatcher(&["go(?R) :- append([1], [2, 3], ?L), reverse(?L, ?R)"]);
        assert_eq!(all(&d, "go(?R)", "R").await, vec!["[3, 2, 1]"]);

        let d = dispatcher(&["go(?L) :- AddToList(2, [1, 3], ?L)"]);
        assert_eq!(all(&d, "go(?L)", "L").await, vec!["[1, 2, 3]"]);

        let d = dispatcher(&["go(?M) :- AddToMap(kv(b, 2), [kv(a, 1), kv(b, 0)], ?M)"]);
        assert_eq!(
            all(&d, "go(?M)", "M").await,
            vec!["[kv(\"a\", 1), kv(\"b\", 2)]"]
        );
    }

    #[tokio::test]
    async fn test_assert_and_retract() {
        let d = dispatcher(&[
            "meta(seen, dynamic)",
            "mark(?X) :- assert(seen(?X))",
            "go(?Y) :- mark(1), mark(2), retract(seen(1)), seen(?Y)",
        ]);
        assert_eq!(all(&d, "go(?Y)", "Y").await, vec!["2"]);
    }

    #[tokio::test]
    async fn test_templates_read_bindings_and_query_vars() {
        let d = dispatcher(&["greet(?Name, ?Out) :- ?Out = {hello <?Name> from <Site>}"]);
        let cx = QueryContext::new_root();
        cx.set_var("Site", Value::from("eu-1"));
        let mut query = d.query_text("greet(\"ops\", ?Out)", cx).unwrap();
        let s = query.next().await.unwrap().unwrap();
        assert_eq!(s.value("Out"), Some(&Value::from("hello ops from eu-1")));
    }

    #[tokio::test]
    async fn test_expression_errors_abort_the_query() {
        let d = dispatcher(&["p(?X) :- ?X is 1 / 0"]);
        let err = d.query_text("p(?X)", QueryContext::new_root()).unwrap().next().await.unwrap_err();
        assert!(err.to_string().contains("division by zero"));
    }

    #[tokio::test]
    async fn test_integer_overflow_aborts_the_query() {
        let d = dispatcher(&[
            "rem(?A, ?B, ?X) :- ?X is ?A % ?B",
            "neg(?X) :- ?X is -9223372036854775808 % -1",
        ]);
        let err = d
            .query_text("rem(-9223372036854775808, -1, ?X)", QueryContext::new_root())
            .unwrap()
            .next()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("integer overflow"));
        let mut query = d.query_text("neg(?X)", QueryContext::new_root()).unwrap();
        assert!(query.next().await.is_err());
    }

    #[tokio::test]
    async fn test_step_limit() {
        let d = dispatcher(&["loop :- repeat, fail"]).with_options(QueryOptions {
            max_steps: 500,
            ..QueryOptions::default()
        });
        let cx = QueryContext::new_root();
        let err = d
            .run_query_in(CompoundTerm::new("loop", Vec::new()), &cx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::MendError::Resolve(ResolveError::StepLimitExceeded { limit: 500 })
        ));
        assert!(cx.context_count() <= 501);
        assert!(cx.is_stable());
    }

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl BooleanPredicate for Counting {
        fn name(&self) -> &str {
            "Touch"
        }

        fn arity(&self) -> (usize, Option<usize>) {
            (0, Some(0))
        }

        async fn check(&self, _args: &CallArgs, _cx: &QueryContext) -> Result<bool, ResolveError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_contexts_settle_after_query() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut table = PredicateTable::new();
        table.add(boolean(Counting(Arc::clone(&calls))));
        let module = Module::parse("test", &["q(1)", "q(2)", "p :- q(?X), Touch()"], Arc::new(table)).unwrap();
        let d = QueryDispatcher::new(Arc::new(module));

        let cx = QueryContext::new_root();
        assert!(d.run_query_in(CompoundTerm::new("p", Vec::new()), &cx).await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cx.is_stable());
        assert!(cx.children().is_empty());
    }
}
