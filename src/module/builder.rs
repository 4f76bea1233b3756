//! Two-pass module compiler.
//!
//! The first pass declares a descriptor for every head functor and applies
//! `meta(...)` clauses. The second pass resolves every body goal, checks
//! arities and argument constraints, and attaches each clause to its
//! descriptor in source order.
//!
//! Goal names resolve in this order: predicates of the module itself, the
//! provider, language built-ins, then the public predicates of the system
//! library. A goal the provider reports as not applicable removes its whole
//! clause, after the clause has been validated.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::CompileError;
use crate::module::provider::{Lookup, PredicateProvider};
use crate::module::source::{parse_clause, ParsedClause, ParsedGoal, RuleText};
use crate::module::{
    system, ArgConstraint, Builtin, Callee, Clause, Goal, Module, PredicateDescriptor,
    PredicateKind, Visibility,
};
use crate::term::{ArgKey, CompoundTerm, Term};
use crate::value::Value;

/// Head functor of meta-data clauses.
pub const META_FUNCTOR: &str = "meta";

/// Compiles rule text into a [`Module`].
///
/// # Examples
///
/// ```
/// use mendlog::module::{split_rules, ModuleBuilder};
///
/// let rules = split_rules("q(1).\np(?X) :- q(?X).\n").unwrap();
/// let module = ModuleBuilder::new("example").build(&rules).unwrap();
/// assert!(module.get("p").is_some());
/// ```
pub struct ModuleBuilder {
    name: String,
    provider: Arc<dyn PredicateProvider>,
    with_system: bool,
}

impl ModuleBuilder {
    /// A builder with no provider and the system library enabled.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider: Arc::new(()),
            with_system: true,
        }
    }

    /// Sets the provider consulted for names the rules do not define.
    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn PredicateProvider>) -> Self {
        self.provider = provider;
        self
    }

    /// Compiles without the system library; used to build the library itself.
    #[must_use]
    pub(crate) fn without_system(mut self) -> Self {
        self.with_system = false;
        self
    }

    /// Compiles `rules`.
    ///
    /// # Errors
    ///
    /// Returns the first syntax, meta-data, resolution, arity or constraint
    /// error found. No partial module is returned.
    pub fn build(self, rules: &[RuleText]) -> Result<Module, CompileError> {
        let parsed = rules
            .iter()
            .map(parse_clause)
            .collect::<Result<Vec<_>, _>>()?;
        let (meta, clauses): (Vec<ParsedClause>, Vec<ParsedClause>) = parsed
            .into_iter()
            .partition(|c| c.head.functor() == META_FUNCTOR);

        let mut predicates: Vec<PredicateDescriptor> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut overrides = Overrides::new();
        for clause in &clauses {
            let name = clause.head.functor();
            if !index.contains_key(name) {
                index.insert(name.to_string(), predicates.len());
                predicates.push(PredicateDescriptor::new(name, PredicateKind::Rules));
            }
        }
        for clause in &meta {
            let mut target = MetaTarget {
                predicates: &mut predicates,
                index: &mut index,
                overrides: &mut overrides,
                provider: self.provider.as_ref(),
                module: &self.name,
            };
            target.apply(clause)?;
        }

        let system = if self.with_system {
            Some(system::module()?)
        } else {
            None
        };
        let scope = Scope {
            module: &self.name,
            index: &index,
            predicates: &predicates,
            overrides: &overrides,
            provider: self.provider.as_ref(),
            system: system.as_ref(),
        };

        let mut compiled = Vec::with_capacity(clauses.len());
        let mut dropped = 0usize;
        for clause in clauses {
            let slot = index[clause.head.functor()];
            match scope.compile_clause(clause)? {
                Some(c) => compiled.push((slot, c)),
                None => dropped += 1,
            }
        }
        for (slot, clause) in compiled {
            predicates[slot].clauses.push(Arc::new(clause));
        }

        tracing::debug!(
            module = %self.name,
            predicates = predicates.len(),
            dropped,
            "compiled rule module"
        );
        Ok(Module::from_parts(self.name, predicates, overrides, self.provider))
    }
}

/// Resolves an entry goal against a compiled module.
pub(crate) fn resolve_entry(module: &Module, term: CompoundTerm) -> Result<Goal, CompileError> {
    let system = system::module()?;
    let scope = Scope {
        module: &module.name,
        index: &module.index,
        predicates: &module.predicates,
        overrides: &module.overrides,
        provider: module.provider.as_ref(),
        system: Some(&system),
    };
    let text = term.to_string();
    let mut seen = HashSet::new();
    let mut not_applicable = false;
    let goal = scope.compile_call(term, &text, &mut seen, &mut not_applicable)?;
    if not_applicable {
        return Err(CompileError::UndefinedPredicate {
            name: goal.to_string(),
            clause: text,
        });
    }
    Ok(goal)
}

/// Constraints that `meta(...)` clauses add to predicates defined outside
/// the module, keyed by predicate name.
pub(crate) type Overrides = HashMap<String, Vec<(ArgKey, ArgConstraint)>>;

struct MetaTarget<'a> {
    predicates: &'a mut Vec<PredicateDescriptor>,
    index: &'a mut HashMap<String, usize>,
    overrides: &'a mut Overrides,
    provider: &'a dyn PredicateProvider,
    module: &'a str,
}

impl MetaTarget<'_> {
    fn apply(&mut self, clause: &ParsedClause) -> Result<(), CompileError> {
        let invalid = |reason: String| CompileError::InvalidMetadata {
            clause: clause.text.clone(),
            reason,
        };
        if !clause.body.is_empty() {
            return Err(invalid("meta-data must be a fact".into()));
        }
        let Some(target) = clause
            .head
            .arg(0)
            .and_then(Term::as_constant)
            .and_then(Value::as_string)
        else {
            return Err(invalid("first argument must name a predicate".into()));
        };

        let mut dynamic = false;
        let mut visibility = None;
        let mut constraints: Vec<(ArgKey, ArgConstraint)> = Vec::new();
        for arg in &clause.head.args()[1..] {
            let word = arg
                .value
                .as_constant()
                .and_then(Value::as_string)
                .ok_or_else(|| invalid(format!("unsupported meta-data value {}", arg.value)))?;
            match &arg.name {
                None => match word.to_ascii_lowercase().as_str() {
                    "dynamic" => dynamic = true,
                    "public" | "private" => {
                        let v = if word.eq_ignore_ascii_case("public") {
                            Visibility::Public
                        } else {
                            Visibility::Private
                        };
                        if visibility.is_some_and(|prev| prev != v) {
                            return Err(invalid(format!("conflicting visibility for {target}")));
                        }
                        visibility = Some(v);
                    }
                    _ => return Err(invalid(format!("unknown flag '{word}'"))),
                },
                Some(name) => {
                    let constraint = ArgConstraint::from_name(word)
                        .ok_or_else(|| invalid(format!("unknown constraint '{word}'")))?;
                    merge_constraint(&mut constraints, ArgKey::parse(name), constraint)
                        .map_err(invalid)?;
                }
            }
        }

        let slot = match self.index.get(target) {
            Some(&slot) => {
                if dynamic && self.predicates[slot].kind == PredicateKind::Rules {
                    return Err(invalid(format!(
                        "'{target}' is defined by rules and cannot be dynamic"
                    )));
                }
                slot
            }
            None if dynamic => {
                self.index.insert(target.to_string(), self.predicates.len());
                self.predicates
                    .push(PredicateDescriptor::new(target, PredicateKind::Dynamic));
                self.predicates.len() - 1
            }
            None => {
                let mut declared = match self.provider.lookup(target, self.module) {
                    Lookup::Found(predicate) => predicate.constraints(),
                    Lookup::Rules { module, index } => module
                        .descriptor(index)
                        .map(|p| p.constraints.clone())
                        .unwrap_or_default(),
                    Lookup::NotApplicable => Vec::new(),
                    Lookup::NotFound => {
                        return Err(invalid(format!("predicate '{target}' is not defined")))
                    }
                };
                if visibility.is_some() {
                    return Err(invalid(format!(
                        "visibility of '{target}' belongs to its provider"
                    )));
                }
                let extra = self.overrides.entry(target.to_string()).or_default();
                declared.extend(extra.iter().cloned());
                for (key, constraint) in constraints {
                    merge_constraint(&mut declared, key.clone(), constraint).map_err(invalid)?;
                    merge_constraint(extra, key, constraint).map_err(invalid)?;
                }
                return Ok(());
            }
        };

        let descriptor = &mut self.predicates[slot];
        if let Some(v) = visibility {
            descriptor.visibility = v;
        }
        for (key, constraint) in constraints {
            merge_constraint(&mut descriptor.constraints, key, constraint).map_err(invalid)?;
        }
        Ok(())
    }
}

fn merge_constraint(
    list: &mut Vec<(ArgKey, ArgConstraint)>,
    key: ArgKey,
    constraint: ArgConstraint,
) -> Result<(), String> {
    match list.iter().find(|(k, _)| k.matches(&key)) {
        Some((_, existing)) if *existing != constraint => Err(format!(
            "conflicting constraints for argument {key}: {existing} and {constraint}"
        )),
        Some(_) => Ok(()),
        None => {
            list.push((key, constraint));
            Ok(())
        }
    }
}

enum Resolved {
    Callee {
        callee: Callee,
        constraints: Vec<(ArgKey, ArgConstraint)>,
        arity: Option<(usize, Option<usize>)>,
    },
    NotApplicable,
}

struct Scope<'a> {
    module: &'a str,
    index: &'a HashMap<String, usize>,
    predicates: &'a [PredicateDescriptor],
    overrides: &'a Overrides,
    provider: &'a dyn PredicateProvider,
    system: Option<&'a Arc<Module>>,
}

impl Scope<'_> {
    fn lookup(&self, name: &str) -> Option<Resolved> {
        if let Some(&slot) = self.index.get(name) {
            let p = &self.predicates[slot];
            let callee = match p.kind {
                PredicateKind::Rules => Callee::Local(slot),
                PredicateKind::Dynamic => Callee::Dynamic(Arc::clone(&p.name)),
            };
            return Some(Resolved::Callee {
                callee,
                constraints: p.constraints.clone(),
                arity: None,
            });
        }

        match self.provider.lookup(name, self.module) {
            Lookup::Found(predicate) => {
                return Some(Resolved::Callee {
                    constraints: self.with_overrides(name, predicate.constraints()),
                    arity: Some(predicate.arity()),
                    callee: Callee::External(predicate),
                })
            }
            Lookup::Rules { module, index } => {
                return Some(match foreign(module, index) {
                    Resolved::Callee {
                        callee,
                        constraints,
                        arity,
                    } => Resolved::Callee {
                        constraints: self.with_overrides(name, constraints),
                        callee,
                        arity,
                    },
                    other => other,
                })
            }
            Lookup::NotApplicable => return Some(Resolved::NotApplicable),
            Lookup::NotFound => {}
        }

        if let Some(builtin) = Builtin::from_name(name) {
            return Some(Resolved::Callee {
                callee: Callee::Builtin(builtin),
                constraints: Vec::new(),
                arity: Some(builtin.arity()),
            });
        }

        let system = self.system?;
        system
            .public(name)
            .map(|index| foreign(Arc::clone(system), index))
    }

    /// Adds the `meta(...)` constraints declared for a non-local predicate.
    fn with_overrides(
        &self,
        name: &str,
        mut constraints: Vec<(ArgKey, ArgConstraint)>,
    ) -> Vec<(ArgKey, ArgConstraint)> {
        if let Some(extra) = self.overrides.get(name) {
            for (key, constraint) in extra {
                if !constraints.iter().any(|(k, _)| k.matches(key)) {
                    constraints.push((key.clone(), *constraint));
                }
            }
        }
        constraints
    }

    fn compile_clause(&self, parsed: ParsedClause) -> Result<Option<Clause>, CompileError> {
        let mut seen = HashSet::new();
        for arg in parsed.head.args() {
            collect_vars(&arg.value, &mut seen);
        }

        let mut not_applicable = false;
        let mut goals = Vec::with_capacity(parsed.body.len());
        for goal in parsed.body {
            goals.push(self.compile_goal(goal, &parsed.text, &mut seen, &mut not_applicable)?);
        }

        if not_applicable {
            tracing::warn!(
                module = %self.module,
                line = parsed.line,
                clause = %parsed.text,
                "dropping clause that calls a predicate not applicable here"
            );
            return Ok(None);
        }

        Ok(Some(Clause {
            head: parsed.head,
            goals: goals.into(),
            vars: Arc::new(parsed.vars),
            text: parsed.text,
            line: parsed.line,
        }))
    }

    fn compile_goal(
        &self,
        goal: ParsedGoal,
        clause: &str,
        seen: &mut HashSet<usize>,
        not_applicable: &mut bool,
    ) -> Result<Goal, CompileError> {
        Ok(match goal {
            ParsedGoal::Cut => Goal::Cut,
            ParsedGoal::Unify(a, b) => {
                collect_vars(&a, seen);
                collect_vars(&b, seen);
                Goal::Unify(a, b)
            }
            ParsedGoal::Is(target, expr) => {
                collect_vars(&target, seen);
                Goal::Is(target, Arc::new(expr))
            }
            ParsedGoal::Test(expr) => Goal::Test(Arc::new(expr)),
            ParsedGoal::Not(inner) => {
                // Bindings made inside a negation never escape it.
                let mut inner_seen = seen.clone();
                let inner = self.compile_goal(*inner, clause, &mut inner_seen, not_applicable)?;
                Goal::Not(Arc::from(vec![inner]))
            }
            ParsedGoal::Call(term) => self.compile_call(term, clause, seen, not_applicable)?,
        })
    }

    fn compile_call(
        &self,
        term: CompoundTerm,
        clause: &str,
        seen: &mut HashSet<usize>,
        not_applicable: &mut bool,
    ) -> Result<Goal, CompileError> {
        let (callee, constraints, arity) = match self.lookup(term.functor()) {
            None => {
                return Err(CompileError::UndefinedPredicate {
                    name: term.functor().to_string(),
                    clause: clause.to_string(),
                })
            }
            Some(Resolved::NotApplicable) => {
                *not_applicable = true;
                (Callee::Builtin(Builtin::Fail), Vec::new(), None)
            }
            Some(Resolved::Callee {
                callee,
                constraints,
                arity,
            }) => (callee, constraints, arity),
        };

        if let Some((min, max)) = arity {
            let actual = term.arity();
            if actual < min || max.is_some_and(|m| actual > m) {
                return Err(CompileError::ArityMismatch {
                    predicate: term.functor().to_string(),
                    expected: describe_arity(min, max),
                    actual,
                    clause: clause.to_string(),
                });
            }
        }

        for (key, constraint) in &constraints {
            check_constraint(&term, key, *constraint, seen).map_err(|reason| {
                CompileError::ConstraintViolation {
                    predicate: term.functor().to_string(),
                    argument: key.to_string(),
                    clause: clause.to_string(),
                    reason,
                }
            })?;
        }

        for arg in term.args() {
            collect_vars(&arg.value, seen);
        }
        Ok(Goal::Call { callee, term })
    }
}

fn foreign(module: Arc<Module>, index: usize) -> Resolved {
    let (callee, constraints) = match module.descriptor(index) {
        Some(p) if p.kind == PredicateKind::Dynamic => {
            (Callee::Dynamic(Arc::clone(&p.name)), p.constraints.clone())
        }
        Some(p) => {
            let constraints = p.constraints.clone();
            (Callee::Foreign(module, index), constraints)
        }
        None => (Callee::Foreign(module, index), Vec::new()),
    };
    Resolved::Callee {
        callee,
        constraints,
        arity: None,
    }
}

fn describe_arity(min: usize, max: Option<usize>) -> String {
    match max {
        Some(max) if max == min => min.to_string(),
        Some(max) => format!("{min} to {max}"),
        None => format!("at least {min}"),
    }
}

fn check_constraint(
    term: &CompoundTerm,
    key: &ArgKey,
    constraint: ArgConstraint,
    seen: &HashSet<usize>,
) -> Result<(), String> {
    let arg = term.get(key);
    if arg.is_none() && !term.has_named_args() && matches!(key, ArgKey::Name(n) if n.parse::<usize>().is_err()) {
        // A positional call cannot be checked against a named contract.
        return Ok(());
    }
    match (constraint, arg) {
        (_, None) => Err("argument must be supplied".into()),
        (ArgConstraint::Output, Some(Term::Variable(v)))
            if v.is_anonymous() || !seen.contains(&v.index()) =>
        {
            Ok(())
        }
        (ArgConstraint::Output, Some(t)) => {
            Err(format!("must be an unbound output variable, got {t}"))
        }
        (ArgConstraint::Input, Some(_)) => Ok(()),
        (ArgConstraint::Ground, Some(t)) if is_bound(t, seen) => Ok(()),
        (ArgConstraint::Ground, Some(t)) => Err(format!("must be bound before the call, got {t}")),
    }
}

fn is_bound(term: &Term, seen: &HashSet<usize>) -> bool {
    match term {
        Term::Constant(_) | Term::Nil | Term::Template(_) => true,
        Term::Variable(v) => !v.is_anonymous() && seen.contains(&v.index()),
        Term::Compound(c) => c.args().iter().all(|a| is_bound(&a.value, seen)),
    }
}

fn collect_vars(term: &Term, seen: &mut HashSet<usize>) {
    match term {
        Term::Variable(v) if !v.is_anonymous() => {
            seen.insert(v.index());
        }
        Term::Compound(c) => {
            for arg in c.args() {
                collect_vars(&arg.value, seen);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::provider::PredicateTable;
    use crate::module::split_rules;
    use crate::query::predicate::{boolean, single, Answer, BooleanPredicate, CallArgs, SinglePredicate};
    use crate::query::QueryContext;
    use crate::error::ResolveError;
    use async_trait::async_trait;

    struct Restart;

    #[async_trait]
    impl BooleanPredicate for Restart {
        fn name(&self) -> &str {
            "RestartReplica"
        }

        fn arity(&self) -> (usize, Option<usize>) {
            (0, Some(3))
        }

        async fn check(&self, _args: &CallArgs, _cx: &QueryContext) -> Result<bool, ResolveError> {
            Ok(true)
        }
    }

    struct History;

    #[async_trait]
    impl SinglePredicate for History {
        fn name(&self) -> &str {
            "GetRepairHistory"
        }

        fn arity(&self) -> (usize, Option<usize>) {
            (2, Some(2))
        }

        fn constraints(&self) -> Vec<(ArgKey, ArgConstraint)> {
            vec![(ArgKey::Position(0), ArgConstraint::Output)]
        }

        async fn solve(
            &self,
            _args: &CallArgs,
            _cx: &QueryContext,
        ) -> Result<Option<Answer>, ResolveError> {
            Ok(Some(Answer::yes().with(0, Term::constant(0))))
        }
    }

    fn provider() -> Arc<dyn PredicateProvider> {
        let mut table = PredicateTable::new();
        table
            .add(boolean(Restart))
            .add(single(History))
            .not_applicable("RestartVm");
        Arc::new(table)
    }

    fn build(source: &str) -> Result<Module, CompileError> {
        ModuleBuilder::new("test")
            .provider(provider())
            .build(&split_rules(source).unwrap())
    }

    #[test]
    fn test_goals_resolve_in_lookup_order() {
        let m = build(
            "Mitigate :- local, RestartReplica(), member(1, [1]), true.\nlocal.\n",
        )
        .unwrap();
        let clause = &m.predicate("Mitigate").unwrap().clauses[0];
        let kinds: Vec<String> = clause
            .goals
            .iter()
            .map(|g| match g {
                Goal::Call { callee, .. } => format!("{callee:?}"),
                other => other.to_string(),
            })
            .collect();
        assert_eq!(kinds[0], "Local(1)");
        assert_eq!(kinds[1], "External(RestartReplica)");
        assert!(kinds[2].starts_with("Foreign(System"));
        assert_eq!(kinds[3], "Builtin(true)");
    }

    #[test]
    fn test_undefined_predicate_names_clause() {
        let err = build("Mitigate :- Frobnicate(1).\n").unwrap_err();
        match err {
            CompileError::UndefinedPredicate { name, clause } => {
                assert_eq!(name, "Frobnicate");
                assert_eq!(clause, "Mitigate :- Frobnicate(1)");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_private_system_predicates_are_not_visible() {
        assert!(matches!(
            build("p(?X) :- _reverse(?X, [], ?Y).\n"),
            Err(CompileError::UndefinedPredicate { .. })
        ));
    }

    #[test]
    fn test_not_applicable_drops_clause() {
        let m = build("Mitigate :- RestartVm().\nMitigate :- RestartReplica().\n").unwrap();
        let p = m.predicate("Mitigate").unwrap();
        assert_eq!(p.clauses.len(), 1);
        assert_eq!(p.clauses[0].text, "Mitigate :- RestartReplica()");
    }

    #[test]
    fn test_not_applicable_clause_is_validated_first() {
        let err = build("Mitigate :- RestartVm(), GetRepairHistory(3, 01:00:00).\n").unwrap_err();
        assert!(matches!(err, CompileError::ConstraintViolation { .. }));
    }

    #[test]
    fn test_output_constraint() {
        assert!(build("Mitigate :- GetRepairHistory(?Count, 01:00:00), ?Count < 3.\n").is_ok());

        let err = build("Mitigate(?Count) :- GetRepairHistory(?Count, 01:00:00).\n").unwrap_err();
        match err {
            CompileError::ConstraintViolation {
                predicate, argument, ..
            } => {
                assert_eq!(predicate, "GetRepairHistory");
                assert_eq!(argument, "0");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_arity_is_checked_for_external_predicates() {
        let err = build("Mitigate :- GetRepairHistory(?Count).\n").unwrap_err();
        match err {
            CompileError::ArityMismatch {
                expected, actual, ..
            } => {
                assert_eq!(expected, "2");
                assert_eq!(actual, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_meta_dynamic_and_constraints() {
        let m = build(
            "meta(seen, dynamic).\n\
             meta(count, 0: output).\n\
             count(3).\n\
             check :- count(?N), seen(?N).\n",
        )
        .unwrap();
        assert_eq!(m.predicate("seen").unwrap().kind, PredicateKind::Dynamic);
        assert_eq!(
            m.predicate("count").unwrap().constraint(&ArgKey::Position(0)),
            Some(ArgConstraint::Output)
        );
        let clause = &m.predicate("check").unwrap().clauses[0];
        assert!(matches!(
            &clause.goals[1],
            Goal::Call { callee: Callee::Dynamic(name), .. } if &**name == "seen"
        ));
    }

    #[test]
    fn test_meta_errors() {
        assert!(matches!(
            build("meta(missing, public).\n"),
            Err(CompileError::InvalidMetadata { .. })
        ));
        assert!(matches!(
            build("p(1).\nmeta(p, dynamic).\n"),
            Err(CompileError::InvalidMetadata { .. })
        ));
        assert!(matches!(
            build("p(1).\nmeta(p, public, private).\n"),
            Err(CompileError::InvalidMetadata { .. })
        ));
        assert!(matches!(
            build("p(1).\nmeta(p, 0: output).\nmeta(p, 0: ground).\n"),
            Err(CompileError::InvalidMetadata { .. })
        ));
    }

    #[test]
    fn test_meta_constrains_provider_predicates() {
        let source = "meta(RestartReplica, 0: output).\n";
        let m = build(&format!("{source}Mitigate :- RestartReplica(?Done).\n")).unwrap();
        assert!(m.predicate("RestartReplica").is_none());

        let err = build(&format!("{source}Mitigate :- RestartReplica(true).\n")).unwrap_err();
        match err {
            CompileError::ConstraintViolation {
                predicate, argument, ..
            } => {
                assert_eq!(predicate, "RestartReplica");
                assert_eq!(argument, "0");
            }
            other => panic!("unexpected {other:?}"),
        }

        // Redeclaring what the provider already says is fine; contradicting it is not.
        assert!(build("meta(GetRepairHistory, 0: output).\nMitigate :- GetRepairHistory(?N, 01:00:00).\n").is_ok());
        assert!(matches!(
            build("meta(GetRepairHistory, 0: ground).\n"),
            Err(CompileError::InvalidMetadata { .. })
        ));
        assert!(matches!(
            build("meta(RestartReplica, public).\n"),
            Err(CompileError::InvalidMetadata { .. })
        ));
    }

    #[test]
    fn test_compile_is_all_or_nothing() {
        let err = build("p(1).\nq :- p(1.\n").unwrap_err();
        assert!(matches!(err, CompileError::Syntax { line: 2, .. }));
    }

    #[test]
    fn test_resolve_entry_goal() {
        let m = build("Mitigate :- true.\n").unwrap();
        let goal = m
            .resolve_goal(CompoundTerm::new("RestartReplica", Vec::new()))
            .unwrap();
        assert!(matches!(goal, Goal::Call { callee: Callee::External(_), .. }));
        assert!(m.resolve_goal(CompoundTerm::new("Nope", Vec::new())).is_err());
    }
}
