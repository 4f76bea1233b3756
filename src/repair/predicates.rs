//! Domain predicates available to repair rules.
//!
//! Every predicate is built with the facts of the repair being decided and
//! a handle to the [`RepairExecutor`]; nothing is read from global state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::config::RepairConfig;
use crate::error::{RepairError, ResolveError};
use crate::module::{ArgConstraint, PredicateTable};
use crate::query::{
    boolean, single, Answer, BooleanPredicate, CallArgs, ExternalPredicate, QueryContext,
    SinglePredicate,
};
use crate::repair::{
    within, FileCleanup, FileSortOrder, RepairAction, RepairExecutor, RepairFacts, RepairPolicy,
};
use crate::term::ArgKey;
use crate::value::Value;

/// Builds the predicate set for one repair decision.
#[derive(Clone)]
pub struct RepairPredicates {
    shared: Shared,
}

impl std::fmt::Debug for RepairPredicates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepairPredicates")
            .field("repair_id", &self.shared.facts.repair_id())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl RepairPredicates {
    /// Binds the predicates to one report and one executor.
    #[must_use]
    pub fn new(
        facts: Arc<RepairFacts>,
        executor: Arc<dyn RepairExecutor>,
        config: RepairConfig,
    ) -> Self {
        Self {
            shared: Shared {
                facts,
                executor,
                config,
            },
        }
    }

    /// Every domain predicate.
    #[must_use]
    pub fn predicates(&self) -> Vec<Arc<dyn ExternalPredicate>> {
        let restart = |action| {
            boolean(Restart {
                action,
                shared: self.shared.clone(),
            })
        };
        vec![
            restart(RepairAction::RestartReplica),
            restart(RepairAction::RestartCodePackage),
            restart(RepairAction::RestartFabricNode),
            restart(RepairAction::RestartVm),
            restart(RepairAction::RestartFabricSystemProcess),
            boolean(DeleteFiles(self.shared.clone())),
            boolean(InsideInterval {
                kind: IntervalKind::Schedule,
                shared: self.shared.clone(),
            }),
            boolean(InsideInterval {
                kind: IntervalKind::Run,
                shared: self.shared.clone(),
            }),
            single(History {
                kind: HistoryKind::Repairs,
                shared: self.shared.clone(),
            }),
            single(History {
                kind: HistoryKind::HealthEvents,
                shared: self.shared.clone(),
            }),
            boolean(EmitMessage),
        ]
    }

    /// A provider exposing [`RepairPredicates::predicates`].
    #[must_use]
    pub fn provider(&self) -> PredicateTable {
        let mut table = PredicateTable::new();
        for predicate in self.predicates() {
            table.add(predicate);
        }
        table
    }
}

#[derive(Clone)]
struct Shared {
    facts: Arc<RepairFacts>,
    executor: Arc<dyn RepairExecutor>,
    config: RepairConfig,
}

fn backend(name: &str, err: RepairError) -> ResolveError {
    ResolveError::predicate(name, err.to_string())
}

impl Shared {
    /// Schedules `policy` and, unless in dry-run mode, executes it.
    async fn repair(&self, name: &str, policy: RepairPolicy) -> Result<bool, ResolveError> {
        let action = policy.action;
        let task = self
            .executor
            .schedule(&self.facts, policy)
            .await
            .map_err(|e| backend(name, e))?;
        let Some(task) = task else {
            return Ok(false);
        };
        tracing::info!(
            %action,
            repair_id = %task.repair_id,
            task = %task.id,
            error_code = %task.error_code,
            "repair scheduled"
        );
        if self.config.dry_run {
            tracing::info!(%action, task = %task.id, "dry run, repair not executed");
            return Ok(true);
        }

        let succeeded = self
            .executor
            .execute(&task)
            .await
            .map_err(|e| backend(name, e))?;
        tracing::info!(%action, task = %task.id, succeeded, "repair executed");
        Ok(succeeded)
    }

    fn policy(&self, action: RepairAction, args: &CallArgs) -> Result<RepairPolicy, ResolveError> {
        let mut policy = RepairPolicy::new(action, self.config.max_execution());
        if let Some(checks) = args.bool_arg(0, "DoHealthChecks")? {
            policy.do_health_checks = checks;
        }
        if let Some(wait) = args.duration_arg(1, "MaxWaitTimeForHealthStateOk")? {
            policy.max_wait_for_health = wait;
        }
        if let Some(limit) = args.duration_arg(2, "MaxExecutionTime")? {
            policy.max_execution = limit;
        }
        Ok(policy)
    }
}

/// `RestartReplica`, `RestartCodePackage` and the other restart repairs.
///
/// Optional arguments: `DoHealthChecks`, `MaxWaitTimeForHealthStateOk`,
/// `MaxExecutionTime`.
struct Restart {
    action: RepairAction,
    shared: Shared,
}

#[async_trait]
impl BooleanPredicate for Restart {
    fn name(&self) -> &str {
        self.action.predicate_name()
    }

    fn arity(&self) -> (usize, Option<usize>) {
        (0, Some(3))
    }

    async fn check(&self, args: &CallArgs, _cx: &QueryContext) -> Result<bool, ResolveError> {
        let policy = self.shared.policy(self.action, args)?;
        self.shared.repair(self.name(), policy).await
    }
}

/// `DeleteFiles(Path, SortOrder = ..., MaxFilesToDelete = ..., RecurseSubdirectories = ...)`.
struct DeleteFiles(Shared);

impl DeleteFiles {
    const NAME: &'static str = "DeleteFiles";

    fn cleanup(args: &CallArgs) -> Result<FileCleanup, ResolveError> {
        for (i, arg) in args.term().args().iter().enumerate() {
            let known = match arg.name.as_deref() {
                None => i == 0,
                Some(name) => matches!(
                    name.to_ascii_lowercase().as_str(),
                    "folderpath" | "sortorder" | "maxfilestodelete" | "recursesubdirectories"
                ),
            };
            if !known {
                return Err(ResolveError::invalid_goal(
                    args.term(),
                    format!("unsupported argument {}", arg.name.as_deref().unwrap_or("(positional)")),
                ));
            }
        }

        let folder_path = args
            .string(0, "FolderPath")
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| ResolveError::invalid_goal(args.term(), "a folder path is required"))?;
        let sort_order = match args.string(usize::MAX, "SortOrder") {
            None => FileSortOrder::default(),
            Some(name) => FileSortOrder::from_name(&name).ok_or_else(|| {
                ResolveError::invalid_goal(args.term(), format!("unknown sort order {name}"))
            })?,
        };
        let max_files = args
            .int_arg(usize::MAX, "MaxFilesToDelete")?
            .map(u64::try_from)
            .transpose()
            .map_err(|_| {
                ResolveError::invalid_goal(args.term(), "MaxFilesToDelete must not be negative")
            })?
            .unwrap_or(0);
        let recurse_subdirectories = args
            .bool_arg(usize::MAX, "RecurseSubdirectories")?
            .unwrap_or(false);

        Ok(FileCleanup {
            folder_path,
            sort_order,
            max_files,
            recurse_subdirectories,
        })
    }
}

#[async_trait]
impl BooleanPredicate for DeleteFiles {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn arity(&self) -> (usize, Option<usize>) {
        (1, None)
    }

    fn constraints(&self) -> Vec<(ArgKey, ArgConstraint)> {
        vec![(ArgKey::Position(0), ArgConstraint::Input)]
    }

    async fn check(&self, args: &CallArgs, _cx: &QueryContext) -> Result<bool, ResolveError> {
        let mut policy = RepairPolicy::new(RepairAction::DeleteFiles, self.0.config.max_execution());
        policy.cleanup = Some(Self::cleanup(args)?);
        self.0.repair(Self::NAME, policy).await
    }
}

#[derive(Clone, Copy)]
enum IntervalKind {
    Schedule,
    Run,
}

/// `CheckInsideScheduleInterval(Interval)` and `CheckInsideRunInterval(Interval)`:
/// true when this entity was last scheduled (or repaired) within `Interval`.
struct InsideInterval {
    kind: IntervalKind,
    shared: Shared,
}

#[async_trait]
impl BooleanPredicate for InsideInterval {
    fn name(&self) -> &str {
        match self.kind {
            IntervalKind::Schedule => "CheckInsideScheduleInterval",
            IntervalKind::Run => "CheckInsideRunInterval",
        }
    }

    fn arity(&self) -> (usize, Option<usize>) {
        (1, Some(1))
    }

    fn constraints(&self) -> Vec<(ArgKey, ArgConstraint)> {
        vec![(ArgKey::Position(0), ArgConstraint::Input)]
    }

    async fn check(&self, args: &CallArgs, _cx: &QueryContext) -> Result<bool, ResolveError> {
        let interval = args.duration_arg(0, "Interval")?.ok_or_else(|| {
            ResolveError::predicate(
                self.name(),
                "one timespan argument is required (hh:mm:ss, for example 00:30:00)",
            )
        })?;
        if interval.is_zero() {
            return Ok(false);
        }

        let repair_id = self.shared.facts.repair_id();
        let executor = &self.shared.executor;
        let last = match self.kind {
            IntervalKind::Schedule => executor.last_scheduled(&repair_id).await,
            IntervalKind::Run => executor.last_completed(&repair_id).await,
        }
        .map_err(|e| backend(self.name(), e))?;

        let inside = last.is_some_and(|at| within(at, Utc::now(), interval));
        if inside {
            tracing::info!(
                predicate = self.name(),
                repair_id = %repair_id,
                interval = ?interval,
                "repair already happened within the interval"
            );
        }
        Ok(inside)
    }
}

#[derive(Clone, Copy)]
enum HistoryKind {
    Repairs,
    HealthEvents,
}

/// `GetRepairHistory(?Count, TimeWindow)` and
/// `GetHealthEventHistory(?Count, TimeWindow)`.
struct History {
    kind: HistoryKind,
    shared: Shared,
}

#[async_trait]
impl SinglePredicate for History {
    fn name(&self) -> &str {
        match self.kind {
            HistoryKind::Repairs => "GetRepairHistory",
            HistoryKind::HealthEvents => "GetHealthEventHistory",
        }
    }

    fn arity(&self) -> (usize, Option<usize>) {
        (2, Some(2))
    }

    fn constraints(&self) -> Vec<(ArgKey, ArgConstraint)> {
        vec![
            (ArgKey::Position(0), ArgConstraint::Output),
            (ArgKey::Position(1), ArgConstraint::Input),
        ]
    }

    async fn solve(
        &self,
        args: &CallArgs,
        _cx: &QueryContext,
    ) -> Result<Option<Answer>, ResolveError> {
        let window = args.duration_arg(1, "TimeWindow")?.unwrap_or(Duration::ZERO);
        let count = if window.is_zero() {
            tracing::info!(
                predicate = self.name(),
                "no valid TimeWindow supplied, reporting 0"
            );
            0
        } else {
            let facts = &self.shared.facts;
            let executor = &self.shared.executor;
            match self.kind {
                HistoryKind::Repairs => executor.completed_repairs(&facts.repair_id(), window).await,
                HistoryKind::HealthEvents => {
                    executor.health_events(facts.event_property(), window).await
                }
            }
            .map_err(|e| backend(self.name(), e))?
        };
        let count = i64::try_from(count).unwrap_or(i64::MAX);
        Ok(Some(Answer::yes().with(0, Value::Int(count))))
    }
}

/// `EmitMessage(...)`: logs its arguments and succeeds.
struct EmitMessage;

#[async_trait]
impl BooleanPredicate for EmitMessage {
    fn name(&self) -> &str {
        "EmitMessage"
    }

    fn arity(&self) -> (usize, Option<usize>) {
        (1, None)
    }

    async fn check(&self, args: &CallArgs, cx: &QueryContext) -> Result<bool, ResolveError> {
        let message: String = args
            .term()
            .args()
            .iter()
            .map(|a| a.value.as_constant().map_or_else(|| a.value.to_string(), Value::to_text))
            .collect();
        tracing::info!(target: "mendlog::repair", query = %cx.query_id(), "{message}");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::repair::{compile_policy, run_repair_query, InMemoryRepairExecutor};

    fn facts(code: &str) -> RepairFacts {
        RepairFacts {
            error_code: code.into(),
            node_name: "_Node_0".into(),
            partition_id: "p1".into(),
            replica_or_instance_id: 7,
            metric_name: "CpuPercent".into(),
            ..RepairFacts::default()
        }
    }

    fn executor() -> (Arc<InMemoryRepairExecutor>, Arc<dyn RepairExecutor>) {
        let memory = Arc::new(InMemoryRepairExecutor::new());
        let dynamic: Arc<dyn RepairExecutor> = memory.clone();
        (memory, dynamic)
    }

    const RULES: &str = r#"
        ## Restart the replica at most twice an hour.
        Mitigate(ErrorCode=?c) :- ?c == "FO001", GetRepairHistory(?n, 01:00:00), ?n < 2, RestartReplica(true, 00:01:00).
        Mitigate(ErrorCode="FO002") :- DeleteFiles("/var/log/app", SortOrder="Descending", MaxFilesToDelete=5).
    "#;

    #[tokio::test]
    async fn test_restart_respects_history_limit() {
        let (memory, executor) = executor();
        let config = EngineConfig::default();
        let cx = QueryContext::new_root();

        for _ in 0..2 {
            assert!(run_repair_query(RULES, facts("FO001"), Arc::clone(&executor), &config, &cx).await.unwrap());
        }
        assert!(!run_repair_query(RULES, facts("FO001"), Arc::clone(&executor), &config, &QueryContext::new_root())
            .await
            .unwrap());
        assert_eq!(memory.executed(RepairAction::RestartReplica), 2);

        let task = &memory.tasks()[0];
        assert!(task.policy.do_health_checks);
        assert_eq!(task.policy.max_wait_for_health, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_delete_files_reads_named_arguments() {
        let (memory, executor) = executor();
        let ok = run_repair_query(RULES, facts("FO002"), executor, &EngineConfig::default(), &QueryContext::new_root())
            .await
            .unwrap();
        assert!(ok);
        let cleanup = memory.tasks()[0].policy.cleanup.clone().unwrap();
        assert_eq!(cleanup.folder_path, "/var/log/app");
        assert_eq!(cleanup.sort_order, FileSortOrder::Descending);
        assert_eq!(cleanup.max_files, 5);
        assert!(!cleanup.recurse_subdirectories);
    }

    #[tokio::test]
    async fn test_unknown_error_code_does_nothing() {
        let (memory, executor) = executor();
        let ok = run_repair_query(RULES, facts("FO404"), executor, &EngineConfig::default(), &QueryContext::new_root())
            .await
            .unwrap();
        assert!(!ok);
        assert!(memory.tasks().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_schedules_without_executing() {
        let (memory, executor) = executor();
        let mut config = EngineConfig::default();
        config.repair.dry_run = true;
        assert!(run_repair_query(RULES, facts("FO001"), executor, &config, &QueryContext::new_root())
            .await
            .unwrap());
        assert_eq!(memory.tasks().len(), 1);
        assert_eq!(memory.executed(RepairAction::RestartReplica), 0);
    }

    #[tokio::test]
    async fn test_schedule_interval_blocks_repeat() {
        let (_memory, executor) = executor();
        let rules = "Mitigate :- not(CheckInsideScheduleInterval(00:10:00)), RestartFabricNode().";
        let config = EngineConfig::default();
        assert!(run_repair_query(rules, facts("FO001"), Arc::clone(&executor), &config, &QueryContext::new_root())
            .await
            .unwrap());
        assert!(!run_repair_query(rules, facts("FO001"), executor, &config, &QueryContext::new_root())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_health_event_history_counts_property() {
        let (memory, executor) = executor();
        memory.record_health_event("CpuPercent", Utc::now());
        memory.record_health_event("CpuPercent", Utc::now());
        memory.record_health_event("MemoryMb", Utc::now());
        let rules = "Mitigate :- GetHealthEventHistory(?n, 00:05:00), ?n == 2, EmitMessage(\"events: \", ?n).";
        assert!(run_repair_query(rules, facts("FO001"), executor, &EngineConfig::default(), &QueryContext::new_root())
            .await
            .unwrap());
    }

    #[test]
    fn test_history_count_must_be_unbound() {
        let (_memory, executor) = executor();
        let facts = Arc::new(facts("FO001"));
        let err = compile_policy(
            "bad",
            "Mitigate :- GetRepairHistory(3, 01:00:00).",
            &facts,
            &executor,
            &EngineConfig::default(),
        )
        .unwrap_err();
        assert!(err.is_compile());
        assert!(err.to_string().contains("GetRepairHistory"));
    }

    #[test]
    fn test_restart_arity_checked_at_compile_time() {
        let (_memory, executor) = executor();
        let facts = Arc::new(facts("FO001"));
        let err = compile_policy(
            "bad",
            "Mitigate :- RestartReplica(true, 00:01:00, 00:10:00, extra).",
            &facts,
            &executor,
            &EngineConfig::default(),
        )
        .unwrap_err();
        assert!(err.is_compile());
    }
}
