//! Repair embedding layer.
//!
//! A health observer reports a problem as [`RepairFacts`]. The facts become
//! the entry goal `Mitigate(AppName = ..., ErrorCode = ..., ...)`, which is
//! resolved against the rules of one repair policy. Rules decide whether to
//! repair by calling the domain predicates in [`predicates`], which talk to
//! the cluster through a [`RepairExecutor`].

pub mod predicates;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{MendResult, RepairError};
use crate::module::{Module, PredicateProvider};
use crate::query::{QueryContext, QueryDispatcher, QueryOptions};
use crate::term::{Argument, CompoundTerm, Term};
use crate::value::Value;

pub use predicates::RepairPredicates;

/// Functor of the entry goal.
pub const ENTRY_GOAL: &str = "Mitigate";

/// What a health observer reported about one unhealthy entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct RepairFacts {
    /// Application the entity belongs to.
    pub app_name: String,
    /// Error code raised by the observer, e.g. `FO001`.
    pub error_code: String,
    /// Metric that crossed its threshold.
    pub metric_name: String,
    /// Current value of that metric.
    pub metric_value: f64,
    /// Node hosting the entity.
    pub node_name: String,
    /// Node type of that node.
    pub node_type: String,
    /// Observer that produced the report.
    pub observer_name: String,
    /// Operating system of the node.
    #[serde(rename = "OS")]
    pub os: String,
    /// Service name, e.g. `fabric:/App/Svc`.
    pub service_name: String,
    /// System process name for system service repairs.
    pub system_service_process_name: String,
    /// Partition of the target replica.
    pub partition_id: String,
    /// Replica or instance id; zero when not applicable.
    pub replica_or_instance_id: i64,
    /// Property of the health event that triggered the repair.
    pub health_event_property: String,
}

impl RepairFacts {
    /// Parses facts from a TOML table.
    ///
    /// # Errors
    ///
    /// Returns [`RepairError::Rejected`] for malformed input.
    pub fn from_toml_str(text: &str) -> Result<Self, RepairError> {
        toml::from_str(text).map_err(|e| RepairError::Rejected {
            reason: format!("invalid repair facts: {e}"),
        })
    }

    /// The entry goal, with every fact as a named argument.
    #[must_use]
    pub fn to_goal(&self) -> CompoundTerm {
        let text = |s: &str| Term::constant(s);
        let args = vec![
            Argument::named("AppName", text(&self.app_name)),
            Argument::named("ErrorCode", text(&self.error_code)),
            Argument::named("MetricName", text(&self.metric_name)),
            Argument::named("MetricValue", Term::constant(self.metric_value)),
            Argument::named("NodeName", text(&self.node_name)),
            Argument::named("NodeType", text(&self.node_type)),
            Argument::named("ObserverName", text(&self.observer_name)),
            Argument::named("OS", text(&self.os)),
            Argument::named("PartitionId", text(&self.partition_id)),
            Argument::named(
                "ReplicaOrInstanceId",
                Term::constant(self.replica_or_instance_id),
            ),
            Argument::named("ServiceName", text(&self.service_name)),
            Argument::named(
                "SystemServiceProcessName",
                text(&self.system_service_process_name),
            ),
        ];
        CompoundTerm::new(ENTRY_GOAL, args)
    }

    /// Identifies the repaired entity across repair runs.
    #[must_use]
    pub fn repair_id(&self) -> String {
        let replica = (self.replica_or_instance_id > 0).then(|| self.replica_or_instance_id.to_string());
        [
            Some(self.node_name.as_str()),
            Some(self.service_name.as_str()),
            Some(self.partition_id.as_str()),
            replica.as_deref(),
            Some(self.system_service_process_name.as_str()),
        ]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
    }

    /// The health-event property used for event history.
    #[must_use]
    pub fn event_property(&self) -> &str {
        if self.health_event_property.is_empty() {
            &self.metric_name
        } else {
            &self.health_event_property
        }
    }
}

/// A repair a rule can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RepairAction {
    /// Restart one stateful replica or stateless instance.
    RestartReplica,
    /// Restart the code package hosting the service.
    RestartCodePackage,
    /// Restart the fabric node.
    RestartFabricNode,
    /// Reboot the machine.
    RestartVm,
    /// Restart a fabric system process.
    RestartFabricSystemProcess,
    /// Delete files to reclaim disk space.
    DeleteFiles,
}

impl RepairAction {
    /// The predicate name rules use to request this repair.
    #[must_use]
    pub const fn predicate_name(self) -> &'static str {
        match self {
            Self::RestartReplica => "RestartReplica",
            Self::RestartCodePackage => "RestartCodePackage",
            Self::RestartFabricNode => "RestartFabricNode",
            Self::RestartVm => "RestartVM",
            Self::RestartFabricSystemProcess => "RestartFabricSystemProcess",
            Self::DeleteFiles => "DeleteFiles",
        }
    }
}

impl fmt::Display for RepairAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.predicate_name())
    }
}

/// Order in which files are considered for deletion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileSortOrder {
    /// Oldest first.
    #[default]
    Ascending,
    /// Newest first.
    Descending,
}

impl FileSortOrder {
    /// Parses `ascending` or `descending`, ignoring case.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "ascending" => Some(Self::Ascending),
            "descending" => Some(Self::Descending),
            _ => None,
        }
    }
}

/// Disk cleanup parameters of a `DeleteFiles` repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCleanup {
    /// Directory to clean.
    pub folder_path: String,
    /// Which files go first.
    pub sort_order: FileSortOrder,
    /// Zero deletes every matching file.
    pub max_files: u64,
    /// Also clean nested directories.
    pub recurse_subdirectories: bool,
}

/// How a requested repair should be carried out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairPolicy {
    /// The repair to run.
    pub action: RepairAction,
    /// Check entity health after the repair.
    pub do_health_checks: bool,
    /// How long to wait for the entity to report healthy.
    pub max_wait_for_health: Duration,
    /// Upper bound on the repair itself.
    pub max_execution: Duration,
    /// Set for `DeleteFiles` repairs.
    pub cleanup: Option<FileCleanup>,
}

impl RepairPolicy {
    /// A policy with health checks off.
    #[must_use]
    pub const fn new(action: RepairAction, max_execution: Duration) -> Self {
        Self {
            action,
            do_health_checks: false,
            max_wait_for_health: Duration::ZERO,
            max_execution,
            cleanup: None,
        }
    }
}

/// A scheduled repair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairTask {
    /// Task id assigned at scheduling.
    pub id: Uuid,
    /// Entity the repair targets; see [`RepairFacts::repair_id`].
    pub repair_id: String,
    /// What was requested.
    pub policy: RepairPolicy,
    /// Error code that triggered the repair.
    pub error_code: String,
    /// When the task was scheduled.
    pub scheduled_at: DateTime<Utc>,
}

/// The cluster-side repair orchestration.
#[async_trait]
pub trait RepairExecutor: Send + Sync {
    /// Schedules a repair; `None` when the orchestrator declines it.
    async fn schedule(
        &self,
        facts: &RepairFacts,
        policy: RepairPolicy,
    ) -> Result<Option<RepairTask>, RepairError>;

    /// Runs a scheduled repair and reports whether it succeeded.
    async fn execute(&self, task: &RepairTask) -> Result<bool, RepairError>;

    /// Successful repairs of `repair_id` completed within `window`.
    async fn completed_repairs(&self, repair_id: &str, window: Duration) -> Result<u64, RepairError>;

    /// Health events with `property` seen within `window`.
    async fn health_events(&self, property: &str, window: Duration) -> Result<u64, RepairError>;

    /// When a repair of `repair_id` was last scheduled.
    async fn last_scheduled(&self, repair_id: &str) -> Result<Option<DateTime<Utc>>, RepairError>;

    /// When a repair of `repair_id` last finished.
    async fn last_completed(&self, repair_id: &str) -> Result<Option<DateTime<Utc>>, RepairError>;
}

#[derive(Debug, Clone)]
struct RepairRecord {
    task: RepairTask,
    completed_at: Option<DateTime<Utc>>,
    succeeded: bool,
}

#[derive(Debug, Default)]
struct ExecutorState {
    records: Vec<RepairRecord>,
    events: Vec<(String, DateTime<Utc>)>,
    declined: HashMap<RepairAction, String>,
}

/// A [`RepairExecutor`] that records repairs in memory.
///
/// Used for dry runs and tests: executing a task marks it completed and
/// successful without touching any cluster.
#[derive(Debug, Default)]
pub struct InMemoryRepairExecutor {
    state: Mutex<ExecutorState>,
}

impl InMemoryRepairExecutor {
    /// An executor with no history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ExecutorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes `schedule` decline every repair of `action`.
    pub fn decline(&self, action: RepairAction, reason: impl Into<String>) {
        self.lock().declined.insert(action, reason.into());
    }

    /// Records a health event observed at `at`.
    pub fn record_health_event(&self, property: impl Into<String>, at: DateTime<Utc>) {
        self.lock().events.push((property.into(), at));
    }

    /// Records a completed repair, as if run at `at`.
    pub fn record_completed(&self, facts: &RepairFacts, action: RepairAction, at: DateTime<Utc>) {
        let task = RepairTask {
            id: Uuid::new_v4(),
            repair_id: facts.repair_id(),
            policy: RepairPolicy::new(action, Duration::ZERO),
            error_code: facts.error_code.clone(),
            scheduled_at: at,
        };
        self.lock().records.push(RepairRecord {
            task,
            completed_at: Some(at),
            succeeded: true,
        });
    }

    /// Every task scheduled so far, oldest first.
    #[must_use]
    pub fn tasks(&self) -> Vec<RepairTask> {
        self.lock().records.iter().map(|r| r.task.clone()).collect()
    }

    /// Number of tasks executed with `action`.
    #[must_use]
    pub fn executed(&self, action: RepairAction) -> usize {
        self.lock()
            .records
            .iter()
            .filter(|r| r.completed_at.is_some() && r.task.policy.action == action)
            .count()
    }
}

pub(crate) fn within(at: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    (now - at).to_std().map_or(true, |age| age <= window)
}

#[async_trait]
impl RepairExecutor for InMemoryRepairExecutor {
    async fn schedule(
        &self,
        facts: &RepairFacts,
        policy: RepairPolicy,
    ) -> Result<Option<RepairTask>, RepairError> {
        let mut state = self.lock();
        if let Some(reason) = state.declined.get(&policy.action) {
            tracing::info!(action = %policy.action, reason = %reason, "repair declined");
            return Ok(None);
        }
        let task = RepairTask {
            id: Uuid::new_v4(),
            repair_id: facts.repair_id(),
            policy,
            error_code: facts.error_code.clone(),
            scheduled_at: Utc::now(),
        };
        state.records.push(RepairRecord {
            task: task.clone(),
            completed_at: None,
            succeeded: false,
        });
        Ok(Some(task))
    }

    async fn execute(&self, task: &RepairTask) -> Result<bool, RepairError> {
        let mut state = self.lock();
        let record = state
            .records
            .iter_mut()
            .find(|r| r.task.id == task.id)
            .ok_or_else(|| RepairError::Backend {
                message: format!("unknown repair task {}", task.id),
            })?;
        record.completed_at = Some(Utc::now());
        record.succeeded = true;
        Ok(true)
    }

    async fn completed_repairs(&self, repair_id: &str, window: Duration) -> Result<u64, RepairError> {
        let now = Utc::now();
        let count = self
            .lock()
            .records
            .iter()
            .filter(|r| r.succeeded && r.task.repair_id == repair_id)
            .filter(|r| r.completed_at.is_some_and(|at| within(at, now, window)))
            .count();
        Ok(count as u64)
    }

    async fn health_events(&self, property: &str, window: Duration) -> Result<u64, RepairError> {
        let now = Utc::now();
        let count = self
            .lock()
            .events
            .iter()
            .filter(|(p, at)| p == property && within(*at, now, window))
            .count();
        Ok(count as u64)
    }

    /// When a repair of `repair_id` was last scheduled.
    async fn last_scheduled(&self, repair_id: &str) -> Result<Option<DateTime<Utc>>, RepairError> {
        Ok(self
            .lock()
            .records
            .iter()
            .filter(|r| r.task.repair_id == repair_id)
            .map(|r| r.task.scheduled_at)
            .max())
    }

    async fn last_completed(&self, repair_id: &str) -> Result<Option<DateTime<Utc>>, RepairError> {
        Ok(self
            .lock()
            .records
            .iter()
            .filter(|r| r.task.repair_id == repair_id)
            .filter_map(|r| r.completed_at)
            .max())
    }
}

/// Compiles a repair policy's rules with the domain predicates bound to
/// `facts`.
///
/// # Errors
///
/// Returns the first compile error in the rules.
pub fn compile_policy(
    name: &str,
    rules: &str,
    facts: &Arc<RepairFacts>,
    executor: &Arc<dyn RepairExecutor>,
    config: &EngineConfig,
) -> MendResult<Module> {
    let provider: Arc<dyn PredicateProvider> =
        Arc::new(RepairPredicates::new(Arc::clone(facts), Arc::clone(executor), config.repair.clone()).provider());
    Ok(Module::from_source(name, rules, provider)?)
}

/// Resolves the `Mitigate` goal for `facts` against a policy's rules and
/// reports whether any rule applied.
///
/// # Errors
///
/// Returns compile errors in the rules and any error that aborted the
/// query, including cancellation through `cx`.
pub async fn run_repair_query(
    rules: &str,
    facts: RepairFacts,
    executor: Arc<dyn RepairExecutor>,
    config: &EngineConfig,
    cx: &QueryContext,
) -> MendResult<bool> {
    let facts = Arc::new(facts);
    let module = compile_policy("repair", rules, &facts, &executor, config)?;
    let dispatcher =
        QueryDispatcher::new(Arc::new(module)).with_options(QueryOptions::from(config));

    for (name, value) in [
        ("NodeName", Value::from(facts.node_name.as_str())),
        ("ErrorCode", Value::from(facts.error_code.as_str())),
        ("RepairId", Value::from(facts.repair_id())),
    ] {
        cx.set_var(name, value);
    }

    let mitigated = dispatcher.run_query_in(facts.to_goal(), cx).await?;
    tracing::info!(
        repair_id = %facts.repair_id(),
        error_code = %facts.error_code,
        mitigated,
        "repair query finished"
    );
    Ok(mitigated)
}

/// Reads a rule file and runs [`run_repair_query`] against it.
///
/// # Errors
///
/// See [`run_repair_query`]; unreadable files are compile errors.
pub async fn run_repair_file(
    path: impl AsRef<Path>,
    facts: RepairFacts,
    executor: Arc<dyn RepairExecutor>,
    config: &EngineConfig,
) -> MendResult<bool> {
    let path = path.as_ref();
    let rules = std::fs::read_to_string(path).map_err(|e| crate::error::CompileError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    run_repair_query(&rules, facts, executor, config, &QueryContext::new_root()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts() -> RepairFacts {
        RepairFacts {
            app_name: "fabric:/Shop".into(),
            error_code: "FO001".into(),
            metric_name: "CpuPercent".into(),
            metric_value: 91.5,
            node_name: "_Node_0".into(),
            service_name: "fabric:/Shop/Cart".into(),
            partition_id: "8e3f".into(),
            replica_or_instance_id: 1337,
            ..RepairFacts::default()
        }
    }

    #[test]
    fn test_goal_carries_named_facts() {
        let goal = facts().to_goal();
        assert_eq!(goal.functor(), ENTRY_GOAL);
        assert_eq!(goal.lookup(usize::MAX, "ErrorCode"), Some(&Term::constant("FO001")));
        assert_eq!(goal.lookup(usize::MAX, "MetricValue"), Some(&Term::constant(91.5)));
        assert_eq!(goal.lookup(usize::MAX, "OS"), Some(&Term::constant("")));
    }

    #[test]
    fn test_repair_id_skips_empty_parts() {
        assert_eq!(facts().repair_id(), "_Node_0_fabric:/Shop/Cart_8e3f_1337");
        let node = RepairFacts {
            node_name: "_Node_3".into(),
            ..RepairFacts::default()
        };
        assert_eq!(node.repair_id(), "_Node_3");
    }

    #[test]
    fn test_facts_from_toml() {
        let parsed = RepairFacts::from_toml_str(
            "ErrorCode = \"FO002\"\nNodeName = \"_Node_1\"\nOS = \"Linux\"\nMetricValue = 3.0\n",
        )
        .unwrap();
        assert_eq!(parsed.error_code, "FO002");
        assert_eq!(parsed.os, "Linux");
        assert!(RepairFacts::from_toml_str("ErrorCode = 5").is_err());
    }

    #[tokio::test]
    async fn test_in_memory_executor_history() {
        let executor = InMemoryRepairExecutor::new();
        let facts = facts();
        let policy = RepairPolicy::new(RepairAction::RestartReplica, Duration::from_secs(60));
        let task = executor.schedule(&facts, policy).await.unwrap().unwrap();
        assert!(executor.last_completed(&facts.repair_id()).await.unwrap().is_none());
        assert!(executor.execute(&task).await.unwrap());

        let id = facts.repair_id();
        assert_eq!(executor.completed_repairs(&id, Duration::from_secs(60)).await.unwrap(), 1);
        assert!(executor.last_scheduled(&id).await.unwrap().is_some());
        assert_eq!(executor.executed(RepairAction::RestartReplica), 1);

        executor.record_completed(&facts, RepairAction::RestartReplica, Utc::now() - chrono::Duration::hours(3));
        assert_eq!(executor.completed_repairs(&id, Duration::from_secs(3600)).await.unwrap(), 1);
        assert_eq!(executor.completed_repairs(&id, Duration::from_secs(4 * 3600)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_declined_repairs_are_not_scheduled() {
        let executor = InMemoryRepairExecutor::new();
        executor.decline(RepairAction::RestartVm, "maintenance window");
        let policy = RepairPolicy::new(RepairAction::RestartVm, Duration::from_secs(60));
        assert!(executor.schedule(&facts(), policy).await.unwrap().is_none());
        assert!(executor.tasks().is_empty());
    }
}
