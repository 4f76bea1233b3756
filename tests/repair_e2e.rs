use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use mendlog::repair::run_repair_file;
use mendlog::{
    boolean, run_repair_query, BooleanPredicate, CallArgs, CompoundTerm, EngineConfig,
    InMemoryRepairExecutor, Module, PredicateTable, QueryContext, QueryDispatcher, RepairAction,
    RepairExecutor, RepairFacts, ResolveError, Term,
};

struct StubRestart(Arc<AtomicUsize>);

#[async_trait]
impl BooleanPredicate for StubRestart {
    fn name(&self) -> &str {
        "RestartReplica"
    }

    fn arity(&self) -> (usize, Option<usize>) {
        (0, Some(3))
    }

    async fn check(&self, _args: &CallArgs, _cx: &QueryContext) -> Result<bool, ResolveError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

#[tokio::test]
async fn mitigate_invokes_restart_exactly_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut table = PredicateTable::new();
    table.add(boolean(StubRestart(Arc::clone(&calls))));
    let module = Module::from_source(
        "replica",
        "Mitigate(?Code) :- ?Code == \"FO001\", RestartReplica().",
        Arc::new(table),
    )
    .unwrap();
    let dispatcher = QueryDispatcher::new(Arc::new(module));

    let goal = |code: &str| CompoundTerm::positional("Mitigate", vec![Term::constant(code)]);
    assert!(dispatcher.run_query(goal("FO001")).await.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert!(!dispatcher.run_query(goal("FO002")).await.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

const POLICY: &str = r#"
## Replica policy: restart on FO001 unless one already ran in the last hour,
## otherwise escalate to a code package restart.
Mitigate(ErrorCode=?code, MetricValue=?value) :- ?code == "FO001", ?value >= 90, \
    GetRepairHistory(?count, 01:00:00), ?count == 0, !, RestartReplica().
Mitigate(ErrorCode="FO001") :- RestartCodePackage(DoHealthChecks=false).
"#;

fn facts(value: f64) -> RepairFacts {
    RepairFacts {
        error_code: "FO001".into(),
        metric_name: "CpuPercent".into(),
        metric_value: value,
        node_name: "_Node_2".into(),
        service_name: "fabric:/Shop/Cart".into(),
        partition_id: "0b1c".into(),
        replica_or_instance_id: 42,
        ..RepairFacts::default()
    }
}

#[tokio::test]
async fn repair_policy_escalates_after_first_restart() {
    let memory = Arc::new(InMemoryRepairExecutor::new());
    let executor: Arc<dyn RepairExecutor> = memory.clone();
    let config = EngineConfig::default();

    for _ in 0..2 {
        let mitigated = run_repair_query(
            POLICY,
            facts(95.0),
            Arc::clone(&executor),
            &config,
            &QueryContext::new_root(),
        )
        .await
        .unwrap();
        assert!(mitigated);
    }
    assert_eq!(memory.executed(RepairAction::RestartReplica), 1);
    assert_eq!(memory.executed(RepairAction::RestartCodePackage), 1);

    let low = run_repair_query(POLICY, facts(10.0), executor, &config, &QueryContext::new_root())
        .await
        .unwrap();
    assert!(low);
    assert_eq!(memory.executed(RepairAction::RestartCodePackage), 2);
}

#[tokio::test]
async fn declined_repairs_leave_the_entity_unmitigated() {
    let memory = Arc::new(InMemoryRepairExecutor::new());
    memory.decline(RepairAction::RestartReplica, "replica is primary");
    memory.decline(RepairAction::RestartCodePackage, "frozen");
    let executor: Arc<dyn RepairExecutor> = memory.clone();

    let mitigated = run_repair_query(
        POLICY,
        facts(95.0),
        executor,
        &EngineConfig::default(),
        &QueryContext::new_root(),
    )
    .await
    .unwrap();
    assert!(!mitigated);
    assert!(memory.tasks().is_empty());
}

#[tokio::test]
async fn policies_load_from_rule_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("replica.rules");
    std::fs::write(&path, POLICY).unwrap();

    let memory = Arc::new(InMemoryRepairExecutor::new());
    let executor: Arc<dyn RepairExecutor> = memory.clone();
    assert!(run_repair_file(&path, facts(99.0), executor, &EngineConfig::default())
        .await
        .unwrap());
    assert_eq!(memory.executed(RepairAction::RestartReplica), 1);

    let missing = run_repair_file(
        dir.path().join("missing.rules"),
        facts(99.0),
        Arc::new(InMemoryRepairExecutor::new()),
        &EngineConfig::default(),
    )
    .await
    .unwrap_err();
    assert!(missing.is_compile());
}
