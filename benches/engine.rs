use std::sync::Arc;
use std::time::Instant;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use mendlog::{
    run_repair_query, EngineConfig, InMemoryRepairExecutor, Module, PredicateTable,
    QueryContext, QueryDispatcher, RepairExecutor, RepairFacts, Term,
};

const LISTS: &str = "
    app([], ?L, ?L).
    app([?H|?T], ?L, [?H|?R]) :- app(?T, ?L, ?R).
    rev([], []).
    rev([?H|?T], ?R) :- rev(?T, ?RT), app(?RT, [?H], ?R).
";

const POLICY: &str = r#"
Mitigate(ErrorCode=?code, MetricValue=?value) :- ?code == "FO001", ?value >= 90, \
    GetRepairHistory(?count, 01:00:00), ?count < 1000000, RestartReplica().
Mitigate(ErrorCode="FO002") :- DeleteFiles("/var/log/app", MaxFilesToDelete=10).
"#;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

fn list(len: i64) -> Term {
    Term::list((0..len).map(Term::constant).collect(), Term::Nil)
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine/compile");
    group.throughput(Throughput::Elements(1));
    group.bench_function("lists", |b| {
        b.iter(|| Module::from_source("lists", LISTS, Arc::new(PredicateTable::new())).unwrap());
    });
    group.finish();
}

fn bench_naive_reverse(c: &mut Criterion) {
    let rt = runtime();
    let module = Module::from_source("lists", LISTS, Arc::new(PredicateTable::new())).unwrap();
    let dispatcher = QueryDispatcher::new(Arc::new(module));

    let mut group = c.benchmark_group("engine/query");
    group.throughput(Throughput::Elements(1));
    group.bench_function("naive_reverse_30", |b| {
        b.iter_custom(|iters| {
            let goal = format!("rev({}, ?R)", list(30));
            let start = Instant::now();
            for _ in 0..iters {
                let solution = rt.block_on(async {
                    let mut query = dispatcher.query_text(&goal, QueryContext::new_root())?;
                    query.next().await
                });
                assert!(solution.unwrap().is_some());
            }
            start.elapsed()
        });
    });
    group.finish();
}

fn bench_repair_decision(c: &mut Criterion) {
    let rt = runtime();
    let config = EngineConfig::default();
    let facts = RepairFacts {
        error_code: "FO001".into(),
        metric_value: 95.0,
        node_name: "_Node_0".into(),
        partition_id: "p1".into(),
        replica_or_instance_id: 7,
        ..RepairFacts::default()
    };

    let mut group = c.benchmark_group("engine/repair");
    group.throughput(Throughput::Elements(1));
    group.bench_function("mitigate_fo001", |b| {
        b.iter_custom(|iters| {
            // Fresh history per sample so repair counts do not leak between samples.
            let executor: Arc<dyn RepairExecutor> = Arc::new(InMemoryRepairExecutor::new());
            let start = Instant::now();
            for _ in 0..iters {
                let cx = QueryContext::new_root();
                let mitigated = rt
                    .block_on(run_repair_query(
                        POLICY,
                        facts.clone(),
                        Arc::clone(&executor),
                        &config,
                        &cx,
                    ))
                    .unwrap();
                assert!(mitigated);
            }
            start.elapsed()
        });
    });
    group.finish();
}

criterion_group!(
    engine,
    bench_compile,
    bench_naive_reverse,
    bench_repair_decision
);
criterion_main!(engine);
