use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use mendlog::{
    boolean, BooleanPredicate, CallArgs, CompoundTerm, ContextEvent, Module, PredicateTable,
    QueryContext, QueryDispatcher, QueryOptions, ResolveError,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stability_waits_for_branches_finishing_in_reverse_order() {
    const BRANCHES: u64 = 8;

    let root = QueryContext::new_root();
    let events = root.subscribe();
    let fired = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));

    let branches: Vec<QueryContext> = (0..BRANCHES).map(|_| root.create_child()).collect();
    {
        let fired = Arc::clone(&fired);
        let completed = Arc::clone(&completed);
        root.when_stable(move || {
            assert_eq!(completed.load(Ordering::SeqCst), BRANCHES as usize);
            fired.fetch_add(1, Ordering::SeqCst);
        });
    }
    root.set_stable(true);
    assert!(!root.is_stable());

    let handles: Vec<_> = branches
        .into_iter()
        .enumerate()
        .map(|(i, branch)| {
            let completed = Arc::clone(&completed);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10 * (BRANCHES - i as u64))).await;
                completed.fetch_add(1, Ordering::SeqCst);
                branch.set_stable(true);
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    root.wait_stable().await;
    assert!(root.is_stable());
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    let stable_events = events
        .try_iter()
        .filter(|e| matches!(e, ContextEvent::Stable))
        .count();
    assert_eq!(stable_events, 1);
}

#[test]
fn suspension_reaches_descendants_once() {
    let root = QueryContext::new_root();
    let child = root.create_child();
    let grandchild = child.create_child();
    let events = root.subscribe();

    child.set_suspended(true);
    child.set_suspended(true);
    assert!(grandchild.is_suspended());
    assert!(!root.is_suspended());

    child.set_suspended(false);
    assert!(!grandchild.is_suspended());

    let suspended = events
        .try_iter()
        .filter(|e| matches!(e, ContextEvent::Suspended(id) if *id == grandchild.id()))
        .count();
    assert_eq!(suspended, 1);
}

struct Hang(Arc<AtomicUsize>);

#[async_trait]
impl BooleanPredicate for Hang {
    fn name(&self) -> &str {
        "Hang"
    }

    fn arity(&self) -> (usize, Option<usize>) {
        (0, Some(0))
    }

    async fn check(&self, _args: &CallArgs, _cx: &QueryContext) -> Result<bool, ResolveError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(true)
    }
}

fn hanging_dispatcher(calls: &Arc<AtomicUsize>) -> QueryDispatcher {
    let mut table = PredicateTable::new();
    table.add(boolean(Hang(Arc::clone(calls))));
    let module = Module::from_source(
        "hang",
        "p(?X) :- ?X = 1, Hang().\np(?X) :- ?X = 2.",
        Arc::new(table),
    )
    .unwrap();
    QueryDispatcher::new(Arc::new(module))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_aborts_pending_predicates() {
    let calls = Arc::new(AtomicUsize::new(0));
    let dispatcher = hanging_dispatcher(&calls);
    let root = QueryContext::new_root();

    let mut query = dispatcher.query_text("p(?X)", root.clone()).unwrap();
    let task = tokio::spawn(async move {
        let result = query.next().await;
        (result, query.next().await)
    });

    while calls.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    root.cancel();

    let (first, second) = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    let err = first.unwrap_err();
    assert!(err.is_cancelled());
    // The second clause is never tried and no binding leaks out.
    assert!(second.unwrap().is_none());
    assert!(root.is_cancelled());
    assert!(root.is_stable());
}

#[tokio::test]
async fn predicate_timeout_is_reported() {
    let calls = Arc::new(AtomicUsize::new(0));
    let dispatcher = hanging_dispatcher(&calls).with_options(QueryOptions {
        predicate_timeout: Some(Duration::from_millis(20)),
        ..QueryOptions::default()
    });
    let err = dispatcher
        .run_query(CompoundTerm::positional("p", vec![mendlog::Term::constant(1)]))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(err.to_string().contains("Hang"));
}
