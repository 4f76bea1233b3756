//! Query-context tree.
//!
//! Every query owns one tree of contexts mirroring its active resolution
//! branches. Nodes live in an arena owned by the tree and refer to each other
//! by [`ContextId`], so parent links never form ownership cycles.
//!
//! Each node tracks three flags:
//!
//! - **stable**: the node is locally stable and so is every attached child.
//!   Updates ripple towards the root and stop at the first ancestor whose
//!   value does not change. Work queued with [`QueryContext::when_stable`]
//!   runs once the root becomes stable.
//! - **suspended**: set locally or inherited from any ancestor. Observers are
//!   notified only on actual transitions.
//! - **cancelled**: propagates to every descendant and is never cleared.
//!
//! A single mutex guards the whole tree; critical sections are short and
//! never span an await point.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tokio::sync::{oneshot, Notify};
use uuid::Uuid;

use crate::expression::PropertyContext;
use crate::module::dynamic::DynamicModule;
use crate::value::Value;

/// Capacity of each event subscription.
pub const EVENT_CAPACITY: usize = 1024;

/// Handle of a node in a query's context tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(usize);

impl ContextId {
    /// The root of every tree.
    pub const ROOT: Self = Self(0);

    /// Slot of the node in its tree.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Unique identifier of one query session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryId(Uuid);

impl QueryId {
    /// A fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for QueryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Observable transitions of the context tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextEvent {
    /// A context was suspended.
    Suspended(ContextId),
    /// A suspended context resumed.
    Resumed(ContextId),
    /// A context was cancelled.
    Cancelled(ContextId),
    /// The root became stable.
    Stable,
}

type Deferred = Box<dyn FnOnce() + Send>;

#[derive(Debug)]
struct Node {
    parent: Option<ContextId>,
    children: Vec<ContextId>,
    local_stable: bool,
    stable: bool,
    local_suspended: bool,
    suspended: bool,
    cancelled: bool,
    attached: bool,
}

impl Node {
    const fn new(parent: Option<ContextId>, suspended: bool, cancelled: bool) -> Self {
        Self {
            parent,
            children: Vec::new(),
            local_stable: false,
            stable: false,
            local_suspended: false,
            suspended,
            cancelled,
            attached: true,
        }
    }
}

#[derive(Default)]
struct TreeState {
    nodes: Vec<Node>,
    waiting: Vec<Deferred>,
    subscribers: Vec<Sender<ContextEvent>>,
}

/// Side effects collected under the lock and released after it.
#[derive(Default)]
struct Outcome {
    events: Vec<ContextEvent>,
    deferred: Vec<Deferred>,
}

impl TreeState {
    /// Recomputes stability from `start` upwards.
    fn ripple_stable(&mut self, start: ContextId, out: &mut Outcome) {
        let mut current = Some(start);
        while let Some(id) = current {
            let node = &self.nodes[id.0];
            if !node.attached {
                return;
            }
            let stable = node.local_stable
                && node.children.iter().all(|c| self.nodes[c.0].stable);
            if stable == node.stable {
                return;
            }
            let parent = node.parent;
            self.nodes[id.0].stable = stable;
            if id == ContextId::ROOT && stable {
                out.events.push(ContextEvent::Stable);
                out.deferred.append(&mut self.waiting);
            }
            current = parent;
        }
    }

    /// Recomputes the suspended flag below `start`.
    fn ripple_suspended(&mut self, start: ContextId, out: &mut Outcome) {
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            let inherited = self.nodes[id.0]
                .parent
                .is_some_and(|p| self.nodes[p.0].suspended);
            let node = &mut self.nodes[id.0];
            let suspended = node.local_suspended || node.cancelled || inherited;
            if suspended == node.suspended {
                continue;
            }
            node.suspended = suspended;
            out.events.push(if suspended {
                ContextEvent::Suspended(id)
            } else {
                ContextEvent::Resumed(id)
            });
            stack.extend(node.children.iter().copied());
        }
    }

    fn detach_child(&mut self, id: ContextId) {
        self.nodes[id.0].attached = false;
        if let Some(parent) = self.nodes[id.0].parent {
            self.nodes[parent.0].children.retain(|c| *c != id);
        }
    }
}

/// Shared state of one query session.
pub struct ContextTree {
    query_id: QueryId,
    state: Mutex<TreeState>,
    cancel_notify: Notify,
    variables: RwLock<HashMap<String, Value>>,
    asserted: DynamicModule,
    dropped_events: AtomicU64,
}

impl fmt::Debug for ContextTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextTree")
            .field("query_id", &self.query_id)
            .field("contexts", &self.lock().nodes.len())
            .finish_non_exhaustive()
    }
}

impl ContextTree {
    fn lock(&self) -> MutexGuard<'_, TreeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` under the lock, then delivers events and deferred work.
    fn update<R>(&self, f: impl FnOnce(&mut TreeState, &mut Outcome) -> R) -> R {
        let mut out = Outcome::default();
        let (result, subscribers) = {
            let mut state = self.lock();
            let result = f(&mut state, &mut out);
            let subscribers = if out.events.is_empty() {
                Vec::new()
            } else {
                state.subscribers.clone()
            };
            (result, subscribers)
        };

        let mut disconnected: Vec<usize> = Vec::new();
        for event in &out.events {
            for (i, tx) in subscribers.iter().enumerate() {
                if disconnected.contains(&i) {
                    continue;
                }
                match tx.try_send(*event) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        self.dropped_events.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Disconnected(_)) => disconnected.push(i),
                }
            }
        }
        if !disconnected.is_empty() {
            let gone: Vec<&Sender<ContextEvent>> =
                disconnected.iter().map(|&i| &subscribers[i]).collect();
            // The list may have changed since it was cloned; match by channel.
            self.lock()
                .subscribers
                .retain(|tx| !gone.iter().any(|g| g.same_channel(tx)));
        }
        for task in out.deferred {
            task();
        }
        result
    }
}

/// A handle on one node of a query's context tree.
///
/// Handles are cheap to clone; all handles of a tree share its variables,
/// asserted facts and flags.
#[derive(Clone, Debug)]
pub struct QueryContext {
    tree: Arc<ContextTree>,
    id: ContextId,
}

impl Default for QueryContext {
    fn default() -> Self {
        Self::new_root()
    }
}

impl QueryContext {
    /// Creates the root of a fresh tree with empty variables and facts.
    #[must_use]
    pub fn new_root() -> Self {
        let state = TreeState {
            nodes: vec![Node::new(None, false, false)],
            ..TreeState::default()
        };
        let tree = ContextTree {
            query_id: QueryId::new(),
            state: Mutex::new(state),
            cancel_notify: Notify::new(),
            variables: RwLock::new(HashMap::new()),
            asserted: DynamicModule::new(),
            dropped_events: AtomicU64::new(0),
        };
        Self {
            tree: Arc::new(tree),
            id: ContextId::ROOT,
        }
    }

    /// This node's id.
    #[must_use]
    pub const fn id(&self) -> ContextId {
        self.id
    }

    /// Id shared by every node of the tree.
    #[must_use]
    pub fn query_id(&self) -> QueryId {
        self.tree.query_id
    }

    /// Handle on another node of the same tree.
    #[must_use]
    pub fn at(&self, id: ContextId) -> Self {
        Self {
            tree: Arc::clone(&self.tree),
            id,
        }
    }

    /// Handle to the root of this tree.
    #[must_use]
    pub fn root(&self) -> Self {
        self.at(ContextId::ROOT)
    }

    /// The parent node, or `None` at the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        let parent = self.tree.lock().nodes[self.id.0].parent;
        parent.map(|p| self.at(p))
    }

    /// Attached children, in creation order.
    #[must_use]
    pub fn children(&self) -> Vec<ContextId> {
        self.tree.lock().nodes[self.id.0].children.clone()
    }

    /// Number of contexts ever created in this tree.
    ///
    /// Detached nodes keep their slot until the tree is dropped; the query
    /// step limit bounds the total.
    #[must_use]
    pub fn context_count(&self) -> usize {
        self.tree.lock().nodes.len()
    }

    /// Creates an unstable child that inherits suspension and cancellation.
    #[must_use]
    pub fn create_child(&self) -> Self {
        let parent = self.id;
        let id = self.tree.update(|state, out| {
            let p = &state.nodes[parent.0];
            let node = Node::new(Some(parent), p.suspended, p.cancelled);
            let id = ContextId(state.nodes.len());
            state.nodes.push(node);
            state.nodes[parent.0].children.push(id);
            state.ripple_stable(parent, out);
            id
        });
        self.at(id)
    }

    /// Sets the local stability of this context.
    pub fn set_stable(&self, stable: bool) {
        let id = self.id;
        self.tree.update(|state, out| {
            state.nodes[id.0].local_stable = stable;
            state.ripple_stable(id, out);
        });
    }

    /// True when this context and all attached descendants are stable.
    #[must_use]
    pub fn is_stable(&self) -> bool {
        self.tree.lock().nodes[self.id.0].stable
    }

    /// Stability of this node alone, ignoring its children.
    #[must_use]
    pub fn is_locally_stable(&self) -> bool {
        self.tree.lock().nodes[self.id.0].local_stable
    }

    /// Sets the local suspension flag; descendants follow.
    pub fn set_suspended(&self, suspended: bool) {
        let id = self.id;
        self.tree.update(|state, out| {
            state.nodes[id.0].local_suspended = suspended;
            state.ripple_suspended(id, out);
        });
    }

    /// True when this node itself is suspended.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.tree.lock().nodes[self.id.0].suspended
    }

    /// Cancels this context and every descendant. Cancellation is permanent.
    pub fn cancel(&self) {
        let id = self.id;
        let newly = self.tree.update(|state, out| {
            if state.nodes[id.0].cancelled {
                return false;
            }
            let mut queue = VecDeque::from([id]);
            while let Some(current) = queue.pop_front() {
                let node = &mut state.nodes[current.0];
                node.cancelled = true;
                if !node.suspended {
                    node.suspended = true;
                    out.events.push(ContextEvent::Suspended(current));
                }
                queue.extend(node.children.iter().copied());
            }
            out.events.push(ContextEvent::Cancelled(id));
            true
        });
        if newly {
            tracing::warn!(query = %self.tree.query_id, context = %id, "query context cancelled");
            self.tree.cancel_notify.notify_waiters();
        }
    }

    /// True when this node or an ancestor was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.tree.lock().nodes[self.id.0].cancelled
    }

    /// Completes once this context is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.tree.cancel_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Detaches every child and recomputes stability from local state.
    pub fn clear_children(&self) {
        let id = self.id;
        self.tree.update(|state, out| {
            let children = std::mem::take(&mut state.nodes[id.0].children);
            for child in children {
                state.nodes[child.0].attached = false;
            }
            state.ripple_stable(id, out);
        });
    }

    /// Removes this context from its parent.
    pub fn detach(&self) {
        let id = self.id;
        self.tree.update(|state, out| {
            if !state.nodes[id.0].attached {
                return;
            }
            state.detach_child(id);
            if let Some(parent) = state.nodes[id.0].parent {
                state.ripple_stable(parent, out);
            }
        });
    }

    /// False once the node has been removed from its parent.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.tree.lock().nodes[self.id.0].attached
    }

    /// Runs `task` once the root is stable, immediately if it already is.
    pub fn when_stable(&self, task: impl FnOnce() + Send + 'static) {
        let task: Deferred = Box::new(task);
        self.tree.update(move |state, out| {
            if state.nodes[ContextId::ROOT.0].stable {
                out.deferred.push(task);
            } else {
                state.waiting.push(task);
            }
        });
    }

    /// Completes once the root is stable.
    pub async fn wait_stable(&self) {
        let (tx, rx) = oneshot::channel();
        self.when_stable(move || {
            let _ = tx.send(());
        });
        let _ = rx.await;
    }

    /// Subscribes to suspension, cancellation and stability events.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<ContextEvent> {
        let (tx, rx) = bounded(EVENT_CAPACITY);
        self.tree.lock().subscribers.push(tx);
        rx
    }

    /// Number of live event subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tree.lock().subscribers.len()
    }

    /// Events dropped because a subscriber's buffer was full.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.tree.dropped_events.load(Ordering::Relaxed)
    }

    /// Reads a query-wide variable.
    #[must_use]
    pub fn get_var(&self, name: &str) -> Option<Value> {
        self.tree
            .variables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Writes a query-wide variable, visible to every branch of the query.
    pub fn set_var(&self, name: impl Into<String>, value: Value) {
        self.tree
            .variables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), value);
    }

    /// Facts asserted during this query.
    #[must_use]
    pub fn asserted(&self) -> &DynamicModule {
        &self.tree.asserted
    }
}

impl PropertyContext for QueryContext {
    fn property(&self, name: &str) -> Option<Value> {
        self.get_var(name)
    }
}
