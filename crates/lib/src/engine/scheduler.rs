//! Memoized, deduplicated execution of rule graph entries.
//!
//! Every `(entry, params)` pair is a node with the lifecycle
//! `absent -> Running -> Done(Ok | Err)`. The memo table is the only mutable
//! shared state; all transitions happen under its lock, so at most one task
//! runs per node and concurrent requesters subscribe to that task's result.
//!
//! Running nodes record which nodes they are waiting on. Before a node starts
//! waiting on another running node, the wait-for graph is searched for a path
//! back to the requester; if one exists the request fails with a cycle error
//! instead of deadlocking.
//!
//! Subscriptions are reference counted. When the last subscriber of a running
//! node goes away (for example because a top-level request future was
//! dropped) the node's task is aborted and the node forgotten, which in turn
//! drops the task's own subscriptions.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::try_join_all;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, error, info};

use crate::config::EngineConfig;
use crate::engine::context::RuleContext;
use crate::engine::error::EngineError;
use crate::engine::params::Params;
use crate::process::{ProcessExecutor, executor_for};
use crate::rules::{AnyProduct, Entry, EntryId, GraphError, Inputs, RuleGraph, TypeKey};
use crate::store::Store;

pub(crate) type NodeResult = Result<AnyProduct, EngineError>;

/// Identity of a memoized computation: a rule and the params it consumes.
///
/// The entry that first reached the node is carried along for dispatch but
/// does not take part in equality, so the same rule reached through
/// different queries shares one node.
#[derive(Debug, Clone)]
pub(crate) struct NodeKey {
  pub(crate) rule: usize,
  pub(crate) entry: EntryId,
  pub(crate) params: Params,
}

impl PartialEq for NodeKey {
  fn eq(&self, other: &Self) -> bool {
    self.rule == other.rule && self.params == other.params
  }
}

impl Eq for NodeKey {}

impl Hash for NodeKey {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.rule.hash(state);
    self.params.hash(state);
  }
}

enum NodeState {
  Running(Running),
  Done(NodeResult),
}

struct Running {
  run_id: u64,
  tx: watch::Sender<Option<NodeResult>>,
  subscribers: usize,
  abort: Option<AbortHandle>,
  waiting_on: HashMap<NodeKey, usize>,
}

#[derive(Debug, Default)]
struct Counters {
  rule_runs: AtomicU64,
  memo_hits: AtomicU64,
  joined_in_flight: AtomicU64,
  processes_executed: AtomicU64,
  cancelled: AtomicU64,
}

/// Counters describing scheduler activity since creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SchedulerStats {
  /// Rule bodies started.
  pub rule_runs: u64,
  /// Requests answered from a completed node.
  pub memo_hits: u64,
  /// Requests that subscribed to an already running node.
  pub joined_in_flight: u64,
  /// Processes actually run (cache hits excluded).
  pub processes_executed: u64,
  /// Running nodes aborted because every subscriber went away.
  pub cancelled: u64,
  /// Nodes currently in the memo table.
  pub nodes: usize,
}

pub(crate) struct Inner {
  graph: Arc<RuleGraph>,
  store: Store,
  executor: Arc<dyn ProcessExecutor>,
  config: EngineConfig,
  nodes: Mutex<HashMap<NodeKey, NodeState>>,
  counters: Counters,
  next_run: AtomicU64,
}

impl Inner {
  fn nodes(&self) -> MutexGuard<'_, HashMap<NodeKey, NodeState>> {
    self.nodes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn describe(&self, key: &NodeKey) -> String {
    format!("{} for {}", self.graph.describe(key.entry), key.params)
  }
}

/// Resolves product requests against a [`RuleGraph`]. Cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
  inner: Arc<Inner>,
}

impl fmt::Debug for Scheduler {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Scheduler")
      .field("store", &self.inner.store)
      .field("executor", &self.inner.executor)
      .field("stats", &self.stats())
      .finish_non_exhaustive()
  }
}

impl Scheduler {
  pub fn new(
    graph: impl Into<Arc<RuleGraph>>,
    store: Store,
    executor: Arc<dyn ProcessExecutor>,
    config: EngineConfig,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        graph: graph.into(),
        store,
        executor,
        config,
        nodes: Mutex::new(HashMap::new()),
        counters: Counters::default(),
        next_run: AtomicU64::new(0),
      }),
    }
  }

  /// Open the store named by `config` and execute processes locally.
  pub fn from_config(graph: impl Into<Arc<RuleGraph>>, config: EngineConfig) -> Result<Self, EngineError> {
    let store = Store::open(&config.store_dir)?;
    let executor = executor_for(&store, &config);
    Ok(Self::new(graph, store, executor, config))
  }

  pub fn graph(&self) -> &RuleGraph {
    &self.inner.graph
  }

  pub fn store(&self) -> &Store {
    &self.inner.store
  }

  pub fn config(&self) -> &EngineConfig {
    &self.inner.config
  }

  pub(crate) fn executor(&self) -> &Arc<dyn ProcessExecutor> {
    &self.inner.executor
  }

  pub(crate) fn record_process(&self) {
    self.inner.counters.processes_executed.fetch_add(1, Ordering::Relaxed);
  }

  /// Compute a `P` from `params`.
  ///
  /// A query for `P` with exactly the types in `params` must have been
  /// declared when the graph was built.
  pub async fn request<P: Any + Send + Sync>(&self, params: Params) -> Result<Arc<P>, EngineError> {
    let product = self.request_value(TypeKey::of::<P>(), params).await?;
    downcast(product)
  }

  /// Compute a `P` for each params set. Results are in request order; the
  /// first failure fails the whole batch.
  pub async fn request_all<P: Any + Send + Sync>(&self, params: Vec<Params>) -> Result<Vec<Arc<P>>, EngineError> {
    try_join_all(params.into_iter().map(|p| self.request::<P>(p))).await
  }

  /// Untyped form of [`request`](Self::request).
  pub async fn request_value(&self, product: TypeKey, params: Params) -> Result<AnyProduct, EngineError> {
    let entry = self.inner.graph.query_entry(product, &params.type_keys())?;
    info!(product = %product, params = %params, "starting request");
    self.resolve(entry, &params, None).await
  }

  pub fn stats(&self) -> SchedulerStats {
    let counters = &self.inner.counters;
    SchedulerStats {
      rule_runs: counters.rule_runs.load(Ordering::Relaxed),
      memo_hits: counters.memo_hits.load(Ordering::Relaxed),
      joined_in_flight: counters.joined_in_flight.load(Ordering::Relaxed),
      processes_executed: counters.processes_executed.load(Ordering::Relaxed),
      cancelled: counters.cancelled.load(Ordering::Relaxed),
      nodes: self.inner.nodes().len(),
    }
  }

  /// Forget every completed node. Running nodes are unaffected.
  pub fn invalidate_all(&self) -> usize {
    let mut nodes = self.inner.nodes();
    let before = nodes.len();
    nodes.retain(|_, state| matches!(state, NodeState::Running(_)));
    let removed = before - nodes.len();
    debug!(removed, "invalidated completed nodes");
    removed
  }

  /// Produce the value of `entry` for `params` on behalf of `requester`.
  ///
  /// Boxed because rule bodies resolve their inputs through here, which makes
  /// the future recursive.
  pub(crate) fn resolve<'a>(
    &'a self,
    entry: EntryId,
    params: &'a Params,
    requester: Option<&'a NodeKey>,
  ) -> BoxFuture<'a, NodeResult> {
    async move {
      match self.inner.graph.entry(entry) {
        Entry::Param(ty) => params
          .value(ty)
          .map(|value| value.as_product())
          .ok_or_else(|| EngineError::TypeMismatch {
            expected: ty.to_string(),
            found: format!("no such param in {params}"),
          }),
        Entry::Rule(rule_entry) => {
          let key = NodeKey {
            rule: rule_entry.rule,
            entry,
            params: params.restrict(&rule_entry.used_params),
          };
          self.get_node(key, requester.cloned()).await
        }
        Entry::Unresolved(_) => Err(
          GraphError::NoApplicableRule {
            product: self.inner.graph.describe(entry),
            params: params.to_string(),
            reasons: Vec::new(),
          }
          .into(),
        ),
      }
    }
    .boxed()
  }

  async fn get_node(&self, key: NodeKey, requester: Option<NodeKey>) -> NodeResult {
    let mut subscription = {
      let mut nodes = self.inner.nodes();

      let running = match nodes.get(&key) {
        Some(NodeState::Done(result)) => {
          self.inner.counters.memo_hits.fetch_add(1, Ordering::Relaxed);
          debug!(node = %self.inner.describe(&key), "memo hit");
          return result.clone();
        }
        Some(NodeState::Running(_)) => true,
        None => false,
      };

      if running && let Some(requester) = &requester {
        if let Some(path) = find_cycle(&nodes, &key, requester) {
          let path: Vec<String> = path.iter().map(|k| self.inner.describe(k)).collect();
          debug!(cycle = %path.join(" -> "), "dependency cycle detected");
          return Err(EngineError::Cycle { path });
        }
      }

      let (run_id, rx) = if let Some(NodeState::Running(state)) = nodes.get_mut(&key) {
        self.inner.counters.joined_in_flight.fetch_add(1, Ordering::Relaxed);
        state.subscribers += 1;
        (state.run_id, state.tx.subscribe())
      } else {
        let run_id = self.inner.next_run.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        let task = tokio::spawn(run_node(self.clone(), key.clone(), run_id));
        nodes.insert(
          key.clone(),
          NodeState::Running(Running {
            run_id,
            tx,
            subscribers: 1,
            abort: Some(task.abort_handle()),
            waiting_on: HashMap::new(),
          }),
        );
        (run_id, rx)
      };

      if let Some(requester) = &requester
        && let Some(NodeState::Running(state)) = nodes.get_mut(requester)
      {
        *state.waiting_on.entry(key.clone()).or_insert(0) += 1;
      }

      Subscription {
        inner: self.inner.clone(),
        key,
        requester,
        run_id,
        rx,
      }
    };

    subscription.wait().await
  }

  async fn execute_node(&self, key: &NodeKey) -> NodeResult {
    let graph = &self.inner.graph;
    let Entry::Rule(entry) = graph.entry(key.entry) else {
      return Err(EngineError::TypeMismatch {
        expected: "a rule entry".to_string(),
        found: graph.describe(key.entry),
      });
    };
    let rule = graph.rule_at(entry.rule);

    self.inner.counters.rule_runs.fetch_add(1, Ordering::Relaxed);
    debug!(rule = %rule.name(), params = %key.params, "running rule");
    let started = Instant::now();

    let inputs = try_join_all(entry.inputs.iter().map(|(ty, input)| async move {
      self
        .resolve(*input, &key.params, Some(key))
        .await
        .map(|value| (*ty, value))
        .map_err(|e| child_failure(rule.name(), ty, e))
    }))
    .await?;

    let cx = RuleContext::new(self.clone(), key.clone(), rule.name().to_string());
    let result = (rule.body)(cx, Inputs::new(inputs)).await;

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &result {
      Ok(_) => debug!(rule = %rule.name(), elapsed_ms, "rule completed"),
      Err(e @ EngineError::ChildFailure { .. }) => {
        debug!(rule = %rule.name(), error = %e, elapsed_ms, "rule failed on a dependency")
      }
      Err(e) => error!(rule = %rule.name(), error = %e, elapsed_ms, "rule failed"),
    }
    result
  }

  fn complete(&self, key: &NodeKey, run_id: u64, result: NodeResult) {
    let mut nodes = self.inner.nodes();
    match nodes.get(key) {
      Some(NodeState::Running(state)) if state.run_id == run_id => {}
      _ => {
        debug!(node = %self.inner.describe(key), "discarding result of a superseded run");
        return;
      }
    }
    if let Some(NodeState::Running(state)) = nodes.insert(key.clone(), NodeState::Done(result.clone())) {
      state.tx.send_replace(Some(result));
    }
  }
}

async fn run_node(scheduler: Scheduler, key: NodeKey, run_id: u64) {
  let result = AssertUnwindSafe(scheduler.execute_node(&key))
    .catch_unwind()
    .await
    .unwrap_or_else(|panic| {
      Err(EngineError::Rule {
        rule: scheduler.inner.describe(&key),
        message: format!("panicked: {}", panic_message(panic.as_ref())),
      })
    });
  scheduler.complete(&key, run_id, result);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
  if let Some(s) = panic.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = panic.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic payload".to_string()
  }
}

pub(crate) fn child_failure(rule: &str, product: &TypeKey, source: EngineError) -> EngineError {
  EngineError::ChildFailure {
    rule: rule.to_string(),
    product: product.to_string(),
    source: Box::new(source),
  }
}

pub(crate) fn downcast<P: Any + Send + Sync>(product: AnyProduct) -> Result<Arc<P>, EngineError> {
  product.downcast::<P>().map_err(|_| EngineError::TypeMismatch {
    expected: TypeKey::of::<P>().to_string(),
    found: "a product of another type".to_string(),
  })
}

/// Path `requester -> target -> ... -> requester` through running nodes'
/// wait sets, if `target` transitively waits on `requester`.
fn find_cycle(nodes: &HashMap<NodeKey, NodeState>, target: &NodeKey, requester: &NodeKey) -> Option<Vec<NodeKey>> {
  if target == requester {
    return Some(vec![requester.clone(), target.clone()]);
  }

  let mut parents: HashMap<&NodeKey, &NodeKey> = HashMap::new();
  let mut visited: HashSet<&NodeKey> = HashSet::from([target]);
  let mut stack = vec![target];

  while let Some(current) = stack.pop() {
    let Some(NodeState::Running(state)) = nodes.get(current) else {
      continue;
    };
    for next in state.waiting_on.keys() {
      if !visited.insert(next) {
        continue;
      }
      parents.insert(next, current);
      if next == requester {
        let mut path = vec![next.clone()];
        let mut cursor = next;
        while let Some(parent) = parents.get(cursor) {
          path.push((*parent).clone());
          cursor = *parent;
        }
        path.push(requester.clone());
        path.reverse();
        return Some(path);
      }
      stack.push(next);
    }
  }
  None
}

/// A live interest in a node's result.
struct Subscription {
  inner: Arc<Inner>,
  key: NodeKey,
  requester: Option<NodeKey>,
  run_id: u64,
  rx: watch::Receiver<Option<NodeResult>>,
}

impl Subscription {
  async fn wait(&mut self) -> NodeResult {
    let delivered = match self.rx.wait_for(Option::is_some).await {
      Ok(value) => value.clone(),
      Err(_) => None,
    };
    delivered.unwrap_or_else(|| {
      Err(EngineError::Cancelled {
        product: self.inner.describe(&self.key),
      })
    })
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    let abort = {
      let mut nodes = self.inner.nodes();

      if let Some(requester) = &self.requester
        && let Some(NodeState::Running(state)) = nodes.get_mut(requester)
        && let Some(count) = state.waiting_on.get_mut(&self.key)
      {
        *count -= 1;
        if *count == 0 {
          state.waiting_on.remove(&self.key);
        }
      }

      let last = match nodes.get_mut(&self.key) {
        Some(NodeState::Running(state)) if state.run_id == self.run_id => {
          state.subscribers -= 1;
          (state.subscribers == 0).then(|| state.abort.take())
        }
        _ => None,
      };
      if last.is_some() {
        nodes.remove(&self.key);
        self.inner.counters.cancelled.fetch_add(1, Ordering::Relaxed);
      }
      last.flatten()
    };

    if let Some(abort) = abort {
      debug!(node = %self.inner.describe(&self.key), "cancelling node with no remaining subscribers");
      abort.abort();
    }
  }
}
