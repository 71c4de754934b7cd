//! Memoization, deduplication, cycles, failures and cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use kiln_lib::EngineConfig;
use kiln_lib::engine::{EngineError, Params, RuleContext, Scheduler};
use kiln_lib::process::ProcessRequest;
use kiln_lib::rules::{GraphError, Inputs, Query, Rule, RuleGraph};
use kiln_lib::store::{CreateDigest, Digest, DigestContents, FileContent, Store};

use crate::common::{FakePacker, eventually, local_scheduler};

// Packaging: the canonical two-param product.

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SourceFiles(Digest);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BuildOptions {
  compress: bool,
}

#[derive(Debug)]
struct Artifact {
  digest: Digest,
  log: String,
}

async fn package(cx: RuleContext, inputs: Inputs) -> Result<Artifact, EngineError> {
  let sources = inputs.get::<SourceFiles>()?;
  let options = inputs.get::<BuildOptions>()?;
  let mut request = ProcessRequest::new(["pack", "--out=artifact.zip"], "pack sources")
    .input_digest(sources.0)
    .output_file("artifact.zip");
  if options.compress {
    request = request.env("PACK_COMPRESS", "1");
  }
  let result = cx.execute_process_checked(request).await?;
  Ok(Artifact {
    digest: result.output_digest,
    log: result.stdout_str().into_owned(),
  })
}

fn packaging_graph() -> RuleGraph {
  RuleGraph::builder()
    .rule(
      Rule::builder("package")
        .input::<SourceFiles>()
        .input::<BuildOptions>()
        .returns(package),
    )
    .query(Query::new::<Artifact>().param::<SourceFiles>().param::<BuildOptions>())
    .build()
    .unwrap()
}

fn packer_scheduler() -> (Scheduler, Arc<FakePacker>) {
  let store = Store::in_memory();
  let packer = FakePacker::new(store.clone());
  let scheduler = Scheduler::new(packaging_graph(), store, packer.clone(), EngineConfig::default());
  (scheduler, packer)
}

fn sources(store: &Store) -> SourceFiles {
  let digest = store
    .create_digest(&[FileContent::new("a.txt", "alpha\n"), FileContent::new("b.txt", "beta\n")])
    .unwrap();
  SourceFiles(digest)
}

#[tokio::test]
async fn artifact_request_runs_the_packer_once() {
  let (scheduler, packer) = packer_scheduler();
  let params = Params::of(sources(scheduler.store())).with(BuildOptions { compress: false });

  let first = scheduler.request::<Artifact>(params.clone()).await.unwrap();
  let second = scheduler.request::<Artifact>(params).await.unwrap();

  assert!(Arc::ptr_eq(&first, &second));
  assert_eq!(packer.runs(), 1);
  assert_eq!(scheduler.stats().processes_executed, 1);
  assert_eq!(first.log, "packed 2 files\n");

  let requests = packer.requests.lock().unwrap();
  assert_eq!(requests[0].argv, vec!["pack", "--out=artifact.zip"]);

  let artifact = scheduler.store().load_file(first.digest, "artifact.zip").unwrap();
  assert_eq!(&*artifact, b"alpha\nbeta\n");
}

#[tokio::test]
async fn different_params_are_different_nodes() {
  let (scheduler, packer) = packer_scheduler();
  let src = sources(scheduler.store());

  scheduler
    .request::<Artifact>(Params::of(src.clone()).with(BuildOptions { compress: false }))
    .await
    .unwrap();
  scheduler
    .request::<Artifact>(Params::of(src).with(BuildOptions { compress: true }))
    .await
    .unwrap();

  assert_eq!(packer.runs(), 2);
  assert_eq!(scheduler.stats().rule_runs, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_share_one_execution() {
  let (scheduler, packer) = packer_scheduler();
  let params = Params::of(sources(scheduler.store())).with(BuildOptions { compress: true });

  let requests = (0..8).map(|_| {
    let scheduler = scheduler.clone();
    let params = params.clone();
    tokio::spawn(async move { scheduler.request::<Artifact>(params).await })
  });
  let results: Vec<Arc<Artifact>> = futures::future::join_all(requests)
    .await
    .into_iter()
    .map(|joined| joined.unwrap().unwrap())
    .collect();

  assert_eq!(packer.runs(), 1);
  assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
  let stats = scheduler.stats();
  assert_eq!(stats.rule_runs, 1);
  assert_eq!(stats.joined_in_flight + stats.memo_hits, 7);
}

#[cfg(unix)]
mod sandboxed {
  use super::*;

  const PACK_SCRIPT: &str = "out=\"${1#--out=}\"\ncat src/*.txt > \"$out\"\necho packed\n";

  async fn package_with_shell(cx: RuleContext, inputs: Inputs) -> Result<Artifact, EngineError> {
    let sources = inputs.get::<SourceFiles>()?;
    let tool = cx
      .get::<Digest, CreateDigest>(CreateDigest(vec![FileContent::new("pack", PACK_SCRIPT)]))
      .await?;
    let input = cx
      .with_store({
        let sources = sources.0;
        let tool = *tool;
        move |store| {
          let prefixed = store.add_prefix(sources, "src")?;
          store.merge(&[prefixed, tool])
        }
      })
      .await?;

    let request = ProcessRequest::new(["/bin/sh", "pack", "--out=artifact.zip"], "pack sources")
      .env("PATH", "/usr/bin:/bin")
      .input_digest(input)
      .output_file("artifact.zip");
    let result = cx.execute_process_checked(request).await?;
    let contents = cx.get::<DigestContents, Digest>(result.output_digest).await?;
    let packed = contents
      .get("artifact.zip")
      .ok_or_else(|| cx.error("packer produced no artifact"))?;
    Ok(Artifact {
      digest: result.output_digest,
      log: String::from_utf8_lossy(&packed.content).into_owned(),
    })
  }

  #[tokio::test]
  async fn artifact_is_built_in_a_real_sandbox() {
    let graph = RuleGraph::builder()
      .with_intrinsics()
      .rule(
        Rule::builder("package")
          .input::<SourceFiles>()
          .input::<BuildOptions>()
          .get::<Digest, CreateDigest>()
          .get::<DigestContents, Digest>()
          .returns(package_with_shell),
      )
      .query(Query::new::<Artifact>().param::<SourceFiles>().param::<BuildOptions>())
      .build()
      .unwrap();
    let scheduler = local_scheduler(graph);
    let params = Params::of(sources(scheduler.store())).with(BuildOptions { compress: false });

    let first = scheduler.request::<Artifact>(params.clone()).await.unwrap();
    let second = scheduler.request::<Artifact>(params).await.unwrap();

    assert_eq!(first.log, "alpha\nbeta\n");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(scheduler.stats().processes_executed, 1);
    assert_eq!(
      scheduler.store().snapshot(first.digest).unwrap().files,
      vec!["artifact.zip".to_string()]
    );
  }
}

// Recursion through nested requests.

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct N(u64);

#[derive(Debug)]
struct Fib(u64);

async fn fib(cx: RuleContext, inputs: Inputs) -> Result<Fib, EngineError> {
  let n = inputs.get::<N>()?.0;
  if n < 2 {
    return Ok(Fib(n));
  }
  let parts = cx.get_all::<Fib, N>([N(n - 1), N(n - 2)]).await?;
  Ok(Fib(parts[0].0 + parts[1].0))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn recursive_rules_share_subcomputations() {
  let graph = RuleGraph::builder()
    .rule(Rule::builder("fib").input::<N>().get::<Fib, N>().returns(fib))
    .query(Query::new::<Fib>().param::<N>())
    .build()
    .unwrap();
  let scheduler = local_scheduler(graph);

  let result = scheduler.request::<Fib>(Params::of(N(30))).await.unwrap();
  assert_eq!(result.0, 832_040);
  // One run per distinct n in 0..=30.
  assert_eq!(scheduler.stats().rule_runs, 31);
}

// Cycles.

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key(u32);

#[derive(Debug)]
struct Left;

#[derive(Debug)]
struct Right;

async fn left(cx: RuleContext, inputs: Inputs) -> Result<Left, EngineError> {
  let key = inputs.get::<Key>()?;
  cx.get::<Right, Key>(Key(key.0)).await?;
  Ok(Left)
}

async fn right(cx: RuleContext, inputs: Inputs) -> Result<Right, EngineError> {
  let key = inputs.get::<Key>()?;
  cx.get::<Left, Key>(Key(key.0)).await?;
  Ok(Right)
}

#[tokio::test]
async fn mutual_recursion_on_the_same_key_is_a_cycle() {
  let graph = RuleGraph::builder()
    .rule(Rule::builder("left").input::<Key>().get::<Right, Key>().returns(left))
    .rule(Rule::builder("right").input::<Key>().get::<Left, Key>().returns(right))
    .query(Query::new::<Left>().param::<Key>())
    .build()
    .unwrap();
  let scheduler = local_scheduler(graph);

  let err = tokio::time::timeout(Duration::from_secs(5), scheduler.request::<Left>(Params::of(Key(1))))
    .await
    .expect("cycle must not deadlock")
    .unwrap_err();

  assert!(err.is_cycle(), "unexpected error: {err}");
  let EngineError::Cycle { path } = err.root_cause() else {
    panic!("root cause is not a cycle: {err}");
  };
  assert_eq!(path.len(), 3);
  assert_eq!(path.first(), path.last());

  // The failure is memoized like any other result.
  let again = scheduler.request::<Left>(Params::of(Key(1))).await.unwrap_err();
  assert!(again.is_cycle());
}

// Failures.

#[derive(Debug)]
struct Inner;

#[derive(Debug)]
struct Outer;

async fn failing_inner(cx: RuleContext, _inputs: Inputs) -> Result<Inner, EngineError> {
  Err(cx.error("inner exploded"))
}

async fn outer(cx: RuleContext, inputs: Inputs) -> Result<Outer, EngineError> {
  let key = inputs.get::<Key>()?;
  cx.get::<Inner, Key>(Key(key.0)).await?;
  Ok(Outer)
}

#[tokio::test]
async fn failures_carry_their_causal_chain() {
  let graph = RuleGraph::builder()
    .rule(Rule::builder("inner").input::<Key>().returns(failing_inner))
    .rule(Rule::builder("outer").input::<Key>().get::<Inner, Key>().returns(outer))
    .query(Query::new::<Outer>().param::<Key>())
    .build()
    .unwrap();
  let scheduler = local_scheduler(graph);

  let err = scheduler.request::<Outer>(Params::of(Key(7))).await.unwrap_err();
  assert!(matches!(err, EngineError::ChildFailure { .. }));
  assert!(matches!(err.root_cause(), EngineError::Rule { message, .. } if message == "inner exploded"));
  assert_eq!(err.causal_chain().len(), 2);
  assert!(err.render_chain().contains("inner exploded"));

  scheduler.request::<Outer>(Params::of(Key(7))).await.unwrap_err();
  assert_eq!(scheduler.stats().rule_runs, 2);
}

// Batches.

#[derive(Debug)]
struct Square(u64);

#[derive(Debug)]
struct Squares(Vec<u64>);

#[derive(Debug)]
struct Settled(Vec<Result<u64, String>>);

async fn square(cx: RuleContext, inputs: Inputs) -> Result<Square, EngineError> {
  let n = inputs.get::<N>()?.0;
  if n == 13 {
    return Err(cx.error("unlucky"));
  }
  // Larger inputs finish first.
  tokio::time::sleep(Duration::from_millis(40u64.saturating_sub(n * 10))).await;
  Ok(Square(n * n))
}

async fn squares(cx: RuleContext, _inputs: Inputs) -> Result<Squares, EngineError> {
  let results = cx.get_all::<Square, N>([N(1), N(3), N(2)]).await?;
  Ok(Squares(results.iter().map(|s| s.0).collect()))
}

async fn settled(cx: RuleContext, _inputs: Inputs) -> Result<Settled, EngineError> {
  let results = cx.get_all_settled::<Square, N>([N(2), N(13), N(3)]).await;
  Ok(Settled(
    results
      .into_iter()
      .map(|r| r.map(|s| s.0).map_err(|e| e.root_cause().to_string()))
      .collect(),
  ))
}

fn batch_graph() -> RuleGraph {
  RuleGraph::builder()
    .rule(Rule::builder("square").input::<N>().returns(square))
    .rule(Rule::builder("squares").input::<Key>().get::<Square, N>().returns(squares))
    .rule(Rule::builder("settled").input::<Key>().get::<Square, N>().returns(settled))
    .query(Query::new::<Squares>().param::<Key>())
    .query(Query::new::<Settled>().param::<Key>())
    .build()
    .unwrap()
}

#[tokio::test]
async fn get_all_keeps_request_order() {
  let scheduler = local_scheduler(batch_graph());
  let result = scheduler.request::<Squares>(Params::of(Key(0))).await.unwrap();
  assert_eq!(result.0, vec![1, 9, 4]);
}

#[tokio::test]
async fn get_all_settled_keeps_failures_in_place() {
  let scheduler = local_scheduler(batch_graph());
  let result = scheduler.request::<Settled>(Params::of(Key(0))).await.unwrap();
  assert_eq!(result.0[0], Ok(4));
  assert!(matches!(&result.0[1], Err(message) if message.contains("unlucky")));
  assert_eq!(result.0[2], Ok(9));
}

// Cancellation.

#[derive(Debug)]
struct Slow;

struct SetOnDrop(Arc<AtomicBool>);

impl Drop for SetOnDrop {
  fn drop(&mut self) {
    self.0.store(true, Ordering::SeqCst);
  }
}

fn slow_graph(started: Arc<AtomicUsize>, dropped: Arc<AtomicBool>) -> RuleGraph {
  let body = move |_cx: RuleContext, _inputs: Inputs| {
    let started = started.clone();
    let guard = SetOnDrop(dropped.clone());
    async move {
      started.fetch_add(1, Ordering::SeqCst);
      tokio::time::sleep(Duration::from_secs(30)).await;
      drop(guard);
      Ok::<_, EngineError>(Slow)
    }
  };
  RuleGraph::builder()
    .rule(Rule::builder("slow").input::<Key>().returns(body))
    .query(Query::new::<Slow>().param::<Key>())
    .build()
    .unwrap()
}

#[tokio::test]
async fn dropping_the_only_requester_cancels_the_work() {
  let started = Arc::new(AtomicUsize::new(0));
  let dropped = Arc::new(AtomicBool::new(false));
  let scheduler = local_scheduler(slow_graph(started.clone(), dropped.clone()));

  let outcome = tokio::time::timeout(
    Duration::from_millis(100),
    scheduler.request::<Slow>(Params::of(Key(1))),
  )
  .await;
  assert!(outcome.is_err());

  assert!(eventually(Duration::from_secs(2), || dropped.load(Ordering::SeqCst)).await);
  assert_eq!(started.load(Ordering::SeqCst), 1);
  let stats = scheduler.stats();
  assert_eq!(stats.cancelled, 1);
  assert_eq!(stats.nodes, 0);
}

#[tokio::test]
async fn work_survives_while_another_requester_remains() {
  let started = Arc::new(AtomicUsize::new(0));
  let dropped = Arc::new(AtomicBool::new(false));
  let scheduler = local_scheduler(slow_graph(started.clone(), dropped.clone()));

  let keeper = {
    let scheduler = scheduler.clone();
    tokio::spawn(async move { scheduler.request::<Slow>(Params::of(Key(2))).await })
  };
  assert!(eventually(Duration::from_secs(2), || started.load(Ordering::SeqCst) == 1).await);

  let impatient = tokio::time::timeout(
    Duration::from_millis(50),
    scheduler.request::<Slow>(Params::of(Key(2))),
  )
  .await;
  assert!(impatient.is_err());

  tokio::time::sleep(Duration::from_millis(50)).await;
  assert!(!dropped.load(Ordering::SeqCst));
  assert_eq!(scheduler.stats().cancelled, 0);

  keeper.abort();
  assert!(eventually(Duration::from_secs(2), || dropped.load(Ordering::SeqCst)).await);
  assert_eq!(scheduler.stats().cancelled, 1);
}

#[derive(Debug)]
struct NestedOuter;

async fn nested_outer(_cx: RuleContext, inputs: Inputs) -> Result<NestedOuter, EngineError> {
  inputs.get::<Slow>()?;
  Ok(NestedOuter)
}

fn nested_slow_graph(started: Arc<AtomicUsize>, dropped: Arc<AtomicBool>) -> RuleGraph {
  let body = move |_cx: RuleContext, _inputs: Inputs| {
    let started = started.clone();
    let guard = SetOnDrop(dropped.clone());
    async move {
      started.fetch_add(1, Ordering::SeqCst);
      tokio::time::sleep(Duration::from_secs(30)).await;
      drop(guard);
      Ok::<_, EngineError>(Slow)
    }
  };
  RuleGraph::builder()
    .rule(Rule::builder("slow").input::<Key>().returns(body))
    .rule(Rule::builder("outer").input::<Slow>().returns(nested_outer))
    .query(Query::new::<NestedOuter>().param::<Key>())
    .query(Query::new::<Slow>().param::<Key>())
    .build()
    .unwrap()
}

#[tokio::test]
async fn cancellation_reaches_unshared_inputs() {
  let started = Arc::new(AtomicUsize::new(0));
  let dropped = Arc::new(AtomicBool::new(false));
  let scheduler = local_scheduler(nested_slow_graph(started.clone(), dropped.clone()));

  let outcome = tokio::time::timeout(
    Duration::from_millis(100),
    scheduler.request::<NestedOuter>(Params::of(Key(3))),
  )
  .await;
  assert!(outcome.is_err());

  assert!(eventually(Duration::from_secs(2), || dropped.load(Ordering::SeqCst)).await);
  assert_eq!(started.load(Ordering::SeqCst), 1);
  assert!(eventually(Duration::from_secs(2), || scheduler.stats().nodes == 0).await);
  assert_eq!(scheduler.stats().cancelled, 2);
}

#[tokio::test]
async fn shared_inputs_outlive_a_cancelled_dependent() {
  let started = Arc::new(AtomicUsize::new(0));
  let dropped = Arc::new(AtomicBool::new(false));
  let scheduler = local_scheduler(nested_slow_graph(started.clone(), dropped.clone()));

  let keeper = {
    let scheduler = scheduler.clone();
    tokio::spawn(async move { scheduler.request::<Slow>(Params::of(Key(4))).await })
  };
  assert!(eventually(Duration::from_secs(2), || started.load(Ordering::SeqCst) == 1).await);

  let outcome = tokio::time::timeout(
    Duration::from_millis(100),
    scheduler.request::<NestedOuter>(Params::of(Key(4))),
  )
  .await;
  assert!(outcome.is_err());

  assert!(eventually(Duration::from_secs(2), || scheduler.stats().cancelled == 1).await);
  tokio::time::sleep(Duration::from_millis(50)).await;
  assert!(!dropped.load(Ordering::SeqCst));
  assert_eq!(scheduler.stats().nodes, 1);
  assert_eq!(started.load(Ordering::SeqCst), 1);

  keeper.abort();
  assert!(eventually(Duration::from_secs(2), || dropped.load(Ordering::SeqCst)).await);
  assert_eq!(scheduler.stats().cancelled, 2);
}

// Graph construction.

#[derive(Debug)]
struct Orphan;

async fn orphan_from_key(_cx: RuleContext, _inputs: Inputs) -> Result<Orphan, EngineError> {
  Ok(Orphan)
}

async fn orphan_from_n(_cx: RuleContext, _inputs: Inputs) -> Result<Orphan, EngineError> {
  Ok(Orphan)
}

#[test]
fn two_satisfiable_rules_are_ambiguous() {
  let err = RuleGraph::builder()
    .rule(Rule::builder("from_key").input::<Key>().returns(orphan_from_key))
    .rule(Rule::builder("from_n").input::<N>().returns(orphan_from_n))
    .query(Query::new::<Orphan>().param::<Key>().param::<N>())
    .build()
    .unwrap_err();
  assert!(matches!(err, GraphError::Ambiguous { .. }), "{err}");
}

#[test]
fn unsatisfiable_query_names_the_product() {
  let err = RuleGraph::builder()
    .rule(Rule::builder("from_key").input::<Key>().returns(orphan_from_key))
    .query(Query::new::<Orphan>().param::<N>())
    .build()
    .unwrap_err();
  let GraphError::NoApplicableRule { product, .. } = &err else {
    panic!("unexpected error: {err}");
  };
  assert!(product.contains("Orphan"));
}
