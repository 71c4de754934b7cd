//! Process execution through rules, with and without the result cache.

use std::sync::Arc;

use kiln_lib::EngineConfig;
use kiln_lib::engine::{EngineError, Params, RuleContext, Scheduler};
use kiln_lib::process::{CachingExecutor, ExecutionError, LocalExecutor, ProcessExecutor, ProcessRequest, ResultSource};
use kiln_lib::rules::{Inputs, Query, Rule, RuleGraph};
use kiln_lib::store::Store;
use tempfile::TempDir;

use crate::common::local_scheduler;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Command(Vec<&'static str>);

#[derive(Debug)]
struct Outcome {
  exit_code: i32,
  stdout: String,
}

async fn run(cx: RuleContext, inputs: Inputs) -> Result<Outcome, EngineError> {
  let command = inputs.get::<Command>()?;
  let request = ProcessRequest::new(command.0.iter().copied(), command.0.join(" "));
  let result = cx.execute_process(request).await?;
  Ok(Outcome {
    exit_code: result.exit_code,
    stdout: result.stdout_str().into_owned(),
  })
}

fn run_graph() -> RuleGraph {
  RuleGraph::builder()
    .rule(Rule::builder("run").input::<Command>().returns(run))
    .query(Query::new::<Outcome>().param::<Command>())
    .build()
    .unwrap()
}

#[cfg(unix)]
#[tokio::test]
async fn nonzero_exit_is_a_result() {
  let scheduler = local_scheduler(run_graph());
  let outcome = scheduler
    .request::<Outcome>(Params::of(Command(vec!["/bin/false"])))
    .await
    .unwrap();
  assert_ne!(outcome.exit_code, 0);
}

#[tokio::test]
async fn missing_executable_is_an_execution_error() {
  let scheduler = local_scheduler(run_graph());
  let err = scheduler
    .request::<Outcome>(Params::of(Command(vec!["/nonexistent/kiln-test-binary"])))
    .await
    .unwrap_err();
  assert!(
    matches!(err, EngineError::Execution(ExecutionError::Spawn { .. })),
    "unexpected error: {err}"
  );
}

#[cfg(unix)]
#[tokio::test]
async fn cached_results_survive_a_new_scheduler() {
  let temp = TempDir::new().unwrap();
  let config = EngineConfig::default().with_store_dir(temp.path().join("store"));

  let make = || {
    let store = Store::open(&config.store_dir).unwrap();
    let executor = Arc::new(CachingExecutor::new(
      LocalExecutor::new(store.clone(), &config),
      store.clone(),
    ));
    Scheduler::new(run_graph(), store, executor, config.clone())
  };
  let command = Command(vec!["/bin/echo", "from the cache"]);

  let first = make();
  let outcome = first.request::<Outcome>(Params::of(command.clone())).await.unwrap();
  assert_eq!(outcome.stdout, "from the cache\n");
  assert_eq!(first.stats().processes_executed, 1);

  let second = make();
  let outcome = second.request::<Outcome>(Params::of(command)).await.unwrap();
  assert_eq!(outcome.stdout, "from the cache\n");
  assert_eq!(second.stats().processes_executed, 0);
}

#[cfg(unix)]
#[tokio::test]
async fn executor_for_honours_the_cache_switch() {
  let temp = TempDir::new().unwrap();
  let mut config = EngineConfig::default().with_store_dir(temp.path());
  config.process_cache = true;
  let store = Store::open(&config.store_dir).unwrap();
  let executor = kiln_lib::process::executor_for(&store, &config);

  let request = ProcessRequest::new(["/bin/echo", "hi"], "echo");
  let first = executor.execute(request.clone()).await.unwrap();
  let second = executor.execute(request.clone()).await.unwrap();
  assert_eq!(first.source, ResultSource::Ran);
  assert_eq!(second.source, ResultSource::Cached);

  config.process_cache = false;
  let uncached = kiln_lib::process::executor_for(&store, &config);
  assert_eq!(uncached.execute(request).await.unwrap().source, ResultSource::Ran);
}
