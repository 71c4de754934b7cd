//! Options resolved through the engine are memoized per bootstrapper.

use std::sync::Arc;

use kiln_lib::engine::Params;
use kiln_lib::options::{OptionRegistry, OptionSpec, OptionsBootstrapper, Rank, Scope, ScopedOptions};
use kiln_lib::rules::RuleGraph;

use crate::common::local_scheduler;

fn registry() -> Arc<OptionRegistry> {
  let registry = OptionRegistry::standard()
    .with(
      Scope::new("python-setup"),
      OptionSpec::list("platforms", Vec::<String>::new()).help("Target platforms"),
    )
    .unwrap();
  Arc::new(registry)
}

fn bootstrapper(args: &[&str]) -> OptionsBootstrapper {
  OptionsBootstrapper::builder(registry())
    .args(args.iter().copied())
    .env([("KILN_LEVEL", "warn"), ("HOME", "/home/someone")])
    .config_toml("[python-setup]\nplatforms = ['linux-x86_64']\n")
    .build()
    .unwrap()
}

#[tokio::test]
async fn equal_bootstrappers_share_parsed_options() {
  let scheduler = local_scheduler(RuleGraph::builder().with_intrinsics().build().unwrap());
  let args = ["--colors", "--python-setup-platforms=['macos-arm64']"];

  let scopes = [Scope::global(), Scope::new("python-setup")];
  let first: Vec<Arc<ScopedOptions>> = scheduler
    .request_all(
      scopes
        .iter()
        .map(|scope| Params::of(scope.clone()).with(bootstrapper(&args)))
        .collect(),
    )
    .await
    .unwrap();
  let second: Vec<Arc<ScopedOptions>> = scheduler
    .request_all(
      scopes
        .iter()
        .map(|scope| Params::of(scope.clone()).with(bootstrapper(&args)))
        .collect(),
    )
    .await
    .unwrap();

  for (a, b) in first.iter().zip(&second) {
    assert!(Arc::ptr_eq(a, b), "options for {} were parsed twice", a.scope);
  }
  assert_eq!(scheduler.stats().rule_runs, 2);

  let global = &first[0];
  assert_eq!(global.str("level"), Some("warn"));
  assert_eq!(global.rank("level"), Some(Rank::Env));
  assert_eq!(global.bool("colors"), Some(true));

  let python = &first[1];
  assert_eq!(python.list("platforms"), Some(&["macos-arm64".to_string()][..]));
  assert_eq!(python.rank("platforms"), Some(Rank::Flag));
}

#[tokio::test]
async fn different_args_parse_separately() {
  let scheduler = local_scheduler(RuleGraph::builder().with_intrinsics().build().unwrap());

  let plain = scheduler
    .request::<ScopedOptions>(Params::of(Scope::new("python-setup")).with(bootstrapper(&[])))
    .await
    .unwrap();
  let flagged = scheduler
    .request::<ScopedOptions>(
      Params::of(Scope::new("python-setup")).with(bootstrapper(&["--python-setup-platforms=linux-arm64"])),
    )
    .await
    .unwrap();

  assert_eq!(plain.list("platforms"), Some(&["linux-x86_64".to_string()][..]));
  assert_eq!(plain.rank("platforms"), Some(Rank::Config));
  assert_eq!(flagged.list("platforms"), Some(&["linux-arm64".to_string()][..]));
  assert_eq!(scheduler.stats().rule_runs, 2);
}
