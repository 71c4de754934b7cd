#![cfg(unix)]

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn test_run_captures_outputs() {
  let env = TestEnv::new();
  env.write_file("input/greeting.txt", "hello");
  let input = env.store_dir(&env.path("input"));

  let output = env
    .kiln_cmd()
    .args(["-o", "json", "run", "--input", &input, "--output-file", "out.txt", "--"])
    .args(["/bin/sh", "-c", "/bin/cat greeting.txt > out.txt; echo done"])
    .output()
    .unwrap();
  assert!(
    output.status.success(),
    "run failed: {}",
    String::from_utf8_lossy(&output.stderr)
  );

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["exit_code"], 0);
  assert_eq!(json["stdout"], "done\n");
  let digest = json["output_digest"].as_str().unwrap().to_string();

  env
    .kiln_cmd()
    .args(["cat", &digest, "out.txt"])
    .assert()
    .success()
    .stdout("hello");
}

#[test]
fn test_run_propagates_exit_code() {
  let env = TestEnv::new();
  env
    .kiln_cmd()
    .args(["run", "--", "/bin/sh", "-c", "exit 3"])
    .assert()
    .code(3)
    .stdout(predicate::str::contains("exited with code 3"));
}

#[test]
fn test_run_environment_is_explicit() {
  let env = TestEnv::new();
  env
    .kiln_cmd()
    .env("KILN_TEST_LEAK", "leaked")
    .args(["run", "--env", "ONLY=this", "--", "/usr/bin/env"])
    .assert()
    .success()
    .stdout(predicate::str::contains("ONLY=this"))
    .stdout(predicate::str::contains("KILN_TEST_LEAK").not());
}

#[test]
fn test_run_timeout() {
  let env = TestEnv::new();
  env
    .kiln_cmd()
    .args(["run", "--timeout", "200ms", "--", "/bin/sleep", "5"])
    .assert()
    .failure()
    .stdout(predicate::str::contains("timed out"));
}

#[test]
fn test_run_cache_reuses_results() {
  let env = TestEnv::new();
  let run = |env: &TestEnv| {
    let output = env
      .kiln_cmd()
      .args(["-o", "json", "run", "--cache", "--", "/bin/echo", "cached"])
      .output()
      .unwrap();
    assert!(output.status.success());
    serde_json::from_slice::<serde_json::Value>(&output.stdout).unwrap()
  };

  assert_eq!(run(&env)["cached"], false);
  let second = run(&env);
  assert_eq!(second["cached"], true);
  assert_eq!(second["stdout"], "cached\n");
}
