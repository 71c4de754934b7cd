use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn test_options_defaults() {
  let env = TestEnv::new();
  env
    .kiln_cmd()
    .args(["options", "--scope", "GLOBAL"])
    .assert()
    .success()
    .stdout(predicate::str::contains("[GLOBAL]"))
    .stdout(predicate::str::contains("level = info (default)"));
}

#[test]
fn test_options_precedence() {
  let env = TestEnv::new();
  env.write_file("kiln.toml", "[GLOBAL]\nlevel = \"debug\"\n\n[process]\ntimeout_secs = 30\n");

  env
    .kiln_cmd()
    .env("KILN_PROCESS_KEEP_SANDBOXES", "true")
    .args(["options", "--", "--level=error"])
    .assert()
    .success()
    .stdout(predicate::str::contains("level = error (flag)"))
    .stdout(predicate::str::contains("timeout-secs = 30 (config)"))
    .stdout(predicate::str::contains("keep-sandboxes = true (env)"));
}

#[test]
fn test_options_json() {
  let env = TestEnv::new();
  let output = env
    .kiln_cmd()
    .args(["-o", "json", "options", "--scope", "process"])
    .output()
    .unwrap();
  assert!(output.status.success());

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json[0]["scope"], "process");
  assert_eq!(json[0]["options"]["timeout-secs"]["rank"], "default");
}

#[test]
fn test_options_unknown_scope_fails() {
  let env = TestEnv::new();
  env
    .kiln_cmd()
    .args(["options", "--scope", "nope"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("nope"));
}

#[test]
fn test_options_unknown_flag_fails() {
  let env = TestEnv::new();
  env
    .kiln_cmd()
    .args(["options", "--", "--no-such-flag"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("--no-such-flag"));
}
