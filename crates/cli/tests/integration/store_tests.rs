use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn test_store_then_ls_and_cat() {
  let env = TestEnv::new();
  env.write_file("input/src/main.rs", "fn main() {}\n");
  env.write_file("input/README", "hello\n");

  let digest = env.store_dir(&env.path("input"));

  env
    .kiln_cmd()
    .args(["ls", &digest])
    .assert()
    .success()
    .stdout(predicate::str::contains("src/"))
    .stdout(predicate::str::contains("src/main.rs"))
    .stdout(predicate::str::contains("README"));

  env
    .kiln_cmd()
    .args(["cat", &digest, "src/main.rs"])
    .assert()
    .success()
    .stdout("fn main() {}\n");
}

#[test]
fn test_store_is_deterministic() {
  let env = TestEnv::new();
  env.write_file("a/x.txt", "same");
  env.write_file("b/x.txt", "same");

  assert_eq!(env.store_dir(&env.path("a")), env.store_dir(&env.path("b")));
}

#[test]
fn test_store_text_output() {
  let env = TestEnv::new();
  env.write_file("input/file", "content");

  env
    .kiln_cmd()
    .args(["store"])
    .arg(env.path("input"))
    .assert()
    .success()
    .stdout(predicate::str::contains("Digest"))
    .stdout(predicate::str::contains("Files: 1"));
}

#[test]
fn test_ls_json() {
  let env = TestEnv::new();
  env.write_file("input/dir/file", "x");
  let digest = env.store_dir(&env.path("input"));

  let output = env.kiln_cmd().args(["-o", "json", "ls", &digest]).output().unwrap();
  assert!(output.status.success());
  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["files"], serde_json::json!(["dir/file"]));
  assert_eq!(json["dirs"], serde_json::json!(["dir"]));
}

#[test]
fn test_cat_missing_file_fails() {
  let env = TestEnv::new();
  env.write_file("input/present", "x");
  let digest = env.store_dir(&env.path("input"));

  env
    .kiln_cmd()
    .args(["cat", &digest, "absent"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("No file absent"));
}

#[test]
fn test_ls_unknown_digest_fails() {
  let env = TestEnv::new();
  let digest = format!("{}/12", "ab".repeat(32));

  env
    .kiln_cmd()
    .args(["ls", &digest])
    .assert()
    .failure()
    .stderr(predicate::str::contains("not found"));
}
