//! Shared test helpers for CLI integration tests.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Isolated test environment.
///
/// Each test gets its own temporary directory holding the store and any
/// input trees.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) -> PathBuf {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
  }

  pub fn path(&self, relative_path: &str) -> PathBuf {
    self.temp.path().join(relative_path)
  }

  pub fn store_path(&self) -> PathBuf {
    self.temp.path().join("store")
  }

  /// Get a pre-configured Command for the kiln binary.
  ///
  /// Points `KILN_STORE` at the isolated store, and runs from the temp
  /// directory with an empty config home so no stray `kiln.toml` is read.
  pub fn kiln_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("kiln");
    cmd.env("KILN_STORE", self.store_path());
    cmd.env("XDG_CONFIG_HOME", self.temp.path().join("config"));
    cmd.env("APPDATA", self.temp.path().join("config"));
    cmd.env_remove("KILN_LOG");
    cmd.current_dir(self.temp.path());
    cmd
  }

  /// Capture `dir` and return the digest printed by `kiln store`.
  pub fn store_dir(&self, dir: &Path) -> String {
    let output = self
      .kiln_cmd()
      .args(["--output", "json", "store"])
      .arg(dir)
      .output()
      .unwrap();
    assert!(
      output.status.success(),
      "store failed: {}",
      String::from_utf8_lossy(&output.stderr)
    );
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    json["digest"].as_str().unwrap().to_string()
  }
}
