//! The on-disk store outlives the process that filled it.

use std::collections::BTreeSet;

use kiln_lib::store::{EMPTY_DIGEST, FileContent, Store, StoreError};
use tempfile::TempDir;

#[test]
fn trees_persist_across_store_instances() {
  let temp = TempDir::new().unwrap();
  let files = [
    FileContent::new("src/main.rs", "fn main() {}"),
    FileContent::new("bin/tool", "#!/bin/sh\n").executable(),
  ];

  let digest = Store::open(temp.path()).unwrap().create_digest(&files).unwrap();

  let reopened = Store::open(temp.path()).unwrap();
  assert!(reopened.contains_tree(digest).unwrap());
  let mut loaded = reopened.load(digest).unwrap();
  loaded.sort_by(|a, b| a.path.cmp(&b.path));
  assert_eq!(loaded, vec![files[1].clone(), files[0].clone()]);
}

#[test]
fn identical_content_has_one_digest() {
  let a = Store::in_memory();
  let b = Store::in_memory();
  let files = [FileContent::new("x/y.txt", "same")];
  assert_eq!(a.create_digest(&files).unwrap(), b.create_digest(&files).unwrap());
  assert_eq!(a.create_digest(&[]).unwrap(), *EMPTY_DIGEST);
}

#[test]
fn subset_and_prefix_compose() {
  let store = Store::in_memory();
  let digest = store
    .create_digest(&[
      FileContent::new("keep/a.txt", "a"),
      FileContent::new("drop/b.txt", "b"),
    ])
    .unwrap();

  let kept = store
    .subset(digest, &BTreeSet::new(), &BTreeSet::from(["keep".to_string()]))
    .unwrap();
  let moved = store.add_prefix(kept, "out").unwrap();

  let snapshot = store.snapshot(moved).unwrap();
  assert_eq!(snapshot.files, vec!["out/keep/a.txt".to_string()]);
}

#[test]
fn unknown_digest_is_reported_missing() {
  let store = Store::in_memory();
  let other = Store::in_memory();
  let digest = other.create_digest(&[FileContent::new("only-here", "x")]).unwrap();

  assert!(!store.contains_tree(digest).unwrap());
  assert!(matches!(store.load(digest), Err(StoreError::NotFound(_))));
}
