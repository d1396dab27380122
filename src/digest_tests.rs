// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::BTreeSet;

use hashing::{Fingerprint, EMPTY_FINGERPRINT};
use tempfile::TempDir;

use crate::digest::{digest_of_list, string_digest, DigestCache};
use crate::testutil::write_file;

fn path_set(paths: &[&std::path::PathBuf]) -> BTreeSet<String> {
    paths
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect()
}

#[test]
fn file_digest_of_missing_file() {
    let dir = TempDir::new().unwrap();
    let digests = DigestCache::new();
    assert_eq!(
        digests.file_digest(&dir.path().join("nope").to_string_lossy()),
        None
    );
    // Missing files never enter the memo.
    assert_eq!(digests.len(), 0);
}

#[test]
fn file_digest_is_content_addressed() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("f.txt");
    write_file(&file, "roland");

    let digests = DigestCache::new();
    let digest = digests.file_digest(&file.to_string_lossy()).unwrap();
    assert_eq!(digest, Fingerprint::of_bytes(b"roland"));

    // A second read is served from the memo.
    assert_eq!(digests.file_digest(&file.to_string_lossy()), Some(digest));
    assert_eq!(digests.len(), 1);
}

#[test]
fn file_digest_memo_invalidates_on_change() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("f.txt");
    write_file(&file, "before");

    let digests = DigestCache::new();
    let before = digests.file_digest(&file.to_string_lossy()).unwrap();

    write_file(&file, "after, and longer");
    let after = digests.file_digest(&file.to_string_lossy()).unwrap();
    assert_ne!(before, after);
    assert_eq!(after, Fingerprint::of_bytes(b"after, and longer"));
}

#[test]
fn dependency_digest_is_order_independent() {
    let dir = TempDir::new().unwrap();
    let one = dir.path().join("one");
    let two = dir.path().join("two");
    write_file(&one, "one");
    write_file(&two, "two");

    let digests = DigestCache::new();
    let (forward, missing) = digests.dependency_digest(&path_set(&[&one, &two]));
    assert!(!missing);
    // BTreeSet iteration is ordered, so exercise the sort by inserting in the other order too.
    let (backward, _) = digests.dependency_digest(&path_set(&[&two, &one]));
    assert_eq!(forward, backward);
}

#[test]
fn dependency_digest_flags_missing_files() {
    let dir = TempDir::new().unwrap();
    let present = dir.path().join("present");
    write_file(&present, "here");
    let absent = dir.path().join("absent");

    let digests = DigestCache::new();
    let (with_missing, missing) = digests.dependency_digest(&path_set(&[&present, &absent]));
    assert!(missing);

    // The digest covers only the files that exist.
    let (present_only, _) = digests.dependency_digest(&path_set(&[&present]));
    assert_eq!(with_missing, present_only);
}

#[test]
fn dependency_digest_of_empty_set() {
    let digests = DigestCache::new();
    let (digest, missing) = digests.dependency_digest(&BTreeSet::new());
    assert!(!missing);
    assert_eq!(digest, EMPTY_FINGERPRINT);
}

#[test]
fn dependency_digest_depends_only_on_content() {
    let dir = TempDir::new().unwrap();
    let original = dir.path().join("original");
    write_file(&original, "stable content");

    let digests = DigestCache::new();
    let (before, _) = digests.dependency_digest(&path_set(&[&original]));

    // Rewriting identical bytes (a fresh stat tuple) must not change the digest.
    write_file(&original, "stable content");
    let fresh = DigestCache::new();
    let (after, _) = fresh.dependency_digest(&path_set(&[&original]));
    assert_eq!(before, after);
}

#[test]
fn string_digest_matches_bytes() {
    assert_eq!(string_digest("roland"), Fingerprint::of_bytes(b"roland"));
    assert_eq!(string_digest(""), EMPTY_FINGERPRINT);
}

#[test]
fn digest_of_list_sorts_before_hashing() {
    let forward = digest_of_list(&["v1", "v2"]);
    let backward = digest_of_list(&["v2", "v1"]);
    assert_eq!(forward, backward);
    assert_ne!(digest_of_list(&["v1"]), digest_of_list(&["v2"]));
}
