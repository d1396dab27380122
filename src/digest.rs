// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;

use fnv::FnvHashMap as HashMap;
use hashing::Fingerprint;
use log::warn;
use parking_lot::Mutex;

///
/// The stat tuple that keys the in-process file digest memo. Any change to a file's change time,
/// modification time or size invalidates its memoised digest.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct StatKey {
    ctime_ns: i64,
    mtime_ns: i64,
    size: u64,
}

impl StatKey {
    fn of(metadata: &fs::Metadata) -> StatKey {
        StatKey {
            ctime_ns: metadata.ctime() * 1_000_000_000 + metadata.ctime_nsec(),
            mtime_ns: metadata.mtime() * 1_000_000_000 + metadata.mtime_nsec(),
            size: metadata.len(),
        }
    }
}

///
/// Memoising digests of file contents.
///
/// Paths are resolved (symlinks follow to their target) before consulting the memo, so links
/// whose stat results coincide with their target share its entry. Missing files never enter the
/// memo. The memo is shared between the scheduler's dirty checks and post-run digest recording;
/// the hot path is read-heavy, so a single mutex around the map is sufficient.
///
pub struct DigestCache {
    memo: Mutex<HashMap<PathBuf, (StatKey, Fingerprint)>>,
}

impl DigestCache {
    pub fn new() -> DigestCache {
        DigestCache {
            memo: Mutex::new(HashMap::default()),
        }
    }

    ///
    /// The digest of the file's bytes, or None if the file is missing. A file that exists but
    /// cannot be read also digests as None, with a warning: the scheduler then errs toward
    /// rebuilding.
    ///
    pub fn file_digest(&self, path: &str) -> Option<Fingerprint> {
        let real_path = fs::canonicalize(path).ok()?;
        let metadata = match fs::metadata(&real_path) {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return None,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to stat {}: {e}", real_path.display());
                return None;
            }
        };
        let key = StatKey::of(&metadata);
        if let Some((cached_key, fingerprint)) = self.memo.lock().get(&real_path) {
            if *cached_key == key {
                return Some(*fingerprint);
            }
        }
        let fingerprint = match File::open(&real_path).and_then(|mut f| hashing::hash(&mut f)) {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                warn!("Failed to digest {}: {e}", real_path.display());
                return None;
            }
        };
        self.memo.lock().insert(real_path, (key, fingerprint));
        Some(fingerprint)
    }

    ///
    /// The combined digest of a set of files: the sorted hex digests of the files that exist,
    /// concatenated and rehashed. Returns whether any of the named files were missing; the empty
    /// set yields a fixed digest (of zero bytes).
    ///
    /// Permuting the input set does not change the result.
    ///
    pub fn dependency_digest(&self, filenames: &BTreeSet<String>) -> (Fingerprint, bool) {
        let mut digests: Vec<String> = filenames
            .iter()
            .filter_map(|filename| self.file_digest(filename))
            .map(|fingerprint| fingerprint.to_hex())
            .collect();
        let files_were_missing = digests.len() != filenames.len();
        digests.sort();
        (
            Fingerprint::of_bytes(digests.concat().as_bytes()),
            files_were_missing,
        )
    }

    /// Number of memoised entries, for diagnostics.
    pub fn len(&self) -> usize {
        self.memo.lock().len()
    }
}

/// The digest of a string's bytes.
pub fn string_digest(s: &str) -> Fingerprint {
    Fingerprint::of_bytes(s.as_bytes())
}

///
/// The order-independent digest of a list of strings: each item is digested, the hex digests are
/// sorted and concatenated, and the concatenation is rehashed.
///
pub fn digest_of_list<S: AsRef<str>>(items: &[S]) -> Fingerprint {
    let mut digests: Vec<String> = items
        .iter()
        .map(|item| string_digest(item.as_ref()).to_hex())
        .collect();
    digests.sort();
    Fingerprint::of_bytes(digests.concat().as_bytes())
}
