// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use hashing::Fingerprint;
use log::{error, warn};
use serde::{Deserialize, Serialize};

/// Bumped whenever the on-disk encoding changes incompatibly; mismatched files load as empty.
const CACHE_FORMAT_VERSION: u32 = 1;

/// Cache location relative to the project root.
pub const DEFAULT_CACHE_RELPATH: &str = ".bygg/cache.db";

///
/// The digests recorded for one action after a successful build: the inputs digest is over the
/// action's dependency files, the outputs digest over its declared outputs, and the dynamic
/// digest over its dynamic dependency's value at the time of the run, if it has one.
///
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DigestEntry {
    pub inputs: Fingerprint,
    pub outputs: Fingerprint,
    pub dynamic: Option<Fingerprint>,
}

#[derive(Serialize)]
struct CacheStateRef<'a> {
    version: u32,
    digests: &'a HashMap<String, DigestEntry>,
}

#[derive(Deserialize)]
struct CacheState {
    version: u32,
    digests: HashMap<String, DigestEntry>,
}

///
/// The persisted mapping from action name to recorded digests.
///
/// Loaded at the start of a run, mutated only by the scheduler, and rewritten as a whole on save.
/// A missing, corrupt or version-mismatched file loads as empty; failure to save is logged and
/// does not fail the build. Saves are atomic (write-then-rename), so a crash mid-save never
/// leaves an unusable file behind.
///
pub struct Cache {
    path: PathBuf,
    digests: HashMap<String, DigestEntry>,
}

impl Cache {
    pub fn new(path: PathBuf) -> Cache {
        Cache {
            path,
            digests: HashMap::new(),
        }
    }

    pub fn for_project(project_root: &Path) -> Cache {
        Cache::new(project_root.join(DEFAULT_CACHE_RELPATH))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&mut self) {
        self.digests.clear();
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return,
            Err(e) => {
                warn!("Failed to read cache at {}: {e}", self.path.display());
                return;
            }
        };
        match bincode::deserialize::<CacheState>(&bytes) {
            Ok(state) if state.version == CACHE_FORMAT_VERSION => self.digests = state.digests,
            Ok(state) => warn!(
                "Ignoring cache at {} with unsupported version {}",
                self.path.display(),
                state.version
            ),
            Err(e) => warn!("Ignoring corrupt cache at {}: {e}", self.path.display()),
        }
    }

    pub fn save(&self) {
        if let Err(e) = self.try_save() {
            // A failed save costs rebuild time on the next run, nothing more.
            error!("Failed to save cache at {}: {e}", self.path.display());
        }
    }

    fn try_save(&self) -> Result<(), std::io::Error> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;
        let bytes = bincode::serialize(&CacheStateRef {
            version: CACHE_FORMAT_VERSION,
            digests: &self.digests,
        })
        .map_err(|e| std::io::Error::new(ErrorKind::Other, e))?;
        let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
        temp_file.write_all(&bytes)?;
        temp_file.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&DigestEntry> {
        self.digests.get(name)
    }

    pub fn set(
        &mut self,
        name: &str,
        inputs: Fingerprint,
        outputs: Fingerprint,
        dynamic: Option<Fingerprint>,
    ) {
        self.digests.insert(
            name.to_string(),
            DigestEntry {
                inputs,
                outputs,
                dynamic,
            },
        );
    }

    pub fn remove(&mut self, name: &str) {
        self.digests.remove(name);
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}
