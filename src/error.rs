// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use thiserror::Error;

///
/// Fatal build failures. Everything else (a failing job, a failed consistency check, a cache file
/// that cannot be read back) is reported through the run result or the check list rather than as
/// an error: the engine keeps running and lets the caller decide what to surface.
///
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum BuildError {
    #[error("Action '{0}' not found")]
    ActionNotFound(String),

    #[error("Dependency cycle among actions: {0}")]
    Cycle(String),

    #[error("Build was restarted {0} times without converging")]
    RestartLimitExceeded(usize),

    #[error("Build was interrupted by user")]
    Interrupted,
}
