// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use crate::scheduler::Job;

///
/// The lifecycle states a job reports to listeners. For a given job, `Running` (possibly
/// repeated, to refresh a UI) strictly precedes its single terminal state.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobStatus {
    Running,
    Finished,
    Failed,
    Skipped,
    /// Reserved for callers that delete stale outputs without building; the runner itself never
    /// emits it.
    TrimOnly,
    Stopped,
}

///
/// Observer hooks for a UI. Both methods are best-effort: implementations must be fast, must not
/// panic, and must not call back into the engine.
///
pub trait StatusListener: Send + Sync {
    /// `progress` is `(finished, total)` for the current run.
    fn on_job_status(&self, _status: JobStatus, _job: &Job, _progress: (usize, usize)) {}

    /// Coarse lifecycle messages from the runner.
    fn on_runner_status(&self, _message: &str) {}
}

/// The default listener: ignores everything.
pub struct NoopStatusListener;

impl StatusListener for NoopStatusListener {}
