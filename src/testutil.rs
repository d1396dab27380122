// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::action::{ActionContext, CommandStatus};
use crate::listener::{JobStatus, StatusListener};
use crate::scheduler::Job;

pub fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

///
/// A listener that records every event, for asserting on ordering and terminal states.
///
pub struct TrackingListener {
    events: Mutex<Vec<(JobStatus, String)>>,
}

impl TrackingListener {
    pub fn new() -> Arc<TrackingListener> {
        Arc::new(TrackingListener {
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<(JobStatus, String)> {
        self.events.lock().clone()
    }

    pub fn names_with(&self, status: JobStatus) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|(s, _)| *s == status)
            .map(|(_, name)| name.clone())
            .collect()
    }
}

impl StatusListener for TrackingListener {
    fn on_job_status(&self, status: JobStatus, job: &Job, _progress: (usize, usize)) {
        self.events.lock().push((status, job.name.clone()));
    }
}

///
/// A command that appends the job's name to a shared log and succeeds, for observing execution
/// order.
///
pub fn logging_command(
    log: Arc<Mutex<Vec<String>>>,
) -> impl Fn(&ActionContext) -> CommandStatus + Send + Sync {
    move |context: &ActionContext| {
        log.lock().push(context.name.clone());
        CommandStatus::success("ok")
    }
}

///
/// A command that bumps a counter, writes every declared output, and succeeds. Rebuild tests
/// count executions through the counter.
///
pub fn counting_command(
    counter: Arc<AtomicUsize>,
) -> impl Fn(&ActionContext) -> CommandStatus + Send + Sync {
    move |context: &ActionContext| {
        counter.fetch_add(1, Ordering::SeqCst);
        for output in &context.outputs {
            write_file(Path::new(output), &format!("built by {}", context.name));
        }
        CommandStatus::success("ok")
    }
}
