// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use log::{info, warn};
use task_executor::Executor;

use crate::action::{Action, RunnerInstruction};
use crate::cache::Cache;
use crate::check::Checks;
use crate::error::BuildError;
use crate::interrupt::InterruptLatch;
use crate::listener::StatusListener;
use crate::registry::ActionRegistry;
use crate::runner::Runner;
use crate::scheduler::{Job, Scheduler};

///
/// Upper bound on the number of times one `build` invocation will re-drive itself when a
/// successful job requests a restart. Exceeding it is fatal: a build that keeps asking to start
/// over is not going to converge.
///
pub const MAX_RESTARTS: usize = 17;

///
/// The aggregate outcome of a `build` invocation.
///
/// `ok` is true only when every job succeeded *and* no error-severity check fired.
/// `found_inputs` is every file the run treated as an input, for file-watching callers.
///
#[derive(Debug)]
pub struct BuildResult {
    pub ok: bool,
    pub failed_jobs: Vec<Job>,
    pub found_inputs: BTreeSet<String>,
    pub restarts: usize,
}

///
/// The owning facade over the engine: the action registry, the scheduler with its cache, the
/// runner, the check list, and the interrupt latch, wired together for one project.
///
pub struct BuildEngine {
    registry: ActionRegistry,
    scheduler: Scheduler,
    runner: Runner,
    checks: Checks,
    interrupt: InterruptLatch,
}

impl BuildEngine {
    /// The cache lives under `project_root`; everything else is in memory.
    pub fn new(project_root: &Path, executor: Executor) -> BuildEngine {
        let checks = Checks::new();
        let interrupt = InterruptLatch::new();
        BuildEngine {
            registry: ActionRegistry::new(),
            scheduler: Scheduler::new(Cache::for_project(project_root), checks.clone()),
            runner: Runner::new(executor, checks.clone(), interrupt.clone()),
            checks,
            interrupt,
        }
    }

    pub fn register_action(&mut self, action: Action) -> Arc<Action> {
        self.registry.register(action)
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ActionRegistry {
        &mut self.registry
    }

    pub fn checks(&self) -> &Checks {
        &self.checks
    }

    pub fn interrupt(&self) -> &InterruptLatch {
        &self.interrupt
    }

    pub fn subscribe(&mut self, listener: Arc<dyn StatusListener>) {
        self.runner.subscribe(listener);
    }

    ///
    /// Build the named action and everything it depends on. Dirty jobs execute in dependency
    /// order with at most `max_workers` in flight (defaulting to the effective CPU count);
    /// clean jobs are skipped. The cache is flushed on every exit path, including errors.
    ///
    pub async fn build(
        &mut self,
        entrypoint: &str,
        max_workers: Option<usize>,
        always_make: bool,
        check: bool,
    ) -> Result<BuildResult, BuildError> {
        let max_workers = max_workers.unwrap_or_else(get_job_count_limit);
        let mut restarts = 0;
        loop {
            let prepared =
                self.scheduler
                    .start_run(&self.registry, entrypoint, always_make, check);
            let exit_reasons = match prepared {
                Ok(()) => {
                    let driven = self
                        .runner
                        .start(&mut self.scheduler, &self.registry, max_workers)
                        .await;
                    self.scheduler.shutdown();
                    driven?
                }
                Err(e) => {
                    self.scheduler.shutdown();
                    return Err(e);
                }
            };

            let restart_requested = self.runner.failed_jobs.is_empty()
                && exit_reasons.iter().any(|job| {
                    job.status.as_ref().and_then(|s| s.runner_instruction)
                        == Some(RunnerInstruction::RestartBuild)
                });
            if restart_requested {
                restarts += 1;
                if restarts > MAX_RESTARTS {
                    return Err(BuildError::RestartLimitExceeded(restarts));
                }
                info!("Build restart requested; re-running '{entrypoint}' (restart {restarts})");
                continue;
            }

            let failed_jobs = self.runner.failed_jobs.clone();
            let ok = failed_jobs.is_empty() && !self.checks.has_errors();
            return Ok(BuildResult {
                ok,
                failed_jobs,
                found_inputs: self.scheduler.found_inputs(),
                restarts,
            });
        }
    }

    ///
    /// Delete the declared outputs of the named action and of everything it depends on: regular
    /// files are unlinked, directories removed recursively, missing paths ignored. No digests
    /// change; the cache is saved afterwards.
    ///
    pub fn clean(&mut self, entrypoint: &str) -> Result<(), BuildError> {
        let prepared = self
            .scheduler
            .start_run(&self.registry, entrypoint, false, false);
        if let Err(e) = prepared {
            self.scheduler.shutdown();
            return Err(e);
        }
        for name in self.scheduler.remaining_jobs() {
            let Some(action) = self.registry.get(&name) else {
                continue;
            };
            for output in &action.outputs {
                let path = Path::new(output);
                match std::fs::symlink_metadata(path) {
                    Ok(metadata) if metadata.is_dir() => {
                        info!("Removing directory: {output}");
                        if let Err(e) = std::fs::remove_dir_all(path) {
                            warn!("Failed to remove {output}: {e}");
                        }
                    }
                    Ok(_) => {
                        if let Err(e) = std::fs::remove_file(path) {
                            if e.kind() != std::io::ErrorKind::NotFound {
                                warn!("Failed to remove {output}: {e}");
                            }
                        }
                    }
                    Err(_) => {}
                }
            }
        }
        self.scheduler.shutdown();
        Ok(())
    }

    /// Flush persistent state. `build` and `clean` already flush on exit; this is for embedders
    /// that mutate the cache lifecycle themselves.
    pub fn shutdown(&mut self) {
        self.scheduler.shutdown();
    }
}

///
/// The number of jobs to run simultaneously when the caller does not say: the number of CPUs
/// usable by the current process.
///
pub fn get_job_count_limit() -> usize {
    num_cpus::get()
}
