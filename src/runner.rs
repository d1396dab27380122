// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use task_executor::Executor;
use tokio::time::timeout;

use crate::action::{CommandStatus, RunnerInstruction, SchedulingType};
use crate::check::{CheckRule, Checks, Severity};
use crate::command::run_caught;
use crate::error::BuildError;
use crate::interrupt::InterruptLatch;
use crate::listener::{JobStatus, NoopStatusListener, StatusListener};
use crate::registry::ActionRegistry;
use crate::scheduler::{Job, RunStatus, Scheduler};

/// How long the driver waits on the worker pool before taking another pass over the backlog.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

///
/// Executes one run's jobs on a pool of worker threads, pulling ready jobs from the scheduler.
///
/// The driver is single-threaded: all mutation of the backlog, the deferred list, work-channel
/// slots and the scheduler's tables happens between awaits, so none of it is locked. Workers get
/// a command and a context, and give back a status; everything else they do goes through the
/// filesystem.
///
pub struct Runner {
    executor: Executor,
    checks: Checks,
    interrupt: InterruptLatch,
    listener: Arc<dyn StatusListener>,
    pub failed_jobs: Vec<Job>,
}

impl Runner {
    pub fn new(executor: Executor, checks: Checks, interrupt: InterruptLatch) -> Runner {
        Runner {
            executor,
            checks,
            interrupt,
            listener: Arc::new(NoopStatusListener),
            failed_jobs: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, listener: Arc<dyn StatusListener>) {
        self.listener = listener;
    }

    ///
    /// Drive a prepared run to completion with at most `max_workers` concurrently executing jobs.
    ///
    /// Returns the jobs that caused termination: empty on clean success; the failed jobs and/or
    /// the job that requested a build restart otherwise. Once any job fails, the backlog stops
    /// being replenished and in-flight jobs drain before the runner returns.
    ///
    pub async fn start(
        &mut self,
        scheduler: &mut Scheduler,
        actions: &ActionRegistry,
        max_workers: usize,
    ) -> Result<Vec<Job>, BuildError> {
        self.failed_jobs.clear();
        self.listener
            .on_runner_status(&format!("Starting runner with {max_workers} workers"));

        let mut scheduled: FuturesUnordered<BoxFuture<'static, Job>> = FuturesUnordered::new();
        let mut running: HashMap<String, Job> = HashMap::new();
        let mut backlog: Vec<Job> = Vec::new();
        let mut deferred: Vec<Job> = Vec::new();
        let mut exit_reasons: Vec<Job> = Vec::new();
        let mut exit_requested = false;
        let mut interrupted = false;

        loop {
            if !interrupted && self.interrupt.poll_triggered() {
                // Stop dispatching; jobs already on a worker drain below.
                interrupted = true;
                exit_requested = true;
                self.listener
                    .on_runner_status("Build was interrupted by user.");
                for job in backlog.drain(..).chain(deferred.drain(..)) {
                    self.emit(JobStatus::Stopped, &job, scheduler);
                }
            }

            // Replenish the backlog. A call that returns no jobs may still have skipped clean
            // jobs and unblocked their dependents, so keep pulling until the scheduler makes no
            // progress at all.
            while !exit_requested && backlog.len() < 2 * max_workers {
                let remaining_before = scheduler.remaining();
                let jobs = scheduler.get_ready_jobs(actions, 0);
                if jobs.is_empty() && scheduler.remaining() == remaining_before {
                    break;
                }
                backlog.extend(jobs);
            }
            // Previously deferred jobs get another chance at their work channel.
            backlog.append(&mut deferred);

            if scheduled.is_empty()
                && backlog.is_empty()
                && (exit_requested || scheduler.run_status() == RunStatus::Finished)
            {
                if interrupted {
                    return Err(BuildError::Interrupted);
                }
                return Ok(exit_reasons);
            }

            // Nothing in flight, nothing ready, build not finished: the graph cannot make
            // progress. Construction rejects cycles, so this is a belt-and-braces guard.
            if scheduled.is_empty()
                && backlog.is_empty()
                && scheduler.run_status() == RunStatus::Running
            {
                return Err(BuildError::Cycle(
                    "jobs remain but none are ready to run".to_string(),
                ));
            }

            // Keep the scheduled set relatively short; no need to schedule much more than we
            // have workers.
            let mut kept: Vec<Job> = Vec::new();
            for mut job in backlog.drain(..) {
                if scheduled.len() >= 2 * max_workers {
                    kept.push(job);
                    continue;
                }

                let Some(command) = job.action.command.clone() else {
                    // Phony actions complete without dispatch.
                    job.status = Some(CommandStatus::success("No command, skipping"));
                    scheduler.job_finished(&job);
                    self.emit(JobStatus::Skipped, &job, scheduler);
                    continue;
                };

                if let Some(channel) = &job.action.work_channel {
                    if !channel.try_acquire(&job.name) {
                        deferred.push(job);
                        continue;
                    }
                }

                match job.action.scheduling_type {
                    SchedulingType::InProcess => {
                        self.emit(JobStatus::Running, &job, scheduler);
                        let context = job.action.context();
                        job.status = Some(run_caught(command.as_ref(), &context));
                        if let Some(channel) = &job.action.work_channel {
                            channel.release(&job.name);
                        }
                        self.finish_job(job, scheduler, &mut exit_reasons, &mut exit_requested);
                    }
                    SchedulingType::WorkerPool => {
                        self.emit(JobStatus::Running, &job, scheduler);
                        running.insert(job.name.clone(), job.clone());
                        let context = job.action.context();
                        // A worker that dies without reporting (a cancelled task, or a panic
                        // that escaped the command harness) must still come back as a failed
                        // Job, or the scheduler's running set would never drain.
                        let rescued = job.clone();
                        scheduled.push(
                            self.executor
                                .spawn_blocking(
                                    move || {
                                        job.status =
                                            Some(run_caught(command.as_ref(), &context));
                                        job
                                    },
                                    move |join_error| {
                                        let mut job = rescued;
                                        job.status = Some(
                                            CommandStatus::failure(
                                                1,
                                                "Job failed with exception.",
                                            )
                                            .with_output(format!("{join_error}")),
                                        );
                                        job
                                    },
                                )
                                .boxed(),
                        );
                    }
                }
            }
            backlog = kept;

            // Refresh the UI for everything still on a worker.
            let progress = (scheduler.finished_count(), scheduler.run_total());
            for job in running.values() {
                self.listener.on_job_status(JobStatus::Running, job, progress);
            }

            if scheduled.is_empty() {
                continue;
            }

            match timeout(POLL_TIMEOUT, scheduled.next()).await {
                Err(_elapsed) => {}
                Ok(None) => {}
                Ok(Some(job)) => {
                    running.remove(&job.name);
                    self.check_for_missing_output_files(&job);
                    if let Some(channel) = &job.action.work_channel {
                        channel.release(&job.name);
                    }
                    self.finish_job(job, scheduler, &mut exit_reasons, &mut exit_requested);
                }
            }
        }
    }

    ///
    /// Hand a completed job to the scheduler and decide whether it ends the run: failures and
    /// restart requests become exit reasons, and either stops backlog replenishment.
    ///
    fn finish_job(
        &mut self,
        job: Job,
        scheduler: &mut Scheduler,
        exit_reasons: &mut Vec<Job>,
        exit_requested: &mut bool,
    ) {
        scheduler.job_finished(&job);
        let instruction = job.status.as_ref().and_then(|s| s.runner_instruction);
        if job.is_success() && instruction != Some(RunnerInstruction::ExitJobFailed) {
            self.emit(JobStatus::Finished, &job, scheduler);
            if instruction == Some(RunnerInstruction::RestartBuild) {
                *exit_requested = true;
                exit_reasons.push(job);
            }
        } else {
            self.emit(JobStatus::Failed, &job, scheduler);
            self.failed_jobs.push(job.clone());
            *exit_requested = true;
            exit_reasons.push(job);
        }
    }

    fn check_for_missing_output_files(&self, job: &Job) {
        let missing_files: Vec<&str> = job
            .action
            .outputs
            .iter()
            .filter(|filename| !Path::new(filename).exists())
            .map(String::as_str)
            .collect();
        if !missing_files.is_empty() {
            let plural = if missing_files.len() > 1 { "s" } else { "" };
            self.checks.record(
                CheckRule::OutputFileMissing,
                &job.name,
                format!(
                    "Job {} didn't create the output file{plural} that it declared: {}",
                    job.name,
                    missing_files.join(", ")
                ),
                Severity::Error,
            );
        }
    }

    fn emit(&self, status: JobStatus, job: &Job, scheduler: &Scheduler) {
        self.listener.on_job_status(
            status,
            job,
            (scheduler.finished_count(), scheduler.run_total()),
        );
    }
}
