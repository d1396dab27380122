// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::action::{Action, CommandStatus};
use crate::cache::Cache;
use crate::check::{CheckRule, Checks, Severity};
use crate::digest::{digest_of_list, DigestCache};
use crate::error::BuildError;
use crate::graph::ActionGraph;
use crate::registry::ActionRegistry;

///
/// A per-run execution record wrapping an Action. Jobs are ephemeral; Actions live in the
/// registry.
///
#[derive(Clone)]
pub struct Job {
    pub name: String,
    pub action: Arc<Action>,
    pub status: Option<CommandStatus>,
}

impl Job {
    pub fn new(action: Arc<Action>) -> Job {
        Job {
            name: action.name.clone(),
            action,
            status: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.as_ref().map_or(false, CommandStatus::is_success)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            Some(status) => write!(f, "\"{}, status: {}\"", self.name, status.rc),
            None => write!(f, "\"{}, status: unknown\"", self.name),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunStatus {
    NotStarted,
    Running,
    Finished,
    Failed,
}

///
/// Drives a single build: graph construction, dirty detection, job lifecycle and the digest
/// cache. All state is owned and mutated by the runner's driver; nothing here is shared across
/// threads.
///
pub struct Scheduler {
    cache: Cache,
    digests: DigestCache,
    checks: Checks,
    job_graph: ActionGraph,
    dependency_files: HashMap<String, BTreeSet<String>>,
    ready_jobs: BTreeSet<String>,
    running_jobs: HashMap<String, Job>,
    finished_jobs: HashMap<String, Job>,
    started: bool,
    always_make: bool,
    check_inputs_outputs: Option<HashSet<String>>,
    run_total: usize,
}

impl Scheduler {
    pub fn new(cache: Cache, checks: Checks) -> Scheduler {
        Scheduler {
            cache,
            digests: DigestCache::new(),
            checks,
            job_graph: ActionGraph::new(),
            dependency_files: HashMap::new(),
            ready_jobs: BTreeSet::new(),
            running_jobs: HashMap::new(),
            finished_jobs: HashMap::new(),
            started: false,
            always_make: false,
            check_inputs_outputs: None,
            run_total: 0,
        }
    }

    ///
    /// Reset the per-run tables and build the dependency graph from the entrypoint. With `check`,
    /// also record a diagnostic for every file declared as an output of more than one action.
    ///
    pub fn prepare_run(
        &mut self,
        actions: &ActionRegistry,
        entrypoint: &str,
        check: bool,
    ) -> Result<(), BuildError> {
        self.ready_jobs.clear();
        self.running_jobs.clear();
        self.finished_jobs.clear();
        self.dependency_files.clear();
        self.job_graph.build_from(actions, entrypoint)?;

        if check {
            let mut outputs_to_actions: HashMap<&str, BTreeSet<&str>> = HashMap::new();
            for name in self.job_graph.all() {
                if let Some(action) = actions.get(name) {
                    for output in &action.outputs {
                        outputs_to_actions
                            .entry(output.as_str())
                            .or_default()
                            .insert(action.name.as_str());
                    }
                }
            }
            for (output, producers) in outputs_to_actions {
                if producers.len() > 1 {
                    let scapegoat = producers
                        .iter()
                        .copied()
                        .next()
                        .expect("a multi-producer entry has at least one producer");
                    let producer_list = producers.iter().copied().collect::<Vec<_>>().join(", ");
                    self.checks.record(
                        CheckRule::SameOutputFiles,
                        scapegoat,
                        format!(
                            "The file {output} is in the output list from multiple actions: {producer_list}"
                        ),
                        Severity::Error,
                    );
                }
            }
        }

        // Each action's dependency files are its own inputs plus the outputs of its direct
        // dependencies.
        for name in self.job_graph.all() {
            let Some(action) = actions.get(name) else {
                continue;
            };
            let mut files = action.inputs.clone();
            for dependency in &action.dependencies {
                if let Some(dependency_action) = actions.get(dependency) {
                    files.extend(dependency_action.outputs.iter().cloned());
                }
            }
            self.dependency_files.insert(name.to_string(), files);
        }

        self.run_total = self.job_graph.len();
        Ok(())
    }

    pub fn start_run(
        &mut self,
        actions: &ActionRegistry,
        entrypoint: &str,
        always_make: bool,
        check: bool,
    ) -> Result<(), BuildError> {
        self.always_make = always_make;
        self.check_inputs_outputs = if check { Some(HashSet::new()) } else { None };
        self.prepare_run(actions, entrypoint, check)?;
        self.cache.load();
        self.started = true;
        Ok(())
    }

    pub fn run_status(&self) -> RunStatus {
        if !self.started {
            return RunStatus::NotStarted;
        }
        if self
            .finished_jobs
            .values()
            .any(|job| job.status.as_ref().map_or(false, |s| s.rc != 0))
        {
            return RunStatus::Failed;
        }
        if self.job_graph.is_empty() {
            RunStatus::Finished
        } else {
            RunStatus::Running
        }
    }

    ///
    /// Whether a job needs to be built on this run. See the action's recorded digests in the
    /// cache for what "changed" means for each rule.
    ///
    fn check_dirty(&self, actions: &ActionRegistry, job_name: &str) -> bool {
        if self.always_make {
            return true;
        }

        let Some(action) = actions.get(job_name) else {
            return true;
        };

        if action.inputs.is_empty()
            && action.outputs.is_empty()
            && action.dynamic_dependency.is_none()
        {
            // An action with neither inputs nor outputs will always be built.
            debug!("Job '{job_name}' is dirty (no inputs or outputs)");
            return true;
        }

        let Some(cached) = self.cache.get(job_name) else {
            // No previous result, so we need to build.
            debug!("Job '{job_name}' is dirty (no previous result)");
            return true;
        };

        let (outputs_digest, files_were_missing) = self.digests.dependency_digest(&action.outputs);
        if files_were_missing || cached.outputs != outputs_digest {
            debug!("Job '{job_name}' is dirty (output changed)");
            return true;
        }

        let empty = BTreeSet::new();
        let dependency_files = self.dependency_files.get(job_name).unwrap_or(&empty);
        let (inputs_digest, _) = self.digests.dependency_digest(dependency_files);

        if let Some(dynamic_dependency) = &action.dynamic_dependency {
            let Some(cached_dynamic) = cached.dynamic else {
                return true;
            };
            match dynamic_dependency() {
                Some(ref value) if digest_of_list(&[value.clone()]) == cached_dynamic => {}
                _ => {
                    debug!("Job '{job_name}' is dirty (dynamic dependency changed)");
                    return true;
                }
            }
        }

        if cached.inputs != inputs_digest {
            debug!("Job '{job_name}' is dirty (inputs changed)");
            return true;
        }

        debug!("Job '{job_name}' is clean");
        false
    }

    ///
    /// Create a batch of dirty jobs and put them in the running pool. Returns all ready jobs if
    /// `batch_size` is 0.
    ///
    /// An empty list may be returned even when work remains: skipping a clean job can make its
    /// dependents ready only on a subsequent call, so callers must keep polling until
    /// `run_status()` reports `Finished`.
    ///
    pub fn get_ready_jobs(&mut self, actions: &ActionRegistry, batch_size: usize) -> Vec<Job> {
        if batch_size == 0 || self.ready_jobs.len() < batch_size {
            let new_jobs = {
                let running_jobs = &self.running_jobs;
                let finished_jobs = &self.finished_jobs;
                let ready_jobs = &self.ready_jobs;
                self.job_graph.ready(|name| {
                    running_jobs.contains_key(name)
                        || finished_jobs.contains_key(name)
                        || ready_jobs.contains(name)
                })
            };
            for name in new_jobs {
                if self.check_dirty(actions, &name) {
                    self.ready_jobs.insert(name);
                } else {
                    self.skip_job(&name);
                }
            }
        }

        if self.ready_jobs.is_empty() {
            return Vec::new();
        }

        let take = if batch_size == 0 {
            self.ready_jobs.len()
        } else {
            batch_size.min(self.ready_jobs.len())
        };
        let mut job_list = Vec::with_capacity(take);
        for _ in 0..take {
            let Some(name) = self.ready_jobs.pop_first() else {
                break;
            };
            let action = actions
                .get(&name)
                .expect("every name in the job graph is registered")
                .clone();
            let job = Job::new(action);
            self.running_jobs.insert(name, job.clone());
            job_list.push(job);
        }

        if let Some(seen) = self.check_inputs_outputs.as_mut() {
            // A later job must not produce files that an earlier job consumed.
            for job in &job_list {
                seen.extend(job.action.inputs.iter().cloned());
                if let Some(files) = self.dependency_files.get(&job.name) {
                    seen.extend(files.iter().cloned());
                }
            }
            for job in &job_list {
                let overlap: Vec<&str> = job
                    .action
                    .outputs
                    .iter()
                    .filter(|output| seen.contains(*output))
                    .map(String::as_str)
                    .collect();
                if !overlap.is_empty() {
                    let plural = if overlap.len() > 1 { "s" } else { "" };
                    self.checks.record(
                        CheckRule::CheckInputsOutputs,
                        &job.name,
                        format!(
                            "Output{plural} was declared as input{plural} to earlier action: {}",
                            overlap.join(", ")
                        ),
                        Severity::Error,
                    );
                }
            }
        }

        job_list
    }

    /// Skip a job: remove it from the graph without ever handing it to the runner.
    pub fn skip_job(&mut self, name: &str) {
        debug!("Skipping job '{name}'");
        self.job_graph.remove(name);
    }

    ///
    /// Record a finished job. Successful jobs leave the graph and have fresh digests recorded;
    /// failed jobs stay in the graph (so the remaining graph shows what could not be built) and
    /// have any stale digests cleared.
    ///
    pub fn job_finished(&mut self, job: &Job) {
        self.running_jobs.remove(&job.name);
        self.finished_jobs.insert(job.name.clone(), job.clone());

        if job.is_success() {
            self.job_graph.remove(&job.name);
            let empty = BTreeSet::new();
            let dependency_files = self.dependency_files.get(&job.name).unwrap_or(&empty);
            let (inputs_digest, _) = self.digests.dependency_digest(dependency_files);
            let (outputs_digest, _) = self.digests.dependency_digest(&job.action.outputs);
            let dynamic_digest = job
                .action
                .dynamic_dependency
                .as_ref()
                .and_then(|dynamic_dependency| dynamic_dependency())
                .map(|value| digest_of_list(&[value]));
            self.cache
                .set(&job.name, inputs_digest, outputs_digest, dynamic_digest);
        } else {
            self.cache.remove(&job.name);
        }
    }

    /// Jobs that have reached a terminal state this run, successes and failures both.
    pub fn finished_count(&self) -> usize {
        self.finished_jobs.len()
    }

    /// The number of actions reachable from the entrypoint when the run started.
    pub fn run_total(&self) -> usize {
        self.run_total
    }

    /// Actions still in the graph: not yet run, skipped, or failed.
    pub fn remaining(&self) -> usize {
        self.job_graph.len()
    }

    /// The remaining node names, for callers that walk the graph (e.g. clean).
    pub fn remaining_jobs(&self) -> Vec<String> {
        self.job_graph.all().map(str::to_string).collect()
    }

    ///
    /// Every file the current run would consider an input: the union of all actions' inputs and
    /// dependency files. This is the set a file-watching caller monitors between runs.
    ///
    pub fn found_inputs(&self) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        for files in self.dependency_files.values() {
            found.extend(files.iter().cloned());
        }
        found
    }

    /// Flush the cache. Safe to call repeatedly; a run that never started has nothing to flush.
    pub fn shutdown(&mut self) {
        if self.started {
            self.cache.save();
        }
    }
}
