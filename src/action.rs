// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::command::Command;

///
/// A function whose return value participates in an Action's digest: when the returned string
/// changes between runs, the action is considered dirty. Returning None causes the value to be
/// ignored for the current run (and the action to be rebuilt).
///
pub type DynamicDependency = Arc<dyn Fn() -> Option<String> + Send + Sync>;

///
/// Where an action's command executes.
///
/// In-process commands run synchronously on the driver and must be trivial: they exist as an
/// escape hatch for work that would cost more to dispatch than to run.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SchedulingType {
    InProcess,
    WorkerPool,
}

///
/// An instruction from a completed command to the runner, carried on `CommandStatus`.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunnerInstruction {
    /// Abort the current pass and re-drive the whole build from scratch. Only meaningful on a
    /// successful status; bounded by `MAX_RESTARTS`.
    RestartBuild,
    /// Treat the build as failed once this job completes, even if the job itself succeeded.
    ExitJobFailed,
}

///
/// The result of running a command. `rc` follows shell conventions: zero is success.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandStatus {
    pub rc: i32,
    pub message: Option<String>,
    pub output: Option<String>,
    pub runner_instruction: Option<RunnerInstruction>,
}

impl CommandStatus {
    pub fn new(rc: i32, message: Option<String>, output: Option<String>) -> CommandStatus {
        CommandStatus {
            rc,
            message,
            output,
            runner_instruction: None,
        }
    }

    pub fn success(message: &str) -> CommandStatus {
        CommandStatus::new(0, Some(message.to_string()), None)
    }

    pub fn failure(rc: i32, message: &str) -> CommandStatus {
        CommandStatus::new(rc, Some(message.to_string()), None)
    }

    pub fn with_output(mut self, output: String) -> CommandStatus {
        self.output = Some(output);
        self
    }

    pub fn with_instruction(mut self, instruction: RunnerInstruction) -> CommandStatus {
        self.runner_instruction = Some(instruction);
        self
    }

    pub fn is_success(&self) -> bool {
        self.rc == 0
    }
}

struct WorkChannelInner {
    name: String,
    width: usize,
    current_jobs: Mutex<BTreeSet<String>>,
}

///
/// A named, fixed-width semaphore limiting the number of concurrently executing jobs that share
/// it. Create an instance with a unique name and a width, then attach it to the Actions that
/// should be throttled by it.
///
/// Channel state is consulted only by the runner's driver, which try-acquires a slot before
/// dispatching a job and defers the job when the channel is full. Channels are local to the
/// driver process and live for the duration of a run.
///
#[derive(Clone)]
pub struct WorkChannel {
    inner: Arc<WorkChannelInner>,
}

impl WorkChannel {
    pub fn new(name: &str, width: usize) -> WorkChannel {
        assert!(width > 0, "Work channel width less than 1 makes no sense");
        WorkChannel {
            inner: Arc::new(WorkChannelInner {
                name: name.to_string(),
                width,
                current_jobs: Mutex::new(BTreeSet::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn width(&self) -> usize {
        self.inner.width
    }

    /// Claim a slot for the named job. Returns false when the channel is already at width, in
    /// which case the caller defers the job and retries on a later iteration.
    pub fn try_acquire(&self, job_name: &str) -> bool {
        let mut current_jobs = self.inner.current_jobs.lock();
        if current_jobs.len() >= self.inner.width {
            return false;
        }
        current_jobs.insert(job_name.to_string());
        true
    }

    /// Release the slot held by the named job, if any.
    pub fn release(&self, job_name: &str) {
        self.inner.current_jobs.lock().remove(job_name);
    }

    pub fn load(&self) -> usize {
        self.inner.current_jobs.lock().len()
    }
}

impl fmt::Debug for WorkChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkChannel")
            .field("name", &self.inner.name)
            .field("width", &self.inner.width)
            .finish()
    }
}

///
/// The slice of an Action that its command is allowed to see while running. Commands communicate
/// only through their return value and filesystem side effects, so the context is a plain value
/// with no handle back into the engine.
///
#[derive(Clone, Debug)]
pub struct ActionContext {
    pub name: String,
    pub message: Option<String>,
    pub inputs: BTreeSet<String>,
    pub outputs: BTreeSet<String>,
    pub dependencies: BTreeSet<String>,
}

///
/// A declared unit of work in the build graph.
///
/// Actions are registered into an `ActionRegistry` and are immutable (and shared) from then on;
/// per-run state lives on `Job` and in the scheduler's tables.
///
#[derive(Clone)]
pub struct Action {
    pub name: String,
    pub message: Option<String>,
    pub description: Option<String>,
    pub inputs: BTreeSet<String>,
    pub outputs: BTreeSet<String>,
    pub dependencies: BTreeSet<String>,
    pub dynamic_dependency: Option<DynamicDependency>,
    pub command: Option<Arc<dyn Command>>,
    pub scheduling_type: SchedulingType,
    pub work_channel: Option<WorkChannel>,
    pub is_entrypoint: bool,
    pub environment: Option<String>,
}

impl Action {
    pub fn new(name: &str) -> Action {
        Action {
            name: name.to_string(),
            message: None,
            description: None,
            inputs: BTreeSet::new(),
            outputs: BTreeSet::new(),
            dependencies: BTreeSet::new(),
            dynamic_dependency: None,
            command: None,
            scheduling_type: SchedulingType::WorkerPool,
            work_channel: None,
            is_entrypoint: false,
            environment: None,
        }
    }

    pub fn with_message(mut self, message: &str) -> Action {
        self.message = Some(message.to_string());
        self
    }

    pub fn with_description(mut self, description: &str) -> Action {
        self.description = Some(description.trim().to_string());
        self
    }

    pub fn with_inputs<I, S>(mut self, inputs: I) -> Action
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.extend(inputs.into_iter().map(Into::into));
        self
    }

    pub fn with_outputs<I, S>(mut self, outputs: I) -> Action
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs.extend(outputs.into_iter().map(Into::into));
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Action
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn with_dynamic_dependency<F>(mut self, f: F) -> Action
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        self.dynamic_dependency = Some(Arc::new(f));
        self
    }

    pub fn with_command<C: Command + 'static>(mut self, command: C) -> Action {
        self.command = Some(Arc::new(command));
        self
    }

    pub fn with_scheduling_type(mut self, scheduling_type: SchedulingType) -> Action {
        self.scheduling_type = scheduling_type;
        self
    }

    pub fn with_work_channel(mut self, work_channel: WorkChannel) -> Action {
        self.work_channel = Some(work_channel);
        self
    }

    pub fn with_environment(mut self, environment: &str) -> Action {
        self.environment = Some(environment.to_string());
        self
    }

    pub fn entrypoint(mut self) -> Action {
        self.is_entrypoint = true;
        self
    }

    /// The view of this Action handed to its command.
    pub fn context(&self) -> ActionContext {
        ActionContext {
            name: self.name.clone(),
            message: self.message.clone(),
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            dependencies: self.dependencies.clone(),
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("dependencies", &self.dependencies)
            .field("is_entrypoint", &self.is_entrypoint)
            .finish()
    }
}
