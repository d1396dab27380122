// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
// Enable all clippy lints except for many of the pedantic ones. It's a shame this needs to be copied and pasted across crates, but there doesn't appear to be a way to include inner attributes from a common source.
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
// It is often more clear to show that nothing is being moved.
#![allow(clippy::match_ref_pats)]
// Subjective style.
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
// Default isn't as big a deal as people seem to think it is.
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]
// Arc<Mutex> can be more clear than needing to grok Orderings:
#![allow(clippy::mutex_atomic)]

pub mod action;
pub mod build;
pub mod cache;
pub mod check;
pub mod command;
pub mod digest;
pub mod error;
pub mod graph;
pub mod interrupt;
pub mod listener;
pub mod registry;
pub mod runner;
pub mod scheduler;

pub use crate::action::{
    Action, ActionContext, CommandStatus, DynamicDependency, RunnerInstruction, SchedulingType,
    WorkChannel,
};
pub use crate::build::{get_job_count_limit, BuildEngine, BuildResult, MAX_RESTARTS};
pub use crate::cache::{Cache, DigestEntry};
pub use crate::check::{CheckRule, CheckStatus, Checks, Severity};
pub use crate::command::{Command, ShellCommand};
pub use crate::digest::{digest_of_list, string_digest, DigestCache};
pub use crate::error::BuildError;
pub use crate::graph::ActionGraph;
pub use crate::interrupt::InterruptLatch;
pub use crate::listener::{JobStatus, NoopStatusListener, StatusListener};
pub use crate::registry::ActionRegistry;
pub use crate::runner::Runner;
pub use crate::scheduler::{Job, RunStatus, Scheduler};



#[cfg(test)]
mod digest_tests;



#[cfg(test)]
mod scheduler_tests;

#[cfg(test)]
mod testutil;
