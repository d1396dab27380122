// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::process::{self, Stdio};

use crate::action::{ActionContext, CommandStatus};

///
/// The body of an Action: anything that can execute against an `ActionContext` and report a
/// `CommandStatus`. Implementations must be self-contained — they communicate only through their
/// return value and by side effects on the filesystem, so that the runner may execute them on any
/// worker thread.
///
/// Plain closures of type `Fn(&ActionContext) -> CommandStatus` implement this trait, as does
/// `ShellCommand` for actions whose body is a command line.
///
pub trait Command: Send + Sync {
    fn run(&self, context: &ActionContext) -> CommandStatus;
}

impl<F> Command for F
where
    F: Fn(&ActionContext) -> CommandStatus + Send + Sync,
{
    fn run(&self, context: &ActionContext) -> CommandStatus {
        self(context)
    }
}

///
/// A command that runs a command line through `sh -c`, capturing stdout and stderr into the
/// status output and mapping the exit code onto `rc`.
///
pub struct ShellCommand {
    command_line: String,
}

impl ShellCommand {
    pub fn new(command_line: &str) -> ShellCommand {
        ShellCommand {
            command_line: command_line.to_string(),
        }
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }
}

impl Command for ShellCommand {
    fn run(&self, context: &ActionContext) -> CommandStatus {
        let output = process::Command::new("sh")
            .arg("-c")
            .arg(&self.command_line)
            .stdin(Stdio::null())
            .output();
        match output {
            Ok(output) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                // A signal-terminated child has no exit code.
                let rc = output.status.code().unwrap_or(-1);
                CommandStatus::new(rc, context.message.clone(), Some(text))
            }
            Err(e) => CommandStatus::failure(1, &format!("Failed to spawn shell: {e}")),
        }
    }
}

///
/// Run a command, containing panics: a panicking command reports as a failed job rather than
/// taking down its worker.
///
pub fn run_caught(command: &dyn Command, context: &ActionContext) -> CommandStatus {
    match catch_unwind(AssertUnwindSafe(|| command.run(context))) {
        Ok(status) => status,
        Err(panic) => {
            let payload = if let Some(s) = panic.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "non-string panic payload".to_string()
            };
            CommandStatus::failure(1, "Job failed with exception.").with_output(payload)
        }
    }
}
