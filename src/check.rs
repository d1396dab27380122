// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        write!(f, "{s}")
    }
}

///
/// The consistency rules in force. `SameOutputFiles` and `CheckInputsOutputs` are evaluated by
/// the scheduler when the caller opts in with `check`; `OutputFileMissing` is evaluated by the
/// runner after every pool job.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CheckRule {
    SameOutputFiles,
    CheckInputsOutputs,
    OutputFileMissing,
}

impl fmt::Display for CheckRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckRule::SameOutputFiles => "same_output_files",
            CheckRule::CheckInputsOutputs => "check_inputs_outputs",
            CheckRule::OutputFileMissing => "output_file_missing",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CheckStatus {
    pub rule: CheckRule,
    pub action: String,
    pub text: String,
    pub severity: Severity,
}

///
/// An append-only list of diagnostics accrued over a run. Checks never abort the build directly,
/// but any error-severity entry turns the aggregate result into failure regardless of individual
/// job outcomes.
///
/// The handle is cheaply cloneable; the engine shares one instance between the scheduler and the
/// runner.
///
#[derive(Clone)]
pub struct Checks {
    entries: Arc<Mutex<Vec<CheckStatus>>>,
}

impl Checks {
    pub fn new() -> Checks {
        Checks {
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn record(&self, rule: CheckRule, action: &str, text: String, severity: Severity) {
        log::debug!("Check {rule} failed for '{action}' ({severity}): {text}");
        self.entries.lock().push(CheckStatus {
            rule,
            action: action.to_string(),
            text,
            severity,
        });
    }

    pub fn entries(&self) -> Vec<CheckStatus> {
        self.entries.lock().clone()
    }

    pub fn has_errors(&self) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|entry| entry.severity == Severity::Error)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
