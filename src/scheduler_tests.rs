// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;

use crate::action::{Action, CommandStatus};
use crate::cache::Cache;
use crate::check::{CheckRule, Checks};
use crate::registry::ActionRegistry;
use crate::scheduler::{Job, RunStatus, Scheduler};
use crate::testutil::write_file;

fn scheduler(dir: &TempDir) -> (Scheduler, Checks) {
    let checks = Checks::new();
    (
        Scheduler::new(Cache::for_project(dir.path()), checks.clone()),
        checks,
    )
}

fn finish(scheduler: &mut Scheduler, mut job: Job, rc: i32) {
    job.status = Some(CommandStatus::new(rc, None, None));
    scheduler.job_finished(&job);
}

/// Pull ready jobs repeatedly until the scheduler neither returns jobs nor skips any, and run
/// every returned job successfully.
fn drain_run(scheduler: &mut Scheduler, registry: &ActionRegistry) -> Vec<String> {
    let mut ran = Vec::new();
    loop {
        let remaining_before = scheduler.remaining();
        let jobs = scheduler.get_ready_jobs(registry, 0);
        if jobs.is_empty() && scheduler.remaining() == remaining_before {
            return ran;
        }
        for job in jobs {
            ran.push(job.name.clone());
            finish(scheduler, job, 0);
        }
    }
}

#[test]
fn run_status_lifecycle() {
    let dir = TempDir::new().unwrap();
    let (mut scheduler, _) = scheduler(&dir);
    let mut registry = ActionRegistry::new();
    registry.register(Action::new("top"));

    assert_eq!(scheduler.run_status(), RunStatus::NotStarted);
    scheduler.start_run(&registry, "top", false, false).unwrap();
    assert_eq!(scheduler.run_status(), RunStatus::Running);

    let jobs = scheduler.get_ready_jobs(&registry, 0);
    assert_eq!(jobs.len(), 1);
    for job in jobs {
        finish(&mut scheduler, job, 0);
    }
    assert_eq!(scheduler.run_status(), RunStatus::Finished);
}

#[test]
fn phony_actions_are_always_dirty() {
    let dir = TempDir::new().unwrap();
    let (mut scheduler, _) = scheduler(&dir);
    let mut registry = ActionRegistry::new();
    registry.register(Action::new("phony"));

    for _ in 0..2 {
        scheduler
            .start_run(&registry, "phony", false, false)
            .unwrap();
        assert_eq!(drain_run(&mut scheduler, &registry), vec!["phony"]);
        assert_eq!(scheduler.run_status(), RunStatus::Finished);
    }
}

#[test]
fn unchanged_files_skip_the_job() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in.txt");
    let output = dir.path().join("out.txt");
    write_file(&input, "source");
    write_file(&output, "product");

    let (mut scheduler, _) = scheduler(&dir);
    let mut registry = ActionRegistry::new();
    registry.register(
        Action::new("emit")
            .with_inputs([input.to_string_lossy()])
            .with_outputs([output.to_string_lossy()]),
    );

    scheduler.start_run(&registry, "emit", false, false).unwrap();
    assert_eq!(drain_run(&mut scheduler, &registry), vec!["emit"]);

    // Nothing changed: the second run must execute zero jobs.
    scheduler.start_run(&registry, "emit", false, false).unwrap();
    assert_eq!(drain_run(&mut scheduler, &registry), Vec::<String>::new());
    assert_eq!(scheduler.run_status(), RunStatus::Finished);
}

#[test]
fn rewriting_identical_bytes_stays_clean() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in.txt");
    let output = dir.path().join("out.txt");
    write_file(&input, "source");
    write_file(&output, "product");

    let (mut scheduler, _) = scheduler(&dir);
    let mut registry = ActionRegistry::new();
    registry.register(
        Action::new("emit")
            .with_inputs([input.to_string_lossy()])
            .with_outputs([output.to_string_lossy()]),
    );

    scheduler.start_run(&registry, "emit", false, false).unwrap();
    drain_run(&mut scheduler, &registry);

    // A fresh stat tuple with identical content is still a cache hit.
    write_file(&input, "source");
    scheduler.start_run(&registry, "emit", false, false).unwrap();
    assert_eq!(drain_run(&mut scheduler, &registry), Vec::<String>::new());
}

#[test]
fn changed_input_dirties_the_job() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in.txt");
    let output = dir.path().join("out.txt");
    write_file(&input, "source");
    write_file(&output, "product");

    let (mut scheduler, _) = scheduler(&dir);
    let mut registry = ActionRegistry::new();
    registry.register(
        Action::new("emit")
            .with_inputs([input.to_string_lossy()])
            .with_outputs([output.to_string_lossy()]),
    );

    scheduler.start_run(&registry, "emit", false, false).unwrap();
    drain_run(&mut scheduler, &registry);

    write_file(&input, "entirely new source");
    scheduler.start_run(&registry, "emit", false, false).unwrap();
    assert_eq!(drain_run(&mut scheduler, &registry), vec!["emit"]);
}

#[test]
fn changed_or_missing_output_dirties_the_job() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in.txt");
    let output = dir.path().join("out.txt");
    write_file(&input, "source");
    write_file(&output, "product");

    let (mut scheduler, _) = scheduler(&dir);
    let mut registry = ActionRegistry::new();
    registry.register(
        Action::new("emit")
            .with_inputs([input.to_string_lossy()])
            .with_outputs([output.to_string_lossy()]),
    );

    scheduler.start_run(&registry, "emit", false, false).unwrap();
    drain_run(&mut scheduler, &registry);

    write_file(&output, "tampered product");
    scheduler.start_run(&registry, "emit", false, false).unwrap();
    assert_eq!(drain_run(&mut scheduler, &registry), vec!["emit"]);
    // drain_run re-finished the job, re-recording digests for the tampered output.

    std::fs::remove_file(&output).unwrap();
    scheduler.start_run(&registry, "emit", false, false).unwrap();
    assert_eq!(drain_run(&mut scheduler, &registry), vec!["emit"]);
}

#[test]
fn always_make_overrides_cleanliness() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in.txt");
    let output = dir.path().join("out.txt");
    write_file(&input, "source");
    write_file(&output, "product");

    let (mut scheduler, _) = scheduler(&dir);
    let mut registry = ActionRegistry::new();
    registry.register(
        Action::new("emit")
            .with_inputs([input.to_string_lossy()])
            .with_outputs([output.to_string_lossy()]),
    );

    scheduler.start_run(&registry, "emit", false, false).unwrap();
    drain_run(&mut scheduler, &registry);

    scheduler.start_run(&registry, "emit", true, false).unwrap();
    assert_eq!(drain_run(&mut scheduler, &registry), vec!["emit"]);
}

#[test]
fn dynamic_dependency_changes_dirty_the_job() {
    let dir = TempDir::new().unwrap();
    let (mut scheduler, _) = scheduler(&dir);

    let value = Arc::new(Mutex::new("v1".to_string()));
    let mut registry = ActionRegistry::new();
    let dynamic_value = value.clone();
    registry.register(
        Action::new("versioned").with_dynamic_dependency(move || Some(dynamic_value.lock().clone())),
    );

    scheduler
        .start_run(&registry, "versioned", false, false)
        .unwrap();
    assert_eq!(drain_run(&mut scheduler, &registry), vec!["versioned"]);

    // Same value: clean.
    scheduler
        .start_run(&registry, "versioned", false, false)
        .unwrap();
    assert_eq!(drain_run(&mut scheduler, &registry), Vec::<String>::new());

    // New value: dirty.
    *value.lock() = "v2".to_string();
    scheduler
        .start_run(&registry, "versioned", false, false)
        .unwrap();
    assert_eq!(drain_run(&mut scheduler, &registry), vec!["versioned"]);

    // And clean again once v2 has been recorded.
    scheduler
        .start_run(&registry, "versioned", false, false)
        .unwrap();
    assert_eq!(drain_run(&mut scheduler, &registry), Vec::<String>::new());
}

#[test]
fn skipping_a_clean_job_unblocks_its_dependents_on_a_later_call() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in.txt");
    let output = dir.path().join("out.txt");
    write_file(&input, "source");
    write_file(&output, "product");

    let (mut scheduler, _) = scheduler(&dir);
    let mut registry = ActionRegistry::new();
    registry.register(
        Action::new("emit")
            .with_inputs([input.to_string_lossy()])
            .with_outputs([output.to_string_lossy()]),
    );
    registry.register(Action::new("top").with_dependencies(["emit"]));

    // Prime the cache so that "emit" is clean on the second run.
    scheduler.start_run(&registry, "top", false, false).unwrap();
    drain_run(&mut scheduler, &registry);

    scheduler.start_run(&registry, "top", false, false).unwrap();
    // The first poll skips the clean "emit" and has nothing to hand out yet.
    let first = scheduler.get_ready_jobs(&registry, 0);
    assert!(first.is_empty());
    assert_eq!(scheduler.run_status(), RunStatus::Running);
    // The skip made "top" ready for the next poll.
    let second = scheduler.get_ready_jobs(&registry, 0);
    assert_eq!(
        second.iter().map(|j| j.name.as_str()).collect::<Vec<_>>(),
        vec!["top"]
    );
}

#[test]
fn failed_jobs_stay_in_the_graph_and_lose_their_digests() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in.txt");
    let output = dir.path().join("out.txt");
    write_file(&input, "source");
    write_file(&output, "product");

    let (mut scheduler, _) = scheduler(&dir);
    let mut registry = ActionRegistry::new();
    registry.register(
        Action::new("emit")
            .with_inputs([input.to_string_lossy()])
            .with_outputs([output.to_string_lossy()]),
    );

    scheduler.start_run(&registry, "emit", false, false).unwrap();
    drain_run(&mut scheduler, &registry);

    // Force a re-run and fail it: the job keeps its node and its recorded digests are cleared.
    scheduler.start_run(&registry, "emit", true, false).unwrap();
    let jobs = scheduler.get_ready_jobs(&registry, 0);
    assert_eq!(jobs.len(), 1);
    for job in jobs {
        finish(&mut scheduler, job, 1);
    }
    assert_eq!(scheduler.run_status(), RunStatus::Failed);
    assert_eq!(scheduler.remaining(), 1);

    // Despite unchanged files, the cleared digests make the next run rebuild.
    scheduler.start_run(&registry, "emit", false, false).unwrap();
    assert_eq!(drain_run(&mut scheduler, &registry), vec!["emit"]);
}

#[test]
fn batched_ready_jobs_respect_the_batch_size() {
    let dir = TempDir::new().unwrap();
    let (mut scheduler, _) = scheduler(&dir);
    let mut registry = ActionRegistry::new();
    registry.register(Action::new("one"));
    registry.register(Action::new("two"));
    registry.register(Action::new("three"));
    registry.register(Action::new("top").with_dependencies(["one", "two", "three"]));

    scheduler.start_run(&registry, "top", false, false).unwrap();
    let first = scheduler.get_ready_jobs(&registry, 2);
    assert_eq!(first.len(), 2);
    let second = scheduler.get_ready_jobs(&registry, 2);
    assert_eq!(second.len(), 1);
}

#[test]
fn running_finished_remaining_partition_the_graph() {
    let dir = TempDir::new().unwrap();
    let (mut scheduler, _) = scheduler(&dir);
    let mut registry = ActionRegistry::new();
    registry.register(Action::new("leaf"));
    registry.register(Action::new("top").with_dependencies(["leaf"]));

    scheduler.start_run(&registry, "top", false, false).unwrap();
    let total = scheduler.run_total();
    assert_eq!(total, 2);

    let jobs = scheduler.get_ready_jobs(&registry, 0);
    // "leaf" is running; "top" remains; nothing is finished.
    assert_eq!(jobs.len() + scheduler.finished_count(), 1);
    assert_eq!(scheduler.remaining(), 2);

    for job in jobs {
        finish(&mut scheduler, job, 0);
    }
    assert_eq!(scheduler.finished_count() + scheduler.remaining(), total);
}

#[test]
fn multi_producer_outputs_are_reported() {
    let dir = TempDir::new().unwrap();
    let shared = dir.path().join("shared.txt");
    let (mut scheduler, checks) = scheduler(&dir);
    let mut registry = ActionRegistry::new();
    registry.register(Action::new("first").with_outputs([shared.to_string_lossy()]));
    registry.register(Action::new("second").with_outputs([shared.to_string_lossy()]));
    registry.register(Action::new("top").with_dependencies(["first", "second"]));

    scheduler.start_run(&registry, "top", false, true).unwrap();

    let entries = checks.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].rule, CheckRule::SameOutputFiles);
    assert!(checks.has_errors());
}

#[test]
fn later_outputs_used_by_earlier_actions_are_reported() {
    let dir = TempDir::new().unwrap();
    let generated = dir.path().join("generated.txt");
    let (mut scheduler, checks) = scheduler(&dir);
    let mut registry = ActionRegistry::new();
    registry.register(Action::new("consumer").with_inputs([generated.to_string_lossy()]));
    registry.register(Action::new("producer").with_outputs([generated.to_string_lossy()]));
    registry.register(Action::new("top").with_dependencies(["consumer", "producer"]));

    scheduler.start_run(&registry, "top", false, true).unwrap();
    drain_run(&mut scheduler, &registry);

    assert!(checks
        .entries()
        .iter()
        .any(|entry| entry.rule == CheckRule::CheckInputsOutputs));
}

#[test]
fn found_inputs_cover_own_inputs_and_dependency_outputs() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source.txt");
    let intermediate = dir.path().join("intermediate.txt");
    let (mut scheduler, _) = scheduler(&dir);
    let mut registry = ActionRegistry::new();
    registry.register(
        Action::new("generate")
            .with_inputs([source.to_string_lossy()])
            .with_outputs([intermediate.to_string_lossy()]),
    );
    registry.register(Action::new("top").with_dependencies(["generate"]));

    scheduler.start_run(&registry, "top", false, false).unwrap();
    let found_inputs = scheduler.found_inputs();
    assert!(found_inputs.contains(source.to_string_lossy().as_ref()));
    assert!(found_inputs.contains(intermediate.to_string_lossy().as_ref()));
}
