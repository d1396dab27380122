// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::sync::Arc;

use parking_lot::Mutex;
use task_executor::Executor;
use tokio::sync::watch;

///
/// A one-shot interrupt flag: triggered at most once, observed by every clone of the handle.
///
/// The runner polls this between driver iterations; on trigger it stops dispatching new jobs,
/// lets in-flight workers finish, and fails the build. Workers never observe the interrupt
/// directly.
///
#[derive(Clone)]
pub struct InterruptLatch {
    sender: Arc<Mutex<Option<watch::Sender<()>>>>,
    receiver: watch::Receiver<()>,
}

impl InterruptLatch {
    pub fn new() -> InterruptLatch {
        let (sender, receiver) = watch::channel(());
        InterruptLatch {
            sender: Arc::new(Mutex::new(Some(sender))),
            receiver,
        }
    }

    ///
    /// Mark this latch triggered, releasing all tasks that are waiting for it.
    ///
    /// All calls to trigger after the first one are noops.
    ///
    pub fn trigger(&self) {
        // To trigger the latch, we drop the Sender.
        self.sender.lock().take();
    }

    ///
    /// Wait for another task or thread to trigger this latch.
    ///
    pub async fn triggered(&self) {
        // To see whether the latch is triggered, we clone the receiver, and then wait for our
        // clone to return an Err, indicating that the Sender has been dropped.
        let mut receiver = self.receiver.clone();
        while receiver.changed().await.is_ok() {}
    }

    ///
    /// Return true if the latch has been triggered.
    ///
    pub fn poll_triggered(&self) -> bool {
        self.sender.lock().is_none()
    }

    ///
    /// Trip this latch when the process receives Ctrl-C. The handler stays installed for the
    /// life of the runtime; triggering an already-triggered latch is a noop.
    ///
    pub fn install_ctrl_c_handler(&self, executor: &Executor) {
        let latch = self.clone();
        let _ = executor.native_spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                latch.trigger();
            }
        });
    }
}
