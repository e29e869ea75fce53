// Copyright 2025 Strobe project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

///
/// The error returned by `CancellationToken::err_if_cancelled` once the token has tripped.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation cancelled")
    }
}

impl std::error::Error for Cancelled {}

///
/// A cooperative cancellation token shared by every task participating in one evaluation.
///
/// The token can be tripped exactly once (by a deadline, a guardrail violation, or an external
/// request), releasing all tasks that are waiting on `cancelled`. Long-running node bodies are
/// expected to poll `is_cancelled` or call `err_if_cancelled` at their checkpoints; work that
/// ignores the token runs to completion and has its result discarded by the caller.
///
#[derive(Clone)]
pub struct CancellationToken {
    sender: Arc<Mutex<Option<watch::Sender<()>>>>,
    receiver: watch::Receiver<()>,
}

impl CancellationToken {
    pub fn new() -> CancellationToken {
        let (sender, receiver) = watch::channel(());
        CancellationToken {
            sender: Arc::new(Mutex::new(Some(sender))),
            receiver,
        }
    }

    ///
    /// Trip this token, releasing all tasks that are waiting for it.
    ///
    /// All calls to cancel after the first one are noops.
    ///
    pub fn cancel(&self) {
        // To trip the token, we drop the Sender.
        self.sender.lock().take();
    }

    ///
    /// Wait for another task to trip this token.
    ///
    pub async fn cancelled(&self) {
        // To see whether the token has tripped, we clone the receiver, and then wait for our clone
        // to return an Err, indicating that the Sender has been dropped.
        let mut receiver = self.receiver.clone();
        while receiver.changed().await.is_ok() {}
    }

    ///
    /// Return true if the token has been tripped.
    ///
    pub fn is_cancelled(&self) -> bool {
        self.sender.lock().is_none()
    }

    ///
    /// A checkpoint for cooperative call sites: fails once the token has been tripped.
    ///
    pub fn err_if_cancelled(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
