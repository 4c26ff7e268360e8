// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::sync::{
    atomic::{AtomicBool, Ordering::Relaxed},
    Arc,
};

/// Cooperative cancellation flag
///
/// Cloning shares the flag, so a handle can be given to another
/// thread that wants to interrupt a long-running operation.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    /// Requests interruption.
    pub fn send(&self) {
        self.0.store(true, Relaxed);
    }

    /// Returns `true` if interruption was requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Relaxed)
    }

    pub(crate) fn reset(&self) {
        self.0.store(false, Relaxed);
    }

    /// Fails if interruption was requested.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Interrupted`] once [`StopSignal::send`] was called.
    pub fn check_for_interrupt(&self) -> crate::Result<()> {
        if self.is_stopped() {
            Err(crate::Error::Interrupted)
        } else {
            Ok(())
        }
    }
}
