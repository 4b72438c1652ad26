//! The daemon's single controller, shared between connection threads and the
//! tick thread.

use std::sync::{Mutex, MutexGuard};

use timer_core::{SyncController, TickReport};

pub struct SharedController {
    controller: Mutex<SyncController>,
}

impl SharedController {
    pub fn new(controller: SyncController) -> Self {
        SharedController {
            controller: Mutex::new(controller),
        }
    }

    /// A panicked handler must not take the timer down with it, so poisoning
    /// is ignored.
    pub fn lock(&self) -> MutexGuard<'_, SyncController> {
        self.controller.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Controller mutex was poisoned; recovering");
            poisoned.into_inner()
        })
    }

    pub fn tick(&self) -> timer_core::Result<TickReport> {
        self.lock().tick()
    }

    pub fn teardown(&self) {
        self.lock().teardown();
    }
}
