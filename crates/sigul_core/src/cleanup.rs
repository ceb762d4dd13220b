//! Stack teardown guarantee.
//!
//! A [`CleanupGuard`] is created before the first stack mutation. Releasing
//! it tears the stack down on the normal path; dropping it without release
//! (early return, panic unwind) falls back to a blocking teardown. Either
//! way at most one teardown is issued.

use std::sync::Arc;

use tracing::{info, warn};

use sigul_runner::StackControlPlane;

use crate::stack::stop_stack;

pub struct CleanupGuard {
    plane: Arc<dyn StackControlPlane>,
    enabled: bool,
    released: bool,
}

impl CleanupGuard {
    /// Arm the guard. When `enabled` is false, teardown is left to the user.
    pub fn new(plane: Arc<dyn StackControlPlane>, enabled: bool) -> Self {
        Self {
            plane,
            enabled,
            released: false,
        }
    }

    /// Run the teardown now.
    ///
    /// Returns the manual teardown command when cleanup is disabled and the
    /// stack was left running.
    pub async fn release(mut self) -> Option<String> {
        self.released = true;
        if self.enabled {
            info!("Cleaning up stack");
            stop_stack(self.plane.as_ref()).await;
            None
        } else {
            let command = self.plane.teardown_command();
            warn!("Cleanup disabled; stack left running. Tear it down with: {}", command);
            Some(command)
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if self.released || !self.enabled {
            return;
        }
        warn!("Run ended abnormally; tearing the stack down");
        if let Err(e) = self.plane.down_blocking() {
            warn!("Emergency teardown failed: {}", e);
        }
    }
}
