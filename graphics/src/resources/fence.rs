//! Fence resource.

use std::sync::atomic::{AtomicU64, Ordering};

use super::{DeviceId, TrackedResource};
use crate::backend::GpuFence;
use crate::error::{GraphicsError, GraphicsResult};

/// A monotonically increasing counter shared between the CPU and the queue.
///
/// `signal(n)` is ordered after all work submitted before it; `wait(n)` blocks
/// until the counter reaches `n`. Waiting has no timeout: waiting for a value
/// that is never signaled blocks forever.
pub struct Fence {
    device_id: DeviceId,
    raw: GpuFence,
    last_signaled: AtomicU64,
    _tracked: TrackedResource,
}

impl Fence {
    pub(crate) fn new(
        device_id: DeviceId,
        initial_value: u64,
        raw: GpuFence,
        tracked: TrackedResource,
    ) -> Self {
        Self {
            device_id,
            raw,
            last_signaled: AtomicU64::new(initial_value),
            _tracked: tracked,
        }
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Enqueue a signal of `value` on the device queue.
    ///
    /// Signaling a value below the last signaled one is an error; signaling
    /// the same value again is a no-op.
    pub fn signal(&self, value: u64) -> GraphicsResult<()> {
        let last = self.last_signaled.load(Ordering::Acquire);
        if value < last {
            return Err(GraphicsError::State(format!(
                "fence value {value} is below the last signaled value {last}"
            ))
            .logged("fence", "signal"));
        }
        if value == last {
            return Ok(());
        }
        self.raw.signal(value).map_err(|e| e.logged("fence", "signal"))?;
        self.last_signaled.store(value, Ordering::Release);
        Ok(())
    }

    /// Block until the fence reaches `value`.
    pub fn wait(&self, value: u64) -> GraphicsResult<()> {
        crate::profile_scope!("fence_wait");
        if self.raw.completed_value() >= value {
            return Ok(());
        }
        self.raw.wait(value).map_err(|e| e.logged("fence", "wait"))
    }

    /// Value reached so far. Never blocks.
    pub fn completed_value(&self) -> u64 {
        self.raw.completed_value()
    }

    /// Highest value passed to [`Fence::signal`] (or the initial value).
    pub fn last_signaled_value(&self) -> u64 {
        self.last_signaled.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence")
            .field("completed", &self.completed_value())
            .field("last_signaled", &self.last_signaled_value())
            .finish()
    }
}

static_assertions::assert_impl_all!(Fence: Send, Sync);
