//! GPU resources.
//!
//! This module contains the resource types created by [`GraphicsDevice`]:
//! - [`Buffer`] - GPU memory buffer
//! - [`Texture`] - GPU texture/image
//! - [`Shader`] - compiled shader stage
//! - [`PipelineState`] - pipeline state object with its binding layout
//! - [`Fence`] - monotonic CPU/GPU synchronization counter
//!
//! Handles are unique (not `Clone`) and record the [`DeviceId`] of the device
//! that created them. The native object behind a handle keeps its backend
//! context alive, so dropping a handle after its device is fine: the object is
//! released through the backend's deferred destruction queue.
//!
//! [`GraphicsDevice`]: crate::GraphicsDevice

mod buffer;
mod fence;
mod pipeline;
mod shader;
mod texture;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

pub use buffer::{Buffer, BufferMapping};
pub use fence::Fence;
pub use pipeline::PipelineState;
pub use shader::Shader;
pub use texture::{Texture, TextureMapping};

use crate::types::ResourceState;

/// Identifier of a [`GraphicsDevice`](crate::GraphicsDevice), unique per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(u64);

impl DeviceId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "device#{}", self.0)
    }
}

/// Tracked state of a buffer or texture. Command lists keep a clone so they
/// can roll back transitions of a recording that is never submitted.
#[derive(Debug, Clone)]
pub(crate) struct StateCell(Arc<Mutex<ResourceState>>);

impl StateCell {
    pub(crate) fn new(state: ResourceState) -> Self {
        Self(Arc::new(Mutex::new(state)))
    }

    pub(crate) fn get(&self) -> ResourceState {
        *self.0.lock()
    }

    pub(crate) fn set(&self, state: ResourceState) {
        *self.0.lock() = state;
    }

    /// Whether both cells belong to the same resource.
    pub(crate) fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Kinds of resources counted by [`ResourceStatistics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResourceKind {
    Buffer,
    Texture,
    Shader,
    Pipeline,
    CommandList,
    Fence,
}

/// Live resource counters shared by a device and its handles.
#[derive(Debug, Default)]
pub(crate) struct ResourceTracker {
    buffers: AtomicUsize,
    textures: AtomicUsize,
    shaders: AtomicUsize,
    pipelines: AtomicUsize,
    command_lists: AtomicUsize,
    fences: AtomicUsize,
}

impl ResourceTracker {
    fn counter(&self, kind: ResourceKind) -> &AtomicUsize {
        match kind {
            ResourceKind::Buffer => &self.buffers,
            ResourceKind::Texture => &self.textures,
            ResourceKind::Shader => &self.shaders,
            ResourceKind::Pipeline => &self.pipelines,
            ResourceKind::CommandList => &self.command_lists,
            ResourceKind::Fence => &self.fences,
        }
    }

    /// Count a new resource until the returned guard drops.
    pub(crate) fn track(self: &Arc<Self>, kind: ResourceKind) -> TrackedResource {
        self.counter(kind).fetch_add(1, Ordering::Relaxed);
        TrackedResource {
            tracker: Arc::clone(self),
            kind,
        }
    }

    pub(crate) fn snapshot(&self, submissions: u64) -> ResourceStatistics {
        let load = |kind| self.counter(kind).load(Ordering::Relaxed);
        ResourceStatistics {
            buffers: load(ResourceKind::Buffer),
            textures: load(ResourceKind::Texture),
            shaders: load(ResourceKind::Shader),
            pipelines: load(ResourceKind::Pipeline),
            command_lists: load(ResourceKind::CommandList),
            fences: load(ResourceKind::Fence),
            submissions,
        }
    }
}

/// Decrements its kind's counter on drop.
#[derive(Debug)]
pub(crate) struct TrackedResource {
    tracker: Arc<ResourceTracker>,
    kind: ResourceKind,
}

impl Drop for TrackedResource {
    fn drop(&mut self) {
        self.tracker.counter(self.kind).fetch_sub(1, Ordering::Relaxed);
    }
}

/// Live resource counts of a device.
///
/// Swap chain back buffers count as textures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceStatistics {
    pub buffers: usize,
    pub textures: usize,
    pub shaders: usize,
    pub pipelines: usize,
    pub command_lists: usize,
    pub fences: usize,
    /// Queue submissions so far, internal uploads included.
    pub submissions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_cell_clones_share_state() {
        let cell = StateCell::new(ResourceState::Common);
        let clone = cell.clone();
        clone.set(ResourceState::CopyDest);
        assert_eq!(cell.get(), ResourceState::CopyDest);
        assert!(cell.same(&clone));
        assert!(!cell.same(&StateCell::new(ResourceState::CopyDest)));
    }

    #[test]
    fn test_device_ids_are_unique() {
        let a = DeviceId::next();
        let b = DeviceId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tracker_counts_live_guards() {
        let tracker = Arc::new(ResourceTracker::default());
        let a = tracker.track(ResourceKind::Buffer);
        let _b = tracker.track(ResourceKind::Buffer);
        let _c = tracker.track(ResourceKind::Fence);
        assert_eq!(tracker.snapshot(0).buffers, 2);
        drop(a);
        let stats = tracker.snapshot(7);
        assert_eq!((stats.buffers, stats.fences, stats.submissions), (1, 1, 7));
    }
}
