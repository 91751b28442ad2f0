//! GPU buffer resource.

use std::ops::{Deref, DerefMut};

use super::{DeviceId, StateCell, TrackedResource};
use crate::backend::GpuBuffer;
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::{BufferDescriptor, ResourceState, ResourceUsage};

/// A GPU buffer resource.
///
/// Buffers are created by [`GraphicsDevice::create_buffer`](crate::GraphicsDevice::create_buffer).
/// The buffer tracks its current [`ResourceState`]; command lists record the
/// barriers needed to move it between states.
///
/// # Example
///
/// ```ignore
/// let mut buffer = device.create_buffer(&BufferDescriptor::constants(256), None)?;
/// let mut mapping = buffer.map()?;
/// mapping[..4].copy_from_slice(&1.0f32.to_le_bytes());
/// mapping.unmap();
/// ```
pub struct Buffer {
    device_id: DeviceId,
    descriptor: BufferDescriptor,
    state: StateCell,
    raw: GpuBuffer,
    _tracked: TrackedResource,
}

impl Buffer {
    pub(crate) fn new(
        device_id: DeviceId,
        descriptor: BufferDescriptor,
        state: ResourceState,
        raw: GpuBuffer,
        tracked: TrackedResource,
    ) -> Self {
        Self {
            device_id,
            descriptor,
            state: StateCell::new(state),
            raw,
            _tracked: tracked,
        }
    }

    /// Id of the device that created this buffer.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Get the buffer descriptor.
    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    /// Get the buffer size in bytes.
    pub fn size(&self) -> u64 {
        self.descriptor.size
    }

    /// Get the buffer label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// State as of the last recorded transition.
    pub fn state(&self) -> ResourceState {
        self.state.get()
    }

    pub(crate) fn set_state(&self, state: ResourceState) {
        self.state.set(state);
    }

    pub(crate) fn state_cell(&self) -> &StateCell {
        &self.state
    }

    pub(crate) fn raw(&self) -> &GpuBuffer {
        &self.raw
    }

    /// Map a host-visible (`Dynamic` or `Staging`) buffer.
    ///
    /// The mapping is persistent underneath; the returned guard only scopes
    /// CPU access. The caller must make sure the GPU is not using the range
    /// being written, e.g. by waiting on a fence.
    pub fn map(&mut self) -> GraphicsResult<BufferMapping<'_>> {
        let ptr = self.raw.mapped_ptr().ok_or_else(|| {
            GraphicsError::State(format!(
                "{:?} buffer {:?} is not host visible",
                self.descriptor.usage, self.descriptor.label
            ))
            .logged("buffer", "map")
        })?;
        let len = self.descriptor.size as usize;
        Ok(BufferMapping {
            // SAFETY: the mapping spans the whole buffer and lives as long as
            // the backend allocation, which outlives `self`. `&mut self`
            // prevents a second mapping from aliasing this one.
            bytes: unsafe { std::slice::from_raw_parts_mut(ptr.0.as_ptr(), len) },
        })
    }

    /// Write `data` at `offset`.
    ///
    /// Host-visible buffers are written through their mapping. Device-local
    /// buffers are updated with a staging copy submitted to the queue, which
    /// also orders the write after previously submitted work.
    pub fn update_data(&self, offset: u64, data: &[u8]) -> GraphicsResult<()> {
        crate::profile_scope!("buffer_update_data");
        let fail = |e: GraphicsError| e.logged("buffer", "update_data");

        if self.descriptor.usage == ResourceUsage::Immutable {
            return Err(fail(GraphicsError::State(format!(
                "immutable buffer {:?} cannot be updated",
                self.descriptor.label
            ))));
        }
        let end = offset.checked_add(data.len() as u64);
        if end.is_none_or(|end| end > self.descriptor.size) {
            return Err(fail(GraphicsError::State(format!(
                "update of {} bytes at offset {} exceeds buffer size {}",
                data.len(),
                offset,
                self.descriptor.size
            ))));
        }
        if data.is_empty() {
            return Ok(());
        }
        self.raw.update(offset, data, self.state()).map_err(fail)
    }
}

/// CPU view of a mapped buffer. Dereferences to the buffer's bytes.
pub struct BufferMapping<'a> {
    bytes: &'a mut [u8],
}

impl BufferMapping<'_> {
    /// End CPU access. Equivalent to dropping the mapping.
    pub fn unmap(self) {}
}

impl Deref for BufferMapping<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.bytes
    }
}

impl DerefMut for BufferMapping<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.bytes
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("size", &self.descriptor.size)
            .field("usage", &self.descriptor.usage)
            .field("state", &self.state())
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Buffer: Send, Sync);
