//! Pipeline state resource.

use super::{DeviceId, TrackedResource};
use crate::backend::GpuPipeline;
use crate::types::{BindingSlot, PipelineStateDescriptor};

/// A graphics or compute pipeline state object together with its binding
/// layout (root signature on Direct3D 12, pipeline layout on Vulkan).
pub struct PipelineState {
    device_id: DeviceId,
    descriptor: PipelineStateDescriptor,
    raw: GpuPipeline,
    _tracked: TrackedResource,
}

impl PipelineState {
    pub(crate) fn new(
        device_id: DeviceId,
        descriptor: PipelineStateDescriptor,
        raw: GpuPipeline,
        tracked: TrackedResource,
    ) -> Self {
        Self {
            device_id,
            descriptor,
            raw,
            _tracked: tracked,
        }
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn descriptor(&self) -> &PipelineStateDescriptor {
        &self.descriptor
    }

    pub fn is_compute(&self) -> bool {
        self.descriptor.is_compute()
    }

    /// Binding slot `index`, if the layout has one.
    pub fn binding(&self, index: u32) -> Option<&BindingSlot> {
        self.descriptor.bindings.get(index as usize)
    }

    pub(crate) fn raw(&self) -> &GpuPipeline {
        &self.raw
    }
}

impl std::fmt::Debug for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineState")
            .field("label", &self.descriptor.label)
            .field("compute", &self.is_compute())
            .field("bindings", &self.descriptor.bindings.len())
            .finish()
    }
}

static_assertions::assert_impl_all!(PipelineState: Send, Sync);
