//! Compiled shader resource.

use super::{DeviceId, TrackedResource};
use crate::backend::GpuShader;
use crate::types::{ShaderDescriptor, ShaderStage};

/// A shader compiled for the device's backend.
///
/// Pipeline creation compiles the descriptors it references itself, so a
/// `Shader` is mainly useful to validate source early and report diagnostics.
pub struct Shader {
    device_id: DeviceId,
    descriptor: ShaderDescriptor,
    _raw: GpuShader,
    _tracked: TrackedResource,
}

impl Shader {
    pub(crate) fn new(
        device_id: DeviceId,
        descriptor: ShaderDescriptor,
        raw: GpuShader,
        tracked: TrackedResource,
    ) -> Self {
        Self {
            device_id,
            descriptor,
            _raw: raw,
            _tracked: tracked,
        }
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn descriptor(&self) -> &ShaderDescriptor {
        &self.descriptor
    }

    pub fn stage(&self) -> ShaderStage {
        self.descriptor.stage
    }

    pub fn entry_point(&self) -> &str {
        &self.descriptor.entry_point
    }
}

impl std::fmt::Debug for Shader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shader")
            .field("stage", &self.descriptor.stage)
            .field("entry_point", &self.descriptor.entry_point)
            .finish()
    }
}

static_assertions::assert_impl_all!(Shader: Send, Sync);
