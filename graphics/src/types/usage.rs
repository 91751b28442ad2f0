//! Usage classes and bind flags shared by buffers and textures.

use bitflags::bitflags;

/// How a resource is accessed over its lifetime. Drives memory selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceUsage {
    /// Device-local, GPU read/write. Initial data goes through a staging upload.
    #[default]
    Default,
    /// Device-local and never written again after creation. Initial data is required.
    Immutable,
    /// Host-visible and coherent, written by the CPU every frame.
    Dynamic,
    /// Host-visible copy source/destination used for uploads and read-back.
    Staging,
}

impl ResourceUsage {
    /// Whether resources of this usage live in host-visible memory.
    pub fn is_host_visible(self) -> bool {
        matches!(self, Self::Dynamic | Self::Staging)
    }
}

bitflags! {
    /// Pipeline stages a resource may be bound to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BindFlags: u32 {
        const VERTEX_BUFFER = 1 << 0;
        const INDEX_BUFFER = 1 << 1;
        const CONSTANT_BUFFER = 1 << 2;
        const SHADER_RESOURCE = 1 << 3;
        const UNORDERED_ACCESS = 1 << 4;
        const STREAM_OUTPUT = 1 << 5;
        const INDIRECT_ARGUMENT = 1 << 6;
        const RENDER_TARGET = 1 << 7;
        const DEPTH_STENCIL = 1 << 8;
    }
}

bitflags! {
    /// CPU access requested for a host-visible resource.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CpuAccessFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}
