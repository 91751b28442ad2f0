//! Buffer descriptors.

use super::{BindFlags, CpuAccessFlags, ResourceUsage};

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferDescriptor {
    /// Debug label for the buffer.
    pub label: Option<String>,
    /// Size in bytes. Must be greater than zero.
    pub size: u64,
    /// Element stride in bytes. Only used for vertex buffers.
    pub stride: u32,
    /// Usage class.
    pub usage: ResourceUsage,
    /// Pipeline bindings the buffer may be used for.
    pub bind_flags: BindFlags,
    /// CPU access for host-visible buffers.
    pub cpu_access: CpuAccessFlags,
}

impl BufferDescriptor {
    /// Create a new buffer descriptor.
    pub fn new(size: u64, usage: ResourceUsage, bind_flags: BindFlags) -> Self {
        let cpu_access = match usage {
            ResourceUsage::Dynamic => CpuAccessFlags::WRITE,
            ResourceUsage::Staging => CpuAccessFlags::READ | CpuAccessFlags::WRITE,
            ResourceUsage::Default | ResourceUsage::Immutable => CpuAccessFlags::empty(),
        };
        Self {
            label: None,
            size,
            stride: 0,
            usage,
            bind_flags,
            cpu_access,
        }
    }

    /// Vertex buffer with the given element stride.
    pub fn vertex(size: u64, stride: u32, usage: ResourceUsage) -> Self {
        Self::new(size, usage, BindFlags::VERTEX_BUFFER).with_stride(stride)
    }

    /// Index buffer.
    pub fn index(size: u64, usage: ResourceUsage) -> Self {
        Self::new(size, usage, BindFlags::INDEX_BUFFER)
    }

    /// Dynamic constant buffer.
    pub fn constants(size: u64) -> Self {
        Self::new(size, ResourceUsage::Dynamic, BindFlags::CONSTANT_BUFFER)
    }

    /// Staging buffer for uploads and read-back.
    pub fn staging(size: u64) -> Self {
        Self::new(size, ResourceUsage::Staging, BindFlags::empty())
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the element stride.
    pub fn with_stride(mut self, stride: u32) -> Self {
        self.stride = stride;
        self
    }

    /// Set the CPU access flags.
    pub fn with_cpu_access(mut self, cpu_access: CpuAccessFlags) -> Self {
        self.cpu_access = cpu_access;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_descriptor_cpu_access_follows_usage() {
        let desc = BufferDescriptor::constants(256);
        assert_eq!(desc.cpu_access, CpuAccessFlags::WRITE);

        let desc = BufferDescriptor::staging(256);
        assert!(desc.cpu_access.contains(CpuAccessFlags::READ));

        let desc = BufferDescriptor::index(64, ResourceUsage::Immutable);
        assert!(desc.cpu_access.is_empty());
    }

    #[test]
    fn test_vertex_descriptor_stride() {
        let desc = BufferDescriptor::vertex(36, 12, ResourceUsage::Default).with_label("tri");
        assert_eq!(desc.stride, 12);
        assert_eq!(desc.label.as_deref(), Some("tri"));
        assert!(desc.bind_flags.contains(BindFlags::VERTEX_BUFFER));
    }
}
