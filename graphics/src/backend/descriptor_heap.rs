//! Fixed-capacity descriptor slot allocation.
//!
//! The Direct3D 12 backend pre-allocates one heap per descriptor kind at
//! device start-up; the reference backend applies the same capacities so the
//! overflow behaviour can be tested without a GPU. Slots are recycled through
//! a free list and exhaustion fails the creation that needed the slot.

use crate::error::{GraphicsError, GraphicsResult};
use crate::types::DescriptorHeapCapacities;

/// Kind of descriptor heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapKind {
    RenderTarget,
    DepthStencil,
    /// Constant buffer, shader resource and unordered access views.
    ShaderResource,
    Sampler,
}

impl DescriptorHeapKind {
    /// Capacity of this kind in `capacities`.
    pub fn capacity(self, capacities: &DescriptorHeapCapacities) -> u32 {
        match self {
            Self::RenderTarget => capacities.render_target,
            Self::DepthStencil => capacities.depth_stencil,
            Self::ShaderResource => capacities.shader_resource,
            Self::Sampler => capacities.sampler,
        }
    }
}

/// Free-list allocator over `capacity` descriptor slots.
#[derive(Debug)]
pub struct DescriptorAllocator {
    kind: DescriptorHeapKind,
    capacity: u32,
    next: u32,
    free: Vec<u32>,
}

impl DescriptorAllocator {
    /// Create an allocator for `capacity` slots.
    pub fn new(kind: DescriptorHeapKind, capacity: u32) -> Self {
        Self {
            kind,
            capacity,
            next: 0,
            free: Vec::new(),
        }
    }

    /// Reserve a slot.
    pub fn allocate(&mut self) -> GraphicsResult<u32> {
        if let Some(index) = self.free.pop() {
            return Ok(index);
        }
        if self.next >= self.capacity {
            return Err(GraphicsError::ResourceCreation(format!(
                "{:?} descriptor heap exhausted (capacity {})",
                self.kind, self.capacity
            )));
        }
        let index = self.next;
        self.next += 1;
        Ok(index)
    }

    /// Return a slot to the free list.
    pub fn free(&mut self, index: u32) {
        debug_assert!(index < self.next, "freeing unallocated descriptor slot");
        self.free.push(index);
    }

    /// Number of slots currently allocated.
    pub fn in_use(&self) -> u32 {
        self.next - self.free.len() as u32
    }

    /// Total number of slots.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

/// One allocator per descriptor kind, sized from [`DescriptorHeapCapacities`].
#[derive(Debug)]
pub struct DescriptorHeaps {
    render_target: DescriptorAllocator,
    depth_stencil: DescriptorAllocator,
    shader_resource: DescriptorAllocator,
    sampler: DescriptorAllocator,
}

impl DescriptorHeaps {
    pub fn new(capacities: &DescriptorHeapCapacities) -> Self {
        let make =
            |kind: DescriptorHeapKind| DescriptorAllocator::new(kind, kind.capacity(capacities));
        Self {
            render_target: make(DescriptorHeapKind::RenderTarget),
            depth_stencil: make(DescriptorHeapKind::DepthStencil),
            shader_resource: make(DescriptorHeapKind::ShaderResource),
            sampler: make(DescriptorHeapKind::Sampler),
        }
    }

    pub fn get_mut(&mut self, kind: DescriptorHeapKind) -> &mut DescriptorAllocator {
        match kind {
            DescriptorHeapKind::RenderTarget => &mut self.render_target,
            DescriptorHeapKind::DepthStencil => &mut self.depth_stencil,
            DescriptorHeapKind::ShaderResource => &mut self.shader_resource,
            DescriptorHeapKind::Sampler => &mut self.sampler,
        }
    }

    pub fn get(&self, kind: DescriptorHeapKind) -> &DescriptorAllocator {
        match kind {
            DescriptorHeapKind::RenderTarget => &self.render_target,
            DescriptorHeapKind::DepthStencil => &self.depth_stencil,
            DescriptorHeapKind::ShaderResource => &self.shader_resource,
            DescriptorHeapKind::Sampler => &self.sampler,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocates_sequential_slots() {
        let mut heap = DescriptorAllocator::new(DescriptorHeapKind::RenderTarget, 4);
        assert_eq!(heap.allocate().unwrap(), 0);
        assert_eq!(heap.allocate().unwrap(), 1);
        assert_eq!(heap.in_use(), 2);
    }

    #[test]
    fn test_exhaustion_is_resource_creation_error() {
        let mut heap = DescriptorAllocator::new(DescriptorHeapKind::DepthStencil, 1);
        heap.allocate().unwrap();
        assert!(matches!(
            heap.allocate(),
            Err(GraphicsError::ResourceCreation(_))
        ));
    }

    #[test]
    fn test_freed_slots_are_reused() {
        let mut heap = DescriptorAllocator::new(DescriptorHeapKind::Sampler, 2);
        let a = heap.allocate().unwrap();
        let _b = heap.allocate().unwrap();
        heap.free(a);
        assert_eq!(heap.allocate().unwrap(), a);
        assert!(heap.allocate().is_err());
    }

    #[test]
    fn test_heaps_are_independent() {
        let caps = DescriptorHeapCapacities {
            render_target: 1,
            depth_stencil: 1,
            shader_resource: 2,
            sampler: 1,
        };
        let mut heaps = DescriptorHeaps::new(&caps);
        assert!(heaps.get_mut(DescriptorHeapKind::RenderTarget).allocate().is_ok());
        assert!(heaps.get_mut(DescriptorHeapKind::RenderTarget).allocate().is_err());
        assert!(heaps.get_mut(DescriptorHeapKind::DepthStencil).allocate().is_ok());
        assert_eq!(heaps.get(DescriptorHeapKind::ShaderResource).in_use(), 0);
    }
}
