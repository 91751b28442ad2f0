//! Device memory allocation through gpu-allocator.
//!
//! Buffers and images are sub-allocated from large blocks, so the number of
//! live resources is not bounded by `maxMemoryAllocationCount`. Host-visible
//! allocations are persistently mapped by the allocator.

use std::ptr::NonNull;

use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use parking_lot::Mutex;

use crate::backend::MappedPtr;
use crate::error::{GraphicsError, GraphicsResult};

/// Create the memory allocator for a logical device.
pub(super) fn create_allocator(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: &ash::Device,
) -> GraphicsResult<Allocator> {
    Allocator::new(&AllocatorCreateDesc {
        instance: instance.clone(),
        device: device.clone(),
        physical_device,
        debug_settings: Default::default(),
        buffer_device_address: false,
        allocation_sizes: gpu_allocator::AllocationSizes::default(),
    })
    .map_err(|e| GraphicsError::Initialization(format!("failed to create memory allocator: {e}")))
}

/// Check that `type_bits` selects at least one memory type of the device.
pub(super) fn validate_type_bits(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
) -> GraphicsResult<()> {
    let available = properties
        .memory_types_as_slice()
        .iter()
        .enumerate()
        .any(|(index, _)| type_bits & (1 << index) != 0);
    if !available {
        return Err(GraphicsError::ResourceCreation(format!(
            "memory type bits {type_bits:#b} match none of the {} device memory types",
            properties.memory_type_count
        )));
    }
    Ok(())
}

/// Where an allocation should live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum MemoryLocation {
    /// Device-local, not mapped.
    Device,
    /// Host-visible and coherent, persistently mapped. Cached memory is
    /// preferred for read-back.
    Host { readback: bool },
}

impl MemoryLocation {
    fn allocator_location(self) -> gpu_allocator::MemoryLocation {
        match self {
            Self::Device => gpu_allocator::MemoryLocation::GpuOnly,
            Self::Host { readback: false } => gpu_allocator::MemoryLocation::CpuToGpu,
            Self::Host { readback: true } => gpu_allocator::MemoryLocation::GpuToCpu,
        }
    }
}

/// A sub-allocation owned by one buffer or image.
#[derive(Debug)]
pub(super) struct MemoryBlock {
    allocation: Allocation,
}

impl MemoryBlock {
    /// Allocate memory for a resource. `linear` is false for optimally
    /// tiled images.
    pub(super) fn allocate(
        allocator: &Mutex<Allocator>,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> GraphicsResult<Self> {
        let allocation = allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: location.allocator_location(),
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                GraphicsError::ResourceCreation(format!(
                    "allocating {} bytes for {name}: {e}",
                    requirements.size
                ))
            })?;
        Ok(Self { allocation })
    }

    pub(super) fn memory(&self) -> vk::DeviceMemory {
        // SAFETY: the block stays alive while the resource bound to it does.
        unsafe { self.allocation.memory() }
    }

    pub(super) fn offset(&self) -> u64 {
        self.allocation.offset()
    }

    pub(super) fn mapped(&self) -> Option<MappedPtr> {
        self.allocation
            .mapped_ptr()
            .map(|ptr| MappedPtr(NonNull::cast::<u8>(ptr)))
    }

    /// Return the memory to the allocator.
    ///
    /// # Safety
    ///
    /// The GPU must no longer use the memory.
    pub(super) unsafe fn free(self, allocator: &Mutex<Allocator>) {
        if let Err(e) = allocator.lock().free(self.allocation) {
            log::error!("VulkanBackend: freeing an allocation failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            memory_heap_count: 1,
            ..Default::default()
        };
        for (i, flags) in types.iter().enumerate() {
            properties.memory_types[i] = vk::MemoryType {
                property_flags: *flags,
                heap_index: 0,
            };
        }
        properties
    }

    #[test]
    fn test_type_bits_within_device_types_are_valid() {
        let props = properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        assert_eq!(validate_type_bits(&props, 0b10), Ok(()));
        assert_eq!(validate_type_bits(&props, 0b111), Ok(()));
    }

    #[test]
    fn test_type_bits_outside_device_types_are_rejected() {
        let props = properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        assert!(matches!(
            validate_type_bits(&props, 0b100),
            Err(GraphicsError::ResourceCreation(_))
        ));
        assert!(validate_type_bits(&props, 0).is_err());
    }

    #[test]
    fn test_locations_map_to_allocator_locations() {
        assert_eq!(
            MemoryLocation::Device.allocator_location(),
            gpu_allocator::MemoryLocation::GpuOnly
        );
        assert_eq!(
            MemoryLocation::Host { readback: false }.allocator_location(),
            gpu_allocator::MemoryLocation::CpuToGpu
        );
        assert_eq!(
            MemoryLocation::Host { readback: true }.allocator_location(),
            gpu_allocator::MemoryLocation::GpuToCpu
        );
    }
}
