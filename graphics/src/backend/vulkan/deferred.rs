//! Deferred destruction of Vulkan objects.
//!
//! Submissions execute asynchronously, so a resource dropped on the CPU may
//! still be referenced by work in flight. Every queue submission signals the
//! backend's timeline semaphore with a new serial. Dropped objects are queued
//! together with the last serial submitted at the time of the drop and are
//! destroyed once the timeline has reached it. Their memory goes back to
//! the allocator at the same time.
//!
//! ```text
//!  drop(buffer)           serial 7 submitted      timeline reaches 7
//!       │                        │                        │
//!       ▼                        ▼                        ▼
//!  queue (7, Buffer)  ───────────────────────────► vkDestroyBuffer
//! ```

use ash::vk;
use gpu_allocator::vulkan::Allocator;
use parking_lot::Mutex;

use super::memory::MemoryBlock;
use crate::backend::serial_queue::SerialQueue;

/// A Vulkan object waiting for the GPU to finish with it.
#[derive(Debug)]
pub(super) enum DeferredResource {
    Buffer {
        buffer: vk::Buffer,
        memory: MemoryBlock,
    },
    /// `image` is null for swap chain images, which the swap chain owns.
    Image {
        image: vk::Image,
        views: Vec<vk::ImageView>,
        memory: Option<MemoryBlock>,
    },
    Pipeline {
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
        set_layout: vk::DescriptorSetLayout,
        samplers: Vec<vk::Sampler>,
    },
    CommandPool {
        pool: vk::CommandPool,
        descriptor_pools: Vec<vk::DescriptorPool>,
    },
    Semaphore(vk::Semaphore),
}

impl DeferredResource {
    /// # Safety
    ///
    /// The GPU must be done with the object.
    pub(super) unsafe fn destroy(self, device: &ash::Device, allocator: &Mutex<Allocator>) {
        unsafe {
            match self {
                Self::Buffer { buffer, memory } => {
                    device.destroy_buffer(buffer, None);
                    memory.free(allocator);
                }
                Self::Image {
                    image,
                    views,
                    memory,
                } => {
                    for view in views {
                        device.destroy_image_view(view, None);
                    }
                    if image != vk::Image::null() {
                        device.destroy_image(image, None);
                    }
                    if let Some(memory) = memory {
                        memory.free(allocator);
                    }
                }
                Self::Pipeline {
                    pipeline,
                    layout,
                    set_layout,
                    samplers,
                } => {
                    device.destroy_pipeline(pipeline, None);
                    device.destroy_pipeline_layout(layout, None);
                    device.destroy_descriptor_set_layout(set_layout, None);
                    for sampler in samplers {
                        device.destroy_sampler(sampler, None);
                    }
                }
                Self::CommandPool {
                    pool,
                    descriptor_pools,
                } => {
                    device.destroy_command_pool(pool, None);
                    for pool in descriptor_pools {
                        device.destroy_descriptor_pool(pool, None);
                    }
                }
                Self::Semaphore(semaphore) => device.destroy_semaphore(semaphore, None),
            }
        }
    }
}

/// Thread-safe destruction queue keyed by submission serial.
#[derive(Debug, Default)]
pub(super) struct DeferredDestructor {
    queue: Mutex<SerialQueue<DeferredResource>>,
}

impl DeferredDestructor {
    /// Queue `resource` until submission `serial` has completed.
    pub fn queue(&self, serial: u64, resource: DeferredResource) {
        self.queue.lock().push(serial, resource);
    }

    /// Destroy everything whose serial is at most `completed`.
    ///
    /// # Safety
    ///
    /// `completed` must be a serial the GPU has actually finished.
    pub unsafe fn retire(
        &self,
        device: &ash::Device,
        allocator: &Mutex<Allocator>,
        completed: u64,
    ) {
        let ready = self.queue.lock().drain_completed(completed);
        if !ready.is_empty() {
            log::trace!(
                "Destroying {} deferred Vulkan objects (serial {})",
                ready.len(),
                completed
            );
        }
        for resource in ready {
            unsafe { resource.destroy(device, allocator) };
        }
    }

    /// Destroy everything.
    ///
    /// # Safety
    ///
    /// The device must be idle.
    pub unsafe fn flush_all(&self, device: &ash::Device, allocator: &Mutex<Allocator>) {
        let all = self.queue.lock().drain_all();
        for resource in all {
            unsafe { resource.destroy(device, allocator) };
        }
    }

    pub fn pending_count(&self) -> usize {
        self.queue.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_destructor() {
        let destructor = DeferredDestructor::default();
        assert_eq!(destructor.pending_count(), 0);
    }
}
