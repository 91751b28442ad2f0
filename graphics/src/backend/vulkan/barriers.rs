//! Barrier batching.
//!
//! Transitions requested while recording are collected here and written as a
//! single `vkCmdPipelineBarrier2` right before the next command that touches
//! resources: a draw, dispatch, copy or clear, and when the list is closed.

use std::collections::HashMap;

use ash::vk;
use ash::vk::Handle;

use super::layout::StateAccess;

#[derive(Debug, Clone, Copy)]
struct PendingImageBarrier {
    image: vk::Image,
    aspect_mask: vk::ImageAspectFlags,
    src: StateAccess,
    dst: StateAccess,
}

#[derive(Debug, Clone, Copy)]
struct PendingBufferBarrier {
    buffer: vk::Buffer,
    src: StateAccess,
    dst: StateAccess,
}

/// Pending image and buffer barriers, keyed by native handle.
///
/// Two transitions of the same resource within one batch merge into one
/// barrier from the first source scope to the last destination scope.
#[derive(Debug, Default)]
pub(super) struct BarrierBatch {
    images: HashMap<u64, PendingImageBarrier>,
    buffers: HashMap<u64, PendingBufferBarrier>,
}

impl BarrierBatch {
    pub fn add_image_barrier(
        &mut self,
        image: vk::Image,
        aspect_mask: vk::ImageAspectFlags,
        src: StateAccess,
        dst: StateAccess,
    ) {
        self.images
            .entry(image.as_raw())
            .and_modify(|pending| pending.dst = dst)
            .or_insert(PendingImageBarrier {
                image,
                aspect_mask,
                src,
                dst,
            });
    }

    pub fn add_buffer_barrier(&mut self, buffer: vk::Buffer, src: StateAccess, dst: StateAccess) {
        self.buffers
            .entry(buffer.as_raw())
            .and_modify(|pending| pending.dst = dst)
            .or_insert(PendingBufferBarrier { buffer, src, dst });
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.buffers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.images.len() + self.buffers.len()
    }

    pub fn clear(&mut self) {
        self.images.clear();
        self.buffers.clear();
    }

    /// Record every pending barrier into `cmd` and empty the batch.
    pub fn flush(&mut self, device: &ash::Device, cmd: vk::CommandBuffer) {
        if self.is_empty() {
            return;
        }

        let image_barriers: Vec<vk::ImageMemoryBarrier2<'static>> = self
            .images
            .values()
            // Merged round trips (A -> B -> A) still need the execution
            // dependency, so only identical layouts with no writes are dropped.
            .filter(|b| {
                b.src.layout != b.dst.layout
                    || !b.src.access.is_empty()
                    || !b.dst.access.is_empty()
            })
            .map(|b| {
                vk::ImageMemoryBarrier2::default()
                    .src_stage_mask(b.src.stages)
                    .src_access_mask(b.src.access)
                    .dst_stage_mask(b.dst.stages)
                    .dst_access_mask(b.dst.access)
                    .old_layout(b.src.layout)
                    .new_layout(b.dst.layout)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(b.image)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: b.aspect_mask,
                        base_mip_level: 0,
                        level_count: vk::REMAINING_MIP_LEVELS,
                        base_array_layer: 0,
                        layer_count: vk::REMAINING_ARRAY_LAYERS,
                    })
            })
            .collect();

        let buffer_barriers: Vec<vk::BufferMemoryBarrier2<'static>> = self
            .buffers
            .values()
            .map(|b| {
                vk::BufferMemoryBarrier2::default()
                    .src_stage_mask(b.src.stages)
                    .src_access_mask(b.src.access)
                    .dst_stage_mask(b.dst.stages)
                    .dst_access_mask(b.dst.access)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .buffer(b.buffer)
                    .offset(0)
                    .size(vk::WHOLE_SIZE)
            })
            .collect();

        let dependency = vk::DependencyInfo::default()
            .image_memory_barriers(&image_barriers)
            .buffer_memory_barriers(&buffer_barriers);
        unsafe { device.cmd_pipeline_barrier2(cmd, &dependency) };
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::vulkan::layout::state_access;
    use crate::types::ResourceState;

    #[test]
    fn test_barrier_batch_empty() {
        let batch = BarrierBatch::default();
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);
    }

    #[test]
    fn test_same_image_merges() {
        let mut batch = BarrierBatch::default();
        let image = vk::Image::from_raw(12345);
        let color = vk::ImageAspectFlags::COLOR;

        batch.add_image_barrier(
            image,
            color,
            StateAccess::UNDEFINED,
            state_access(ResourceState::RenderTarget),
        );
        batch.add_image_barrier(
            image,
            color,
            state_access(ResourceState::RenderTarget),
            state_access(ResourceState::ShaderResource),
        );

        assert_eq!(batch.len(), 1);
        let merged = batch.images[&12345];
        assert_eq!(merged.src.layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(merged.dst.layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn test_images_and_buffers_counted_separately() {
        let mut batch = BarrierBatch::default();
        batch.add_image_barrier(
            vk::Image::from_raw(1),
            vk::ImageAspectFlags::COLOR,
            state_access(ResourceState::CopyDest),
            state_access(ResourceState::ShaderResource),
        );
        batch.add_buffer_barrier(
            vk::Buffer::from_raw(1),
            state_access(ResourceState::CopyDest),
            state_access(ResourceState::VertexBuffer),
        );
        assert_eq!(batch.len(), 2);

        batch.clear();
        assert!(batch.is_empty());
    }
}
