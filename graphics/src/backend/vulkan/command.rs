//! Command recording into a Vulkan command buffer.
//!
//! Each list owns a command pool with one primary command buffer and a
//! growing set of descriptor pools, all reset together by [`reset`].
//! Rendering with dynamic rendering begins lazily at the first draw after
//! the render targets change and ends before anything that may not run
//! inside it: barriers, copies, clears and dispatches.
//!
//! [`reset`]: VulkanCommandList::reset

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ash::vk;

use super::barriers::BarrierBatch;
use super::layout::state_access;
use super::resources::copy_regions;
use super::deferred::DeferredResource;
use super::{VulkanBackend, VulkanTexture, vk_error};
use super::conversion::index_type;
use crate::error::{GraphicsError, GraphicsResult};
use crate::resources::{Buffer, PipelineState, Texture};
use crate::types::{ClearColor, IndexFormat, ResourceState, ScissorRect, Viewport};

/// Largest range bound as a uniform buffer; the minimum every device supports.
const MAX_UNIFORM_RANGE: u64 = 16384;

const DESCRIPTOR_POOL_SETS: u32 = 256;
const DESCRIPTOR_POOL_SIZES: [vk::DescriptorPoolSize; 3] = [
    vk::DescriptorPoolSize {
        ty: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: 1024,
    },
    vk::DescriptorPoolSize {
        ty: vk::DescriptorType::SAMPLED_IMAGE,
        descriptor_count: 1024,
    },
    vk::DescriptorPoolSize {
        ty: vk::DescriptorType::SAMPLER,
        descriptor_count: 256,
    },
];

fn vulkan_texture(texture: &Texture) -> GraphicsResult<&VulkanTexture> {
    texture.raw().as_vulkan()
}

fn missing_view(kind: &str) -> GraphicsError {
    GraphicsError::State(format!("texture has no {kind} view"))
}

#[derive(Debug, Clone, Copy)]
enum BoundResource {
    UniformBuffer { buffer: vk::Buffer, range: u64 },
    SampledImage(vk::ImageView),
}

struct BoundPipeline {
    layout: vk::PipelineLayout,
    set_layout: vk::DescriptorSetLayout,
    bind_point: vk::PipelineBindPoint,
    stages: vk::ShaderStageFlags,
    needs_descriptor_set: bool,
    slot_strides: Vec<(u32, u32)>,
}

impl BoundPipeline {
    fn slot_stride(&self, slot: u32) -> u32 {
        self.slot_strides
            .iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, stride)| *stride)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy)]
struct DepthTarget {
    view: vk::ImageView,
    stencil: bool,
}

/// A Vulkan command buffer plus the state needed to emulate the binding
/// model on top of it.
pub struct VulkanCommandList {
    backend: Arc<VulkanBackend>,
    pool: vk::CommandPool,
    cmd: vk::CommandBuffer,
    descriptor_pools: Vec<vk::DescriptorPool>,
    current_descriptor_pool: usize,
    barriers: BarrierBatch,
    /// Serial of the last submission containing this list.
    last_serial: AtomicU64,
    /// Whether the command buffer holds a finished recording.
    executable: bool,

    pipeline: Option<BoundPipeline>,
    bindings: Vec<Option<BoundResource>>,
    bindings_dirty: bool,
    vertex_buffers: Vec<Option<(vk::Buffer, u32)>>,
    vertex_buffers_dirty: bool,

    color_targets: Vec<vk::ImageView>,
    depth_target: Option<DepthTarget>,
    render_extent: vk::Extent2D,
    render_layers: u32,
    rendering: bool,
}

impl VulkanCommandList {
    pub(super) fn new(backend: &Arc<VulkanBackend>) -> GraphicsResult<Self> {
        let device = backend.device();
        let pool_info =
            vk::CommandPoolCreateInfo::default().queue_family_index(backend.queue_family);
        let pool = unsafe { device.create_command_pool(&pool_info, None) }
            .map_err(|e| vk_error("vkCreateCommandPool", e))?;

        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = match unsafe { device.allocate_command_buffers(&allocate_info) } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                unsafe { device.destroy_command_pool(pool, None) };
                return Err(vk_error("vkAllocateCommandBuffers", e));
            }
        };

        Ok(Self {
            backend: Arc::clone(backend),
            pool,
            cmd,
            descriptor_pools: Vec::new(),
            current_descriptor_pool: 0,
            barriers: BarrierBatch::default(),
            last_serial: AtomicU64::new(0),
            executable: false,
            pipeline: None,
            bindings: Vec::new(),
            bindings_dirty: false,
            vertex_buffers: Vec::new(),
            vertex_buffers_dirty: false,
            color_targets: Vec::new(),
            depth_target: None,
            render_extent: vk::Extent2D::default(),
            render_layers: 1,
            rendering: false,
        })
    }

    fn device(&self) -> &ash::Device {
        self.backend.device()
    }

    pub(super) fn command_buffer(&self) -> vk::CommandBuffer {
        self.cmd
    }

    /// Whether the command buffer has been recorded and closed at least once.
    pub(super) fn is_executable(&self) -> bool {
        self.executable
    }

    pub(super) fn mark_submitted(&self, serial: u64) {
        self.last_serial.store(serial, Ordering::Release);
    }

    pub fn is_in_flight(&self) -> bool {
        let last = self.last_serial.load(Ordering::Acquire);
        last > 0 && self.backend.completed_serial() < last
    }

    pub fn reset(&mut self) -> GraphicsResult<()> {
        let device = self.backend.device();
        unsafe {
            device
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())
                .map_err(|e| vk_error("vkResetCommandPool", e))?;
            for pool in &self.descriptor_pools {
                device
                    .reset_descriptor_pool(*pool, vk::DescriptorPoolResetFlags::empty())
                    .map_err(|e| vk_error("vkResetDescriptorPool", e))?;
            }
            // Closed lists may be submitted again once their last submission
            // has completed.
            let begin_info = vk::CommandBufferBeginInfo::default();
            device
                .begin_command_buffer(self.cmd, &begin_info)
                .map_err(|e| vk_error("vkBeginCommandBuffer", e))?;
        }
        self.executable = false;
        self.current_descriptor_pool = 0;
        self.barriers.clear();
        self.pipeline = None;
        self.bindings.clear();
        self.bindings_dirty = false;
        self.vertex_buffers.clear();
        self.vertex_buffers_dirty = false;
        self.color_targets.clear();
        self.depth_target = None;
        self.rendering = false;
        Ok(())
    }

    pub fn close(&mut self) -> GraphicsResult<()> {
        self.end_rendering();
        self.barriers.flush(self.backend.device(), self.cmd);

        // Make every write visible to the host, for read-back after a fence wait.
        let memory_barrier = [vk::MemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::HOST)
            .dst_access_mask(vk::AccessFlags2::HOST_READ)];
        let dependency = vk::DependencyInfo::default().memory_barriers(&memory_barrier);
        unsafe {
            self.device().cmd_pipeline_barrier2(self.cmd, &dependency);
            self.device()
                .end_command_buffer(self.cmd)
                .map_err(|e| vk_error("vkEndCommandBuffer", e))?;
        }
        self.executable = true;
        Ok(())
    }

    fn end_rendering(&mut self) {
        if self.rendering {
            unsafe { self.backend.device().cmd_end_rendering(self.cmd) };
            self.rendering = false;
        }
    }

    /// End rendering if needed and record the pending barriers.
    fn flush_barriers(&mut self) {
        if !self.barriers.is_empty() {
            self.end_rendering();
            self.barriers.flush(self.backend.device(), self.cmd);
        }
    }

    pub fn transition_buffer(
        &mut self,
        buffer: &Buffer,
        before: ResourceState,
        after: ResourceState,
    ) -> GraphicsResult<()> {
        let raw = buffer.raw().as_vulkan()?;
        self.barriers
            .add_buffer_barrier(raw.raw(), state_access(before), state_access(after));
        Ok(())
    }

    pub fn transition_texture(
        &mut self,
        texture: &Texture,
        before: ResourceState,
        after: ResourceState,
    ) -> GraphicsResult<()> {
        let raw = vulkan_texture(texture)?;
        match (raw.image(), raw.staging_buffer()) {
            (Some(image), _) => {
                self.barriers.add_image_barrier(
                    image,
                    raw.aspect(),
                    state_access(before),
                    state_access(after),
                );
            }
            (None, Some(buffer)) => {
                self.barriers
                    .add_buffer_barrier(buffer, state_access(before), state_access(after));
            }
            (None, None) => {}
        }
        Ok(())
    }

    pub fn set_pipeline_state(&mut self, pipeline: &PipelineState) -> GraphicsResult<()> {
        let raw = pipeline.raw().as_vulkan()?;
        unsafe { self.device().cmd_bind_pipeline(self.cmd, raw.bind_point(), raw.raw()) };
        let slot_count = pipeline.descriptor().bindings.len();
        self.pipeline = Some(BoundPipeline {
            layout: raw.layout(),
            set_layout: raw.set_layout(),
            bind_point: raw.bind_point(),
            stages: raw.stages(),
            needs_descriptor_set: raw.needs_descriptor_set(),
            slot_strides: pipeline
                .descriptor()
                .slot_strides()
                .into_iter()
                .map(|(slot, stride, _)| (slot, stride))
                .collect(),
        });
        // A new layout starts with nothing bound.
        self.bindings = vec![None; slot_count];
        self.bindings_dirty = true;
        self.vertex_buffers_dirty = true;
        Ok(())
    }

    pub fn set_vertex_buffers(
        &mut self,
        start_slot: u32,
        buffers: &[&Buffer],
    ) -> GraphicsResult<()> {
        for (i, buffer) in buffers.iter().enumerate() {
            let slot = start_slot as usize + i;
            if self.vertex_buffers.len() <= slot {
                self.vertex_buffers.resize(slot + 1, None);
            }
            let raw = buffer.raw().as_vulkan()?;
            self.vertex_buffers[slot] = Some((raw.raw(), buffer.descriptor().stride));
        }
        self.vertex_buffers_dirty = true;
        Ok(())
    }

    pub fn set_index_buffer(&mut self, buffer: &Buffer, format: IndexFormat) -> GraphicsResult<()> {
        let raw = buffer.raw().as_vulkan()?;
        unsafe {
            self.device()
                .cmd_bind_index_buffer(self.cmd, raw.raw(), 0, index_type(format))
        };
        Ok(())
    }

    fn bound_pipeline(&self) -> GraphicsResult<&BoundPipeline> {
        self.pipeline
            .as_ref()
            .ok_or_else(|| GraphicsError::State("no pipeline state bound".to_string()))
    }

    pub fn set_root_constants(&mut self, _index: u32, values: &[u32]) -> GraphicsResult<()> {
        let pipeline = self.bound_pipeline()?;
        unsafe {
            self.device().cmd_push_constants(
                self.cmd,
                pipeline.layout,
                pipeline.stages,
                0,
                bytemuck::cast_slice(values),
            )
        };
        Ok(())
    }

    fn bind(&mut self, index: u32, resource: BoundResource) -> GraphicsResult<()> {
        let slot = self
            .bindings
            .get_mut(index as usize)
            .ok_or_else(|| GraphicsError::State(format!("binding slot {index} out of range")))?;
        *slot = Some(resource);
        self.bindings_dirty = true;
        Ok(())
    }

    pub fn set_constant_buffer(&mut self, index: u32, buffer: &Buffer) -> GraphicsResult<()> {
        let raw = buffer.raw().as_vulkan()?;
        self.bind(
            index,
            BoundResource::UniformBuffer {
                buffer: raw.raw(),
                range: buffer.size().min(MAX_UNIFORM_RANGE),
            },
        )
    }

    pub fn set_shader_resource(&mut self, index: u32, texture: &Texture) -> GraphicsResult<()> {
        let view = vulkan_texture(texture)?
            .sampled_view()
            .ok_or_else(|| missing_view("shader resource"))?;
        self.bind(index, BoundResource::SampledImage(view))
    }

    fn allocate_descriptor_set(
        &mut self,
        layout: vk::DescriptorSetLayout,
    ) -> GraphicsResult<vk::DescriptorSet> {
        loop {
            let fresh = self.current_descriptor_pool == self.descriptor_pools.len();
            if fresh {
                let pool_info = vk::DescriptorPoolCreateInfo::default()
                    .max_sets(DESCRIPTOR_POOL_SETS)
                    .pool_sizes(&DESCRIPTOR_POOL_SIZES);
                let pool = unsafe { self.device().create_descriptor_pool(&pool_info, None) }
                    .map_err(|e| vk_error("vkCreateDescriptorPool", e))?;
                self.descriptor_pools.push(pool);
            }
            let layouts = [layout];
            let allocate_info = vk::DescriptorSetAllocateInfo::default()
                .descriptor_pool(self.descriptor_pools[self.current_descriptor_pool])
                .set_layouts(&layouts);
            match unsafe { self.device().allocate_descriptor_sets(&allocate_info) } {
                Ok(sets) => return Ok(sets[0]),
                Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL)
                    if !fresh =>
                {
                    self.current_descriptor_pool += 1;
                }
                Err(e) => return Err(vk_error("vkAllocateDescriptorSets", e)),
            }
        }
    }

    /// Write and bind a descriptor set for the current bindings.
    fn flush_bindings(&mut self) -> GraphicsResult<()> {
        let Some(pipeline) = &self.pipeline else {
            return Ok(());
        };
        if !self.bindings_dirty || !pipeline.needs_descriptor_set {
            return Ok(());
        }
        let (layout, set_layout, bind_point) =
            (pipeline.layout, pipeline.set_layout, pipeline.bind_point);
        let set = self.allocate_descriptor_set(set_layout)?;

        let mut buffer_infos = Vec::new();
        let mut image_infos = Vec::new();
        for (binding, resource) in self.bindings.iter().enumerate() {
            match resource {
                Some(BoundResource::UniformBuffer { buffer, range }) => buffer_infos.push((
                    binding as u32,
                    [vk::DescriptorBufferInfo {
                        buffer: *buffer,
                        offset: 0,
                        range: *range,
                    }],
                )),
                Some(BoundResource::SampledImage(view)) => image_infos.push((
                    binding as u32,
                    [vk::DescriptorImageInfo {
                        sampler: vk::Sampler::null(),
                        image_view: *view,
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    }],
                )),
                None => {}
            }
        }
        let writes: Vec<vk::WriteDescriptorSet<'_>> = buffer_infos
            .iter()
            .map(|(binding, info)| {
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(*binding)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(info)
            })
            .chain(image_infos.iter().map(|(binding, info)| {
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(*binding)
                    .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                    .image_info(info)
            }))
            .collect();

        let device = self.backend.device();
        unsafe {
            device.update_descriptor_sets(&writes, &[]);
            device.cmd_bind_descriptor_sets(self.cmd, bind_point, layout, 0, &[set], &[]);
        }
        self.bindings_dirty = false;
        Ok(())
    }

    fn flush_vertex_buffers(&mut self) {
        if !self.vertex_buffers_dirty {
            return;
        }
        let device = self.backend.device();
        for (slot, bound) in self.vertex_buffers.iter().enumerate() {
            let Some((buffer, stride)) = *bound else {
                continue;
            };
            let stride = match stride {
                0 => self.pipeline.as_ref().map_or(0, |p| p.slot_stride(slot as u32)),
                stride => stride,
            };
            unsafe {
                device.cmd_bind_vertex_buffers2(
                    self.cmd,
                    slot as u32,
                    &[buffer],
                    &[0],
                    None,
                    Some(&[stride as u64]),
                )
            };
        }
        self.vertex_buffers_dirty = false;
    }

    fn begin_rendering(&mut self) -> GraphicsResult<()> {
        if self.rendering {
            return Ok(());
        }
        if self.color_targets.is_empty() && self.depth_target.is_none() {
            return Err(GraphicsError::State("no render targets bound".to_string()));
        }
        let color_attachments: Vec<vk::RenderingAttachmentInfo<'_>> = self
            .color_targets
            .iter()
            .map(|view| {
                vk::RenderingAttachmentInfo::default()
                    .image_view(*view)
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(vk::AttachmentLoadOp::LOAD)
                    .store_op(vk::AttachmentStoreOp::STORE)
            })
            .collect();
        let depth_attachment = self.depth_target.map(|target| {
            vk::RenderingAttachmentInfo::default()
                .image_view(target.view)
                .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::LOAD)
                .store_op(vk::AttachmentStoreOp::STORE)
        });

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: self.render_extent,
            })
            .layer_count(self.render_layers)
            .color_attachments(&color_attachments);
        if let (Some(attachment), Some(target)) = (&depth_attachment, self.depth_target) {
            rendering_info = rendering_info.depth_attachment(attachment);
            if target.stencil {
                rendering_info = rendering_info.stencil_attachment(attachment);
            }
        }
        unsafe { self.backend.device().cmd_begin_rendering(self.cmd, &rendering_info) };
        self.rendering = true;
        Ok(())
    }

    fn prepare_draw(&mut self) -> GraphicsResult<()> {
        self.flush_barriers();
        self.flush_bindings()?;
        self.flush_vertex_buffers();
        self.begin_rendering()
    }

    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> GraphicsResult<()> {
        self.prepare_draw()?;
        unsafe {
            self.device()
                .cmd_draw(self.cmd, vertex_count, instance_count, first_vertex, first_instance)
        };
        Ok(())
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) -> GraphicsResult<()> {
        self.prepare_draw()?;
        unsafe {
            self.device().cmd_draw_indexed(
                self.cmd,
                index_count,
                instance_count,
                first_index,
                base_vertex,
                first_instance,
            )
        };
        Ok(())
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> GraphicsResult<()> {
        self.end_rendering();
        self.barriers.flush(self.backend.device(), self.cmd);
        self.flush_bindings()?;
        unsafe { self.device().cmd_dispatch(self.cmd, x, y, z) };
        Ok(())
    }

    /// Record work outside of any rendering scope, after pending barriers.
    fn outside_rendering(&mut self) -> &ash::Device {
        self.end_rendering();
        self.barriers.flush(self.backend.device(), self.cmd);
        self.backend.device()
    }

    pub fn copy_texture(&mut self, src: &Texture, dst: &Texture) -> GraphicsResult<()> {
        let (src_raw, dst_raw) = (vulkan_texture(src)?, vulkan_texture(dst)?);
        let descriptor = src_raw.descriptor();
        let aspect = src_raw.aspect();
        let cmd = self.cmd;
        let buffer_copies_supported = !descriptor.format.has_stencil();

        match (
            (src_raw.image(), src_raw.staging_buffer()),
            (dst_raw.image(), dst_raw.staging_buffer()),
        ) {
            ((Some(src_image), _), (Some(dst_image), _)) => {
                let layers = descriptor.layer_count();
                let regions: Vec<vk::ImageCopy> = (0..descriptor.mip_levels)
                    .map(|mip| {
                        let extent = descriptor.extent().mip_level(mip);
                        let subresource = vk::ImageSubresourceLayers {
                            aspect_mask: aspect,
                            mip_level: mip,
                            base_array_layer: 0,
                            layer_count: layers,
                        };
                        vk::ImageCopy {
                            src_subresource: subresource,
                            src_offset: vk::Offset3D::default(),
                            dst_subresource: subresource,
                            dst_offset: vk::Offset3D::default(),
                            extent: vk::Extent3D {
                                width: extent.width,
                                height: extent.height,
                                depth: extent.depth,
                            },
                        }
                    })
                    .collect();
                let device = self.outside_rendering();
                unsafe {
                    device.cmd_copy_image(
                        cmd,
                        src_image,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        dst_image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &regions,
                    )
                };
            }
            ((Some(src_image), _), (None, Some(dst_buffer))) if buffer_copies_supported => {
                let regions = copy_regions(descriptor, aspect);
                let device = self.outside_rendering();
                unsafe {
                    device.cmd_copy_image_to_buffer(
                        cmd,
                        src_image,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        dst_buffer,
                        &regions,
                    )
                };
            }
            ((None, Some(src_buffer)), (Some(dst_image), _)) if buffer_copies_supported => {
                let regions = copy_regions(dst_raw.descriptor(), dst_raw.aspect());
                let device = self.outside_rendering();
                unsafe {
                    device.cmd_copy_buffer_to_image(
                        cmd,
                        src_buffer,
                        dst_image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &regions,
                    )
                };
            }
            ((None, Some(src_buffer)), (None, Some(dst_buffer))) => {
                let region = vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size: descriptor.size_in_bytes(),
                };
                let device = self.outside_rendering();
                unsafe { device.cmd_copy_buffer(cmd, src_buffer, dst_buffer, &[region]) };
            }
            _ => {
                return Err(GraphicsError::UnsupportedOperation(format!(
                    "copy between {:?} textures through a staging texture",
                    descriptor.format
                )));
            }
        }
        Ok(())
    }

    pub fn copy_buffer(
        &mut self,
        src: &Buffer,
        src_offset: u64,
        dst: &Buffer,
        dst_offset: u64,
        size: u64,
    ) -> GraphicsResult<()> {
        let (src, dst) = (src.raw().as_vulkan()?.raw(), dst.raw().as_vulkan()?.raw());
        let region = vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        };
        let cmd = self.cmd;
        let device = self.outside_rendering();
        unsafe { device.cmd_copy_buffer(cmd, src, dst, &[region]) };
        Ok(())
    }

    /// Run a rendering scope that only clears `attachment`.
    fn clear_pass(
        &mut self,
        texture: &VulkanTexture,
        attachment: vk::RenderingAttachmentInfo<'_>,
        depth: bool,
    ) {
        let descriptor = texture.descriptor();
        let render_area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: vk::Extent2D {
                width: descriptor.width,
                height: descriptor.height,
            },
        };
        let attachments = [attachment];
        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(render_area)
            .layer_count(descriptor.layer_count());
        rendering_info = if depth {
            let info = rendering_info.depth_attachment(&attachments[0]);
            if descriptor.format.has_stencil() {
                info.stencil_attachment(&attachments[0])
            } else {
                info
            }
        } else {
            rendering_info.color_attachments(&attachments)
        };
        let cmd = self.cmd;
        let device = self.outside_rendering();
        unsafe {
            device.cmd_begin_rendering(cmd, &rendering_info);
            device.cmd_end_rendering(cmd);
        }
    }

    pub fn clear_render_target(
        &mut self,
        texture: &Texture,
        color: ClearColor,
    ) -> GraphicsResult<()> {
        let raw = vulkan_texture(texture)?;
        let view = raw
            .attachment_view()
            .ok_or_else(|| missing_view("render target"))?;
        let attachment = vk::RenderingAttachmentInfo::default()
            .image_view(view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: color.to_array(),
                },
            });
        self.clear_pass(raw, attachment, false);
        Ok(())
    }

    pub fn clear_depth_stencil(
        &mut self,
        texture: &Texture,
        depth: f32,
        stencil: u8,
    ) -> GraphicsResult<()> {
        let raw = vulkan_texture(texture)?;
        let view = raw
            .attachment_view()
            .ok_or_else(|| missing_view("depth/stencil"))?;
        let attachment = vk::RenderingAttachmentInfo::default()
            .image_view(view)
            .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth,
                    stencil: stencil as u32,
                },
            });
        self.clear_pass(raw, attachment, true);
        Ok(())
    }

    pub fn set_render_targets(
        &mut self,
        render_targets: &[&Texture],
        depth_stencil: Option<&Texture>,
    ) -> GraphicsResult<()> {
        self.end_rendering();

        let mut extent: Option<vk::Extent2D> = None;
        let mut layers = u32::MAX;
        let mut track = |raw: &VulkanTexture| {
            let d = raw.descriptor();
            let current = extent.get_or_insert(vk::Extent2D {
                width: d.width,
                height: d.height,
            });
            current.width = current.width.min(d.width);
            current.height = current.height.min(d.height);
            layers = layers.min(d.layer_count());
        };

        let mut color_targets = Vec::with_capacity(render_targets.len());
        for target in render_targets {
            let raw = vulkan_texture(target)?;
            color_targets.push(
                raw.attachment_view()
                    .ok_or_else(|| missing_view("render target"))?,
            );
            track(raw);
        }
        let depth_target = match depth_stencil {
            Some(texture) => {
                let raw = vulkan_texture(texture)?;
                track(raw);
                Some(DepthTarget {
                    view: raw
                        .attachment_view()
                        .ok_or_else(|| missing_view("depth/stencil"))?,
                    stencil: raw.descriptor().format.has_stencil(),
                })
            }
            None => None,
        };

        self.color_targets = color_targets;
        self.depth_target = depth_target;
        self.render_extent = extent.unwrap_or_default();
        self.render_layers = if layers == u32::MAX { 1 } else { layers };
        Ok(())
    }

    pub fn set_viewports(&mut self, viewports: &[Viewport]) -> GraphicsResult<()> {
        let viewports: Vec<vk::Viewport> = viewports
            .iter()
            .map(|v| vk::Viewport {
                x: v.x,
                y: v.y,
                width: v.width,
                height: v.height,
                min_depth: v.min_depth,
                max_depth: v.max_depth,
            })
            .collect();
        unsafe { self.device().cmd_set_viewport_with_count(self.cmd, &viewports) };
        Ok(())
    }

    pub fn set_scissor_rects(&mut self, rects: &[ScissorRect]) -> GraphicsResult<()> {
        let rects: Vec<vk::Rect2D> = rects
            .iter()
            .map(|r| vk::Rect2D {
                offset: vk::Offset2D { x: r.x, y: r.y },
                extent: vk::Extent2D {
                    width: r.width,
                    height: r.height,
                },
            })
            .collect();
        unsafe { self.device().cmd_set_scissor_with_count(self.cmd, &rects) };
        Ok(())
    }
}

impl Drop for VulkanCommandList {
    fn drop(&mut self) {
        self.backend.defer(DeferredResource::CommandPool {
            pool: self.pool,
            descriptor_pools: std::mem::take(&mut self.descriptor_pools),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_pool_covers_every_slot_kind() {
        let kinds: Vec<vk::DescriptorType> =
            DESCRIPTOR_POOL_SIZES.iter().map(|size| size.ty).collect();
        assert!(kinds.contains(&vk::DescriptorType::UNIFORM_BUFFER));
        assert!(kinds.contains(&vk::DescriptorType::SAMPLED_IMAGE));
        assert!(kinds.contains(&vk::DescriptorType::SAMPLER));
    }

    #[test]
    fn test_bound_pipeline_stride_lookup() {
        let pipeline = BoundPipeline {
            layout: vk::PipelineLayout::null(),
            set_layout: vk::DescriptorSetLayout::null(),
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            stages: vk::ShaderStageFlags::VERTEX,
            needs_descriptor_set: false,
            slot_strides: vec![(0, 28), (2, 8)],
        };
        assert_eq!(pipeline.slot_stride(0), 28);
        assert_eq!(pipeline.slot_stride(2), 8);
        assert_eq!(pipeline.slot_stride(1), 0);
    }
}
