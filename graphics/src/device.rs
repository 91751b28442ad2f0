//! Graphics device.
//!
//! The [`GraphicsDevice`] is the main interface for creating GPU resources,
//! submitting command lists and presenting. It is created by
//! [`create_device`](crate::factory::create_device).

use std::sync::Arc;

use crate::backend::GpuBackend;
use crate::command_list::{CommandList, CommandListState};
use crate::error::{GraphicsError, GraphicsResult};
use crate::resources::{
    Buffer, DeviceId, Fence, PipelineState, ResourceKind, ResourceStatistics, ResourceTracker,
    Shader, StateCell, Texture,
};
use crate::swapchain::SwapChain;
use crate::types::{
    AdapterInfo, BindFlags, BindingSlot, BufferDescriptor, GraphicsApi, MAX_RENDER_TARGETS,
    PipelineStateDescriptor, ResourceState, ResourceUsage, ShaderDescriptor, ShaderStage,
    SwapChainDescriptor, TextureDimension, TextureDescriptor,
};

const COMPONENT: &str = "device";

/// Maximum number of inline 32-bit constants in a pipeline's constants slot.
pub const MAX_ROOT_CONSTANTS: u32 = 64;

/// A graphics device: one adapter, one queue, the resources created on it and
/// an optional primary swap chain.
///
/// # Thread Safety
///
/// `GraphicsDevice` is `Send + Sync`. Resource creation takes `&self`;
/// presenting and resizing the primary swap chain take `&mut self`.
///
/// # Example
///
/// ```ignore
/// let device = create_device(&DeviceCreationParams::new(GraphicsApi::Vulkan))?;
///
/// let buffer = device.create_buffer(&BufferDescriptor::constants(256), None)?;
/// let texture = device.create_texture(
///     &TextureDescriptor::render_target(1920, 1080, TextureFormat::Rgba8Unorm),
///     None,
/// )?;
/// ```
pub struct GraphicsDevice {
    id: DeviceId,
    name: String,
    backend: GpuBackend,
    swap_chain: Option<SwapChain>,
    tracker: Arc<ResourceTracker>,
}

fn fail(operation: &str) -> impl Fn(GraphicsError) -> GraphicsError + '_ {
    move |e| e.logged(COMPONENT, operation)
}

fn invalid(message: String) -> GraphicsError {
    GraphicsError::ResourceCreation(message)
}

impl GraphicsDevice {
    /// Wrap an initialized backend, creating the primary swap chain if
    /// `primary` is given.
    pub(crate) fn new(
        backend: GpuBackend,
        primary: Option<&SwapChainDescriptor>,
    ) -> GraphicsResult<Self> {
        let adapter = backend.adapter_info();
        let mut device = Self {
            id: DeviceId::next(),
            name: adapter.name,
            backend,
            swap_chain: None,
            tracker: Arc::new(ResourceTracker::default()),
        };
        if let Some(descriptor) = primary {
            device.swap_chain = Some(device.create_swap_chain(descriptor)?);
        }
        log::info!(
            "GraphicsDevice: {} on '{}' ({})",
            device.api(),
            device.name,
            device.id
        );
        Ok(device)
    }

    /// Unique id of this device.
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Adapter name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Native API behind this device.
    pub fn api(&self) -> GraphicsApi {
        self.backend.api()
    }

    pub fn adapter_info(&self) -> AdapterInfo {
        self.backend.adapter_info()
    }

    /// Live resource counts and the number of queue submissions so far.
    pub fn statistics(&self) -> ResourceStatistics {
        self.tracker.snapshot(self.backend.submission_count())
    }

    /// Backend of this device, for backend-specific inspection.
    pub fn backend(&self) -> &GpuBackend {
        &self.backend
    }

    /// Create a GPU buffer, optionally with initial contents.
    ///
    /// `Dynamic` and `Staging` buffers are host visible and written directly.
    /// Other buffers are device local; their initial data is uploaded through a
    /// transient staging buffer after which the buffer is left in the state its
    /// bind flags suggest.
    ///
    /// # Errors
    ///
    /// [`GraphicsError::ResourceCreation`] for a zero size, initial data larger
    /// than the buffer, an `Immutable` buffer without data, or a native
    /// allocation failure.
    pub fn create_buffer(
        &self,
        descriptor: &BufferDescriptor,
        data: Option<&[u8]>,
    ) -> GraphicsResult<Buffer> {
        crate::profile_scope!("create_buffer");
        let fail = fail("create_buffer");

        if descriptor.size == 0 {
            return Err(fail(invalid("buffer size cannot be zero".to_string())));
        }
        if descriptor.usage == ResourceUsage::Immutable && data.is_none() {
            return Err(fail(invalid("immutable buffers require initial data".to_string())));
        }
        if let Some(data) = data
            && (data.is_empty() || data.len() as u64 > descriptor.size)
        {
            return Err(fail(invalid(format!(
                "initial data of {} bytes does not fit a {} byte buffer",
                data.len(),
                descriptor.size
            ))));
        }
        if descriptor.bind_flags.intersects(BindFlags::RENDER_TARGET | BindFlags::DEPTH_STENCIL) {
            return Err(fail(invalid(format!(
                "buffers cannot be bound as {:?}",
                descriptor.bind_flags & (BindFlags::RENDER_TARGET | BindFlags::DEPTH_STENCIL)
            ))));
        }

        let raw = self.backend.create_buffer(descriptor, data).map_err(&fail)?;
        let state = ResourceState::initial(descriptor.usage, descriptor.bind_flags, data.is_some());
        log::trace!(
            "GraphicsDevice: created buffer {:?}, size={}",
            descriptor.label,
            descriptor.size
        );
        Ok(Buffer::new(
            self.id,
            descriptor.clone(),
            state,
            raw,
            self.tracker.track(ResourceKind::Buffer),
        ))
    }

    fn validate_texture(descriptor: &TextureDescriptor, data: Option<&[u8]>) -> GraphicsResult<()> {
        let d = descriptor;
        if d.width == 0 || d.height == 0 || d.depth == 0 {
            return Err(invalid(format!(
                "texture dimensions {}x{}x{} cannot be zero",
                d.width, d.height, d.depth
            )));
        }
        if d.mip_levels == 0 || d.array_size == 0 || d.sample_count == 0 {
            return Err(invalid(
                "mip levels, array size and sample count must be at least 1".to_string(),
            ));
        }
        let depth = if d.dimension == TextureDimension::D3 { d.depth } else { 1 };
        let largest = d.width.max(d.height).max(depth);
        let max_mips = u32::BITS - largest.leading_zeros();
        if d.mip_levels > max_mips {
            return Err(invalid(format!(
                "{} mip levels exceed the {max_mips} possible for {}x{}",
                d.mip_levels, d.width, d.height
            )));
        }
        match d.dimension {
            TextureDimension::D1 if d.height != 1 || d.depth != 1 => {
                return Err(invalid("1D textures must have height and depth 1".to_string()));
            }
            TextureDimension::D2 | TextureDimension::Cube if d.depth != 1 => {
                return Err(invalid("2D and cube textures must have depth 1".to_string()));
            }
            TextureDimension::Cube if d.width != d.height => {
                return Err(invalid("cube faces must be square".to_string()));
            }
            TextureDimension::D3 if d.array_size != 1 => {
                return Err(invalid("3D textures cannot be arrays".to_string()));
            }
            TextureDimension::D3
                if d.bind_flags.intersects(BindFlags::RENDER_TARGET | BindFlags::DEPTH_STENCIL) =>
            {
                return Err(invalid(
                    "3D textures cannot be bound as render or depth targets".to_string(),
                ));
            }
            _ => {}
        }
        if d.format.is_depth_stencil() && d.bind_flags.contains(BindFlags::RENDER_TARGET) {
            return Err(invalid(format!("{:?} cannot be a color render target", d.format)));
        }
        if d.bind_flags.contains(BindFlags::DEPTH_STENCIL) && !d.format.is_depth_stencil() {
            return Err(invalid(format!("{:?} is not a depth/stencil format", d.format)));
        }
        if d.usage == ResourceUsage::Staging {
            if d.mip_levels != 1 || d.layer_count() != 1 || d.dimension == TextureDimension::D3 {
                return Err(invalid(
                    "staging textures are limited to one 2D mip level and one array slice"
                        .to_string(),
                ));
            }
            if d.bind_flags.intersects(BindFlags::RENDER_TARGET | BindFlags::DEPTH_STENCIL) {
                return Err(invalid("staging textures cannot be bound as targets".to_string()));
            }
        }
        match data {
            None if d.usage == ResourceUsage::Immutable => {
                Err(invalid("immutable textures require initial data".to_string()))
            }
            Some(data) if data.len() as u64 != d.size_in_bytes() => Err(invalid(format!(
                "initial data of {} bytes does not match the {} bytes of every subresource",
                data.len(),
                d.size_in_bytes()
            ))),
            _ => Ok(()),
        }
    }

    /// Create a GPU texture, optionally with initial contents.
    ///
    /// Initial data covers every subresource, tightly packed, ordered by array
    /// layer and then by mip level, exactly [`TextureDescriptor::size_in_bytes`]
    /// long.
    pub fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
        data: Option<&[u8]>,
    ) -> GraphicsResult<Texture> {
        crate::profile_scope!("create_texture");
        let fail = fail("create_texture");
        Self::validate_texture(descriptor, data).map_err(&fail)?;

        let raw = self.backend.create_texture(descriptor, data).map_err(&fail)?;
        let state = ResourceState::initial(descriptor.usage, descriptor.bind_flags, data.is_some());
        log::trace!(
            "GraphicsDevice: created texture {:?}, size={}x{}",
            descriptor.label,
            descriptor.width,
            descriptor.height
        );
        Ok(Texture::new(
            self.id,
            descriptor.clone(),
            state,
            raw,
            self.tracker.track(ResourceKind::Texture),
        ))
    }

    /// Compile a shader.
    ///
    /// # Errors
    ///
    /// [`GraphicsError::Compilation`] carrying the compiler diagnostic.
    pub fn create_shader(&self, descriptor: &ShaderDescriptor) -> GraphicsResult<Shader> {
        crate::profile_scope!("create_shader");
        let raw = self
            .backend
            .create_shader(descriptor)
            .map_err(fail("create_shader"))?;
        Ok(Shader::new(
            self.id,
            descriptor.clone(),
            raw,
            self.tracker.track(ResourceKind::Shader),
        ))
    }

    fn validate_pipeline(descriptor: &PipelineStateDescriptor) -> GraphicsResult<()> {
        let stage_matches = |shader: &Option<ShaderDescriptor>, stage: ShaderStage| {
            shader.as_ref().is_none_or(|s| s.stage == stage)
        };
        if !stage_matches(&descriptor.vertex_shader, ShaderStage::Vertex)
            || !stage_matches(&descriptor.pixel_shader, ShaderStage::Pixel)
            || !stage_matches(&descriptor.compute_shader, ShaderStage::Compute)
        {
            return Err(invalid(
                "shader descriptor stage does not match its pipeline slot".to_string(),
            ));
        }

        if descriptor.is_compute() {
            if descriptor.vertex_shader.is_some() || descriptor.pixel_shader.is_some() {
                return Err(invalid("compute pipelines cannot have graphics shaders".to_string()));
            }
        } else {
            if descriptor.vertex_shader.is_none() {
                return Err(invalid("graphics pipelines require a vertex shader".to_string()));
            }
            let count = descriptor.render_target_formats.len();
            if count == 0 || count > MAX_RENDER_TARGETS {
                return Err(invalid(format!(
                    "graphics pipelines need 1..={MAX_RENDER_TARGETS} render target formats, \
                     got {count}"
                )));
            }
            if let Some(format) = descriptor
                .render_target_formats
                .iter()
                .find(|f| f.is_depth_stencil())
            {
                return Err(invalid(format!("{format:?} is not a color format")));
            }
            if let Some(format) = descriptor.depth_format
                && !format.is_depth_stencil()
            {
                return Err(invalid(format!("{format:?} is not a depth format")));
            }
            if descriptor.sample_count == 0 {
                return Err(invalid("sample count must be at least 1".to_string()));
            }
        }

        let mut constants = descriptor.bindings.iter().filter_map(|slot| match slot {
            BindingSlot::Constants { num_values } => Some(*num_values),
            _ => None,
        });
        if let Some(num_values) = constants.next()
            && (num_values == 0 || num_values > MAX_ROOT_CONSTANTS)
        {
            return Err(invalid(format!(
                "constants slot needs 1..={MAX_ROOT_CONSTANTS} values, got {num_values}"
            )));
        }
        if constants.next().is_some() {
            return Err(invalid("at most one constants slot is allowed".to_string()));
        }
        Ok(())
    }

    /// Create a pipeline state object and its binding layout.
    ///
    /// The shaders referenced by the descriptor are compiled as part of this
    /// call.
    pub fn create_pipeline_state(
        &self,
        descriptor: &PipelineStateDescriptor,
    ) -> GraphicsResult<PipelineState> {
        crate::profile_scope!("create_pipeline_state");
        let fail = fail("create_pipeline_state");
        Self::validate_pipeline(descriptor).map_err(&fail)?;
        let raw = self.backend.create_pipeline(descriptor).map_err(&fail)?;
        log::trace!("GraphicsDevice: created pipeline {:?}", descriptor.label);
        Ok(PipelineState::new(
            self.id,
            descriptor.clone(),
            raw,
            self.tracker.track(ResourceKind::Pipeline),
        ))
    }

    /// Create a command list in the Closed state.
    pub fn create_command_list(&self) -> GraphicsResult<CommandList> {
        let raw = self
            .backend
            .create_command_list()
            .map_err(fail("create_command_list"))?;
        Ok(CommandList::new(
            self.id,
            None,
            raw,
            self.tracker.track(ResourceKind::CommandList),
        ))
    }

    /// Create a fence starting at `initial_value`.
    pub fn create_fence(&self, initial_value: u64) -> GraphicsResult<Fence> {
        let raw = self
            .backend
            .create_fence(initial_value)
            .map_err(fail("create_fence"))?;
        Ok(Fence::new(
            self.id,
            initial_value,
            raw,
            self.tracker.track(ResourceKind::Fence),
        ))
    }

    /// Create an additional swap chain.
    pub fn create_swap_chain(&self, descriptor: &SwapChainDescriptor) -> GraphicsResult<SwapChain> {
        let fail = fail("create_swap_chain");
        if descriptor.width == 0 || descriptor.height == 0 {
            return Err(fail(invalid(format!(
                "swap chain size {}x{} is empty",
                descriptor.width, descriptor.height
            ))));
        }
        let raw = self.backend.create_swap_chain(descriptor).map_err(&fail)?;
        SwapChain::new(self.id, descriptor, raw, Arc::clone(&self.tracker)).map_err(&fail)
    }

    fn check_owner(&self, owner: DeviceId, operation: &str) -> GraphicsResult<()> {
        if owner != self.id {
            return Err(GraphicsError::State(format!(
                "resource belongs to {owner}, not {}",
                self.id
            ))
            .logged(COMPONENT, operation));
        }
        Ok(())
    }

    /// Destroy a buffer. Native memory is released once the GPU has finished
    /// the submissions that may use it.
    pub fn destroy_buffer(&self, buffer: Buffer) -> GraphicsResult<()> {
        self.check_owner(buffer.device_id(), "destroy_buffer")
    }

    pub fn destroy_texture(&self, texture: Texture) -> GraphicsResult<()> {
        self.check_owner(texture.device_id(), "destroy_texture")
    }

    pub fn destroy_shader(&self, shader: Shader) -> GraphicsResult<()> {
        self.check_owner(shader.device_id(), "destroy_shader")
    }

    pub fn destroy_pipeline_state(&self, pipeline: PipelineState) -> GraphicsResult<()> {
        self.check_owner(pipeline.device_id(), "destroy_pipeline_state")
    }

    pub fn destroy_command_list(&self, command_list: CommandList) -> GraphicsResult<()> {
        self.check_owner(command_list.device_id(), "destroy_command_list")
    }

    pub fn destroy_fence(&self, fence: Fence) -> GraphicsResult<()> {
        self.check_owner(fence.device_id(), "destroy_fence")
    }

    pub fn destroy_swap_chain(&self, swap_chain: SwapChain) -> GraphicsResult<()> {
        self.check_owner(swap_chain.device_id(), "destroy_swap_chain")
    }

    /// Submit closed command lists, in order, as one queue submission.
    ///
    /// The whole batch is rejected, and nothing is submitted, if any list is
    /// still open, belongs to another device, appears twice or is still
    /// executing. A list submitted again replays its barriers, so every
    /// resource it transitions must be back in the state its recording
    /// started from.
    pub fn execute_command_lists(&self, lists: &[&CommandList]) -> GraphicsResult<()> {
        crate::profile_scope!("execute_command_lists");
        let fail = fail("execute_command_lists");
        for (index, list) in lists.iter().enumerate() {
            if list.device_id() != self.id {
                return Err(fail(GraphicsError::State(format!(
                    "command list {index} belongs to {}",
                    list.device_id()
                ))));
            }
            if list.state() != CommandListState::Closed {
                return Err(fail(GraphicsError::State(format!(
                    "command list {index} is still open; close() it before submission"
                ))));
            }
            if lists[..index].iter().any(|other| std::ptr::eq(*other, *list)) {
                return Err(fail(GraphicsError::State(format!(
                    "command list {index} appears more than once in the batch"
                ))));
            }
            if list.is_in_flight() {
                return Err(fail(GraphicsError::State(format!(
                    "command list {index} is still executing; wait on a fence before \
                     submitting it again"
                ))));
            }
        }

        // States after the replayed lists, applied once the batch is submitted.
        let mut replayed: Vec<(StateCell, ResourceState)> = Vec::new();
        for (index, list) in lists.iter().enumerate() {
            if !list.was_submitted() {
                continue;
            }
            for (cell, first, last) in list.recorded_transitions() {
                let current = replayed
                    .iter()
                    .rev()
                    .find(|(replayed, _)| replayed.same(cell))
                    .map_or_else(|| cell.get(), |(_, state)| *state);
                if current != first {
                    return Err(fail(GraphicsError::State(format!(
                        "command list {index} was recorded for a resource in {first:?}, \
                         which is now in {current:?}; record it again"
                    ))));
                }
                replayed.push((cell.clone(), last));
            }
        }

        if lists.is_empty() {
            return Ok(());
        }
        self.backend.execute(lists).map_err(fail)?;
        for list in lists {
            list.mark_submitted();
        }
        for (cell, state) in replayed {
            cell.set(state);
        }
        Ok(())
    }

    /// Block until all submitted work has completed. Also retires deferred
    /// destructions and finished uploads.
    pub fn wait_for_idle(&self) -> GraphicsResult<()> {
        crate::profile_scope!("wait_for_idle");
        self.backend.wait_idle().map_err(fail("wait_for_idle"))
    }

    /// Primary swap chain, if the device was created with one.
    pub fn swap_chain(&self) -> Option<&SwapChain> {
        self.swap_chain.as_ref()
    }

    pub fn swap_chain_mut(&mut self) -> Option<&mut SwapChain> {
        self.swap_chain.as_mut()
    }

    fn primary(&self, operation: &str) -> GraphicsResult<&SwapChain> {
        self.swap_chain.as_ref().ok_or_else(|| {
            GraphicsError::State("device has no primary swap chain".to_string())
                .logged(COMPONENT, operation)
        })
    }

    fn primary_mut(&mut self, operation: &str) -> GraphicsResult<&mut SwapChain> {
        self.swap_chain.as_mut().ok_or_else(|| {
            GraphicsError::State("device has no primary swap chain".to_string())
                .logged(COMPONENT, operation)
        })
    }

    /// Present the current back buffer of the primary swap chain.
    pub fn present(&mut self) -> GraphicsResult<()> {
        self.primary_mut("present")?.present()
    }

    pub fn back_buffer_index(&self) -> GraphicsResult<u32> {
        Ok(self.primary("back_buffer_index")?.back_buffer_index())
    }

    pub fn back_buffer(&self, index: u32) -> GraphicsResult<&Texture> {
        self.primary("back_buffer")?.back_buffer(index)
    }

    /// Resize the primary swap chain. See [`SwapChain::resize`].
    pub fn resize(&mut self, width: u32, height: u32) -> GraphicsResult<bool> {
        self.primary_mut("resize")?.resize(width, height)
    }
}

impl Drop for GraphicsDevice {
    fn drop(&mut self) {
        // Back buffers go first; the backend context itself lives on in the
        // resources that still reference it.
        self.swap_chain = None;
        if let Err(e) = self.backend.wait_idle() {
            log::warn!("GraphicsDevice: wait_idle on drop failed: {e}");
        }
    }
}

impl std::fmt::Debug for GraphicsDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsDevice")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("api", &self.api())
            .finish()
    }
}

static_assertions::assert_impl_all!(GraphicsDevice: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::create_device;
    use crate::types::{DeviceCreationParams, TextureFormat};

    fn create_test_device() -> GraphicsDevice {
        create_device(&DeviceCreationParams::new(GraphicsApi::Dummy)).unwrap()
    }

    #[test]
    fn test_device_name() {
        let device = create_test_device();
        assert_eq!(device.name(), "Keystone Reference Device");
        assert_eq!(device.api(), GraphicsApi::Dummy);
        assert!(device.swap_chain().is_none());
    }

    #[test]
    fn test_create_buffer() {
        let device = create_test_device();
        let buffer = device
            .create_buffer(&BufferDescriptor::vertex(1024, 16, ResourceUsage::Default), None)
            .unwrap();
        assert_eq!(buffer.size(), 1024);
        assert_eq!(buffer.state(), ResourceState::Common);
        assert_eq!(device.statistics().buffers, 1);
    }

    #[test]
    fn test_create_buffer_zero_size() {
        let device = create_test_device();
        let result = device.create_buffer(&BufferDescriptor::constants(0), None);
        assert!(matches!(result, Err(GraphicsError::ResourceCreation(_))));
    }

    #[test]
    fn test_immutable_buffer_requires_data() {
        let device = create_test_device();
        let desc = BufferDescriptor::index(64, ResourceUsage::Immutable);
        assert!(device.create_buffer(&desc, None).is_err());
        let buffer = device.create_buffer(&desc, Some(&[0u8; 64])).unwrap();
        assert_eq!(buffer.state(), ResourceState::IndexBuffer);
        assert!(buffer.update_data(0, &[1, 2]).is_err());
    }

    #[test]
    fn test_create_texture_zero_size() {
        let device = create_test_device();
        let desc = TextureDescriptor::new_2d(
            0,
            512,
            TextureFormat::Rgba8Unorm,
            BindFlags::SHADER_RESOURCE,
        );
        assert!(device.create_texture(&desc, None).is_err());
    }

    #[test]
    fn test_texture_data_must_cover_all_subresources() {
        let device = create_test_device();
        let desc =
            TextureDescriptor::new_2d(4, 4, TextureFormat::Rgba8Unorm, BindFlags::SHADER_RESOURCE)
                .with_mip_levels(3);
        assert!(device.create_texture(&desc, Some(&[0u8; 64])).is_err());
        // 64 + 16 + 4 bytes for three mips.
        assert!(device.create_texture(&desc, Some(&[0u8; 84])).is_ok());
    }

    #[test]
    fn test_staging_texture_restrictions() {
        let device = create_test_device();
        let desc =
            TextureDescriptor::staging_2d(16, 16, TextureFormat::Rgba8Unorm).with_mip_levels(2);
        assert!(device.create_texture(&desc, None).is_err());
        let desc =
            TextureDescriptor::staging_2d(16, 16, TextureFormat::Rgba8Unorm).with_array_size(2);
        assert!(device.create_texture(&desc, None).is_err());
    }

    #[test]
    fn test_too_many_mips_rejected() {
        let device = create_test_device();
        let desc =
            TextureDescriptor::new_2d(8, 8, TextureFormat::R8Unorm, BindFlags::SHADER_RESOURCE)
                .with_mip_levels(5);
        assert!(device.create_texture(&desc, None).is_err());
    }

    #[test]
    fn test_resource_counts_follow_drops() {
        let device = create_test_device();
        {
            let _fence = device.create_fence(0).unwrap();
            let _list = device.create_command_list().unwrap();
            let stats = device.statistics();
            assert_eq!((stats.fences, stats.command_lists), (1, 1));
        }
        let stats = device.statistics();
        assert_eq!((stats.fences, stats.command_lists), (0, 0));
    }

    #[test]
    fn test_destroy_checks_owner() {
        let a = create_test_device();
        let b = create_test_device();
        let fence = a.create_fence(0).unwrap();
        assert!(matches!(b.destroy_fence(fence), Err(GraphicsError::State(_))));
        let fence = a.create_fence(0).unwrap();
        assert!(a.destroy_fence(fence).is_ok());
    }

    #[test]
    fn test_present_without_swap_chain() {
        let mut device = create_test_device();
        assert!(matches!(device.present(), Err(GraphicsError::State(_))));
        assert!(device.back_buffer_index().is_err());
    }
}
