//! Command recording.
//!
//! A [`CommandList`] is created Closed. [`CommandList::reset`] opens it for
//! recording and [`CommandList::close`] finishes it, after which it can be
//! submitted with [`GraphicsDevice::execute_command_lists`]. Recording into a
//! closed list returns [`GraphicsError::State`] and leaves the list untouched.
//!
//! Every buffer and texture tracks its current [`ResourceState`]. Commands
//! that need an operand in a particular state record the transition barrier
//! themselves when the operand is not already in it; [`CommandList::transition`]
//! records one explicitly. Backends batch barriers and flush them before the
//! next draw, dispatch, copy or clear and when the list is closed.
//!
//! The tracked state follows recording order. A list remembers the first and
//! last state it moved each resource through: resetting or dropping a list
//! whose recording was never submitted restores the first states, and a list
//! submitted again is only accepted while its resources are back in those
//! first states.
//!
//! [`GraphicsDevice::execute_command_lists`]: crate::GraphicsDevice::execute_command_lists

use std::sync::atomic::{AtomicBool, Ordering};

use crate::backend::{GpuCommandList, with_variant};
use crate::error::{GraphicsError, GraphicsResult};
use crate::resources::{Buffer, DeviceId, PipelineState, StateCell, Texture, TrackedResource};
use crate::types::{
    BindFlags, BindingSlot, ClearColor, IndexFormat, MAX_RENDER_TARGETS, ResourceState,
    ScissorRect, Viewport,
};

const COMPONENT: &str = "command_list";

/// Maximum number of viewports or scissor rectangles set at once.
pub const MAX_VIEWPORTS: usize = 16;

/// Recording state of a [`CommandList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandListState {
    /// Not recording. Can be submitted or reset.
    Closed,
    /// Recording.
    Open,
}

/// A buffer or texture whose state can be transitioned.
#[derive(Debug, Clone, Copy)]
pub enum ResourceRef<'a> {
    Buffer(&'a Buffer),
    Texture(&'a Texture),
}

impl<'a> From<&'a Buffer> for ResourceRef<'a> {
    fn from(buffer: &'a Buffer) -> Self {
        Self::Buffer(buffer)
    }
}

impl<'a> From<&'a Texture> for ResourceRef<'a> {
    fn from(texture: &'a Texture) -> Self {
        Self::Texture(texture)
    }
}

struct BoundPipeline {
    compute: bool,
    bindings: Vec<BindingSlot>,
}

/// States the current recording moved one resource through.
struct RecordedTransition {
    state: StateCell,
    first: ResourceState,
    last: ResourceState,
}

/// A list of GPU commands recorded on the CPU and submitted to the device
/// queue.
pub struct CommandList {
    device_id: DeviceId,
    label: Option<String>,
    state: CommandListState,
    pipeline: Option<BoundPipeline>,
    transitions: Vec<RecordedTransition>,
    /// Set once the current recording has been submitted.
    submitted: AtomicBool,
    raw: GpuCommandList,
    _tracked: TrackedResource,
}

impl CommandList {
    pub(crate) fn new(
        device_id: DeviceId,
        label: Option<String>,
        raw: GpuCommandList,
        tracked: TrackedResource,
    ) -> Self {
        Self {
            device_id,
            label,
            state: CommandListState::Closed,
            pipeline: None,
            transitions: Vec::new(),
            submitted: AtomicBool::new(false),
            raw,
            _tracked: tracked,
        }
    }

    /// Set the debug label used in log messages.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Id of the device that created this list.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn state(&self) -> CommandListState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == CommandListState::Open
    }

    /// Whether the last submission of this list may still be executing.
    pub fn is_in_flight(&self) -> bool {
        with_variant!(&self.raw, GpuCommandList, raw => raw.is_in_flight())
    }

    pub(crate) fn raw(&self) -> &GpuCommandList {
        &self.raw
    }

    /// Whether the current recording has been submitted at least once.
    pub(crate) fn was_submitted(&self) -> bool {
        self.submitted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_submitted(&self) {
        self.submitted.store(true, Ordering::Release);
    }

    /// Tracked state, first state and last state of every resource the
    /// current recording transitioned.
    pub(crate) fn recorded_transitions(
        &self,
    ) -> impl Iterator<Item = (&StateCell, ResourceState, ResourceState)> {
        self.transitions
            .iter()
            .map(|transition| (&transition.state, transition.first, transition.last))
    }

    fn note_transition(&mut self, state: &StateCell, before: ResourceState, after: ResourceState) {
        match self.transitions.iter_mut().find(|t| t.state.same(state)) {
            Some(transition) => transition.last = after,
            None => self.transitions.push(RecordedTransition {
                state: state.clone(),
                first: before,
                last: after,
            }),
        }
    }

    /// Forget the current recording. Unless it was submitted, its resources
    /// go back to the states they had before it.
    fn discard_recording(&mut self) {
        let transitions = std::mem::take(&mut self.transitions);
        if self.submitted.swap(false, Ordering::AcqRel) {
            return;
        }
        for transition in transitions {
            if transition.state.get() == transition.last {
                transition.state.set(transition.first);
            } else {
                log::warn!(
                    "{COMPONENT}: a later recording moved a resource of {:?} to {:?}; \
                     not restoring {:?}",
                    self.label,
                    transition.state.get(),
                    transition.first
                );
            }
        }
    }

    /// Run `record` if the list is open, logging any failure under `operation`.
    fn record<T>(
        &mut self,
        operation: &str,
        record: impl FnOnce(&mut Self) -> GraphicsResult<T>,
    ) -> GraphicsResult<T> {
        if self.state != CommandListState::Open {
            return Err(GraphicsError::State(format!(
                "command list {:?} is closed; call reset() before recording",
                self.label
            ))
            .logged(COMPONENT, operation));
        }
        record(self).map_err(|e| e.logged(COMPONENT, operation))
    }

    fn check_owner(&self, owner: DeviceId, what: &str) -> GraphicsResult<()> {
        if owner != self.device_id {
            return Err(GraphicsError::State(format!(
                "{what} belongs to {owner}, command list to {}",
                self.device_id
            )));
        }
        Ok(())
    }

    fn require_bind_flags(flags: BindFlags, required: BindFlags, what: &str) -> GraphicsResult<()> {
        if !flags.contains(required) {
            return Err(GraphicsError::State(format!(
                "{what} was not created with {required:?}"
            )));
        }
        Ok(())
    }

    fn buffer_to(&mut self, buffer: &Buffer, state: ResourceState) -> GraphicsResult<()> {
        self.check_owner(buffer.device_id(), "buffer")?;
        let before = buffer.state();
        if before != state {
            with_variant!(&mut self.raw, GpuCommandList, raw => {
                raw.transition_buffer(buffer, before, state)
            })?;
            buffer.set_state(state);
            self.note_transition(buffer.state_cell(), before, state);
        }
        Ok(())
    }

    fn texture_to(&mut self, texture: &Texture, state: ResourceState) -> GraphicsResult<()> {
        self.check_owner(texture.device_id(), "texture")?;
        let before = texture.state();
        if before != state {
            with_variant!(&mut self.raw, GpuCommandList, raw => {
                raw.transition_texture(texture, before, state)
            })?;
            texture.set_state(state);
            self.note_transition(texture.state_cell(), before, state);
        }
        Ok(())
    }

    fn binding(&self, index: u32) -> GraphicsResult<BindingSlot> {
        let pipeline = self
            .pipeline
            .as_ref()
            .ok_or_else(|| GraphicsError::State("no pipeline state bound".to_string()))?;
        pipeline.bindings.get(index as usize).copied().ok_or_else(|| {
            GraphicsError::State(format!(
                "binding slot {index} out of range ({} slots)",
                pipeline.bindings.len()
            ))
        })
    }

    fn require_pipeline(&self, compute: bool) -> GraphicsResult<()> {
        match &self.pipeline {
            Some(bound) if bound.compute == compute => Ok(()),
            Some(_) => Err(GraphicsError::State(format!(
                "bound pipeline is not a {} pipeline",
                if compute { "compute" } else { "graphics" }
            ))),
            None => Err(GraphicsError::State("no pipeline state bound".to_string())),
        }
    }

    /// Open the list for recording, discarding previously recorded commands.
    /// Transitions of a recording that was never submitted are rolled back.
    ///
    /// Fails with [`GraphicsError::State`] while the last submission of this
    /// list is still executing; wait on a fence first.
    pub fn reset(&mut self) -> GraphicsResult<()> {
        crate::profile_scope!("command_list_reset");
        if self.is_in_flight() {
            return Err(GraphicsError::State(format!(
                "command list {:?} is still executing on the GPU",
                self.label
            ))
            .logged(COMPONENT, "reset"));
        }
        with_variant!(&mut self.raw, GpuCommandList, raw => raw.reset())
            .map_err(|e| e.logged(COMPONENT, "reset"))?;
        self.discard_recording();
        self.pipeline = None;
        self.state = CommandListState::Open;
        Ok(())
    }

    /// Finish recording. Pending barriers are flushed into the list.
    pub fn close(&mut self) -> GraphicsResult<()> {
        self.record("close", |list| {
            with_variant!(&mut list.raw, GpuCommandList, raw => raw.close())?;
            list.state = CommandListState::Closed;
            list.pipeline = None;
            Ok(())
        })
    }

    /// Transition `resource` to `state`. No barrier is recorded when the
    /// resource is already in that state.
    pub fn transition<'a>(
        &mut self,
        resource: impl Into<ResourceRef<'a>>,
        state: ResourceState,
    ) -> GraphicsResult<()> {
        let resource = resource.into();
        self.record("transition", |list| match resource {
            ResourceRef::Buffer(buffer) => list.buffer_to(buffer, state),
            ResourceRef::Texture(texture) => list.texture_to(texture, state),
        })
    }

    /// Bind a pipeline state and its binding layout.
    pub fn set_pipeline_state(&mut self, pipeline: &PipelineState) -> GraphicsResult<()> {
        self.record("set_pipeline_state", |list| {
            list.check_owner(pipeline.device_id(), "pipeline state")?;
            with_variant!(&mut list.raw, GpuCommandList, raw => raw.set_pipeline_state(pipeline))?;
            list.pipeline = Some(BoundPipeline {
                compute: pipeline.is_compute(),
                bindings: pipeline.descriptor().bindings.clone(),
            });
            Ok(())
        })
    }

    /// Bind vertex buffers to consecutive slots starting at `start_slot`.
    /// Each buffer's descriptor stride is used as the slot stride.
    pub fn set_vertex_buffers(
        &mut self,
        start_slot: u32,
        buffers: &[&Buffer],
    ) -> GraphicsResult<()> {
        self.record("set_vertex_buffers", |list| {
            for buffer in buffers {
                Self::require_bind_flags(
                    buffer.descriptor().bind_flags,
                    BindFlags::VERTEX_BUFFER,
                    "vertex buffer",
                )?;
                list.buffer_to(buffer, ResourceState::VertexBuffer)?;
            }
            with_variant!(&mut list.raw, GpuCommandList, raw => {
                raw.set_vertex_buffers(start_slot, buffers)
            })
        })
    }

    pub fn set_index_buffer(&mut self, buffer: &Buffer, format: IndexFormat) -> GraphicsResult<()> {
        self.record("set_index_buffer", |list| {
            Self::require_bind_flags(
                buffer.descriptor().bind_flags,
                BindFlags::INDEX_BUFFER,
                "index buffer",
            )?;
            list.buffer_to(buffer, ResourceState::IndexBuffer)?;
            with_variant!(&mut list.raw, GpuCommandList, raw => {
                raw.set_index_buffer(buffer, format)
            })
        })
    }

    /// Set inline 32-bit constants of the bound pipeline's constants slot.
    pub fn set_root_constants(&mut self, index: u32, values: &[u32]) -> GraphicsResult<()> {
        self.record("set_root_constants", |list| {
            match list.binding(index)? {
                BindingSlot::Constants { num_values } if values.len() as u32 <= num_values => {}
                BindingSlot::Constants { num_values } => {
                    return Err(GraphicsError::State(format!(
                        "{} constants exceed the {num_values} declared for slot {index}",
                        values.len()
                    )));
                }
                other => {
                    return Err(GraphicsError::State(format!(
                        "slot {index} is {other:?}, not inline constants"
                    )));
                }
            }
            with_variant!(&mut list.raw, GpuCommandList, raw => {
                raw.set_root_constants(index, values)
            })
        })
    }

    pub fn set_constant_buffer(&mut self, index: u32, buffer: &Buffer) -> GraphicsResult<()> {
        self.record("set_constant_buffer", |list| {
            let slot = list.binding(index)?;
            if slot != BindingSlot::ConstantBuffer {
                return Err(GraphicsError::State(format!(
                    "slot {index} is {slot:?}, not a constant buffer"
                )));
            }
            Self::require_bind_flags(
                buffer.descriptor().bind_flags,
                BindFlags::CONSTANT_BUFFER,
                "constant buffer",
            )?;
            list.buffer_to(buffer, ResourceState::ConstantBuffer)?;
            with_variant!(&mut list.raw, GpuCommandList, raw => {
                raw.set_constant_buffer(index, buffer)
            })
        })
    }

    pub fn set_shader_resource(&mut self, index: u32, texture: &Texture) -> GraphicsResult<()> {
        self.record("set_shader_resource", |list| {
            let slot = list.binding(index)?;
            if slot != BindingSlot::ShaderResource {
                return Err(GraphicsError::State(format!(
                    "slot {index} is {slot:?}, not a shader resource"
                )));
            }
            Self::require_bind_flags(
                texture.descriptor().bind_flags,
                BindFlags::SHADER_RESOURCE,
                "texture",
            )?;
            list.texture_to(texture, ResourceState::ShaderResource)?;
            with_variant!(&mut list.raw, GpuCommandList, raw => {
                raw.set_shader_resource(index, texture)
            })
        })
    }

    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> GraphicsResult<()> {
        self.record("draw", |list| {
            list.require_pipeline(false)?;
            with_variant!(&mut list.raw, GpuCommandList, raw => {
                raw.draw(vertex_count, instance_count, first_vertex, first_instance)
            })
        })
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) -> GraphicsResult<()> {
        self.record("draw_indexed", |list| {
            list.require_pipeline(false)?;
            with_variant!(&mut list.raw, GpuCommandList, raw => {
                raw.draw_indexed(
                    index_count,
                    instance_count,
                    first_index,
                    base_vertex,
                    first_instance,
                )
            })
        })
    }

    /// Dispatch compute work groups with the bound compute pipeline.
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> GraphicsResult<()> {
        self.record("dispatch", |list| {
            list.require_pipeline(true)?;
            with_variant!(&mut list.raw, GpuCommandList, raw => raw.dispatch(x, y, z))
        })
    }

    /// Copy every subresource of `src` into `dst`. Both textures must have
    /// the same size, format, mip count and layer count.
    pub fn copy_texture(&mut self, src: &Texture, dst: &Texture) -> GraphicsResult<()> {
        self.record("copy_texture", |list| {
            if std::ptr::eq(src, dst) {
                return Err(GraphicsError::State("cannot copy a texture onto itself".to_string()));
            }
            let (s, d) = (src.descriptor(), dst.descriptor());
            if s.extent() != d.extent()
                || s.format != d.format
                || s.mip_levels != d.mip_levels
                || s.layer_count() != d.layer_count()
            {
                return Err(GraphicsError::State(format!(
                    "incompatible textures: {}x{}x{} {:?} ({} mips, {} layers) -> \
                     {}x{}x{} {:?} ({} mips, {} layers)",
                    s.width,
                    s.height,
                    s.depth,
                    s.format,
                    s.mip_levels,
                    s.layer_count(),
                    d.width,
                    d.height,
                    d.depth,
                    d.format,
                    d.mip_levels,
                    d.layer_count()
                )));
            }
            list.texture_to(src, ResourceState::CopySource)?;
            list.texture_to(dst, ResourceState::CopyDest)?;
            with_variant!(&mut list.raw, GpuCommandList, raw => raw.copy_texture(src, dst))
        })
    }

    /// Copy `size` bytes between two buffers.
    pub fn copy_buffer(
        &mut self,
        src: &Buffer,
        src_offset: u64,
        dst: &Buffer,
        dst_offset: u64,
        size: u64,
    ) -> GraphicsResult<()> {
        self.record("copy_buffer", |list| {
            if std::ptr::eq(src, dst) {
                return Err(GraphicsError::State("cannot copy a buffer onto itself".to_string()));
            }
            let in_bounds = |offset: u64, buffer: &Buffer| {
                offset.checked_add(size).is_some_and(|end| end <= buffer.size())
            };
            if size == 0 || !in_bounds(src_offset, src) || !in_bounds(dst_offset, dst) {
                return Err(GraphicsError::State(format!(
                    "copy of {size} bytes ({src_offset} -> {dst_offset}) is out of bounds \
                     ({} -> {} bytes)",
                    src.size(),
                    dst.size()
                )));
            }
            list.buffer_to(src, ResourceState::CopySource)?;
            list.buffer_to(dst, ResourceState::CopyDest)?;
            with_variant!(&mut list.raw, GpuCommandList, raw => {
                raw.copy_buffer(src, src_offset, dst, dst_offset, size)
            })
        })
    }

    /// Clear mip 0 of every layer of a render target.
    pub fn clear_render_target(
        &mut self,
        texture: &Texture,
        color: ClearColor,
    ) -> GraphicsResult<()> {
        self.record("clear_render_target", |list| {
            Self::require_bind_flags(
                texture.descriptor().bind_flags,
                BindFlags::RENDER_TARGET,
                "texture",
            )?;
            list.texture_to(texture, ResourceState::RenderTarget)?;
            with_variant!(&mut list.raw, GpuCommandList, raw => {
                raw.clear_render_target(texture, color)
            })
        })
    }

    /// Clear mip 0 of a depth/stencil texture. `stencil` is ignored for
    /// formats without a stencil aspect.
    pub fn clear_depth_stencil(
        &mut self,
        texture: &Texture,
        depth: f32,
        stencil: u8,
    ) -> GraphicsResult<()> {
        self.record("clear_depth_stencil", |list| {
            Self::require_bind_flags(
                texture.descriptor().bind_flags,
                BindFlags::DEPTH_STENCIL,
                "texture",
            )?;
            list.texture_to(texture, ResourceState::DepthWrite)?;
            with_variant!(&mut list.raw, GpuCommandList, raw => {
                raw.clear_depth_stencil(texture, depth, stencil)
            })
        })
    }

    /// Bind color render targets and an optional depth/stencil target.
    pub fn set_render_targets(
        &mut self,
        render_targets: &[&Texture],
        depth_stencil: Option<&Texture>,
    ) -> GraphicsResult<()> {
        self.record("set_render_targets", |list| {
            if render_targets.len() > MAX_RENDER_TARGETS {
                return Err(GraphicsError::State(format!(
                    "{} render targets exceed the maximum of {MAX_RENDER_TARGETS}",
                    render_targets.len()
                )));
            }
            for texture in render_targets {
                Self::require_bind_flags(
                    texture.descriptor().bind_flags,
                    BindFlags::RENDER_TARGET,
                    "render target",
                )?;
                list.texture_to(texture, ResourceState::RenderTarget)?;
            }
            if let Some(depth) = depth_stencil {
                Self::require_bind_flags(
                    depth.descriptor().bind_flags,
                    BindFlags::DEPTH_STENCIL,
                    "depth target",
                )?;
                list.texture_to(depth, ResourceState::DepthWrite)?;
            }
            with_variant!(&mut list.raw, GpuCommandList, raw => {
                raw.set_render_targets(render_targets, depth_stencil)
            })
        })
    }

    pub fn set_viewports(&mut self, viewports: &[Viewport]) -> GraphicsResult<()> {
        self.record("set_viewports", |list| {
            if viewports.len() > MAX_VIEWPORTS {
                return Err(GraphicsError::State(format!(
                    "{} viewports exceed the maximum of {MAX_VIEWPORTS}",
                    viewports.len()
                )));
            }
            with_variant!(&mut list.raw, GpuCommandList, raw => raw.set_viewports(viewports))
        })
    }

    pub fn set_scissor_rects(&mut self, rects: &[ScissorRect]) -> GraphicsResult<()> {
        self.record("set_scissor_rects", |list| {
            if rects.len() > MAX_VIEWPORTS {
                return Err(GraphicsError::State(format!(
                    "{} scissor rectangles exceed the maximum of {MAX_VIEWPORTS}",
                    rects.len()
                )));
            }
            with_variant!(&mut list.raw, GpuCommandList, raw => raw.set_scissor_rects(rects))
        })
    }
}

impl Drop for CommandList {
    fn drop(&mut self) {
        self.discard_recording();
    }
}

impl std::fmt::Debug for CommandList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandList")
            .field("label", &self.label)
            .field("state", &self.state)
            .finish()
    }
}

static_assertions::assert_impl_all!(CommandList: Send, Sync);
