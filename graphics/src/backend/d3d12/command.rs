//! Command recording into an `ID3D12GraphicsCommandList`.
//!
//! Transitions are batched and recorded right before the next command that
//! needs them. Vertex buffer views are resolved at draw time, when the
//! strides of the bound pipeline are known.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use windows::Win32::Foundation::RECT;
use windows::Win32::Graphics::Direct3D12::*;

use super::conversion::{index_format, resource_state};
use super::pipeline::RootSlot;
use super::resources::{footprint_location, subresource_location, transition_barrier};
use super::{D3d12Backend, D3d12Texture, Retired, hr_error};
use crate::error::{GraphicsError, GraphicsResult};
use crate::resources::{Buffer, PipelineState, Texture};
use crate::types::{ClearColor, IndexFormat, ResourceState, ScissorRect, Viewport};

fn d3d12_texture(texture: &Texture) -> GraphicsResult<&D3d12Texture> {
    texture.raw().as_d3d12()
}

/// Transitions waiting to be recorded, at most one per resource.
struct PendingBarriers<R> {
    pending: Vec<(R, D3D12_RESOURCE_STATES, D3D12_RESOURCE_STATES)>,
}

impl<R> Default for PendingBarriers<R> {
    fn default() -> Self {
        Self { pending: Vec::new() }
    }
}

impl<R: PartialEq> PendingBarriers<R> {
    /// Queue `before -> after`, folding it into a pending transition of the
    /// same resource. A transition that ends where it started is dropped.
    fn add(&mut self, resource: R, before: D3D12_RESOURCE_STATES, after: D3D12_RESOURCE_STATES) {
        if let Some(index) = self.pending.iter().position(|(r, _, _)| *r == resource) {
            let (_, first, _) = self.pending[index];
            if first == after {
                self.pending.remove(index);
            } else {
                self.pending[index].2 = after;
            }
        } else if before != after {
            self.pending.push((resource, before, after));
        }
    }

    fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn clear(&mut self) {
        self.pending.clear();
    }

    fn take(&mut self) -> Vec<(R, D3D12_RESOURCE_STATES, D3D12_RESOURCE_STATES)> {
        std::mem::take(&mut self.pending)
    }
}

struct BoundPipeline {
    compute: bool,
    slots: Vec<RootSlot>,
    slot_strides: Vec<(u32, u32)>,
}

impl BoundPipeline {
    fn slot_stride(&self, slot: u32) -> u32 {
        self.slot_strides
            .iter()
            .find(|(s, _)| *s == slot)
            .map_or(0, |(_, stride)| *stride)
    }
}

#[derive(Debug, Clone, Copy)]
struct VertexBinding {
    address: u64,
    size: u32,
    stride: u32,
}

/// A graphics command list with its own allocator.
pub struct D3d12CommandList {
    backend: Arc<D3d12Backend>,
    allocator: Option<ID3D12CommandAllocator>,
    list: Option<ID3D12GraphicsCommandList>,
    barriers: PendingBarriers<ID3D12Resource>,
    /// Serial of the last submission containing this list.
    last_serial: AtomicU64,
    /// Whether the list holds a finished recording.
    executable: bool,

    pipeline: Option<BoundPipeline>,
    vertex_buffers: Vec<Option<VertexBinding>>,
    vertex_buffers_dirty: bool,
}

// SAFETY: the list is only recorded through `&mut self`; submission reads
// the COM pointer, which is free-threaded for the queue.
unsafe impl Send for D3d12CommandList {}
unsafe impl Sync for D3d12CommandList {}

impl D3d12CommandList {
    pub(super) fn new(backend: &Arc<D3d12Backend>) -> GraphicsResult<Self> {
        let device = backend.device();
        let allocator: ID3D12CommandAllocator =
            unsafe { device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT) }
                .map_err(|e| hr_error("CreateCommandAllocator", e))?;
        let list: ID3D12GraphicsCommandList =
            unsafe { device.CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &allocator, None) }
                .map_err(|e| hr_error("CreateCommandList", e))?;
        // Lists are created open; `reset` is the only way to start recording.
        unsafe { list.Close() }.map_err(|e| hr_error("ID3D12GraphicsCommandList::Close", e))?;

        Ok(Self {
            backend: Arc::clone(backend),
            allocator: Some(allocator),
            list: Some(list),
            barriers: PendingBarriers::default(),
            last_serial: AtomicU64::new(0),
            executable: false,
            pipeline: None,
            vertex_buffers: Vec::new(),
            vertex_buffers_dirty: false,
        })
    }

    fn list(&self) -> GraphicsResult<&ID3D12GraphicsCommandList> {
        self.list
            .as_ref()
            .ok_or_else(|| GraphicsError::State("command list was released".to_string()))
    }

    /// Whether the list has been recorded and closed at least once.
    pub(super) fn is_executable(&self) -> bool {
        self.executable
    }

    pub(super) fn executable(&self) -> GraphicsResult<ID3D12CommandList> {
        windows::core::Interface::cast(self.list()?).map_err(|e| hr_error("ID3D12CommandList", e))
    }

    pub(super) fn mark_submitted(&self, serial: u64) {
        self.last_serial.store(serial, Ordering::Release);
    }

    pub fn is_in_flight(&self) -> bool {
        let last = self.last_serial.load(Ordering::Acquire);
        last > 0 && self.backend.completed_serial() < last
    }

    pub fn reset(&mut self) -> GraphicsResult<()> {
        let allocator = self
            .allocator
            .as_ref()
            .ok_or_else(|| GraphicsError::State("command list was released".to_string()))?;
        let list = self.list()?;
        unsafe {
            allocator
                .Reset()
                .map_err(|e| hr_error("ID3D12CommandAllocator::Reset", e))?;
            list.Reset(allocator, None)
                .map_err(|e| hr_error("ID3D12GraphicsCommandList::Reset", e))?;
            let heap = self.backend.descriptors().shader_visible_heap().clone();
            list.SetDescriptorHeaps(&[Some(heap)]);
        }
        self.executable = false;
        self.barriers.clear();
        self.pipeline = None;
        self.vertex_buffers.clear();
        self.vertex_buffers_dirty = false;
        Ok(())
    }

    pub fn close(&mut self) -> GraphicsResult<()> {
        self.flush_barriers()?;
        unsafe { self.list()?.Close() }
            .map_err(|e| hr_error("ID3D12GraphicsCommandList::Close", e))?;
        self.executable = true;
        Ok(())
    }

    fn flush_barriers(&mut self) -> GraphicsResult<()> {
        if self.barriers.is_empty() {
            return Ok(());
        }
        let pending = self.barriers.take();
        let barriers: Vec<D3D12_RESOURCE_BARRIER> = pending
            .iter()
            .map(|(resource, before, after)| transition_barrier(resource, *before, *after))
            .collect();
        unsafe { self.list()?.ResourceBarrier(&barriers) };
        Ok(())
    }

    pub fn transition_buffer(
        &mut self,
        buffer: &Buffer,
        before: ResourceState,
        after: ResourceState,
    ) -> GraphicsResult<()> {
        let raw = buffer.raw().as_d3d12()?;
        // Upload and readback heaps keep the state they were created in.
        if raw.mapped_ptr().is_some() {
            return Ok(());
        }
        self.barriers
            .add(raw.resource()?.clone(), resource_state(before), resource_state(after));
        Ok(())
    }

    pub fn transition_texture(
        &mut self,
        texture: &Texture,
        before: ResourceState,
        after: ResourceState,
    ) -> GraphicsResult<()> {
        let raw = d3d12_texture(texture)?;
        if raw.is_staging() {
            return Ok(());
        }
        self.barriers
            .add(raw.resource()?.clone(), resource_state(before), resource_state(after));
        Ok(())
    }

    pub fn set_pipeline_state(&mut self, pipeline: &PipelineState) -> GraphicsResult<()> {
        let raw = pipeline.raw().as_d3d12()?;
        let list = self.list()?;
        unsafe {
            list.SetPipelineState(raw.state()?);
            if raw.is_compute() {
                list.SetComputeRootSignature(raw.root_signature()?);
            } else {
                list.SetGraphicsRootSignature(raw.root_signature()?);
                list.IASetPrimitiveTopology(raw.topology());
            }
        }
        self.pipeline = Some(BoundPipeline {
            compute: raw.is_compute(),
            slots: raw.slots().to_vec(),
            slot_strides: pipeline
                .descriptor()
                .slot_strides()
                .into_iter()
                .map(|(slot, stride, _)| (slot, stride))
                .collect(),
        });
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
            let raw = buffer.raw().as_d3d12()?;
            self.vertex_buffers[slot] = Some(VertexBinding {
                address: raw.gpu_address(),
                size: u32::try_from(buffer.size()).unwrap_or(u32::MAX),
                stride: buffer.descriptor().stride,
            });
        }
        self.vertex_buffers_dirty = true;
        Ok(())
    }

    pub fn set_index_buffer(&mut self, buffer: &Buffer, format: IndexFormat) -> GraphicsResult<()> {
        let raw = buffer.raw().as_d3d12()?;
        let view = D3D12_INDEX_BUFFER_VIEW {
            BufferLocation: raw.gpu_address(),
            SizeInBytes: u32::try_from(buffer.size()).unwrap_or(u32::MAX),
            Format: index_format(format),
        };
        unsafe { self.list()?.IASetIndexBuffer(Some(&view)) };
        Ok(())
    }

    fn bound_pipeline(&self) -> GraphicsResult<&BoundPipeline> {
        self.pipeline
            .as_ref()
            .ok_or_else(|| GraphicsError::State("no pipeline state bound".to_string()))
    }

    fn root_slot(&self, index: u32) -> GraphicsResult<(RootSlot, bool)> {
        let pipeline = self.bound_pipeline()?;
        pipeline
            .slots
            .get(index as usize)
            .map(|slot| (*slot, pipeline.compute))
            .ok_or_else(|| GraphicsError::State(format!("binding slot {index} out of range")))
    }

    fn slot_mismatch(index: u32, slot: RootSlot) -> GraphicsError {
        GraphicsError::State(format!("binding slot {index} is {slot:?}"))
    }

    pub fn set_root_constants(&mut self, index: u32, values: &[u32]) -> GraphicsResult<()> {
        let (slot, compute) = self.root_slot(index)?;
        let RootSlot::Constants { parameter } = slot else {
            return Err(Self::slot_mismatch(index, slot));
        };
        let list = self.list()?;
        let count = values.len() as u32;
        let data = values.as_ptr().cast();
        unsafe {
            if compute {
                list.SetComputeRoot32BitConstants(parameter, count, data, 0);
            } else {
                list.SetGraphicsRoot32BitConstants(parameter, count, data, 0);
            }
        }
        Ok(())
    }

    pub fn set_constant_buffer(&mut self, index: u32, buffer: &Buffer) -> GraphicsResult<()> {
        let (slot, compute) = self.root_slot(index)?;
        let RootSlot::ConstantBuffer { parameter } = slot else {
            return Err(Self::slot_mismatch(index, slot));
        };
        let address = buffer.raw().as_d3d12()?.gpu_address();
        let list = self.list()?;
        unsafe {
            if compute {
                list.SetComputeRootConstantBufferView(parameter, address);
            } else {
                list.SetGraphicsRootConstantBufferView(parameter, address);
            }
        }
        Ok(())
    }

    pub fn set_shader_resource(&mut self, index: u32, texture: &Texture) -> GraphicsResult<()> {
        let (slot, compute) = self.root_slot(index)?;
        let RootSlot::ShaderResource { parameter } = slot else {
            return Err(Self::slot_mismatch(index, slot));
        };
        let table = d3d12_texture(texture)?.srv()?;
        let list = self.list()?;
        unsafe {
            if compute {
                list.SetComputeRootDescriptorTable(parameter, table);
            } else {
                list.SetGraphicsRootDescriptorTable(parameter, table);
            }
        }
        Ok(())
    }

    fn flush_vertex_buffers(&mut self) -> GraphicsResult<()> {
        if !self.vertex_buffers_dirty || self.vertex_buffers.is_empty() {
            return Ok(());
        }
        let pipeline = self.bound_pipeline()?;
        let views: Vec<D3D12_VERTEX_BUFFER_VIEW> = self
            .vertex_buffers
            .iter()
            .enumerate()
            .map(|(slot, binding)| match binding {
                Some(binding) => D3D12_VERTEX_BUFFER_VIEW {
                    BufferLocation: binding.address,
                    SizeInBytes: binding.size,
                    StrideInBytes: if binding.stride > 0 {
                        binding.stride
                    } else {
                        pipeline.slot_stride(slot as u32)
                    },
                },
                None => D3D12_VERTEX_BUFFER_VIEW::default(),
            })
            .collect();
        unsafe { self.list()?.IASetVertexBuffers(0, Some(&views)) };
        self.vertex_buffers_dirty = false;
        Ok(())
    }

    fn prepare_draw(&mut self) -> GraphicsResult<()> {
        self.flush_barriers()?;
        self.flush_vertex_buffers()
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
            self.list()?
                .DrawInstanced(vertex_count, instance_count, first_vertex, first_instance)
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
            self.list()?.DrawIndexedInstanced(
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
        self.flush_barriers()?;
        unsafe { self.list()?.Dispatch(x, y, z) };
        Ok(())
    }

    pub fn copy_texture(&mut self, src: &Texture, dst: &Texture) -> GraphicsResult<()> {
        let (src_raw, dst_raw) = (d3d12_texture(src)?, d3d12_texture(dst)?);
        let format = src_raw.descriptor().format;
        self.flush_barriers()?;
        let list = self.list()?;
        let (src_resource, dst_resource) = (src_raw.resource()?, dst_raw.resource()?);

        match (src_raw.footprints(), dst_raw.footprints()) {
            // Texture to texture, or staging to staging: identical layouts.
            (None, None) | (Some(_), Some(_)) => unsafe {
                list.CopyResource(dst_resource, src_resource)
            },
            _ if format.has_stencil() => {
                return Err(GraphicsError::UnsupportedOperation(format!(
                    "copy between {format:?} textures through a staging texture"
                )));
            }
            (None, Some(footprints)) => {
                for (index, footprint) in footprints.iter().enumerate() {
                    let dst_location = footprint_location(dst_resource, *footprint);
                    let src_location = subresource_location(src_resource, index as u32);
                    unsafe { list.CopyTextureRegion(&dst_location, 0, 0, 0, &src_location, None) };
                }
            }
            (Some(footprints), None) => {
                for (index, footprint) in footprints.iter().enumerate() {
                    let dst_location = subresource_location(dst_resource, index as u32);
                    let src_location = footprint_location(src_resource, *footprint);
                    unsafe { list.CopyTextureRegion(&dst_location, 0, 0, 0, &src_location, None) };
                }
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
        let (src, dst) = (src.raw().as_d3d12()?.resource()?, dst.raw().as_d3d12()?.resource()?);
        self.flush_barriers()?;
        unsafe { self.list()?.CopyBufferRegion(dst, dst_offset, src, src_offset, size) };
        Ok(())
    }

    pub fn clear_render_target(
        &mut self,
        texture: &Texture,
        color: ClearColor,
    ) -> GraphicsResult<()> {
        let view = d3d12_texture(texture)?.rtv()?;
        self.flush_barriers()?;
        let color = color.to_array();
        unsafe { self.list()?.ClearRenderTargetView(view, color.as_ptr(), None) };
        Ok(())
    }

    pub fn clear_depth_stencil(
        &mut self,
        texture: &Texture,
        depth: f32,
        stencil: u8,
    ) -> GraphicsResult<()> {
        let raw = d3d12_texture(texture)?;
        let view = raw.dsv()?;
        let flags = if raw.descriptor().format.has_stencil() {
            D3D12_CLEAR_FLAG_DEPTH | D3D12_CLEAR_FLAG_STENCIL
        } else {
            D3D12_CLEAR_FLAG_DEPTH
        };
        self.flush_barriers()?;
        unsafe { self.list()?.ClearDepthStencilView(view, flags, depth, stencil, None) };
        Ok(())
    }

    pub fn set_render_targets(
        &mut self,
        render_targets: &[&Texture],
        depth_stencil: Option<&Texture>,
    ) -> GraphicsResult<()> {
        let color_views = render_targets
            .iter()
            .map(|target| d3d12_texture(target)?.rtv())
            .collect::<GraphicsResult<Vec<_>>>()?;
        let depth_view = depth_stencil.map(|texture| d3d12_texture(texture)?.dsv()).transpose()?;
        let colors = (!color_views.is_empty()).then(|| color_views.as_ptr());
        unsafe {
            self.list()?.OMSetRenderTargets(
                color_views.len() as u32,
                colors,
                false,
                depth_view.as_ref().map(|view| view as *const _),
            )
        };
        Ok(())
    }

    pub fn set_viewports(&mut self, viewports: &[Viewport]) -> GraphicsResult<()> {
        let viewports: Vec<D3D12_VIEWPORT> = viewports
            .iter()
            .map(|v| D3D12_VIEWPORT {
                TopLeftX: v.x,
                TopLeftY: v.y,
                Width: v.width,
                Height: v.height,
                MinDepth: v.min_depth,
                MaxDepth: v.max_depth,
            })
            .collect();
        unsafe { self.list()?.RSSetViewports(&viewports) };
        Ok(())
    }

    pub fn set_scissor_rects(&mut self, rects: &[ScissorRect]) -> GraphicsResult<()> {
        let rects: Vec<RECT> = rects
            .iter()
            .map(|r| RECT {
                left: r.x,
                top: r.y,
                right: r.x + r.width as i32,
                bottom: r.y + r.height as i32,
            })
            .collect();
        unsafe { self.list()?.RSSetScissorRects(&rects) };
        Ok(())
    }
}

impl Drop for D3d12CommandList {
    fn drop(&mut self) {
        self.barriers.clear();
        if let (Some(allocator), Some(list)) = (self.allocator.take(), self.list.take()) {
            self.backend.defer(Retired::CommandList { allocator, list });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMMON: D3D12_RESOURCE_STATES = D3D12_RESOURCE_STATE_COMMON;
    const TARGET: D3D12_RESOURCE_STATES = D3D12_RESOURCE_STATE_RENDER_TARGET;
    const COPY_SRC: D3D12_RESOURCE_STATES = D3D12_RESOURCE_STATE_COPY_SOURCE;

    #[test]
    fn test_transitions_of_one_resource_are_folded() {
        let mut barriers = PendingBarriers::default();
        barriers.add(1u32, COMMON, TARGET);
        barriers.add(1u32, TARGET, COPY_SRC);
        barriers.add(2u32, COMMON, COPY_SRC);
        assert_eq!(barriers.take(), vec![(1, COMMON, COPY_SRC), (2, COMMON, COPY_SRC)]);
        assert!(barriers.is_empty());
    }

    #[test]
    fn test_round_trip_transition_is_dropped() {
        let mut barriers = PendingBarriers::default();
        barriers.add(7u32, COMMON, TARGET);
        barriers.add(7u32, TARGET, COMMON);
        barriers.add(8u32, TARGET, TARGET);
        assert!(barriers.is_empty());
    }

    #[test]
    fn test_vertex_stride_falls_back_to_pipeline_layout() {
        let pipeline = BoundPipeline {
            compute: false,
            slots: vec![],
            slot_strides: vec![(0, 12), (2, 32)],
        };
        assert_eq!(pipeline.slot_stride(0), 12);
        assert_eq!(pipeline.slot_stride(1), 0);
        assert_eq!(pipeline.slot_stride(2), 32);
    }
}
