//! Native descriptor heaps.
//!
//! Render target and depth/stencil views live in CPU-only heaps. Constant
//! buffer, shader resource and unordered access views are written straight
//! into the one shader-visible heap, so binding a texture is a single
//! `SetGraphicsRootDescriptorTable` on its slot. Samplers are static in every
//! root signature and only count against the sampler capacity.

use parking_lot::Mutex;
use windows::Win32::Graphics::Direct3D12::*;

use super::hr_error;
use crate::backend::descriptor_heap::{DescriptorHeapKind, DescriptorHeaps};
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::DescriptorHeapCapacities;

/// One `ID3D12DescriptorHeap` with its handle arithmetic.
pub(super) struct NativeHeap {
    heap: ID3D12DescriptorHeap,
    cpu_start: usize,
    gpu_start: u64,
    increment: usize,
}

impl NativeHeap {
    fn new(
        device: &ID3D12Device,
        ty: D3D12_DESCRIPTOR_HEAP_TYPE,
        capacity: u32,
        shader_visible: bool,
    ) -> GraphicsResult<Self> {
        let desc = D3D12_DESCRIPTOR_HEAP_DESC {
            Type: ty,
            // Zero-sized heaps are invalid; an empty capacity still rejects
            // every allocation through the slot allocator.
            NumDescriptors: capacity.max(1),
            Flags: if shader_visible {
                D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
            } else {
                D3D12_DESCRIPTOR_HEAP_FLAG_NONE
            },
            NodeMask: 0,
        };
        let heap: ID3D12DescriptorHeap = unsafe { device.CreateDescriptorHeap(&desc) }
            .map_err(|e| hr_error("CreateDescriptorHeap", e))?;
        let cpu_start = unsafe { heap.GetCPUDescriptorHandleForHeapStart() }.ptr;
        let gpu_start = if shader_visible {
            unsafe { heap.GetGPUDescriptorHandleForHeapStart() }.ptr
        } else {
            0
        };
        let increment = unsafe { device.GetDescriptorHandleIncrementSize(ty) } as usize;
        Ok(Self {
            heap,
            cpu_start,
            gpu_start,
            increment,
        })
    }

    pub(super) fn heap(&self) -> &ID3D12DescriptorHeap {
        &self.heap
    }

    pub(super) fn cpu(&self, index: u32) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: self.cpu_start + index as usize * self.increment,
        }
    }

    pub(super) fn gpu(&self, index: u32) -> D3D12_GPU_DESCRIPTOR_HANDLE {
        D3D12_GPU_DESCRIPTOR_HANDLE {
            ptr: self.gpu_start + index as u64 * self.increment as u64,
        }
    }
}

/// Slot allocators plus the native heaps they index into.
pub(super) struct Descriptors {
    slots: Mutex<DescriptorHeaps>,
    render_target: NativeHeap,
    depth_stencil: NativeHeap,
    shader_resource: NativeHeap,
}

impl Descriptors {
    pub(super) fn new(
        device: &ID3D12Device,
        capacities: &DescriptorHeapCapacities,
    ) -> GraphicsResult<Self> {
        Ok(Self {
            slots: Mutex::new(DescriptorHeaps::new(capacities)),
            render_target: NativeHeap::new(
                device,
                D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
                capacities.render_target,
                false,
            )?,
            depth_stencil: NativeHeap::new(
                device,
                D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
                capacities.depth_stencil,
                false,
            )?,
            shader_resource: NativeHeap::new(
                device,
                D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
                capacities.shader_resource,
                true,
            )?,
        })
    }

    /// Reserve one slot of every kind in `kinds`. Nothing stays reserved on
    /// failure.
    pub(super) fn allocate(
        &self,
        kinds: &[DescriptorHeapKind],
    ) -> GraphicsResult<Vec<(DescriptorHeapKind, u32)>> {
        let mut slots = self.slots.lock();
        let mut taken = Vec::with_capacity(kinds.len());
        for &kind in kinds {
            match slots.get_mut(kind).allocate() {
                Ok(index) => taken.push((kind, index)),
                Err(e) => {
                    for (kind, index) in taken {
                        slots.get_mut(kind).free(index);
                    }
                    return Err(e);
                }
            }
        }
        Ok(taken)
    }

    pub(super) fn free(&self, taken: &[(DescriptorHeapKind, u32)]) {
        let mut slots = self.slots.lock();
        for &(kind, index) in taken {
            slots.get_mut(kind).free(index);
        }
    }

    pub(super) fn in_use(&self, kind: DescriptorHeapKind) -> u32 {
        self.slots.lock().get(kind).in_use()
    }

    /// CPU handle of `index` in the heap of `kind`.
    pub(super) fn cpu(
        &self,
        kind: DescriptorHeapKind,
        index: u32,
    ) -> GraphicsResult<D3D12_CPU_DESCRIPTOR_HANDLE> {
        match kind {
            DescriptorHeapKind::RenderTarget => Ok(self.render_target.cpu(index)),
            DescriptorHeapKind::DepthStencil => Ok(self.depth_stencil.cpu(index)),
            DescriptorHeapKind::ShaderResource => Ok(self.shader_resource.cpu(index)),
            DescriptorHeapKind::Sampler => Err(GraphicsError::State(
                "samplers are static and have no descriptor handle".to_string(),
            )),
        }
    }

    pub(super) fn shader_resource_gpu(&self, index: u32) -> D3D12_GPU_DESCRIPTOR_HANDLE {
        self.shader_resource.gpu(index)
    }

    /// The heap command lists bind with `SetDescriptorHeaps`.
    pub(super) fn shader_visible_heap(&self) -> &ID3D12DescriptorHeap {
        self.shader_resource.heap()
    }
}
