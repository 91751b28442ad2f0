//! Buffers, textures and shaders.

use std::ffi::{CString, c_void};
use std::ptr::NonNull;
use std::sync::Arc;

use windows::Win32::Graphics::Direct3D::Fxc::{
    D3DCOMPILE_DEBUG, D3DCOMPILE_ENABLE_STRICTNESS, D3DCOMPILE_OPTIMIZATION_LEVEL3,
    D3DCOMPILE_SKIP_OPTIMIZATION, D3DCompile,
};
use windows::Win32::Graphics::Direct3D::ID3DBlob;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::core::{HSTRING, PCSTR};

use super::conversion::{depth_resource_formats, dxgi_format, resource_dimension, resource_state};
use super::{D3d12Backend, Retired, hr_error};
use crate::backend::descriptor_heap::DescriptorHeapKind;
use crate::backend::{MappedPtr, TextureMappingInfo};
use crate::compiler;
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::{
    BindFlags, BufferDescriptor, CpuAccessFlags, ResourceState, ResourceUsage, ShaderDescriptor,
    ShaderStage, TextureDescriptor, TextureDimension,
};

/// `D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING`.
const DEFAULT_COMPONENT_MAPPING: u32 = 0x1688;

/// Constant buffer views and root CBV addresses are 256-byte aligned.
const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

pub(super) fn buffer_desc(size: u64, flags: D3D12_RESOURCE_FLAGS) -> D3D12_RESOURCE_DESC {
    D3D12_RESOURCE_DESC {
        Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
        Alignment: 0,
        Width: size,
        Height: 1,
        DepthOrArraySize: 1,
        MipLevels: 1,
        Format: DXGI_FORMAT_UNKNOWN,
        SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
        Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
        Flags: flags,
    }
}

/// Where a resource lives and the state it must be created in.
fn heap_for(
    usage: ResourceUsage,
    cpu_access: CpuAccessFlags,
) -> (D3D12_HEAP_TYPE, D3D12_RESOURCE_STATES) {
    match usage {
        ResourceUsage::Default | ResourceUsage::Immutable => {
            (D3D12_HEAP_TYPE_DEFAULT, D3D12_RESOURCE_STATE_COMMON)
        }
        ResourceUsage::Staging if cpu_access.contains(CpuAccessFlags::READ) => {
            (D3D12_HEAP_TYPE_READBACK, D3D12_RESOURCE_STATE_COPY_DEST)
        }
        ResourceUsage::Dynamic | ResourceUsage::Staging => {
            (D3D12_HEAP_TYPE_UPLOAD, D3D12_RESOURCE_STATE_GENERIC_READ)
        }
    }
}

impl D3d12Backend {
    pub(super) fn create_committed(
        &self,
        heap: D3D12_HEAP_TYPE,
        desc: &D3D12_RESOURCE_DESC,
        state: D3D12_RESOURCE_STATES,
    ) -> GraphicsResult<ID3D12Resource> {
        let properties = D3D12_HEAP_PROPERTIES {
            Type: heap,
            ..Default::default()
        };
        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            self.device().CreateCommittedResource(
                &properties,
                D3D12_HEAP_FLAG_NONE,
                desc,
                state,
                None,
                &mut resource,
            )
        }
        .map_err(|e| hr_error("CreateCommittedResource", e))?;
        resource.ok_or_else(|| {
            GraphicsError::ResourceCreation("CreateCommittedResource returned nothing".to_string())
        })
    }

    /// Create an upload-heap buffer holding `data`.
    pub(super) fn create_upload_buffer(&self, data: &[u8]) -> GraphicsResult<ID3D12Resource> {
        let resource = self.create_committed(
            D3D12_HEAP_TYPE_UPLOAD,
            &buffer_desc(data.len() as u64, D3D12_RESOURCE_FLAG_NONE),
            D3D12_RESOURCE_STATE_GENERIC_READ,
        )?;
        let mapped = map_resource(&resource, false)?;
        // SAFETY: the allocation is `data.len()` bytes and not yet visible to
        // the GPU.
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.0.as_ptr(), data.len()) };
        Ok(resource)
    }
}

/// Persistently map subresource 0. Upload heaps promise not to read back.
fn map_resource(resource: &ID3D12Resource, readback: bool) -> GraphicsResult<MappedPtr> {
    let no_read = D3D12_RANGE { Begin: 0, End: 0 };
    let read_range = if readback { None } else { Some(&no_read as *const D3D12_RANGE) };
    let mut data: *mut c_void = std::ptr::null_mut();
    unsafe { resource.Map(0, read_range, Some(&mut data)) }
        .map_err(|e| hr_error("ID3D12Resource::Map", e))?;
    NonNull::new(data.cast::<u8>()).map(MappedPtr).ok_or_else(|| {
        GraphicsError::ResourceCreation("ID3D12Resource::Map returned null".to_string())
    })
}

fn set_name(resource: &ID3D12Resource, label: Option<&str>) {
    if let Some(label) = label {
        // Names only show up in debugging tools.
        let _ = unsafe { resource.SetName(&HSTRING::from(label)) };
    }
}

/// A transition barrier on every subresource of `resource`.
pub(super) fn transition_barrier(
    resource: &ID3D12Resource,
    before: D3D12_RESOURCE_STATES,
    after: D3D12_RESOURCE_STATES,
) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: std::mem::ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                // SAFETY: borrowed without AddRef; the barrier never outlives
                // `resource` and is never dropped as an owner.
                pResource: unsafe { std::mem::transmute_copy(resource) },
                StateBefore: before,
                StateAfter: after,
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
            }),
        },
    }
}

/// Committed buffer. `Dynamic` and `Staging` buffers live in upload or
/// readback heaps and stay mapped.
pub struct D3d12Buffer {
    backend: Arc<D3d12Backend>,
    resource: Option<ID3D12Resource>,
    mapped: Option<MappedPtr>,
    gpu_address: u64,
    descriptors: Vec<(DescriptorHeapKind, u32)>,
}

// SAFETY: ID3D12Resource is free-threaded; the mapping is plain memory.
unsafe impl Send for D3d12Buffer {}
unsafe impl Sync for D3d12Buffer {}

impl D3d12Buffer {
    pub(super) fn new(
        backend: &Arc<D3d12Backend>,
        descriptor: &BufferDescriptor,
        data: Option<&[u8]>,
    ) -> GraphicsResult<Self> {
        let (heap, state) = heap_for(descriptor.usage, descriptor.cpu_access);
        let flags = if descriptor.bind_flags.contains(BindFlags::UNORDERED_ACCESS)
            && heap == D3D12_HEAP_TYPE_DEFAULT
        {
            D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS
        } else {
            D3D12_RESOURCE_FLAG_NONE
        };
        let size = if descriptor.bind_flags.contains(BindFlags::CONSTANT_BUFFER) {
            descriptor.size.next_multiple_of(CONSTANT_BUFFER_ALIGNMENT)
        } else {
            descriptor.size
        };

        let needs_view = descriptor.bind_flags.intersects(
            BindFlags::CONSTANT_BUFFER | BindFlags::SHADER_RESOURCE | BindFlags::UNORDERED_ACCESS,
        );
        let descriptors = if needs_view {
            backend.descriptors().allocate(&[DescriptorHeapKind::ShaderResource])?
        } else {
            Vec::new()
        };
        let resource = match backend.create_committed(heap, &buffer_desc(size, flags), state) {
            Ok(resource) => resource,
            Err(e) => {
                backend.descriptors().free(&descriptors);
                return Err(e);
            }
        };
        set_name(&resource, descriptor.label.as_deref());

        // From here on, `Drop` releases whatever was created.
        let mut buffer = Self {
            backend: Arc::clone(backend),
            gpu_address: unsafe { resource.GetGPUVirtualAddress() },
            resource: Some(resource),
            mapped: None,
            descriptors,
        };
        if heap != D3D12_HEAP_TYPE_DEFAULT {
            let readback = heap == D3D12_HEAP_TYPE_READBACK;
            buffer.mapped = Some(map_resource(buffer.resource()?, readback)?);
        }
        if let Some(&(_, slot)) = buffer.descriptors.first() {
            buffer.create_view(descriptor, size, slot)?;
        }
        log::trace!(
            "D3d12Backend: created buffer {:?} ({} bytes, heap {:?})",
            descriptor.label,
            size,
            heap.0
        );

        if let Some(data) = data {
            match buffer.mapped {
                // SAFETY: `data` fits the buffer, checked by the device.
                Some(ptr) => unsafe {
                    std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.0.as_ptr(), data.len())
                },
                None => {
                    let target =
                        ResourceState::initial(descriptor.usage, descriptor.bind_flags, true);
                    buffer.upload(0, data, ResourceState::Common, target)?;
                }
            }
        }
        Ok(buffer)
    }

    fn create_view(
        &self,
        descriptor: &BufferDescriptor,
        size: u64,
        slot: u32,
    ) -> GraphicsResult<()> {
        let device = self.backend.device();
        let handle = self.backend.descriptors().cpu(DescriptorHeapKind::ShaderResource, slot)?;
        let resource = self.resource()?;
        if descriptor.bind_flags.contains(BindFlags::CONSTANT_BUFFER) {
            let view = D3D12_CONSTANT_BUFFER_VIEW_DESC {
                BufferLocation: self.gpu_address,
                SizeInBytes: size as u32,
            };
            unsafe { device.CreateConstantBufferView(Some(&view), handle) };
        } else {
            // Raw view over 32-bit words.
            let view = D3D12_SHADER_RESOURCE_VIEW_DESC {
                Format: DXGI_FORMAT_R32_TYPELESS,
                ViewDimension: D3D12_SRV_DIMENSION_BUFFER,
                Shader4ComponentMapping: DEFAULT_COMPONENT_MAPPING,
                Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                    Buffer: D3D12_BUFFER_SRV {
                        FirstElement: 0,
                        NumElements: (size / 4) as u32,
                        StructureByteStride: 0,
                        Flags: D3D12_BUFFER_SRV_FLAG_RAW,
                    },
                },
            };
            unsafe { device.CreateShaderResourceView(resource, Some(&view), handle) };
        }
        Ok(())
    }

    pub(super) fn resource(&self) -> GraphicsResult<&ID3D12Resource> {
        self.resource
            .as_ref()
            .ok_or_else(|| GraphicsError::State("buffer was released".to_string()))
    }

    pub(super) fn gpu_address(&self) -> u64 {
        self.gpu_address
    }

    pub fn mapped_ptr(&self) -> Option<MappedPtr> {
        self.mapped
    }

    /// Copy `data` to `offset` through an upload buffer. The buffer moves
    /// from `before` to `after`.
    fn upload(
        &self,
        offset: u64,
        data: &[u8],
        before: ResourceState,
        after: ResourceState,
    ) -> GraphicsResult<()> {
        let staging = self.backend.create_upload_buffer(data)?;
        let target = self.resource()?;
        let copy_dest = D3D12_RESOURCE_STATE_COPY_DEST;
        self.backend.one_shot(Some(staging.clone()), |list| unsafe {
            if before != ResourceState::Common && before != ResourceState::CopyDest {
                let barrier = transition_barrier(target, resource_state(before), copy_dest);
                list.ResourceBarrier(&[barrier]);
            }
            list.CopyBufferRegion(target, offset, &staging, 0, data.len() as u64);
            // Buffers copied from COMMON were promoted to COPY_DEST.
            if after != ResourceState::CopyDest {
                let barrier = transition_barrier(target, copy_dest, resource_state(after));
                list.ResourceBarrier(&[barrier]);
            }
        })
    }

    /// Write `data` at `offset`: directly for mapped memory, otherwise with an
    /// upload copy that returns the buffer to `state` afterwards.
    pub fn update(&self, offset: u64, data: &[u8], state: ResourceState) -> GraphicsResult<()> {
        match self.mapped {
            Some(ptr) => {
                // SAFETY: the range was bounds-checked by the caller.
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        data.as_ptr(),
                        ptr.0.as_ptr().add(offset as usize),
                        data.len(),
                    )
                };
                Ok(())
            }
            None => self.upload(offset, data, state, state),
        }
    }
}

impl Drop for D3d12Buffer {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.backend.defer(Retired::Resource(resource));
        }
        if !self.descriptors.is_empty() {
            self.backend.defer(Retired::Descriptors(std::mem::take(&mut self.descriptors)));
        }
    }
}

/// Placement of one subresource inside a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct SubresourceLayout {
    pub offset: u64,
    pub row_pitch: u64,
    /// Rows per depth slice.
    pub rows: u32,
    /// Bytes of texel data per row.
    pub row_size: u64,
    pub depth: u32,
}

/// Scatter tightly packed subresources into their padded placement.
pub(super) fn copy_to_layouts(dst: &mut [u8], src: &[u8], layouts: &[SubresourceLayout]) {
    let mut read = 0usize;
    for layout in layouts {
        let row_size = layout.row_size as usize;
        for z in 0..layout.depth as u64 {
            for y in 0..layout.rows as u64 {
                let row_index = z * layout.rows as u64 + y;
                let write = (layout.offset + row_index * layout.row_pitch) as usize;
                let Some(row) = src.get(read..read + row_size) else {
                    return;
                };
                dst[write..write + row_size].copy_from_slice(row);
                read += row_size;
            }
        }
    }
}

/// Resource description of a texture. Depth textures that are also sampled
/// use the typeless family of their format.
fn texture_desc(descriptor: &TextureDescriptor) -> D3D12_RESOURCE_DESC {
    let flags = descriptor.bind_flags;
    let mut resource_flags = D3D12_RESOURCE_FLAG_NONE;
    if flags.contains(BindFlags::RENDER_TARGET) {
        resource_flags |= D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET;
    }
    if flags.contains(BindFlags::DEPTH_STENCIL) {
        resource_flags |= D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL;
        if !flags.contains(BindFlags::SHADER_RESOURCE) {
            resource_flags |= D3D12_RESOURCE_FLAG_DENY_SHADER_RESOURCE;
        }
    }
    if flags.contains(BindFlags::UNORDERED_ACCESS) {
        resource_flags |= D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS;
    }
    let format = match depth_resource_formats(descriptor.format) {
        Some((typeless, _)) if flags.contains(BindFlags::SHADER_RESOURCE) => typeless,
        _ => dxgi_format(descriptor.format),
    };
    let depth_or_layers = match descriptor.dimension {
        TextureDimension::D3 => descriptor.depth.max(1),
        _ => descriptor.layer_count(),
    };
    D3D12_RESOURCE_DESC {
        Dimension: resource_dimension(descriptor.dimension),
        Alignment: 0,
        Width: descriptor.width as u64,
        Height: if descriptor.dimension == TextureDimension::D1 {
            1
        } else {
            descriptor.height.max(1)
        },
        DepthOrArraySize: depth_or_layers as u16,
        MipLevels: descriptor.mip_levels as u16,
        Format: format,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: descriptor.sample_count.max(1),
            Quality: 0,
        },
        Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
        Flags: resource_flags,
    }
}

/// Shader resource view covering every mip and layer of a texture.
pub(super) fn srv_desc(descriptor: &TextureDescriptor) -> D3D12_SHADER_RESOURCE_VIEW_DESC {
    let format = depth_resource_formats(descriptor.format)
        .map(|(_, view)| view)
        .unwrap_or_else(|| dxgi_format(descriptor.format));
    let mips = descriptor.mip_levels;
    let layers = descriptor.array_size;
    let (dimension, anonymous) = match descriptor.dimension {
        TextureDimension::D1 if layers > 1 => (
            D3D12_SRV_DIMENSION_TEXTURE1DARRAY,
            D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture1DArray: D3D12_TEX1D_ARRAY_SRV {
                    MipLevels: mips,
                    ArraySize: layers,
                    ..Default::default()
                },
            },
        ),
        TextureDimension::D1 => (
            D3D12_SRV_DIMENSION_TEXTURE1D,
            D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture1D: D3D12_TEX1D_SRV {
                    MipLevels: mips,
                    ..Default::default()
                },
            },
        ),
        TextureDimension::D2 if descriptor.sample_count > 1 => (
            D3D12_SRV_DIMENSION_TEXTURE2DMS,
            D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2DMS: D3D12_TEX2DMS_SRV::default(),
            },
        ),
        TextureDimension::D2 if layers > 1 => (
            D3D12_SRV_DIMENSION_TEXTURE2DARRAY,
            D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2DArray: D3D12_TEX2D_ARRAY_SRV {
                    MipLevels: mips,
                    ArraySize: layers,
                    ..Default::default()
                },
            },
        ),
        TextureDimension::D2 => (
            D3D12_SRV_DIMENSION_TEXTURE2D,
            D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_SRV {
                    MipLevels: mips,
                    ..Default::default()
                },
            },
        ),
        TextureDimension::D3 => (
            D3D12_SRV_DIMENSION_TEXTURE3D,
            D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture3D: D3D12_TEX3D_SRV {
                    MipLevels: mips,
                    ..Default::default()
                },
            },
        ),
        TextureDimension::Cube if layers > 1 => (
            D3D12_SRV_DIMENSION_TEXTURECUBEARRAY,
            D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                TextureCubeArray: D3D12_TEXCUBE_ARRAY_SRV {
                    MipLevels: mips,
                    NumCubes: layers,
                    ..Default::default()
                },
            },
        ),
        TextureDimension::Cube => (
            D3D12_SRV_DIMENSION_TEXTURECUBE,
            D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                TextureCube: D3D12_TEXCUBE_SRV {
                    MipLevels: mips,
                    ..Default::default()
                },
            },
        ),
    };
    D3D12_SHADER_RESOURCE_VIEW_DESC {
        Format: format,
        ViewDimension: dimension,
        Shader4ComponentMapping: DEFAULT_COMPONENT_MAPPING,
        Anonymous: anonymous,
    }
}

fn dsv_desc(descriptor: &TextureDescriptor) -> D3D12_DEPTH_STENCIL_VIEW_DESC {
    let layers = descriptor.layer_count();
    let (dimension, anonymous) = if layers > 1 {
        (
            D3D12_DSV_DIMENSION_TEXTURE2DARRAY,
            D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                Texture2DArray: D3D12_TEX2D_ARRAY_DSV {
                    MipSlice: 0,
                    FirstArraySlice: 0,
                    ArraySize: layers,
                },
            },
        )
    } else if descriptor.sample_count > 1 {
        (
            D3D12_DSV_DIMENSION_TEXTURE2DMS,
            D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                Texture2DMS: D3D12_TEX2DMS_DSV::default(),
            },
        )
    } else {
        (
            D3D12_DSV_DIMENSION_TEXTURE2D,
            D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_DSV { MipSlice: 0 },
            },
        )
    };
    D3D12_DEPTH_STENCIL_VIEW_DESC {
        Format: dxgi_format(descriptor.format),
        ViewDimension: dimension,
        Flags: D3D12_DSV_FLAG_NONE,
        Anonymous: anonymous,
    }
}

#[derive(Debug, Clone, Copy)]
enum View {
    RenderTarget,
    DepthStencil,
    ShaderResource,
    UnorderedAccess,
}

enum TextureStorage {
    Texture(ID3D12Resource),
    /// Staging textures are buffers holding every subresource at its
    /// copyable footprint.
    Staging {
        buffer: ID3D12Resource,
        mapped: MappedPtr,
        footprints: Vec<D3D12_PLACED_SUBRESOURCE_FOOTPRINT>,
        size: u64,
    },
}

/// Footprints of every subresource of `desc`, plus the total size.
fn copyable_footprints(
    device: &ID3D12Device,
    desc: &D3D12_RESOURCE_DESC,
    count: u32,
) -> (Vec<D3D12_PLACED_SUBRESOURCE_FOOTPRINT>, Vec<SubresourceLayout>, u64) {
    let n = count as usize;
    let mut footprints = vec![D3D12_PLACED_SUBRESOURCE_FOOTPRINT::default(); n];
    let mut rows = vec![0u32; n];
    let mut row_sizes = vec![0u64; n];
    let mut total = 0u64;
    unsafe {
        device.GetCopyableFootprints(
            desc,
            0,
            count,
            0,
            Some(footprints.as_mut_ptr()),
            Some(rows.as_mut_ptr()),
            Some(row_sizes.as_mut_ptr()),
            Some(&mut total),
        )
    };
    let layouts = footprints
        .iter()
        .zip(rows.iter().zip(&row_sizes))
        .map(|(footprint, (&rows, &row_size))| SubresourceLayout {
            offset: footprint.Offset,
            row_pitch: footprint.Footprint.RowPitch as u64,
            rows,
            row_size,
            depth: footprint.Footprint.Depth,
        })
        .collect();
    (footprints, layouts, total)
}

/// Texture: a committed resource with its views, or a mapped buffer for
/// `Staging` textures.
pub struct D3d12Texture {
    backend: Arc<D3d12Backend>,
    storage: Option<TextureStorage>,
    descriptor: TextureDescriptor,
    rtv: Option<u32>,
    dsv: Option<u32>,
    srv: Option<u32>,
    descriptors: Vec<(DescriptorHeapKind, u32)>,
}

// SAFETY: ID3D12Resource is free-threaded; the mapping is plain memory.
unsafe impl Send for D3d12Texture {}
unsafe impl Sync for D3d12Texture {}

impl D3d12Texture {
    pub(super) fn new(
        backend: &Arc<D3d12Backend>,
        descriptor: &TextureDescriptor,
        data: Option<&[u8]>,
    ) -> GraphicsResult<Self> {
        if descriptor.usage == ResourceUsage::Staging {
            return Self::new_staging(backend, descriptor, data);
        }
        if data.is_some() && descriptor.format.has_stencil() {
            return Err(GraphicsError::UnsupportedOperation(format!(
                "initial data for {:?} textures",
                descriptor.format
            )));
        }

        let desc = texture_desc(descriptor);
        let initial = if data.is_some() {
            D3D12_RESOURCE_STATE_COPY_DEST
        } else {
            resource_state(ResourceState::initial(descriptor.usage, descriptor.bind_flags, false))
        };
        let resource = backend.create_committed(D3D12_HEAP_TYPE_DEFAULT, &desc, initial)?;
        set_name(&resource, descriptor.label.as_deref());

        let mut texture = Self::wrap(backend, resource, descriptor.clone())?;
        if let Some(data) = data {
            texture.upload(&desc, data)?;
        }
        log::trace!(
            "D3d12Backend: created texture {:?} ({}x{}x{}, {:?})",
            descriptor.label,
            descriptor.width,
            descriptor.height,
            descriptor.depth,
            desc.Format
        );
        Ok(texture)
    }

    fn new_staging(
        backend: &Arc<D3d12Backend>,
        descriptor: &TextureDescriptor,
        data: Option<&[u8]>,
    ) -> GraphicsResult<Self> {
        let image_desc = D3D12_RESOURCE_DESC {
            Format: dxgi_format(descriptor.format),
            Flags: D3D12_RESOURCE_FLAG_NONE,
            ..texture_desc(descriptor)
        };
        let count = descriptor.mip_levels * descriptor.layer_count();
        let (footprints, layouts, size) = copyable_footprints(backend.device(), &image_desc, count);

        let (heap, state) = heap_for(descriptor.usage, descriptor.cpu_access);
        let desc = buffer_desc(size, D3D12_RESOURCE_FLAG_NONE);
        let buffer = backend.create_committed(heap, &desc, state)?;
        set_name(&buffer, descriptor.label.as_deref());
        let mapped = map_resource(&buffer, heap == D3D12_HEAP_TYPE_READBACK)?;
        if let Some(data) = data {
            // SAFETY: the mapping spans `size` bytes and is not yet in use.
            let dst = unsafe { std::slice::from_raw_parts_mut(mapped.0.as_ptr(), size as usize) };
            copy_to_layouts(dst, data, &layouts);
        }
        Ok(Self {
            backend: Arc::clone(backend),
            storage: Some(TextureStorage::Staging {
                buffer,
                mapped,
                footprints,
                size,
            }),
            descriptor: descriptor.clone(),
            rtv: None,
            dsv: None,
            srv: None,
            descriptors: Vec::new(),
        })
    }

    /// Wrap a swap chain buffer.
    pub(super) fn from_swap_chain_buffer(
        backend: &Arc<D3d12Backend>,
        resource: ID3D12Resource,
        descriptor: TextureDescriptor,
    ) -> GraphicsResult<Self> {
        let texture = Self::wrap(backend, resource, descriptor)?;
        // The buffer itself has the linear format; an sRGB view does the
        // encoding on write.
        if let (Some(slot), Some(TextureStorage::Texture(resource))) =
            (texture.rtv, &texture.storage)
        {
            let view = D3D12_RENDER_TARGET_VIEW_DESC {
                Format: dxgi_format(texture.descriptor.format),
                ViewDimension: D3D12_RTV_DIMENSION_TEXTURE2D,
                Anonymous: D3D12_RENDER_TARGET_VIEW_DESC_0 {
                    Texture2D: D3D12_TEX2D_RTV { MipSlice: 0, PlaneSlice: 0 },
                },
            };
            let handle = backend.descriptors().cpu(DescriptorHeapKind::RenderTarget, slot)?;
            unsafe { backend.device().CreateRenderTargetView(resource, Some(&view), handle) };
        }
        Ok(texture)
    }

    /// Take ownership of `resource` and create the views its bind flags ask for.
    fn wrap(
        backend: &Arc<D3d12Backend>,
        resource: ID3D12Resource,
        descriptor: TextureDescriptor,
    ) -> GraphicsResult<Self> {
        let flags = descriptor.bind_flags;
        let views: Vec<(View, DescriptorHeapKind)> = [
            (BindFlags::RENDER_TARGET, View::RenderTarget, DescriptorHeapKind::RenderTarget),
            (BindFlags::DEPTH_STENCIL, View::DepthStencil, DescriptorHeapKind::DepthStencil),
            (BindFlags::SHADER_RESOURCE, View::ShaderResource, DescriptorHeapKind::ShaderResource),
            (
                BindFlags::UNORDERED_ACCESS,
                View::UnorderedAccess,
                DescriptorHeapKind::ShaderResource,
            ),
        ]
        .into_iter()
        .filter(|(flag, _, _)| flags.contains(*flag))
        .map(|(_, view, kind)| (view, kind))
        .collect();
        let kinds: Vec<DescriptorHeapKind> = views.iter().map(|(_, kind)| *kind).collect();
        let descriptors = match backend.descriptors().allocate(&kinds) {
            Ok(descriptors) => descriptors,
            Err(e) => {
                backend.defer(Retired::Resource(resource));
                return Err(e);
            }
        };

        let device = backend.device();
        let mut texture = Self {
            backend: Arc::clone(backend),
            storage: None,
            descriptor,
            rtv: None,
            dsv: None,
            srv: None,
            descriptors,
        };
        // Slots come back in the order they were asked for.
        for (&(view, kind), &(_, slot)) in views.iter().zip(texture.descriptors.iter()) {
            let handle = backend.descriptors().cpu(kind, slot)?;
            unsafe {
                match view {
                    View::RenderTarget => {
                        device.CreateRenderTargetView(&resource, None, handle);
                        texture.rtv = Some(slot);
                    }
                    View::DepthStencil => {
                        let desc = dsv_desc(&texture.descriptor);
                        device.CreateDepthStencilView(&resource, Some(&desc), handle);
                        texture.dsv = Some(slot);
                    }
                    View::ShaderResource => {
                        let desc = srv_desc(&texture.descriptor);
                        device.CreateShaderResourceView(&resource, Some(&desc), handle);
                        texture.srv = Some(slot);
                    }
                    View::UnorderedAccess => {
                        device.CreateUnorderedAccessView(&resource, None, None, handle)
                    }
                }
            }
        }
        texture.storage = Some(TextureStorage::Texture(resource));
        Ok(texture)
    }

    fn upload(&mut self, desc: &D3D12_RESOURCE_DESC, data: &[u8]) -> GraphicsResult<()> {
        let count = self.descriptor.mip_levels * self.descriptor.layer_count();
        let (footprints, layouts, size) = copyable_footprints(self.backend.device(), desc, count);
        let mut staged = vec![0u8; size as usize];
        copy_to_layouts(&mut staged, data, &layouts);
        let staging = self.backend.create_upload_buffer(&staged)?;

        let target = self.resource()?;
        let settled = resource_state(ResourceState::initial(
            self.descriptor.usage,
            self.descriptor.bind_flags,
            true,
        ));
        self.backend.one_shot(Some(staging.clone()), |list| unsafe {
            for (index, footprint) in footprints.iter().enumerate() {
                let dst = subresource_location(target, index as u32);
                let src = footprint_location(&staging, *footprint);
                list.CopyTextureRegion(&dst, 0, 0, 0, &src, None);
            }
            if settled != D3D12_RESOURCE_STATE_COPY_DEST {
                let barrier = transition_barrier(target, D3D12_RESOURCE_STATE_COPY_DEST, settled);
                list.ResourceBarrier(&[barrier]);
            }
        })
    }

    pub(super) fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    /// The texture resource, or the buffer behind a staging texture.
    pub(super) fn resource(&self) -> GraphicsResult<&ID3D12Resource> {
        match &self.storage {
            Some(TextureStorage::Texture(resource)) => Ok(resource),
            Some(TextureStorage::Staging { buffer, .. }) => Ok(buffer),
            None => Err(GraphicsError::State("texture was released".to_string())),
        }
    }

    /// Subresource footprints of a staging texture.
    pub(super) fn footprints(&self) -> Option<&[D3D12_PLACED_SUBRESOURCE_FOOTPRINT]> {
        match &self.storage {
            Some(TextureStorage::Staging { footprints, .. }) => Some(footprints),
            _ => None,
        }
    }

    pub(super) fn is_staging(&self) -> bool {
        matches!(self.storage, Some(TextureStorage::Staging { .. }))
    }

    pub(super) fn rtv(&self) -> GraphicsResult<D3D12_CPU_DESCRIPTOR_HANDLE> {
        self.view(self.rtv, DescriptorHeapKind::RenderTarget, "render target")
    }

    pub(super) fn dsv(&self) -> GraphicsResult<D3D12_CPU_DESCRIPTOR_HANDLE> {
        self.view(self.dsv, DescriptorHeapKind::DepthStencil, "depth/stencil")
    }

    pub(super) fn srv(&self) -> GraphicsResult<D3D12_GPU_DESCRIPTOR_HANDLE> {
        self.srv
            .map(|slot| self.backend.descriptors().shader_resource_gpu(slot))
            .ok_or_else(|| self.missing_view("shader resource"))
    }

    fn view(
        &self,
        slot: Option<u32>,
        kind: DescriptorHeapKind,
        what: &str,
    ) -> GraphicsResult<D3D12_CPU_DESCRIPTOR_HANDLE> {
        let slot = slot.ok_or_else(|| self.missing_view(what))?;
        self.backend.descriptors().cpu(kind, slot)
    }

    fn missing_view(&self, what: &str) -> GraphicsError {
        GraphicsError::State(format!("texture {:?} has no {what} view", self.descriptor.label))
    }

    pub fn mapping(&self) -> Option<TextureMappingInfo> {
        match &self.storage {
            Some(TextureStorage::Staging {
                mapped,
                footprints,
                size,
                ..
            }) => Some(TextureMappingInfo {
                ptr: *mapped,
                len: *size as usize,
                row_pitch: footprints.first()?.Footprint.RowPitch,
            }),
            _ => None,
        }
    }
}

impl Drop for D3d12Texture {
    fn drop(&mut self) {
        match self.storage.take() {
            Some(TextureStorage::Texture(resource)) => {
                self.backend.defer(Retired::Resource(resource))
            }
            Some(TextureStorage::Staging { buffer, .. }) => {
                self.backend.defer(Retired::Resource(buffer))
            }
            None => {}
        }
        if !self.descriptors.is_empty() {
            self.backend.defer(Retired::Descriptors(std::mem::take(&mut self.descriptors)));
        }
    }
}

/// Copy location naming subresource `index` of `resource`.
pub(super) fn subresource_location(
    resource: &ID3D12Resource,
    index: u32,
) -> D3D12_TEXTURE_COPY_LOCATION {
    D3D12_TEXTURE_COPY_LOCATION {
        // SAFETY: borrowed without AddRef, as in `transition_barrier`.
        pResource: unsafe { std::mem::transmute_copy(resource) },
        Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
        Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 { SubresourceIndex: index },
    }
}

/// Copy location naming a placed footprint inside `buffer`.
pub(super) fn footprint_location(
    buffer: &ID3D12Resource,
    footprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT,
) -> D3D12_TEXTURE_COPY_LOCATION {
    D3D12_TEXTURE_COPY_LOCATION {
        // SAFETY: borrowed without AddRef, as in `transition_barrier`.
        pResource: unsafe { std::mem::transmute_copy(buffer) },
        Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
        Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 { PlacedFootprint: footprint },
    }
}

/// DXBC bytecode compiled from the HLSL lowering of a WGSL module.
pub struct D3d12Shader {
    bytecode: Vec<u8>,
    stage: ShaderStage,
}

fn blob_bytes(blob: &ID3DBlob) -> &[u8] {
    // SAFETY: the blob owns `GetBufferSize()` bytes at `GetBufferPointer()`.
    unsafe {
        std::slice::from_raw_parts(blob.GetBufferPointer().cast::<u8>(), blob.GetBufferSize())
    }
}

impl D3d12Shader {
    pub(super) fn new(
        backend: &Arc<D3d12Backend>,
        descriptor: &ShaderDescriptor,
    ) -> GraphicsResult<Self> {
        let stage = descriptor.stage;
        let compilation = |diagnostic: String| GraphicsError::Compilation { stage, diagnostic };

        let module = compiler::compile(descriptor)?;
        let (source, entry) = module.to_hlsl()?;
        let profile = compiler::hlsl_profile(stage, &descriptor.profile);
        let entry = CString::new(entry)
            .map_err(|_| compilation("entry point contains a NUL byte".to_string()))?;
        let target = CString::new(profile.as_str())
            .map_err(|_| compilation("profile contains a NUL byte".to_string()))?;

        let flags = if backend.debug_layer() {
            D3DCOMPILE_ENABLE_STRICTNESS | D3DCOMPILE_DEBUG | D3DCOMPILE_SKIP_OPTIMIZATION
        } else {
            D3DCOMPILE_ENABLE_STRICTNESS | D3DCOMPILE_OPTIMIZATION_LEVEL3
        };
        let mut code: Option<ID3DBlob> = None;
        let mut errors: Option<ID3DBlob> = None;
        let result = unsafe {
            D3DCompile(
                source.as_ptr().cast(),
                source.len(),
                PCSTR::null(),
                None,
                None,
                PCSTR(entry.as_ptr().cast()),
                PCSTR(target.as_ptr().cast()),
                flags,
                0,
                &mut code,
                Some(&mut errors),
            )
        };
        if let Err(e) = result {
            let diagnostic = errors
                .as_ref()
                .map(|blob| {
                    String::from_utf8_lossy(blob_bytes(blob)).trim_end_matches('\0').to_string()
                })
                .unwrap_or_else(|| e.to_string());
            return Err(compilation(diagnostic));
        }
        let code = code.ok_or_else(|| compilation("D3DCompile produced no bytecode".to_string()))?;
        let bytecode = blob_bytes(&code).to_vec();
        log::trace!(
            "D3d12Backend: compiled {:?} shader '{}' ({} bytes, {})",
            stage,
            descriptor.entry_point,
            bytecode.len(),
            profile
        );
        Ok(Self { bytecode, stage })
    }

    pub(super) fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub(super) fn bytecode(&self) -> D3D12_SHADER_BYTECODE {
        D3D12_SHADER_BYTECODE {
            pShaderBytecode: self.bytecode.as_ptr().cast(),
            BytecodeLength: self.bytecode.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TextureFormat;

    #[test]
    fn test_copy_to_layouts_pads_rows() {
        let layouts = [SubresourceLayout {
            offset: 0,
            row_pitch: 8,
            rows: 2,
            row_size: 3,
            depth: 1,
        }];
        let mut dst = [0u8; 16];
        copy_to_layouts(&mut dst, &[1, 2, 3, 4, 5, 6], &layouts);
        assert_eq!(dst, [1, 2, 3, 0, 0, 0, 0, 0, 4, 5, 6, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_copy_to_layouts_follows_offsets() {
        let layouts = [
            SubresourceLayout {
                offset: 0,
                row_pitch: 4,
                rows: 1,
                row_size: 2,
                depth: 1,
            },
            SubresourceLayout {
                offset: 8,
                row_pitch: 4,
                rows: 1,
                row_size: 1,
                depth: 2,
            },
        ];
        let mut dst = [0u8; 16];
        copy_to_layouts(&mut dst, &[1, 2, 3, 4], &layouts);
        assert_eq!(&dst[..2], &[1, 2]);
        assert_eq!(dst[8], 3);
        assert_eq!(dst[12], 4);
    }

    #[test]
    fn test_sampled_depth_uses_typeless_resource() {
        let desc = TextureDescriptor {
            bind_flags: BindFlags::DEPTH_STENCIL | BindFlags::SHADER_RESOURCE,
            ..TextureDescriptor::depth_stencil(64, 64, TextureFormat::Depth32Float)
        };
        assert_eq!(texture_desc(&desc).Format, DXGI_FORMAT_R32_TYPELESS);
        assert_eq!(srv_desc(&desc).Format, DXGI_FORMAT_R32_FLOAT);

        let plain = TextureDescriptor::depth_stencil(64, 64, TextureFormat::Depth32Float);
        let resource = texture_desc(&plain);
        assert_eq!(resource.Format, DXGI_FORMAT_D32_FLOAT);
        assert!(resource.Flags.contains(D3D12_RESOURCE_FLAG_DENY_SHADER_RESOURCE));
    }

    #[test]
    fn test_cube_views() {
        let cube =
            TextureDescriptor::new_2d(16, 16, TextureFormat::Rgba8Unorm, BindFlags::SHADER_RESOURCE)
                .with_dimension(TextureDimension::Cube);
        assert_eq!(texture_desc(&cube).DepthOrArraySize, 6);
        assert_eq!(srv_desc(&cube).ViewDimension, D3D12_SRV_DIMENSION_TEXTURECUBE);
        let cubes = cube.with_array_size(2);
        assert_eq!(srv_desc(&cubes).ViewDimension, D3D12_SRV_DIMENSION_TEXTURECUBEARRAY);
    }
}
