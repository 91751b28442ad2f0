//! Buffers, textures and shader modules.

use std::ffi::CString;
use std::sync::Arc;

use ash::vk;

use super::barriers::BarrierBatch;
use super::conversion::{buffer_usage, image_type, image_usage, sampled_view_type};
use super::deferred::DeferredResource;
use super::layout::{StateAccess, aspect_mask, state_access};
use super::memory::{MemoryBlock, MemoryLocation};
use super::{VulkanBackend, vk_error};
use crate::backend::{MappedPtr, TextureMappingInfo};
use crate::compiler;
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::{
    BindFlags, BufferDescriptor, ResourceState, ResourceUsage, ShaderDescriptor, ShaderStage,
    TextureDescriptor, TextureDimension,
};

/// Create a buffer bound to a fresh sub-allocation.
pub(super) fn create_raw_buffer(
    backend: &VulkanBackend,
    name: &str,
    size: u64,
    usage: vk::BufferUsageFlags,
    location: MemoryLocation,
) -> GraphicsResult<(vk::Buffer, MemoryBlock)> {
    let device = backend.device();
    let create_info = vk::BufferCreateInfo::default()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);
    let buffer = unsafe { device.create_buffer(&create_info, None) }
        .map_err(|e| vk_error("vkCreateBuffer", e))?;

    let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
    let memory = match backend.allocate(name, requirements, location, true) {
        Ok(memory) => memory,
        Err(e) => {
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(e);
        }
    };
    if let Err(e) = unsafe { device.bind_buffer_memory(buffer, memory.memory(), memory.offset()) } {
        unsafe { device.destroy_buffer(buffer, None) };
        backend.free(memory);
        return Err(vk_error("vkBindBufferMemory", e));
    }
    Ok((buffer, memory))
}

/// Copy regions for tightly packed data covering every subresource, ordered
/// by array layer and then by mip level.
pub(super) fn copy_regions(
    descriptor: &TextureDescriptor,
    aspect: vk::ImageAspectFlags,
) -> Vec<vk::BufferImageCopy> {
    let count = descriptor.layer_count() * descriptor.mip_levels;
    let mut regions = Vec::with_capacity(count as usize);
    let mut offset = 0u64;
    for layer in 0..descriptor.layer_count() {
        for mip in 0..descriptor.mip_levels {
            let extent = descriptor.extent().mip_level(mip);
            regions.push(vk::BufferImageCopy {
                buffer_offset: offset,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: aspect,
                    mip_level: mip,
                    base_array_layer: layer,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D::default(),
                image_extent: vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: extent.depth,
                },
            });
            offset += descriptor.mip_size_in_bytes(mip);
        }
    }
    regions
}

/// Buffer with its own sub-allocation. `Dynamic` and `Staging` buffers are
/// host visible and persistently mapped.
pub struct VulkanBuffer {
    backend: Arc<VulkanBackend>,
    buffer: vk::Buffer,
    memory: Option<MemoryBlock>,
}

impl VulkanBuffer {
    pub(super) fn new(
        backend: &Arc<VulkanBackend>,
        descriptor: &BufferDescriptor,
        data: Option<&[u8]>,
    ) -> GraphicsResult<Self> {
        let location = if descriptor.usage.is_host_visible() {
            MemoryLocation::Host {
                readback: descriptor.usage == ResourceUsage::Staging,
            }
        } else {
            MemoryLocation::Device
        };
        let (buffer, memory) = create_raw_buffer(
            backend,
            descriptor.label.as_deref().unwrap_or("buffer"),
            descriptor.size,
            buffer_usage(descriptor.bind_flags),
            location,
        )?;
        let buffer = Self {
            backend: Arc::clone(backend),
            buffer,
            memory: Some(memory),
        };
        log::trace!(
            "VulkanBackend: created buffer {:?} ({} bytes, {:?})",
            descriptor.label,
            descriptor.size,
            location
        );

        if let Some(data) = data {
            match buffer.mapped_ptr() {
                // SAFETY: `data` fits the buffer, checked by the device.
                Some(ptr) => unsafe {
                    std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.0.as_ptr(), data.len())
                },
                None => {
                    let target =
                        ResourceState::initial(descriptor.usage, descriptor.bind_flags, true);
                    buffer.upload(0, data, None, target)?;
                }
            }
        }
        Ok(buffer)
    }

    pub(super) fn raw(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn mapped_ptr(&self) -> Option<MappedPtr> {
        self.memory.as_ref().and_then(MemoryBlock::mapped)
    }

    /// Copy `data` to `offset` through a staging buffer. The buffer moves
    /// from `before` (undefined contents when `None`) to `after`.
    fn upload(
        &self,
        offset: u64,
        data: &[u8],
        before: Option<ResourceState>,
        after: ResourceState,
    ) -> GraphicsResult<()> {
        let (staging, staging_memory) = self.backend.create_staging_buffer(data)?;
        let target = self.buffer;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: offset,
            size: data.len() as u64,
        };
        self.backend.one_shot(
            Some(DeferredResource::Buffer {
                buffer: staging,
                memory: staging_memory,
            }),
            |device, cmd| {
                let copy_dest = state_access(ResourceState::CopyDest);
                let mut barriers = BarrierBatch::default();
                if let Some(before) = before {
                    barriers.add_buffer_barrier(target, state_access(before), copy_dest);
                    barriers.flush(device, cmd);
                }
                unsafe { device.cmd_copy_buffer(cmd, staging, target, &[region]) };
                barriers.add_buffer_barrier(target, copy_dest, state_access(after));
                barriers.flush(device, cmd);
            },
        )
    }

    /// Write `data` at `offset`: directly for mapped memory, otherwise with a
    /// staging copy that returns the buffer to `state` afterwards.
    pub fn update(&self, offset: u64, data: &[u8], state: ResourceState) -> GraphicsResult<()> {
        match self.mapped_ptr() {
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
            None => self.upload(offset, data, Some(state), state),
        }
    }
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        if let Some(memory) = self.memory.take() {
            self.backend.defer(DeferredResource::Buffer {
                buffer: self.buffer,
                memory,
            });
        }
    }
}

enum TextureStorage {
    /// `memory` is `None` for swap chain images, which the swap chain owns.
    Image {
        image: vk::Image,
        memory: Option<MemoryBlock>,
    },
    /// Staging textures are linear host-visible buffers.
    Staging {
        buffer: vk::Buffer,
        memory: Option<MemoryBlock>,
    },
}

/// Texture: an optimally tiled image with its views, or a host-visible
/// buffer for `Staging` textures.
pub struct VulkanTexture {
    backend: Arc<VulkanBackend>,
    storage: TextureStorage,
    descriptor: TextureDescriptor,
    format: vk::Format,
    sampled_view: Option<vk::ImageView>,
    attachment_view: Option<vk::ImageView>,
}

fn create_view(
    device: &ash::Device,
    image: vk::Image,
    view_type: vk::ImageViewType,
    format: vk::Format,
    range: vk::ImageSubresourceRange,
) -> GraphicsResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(view_type)
        .format(format)
        .subresource_range(range);
    unsafe { device.create_image_view(&create_info, None) }
        .map_err(|e| vk_error("vkCreateImageView", e))
}

impl VulkanTexture {
    pub(super) fn new(
        backend: &Arc<VulkanBackend>,
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

        let device = backend.device();
        let format = backend.texture_format(descriptor.format);
        let extent = descriptor.extent();
        let flags = if descriptor.dimension == TextureDimension::Cube {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };
        let create_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(image_type(descriptor.dimension))
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: extent.depth,
            })
            .mip_levels(descriptor.mip_levels)
            .array_layers(descriptor.layer_count())
            .samples(vk::SampleCountFlags::from_raw(descriptor.sample_count))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(image_usage(descriptor.bind_flags))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { device.create_image(&create_info, None) }
            .map_err(|e| vk_error("vkCreateImage", e))?;

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let name = descriptor.label.as_deref().unwrap_or("texture");
        let memory = match backend.allocate(name, requirements, MemoryLocation::Device, false) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };
        let bound = unsafe { device.bind_image_memory(image, memory.memory(), memory.offset()) };
        if let Err(e) = bound {
            unsafe { device.destroy_image(image, None) };
            backend.free(memory);
            return Err(vk_error("vkBindImageMemory", e));
        }

        // From here on, `Drop` releases whatever was created.
        let mut texture = Self {
            backend: Arc::clone(backend),
            storage: TextureStorage::Image {
                image,
                memory: Some(memory),
            },
            descriptor: descriptor.clone(),
            format,
            sampled_view: None,
            attachment_view: None,
        };
        texture.create_views(image)?;

        match data {
            Some(data) => texture.upload(image, data)?,
            None => texture.initialize_layout(image)?,
        }
        log::trace!(
            "VulkanBackend: created texture {:?} ({}x{}x{}, {:?})",
            descriptor.label,
            descriptor.width,
            descriptor.height,
            descriptor.depth,
            format
        );
        Ok(texture)
    }

    fn new_staging(
        backend: &Arc<VulkanBackend>,
        descriptor: &TextureDescriptor,
        data: Option<&[u8]>,
    ) -> GraphicsResult<Self> {
        let (buffer, memory) = create_raw_buffer(
            backend,
            descriptor.label.as_deref().unwrap_or("staging texture"),
            descriptor.size_in_bytes(),
            vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::Host { readback: true },
        )?;
        if let (Some(data), Some(mapped)) = (data, memory.mapped()) {
            // SAFETY: the device checked that `data` covers exactly the texture.
            unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.0.as_ptr(), data.len()) };
        }
        Ok(Self {
            backend: Arc::clone(backend),
            storage: TextureStorage::Staging {
                buffer,
                memory: Some(memory),
            },
            descriptor: descriptor.clone(),
            format: backend.texture_format(descriptor.format),
            sampled_view: None,
            attachment_view: None,
        })
    }

    /// Wrap a swap chain image. The image itself stays owned by the swap chain.
    pub(super) fn from_swap_chain_image(
        backend: &Arc<VulkanBackend>,
        image: vk::Image,
        format: vk::Format,
        descriptor: TextureDescriptor,
    ) -> GraphicsResult<Self> {
        let mut texture = Self {
            backend: Arc::clone(backend),
            storage: TextureStorage::Image { image, memory: None },
            descriptor,
            format,
            sampled_view: None,
            attachment_view: None,
        };
        texture.create_views(image)?;
        Ok(texture)
    }

    fn create_views(&mut self, image: vk::Image) -> GraphicsResult<()> {
        let device = self.backend.device();
        let flags = self.descriptor.bind_flags;
        let layers = self.descriptor.layer_count();

        if flags.contains(BindFlags::SHADER_RESOURCE) {
            // Sampling reads the depth aspect only.
            let aspect = if self.descriptor.format.is_depth_stencil() {
                vk::ImageAspectFlags::DEPTH
            } else {
                vk::ImageAspectFlags::COLOR
            };
            let range = vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: self.descriptor.mip_levels,
                base_array_layer: 0,
                layer_count: layers,
            };
            let view_type =
                sampled_view_type(self.descriptor.dimension, self.descriptor.array_size);
            self.sampled_view = Some(create_view(device, image, view_type, self.format, range)?);
        }

        if flags.intersects(BindFlags::RENDER_TARGET | BindFlags::DEPTH_STENCIL) {
            let range = vk::ImageSubresourceRange {
                aspect_mask: aspect_mask(self.format),
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: layers,
            };
            let view_type = if layers == 1 {
                vk::ImageViewType::TYPE_2D
            } else {
                vk::ImageViewType::TYPE_2D_ARRAY
            };
            self.attachment_view = Some(create_view(device, image, view_type, self.format, range)?);
        }
        Ok(())
    }

    fn upload(&self, image: vk::Image, data: &[u8]) -> GraphicsResult<()> {
        let (staging, staging_memory) = self.backend.create_staging_buffer(data)?;
        let aspect = aspect_mask(self.format);
        let regions = copy_regions(&self.descriptor, aspect);
        let copy_dest = state_access(ResourceState::CopyDest);
        let settled = state_access(ResourceState::initial(
            self.descriptor.usage,
            self.descriptor.bind_flags,
            true,
        ));
        self.backend.one_shot(
            Some(DeferredResource::Buffer {
                buffer: staging,
                memory: staging_memory,
            }),
            |device, cmd| {
                let mut barriers = BarrierBatch::default();
                barriers.add_image_barrier(image, aspect, StateAccess::UNDEFINED, copy_dest);
                barriers.flush(device, cmd);
                unsafe {
                    device.cmd_copy_buffer_to_image(
                        cmd,
                        staging,
                        image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &regions,
                    )
                };
                barriers.add_image_barrier(image, aspect, copy_dest, settled);
                barriers.flush(device, cmd);
            },
        )
    }

    /// Move a fresh image without initial data out of
    /// `VK_IMAGE_LAYOUT_UNDEFINED` into the layout of its initial state, so
    /// recorded barriers can always start from the tracked state.
    fn initialize_layout(&self, image: vk::Image) -> GraphicsResult<()> {
        let aspect = aspect_mask(self.format);
        let initial = state_access(ResourceState::initial(
            self.descriptor.usage,
            self.descriptor.bind_flags,
            false,
        ));
        self.backend.one_shot(None, |device, cmd| {
            let mut barriers = BarrierBatch::default();
            barriers.add_image_barrier(image, aspect, StateAccess::UNDEFINED, initial);
            barriers.flush(device, cmd);
        })
    }

    pub(super) fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    pub(super) fn format(&self) -> vk::Format {
        self.format
    }

    pub(super) fn aspect(&self) -> vk::ImageAspectFlags {
        aspect_mask(self.format)
    }

    pub(super) fn image(&self) -> Option<vk::Image> {
        match self.storage {
            TextureStorage::Image { image, .. } => Some(image),
            TextureStorage::Staging { .. } => None,
        }
    }

    pub(super) fn staging_buffer(&self) -> Option<vk::Buffer> {
        match self.storage {
            TextureStorage::Staging { buffer, .. } => Some(buffer),
            TextureStorage::Image { .. } => None,
        }
    }

    pub(super) fn sampled_view(&self) -> Option<vk::ImageView> {
        self.sampled_view
    }

    pub(super) fn attachment_view(&self) -> Option<vk::ImageView> {
        self.attachment_view
    }

    pub fn mapping(&self) -> Option<TextureMappingInfo> {
        match &self.storage {
            TextureStorage::Staging { memory, .. } => {
                let memory = memory.as_ref()?;
                Some(TextureMappingInfo {
                    ptr: memory.mapped()?,
                    len: self.descriptor.size_in_bytes() as usize,
                    row_pitch: self.descriptor.width * self.descriptor.format.bytes_per_texel(),
                })
            }
            TextureStorage::Image { .. } => None,
        }
    }
}

impl Drop for VulkanTexture {
    fn drop(&mut self) {
        let views: Vec<vk::ImageView> =
            self.sampled_view.into_iter().chain(self.attachment_view).collect();
        let resource = match &mut self.storage {
            TextureStorage::Image { image, memory } => {
                let memory = memory.take();
                DeferredResource::Image {
                    image: if memory.is_some() { *image } else { vk::Image::null() },
                    views,
                    memory,
                }
            }
            TextureStorage::Staging { buffer, memory } => match memory.take() {
                Some(memory) => DeferredResource::Buffer {
                    buffer: *buffer,
                    memory,
                },
                None => return,
            },
        };
        self.backend.defer(resource);
    }
}

/// A SPIR-V shader module.
pub struct VulkanShader {
    backend: Arc<VulkanBackend>,
    module: vk::ShaderModule,
    stage: ShaderStage,
    entry_point: CString,
}

impl VulkanShader {
    pub(super) fn new(
        backend: &Arc<VulkanBackend>,
        descriptor: &ShaderDescriptor,
    ) -> GraphicsResult<Self> {
        let module = compiler::compile(descriptor)?;
        let version = compiler::spirv_version(descriptor.stage, &descriptor.profile)?;
        let words = module.to_spirv(version)?;
        let entry_point =
            CString::new(module.entry_point()).map_err(|_| GraphicsError::Compilation {
                stage: descriptor.stage,
                diagnostic: "entry point name contains a NUL byte".to_string(),
            })?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(&words);
        let shader_module = unsafe { backend.device().create_shader_module(&create_info, None) }
            .map_err(|e| vk_error("vkCreateShaderModule", e))?;
        log::trace!(
            "VulkanBackend: created {:?} shader '{}' ({} SPIR-V words, version {}.{})",
            descriptor.stage,
            descriptor.entry_point,
            words.len(),
            version.0,
            version.1
        );
        Ok(Self {
            backend: Arc::clone(backend),
            module: shader_module,
            stage: descriptor.stage,
            entry_point,
        })
    }

    pub(super) fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        let stage = match self.stage {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Pixel => vk::ShaderStageFlags::FRAGMENT,
            _ => vk::ShaderStageFlags::COMPUTE,
        };
        vk::PipelineShaderStageCreateInfo::default()
            .stage(stage)
            .module(self.module)
            .name(&self.entry_point)
    }
}

impl Drop for VulkanShader {
    fn drop(&mut self) {
        // Pipelines keep no reference to the modules they were built from.
        unsafe { self.backend.device().destroy_shader_module(self.module, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TextureFormat;

    #[test]
    fn test_copy_regions_are_layer_major() {
        let desc =
            TextureDescriptor::new_2d(4, 4, TextureFormat::Rgba8Unorm, BindFlags::SHADER_RESOURCE)
                .with_mip_levels(2)
                .with_array_size(2);
        let regions = copy_regions(&desc, vk::ImageAspectFlags::COLOR);
        let layout: Vec<(u32, u32, u64)> = regions
            .iter()
            .map(|r| {
                let subresource = r.image_subresource;
                (subresource.base_array_layer, subresource.mip_level, r.buffer_offset)
            })
            .collect();
        // 64 bytes for mip 0, 16 for mip 1, per layer.
        assert_eq!(layout, vec![(0, 0, 0), (0, 1, 64), (1, 0, 80), (1, 1, 144)]);
        assert_eq!(regions[1].image_extent.width, 2);
    }

    #[test]
    fn test_cube_regions_cover_six_faces() {
        let desc =
            TextureDescriptor::new_2d(2, 2, TextureFormat::R8Unorm, BindFlags::SHADER_RESOURCE)
                .with_dimension(TextureDimension::Cube);
        let regions = copy_regions(&desc, vk::ImageAspectFlags::COLOR);
        assert_eq!(regions.len(), 6);
        assert_eq!(regions[5].buffer_offset, 20);
    }

    #[test]
    fn test_3d_regions_keep_depth() {
        let desc = TextureDescriptor {
            depth: 4,
            ..TextureDescriptor::new_2d(4, 4, TextureFormat::R8Unorm, BindFlags::SHADER_RESOURCE)
                .with_dimension(TextureDimension::D3)
                .with_mip_levels(2)
        };
        let regions = copy_regions(&desc, vk::ImageAspectFlags::COLOR);
        assert_eq!(regions[0].image_extent.depth, 4);
        assert_eq!(regions[1].image_extent.depth, 2);
        assert_eq!(regions[1].buffer_offset, 64);
    }
}
