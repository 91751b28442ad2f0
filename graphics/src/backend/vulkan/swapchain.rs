//! Vulkan swap chain on a window surface.
//!
//! The next image is acquired right after each present. Its acquire
//! semaphore is handed to the backend as a pending wait, consumed by the
//! next frame submission or, failing that, by the present submission. Every
//! image has its own render-finished semaphore, signaled by the present
//! submission and waited on by `vkQueuePresentKHR`.
//!
//! The first time an image is acquired it is moved from
//! `VK_IMAGE_LAYOUT_UNDEFINED` to the present layout, so its tracked
//! [`ResourceState::Present`] always matches its layout.

use std::sync::Arc;

use ash::vk;

use super::barriers::BarrierBatch;
use super::conversion::convert_texture_format;
use super::layout::{StateAccess, state_access};
use super::{VulkanBackend, VulkanTexture, vk_error};
use crate::error::{GraphicsError, GraphicsResult};
use crate::resources::Texture;
use crate::types::{
    BindFlags, ResourceState, SwapChainDescriptor, TextureDescriptor, TextureFormat,
};

fn present_mode(vsync: bool, available: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

fn swap_chain_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

fn image_count(capabilities: &vk::SurfaceCapabilitiesKHR, requested: u32) -> u32 {
    let count = requested.max(capabilities.min_image_count);
    match capabilities.max_image_count {
        0 => count,
        max => count.min(max),
    }
}

fn create_semaphores(device: &ash::Device, count: usize) -> GraphicsResult<Vec<vk::Semaphore>> {
    let info = vk::SemaphoreCreateInfo::default();
    let mut semaphores = Vec::with_capacity(count);
    for _ in 0..count {
        match unsafe { device.create_semaphore(&info, None) } {
            Ok(semaphore) => semaphores.push(semaphore),
            Err(e) => {
                for semaphore in semaphores {
                    unsafe { device.destroy_semaphore(semaphore, None) };
                }
                return Err(vk_error("vkCreateSemaphore", e));
            }
        }
    }
    Ok(semaphores)
}

/// A `VkSwapchainKHR` with its surface and presentation semaphores.
pub struct VulkanSwapChain {
    backend: Arc<VulkanBackend>,
    loader: ash::khr::swapchain::Device,
    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    surface_format: vk::SurfaceFormatKHR,
    texture_format: TextureFormat,
    present_mode: vk::PresentModeKHR,
    buffer_count: u32,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    /// Per image: set until its first acquisition initializes its layout.
    undefined: Vec<bool>,
    current_index: u32,
    /// One more than the image count, so an acquire never reuses a
    /// semaphore whose wait is still pending.
    acquire_semaphores: Vec<vk::Semaphore>,
    /// Serial of the submission that consumed each acquire semaphore.
    acquire_serials: Vec<u64>,
    next_acquire: usize,
    current_acquire: Option<usize>,
    render_finished: Vec<vk::Semaphore>,
    /// Set when the surface no longer matches; presenting stops until resize.
    out_of_date: bool,
}

impl VulkanSwapChain {
    pub(super) fn new(
        backend: &Arc<VulkanBackend>,
        descriptor: &SwapChainDescriptor,
    ) -> GraphicsResult<Self> {
        let window = descriptor.window.ok_or_else(|| {
            GraphicsError::UnsupportedOperation("Vulkan swap chains need a window".to_string())
        })?;
        let (Some(surface_loader), Some(loader)) =
            (&backend.surface_loader, &backend.swapchain_loader)
        else {
            return Err(GraphicsError::UnsupportedOperation(
                "presentation is not supported by this Vulkan device".to_string(),
            ));
        };

        let surface = unsafe {
            ash_window::create_surface(
                &backend.entry,
                &backend.instance,
                window.display,
                window.window,
                None,
            )
        }
        .map_err(|e| vk_error("vkCreateSurfaceKHR", e))?;

        let chosen = (|| -> GraphicsResult<(vk::SurfaceFormatKHR, vk::PresentModeKHR)> {
            let supported = unsafe {
                surface_loader.get_physical_device_surface_support(
                    backend.physical_device,
                    backend.queue_family,
                    surface,
                )
            }
            .map_err(|e| vk_error("vkGetPhysicalDeviceSurfaceSupportKHR", e))?;
            if !supported {
                return Err(GraphicsError::UnsupportedOperation(
                    "the graphics queue cannot present to this window".to_string(),
                ));
            }

            let formats = unsafe {
                surface_loader.get_physical_device_surface_formats(backend.physical_device, surface)
            }
            .map_err(|e| vk_error("vkGetPhysicalDeviceSurfaceFormatsKHR", e))?;
            let wanted = convert_texture_format(descriptor.format);
            let surface_format = formats
                .iter()
                .copied()
                .find(|f| f.format == wanted)
                .ok_or_else(|| {
                    let available: Vec<vk::Format> = formats.iter().map(|f| f.format).collect();
                    GraphicsError::ResourceCreation(format!(
                        "surface does not support {:?}; supported formats: {available:?}",
                        descriptor.format
                    ))
                })?;

            let modes = unsafe {
                surface_loader
                    .get_physical_device_surface_present_modes(backend.physical_device, surface)
            }
            .map_err(|e| vk_error("vkGetPhysicalDeviceSurfacePresentModesKHR", e))?;
            Ok((surface_format, present_mode(descriptor.vsync, &modes)))
        })();
        let (surface_format, present_mode) = match chosen {
            Ok(chosen) => chosen,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(e);
            }
        };

        // From here on `Drop` releases whatever was created.
        let mut swap_chain = Self {
            backend: Arc::clone(backend),
            loader: loader.clone(),
            surface,
            swapchain: vk::SwapchainKHR::null(),
            surface_format,
            texture_format: descriptor.format,
            present_mode,
            buffer_count: descriptor.clamped_buffer_count(),
            extent: vk::Extent2D::default(),
            images: Vec::new(),
            undefined: Vec::new(),
            current_index: 0,
            acquire_semaphores: Vec::new(),
            acquire_serials: Vec::new(),
            next_acquire: 0,
            current_acquire: None,
            render_finished: Vec::new(),
            out_of_date: false,
        };
        swap_chain.create_swapchain(descriptor.width, descriptor.height)?;
        swap_chain.create_sync_objects()?;
        swap_chain.acquire()?;

        log::info!(
            "VulkanSwapChain: {}x{} {:?}, {} images, {:?}",
            swap_chain.extent.width,
            swap_chain.extent.height,
            descriptor.format,
            swap_chain.images.len(),
            present_mode
        );
        Ok(swap_chain)
    }

    fn surface_loader(&self) -> GraphicsResult<&ash::khr::surface::Instance> {
        self.backend
            .surface_loader
            .as_ref()
            .ok_or_else(|| {
                GraphicsError::UnsupportedOperation("VK_KHR_surface is not enabled".to_string())
            })
    }

    /// (Re)create the swap chain at `width`x`height`, retiring the old one.
    /// The queue must be idle.
    fn create_swapchain(&mut self, width: u32, height: u32) -> GraphicsResult<()> {
        let capabilities = unsafe {
            self.surface_loader()?
                .get_physical_device_surface_capabilities(
                    self.backend.physical_device,
                    self.surface,
                )
        }
        .map_err(|e| vk_error("vkGetPhysicalDeviceSurfaceCapabilitiesKHR", e))?;

        let extent = swap_chain_extent(&capabilities, width, height);
        if extent.width != width || extent.height != height {
            log::debug!(
                "VulkanSwapChain: surface extent {}x{} differs from requested {}x{}",
                extent.width,
                extent.height,
                width,
                height
            );
        }
        let usage = vk::ImageUsageFlags::COLOR_ATTACHMENT
            | (capabilities.supported_usage_flags
                & (vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST));
        let composite_alpha = [
            vk::CompositeAlphaFlagsKHR::OPAQUE,
            vk::CompositeAlphaFlagsKHR::INHERIT,
            vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
            vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        ]
        .into_iter()
        .find(|mode| capabilities.supported_composite_alpha.contains(*mode))
        .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE);

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count(&capabilities, self.buffer_count))
            .image_format(self.surface_format.format)
            .image_color_space(self.surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(composite_alpha)
            .present_mode(self.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);
        let swapchain = unsafe { self.loader.create_swapchain(&create_info, None) }
            .map_err(|e| vk_error("vkCreateSwapchainKHR", e))?;
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(old_swapchain, None) };
        }
        self.swapchain = swapchain;

        self.images = unsafe { self.loader.get_swapchain_images(swapchain) }
            .map_err(|e| vk_error("vkGetSwapchainImagesKHR", e))?;
        self.undefined = vec![true; self.images.len()];
        self.extent = extent;
        self.current_index = 0;
        self.out_of_date = false;
        Ok(())
    }

    fn create_sync_objects(&mut self) -> GraphicsResult<()> {
        let device = self.backend.device();
        self.acquire_semaphores = create_semaphores(device, self.images.len() + 1)?;
        self.acquire_serials = vec![0; self.acquire_semaphores.len()];
        self.render_finished = create_semaphores(device, self.images.len())?;
        self.next_acquire = 0;
        self.current_acquire = None;
        Ok(())
    }

    /// Destroy the semaphores. The queue must be idle.
    fn destroy_sync_objects(&mut self) {
        self.backend.cancel_pending_waits(&self.acquire_semaphores);
        let device = self.backend.device();
        for semaphore in self.acquire_semaphores.drain(..).chain(self.render_finished.drain(..)) {
            unsafe { device.destroy_semaphore(semaphore, None) };
        }
        self.acquire_serials.clear();
        self.current_acquire = None;
    }

    fn mark_out_of_date(&mut self) {
        if !self.out_of_date {
            log::warn!("VulkanSwapChain: surface out of date, presentation paused until resize");
        }
        self.out_of_date = true;
    }

    /// Acquire the next image and queue the wait for it.
    fn acquire(&mut self) -> GraphicsResult<()> {
        let slot = self.next_acquire;
        self.backend.wait_for_serial(self.acquire_serials[slot])?;
        let semaphore = self.acquire_semaphores[slot];
        let result = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        };
        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::debug!("VulkanSwapChain: acquired image {index} is suboptimal");
                }
                self.current_index = index;
                self.current_acquire = Some(slot);
                self.next_acquire = (slot + 1) % self.acquire_semaphores.len();
                self.backend.push_pending_wait(semaphore);
                if self.undefined[index as usize] {
                    self.initialize_image(index)?;
                }
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.mark_out_of_date();
                Ok(())
            }
            Err(e) => Err(vk_error("vkAcquireNextImageKHR", e)),
        }
    }

    /// Move a just-acquired image to the present layout. The submission
    /// consumes the acquire wait.
    fn initialize_image(&mut self, index: u32) -> GraphicsResult<()> {
        let image = self.images[index as usize];
        let serial = self.backend.one_shot_submit(None, &[], true, |device, cmd| {
            let mut barriers = BarrierBatch::default();
            barriers.add_image_barrier(
                image,
                vk::ImageAspectFlags::COLOR,
                StateAccess::UNDEFINED,
                state_access(ResourceState::Present),
            );
            barriers.flush(device, cmd);
        })?;
        if let Some(slot) = self.current_acquire.take() {
            self.acquire_serials[slot] = serial;
        }
        self.undefined[index as usize] = false;
        Ok(())
    }

    pub fn extent(&self) -> (u32, u32) {
        (self.extent.width, self.extent.height)
    }

    pub fn back_buffers(&self) -> GraphicsResult<Vec<VulkanTexture>> {
        self.images
            .iter()
            .map(|&image| {
                let descriptor = TextureDescriptor::new_2d(
                    self.extent.width,
                    self.extent.height,
                    self.texture_format,
                    BindFlags::RENDER_TARGET,
                );
                VulkanTexture::from_swap_chain_image(
                    &self.backend,
                    image,
                    self.surface_format.format,
                    descriptor,
                )
            })
            .collect()
    }

    pub fn current_index(&self) -> u32 {
        self.current_index
    }

    /// Present `back_buffer`, currently in `state`, and acquire the next image.
    pub fn present(&mut self, back_buffer: &Texture, state: ResourceState) -> GraphicsResult<()> {
        if self.out_of_date {
            return Ok(());
        }
        let raw = back_buffer.raw().as_vulkan()?;
        let image = raw
            .image()
            .ok_or_else(|| GraphicsError::State("back buffer has no image".to_string()))?;
        let index = self.current_index as usize;
        let render_finished = self.render_finished[index];
        let signals = [vk::SemaphoreSubmitInfo::default()
            .semaphore(render_finished)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];

        let serial = if state != ResourceState::Present {
            let src = state_access(state);
            let aspect = raw.aspect();
            self.backend.one_shot_submit(None, &signals, true, |device, cmd| {
                let mut barriers = BarrierBatch::default();
                let dst = state_access(ResourceState::Present);
                barriers.add_image_barrier(image, aspect, src, dst);
                barriers.flush(device, cmd);
            })?
        } else {
            self.backend.submit(&[], &signals, true)?
        };
        if let Some(slot) = self.current_acquire.take() {
            self.acquire_serials[slot] = serial;
        }

        let wait_semaphores = [render_finished];
        let swapchains = [self.swapchain];
        let image_indices = [self.current_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        let result = {
            crate::profile_scope!("vulkan_queue_present");
            let queue = self.backend.queue.lock();
            unsafe { self.loader.queue_present(*queue, &present_info) }
        };
        match result {
            Ok(false) => {}
            Ok(true) => log::debug!("VulkanSwapChain: present is suboptimal"),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.mark_out_of_date();
                return Ok(());
            }
            Err(e) => return Err(vk_error("vkQueuePresentKHR", e)),
        }
        self.acquire()
    }

    /// Recreate the swap chain at the new size, clamped to the surface
    /// limits. If creation fails the old swap chain stays in use.
    pub fn resize(&mut self, width: u32, height: u32) -> GraphicsResult<()> {
        // Hand any outstanding acquire wait to the queue before idling.
        self.backend.submit(&[], &[], true)?;
        self.backend.wait_idle()?;
        self.destroy_sync_objects();
        let created = self.create_swapchain(width, height);
        self.create_sync_objects()?;
        self.acquire()?;
        created
    }

    pub fn wait_idle(&self) -> GraphicsResult<()> {
        self.backend.wait_idle()
    }

    pub fn set_fullscreen(&mut self, fullscreen: bool) -> GraphicsResult<()> {
        log::warn!(
            "VulkanSwapChain: exclusive fullscreen ({fullscreen}) is not supported, \
             keeping windowed mode"
        );
        Ok(())
    }
}

impl Drop for VulkanSwapChain {
    fn drop(&mut self) {
        if let Err(e) = self.backend.wait_idle() {
            log::warn!("VulkanSwapChain: wait for idle on drop failed: {e}");
        }
        self.destroy_sync_objects();
        unsafe {
            if self.swapchain != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.swapchain, None);
            }
            if let Some(surface_loader) = &self.backend.surface_loader {
                surface_loader.destroy_surface(self.surface, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_vsync_always_uses_fifo() {
        let modes = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        assert_eq!(present_mode(true, &modes), vk::PresentModeKHR::FIFO);
        assert_eq!(present_mode(false, &modes), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            present_mode(false, &[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(present_mode(false, &[vk::PresentModeKHR::FIFO]), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_image_count_respects_surface_limits() {
        assert_eq!(image_count(&capabilities(2, 3), 4), 3);
        assert_eq!(image_count(&capabilities(3, 0), 2), 3);
        assert_eq!(image_count(&capabilities(2, 8), 3), 3);
    }

    #[test]
    fn test_extent_follows_surface_when_fixed() {
        let mut caps = capabilities(2, 3);
        assert_eq!(swap_chain_extent(&caps, 8000, 600), vk::Extent2D { width: 4096, height: 600 });
        caps.current_extent = vk::Extent2D { width: 800, height: 600 };
        assert_eq!(swap_chain_extent(&caps, 1024, 768), caps.current_extent);
    }
}
