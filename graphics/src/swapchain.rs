//! Swap chain management.
//!
//! A [`SwapChain`] owns the back buffers presented to a window. The primary
//! swap chain is created with the device when a window is supplied, further
//! swap chains with [`GraphicsDevice::create_swap_chain`].
//!
//! # Example
//!
//! ```ignore
//! // In render loop:
//! let back_buffer = device.back_buffer(device.back_buffer_index())?;
//! // ... record into a command list targeting back_buffer, execute ...
//! device.present()?;
//!
//! // On window resize:
//! device.resize(new_width, new_height)?;
//! ```
//!
//! [`GraphicsDevice::create_swap_chain`]: crate::GraphicsDevice::create_swap_chain

use std::sync::Arc;

use crate::backend::GpuSwapChain;
use crate::error::{GraphicsError, GraphicsResult};
use crate::resources::{DeviceId, ResourceKind, ResourceTracker, Texture};
use crate::types::{
    BindFlags, ResourceState, SwapChainDescriptor, TextureDescriptor, TextureFormat,
};

const COMPONENT: &str = "swapchain";

/// A set of back buffers presented to a window in rotation.
pub struct SwapChain {
    device_id: DeviceId,
    width: u32,
    height: u32,
    format: TextureFormat,
    vsync: bool,
    fullscreen: bool,
    back_buffers: Vec<Texture>,
    raw: GpuSwapChain,
    tracker: Arc<ResourceTracker>,
}

impl SwapChain {
    pub(crate) fn new(
        device_id: DeviceId,
        descriptor: &SwapChainDescriptor,
        raw: GpuSwapChain,
        tracker: Arc<ResourceTracker>,
    ) -> GraphicsResult<Self> {
        let (width, height) = raw.extent();
        let mut swap_chain = Self {
            device_id,
            width,
            height,
            format: descriptor.format,
            vsync: descriptor.vsync,
            fullscreen: descriptor.fullscreen,
            back_buffers: Vec::new(),
            raw,
            tracker,
        };
        swap_chain.wrap_back_buffers()?;
        if descriptor.fullscreen {
            swap_chain.raw.set_fullscreen(true)?;
        }
        Ok(swap_chain)
    }

    fn wrap_back_buffers(&mut self) -> GraphicsResult<()> {
        let raws = self.raw.back_buffers()?;
        self.back_buffers = raws
            .into_iter()
            .enumerate()
            .map(|(index, raw)| {
                let descriptor = TextureDescriptor::new_2d(
                    self.width,
                    self.height,
                    self.format,
                    BindFlags::RENDER_TARGET,
                )
                .with_label(format!("back buffer {index}"));
                Texture::new(
                    self.device_id,
                    descriptor,
                    ResourceState::Present,
                    raw,
                    self.tracker.track(ResourceKind::Texture),
                )
            })
            .collect();
        Ok(())
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn vsync(&self) -> bool {
        self.vsync
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    pub fn back_buffer_count(&self) -> u32 {
        self.back_buffers.len() as u32
    }

    /// Index of the back buffer to render into this frame.
    pub fn back_buffer_index(&self) -> u32 {
        self.raw.current_index()
    }

    /// Back buffer `index`.
    pub fn back_buffer(&self, index: u32) -> GraphicsResult<&Texture> {
        self.back_buffers.get(index as usize).ok_or_else(|| {
            GraphicsError::State(format!(
                "back buffer {index} out of range ({} buffers)",
                self.back_buffers.len()
            ))
            .logged(COMPONENT, "back_buffer")
        })
    }

    /// Back buffer to render into this frame.
    pub fn current_back_buffer(&self) -> GraphicsResult<&Texture> {
        self.back_buffer(self.back_buffer_index())
    }

    /// Present the current back buffer, transitioning it to
    /// [`ResourceState::Present`] first if the caller has not.
    pub fn present(&mut self) -> GraphicsResult<()> {
        crate::profile_scope!("present");
        let index = self.back_buffer_index() as usize;
        let Some(back_buffer) = self.back_buffers.get(index) else {
            return Err(GraphicsError::State(format!("no back buffer {index}"))
                .logged(COMPONENT, "present"));
        };
        let state = back_buffer.state();
        self.raw
            .present(back_buffer, state)
            .map_err(|e| e.logged(COMPONENT, "present"))?;
        back_buffer.set_state(ResourceState::Present);
        Ok(())
    }

    /// Resize the back buffers.
    ///
    /// Returns `Ok(false)` without touching the native swap chain when the
    /// size is unchanged or either dimension is zero (minimized window).
    /// Otherwise waits for the queue to drain, releases the back buffers,
    /// resizes the native swap chain and wraps the new back buffers.
    /// [`width`](Self::width) and [`height`](Self::height) then report the
    /// size the backend actually chose, which the surface may constrain.
    ///
    /// If the native resize fails the old back buffers are wrapped again, so
    /// the swap chain keeps presenting at its previous size.
    pub fn resize(&mut self, width: u32, height: u32) -> GraphicsResult<bool> {
        if width == 0 || height == 0 || (width == self.width && height == self.height) {
            return Ok(false);
        }
        let fail = |e: GraphicsError| e.logged(COMPONENT, "resize");
        self.raw.wait_idle().map_err(fail)?;
        // Native back buffers must be released before they can be resized.
        self.back_buffers.clear();
        let resized = self.raw.resize(width, height);
        // On failure the backend keeps its old buffers, which are wrapped again.
        (self.width, self.height) = self.raw.extent();
        let wrapped = self.wrap_back_buffers();
        resized.map_err(fail)?;
        wrapped.map_err(fail)?;
        log::info!(
            "Swap chain resized to {}x{} (requested {}x{})",
            self.width,
            self.height,
            width,
            height
        );
        Ok(true)
    }

    /// Enter or leave exclusive fullscreen where the backend supports it.
    pub fn set_fullscreen(&mut self, fullscreen: bool) -> GraphicsResult<()> {
        if fullscreen == self.fullscreen {
            return Ok(());
        }
        self.raw
            .set_fullscreen(fullscreen)
            .map_err(|e| e.logged(COMPONENT, "set_fullscreen"))?;
        self.fullscreen = fullscreen;
        Ok(())
    }
}

impl std::fmt::Debug for SwapChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwapChain")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("back_buffers", &self.back_buffers.len())
            .finish()
    }
}

static_assertions::assert_impl_all!(SwapChain: Send, Sync);
