//! Flip-model DXGI swap chain on a Win32 window.
//!
//! sRGB back buffers are created with the matching linear format, since
//! flip-model swap chains reject sRGB formats; render target views of the
//! back buffers carry the sRGB format instead.

use std::ffi::c_void;
use std::sync::Arc;

use raw_window_handle::RawWindowHandle;
use windows::Win32::Foundation::{BOOL, HWND};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::core::Interface;

use super::conversion::{dxgi_format, resource_state};
use super::resources::transition_barrier;
use super::{D3d12Backend, D3d12Texture, hr_error, is_occluded};
use crate::error::{GraphicsError, GraphicsResult};
use crate::resources::Texture;
use crate::types::{BindFlags, ResourceState, SwapChainDescriptor, TextureDescriptor, TextureFormat};

/// Format of the swap chain buffers for back buffers of `format`.
fn buffer_format(format: TextureFormat) -> GraphicsResult<DXGI_FORMAT> {
    match format {
        TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb => Ok(DXGI_FORMAT_R8G8B8A8_UNORM),
        TextureFormat::Bgra8Unorm | TextureFormat::Bgra8UnormSrgb => Ok(DXGI_FORMAT_B8G8R8A8_UNORM),
        TextureFormat::Rgba16Float => Ok(DXGI_FORMAT_R16G16B16A16_FLOAT),
        TextureFormat::Rgb10a2Unorm => Ok(DXGI_FORMAT_R10G10B10A2_UNORM),
        other => Err(GraphicsError::ResourceCreation(format!(
            "{other:?} is not a swap chain format"
        ))),
    }
}

fn tearing_supported(factory: &IDXGIFactory4) -> bool {
    let Ok(factory5) = factory.cast::<IDXGIFactory5>() else {
        return false;
    };
    let mut allowed = BOOL(0);
    let checked = unsafe {
        factory5.CheckFeatureSupport(
            DXGI_FEATURE_PRESENT_ALLOW_TEARING,
            (&mut allowed as *mut BOOL).cast::<c_void>(),
            std::mem::size_of::<BOOL>() as u32,
        )
    };
    checked.is_ok() && allowed.as_bool()
}

/// An `IDXGISwapChain3` presenting from the backend queue.
pub struct D3d12SwapChain {
    backend: Arc<D3d12Backend>,
    swap_chain: IDXGISwapChain3,
    format: TextureFormat,
    buffer_format: DXGI_FORMAT,
    buffer_count: u32,
    width: u32,
    height: u32,
    vsync: bool,
    /// Swap chain flags, repeated on every resize.
    flags: u32,
    fullscreen: bool,
}

// SAFETY: DXGI swap chains may be used from any thread; presentation and
// resizing go through `&mut self`.
unsafe impl Send for D3d12SwapChain {}
unsafe impl Sync for D3d12SwapChain {}

impl D3d12SwapChain {
    pub(super) fn new(
        backend: &Arc<D3d12Backend>,
        descriptor: &SwapChainDescriptor,
    ) -> GraphicsResult<Self> {
        let window = descriptor.window.ok_or_else(|| {
            GraphicsError::UnsupportedOperation("D3D12 swap chains need a window".to_string())
        })?;
        let RawWindowHandle::Win32(handle) = window.window else {
            return Err(GraphicsError::UnsupportedOperation(format!(
                "D3D12 swap chains need a Win32 window, got {:?}",
                window.window
            )));
        };
        let hwnd = HWND(handle.hwnd.get() as *mut c_void);

        let buffer_format = buffer_format(descriptor.format)?;
        let buffer_count = descriptor.clamped_buffer_count();
        let tearing = !descriptor.vsync && tearing_supported(backend.factory());
        let flags = if tearing {
            DXGI_SWAP_CHAIN_FLAG_ALLOW_TEARING.0 as u32
        } else {
            0
        };
        let desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: descriptor.width,
            Height: descriptor.height,
            Format: buffer_format,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: buffer_count,
            Scaling: DXGI_SCALING_STRETCH,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            AlphaMode: DXGI_ALPHA_MODE_UNSPECIFIED,
            Flags: flags,
            ..Default::default()
        };

        let swap_chain: IDXGISwapChain1 = {
            let queue = backend.queue();
            unsafe { backend.factory().CreateSwapChainForHwnd(&*queue, hwnd, &desc, None, None) }
                .map_err(|e| hr_error("CreateSwapChainForHwnd", e))?
        };
        let swap_chain: IDXGISwapChain3 =
            swap_chain.cast().map_err(|e| hr_error("IDXGISwapChain3", e))?;
        // Fullscreen is driven through `set_fullscreen` only.
        let associated =
            unsafe { backend.factory().MakeWindowAssociation(hwnd, DXGI_MWA_NO_ALT_ENTER) };
        if let Err(e) = associated {
            log::warn!("D3d12SwapChain: MakeWindowAssociation failed: {e}");
        }

        log::info!(
            "D3d12SwapChain: {}x{} {:?}, {} buffers, vsync {}, tearing {}",
            descriptor.width,
            descriptor.height,
            descriptor.format,
            buffer_count,
            descriptor.vsync,
            tearing
        );
        Ok(Self {
            backend: Arc::clone(backend),
            swap_chain,
            format: descriptor.format,
            buffer_format,
            buffer_count,
            width: descriptor.width,
            height: descriptor.height,
            vsync: descriptor.vsync,
            flags,
            fullscreen: false,
        })
    }

    pub fn back_buffers(&self) -> GraphicsResult<Vec<D3d12Texture>> {
        (0..self.buffer_count)
            .map(|index| {
                let resource: ID3D12Resource = unsafe { self.swap_chain.GetBuffer(index) }
                    .map_err(|e| hr_error("IDXGISwapChain::GetBuffer", e))?;
                let descriptor = TextureDescriptor::new_2d(
                    self.width,
                    self.height,
                    self.format,
                    BindFlags::RENDER_TARGET,
                );
                D3d12Texture::from_swap_chain_buffer(&self.backend, resource, descriptor)
            })
            .collect()
    }

    pub fn current_index(&self) -> u32 {
        unsafe { self.swap_chain.GetCurrentBackBufferIndex() }
    }

    /// Present `back_buffer`, currently in `state`.
    pub fn present(&mut self, back_buffer: &Texture, state: ResourceState) -> GraphicsResult<()> {
        if state != ResourceState::Present {
            let resource = back_buffer.raw().as_d3d12()?.resource()?;
            let (before, after) = (resource_state(state), resource_state(ResourceState::Present));
            self.backend.one_shot(None, |list| unsafe {
                list.ResourceBarrier(&[transition_barrier(resource, before, after)]);
            })?;
        }

        let (interval, flags) = if self.vsync {
            (1, DXGI_PRESENT(0))
        } else if self.flags != 0 && !self.fullscreen {
            (0, DXGI_PRESENT_ALLOW_TEARING)
        } else {
            (0, DXGI_PRESENT(0))
        };
        let result = {
            crate::profile_scope!("d3d12_present");
            let _queue = self.backend.queue();
            unsafe { self.swap_chain.Present(interval, flags) }
        };
        if is_occluded(result) {
            log::trace!("D3d12SwapChain: window occluded");
            return Ok(());
        }
        result.ok().map_err(|e| hr_error("IDXGISwapChain::Present", e))?;
        self.backend.retire();
        Ok(())
    }

    /// Resize the buffers. Every reference to the old buffers must be gone.
    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Resize the buffers. On failure DXGI keeps the old ones.
    pub fn resize(&mut self, width: u32, height: u32) -> GraphicsResult<()> {
        // Releases the deferred back buffer references.
        self.backend.wait_idle()?;
        unsafe {
            self.swap_chain.ResizeBuffers(
                self.buffer_count,
                width,
                height,
                self.buffer_format,
                DXGI_SWAP_CHAIN_FLAG(self.flags as i32),
            )
        }
        .map_err(|e| hr_error("IDXGISwapChain::ResizeBuffers", e))?;
        self.width = width;
        self.height = height;
        Ok(())
    }

    pub fn wait_idle(&self) -> GraphicsResult<()> {
        self.backend.wait_idle()
    }

    pub fn set_fullscreen(&mut self, fullscreen: bool) -> GraphicsResult<()> {
        unsafe { self.swap_chain.SetFullscreenState(BOOL::from(fullscreen), None) }
            .map_err(|e| hr_error("IDXGISwapChain::SetFullscreenState", e))?;
        self.fullscreen = fullscreen;
        log::info!("D3d12SwapChain: fullscreen {fullscreen}");
        Ok(())
    }
}

impl Drop for D3d12SwapChain {
    fn drop(&mut self) {
        if let Err(e) = self.backend.wait_idle() {
            log::warn!("D3d12SwapChain: wait for idle on drop failed: {e}");
        }
        // Releasing a swap chain in fullscreen is an error.
        if self.fullscreen
            && let Err(e) = unsafe { self.swap_chain.SetFullscreenState(BOOL::from(false), None) }
        {
            log::warn!("D3d12SwapChain: leaving fullscreen on drop failed: {e}");
        }
    }
}
