//! # Keystone Graphics
//!
//! Cross-backend GPU abstraction layer. Rendering code is written once
//! against [`GraphicsDevice`], [`CommandList`] and the resource types, and
//! runs on Direct3D 12, Vulkan or the CPU reference backend.
//!
//! ## Overview
//!
//! - [`create_device`] - Create a device for a [`GraphicsApi`]
//! - [`GraphicsDevice`] - Resource creation, submission and presentation
//! - [`CommandList`] - Command recording with automatic state transitions
//! - [`SwapChain`] - Back buffers presented to a window
//! - [`Fence`] - CPU/GPU synchronization
//! - [`FrameRenderer`] - Frames-in-flight loop over the primary swap chain
//!
//! Shaders are written in WGSL and translated to SPIR-V or HLSL by the
//! backend. `@group(0) @binding(i)` refers to slot `i` of the pipeline's
//! binding layout and `var<push_constant>` to its constants slot.
//!
//! ## Example
//!
//! ```ignore
//! use keystone_graphics::*;
//!
//! let mut device = create_device(
//!     &DeviceCreationParams::new(GraphicsApi::Vulkan)
//!         .with_window(NativeWindow::from_window(&window)?, 1280, 720),
//! )?;
//! let mut renderer = FrameRenderer::new(&device, 2)?;
//!
//! let list = renderer.begin_frame(&device)?;
//! list.set_pipeline_state(&pipeline)?;
//! list.draw(3, 1, 0, 0)?;
//! renderer.end_frame(&mut device)?;
//! ```

pub mod backend;
pub mod command_list;
pub mod compiler;
pub mod device;
pub mod error;
pub mod factory;
pub mod profiling;
pub mod renderer;
pub mod resources;
pub mod swapchain;
pub mod types;

pub use command_list::{CommandList, CommandListState, MAX_VIEWPORTS, ResourceRef};
pub use device::{GraphicsDevice, MAX_ROOT_CONSTANTS};
pub use error::{GraphicsError, GraphicsResult};
pub use factory::{available_apis, create_device};
pub use renderer::FrameRenderer;
pub use resources::{
    Buffer, BufferMapping, DeviceId, Fence, PipelineState, ResourceStatistics, Shader, Texture,
    TextureMapping,
};
pub use swapchain::SwapChain;
pub use types::*;

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_error_is_send_sync() {
        static_assertions::assert_impl_all!(GraphicsError: Send, Sync, std::error::Error);
    }
}
