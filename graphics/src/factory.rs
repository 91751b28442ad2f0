//! Device creation.
//!
//! [`create_device`] is the entry point of the crate: it picks the backend
//! named by [`DeviceCreationParams::api`], initializes it and wraps it in a
//! [`GraphicsDevice`].

use crate::backend::GpuBackend;
use crate::device::GraphicsDevice;
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::{DeviceCreationParams, GraphicsApi};

/// Create a graphics device for `params.api`.
///
/// A primary swap chain is created when `params.window` is set. The reference
/// backend also creates an offscreen one when only a size is given.
///
/// # Errors
///
/// - [`GraphicsError::UnsupportedOperation`] when the requested API is not
///   compiled into this build or not available on this platform.
/// - [`GraphicsError::Initialization`] when no adapter, not even a software
///   one, could be initialized.
///
/// # Example
///
/// ```ignore
/// let params = DeviceCreationParams::new(GraphicsApi::Vulkan)
///     .with_window(NativeWindow::from_window(&window)?, 1280, 720)
///     .with_debug_layer(true);
/// let mut device = create_device(&params)?;
/// ```
pub fn create_device(params: &DeviceCreationParams) -> GraphicsResult<GraphicsDevice> {
    crate::profiling::start();
    log::info!("Creating {} device", params.api);

    let backend = create_backend(params).map_err(|e| e.logged("factory", "create_device"))?;
    let primary = match (params.api, params.window) {
        (_, Some(_)) => Some(params.swap_chain_descriptor()),
        (GraphicsApi::Dummy, None) if params.width > 0 && params.height > 0 => {
            Some(params.swap_chain_descriptor())
        }
        _ => None,
    };
    GraphicsDevice::new(backend, primary.as_ref())
}

fn create_backend(params: &DeviceCreationParams) -> GraphicsResult<GpuBackend> {
    match params.api {
        GraphicsApi::Dummy => Ok(GpuBackend::Dummy(crate::backend::DummyBackend::new(params))),

        #[cfg(feature = "vulkan-backend")]
        GraphicsApi::Vulkan => {
            crate::backend::vulkan::VulkanBackend::new(params).map(GpuBackend::Vulkan)
        }

        #[cfg(all(windows, feature = "d3d12-backend"))]
        GraphicsApi::D3D12 => {
            crate::backend::d3d12::D3d12Backend::new(params).map(GpuBackend::D3d12)
        }

        #[allow(unreachable_patterns)]
        api => Err(GraphicsError::UnsupportedOperation(format!(
            "{api} backend is not available in this build"
        ))),
    }
}

/// APIs compiled into this build and usable on this platform.
pub fn available_apis() -> Vec<GraphicsApi> {
    let mut apis = Vec::new();
    if cfg!(all(windows, feature = "d3d12-backend")) {
        apis.push(GraphicsApi::D3D12);
    }
    if cfg!(feature = "vulkan-backend") {
        apis.push(GraphicsApi::Vulkan);
    }
    apis.push(GraphicsApi::Dummy);
    apis
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dummy_is_available() {
        assert!(available_apis().contains(&GraphicsApi::Dummy));
    }

    #[test]
    fn test_headless_dummy_device() {
        let device = create_device(&DeviceCreationParams::new(GraphicsApi::Dummy)).unwrap();
        assert!(device.swap_chain().is_none());
    }

    #[test]
    fn test_sized_dummy_device_has_swap_chain() {
        let params = DeviceCreationParams::new(GraphicsApi::Dummy)
            .with_size(64, 32)
            .with_buffer_count(3);
        let device = create_device(&params).unwrap();
        let swap_chain = device.swap_chain().unwrap();
        assert_eq!((swap_chain.width(), swap_chain.height()), (64, 32));
        assert_eq!(swap_chain.back_buffer_count(), 3);
    }

    #[cfg(not(all(windows, feature = "d3d12-backend")))]
    #[test]
    fn test_d3d12_unsupported_here() {
        let result = create_device(&DeviceCreationParams::new(GraphicsApi::D3D12));
        assert!(matches!(result, Err(GraphicsError::UnsupportedOperation(_))));
    }
}
