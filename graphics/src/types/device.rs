//! Device creation parameters and adapter information.

use std::fmt;
use std::str::FromStr;

use raw_window_handle::{
    HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle,
};

use super::TextureFormat;
use crate::error::GraphicsError;

/// Native graphics API to create a device for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphicsApi {
    /// Direct3D 12 (Windows only).
    D3D12,
    /// Vulkan 1.3.
    Vulkan,
    /// CPU reference implementation, always available.
    Dummy,
}

impl GraphicsApi {
    /// Human readable API name.
    pub fn name(self) -> &'static str {
        match self {
            Self::D3D12 => "Direct3D 12",
            Self::Vulkan => "Vulkan",
            Self::Dummy => "Dummy",
        }
    }
}

impl fmt::Display for GraphicsApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for GraphicsApi {
    type Err = GraphicsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "d3d12" | "dx12" | "direct3d12" => Ok(Self::D3D12),
            "vulkan" | "vk" => Ok(Self::Vulkan),
            "dummy" | "null" => Ok(Self::Dummy),
            other => Err(GraphicsError::UnsupportedOperation(format!(
                "unknown graphics API '{other}'"
            ))),
        }
    }
}

/// Raw native window and display handles supplied by the platform layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeWindow {
    pub window: RawWindowHandle,
    pub display: RawDisplayHandle,
}

impl NativeWindow {
    /// Capture the raw handles of a platform window.
    pub fn from_window<W>(window: &W) -> Result<Self, GraphicsError>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        let window_handle = window.window_handle().map_err(|e| {
            GraphicsError::Initialization(format!("window handle unavailable: {e}"))
        })?;
        let display_handle = window.display_handle().map_err(|e| {
            GraphicsError::Initialization(format!("display handle unavailable: {e}"))
        })?;
        Ok(Self {
            window: window_handle.as_raw(),
            display: display_handle.as_raw(),
        })
    }
}

/// Capacities of the fixed-size descriptor heaps created at device start-up.
///
/// Exceeding a capacity fails the resource creation that needed the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorHeapCapacities {
    pub render_target: u32,
    pub depth_stencil: u32,
    pub shader_resource: u32,
    pub sampler: u32,
}

impl Default for DescriptorHeapCapacities {
    fn default() -> Self {
        Self {
            render_target: 1024,
            depth_stencil: 128,
            shader_resource: 4096,
            sampler: 256,
        }
    }
}

/// Parameters for [`crate::factory::create_device`].
#[derive(Debug, Clone)]
pub struct DeviceCreationParams {
    pub api: GraphicsApi,
    /// Window to create the primary swap chain for. Headless when `None`.
    pub window: Option<NativeWindow>,
    pub width: u32,
    pub height: u32,
    /// Back buffers of the primary swap chain.
    pub buffer_count: u32,
    pub back_buffer_format: TextureFormat,
    pub vsync: bool,
    /// Enable the API debug layer (D3D12 debug layer, Vulkan validation).
    pub debug_layer: bool,
    /// Enable GPU-based validation on top of the debug layer.
    pub gpu_validation: bool,
    /// Preferred adapter index; 0 picks the default adapter.
    pub adapter_index: u32,
    pub descriptor_heaps: DescriptorHeapCapacities,
}

impl DeviceCreationParams {
    /// Headless parameters for `api`.
    pub fn new(api: GraphicsApi) -> Self {
        Self {
            api,
            window: None,
            width: 0,
            height: 0,
            buffer_count: 2,
            back_buffer_format: TextureFormat::Rgba8Unorm,
            vsync: true,
            debug_layer: cfg!(debug_assertions),
            gpu_validation: false,
            adapter_index: 0,
            descriptor_heaps: DescriptorHeapCapacities::default(),
        }
    }

    /// Attach a window and its initial size.
    pub fn with_window(mut self, window: NativeWindow, width: u32, height: u32) -> Self {
        self.window = Some(window);
        self.width = width;
        self.height = height;
        self
    }

    /// Set the back buffer size without a window. The reference backend uses
    /// this to create an offscreen primary swap chain.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Enable or disable the debug layer.
    pub fn with_debug_layer(mut self, enabled: bool) -> Self {
        self.debug_layer = enabled;
        self
    }

    /// Enable or disable GPU-based validation.
    pub fn with_gpu_validation(mut self, enabled: bool) -> Self {
        self.gpu_validation = enabled;
        self
    }

    /// Set the preferred adapter index.
    pub fn with_adapter_index(mut self, index: u32) -> Self {
        self.adapter_index = index;
        self
    }

    /// Set the descriptor heap capacities.
    pub fn with_descriptor_heaps(mut self, capacities: DescriptorHeapCapacities) -> Self {
        self.descriptor_heaps = capacities;
        self
    }

    /// Set the number of back buffers of the primary swap chain.
    pub fn with_buffer_count(mut self, buffer_count: u32) -> Self {
        self.buffer_count = buffer_count;
        self
    }

    /// Enable or disable vsync for the primary swap chain.
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Swap chain descriptor for the primary swap chain, if any.
    pub fn swap_chain_descriptor(&self) -> SwapChainDescriptor {
        SwapChainDescriptor {
            window: self.window,
            width: self.width,
            height: self.height,
            buffer_count: self.buffer_count,
            format: self.back_buffer_format,
            vsync: self.vsync,
            fullscreen: false,
        }
    }
}

/// Maximum number of swap chain back buffers.
pub const MAX_BACK_BUFFERS: u32 = 4;

/// Descriptor for creating a swap chain.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapChainDescriptor {
    /// Target window. Only the reference backend accepts `None`.
    pub window: Option<NativeWindow>,
    pub width: u32,
    pub height: u32,
    /// Requested back buffer count, clamped to `[2, MAX_BACK_BUFFERS]`.
    pub buffer_count: u32,
    pub format: TextureFormat,
    pub vsync: bool,
    pub fullscreen: bool,
}

impl SwapChainDescriptor {
    /// Back buffer count after clamping.
    pub fn clamped_buffer_count(&self) -> u32 {
        self.buffer_count.clamp(2, MAX_BACK_BUFFERS)
    }
}

/// Information about a graphics adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor_id: u32,
    pub device_id: u32,
    pub adapter_type: AdapterType,
    /// Dedicated video memory in bytes, when reported.
    pub dedicated_memory: u64,
}

/// Type of graphics adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterType {
    Discrete,
    Integrated,
    /// Software rasterizer (WARP, lavapipe, ...).
    Software,
    Unknown,
}

impl AdapterType {
    /// Whether this is a hardware adapter.
    pub fn is_hardware(self) -> bool {
        matches!(self, Self::Discrete | Self::Integrated | Self::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_from_str() {
        assert_eq!("vulkan".parse::<GraphicsApi>(), Ok(GraphicsApi::Vulkan));
        assert_eq!("DX12".parse::<GraphicsApi>(), Ok(GraphicsApi::D3D12));
        assert!(matches!(
            "metal".parse::<GraphicsApi>(),
            Err(GraphicsError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_buffer_count_clamp() {
        let mut desc = DeviceCreationParams::new(GraphicsApi::Dummy).swap_chain_descriptor();
        assert_eq!(desc.clamped_buffer_count(), 2);
        desc.buffer_count = 0;
        assert_eq!(desc.clamped_buffer_count(), 2);
        desc.buffer_count = 9;
        assert_eq!(desc.clamped_buffer_count(), MAX_BACK_BUFFERS);
    }

    #[test]
    fn test_default_heap_capacities() {
        let caps = DescriptorHeapCapacities::default();
        assert_eq!(
            (caps.render_target, caps.depth_stencil, caps.shader_resource, caps.sampler),
            (1024, 128, 4096, 256)
        );
    }
}
