//! GPU backend abstraction layer.
//!
//! Backends form a closed set. Every public resource type wraps one of the
//! `Gpu*` enums below, whose variants hold the backend-owned native state.
//! Each native object keeps a reference to its backend's shared context so it
//! can hand itself to that backend's deferred destruction queue on drop.
//!
//! # Available Backends
//!
//! - `dummy` (default): CPU reference implementation used by the test-suite
//! - `vulkan-backend` (default): Vulkan 1.3 through ash
//! - `d3d12-backend`: Direct3D 12 through the `windows` crate (Windows only)

pub mod adapter;
pub mod descriptor_heap;
pub mod dummy;
#[cfg(any(feature = "vulkan-backend", all(windows, feature = "d3d12-backend")))]
pub(crate) mod serial_queue;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

#[cfg(all(windows, feature = "d3d12-backend"))]
pub mod d3d12;

use std::ptr::NonNull;
use std::sync::Arc;

use crate::command_list::CommandList;
use crate::error::{GraphicsError, GraphicsResult};
use crate::resources::Texture;
use crate::types::{
    AdapterInfo, BufferDescriptor, GraphicsApi, PipelineStateDescriptor, ResourceState,
    ShaderDescriptor, SwapChainDescriptor, TextureDescriptor,
};

pub use dummy::DummyBackend;

/// Persistently mapped host-visible memory of a buffer.
///
/// The pointer stays valid for the lifetime of the owning resource.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MappedPtr(pub(crate) NonNull<u8>);

// SAFETY: mapped memory is plain bytes shared with the GPU. Synchronizing CPU
// access against GPU work is the caller's responsibility, exactly as for the
// native mapping APIs.
unsafe impl Send for MappedPtr {}
unsafe impl Sync for MappedPtr {}

/// Mapping of a buffer-backed staging texture.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TextureMappingInfo {
    pub ptr: MappedPtr,
    pub len: usize,
    pub row_pitch: u32,
}

fn backend_mismatch(kind: &str, expected: &str) -> GraphicsError {
    GraphicsError::State(format!("{kind} does not belong to the {expected} backend"))
}

/// Defines a closed enum over the backends' native representation of one
/// resource kind, plus checked accessors for each variant.
macro_rules! gpu_resource {
    ($(#[$meta:meta])* $name:ident, $kind:literal {
        dummy: $dummy:ty,
        vulkan: $vulkan:ty,
        d3d12: $d3d12:ty $(,)?
    }) => {
        $(#[$meta])*
        pub enum $name {
            /// CPU reference backend.
            Dummy($dummy),
            /// Vulkan backend.
            #[cfg(feature = "vulkan-backend")]
            Vulkan($vulkan),
            /// Direct3D 12 backend.
            #[cfg(all(windows, feature = "d3d12-backend"))]
            D3d12($d3d12),
        }

        #[allow(dead_code)]
        impl $name {
            pub(crate) fn as_dummy(&self) -> GraphicsResult<&$dummy> {
                #[allow(unreachable_patterns)]
                match self {
                    Self::Dummy(inner) => Ok(inner),
                    _ => Err(backend_mismatch($kind, "dummy")),
                }
            }

            pub(crate) fn as_dummy_mut(&mut self) -> GraphicsResult<&mut $dummy> {
                #[allow(unreachable_patterns)]
                match self {
                    Self::Dummy(inner) => Ok(inner),
                    _ => Err(backend_mismatch($kind, "dummy")),
                }
            }

            #[cfg(feature = "vulkan-backend")]
            pub(crate) fn as_vulkan(&self) -> GraphicsResult<&$vulkan> {
                #[allow(unreachable_patterns)]
                match self {
                    Self::Vulkan(inner) => Ok(inner),
                    _ => Err(backend_mismatch($kind, "Vulkan")),
                }
            }

            #[cfg(feature = "vulkan-backend")]
            pub(crate) fn as_vulkan_mut(&mut self) -> GraphicsResult<&mut $vulkan> {
                #[allow(unreachable_patterns)]
                match self {
                    Self::Vulkan(inner) => Ok(inner),
                    _ => Err(backend_mismatch($kind, "Vulkan")),
                }
            }

            #[cfg(all(windows, feature = "d3d12-backend"))]
            pub(crate) fn as_d3d12(&self) -> GraphicsResult<&$d3d12> {
                #[allow(unreachable_patterns)]
                match self {
                    Self::D3d12(inner) => Ok(inner),
                    _ => Err(backend_mismatch($kind, "Direct3D 12")),
                }
            }

            #[cfg(all(windows, feature = "d3d12-backend"))]
            pub(crate) fn as_d3d12_mut(&mut self) -> GraphicsResult<&mut $d3d12> {
                #[allow(unreachable_patterns)]
                match self {
                    Self::D3d12(inner) => Ok(inner),
                    _ => Err(backend_mismatch($kind, "Direct3D 12")),
                }
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    Self::Dummy(_) => write!(f, "{}::Dummy", stringify!($name)),
                    #[cfg(feature = "vulkan-backend")]
                    Self::Vulkan(_) => write!(f, "{}::Vulkan", stringify!($name)),
                    #[cfg(all(windows, feature = "d3d12-backend"))]
                    Self::D3d12(_) => write!(f, "{}::D3d12", stringify!($name)),
                }
            }
        }
    };
}

/// Evaluate `$body` with `$inner` bound to the active variant of a `Gpu*` enum.
macro_rules! with_variant {
    ($value:expr, $enum:ident, $inner:ident => $body:expr) => {
        match $value {
            $crate::backend::$enum::Dummy($inner) => $body,
            #[cfg(feature = "vulkan-backend")]
            $crate::backend::$enum::Vulkan($inner) => $body,
            #[cfg(all(windows, feature = "d3d12-backend"))]
            $crate::backend::$enum::D3d12($inner) => $body,
        }
    };
}

/// Like [`with_variant!`], wrapping the `Ok` value of `$body` into the same
/// variant of `$wrap`.
macro_rules! create_variant {
    ($value:expr, $inner:ident => $body:expr, $wrap:ident) => {
        match $value {
            $crate::backend::GpuBackend::Dummy($inner) => $body.map($crate::backend::$wrap::Dummy),
            #[cfg(feature = "vulkan-backend")]
            $crate::backend::GpuBackend::Vulkan($inner) => {
                $body.map($crate::backend::$wrap::Vulkan)
            }
            #[cfg(all(windows, feature = "d3d12-backend"))]
            $crate::backend::GpuBackend::D3d12($inner) => $body.map($crate::backend::$wrap::D3d12),
        }
    };
}

pub(crate) use with_variant;

gpu_resource!(
    /// Backend representation of a buffer.
    GpuBuffer, "buffer" {
        dummy: dummy::DummyBuffer,
        vulkan: vulkan::VulkanBuffer,
        d3d12: d3d12::D3d12Buffer,
    }
);

gpu_resource!(
    /// Backend representation of a texture.
    GpuTexture, "texture" {
        dummy: dummy::DummyTexture,
        vulkan: vulkan::VulkanTexture,
        d3d12: d3d12::D3d12Texture,
    }
);

gpu_resource!(
    /// Backend representation of a compiled shader.
    GpuShader, "shader" {
        dummy: dummy::DummyShader,
        vulkan: vulkan::VulkanShader,
        d3d12: d3d12::D3d12Shader,
    }
);

gpu_resource!(
    /// Backend representation of a pipeline state object.
    GpuPipeline, "pipeline state" {
        dummy: dummy::DummyPipeline,
        vulkan: vulkan::VulkanPipeline,
        d3d12: d3d12::D3d12Pipeline,
    }
);

gpu_resource!(
    /// Backend representation of a command list.
    GpuCommandList, "command list" {
        dummy: dummy::DummyCommandList,
        vulkan: vulkan::VulkanCommandList,
        d3d12: d3d12::D3d12CommandList,
    }
);

gpu_resource!(
    /// Backend representation of a fence.
    GpuFence, "fence" {
        dummy: dummy::DummyFence,
        vulkan: vulkan::VulkanFence,
        d3d12: d3d12::D3d12Fence,
    }
);

gpu_resource!(
    /// Backend representation of a swap chain.
    GpuSwapChain, "swap chain" {
        dummy: dummy::DummySwapChain,
        vulkan: vulkan::VulkanSwapChain,
        d3d12: d3d12::D3d12SwapChain,
    }
);

/// A device-level backend: adapter, queue and shared native state.
#[derive(Clone)]
pub enum GpuBackend {
    /// CPU reference backend.
    Dummy(Arc<dummy::DummyBackend>),
    /// Vulkan backend.
    #[cfg(feature = "vulkan-backend")]
    Vulkan(Arc<vulkan::VulkanBackend>),
    /// Direct3D 12 backend.
    #[cfg(all(windows, feature = "d3d12-backend"))]
    D3d12(Arc<d3d12::D3d12Backend>),
}

impl std::fmt::Debug for GpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GpuBackend({})", self.api())
    }
}

impl GpuBackend {
    /// API implemented by this backend.
    pub fn api(&self) -> GraphicsApi {
        match self {
            Self::Dummy(_) => GraphicsApi::Dummy,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(_) => GraphicsApi::Vulkan,
            #[cfg(all(windows, feature = "d3d12-backend"))]
            Self::D3d12(_) => GraphicsApi::D3D12,
        }
    }

    /// Adapter the backend runs on.
    pub fn adapter_info(&self) -> AdapterInfo {
        with_variant!(self, GpuBackend, backend => backend.adapter_info().clone())
    }

    pub(crate) fn create_buffer(
        &self,
        descriptor: &BufferDescriptor,
        data: Option<&[u8]>,
    ) -> GraphicsResult<GpuBuffer> {
        create_variant!(self, b => b.create_buffer(descriptor, data), GpuBuffer)
    }

    pub(crate) fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
        data: Option<&[u8]>,
    ) -> GraphicsResult<GpuTexture> {
        create_variant!(self, b => b.create_texture(descriptor, data), GpuTexture)
    }

    pub(crate) fn create_shader(&self, descriptor: &ShaderDescriptor) -> GraphicsResult<GpuShader> {
        create_variant!(self, b => b.create_shader(descriptor), GpuShader)
    }

    pub(crate) fn create_pipeline(
        &self,
        descriptor: &PipelineStateDescriptor,
    ) -> GraphicsResult<GpuPipeline> {
        create_variant!(self, b => b.create_pipeline(descriptor), GpuPipeline)
    }

    pub(crate) fn create_command_list(&self) -> GraphicsResult<GpuCommandList> {
        create_variant!(self, b => b.create_command_list(), GpuCommandList)
    }

    pub(crate) fn create_fence(&self, initial_value: u64) -> GraphicsResult<GpuFence> {
        create_variant!(self, b => b.create_fence(initial_value), GpuFence)
    }

    pub(crate) fn create_swap_chain(
        &self,
        descriptor: &SwapChainDescriptor,
    ) -> GraphicsResult<GpuSwapChain> {
        create_variant!(self, b => b.create_swap_chain(descriptor), GpuSwapChain)
    }

    /// Submit closed command lists in array order as one native submission.
    pub(crate) fn execute(&self, lists: &[&CommandList]) -> GraphicsResult<()> {
        with_variant!(self, GpuBackend, b => b.execute(lists))
    }

    /// Block until the queue has drained and retire deferred destructions.
    pub(crate) fn wait_idle(&self) -> GraphicsResult<()> {
        with_variant!(self, GpuBackend, b => b.wait_idle())
    }

    /// Number of queue submissions made so far, internal uploads included.
    pub(crate) fn submission_count(&self) -> u64 {
        with_variant!(self, GpuBackend, b => b.submission_count())
    }
}

impl GpuBuffer {
    /// Persistent mapping for host-visible buffers.
    pub(crate) fn mapped_ptr(&self) -> Option<MappedPtr> {
        with_variant!(self, GpuBuffer, b => b.mapped_ptr())
    }

    /// Write `data` at `offset`, going through a staging copy for device-local
    /// memory. `state` is the buffer's current tracked state.
    pub(crate) fn update(
        &self,
        offset: u64,
        data: &[u8],
        state: ResourceState,
    ) -> GraphicsResult<()> {
        with_variant!(self, GpuBuffer, b => b.update(offset, data, state))
    }
}

impl GpuTexture {
    /// Mapping of a staging texture.
    pub(crate) fn mapping(&self) -> Option<TextureMappingInfo> {
        with_variant!(self, GpuTexture, t => t.mapping())
    }
}

impl GpuFence {
    pub(crate) fn signal(&self, value: u64) -> GraphicsResult<()> {
        with_variant!(self, GpuFence, f => f.signal(value))
    }

    pub(crate) fn wait(&self, value: u64) -> GraphicsResult<()> {
        with_variant!(self, GpuFence, f => f.wait(value))
    }

    pub(crate) fn completed_value(&self) -> u64 {
        with_variant!(self, GpuFence, f => f.completed_value())
    }
}

impl GpuSwapChain {
    pub(crate) fn back_buffers(&self) -> GraphicsResult<Vec<GpuTexture>> {
        match self {
            Self::Dummy(s) => Ok(s.back_buffers()?.into_iter().map(GpuTexture::Dummy).collect()),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(s) => Ok(s.back_buffers()?.into_iter().map(GpuTexture::Vulkan).collect()),
            #[cfg(all(windows, feature = "d3d12-backend"))]
            Self::D3d12(s) => Ok(s.back_buffers()?.into_iter().map(GpuTexture::D3d12).collect()),
        }
    }

    pub(crate) fn current_index(&self) -> u32 {
        with_variant!(self, GpuSwapChain, s => s.current_index())
    }

    /// Actual size of the back buffers, which may differ from the requested one.
    pub(crate) fn extent(&self) -> (u32, u32) {
        with_variant!(self, GpuSwapChain, s => s.extent())
    }

    pub(crate) fn present(
        &mut self,
        back_buffer: &Texture,
        state: ResourceState,
    ) -> GraphicsResult<()> {
        with_variant!(self, GpuSwapChain, s => s.present(back_buffer, state))
    }

    pub(crate) fn resize(&mut self, width: u32, height: u32) -> GraphicsResult<()> {
        with_variant!(self, GpuSwapChain, s => s.resize(width, height))
    }

    pub(crate) fn wait_idle(&self) -> GraphicsResult<()> {
        with_variant!(self, GpuSwapChain, s => s.wait_idle())
    }

    pub(crate) fn set_fullscreen(&mut self, fullscreen: bool) -> GraphicsResult<()> {
        with_variant!(self, GpuSwapChain, s => s.set_fullscreen(fullscreen))
    }
}
