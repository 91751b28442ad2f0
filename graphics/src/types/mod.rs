//! Value types and descriptors for graphics resources.
//!
//! Everything here is plain data: formats, usage flags, states and the
//! descriptor structs handed to the device's `create_*` calls.

mod buffer;
mod common;
mod device;
mod pipeline;
mod shader;
mod state;
mod texture;
mod usage;

pub use buffer::BufferDescriptor;
pub use common::{ClearColor, Extent3d, IndexFormat, ScissorRect, Viewport};
pub use device::{
    AdapterInfo, AdapterType, DescriptorHeapCapacities, DeviceCreationParams, GraphicsApi,
    MAX_BACK_BUFFERS, NativeWindow, SwapChainDescriptor,
};
pub use pipeline::{
    AddressMode, BindingSlot, BlendFactor, BlendOp, BlendState, ColorWrites, CompareFunction,
    CullMode, DepthStencilState, FillMode, FilterMode, FrontFace, InputElement, InputRate,
    MAX_RENDER_TARGETS, PipelineStateDescriptor, PrimitiveTopology, RasterizerState,
    SamplerState, VertexFormat,
};
pub use shader::{ShaderDescriptor, ShaderStage};
pub use state::ResourceState;
pub use texture::{TextureDescriptor, TextureDimension, TextureFormat};
pub use usage::{BindFlags, CpuAccessFlags, ResourceUsage};
