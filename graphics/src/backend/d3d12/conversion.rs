//! Conversions from abstract types to Direct3D 12 / DXGI values.

use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use crate::types::{
    AddressMode, BlendFactor, BlendOp, ColorWrites, CompareFunction, CullMode, FillMode,
    FilterMode, IndexFormat, InputRate, PrimitiveTopology, ResourceState, SamplerState,
    TextureDimension, TextureFormat, VertexFormat,
};

pub(super) fn dxgi_format(format: TextureFormat) -> DXGI_FORMAT {
    match format {
        TextureFormat::R8Unorm => DXGI_FORMAT_R8_UNORM,
        TextureFormat::R8Snorm => DXGI_FORMAT_R8_SNORM,
        TextureFormat::R8Uint => DXGI_FORMAT_R8_UINT,
        TextureFormat::R8Sint => DXGI_FORMAT_R8_SINT,
        TextureFormat::R16Unorm => DXGI_FORMAT_R16_UNORM,
        TextureFormat::R16Float => DXGI_FORMAT_R16_FLOAT,
        TextureFormat::Rg8Unorm => DXGI_FORMAT_R8G8_UNORM,
        TextureFormat::R32Float => DXGI_FORMAT_R32_FLOAT,
        TextureFormat::R32Uint => DXGI_FORMAT_R32_UINT,
        TextureFormat::Rg16Float => DXGI_FORMAT_R16G16_FLOAT,
        TextureFormat::Rgba8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        TextureFormat::Rgba8UnormSrgb => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        TextureFormat::Bgra8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        TextureFormat::Bgra8UnormSrgb => DXGI_FORMAT_B8G8R8A8_UNORM_SRGB,
        TextureFormat::Rgb10a2Unorm => DXGI_FORMAT_R10G10B10A2_UNORM,
        TextureFormat::Rgba16Float => DXGI_FORMAT_R16G16B16A16_FLOAT,
        TextureFormat::Rg32Float => DXGI_FORMAT_R32G32_FLOAT,
        TextureFormat::Rgba32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,
        TextureFormat::Depth16Unorm => DXGI_FORMAT_D16_UNORM,
        TextureFormat::Depth24UnormStencil8 => DXGI_FORMAT_D24_UNORM_S8_UINT,
        TextureFormat::Depth32Float => DXGI_FORMAT_D32_FLOAT,
        TextureFormat::Depth32FloatStencil8 => DXGI_FORMAT_D32_FLOAT_S8X24_UINT,
    }
}

/// Typeless resource format for depth textures that are also sampled, and
/// the format their shader resource view reads.
pub(super) fn depth_resource_formats(format: TextureFormat) -> Option<(DXGI_FORMAT, DXGI_FORMAT)> {
    match format {
        TextureFormat::Depth16Unorm => Some((DXGI_FORMAT_R16_TYPELESS, DXGI_FORMAT_R16_UNORM)),
        TextureFormat::Depth24UnormStencil8 => {
            Some((DXGI_FORMAT_R24G8_TYPELESS, DXGI_FORMAT_R24_UNORM_X8_TYPELESS))
        }
        TextureFormat::Depth32Float => Some((DXGI_FORMAT_R32_TYPELESS, DXGI_FORMAT_R32_FLOAT)),
        TextureFormat::Depth32FloatStencil8 => Some((
            DXGI_FORMAT_R32G8X24_TYPELESS,
            DXGI_FORMAT_R32_FLOAT_X8X24_TYPELESS,
        )),
        _ => None,
    }
}

pub(super) fn resource_dimension(dimension: TextureDimension) -> D3D12_RESOURCE_DIMENSION {
    match dimension {
        TextureDimension::D1 => D3D12_RESOURCE_DIMENSION_TEXTURE1D,
        TextureDimension::D2 | TextureDimension::Cube => D3D12_RESOURCE_DIMENSION_TEXTURE2D,
        TextureDimension::D3 => D3D12_RESOURCE_DIMENSION_TEXTURE3D,
    }
}

pub(super) fn resource_state(state: ResourceState) -> D3D12_RESOURCE_STATES {
    match state {
        ResourceState::Common => D3D12_RESOURCE_STATE_COMMON,
        ResourceState::VertexBuffer | ResourceState::ConstantBuffer => {
            D3D12_RESOURCE_STATE_VERTEX_AND_CONSTANT_BUFFER
        }
        ResourceState::IndexBuffer => D3D12_RESOURCE_STATE_INDEX_BUFFER,
        ResourceState::ShaderResource => {
            D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE
                | D3D12_RESOURCE_STATE_NON_PIXEL_SHADER_RESOURCE
        }
        ResourceState::UnorderedAccess => D3D12_RESOURCE_STATE_UNORDERED_ACCESS,
        ResourceState::RenderTarget => D3D12_RESOURCE_STATE_RENDER_TARGET,
        ResourceState::DepthWrite => D3D12_RESOURCE_STATE_DEPTH_WRITE,
        ResourceState::DepthRead => D3D12_RESOURCE_STATE_DEPTH_READ,
        ResourceState::CopyDest => D3D12_RESOURCE_STATE_COPY_DEST,
        ResourceState::CopySource => D3D12_RESOURCE_STATE_COPY_SOURCE,
        ResourceState::Present => D3D12_RESOURCE_STATE_PRESENT,
    }
}

pub(super) fn filter(state: &SamplerState) -> D3D12_FILTER {
    let bit = |mode: FilterMode, shift: i32| match mode {
        FilterMode::Nearest => 0,
        FilterMode::Linear => 1 << shift,
    };
    // D3D12_ENCODE_BASIC_FILTER: mip in bit 0, mag in bit 2, min in bit 4.
    let basic = bit(state.mip_filter, 0) | bit(state.mag_filter, 2) | bit(state.min_filter, 4);
    let comparison = if state.compare.is_some() { 0x80 } else { 0 };
    D3D12_FILTER(basic | comparison)
}

pub(super) fn address_mode(mode: AddressMode) -> D3D12_TEXTURE_ADDRESS_MODE {
    match mode {
        AddressMode::ClampToEdge => D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
        AddressMode::Repeat => D3D12_TEXTURE_ADDRESS_MODE_WRAP,
        AddressMode::MirrorRepeat => D3D12_TEXTURE_ADDRESS_MODE_MIRROR,
    }
}

pub(super) fn comparison_func(func: CompareFunction) -> D3D12_COMPARISON_FUNC {
    match func {
        CompareFunction::Never => D3D12_COMPARISON_FUNC_NEVER,
        CompareFunction::Less => D3D12_COMPARISON_FUNC_LESS,
        CompareFunction::Equal => D3D12_COMPARISON_FUNC_EQUAL,
        CompareFunction::LessEqual => D3D12_COMPARISON_FUNC_LESS_EQUAL,
        CompareFunction::Greater => D3D12_COMPARISON_FUNC_GREATER,
        CompareFunction::NotEqual => D3D12_COMPARISON_FUNC_NOT_EQUAL,
        CompareFunction::GreaterEqual => D3D12_COMPARISON_FUNC_GREATER_EQUAL,
        CompareFunction::Always => D3D12_COMPARISON_FUNC_ALWAYS,
    }
}

/// Static sampler bound at `s{register}`, space 0.
pub(super) fn static_sampler(state: &SamplerState, register: u32) -> D3D12_STATIC_SAMPLER_DESC {
    let address = address_mode(state.address_mode);
    D3D12_STATIC_SAMPLER_DESC {
        Filter: filter(state),
        AddressU: address,
        AddressV: address,
        AddressW: address,
        MipLODBias: 0.0,
        MaxAnisotropy: 1,
        ComparisonFunc: comparison_func(state.compare.unwrap_or(CompareFunction::Never)),
        BorderColor: D3D12_STATIC_BORDER_COLOR_OPAQUE_BLACK,
        MinLOD: 0.0,
        MaxLOD: D3D12_FLOAT32_MAX,
        ShaderRegister: register,
        RegisterSpace: 0,
        ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
    }
}

pub(super) fn blend(factor: BlendFactor) -> D3D12_BLEND {
    match factor {
        BlendFactor::Zero => D3D12_BLEND_ZERO,
        BlendFactor::One => D3D12_BLEND_ONE,
        BlendFactor::SrcColor => D3D12_BLEND_SRC_COLOR,
        BlendFactor::OneMinusSrcColor => D3D12_BLEND_INV_SRC_COLOR,
        BlendFactor::SrcAlpha => D3D12_BLEND_SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => D3D12_BLEND_INV_SRC_ALPHA,
        BlendFactor::DstColor => D3D12_BLEND_DEST_COLOR,
        BlendFactor::OneMinusDstColor => D3D12_BLEND_INV_DEST_COLOR,
        BlendFactor::DstAlpha => D3D12_BLEND_DEST_ALPHA,
        BlendFactor::OneMinusDstAlpha => D3D12_BLEND_INV_DEST_ALPHA,
    }
}

/// Alpha factors may not read color channels.
pub(super) fn alpha_blend(factor: BlendFactor) -> D3D12_BLEND {
    match factor {
        BlendFactor::SrcColor => D3D12_BLEND_SRC_ALPHA,
        BlendFactor::OneMinusSrcColor => D3D12_BLEND_INV_SRC_ALPHA,
        BlendFactor::DstColor => D3D12_BLEND_DEST_ALPHA,
        BlendFactor::OneMinusDstColor => D3D12_BLEND_INV_DEST_ALPHA,
        other => blend(other),
    }
}

pub(super) fn blend_op(op: BlendOp) -> D3D12_BLEND_OP {
    match op {
        BlendOp::Add => D3D12_BLEND_OP_ADD,
        BlendOp::Subtract => D3D12_BLEND_OP_SUBTRACT,
        BlendOp::ReverseSubtract => D3D12_BLEND_OP_REV_SUBTRACT,
        BlendOp::Min => D3D12_BLEND_OP_MIN,
        BlendOp::Max => D3D12_BLEND_OP_MAX,
    }
}

pub(super) fn write_mask(mask: ColorWrites) -> u8 {
    // D3D12_COLOR_WRITE_ENABLE uses the same bit order.
    mask.bits()
}

pub(super) fn fill_mode(mode: FillMode) -> D3D12_FILL_MODE {
    match mode {
        FillMode::Solid => D3D12_FILL_MODE_SOLID,
        FillMode::Wireframe => D3D12_FILL_MODE_WIREFRAME,
    }
}

pub(super) fn cull_mode(mode: CullMode) -> D3D12_CULL_MODE {
    match mode {
        CullMode::None => D3D12_CULL_MODE_NONE,
        CullMode::Front => D3D12_CULL_MODE_FRONT,
        CullMode::Back => D3D12_CULL_MODE_BACK,
    }
}

pub(super) fn topology_type(topology: PrimitiveTopology) -> D3D12_PRIMITIVE_TOPOLOGY_TYPE {
    match topology {
        PrimitiveTopology::PointList => D3D12_PRIMITIVE_TOPOLOGY_TYPE_POINT,
        PrimitiveTopology::LineList | PrimitiveTopology::LineStrip => {
            D3D12_PRIMITIVE_TOPOLOGY_TYPE_LINE
        }
        PrimitiveTopology::TriangleList | PrimitiveTopology::TriangleStrip => {
            D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE
        }
    }
}

pub(super) fn primitive_topology(topology: PrimitiveTopology) -> D3D_PRIMITIVE_TOPOLOGY {
    match topology {
        PrimitiveTopology::PointList => D3D_PRIMITIVE_TOPOLOGY_POINTLIST,
        PrimitiveTopology::LineList => D3D_PRIMITIVE_TOPOLOGY_LINELIST,
        PrimitiveTopology::LineStrip => D3D_PRIMITIVE_TOPOLOGY_LINESTRIP,
        PrimitiveTopology::TriangleList => D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
        PrimitiveTopology::TriangleStrip => D3D_PRIMITIVE_TOPOLOGY_TRIANGLESTRIP,
    }
}

pub(super) fn vertex_format(format: VertexFormat) -> DXGI_FORMAT {
    match format {
        VertexFormat::Float32 => DXGI_FORMAT_R32_FLOAT,
        VertexFormat::Float32x2 => DXGI_FORMAT_R32G32_FLOAT,
        VertexFormat::Float32x3 => DXGI_FORMAT_R32G32B32_FLOAT,
        VertexFormat::Float32x4 => DXGI_FORMAT_R32G32B32A32_FLOAT,
        VertexFormat::Uint32 => DXGI_FORMAT_R32_UINT,
        VertexFormat::Uint32x2 => DXGI_FORMAT_R32G32_UINT,
        VertexFormat::Uint32x4 => DXGI_FORMAT_R32G32B32A32_UINT,
        VertexFormat::Sint32 => DXGI_FORMAT_R32_SINT,
        VertexFormat::Unorm8x4 => DXGI_FORMAT_R8G8B8A8_UNORM,
        VertexFormat::Uint8x4 => DXGI_FORMAT_R8G8B8A8_UINT,
    }
}

pub(super) fn input_classification(rate: InputRate) -> D3D12_INPUT_CLASSIFICATION {
    match rate {
        InputRate::PerVertex => D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
        InputRate::PerInstance => D3D12_INPUT_CLASSIFICATION_PER_INSTANCE_DATA,
    }
}

pub(super) fn index_format(format: IndexFormat) -> DXGI_FORMAT {
    match format {
        IndexFormat::Uint16 => DXGI_FORMAT_R16_UINT,
        IndexFormat::Uint32 => DXGI_FORMAT_R32_UINT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_encoding_matches_d3d12_constants() {
        assert_eq!(filter(&SamplerState::nearest()), D3D12_FILTER_MIN_MAG_MIP_POINT);
        assert_eq!(filter(&SamplerState::linear()), D3D12_FILTER_MIN_MAG_MIP_LINEAR);
        let comparison = SamplerState {
            compare: Some(CompareFunction::Less),
            ..SamplerState::linear()
        };
        assert_eq!(filter(&comparison), D3D12_FILTER_COMPARISON_MIN_MAG_MIP_LINEAR);
    }

    #[test]
    fn test_sampled_depth_uses_typeless_resource() {
        let (resource, view) = depth_resource_formats(TextureFormat::Depth32Float).unwrap();
        assert_eq!(resource, DXGI_FORMAT_R32_TYPELESS);
        assert_eq!(view, DXGI_FORMAT_R32_FLOAT);
        assert!(depth_resource_formats(TextureFormat::Rgba8Unorm).is_none());
    }
}
