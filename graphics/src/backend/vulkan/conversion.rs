//! Conversions from Keystone types to Vulkan types.

use ash::vk;

use crate::types::{
    AddressMode, BindFlags, BlendFactor, BlendOp, ColorWrites, CompareFunction, CullMode,
    FillMode, FilterMode, FrontFace, IndexFormat, InputRate, PrimitiveTopology, SamplerState,
    TextureDimension, TextureFormat, VertexFormat,
};

pub(super) fn convert_texture_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::R8Unorm => vk::Format::R8_UNORM,
        TextureFormat::R8Snorm => vk::Format::R8_SNORM,
        TextureFormat::R8Uint => vk::Format::R8_UINT,
        TextureFormat::R8Sint => vk::Format::R8_SINT,

        TextureFormat::R16Unorm => vk::Format::R16_UNORM,
        TextureFormat::R16Float => vk::Format::R16_SFLOAT,
        TextureFormat::Rg8Unorm => vk::Format::R8G8_UNORM,

        TextureFormat::R32Float => vk::Format::R32_SFLOAT,
        TextureFormat::R32Uint => vk::Format::R32_UINT,
        TextureFormat::Rg16Float => vk::Format::R16G16_SFLOAT,
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
        TextureFormat::Rgb10a2Unorm => vk::Format::A2B10G10R10_UNORM_PACK32,

        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::Rg32Float => vk::Format::R32G32_SFLOAT,

        TextureFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,

        TextureFormat::Depth16Unorm => vk::Format::D16_UNORM,
        TextureFormat::Depth24UnormStencil8 => vk::Format::D24_UNORM_S8_UINT,
        TextureFormat::Depth32Float => vk::Format::D32_SFLOAT,
        TextureFormat::Depth32FloatStencil8 => vk::Format::D32_SFLOAT_S8_UINT,
    }
}

/// Buffer usage for a buffer with `bind_flags`. Every buffer can be copied
/// from and to.
pub(super) fn buffer_usage(bind_flags: BindFlags) -> vk::BufferUsageFlags {
    let mut usage = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
    if bind_flags.contains(BindFlags::VERTEX_BUFFER) {
        usage |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if bind_flags.contains(BindFlags::INDEX_BUFFER) {
        usage |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if bind_flags.contains(BindFlags::CONSTANT_BUFFER) {
        usage |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if bind_flags.intersects(BindFlags::SHADER_RESOURCE | BindFlags::UNORDERED_ACCESS) {
        usage |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if bind_flags.contains(BindFlags::INDIRECT_ARGUMENT) {
        usage |= vk::BufferUsageFlags::INDIRECT_BUFFER;
    }
    usage
}

/// Image usage for a texture with `bind_flags`. Every image can be copied
/// from and to.
pub(super) fn image_usage(bind_flags: BindFlags) -> vk::ImageUsageFlags {
    let mut usage = vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
    if bind_flags.contains(BindFlags::SHADER_RESOURCE) {
        usage |= vk::ImageUsageFlags::SAMPLED;
    }
    if bind_flags.contains(BindFlags::UNORDERED_ACCESS) {
        usage |= vk::ImageUsageFlags::STORAGE;
    }
    if bind_flags.contains(BindFlags::RENDER_TARGET) {
        usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if bind_flags.contains(BindFlags::DEPTH_STENCIL) {
        usage |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    usage
}

pub(super) fn image_type(dimension: TextureDimension) -> vk::ImageType {
    match dimension {
        TextureDimension::D1 => vk::ImageType::TYPE_1D,
        TextureDimension::D2 | TextureDimension::Cube => vk::ImageType::TYPE_2D,
        TextureDimension::D3 => vk::ImageType::TYPE_3D,
    }
}

/// View type covering every layer of a texture.
pub(super) fn sampled_view_type(dimension: TextureDimension, array_size: u32) -> vk::ImageViewType {
    match (dimension, array_size > 1) {
        (TextureDimension::D1, false) => vk::ImageViewType::TYPE_1D,
        (TextureDimension::D1, true) => vk::ImageViewType::TYPE_1D_ARRAY,
        (TextureDimension::D2, false) => vk::ImageViewType::TYPE_2D,
        (TextureDimension::D2, true) => vk::ImageViewType::TYPE_2D_ARRAY,
        (TextureDimension::Cube, false) => vk::ImageViewType::CUBE,
        (TextureDimension::Cube, true) => vk::ImageViewType::CUBE_ARRAY,
        (TextureDimension::D3, _) => vk::ImageViewType::TYPE_3D,
    }
}

pub(super) fn filter(mode: FilterMode) -> vk::Filter {
    match mode {
        FilterMode::Nearest => vk::Filter::NEAREST,
        FilterMode::Linear => vk::Filter::LINEAR,
    }
}

pub(super) fn mipmap_mode(mode: FilterMode) -> vk::SamplerMipmapMode {
    match mode {
        FilterMode::Nearest => vk::SamplerMipmapMode::NEAREST,
        FilterMode::Linear => vk::SamplerMipmapMode::LINEAR,
    }
}

pub(super) fn address_mode(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::MirrorRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
    }
}

pub(super) fn compare_op(func: CompareFunction) -> vk::CompareOp {
    match func {
        CompareFunction::Never => vk::CompareOp::NEVER,
        CompareFunction::Less => vk::CompareOp::LESS,
        CompareFunction::Equal => vk::CompareOp::EQUAL,
        CompareFunction::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareFunction::Greater => vk::CompareOp::GREATER,
        CompareFunction::NotEqual => vk::CompareOp::NOT_EQUAL,
        CompareFunction::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareFunction::Always => vk::CompareOp::ALWAYS,
    }
}

pub(super) fn sampler_create_info(state: &SamplerState) -> vk::SamplerCreateInfo<'static> {
    let address = address_mode(state.address_mode);
    let mut info = vk::SamplerCreateInfo::default()
        .mag_filter(filter(state.mag_filter))
        .min_filter(filter(state.min_filter))
        .mipmap_mode(mipmap_mode(state.mip_filter))
        .address_mode_u(address)
        .address_mode_v(address)
        .address_mode_w(address)
        .min_lod(0.0)
        .max_lod(vk::LOD_CLAMP_NONE);
    if let Some(compare) = state.compare {
        info = info.compare_enable(true).compare_op(compare_op(compare));
    }
    info
}

pub(super) fn blend_factor(factor: BlendFactor) -> vk::BlendFactor {
    match factor {
        BlendFactor::Zero => vk::BlendFactor::ZERO,
        BlendFactor::One => vk::BlendFactor::ONE,
        BlendFactor::SrcColor => vk::BlendFactor::SRC_COLOR,
        BlendFactor::OneMinusSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
        BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstColor => vk::BlendFactor::DST_COLOR,
        BlendFactor::OneMinusDstColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
        BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
        BlendFactor::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
    }
}

pub(super) fn blend_op(op: BlendOp) -> vk::BlendOp {
    match op {
        BlendOp::Add => vk::BlendOp::ADD,
        BlendOp::Subtract => vk::BlendOp::SUBTRACT,
        BlendOp::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
        BlendOp::Min => vk::BlendOp::MIN,
        BlendOp::Max => vk::BlendOp::MAX,
    }
}

pub(super) fn color_writes(mask: ColorWrites) -> vk::ColorComponentFlags {
    let mut flags = vk::ColorComponentFlags::empty();
    if mask.contains(ColorWrites::RED) {
        flags |= vk::ColorComponentFlags::R;
    }
    if mask.contains(ColorWrites::GREEN) {
        flags |= vk::ColorComponentFlags::G;
    }
    if mask.contains(ColorWrites::BLUE) {
        flags |= vk::ColorComponentFlags::B;
    }
    if mask.contains(ColorWrites::ALPHA) {
        flags |= vk::ColorComponentFlags::A;
    }
    flags
}

pub(super) fn topology(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
        PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
    }
}

pub(super) fn cull_mode(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
    }
}

/// Shaders flip clip-space Y, so framebuffer-space winding matches Direct3D
/// and the front face maps one to one.
pub(super) fn front_face(face: FrontFace) -> vk::FrontFace {
    match face {
        FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
        FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
    }
}

pub(super) fn polygon_mode(mode: FillMode) -> vk::PolygonMode {
    match mode {
        FillMode::Solid => vk::PolygonMode::FILL,
        FillMode::Wireframe => vk::PolygonMode::LINE,
    }
}

pub(super) fn vertex_format(format: VertexFormat) -> vk::Format {
    match format {
        VertexFormat::Float32 => vk::Format::R32_SFLOAT,
        VertexFormat::Float32x2 => vk::Format::R32G32_SFLOAT,
        VertexFormat::Float32x3 => vk::Format::R32G32B32_SFLOAT,
        VertexFormat::Float32x4 => vk::Format::R32G32B32A32_SFLOAT,
        VertexFormat::Uint32 => vk::Format::R32_UINT,
        VertexFormat::Uint32x2 => vk::Format::R32G32_UINT,
        VertexFormat::Uint32x4 => vk::Format::R32G32B32A32_UINT,
        VertexFormat::Sint32 => vk::Format::R32_SINT,
        VertexFormat::Unorm8x4 => vk::Format::R8G8B8A8_UNORM,
        VertexFormat::Uint8x4 => vk::Format::R8G8B8A8_UINT,
    }
}

pub(super) fn input_rate(rate: InputRate) -> vk::VertexInputRate {
    match rate {
        InputRate::PerVertex => vk::VertexInputRate::VERTEX,
        InputRate::PerInstance => vk::VertexInputRate::INSTANCE,
    }
}

pub(super) fn index_type(format: IndexFormat) -> vk::IndexType {
    match format {
        IndexFormat::Uint16 => vk::IndexType::UINT16,
        IndexFormat::Uint32 => vk::IndexType::UINT32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_srgb_formats() {
        assert_eq!(
            convert_texture_format(TextureFormat::Bgra8UnormSrgb),
            vk::Format::B8G8R8A8_SRGB
        );
        assert_eq!(
            convert_texture_format(TextureFormat::Depth24UnormStencil8),
            vk::Format::D24_UNORM_S8_UINT
        );
    }

    #[test]
    fn test_usage_always_allows_copies() {
        let usage = buffer_usage(BindFlags::VERTEX_BUFFER);
        assert!(
            usage.contains(vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::VERTEX_BUFFER)
        );
        let usage = image_usage(BindFlags::RENDER_TARGET | BindFlags::SHADER_RESOURCE);
        assert!(
            usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED)
        );
        assert!(usage.contains(vk::ImageUsageFlags::TRANSFER_SRC));
    }

    #[test]
    fn test_view_types() {
        assert_eq!(sampled_view_type(TextureDimension::Cube, 1), vk::ImageViewType::CUBE);
        assert_eq!(sampled_view_type(TextureDimension::D2, 4), vk::ImageViewType::TYPE_2D_ARRAY);
        assert_eq!(sampled_view_type(TextureDimension::D3, 1), vk::ImageViewType::TYPE_3D);
    }

    #[test]
    fn test_comparison_sampler() {
        let state = SamplerState {
            compare: Some(CompareFunction::LessEqual),
            ..SamplerState::nearest()
        };
        let info = sampler_create_info(&state);
        assert_eq!(info.compare_enable, vk::TRUE);
        assert_eq!(info.compare_op, vk::CompareOp::LESS_OR_EQUAL);
        assert_eq!(info.mag_filter, vk::Filter::NEAREST);
    }

    #[test]
    fn test_color_write_mask() {
        assert_eq!(color_writes(ColorWrites::ALL), vk::ColorComponentFlags::RGBA);
        assert_eq!(color_writes(ColorWrites::RED), vk::ColorComponentFlags::R);
    }
}
