//! Pipeline state descriptors.

use bitflags::bitflags;

use super::{ShaderDescriptor, TextureFormat};

/// Maximum number of simultaneously bound color render targets.
pub const MAX_RENDER_TARGETS: usize = 8;

/// Format of a single vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
    Uint32,
    Uint32x2,
    Uint32x4,
    Sint32,
    Unorm8x4,
    Uint8x4,
}

impl VertexFormat {
    /// Size of the attribute in bytes.
    pub fn size(self) -> u32 {
        match self {
            Self::Float32 | Self::Uint32 | Self::Sint32 | Self::Unorm8x4 | Self::Uint8x4 => 4,
            Self::Float32x2 | Self::Uint32x2 => 8,
            Self::Float32x3 => 12,
            Self::Float32x4 | Self::Uint32x4 => 16,
        }
    }
}

/// Whether an input element advances per vertex or per instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InputRate {
    #[default]
    PerVertex,
    PerInstance,
}

/// One element of a vertex input layout.
///
/// The element's index within [`PipelineStateDescriptor::input_layout`] is the
/// shader input location (`@location(n)` in WGSL).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InputElement {
    pub semantic_name: String,
    pub semantic_index: u32,
    pub format: VertexFormat,
    /// Vertex buffer slot the element is read from.
    pub slot: u32,
    /// Byte offset within one vertex of that slot.
    pub offset: u32,
    pub rate: InputRate,
}

impl InputElement {
    /// Per-vertex element read from `slot` at `offset`.
    pub fn new(
        semantic_name: impl Into<String>,
        format: VertexFormat,
        slot: u32,
        offset: u32,
    ) -> Self {
        Self {
            semantic_name: semantic_name.into(),
            semantic_index: 0,
            format,
            slot,
            offset,
            rate: InputRate::PerVertex,
        }
    }

    /// Mark the element as per-instance.
    pub fn per_instance(mut self) -> Self {
        self.rate = InputRate::PerInstance;
        self
    }
}

/// Texture filtering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
}

/// Texture coordinate addressing outside `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    #[default]
    ClampToEdge,
    Repeat,
    MirrorRepeat,
}

/// Comparison function for depth testing and comparison samplers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareFunction {
    Never,
    #[default]
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Immutable sampler baked into the pipeline layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SamplerState {
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub mip_filter: FilterMode,
    pub address_mode: AddressMode,
    pub compare: Option<CompareFunction>,
}

impl SamplerState {
    /// Trilinear sampler with clamped addressing.
    pub fn linear() -> Self {
        Self::default()
    }

    /// Point sampler with clamped addressing.
    pub fn nearest() -> Self {
        Self {
            min_filter: FilterMode::Nearest,
            mag_filter: FilterMode::Nearest,
            mip_filter: FilterMode::Nearest,
            ..Self::default()
        }
    }
}

/// One entry of a pipeline's binding layout.
///
/// Slot `i` corresponds to WGSL `@group(0) @binding(i)`, except for
/// [`BindingSlot::Constants`], which maps to the `var<push_constant>` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingSlot {
    /// Inline 32-bit constants. At most one per pipeline.
    Constants { num_values: u32 },
    /// Constant (uniform) buffer.
    ConstantBuffer,
    /// Sampled texture.
    ShaderResource,
    /// Static sampler.
    Sampler(SamplerState),
}

/// Blend factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstColor,
    OneMinusDstColor,
    DstAlpha,
    OneMinusDstAlpha,
}

/// Blend operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

bitflags! {
    /// Color channels written by the output merger.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColorWrites: u8 {
        const RED = 1 << 0;
        const GREEN = 1 << 1;
        const BLUE = 1 << 2;
        const ALPHA = 1 << 3;
        const ALL = Self::RED.bits() | Self::GREEN.bits() | Self::BLUE.bits() | Self::ALPHA.bits();
    }
}

/// Blend state applied to every bound render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub enabled: bool,
    pub src_color: BlendFactor,
    pub dst_color: BlendFactor,
    pub color_op: BlendOp,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
    pub alpha_op: BlendOp,
    pub write_mask: ColorWrites,
}

impl BlendState {
    /// Blending disabled, all channels written.
    pub const OPAQUE: Self = Self {
        enabled: false,
        src_color: BlendFactor::One,
        dst_color: BlendFactor::Zero,
        color_op: BlendOp::Add,
        src_alpha: BlendFactor::One,
        dst_alpha: BlendFactor::Zero,
        alpha_op: BlendOp::Add,
        write_mask: ColorWrites::ALL,
    };

    /// Standard non-premultiplied alpha blending.
    pub const ALPHA: Self = Self {
        enabled: true,
        src_color: BlendFactor::SrcAlpha,
        dst_color: BlendFactor::OneMinusSrcAlpha,
        color_op: BlendOp::Add,
        src_alpha: BlendFactor::One,
        dst_alpha: BlendFactor::OneMinusSrcAlpha,
        alpha_op: BlendOp::Add,
        write_mask: ColorWrites::ALL,
    };
}

impl Default for BlendState {
    fn default() -> Self {
        Self::OPAQUE
    }
}

/// Polygon fill mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FillMode {
    #[default]
    Solid,
    Wireframe,
}

/// Face culling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

/// Winding order of front-facing triangles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FrontFace {
    #[default]
    Clockwise,
    CounterClockwise,
}

/// Rasterizer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RasterizerState {
    pub fill_mode: FillMode,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub depth_bias: i32,
    pub depth_clip: bool,
}

/// Depth/stencil state. Stencil testing is not exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: CompareFunction,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_test: false,
            depth_write: false,
            depth_compare: CompareFunction::Less,
        }
    }
}

impl DepthStencilState {
    /// Depth test and write with `Less`.
    pub fn enabled() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            depth_compare: CompareFunction::Less,
        }
    }
}

/// Primitive topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

/// Descriptor for creating a pipeline state object.
///
/// A graphics pipeline needs a vertex shader and at least one render target
/// format. A compute pipeline sets only `compute_shader`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PipelineStateDescriptor {
    pub label: Option<String>,
    pub vertex_shader: Option<ShaderDescriptor>,
    pub pixel_shader: Option<ShaderDescriptor>,
    pub compute_shader: Option<ShaderDescriptor>,
    pub input_layout: Vec<InputElement>,
    pub bindings: Vec<BindingSlot>,
    pub blend: BlendState,
    pub rasterizer: RasterizerState,
    pub depth_stencil: DepthStencilState,
    pub topology: PrimitiveTopology,
    pub render_target_formats: Vec<TextureFormat>,
    pub depth_format: Option<TextureFormat>,
    pub sample_count: u32,
    pub sample_quality: u32,
}

impl PipelineStateDescriptor {
    /// Graphics pipeline from a vertex and pixel shader.
    pub fn graphics(vertex_shader: ShaderDescriptor, pixel_shader: ShaderDescriptor) -> Self {
        Self {
            vertex_shader: Some(vertex_shader),
            pixel_shader: Some(pixel_shader),
            sample_count: 1,
            ..Default::default()
        }
    }

    /// Compute pipeline.
    pub fn compute(compute_shader: ShaderDescriptor) -> Self {
        Self {
            compute_shader: Some(compute_shader),
            sample_count: 1,
            ..Default::default()
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the vertex input layout.
    pub fn with_input_layout(mut self, input_layout: Vec<InputElement>) -> Self {
        self.input_layout = input_layout;
        self
    }

    /// Set the binding layout.
    pub fn with_bindings(mut self, bindings: Vec<BindingSlot>) -> Self {
        self.bindings = bindings;
        self
    }

    /// Add a color render target format.
    pub fn with_render_target(mut self, format: TextureFormat) -> Self {
        self.render_target_formats.push(format);
        self
    }

    /// Set the depth format and enable depth testing.
    pub fn with_depth(mut self, format: TextureFormat) -> Self {
        self.depth_format = Some(format);
        self.depth_stencil = DepthStencilState::enabled();
        self
    }

    /// Set the blend state.
    pub fn with_blend(mut self, blend: BlendState) -> Self {
        self.blend = blend;
        self
    }

    /// Set the rasterizer state.
    pub fn with_rasterizer(mut self, rasterizer: RasterizerState) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    /// Set the primitive topology.
    pub fn with_topology(mut self, topology: PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    /// Whether this describes a compute pipeline.
    pub fn is_compute(&self) -> bool {
        self.compute_shader.is_some()
    }

    /// Index of the inline constants slot, if any.
    pub fn constants_slot(&self) -> Option<(usize, u32)> {
        self.bindings.iter().enumerate().find_map(|(i, slot)| match slot {
            BindingSlot::Constants { num_values } => Some((i, *num_values)),
            _ => None,
        })
    }

    /// Stride of each vertex buffer slot, derived from the input layout.
    ///
    /// Used as the initial stride; the actual stride comes from the bound
    /// buffer's descriptor at draw time.
    pub fn slot_strides(&self) -> Vec<(u32, u32, InputRate)> {
        let mut slots: Vec<(u32, u32, InputRate)> = Vec::new();
        for element in &self.input_layout {
            let end = element.offset + element.format.size();
            match slots.iter_mut().find(|(slot, _, _)| *slot == element.slot) {
                Some(entry) => entry.1 = entry.1.max(end),
                None => slots.push((element.slot, end, element.rate)),
            }
        }
        slots.sort_by_key(|(slot, _, _)| *slot);
        slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_strides_cover_all_elements() {
        let desc = PipelineStateDescriptor::default().with_input_layout(vec![
            InputElement::new("POSITION", VertexFormat::Float32x3, 0, 0),
            InputElement::new("COLOR", VertexFormat::Float32x4, 0, 12),
            InputElement::new("OFFSET", VertexFormat::Float32x2, 1, 0).per_instance(),
        ]);
        let strides = desc.slot_strides();
        assert_eq!(strides, vec![(0, 28, InputRate::PerVertex), (1, 8, InputRate::PerInstance)]);
    }

    #[test]
    fn test_constants_slot_lookup() {
        let desc = PipelineStateDescriptor::default().with_bindings(vec![
            BindingSlot::ConstantBuffer,
            BindingSlot::Constants { num_values: 16 },
        ]);
        assert_eq!(desc.constants_slot(), Some((1, 16)));
        assert!(!desc.is_compute());
    }
}
