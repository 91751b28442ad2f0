//! Shader descriptors.

/// Programmable pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Geometry,
    Hull,
    Domain,
    Compute,
}

impl ShaderStage {
    /// Short prefix used by HLSL target profiles (`vs`, `ps`, ...).
    pub fn profile_prefix(self) -> &'static str {
        match self {
            Self::Vertex => "vs",
            Self::Pixel => "ps",
            Self::Geometry => "gs",
            Self::Hull => "hs",
            Self::Domain => "ds",
            Self::Compute => "cs",
        }
    }
}

/// Descriptor for creating a shader.
///
/// `source` is WGSL text. `profile` is backend specific: an HLSL target such
/// as `ps_5_1` for Direct3D 12 or `spirv_1_3` for Vulkan. An empty profile
/// lets the backend derive a default from the stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderDescriptor {
    pub stage: ShaderStage,
    pub source: String,
    pub entry_point: String,
    pub profile: String,
}

impl ShaderDescriptor {
    /// Create a shader descriptor with a default profile.
    pub fn new(
        stage: ShaderStage,
        source: impl Into<String>,
        entry_point: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            source: source.into(),
            entry_point: entry_point.into(),
            profile: String::new(),
        }
    }

    /// Vertex shader.
    pub fn vertex(source: impl Into<String>, entry_point: impl Into<String>) -> Self {
        Self::new(ShaderStage::Vertex, source, entry_point)
    }

    /// Pixel (fragment) shader.
    pub fn pixel(source: impl Into<String>, entry_point: impl Into<String>) -> Self {
        Self::new(ShaderStage::Pixel, source, entry_point)
    }

    /// Compute shader.
    pub fn compute(source: impl Into<String>, entry_point: impl Into<String>) -> Self {
        Self::new(ShaderStage::Compute, source, entry_point)
    }

    /// Set an explicit target profile.
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }
}
