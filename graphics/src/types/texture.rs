//! Texture formats and descriptors.

use super::{BindFlags, CpuAccessFlags, Extent3d, ResourceUsage};

/// Texture format enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum TextureFormat {
    // 8-bit formats
    R8Unorm,
    R8Snorm,
    R8Uint,
    R8Sint,

    // 16-bit formats
    R16Unorm,
    R16Float,
    Rg8Unorm,

    // 32-bit formats
    R32Float,
    R32Uint,
    Rg16Float,
    #[default]
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgb10a2Unorm,

    // 64-bit formats
    Rgba16Float,
    Rg32Float,

    // 128-bit formats
    Rgba32Float,

    // Depth/stencil formats
    Depth16Unorm,
    Depth24UnormStencil8,
    Depth32Float,
    Depth32FloatStencil8,
}

impl TextureFormat {
    /// Returns true if this is a depth or stencil format.
    pub fn is_depth_stencil(self) -> bool {
        matches!(
            self,
            Self::Depth16Unorm
                | Self::Depth24UnormStencil8
                | Self::Depth32Float
                | Self::Depth32FloatStencil8
        )
    }

    /// Returns true if this format has a stencil component.
    pub fn has_stencil(self) -> bool {
        matches!(self, Self::Depth24UnormStencil8 | Self::Depth32FloatStencil8)
    }

    /// Returns true for sRGB-encoded color formats.
    pub fn is_srgb(self) -> bool {
        matches!(self, Self::Rgba8UnormSrgb | Self::Bgra8UnormSrgb)
    }

    /// Size of one texel in bytes.
    pub fn bytes_per_texel(self) -> u32 {
        match self {
            Self::R8Unorm | Self::R8Snorm | Self::R8Uint | Self::R8Sint => 1,
            Self::R16Unorm | Self::R16Float | Self::Rg8Unorm | Self::Depth16Unorm => 2,
            Self::R32Float
            | Self::R32Uint
            | Self::Rg16Float
            | Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb
            | Self::Rgb10a2Unorm
            | Self::Depth24UnormStencil8
            | Self::Depth32Float => 4,
            Self::Rgba16Float | Self::Rg32Float | Self::Depth32FloatStencil8 => 8,
            Self::Rgba32Float => 16,
        }
    }
}

/// Dimensionality of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureDimension {
    D1,
    #[default]
    D2,
    D3,
    /// Six 2D faces per array element.
    Cube,
}

/// Descriptor for creating a texture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    /// Debug label for the texture.
    pub label: Option<String>,
    pub dimension: TextureDimension,
    pub format: TextureFormat,
    /// Width in texels. Must be greater than zero.
    pub width: u32,
    pub height: u32,
    /// Depth for 3D textures, 1 otherwise.
    pub depth: u32,
    /// Number of mip levels, at least 1.
    pub mip_levels: u32,
    /// Array elements. Cube textures have `array_size * 6` layers.
    pub array_size: u32,
    pub usage: ResourceUsage,
    pub bind_flags: BindFlags,
    pub cpu_access: CpuAccessFlags,
    /// MSAA sample count.
    pub sample_count: u32,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            dimension: TextureDimension::D2,
            format: TextureFormat::Rgba8Unorm,
            width: 1,
            height: 1,
            depth: 1,
            mip_levels: 1,
            array_size: 1,
            usage: ResourceUsage::Default,
            bind_flags: BindFlags::SHADER_RESOURCE,
            cpu_access: CpuAccessFlags::empty(),
            sample_count: 1,
        }
    }
}

impl TextureDescriptor {
    /// Create a 2D texture descriptor.
    pub fn new_2d(width: u32, height: u32, format: TextureFormat, bind_flags: BindFlags) -> Self {
        Self {
            width,
            height,
            format,
            bind_flags,
            ..Default::default()
        }
    }

    /// A sampleable color render target.
    pub fn render_target(width: u32, height: u32, format: TextureFormat) -> Self {
        Self::new_2d(
            width,
            height,
            format,
            BindFlags::RENDER_TARGET | BindFlags::SHADER_RESOURCE,
        )
    }

    /// A depth/stencil buffer.
    pub fn depth_stencil(width: u32, height: u32, format: TextureFormat) -> Self {
        Self::new_2d(width, height, format, BindFlags::DEPTH_STENCIL)
    }

    /// A CPU-readable staging texture for read-back.
    pub fn staging_2d(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            usage: ResourceUsage::Staging,
            cpu_access: CpuAccessFlags::READ | CpuAccessFlags::WRITE,
            ..Self::new_2d(width, height, format, BindFlags::empty())
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the number of mip levels.
    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    /// Set the array size.
    pub fn with_array_size(mut self, array_size: u32) -> Self {
        self.array_size = array_size;
        self
    }

    /// Set the dimensionality.
    pub fn with_dimension(mut self, dimension: TextureDimension) -> Self {
        self.dimension = dimension;
        self
    }

    /// Set the usage class.
    pub fn with_usage(mut self, usage: ResourceUsage) -> Self {
        self.usage = usage;
        self
    }

    /// Size of mip level zero.
    pub fn extent(&self) -> Extent3d {
        Extent3d::new_3d(self.width, self.height.max(1), self.depth.max(1))
    }

    /// Number of array layers as seen by the native API.
    pub fn layer_count(&self) -> u32 {
        match self.dimension {
            TextureDimension::Cube => self.array_size * 6,
            TextureDimension::D3 => 1,
            _ => self.array_size,
        }
    }

    /// Tightly packed byte size of one mip level of one layer.
    pub fn mip_size_in_bytes(&self, level: u32) -> u64 {
        let extent = self.extent().mip_level(level);
        extent.width as u64
            * extent.height as u64
            * extent.depth as u64
            * self.format.bytes_per_texel() as u64
    }

    /// Tightly packed byte size of every subresource, ordered layer-major.
    pub fn size_in_bytes(&self) -> u64 {
        let per_layer: u64 = (0..self.mip_levels).map(|m| self.mip_size_in_bytes(m)).sum();
        per_layer * self.layer_count() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_formats() {
        assert!(TextureFormat::Depth32Float.is_depth_stencil());
        assert!(!TextureFormat::Depth32Float.has_stencil());
        assert!(TextureFormat::Depth24UnormStencil8.has_stencil());
        assert!(!TextureFormat::Rgba8Unorm.is_depth_stencil());
    }

    #[test]
    fn test_cube_layer_count() {
        let desc =
            TextureDescriptor::new_2d(64, 64, TextureFormat::Rgba8Unorm, BindFlags::SHADER_RESOURCE)
                .with_dimension(TextureDimension::Cube)
                .with_array_size(2);
        assert_eq!(desc.layer_count(), 12);
    }

    #[test]
    fn test_size_in_bytes_with_mips() {
        let desc =
            TextureDescriptor::new_2d(4, 4, TextureFormat::Rgba8Unorm, BindFlags::SHADER_RESOURCE)
                .with_mip_levels(3);
        // 4x4 + 2x2 + 1x1 texels at 4 bytes each
        assert_eq!(desc.size_in_bytes(), (16 + 4 + 1) * 4);
    }
}
