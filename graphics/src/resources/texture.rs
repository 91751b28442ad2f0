//! GPU texture resource.

use super::{DeviceId, StateCell, TrackedResource};
use crate::backend::GpuTexture;
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::{Extent3d, ResourceState, TextureDescriptor, TextureFormat};

/// A GPU texture resource.
///
/// Textures are created by
/// [`GraphicsDevice::create_texture`](crate::GraphicsDevice::create_texture) or owned by a swap
/// chain as back buffers.
///
/// # Example
///
/// ```ignore
/// let texture = device.create_texture(
///     &TextureDescriptor::render_target(1920, 1080, TextureFormat::Rgba8Unorm),
///     None,
/// )?;
/// println!("Texture size: {}x{}", texture.width(), texture.height());
/// ```
pub struct Texture {
    device_id: DeviceId,
    descriptor: TextureDescriptor,
    state: StateCell,
    raw: GpuTexture,
    _tracked: TrackedResource,
}

impl Texture {
    pub(crate) fn new(
        device_id: DeviceId,
        descriptor: TextureDescriptor,
        state: ResourceState,
        raw: GpuTexture,
        tracked: TrackedResource,
    ) -> Self {
        Self {
            device_id,
            descriptor,
            state: StateCell::new(state),
            raw,
            _tracked: tracked,
        }
    }

    /// Id of the device that created this texture.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Get the texture descriptor.
    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    /// Size of mip level zero.
    pub fn size(&self) -> Extent3d {
        self.descriptor.extent()
    }

    pub fn width(&self) -> u32 {
        self.descriptor.width
    }

    pub fn height(&self) -> u32 {
        self.descriptor.height
    }

    pub fn format(&self) -> TextureFormat {
        self.descriptor.format
    }

    /// Get the texture label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// State as of the last recorded transition.
    pub fn state(&self) -> ResourceState {
        self.state.get()
    }

    pub(crate) fn set_state(&self, state: ResourceState) {
        self.state.set(state);
    }

    pub(crate) fn state_cell(&self) -> &StateCell {
        &self.state
    }

    pub(crate) fn raw(&self) -> &GpuTexture {
        &self.raw
    }

    /// Map a staging texture for CPU access.
    ///
    /// Rows are `row_pitch` bytes apart, which may exceed the tight row size
    /// (Direct3D 12 aligns rows to 256 bytes).
    pub fn map(&mut self) -> GraphicsResult<TextureMapping<'_>> {
        let info = self.raw.mapping().ok_or_else(|| {
            GraphicsError::State(format!(
                "texture {:?} is not a staging texture",
                self.descriptor.label
            ))
            .logged("texture", "map")
        })?;
        Ok(TextureMapping {
            // SAFETY: the staging allocation spans `len` bytes and outlives
            // `self`; `&mut self` prevents aliasing mappings.
            bytes: unsafe { std::slice::from_raw_parts_mut(info.ptr.0.as_ptr(), info.len) },
            row_pitch: info.row_pitch as usize,
            row_size: (self.descriptor.width * self.descriptor.format.bytes_per_texel()) as usize,
            height: self.descriptor.height.max(1) as usize,
        })
    }
}

/// CPU view of a mapped staging texture.
pub struct TextureMapping<'a> {
    bytes: &'a mut [u8],
    row_pitch: usize,
    row_size: usize,
    height: usize,
}

impl TextureMapping<'_> {
    /// Distance in bytes between the starts of two rows.
    pub fn row_pitch(&self) -> usize {
        self.row_pitch
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Texels of row `y`, without padding.
    pub fn row(&self, y: usize) -> &[u8] {
        let start = y * self.row_pitch;
        &self.bytes[start..start + self.row_size]
    }

    /// Mutable texels of row `y`, without padding.
    pub fn row_mut(&mut self, y: usize) -> &mut [u8] {
        let start = y * self.row_pitch;
        &mut self.bytes[start..start + self.row_size]
    }

    /// Copy all rows into a tightly packed vector.
    pub fn to_vec(&self) -> Vec<u8> {
        (0..self.height).flat_map(|y| self.row(y).iter().copied()).collect()
    }

    /// End CPU access. Equivalent to dropping the mapping.
    pub fn unmap(self) {}
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("width", &self.descriptor.width)
            .field("height", &self.descriptor.height)
            .field("format", &self.descriptor.format)
            .field("usage", &self.descriptor.usage)
            .field("state", &self.state())
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Texture: Send, Sync);
