//! Common utilities for GPU integration tests.
//!
//! Every test takes a [`Backend`] case; [`TestContext::new`] returns `None`
//! when that backend is not compiled in or has no usable adapter, and the
//! test returns early.

#![allow(dead_code)]

use keystone_graphics::backend::GpuBackend;
use keystone_graphics::backend::dummy::DummyStatistics;
use keystone_graphics::{
    Buffer, BufferDescriptor, CommandList, DescriptorHeapCapacities, DeviceCreationParams,
    GraphicsApi, GraphicsDevice, GraphicsResult, ResourceUsage, Texture, TextureDescriptor,
    TextureFormat, available_apis, create_device,
};

/// Position and color per vertex; `@location(0)` and `@location(1)`.
pub const TRIANGLE_SHADER: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) color: vec4<f32>,
}

@vertex
fn vs_main(@location(0) position: vec3<f32>, @location(1) color: vec4<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.position = vec4<f32>(position, 1.0);
    out.color = color;
    return out;
}

@fragment
fn ps_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return in.color;
}
"#;

/// Three green vertices covering the center of the viewport.
pub fn triangle_vertices() -> Vec<f32> {
    #[rustfmt::skip]
    let vertices = vec![
        0.0, 0.8, 0.0,    0.0, 1.0, 0.0, 1.0,
        0.8, -0.8, 0.0,   0.0, 1.0, 0.0, 1.0,
        -0.8, -0.8, 0.0,  0.0, 1.0, 0.0, 1.0,
    ];
    vertices
}

/// Byte stride of [`triangle_vertices`].
pub const TRIANGLE_STRIDE: u32 = 7 * 4;

// ============================================================================
// Backend Enumeration
// ============================================================================

/// GPU backends under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// CPU reference backend.
    Dummy,
    /// Vulkan through ash.
    Vulkan,
    /// Direct3D 12 through the `windows` crate.
    D3D12,
}

impl Backend {
    pub fn api(self) -> GraphicsApi {
        match self {
            Backend::Dummy => GraphicsApi::Dummy,
            Backend::Vulkan => GraphicsApi::Vulkan,
            Backend::D3D12 => GraphicsApi::D3D12,
        }
    }

    /// Whether this backend is compiled in and usable on this platform.
    pub fn is_available(self) -> bool {
        available_apis().contains(&self.api())
    }

    /// Whether draws actually rasterize.
    pub fn rasterizes(self) -> bool {
        self != Backend::Dummy
    }
}

// ============================================================================
// Test Context
// ============================================================================

/// A headless device for one backend plus read-back helpers.
pub struct TestContext {
    pub backend: Backend,
    pub device: GraphicsDevice,
}

impl TestContext {
    /// Create a device for `backend`, or `None` if it cannot run here.
    pub fn new(backend: Backend) -> Option<Self> {
        Self::with_params(backend, DeviceCreationParams::new(backend.api()).with_debug_layer(false))
    }

    /// Create a device with custom descriptor heap capacities.
    pub fn with_descriptor_heaps(
        backend: Backend,
        capacities: DescriptorHeapCapacities,
    ) -> Option<Self> {
        Self::with_params(
            backend,
            DeviceCreationParams::new(backend.api())
                .with_debug_layer(false)
                .with_descriptor_heaps(capacities),
        )
    }

    pub fn with_params(backend: Backend, params: DeviceCreationParams) -> Option<Self> {
        let _ = env_logger::builder().is_test(true).try_init();
        if !backend.is_available() {
            return None;
        }
        match create_device(&params) {
            Ok(device) => Some(Self { backend, device }),
            Err(e) => {
                log::warn!("skipping {backend:?}: {e}");
                None
            }
        }
    }

    /// Work counters of the reference backend.
    pub fn dummy_statistics(&self) -> Option<DummyStatistics> {
        match self.device.backend() {
            GpuBackend::Dummy(backend) => Some(backend.statistics()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Reset a new command list, let `record` fill it, close, submit and
    /// wait for the queue to drain.
    pub fn run(
        &self,
        record: impl FnOnce(&mut CommandList) -> GraphicsResult<()>,
    ) -> GraphicsResult<()> {
        let mut list = self.device.create_command_list()?;
        list.reset()?;
        record(&mut list)?;
        list.close()?;
        self.device.execute_command_lists(&[&list])?;
        self.device.wait_for_idle()
    }

    pub fn staging_buffer(&self, size: u64) -> Buffer {
        self.device
            .create_buffer(&BufferDescriptor::staging(size).with_label("read-back"), None)
            .expect("Failed to create staging buffer")
    }

    /// Copy `buffer` into a staging buffer and return its contents.
    pub fn read_buffer(&self, buffer: &Buffer) -> Vec<u8> {
        let mut staging = self.staging_buffer(buffer.size());
        self.run(|list| list.copy_buffer(buffer, 0, &staging, 0, buffer.size()))
            .expect("Failed to copy buffer");
        let mapping = staging.map().expect("Failed to map staging buffer");
        mapping.to_vec()
    }

    /// A render target that can also be copied from.
    pub fn render_target(&self, width: u32, height: u32, format: TextureFormat) -> Texture {
        self.device
            .create_texture(&TextureDescriptor::render_target(width, height, format), None)
            .expect("Failed to create render target")
    }

    /// Copy `texture` into a staging texture and return its tightly packed
    /// texels.
    pub fn read_texture(&self, texture: &Texture) -> Vec<u8> {
        let mut staging = self
            .device
            .create_texture(
                &TextureDescriptor::staging_2d(texture.width(), texture.height(), texture.format())
                    .with_label("read-back"),
                None,
            )
            .expect("Failed to create staging texture");
        self.run(|list| list.copy_texture(texture, &staging))
            .expect("Failed to copy texture");
        let mapping = staging.map().expect("Failed to map staging texture");
        mapping.to_vec()
    }

    /// A device-local vertex buffer holding `vertices`.
    pub fn vertex_buffer(&self, vertices: &[f32], stride: u32) -> Buffer {
        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        self.device
            .create_buffer(
                &BufferDescriptor::vertex(bytes.len() as u64, stride, ResourceUsage::Immutable),
                Some(bytes),
            )
            .expect("Failed to create vertex buffer")
    }
}

/// Texel at (`x`, `y`) of tightly packed RGBA8 data.
pub fn rgba8_at(data: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
    let offset = ((y * width + x) * 4) as usize;
    [data[offset], data[offset + 1], data[offset + 2], data[offset + 3]]
}
