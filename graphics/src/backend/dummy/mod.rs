//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't talk to GPU hardware. Resources live in host memory,
//! copies and clears are executed on the CPU at submit time and submissions
//! complete synchronously. Draws and dispatches are validated and counted but
//! do not rasterize. Descriptor heap capacities are enforced exactly like the
//! Direct3D 12 backend so exhaustion can be tested anywhere.

mod command;
mod memory;
mod texel;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

pub use command::DummyCommandList;
pub(crate) use memory::HostMemory;

use super::descriptor_heap::{DescriptorHeapKind, DescriptorHeaps};
use super::{MappedPtr, TextureMappingInfo};
use crate::command_list::CommandList;
use crate::compiler;
use crate::error::{GraphicsError, GraphicsResult};
use crate::resources::Texture;
use crate::types::{
    AdapterInfo, AdapterType, BindFlags, BindingSlot, BufferDescriptor, DeviceCreationParams,
    PipelineStateDescriptor, ResourceState, ResourceUsage, ShaderDescriptor,
    SwapChainDescriptor, TextureDescriptor,
};

/// Largest back buffer width or height, the Direct3D 12 limit for 2D
/// textures.
const MAX_SWAP_CHAIN_DIMENSION: u32 = 16384;

fn check_swap_chain_size(width: u32, height: u32) -> GraphicsResult<()> {
    if width == 0 || height == 0 {
        return Err(GraphicsError::ResourceCreation(format!(
            "swap chain size {width}x{height} is empty"
        )));
    }
    if width > MAX_SWAP_CHAIN_DIMENSION || height > MAX_SWAP_CHAIN_DIMENSION {
        return Err(GraphicsError::ResourceCreation(format!(
            "swap chain size {width}x{height} exceeds {MAX_SWAP_CHAIN_DIMENSION}"
        )));
    }
    Ok(())
}

/// Counters of the work executed by the reference backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DummyStatistics {
    pub barriers: u64,
    pub copies: u64,
    pub clears: u64,
    pub draws: u64,
    pub dispatches: u64,
}

#[derive(Default)]
struct Counters {
    barriers: AtomicU64,
    copies: AtomicU64,
    clears: AtomicU64,
    draws: AtomicU64,
    dispatches: AtomicU64,
}

/// Dummy GPU backend.
pub struct DummyBackend {
    adapter: AdapterInfo,
    heaps: Mutex<DescriptorHeaps>,
    submissions: AtomicU64,
    counters: Counters,
}

impl std::fmt::Debug for DummyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyBackend")
            .field("adapter", &self.adapter.name)
            .field("submissions", &self.submission_count())
            .finish()
    }
}

impl DummyBackend {
    /// Create a new dummy backend.
    pub fn new(params: &DeviceCreationParams) -> Arc<Self> {
        let adapter = AdapterInfo {
            name: "Keystone Reference Device".to_string(),
            vendor_id: 0,
            device_id: 0,
            adapter_type: AdapterType::Software,
            dedicated_memory: 0,
        };
        log::info!("DummyBackend: initialized on '{}'", adapter.name);
        Arc::new(Self {
            adapter,
            heaps: Mutex::new(DescriptorHeaps::new(&params.descriptor_heaps)),
            submissions: AtomicU64::new(0),
            counters: Counters::default(),
        })
    }

    pub fn adapter_info(&self) -> &AdapterInfo {
        &self.adapter
    }

    /// Work executed so far.
    pub fn statistics(&self) -> DummyStatistics {
        DummyStatistics {
            barriers: self.counters.barriers.load(Ordering::Relaxed),
            copies: self.counters.copies.load(Ordering::Relaxed),
            clears: self.counters.clears.load(Ordering::Relaxed),
            draws: self.counters.draws.load(Ordering::Relaxed),
            dispatches: self.counters.dispatches.load(Ordering::Relaxed),
        }
    }

    /// Descriptor slots of `kind` currently in use.
    pub fn descriptors_in_use(&self, kind: DescriptorHeapKind) -> u32 {
        self.heaps.lock().get(kind).in_use()
    }

    pub fn submission_count(&self) -> u64 {
        self.submissions.load(Ordering::Acquire)
    }

    fn allocate_descriptors(
        self: &Arc<Self>,
        kinds: impl IntoIterator<Item = DescriptorHeapKind>,
    ) -> GraphicsResult<DescriptorSlots> {
        let mut slots = DescriptorSlots {
            backend: Arc::clone(self),
            slots: Vec::new(),
        };
        let mut heaps = self.heaps.lock();
        for kind in kinds {
            // Slots taken so far are returned by `DescriptorSlots::drop` on error.
            let index = heaps.get_mut(kind).allocate()?;
            slots.slots.push((kind, index));
        }
        drop(heaps);
        Ok(slots)
    }

    /// Create a buffer resource.
    pub fn create_buffer(
        self: &Arc<Self>,
        descriptor: &BufferDescriptor,
        data: Option<&[u8]>,
    ) -> GraphicsResult<DummyBuffer> {
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            descriptor.label,
            descriptor.size
        );
        let kinds = descriptor
            .bind_flags
            .intersects(
                BindFlags::CONSTANT_BUFFER
                    | BindFlags::SHADER_RESOURCE
                    | BindFlags::UNORDERED_ACCESS,
            )
            .then_some(DescriptorHeapKind::ShaderResource);
        let descriptors = self.allocate_descriptors(kinds)?;

        let buffer = DummyBuffer {
            memory: Arc::new(HostMemory::zeroed(descriptor.size as usize)),
            host_visible: descriptor.usage.is_host_visible(),
            _descriptors: descriptors,
            backend: Arc::clone(self),
        };
        if let Some(data) = data {
            buffer.memory.write(0, data);
            if !buffer.host_visible {
                // Device-local initial data goes through an upload submission.
                self.submissions.fetch_add(1, Ordering::AcqRel);
            }
        }
        Ok(buffer)
    }

    /// Create a texture resource.
    pub fn create_texture(
        self: &Arc<Self>,
        descriptor: &TextureDescriptor,
        data: Option<&[u8]>,
    ) -> GraphicsResult<DummyTexture> {
        log::trace!(
            "DummyBackend: creating texture {:?} ({}x{}x{}, {:?})",
            descriptor.label,
            descriptor.width,
            descriptor.height,
            descriptor.depth,
            descriptor.format
        );
        let memory = Arc::new(HostMemory::zeroed(descriptor.size_in_bytes() as usize));
        if let Some(data) = data {
            memory.write(0, data);
            if descriptor.usage != ResourceUsage::Staging {
                self.submissions.fetch_add(1, Ordering::AcqRel);
            }
        }
        DummyTexture::new(self, memory, descriptor.clone())
    }

    /// Validate a shader by running it through the shared front-end.
    pub fn create_shader(
        self: &Arc<Self>,
        descriptor: &ShaderDescriptor,
    ) -> GraphicsResult<DummyShader> {
        let module = compiler::compile(descriptor)?;
        log::trace!(
            "DummyBackend: compiled {:?} shader '{}'",
            module.stage(),
            module.entry_point()
        );
        Ok(DummyShader)
    }

    /// Create a pipeline state object.
    pub fn create_pipeline(
        self: &Arc<Self>,
        descriptor: &PipelineStateDescriptor,
    ) -> GraphicsResult<DummyPipeline> {
        let shaders = [
            &descriptor.vertex_shader,
            &descriptor.pixel_shader,
            &descriptor.compute_shader,
        ];
        for shader in shaders.into_iter().flatten() {
            self.create_shader(shader)?;
        }

        let samplers = descriptor
            .bindings
            .iter()
            .filter(|slot| matches!(slot, BindingSlot::Sampler(_)))
            .map(|_| DescriptorHeapKind::Sampler);
        let descriptors = self.allocate_descriptors(samplers)?;
        log::trace!("DummyBackend: creating pipeline {:?}", descriptor.label);

        Ok(DummyPipeline {
            is_compute: descriptor.is_compute(),
            _descriptors: descriptors,
        })
    }

    /// Create an empty command list.
    pub fn create_command_list(self: &Arc<Self>) -> GraphicsResult<DummyCommandList> {
        Ok(DummyCommandList::new())
    }

    /// Create a fence.
    pub fn create_fence(self: &Arc<Self>, initial_value: u64) -> GraphicsResult<DummyFence> {
        Ok(DummyFence {
            value: AtomicU64::new(initial_value),
        })
    }

    /// Create an offscreen swap chain. A window, if given, is not presented to.
    pub fn create_swap_chain(
        self: &Arc<Self>,
        descriptor: &SwapChainDescriptor,
    ) -> GraphicsResult<DummySwapChain> {
        check_swap_chain_size(descriptor.width, descriptor.height)?;
        let count = descriptor.clamped_buffer_count();
        let back_buffer = TextureDescriptor::new_2d(
            descriptor.width,
            descriptor.height,
            descriptor.format,
            BindFlags::RENDER_TARGET,
        )
        .with_label("back buffer");
        let memories = (0..count)
            .map(|_| Arc::new(HostMemory::zeroed(back_buffer.size_in_bytes() as usize)))
            .collect();
        log::info!(
            "DummyBackend: created {}x{} swap chain with {} buffers",
            descriptor.width,
            descriptor.height,
            count
        );
        Ok(DummySwapChain {
            backend: Arc::clone(self),
            back_buffer,
            memories,
            current: 0,
            fullscreen: descriptor.fullscreen,
        })
    }

    /// Replay the recorded commands of every list, in order, as one submission.
    pub fn execute(&self, lists: &[&CommandList]) -> GraphicsResult<()> {
        let raws = lists
            .iter()
            .map(|list| list.raw().as_dummy())
            .collect::<GraphicsResult<Vec<_>>>()?;
        for raw in raws {
            raw.replay(&self.counters);
        }
        self.submissions.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Submissions complete synchronously, so the queue is always idle.
    pub fn wait_idle(&self) -> GraphicsResult<()> {
        Ok(())
    }
}

/// Descriptor slots owned by a resource, returned to the heaps on drop.
struct DescriptorSlots {
    backend: Arc<DummyBackend>,
    slots: Vec<(DescriptorHeapKind, u32)>,
}

impl Drop for DescriptorSlots {
    fn drop(&mut self) {
        if self.slots.is_empty() {
            return;
        }
        let mut heaps = self.backend.heaps.lock();
        for (kind, index) in self.slots.drain(..) {
            heaps.get_mut(kind).free(index);
        }
    }
}

/// Host-memory buffer.
pub struct DummyBuffer {
    pub(crate) memory: Arc<HostMemory>,
    host_visible: bool,
    _descriptors: DescriptorSlots,
    backend: Arc<DummyBackend>,
}

impl DummyBuffer {
    pub fn mapped_ptr(&self) -> Option<MappedPtr> {
        self.host_visible.then(|| self.memory.mapped_ptr())
    }

    pub fn update(&self, offset: u64, data: &[u8], _state: ResourceState) -> GraphicsResult<()> {
        self.memory.write(offset as usize, data);
        if !self.host_visible {
            self.backend.submissions.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }
}

/// Host-memory texture, tightly packed layer-major then mip.
pub struct DummyTexture {
    pub(crate) memory: Arc<HostMemory>,
    pub(crate) descriptor: TextureDescriptor,
    _descriptors: DescriptorSlots,
}

impl DummyTexture {
    fn new(
        backend: &Arc<DummyBackend>,
        memory: Arc<HostMemory>,
        descriptor: TextureDescriptor,
    ) -> GraphicsResult<Self> {
        let flags = descriptor.bind_flags;
        let kinds = [
            (BindFlags::RENDER_TARGET, DescriptorHeapKind::RenderTarget),
            (BindFlags::DEPTH_STENCIL, DescriptorHeapKind::DepthStencil),
            (BindFlags::SHADER_RESOURCE, DescriptorHeapKind::ShaderResource),
            (BindFlags::UNORDERED_ACCESS, DescriptorHeapKind::ShaderResource),
        ]
        .into_iter()
        .filter(|(flag, _)| flags.contains(*flag))
        .map(|(_, kind)| kind);
        let descriptors = backend.allocate_descriptors(kinds)?;
        Ok(Self {
            memory,
            descriptor,
            _descriptors: descriptors,
        })
    }

    pub fn mapping(&self) -> Option<TextureMappingInfo> {
        (self.descriptor.usage == ResourceUsage::Staging).then(|| TextureMappingInfo {
            ptr: self.memory.mapped_ptr(),
            len: self.memory.len(),
            row_pitch: self.descriptor.width * self.descriptor.format.bytes_per_texel(),
        })
    }
}

/// A validated shader. The reference backend keeps no shader code.
pub struct DummyShader;

/// A validated pipeline state.
pub struct DummyPipeline {
    pub(crate) is_compute: bool,
    _descriptors: DescriptorSlots,
}

/// Fence backed by an atomic counter.
pub struct DummyFence {
    value: AtomicU64,
}

impl DummyFence {
    /// Submissions complete synchronously, so the signal lands immediately.
    pub fn signal(&self, value: u64) -> GraphicsResult<()> {
        self.value.fetch_max(value, Ordering::AcqRel);
        Ok(())
    }

    pub fn wait(&self, value: u64) -> GraphicsResult<()> {
        while self.value.load(Ordering::Acquire) < value {
            std::thread::yield_now();
        }
        Ok(())
    }

    pub fn completed_value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }
}

/// Offscreen swap chain cycling through host-memory back buffers.
pub struct DummySwapChain {
    backend: Arc<DummyBackend>,
    back_buffer: TextureDescriptor,
    memories: Vec<Arc<HostMemory>>,
    current: u32,
    fullscreen: bool,
}

impl DummySwapChain {
    pub fn back_buffers(&self) -> GraphicsResult<Vec<DummyTexture>> {
        self.memories
            .iter()
            .map(|memory| {
                DummyTexture::new(&self.backend, Arc::clone(memory), self.back_buffer.clone())
            })
            .collect()
    }

    pub fn extent(&self) -> (u32, u32) {
        (self.back_buffer.width, self.back_buffer.height)
    }

    pub fn current_index(&self) -> u32 {
        self.current
    }

    pub fn present(&mut self, back_buffer: &Texture, _state: ResourceState) -> GraphicsResult<()> {
        let presented = back_buffer.raw().as_dummy()?;
        let current = &self.memories[self.current as usize];
        if !Arc::ptr_eq(&presented.memory, current) {
            return Err(GraphicsError::State(format!(
                "presented texture is not back buffer {}",
                self.current
            )));
        }
        self.current = (self.current + 1) % self.memories.len() as u32;
        Ok(())
    }

    /// Reallocate the back buffers. On failure the old ones stay in use.
    pub fn resize(&mut self, width: u32, height: u32) -> GraphicsResult<()> {
        check_swap_chain_size(width, height)?;
        self.back_buffer.width = width;
        self.back_buffer.height = height;
        let size = self.back_buffer.size_in_bytes() as usize;
        for memory in &mut self.memories {
            *memory = Arc::new(HostMemory::zeroed(size));
        }
        self.current = 0;
        Ok(())
    }

    pub fn wait_idle(&self) -> GraphicsResult<()> {
        self.backend.wait_idle()
    }

    pub fn set_fullscreen(&mut self, fullscreen: bool) -> GraphicsResult<()> {
        log::info!("DummyBackend: fullscreen {} (no display)", fullscreen);
        self.fullscreen = fullscreen;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DescriptorHeapCapacities, GraphicsApi, TextureFormat};

    fn backend_with(capacities: DescriptorHeapCapacities) -> Arc<DummyBackend> {
        DummyBackend::new(
            &DeviceCreationParams::new(GraphicsApi::Dummy).with_descriptor_heaps(capacities),
        )
    }

    #[test]
    fn test_render_target_heap_exhaustion() {
        let backend = backend_with(DescriptorHeapCapacities {
            render_target: 2,
            ..Default::default()
        });
        let desc = TextureDescriptor::render_target(4, 4, TextureFormat::Rgba8Unorm);
        let a = backend.create_texture(&desc, None).unwrap();
        let _b = backend.create_texture(&desc, None).unwrap();
        assert!(matches!(
            backend.create_texture(&desc, None),
            Err(GraphicsError::ResourceCreation(_))
        ));
        drop(a);
        assert!(backend.create_texture(&desc, None).is_ok());
    }

    #[test]
    fn test_failed_creation_releases_partial_slots() {
        let backend = backend_with(DescriptorHeapCapacities {
            render_target: 4,
            shader_resource: 0,
            ..Default::default()
        });
        // Render target + shader resource: the second allocation fails.
        let desc = TextureDescriptor::render_target(4, 4, TextureFormat::Rgba8Unorm);
        assert!(backend.create_texture(&desc, None).is_err());
        assert_eq!(backend.descriptors_in_use(DescriptorHeapKind::RenderTarget), 0);
    }

    #[test]
    fn test_oversized_swap_chain_resize_keeps_old_buffers() {
        let backend = backend_with(DescriptorHeapCapacities::default());
        let mut descriptor = DeviceCreationParams::new(GraphicsApi::Dummy)
            .with_size(16, 8)
            .swap_chain_descriptor();
        descriptor.buffer_count = 2;
        let mut swap_chain = backend.create_swap_chain(&descriptor).unwrap();

        assert!(matches!(
            swap_chain.resize(MAX_SWAP_CHAIN_DIMENSION + 1, 8),
            Err(GraphicsError::ResourceCreation(_))
        ));
        assert_eq!(swap_chain.extent(), (16, 8));
        assert_eq!(swap_chain.back_buffers().unwrap().len(), 2);

        swap_chain.resize(32, 4).unwrap();
        assert_eq!(swap_chain.extent(), (32, 4));
    }

    #[test]
    fn test_fence_signal_is_monotonic() {
        let backend = backend_with(DescriptorHeapCapacities::default());
        let fence = backend.create_fence(3).unwrap();
        fence.signal(5).unwrap();
        fence.signal(4).unwrap();
        assert_eq!(fence.completed_value(), 5);
        fence.wait(5).unwrap();
    }

    #[test]
    fn test_staging_texture_mapping_is_tight() {
        let backend = backend_with(DescriptorHeapCapacities::default());
        let desc = TextureDescriptor::staging_2d(3, 2, TextureFormat::Rgba8Unorm);
        let texture = backend.create_texture(&desc, None).unwrap();
        let mapping = texture.mapping().unwrap();
        assert_eq!(mapping.row_pitch, 12);
        assert_eq!(mapping.len, 24);
    }
}
