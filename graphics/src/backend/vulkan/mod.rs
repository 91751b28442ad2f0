//! Native Vulkan backend implementation using ash.
//!
//! Requires Vulkan 1.3: dynamic rendering replaces render passes,
//! synchronization2 carries the barriers and one timeline semaphore orders
//! every queue submission.
//!
//! Each submission signals the backend timeline with a new serial. Command
//! lists remember the serial of their last submission, and dropped native
//! objects wait in the [`DeferredDestructor`] until the timeline has passed
//! the last serial submitted before the drop.

mod barriers;
mod command;
mod conversion;
mod debug;
mod deferred;
mod device;
mod instance;
mod layout;
mod memory;
mod pipeline;
mod resources;
mod swapchain;

use std::ffi::CStr;
use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ash::vk;
use gpu_allocator::vulkan::Allocator;
use parking_lot::Mutex;

pub use command::VulkanCommandList;
pub use pipeline::VulkanPipeline;
pub use resources::{VulkanBuffer, VulkanShader, VulkanTexture};
pub use swapchain::VulkanSwapChain;

use self::deferred::{DeferredDestructor, DeferredResource};
use self::memory::{MemoryBlock, MemoryLocation};
use crate::command_list::CommandList;
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::{
    AdapterInfo, BufferDescriptor, DeviceCreationParams, PipelineStateDescriptor,
    ShaderDescriptor, SwapChainDescriptor, TextureDescriptor, TextureFormat,
};

/// Map a failed Vulkan call to a [`GraphicsError`]. A lost device is always
/// reported as [`GraphicsError::DeviceLost`].
pub(super) fn vk_error(context: &str, result: vk::Result) -> GraphicsError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
        other => GraphicsError::ResourceCreation(format!("{context}: {other}")),
    }
}

fn init_error(context: &str) -> impl Fn(vk::Result) -> GraphicsError + '_ {
    move |e| GraphicsError::Initialization(format!("{context}: {e}"))
}

fn device_supports_extension(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    name: &CStr,
) -> bool {
    let Ok(extensions) =
        (unsafe { instance.enumerate_device_extension_properties(physical_device) })
    else {
        return false;
    };
    extensions
        .iter()
        .any(|ext| ext.extension_name_as_c_str().is_ok_and(|ext_name| ext_name == name))
}

fn create_timeline_semaphore(
    device: &ash::Device,
    initial_value: u64,
) -> Result<vk::Semaphore, vk::Result> {
    let mut type_info = vk::SemaphoreTypeCreateInfo::default()
        .semaphore_type(vk::SemaphoreType::TIMELINE)
        .initial_value(initial_value);
    let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
    unsafe { device.create_semaphore(&create_info, None) }
}

/// Vulkan device-level state shared by every object created from it.
///
/// Native objects hold an `Arc` to their backend, so the device outlives
/// everything created on it.
pub struct VulkanBackend {
    // Declared first, dropped last: the loaded library must outlive the
    // instance, which `Drop` destroys explicitly.
    entry: ash::Entry,
    instance: ash::Instance,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    surface_loader: Option<ash::khr::surface::Instance>,
    physical_device: vk::PhysicalDevice,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    device: ash::Device,
    /// Dropped explicitly, after the deferred queue and before the device.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    swapchain_loader: Option<ash::khr::swapchain::Device>,
    queue_family: u32,
    queue: Mutex<vk::Queue>,
    /// Signaled with the serial of every submission.
    timeline: vk::Semaphore,
    last_submitted: AtomicU64,
    submissions: AtomicU64,
    /// Binary semaphores (swap chain acquisitions) the next frame submission
    /// must wait on.
    pending_waits: Mutex<Vec<vk::Semaphore>>,
    deferred: DeferredDestructor,
    adapter: AdapterInfo,
    /// Whether D24S8 can be a depth attachment; D32S8 is used instead otherwise.
    depth24_stencil8: bool,
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("adapter", &self.adapter.name)
            .field("last_submitted", &self.last_submitted.load(Ordering::Relaxed))
            .field("pending_destructions", &self.deferred.pending_count())
            .finish()
    }
}

impl VulkanBackend {
    /// Load Vulkan, pick an adapter and create the device and its queue.
    pub fn new(params: &DeviceCreationParams) -> GraphicsResult<Arc<Self>> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            GraphicsError::Initialization(format!("failed to load the Vulkan library: {e}"))
        })?;

        let bundle = instance::create_instance(&entry, params.debug_layer, params.gpu_validation)?;
        let instance = bundle.instance;
        let destroy_instance = |instance: &ash::Instance| unsafe {
            if let (Some(debug_utils), Some(messenger)) =
                (&bundle.debug_utils, bundle.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            instance.destroy_instance(None);
        };

        let selected = device::select_physical_device(&instance, params.adapter_index);
        let (adapter, choice) = match selected {
            Ok(selected) => selected,
            Err(e) => {
                destroy_instance(&instance);
                return Err(e);
            }
        };

        let swapchain_supported = bundle.surface_supported
            && device_supports_extension(
                &instance,
                choice.physical_device,
                ash::khr::swapchain::NAME,
            );
        let device = match device::create_logical_device(&instance, choice, swapchain_supported) {
            Ok(device) => device,
            Err(e) => {
                destroy_instance(&instance);
                return Err(e);
            }
        };

        let allocator = match memory::create_allocator(&instance, choice.physical_device, &device) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                destroy_instance(&instance);
                return Err(e);
            }
        };

        let timeline = match create_timeline_semaphore(&device, 0) {
            Ok(semaphore) => semaphore,
            Err(e) => {
                drop(allocator);
                unsafe { device.destroy_device(None) };
                destroy_instance(&instance);
                return Err(init_error("timeline semaphore")(e));
            }
        };

        let queue = unsafe { device.get_device_queue(choice.queue_family, 0) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(choice.physical_device) };
        let depth24_stencil8 = unsafe {
            instance.get_physical_device_format_properties(
                choice.physical_device,
                vk::Format::D24_UNORM_S8_UINT,
            )
        }
        .optimal_tiling_features
        .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT);

        let surface_loader = bundle
            .surface_supported
            .then(|| ash::khr::surface::Instance::new(&entry, &instance));
        let swapchain_loader =
            swapchain_supported.then(|| ash::khr::swapchain::Device::new(&instance, &device));

        log::info!(
            "VulkanBackend: initialized on '{}' (queue family {}, presentation: {})",
            adapter.name,
            choice.queue_family,
            swapchain_supported
        );

        Ok(Arc::new(Self {
            entry,
            instance,
            debug_utils: bundle.debug_utils,
            debug_messenger: bundle.debug_messenger,
            surface_loader,
            physical_device: choice.physical_device,
            memory_properties,
            device,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            swapchain_loader,
            queue_family: choice.queue_family,
            queue: Mutex::new(queue),
            timeline,
            last_submitted: AtomicU64::new(0),
            submissions: AtomicU64::new(0),
            pending_waits: Mutex::new(Vec::new()),
            deferred: DeferredDestructor::default(),
            adapter,
            depth24_stencil8,
        }))
    }

    pub fn adapter_info(&self) -> &AdapterInfo {
        &self.adapter
    }

    pub fn submission_count(&self) -> u64 {
        self.submissions.load(Ordering::Acquire)
    }

    pub(super) fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Native format for `format`, substituting D32S8 where D24S8 is not
    /// supported.
    pub(super) fn texture_format(&self, format: TextureFormat) -> vk::Format {
        match conversion::convert_texture_format(format) {
            vk::Format::D24_UNORM_S8_UINT if !self.depth24_stencil8 => {
                vk::Format::D32_SFLOAT_S8_UINT
            }
            native => native,
        }
    }

    /// Sub-allocate memory for a resource named `name` in log messages.
    pub(super) fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> GraphicsResult<MemoryBlock> {
        memory::validate_type_bits(&self.memory_properties, requirements.memory_type_bits)?;
        MemoryBlock::allocate(&self.allocator, name, requirements, location, linear)
    }

    /// Return memory that the GPU never used, or no longer uses.
    pub(super) fn free(&self, memory: MemoryBlock) {
        // SAFETY: callers free only memory outside any pending submission.
        unsafe { memory.free(&self.allocator) };
    }

    /// Serial of the most recent submission.
    pub(super) fn last_submitted(&self) -> u64 {
        self.last_submitted.load(Ordering::Acquire)
    }

    /// Highest serial the GPU has finished.
    pub(super) fn completed_serial(&self) -> u64 {
        unsafe { self.device.get_semaphore_counter_value(self.timeline) }.unwrap_or_else(|e| {
            log::warn!("VulkanBackend: reading the timeline failed: {e}");
            0
        })
    }

    /// Destroy `resource` once everything submitted so far has completed.
    pub(super) fn defer(&self, resource: DeferredResource) {
        self.deferred.queue(self.last_submitted(), resource);
    }

    /// Destroy the deferred objects the GPU is done with.
    pub(super) fn retire(&self) {
        let completed = self.completed_serial();
        // SAFETY: `completed` was read from the timeline itself.
        unsafe { self.deferred.retire(&self.device, &self.allocator, completed) };
    }

    pub(super) fn push_pending_wait(&self, semaphore: vk::Semaphore) {
        self.pending_waits.lock().push(semaphore);
    }

    /// Forget pending waits on `semaphores`, which are about to be destroyed.
    pub(super) fn cancel_pending_waits(&self, semaphores: &[vk::Semaphore]) {
        self.pending_waits.lock().retain(|s| !semaphores.contains(s));
    }

    /// Block until the GPU has finished serial `serial`.
    pub(super) fn wait_for_serial(&self, serial: u64) -> GraphicsResult<()> {
        if serial == 0 || self.completed_serial() >= serial {
            return Ok(());
        }
        let semaphores = [self.timeline];
        let values = [serial];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        unsafe { self.device.wait_semaphores(&wait_info, u64::MAX) }
            .map_err(|e| vk_error("vkWaitSemaphores", e))
    }

    /// Submit `command_buffers` as one batch signaling the next serial plus
    /// `signals`. With `consume_waits`, the batch also waits on every pending
    /// swap chain acquisition.
    pub(super) fn submit(
        &self,
        command_buffers: &[vk::CommandBuffer],
        signals: &[vk::SemaphoreSubmitInfo<'_>],
        consume_waits: bool,
    ) -> GraphicsResult<u64> {
        crate::profile_scope!("vulkan_submit");
        let queue = self.queue.lock();

        let waits: Vec<vk::Semaphore> = if consume_waits {
            std::mem::take(&mut *self.pending_waits.lock())
        } else {
            Vec::new()
        };
        let wait_infos: Vec<vk::SemaphoreSubmitInfo<'_>> = waits
            .iter()
            .map(|&semaphore| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(semaphore)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            })
            .collect();
        let command_infos: Vec<vk::CommandBufferSubmitInfo<'_>> = command_buffers
            .iter()
            .map(|&cmd| vk::CommandBufferSubmitInfo::default().command_buffer(cmd))
            .collect();

        let serial = self.last_submitted.load(Ordering::Acquire) + 1;
        let mut signal_infos = Vec::with_capacity(signals.len() + 1);
        signal_infos.push(
            vk::SemaphoreSubmitInfo::default()
                .semaphore(self.timeline)
                .value(serial)
                .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS),
        );
        signal_infos.extend_from_slice(signals);

        let submit = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&wait_infos)
            .command_buffer_infos(&command_infos)
            .signal_semaphore_infos(&signal_infos);
        unsafe { self.device.queue_submit2(*queue, &[submit], vk::Fence::null()) }
            .map_err(|e| vk_error("vkQueueSubmit2", e))?;

        self.last_submitted.store(serial, Ordering::Release);
        self.submissions.fetch_add(1, Ordering::AcqRel);
        drop(queue);

        self.retire();
        Ok(serial)
    }

    /// Record and submit a transient command buffer. `staging` is released
    /// together with it once the submission has completed.
    pub(super) fn one_shot(
        &self,
        staging: Option<DeferredResource>,
        record: impl FnOnce(&ash::Device, vk::CommandBuffer),
    ) -> GraphicsResult<()> {
        self.one_shot_submit(staging, &[], false, record).map(|_| ())
    }

    /// [`one_shot`](Self::one_shot) with extra signals, returning the serial.
    pub(super) fn one_shot_submit(
        &self,
        staging: Option<DeferredResource>,
        signals: &[vk::SemaphoreSubmitInfo<'_>],
        consume_waits: bool,
        record: impl FnOnce(&ash::Device, vk::CommandBuffer),
    ) -> GraphicsResult<u64> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(self.queue_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let pool = match unsafe { self.device.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                if let Some(staging) = staging {
                    self.defer(staging);
                }
                return Err(vk_error("vkCreateCommandPool", e));
            }
        };

        let result = (|| {
            let allocate_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let cmd = unsafe { self.device.allocate_command_buffers(&allocate_info) }
                .map_err(|e| vk_error("vkAllocateCommandBuffers", e))?[0];
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe { self.device.begin_command_buffer(cmd, &begin_info) }
                .map_err(|e| vk_error("vkBeginCommandBuffer", e))?;
            record(&self.device, cmd);
            unsafe { self.device.end_command_buffer(cmd) }
                .map_err(|e| vk_error("vkEndCommandBuffer", e))?;
            self.submit(&[cmd], signals, consume_waits)
        })();

        // Queued after the submission (or after the last one, on failure).
        self.defer(DeferredResource::CommandPool {
            pool,
            descriptor_pools: Vec::new(),
        });
        if let Some(staging) = staging {
            self.defer(staging);
        }
        result
    }

    /// Create a host-visible buffer holding `data`.
    pub(super) fn create_staging_buffer(
        &self,
        data: &[u8],
    ) -> GraphicsResult<(vk::Buffer, MemoryBlock)> {
        let (buffer, memory) = resources::create_raw_buffer(
            self,
            "upload staging",
            data.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::Host { readback: false },
        )?;
        if let Some(mapped) = memory.mapped() {
            // SAFETY: the allocation is at least `data.len()` bytes and not
            // yet visible to the GPU.
            unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.0.as_ptr(), data.len()) };
        }
        Ok((buffer, memory))
    }

    /// Create a buffer resource.
    pub fn create_buffer(
        self: &Arc<Self>,
        descriptor: &BufferDescriptor,
        data: Option<&[u8]>,
    ) -> GraphicsResult<VulkanBuffer> {
        crate::profile_scope!("vulkan_create_buffer");
        VulkanBuffer::new(self, descriptor, data)
    }

    /// Create a texture resource.
    pub fn create_texture(
        self: &Arc<Self>,
        descriptor: &TextureDescriptor,
        data: Option<&[u8]>,
    ) -> GraphicsResult<VulkanTexture> {
        crate::profile_scope!("vulkan_create_texture");
        VulkanTexture::new(self, descriptor, data)
    }

    pub fn create_shader(
        self: &Arc<Self>,
        descriptor: &ShaderDescriptor,
    ) -> GraphicsResult<VulkanShader> {
        VulkanShader::new(self, descriptor)
    }

    pub fn create_pipeline(
        self: &Arc<Self>,
        descriptor: &PipelineStateDescriptor,
    ) -> GraphicsResult<VulkanPipeline> {
        crate::profile_scope!("vulkan_create_pipeline");
        VulkanPipeline::new(self, descriptor)
    }

    pub fn create_command_list(self: &Arc<Self>) -> GraphicsResult<VulkanCommandList> {
        VulkanCommandList::new(self)
    }

    pub fn create_fence(self: &Arc<Self>, initial_value: u64) -> GraphicsResult<VulkanFence> {
        let semaphore = create_timeline_semaphore(&self.device, initial_value)
            .map_err(|e| vk_error("vkCreateSemaphore", e))?;
        Ok(VulkanFence {
            backend: Arc::clone(self),
            semaphore,
        })
    }

    pub fn create_swap_chain(
        self: &Arc<Self>,
        descriptor: &SwapChainDescriptor,
    ) -> GraphicsResult<VulkanSwapChain> {
        VulkanSwapChain::new(self, descriptor)
    }

    /// Submit the lists, in order, as one batch.
    pub fn execute(&self, lists: &[&CommandList]) -> GraphicsResult<()> {
        let raws = lists
            .iter()
            .map(|list| list.raw().as_vulkan())
            .collect::<GraphicsResult<Vec<_>>>()?;
        // A list that was never recorded has nothing to run.
        let command_buffers: Vec<vk::CommandBuffer> = raws
            .iter()
            .filter(|raw| raw.is_executable())
            .map(|raw| raw.command_buffer())
            .collect();
        let serial = self.submit(&command_buffers, &[], true)?;
        for raw in raws {
            raw.mark_submitted(serial);
        }
        Ok(())
    }

    /// Block until the queue is idle and destroy every deferred object.
    pub fn wait_idle(&self) -> GraphicsResult<()> {
        {
            let queue = self.queue.lock();
            unsafe { self.device.queue_wait_idle(*queue) }
                .map_err(|e| vk_error("vkQueueWaitIdle", e))?;
        }
        self.retire();
        Ok(())
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::warn!("VulkanBackend: vkDeviceWaitIdle on drop failed: {e}");
            }
            self.deferred.flush_all(&self.device, &self.allocator);
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_semaphore(self.timeline, None);
            self.device.destroy_device(None);

            if let (Some(debug_utils), Some(messenger)) =
                (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        log::debug!("VulkanBackend: destroyed '{}'", self.adapter.name);
    }
}

/// Fence backed by its own timeline semaphore.
pub struct VulkanFence {
    backend: Arc<VulkanBackend>,
    semaphore: vk::Semaphore,
}

impl VulkanFence {
    /// Signal `value` from the queue, after all work submitted so far.
    pub fn signal(&self, value: u64) -> GraphicsResult<()> {
        let signal = vk::SemaphoreSubmitInfo::default()
            .semaphore(self.semaphore)
            .value(value)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS);
        self.backend.submit(&[], &[signal], false).map(|_| ())
    }

    /// Block without timeout until the fence reaches `value`.
    pub fn wait(&self, value: u64) -> GraphicsResult<()> {
        let semaphores = [self.semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        unsafe { self.backend.device.wait_semaphores(&wait_info, u64::MAX) }
            .map_err(|e| vk_error("vkWaitSemaphores", e))?;
        self.backend.retire();
        Ok(())
    }

    pub fn completed_value(&self) -> u64 {
        unsafe { self.backend.device.get_semaphore_counter_value(self.semaphore) }
            .unwrap_or_else(|e| {
                log::warn!("VulkanFence: reading the counter failed: {e}");
                0
            })
    }
}

impl Drop for VulkanFence {
    fn drop(&mut self) {
        self.backend.defer(DeferredResource::Semaphore(self.semaphore));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_lost_maps_to_its_own_variant() {
        assert_eq!(
            vk_error("vkQueueSubmit2", vk::Result::ERROR_DEVICE_LOST),
            GraphicsError::DeviceLost
        );
        assert!(matches!(
            vk_error("vkCreateBuffer", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            GraphicsError::ResourceCreation(_)
        ));
    }

    #[test]
    fn test_init_error_carries_context() {
        let err = init_error("timeline semaphore")(vk::Result::ERROR_INITIALIZATION_FAILED);
        assert!(matches!(
            err,
            GraphicsError::Initialization(msg) if msg.starts_with("timeline semaphore")
        ));
    }
}
