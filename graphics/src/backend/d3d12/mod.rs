//! Native Direct3D 12 backend implementation using the `windows` crate.
//!
//! One direct queue carries every submission. Each submission signals the
//! backend fence with a new serial; command lists remember the serial of
//! their last submission and released COM objects wait in a serial queue
//! until the fence has passed the last serial submitted before the release.

mod command;
mod conversion;
mod descriptors;
mod pipeline;
mod resources;
mod swapchain;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_11_0;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::Win32::System::Threading::{CreateEventW, INFINITE, WaitForSingleObject};

pub use command::D3d12CommandList;
pub use pipeline::D3d12Pipeline;
pub use resources::{D3d12Buffer, D3d12Shader, D3d12Texture};
pub use swapchain::D3d12SwapChain;

use self::descriptors::Descriptors;
use super::adapter::select_adapter;
use super::descriptor_heap::DescriptorHeapKind;
use super::serial_queue::SerialQueue;
use crate::command_list::CommandList;
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::{
    AdapterInfo, AdapterType, BufferDescriptor, DeviceCreationParams, PipelineStateDescriptor,
    ShaderDescriptor, SwapChainDescriptor, TextureDescriptor,
};

/// Map a failed call to a [`GraphicsError`]. A removed or reset device is
/// always reported as [`GraphicsError::DeviceLost`].
pub(super) fn hr_error(context: &str, error: windows::core::Error) -> GraphicsError {
    let code = error.code();
    if code == DXGI_ERROR_DEVICE_REMOVED
        || code == DXGI_ERROR_DEVICE_RESET
        || code == DXGI_ERROR_DEVICE_HUNG
    {
        GraphicsError::DeviceLost
    } else {
        GraphicsError::ResourceCreation(format!("{context}: {error}"))
    }
}

fn init_error(context: &str) -> impl Fn(windows::core::Error) -> GraphicsError + '_ {
    move |e| GraphicsError::Initialization(format!("{context}: {e}"))
}

/// COM objects released once the GPU is done with them.
pub(super) enum Retired {
    Resource(ID3D12Resource),
    Pipeline {
        state: ID3D12PipelineState,
        root_signature: ID3D12RootSignature,
    },
    CommandList {
        allocator: ID3D12CommandAllocator,
        list: ID3D12GraphicsCommandList,
    },
    Descriptors(Vec<(DescriptorHeapKind, u32)>),
}

/// Block until `fence` reaches `value`.
fn wait_for_fence(fence: &ID3D12Fence, value: u64) -> GraphicsResult<()> {
    if unsafe { fence.GetCompletedValue() } >= value {
        return Ok(());
    }
    let event: HANDLE = unsafe { CreateEventW(None, false, false, None) }
        .map_err(|e| hr_error("CreateEventW", e))?;
    let result = unsafe { fence.SetEventOnCompletion(value, event) }
        .map_err(|e| hr_error("SetEventOnCompletion", e))
        .and_then(|()| match unsafe { WaitForSingleObject(event, INFINITE) } {
            WAIT_OBJECT_0 => Ok(()),
            other => Err(GraphicsError::State(format!("fence wait failed ({})", other.0))),
        });
    unsafe {
        let _ = CloseHandle(event);
    }
    result?;
    // A removed device reports every fence as complete with this value.
    if unsafe { fence.GetCompletedValue() } == u64::MAX {
        return Err(GraphicsError::DeviceLost);
    }
    Ok(())
}

fn adapter_info(adapter: &IDXGIAdapter1) -> Option<AdapterInfo> {
    let desc = unsafe { adapter.GetDesc1() }.ok()?;
    let len = desc.Description.iter().position(|&c| c == 0).unwrap_or(desc.Description.len());
    let software = desc.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32 != 0;
    let adapter_type = if software {
        AdapterType::Software
    } else if desc.DedicatedVideoMemory >= 512 * 1024 * 1024 {
        AdapterType::Discrete
    } else {
        AdapterType::Integrated
    };
    Some(AdapterInfo {
        name: String::from_utf16_lossy(&desc.Description[..len]),
        vendor_id: desc.VendorId,
        device_id: desc.DeviceId,
        adapter_type,
        dedicated_memory: desc.DedicatedVideoMemory as u64,
    })
}

/// Adapters that can create a feature level 11.0 device, in DXGI order.
fn enumerate_adapters(factory: &IDXGIFactory4) -> Vec<(AdapterInfo, IDXGIAdapter1)> {
    let mut adapters = Vec::new();
    for index in 0.. {
        let Ok(adapter) = (unsafe { factory.EnumAdapters1(index) }) else {
            break;
        };
        let supported = unsafe {
            D3D12CreateDevice(
                &adapter,
                D3D_FEATURE_LEVEL_11_0,
                std::ptr::null_mut::<Option<ID3D12Device>>(),
            )
        }
        .is_ok();
        match adapter_info(&adapter) {
            Some(info) if supported => adapters.push((info, adapter)),
            Some(info) => {
                log::debug!("D3d12Backend: skipping '{}' (no feature level 11.0)", info.name)
            }
            None => {}
        }
    }
    adapters
}

fn enable_debug_layer(gpu_validation: bool) {
    let mut debug: Option<ID3D12Debug> = None;
    if let Err(e) = unsafe { D3D12GetDebugInterface(&mut debug) } {
        log::warn!("D3d12Backend: debug layer unavailable: {e}");
        return;
    }
    let Some(debug) = debug else { return };
    unsafe { debug.EnableDebugLayer() };
    if gpu_validation {
        match windows::core::Interface::cast::<ID3D12Debug1>(&debug) {
            Ok(debug1) => unsafe { debug1.SetEnableGPUBasedValidation(true) },
            Err(e) => log::warn!("D3d12Backend: GPU-based validation unavailable: {e}"),
        }
    }
    log::info!("D3d12Backend: debug layer enabled (GPU validation: {gpu_validation})");
}

/// Direct3D 12 device-level state shared by every object created from it.
pub struct D3d12Backend {
    factory: IDXGIFactory4,
    device: ID3D12Device,
    queue: Mutex<ID3D12CommandQueue>,
    /// Signaled with the serial of every submission.
    fence: ID3D12Fence,
    last_submitted: AtomicU64,
    submissions: AtomicU64,
    descriptors: Descriptors,
    deferred: Mutex<SerialQueue<Retired>>,
    adapter: AdapterInfo,
    debug_layer: bool,
}

// SAFETY: the device, queue and fence are free-threaded; the queue is only
// used under its lock and the remaining state is behind atomics or mutexes.
unsafe impl Send for D3d12Backend {}
unsafe impl Sync for D3d12Backend {}

impl std::fmt::Debug for D3d12Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("D3d12Backend")
            .field("adapter", &self.adapter.name)
            .field("last_submitted", &self.last_submitted.load(Ordering::Relaxed))
            .field("pending_releases", &self.deferred.lock().len())
            .finish()
    }
}

impl D3d12Backend {
    /// Create the DXGI factory, pick an adapter (WARP when no hardware
    /// adapter qualifies) and create the device and its direct queue.
    pub fn new(params: &DeviceCreationParams) -> GraphicsResult<Arc<Self>> {
        if params.debug_layer {
            enable_debug_layer(params.gpu_validation);
        }
        let factory_flags = if params.debug_layer {
            DXGI_CREATE_FACTORY_DEBUG
        } else {
            DXGI_CREATE_FACTORY_FLAGS(0)
        };
        let factory: IDXGIFactory4 =
            unsafe { CreateDXGIFactory2(factory_flags) }.map_err(init_error("CreateDXGIFactory2"))?;

        let selected = select_adapter(enumerate_adapters(&factory), params.adapter_index);
        let (adapter, dxgi_adapter) = match selected {
            Ok(selected) => selected,
            Err(e) => {
                log::warn!("D3d12Backend: {e}; falling back to WARP");
                let warp: IDXGIAdapter1 =
                    unsafe { factory.EnumWarpAdapter() }.map_err(init_error("EnumWarpAdapter"))?;
                let info = adapter_info(&warp).ok_or_else(|| {
                    GraphicsError::Initialization("WARP adapter has no description".to_string())
                })?;
                (info, warp)
            }
        };

        let mut device: Option<ID3D12Device> = None;
        unsafe { D3D12CreateDevice(&dxgi_adapter, D3D_FEATURE_LEVEL_11_0, &mut device) }
            .map_err(init_error("D3D12CreateDevice"))?;
        let device = device.ok_or_else(|| {
            GraphicsError::Initialization("D3D12CreateDevice returned no device".to_string())
        })?;

        let queue_desc = D3D12_COMMAND_QUEUE_DESC {
            Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
            ..Default::default()
        };
        let queue: ID3D12CommandQueue = unsafe { device.CreateCommandQueue(&queue_desc) }
            .map_err(init_error("CreateCommandQueue"))?;
        let fence: ID3D12Fence = unsafe { device.CreateFence(0, D3D12_FENCE_FLAG_NONE) }
            .map_err(init_error("CreateFence"))?;
        let descriptors = Descriptors::new(&device, &params.descriptor_heaps)?;

        log::info!(
            "D3d12Backend: initialized on '{}' ({:?}, {} MiB dedicated)",
            adapter.name,
            adapter.adapter_type,
            adapter.dedicated_memory / (1024 * 1024)
        );

        Ok(Arc::new(Self {
            factory,
            device,
            queue: Mutex::new(queue),
            fence,
            last_submitted: AtomicU64::new(0),
            submissions: AtomicU64::new(0),
            descriptors,
            deferred: Mutex::new(SerialQueue::default()),
            adapter,
            debug_layer: params.debug_layer,
        }))
    }

    pub fn adapter_info(&self) -> &AdapterInfo {
        &self.adapter
    }

    pub fn submission_count(&self) -> u64 {
        self.submissions.load(Ordering::Acquire)
    }

    /// Descriptor slots of `kind` currently in use.
    pub fn descriptors_in_use(&self, kind: DescriptorHeapKind) -> u32 {
        self.descriptors.in_use(kind)
    }

    pub(super) fn device(&self) -> &ID3D12Device {
        &self.device
    }

    pub(super) fn factory(&self) -> &IDXGIFactory4 {
        &self.factory
    }

    pub(super) fn queue(&self) -> parking_lot::MutexGuard<'_, ID3D12CommandQueue> {
        self.queue.lock()
    }

    pub(super) fn descriptors(&self) -> &Descriptors {
        &self.descriptors
    }

    pub(super) fn debug_layer(&self) -> bool {
        self.debug_layer
    }

    /// Serial of the most recent submission.
    pub(super) fn last_submitted(&self) -> u64 {
        self.last_submitted.load(Ordering::Acquire)
    }

    /// Highest serial the GPU has finished.
    pub(super) fn completed_serial(&self) -> u64 {
        unsafe { self.fence.GetCompletedValue() }
    }

    /// Release `object` once everything submitted so far has completed.
    pub(super) fn defer(&self, object: Retired) {
        self.deferred.lock().push(self.last_submitted(), object);
    }

    /// Release the deferred objects the GPU is done with.
    pub(super) fn retire(&self) {
        let completed = self.completed_serial();
        let released = self.deferred.lock().drain_completed(completed);
        self.release(released);
    }

    fn release(&self, objects: Vec<Retired>) {
        for object in objects {
            if let Retired::Descriptors(slots) = object {
                self.descriptors.free(&slots);
            }
        }
    }

    /// Submit `lists` as one batch and signal the next serial.
    pub(super) fn submit(&self, lists: &[Option<ID3D12CommandList>]) -> GraphicsResult<u64> {
        crate::profile_scope!("d3d12_submit");
        let queue = self.queue.lock();
        if !lists.is_empty() {
            unsafe { queue.ExecuteCommandLists(lists) };
        }
        let serial = self.last_submitted.load(Ordering::Acquire) + 1;
        unsafe { queue.Signal(&self.fence, serial) }
            .map_err(|e| hr_error("ID3D12CommandQueue::Signal", e))?;
        self.last_submitted.store(serial, Ordering::Release);
        self.submissions.fetch_add(1, Ordering::AcqRel);
        drop(queue);

        self.retire();
        Ok(serial)
    }

    /// Record and submit a transient command list. `staging` is released
    /// together with it once the submission has completed.
    pub(super) fn one_shot(
        &self,
        staging: Option<ID3D12Resource>,
        record: impl FnOnce(&ID3D12GraphicsCommandList),
    ) -> GraphicsResult<()> {
        let result = (|| {
            let allocator: ID3D12CommandAllocator =
                unsafe { self.device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT) }
                    .map_err(|e| hr_error("CreateCommandAllocator", e))?;
            let list: ID3D12GraphicsCommandList = unsafe {
                self.device
                    .CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &allocator, None)
            }
            .map_err(|e| hr_error("CreateCommandList", e))?;
            record(&list);
            let closed = unsafe { list.Close() }
                .map_err(|e| hr_error("ID3D12GraphicsCommandList::Close", e));
            let submitted = closed.and_then(|()| {
                let executable: ID3D12CommandList = windows::core::Interface::cast(&list)
                    .map_err(|e| hr_error("ID3D12CommandList", e))?;
                self.submit(&[Some(executable)])
            });
            // Queued after the submission (or after the last one, on failure).
            self.defer(Retired::CommandList { allocator, list });
            submitted.map(|_| ())
        })();
        if let Some(staging) = staging {
            self.defer(Retired::Resource(staging));
        }
        result
    }

    /// Create a buffer resource.
    pub fn create_buffer(
        self: &Arc<Self>,
        descriptor: &BufferDescriptor,
        data: Option<&[u8]>,
    ) -> GraphicsResult<D3d12Buffer> {
        crate::profile_scope!("d3d12_create_buffer");
        D3d12Buffer::new(self, descriptor, data)
    }

    /// Create a texture resource.
    pub fn create_texture(
        self: &Arc<Self>,
        descriptor: &TextureDescriptor,
        data: Option<&[u8]>,
    ) -> GraphicsResult<D3d12Texture> {
        crate::profile_scope!("d3d12_create_texture");
        D3d12Texture::new(self, descriptor, data)
    }

    pub fn create_shader(
        self: &Arc<Self>,
        descriptor: &ShaderDescriptor,
    ) -> GraphicsResult<D3d12Shader> {
        D3d12Shader::new(self, descriptor)
    }

    pub fn create_pipeline(
        self: &Arc<Self>,
        descriptor: &PipelineStateDescriptor,
    ) -> GraphicsResult<D3d12Pipeline> {
        crate::profile_scope!("d3d12_create_pipeline");
        D3d12Pipeline::new(self, descriptor)
    }

    pub fn create_command_list(self: &Arc<Self>) -> GraphicsResult<D3d12CommandList> {
        D3d12CommandList::new(self)
    }

    pub fn create_fence(self: &Arc<Self>, initial_value: u64) -> GraphicsResult<D3d12Fence> {
        let fence: ID3D12Fence =
            unsafe { self.device.CreateFence(initial_value, D3D12_FENCE_FLAG_NONE) }
                .map_err(|e| hr_error("CreateFence", e))?;
        Ok(D3d12Fence {
            backend: Arc::clone(self),
            fence,
        })
    }

    pub fn create_swap_chain(
        self: &Arc<Self>,
        descriptor: &SwapChainDescriptor,
    ) -> GraphicsResult<D3d12SwapChain> {
        D3d12SwapChain::new(self, descriptor)
    }

    /// Submit the lists, in order, as one batch.
    pub fn execute(&self, lists: &[&CommandList]) -> GraphicsResult<()> {
        let raws = lists
            .iter()
            .map(|list| list.raw().as_d3d12())
            .collect::<GraphicsResult<Vec<_>>>()?;
        // A list that was never recorded has nothing to run.
        let executables = raws
            .iter()
            .filter(|raw| raw.is_executable())
            .map(|raw| raw.executable().map(Some))
            .collect::<GraphicsResult<Vec<_>>>()?;
        let serial = self.submit(&executables)?;
        for raw in raws {
            raw.mark_submitted(serial);
        }
        Ok(())
    }

    /// Block until the queue is idle and release every deferred object.
    pub fn wait_idle(&self) -> GraphicsResult<()> {
        let serial = self.submit(&[])?;
        wait_for_fence(&self.fence, serial)?;
        self.retire();
        Ok(())
    }
}

impl Drop for D3d12Backend {
    fn drop(&mut self) {
        let serial = self.last_submitted() + 1;
        let signaled = unsafe { self.queue.get_mut().Signal(&self.fence, serial) };
        let drained = signaled
            .map_err(|e| hr_error("Signal", e))
            .and_then(|()| wait_for_fence(&self.fence, serial));
        if let Err(e) = drained {
            log::warn!("D3d12Backend: waiting for the queue on drop failed: {e}");
        }
        let remaining = self.deferred.get_mut().drain_all();
        self.release(remaining);
        log::debug!("D3d12Backend: destroyed '{}'", self.adapter.name);
    }
}

/// Fence backed by its own `ID3D12Fence`.
pub struct D3d12Fence {
    backend: Arc<D3d12Backend>,
    fence: ID3D12Fence,
}

// SAFETY: ID3D12Fence is free-threaded.
unsafe impl Send for D3d12Fence {}
unsafe impl Sync for D3d12Fence {}

impl D3d12Fence {
    /// Signal `value` from the queue, after all work submitted so far.
    pub fn signal(&self, value: u64) -> GraphicsResult<()> {
        let queue = self.backend.queue();
        unsafe { queue.Signal(&self.fence, value) }
            .map_err(|e| hr_error("ID3D12CommandQueue::Signal", e))
    }

    /// Block without timeout until the fence reaches `value`.
    pub fn wait(&self, value: u64) -> GraphicsResult<()> {
        wait_for_fence(&self.fence, value)?;
        self.backend.retire();
        Ok(())
    }

    pub fn completed_value(&self) -> u64 {
        unsafe { self.fence.GetCompletedValue() }
    }
}

/// Whether a present result reports an occluded window.
pub(super) fn is_occluded(result: windows::core::HRESULT) -> bool {
    result == DXGI_STATUS_OCCLUDED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removed_device_maps_to_device_lost() {
        let removed = windows::core::Error::from(DXGI_ERROR_DEVICE_REMOVED);
        assert_eq!(hr_error("Present", removed), GraphicsError::DeviceLost);
        let invalid = windows::core::Error::from(DXGI_ERROR_INVALID_CALL);
        assert!(matches!(
            hr_error("CreateCommittedResource", invalid),
            GraphicsError::ResourceCreation(_)
        ));
    }

    #[test]
    fn test_occluded_present_is_recognized() {
        assert!(is_occluded(DXGI_STATUS_OCCLUDED));
        assert!(!is_occluded(DXGI_ERROR_INVALID_CALL));
    }

    #[test]
    fn test_init_error_carries_context() {
        let err = init_error("CreateFence")(windows::core::Error::from(DXGI_ERROR_UNSUPPORTED));
        assert!(matches!(
            err,
            GraphicsError::Initialization(msg) if msg.starts_with("CreateFence")
        ));
    }
}
