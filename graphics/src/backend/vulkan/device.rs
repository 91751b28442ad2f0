//! Physical device enumeration and logical device creation.

use ash::vk;

use crate::backend::adapter::select_adapter;
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::{AdapterInfo, AdapterType};

use super::instance::REQUIRED_API_VERSION;

/// The physical device picked for a backend and its graphics queue family.
#[derive(Debug, Clone, Copy)]
pub(super) struct PhysicalDeviceChoice {
    pub physical_device: vk::PhysicalDevice,
    pub queue_family: u32,
}

pub(super) fn adapter_type(device_type: vk::PhysicalDeviceType) -> AdapterType {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => AdapterType::Discrete,
        vk::PhysicalDeviceType::INTEGRATED_GPU | vk::PhysicalDeviceType::VIRTUAL_GPU => {
            AdapterType::Integrated
        }
        vk::PhysicalDeviceType::CPU => AdapterType::Software,
        _ => AdapterType::Unknown,
    }
}

/// Total size of the device-local heaps.
pub(super) fn dedicated_memory(properties: &vk::PhysicalDeviceMemoryProperties) -> u64 {
    properties
        .memory_heaps_as_slice()
        .iter()
        .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|heap| heap.size)
        .sum()
}

fn find_graphics_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Option<u32> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    families
        .iter()
        .position(|family| {
            family
                .queue_flags
                .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        })
        .map(|index| index as u32)
}

fn has_required_features(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> bool {
    let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
    let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
    let mut features = vk::PhysicalDeviceFeatures2::default()
        .push_next(&mut features12)
        .push_next(&mut features13);
    unsafe { instance.get_physical_device_features2(physical_device, &mut features) };
    features12.timeline_semaphore == vk::TRUE
        && features13.dynamic_rendering == vk::TRUE
        && features13.synchronization2 == vk::TRUE
}

/// Enumerate Vulkan 1.3 capable devices and pick one. CPU implementations
/// such as lavapipe or SwiftShader are used only when no hardware device is
/// present.
pub(super) fn select_physical_device(
    instance: &ash::Instance,
    preferred: u32,
) -> GraphicsResult<(AdapterInfo, PhysicalDeviceChoice)> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .map_err(|e| GraphicsError::Initialization(format!("vkEnumeratePhysicalDevices: {e}")))?;

    let mut candidates = Vec::new();
    for physical_device in devices {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());

        if properties.api_version < REQUIRED_API_VERSION {
            log::info!(
                "Skipping '{}': Vulkan {}.{} < 1.3",
                name,
                vk::api_version_major(properties.api_version),
                vk::api_version_minor(properties.api_version)
            );
            continue;
        }
        if !has_required_features(instance, physical_device) {
            log::info!("Skipping '{}': missing dynamic rendering or synchronization2", name);
            continue;
        }
        let Some(queue_family) = find_graphics_queue_family(instance, physical_device) else {
            log::info!("Skipping '{}': no graphics queue", name);
            continue;
        };

        let memory = unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let info = AdapterInfo {
            name,
            vendor_id: properties.vendor_id,
            device_id: properties.device_id,
            adapter_type: adapter_type(properties.device_type),
            dedicated_memory: dedicated_memory(&memory),
        };
        log::info!("Found Vulkan adapter '{}' ({:?})", info.name, info.adapter_type);
        candidates.push((
            info,
            PhysicalDeviceChoice {
                physical_device,
                queue_family,
            },
        ));
    }

    select_adapter(candidates, preferred)
}

/// Create the logical device with one graphics queue.
pub(super) fn create_logical_device(
    instance: &ash::Instance,
    choice: PhysicalDeviceChoice,
    enable_swapchain: bool,
) -> GraphicsResult<ash::Device> {
    let priorities = [1.0f32];
    let queue_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(choice.queue_family)
        .queue_priorities(&priorities)];

    let extensions = if enable_swapchain {
        vec![ash::khr::swapchain::NAME.as_ptr()]
    } else {
        Vec::new()
    };

    let supported = unsafe { instance.get_physical_device_features(choice.physical_device) };
    let features = vk::PhysicalDeviceFeatures::default()
        .sampler_anisotropy(supported.sampler_anisotropy == vk::TRUE)
        .fill_mode_non_solid(supported.fill_mode_non_solid == vk::TRUE);
    let mut features12 = vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);
    let mut features13 = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extensions)
        .enabled_features(&features)
        .push_next(&mut features12)
        .push_next(&mut features13);

    unsafe { instance.create_device(choice.physical_device, &create_info, None) }
        .map_err(|e| GraphicsError::Initialization(format!("vkCreateDevice: {e}")))
}
