//! Vulkan instance creation.

use std::ffi::{CStr, c_char};

use ash::vk;

use crate::error::{GraphicsError, GraphicsResult};

use super::debug;

/// Dynamic rendering, synchronization2 and timeline semaphores are core in 1.3.
pub(super) const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 3, 0);

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Surface extensions enabled when the loader offers them. None are required:
/// a headless device creates no surfaces.
const SURFACE_EXTENSIONS: &[&CStr] = &[
    ash::khr::surface::NAME,
    #[cfg(target_os = "windows")]
    ash::khr::win32_surface::NAME,
    #[cfg(all(unix, not(target_os = "macos")))]
    ash::khr::xlib_surface::NAME,
    #[cfg(all(unix, not(target_os = "macos")))]
    ash::khr::xcb_surface::NAME,
    #[cfg(all(unix, not(target_os = "macos")))]
    ash::khr::wayland_surface::NAME,
    #[cfg(target_os = "macos")]
    ash::ext::metal_surface::NAME,
];

/// Instance plus the debug objects created with it.
pub(super) struct InstanceBundle {
    pub instance: ash::Instance,
    pub debug_utils: Option<ash::ext::debug_utils::Instance>,
    pub debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    pub surface_supported: bool,
}

fn extension_names(properties: &[vk::ExtensionProperties]) -> Vec<&CStr> {
    properties
        .iter()
        .filter_map(|p| p.extension_name_as_c_str().ok())
        .collect()
}

/// Create the instance, enabling the validation layer when `validation` is
/// set and the layer is installed, and GPU-assisted validation on top of it
/// when `gpu_validation` is set.
pub(super) fn create_instance(
    entry: &ash::Entry,
    validation: bool,
    gpu_validation: bool,
) -> GraphicsResult<InstanceBundle> {
    let validation_available = validation && has_validation_layer(entry);
    if validation && !validation_available {
        log::warn!("Vulkan validation layer requested but not installed");
    }

    let available = unsafe { entry.enumerate_instance_extension_properties(None) }
        .map_err(|e| {
            GraphicsError::Initialization(format!("vkEnumerateInstanceExtensionProperties: {e}"))
        })?;
    let available = extension_names(&available);

    let mut extensions: Vec<*const c_char> = SURFACE_EXTENSIONS
        .iter()
        .filter(|name| available.contains(name))
        .map(|name| name.as_ptr())
        .collect();
    let surface_supported = extensions.len() > 1;

    #[allow(unused_mut)]
    let mut flags = vk::InstanceCreateFlags::empty();
    #[cfg(target_os = "macos")]
    if available.contains(&ash::khr::portability_enumeration::NAME) {
        extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
        flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }

    let layers: Vec<*const c_char> = if validation_available {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        vec![VALIDATION_LAYER_NAME.as_ptr()]
    } else {
        Vec::new()
    };

    let gpu_validation = gpu_validation && validation_available;
    if gpu_validation {
        extensions.push(ash::ext::validation_features::NAME.as_ptr());
    }
    let enabled_features = [vk::ValidationFeatureEnableEXT::GPU_ASSISTED];
    let mut validation_features =
        vk::ValidationFeaturesEXT::default().enabled_validation_features(&enabled_features);

    let app_info = vk::ApplicationInfo::default()
        .application_name(c"Keystone")
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"Keystone Graphics")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(REQUIRED_API_VERSION);

    let mut create_info = vk::InstanceCreateInfo::default()
        .flags(flags)
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layers);
    if gpu_validation {
        create_info = create_info.push_next(&mut validation_features);
    }

    let instance = unsafe { entry.create_instance(&create_info, None) }
        .map_err(|e| GraphicsError::Initialization(format!("vkCreateInstance: {e}")))?;

    let (debug_utils, debug_messenger) = if validation_available {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, &instance);
        match debug::create_debug_messenger(&debug_utils) {
            Ok(messenger) => (Some(debug_utils), Some(messenger)),
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        }
    } else {
        (None, None)
    };

    log::info!(
        "Vulkan instance created (validation: {}, GPU validation: {}, surfaces: {})",
        validation_available,
        gpu_validation,
        surface_supported
    );
    Ok(InstanceBundle {
        instance,
        debug_utils,
        debug_messenger,
        surface_supported,
    })
}

fn has_validation_layer(entry: &ash::Entry) -> bool {
    let Ok(layers) = (unsafe { entry.enumerate_instance_layer_properties() }) else {
        return false;
    };
    layers
        .iter()
        .any(|layer| layer.layer_name_as_c_str().is_ok_and(|name| name == VALIDATION_LAYER_NAME))
}
