//! Vulkan instance creation.

use std::ffi::{c_char, CStr, CString};

use ash::vk;

use super::config::DeviceConfig;
use super::debug::DebugMessenger;
use crate::error::{GraphicsError, GraphicsResult};

/// Dynamic rendering and extended dynamic state are core in 1.3.
const REQUIRED_API_VERSION: u32 = vk::API_VERSION_1_3;

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Create the instance, and a debug messenger when validation is enabled
/// and available.
pub fn create_instance(
    entry: &ash::Entry,
    config: &DeviceConfig,
    surface_extensions: &[*const c_char],
) -> GraphicsResult<(ash::Instance, Option<DebugMessenger>)> {
    let available_layers = available_layer_names(entry);

    let validation_available = config.validation
        && available_layers
            .iter()
            .any(|name| name.as_c_str() == VALIDATION_LAYER_NAME);
    if config.validation && !validation_available {
        log::warn!("Validation layers requested but not available");
    }

    let app_name = to_cstring(&config.app_name)?;
    let engine_name = c"canvas-gpu";

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(engine_name)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(REQUIRED_API_VERSION);

    let extra_extensions = config
        .instance_extensions
        .iter()
        .map(|name| to_cstring(name))
        .collect::<GraphicsResult<Vec<_>>>()?;

    let mut extensions: Vec<*const c_char> = surface_extensions.to_vec();
    extensions.extend(extra_extensions.iter().map(|name| name.as_ptr()));
    if validation_available {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    #[cfg(target_os = "macos")]
    {
        extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
        extensions.push(ash::khr::get_physical_device_properties2::NAME.as_ptr());
    }

    let mut layers: Vec<CString> = Vec::new();
    for layer in &config.instance_layers {
        let name = to_cstring(layer)?;
        if available_layers.contains(&name) {
            layers.push(name);
        } else {
            log::warn!("Instance layer {} not available, skipping", layer);
        }
    }
    if validation_available && !layers.iter().any(|l| l.as_c_str() == VALIDATION_LAYER_NAME) {
        layers.push(VALIDATION_LAYER_NAME.to_owned());
    }
    let layer_ptrs: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    #[allow(unused_mut)]
    let mut create_flags = vk::InstanceCreateFlags::empty();

    #[cfg(target_os = "macos")]
    {
        create_flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }

    let create_info = vk::InstanceCreateInfo::default()
        .flags(create_flags)
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_ptrs);

    let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create Vulkan instance: {:?}", e))
    })?;

    let debug = if validation_available {
        Some(DebugMessenger::new(entry, &instance)?)
    } else {
        None
    };

    log::info!(
        "Created Vulkan instance ({} extensions, {} layers)",
        extensions.len(),
        layer_ptrs.len()
    );

    Ok((instance, debug))
}

fn available_layer_names(entry: &ash::Entry) -> Vec<CString> {
    let layers = match unsafe { entry.enumerate_instance_layer_properties() } {
        Ok(layers) => layers,
        Err(_) => return Vec::new(),
    };

    layers
        .iter()
        .map(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) }.to_owned())
        .collect()
}

pub(crate) fn to_cstring(name: &str) -> GraphicsResult<CString> {
    CString::new(name).map_err(|e| {
        GraphicsError::InitializationFailed(format!("Invalid name {name:?}: {e}"))
    })
}
