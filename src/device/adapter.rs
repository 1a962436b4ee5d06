//! Physical device selection, queue families and logical device creation.

use std::ffi::{c_char, CStr};

use ash::vk;

use super::instance::to_cstring;
use crate::error::{GraphicsError, GraphicsResult};

/// Device extensions every adapter must support.
pub const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 2] =
    [ash::khr::swapchain::NAME, ash::khr::push_descriptor::NAME];

/// Queue families used by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Whether graphics and presentation use the same family.
    pub fn is_unified(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.is_unified() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Pick graphics and present queue families.
///
/// A family that does both is preferred; otherwise the first graphics family
/// and the first presenting family are used together.
pub fn select_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> bool,
) -> GraphicsResult<QueueFamilyIndices> {
    let mut graphics = None;
    let mut present = None;

    for (index, family) in families.iter().enumerate() {
        let index = index as u32;
        let has_graphics =
            family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let has_present = family.queue_count > 0 && supports_present(index);

        if has_graphics && has_present {
            return Ok(QueueFamilyIndices {
                graphics: index,
                present: index,
            });
        }
        if has_graphics && graphics.is_none() {
            graphics = Some(index);
        }
        if has_present && present.is_none() {
            present = Some(index);
        }
    }

    let graphics = graphics.ok_or(GraphicsError::NoQueueFamily("graphics"))?;
    let present = present.ok_or(GraphicsError::NoQueueFamily("presentation"))?;
    Ok(QueueFamilyIndices { graphics, present })
}

/// Rank of an adapter type; `None` means the adapter is not acceptable.
///
/// Discrete GPUs are always accepted. Integrated and software (CPU)
/// adapters are opt-in fallbacks.
pub fn adapter_rank(
    device_type: vk::PhysicalDeviceType,
    allow_integrated: bool,
    allow_software: bool,
) -> Option<u32> {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => Some(2),
        vk::PhysicalDeviceType::INTEGRATED_GPU if allow_integrated => Some(1),
        vk::PhysicalDeviceType::CPU if allow_software => Some(0),
        _ => None,
    }
}

/// Adapter chosen for the device together with its queue families.
#[derive(Debug, Clone, Copy)]
pub struct SelectedAdapter {
    pub physical_device: vk::PhysicalDevice,
    pub queue_families: QueueFamilyIndices,
}

/// Select a discrete adapter that can present to `surface`.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    allow_integrated: bool,
    allow_software: bool,
) -> GraphicsResult<SelectedAdapter> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        GraphicsError::InitializationFailed(format!(
            "Failed to enumerate physical devices: {:?}",
            e
        ))
    })?;

    if devices.is_empty() {
        return Err(GraphicsError::NoSuitableAdapter(
            "No Vulkan-capable GPU found".to_string(),
        ));
    }

    let mut best: Option<(u32, SelectedAdapter)> = None;

    for device in devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };

        let Some(rank) = adapter_rank(properties.device_type, allow_integrated, allow_software) else {
            log::info!(
                "Skipping GPU {:?} (type: {:?})",
                device_name,
                properties.device_type
            );
            continue;
        };

        if vk::api_version_minor(properties.api_version) < 3
            && vk::api_version_major(properties.api_version) == 1
        {
            log::info!("Skipping GPU {:?}: Vulkan 1.3 not supported", device_name);
            continue;
        }

        if !supports_required_extensions(instance, device) {
            log::info!("Skipping GPU {:?}: missing device extensions", device_name);
            continue;
        }

        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
        let queue_families = match select_queue_families(&families, |index| unsafe {
            surface_loader
                .get_physical_device_surface_support(device, index, surface)
                .unwrap_or(false)
        }) {
            Ok(queue_families) => queue_families,
            Err(e) => {
                log::info!("Skipping GPU {:?}: {}", device_name, e);
                continue;
            }
        };

        log::info!(
            "Found GPU: {:?} (type: {:?}, graphics family: {}, present family: {})",
            device_name,
            properties.device_type,
            queue_families.graphics,
            queue_families.present
        );

        if best.as_ref().map_or(true, |(best_rank, _)| rank > *best_rank) {
            best = Some((
                rank,
                SelectedAdapter {
                    physical_device: device,
                    queue_families,
                },
            ));
        }
    }

    best.map(|(_, adapter)| adapter).ok_or_else(|| {
        GraphicsError::NoSuitableAdapter(if allow_integrated || allow_software {
            "No adapter with presentation support found".to_string()
        } else {
            "No discrete GPU with presentation support found".to_string()
        })
    })
}

fn supports_required_extensions(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
    let available = match unsafe { instance.enumerate_device_extension_properties(device) } {
        Ok(extensions) => extensions,
        Err(_) => return false,
    };

    REQUIRED_DEVICE_EXTENSIONS.iter().all(|required| {
        available.iter().any(|ext| {
            let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
            name == *required
        })
    })
}

/// Create the logical device with one queue per distinct family.
pub fn create_logical_device(
    instance: &ash::Instance,
    adapter: &SelectedAdapter,
    extra_extensions: &[String],
) -> GraphicsResult<ash::Device> {
    let queue_priorities = [1.0f32];
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = adapter
        .queue_families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(&queue_priorities)
        })
        .collect();

    let extra = extra_extensions
        .iter()
        .map(|name| to_cstring(name))
        .collect::<GraphicsResult<Vec<_>>>()?;

    let mut device_extensions: Vec<*const c_char> = REQUIRED_DEVICE_EXTENSIONS
        .iter()
        .map(|name| name.as_ptr())
        .collect();
    device_extensions.extend(extra.iter().map(|name| name.as_ptr()));

    let features = vk::PhysicalDeviceFeatures::default();
    let mut vulkan_13_features =
        vk::PhysicalDeviceVulkan13Features::default().dynamic_rendering(true);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&device_extensions)
        .enabled_features(&features)
        .push_next(&mut vulkan_13_features);

    let device = unsafe { instance.create_device(adapter.physical_device, &create_info, None) }
        .map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to create logical device: {:?}", e))
        })?;

    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_prefers_family_with_graphics_and_present() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];

        let indices = select_queue_families(&families, |index| index != 1).unwrap();
        assert_eq!(
            indices,
            QueueFamilyIndices {
                graphics: 2,
                present: 2
            }
        );
        assert!(indices.is_unified());
        assert_eq!(indices.unique(), vec![2]);
    }

    #[test]
    fn test_separate_families_when_none_does_both() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
        ];

        let indices = select_queue_families(&families, |index| index == 1).unwrap();
        assert_eq!(indices.graphics, 0);
        assert_eq!(indices.present, 1);
        assert!(!indices.is_unified());
        assert_eq!(indices.unique(), vec![0, 1]);
    }

    #[test]
    fn test_missing_present_family_is_an_error() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let err = select_queue_families(&families, |_| false).unwrap_err();
        assert_eq!(err, GraphicsError::NoQueueFamily("presentation"));
    }

    #[test]
    fn test_empty_family_is_ignored() {
        let empty = vk::QueueFamilyProperties {
            queue_flags: vk::QueueFlags::GRAPHICS,
            queue_count: 0,
            ..Default::default()
        };
        let families = [empty, family(vk::QueueFlags::GRAPHICS)];
        let indices = select_queue_families(&families, |_| true).unwrap();
        assert_eq!(indices.graphics, 1);
    }

    #[test]
    fn test_adapter_rank_is_discrete_only_by_default() {
        use ash::vk::PhysicalDeviceType as Type;

        assert_eq!(adapter_rank(Type::DISCRETE_GPU, false, false), Some(2));
        assert_eq!(adapter_rank(Type::INTEGRATED_GPU, false, false), None);
        assert_eq!(adapter_rank(Type::CPU, false, false), None);
        assert_eq!(adapter_rank(Type::VIRTUAL_GPU, true, true), None);
    }

    #[test]
    fn test_adapter_rank_fallbacks() {
        use ash::vk::PhysicalDeviceType as Type;

        assert_eq!(adapter_rank(Type::INTEGRATED_GPU, true, false), Some(1));
        assert_eq!(adapter_rank(Type::CPU, true, false), None);
        assert_eq!(adapter_rank(Type::CPU, false, true), Some(0));

        // A real GPU always outranks a software rasterizer.
        let cpu = adapter_rank(Type::CPU, true, true);
        let integrated = adapter_rank(Type::INTEGRATED_GPU, true, true);
        let discrete = adapter_rank(Type::DISCRETE_GPU, true, true);
        assert!(cpu < integrated && integrated < discrete);
    }
}
