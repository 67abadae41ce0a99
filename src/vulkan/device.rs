//! # Device Module
//!
//! Turns the physical devices reported by the driver into [`DeviceCandidate`] snapshots, hands
//! them to [`negotiate::pick`] and creates the logical device and its queues for the winner.

use std::collections::BTreeSet;

use anyhow::{Context as _, Result};
use log::{debug, error, info, warn};
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::KhrSurfaceExtension;

use crate::config::{Config, NegotiationConfig};

use super::negotiate::{self, DeviceCandidate, QueueFamilies, QueueFamily, SwapchainSupport};

/// The physical device chosen for rendering.
#[derive(Clone, Debug)]
pub struct PhysicalDeviceSelection {
    pub physical_device: vk::PhysicalDevice,
    pub name: String,
    pub queue_families: QueueFamilies,
    /// Whether `VK_KHR_portability_subset` is exposed and therefore must be enabled.
    pub portability_subset: bool,
}

/// Queues fetched from the logical device. Both may be the same queue.
#[derive(Clone, Copy, Debug)]
pub struct Queues {
    pub graphics: vk::Queue,
    pub present: vk::Queue,
}

/// Queries surface capabilities, formats and present modes of `physical_device`.
pub fn query_swapchain_support(
    instance: &Instance,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
) -> Result<SwapchainSupport> {
    // SAFETY: `physical_device` and `surface` were created from `instance`.
    unsafe {
        Ok(SwapchainSupport {
            capabilities: instance
                .get_physical_device_surface_capabilities_khr(physical_device, surface)?,
            formats: instance.get_physical_device_surface_formats_khr(physical_device, surface)?,
            present_modes: instance
                .get_physical_device_surface_present_modes_khr(physical_device, surface)?,
        })
    }
}

/// Snapshots everything device selection looks at for one physical device.
pub fn query_candidate(
    instance: &Instance,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
) -> Result<DeviceCandidate> {
    // SAFETY: `physical_device` was enumerated from `instance`.
    let (properties, features, families) = unsafe {
        (
            instance.get_physical_device_properties(physical_device),
            instance.get_physical_device_features(physical_device),
            instance.get_physical_device_queue_family_properties(physical_device),
        )
    };

    let name = properties.device_name.to_string();
    debug!("`{name}`: found {} queue families.", families.len());

    let queue_families = (0u32..)
        .zip(&families)
        .map(|(index, family)| -> Result<QueueFamily> {
            // SAFETY: `index` is a valid queue family index of `physical_device`.
            let present = unsafe {
                instance.get_physical_device_surface_support_khr(physical_device, index, surface)?
            };

            Ok(QueueFamily {
                flags: family.queue_flags,
                queue_count: family.queue_count,
                present,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    // SAFETY: `physical_device` was enumerated from `instance`.
    let extensions = unsafe { instance.enumerate_device_extension_properties(physical_device, None)? }
        .iter()
        .map(|e| e.extension_name)
        .collect();

    Ok(DeviceCandidate {
        handle: physical_device,
        name,
        device_type: properties.device_type,
        max_image_dimension_2d: properties.limits.max_image_dimension_2d,
        geometry_shader: features.geometry_shader == vk::TRUE,
        queue_families,
        extensions,
        swapchain_support: query_swapchain_support(instance, surface, physical_device)?,
    })
}

/// Enumerates physical devices and selects the best one for `surface`.
pub fn pick_physical_device(
    instance: &Instance,
    surface: vk::SurfaceKHR,
    config: &NegotiationConfig,
) -> Result<PhysicalDeviceSelection> {
    // SAFETY: `instance` is alive for the duration of the call.
    let physical_devices = unsafe { instance.enumerate_physical_devices()? };
    info!("Found {} devices.", physical_devices.len());

    let candidates = queryable_candidates(physical_devices.into_iter().map(|physical_device| {
        (
            physical_device,
            query_candidate(instance, surface, physical_device),
        )
    }));

    for candidate in &candidates {
        debug!(
            "`{}` ({:?}) scored {}.",
            candidate.name,
            candidate.device_type,
            negotiate::rate(candidate, config)
        );
    }

    let (index, queue_families) = negotiate::pick(&candidates, config)
        .inspect_err(|e| error!("Failed to select a physical device: {e}"))?;

    let candidate = &candidates[index];
    info!("Selected physical device (`{}`).", candidate.name);

    Ok(PhysicalDeviceSelection {
        physical_device: candidate.handle,
        name: candidate.name.clone(),
        queue_families,
        portability_subset: candidate
            .extensions
            .contains(&vk::KHR_PORTABILITY_SUBSET_EXTENSION.name),
    })
}

/// Keeps the devices whose queries succeeded. A device that cannot be queried is skipped like
/// one that scores zero, so it never hides the other devices from selection.
fn queryable_candidates(
    results: impl IntoIterator<Item = (vk::PhysicalDevice, Result<DeviceCandidate>)>,
) -> Vec<DeviceCandidate> {
    results
        .into_iter()
        .filter_map(|(physical_device, result)| {
            result
                .inspect_err(|e| warn!("Skipping physical device {physical_device:?}: {e:#}"))
                .ok()
        })
        .collect()
}

/// Distinct queue family indices in ascending order, one queue is created per entry.
pub fn unique_queue_families(families: QueueFamilies) -> Vec<u32> {
    BTreeSet::from([families.graphics, families.present])
        .into_iter()
        .collect()
}

/// Creates the logical device with one queue per unique family and fetches the graphics and
/// present queues.
pub fn create_logical_device(
    instance: &Instance,
    selection: &PhysicalDeviceSelection,
    config: &Config,
) -> Result<(Device, Queues)> {
    let queue_priorities = &[1.0];
    let queue_infos = unique_queue_families(selection.queue_families)
        .into_iter()
        .map(|index| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(index)
                .queue_priorities(queue_priorities)
        })
        .collect::<Vec<_>>();

    let layers = config
        .enabled_layers()
        .iter()
        .map(|l| l.as_ptr())
        .collect::<Vec<_>>();

    let mut extensions = config
        .negotiation
        .device_extensions
        .iter()
        .map(|e| e.as_ptr())
        .collect::<Vec<_>>();

    if selection.portability_subset {
        extensions.push(vk::KHR_PORTABILITY_SUBSET_EXTENSION.name.as_ptr());
    }

    let features = vk::PhysicalDeviceFeatures::builder();

    let info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_infos)
        .enabled_layer_names(&layers)
        .enabled_extension_names(&extensions)
        .enabled_features(&features);

    // SAFETY: `selection.physical_device` was enumerated from `instance`.
    let device = unsafe { instance.create_device(selection.physical_device, &info, None) }
        .context("Failed to create logical device.")?;

    let families = selection.queue_families;
    // SAFETY: both families were requested with one queue each in `info`.
    let queues = unsafe {
        Queues {
            graphics: device.get_device_queue(families.graphics, 0),
            present: device.get_device_queue(families.present, 0),
        }
    };

    Ok((device, queues))
}
