//! # Negotiate Module
//!
//! Picks a physical device and derives the swapchain parameters (present mode, surface format,
//! extent and image count) from what that device reports for the window surface.
//!
//! Everything in here operates on plain snapshots of driver state, see [`DeviceCandidate`] and
//! [`SwapchainSupport`]. Nothing here talks to the driver, so the whole module can be exercised
//! without a GPU.

use std::collections::HashSet;

use log::debug;
use thiserror::Error;
use vulkanalia::prelude::v1_0::*;

use crate::config::NegotiationConfig;

/// Score bonus given to discrete GPUs on top of their maximum 2D image dimension.
pub const DISCRETE_GPU_BONUS: u32 = 100;

/// The surface format used when the surface has no preference, and preferred when available.
pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Failures while negotiating device or swapchain capabilities. All of them are fatal to setup.
#[non_exhaustive]
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationError {
    /// No physical device scored above zero.
    #[error("No suitable physical device found.")]
    NoSuitableDevice,

    /// None of MAILBOX, IMMEDIATE or FIFO is offered by the surface.
    #[error("No supported present mode found.")]
    NoSupportedPresentMode,

    /// The surface reports no formats at all.
    #[error("No supported surface format found.")]
    NoSupportedFormat,
}

/// A single queue family as reported by a physical device, plus whether it can present to the
/// target surface.
#[derive(Clone, Copy, Debug)]
pub struct QueueFamily {
    pub flags: vk::QueueFlags,
    pub queue_count: u32,
    pub present: bool,
}

/// Surface capabilities, formats and present modes of one device for one surface.
#[derive(Clone, Debug, Default)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Snapshot of everything device selection needs to know about one physical device.
#[derive(Clone, Debug)]
pub struct DeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub max_image_dimension_2d: u32,
    pub geometry_shader: bool,
    pub queue_families: Vec<QueueFamily>,
    pub extensions: HashSet<vk::ExtensionName>,
    pub swapchain_support: SwapchainSupport,
}

/// Graphics and present queue family indices. Either may still be unset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

/// A complete queue family selection. `graphics` and `present` may be equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Scans `families` in index order and records the first graphics-capable family and,
    /// independently, the first family that can present. Stops once both are found.
    ///
    /// A family that supports both is not preferred over two separate ones.
    pub fn find(families: &[QueueFamily]) -> Self {
        let mut indices = Self::default();

        for (index, family) in (0u32..).zip(families) {
            if family.queue_count == 0 {
                continue;
            }

            if indices.graphics.is_none() && family.flags.contains(vk::QueueFlags::GRAPHICS) {
                indices.graphics = Some(index);
            }

            if indices.present.is_none() && family.present {
                indices.present = Some(index);
            }

            if indices.is_complete() {
                break;
            }
        }

        indices
    }

    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Returns the resolved selection if both families were found.
    pub fn complete(self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
        })
    }
}

/// Scores a device for the given requirements. Zero means the device is rejected.
pub fn rate(candidate: &DeviceCandidate, config: &NegotiationConfig) -> u32 {
    if !candidate.geometry_shader {
        debug!("`{}` rejected: no geometry shader support.", candidate.name);
        return 0;
    }

    if !QueueFamilyIndices::find(&candidate.queue_families).is_complete() {
        debug!("`{}` rejected: missing graphics or present queue family.", candidate.name);
        return 0;
    }

    if let Some(missing) = config
        .device_extensions
        .iter()
        .find(|&extension| !candidate.extensions.contains(extension))
    {
        debug!("`{}` rejected: missing extension {missing}.", candidate.name);
        return 0;
    }

    let support = &candidate.swapchain_support;
    if support.formats.is_empty() || support.present_modes.is_empty() {
        debug!("`{}` rejected: no surface formats or present modes.", candidate.name);
        return 0;
    }

    let bonus = if candidate.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
        DISCRETE_GPU_BONUS
    } else {
        0
    };

    bonus.saturating_add(candidate.max_image_dimension_2d)
}

/// Selects the highest scoring candidate and returns its position in `candidates` together
/// with its queue families. Among equal scores the last candidate wins.
///
/// # Errors
///
/// - [`NegotiationError::NoSuitableDevice`]
pub fn pick(
    candidates: &[DeviceCandidate],
    config: &NegotiationConfig,
) -> Result<(usize, QueueFamilies), NegotiationError> {
    let (index, _) = candidates
        .iter()
        .map(|candidate| rate(candidate, config))
        .enumerate()
        .filter(|&(_, score)| score > 0)
        .max_by_key(|&(_, score)| score)
        .ok_or(NegotiationError::NoSuitableDevice)?;

    let families = QueueFamilyIndices::find(&candidates[index].queue_families)
        .complete()
        .ok_or(NegotiationError::NoSuitableDevice)?;

    Ok((index, families))
}

/// Prefers MAILBOX, then IMMEDIATE, then FIFO.
///
/// # Errors
///
/// - [`NegotiationError::NoSupportedPresentMode`]
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
) -> Result<vk::PresentModeKHR, NegotiationError> {
    [
        vk::PresentModeKHR::MAILBOX,
        vk::PresentModeKHR::IMMEDIATE,
        vk::PresentModeKHR::FIFO,
    ]
    .into_iter()
    .find(|mode| available.contains(mode))
    .ok_or(NegotiationError::NoSupportedPresentMode)
}

/// Picks [`PREFERRED_SURFACE_FORMAT`] when the surface has no preference or offers it, and the
/// first reported format otherwise.
///
/// # Errors
///
/// - [`NegotiationError::NoSupportedFormat`]
pub fn choose_surface_format(
    available: &[vk::SurfaceFormatKHR],
) -> Result<vk::SurfaceFormatKHR, NegotiationError> {
    if let [only] = available {
        if only.format == vk::Format::UNDEFINED {
            debug!("Surface has no preferred format.");
            return Ok(PREFERRED_SURFACE_FORMAT);
        }
    }

    available
        .iter()
        .find(|f| {
            f.format == PREFERRED_SURFACE_FORMAT.format
                && f.color_space == PREFERRED_SURFACE_FORMAT.color_space
        })
        .or_else(|| available.first())
        .copied()
        .ok_or(NegotiationError::NoSupportedFormat)
}

/// Returns the surface's current extent, or the desired size clamped to the supported range if
/// the surface lets the swapchain decide (`current_extent.width == u32::MAX`).
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;

    vk::Extent2D {
        width: desired_width.clamp(min.width, max.width.max(min.width)),
        height: desired_height.clamp(min.height, max.height.max(min.height)),
    }
}

/// One more than the minimum, capped at the maximum. A maximum of zero means unbounded.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count.saturating_add(1);

    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// Everything swapchain creation needs from negotiation.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainConfig {
    pub present_mode: vk::PresentModeKHR,
    pub surface_format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
}

/// Runs every swapchain selection against `support`, stopping at the first failure.
///
/// # Errors
///
/// - [`NegotiationError::NoSupportedPresentMode`]
/// - [`NegotiationError::NoSupportedFormat`]
pub fn negotiate_swapchain(
    support: &SwapchainSupport,
    desired_width: u32,
    desired_height: u32,
) -> Result<SwapchainConfig, NegotiationError> {
    let present_mode = choose_present_mode(&support.present_modes)?;
    let surface_format = choose_surface_format(&support.formats)?;
    let extent = choose_extent(&support.capabilities, desired_width, desired_height);
    let image_count = choose_image_count(&support.capabilities);

    Ok(SwapchainConfig {
        present_mode,
        surface_format,
        extent,
        image_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, present: bool) -> QueueFamily {
        QueueFamily {
            flags,
            queue_count: 1,
            present,
        }
    }

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn capabilities(
        current: (u32, u32),
        min: (u32, u32),
        max: (u32, u32),
    ) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            ..Default::default()
        }
    }

    fn candidate(
        name: &str,
        device_type: vk::PhysicalDeviceType,
        max_dim: u32,
    ) -> DeviceCandidate {
        DeviceCandidate {
            handle: vk::PhysicalDevice::null(),
            name: name.to_string(),
            device_type,
            max_image_dimension_2d: max_dim,
            geometry_shader: true,
            queue_families: vec![family(vk::QueueFlags::GRAPHICS, true)],
            extensions: NegotiationConfig::default()
                .device_extensions
                .into_iter()
                .collect(),
            swapchain_support: SwapchainSupport {
                capabilities: vk::SurfaceCapabilitiesKHR::default(),
                formats: vec![PREFERRED_SURFACE_FORMAT],
                present_modes: vec![vk::PresentModeKHR::FIFO],
            },
        }
    }

    fn unsuitable(name: &str) -> DeviceCandidate {
        let mut c = candidate(name, vk::PhysicalDeviceType::DISCRETE_GPU, 16384);
        c.geometry_shader = false;
        c
    }

    #[test]
    fn test_rate_discrete_bonus() {
        let config = NegotiationConfig::default();
        let discrete = candidate("discrete", vk::PhysicalDeviceType::DISCRETE_GPU, 8192);
        let integrated = candidate("integrated", vk::PhysicalDeviceType::INTEGRATED_GPU, 8192);

        assert_eq!(rate(&discrete, &config), 8192 + DISCRETE_GPU_BONUS);
        assert_eq!(rate(&integrated, &config), 8192);
    }

    #[test]
    fn test_rate_rejections() {
        let config = NegotiationConfig::default();
        let base = || candidate("gpu", vk::PhysicalDeviceType::DISCRETE_GPU, 4096);

        assert_eq!(rate(&unsuitable("gpu"), &config), 0);

        let mut no_present = base();
        no_present.queue_families = vec![family(vk::QueueFlags::GRAPHICS, false)];
        assert_eq!(rate(&no_present, &config), 0);

        let mut no_swapchain = base();
        no_swapchain.extensions.clear();
        assert_eq!(rate(&no_swapchain, &config), 0);

        let mut no_formats = base();
        no_formats.swapchain_support.formats.clear();
        assert_eq!(rate(&no_formats, &config), 0);

        let mut no_modes = base();
        no_modes.swapchain_support.present_modes.clear();
        assert_eq!(rate(&no_modes, &config), 0);
    }

    #[test]
    fn test_rate_uses_configured_extensions() {
        let config = NegotiationConfig {
            device_extensions: vec![
                vk::KHR_SWAPCHAIN_EXTENSION.name,
                vk::ExtensionName::from_bytes(b"VK_KHR_imaginary"),
            ],
        };
        let gpu = candidate("gpu", vk::PhysicalDeviceType::DISCRETE_GPU, 4096);
        assert_eq!(rate(&gpu, &config), 0);

        let empty = NegotiationConfig {
            device_extensions: Vec::new(),
        };
        let mut bare = gpu.clone();
        bare.extensions.clear();
        assert!(rate(&bare, &empty) > 0);
    }

    #[test]
    fn test_pick_fails_when_all_rejected() {
        let config = NegotiationConfig::default();
        let candidates = vec![unsuitable("a"), unsuitable("b")];

        assert_eq!(
            pick(&candidates, &config),
            Err(NegotiationError::NoSuitableDevice)
        );
        assert_eq!(pick(&[], &config), Err(NegotiationError::NoSuitableDevice));
    }

    #[test]
    fn test_pick_unique_candidate_any_position() {
        let config = NegotiationConfig::default();
        let good = candidate("good", vk::PhysicalDeviceType::INTEGRATED_GPU, 1024);

        for position in 0..3 {
            let mut candidates = vec![unsuitable("x"), unsuitable("y")];
            candidates.insert(position, good.clone());

            let (index, families) = pick(&candidates, &config).unwrap();
            assert_eq!(index, position);
            assert_eq!(candidates[index].name, "good");
            assert_eq!(
                families,
                QueueFamilies {
                    graphics: 0,
                    present: 0
                }
            );
        }
    }

    #[test]
    fn test_pick_highest_score() {
        let config = NegotiationConfig::default();
        let candidates = vec![
            candidate("integrated", vk::PhysicalDeviceType::INTEGRATED_GPU, 16384),
            candidate("discrete", vk::PhysicalDeviceType::DISCRETE_GPU, 16384),
            candidate("small", vk::PhysicalDeviceType::DISCRETE_GPU, 4096),
        ];

        let (index, _) = pick(&candidates, &config).unwrap();
        assert_eq!(candidates[index].name, "discrete");
    }

    #[test]
    fn test_pick_tie_prefers_last() {
        let config = NegotiationConfig::default();
        let candidates = vec![
            candidate("first", vk::PhysicalDeviceType::DISCRETE_GPU, 8192),
            candidate("second", vk::PhysicalDeviceType::DISCRETE_GPU, 8192),
        ];

        let (index, _) = pick(&candidates, &config).unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn test_find_queue_families_split() {
        let families = [
            family(vk::QueueFlags::TRANSFER, false),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, false),
            family(vk::QueueFlags::COMPUTE, true),
            family(vk::QueueFlags::GRAPHICS, true),
        ];

        let indices = QueueFamilyIndices::find(&families);
        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, Some(2));
    }

    #[test]
    fn test_find_queue_families_first_match_wins() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, true),
            family(vk::QueueFlags::GRAPHICS, true),
        ];

        let indices = QueueFamilyIndices::find(&families);
        assert_eq!(
            indices.complete(),
            Some(QueueFamilies {
                graphics: 0,
                present: 0
            })
        );
    }

    #[test]
    fn test_find_queue_families_skips_empty() {
        let families = [
            QueueFamily {
                flags: vk::QueueFlags::GRAPHICS,
                queue_count: 0,
                present: true,
            },
            family(vk::QueueFlags::GRAPHICS, false),
        ];

        let indices = QueueFamilyIndices::find(&families);
        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, None);
        assert!(!indices.is_complete());
        assert_eq!(indices.complete(), None);
    }

    #[test]
    fn test_present_mode_preference() {
        use vulkanalia::vk::PresentModeKHR as M;

        let all = [
            [M::FIFO, M::IMMEDIATE, M::MAILBOX],
            [M::MAILBOX, M::FIFO, M::IMMEDIATE],
            [M::IMMEDIATE, M::MAILBOX, M::FIFO],
        ];
        for modes in all {
            assert_eq!(choose_present_mode(&modes), Ok(M::MAILBOX));
        }

        assert_eq!(choose_present_mode(&[M::FIFO, M::IMMEDIATE]), Ok(M::IMMEDIATE));
        assert_eq!(choose_present_mode(&[M::IMMEDIATE, M::FIFO]), Ok(M::IMMEDIATE));
        assert_eq!(choose_present_mode(&[M::FIFO]), Ok(M::FIFO));
        assert_eq!(
            choose_present_mode(&[]),
            Err(NegotiationError::NoSupportedPresentMode)
        );
        assert_eq!(
            choose_present_mode(&[M::FIFO_RELAXED]),
            Err(NegotiationError::NoSupportedPresentMode)
        );
    }

    #[test]
    fn test_surface_format_undefined() {
        let chosen = choose_surface_format(&[format(
            vk::Format::UNDEFINED,
            vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT,
        )])
        .unwrap();

        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn test_surface_format_preferred_and_fallback() {
        let srgb = vk::ColorSpaceKHR::SRGB_NONLINEAR;
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, srgb),
            format(vk::Format::B8G8R8A8_UNORM, srgb),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);

        let formats = [
            format(vk::Format::R8G8B8A8_SRGB, srgb),
            format(vk::Format::R8G8B8A8_UNORM, srgb),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_SRGB);

        assert_eq!(
            choose_surface_format(&[]).map(|f| f.format),
            Err(NegotiationError::NoSupportedFormat)
        );
    }

    #[test]
    fn test_extent_clamped_when_unbounded() {
        let caps = capabilities((u32::MAX, u32::MAX), (100, 100), (2000, 2000));
        let extent = choose_extent(&caps, 4000, 50);

        assert_eq!((extent.width, extent.height), (2000, 100));
    }

    #[test]
    fn test_extent_fixed_ignores_desired() {
        let caps = capabilities((800, 600), (1, 1), (4096, 4096));

        for (w, h) in [(1, 1), (800, 600), (4000, 50)] {
            let extent = choose_extent(&caps, w, h);
            assert_eq!((extent.width, extent.height), (800, 600));
        }
    }

    #[test]
    fn test_image_count() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&caps), 3);

        caps.max_image_count = 8;
        assert_eq!(choose_image_count(&caps), 3);

        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);
    }

    #[test]
    fn test_negotiate_swapchain() {
        let support = SwapchainSupport {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 1,
                max_image_count: 3,
                ..capabilities((u32::MAX, u32::MAX), (1, 1), (1920, 1080))
            },
            formats: vec![PREFERRED_SURFACE_FORMAT],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        };

        let config = negotiate_swapchain(&support, 480, 270).unwrap();
        assert_eq!(config.present_mode, vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.surface_format.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!((config.extent.width, config.extent.height), (480, 270));
        assert_eq!(config.image_count, 2);

        let no_formats = SwapchainSupport {
            formats: Vec::new(),
            ..support.clone()
        };
        assert_eq!(
            negotiate_swapchain(&no_formats, 480, 270).map(|c| c.image_count),
            Err(NegotiationError::NoSupportedFormat)
        );

        let no_modes = SwapchainSupport {
            present_modes: Vec::new(),
            ..support
        };
        assert_eq!(
            negotiate_swapchain(&no_modes, 480, 270).map(|c| c.image_count),
            Err(NegotiationError::NoSupportedPresentMode)
        );
    }
}
