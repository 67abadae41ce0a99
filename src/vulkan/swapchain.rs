//! # Swapchain Module
//!
//! Negotiates the swapchain parameters for the selected device and creates the swapchain and
//! one color image view per swapchain image.

use anyhow::{Context as _, Result};
use log::{error, info};
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::KhrSwapchainExtension;

use super::device::{self, PhysicalDeviceSelection};
use super::negotiate::{self, QueueFamilies, SwapchainConfig};

pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
}

/// Images are shared concurrently between two families, exclusively owned by one.
fn sharing_mode(families: QueueFamilies) -> (vk::SharingMode, Vec<u32>) {
    if families.graphics != families.present {
        (
            vk::SharingMode::CONCURRENT,
            vec![families.graphics, families.present],
        )
    } else {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    }
}

impl Swapchain {
    /// Creates a swapchain sized as close to `width` x `height` as the surface allows.
    pub fn create(
        instance: &Instance,
        device: &Device,
        surface: vk::SurfaceKHR,
        selection: &PhysicalDeviceSelection,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let support = device::query_swapchain_support(instance, surface, selection.physical_device)?;
        let SwapchainConfig {
            present_mode,
            surface_format,
            extent,
            image_count,
        } = negotiate::negotiate_swapchain(&support, width, height)
            .inspect_err(|e| error!("Failed to negotiate swapchain: {e}"))?;

        info!(
            "Swapchain: {present_mode:?}, {:?}/{:?}, {}x{}, {image_count} images.",
            surface_format.format, surface_format.color_space, extent.width, extent.height
        );

        let (image_sharing_mode, queue_family_indices) = sharing_mode(selection.queue_families);
        if image_sharing_mode == vk::SharingMode::CONCURRENT {
            info!("Graphics and present queues are different, using concurrent mode.");
        } else {
            info!("Graphics and present queues are the same, using exclusive mode.");
        }

        let info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(image_sharing_mode)
            .queue_family_indices(&queue_family_indices)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        // SAFETY: `surface` belongs to `instance` and `device` enables `VK_KHR_swapchain`.
        let handle = unsafe { device.create_swapchain_khr(&info, None) }
            .context("Failed to create swapchain.")?;

        let mut swapchain = Self {
            handle,
            format: surface_format.format,
            extent,
            images: Vec::new(),
            image_views: Vec::new(),
        };

        // Partial results are released by `destroy` on failure.
        if let Err(e) = swapchain.create_image_views(device) {
            swapchain.destroy(device);
            return Err(e);
        }

        Ok(swapchain)
    }

    fn create_image_views(&mut self, device: &Device) -> Result<()> {
        // SAFETY: `self.handle` was created from `device`.
        self.images = unsafe { device.get_swapchain_images_khr(self.handle)? };
        info!("Swapchain has {} images.", self.images.len());

        let components = vk::ComponentMapping::builder()
            .r(vk::ComponentSwizzle::IDENTITY)
            .g(vk::ComponentSwizzle::IDENTITY)
            .b(vk::ComponentSwizzle::IDENTITY)
            .a(vk::ComponentSwizzle::IDENTITY);

        let subresource_range = vk::ImageSubresourceRange::builder()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .base_mip_level(0)
            .level_count(1)
            .base_array_layer(0)
            .layer_count(1);

        for &image in &self.images {
            let info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::_2D)
                .format(self.format)
                .components(components)
                .subresource_range(subresource_range);

            // SAFETY: `image` is owned by the swapchain created from `device`.
            let view = unsafe { device.create_image_view(&info, None) }
                .context("Failed to create swapchain image view.")?;
            self.image_views.push(view);
        }

        Ok(())
    }

    /// Destroys the image views and the swapchain. The device must be idle.
    pub fn destroy(&mut self, device: &Device) {
        // SAFETY: every handle was created from `device` and is no longer in use.
        unsafe {
            for view in self.image_views.drain(..) {
                device.destroy_image_view(view, None);
            }
            device.destroy_swapchain_khr(self.handle, None);
        }
        self.images.clear();
        self.handle = vk::SwapchainKHR::null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sharing_mode_exclusive() {
        let (mode, indices) = sharing_mode(QueueFamilies {
            graphics: 0,
            present: 0,
        });
        assert_eq!(mode, vk::SharingMode::EXCLUSIVE);
        assert!(indices.is_empty());
    }

    #[test]
    fn test_sharing_mode_concurrent() {
        let (mode, indices) = sharing_mode(QueueFamilies {
            graphics: 0,
            present: 1,
        });
        assert_eq!(mode, vk::SharingMode::CONCURRENT);
        assert_eq!(indices, vec![0, 1]);
    }
}
