//! # Vulkan Module
//!
//! Stands up the Vulkan context for a window: instance, debug messenger, surface, physical and
//! logical device, queues and swapchain. Device and swapchain parameters are chosen by the
//! [`negotiate`] module.

pub mod device;
pub mod instance;
pub mod negotiate;
pub mod swapchain;

use anyhow::{Context as _, Result};
use log::{info, warn};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::{ExtDebugUtilsExtension, KhrSurfaceExtension};
use vulkanalia::window as vk_window;

use crate::config::Config;
use device::{PhysicalDeviceSelection, Queues};
use swapchain::Swapchain;

/// Every Vulkan object owned by the application. Must be torn down with [`Context::destroy`].
pub struct Context {
    // Keeps the loaded library alive for as long as the instance.
    _entry: Entry,
    instance: Instance,
    messenger: vk::DebugUtilsMessengerEXT,
    surface: vk::SurfaceKHR,
    selection: PhysicalDeviceSelection,
    device: Device,
    queues: Queues,
    swapchain: Swapchain,
}

impl Context {
    /// Runs every setup stage in order. Objects created before a failing stage are released
    /// before the error is returned.
    pub fn create(
        display: &dyn HasDisplayHandle,
        window: &dyn HasWindowHandle,
        width: u32,
        height: u32,
        config: &Config,
    ) -> Result<Self> {
        let entry = instance::load_entry()?;
        let (instance, messenger) = instance::create_instance(&entry, window, config)?;

        let mut partial = Partial {
            instance: &instance,
            messenger,
            surface: vk::SurfaceKHR::null(),
            device: None,
            finished: false,
        };

        // SAFETY: the display and window handles outlive the surface, which is destroyed in
        // `Context::destroy` before the window is dropped.
        partial.surface = unsafe { vk_window::create_surface(&instance, display, window) }
            .context("Failed to create window surface.")?;
        let surface = partial.surface;

        let selection = device::pick_physical_device(&instance, surface, &config.negotiation)?;
        let (device, queues) = device::create_logical_device(&instance, &selection, config)?;
        let device = partial.device.insert(device);

        let swapchain = Swapchain::create(&instance, device, surface, &selection, width, height)?;

        let device = partial.finish().context("Logical device missing.")?;

        info!("Vulkan context ready on `{}`.", selection.name);

        Ok(Self {
            _entry: entry,
            instance,
            messenger,
            surface,
            selection,
            device,
            queues,
            swapchain,
        })
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn device_name(&self) -> &str {
        &self.selection.name
    }

    /// Releases everything in reverse creation order.
    pub fn destroy(&mut self) {
        // SAFETY: no other thread uses these objects, and each is destroyed exactly once in
        // reverse creation order.
        unsafe {
            for queue in [self.queues.graphics, self.queues.present] {
                if let Err(e) = self.device.queue_wait_idle(queue) {
                    warn!("Failed to wait for queue before teardown: {e}");
                }
            }
            self.swapchain.destroy(&self.device);
            self.device.destroy_device(None);
            self.instance.destroy_surface_khr(self.surface, None);
            if !self.messenger.is_null() {
                self.instance
                    .destroy_debug_utils_messenger_ext(self.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan context destroyed.");
    }
}

/// Objects created so far by [`Context::create`], released on drop if setup bails out early.
struct Partial<'a> {
    instance: &'a Instance,
    messenger: vk::DebugUtilsMessengerEXT,
    surface: vk::SurfaceKHR,
    device: Option<Device>,
    finished: bool,
}

impl Partial<'_> {
    /// Hands ownership over to the caller, nothing is released on drop afterwards.
    fn finish(mut self) -> Option<Device> {
        self.finished = true;
        self.device.take()
    }
}

impl Drop for Partial<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        // SAFETY: every handle here was created from `self.instance` and is not yet shared.
        unsafe {
            if let Some(device) = self.device.take() {
                device.destroy_device(None);
            }
            if !self.surface.is_null() {
                self.instance.destroy_surface_khr(self.surface, None);
            }
            if !self.messenger.is_null() {
                self.instance
                    .destroy_debug_utils_messenger_ext(self.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}
