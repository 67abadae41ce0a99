//! # Config Module
//!
//! Application settings passed explicitly into window and Vulkan setup instead of living in
//! globals.

use vulkanalia::vk;

/// The Khronos validation layer, enabled by default in debug builds.
pub const KHRONOS_VALIDATION_LAYER: vk::ExtensionName =
    vk::ExtensionName::from_bytes(b"VK_LAYER_KHRONOS_validation");

#[derive(Clone, Debug)]
pub struct Config {
    /// Title of the window.
    pub title: String,
    /// Requested inner width of the window, in physical pixels.
    pub width: u32,
    /// Requested inner height of the window, in physical pixels.
    pub height: u32,
    /// Whether the validation layers and debug messenger are enabled.
    pub validation: bool,
    /// Instance layers enabled when `validation` is set.
    pub validation_layers: Vec<vk::ExtensionName>,
    /// Requirements for physical device selection.
    pub negotiation: NegotiationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            title: String::from("Vk"),
            // A quarter of 1920x1080.
            width: 480,
            height: 270,
            validation: cfg!(debug_assertions),
            validation_layers: vec![KHRONOS_VALIDATION_LAYER],
            negotiation: NegotiationConfig::default(),
        }
    }
}

impl Config {
    /// Layers to enable on the instance and device, empty unless validation is on.
    pub fn enabled_layers(&self) -> &[vk::ExtensionName] {
        if self.validation {
            self.validation_layers.as_slice()
        } else {
            &[]
        }
    }
}

/// What a physical device must support to be considered at all.
#[derive(Clone, Debug)]
pub struct NegotiationConfig {
    /// Device extensions that must be present, and are enabled on the logical device.
    pub device_extensions: Vec<vk::ExtensionName>,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            device_extensions: vec![vk::KHR_SWAPCHAIN_EXTENSION.name],
        }
    }
}
