//! # Instance Module
//!
//! Loads the Vulkan library, checks the requested validation layers and creates the
//! [`Instance`] together with a debug messenger that forwards validation output to [`log`].

use std::borrow::Cow;
use std::collections::HashSet;
use std::ffi::{CStr, c_void};

use anyhow::{Context as _, Result, anyhow};
use log::{debug, error, info, trace, warn};
use raw_window_handle::HasWindowHandle;
use vulkanalia::loader::{LIBRARY, LibloadingLoader};
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::ExtDebugUtilsExtension;
use vulkanalia::window as vk_window;
use vulkanalia::Version;

use crate::config::Config;

/// The Vulkan version that requires portability enumeration on macOS.
const PORTABILITY_MACOS_VERSION: Version = Version::new(1, 3, 216);

/// Loads the system Vulkan library.
pub fn load_entry() -> Result<Entry> {
    // SAFETY: `LIBRARY` names the platform's Vulkan loader.
    let loader = unsafe { LibloadingLoader::new(LIBRARY) }
        .context("Failed to load the Vulkan library.")?;

    // SAFETY: the loader was just created from the system Vulkan library.
    unsafe { Entry::new(loader) }.map_err(|e| anyhow!("Failed to load Vulkan entry points: {e}"))
}

/// Fails if validation is enabled and any configured layer is missing.
fn check_validation_layers(entry: &Entry, config: &Config) -> Result<()> {
    if !config.validation {
        return Ok(());
    }

    // SAFETY: `entry` holds valid global function pointers.
    let available = unsafe { entry.enumerate_instance_layer_properties()? }
        .iter()
        .map(|l| l.layer_name)
        .collect::<HashSet<_>>();

    info!("Requested layers:");
    for layer in &config.validation_layers {
        info!("\t{layer}");
        if !available.contains(layer) {
            return Err(anyhow!(
                "Validation layer `{layer}` requested but not supported."
            ));
        }
    }

    Ok(())
}

/// Creates the instance and, when validation is enabled, the debug messenger. The returned
/// messenger is null otherwise.
pub fn create_instance(
    entry: &Entry,
    window: &dyn HasWindowHandle,
    config: &Config,
) -> Result<(Instance, vk::DebugUtilsMessengerEXT)> {
    check_validation_layers(entry, config)?;

    let application_info = vk::ApplicationInfo::builder()
        .application_name(b"vktriangle\0")
        .application_version(vk::make_version(1, 0, 0))
        .engine_name(b"No Engine\0")
        .engine_version(vk::make_version(1, 0, 0))
        .api_version(vk::make_version(1, 1, 0));

    let layers = config
        .enabled_layers()
        .iter()
        .map(|l| l.as_ptr())
        .collect::<Vec<_>>();

    let mut extensions = vk_window::get_required_instance_extensions(window)
        .iter()
        .map(|e| e.as_ptr())
        .collect::<Vec<_>>();

    if config.validation {
        extensions.push(vk::EXT_DEBUG_UTILS_EXTENSION.name.as_ptr());
    }

    let version = entry.version()?;
    let flags = if cfg!(target_os = "macos") && version >= PORTABILITY_MACOS_VERSION {
        info!("Enabling extensions for macOS portability.");
        extensions.push(vk::KHR_GET_PHYSICAL_DEVICE_PROPERTIES2_EXTENSION.name.as_ptr());
        extensions.push(vk::KHR_PORTABILITY_ENUMERATION_EXTENSION.name.as_ptr());
        vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
    } else {
        vk::InstanceCreateFlags::empty()
    };

    // SAFETY: `entry` holds valid global function pointers.
    let available = unsafe { entry.enumerate_instance_extension_properties(None)? };
    debug!("Available instance extensions:");
    for extension in &available {
        debug!("\t{}", extension.extension_name);
    }

    info!("Required instance extensions:");
    for &extension in &extensions {
        // SAFETY: every pointer comes from a nul-terminated `vk::ExtensionName`.
        info!("\t{}", unsafe { CStr::from_ptr(extension) }.to_string_lossy());
    }

    let mut info = vk::InstanceCreateInfo::builder()
        .application_info(&application_info)
        .enabled_layer_names(&layers)
        .enabled_extension_names(&extensions)
        .flags(flags);

    let mut debug_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(vk::DebugUtilsMessageSeverityFlagsEXT::all())
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .user_callback(Some(debug_callback));

    if config.validation {
        info = info.push_next(&mut debug_info);
    }

    // SAFETY: all pointers in `info` outlive this call.
    let instance = unsafe { entry.create_instance(&info, None) }
        .context("Failed to create Vulkan instance.")?;

    if !config.validation {
        return Ok((instance, vk::DebugUtilsMessengerEXT::null()));
    }

    // SAFETY: the instance was created with `VK_EXT_debug_utils` enabled.
    let created = unsafe { instance.create_debug_utils_messenger_ext(&debug_info, None) };
    let messenger = match created {
        Ok(messenger) => messenger,
        Err(e) => {
            // SAFETY: nothing else has been created from `instance` yet.
            unsafe { instance.destroy_instance(None) };
            return Err(e).context("Failed to register debug messenger.");
        }
    };

    Ok((instance, messenger))
}

/// Forwards validation layer messages to the matching [`log`] level.
extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    type_: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _: *mut c_void,
) -> vk::Bool32 {
    // SAFETY: the driver passes a valid callback data pointer for the duration of the call.
    let data = unsafe { *data };
    let message: Cow<'_, str> = if data.message.is_null() {
        "<no message>".into()
    } else {
        // SAFETY: `message` is a nul-terminated string owned by the driver.
        unsafe { CStr::from_ptr(data.message) }.to_string_lossy()
    };

    if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        error!("({type_:?}) {message}");
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        warn!("({type_:?}) {message}");
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::INFO {
        debug!("({type_:?}) {message}");
    } else {
        trace!("({type_:?}) {message}");
    }

    vk::FALSE
}
