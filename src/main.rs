//! # vktriangle
//!
//! This binary uses [`winit`] for cross-platform window management, and [`vulkanalia`] for FFI
//! to the Vulkan API. It stands up a Vulkan context for a single window: the physical device,
//! present mode, surface format and swapchain extent are negotiated from what the driver
//! reports for the window surface.
//!
//! Logging goes through [`log`] and is filtered with `RUST_LOG` (default `info`).

mod config;
mod vulkan;
mod window;

use config::Config;
use log::{LevelFilter, info};
use window::Window;
use winit::event_loop::{ControlFlow, EventLoop};

fn main() -> anyhow::Result<()> {
    pretty_env_logger::formatted_builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let mut window = Window::new(Config::default());
    let event_loop = EventLoop::new()?;

    // Nothing is drawn per frame, so only wake up for events.
    event_loop.set_control_flow(ControlFlow::Wait);
    event_loop.run_app(&mut window)?;

    info!("Event loop finished, preparing to exit.");
    window.into_result()
}
