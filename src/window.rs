//! # Window Module
//!
//! The `window` module uses [`winit`] to create the application window and poll events from the
//! user and OS. Once the window exists, its [`raw_window_handle`] handles are passed to the
//! Vulkan [`Context`], which lives exactly as long as the event loop.

use log::{debug, error, info};
use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use thiserror::Error;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    error::OsError,
    event::WindowEvent,
    event_loop::ActiveEventLoop,
    window::{Window as WinitWindow, WindowId},
};

use crate::config::Config;
use crate::vulkan::Context;

/// Custom error types for winit and raw-window-handle.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum WindowError {
    /// Caller attempted to reference the winit window before it was created.
    #[error("Window has not been created yet.")]
    NotInitialized,

    /// raw-window-handle failed to retrieve the window or display handle.
    #[error(transparent)]
    BadHandle(#[from] HandleError),

    /// The OS refused to create the window.
    #[error(transparent)]
    Os(#[from] OsError),
}

pub struct Window {
    /// The winit window object
    inner: Option<WinitWindow>,
    config: Config,
    /// Created once the window exists, destroyed when the event loop exits.
    context: Option<Context>,
    /// The first fatal setup error, handed back to `main` after the event loop stops.
    error: Option<anyhow::Error>,
}

impl Window {
    pub fn new(config: Config) -> Self {
        Self {
            inner: None,
            config,
            context: None,
            error: None,
        }
    }

    /// Gets a reference to the winit window object.
    ///
    /// # Errors
    ///
    /// - [`WindowError::NotInitialized`]
    pub fn window(&self) -> Result<&WinitWindow, WindowError> {
        self.inner.as_ref().ok_or(WindowError::NotInitialized)
    }

    /// Gets the native [`WindowHandle`] from the winit window. The lifetime of WindowHandle is
    /// guaranteed to be valid as long as `&self` is valid.
    ///
    /// # Errors
    ///
    /// - [`WindowError::NotInitialized`]
    /// - [`WindowError::BadHandle`]
    pub fn window_handle(&self) -> Result<WindowHandle<'_>, WindowError> {
        Ok(self.window()?.window_handle()?)
    }

    /// Gets the native [`DisplayHandle`] from the winit window. The lifetime of DisplayHandle is
    /// guaranteed to be valid as long as `&self` is valid.
    ///
    /// # Errors
    ///
    /// - [`WindowError::NotInitialized`]
    /// - [`WindowError::BadHandle`]
    pub fn display_handle(&self) -> Result<DisplayHandle<'_>, WindowError> {
        Ok(self.window()?.display_handle()?)
    }

    /// Consumes the application and returns the fatal setup error, if any occurred.
    pub fn into_result(self) -> anyhow::Result<()> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Creates the winit window and the Vulkan context for it.
    fn init(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        // Resizing is not handled, so the swapchain extent stays valid.
        let attributes = WinitWindow::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height))
            .with_resizable(false);

        let window = event_loop
            .create_window(attributes)
            .map_err(WindowError::from)?;
        self.inner = Some(window);

        let size = self.window()?.inner_size();
        debug!("Window created with inner size {}x{}.", size.width, size.height);

        let context = Context::create(
            &self.display_handle()?,
            &self.window_handle()?,
            size.width,
            size.height,
            &self.config,
        )?;

        let extent = context.swapchain().extent;
        info!(
            "Rendering on `{}` at {}x{}.",
            context.device_name(),
            extent.width,
            extent.height
        );

        self.context = Some(context);
        Ok(())
    }
}

impl ApplicationHandler for Window {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.inner.is_some() {
            return;
        }

        if let Err(e) = self.init(event_loop) {
            error!("Setup failed: {e:#}");
            self.error = Some(e);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("The close button was pressed; stopping");
                event_loop.exit();
            }
            _ => (),
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut context) = self.context.take() {
            context.destroy();
        }
    }
}
