// =============================================================================
// WINDOW - winit driven in pump mode
// =============================================================================
//
// The frame loop owns control flow, so instead of handing it to
// `EventLoop::run_app` we pump events ourselves: a zero timeout polls, no
// timeout blocks until something happens (used while minimized).

use anyhow::{bail, Result};
use ash::vk;
use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use std::time::Duration;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Fullscreen, Window, WindowAttributes, WindowId},
};

use crate::config::WindowConfig;
use crate::frame::WindowSurface;

/// Event handler state, separate from the event loop so both can be
/// borrowed while pumping.
struct WindowState {
    attributes: WindowAttributes,
    window: Option<Window>,
    is_fullscreen: bool,
    resized: bool,
    close_requested: bool,
    creation_failed: bool,
}

impl WindowState {
    fn toggle_fullscreen(&mut self) {
        let Some(window) = self.window.as_ref() else {
            return;
        };

        self.is_fullscreen = !self.is_fullscreen;
        if self.is_fullscreen {
            window.set_fullscreen(Some(Fullscreen::Borderless(None)));
            log::info!("Entered fullscreen mode");
        } else {
            window.set_fullscreen(None);
            log::info!("Exited fullscreen mode");
        }
        self.resized = true;
    }
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        match event_loop.create_window(self.attributes.clone()) {
            Ok(window) => self.window = Some(window),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                self.creation_failed = true;
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.close_requested = true;
                event_loop.exit();
            }

            // Zero sizes included: the frame loop waits out minimization
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.resized = true;
            }

            WindowEvent::KeyboardInput { event, .. } if event.state.is_pressed() => {
                match event.physical_key {
                    PhysicalKey::Code(KeyCode::Escape) => {
                        log::info!("ESC pressed, exiting...");
                        self.close_requested = true;
                        event_loop.exit();
                    }
                    PhysicalKey::Code(KeyCode::F11) if !event.repeat => self.toggle_fullscreen(),
                    _ => {}
                }
            }

            _ => {}
        }
    }
}

pub struct AppWindow {
    event_loop: EventLoop<()>,
    state: WindowState,
}

impl AppWindow {
    /// Create the event loop and pump until the window exists.
    pub fn new(config: &WindowConfig) -> Result<Self> {
        let event_loop = EventLoop::new()?;

        let mut attributes = WindowAttributes::default()
            .with_title(config.title.clone())
            .with_inner_size(winit::dpi::PhysicalSize::new(config.width, config.height));
        if config.fullscreen {
            attributes = attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let mut this = Self {
            event_loop,
            state: WindowState {
                attributes,
                window: None,
                is_fullscreen: config.fullscreen,
                resized: false,
                close_requested: false,
                creation_failed: false,
            },
        };

        while this.state.window.is_none() {
            if this.state.creation_failed || this.state.close_requested {
                bail!("Window could not be created");
            }
            this.pump(Some(Duration::ZERO));
        }
        // Creation itself reports a resize on some platforms
        this.state.resized = false;

        log::info!(
            "Window: {}x{} ({})",
            config.width,
            config.height,
            if config.fullscreen { "fullscreen" } else { "windowed" }
        );
        Ok(this)
    }

    pub fn set_title(&self, title: &str) {
        if let Some(window) = self.state.window.as_ref() {
            window.set_title(title);
        }
    }

    pub fn is_fullscreen(&self) -> bool {
        self.state.is_fullscreen
    }

    fn pump(&mut self, timeout: Option<Duration>) {
        let status = self.event_loop.pump_app_events(timeout, &mut self.state);
        if let PumpStatus::Exit(code) = status {
            log::debug!("Event loop exited with code {}", code);
            self.state.close_requested = true;
        }
    }
}

impl WindowSurface for AppWindow {
    fn current_extent(&self) -> vk::Extent2D {
        let Some(window) = self.state.window.as_ref() else {
            return vk::Extent2D::default();
        };
        // Some platforms keep reporting the restored size while minimized
        if window.is_minimized() == Some(true) {
            return vk::Extent2D::default();
        }
        let size = window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }

    fn should_close(&self) -> bool {
        self.state.close_requested
    }

    fn poll_events(&mut self) {
        self.pump(Some(Duration::ZERO));
    }

    fn wait_events(&mut self) {
        self.pump(None);
    }

    fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.state.resized)
    }
}

impl HasWindowHandle for AppWindow {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.state
            .window
            .as_ref()
            .ok_or(HandleError::Unavailable)?
            .window_handle()
    }
}

impl HasDisplayHandle for AppWindow {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.state
            .window
            .as_ref()
            .ok_or(HandleError::Unavailable)?
            .display_handle()
    }
}
