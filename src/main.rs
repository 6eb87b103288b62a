// =============================================================================
// FRAME LOOP RENDERER
// =============================================================================
//
// A spinning cube drawn through a fixed ring of frames in flight, with the
// swapchain rebuilt whenever the window or the driver says it is stale.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  main (config, logging, hot reload, FPS title)                  │
// │    └── FrameLoop (tick / recreate state machine)                │
// │          ├── AppWindow (winit, pumped)                          │
// │          └── VulkanRenderer (FrameBackend)                      │
// │                ├── FrameSlotSet (fences, semaphores)            │
// │                ├── Swapchain (one surface generation)           │
// │                └── DependentResourceChain (pass, fbs, pipeline) │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Wait for the slot's fence
// 2. Acquire swapchain image
// 3. Reset fence, update uniforms, record
// 4. Submit, present
// 5. Advance to next slot (or recreate when stale)
//
// =============================================================================

mod backend;
mod config;
mod error;
mod frame;
mod renderer;
mod scene;
mod watcher;
mod window;

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::time::Instant;

use backend::surface::Surface;
use backend::VulkanDevice;
use config::{Config, DEFAULT_CONFIG_PATH};
use backend::sync::WaitTimeout;
use frame::{FrameLoop, WindowSurface};
use renderer::VulkanRenderer;
use watcher::ConfigWatcher;
use window::AppWindow;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting frame loop renderer");
    log::info!("Present mode: {}", config.graphics.present_mode);

    if let Err(e) = run(config) {
        log::error!("Renderer stopped: {:#}", e);
        return Err(e);
    }
    log::info!("Exited cleanly");
    Ok(())
}

/// `Info` unless RUST_LOG says otherwise; optionally written to a file.
fn init_logging(config: &Config) {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();

    let mut file_error = None;
    if config.debug.log_to_file {
        match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => file_error = Some(e),
        }
    }

    builder.init();

    if let Some(e) = file_error {
        log::warn!(
            "Could not open log file {}: {}. Logging to stderr.",
            config.debug.log_file,
            e
        );
    }
}

// =============================================================================
// APPLICATION
// =============================================================================

fn run(config: Config) -> Result<()> {
    let mut window = AppWindow::new(&config.window)?;

    // Validation only in debug builds, and only if the config asks for it
    let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
    let device = VulkanDevice::new(&config.window.title, enable_validation)?;
    let surface = Surface::new(device.clone(), &window).context("Failed to create window surface")?;
    let mut renderer = VulkanRenderer::new(device, surface, window.current_extent(), &config)?;

    let watcher = if config.debug.watch_config {
        match ConfigWatcher::new(DEFAULT_CONFIG_PATH) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                log::warn!("Config hot reload disabled: {:#}", e);
                None
            }
        }
    } else {
        None
    };

    let timeout = config.fence_timeout();
    if timeout == WaitTimeout::INFINITE {
        log::info!("GPU waits are unbounded");
    } else {
        log::info!("GPU wait timeout: {:?}", timeout.duration());
    }
    let mut frames = FrameLoop::new(&renderer, timeout)?;
    let mut fps = FpsCounter::new();
    let mut config = config;

    let result = frames.run(&mut renderer, &mut window, |frames, renderer, window| {
        if let Some(reloaded) = watcher.as_ref().and_then(ConfigWatcher::poll) {
            apply_config(&reloaded, frames, renderer);
            config = reloaded;
        }

        if config.debug.show_fps {
            if let Some((rate, frame_ms)) = fps.update(frames.frames_presented()) {
                let mode = if window.is_fullscreen() { "fullscreen" } else { "windowed" };
                let present = renderer
                    .present_mode()
                    .map(|m| format!("{:?}", m))
                    .unwrap_or_default();
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{}, {}, {} rebuilds]",
                    config.window.title,
                    rate,
                    frame_ms,
                    mode,
                    present,
                    frames.recreations()
                ));
            }
        }
    });

    log::info!(
        "Frame loop stopped after {} frames, {} recreations",
        frames.frames_presented(),
        frames.recreations()
    );
    result.with_context(|| {
        format!(
            "Frame loop failed while {:?} on slot {} (surface stale: {})",
            frames.state(),
            frames.current_slot(),
            frames.is_surface_stale()
        )
    })
}

/// Clear color takes effect on the next recorded frame; a present mode
/// change needs a new swapchain.
fn apply_config(config: &Config, frames: &mut FrameLoop, renderer: &mut VulkanRenderer) {
    log::info!("Config reloaded");
    renderer.set_clear_color(config.graphics.clear_color);

    let present_mode = config.present_mode();
    if renderer.set_preferred_present_mode(present_mode) {
        log::info!("Present mode changed to {:?}, recreating swapchain", present_mode);
        frames.mark_surface_stale();
    }
}

// =============================================================================
// FPS TRACKING
// =============================================================================

struct FpsCounter {
    last_update: Instant,
    frames_at_update: u64,
}

impl FpsCounter {
    fn new() -> Self {
        Self {
            last_update: Instant::now(),
            frames_at_update: 0,
        }
    }

    /// Frames per second and average frame time, once per second.
    fn update(&mut self, frames_presented: u64) -> Option<(f32, f32)> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f32();
        if elapsed < 1.0 {
            return None;
        }

        let frames = frames_presented.saturating_sub(self.frames_at_update);
        self.last_update = now;
        self.frames_at_update = frames_presented;

        let rate = frames as f32 / elapsed;
        let frame_ms = if frames > 0 {
            elapsed * 1000.0 / frames as f32
        } else {
            0.0
        };
        Some((rate, frame_ms))
    }
}
