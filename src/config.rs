// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section falls back to defaults field by field, so a partial file (or
// no file at all) still yields a usable configuration.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::backend::sync::WaitTimeout;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub shaders: ShaderConfig,
}

/// Window settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Frame Loop Renderer".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub clear_depth: f32,
    pub frames_in_flight: usize,
    /// Absent means fence and idle waits never time out.
    pub fence_timeout_ms: Option<u64>,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "immediate".to_string(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            clear_depth: 1.0,
            frames_in_flight: 2,
            fence_timeout_ms: None,
        }
    }
}

/// Debug settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
    pub watch_config: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "renderer.log".to_string(),
            show_fps: true,
            watch_config: true,
        }
    }
}

/// Compiled SPIR-V locations
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/scene.vert.spv"),
            fragment: PathBuf::from("shaders/scene.frag.spv"),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path(DEFAULT_CONFIG_PATH).unwrap_or_else(|e| {
            log::warn!("Failed to load {}: {:#}. Using defaults.", DEFAULT_CONFIG_PATH, e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Preferred present mode; the swapchain still falls back to FIFO when
    /// the surface does not offer it.
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            other => {
                log::warn!("Unknown present mode '{}', defaulting to FIFO", other);
                vk::PresentModeKHR::FIFO
            }
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        self.graphics.frames_in_flight.max(1)
    }

    pub fn fence_timeout(&self) -> WaitTimeout {
        WaitTimeout::from_millis(self.graphics.fence_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.frames_in_flight(), 2);
        assert_eq!(config.fence_timeout(), WaitTimeout::INFINITE);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [graphics]
            present_mode = "mailbox"
            fence_timeout_ms = 500

            [shaders]
            vertex = "custom.vert.spv"
            "#,
        )
        .unwrap();

        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.fence_timeout(), WaitTimeout::from_millis(Some(500)));
        assert_eq!(config.graphics.clear_depth, 1.0);
        assert_eq!(config.shaders.vertex, PathBuf::from("custom.vert.spv"));
        assert_eq!(config.shaders.fragment, ShaderConfig::default().fragment);
        assert_eq!(config.window, WindowConfig::default());
    }

    #[test]
    fn present_mode_names_are_case_insensitive() {
        let mut config = Config::default();
        config.graphics.present_mode = "FIFO_Relaxed".to_string();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO_RELAXED);
        config.graphics.present_mode = "Immediate".to_string();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::IMMEDIATE);
    }

    #[test]
    fn unknown_present_mode_falls_back_to_fifo() {
        let mut config = Config::default();
        config.graphics.present_mode = "vsync-please".to_string();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn zero_frames_in_flight_is_clamped() {
        let config = Config::parse("[graphics]\nframes_in_flight = 0\n").unwrap();
        assert_eq!(config.frames_in_flight(), 1);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(Config::parse("[graphics\npresent_mode = 3").is_err());
        assert!(Config::parse("[graphics]\nclear_color = \"red\"").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = Config::load_from_path("definitely/not/here.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn shipped_config_parses() {
        let config = Config::load_from_path(concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml")).unwrap();
        assert_eq!(config.frames_in_flight(), 2);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::IMMEDIATE);
    }
}
