// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section falls back to defaults field by field, so a partial file is
// fine. A missing file means all defaults.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
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
            title: "Quad Renderer".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
    pub depth_stencil: bool,
    pub depth_stencil_samples: u32,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "fifo".to_string(),
            clear_color: [0.08, 0.08, 0.1, 1.0],
            max_frames_in_flight: 2,
            depth_stencil: true,
            depth_stencil_samples: 1,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_level: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
            show_fps: true,
        }
    }
}

impl Config {
    /// Load `config.toml` from the working directory, falling back to
    /// defaults on any error.
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
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

        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config =
            Self::from_toml_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Present mode as a Vulkan enum
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::FIFO
            }
        }
    }

    /// Depth/stencil sample count as a Vulkan flag
    pub fn depth_stencil_samples(&self) -> vk::SampleCountFlags {
        match self.graphics.depth_stencil_samples {
            1 => vk::SampleCountFlags::TYPE_1,
            2 => vk::SampleCountFlags::TYPE_2,
            4 => vk::SampleCountFlags::TYPE_4,
            8 => vk::SampleCountFlags::TYPE_8,
            16 => vk::SampleCountFlags::TYPE_16,
            32 => vk::SampleCountFlags::TYPE_32,
            64 => vk::SampleCountFlags::TYPE_64,
            other => {
                log::warn!("Invalid depth/stencil sample count {}, using 1", other);
                vk::SampleCountFlags::TYPE_1
            }
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        self.graphics.max_frames_in_flight.max(1)
    }

    pub fn log_level(&self) -> log::LevelFilter {
        self.debug.log_level.parse().unwrap_or_else(|_| {
            log::warn!("Unknown log level '{}', using info", self.debug.log_level);
            log::LevelFilter::Info
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [window]
            title = "Demo"

            [graphics]
            present_mode = "mailbox"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.title, "Demo");
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert!(config.graphics.depth_stencil);
        assert_eq!(config.frames_in_flight(), 2);
    }

    #[test]
    fn conversions_fall_back() {
        let mut config = Config::default();
        config.graphics.present_mode = "vsync-ish".to_string();
        config.graphics.depth_stencil_samples = 3;
        config.debug.log_level = "loud".to_string();

        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);
        assert_eq!(config.depth_stencil_samples(), vk::SampleCountFlags::TYPE_1);
        assert_eq!(config.log_level(), log::LevelFilter::Info);

        config.graphics.depth_stencil_samples = 4;
        config.debug.log_level = "debug".to_string();
        assert_eq!(config.depth_stencil_samples(), vk::SampleCountFlags::TYPE_4);
        assert_eq!(config.log_level(), log::LevelFilter::Debug);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(Config::from_toml_str("[window\nwidth = ").is_err());
    }

    #[test]
    fn missing_file_means_defaults() {
        let config = Config::load_from_path("does/not/exist.toml").unwrap();
        assert_eq!(config.window.height, 720);
    }
}
