// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::scene::lights::MAX_LIGHTS;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub output: OutputConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub run: RunConfig,
    pub samples: SamplesConfig,
}

/// Offscreen output settings (there is no window; every sample renders
/// into an image of this size)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub width: u32,
    pub height: u32,
    pub capture: bool,
    pub capture_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            capture: false,
            capture_dir: PathBuf::from("captures"),
        }
    }
}

/// Graphics settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub clear_color: [f32; 4],
    pub frames_in_flight: usize,
    pub msaa_samples: u32,
    pub anisotropy: f32,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.02, 0.02, 0.03, 1.0],
            frames_in_flight: 2,
            msaa_samples: 4,
            anisotropy: 8.0,
        }
    }
}

/// Debug settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: PathBuf,
    pub log_level: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: PathBuf::from("vk_samples.log"),
            log_level: "info".to_string(),
        }
    }
}

/// Which samples to run and for how long
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Sample names; empty runs every registered sample
    pub samples: Vec<String>,
    pub frames: u32,
    /// Animate from the frame index instead of wall-clock time, so captures
    /// are reproducible
    pub fixed_timestep: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            samples: Vec::new(),
            frames: 120,
            fixed_timestep: true,
        }
    }
}

/// Per-sample tunables
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SamplesConfig {
    pub offscreen_size: u32,
    pub cubemap_size: u32,
    pub light_count: usize,
    pub toon_bands: f32,
    pub tessellation_level: f32,
    pub tessellation_wireframe: bool,
}

impl Default for SamplesConfig {
    fn default() -> Self {
        Self {
            offscreen_size: 512,
            cubemap_size: 512,
            light_count: MAX_LIGHTS,
            toon_bands: 4.0,
            tessellation_level: 3.0,
            tessellation_wireframe: true,
        }
    }
}

/// Configuration plus what loading it had to say. Loading happens before
/// the logger exists, so messages are kept and logged afterwards.
#[derive(Debug)]
pub struct Loaded {
    pub config: Config,
    pub notes: Vec<(log::Level, String)>,
}

impl Loaded {
    fn new(config: Config) -> Self {
        Self {
            config,
            notes: Vec::new(),
        }
    }

    fn note(mut self, level: log::Level, message: String) -> Self {
        self.notes.push((level, message));
        self
    }

    /// Emit the kept messages; call once logging is up
    pub fn log(&self) {
        for (level, message) in &self.notes {
            log::log!(*level, "{}", message);
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults on errors
    pub fn load<P: AsRef<Path>>(path: P) -> Loaded {
        let path = path.as_ref();
        Self::load_from_path(path).unwrap_or_else(|e| {
            Loaded::new(Config::default()).note(
                log::Level::Warn,
                format!("Failed to load {:?}: {:#}. Using defaults.", path, e),
            )
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Loaded> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Loaded::new(Config::default()).note(
                log::Level::Info,
                format!("Config file not found at {:?}, using defaults", path),
            ));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        let debug = format!("Config: {:?}", config);
        Ok(Loaded::new(config)
            .note(log::Level::Info, format!("Loaded configuration from {:?}", path))
            .note(log::Level::Debug, debug))
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no sample can run with
    pub fn validate(&self) -> Result<()> {
        if self.output.width == 0 || self.output.height == 0 {
            anyhow::bail!(
                "Output size must be non-zero, got {}x{}",
                self.output.width,
                self.output.height
            );
        }
        if self.run.frames == 0 {
            anyhow::bail!("run.frames must be at least 1");
        }
        if self.graphics.frames_in_flight == 0 {
            anyhow::bail!("graphics.frames_in_flight must be at least 1");
        }
        if self.samples.light_count > MAX_LIGHTS {
            anyhow::bail!(
                "samples.light_count is {}, at most {} lights are supported",
                self.samples.light_count,
                MAX_LIGHTS
            );
        }
        if self.samples.offscreen_size == 0 || self.samples.cubemap_size == 0 {
            anyhow::bail!("Offscreen and cubemap sizes must be non-zero");
        }
        Ok(())
    }

    /// Output extent as Vulkan struct
    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.output.width,
            height: self.output.height,
        }
    }

    /// Get requested MSAA sample count as Vulkan flags
    pub fn msaa_sample_flags(&self) -> vk::SampleCountFlags {
        sample_count_flags(self.graphics.msaa_samples).unwrap_or_else(|| {
            log::warn!(
                "Unsupported MSAA sample count {}, defaulting to 4",
                self.graphics.msaa_samples
            );
            vk::SampleCountFlags::TYPE_4
        })
    }

    /// Get log level as `log` filter; `None` for unknown names
    pub fn log_level_filter(&self) -> Option<log::LevelFilter> {
        match self.debug.log_level.to_lowercase().as_str() {
            "off" => Some(log::LevelFilter::Off),
            "error" => Some(log::LevelFilter::Error),
            "warn" => Some(log::LevelFilter::Warn),
            "info" => Some(log::LevelFilter::Info),
            "debug" => Some(log::LevelFilter::Debug),
            "trace" => Some(log::LevelFilter::Trace),
            _ => None,
        }
    }
}

/// Map a plain sample count to its Vulkan flag
pub fn sample_count_flags(samples: u32) -> Option<vk::SampleCountFlags> {
    match samples {
        1 => Some(vk::SampleCountFlags::TYPE_1),
        2 => Some(vk::SampleCountFlags::TYPE_2),
        4 => Some(vk::SampleCountFlags::TYPE_4),
        8 => Some(vk::SampleCountFlags::TYPE_8),
        16 => Some(vk::SampleCountFlags::TYPE_16),
        32 => Some(vk::SampleCountFlags::TYPE_32),
        64 => Some(vk::SampleCountFlags::TYPE_64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.output.width, 1280);
        assert_eq!(config.output.height, 720);
        assert_eq!(config.graphics.frames_in_flight, 2);
        assert!(config.run.samples.is_empty());
        assert!(config.run.fixed_timestep);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = Config::parse(
            r#"
            [output]
            width = 640

            [run]
            samples = ["deferred", "cubemap"]
            frames = 10

            [samples]
            tessellation_level = 6.0
            "#,
        )
        .unwrap();

        assert_eq!(config.output.width, 640);
        assert_eq!(config.output.height, 720);
        assert_eq!(config.run.samples, vec!["deferred", "cubemap"]);
        assert_eq!(config.run.frames, 10);
        assert_eq!(config.samples.tessellation_level, 6.0);
        assert_eq!(config.samples.cubemap_size, 512);
    }

    #[test]
    fn zero_extent_is_rejected() {
        let err = Config::parse("[output]\nheight = 0\n").unwrap_err();
        assert!(err.to_string().contains("non-zero"));
    }

    #[test]
    fn zero_frames_are_rejected() {
        let err = Config::parse("[run]\nframes = 0\n").unwrap_err();
        assert!(err.to_string().contains("run.frames"));

        let mut config = Config::default();
        config.run.frames = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn too_many_lights_are_rejected() {
        let toml = format!("[samples]\nlight_count = {}\n", MAX_LIGHTS + 1);
        assert!(Config::parse(&toml).is_err());
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(Config::parse("[output\nwidth = ").is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let loaded = Config::load_from_path("definitely/not/here/config.toml").unwrap();
        assert_eq!(loaded.config.graphics.msaa_samples, 4);
        assert_eq!(loaded.notes.len(), 1);
        assert_eq!(loaded.notes[0].0, log::Level::Info);
    }

    #[test]
    fn malformed_file_keeps_a_warning() {
        let path = std::env::temp_dir().join(format!("vk-samples-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "[output\nwidth = ").unwrap();
        let loaded = Config::load(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded.config.output.width, 1280);
        assert_eq!(loaded.notes.len(), 1);
        assert_eq!(loaded.notes[0].0, log::Level::Warn);
        assert!(loaded.notes[0].1.contains("Using defaults"));
    }

    #[test]
    fn msaa_flags_fall_back_on_invalid_counts() {
        let mut config = Config::default();
        config.graphics.msaa_samples = 8;
        assert_eq!(config.msaa_sample_flags(), vk::SampleCountFlags::TYPE_8);
        config.graphics.msaa_samples = 3;
        assert_eq!(config.msaa_sample_flags(), vk::SampleCountFlags::TYPE_4);
    }

    #[test]
    fn log_level_parsing_is_case_insensitive() {
        let mut config = Config::default();
        config.debug.log_level = "DEBUG".to_string();
        assert_eq!(config.log_level_filter(), Some(log::LevelFilter::Debug));
        config.debug.log_level = "loud".to_string();
        assert_eq!(config.log_level_filter(), None);
    }
}
