// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section and field is optional; anything missing takes its default, and a
// missing or broken file falls back to the defaults entirely.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::backend::{DiagnosticsDesc, MessageSeverity, ShaderInstrumentation};
use crate::renderer::RendererParams;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub shaders: ShaderConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "GPU Sandbox".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub clear_color: [f32; 4],
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Validation and instrumentation settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation: bool,
    pub message_severity: MessageSeverity,
    pub shader_instrumentation: ShaderInstrumentation,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation: true,
            message_severity: MessageSeverity::Info,
            shader_instrumentation: ShaderInstrumentation::None,
        }
    }
}

/// Compiled SPIR-V paths; relative paths are resolved against the crate root
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/triangle.vert.spv"),
            fragment: PathBuf::from("shaders/triangle.frag.spv"),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_or_default("config.toml")
    }

    /// Like `load_from_path`, but a broken file yields defaults and a warning
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        Self::load_from_path(path).unwrap_or_else(|e| {
            log::warn!("Failed to load {}: {:#}. Using defaults.", path.display(), e);
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

        let config = Self::parse(&content).with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Everything the renderer needs to start up
    pub fn renderer_params(&self) -> RendererParams {
        RendererParams {
            app_name: self.window.title.clone(),
            diagnostics: DiagnosticsDesc {
                enabled: self.debug.validation,
                min_severity: self.debug.message_severity,
                instrumentation: self.debug.shader_instrumentation,
            },
            vertex_shader: self.shaders.vertex.clone(),
            fragment_shader: self.shaders.fragment.clone(),
            clear_color: self.graphics.clear_color,
        }
    }
}
