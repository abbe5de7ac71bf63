use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings handed to the external frame sampler (ffmpeg).
#[derive(Debug, Clone, Deserialize)]
pub struct SamplerConfig {
    /// Keep every Nth source frame.
    #[serde(default = "default_stride")]
    pub stride: u32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    /// A frame is kept when its score against the baseline is strictly above this.
    #[serde(default = "default_diff_threshold")]
    pub diff_threshold: f64,
    /// Per-pixel colour tolerance used by the pixel-difference scorer.
    #[serde(default = "default_pixel_tolerance")]
    pub pixel_tolerance: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_save")]
    pub save: bool,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

/// Encoding used for retained frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    Jpeg,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            stride: default_stride(),
            width: default_width(),
            height: default_height(),
            ffmpeg_path: default_ffmpeg_path(),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            diff_threshold: default_diff_threshold(),
            pixel_tolerance: default_pixel_tolerance(),
        }
    }
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            save: default_save(),
            format: OutputFormat::default(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Read, parse and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sampler.stride == 0 {
            return Err(ConfigError::Invalid("sampler.stride must be positive".into()));
        }
        if self.sampler.width == 0 || self.sampler.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "sampler resolution must be positive, got {}x{}",
                self.sampler.width, self.sampler.height
            )));
        }
        if !unit_interval(self.filter.diff_threshold) {
            return Err(ConfigError::Invalid(format!(
                "filter.diff_threshold must be within [0, 1], got {}",
                self.filter.diff_threshold
            )));
        }
        if !unit_interval(self.filter.pixel_tolerance) {
            return Err(ConfigError::Invalid(format!(
                "filter.pixel_tolerance must be within [0, 1], got {}",
                self.filter.pixel_tolerance
            )));
        }
        if self.pipeline.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.concurrency must be positive".into(),
            ));
        }
        if !(1..=100).contains(&self.output.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "output.jpeg_quality must be within 1..=100, got {}",
                self.output.jpeg_quality
            )));
        }
        Ok(())
    }
}

fn unit_interval(v: f64) -> bool {
    (0.0..=1.0).contains(&v)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_stride() -> u32 {
    10
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    360
}
fn default_ffmpeg_path() -> String {
    "ffmpeg".into()
}
fn default_diff_threshold() -> f64 {
    0.3
}
fn default_pixel_tolerance() -> f64 {
    0.1
}
fn default_concurrency() -> usize {
    4
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("unique_frames")
}
fn default_save() -> bool {
    true
}
fn default_jpeg_quality() -> u8 {
    85
}
fn default_log_level() -> String {
    "info".into()
}
