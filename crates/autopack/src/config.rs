//! Configuration module

use crate::format::{resolve_behavior_name, Behavior};
use crate::{Error, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Largest frame a stream may use
pub const MAX_CHUNK_SIZE: u64 = 16 * 1024 * 1024;
/// Deepest bridge a stream may buffer, in frames
pub const MAX_PIPE_DEPTH: usize = 4096;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Packing settings
    pub pack: PackConfig,
    /// Unpacking settings
    pub unpack: UnpackConfig,
    /// Stream bridge settings
    pub stream: StreamConfig,
}

/// Packing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackConfig {
    /// Format name: auto, tar, tar.gz, tar.xz, zip
    pub format: String,
    /// Gzip compression level (0-9)
    pub compression_level: u32,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            format: "auto".to_string(),
            compression_level: 6,
        }
    }
}

/// Unpacking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UnpackConfig {
    /// Format name: auto, tar, tar.gz, tar.xz, zip
    pub format: String,
}

impl Default for UnpackConfig {
    fn default() -> Self {
        Self {
            format: "auto".to_string(),
        }
    }
}

/// Stream bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Size of the frames written into the bridge, in bytes
    #[serde(deserialize_with = "deserialize_size")]
    pub chunk_size: u64,
    /// Number of frames the bridge holds before the producer blocks
    pub pipe_depth: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: 32 * 1024,
            pipe_depth: 16,
        }
    }
}

/// Size given either as a plain number or as a string like "32KiB"
#[derive(Deserialize)]
#[serde(untagged)]
enum SizeValue {
    Numeric(u64),
    String(String),
}

fn deserialize_size<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    match SizeValue::deserialize(deserializer)? {
        SizeValue::Numeric(bytes) => Ok(bytes),
        SizeValue::String(s) => {
            parse_size(&s).map_err(|e| D::Error::custom(format!("Failed to parse size: {}", e)))
        }
    }
}

/// Parse size string like "100MiB" to bytes
pub fn parse_size(size_str: &str) -> Result<u64> {
    let size_str = size_str.trim();

    if let Ok(bytes) = size_str.parse::<u64>() {
        return Ok(bytes);
    }

    let split_pos = size_str
        .chars()
        .position(|c| !c.is_ascii_digit() && c != '.')
        .unwrap_or(size_str.len());

    if split_pos == 0 {
        return Err(Error::Config(format!("Invalid size format: {}", size_str)));
    }

    let (number_part, unit_part) = size_str.split_at(split_pos);
    let number: f64 = number_part
        .parse()
        .map_err(|_| Error::Config(format!("Invalid number in size: {}", number_part)))?;

    let multiplier: u64 = match unit_part.trim().to_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" => 1_000,
        "m" | "mb" => 1_000_000,
        "g" | "gb" => 1_000_000_000,
        "ki" | "kib" => 1_024,
        "mi" | "mib" => 1_048_576,
        "gi" | "gib" => 1_073_741_824,
        _ => return Err(Error::Config(format!("Unknown size unit: {}", unit_part))),
    };

    Ok((number * multiplier as f64) as u64)
}

impl Config {
    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = config_dir()
            .ok_or_else(|| Error::Config("Unable to determine config directory".to_string()))?;
        Ok(config_dir.join("autopack").join("config.toml"))
    }

    /// Load the user configuration, falling back to defaults when absent
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::io(format!("reading config {}", path.display()), e))?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the codecs or the bridge cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.pack.compression_level > 9 {
            return Err(Error::Config(format!(
                "compression_level must be 0-9, got {}",
                self.pack.compression_level
            )));
        }
        if self.stream.chunk_size == 0 || self.stream.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::Config(format!(
                "chunk_size must be 1-{} bytes, got {}",
                MAX_CHUNK_SIZE, self.stream.chunk_size
            )));
        }
        if self.stream.pipe_depth == 0 || self.stream.pipe_depth > MAX_PIPE_DEPTH {
            return Err(Error::Config(format!(
                "pipe_depth must be 1-{}, got {}",
                MAX_PIPE_DEPTH, self.stream.pipe_depth
            )));
        }
        resolve_behavior_name(&self.pack.format)?;
        resolve_behavior_name(&self.unpack.format)?;
        Ok(())
    }

    pub fn pack_behavior(&self) -> Result<Behavior> {
        resolve_behavior_name(&self.pack.format)
    }

    pub fn unpack_behavior(&self) -> Result<Behavior> {
        resolve_behavior_name(&self.unpack.format)
    }
}

/// Tuning knobs for a single packer or unpacker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    /// Bytes per frame handed to the bridge
    pub chunk_size: usize,
    /// Frames the bridge buffers before blocking
    pub pipe_depth: usize,
    /// Gzip level used when packing `tar.gz`
    pub compression_level: u32,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for StreamOptions {
    fn from(config: &Config) -> Self {
        Self {
            chunk_size: usize::try_from(config.stream.chunk_size).unwrap_or(usize::MAX),
            pipe_depth: config.stream.pipe_depth,
            compression_level: config.pack.compression_level.min(9),
        }
    }
}
