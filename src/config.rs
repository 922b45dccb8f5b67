//! Accelerator configuration.
//!
//! The configuration is static for a run and read-only to every optimizer and
//! the simulator. It can be declared in YAML or JSON:
//!
//! ```yaml
//! n_tiles: 4
//! spm_kb_per_tile: 32.0
//! bit_precision: 8
//! tick: 1
//! dma:
//!   granularity_bits: 512
//!   clock_period: 10
//! mem:
//!   granularity_bits: 1024
//!   clock_period: 10
//! supported_ops: [Conv2D, Dense, Add]
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::types::SimTime;

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown file format: {0}")]
    UnknownFormat(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Transfer parameters of one shared channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelParams {
    /// Bits moved per channel clock period
    pub granularity_bits: u64,

    /// Channel clock period in SimTime units
    pub clock_period: SimTime,
}

impl ChannelParams {
    /// Creates channel parameters.
    pub fn new(granularity_bits: u64, clock_period: SimTime) -> Self {
        Self {
            granularity_bits,
            clock_period,
        }
    }

    fn validate(&self, name: &str) -> ConfigResult<()> {
        if self.granularity_bits == 0 || self.clock_period == 0 {
            return Err(ConfigError::Validation(format!(
                "{} channel needs non-zero granularity and clock period",
                name
            )));
        }
        Ok(())
    }
}

fn default_n_tiles() -> usize {
    4
}

fn default_spm_kb() -> f64 {
    32.0
}

fn default_bit_precision() -> u32 {
    8
}

fn default_dma() -> ChannelParams {
    ChannelParams::new(64 * 8, 10)
}

fn default_mem() -> ChannelParams {
    ChannelParams::new(128 * 8, 10)
}

fn default_tick() -> SimTime {
    1
}

fn default_path_cap() -> usize {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Layer types the reference accelerator executes natively.
pub fn default_supported_ops() -> Vec<String> {
    [
        "Conv2D",
        "MaxPooling2D",
        "Flatten",
        "Dense",
        "BatchNormalization",
        "ZeroPadding2D",
        "Dropout",
        "Activation",
        "AveragePooling2D",
        "Concatenate",
        "GlobalAveragePooling2D",
        "ReLU",
        "DepthwiseConv2D",
        "Add",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Complete accelerator description used by all passes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AcceleratorConfig {
    /// Number of NPU tiles
    #[serde(default = "default_n_tiles")]
    pub n_tiles: usize,

    /// Scratchpad capacity per tile in KB
    #[serde(default = "default_spm_kb")]
    pub spm_kb_per_tile: f64,

    /// Bit precision of tensors and weights
    #[serde(default = "default_bit_precision")]
    pub bit_precision: u32,

    /// DMA channel parameters
    #[serde(default = "default_dma")]
    pub dma: ChannelParams,

    /// Memory channel parameters
    #[serde(default = "default_mem")]
    pub mem: ChannelParams,

    /// Virtual clock tick granularity
    #[serde(default = "default_tick")]
    pub tick: SimTime,

    /// Cap on explored path instances per path query
    #[serde(default = "default_path_cap")]
    pub path_cap: usize,

    /// Layer types supported on the NPU (empty = everything)
    #[serde(default = "default_supported_ops")]
    pub supported_ops: Vec<String>,

    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            n_tiles: default_n_tiles(),
            spm_kb_per_tile: default_spm_kb(),
            bit_precision: default_bit_precision(),
            dma: default_dma(),
            mem: default_mem(),
            tick: default_tick(),
            path_cap: default_path_cap(),
            supported_ops: default_supported_ops(),
            log_level: default_log_level(),
        }
    }
}

impl AcceleratorConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the NPU executes this layer type.
    pub fn supports(&self, layer_type: &str) -> bool {
        self.supported_ops.is_empty() || self.supported_ops.iter().any(|op| op == layer_type)
    }

    /// Scratchpad footprint of `size` tensor elements, in KB.
    pub fn tensor_kb(&self, size: u64) -> f64 {
        size as f64 * self.bit_precision as f64 / (8.0 * 1024.0)
    }

    /// Loads configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let config: AcceleratorConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Loads configuration from a JSON string.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: AcceleratorConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file, auto-detecting format.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match ext.to_lowercase().as_str() {
            "yaml" | "yml" => Self::from_yaml_file(path),
            "json" => Self::from_json_file(path),
            _ => Err(ConfigError::UnknownFormat(ext.to_string())),
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.n_tiles == 0 {
            return Err(ConfigError::Validation(
                "at least one NPU tile is required".to_string(),
            ));
        }
        if self.bit_precision == 0 {
            return Err(ConfigError::Validation(
                "bit_precision must be positive".to_string(),
            ));
        }
        if self.tick == 0 {
            return Err(ConfigError::Validation("tick must be positive".to_string()));
        }
        if self.path_cap == 0 {
            return Err(ConfigError::Validation(
                "path_cap must be positive".to_string(),
            ));
        }
        if !self.spm_kb_per_tile.is_finite() || self.spm_kb_per_tile < 0.0 {
            return Err(ConfigError::Validation(format!(
                "invalid scratchpad capacity: {}",
                self.spm_kb_per_tile
            )));
        }
        self.dma.validate("dma")?;
        self.mem.validate("mem")?;
        Ok(())
    }

    /// Converts to YAML string.
    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Converts to JSON string.
    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Builder for creating an `AcceleratorConfig` programmatically.
#[derive(Default)]
pub struct ConfigBuilder {
    config: AcceleratorConfig,
}

impl ConfigBuilder {
    /// Creates a new builder starting from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of tiles.
    pub fn n_tiles(mut self, n: usize) -> Self {
        self.config.n_tiles = n;
        self
    }

    /// Sets the scratchpad capacity per tile (KB).
    pub fn spm_kb_per_tile(mut self, kb: f64) -> Self {
        self.config.spm_kb_per_tile = kb;
        self
    }

    /// Sets the bit precision.
    pub fn bit_precision(mut self, bits: u32) -> Self {
        self.config.bit_precision = bits;
        self
    }

    /// Sets the DMA channel parameters.
    pub fn dma(mut self, granularity_bits: u64, clock_period: SimTime) -> Self {
        self.config.dma = ChannelParams::new(granularity_bits, clock_period);
        self
    }

    /// Sets the memory channel parameters.
    pub fn mem(mut self, granularity_bits: u64, clock_period: SimTime) -> Self {
        self.config.mem = ChannelParams::new(granularity_bits, clock_period);
        self
    }

    /// Sets the virtual clock tick.
    pub fn tick(mut self, tick: SimTime) -> Self {
        self.config.tick = tick;
        self
    }

    /// Sets the path-enumeration cap.
    pub fn path_cap(mut self, cap: usize) -> Self {
        self.config.path_cap = cap;
        self
    }

    /// Replaces the NPU allowlist.
    pub fn supported_ops<I, S>(mut self, ops: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.supported_ops = ops.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.log_level = level.into();
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> ConfigResult<AcceleratorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
