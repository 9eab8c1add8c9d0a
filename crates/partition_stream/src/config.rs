//! Streaming configuration.
//!
//! All knobs are plain numbers or enums, loaded from TOML. Every field has a
//! default, so a file only needs the values it changes:
//!
//! ```toml
//! [volume]
//! shape = "diamond"
//! min_extent = 4
//! max_extent = 6
//!
//! [activation]
//! capacity = 8
//! concurrency = 4
//! ```

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::coords::PartitionSize;
use crate::volume::{ActiveVolumePolicy, VolumeShape};

/// Complete configuration surface of a partition manager and its command
/// history.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
  pub volume: VolumeConfig,
  pub partition: PartitionConfig,
  pub activation: ActivationConfig,
  pub passivation: PassivationConfig,
  pub pool: PoolConfig,
  pub history: HistoryConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
  pub shape: VolumeShape,
  /// Extent of the volume inside which partitions are activated.
  pub min_extent: u32,
  /// Extent of the volume outside which partitions are passivated.
  pub max_extent: u32,
}

impl Default for VolumeConfig {
  fn default() -> Self {
    Self {
      shape: VolumeShape::Diamond,
      min_extent: 4,
      max_extent: 6,
    }
  }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
  /// World-space size of one partition.
  pub size: PartitionSize,
  /// Edge length, in partitions, of a cluster.
  pub cluster_size: u32,
}

impl Default for PartitionConfig {
  fn default() -> Self {
    Self {
      size: PartitionSize::default(),
      cluster_size: 4,
    }
  }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivationConfig {
  /// Partitions moved to Activating per tick.
  pub capacity: usize,
  /// Candidate positions examined per tick.
  pub search_capacity: usize,
  /// Positions this close to the viewer are always examined first.
  pub prior_active_distance: u32,
  /// Activation tasks running at once.
  pub concurrency: usize,
}

impl Default for ActivationConfig {
  fn default() -> Self {
    Self {
      capacity: 8,
      search_capacity: 256,
      prior_active_distance: 1,
      concurrency: 4,
    }
  }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassivationConfig {
  /// Partitions moved to Passivating per tick.
  pub capacity: usize,
  /// Active partitions examined per tick.
  pub search_capacity: usize,
  /// Passivation tasks running at once.
  pub concurrency: usize,
}

impl Default for PassivationConfig {
  fn default() -> Self {
    Self {
      capacity: 8,
      search_capacity: 256,
      concurrency: 2,
    }
  }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
  /// Maximum free partitions kept for reuse (0 = unbounded).
  pub max_capacity: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
  pub undo_capacity: usize,
  pub redo_capacity: usize,
}

impl Default for HistoryConfig {
  fn default() -> Self {
    Self {
      undo_capacity: 100,
      redo_capacity: 100,
    }
  }
}

impl StreamingConfig {
  /// Parses and validates a TOML document.
  pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
    let config: Self = toml::from_str(s)?;
    config.validate()?;
    Ok(config)
  }

  /// Reads, parses, and validates a TOML file.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)?;
    let config = Self::from_toml_str(&contents)?;
    log::info!("Loaded streaming config from {}", path.display());
    Ok(config)
  }

  /// Serializes to pretty TOML.
  pub fn to_toml_string(&self) -> Result<String, ConfigError> {
    toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
  }

  /// Checks the cross-field constraints serde cannot express.
  pub fn validate(&self) -> Result<(), ConfigError> {
    self.volume_policy()?;
    if !self.partition.size.is_valid() {
      return Err(ConfigError::Invalid(format!(
        "partition size must be finite and positive, got {:?}",
        self.partition.size.0
      )));
    }
    let positive = [
      ("partition.cluster_size", self.partition.cluster_size as usize),
      ("activation.capacity", self.activation.capacity),
      ("activation.search_capacity", self.activation.search_capacity),
      ("activation.concurrency", self.activation.concurrency),
      ("passivation.capacity", self.passivation.capacity),
      ("passivation.search_capacity", self.passivation.search_capacity),
      ("passivation.concurrency", self.passivation.concurrency),
      ("history.undo_capacity", self.history.undo_capacity),
      ("history.redo_capacity", self.history.redo_capacity),
    ];
    for (name, value) in positive {
      if value == 0 {
        return Err(ConfigError::Invalid(format!("{} must be at least 1", name)));
      }
    }
    Ok(())
  }

  /// Builds the min/max volume policy.
  pub fn volume_policy(&self) -> Result<ActiveVolumePolicy, ConfigError> {
    ActiveVolumePolicy::new(
      self.volume.shape,
      self.volume.min_extent,
      self.volume.max_extent,
    )
  }
}

/// Error loading or validating a configuration.
#[derive(Debug)]
pub enum ConfigError {
  Io(io::Error),
  Parse(toml::de::Error),
  Invalid(String),
}

impl From<io::Error> for ConfigError {
  fn from(err: io::Error) -> Self {
    Self::Io(err)
  }
}

impl From<toml::de::Error> for ConfigError {
  fn from(err: toml::de::Error) -> Self {
    Self::Parse(err)
  }
}

impl std::fmt::Display for ConfigError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Io(e) => write!(f, "I/O error: {}", e),
      Self::Parse(e) => write!(f, "parse error: {}", e),
      Self::Invalid(msg) => write!(f, "invalid config: {}", msg),
    }
  }
}

impl std::error::Error for ConfigError {}
