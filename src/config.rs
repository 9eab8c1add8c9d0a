//! Demo configuration, loaded from `assets/config/demo.config.toml`.

use bevy::prelude::Resource;
use partition_stream::StreamingConfig;
use serde::{Deserialize, Serialize};

#[derive(Resource, Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
  pub demo: DemoSettings,
  pub streaming: StreamingConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoSettings {
  /// Frames to run before exiting.
  pub frames: u32,
  pub seed: u64,
  /// Viewer speed in world units per second.
  pub speed: f32,
  pub turn_every: u32,
  pub edit_every: u32,
  pub undo_every: u32,
  pub report_every: u32,
  pub worker_threads: usize,
}

impl Default for DemoSettings {
  fn default() -> Self {
    Self {
      frames: 600,
      seed: 42,
      speed: 40.0,
      turn_every: 90,
      edit_every: 6,
      undo_every: 40,
      report_every: 120,
      worker_threads: 4,
    }
  }
}
