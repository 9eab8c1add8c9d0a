mod config;
mod demo;
mod terrain;

use std::time::Duration;

use bevy::app::ScheduleRunnerPlugin;
use bevy::log::LogPlugin;
use bevy::prelude::*;
use bevy::transform::TransformPlugin;
use partition_stream::{Executor, PartitionStreamingPlugin};

use crate::terrain::Terrain;

fn main() {
  #[cfg(feature = "tracy")]
  partition_stream::init_tracy();

  let config_str = std::fs::read_to_string("assets/config/demo.config.toml")
    .expect("Failed to read config file");
  let config: config::DemoConfig = toml::from_str(&config_str).expect("Failed to parse config");

  let executor = Executor::threaded(config.demo.worker_threads, "stream")
    .expect("Failed to build streaming thread pool");
  let streaming = PartitionStreamingPlugin::new(config.streaming.clone(), Terrain::default)
    .expect("Invalid streaming config")
    .with_executor(executor);

  let mut app = App::new();
  app
    .add_plugins(
      MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(Duration::from_secs_f64(
        1.0 / 60.0,
      ))),
    )
    .add_plugins(LogPlugin::default())
    .add_plugins(TransformPlugin)
    .insert_resource(config)
    .add_plugins(streaming)
    .add_plugins(demo::DemoPlugin);

  app.run();
}
