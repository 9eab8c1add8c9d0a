//! Bevy integration.
//!
//! [`PartitionStreamingPlugin`] owns a [`PartitionManager`] and its command
//! queue inside the [`PartitionStreaming`] resource. Each frame, in
//! `PreUpdate`, it converts the [`StreamingViewer`] transform to a grid
//! position, ticks the manager, then applies pending commands. On
//! `AppExit` the manager is closed.

use std::sync::{Arc, Mutex, PoisonError};

use bevy::ecs::message::MessageReader;
use bevy::prelude::*;

use crate::command::{CommandQueue, CommandReport, CommandSender};
use crate::config::{ConfigError, StreamingConfig};
use crate::coords::{GridPosition, PartitionSize};
use crate::manager::{PartitionManager, TickSummary};
use crate::partition::PartitionHooks;
use crate::provider::BackingStore;
use crate::scheduling::Executor;

/// Marker for the entity whose position drives streaming.
#[derive(Component, Default)]
pub struct StreamingViewer;

/// System set of the streaming tick, for ordering other systems after it.
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamingTick;

type PayloadFactory<P> = Arc<dyn Fn() -> P + Send + Sync>;
type SharedFilter = Arc<dyn Fn(GridPosition) -> bool + Send + Sync>;

/// Streams partitions with payload `P` around the [`StreamingViewer`].
pub struct PartitionStreamingPlugin<P> {
  config: StreamingConfig,
  executor: Executor,
  factory: PayloadFactory<P>,
  filter: Option<SharedFilter>,
  store: Option<Arc<dyn BackingStore>>,
}

impl<P: PartitionHooks> PartitionStreamingPlugin<P> {
  /// Validates `config` up front so building the app cannot fail.
  pub fn new(
    config: StreamingConfig,
    factory: impl Fn() -> P + Send + Sync + 'static,
  ) -> Result<Self, ConfigError> {
    config.validate()?;
    Ok(Self {
      config,
      executor: Executor::Inline,
      factory: Arc::new(factory),
      filter: None,
      store: None,
    })
  }

  /// Runs activation and passivation on `executor` instead of inline.
  pub fn with_executor(mut self, executor: Executor) -> Self {
    self.executor = executor;
    self
  }

  pub fn with_activation_filter(
    mut self,
    filter: impl Fn(GridPosition) -> bool + Send + Sync + 'static,
  ) -> Self {
    self.filter = Some(Arc::new(filter));
    self
  }

  pub fn with_backing_store(mut self, store: Arc<dyn BackingStore>) -> Self {
    self.store = Some(store);
    self
  }

  fn build_manager(&self) -> Result<PartitionManager<P>, ConfigError> {
    let factory = self.factory.clone();
    let mut manager =
      PartitionManager::new(&self.config, self.executor.clone(), move || factory())?;
    if let Some(filter) = self.filter.clone() {
      manager.set_activation_filter(move |pos| filter(pos));
    }
    if let Some(store) = self.store.clone() {
      manager = manager.with_backing_store(store);
    }
    Ok(manager)
  }
}

impl<P: PartitionHooks> Plugin for PartitionStreamingPlugin<P> {
  fn build(&self, app: &mut App) {
    let manager = match self.build_manager() {
      Ok(manager) => manager,
      Err(err) => {
        error!("Partition streaming disabled: {}", err);
        return;
      }
    };
    let commands = CommandQueue::new(&self.config.history);
    app
      .insert_resource(PartitionStreaming {
        sender: commands.sender(),
        state: Mutex::new(StreamingState { manager, commands }),
        partition_size: self.config.partition.size,
        viewer: None,
        last_tick: TickSummary::default(),
        last_commands: CommandReport::default(),
      })
      .add_systems(PreUpdate, tick_streaming::<P>.in_set(StreamingTick))
      .add_systems(Last, close_on_exit::<P>);
  }
}

struct StreamingState<P: PartitionHooks> {
  manager: PartitionManager<P>,
  commands: CommandQueue<PartitionManager<P>>,
}

/// Streaming state shared with the rest of the app.
#[derive(Resource)]
pub struct PartitionStreaming<P: PartitionHooks> {
  // The queue's history is not `Sync`; systems reach it through `&mut self`.
  state: Mutex<StreamingState<P>>,
  sender: CommandSender<PartitionManager<P>>,
  partition_size: PartitionSize,
  viewer: Option<GridPosition>,
  last_tick: TickSummary,
  last_commands: CommandReport,
}

impl<P: PartitionHooks> PartitionStreaming<P> {
  fn state_mut(&mut self) -> &mut StreamingState<P> {
    self.state.get_mut().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn manager(&mut self) -> &mut PartitionManager<P> {
    &mut self.state_mut().manager
  }

  pub fn commands(&mut self) -> &mut CommandQueue<PartitionManager<P>> {
    &mut self.state_mut().commands
  }

  /// Handle for submitting commands from any system or thread.
  pub fn sender(&self) -> CommandSender<PartitionManager<P>> {
    self.sender.clone()
  }

  pub fn partition_size(&self) -> PartitionSize {
    self.partition_size
  }

  /// Grid position of the viewer on the last tick.
  pub fn viewer(&self) -> Option<GridPosition> {
    self.viewer
  }

  pub fn last_tick(&self) -> TickSummary {
    self.last_tick
  }

  pub fn last_commands(&self) -> &CommandReport {
    &self.last_commands
  }

  /// Ticks the manager around `viewer`, then applies pending commands.
  pub fn tick(&mut self, viewer: GridPosition) {
    let state = self.state_mut();
    let summary = state.manager.update(viewer);
    let report = state.commands.update(&mut state.manager);
    self.viewer = Some(viewer);
    self.last_tick = summary;
    self.last_commands = report;
  }

  pub fn close(&mut self) {
    self.state_mut().manager.close();
  }
}

fn tick_streaming<P: PartitionHooks>(
  viewers: Query<&GlobalTransform, With<StreamingViewer>>,
  mut streaming: ResMut<PartitionStreaming<P>>,
) {
  let Ok(transform) = viewers.single() else {
    return;
  };
  let viewer = streaming
    .partition_size()
    .world_to_grid(transform.translation());
  streaming.tick(viewer);
}

fn close_on_exit<P: PartitionHooks>(
  mut exits: MessageReader<AppExit>,
  mut streaming: ResMut<PartitionStreaming<P>>,
) {
  if exits.read().next().is_some() {
    streaming.close();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::partition::HookError;

  #[derive(Default)]
  struct Marker;

  impl PartitionHooks for Marker {
    fn activate(&mut self, _pos: GridPosition) -> Result<(), HookError> {
      Ok(())
    }

    fn passivate(&mut self, _pos: GridPosition) -> Result<(), HookError> {
      Ok(())
    }
  }

  fn app() -> App {
    let mut config = StreamingConfig::default();
    config.volume.min_extent = 1;
    config.volume.max_extent = 2;
    config.partition.size = PartitionSize::uniform(10.0);
    let mut app = App::new();
    app.add_plugins(MinimalPlugins);
    app.add_plugins(PartitionStreamingPlugin::new(config, Marker::default).unwrap());
    app
  }

  #[test]
  fn viewer_transform_drives_streaming() {
    let mut app = app();
    let at = Vec3::new(25.0, -5.0, 0.0);
    app.world_mut().spawn((
      StreamingViewer,
      Transform::from_translation(at),
      GlobalTransform::from_translation(at),
    ));
    app.update();

    let mut streaming = app.world_mut().resource_mut::<PartitionStreaming<Marker>>();
    let center = GridPosition::new(2, -1, 0);
    assert_eq!(streaming.viewer(), Some(center));
    assert_eq!(streaming.last_tick().activations_started, 7);
    assert!(streaming.manager().is_active(center));
  }

  #[test]
  fn no_viewer_no_tick() {
    let mut app = app();
    app.update();
    let streaming = app.world().resource::<PartitionStreaming<Marker>>();
    assert_eq!(streaming.viewer(), None);
  }

  #[test]
  fn invalid_config_is_rejected_before_build() {
    let mut config = StreamingConfig::default();
    config.activation.concurrency = 0;
    assert!(PartitionStreamingPlugin::new(config, Marker::default).is_err());
  }
}
