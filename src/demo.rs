//! Scripted viewer walk with periodic edits and undos.

use bevy::diagnostic::FrameCount;
use bevy::ecs::message::MessageWriter;
use bevy::prelude::*;
use partition_stream::{
  CommandPool, PartitionStreaming, SetBlockCommand, StreamingViewer, locate_block,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::DemoConfig;
use crate::terrain::{DIMS, GLASS, Terrain};

pub struct DemoPlugin;

impl Plugin for DemoPlugin {
  fn build(&self, app: &mut App) {
    let seed = app
      .world()
      .get_resource::<DemoConfig>()
      .map_or(0, |c| c.demo.seed);
    app
      .insert_resource(DemoRng(StdRng::seed_from_u64(seed)))
      .insert_resource(EditPool(CommandPool::new(128)))
      .add_systems(Startup, spawn_viewer)
      .add_systems(
        Update,
        (walk_viewer, place_blocks, rebuild_dirty, report, finish).chain(),
      );
  }
}

#[derive(Resource)]
struct DemoRng(StdRng);

#[derive(Resource)]
struct EditPool(CommandPool<SetBlockCommand<Terrain>>);

#[derive(Component)]
struct Heading(Vec3);

fn spawn_viewer(mut commands: Commands) {
  commands.spawn((
    StreamingViewer,
    Heading(Vec3::X),
    Transform::from_xyz(8.0, 4.0, 8.0),
  ));
  info!("Viewer spawned");
}

fn walk_viewer(
  frames: Res<FrameCount>,
  config: Res<DemoConfig>,
  mut rng: ResMut<DemoRng>,
  mut viewer: Query<(&mut Transform, &mut Heading), With<StreamingViewer>>,
) {
  let Ok((mut transform, mut heading)) = viewer.single_mut() else {
    return;
  };
  let settings = &config.demo;
  if settings.turn_every > 0 && frames.0 % settings.turn_every == 0 {
    let angle = rng.0.random_range(0.0..std::f32::consts::TAU);
    heading.0 = Vec3::new(angle.cos(), 0.0, angle.sin());
  }
  // Fixed 60 Hz step keeps runs reproducible.
  transform.translation += heading.0 * settings.speed / 60.0;
}

fn place_blocks(
  frames: Res<FrameCount>,
  config: Res<DemoConfig>,
  pool: Res<EditPool>,
  streaming: Res<PartitionStreaming<Terrain>>,
  viewer: Query<&GlobalTransform, With<StreamingViewer>>,
) {
  let settings = &config.demo;
  let Ok(transform) = viewer.single() else {
    return;
  };
  let sender = streaming.sender();
  if settings.edit_every > 0 && frames.0 % settings.edit_every == 0 {
    // One block per world unit.
    let block = transform.translation().floor().as_ivec3() - IVec3::Y;
    let (partition, local) = locate_block(block, DIMS);
    sender.request(SetBlockCommand::pooled(&pool.0, partition, local, GLASS));
  }
  if settings.undo_every > 0 && frames.0 % settings.undo_every == 0 {
    sender.request_undo();
  }
}

/// Stands in for remeshing: drains dirty partitions every frame.
fn rebuild_dirty(mut streaming: ResMut<PartitionStreaming<Terrain>>) {
  let manager = streaming.manager();
  let dirty = manager.drain_dirty();
  if dirty.is_empty() {
    return;
  }
  let solid: usize = dirty
    .iter()
    .filter_map(|pos| manager.get(*pos))
    .map(|p| p.payload().solid_count())
    .sum();
  debug!("Rebuilt {} partitions ({} solid blocks)", dirty.len(), solid);
}

fn report(
  frames: Res<FrameCount>,
  config: Res<DemoConfig>,
  mut streaming: ResMut<PartitionStreaming<Terrain>>,
) {
  let every = config.demo.report_every;
  if every == 0 || frames.0 % every != 0 {
    return;
  }
  let commands = streaming.last_commands().clone();
  for err in &commands.errors {
    warn!("Edit failed: {}", err);
  }
  let (undo, redo) = (streaming.commands().undo_len(), streaming.commands().redo_len());
  let manager = streaming.manager();
  let edits: u32 = manager.iter_active().map(|p| p.payload().edits()).sum();
  info!(
    "frame {} viewer {:?}: {} | {} edits live, history {}/{}",
    frames.0,
    manager.center(),
    manager.stats(),
    edits,
    undo,
    redo
  );
}

fn finish(
  frames: Res<FrameCount>,
  config: Res<DemoConfig>,
  pool: Res<EditPool>,
  mut exit: MessageWriter<AppExit>,
) {
  if frames.0 + 1 >= config.demo.frames {
    info!(
      "Demo finished after {} frames ({} edit commands allocated)",
      frames.0 + 1,
      pool.0.total_object_count()
    );
    exit.write(AppExit::Success);
  }
}
