//! Procedural voxel payload streamed by the demo.

use bevy::math::IVec3;
use partition_stream::{
  BlockDomain, BlockEdit, CommandError, GridPosition, HookError, PartitionHooks,
  boundary_neighbors,
};

/// Blocks along each edge of a partition.
pub const EDGE: i32 = 16;
pub const DIMS: IVec3 = IVec3::splat(EDGE);

pub const AIR: u8 = 0;
pub const STONE: u8 = 1;
pub const GRASS: u8 = 2;
pub const GLASS: u8 = 3;

/// Voxel contents of one partition.
#[derive(Default)]
pub struct Terrain {
  blocks: Vec<u8>,
  /// Blocks written by commands since activation.
  edits: u32,
}

impl Terrain {
  fn index(local: IVec3) -> usize {
    (local.x + local.y * EDGE + local.z * EDGE * EDGE) as usize
  }

  pub fn edits(&self) -> u32 {
    self.edits
  }

  pub fn solid_count(&self) -> usize {
    self.blocks.iter().filter(|b| **b != AIR).count()
  }
}

/// Rolling hills: ground height as a function of world column.
fn ground_height(x: i32, z: i32) -> i32 {
  let h = ((x as f32 * 0.07).sin() + (z as f32 * 0.05).cos()) * 6.0;
  h.round() as i32
}

impl PartitionHooks for Terrain {
  fn initialize(&mut self) {
    self.blocks = vec![AIR; (EDGE * EDGE * EDGE) as usize];
  }

  fn activate(&mut self, pos: GridPosition) -> Result<(), HookError> {
    if self.blocks.len() != (EDGE * EDGE * EDGE) as usize {
      return Err(HookError::failed("terrain buffer not initialized"));
    }
    let origin = IVec3::from(pos) * DIMS;
    for z in 0..EDGE {
      for x in 0..EDGE {
        let ground = ground_height(origin.x + x, origin.z + z);
        for y in 0..EDGE {
          let world_y = origin.y + y;
          self.blocks[Self::index(IVec3::new(x, y, z))] = if world_y < ground {
            STONE
          } else if world_y == ground {
            GRASS
          } else {
            AIR
          };
        }
      }
    }
    self.edits = 0;
    Ok(())
  }

  fn passivate(&mut self, pos: GridPosition) -> Result<(), HookError> {
    if self.edits > 0 {
      log::debug!("Discarding {} edits at {}", self.edits, pos);
    }
    self.blocks.fill(AIR);
    Ok(())
  }
}

impl BlockDomain for Terrain {
  type Block = u8;

  fn set_block(
    &mut self,
    partition: GridPosition,
    local: IVec3,
    block: u8,
  ) -> Result<BlockEdit<u8>, CommandError> {
    if local.cmplt(IVec3::ZERO).any() || local.cmpge(DIMS).any() {
      return Err(CommandError::OutOfBounds);
    }
    let previous = std::mem::replace(&mut self.blocks[Self::index(local)], block);
    if previous != block {
      self.edits += 1;
    }
    Ok(BlockEdit {
      previous,
      affected: boundary_neighbors(partition, local, DIMS),
    })
  }
}
