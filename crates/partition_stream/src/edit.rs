//! Block edits against active partitions.
//!
//! [`SetBlockCommand`] writes one block inside an active partition and marks
//! the partitions whose derived state (mesh, light) depends on it dirty.
//! The storage itself stays behind [`BlockDomain`], implemented by the
//! partition payload.

use std::fmt;

use bevy::math::IVec3;

use crate::command::{Applied, Command, CommandError, CommandPool, Recyclable};
use crate::coords::GridPosition;
use crate::manager::PartitionManager;
use crate::partition::PartitionHooks;

/// Outcome of a single block write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockEdit<B> {
  /// Value stored before the write.
  pub previous: B,
  /// Other partitions whose derived state must be recomputed.
  pub affected: Vec<GridPosition>,
}

/// Block storage of a partition payload.
pub trait BlockDomain: PartitionHooks {
  type Block: Copy + PartialEq + Default + fmt::Debug + Send + 'static;

  /// Writes `block` at `local` inside the partition at `partition`.
  ///
  /// Returns [`CommandError::OutOfBounds`] without writing if `local` is
  /// outside the partition.
  fn set_block(
    &mut self,
    partition: GridPosition,
    local: IVec3,
    block: Self::Block,
  ) -> Result<BlockEdit<Self::Block>, CommandError>;
}

/// Splits a world block coordinate into its partition and local offset.
pub fn locate_block(world_block: IVec3, dims: IVec3) -> (GridPosition, IVec3) {
  let partition = world_block.div_euclid(dims);
  (partition.into(), world_block.rem_euclid(dims))
}

/// Face-adjacent partitions that share a face with the block at `local`.
///
/// A block in the interior touches none; a corner block touches three.
pub fn boundary_neighbors(partition: GridPosition, local: IVec3, dims: IVec3) -> Vec<GridPosition> {
  let mut out = Vec::new();
  for axis in 0..3 {
    let mut step = IVec3::ZERO;
    if local[axis] == 0 {
      step[axis] = -1;
    } else if local[axis] == dims[axis] - 1 {
      step[axis] = 1;
    } else {
      continue;
    }
    out.push(partition + GridPosition::from(step));
  }
  out
}

/// Sets one block; undo writes the previous value back.
pub struct SetBlockCommand<P: BlockDomain> {
  target: GridPosition,
  local: IVec3,
  block: P::Block,
  previous: Option<P::Block>,
  home: Option<CommandPool<Self>>,
}

impl<P: BlockDomain> Default for SetBlockCommand<P> {
  fn default() -> Self {
    Self {
      target: GridPosition::ORIGIN,
      local: IVec3::ZERO,
      block: P::Block::default(),
      previous: None,
      home: None,
    }
  }
}

impl<P: BlockDomain> Recyclable for SetBlockCommand<P> {
  fn reset(&mut self) {
    self.previous = None;
    self.home = None;
  }
}

impl<P: BlockDomain> SetBlockCommand<P> {
  /// Builds an unpooled command.
  pub fn new(target: GridPosition, local: IVec3, block: P::Block) -> Box<Self> {
    Box::new(Self {
      target,
      local,
      block,
      ..Default::default()
    })
  }

  /// Takes a command from `pool`; it returns there when released.
  pub fn pooled(
    pool: &CommandPool<Self>,
    target: GridPosition,
    local: IVec3,
    block: P::Block,
  ) -> Box<Self> {
    let mut cmd = pool.acquire();
    cmd.target = target;
    cmd.local = local;
    cmd.block = block;
    cmd.previous = None;
    cmd.home = Some(pool.clone());
    cmd
  }

  pub fn target(&self) -> GridPosition {
    self.target
  }

  /// Value replaced by the last apply.
  pub fn previous(&self) -> Option<P::Block> {
    self.previous
  }

  fn write(
    &self,
    world: &mut PartitionManager<P>,
    block: P::Block,
  ) -> Result<BlockEdit<P::Block>, CommandError> {
    let partition = world
      .get_mut(self.target)
      .ok_or(CommandError::NotActive(self.target))?;
    let edit = partition
      .payload_mut()
      .set_block(self.target, self.local, block)?;
    if edit.previous != block {
      world.mark_dirty(self.target);
      for pos in &edit.affected {
        world.mark_dirty(*pos);
      }
    }
    Ok(edit)
  }
}

impl<P: BlockDomain> Command<PartitionManager<P>> for SetBlockCommand<P> {
  fn apply(&mut self, world: &mut PartitionManager<P>) -> Result<Applied, CommandError> {
    let edit = self.write(world, self.block)?;
    if edit.previous == self.block {
      return Ok(Applied::NoOp);
    }
    self.previous = Some(edit.previous);
    Ok(Applied::Changed)
  }

  fn revert(&mut self, world: &mut PartitionManager<P>) -> Result<(), CommandError> {
    let previous = self
      .previous
      .ok_or_else(|| CommandError::Rejected("revert before apply".into()))?;
    self.write(world, previous)?;
    Ok(())
  }

  fn release(mut self: Box<Self>) {
    if let Some(home) = self.home.take() {
      home.release(self);
    }
  }
}
