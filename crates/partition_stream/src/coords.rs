//! Coordinate types for the partition grid.
//!
//! - [`GridPosition`]: integer address of one partition
//! - [`PartitionSize`]: world-space extent of one partition
//! - [`ClusterPos`]: coarse grouping of grid cells used to bound iteration

use std::fmt;
use std::ops::{Add, Sub};

use bevy::math::{IVec3, Vec3};
use serde::{Deserialize, Serialize};

/// Integer address of a partition in the unbounded 3-D grid.
///
/// Two partitions are the same iff their positions are equal componentwise.
/// Ordering is lexicographic `(x, y, z)` and is used wherever a deterministic
/// iteration order is needed.
#[derive(
  Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct GridPosition {
  pub x: i32,
  pub y: i32,
  pub z: i32,
}

impl GridPosition {
  pub const ORIGIN: Self = Self::new(0, 0, 0);

  pub const fn new(x: i32, y: i32, z: i32) -> Self {
    Self { x, y, z }
  }

  /// L1 (Manhattan) distance, the metric of diamond volumes.
  #[inline]
  pub fn manhattan_distance(self, other: Self) -> u32 {
    self.x.abs_diff(other.x) + self.y.abs_diff(other.y) + self.z.abs_diff(other.z)
  }

  /// L∞ (Chebyshev) distance, the metric of box volumes.
  #[inline]
  pub fn chebyshev_distance(self, other: Self) -> u32 {
    self
      .x
      .abs_diff(other.x)
      .max(self.y.abs_diff(other.y))
      .max(self.z.abs_diff(other.z))
  }

  /// Returns the six face-adjacent neighbours.
  pub fn face_neighbors(self) -> [Self; 6] {
    [
      self + Self::new(1, 0, 0),
      self + Self::new(-1, 0, 0),
      self + Self::new(0, 1, 0),
      self + Self::new(0, -1, 0),
      self + Self::new(0, 0, 1),
      self + Self::new(0, 0, -1),
    ]
  }

  /// Returns the cluster containing this position.
  #[inline]
  pub fn cluster(self, cluster_size: u32) -> ClusterPos {
    let s = cluster_size.max(1) as i32;
    ClusterPos::new(
      self.x.div_euclid(s),
      self.y.div_euclid(s),
      self.z.div_euclid(s),
    )
  }
}

impl Add for GridPosition {
  type Output = Self;

  fn add(self, rhs: Self) -> Self {
    Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
  }
}

impl Sub for GridPosition {
  type Output = Self;

  fn sub(self, rhs: Self) -> Self {
    Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
  }
}

impl From<IVec3> for GridPosition {
  fn from(v: IVec3) -> Self {
    Self::new(v.x, v.y, v.z)
  }
}

impl From<GridPosition> for IVec3 {
  fn from(p: GridPosition) -> Self {
    IVec3::new(p.x, p.y, p.z)
  }
}

impl fmt::Display for GridPosition {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "({}, {}, {})", self.x, self.y, self.z)
  }
}

/// World-space extent of a single partition.
///
/// `world → grid` is componentwise floor-division by this vector.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartitionSize(pub [f32; 3]);

impl PartitionSize {
  pub const fn new(x: f32, y: f32, z: f32) -> Self {
    Self([x, y, z])
  }

  pub const fn uniform(s: f32) -> Self {
    Self([s, s, s])
  }

  /// Returns true if every component is finite and strictly positive.
  pub fn is_valid(&self) -> bool {
    self.0.iter().all(|c| c.is_finite() && *c > 0.0)
  }

  /// Maps a world position to the grid position of the partition containing it.
  pub fn world_to_grid(&self, world: Vec3) -> GridPosition {
    GridPosition::new(
      (world.x / self.0[0]).floor() as i32,
      (world.y / self.0[1]).floor() as i32,
      (world.z / self.0[2]).floor() as i32,
    )
  }

  /// Returns the world-space minimum corner of a partition.
  pub fn grid_to_world(&self, pos: GridPosition) -> Vec3 {
    Vec3::new(
      pos.x as f32 * self.0[0],
      pos.y as f32 * self.0[1],
      pos.z as f32 * self.0[2],
    )
  }
}

impl Default for PartitionSize {
  fn default() -> Self {
    Self::uniform(32.0)
  }
}

/// Address of a cluster of `cluster_size³` grid cells.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterPos {
  pub x: i32,
  pub y: i32,
  pub z: i32,
}

impl ClusterPos {
  pub const fn new(x: i32, y: i32, z: i32) -> Self {
    Self { x, y, z }
  }

  /// Returns the inclusive (min, max) grid corners covered by this cluster.
  pub fn grid_bounds(self, cluster_size: u32) -> (GridPosition, GridPosition) {
    let s = cluster_size.max(1) as i32;
    let min = GridPosition::new(self.x * s, self.y * s, self.z * s);
    let max = GridPosition::new(min.x + s - 1, min.y + s - 1, min.z + s - 1);
    (min, max)
  }
}
