//! Active volumes around a reference position.
//!
//! An [`ActiveVolume`] is a predicate over grid positions: an axis-aligned
//! box (Chebyshev ball) or a diamond (L1 ball) of a given extent around a
//! center. Volumes are enumerated shell by shell, closest first, and the
//! enumeration can stop and later resume from a [`ShellCursor`], so a large
//! volume can be scanned across several ticks under a fixed budget.
//!
//! [`ActiveVolumePolicy`] derives the min/max volume pair whose gap forms
//! the hysteresis band.

use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::coords::GridPosition;

/// Shape of an active volume.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeShape {
  /// Axis-aligned box: `max(|dx|, |dy|, |dz|) <= extent`.
  Box,
  /// L1 ball: `|dx| + |dy| + |dz| <= extent`.
  #[default]
  Diamond,
}

impl VolumeShape {
  /// Distance from `center` to `pos` in this shape's metric.
  #[inline]
  pub fn distance(self, center: GridPosition, pos: GridPosition) -> u32 {
    match self {
      Self::Box => center.chebyshev_distance(pos),
      Self::Diamond => center.manhattan_distance(pos),
    }
  }

  /// Number of positions at exactly distance `shell`.
  pub fn shell_len(self, shell: u32) -> usize {
    let r = shell as usize;
    match self {
      _ if r == 0 => 1,
      Self::Box => (2 * r + 1).pow(3) - (2 * r - 1).pow(3),
      Self::Diamond => 4 * r * r + 2,
    }
  }
}

/// Resume point of an interrupted volume enumeration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShellCursor {
  /// Shell (distance from center) to resume at.
  pub shell: u32,
  /// Positions of that shell already visited.
  pub offset: usize,
}

impl ShellCursor {
  pub const START: Self = Self {
    shell: 0,
    offset: 0,
  };

  /// Cursor at the first position of `shell`.
  pub const fn at_shell(shell: u32) -> Self {
    Self { shell, offset: 0 }
  }
}

/// Spatial predicate over grid positions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ActiveVolume {
  pub shape: VolumeShape,
  pub center: GridPosition,
  pub extent: u32,
}

impl ActiveVolume {
  pub fn new(shape: VolumeShape, center: GridPosition, extent: u32) -> Self {
    Self {
      shape,
      center,
      extent,
    }
  }

  /// Distance of `pos` from the center in this volume's metric.
  #[inline]
  pub fn distance(&self, pos: GridPosition) -> u32 {
    self.shape.distance(self.center, pos)
  }

  #[inline]
  pub fn contains(&self, pos: GridPosition) -> bool {
    self.distance(pos) <= self.extent
  }

  /// Returns true if the inclusive box `[min, max]` lies entirely inside.
  ///
  /// Both shapes are convex, so checking the eight corners is enough.
  pub fn contains_box(&self, min: GridPosition, max: GridPosition) -> bool {
    box_corners(min, max).into_iter().all(|c| self.contains(c))
  }

  /// Returns true if `other` (same center or not) lies entirely inside.
  pub fn contains_volume(&self, other: &ActiveVolume) -> bool {
    let offset = self.distance(other.center);
    // Farthest point of `other` from its own center, in this volume's metric.
    let reach = match (self.shape, other.shape) {
      (VolumeShape::Diamond, VolumeShape::Box) => other.extent.saturating_mul(3),
      _ => other.extent,
    };
    offset.saturating_add(reach) <= self.extent
  }

  /// Total number of positions inside the volume (never zero).
  #[allow(clippy::len_without_is_empty)]
  pub fn len(&self) -> usize {
    (0..=self.extent).map(|r| self.shape.shell_len(r)).sum()
  }

  /// Iterates the positions at exactly distance `shell`, in a fixed order.
  pub fn shell(&self, shell: u32) -> Box<dyn Iterator<Item = GridPosition>> {
    let center = self.center;
    let r = shell as i32;
    match self.shape {
      VolumeShape::Diamond => Box::new((-r..=r).flat_map(move |dx| {
        let ry = r - dx.abs();
        (-ry..=ry).flat_map(move |dy| {
          let rz = ry - dy.abs();
          std::iter::once(rz)
            .chain((rz != 0).then_some(-rz))
            .map(move |dz| center + GridPosition::new(dx, dy, dz))
        })
      })),
      VolumeShape::Box => Box::new((-r..=r).flat_map(move |dx| {
        (-r..=r).flat_map(move |dy| {
          let on_face = dx.abs() == r || dy.abs() == r;
          let step = if on_face || r == 0 { 1 } else { 2 * r as usize };
          (-r..=r)
            .step_by(step)
            .map(move |dz| center + GridPosition::new(dx, dy, dz))
        })
      })),
    }
  }

  /// Visits every position, closest shell first.
  pub fn for_each(&self, f: impl FnMut(GridPosition) -> ControlFlow<()>) -> Option<ShellCursor> {
    self.for_each_from(ShellCursor::START, f)
  }

  /// Visits positions starting at `cursor`, closest shell first.
  ///
  /// Stops when `f` breaks and returns the cursor of the next unvisited
  /// position, or returns `None` once the outermost shell is exhausted.
  pub fn for_each_from(
    &self,
    cursor: ShellCursor,
    mut f: impl FnMut(GridPosition) -> ControlFlow<()>,
  ) -> Option<ShellCursor> {
    let mut skip = cursor.offset;
    for shell in cursor.shell..=self.extent {
      for (offset, pos) in self.shell(shell).enumerate().skip(skip) {
        if f(pos).is_break() {
          return Some(ShellCursor {
            shell,
            offset: offset + 1,
          });
        }
      }
      skip = 0;
    }
    None
  }

  /// Collects every position, closest shell first.
  pub fn positions(&self) -> Vec<GridPosition> {
    let mut out = Vec::with_capacity(self.len());
    self.for_each(|p| {
      out.push(p);
      ControlFlow::Continue(())
    });
    out
  }
}

fn box_corners(min: GridPosition, max: GridPosition) -> [GridPosition; 8] {
  [
    GridPosition::new(min.x, min.y, min.z),
    GridPosition::new(max.x, min.y, min.z),
    GridPosition::new(min.x, max.y, min.z),
    GridPosition::new(max.x, max.y, min.z),
    GridPosition::new(min.x, min.y, max.z),
    GridPosition::new(max.x, min.y, max.z),
    GridPosition::new(min.x, max.y, max.z),
    GridPosition::new(max.x, max.y, max.z),
  ]
}

/// Min/max volume pair with a hysteresis band between them.
///
/// Positions inside the min volume are activation candidates; partitions
/// outside the max volume are passivation candidates; everything in between
/// is left alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActiveVolumePolicy {
  shape: VolumeShape,
  min_extent: u32,
  max_extent: u32,
}

impl ActiveVolumePolicy {
  /// Creates a policy, rejecting `min_extent > max_extent`.
  pub fn new(shape: VolumeShape, min_extent: u32, max_extent: u32) -> Result<Self, ConfigError> {
    if min_extent > max_extent {
      return Err(ConfigError::Invalid(format!(
        "min active extent {} exceeds max active extent {}",
        min_extent, max_extent
      )));
    }
    Ok(Self {
      shape,
      min_extent,
      max_extent,
    })
  }

  pub fn shape(&self) -> VolumeShape {
    self.shape
  }

  pub fn min_extent(&self) -> u32 {
    self.min_extent
  }

  pub fn max_extent(&self) -> u32 {
    self.max_extent
  }

  pub fn min_volume(&self, center: GridPosition) -> ActiveVolume {
    ActiveVolume::new(self.shape, center, self.min_extent)
  }

  pub fn max_volume(&self, center: GridPosition) -> ActiveVolume {
    ActiveVolume::new(self.shape, center, self.max_extent)
  }

  /// Returns `(min, max)` volumes centered on `center`.
  pub fn volumes(&self, center: GridPosition) -> (ActiveVolume, ActiveVolume) {
    (self.min_volume(center), self.max_volume(center))
  }
}
