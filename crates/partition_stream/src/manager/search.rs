//! Budgeted candidate searches.
//!
//! Both searches stop after `search_capacity` examinations or
//! `capacity` selections, whichever comes first, and leave a cursor so the
//! next tick continues where this one stopped. Selection is encounter order,
//! which is deterministic because every enumeration below is.

use std::ops::{Bound, ControlFlow};

use crate::coords::{ClusterPos, GridPosition};
use crate::volume::{ActiveVolume, ShellCursor};

use super::cluster::ClusterIndex;

/// Per-tick limits of one search.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SearchBudget {
  /// Maximum selections.
  pub capacity: usize,
  /// Maximum examinations.
  pub search_capacity: usize,
}

#[derive(Debug, Default)]
pub(crate) struct SearchOutcome {
  pub selected: Vec<GridPosition>,
  pub examined: usize,
}

impl SearchOutcome {
  fn exhausted(&self, budget: SearchBudget) -> bool {
    self.examined >= budget.search_capacity || self.selected.len() >= budget.capacity
  }
}

/// Resume point of the passivation scan: the next position to examine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ClusterCursor {
  pub cluster: ClusterPos,
  pub pos: GridPosition,
}

/// Selects active partitions outside `max`.
///
/// Clusters are visited round-robin from `cursor`. A cluster entirely inside
/// `max` costs one examination and is skipped without looking at its
/// members. `cursor` is cleared once a full cycle completes.
pub(crate) fn scan_passivation(
  index: &ClusterIndex,
  cursor: &mut Option<ClusterCursor>,
  max: &ActiveVolume,
  budget: SearchBudget,
) -> SearchOutcome {
  let mut out = SearchOutcome::default();
  let start = match *cursor {
    Some(c) => c,
    None => match index.clusters().first_key_value() {
      Some((&cluster, members)) => match members.first() {
        Some(&pos) => ClusterCursor { cluster, pos },
        None => return out,
      },
      None => return out,
    },
  };

  let from = Bound::Included(start.pos);
  let head = index.clusters().range(start.cluster..).map(|(c, m)| {
    let lower = if *c == start.cluster { from } else { Bound::Unbounded };
    (*c, m, lower, Bound::Unbounded)
  });
  let tail = index
    .clusters()
    .range(..start.cluster)
    .map(|(c, m)| (*c, m, Bound::Unbounded, Bound::Unbounded));
  let cluster_size = index.cluster_size();
  // Members of the start cluster that precede the cursor close the cycle.
  // A start cluster inside `max` was already skipped as a whole.
  let (start_min, start_max) = start.cluster.grid_bounds(cluster_size);
  let wrap = index
    .clusters()
    .get_key_value(&start.cluster)
    .filter(|_| !max.contains_box(start_min, start_max))
    .map(|(c, m)| (*c, m, Bound::Unbounded, Bound::Excluded(start.pos)));

  for (cluster, members, lower, upper) in head.chain(tail).chain(wrap) {
    let mut range = members.range((lower, upper)).copied().peekable();
    let Some(&first) = range.peek() else {
      continue;
    };
    if out.exhausted(budget) {
      *cursor = Some(ClusterCursor { cluster, pos: first });
      return out;
    }
    out.examined += 1;
    let (min, max_corner) = cluster.grid_bounds(cluster_size);
    if max.contains_box(min, max_corner) {
      continue;
    }
    for pos in range {
      if out.exhausted(budget) {
        *cursor = Some(ClusterCursor { cluster, pos });
        return out;
      }
      out.examined += 1;
      if !max.contains(pos) {
        out.selected.push(pos);
      }
    }
  }
  *cursor = None;
  out
}

/// Resume points of the activation scan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct ActivationCursors {
  /// Next position inside the prior shells.
  pub prior: ShellCursor,
  /// Next position beyond them.
  pub outer: ShellCursor,
}

/// Selects free, eligible positions inside `min`, closest first.
///
/// Shells up to `prior_distance` are scanned first, from `cursors.prior`.
/// When the budget runs out inside them the prior cursor stays put, so a
/// prior volume larger than `search_capacity` is still covered over several
/// calls. Once the prior volume is exhausted its cursor returns to the center
/// and farther shells resume from `cursors.outer`, which wraps back to the
/// first outer shell once the volume is exhausted.
pub(crate) fn scan_activation(
  min: &ActiveVolume,
  prior_distance: u32,
  cursors: &mut ActivationCursors,
  budget: SearchBudget,
  mut eligible: impl FnMut(GridPosition) -> bool,
) -> SearchOutcome {
  let mut out = SearchOutcome::default();
  let mut visit = |pos: GridPosition| {
    out.examined += 1;
    if eligible(pos) {
      out.selected.push(pos);
    }
    if out.exhausted(budget) {
      ControlFlow::Break(())
    } else {
      ControlFlow::Continue(())
    }
  };

  let prior_extent = prior_distance.min(min.extent);
  let prior = ActiveVolume::new(min.shape, min.center, prior_extent);
  match prior.for_each_from(cursors.prior, &mut visit) {
    Some(next) => {
      cursors.prior = next;
      return out;
    }
    None => cursors.prior = ShellCursor::START,
  }

  let outer_start = ShellCursor::at_shell(prior_extent + 1);
  if cursors.outer < outer_start {
    cursors.outer = outer_start;
  }
  cursors.outer = min.for_each_from(cursors.outer, &mut visit).unwrap_or(outer_start);
  out
}
