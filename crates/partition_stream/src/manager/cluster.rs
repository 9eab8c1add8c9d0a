//! Cluster index over active partitions.
//!
//! Active positions are grouped by [`ClusterPos`] so the passivation search
//! can skip whole clusters that lie inside the max volume, instead of
//! touching every active partition each tick. Both levels are ordered maps,
//! which keeps every scan deterministic.

use std::collections::{BTreeMap, BTreeSet};

use crate::coords::{ClusterPos, GridPosition};

#[derive(Debug)]
pub(crate) struct ClusterIndex {
  cluster_size: u32,
  clusters: BTreeMap<ClusterPos, BTreeSet<GridPosition>>,
  len: usize,
}

impl ClusterIndex {
  pub fn new(cluster_size: u32) -> Self {
    Self {
      cluster_size: cluster_size.max(1),
      clusters: BTreeMap::new(),
      len: 0,
    }
  }

  pub fn cluster_size(&self) -> u32 {
    self.cluster_size
  }

  /// Returns false if `pos` was already indexed.
  pub fn insert(&mut self, pos: GridPosition) -> bool {
    let inserted = self
      .clusters
      .entry(pos.cluster(self.cluster_size))
      .or_default()
      .insert(pos);
    if inserted {
      self.len += 1;
    }
    inserted
  }

  /// Removes `pos`, dropping its cluster once empty.
  pub fn remove(&mut self, pos: GridPosition) -> bool {
    let cluster = pos.cluster(self.cluster_size);
    let Some(members) = self.clusters.get_mut(&cluster) else {
      return false;
    };
    let removed = members.remove(&pos);
    if members.is_empty() {
      self.clusters.remove(&cluster);
    }
    if removed {
      self.len -= 1;
    }
    removed
  }

  pub fn contains(&self, pos: GridPosition) -> bool {
    self
      .clusters
      .get(&pos.cluster(self.cluster_size))
      .is_some_and(|m| m.contains(&pos))
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn cluster_count(&self) -> usize {
    self.clusters.len()
  }

  pub fn clusters(&self) -> &BTreeMap<ClusterPos, BTreeSet<GridPosition>> {
    &self.clusters
  }

  /// All indexed positions, cluster by cluster.
  pub fn positions(&self) -> impl Iterator<Item = GridPosition> + '_ {
    self.clusters.values().flat_map(|m| m.iter().copied())
  }
}
