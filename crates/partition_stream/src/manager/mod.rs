//! Partition streaming orchestrator.
//!
//! [`PartitionManager`] decides, once per tick, which partitions around the
//! viewer activate and which passivate, and drives the background work that
//! does it.
//!
//! # Tick
//!
//! 1. Recompute the min/max volumes around the viewer.
//! 2. Passivation search: active partitions outside the max volume. Dispatch
//!    passivation tasks and fold finished ones back into the pool.
//! 3. Activation search: free positions inside the min volume, closest first.
//! 4. Dispatch activation tasks.
//! 5. Fold completions sent back by workers into the position map.
//!
//! # Ownership
//!
//! A partition instance is owned by exactly one of: the pool (`Free`), a
//! background task (`Activating`/`Passivating`), or the position map
//! (`Active`/`Failed`). Workers never see the map; they run the payload
//! hook and send the instance back over a channel that only `update`
//! drains.

mod cluster;
mod search;
mod stats;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender};
pub use stats::{StreamStats, TickSummary};

use self::cluster::ClusterIndex;
use self::search::{ActivationCursors, ClusterCursor, SearchBudget};
use crate::config::{ConfigError, StreamingConfig};
use crate::coords::GridPosition;
use crate::partition::{HookError, Partition, PartitionHooks, PartitionState};
use crate::pool::Pool;
use crate::provider::BackingStore;
use crate::scheduling::{Executor, TaskScheduler};
use crate::volume::ActiveVolumePolicy;

/// Predicate deciding whether a free position may be activated now.
pub type ActivationFilter = Box<dyn Fn(GridPosition) -> bool + Send + Sync>;

enum Entry<P> {
  /// Instance owned by a background task.
  InFlight(PartitionState),
  /// Instance held by the manager: `Active` or `Failed`.
  Resident(Partition<P>),
}

impl<P: PartitionHooks> Entry<P> {
  fn state(&self) -> PartitionState {
    match self {
      Self::InFlight(state) => *state,
      Self::Resident(partition) => partition.state(),
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Transition {
  Activate,
  Passivate,
}

/// A finished hook, sent from a worker back to the manager.
struct Completion<P> {
  transition: Transition,
  partition: Partition<P>,
  result: Result<(), HookError>,
}

/// Streams partitions in and out around a moving viewer.
pub struct PartitionManager<P: PartitionHooks> {
  policy: ActiveVolumePolicy,
  prior_active_distance: u32,
  activation_budget: SearchBudget,
  passivation_budget: SearchBudget,
  pool: Pool<Partition<P>>,
  entries: HashMap<GridPosition, Entry<P>>,
  /// Active positions only.
  clusters: ClusterIndex,
  dirty: BTreeSet<GridPosition>,
  activation: TaskScheduler,
  passivation: TaskScheduler,
  completion_tx: Sender<Completion<P>>,
  completion_rx: Receiver<Completion<P>>,
  filter: Option<ActivationFilter>,
  store: Option<Arc<dyn BackingStore>>,
  center: Option<GridPosition>,
  activation_cursors: ActivationCursors,
  passivation_cursor: Option<ClusterCursor>,
  ticks: u64,
  activations_total: u64,
  passivations_total: u64,
  hook_failures_total: u64,
  last_tick: TickSummary,
  closed: bool,
}

impl<P: PartitionHooks> PartitionManager<P> {
  /// Builds a manager from a validated configuration.
  ///
  /// `payload` constructs a fresh payload whenever the pool runs dry.
  /// Both schedulers dispatch onto `executor`.
  pub fn new(
    config: &StreamingConfig,
    executor: Executor,
    payload: impl Fn() -> P + Send + Sync + 'static,
  ) -> Result<Self, ConfigError> {
    config.validate()?;
    let policy = config.volume_policy()?;
    let (completion_tx, completion_rx) = async_channel::unbounded();
    log::debug!(
      "Partition manager: {:?} extents {}..{}, executor {:?}",
      policy.shape(),
      policy.min_extent(),
      policy.max_extent(),
      executor
    );
    Ok(Self {
      policy,
      prior_active_distance: config.activation.prior_active_distance,
      activation_budget: SearchBudget {
        capacity: config.activation.capacity,
        search_capacity: config.activation.search_capacity,
      },
      passivation_budget: SearchBudget {
        capacity: config.passivation.capacity,
        search_capacity: config.passivation.search_capacity,
      },
      pool: Pool::with_max_capacity(
        move || Partition::new(payload()),
        config.pool.max_capacity,
      ),
      entries: HashMap::new(),
      clusters: ClusterIndex::new(config.partition.cluster_size),
      dirty: BTreeSet::new(),
      activation: TaskScheduler::new(
        "activation",
        config.activation.concurrency,
        executor.clone(),
      ),
      passivation: TaskScheduler::new("passivation", config.passivation.concurrency, executor),
      completion_tx,
      completion_rx,
      filter: None,
      store: None,
      center: None,
      activation_cursors: ActivationCursors::default(),
      passivation_cursor: None,
      ticks: 0,
      activations_total: 0,
      passivations_total: 0,
      hook_failures_total: 0,
      last_tick: TickSummary::default(),
      closed: false,
    })
  }

  /// Skips free positions for which `filter` returns false. Skipped
  /// positions are retried on later ticks.
  pub fn with_activation_filter(
    mut self,
    filter: impl Fn(GridPosition) -> bool + Send + Sync + 'static,
  ) -> Self {
    self.set_activation_filter(filter);
    self
  }

  pub fn set_activation_filter(
    &mut self,
    filter: impl Fn(GridPosition) -> bool + Send + Sync + 'static,
  ) {
    self.filter = Some(Box::new(filter));
  }

  /// Attaches the store closed at the end of [`close`](Self::close).
  pub fn with_backing_store(mut self, store: Arc<dyn BackingStore>) -> Self {
    self.store = Some(store);
    self
  }

  // === Tick ===

  /// Runs one streaming tick around `viewer`. Never blocks on workers.
  #[cfg_attr(feature = "tracy", tracing::instrument(skip_all))]
  pub fn update(&mut self, viewer: GridPosition) -> TickSummary {
    if self.closed {
      return TickSummary::default();
    }
    self.ticks += 1;
    let mut summary = TickSummary::default();

    if self.center != Some(viewer) {
      self.center = Some(viewer);
      self.activation_cursors = ActivationCursors::default();
    }
    let (min, max) = self.policy.volumes(viewer);

    let found = search::scan_passivation(
      &self.clusters,
      &mut self.passivation_cursor,
      &max,
      self.passivation_budget,
    );
    summary.passivation_examined = found.examined;
    for pos in found.selected {
      if self.begin_passivation(pos) {
        summary.passivations_started += 1;
      }
    }
    // Fold finished passivations first so activation can reuse their instances.
    self.passivation.update();
    self.fold_completions(&mut summary);

    let entries = &self.entries;
    let filter = self.filter.as_deref();
    let found = search::scan_activation(
      &min,
      self.prior_active_distance,
      &mut self.activation_cursors,
      self.activation_budget,
      |pos| !entries.contains_key(&pos) && filter.is_none_or(|f| f(pos)),
    );
    summary.activation_examined = found.examined;
    for pos in found.selected {
      self.begin_activation(pos);
      summary.activations_started += 1;
    }

    self.activation.update();
    self.fold_completions(&mut summary);
    self.last_tick = summary;
    summary
  }

  fn fold_completions(&mut self, summary: &mut TickSummary) {
    let (applied, failures) = self.apply_completions();
    summary.completions_applied += applied;
    summary.failures += failures;
  }

  fn begin_activation(&mut self, pos: GridPosition) {
    debug_assert!(!self.entries.contains_key(&pos), "{pos} is already live");
    debug_assert!(!self.clusters.contains(pos));
    let mut partition = self.pool.acquire();
    partition.assign(pos);
    self
      .entries
      .insert(pos, Entry::InFlight(PartitionState::Activating));

    let tx = self.completion_tx.clone();
    self.activation.enqueue(move || {
      let result = partition.run_activate();
      send_completion(&tx, Transition::Activate, partition, result);
    });
    log::debug!("Activating {}", pos);
  }

  /// Moves an `Active` partition to `Passivating`. Returns false for any
  /// other state.
  fn begin_passivation(&mut self, pos: GridPosition) -> bool {
    let mut partition = match self.entries.remove(&pos) {
      Some(Entry::Resident(p)) if p.state() == PartitionState::Active => p,
      Some(other) => {
        self.entries.insert(pos, other);
        return false;
      }
      None => return false,
    };
    self.clusters.remove(pos);
    self.dirty.remove(&pos);
    partition.begin_passivation();
    self
      .entries
      .insert(pos, Entry::InFlight(PartitionState::Passivating));

    let tx = self.completion_tx.clone();
    self.passivation.enqueue(move || {
      let result = partition.run_passivate();
      send_completion(&tx, Transition::Passivate, partition, result);
    });
    log::debug!("Passivating {}", pos);
    true
  }

  /// Applies every completion received so far.
  ///
  /// Returns `(applied, failed)`.
  fn apply_completions(&mut self) -> (usize, usize) {
    let mut applied = 0;
    let mut failed = 0;
    while let Ok(done) = self.completion_rx.try_recv() {
      applied += 1;
      let Completion {
        transition,
        mut partition,
        result,
      } = done;
      let Some(pos) = partition.position() else {
        log::warn!("Dropping {:?} completion without a position", transition);
        partition.reset();
        self.pool.release(partition);
        continue;
      };
      debug_assert!(
        matches!(self.entries.get(&pos), Some(Entry::InFlight(_))),
        "completion for {pos} which is not in flight"
      );

      match (transition, result) {
        (Transition::Activate, Ok(())) => {
          partition.complete_activation();
          self.clusters.insert(pos);
          self.dirty.insert(pos);
          self.entries.insert(pos, Entry::Resident(partition));
          self.activations_total += 1;
        }
        (Transition::Passivate, Ok(())) => {
          self.entries.remove(&pos);
          partition.reset();
          self.pool.release(partition);
          self.passivations_total += 1;
        }
        (transition, Err(err)) => {
          failed += 1;
          self.hook_failures_total += 1;
          if matches!(err, HookError::Panicked(_)) {
            log::error!("{:?} of {} failed: {}", transition, pos, err);
          } else {
            log::warn!("{:?} of {} failed: {}", transition, pos, err);
          }
          partition.mark_failed();
          self.entries.insert(pos, Entry::Resident(partition));
        }
      }
    }
    (applied, failed)
  }

  // === Consumer queries ===

  /// Returns the partition at `pos` if it finished activating.
  pub fn get(&self, pos: GridPosition) -> Option<&Partition<P>> {
    match self.entries.get(&pos) {
      Some(Entry::Resident(p)) if p.is_activation_completed() => Some(p),
      _ => None,
    }
  }

  pub fn get_mut(&mut self, pos: GridPosition) -> Option<&mut Partition<P>> {
    match self.entries.get_mut(&pos) {
      Some(Entry::Resident(p)) if p.is_activation_completed() => Some(p),
      _ => None,
    }
  }

  /// Iterates fully activated partitions in cluster order.
  pub fn iter_active(&self) -> impl Iterator<Item = &Partition<P>> + '_ {
    self.clusters.positions().filter_map(move |pos| self.get(pos))
  }

  /// Lifecycle state at `pos`, or `None` if no partition is bound there.
  pub fn state_of(&self, pos: GridPosition) -> Option<PartitionState> {
    self.entries.get(&pos).map(Entry::state)
  }

  pub fn is_active(&self, pos: GridPosition) -> bool {
    self.get(pos).is_some()
  }

  /// Number of `Active` partitions.
  pub fn active_len(&self) -> usize {
    self.clusters.len()
  }

  /// Number of non-free partitions.
  pub fn live_len(&self) -> usize {
    self.entries.len()
  }

  /// Viewer position of the last tick.
  pub fn center(&self) -> Option<GridPosition> {
    self.center
  }

  pub fn policy(&self) -> &ActiveVolumePolicy {
    &self.policy
  }

  // === Dirty tracking ===

  /// Flags an active partition for a rebuild of its derived state.
  ///
  /// Returns false if `pos` is not active.
  pub fn mark_dirty(&mut self, pos: GridPosition) -> bool {
    if let Some(Entry::Resident(p)) = self.entries.get_mut(&pos)
      && p.is_activation_completed()
    {
      p.set_dirty(true);
      self.dirty.insert(pos);
      return true;
    }
    false
  }

  /// Returns and clears every flagged position, in ascending order.
  pub fn drain_dirty(&mut self) -> Vec<GridPosition> {
    let drained = std::mem::take(&mut self.dirty);
    for pos in &drained {
      if let Some(Entry::Resident(p)) = self.entries.get_mut(pos) {
        p.set_dirty(false);
      }
    }
    drained.into_iter().collect()
  }

  // === Failure recovery ===

  /// Positions parked in `Failed`, in ascending order.
  pub fn failed_positions(&self) -> Vec<GridPosition> {
    let mut failed: Vec<_> = self
      .entries
      .iter()
      .filter(|(_, e)| e.state() == PartitionState::Failed)
      .map(|(pos, _)| *pos)
      .collect();
    failed.sort_unstable();
    failed
  }

  /// Returns a failed partition to the pool, freeing its position.
  ///
  /// Returns false if `pos` is not failed.
  pub fn recover(&mut self, pos: GridPosition) -> bool {
    let mut partition = match self.entries.remove(&pos) {
      Some(Entry::Resident(p)) if p.state() == PartitionState::Failed => p,
      Some(other) => {
        self.entries.insert(pos, other);
        return false;
      }
      None => return false,
    };
    partition.reset();
    self.pool.release(partition);
    log::info!("Recovered failed partition at {}", pos);
    true
  }

  // === Runtime tuning ===

  pub fn set_activation_concurrency(&mut self, level: usize) {
    self.activation.set_concurrency_level(level);
  }

  pub fn set_passivation_concurrency(&mut self, level: usize) {
    self.passivation.set_concurrency_level(level);
  }

  pub fn set_pool_max_capacity(&mut self, max_capacity: usize) {
    self.pool.set_max_capacity(max_capacity);
  }

  /// Builds `count` free partitions ahead of the first tick.
  pub fn prewarm(&mut self, count: usize) {
    self.pool.prewarm(count);
  }

  // === Quiescence ===

  fn has_in_flight(&self) -> bool {
    self
      .entries
      .values()
      .any(|e| matches!(e, Entry::InFlight(_)))
  }

  fn wait_for_workers(&self, timeout: Duration) {
    self.activation.wait_for_release(timeout);
    self.passivation.wait_for_release(timeout);
  }

  /// Returns true if no work is in flight and the partitions match the
  /// volumes around the last center: nothing active outside the max
  /// volume, and every eligible position inside the min volume live.
  ///
  /// Walks the whole min volume; meant for tests and tools.
  pub fn is_quiescent(&self) -> bool {
    if self.has_in_flight()
      || !self.activation.is_idle()
      || !self.passivation.is_idle()
      || !self.completion_rx.is_empty()
    {
      return false;
    }
    let Some(center) = self.center else {
      return true;
    };
    let (min, max) = self.policy.volumes(center);
    if self.clusters.positions().any(|pos| !max.contains(pos)) {
      return false;
    }
    let filter = self.filter.as_deref();
    min
      .positions()
      .into_iter()
      .all(|pos| self.entries.contains_key(&pos) || filter.is_some_and(|f| !f(pos)))
  }

  /// Ticks around `viewer` until quiescent, waiting briefly for workers
  /// between ticks.
  ///
  /// Returns the number of ticks taken, or `None` if `max_ticks` ran out.
  pub fn run_until_quiescent(&mut self, viewer: GridPosition, max_ticks: u32) -> Option<u32> {
    for tick in 1..=max_ticks {
      self.update(viewer);
      if self.is_quiescent() {
        return Some(tick);
      }
      if self.has_in_flight() {
        self.wait_for_workers(Duration::from_millis(2));
      }
    }
    None
  }

  // === Shutdown ===

  /// Passivates every partition, drains both schedulers, then closes the
  /// attached backing store.
  ///
  /// Activating partitions finish activating first. Failed partitions are
  /// returned to the pool. Later calls, and later `update`s, do nothing.
  pub fn close(&mut self) {
    if self.closed {
      return;
    }
    log::info!("Closing partition manager with {} live partitions", self.entries.len());
    loop {
      let active: Vec<_> = self.clusters.positions().collect();
      for pos in active {
        self.begin_passivation(pos);
      }
      self.passivation.update();
      self.activation.update();
      self.apply_completions();
      if !self.has_in_flight() && self.clusters.len() == 0 {
        break;
      }
      self.wait_for_workers(Duration::from_millis(5));
    }

    for pos in self.failed_positions() {
      self.recover(pos);
    }
    self.dirty.clear();
    if let Some(store) = self.store.take() {
      store.close();
    }
    self.closed = true;
    log::info!(
      "Partition manager closed after {} ticks ({} activations, {} passivations)",
      self.ticks,
      self.activations_total,
      self.passivations_total
    );
  }

  pub fn is_closed(&self) -> bool {
    self.closed
  }

  pub fn stats(&self) -> StreamStats {
    let mut stats = StreamStats {
      ticks: self.ticks,
      clusters: self.clusters.cluster_count(),
      pool_total: self.pool.total_object_count(),
      pool_free: self.pool.free_count(),
      activation: self.activation.stats(),
      passivation: self.passivation.stats(),
      activations_total: self.activations_total,
      passivations_total: self.passivations_total,
      hook_failures_total: self.hook_failures_total,
      last_tick: self.last_tick,
      ..Default::default()
    };
    for entry in self.entries.values() {
      match entry.state() {
        PartitionState::Activating => stats.activating += 1,
        PartitionState::Active => stats.active += 1,
        PartitionState::Passivating => stats.passivating += 1,
        PartitionState::Failed => stats.failed += 1,
        PartitionState::Free => {}
      }
    }
    stats
  }
}

fn send_completion<P>(
  tx: &Sender<Completion<P>>,
  transition: Transition,
  partition: Partition<P>,
  result: Result<(), HookError>,
) {
  let done = Completion {
    transition,
    partition,
    result,
  };
  if tx.send_blocking(done).is_err() {
    log::debug!("{:?} completion dropped: manager is gone", transition);
  }
}
