//! End-to-end streaming scenarios driven through the public API.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use partition_stream::{
  BackingStore, CloseOnce, ContentProvider, Executor, GridPosition, HookError, PartitionHooks,
  PartitionManager, PartitionState, ProvidedContent, ProviderError, StreamingConfig, VolumeShape,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Event {
  Activated(GridPosition),
  Passivated(GridPosition),
}

type Journal = Arc<Mutex<Vec<Event>>>;

struct Recorder {
  journal: Journal,
}

impl PartitionHooks for Recorder {
  fn activate(&mut self, pos: GridPosition) -> Result<(), HookError> {
    self.journal.lock().unwrap().push(Event::Activated(pos));
    Ok(())
  }

  fn passivate(&mut self, pos: GridPosition) -> Result<(), HookError> {
    self.journal.lock().unwrap().push(Event::Passivated(pos));
    Ok(())
  }
}

fn diamond(min: u32, max: u32, capacity: usize) -> StreamingConfig {
  let mut config = StreamingConfig::default();
  config.volume.shape = VolumeShape::Diamond;
  config.volume.min_extent = min;
  config.volume.max_extent = max;
  config.activation.capacity = capacity;
  config.activation.search_capacity = 100;
  config.passivation.capacity = capacity;
  config.passivation.search_capacity = 100;
  config
}

fn recorded(config: &StreamingConfig, executor: Executor) -> (PartitionManager<Recorder>, Journal) {
  let journal = Journal::default();
  let shared = journal.clone();
  let manager = PartitionManager::new(config, executor, move || Recorder {
    journal: shared.clone(),
  })
  .unwrap();
  (manager, journal)
}

fn take(journal: &Journal) -> Vec<Event> {
  std::mem::take(&mut *journal.lock().unwrap())
}

fn active_set(manager: &PartitionManager<Recorder>) -> BTreeSet<GridPosition> {
  manager
    .iter_active()
    .filter_map(|p| p.position())
    .collect()
}

#[test]
fn diamond_fills_in_two_ticks_closest_first() {
  let (mut manager, _journal) = recorded(&diamond(1, 2, 4), Executor::Inline);

  let first = manager.update(GridPosition::ORIGIN);
  assert_eq!(first.activations_started, 4);
  assert!(manager.is_active(GridPosition::ORIGIN));

  let second = manager.update(GridPosition::ORIGIN);
  assert_eq!(second.activations_started, 3);
  assert_eq!(manager.active_len(), 7);
  assert!(manager.is_quiescent());

  let third = manager.update(GridPosition::ORIGIN);
  assert_eq!(third.activations_started, 0);
  assert_eq!(third.passivations_started, 0);
}

#[test]
fn one_step_activates_exactly_the_new_cells() {
  let config = diamond(1, 2, 16);
  let (mut manager, journal) = recorded(&config, Executor::Inline);
  manager.run_until_quiescent(GridPosition::ORIGIN, 10).unwrap();
  let before = active_set(&manager);
  take(&journal);

  let viewer = GridPosition::new(1, 0, 0);
  manager.run_until_quiescent(viewer, 10).unwrap();

  let policy = config.volume_policy().unwrap();
  let expected: HashSet<_> = policy
    .min_volume(viewer)
    .positions()
    .into_iter()
    .filter(|pos| !before.contains(pos))
    .map(Event::Activated)
    .collect();
  let events: HashSet<_> = take(&journal).into_iter().collect();
  assert_eq!(expected.len(), 5);
  assert_eq!(events, expected);
}

#[test]
fn walking_keeps_active_set_between_volumes() {
  let config = diamond(1, 2, 16);
  let policy = config.volume_policy().unwrap();
  let max_len = policy.max_volume(GridPosition::ORIGIN).len();
  let (mut manager, journal) = recorded(&config, Executor::Inline);

  let mut viewer = GridPosition::ORIGIN;
  for step in 0..12 {
    viewer = viewer + GridPosition::new(1, 0, 0);
    manager.run_until_quiescent(viewer, 10).unwrap();
    assert!(manager.active_len() <= max_len, "step {step}");

    let (min, max) = policy.volumes(viewer);
    let active = active_set(&manager);
    assert!(active.iter().all(|pos| max.contains(*pos)), "step {step}");
    assert!(min.positions().iter().all(|pos| active.contains(pos)), "step {step}");
  }

  // Everything passivated was activated first, and nothing twice in a row.
  let mut live = HashSet::new();
  for event in take(&journal) {
    match event {
      Event::Activated(pos) => assert!(live.insert(pos), "{pos} activated twice"),
      Event::Passivated(pos) => assert!(live.remove(&pos), "{pos} not active"),
    }
  }
  assert_eq!(live, active_set(&manager).into_iter().collect());
}

#[test]
fn hysteresis_band_survives_small_moves() {
  let (mut manager, journal) = recorded(&diamond(1, 3, 16), Executor::Inline);
  manager.run_until_quiescent(GridPosition::ORIGIN, 10).unwrap();
  take(&journal);

  // Back and forth inside the band: no passivation at all.
  for _ in 0..3 {
    manager.run_until_quiescent(GridPosition::new(1, 0, 0), 10).unwrap();
    manager.run_until_quiescent(GridPosition::ORIGIN, 10).unwrap();
  }
  assert!(
    take(&journal)
      .iter()
      .all(|e| matches!(e, Event::Activated(_)))
  );
}

#[test]
fn threaded_walk_then_close_balances_hooks() {
  let mut config = diamond(2, 3, 8);
  config.activation.concurrency = 3;
  config.passivation.concurrency = 2;
  let executor = Executor::threaded(4, "e2e").unwrap();
  let (mut manager, journal) = recorded(&config, executor);

  for x in 0..6 {
    manager.run_until_quiescent(GridPosition::new(x, x, 0), 2000).unwrap();
  }
  manager.update(GridPosition::new(40, 0, 0));
  manager.close();

  assert_eq!(manager.live_len(), 0);
  assert_eq!(manager.state_of(GridPosition::new(5, 5, 0)), None);
  let events = take(&journal);
  let activated = events.iter().filter(|e| matches!(e, Event::Activated(_))).count();
  let passivated = events.len() - activated;
  assert_eq!(activated, passivated);

  let stats = manager.stats();
  assert_eq!(stats.activations_total, stats.passivations_total);
  assert_eq!(stats.activation.panicked_total, 0);
}

/// Sparse region: content exists only on the `y == 0` plane.
#[derive(Default)]
struct FlatRegion {
  loads: AtomicUsize,
  saves: AtomicUsize,
  closes: AtomicUsize,
}

impl ContentProvider for FlatRegion {
  type Handle = Vec<u8>;

  fn exists(&self, pos: GridPosition) -> bool {
    pos.y == 0
  }

  fn activate(&self, pos: GridPosition) -> Result<Vec<u8>, ProviderError> {
    if !self.exists(pos) {
      return Err(ProviderError::Missing(pos));
    }
    self.loads.fetch_add(1, Ordering::SeqCst);
    Ok(vec![pos.x as u8; 8])
  }

  fn passivate(&self, _pos: GridPosition, _handle: Vec<u8>) -> Result<(), ProviderError> {
    self.saves.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}

impl BackingStore for FlatRegion {
  fn close(&self) {
    self.closes.fetch_add(1, Ordering::SeqCst);
  }
}

fn region_manager(
  provider: &Arc<CloseOnce<FlatRegion>>,
) -> PartitionManager<ProvidedContent<CloseOnce<FlatRegion>>> {
  PartitionManager::new(
    &diamond(2, 3, 32),
    Executor::Inline,
    ProvidedContent::factory(provider.clone()),
  )
  .unwrap()
  .with_activation_filter(ProvidedContent::activation_filter(provider.clone()))
  .with_backing_store(provider.clone())
}

#[test]
fn provider_content_streams_and_store_closes_once() {
  let provider = CloseOnce::new(FlatRegion::default());
  let mut a = region_manager(&provider);
  let mut b = region_manager(&provider);

  a.run_until_quiescent(GridPosition::ORIGIN, 10).unwrap();
  b.run_until_quiescent(GridPosition::new(10, 0, 0), 10).unwrap();

  // Radius-2 diamond restricted to the y = 0 plane.
  assert_eq!(a.active_len(), 13);
  assert_eq!(a.state_of(GridPosition::new(0, 1, 0)), None);
  let content = a.get(GridPosition::new(2, 0, 0)).unwrap().payload();
  assert_eq!(content.handle(), Some(&vec![2u8; 8]));
  assert_eq!(provider.loads.load(Ordering::SeqCst), 26);

  a.close();
  assert!(provider.is_closed());
  b.close();
  assert_eq!(provider.saves.load(Ordering::SeqCst), 26);
  assert_eq!(provider.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn provider_error_parks_partition() {
  let provider = CloseOnce::new(FlatRegion::default());
  // No filter: positions off the plane fail in the provider.
  let mut manager = PartitionManager::new(
    &diamond(1, 2, 16),
    Executor::Inline,
    ProvidedContent::factory(provider.clone()),
  )
  .unwrap();
  manager.update(GridPosition::ORIGIN);

  let failed = manager.failed_positions();
  assert_eq!(failed, vec![GridPosition::new(0, -1, 0), GridPosition::new(0, 1, 0)]);
  assert_eq!(
    manager.state_of(GridPosition::new(0, 1, 0)),
    Some(PartitionState::Failed)
  );
  assert_eq!(manager.active_len(), 5);

  manager.close();
  assert!(manager.failed_positions().is_empty());
  assert_eq!(manager.live_len(), 0);
}
