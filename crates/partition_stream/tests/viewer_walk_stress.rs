//! Random viewer walks on a threaded executor, with configuration loaded
//! from disk.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use partition_stream::{
  ConfigError, Executor, GridPosition, HookError, PartitionHooks, PartitionManager,
  PartitionState, StreamingConfig, VolumeShape,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::NamedTempFile;

const CONFIG: &str = r#"
[volume]
shape = "box"
min_extent = 2
max_extent = 3

[partition]
size = [16.0, 16.0, 16.0]
cluster_size = 2

[activation]
capacity = 6
search_capacity = 40
prior_active_distance = 1
concurrency = 3

[passivation]
capacity = 6
search_capacity = 40
concurrency = 2

[pool]
max_capacity = 400
"#;

fn load(text: &str) -> Result<StreamingConfig, ConfigError> {
  let mut file = NamedTempFile::new().unwrap();
  file.write_all(text.as_bytes()).unwrap();
  StreamingConfig::load(file.path())
}

#[derive(Default)]
struct Balance {
  live: AtomicUsize,
  peak: AtomicUsize,
}

/// Sleeps a little in each hook so work overlaps ticks.
struct Terrain {
  balance: Arc<Balance>,
  seed: u64,
}

impl Terrain {
  fn hash(&self, pos: GridPosition) -> u64 {
    let h = (pos.x as i64 * 73_856_093) ^ (pos.y as i64 * 19_349_663) ^ (pos.z as i64 * 83_492_791);
    (h as u64) ^ self.seed
  }
}

impl PartitionHooks for Terrain {
  fn activate(&mut self, pos: GridPosition) -> Result<(), HookError> {
    std::thread::sleep(std::time::Duration::from_micros(self.hash(pos) % 300));
    let live = self.balance.live.fetch_add(1, Ordering::SeqCst) + 1;
    self.balance.peak.fetch_max(live, Ordering::SeqCst);
    Ok(())
  }

  fn passivate(&mut self, pos: GridPosition) -> Result<(), HookError> {
    std::thread::sleep(std::time::Duration::from_micros(self.hash(pos) % 200));
    self.balance.live.fetch_sub(1, Ordering::SeqCst);
    Ok(())
  }
}

fn check_consistent(manager: &PartitionManager<Terrain>) {
  let stats = manager.stats();
  assert_eq!(
    stats.activating + stats.active + stats.passivating + stats.failed,
    manager.live_len()
  );
  assert_eq!(stats.active, manager.active_len());
  let mut seen = 0;
  for partition in manager.iter_active() {
    let pos = partition.position().unwrap();
    assert!(partition.is_activation_completed());
    assert_eq!(manager.state_of(pos), Some(PartitionState::Active));
    seen += 1;
  }
  assert_eq!(seen, manager.active_len());
}

fn check_settled(manager: &PartitionManager<Terrain>, viewer: GridPosition) {
  let (min, max) = manager.policy().volumes(viewer);
  for partition in manager.iter_active() {
    let pos = partition.position().unwrap();
    assert!(max.contains(pos), "{pos} active outside max volume");
  }
  for pos in min.positions() {
    assert!(manager.is_active(pos), "{pos} inside min volume is not active");
  }
}

#[test]
fn random_walk_keeps_invariants() {
  let config = load(CONFIG).unwrap();
  assert_eq!(config.volume.shape, VolumeShape::Box);
  let balance = Arc::new(Balance::default());
  let shared = balance.clone();
  let executor = Executor::threaded(4, "walk").unwrap();
  let mut manager = PartitionManager::new(&config, executor, move || Terrain {
    balance: shared.clone(),
    seed: 0x5eed,
  })
  .unwrap();
  manager.prewarm(32);

  let mut rng = StdRng::seed_from_u64(0xC0FFEE);
  let mut viewer = GridPosition::ORIGIN;
  for step in 0..300 {
    if rng.gen_bool(0.4) {
      let axis = rng.gen_range(0..3);
      let delta = if rng.gen_bool(0.5) { 1 } else { -1 };
      let mut d = [0; 3];
      d[axis] = delta;
      viewer = viewer + GridPosition::new(d[0], d[1], d[2]);
    }
    manager.update(viewer);
    check_consistent(&manager);

    if step % 75 == 74 {
      manager.run_until_quiescent(viewer, 5000).unwrap();
      check_consistent(&manager);
      check_settled(&manager, viewer);
    }
  }

  manager.run_until_quiescent(viewer, 5000).unwrap();
  check_settled(&manager, viewer);
  assert!(manager.failed_positions().is_empty());

  let min_len = manager.policy().min_volume(viewer).len();
  assert!(balance.peak.load(Ordering::SeqCst) >= min_len);

  manager.close();
  assert_eq!(balance.live.load(Ordering::SeqCst), 0);
  let stats = manager.stats();
  assert_eq!(stats.live(), 0);
  assert_eq!(stats.activations_total, stats.passivations_total);
  assert_eq!(stats.pool_free, stats.pool_total);
}

#[test]
fn teleporting_viewer_converges() {
  let config = load(CONFIG).unwrap();
  let balance = Arc::new(Balance::default());
  let shared = balance.clone();
  let executor = Executor::threaded(2, "teleport").unwrap();
  let mut manager = PartitionManager::new(&config, executor, move || Terrain {
    balance: shared.clone(),
    seed: 1,
  })
  .unwrap();

  let mut rng = StdRng::seed_from_u64(99);
  for _ in 0..5 {
    let viewer = GridPosition::new(
      rng.gen_range(-100..100),
      rng.gen_range(-100..100),
      rng.gen_range(-100..100),
    );
    manager.run_until_quiescent(viewer, 5000).unwrap();
    check_consistent(&manager);
    check_settled(&manager, viewer);
    let max_len = manager.policy().max_volume(viewer).len();
    assert!((125..=max_len).contains(&manager.active_len()));
  }
  manager.close();
  assert_eq!(balance.live.load(Ordering::SeqCst), 0);
}

#[test]
fn broken_config_file_is_reported() {
  let err = load("[volume]\nmin_extent = 4\nmax_extent = 1\n").unwrap_err();
  assert!(matches!(err, ConfigError::Invalid(_)));

  let err = load("[volume\n").unwrap_err();
  assert!(matches!(err, ConfigError::Parse(_)));

  let err = StreamingConfig::load("/nonexistent/streaming.toml").unwrap_err();
  assert!(matches!(err, ConfigError::Io(_)));
}
