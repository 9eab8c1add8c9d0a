//! Execution contexts for dispatched tasks.

use std::fmt;
use std::sync::Arc;

use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};

/// Where a dispatched task runs.
#[derive(Clone, Default)]
pub enum Executor {
  /// Runs the task synchronously inside `TaskScheduler::update`.
  ///
  /// Used headless and in tests, where frames advance faster than
  /// background work and deterministic completion is wanted.
  #[default]
  Inline,
  /// Runs the task on a rayon thread pool.
  Threaded(Arc<ThreadPool>),
}

impl Executor {
  /// Builds a dedicated rayon pool with `threads` workers.
  pub fn threaded(threads: usize, name: &str) -> Result<Self, ThreadPoolBuildError> {
    let prefix = name.to_string();
    let pool = ThreadPoolBuilder::new()
      .num_threads(threads.max(1))
      .thread_name(move |i| format!("{}-worker-{}", prefix, i))
      .panic_handler(|_| log::error!("partition worker panicked outside the task harness"))
      .build()?;
    Ok(Self::Threaded(Arc::new(pool)))
  }

  /// Shares an existing rayon pool.
  pub fn shared(pool: Arc<ThreadPool>) -> Self {
    Self::Threaded(pool)
  }

  pub fn is_inline(&self) -> bool {
    matches!(self, Self::Inline)
  }

  pub(crate) fn execute(&self, job: impl FnOnce() + Send + 'static) {
    match self {
      Self::Inline => job(),
      Self::Threaded(pool) => pool.spawn(job),
    }
  }
}

impl fmt::Debug for Executor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Inline => write!(f, "Inline"),
      Self::Threaded(pool) => write!(f, "Threaded({} threads)", pool.current_num_threads()),
    }
  }
}
