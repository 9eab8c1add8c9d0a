//! Tracy profiler initialization.

use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::prelude::*;
use tracing_tracy::TracyLayer;

/// Routes the streaming tick's spans to Tracy.
///
/// Only spans from this crate are forwarded. Returns false and leaves the
/// current subscriber in place if a global one is already installed.
/// Call once from `main()` before the app starts ticking.
pub fn init_tracy() -> bool {
  let spans = Targets::new().with_target(env!("CARGO_CRATE_NAME"), LevelFilter::TRACE);
  let installed = tracing_subscriber::registry()
    .with(TracyLayer::default().with_filter(spans))
    .try_init();
  match installed {
    Ok(()) => true,
    Err(err) => {
      log::warn!("Tracy layer not installed: {}", err);
      false
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn second_init_keeps_first_subscriber() {
    init_tracy();
    assert!(!init_tracy());
  }
}
