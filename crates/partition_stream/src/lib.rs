//! Partition streaming for Bevy.
//!
//! Keeps a bounded set of spatial partitions active around a moving viewer.
//! Partitions inside the minimum volume are activated closest first, ones
//! outside the maximum volume are passivated, and the band between the two
//! provides hysteresis. Activation and passivation hooks run on a bounded
//! task scheduler, and edits to active partitions go through an undoable
//! command queue.

pub mod command;
pub mod config;
pub mod coords;
pub mod edit;
pub mod manager;
pub mod partition;
pub mod plugin;
pub mod pool;
pub mod provider;
pub mod scheduling;
#[cfg(feature = "tracy")]
mod tracy_init;
pub mod volume;

pub use command::{
  Applied, Command, CommandError, CommandPool, CommandQueue, CommandReport, CommandSender,
  HistoryStack, Recyclable,
};
pub use config::{
  ActivationConfig, ConfigError, HistoryConfig, PartitionConfig, PassivationConfig, PoolConfig,
  StreamingConfig, VolumeConfig,
};
pub use coords::{ClusterPos, GridPosition, PartitionSize};
pub use edit::{BlockDomain, BlockEdit, SetBlockCommand, boundary_neighbors, locate_block};
pub use manager::{ActivationFilter, PartitionManager, StreamStats, TickSummary};
pub use partition::{HookError, Partition, PartitionHooks, PartitionState};
pub use plugin::{PartitionStreaming, PartitionStreamingPlugin, StreamingTick, StreamingViewer};
pub use pool::Pool;
pub use provider::{BackingStore, CloseOnce, ContentProvider, ProvidedContent, ProviderError};
pub use scheduling::{Executor, SchedulerStats, TaskScheduler};
#[cfg(feature = "tracy")]
pub use tracy_init::init_tracy;
pub use volume::{ActiveVolume, ActiveVolumePolicy, ShellCursor, VolumeShape};
