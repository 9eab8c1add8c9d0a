//! Backing content provider contract.
//!
//! The manager never touches partition content itself. A [`ContentProvider`]
//! owns the authoritative data (a region file, a generator, a remote store)
//! and hands out a handle per activated position. [`ProvidedContent`] adapts
//! a provider into [`PartitionHooks`], so the common case needs no custom
//! payload type.
//!
//! Closing is separate: a provider that holds resources also implements
//! [`BackingStore`]. When several managers share one store, wrap it in
//! [`CloseOnce`] so whichever manager closes first closes it, and later
//! closes are no-ops.

use std::error::Error;
use std::fmt;
use std::io;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::coords::GridPosition;
use crate::partition::{HookError, PartitionHooks};

/// Error returned by a content provider.
#[derive(Debug)]
pub enum ProviderError {
  /// Standard I/O error.
  Io(io::Error),
  /// No content exists at the requested position.
  Missing(GridPosition),
  /// Other provider-specific error.
  Other(Box<dyn Error + Send + Sync>),
}

impl fmt::Display for ProviderError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Io(e) => write!(f, "I/O error: {e}"),
      Self::Missing(pos) => write!(f, "no content at {pos}"),
      Self::Other(e) => write!(f, "{e}"),
    }
  }
}

impl Error for ProviderError {
  fn source(&self) -> Option<&(dyn Error + 'static)> {
    match self {
      Self::Io(e) => Some(e),
      Self::Other(e) => Some(&**e),
      Self::Missing(_) => None,
    }
  }
}

impl From<io::Error> for ProviderError {
  fn from(err: io::Error) -> Self {
    Self::Io(err)
  }
}

impl From<ProviderError> for HookError {
  fn from(err: ProviderError) -> Self {
    HookError::Failed(err.to_string())
  }
}

/// Source of partition content.
///
/// `activate` and `passivate` are called from background workers and may
/// block. `exists` is called on the manager thread during the activation
/// search and should be cheap.
pub trait ContentProvider: Send + Sync + 'static {
  /// Handle to the content of one activated position.
  type Handle: Send + 'static;

  /// Returns true if content can be produced for `pos` right now.
  fn exists(&self, pos: GridPosition) -> bool;

  /// Loads or builds the content for `pos`.
  fn activate(&self, pos: GridPosition) -> Result<Self::Handle, ProviderError>;

  /// Releases the content for `pos`, writing it back if needed.
  fn passivate(&self, pos: GridPosition, handle: Self::Handle) -> Result<(), ProviderError>;
}

/// Partition payload that delegates to a shared [`ContentProvider`].
pub struct ProvidedContent<C: ContentProvider> {
  provider: Arc<C>,
  handle: Option<C::Handle>,
}

impl<C: ContentProvider> ProvidedContent<C> {
  pub fn new(provider: Arc<C>) -> Self {
    Self {
      provider,
      handle: None,
    }
  }

  /// Builds a payload factory for [`PartitionManager::new`].
  ///
  /// [`PartitionManager::new`]: crate::manager::PartitionManager::new
  pub fn factory(provider: Arc<C>) -> impl Fn() -> Self + Send + Sync + 'static {
    move || Self::new(provider.clone())
  }

  /// Builds an activation filter that skips positions the provider has no
  /// content for.
  pub fn activation_filter(
    provider: Arc<C>,
  ) -> impl Fn(GridPosition) -> bool + Send + Sync + 'static {
    move |pos| provider.exists(pos)
  }

  /// Content handle, present while the partition is active.
  pub fn handle(&self) -> Option<&C::Handle> {
    self.handle.as_ref()
  }

  pub fn handle_mut(&mut self) -> Option<&mut C::Handle> {
    self.handle.as_mut()
  }

  pub fn provider(&self) -> &Arc<C> {
    &self.provider
  }
}

impl<C: ContentProvider> PartitionHooks for ProvidedContent<C> {
  fn activate(&mut self, pos: GridPosition) -> Result<(), HookError> {
    self.handle = Some(self.provider.activate(pos)?);
    Ok(())
  }

  fn passivate(&mut self, pos: GridPosition) -> Result<(), HookError> {
    match self.handle.take() {
      Some(handle) => Ok(self.provider.passivate(pos, handle)?),
      None => Ok(()),
    }
  }
}

/// External resource that owns partition content and must be closed.
pub trait BackingStore: Send + Sync {
  fn close(&self);
}

/// Wrapper that forwards only the first `close` to the inner store.
///
/// Clone the `Arc<CloseOnce<_>>` into every manager sharing the store.
pub struct CloseOnce<S> {
  inner: S,
  closed: AtomicBool,
}

impl<S: BackingStore> CloseOnce<S> {
  pub fn new(inner: S) -> Arc<Self> {
    Arc::new(Self {
      inner,
      closed: AtomicBool::new(false),
    })
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Acquire)
  }
}

impl<S: BackingStore> BackingStore for CloseOnce<S> {
  fn close(&self) {
    if self.closed.swap(true, Ordering::AcqRel) {
      log::debug!("Backing store already closed");
      return;
    }
    self.inner.close();
  }
}

/// Lets one `Arc<CloseOnce<_>>` serve as both provider and store.
impl<S: ContentProvider> ContentProvider for CloseOnce<S> {
  type Handle = S::Handle;

  fn exists(&self, pos: GridPosition) -> bool {
    self.inner.exists(pos)
  }

  fn activate(&self, pos: GridPosition) -> Result<Self::Handle, ProviderError> {
    self.inner.activate(pos)
  }

  fn passivate(&self, pos: GridPosition, handle: Self::Handle) -> Result<(), ProviderError> {
    self.inner.passivate(pos, handle)
  }
}

impl<S> Deref for CloseOnce<S> {
  type Target = S;

  fn deref(&self) -> &S {
    &self.inner
  }
}
