//! Deferred mutation commands with undo/redo.
//!
//! Any thread may submit requests through a [`CommandSender`]. The owner of
//! the world calls [`CommandQueue::update`] once per tick, which applies the
//! pending requests in FIFO order on that thread.
//!
//! A command is owned by exactly one of: the request channel, the undo
//! stack, the redo stack, or its pool. [`Command::release`] runs once, when
//! the command leaves the last of the first three.

mod history;
mod pooled;

use std::fmt;

use async_channel::{Receiver, Sender};
pub use history::HistoryStack;
pub use pooled::{CommandPool, Recyclable};

use crate::config::HistoryConfig;
use crate::coords::GridPosition;

/// Result of a successful [`Command::apply`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
  /// World state changed; the command joins the undo history.
  Changed,
  /// Nothing changed; the command is released without touching history.
  NoOp,
}

/// A reversible mutation of `W`.
pub trait Command<W>: Send {
  /// Applies the mutation, recording whatever `revert` needs.
  ///
  /// Must not mutate anything when returning `Err`.
  fn apply(&mut self, world: &mut W) -> Result<Applied, CommandError>;

  /// Reverses the last `apply`.
  fn revert(&mut self, world: &mut W) -> Result<(), CommandError>;

  /// Called once when the command is discarded. Pooled commands return
  /// themselves to their pool here.
  fn release(self: Box<Self>) {}
}

/// Command application error, reported synchronously by
/// [`CommandQueue::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
  /// The target partition is not active.
  NotActive(GridPosition),
  /// The target lies outside the partition.
  OutOfBounds,
  /// The domain refused the mutation.
  Rejected(String),
}

impl fmt::Display for CommandError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::NotActive(pos) => write!(f, "partition {pos} is not active"),
      Self::OutOfBounds => write!(f, "target outside partition bounds"),
      Self::Rejected(msg) => write!(f, "rejected: {msg}"),
    }
  }
}

impl std::error::Error for CommandError {}

enum Request<W> {
  Apply(Box<dyn Command<W>>),
  Undo,
  Redo,
}

/// What one [`CommandQueue::update`] did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandReport {
  pub applied: usize,
  pub noops: usize,
  pub undone: usize,
  pub redone: usize,
  pub errors: Vec<CommandError>,
}

impl CommandReport {
  pub fn is_empty(&self) -> bool {
    *self == Self::default()
  }
}

/// Clonable handle for submitting requests from any thread.
pub struct CommandSender<W> {
  tx: Sender<Request<W>>,
}

impl<W> Clone for CommandSender<W> {
  fn clone(&self) -> Self {
    Self {
      tx: self.tx.clone(),
    }
  }
}

impl<W: 'static> CommandSender<W> {
  /// Queues `cmd` for the next update. If the queue is gone, the command is
  /// released immediately and false is returned.
  pub fn request(&self, cmd: Box<dyn Command<W>>) -> bool {
    match self.tx.try_send(Request::Apply(cmd)) {
      Ok(()) => true,
      Err(err) => {
        log::warn!("Command queue closed, dropping command");
        if let Request::Apply(cmd) = err.into_inner() {
          cmd.release();
        }
        false
      }
    }
  }

  pub fn request_undo(&self) -> bool {
    self.send_history(Request::Undo, "undo")
  }

  pub fn request_redo(&self) -> bool {
    self.send_history(Request::Redo, "redo")
  }

  fn send_history(&self, request: Request<W>, name: &str) -> bool {
    if self.tx.try_send(request).is_err() {
      log::warn!("Command queue closed, dropping {} request", name);
      return false;
    }
    true
  }
}

/// FIFO of pending requests plus bounded undo/redo history.
pub struct CommandQueue<W> {
  sender: CommandSender<W>,
  rx: Receiver<Request<W>>,
  undo: HistoryStack<Box<dyn Command<W>>>,
  redo: HistoryStack<Box<dyn Command<W>>>,
}

impl<W: 'static> CommandQueue<W> {
  pub fn new(config: &HistoryConfig) -> Self {
    let (tx, rx) = async_channel::unbounded();
    Self {
      sender: CommandSender { tx },
      rx,
      undo: HistoryStack::new(config.undo_capacity),
      redo: HistoryStack::new(config.redo_capacity),
    }
  }

  pub fn sender(&self) -> CommandSender<W> {
    self.sender.clone()
  }

  pub fn request(&self, cmd: Box<dyn Command<W>>) {
    self.sender.request(cmd);
  }

  pub fn request_undo(&self) {
    self.sender.request_undo();
  }

  pub fn request_redo(&self) {
    self.sender.request_redo();
  }

  pub fn pending_len(&self) -> usize {
    self.rx.len()
  }

  pub fn undo_len(&self) -> usize {
    self.undo.len()
  }

  pub fn redo_len(&self) -> usize {
    self.redo.len()
  }

  /// Releases every history entry.
  pub fn clear_history(&mut self) {
    self.undo.drain().for_each(|cmd| cmd.release());
    self.redo.drain().for_each(|cmd| cmd.release());
  }

  /// Changes both history capacities, releasing entries that no longer fit.
  pub fn set_capacity(&mut self, config: &HistoryConfig) {
    for cmd in self.undo.set_capacity(config.undo_capacity) {
      cmd.release();
    }
    for cmd in self.redo.set_capacity(config.redo_capacity) {
      cmd.release();
    }
  }

  /// Applies every pending request, in submission order.
  #[cfg_attr(feature = "tracy", tracing::instrument(skip_all))]
  pub fn update(&mut self, world: &mut W) -> CommandReport {
    let mut report = CommandReport::default();
    while let Ok(request) = self.rx.try_recv() {
      match request {
        Request::Apply(cmd) => self.apply(cmd, world, &mut report),
        Request::Undo => self.undo(world, &mut report),
        Request::Redo => self.redo(world, &mut report),
      }
    }
    report
  }

  fn apply(&mut self, mut cmd: Box<dyn Command<W>>, world: &mut W, report: &mut CommandReport) {
    match cmd.apply(world) {
      Ok(Applied::Changed) => {
        report.applied += 1;
        self.push_undo(cmd);
        self.redo.drain().for_each(|cmd| cmd.release());
      }
      Ok(Applied::NoOp) => {
        report.noops += 1;
        cmd.release();
      }
      Err(err) => {
        log::warn!("Command rejected: {}", err);
        report.errors.push(err);
        cmd.release();
      }
    }
  }

  fn undo(&mut self, world: &mut W, report: &mut CommandReport) {
    let Some(mut cmd) = self.undo.pop() else {
      log::debug!("Nothing to undo");
      return;
    };
    match cmd.revert(world) {
      Ok(()) => {
        report.undone += 1;
        if let Some(evicted) = self.redo.push(cmd) {
          evicted.release();
        }
      }
      Err(err) => {
        log::warn!("Undo failed: {}", err);
        report.errors.push(err);
        cmd.release();
      }
    }
  }

  fn redo(&mut self, world: &mut W, report: &mut CommandReport) {
    let Some(mut cmd) = self.redo.pop() else {
      log::debug!("Nothing to redo");
      return;
    };
    match cmd.apply(world) {
      Ok(_) => {
        report.redone += 1;
        self.push_undo(cmd);
      }
      Err(err) => {
        log::warn!("Redo failed: {}", err);
        report.errors.push(err);
        cmd.release();
      }
    }
  }

  fn push_undo(&mut self, cmd: Box<dyn Command<W>>) {
    if let Some(evicted) = self.undo.push(cmd) {
      evicted.release();
    }
  }
}

impl<W> Drop for CommandQueue<W> {
  fn drop(&mut self) {
    self.rx.close();
    while let Ok(request) = self.rx.try_recv() {
      if let Request::Apply(cmd) = request {
        cmd.release();
      }
    }
    self.undo.drain().for_each(|cmd| cmd.release());
    self.redo.drain().for_each(|cmd| cmd.release());
  }
}
