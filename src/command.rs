//! The `SyncCommand` capability contract.
//!
//! A sync command carries the instrument-specific configuration for one
//! synchronized action — a ramp table, an acquisition mask — but no timing.
//! Timing lives in the owning [`SyncPoints`](crate::points::SyncPoints);
//! the driver combines the two at arm time.
//!
//! Commands are composable. The compile step relies on three operators:
//!
//! - [`repeated`](SyncCommand::repeated): the command run `count` times in
//!   sequence, used when a repeated sync folds inner commands outward.
//! - [`concatenate`](SyncCommand::concatenate): sequential merge of several
//!   commands into one program.
//! - [`parallel`](SyncCommand::parallel): simultaneous, time-aligned merge of
//!   commands on the *same* instrument; this is the combining operator the
//!   registry folds with.
//!
//! Implementations typically downcast their partners via
//! [`as_any`](SyncCommand::as_any) and must reject incompatible merges with a
//! [`Composition`](crate::error::SyncError::Composition) error instead of
//! silently truncating mismatched time-bases.

use std::any::Any;
use std::fmt::Debug;

use crate::error::{SyncError, SyncResult};

/// A boxed, type-erased sync command as stored in the registry.
pub type BoxedCommand = Box<dyn SyncCommand>;

/// Instrument-specific action payload attached to sync points.
pub trait SyncCommand: Debug + Send + Sync {
    /// Clone behind the trait object. The registry keeps commands until
    /// compile time and compiling must not consume them.
    fn boxed_clone(&self) -> BoxedCommand;

    /// Downcast support for concrete merge implementations.
    fn as_any(&self) -> &dyn Any;

    /// A command equivalent to running this one `count` times in sequence.
    ///
    /// # Errors
    ///
    /// [`SyncError::Composition`] when the underlying hardware program cannot
    /// express repetition.
    fn repeated(&self, count: usize) -> SyncResult<BoxedCommand>;

    /// Sequential merge of `self` followed by each of `others` in order.
    ///
    /// # Errors
    ///
    /// [`SyncError::Composition`] when the command types are incompatible.
    fn concatenate(self: Box<Self>, others: Vec<BoxedCommand>) -> SyncResult<BoxedCommand>;

    /// Merge hook for simultaneous execution; receives every partner.
    ///
    /// Implementations must produce one command valid for time-aligned
    /// execution on the same instrument, validating compatible time-bases
    /// (e.g. equal effective length).
    ///
    /// # Errors
    ///
    /// [`SyncError::Composition`] on any mismatch.
    fn merge_parallel(self: Box<Self>, others: Vec<BoxedCommand>) -> SyncResult<BoxedCommand>;

    /// Simultaneous, time-aligned merge with zero or more partners.
    ///
    /// Identity when `others` is empty, otherwise delegates to
    /// [`merge_parallel`](Self::merge_parallel).
    ///
    /// # Errors
    ///
    /// Whatever [`merge_parallel`](Self::merge_parallel) reports.
    fn parallel(self: Box<Self>, others: Vec<BoxedCommand>) -> SyncResult<BoxedCommand>
    where
        Self: Sized + 'static,
    {
        if others.is_empty() {
            Ok(self)
        } else {
            self.merge_parallel(others)
        }
    }
}

impl Clone for BoxedCommand {
    fn clone(&self) -> Self {
        self.boxed_clone()
    }
}

/// Fold an ordered command list into one command via `parallel()`.
///
/// The fold starts at the first command; a single-element list is the
/// identity case and is returned unchanged.
///
/// # Errors
///
/// [`SyncError::Composition`] when the list is empty or a merge fails.
pub(crate) fn fold_parallel(mut commands: Vec<BoxedCommand>) -> SyncResult<BoxedCommand> {
    if commands.is_empty() {
        return Err(SyncError::Composition(
            "no commands registered to fold".to_string(),
        ));
    }
    let first = commands.remove(0);
    if commands.is_empty() {
        Ok(first)
    } else {
        first.merge_parallel(commands)
    }
}

/// Parallel-merge two already-boxed commands.
///
/// Used where the wrapper level of a repeated sync combines its own merged
/// command with the repeated inner one.
pub(crate) fn parallel_pair(first: BoxedCommand, second: BoxedCommand) -> SyncResult<BoxedCommand> {
    first.merge_parallel(vec![second])
}
