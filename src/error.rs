//! Error types for the sync engine.
//!
//! This module defines the primary error type, `SyncError`, for the crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way
//! to handle the failure modes of sync-point construction, command
//! composition, and hardware arming.
//!
//! ## Error Hierarchy
//!
//! - **`Construction`**: malformed sync-point descriptions — unsorted begin
//!   times, negative lengths, mismatched array sizes, a zero repeat count, or
//!   a supplied duration shorter than the points it must cover. Raised at
//!   construction and never recovered.
//! - **`Composition`**: two commands registered against the same instrument
//!   that cannot be merged (incompatible types, mismatched time-bases), or a
//!   command whose hardware program cannot express repetition. Surfaces from
//!   the compile step inside [`execute`](crate::points::SyncPoints::execute).
//! - **`HardwareArm`**: an instrument driver's `prepare()` failed. Driver
//!   internals report `anyhow::Error`; the engine wraps it together with the
//!   instrument id. Instruments armed before the failure stay armed — the
//!   documented recovery is `cancel()` on the same sync.
//! - **`StaleGetter`**: a measurement getter was invoked before its sync
//!   executed, or after its data was already taken. Getters must fail loudly
//!   rather than hand back stale or garbage data.
//! - **`NotRunnable`**: a parameter cannot express the requested operation on
//!   the given sync (e.g. the value count does not match the sync's point
//!   count).
//!
//! Partial cancellation failure is deliberately *not* an error: `cancel()`
//! returns the set of instruments that failed so the caller still learns
//! which ones succeeded.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Errors produced by the sync-point engine and its capability contracts.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Malformed sync-point description, rejected at construction.
    #[error("Invalid sync description: {0}")]
    Construction(String),

    /// Commands registered against one instrument cannot be merged.
    #[error("Cannot combine sync commands: {0}")]
    Composition(String),

    /// An instrument driver failed to arm during `execute()`.
    #[error("Instrument '{instrument}' failed to arm: {source}")]
    HardwareArm {
        /// Id of the instrument whose `prepare()` failed.
        instrument: String,
        /// Driver-reported cause.
        #[source]
        source: anyhow::Error,
    },

    /// A measurement getter was used before execution or after exhaustion.
    #[error("Sync data not available: {0}")]
    StaleGetter(String),

    /// A parameter cannot express the requested operation on this sync.
    #[error("Operation not runnable on this sync: {0}")]
    NotRunnable(String),
}
