//! The `SyncInstrument` capability contract and the software mock drivers.
//!
//! Real drivers (DAC ramp generators, lock-in amplifiers, cameras, motion
//! controllers) live outside this crate and implement [`SyncInstrument`]
//! against their own register-level protocols. The [`mock`] module provides
//! two fully working software instruments used by the tests and as reference
//! implementations of the contract.

use anyhow::Result;
use async_trait::async_trait;

use crate::command::BoxedCommand;
use crate::points::SyncPoints;

pub mod mock;

/// Hardware-facing participant in a synchronized episode.
///
/// Implementations own whatever internal state and background tasks they
/// need; the engine only requires interior mutability (`prepare` takes
/// `&self` because instruments are shared as `Arc<dyn SyncInstrument>`).
#[async_trait]
pub trait SyncInstrument: Send + Sync {
    /// Stable identifier; the registry keys instruments by this.
    fn id(&self) -> &str;

    /// Arm the instrument for the given sync and payload.
    ///
    /// The driver derives its timing from `sync.as_periodic()` or
    /// `sync.as_explicit()` (it must be able to consume at least one) and
    /// programs `command` into the hardware. Every state transition must be
    /// logged. Success is signalled only by returning `Ok(())`; the engine
    /// wraps any error into
    /// [`SyncError::HardwareArm`](crate::error::SyncError::HardwareArm).
    ///
    /// No retries happen at the engine level, and the engine does not bound
    /// how long this may take — unbounded blocking here is a driver defect.
    async fn prepare(&self, sync: &SyncPoints, command: BoxedCommand) -> Result<()>;

    /// Abort in-flight sync work and restore plain get/set usability.
    ///
    /// Returns `true` iff the instrument is confirmed usable afterwards.
    /// Must not panic; the engine calls this on every involved instrument
    /// even when the system is already degraded.
    async fn cancel_sync_operations(&self) -> bool;
}
