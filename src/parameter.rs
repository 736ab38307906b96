//! The `SyncParameter` capability contract.
//!
//! A sync parameter is the user-facing entry point for a synchronized set or
//! get: it creates (or joins) a [`SyncPoints`], registers the corresponding
//! instrument command, and hands timing control back to the caller. The
//! actual hardware work happens later, when the sync executes and the shared
//! external trigger fires.
//!
//! [`DacVoltage`] and [`DigitizerChannel`] implement the contract over the
//! crate's software mocks and show the intended call shape:
//!
//! ```rust,ignore
//! let sync = voltage_a.sync_set(&ramp, None).await?;
//! let sync = voltage_b.sync_set(&other_ramp, Some(sync)).await?;
//! let mut reader = lockin_x.sync_get(&mut sync).await?;
//! sync.execute().await?;
//! // ... external trigger fires ...
//! let data = reader.take()?;
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{SyncError, SyncResult};
use crate::instrument::mock::{AcquireCommand, DacRampCommand, MockDac, MockDigitizer};
use crate::points::{InstrumentHandle, SyncPoints};

// =============================================================================
// Getter handle
// =============================================================================

/// Blocking getter for data captured during a synchronized acquisition.
///
/// Returned by [`SyncParameter::sync_get`]. Taking data before the owning
/// sync executed, or after the data was already taken, is a
/// [`StaleGetter`](SyncError::StaleGetter) error — never silence, never
/// stale samples.
pub struct SyncGetter {
    read: Box<dyn FnMut() -> SyncResult<Vec<f64>> + Send>,
}

impl SyncGetter {
    /// Wrap a driver-supplied read closure.
    pub fn new(read: impl FnMut() -> SyncResult<Vec<f64>> + Send + 'static) -> Self {
        Self { read: Box::new(read) }
    }

    /// Take the captured data, blocking until the driver has it.
    ///
    /// # Errors
    ///
    /// [`SyncError::StaleGetter`] before execution or after exhaustion;
    /// driver-specific errors otherwise.
    pub fn take(&mut self) -> SyncResult<Vec<f64>> {
        (self.read)()
    }
}

impl fmt::Debug for SyncGetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncGetter").finish_non_exhaustive()
    }
}

// =============================================================================
// Contract
// =============================================================================

/// Initiates synchronized set/get operations against one instrument knob.
#[async_trait]
pub trait SyncParameter: Send + Sync {
    /// Register "emit `values` at the sync's points" and return the sync.
    ///
    /// When `sync` is `None` a fresh one is created from the parameter's own
    /// timing defaults; otherwise the command joins the given sync, which is
    /// handed back for chaining.
    ///
    /// # Errors
    ///
    /// [`SyncError::NotRunnable`] when `values` cannot be mapped onto the
    /// sync's points (e.g. count mismatch), or construction errors when a
    /// fresh sync cannot be derived.
    async fn sync_set(&self, values: &[f64], sync: Option<SyncPoints>) -> SyncResult<SyncPoints>;

    /// Register a measurement command and return a getter for its data.
    ///
    /// The getter yields data only after `sync.execute()` and the external
    /// trigger completed; invoked earlier it fails with
    /// [`StaleGetter`](SyncError::StaleGetter).
    ///
    /// # Errors
    ///
    /// [`SyncError::NotRunnable`] when the measurement cannot be registered
    /// against this sync.
    async fn sync_get(&self, sync: &mut SyncPoints) -> SyncResult<SyncGetter>;

    /// True while an armed operation has not yet completed.
    fn is_running(&self) -> bool;
}

// =============================================================================
// Mock-backed parameters
// =============================================================================

/// One output channel of a [`MockDac`], exposed as a sync parameter.
pub struct DacVoltage {
    dac: Arc<MockDac>,
    channel: u32,
    /// Dwell time per point in seconds, used when deriving a fresh sync.
    dwell: f64,
}

impl DacVoltage {
    /// Expose `channel` of `dac` with the given per-point dwell time.
    pub fn new(dac: Arc<MockDac>, channel: u32, dwell: f64) -> Self {
        Self { dac, channel, dwell }
    }
}

#[async_trait]
impl SyncParameter for DacVoltage {
    async fn sync_set(&self, values: &[f64], sync: Option<SyncPoints>) -> SyncResult<SyncPoints> {
        let mut sync = match sync {
            Some(sync) => sync,
            None => {
                // One point per value, uniformly spaced by the dwell time.
                let begin = (0..values.len()).map(|i| i as f64 * self.dwell).collect();
                let length = vec![self.dwell; values.len()];
                SyncPoints::explicit(begin, length, None)?
            }
        };
        if values.len() != sync.num_sync_points() {
            return Err(SyncError::NotRunnable(format!(
                "{} values for a sync with {} points",
                values.len(),
                sync.num_sync_points()
            )));
        }
        sync.add_command(
            Arc::clone(&self.dac) as InstrumentHandle,
            Box::new(DacRampCommand::single(self.channel, values.to_vec())),
        );
        Ok(sync)
    }

    async fn sync_get(&self, _sync: &mut SyncPoints) -> SyncResult<SyncGetter> {
        Err(SyncError::NotRunnable(
            "a DAC output channel cannot be measured".to_string(),
        ))
    }

    fn is_running(&self) -> bool {
        self.dac.is_armed()
    }
}

/// One input channel of a [`MockDigitizer`], exposed as a sync parameter.
pub struct DigitizerChannel {
    digitizer: Arc<MockDigitizer>,
    channel: u32,
}

impl DigitizerChannel {
    /// Expose `channel` of `digitizer`.
    pub fn new(digitizer: Arc<MockDigitizer>, channel: u32) -> Self {
        Self { digitizer, channel }
    }
}

#[async_trait]
impl SyncParameter for DigitizerChannel {
    async fn sync_set(&self, _values: &[f64], _sync: Option<SyncPoints>) -> SyncResult<SyncPoints> {
        Err(SyncError::NotRunnable(
            "a digitizer input channel cannot be driven".to_string(),
        ))
    }

    async fn sync_get(&self, sync: &mut SyncPoints) -> SyncResult<SyncGetter> {
        sync.add_command(
            Arc::clone(&self.digitizer) as InstrumentHandle,
            Box::new(AcquireCommand::channel(self.channel)),
        );
        let digitizer = Arc::clone(&self.digitizer);
        let channel = self.channel;
        Ok(SyncGetter::new(move || digitizer.take_channel(channel)))
    }

    fn is_running(&self) -> bool {
        self.digitizer.has_pending_data()
    }
}
