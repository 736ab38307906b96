//! Software mock instruments exercising the sync contracts.
//!
//! Two mocks cover the two driver archetypes:
//!
//! - [`MockDac`], a multi-channel ramp generator: its [`DacRampCommand`]
//!   holds one output value per sync point per channel, and its `prepare`
//!   consumes the explicit timing description.
//! - [`MockDigitizer`], a gated acquisition unit: its [`AcquireCommand`] is a
//!   channel mask, and data for every masked channel is synthesized at arm
//!   time as if the external trigger had fired immediately.
//!
//! Neither mock talks to real hardware; both are used by the test suite and
//! double as reference implementations of [`SyncCommand`] /
//! [`SyncInstrument`].

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::command::{BoxedCommand, SyncCommand};
use crate::error::{SyncError, SyncResult};
use crate::instrument::SyncInstrument;
use crate::points::SyncPoints;

/// Recover a std mutex guard even after a panicked holder.
fn lock_or_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// DAC ramp command
// =============================================================================

/// Ramp table for a [`MockDac`]: per channel, one output value per sync point.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DacRampCommand {
    segments: BTreeMap<u32, Vec<f64>>,
}

impl DacRampCommand {
    /// Ramp a single channel through `values`, one value per sync point.
    pub fn single(channel: u32, values: Vec<f64>) -> Self {
        let mut segments = BTreeMap::new();
        segments.insert(channel, values);
        Self { segments }
    }

    /// Channels this command drives.
    pub fn channels(&self) -> impl Iterator<Item = u32> + '_ {
        self.segments.keys().copied()
    }

    /// Values programmed for `channel`, if present.
    pub fn values(&self, channel: u32) -> Option<&[f64]> {
        self.segments.get(&channel).map(Vec::as_slice)
    }

    /// Number of sync points each channel's table covers.
    ///
    /// All segments share one time-base; `merge_parallel` enforces it.
    pub fn points_per_channel(&self) -> usize {
        self.segments.values().next().map_or(0, Vec::len)
    }

    fn downcast_partner(other: BoxedCommand) -> SyncResult<DacRampCommand> {
        match other.as_any().downcast_ref::<DacRampCommand>() {
            Some(cmd) => Ok(cmd.clone()),
            None => Err(SyncError::Composition(format!(
                "cannot merge a DAC ramp with {other:?}"
            ))),
        }
    }
}

impl SyncCommand for DacRampCommand {
    fn boxed_clone(&self) -> BoxedCommand {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    /// A ramp repeats by tiling each channel's table `count` times.
    fn repeated(&self, count: usize) -> SyncResult<BoxedCommand> {
        let segments = self
            .segments
            .iter()
            .map(|(&ch, values)| {
                let mut tiled = Vec::with_capacity(values.len() * count);
                for _ in 0..count {
                    tiled.extend_from_slice(values);
                }
                (ch, tiled)
            })
            .collect();
        Ok(Box::new(Self { segments }))
    }

    /// Sequential merge: same channel set, tables appended in order.
    fn concatenate(self: Box<Self>, others: Vec<BoxedCommand>) -> SyncResult<BoxedCommand> {
        let mut segments = self.segments;
        for other in others {
            let partner = Self::downcast_partner(other)?;
            let expected: BTreeSet<u32> = segments.keys().copied().collect();
            let got: BTreeSet<u32> = partner.segments.keys().copied().collect();
            if expected != got {
                return Err(SyncError::Composition(format!(
                    "cannot concatenate ramps over different channel sets \
                     ({expected:?} vs {got:?})"
                )));
            }
            for (ch, mut values) in partner.segments {
                if let Some(existing) = segments.get_mut(&ch) {
                    existing.append(&mut values);
                }
            }
        }
        Ok(Box::new(Self { segments }))
    }

    /// Simultaneous merge: disjoint channels, equal table lengths.
    fn merge_parallel(self: Box<Self>, others: Vec<BoxedCommand>) -> SyncResult<BoxedCommand> {
        let expected_len = self.points_per_channel();
        let mut segments = self.segments;
        for other in others {
            let partner = Self::downcast_partner(other)?;
            for (ch, values) in partner.segments {
                if values.len() != expected_len {
                    return Err(SyncError::Composition(format!(
                        "ramp time-bases differ: channel {ch} has {} points, \
                         expected {expected_len}",
                        values.len()
                    )));
                }
                if segments.insert(ch, values).is_some() {
                    return Err(SyncError::Composition(format!(
                        "channel {ch} is driven by two parallel ramps"
                    )));
                }
            }
        }
        Ok(Box::new(Self { segments }))
    }
}

// =============================================================================
// Mock DAC
// =============================================================================

/// Ramp program as armed on the hardware.
#[derive(Debug)]
struct ArmedRamp {
    program: DacRampCommand,
    num_points: usize,
}

/// Software mock of a multi-channel ramp-generating DAC.
pub struct MockDac {
    id: String,
    armed: Mutex<Option<ArmedRamp>>,
}

impl MockDac {
    /// Create an idle mock DAC.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            armed: Mutex::new(None),
        }
    }

    /// True while a ramp program is armed and not yet cancelled.
    pub fn is_armed(&self) -> bool {
        lock_or_recover(&self.armed).is_some()
    }

    /// The armed program's table for `channel`, for inspection.
    pub fn armed_values(&self, channel: u32) -> Option<Vec<f64>> {
        lock_or_recover(&self.armed)
            .as_ref()
            .and_then(|a| a.program.values(channel).map(<[f64]>::to_vec))
    }
}

#[async_trait]
impl SyncInstrument for MockDac {
    fn id(&self) -> &str {
        &self.id
    }

    async fn prepare(&self, sync: &SyncPoints, command: BoxedCommand) -> Result<()> {
        let Some(program) = command.as_any().downcast_ref::<DacRampCommand>() else {
            bail!("mock DAC only accepts ramp commands, got {command:?}");
        };
        let timing = sync.as_explicit();
        let num_points = timing.num_points();
        for ch in program.channels() {
            let len = program.values(ch).map_or(0, <[f64]>::len);
            if len != num_points {
                bail!(
                    "channel {ch} ramp has {len} values but the sync \
                     describes {num_points} points"
                );
            }
        }

        log::info!(
            "{}: armed ramp over {num_points} point(s), duration {:.6} s",
            self.id,
            sync.duration()
        );
        log::debug!(
            "{}: ramp payload {}",
            self.id,
            serde_json::to_string(program).unwrap_or_else(|_| "<unserializable>".to_string())
        );

        *lock_or_recover(&self.armed) = Some(ArmedRamp {
            program: program.clone(),
            num_points,
        });
        Ok(())
    }

    async fn cancel_sync_operations(&self) -> bool {
        let previous = lock_or_recover(&self.armed).take();
        match previous {
            Some(armed) => log::info!(
                "{}: cancelled armed ramp ({} point(s))",
                self.id,
                armed.num_points
            ),
            None => log::info!("{}: cancel requested while idle", self.id),
        }
        true
    }
}

// =============================================================================
// Acquisition command
// =============================================================================

/// Channel mask for a gated [`MockDigitizer`] acquisition.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AcquireCommand {
    channels: BTreeSet<u32>,
}

impl AcquireCommand {
    /// Acquire a single channel at every sync point.
    pub fn channel(channel: u32) -> Self {
        let mut channels = BTreeSet::new();
        channels.insert(channel);
        Self { channels }
    }

    /// Channels in the mask.
    pub fn channels(&self) -> impl Iterator<Item = u32> + '_ {
        self.channels.iter().copied()
    }
}

impl SyncCommand for AcquireCommand {
    fn boxed_clone(&self) -> BoxedCommand {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    /// The mask is timing-free; repetition changes only the point count,
    /// which the digitizer reads from the sync at arm time.
    fn repeated(&self, _count: usize) -> SyncResult<BoxedCommand> {
        Ok(Box::new(self.clone()))
    }

    /// A gated acquisition has no sequential program to extend.
    fn concatenate(self: Box<Self>, _others: Vec<BoxedCommand>) -> SyncResult<BoxedCommand> {
        Err(SyncError::Composition(
            "gated acquisitions cannot be concatenated".to_string(),
        ))
    }

    /// Simultaneous merge: union of the channel masks.
    fn merge_parallel(self: Box<Self>, others: Vec<BoxedCommand>) -> SyncResult<BoxedCommand> {
        let mut channels = self.channels;
        for other in others {
            match other.as_any().downcast_ref::<AcquireCommand>() {
                Some(partner) => channels.extend(partner.channels()),
                None => {
                    return Err(SyncError::Composition(format!(
                        "cannot merge an acquisition mask with {other:?}"
                    )))
                }
            }
        }
        Ok(Box::new(Self { channels }))
    }
}

// =============================================================================
// Mock digitizer
// =============================================================================

/// Captured data awaiting pickup, one buffer per masked channel.
#[derive(Debug, Default)]
struct CaptureState {
    armed_at: Option<DateTime<Utc>>,
    buffers: HashMap<u32, Vec<f64>>,
}

/// Software mock of a trigger-gated digitizer.
///
/// Arming synthesizes one sample per sync point per masked channel, as if
/// the external trigger had fired the moment `prepare` returned. Samples are
/// deterministic (`channel * 1000 + point_index`) so tests can assert on
/// them.
pub struct MockDigitizer {
    id: String,
    state: Mutex<CaptureState>,
}

impl MockDigitizer {
    /// Create an idle mock digitizer.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(CaptureState::default()),
        }
    }

    /// True while armed data is waiting to be taken.
    pub fn has_pending_data(&self) -> bool {
        !lock_or_recover(&self.state).buffers.is_empty()
    }

    /// Take the captured samples for `channel`, consuming them.
    ///
    /// # Errors
    ///
    /// [`SyncError::StaleGetter`] when the digitizer was never armed or the
    /// channel's data was already taken.
    pub fn take_channel(&self, channel: u32) -> SyncResult<Vec<f64>> {
        let mut state = lock_or_recover(&self.state);
        if state.armed_at.is_none() {
            return Err(SyncError::StaleGetter(format!(
                "{}: channel {channel} read before the sync executed",
                self.id
            )));
        }
        state.buffers.remove(&channel).ok_or_else(|| {
            SyncError::StaleGetter(format!(
                "{}: no pending data for channel {channel} (already taken?)",
                self.id
            ))
        })
    }
}

#[async_trait]
impl SyncInstrument for MockDigitizer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn prepare(&self, sync: &SyncPoints, command: BoxedCommand) -> Result<()> {
        let Some(mask) = command.as_any().downcast_ref::<AcquireCommand>() else {
            bail!("mock digitizer only accepts acquisition masks, got {command:?}");
        };
        let num_points = sync.num_sync_points();
        let armed_at = Utc::now();

        let mut state = lock_or_recover(&self.state);
        state.armed_at = Some(armed_at);
        state.buffers = mask
            .channels()
            .map(|ch| {
                let samples = (0..num_points)
                    .map(|i| f64::from(ch) * 1000.0 + i as f64)
                    .collect();
                (ch, samples)
            })
            .collect();

        log::info!(
            "{}: armed at {armed_at}, {} channel(s) x {num_points} point(s)",
            self.id,
            state.buffers.len()
        );
        Ok(())
    }

    async fn cancel_sync_operations(&self) -> bool {
        let mut state = lock_or_recover(&self.state);
        let dropped: usize = state.buffers.values().map(Vec::len).sum();
        state.armed_at = None;
        state.buffers.clear();
        log::info!("{}: cancelled, dropped {dropped} pending sample(s)", self.id);
        true
    }
}
