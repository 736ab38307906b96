//! Sync-point nodes: timing description plus per-instrument command registry.
//!
//! A [`SyncPoints`] value describes *when* things happen relative to a shared
//! external trigger and *what* each participating instrument does at those
//! times. It is built once per synchronized episode:
//!
//! 1. construct an explicit description with [`SyncPoints::explicit`], or
//!    derive one via [`SyncParameter::sync_set`](crate::parameter::SyncParameter::sync_set);
//! 2. optionally compose with [`repeated`](SyncPoints::repeated), which
//!    wraps the node in a fresh repeating node (arbitrary nesting, never a
//!    back-reference);
//! 3. attach instrument payloads with [`add_command`](SyncPoints::add_command);
//! 4. consume it with [`execute`](SyncPoints::execute), which compiles the
//!    registry and arms every instrument;
//! 5. on trouble, [`cancel`](SyncPoints::cancel) attempts to return every
//!    involved instrument to a safe state.
//!
//! The compile step is the heart of the engine: commands registered against
//! one instrument are folded into a single command through `parallel()`, and
//! a repeating node folds its inner node's compiled commands outward through
//! `repeated(count)` before merging them with its own.
//!
//! # Concurrency
//!
//! The registry is single-writer: it is mutated only through sequential
//! `add_command` calls on the caller's task before `execute()`. The engine
//! takes no locks and spawns no tasks; `execute()` awaits each driver
//! `prepare()` sequentially in registry order.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::command::{fold_parallel, parallel_pair, BoxedCommand};
use crate::error::{SyncError, SyncResult};
use crate::instrument::SyncInstrument;
use crate::timing::{Explicit, Periodic};

/// Shared handle to an instrument participating in a sync.
pub type InstrumentHandle = Arc<dyn SyncInstrument>;

/// One registry slot: an instrument and the commands registered against it.
///
/// Kept as a vector entry rather than a map value so that registry order
/// (first registration wins the slot position) is preserved through compile
/// and execute.
struct RegistryEntry {
    instrument: InstrumentHandle,
    commands: Vec<BoxedCommand>,
}

/// Timing variant of a node.
enum Kind {
    /// Leaf: explicit `(begin, length)` arrays plus total duration.
    Explicit { timing: Explicit, duration: f64 },
    /// Composite: an owned inner node tiled `count` times.
    Repeated { inner: Box<SyncPoints>, count: usize },
}

/// A set of sync points relative to a shared trigger, with the commands each
/// instrument runs at them.
pub struct SyncPoints {
    kind: Kind,
    registry: Vec<RegistryEntry>,
}

impl SyncPoints {
    /// Build a leaf node from explicit `(begin, length)` arrays.
    ///
    /// `duration` defaults to `begin[last] + length[last]`; a caller may
    /// supply a larger value (trailing dead time before the next trigger),
    /// but a smaller one is rejected rather than silently stretched.
    ///
    /// # Errors
    ///
    /// [`SyncError::Construction`] on empty/mismatched arrays, unsorted
    /// begins, negative lengths, or an undersized duration.
    pub fn explicit(
        begin: Vec<f64>,
        length: Vec<f64>,
        duration: Option<f64>,
    ) -> SyncResult<Self> {
        let timing = Explicit::new(begin, length)?;
        let span = timing.span();
        let duration = match duration {
            Some(d) if d < span => {
                return Err(SyncError::Construction(format!(
                    "duration {d} is shorter than the last sync point end {span}"
                )));
            }
            Some(d) => d,
            None => span,
        };
        Ok(Self {
            kind: Kind::Explicit { timing, duration },
            registry: Vec::new(),
        })
    }

    /// Wrap this node in a fresh repeating node.
    ///
    /// The inner node is moved into the wrapper untouched; commands already
    /// registered on it stay at the inner level, and commands added to the
    /// returned wrapper live at the wrapper.
    ///
    /// # Errors
    ///
    /// [`SyncError::Construction`] when `count` is zero.
    pub fn repeated(self, count: usize) -> SyncResult<Self> {
        if count == 0 {
            return Err(SyncError::Construction(
                "repeat count must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            kind: Kind::Repeated {
                inner: Box::new(self),
                count,
            },
            registry: Vec::new(),
        })
    }

    /// Register `command` to run on `instrument` at this node's sync points.
    ///
    /// Payloads are opaque here — no validation happens until compile time.
    /// Repeated calls for one instrument accumulate; they are merged through
    /// `parallel()` when the sync executes.
    pub fn add_command(&mut self, instrument: InstrumentHandle, command: BoxedCommand) {
        let id = instrument.id().to_string();
        match self.registry.iter_mut().find(|e| e.instrument.id() == id) {
            Some(entry) => entry.commands.push(command),
            None => self.registry.push(RegistryEntry {
                instrument,
                commands: vec![command],
            }),
        }
    }

    /// Every instrument involved in this sync, this node's registrants first,
    /// then transitively nested ones, deduplicated by id.
    pub fn instruments(&self) -> Vec<InstrumentHandle> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        self.collect_instruments(&mut seen, &mut out);
        out
    }

    fn collect_instruments(&self, seen: &mut HashSet<String>, out: &mut Vec<InstrumentHandle>) {
        for entry in &self.registry {
            if seen.insert(entry.instrument.id().to_string()) {
                out.push(Arc::clone(&entry.instrument));
            }
        }
        if let Kind::Repeated { inner, .. } = &self.kind {
            inner.collect_instruments(seen, out);
        }
    }

    /// Fold the registry into one command per instrument.
    ///
    /// For a leaf this is a straight per-instrument `parallel()` fold. For a
    /// repeating node the inner node is compiled separately, each inner
    /// command lifted through `repeated(count)`, and then merged with the
    /// wrapper-level command for the same instrument via `parallel()` —
    /// outer and inner contributions are always combined, never overwritten.
    fn compile_commands(&self) -> SyncResult<Vec<(InstrumentHandle, BoxedCommand)>> {
        let mut compiled: Vec<(InstrumentHandle, BoxedCommand)> = Vec::new();
        for entry in &self.registry {
            let merged = fold_parallel(entry.commands.clone())?;
            compiled.push((Arc::clone(&entry.instrument), merged));
        }

        if let Kind::Repeated { inner, count } = &self.kind {
            for (instrument, inner_command) in inner.compile_commands()? {
                let lifted = inner_command.repeated(*count)?;
                match compiled
                    .iter()
                    .position(|(existing, _)| existing.id() == instrument.id())
                {
                    Some(pos) => {
                        let (handle, outer) = compiled.remove(pos);
                        let merged = parallel_pair(outer, lifted)?;
                        compiled.insert(pos, (handle, merged));
                    }
                    None => compiled.push((instrument, lifted)),
                }
            }
        }
        Ok(compiled)
    }

    /// Compile the registry and arm every instrument, sequentially, in
    /// registry order.
    ///
    /// Blocks (awaits) until every `prepare()` returned. A failing `prepare`
    /// propagates immediately; instruments armed before it stay armed — call
    /// [`cancel`](Self::cancel) on this same value to attempt recovery.
    ///
    /// # Errors
    ///
    /// [`SyncError::Composition`] from the compile step, or
    /// [`SyncError::HardwareArm`] naming the instrument whose driver failed.
    pub async fn execute(&self) -> SyncResult<()> {
        let compiled = self.compile_commands()?;
        log::debug!(
            "compiled sync: {} instrument(s), {} point(s), duration {:.6} s",
            compiled.len(),
            self.num_sync_points(),
            self.duration()
        );
        for (instrument, command) in compiled {
            log::info!("arming instrument '{}'", instrument.id());
            instrument
                .prepare(self, command)
                .await
                .map_err(|source| SyncError::HardwareArm {
                    instrument: instrument.id().to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Ask every involved instrument to abort its sync operations.
    ///
    /// Never short-circuits: every instrument is attempted even when earlier
    /// ones fail, so the caller learns the full failure set. Returns the ids
    /// of instruments whose `cancel_sync_operations()` reported `false`.
    pub async fn cancel(&self) -> HashSet<String> {
        let mut failed = HashSet::new();
        for instrument in self.instruments() {
            let id = instrument.id().to_string();
            log::info!("cancelling sync operations on '{id}'");
            if !instrument.cancel_sync_operations().await {
                log::warn!("instrument '{id}' failed to cancel; may need manual recovery");
                failed.insert(id);
            }
        }
        failed
    }

    /// Periodic timing description, when this sync is expressible as one.
    ///
    /// A single-point explicit node is periodic with `period == duration` and
    /// `count == 1`; a multi-point explicit node never is, even when its
    /// spacing happens to be uniform. A repeating node is periodic exactly
    /// when its inner node is, with the count multiplied through.
    pub fn as_periodic(&self) -> Option<Periodic> {
        match &self.kind {
            Kind::Explicit { timing, duration } => {
                if timing.num_points() == 1 {
                    Some(Periodic {
                        period: *duration,
                        begin: timing.begin()[0],
                        length: timing.length()[0],
                        count: 1,
                    })
                } else {
                    None
                }
            }
            Kind::Repeated { inner, count } => inner.as_periodic().map(|p| Periodic {
                count: p.count * count,
                ..p
            }),
        }
    }

    /// Explicit timing description; always available.
    ///
    /// A repeating node tiles its inner description `count` times, offsetting
    /// tile `k`'s begin times by `k * inner.duration()`.
    pub fn as_explicit(&self) -> Explicit {
        match &self.kind {
            Kind::Explicit { timing, .. } => timing.clone(),
            Kind::Repeated { inner, count } => {
                inner.as_explicit().tiled(*count, inner.duration())
            }
        }
    }

    /// Total duration in seconds from the trigger to the end of this sync.
    pub fn duration(&self) -> f64 {
        match &self.kind {
            Kind::Explicit { duration, .. } => *duration,
            Kind::Repeated { inner, count } => inner.duration() * *count as f64,
        }
    }

    /// Total number of sync points described by this node.
    pub fn num_sync_points(&self) -> usize {
        match &self.kind {
            Kind::Explicit { timing, .. } => timing.num_points(),
            Kind::Repeated { inner, count } => inner.num_sync_points() * count,
        }
    }
}

// Hand-written: the registry's trait objects carry no `Debug` bound, so the
// derive is unavailable. Instruments are shown by id.
impl fmt::Debug for SyncPoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("SyncPoints");
        match &self.kind {
            Kind::Explicit { timing, duration } => {
                dbg.field("timing", timing).field("duration", duration);
            }
            Kind::Repeated { inner, count } => {
                dbg.field("inner", inner).field("count", count);
            }
        }
        let ids: Vec<&str> = self.registry.iter().map(|e| e.instrument.id()).collect();
        dbg.field("instruments", &ids).finish_non_exhaustive()
    }
}
