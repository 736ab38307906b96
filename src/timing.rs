//! Wire-level sync-point timing descriptions.
//!
//! Two shapes are handed to instrument drivers at arm time:
//!
//! - [`Periodic`]: a compact description of `count` uniformly spaced sync
//!   points, for hardware that programs a repetition period directly
//!   (ramp generators, gated counters).
//! - [`Explicit`]: the general case — parallel `begin`/`length` arrays, one
//!   entry per sync point, for irregular spacing.
//!
//! A driver must be able to consume at least one of the two. All times are
//! seconds relative to the shared external trigger.

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Compact description of `count` uniformly spaced sync points.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Periodic {
    /// Spacing between consecutive sync points in seconds.
    pub period: f64,
    /// Offset of the first point relative to the trigger in seconds.
    pub begin: f64,
    /// Length of each point in seconds.
    pub length: f64,
    /// Number of sync points.
    pub count: usize,
}

/// General-case sync point description: one `(begin, length)` pair per point.
///
/// Invariants, enforced by [`Explicit::new`]:
/// - `begin` is non-decreasing,
/// - every `length` is non-negative,
/// - the arrays have equal, non-zero size.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawExplicit")]
pub struct Explicit {
    begin: Vec<f64>,
    length: Vec<f64>,
}

/// Unvalidated wire form of [`Explicit`]; deserialization funnels through
/// [`Explicit::new`] so the invariants hold for decoded values too.
#[derive(Deserialize)]
struct RawExplicit {
    begin: Vec<f64>,
    length: Vec<f64>,
}

impl TryFrom<RawExplicit> for Explicit {
    type Error = SyncError;

    fn try_from(raw: RawExplicit) -> SyncResult<Self> {
        Self::new(raw.begin, raw.length)
    }
}

impl Explicit {
    /// Build a validated explicit description.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Construction`] when the arrays are empty, differ
    /// in size, `begin` is not sorted, or any length is negative.
    pub fn new(begin: Vec<f64>, length: Vec<f64>) -> SyncResult<Self> {
        if begin.is_empty() {
            return Err(SyncError::Construction(
                "sync description requires at least one point".to_string(),
            ));
        }
        if begin.len() != length.len() {
            return Err(SyncError::Construction(format!(
                "begin and length arrays differ in size ({} vs {})",
                begin.len(),
                length.len()
            )));
        }
        if begin.windows(2).any(|w| w[1] < w[0]) {
            return Err(SyncError::Construction(
                "begin times must be non-decreasing".to_string(),
            ));
        }
        if length.iter().any(|&l| l < 0.0) {
            return Err(SyncError::Construction(
                "point lengths must be non-negative".to_string(),
            ));
        }
        Ok(Self { begin, length })
    }

    /// Begin times relative to the trigger, one per sync point.
    pub fn begin(&self) -> &[f64] {
        &self.begin
    }

    /// Point lengths, parallel to [`begin`](Self::begin).
    pub fn length(&self) -> &[f64] {
        &self.length
    }

    /// Number of sync points described.
    pub fn num_points(&self) -> usize {
        self.begin.len()
    }

    /// End of the last point: `begin[last] + length[last]`.
    pub fn span(&self) -> f64 {
        // new() guarantees at least one point
        let last = self.begin.len() - 1;
        self.begin[last] + self.length[last]
    }

    /// Tile this description `count` times, offsetting each tile's begin
    /// times by `k * stride`. Lengths are repeated verbatim.
    pub(crate) fn tiled(&self, count: usize, stride: f64) -> Self {
        let n = self.begin.len();
        let mut begin = Vec::with_capacity(n * count);
        let mut length = Vec::with_capacity(n * count);
        for k in 0..count {
            let offset = k as f64 * stride;
            begin.extend(self.begin.iter().map(|b| b + offset));
            length.extend_from_slice(&self.length);
        }
        Self { begin, length }
    }
}
