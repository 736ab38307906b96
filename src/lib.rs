//! Synchronization-point engine for trigger-shared instrument control.
//!
//! Multiple independent instruments that share one external trigger but no
//! common clock are coordinated by describing, once, a set of time points
//! relative to that trigger and attaching instrument-specific payloads to
//! them. Before the trigger fires, [`points::SyncPoints::execute`] compiles
//! the attached commands — merging everything registered against one
//! instrument — and arms every instrument consistently.
//!
//! The capability contracts ([`command::SyncCommand`],
//! [`instrument::SyncInstrument`], [`parameter::SyncParameter`]) are the
//! seams concrete drivers implement; this crate ships software mocks for
//! them under [`instrument::mock`].

pub mod command;
pub mod error;
pub mod instrument;
pub mod parameter;
pub mod points;
pub mod timing;

pub use command::{BoxedCommand, SyncCommand};
pub use error::{SyncError, SyncResult};
pub use points::SyncPoints;
pub use timing::{Explicit, Periodic};
