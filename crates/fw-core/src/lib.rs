//! Core domain logic for the folding client monitor.
//!
//! This crate contains the fundamental types and logic for:
//! - Log reading: classifying `FAHlog.txt` lines and splitting them into runs and units
//! - Queue reading: decoding the fixed-slot `queue.dat` snapshot
//! - Reconciliation: merging queue, log and unit info into one record per slot
//! - Production: units per day, bonus credit and points per day

pub mod diagnostics;
pub mod fahlog;
pub mod frames;
pub mod log;
pub mod log_unit;
pub mod production;
pub mod queue;
pub mod reconcile;
pub mod types;
pub mod unit_info;

pub use diagnostics::{DiagnosticSink, Notice, NoticeLog, Severity, TracingSink};
pub use fahlog::{FahLog, LineSpan, LogError, LogLineSource, RunIdentity};
pub use frames::{FrameEvent, FrameProgress};
pub use log::{LineKind, LinePayload, LogLine, WorkUnitResult};
pub use log_unit::{ClientStatus, LogUnitData};
pub use production::{ProductionCalculator, ProductionValues, ProteinParams};
pub use queue::{QueueEntry, QueueError, QueueFile, QueueSnapshot, QueueSnapshotSource, QueueStatus};
pub use reconcile::{
    ReconcileError, ReconciledUnit, Reconciler, Reconciliation, Slot, SlotMode, reconcile,
};
pub use types::{Fingerprint, ValidationError};
pub use unit_info::{UnitInfoError, UnitInfoFile, UnitInfoLogData, UnitInfoLogSource};
