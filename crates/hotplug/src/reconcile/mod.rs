//! Reconciliation
//!
//! [`plan`] decides, [`engine`] executes. [`adhoc`] covers the one-off
//! attach and detach commands that bypass slot naming.

pub mod adhoc;
pub mod engine;
pub mod plan;

pub use engine::{EntryOutcome, ReconcileOptions, ReconcileReport, Reconciler, ReportEntry};
pub use plan::{AttachmentPlanEntry, Operation, SlotName, is_selected};
