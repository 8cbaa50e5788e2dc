//! Reading lifecycle: state machine, previous-reading resolution, approval

pub mod engine;
pub mod resolution;

pub use engine::{EngineConfig, ReadingEngine};
pub use resolution::{
    backfill_previous_readings, latest_approved, resolve_previous_reading, BackfillEntry,
    PreviousSource, ResolvedPrevious,
};
