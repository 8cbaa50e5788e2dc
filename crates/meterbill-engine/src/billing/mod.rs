//! Monthly billing summaries over approved readings

pub mod aggregator;
pub mod ordering;

pub use aggregator::{
    BillingAggregator, FlatTotal, MonthlySummary, Snapshotted, SummaryDefaults, SummaryKey,
    SummaryRow,
};
pub use ordering::{FlatOrdering, DEFAULT_FLAT_ORDER};
