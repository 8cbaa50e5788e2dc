//! # MeterBill Common
//!
//! Shared record types and errors for MeterBill, the meter-reading approval
//! and billing engine.
//!
//! ## Core Types
//!
//! - [`Reading`]: one tenant submission and its approval lifecycle
//! - [`Flat`]: the billing unit, with an optional baseline reading
//! - [`GlobalSettings`]/[`PricingSnapshot`]: tariff, minimum price, unit factor
//! - [`YearMonth`]: the `YYYY-MM` month bucket used for billing

pub mod error;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{DependencyError, MeterBillError, NotFoundError, Result};
pub use types::{
    flat::Flat,
    reading::{ApprovalRecord, OcrCandidate, Reading, ReadingStatus, Transition},
    settings::{
        Charge, GlobalSettings, PricingSnapshot, DEFAULT_MINIMUM_PRICE, DEFAULT_TARIFF_PER_UNIT,
        DEFAULT_UNIT_FACTOR,
    },
    year_month::YearMonth,
};

/// MeterBill version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
