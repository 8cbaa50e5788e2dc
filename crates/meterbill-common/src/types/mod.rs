//! Core record types for MeterBill

pub mod flat;
pub mod reading;
pub mod settings;
pub mod year_month;
