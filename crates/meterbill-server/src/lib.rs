//! # MeterBill Server
//!
//! REST transport, configuration loading, and the event stream for the
//! MeterBill service.

pub mod api;
pub mod config;
