//! Storage collaborators
//!
//! The engine only talks to these traits:
//! - ReadingStore: reading records, owned by the lifecycle engine
//! - FlatStore: flat registry, read by the engine for baselines
//! - SettingsStore: global tariff settings, read once per approval

pub mod memory;

use async_trait::async_trait;
use meterbill_common::{Flat, GlobalSettings, Reading, ReadingStatus, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use memory::{InMemoryFlatStore, InMemoryReadingStore, InMemorySettingsStore};

/// Filter for reading queries. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingQuery {
    pub flat_id: Option<String>,
    pub status: Option<ReadingStatus>,
}

impl ReadingQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_flat(flat_id: impl Into<String>) -> Self {
        Self {
            flat_id: Some(flat_id.into()),
            status: None,
        }
    }

    pub fn with_status(mut self, status: ReadingStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, reading: &Reading) -> bool {
        self.flat_id.as_deref().map_or(true, |f| reading.flat_id == f)
            && self.status.map_or(true, |s| reading.status == s)
    }
}

/// Trait for reading storage backends
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Store a new reading
    async fn insert(&self, reading: Reading) -> Result<Reading>;

    /// Get a reading by ID
    async fn get(&self, id: &Uuid) -> Result<Option<Reading>>;

    /// Replace a reading if its stored version still equals `expected_version`.
    /// Returns the stored record with its version incremented.
    async fn update(&self, reading: Reading, expected_version: u64) -> Result<Reading>;

    /// Readings matching the filter, in no particular order
    async fn query(&self, query: &ReadingQuery) -> Result<Vec<Reading>>;
}

/// Trait for the flat registry
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FlatStore: Send + Sync {
    async fn get_by_flat_id(&self, flat_id: &str) -> Result<Option<Flat>>;

    async fn list(&self) -> Result<Vec<Flat>>;

    /// Create or replace a flat
    async fn upsert(&self, flat: Flat) -> Result<Flat>;

    async fn update_tenant_name(&self, flat_id: &str, tenant_name: Option<String>) -> Result<Flat>;

    async fn set_initial_reading(&self, flat_id: &str, initial_reading: Option<Decimal>)
        -> Result<Flat>;
}

/// Admin edit of a flat; unset fields are left alone
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatUpdate {
    /// Blank clears the tenant name
    pub tenant_name: Option<String>,
    pub initial_reading: Option<Decimal>,
}

/// Partial settings change; unset fields keep their current value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub tariff_per_unit: Option<Decimal>,
    pub minimum_price: Option<Decimal>,
    pub unit_factor: Option<Decimal>,
}

impl SettingsUpdate {
    pub fn apply_to(&self, current: &GlobalSettings) -> GlobalSettings {
        GlobalSettings {
            tariff_per_unit: self.tariff_per_unit.unwrap_or(current.tariff_per_unit),
            minimum_price: self.minimum_price.unwrap_or(current.minimum_price),
            unit_factor: self.unit_factor.unwrap_or(current.unit_factor),
        }
    }
}

/// Trait for the global settings record
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Current settings as one consistent value
    async fn current(&self) -> Result<GlobalSettings>;

    /// Merge `update` into the stored settings atomically
    async fn update(&self, update: SettingsUpdate) -> Result<GlobalSettings>;

    async fn update_tariff(&self, tariff_per_unit: Decimal) -> Result<GlobalSettings> {
        self.update(SettingsUpdate {
            tariff_per_unit: Some(tariff_per_unit),
            ..SettingsUpdate::default()
        })
        .await
    }

    async fn update_minimum_price(&self, minimum_price: Decimal) -> Result<GlobalSettings> {
        self.update(SettingsUpdate {
            minimum_price: Some(minimum_price),
            ..SettingsUpdate::default()
        })
        .await
    }

    async fn update_unit_factor(&self, unit_factor: Decimal) -> Result<GlobalSettings> {
        self.update(SettingsUpdate {
            unit_factor: Some(unit_factor),
            ..SettingsUpdate::default()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meterbill_common::OcrCandidate;

    #[test]
    fn test_query_matching() {
        let reading = Reading::new_pending(
            "A1",
            "img",
            OcrCandidate::empty(),
            chrono::Utc::now(),
            chrono_tz::UTC,
        );

        assert!(ReadingQuery::all().matches(&reading));
        assert!(ReadingQuery::for_flat("A1").matches(&reading));
        assert!(!ReadingQuery::for_flat("B1").matches(&reading));
        assert!(ReadingQuery::for_flat("A1")
            .with_status(ReadingStatus::Pending)
            .matches(&reading));
        assert!(!ReadingQuery::all()
            .with_status(ReadingStatus::Approved)
            .matches(&reading));
    }

    #[test]
    fn test_settings_update_merges() {
        use rust_decimal_macros::dec;

        let current = GlobalSettings::default();
        let update = SettingsUpdate {
            tariff_per_unit: Some(dec!(7.5)),
            ..SettingsUpdate::default()
        };
        let merged = update.apply_to(&current);
        assert_eq!(merged.tariff_per_unit, dec!(7.5));
        assert_eq!(merged.minimum_price, current.minimum_price);
        assert_eq!(merged.unit_factor, current.unit_factor);
    }
}
