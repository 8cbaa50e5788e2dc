//! Flat - the billing unit a reading belongs to

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{MeterBillError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flat {
    /// Storage identifier
    pub id: String,
    /// Display code, e.g. "A1" or "Guest House"
    pub flat_id: String,
    #[serde(default)]
    pub tenant_name: Option<String>,
    /// Legacy per-flat tariff, superseded by the global settings
    #[serde(default)]
    pub tariff_per_unit: Decimal,
    /// Owning user
    pub user_id: String,
    /// Baseline for the first approval when no approved reading exists
    #[serde(default)]
    pub initial_reading: Option<Decimal>,
}

impl Flat {
    pub fn new(flat_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let flat_id = flat_id.into();
        Self {
            id: flat_id.clone(),
            flat_id,
            tenant_name: None,
            tariff_per_unit: Decimal::ZERO,
            user_id: user_id.into(),
            initial_reading: None,
        }
    }

    pub fn with_tenant(mut self, tenant_name: impl Into<String>) -> Self {
        self.tenant_name = Some(tenant_name.into());
        self
    }

    pub fn with_initial_reading(mut self, initial_reading: Decimal) -> Self {
        self.initial_reading = Some(initial_reading);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.flat_id.trim().is_empty() {
            return Err(MeterBillError::validation("flatId is required"));
        }
        if self.user_id.trim().is_empty() {
            return Err(MeterBillError::validation("userId is required"));
        }
        if matches!(self.initial_reading, Some(v) if v < Decimal::ZERO) {
            return Err(MeterBillError::validation("initialReading cannot be negative"));
        }
        Ok(())
    }
}
