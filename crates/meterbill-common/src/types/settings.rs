//! Tariff settings and the per-approval pricing snapshot
//!
//! The billed amount for one approval:
//!
//! ```text
//! converted = units_used × unit_factor
//! amount    = max(converted × tariff_per_unit, minimum_price)
//! ```
//!
//! The minimum price is a floor, never added on top.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{MeterBillError, Result};

/// Tariff used when no admin has configured one yet
pub const DEFAULT_TARIFF_PER_UNIT: Decimal = Decimal::ZERO;

/// Minimum charge used when no admin has configured one yet
pub const DEFAULT_MINIMUM_PRICE: Decimal = dec!(250);

/// Unit conversion factor (meter units to billed units, e.g. m³ to kg)
pub const DEFAULT_UNIT_FACTOR: Decimal = dec!(2.3);

/// Global tariff settings (singleton record, admin-mutable)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSettings {
    pub tariff_per_unit: Decimal,
    pub minimum_price: Decimal,
    pub unit_factor: Decimal,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            tariff_per_unit: DEFAULT_TARIFF_PER_UNIT,
            minimum_price: DEFAULT_MINIMUM_PRICE,
            unit_factor: DEFAULT_UNIT_FACTOR,
        }
    }
}

impl GlobalSettings {
    pub fn validate(&self) -> Result<()> {
        if self.tariff_per_unit < Decimal::ZERO {
            return Err(MeterBillError::validation("tariffPerUnit cannot be negative"));
        }
        if self.minimum_price < Decimal::ZERO {
            return Err(MeterBillError::validation("minimumPrice cannot be negative"));
        }
        if self.unit_factor <= Decimal::ZERO {
            return Err(MeterBillError::validation("unitFactor must be positive"));
        }
        Ok(())
    }

    /// Immutable copy handed to one approval
    pub fn snapshot(&self) -> PricingSnapshot {
        PricingSnapshot::new(self.tariff_per_unit, self.minimum_price, self.unit_factor)
    }
}

/// Pricing values in effect for a single approval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingSnapshot {
    pub tariff_per_unit: Decimal,
    pub minimum_price: Decimal,
    pub unit_factor: Decimal,
}

/// Result of pricing a consumption delta
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Charge {
    /// Units after applying the unit factor
    pub converted_units: Decimal,
    /// converted_units × tariff, before the minimum floor
    pub energy_amount: Decimal,
    /// Authoritative billed amount
    pub amount: Decimal,
}

impl PricingSnapshot {
    pub fn new(tariff_per_unit: Decimal, minimum_price: Decimal, unit_factor: Decimal) -> Self {
        Self {
            tariff_per_unit,
            minimum_price,
            unit_factor,
        }
    }

    /// Units consumed between two meter values, clamped at zero for
    /// meter resets and downward corrections
    pub fn units_used(previous: Decimal, current: Decimal) -> Decimal {
        (current - previous).max(Decimal::ZERO)
    }

    /// Price `units_used`. Fails with `Validation` when the product does
    /// not fit in a `Decimal`.
    pub fn charge(&self, units_used: Decimal) -> Result<Charge> {
        let too_large = || MeterBillError::validation("correctedReading too large to price");
        let converted_units = units_used
            .checked_mul(self.unit_factor)
            .ok_or_else(too_large)?
            .normalize();
        let energy_amount = converted_units
            .checked_mul(self.tariff_per_unit)
            .ok_or_else(too_large)?
            .normalize();
        Ok(Charge {
            converted_units,
            energy_amount,
            amount: energy_amount.max(self.minimum_price),
        })
    }
}
