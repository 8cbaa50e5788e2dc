//! Monthly billing aggregation
//!
//! Groups approved readings by flat and billing month. Each row is itemized
//! as `units × factor × tariff + minimum charge`. Factor and tariff come
//! from the values frozen on the reading at approval, with the summary
//! defaults standing in for legacy records that predate the snapshot. The
//! minimum charge is the receipt's fixed service charge from the summary
//! defaults, separate from the minimum price used as the approval floor.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use meterbill_common::{MeterBillError, PricingSnapshot, Reading, ReadingStatus, Result, YearMonth};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::ordering::FlatOrdering;

/// A value read from the reading's frozen snapshot, or substituted from
/// defaults because the record predates it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "value", rename_all = "camelCase")]
pub enum Snapshotted<T> {
    Snapshot(T),
    Defaulted(T),
}

impl<T: Copy> Snapshotted<T> {
    pub fn from_option(frozen: Option<T>, default: T) -> Self {
        match frozen {
            Some(v) => Snapshotted::Snapshot(v),
            None => Snapshotted::Defaulted(default),
        }
    }

    pub fn value(&self) -> T {
        match self {
            Snapshotted::Snapshot(v) | Snapshotted::Defaulted(v) => *v,
        }
    }

    pub fn is_defaulted(&self) -> bool {
        matches!(self, Snapshotted::Defaulted(_))
    }
}

/// Summary-only pricing values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryDefaults {
    /// Used for readings approved before the factor was frozen
    pub unit_factor: Decimal,
    /// Fixed charge added to every itemized row
    pub minimum_charge: Decimal,
}

impl Default for SummaryDefaults {
    fn default() -> Self {
        Self {
            unit_factor: dec!(2.3),
            minimum_charge: dec!(25),
        }
    }
}

/// One billed reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRow {
    pub reading_id: Uuid,
    pub flat_id: String,
    pub tenant_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub previous: Decimal,
    pub current: Decimal,
    pub units_used: Decimal,
    pub unit_factor: Snapshotted<Decimal>,
    pub converted_units: Decimal,
    pub tariff: Decimal,
    pub energy_amount: Decimal,
    pub minimum_charge: Decimal,
    /// Itemized total: energy plus minimum charge
    pub total_amount: Decimal,
    /// Amount frozen at approval
    pub amount: Option<Decimal>,
}

impl SummaryRow {
    fn is_legacy(&self) -> bool {
        self.unit_factor.is_defaulted()
    }
}

/// Grouping key for per-flat totals
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryKey {
    pub flat_id: String,
    pub year_month: YearMonth,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatTotal {
    pub flat_id: String,
    pub tenant_name: Option<String>,
    pub readings: usize,
    pub units_used: Decimal,
    pub total_amount: Decimal,
    pub authoritative_amount: Decimal,
}

impl FlatTotal {
    fn new(row: &SummaryRow) -> Self {
        Self {
            flat_id: row.flat_id.clone(),
            tenant_name: row.tenant_name.clone(),
            readings: 1,
            units_used: row.units_used,
            total_amount: row.total_amount,
            authoritative_amount: row.amount.unwrap_or_default(),
        }
    }

    fn add_row(&mut self, row: &SummaryRow) -> Result<()> {
        self.readings += 1;
        self.units_used = checked_sum([self.units_used, row.units_used])?;
        self.total_amount = checked_sum([self.total_amount, row.total_amount])?;
        self.authoritative_amount =
            checked_sum([self.authoritative_amount, row.amount.unwrap_or_default()])?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlySummary {
    pub year_month: YearMonth,
    pub rows: Vec<SummaryRow>,
    pub per_flat: Vec<FlatTotal>,
    /// Σ itemized `total_amount`
    pub grand_total: Decimal,
    /// Σ amounts frozen at approval
    pub authoritative_total: Decimal,
    /// Rows that used at least one default instead of a frozen value
    pub legacy_rows: usize,
}

/// Billing aggregator
#[derive(Debug, Clone)]
pub struct BillingAggregator {
    defaults: SummaryDefaults,
    ordering: FlatOrdering,
    timezone: Tz,
}

impl Default for BillingAggregator {
    fn default() -> Self {
        Self::new(SummaryDefaults::default(), FlatOrdering::default(), chrono_tz::UTC)
    }
}

impl BillingAggregator {
    pub fn new(defaults: SummaryDefaults, ordering: FlatOrdering, timezone: Tz) -> Self {
        Self {
            defaults,
            ordering,
            timezone,
        }
    }

    pub fn defaults(&self) -> SummaryDefaults {
        self.defaults
    }

    /// Summarize the approved readings billed to `year_month`.
    /// `tenants` maps flat display code to tenant name.
    #[instrument(skip(self, readings, tenants), fields(candidates = readings.len()))]
    pub fn summarize(
        &self,
        readings: &[Reading],
        year_month: YearMonth,
        tenants: &HashMap<String, String>,
    ) -> Result<MonthlySummary> {
        let mut rows: Vec<SummaryRow> = readings
            .iter()
            .filter(|r| r.status == ReadingStatus::Approved)
            .filter(|r| r.billing_month(self.timezone) == Some(year_month))
            .map(|r| self.row(r, tenants.get(&r.flat_id).cloned()))
            .collect::<Result<_>>()?;

        rows.sort_by(|a, b| {
            self.ordering
                .compare(&a.flat_id, &b.flat_id)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.reading_id.cmp(&b.reading_id))
        });

        let mut groups: HashMap<SummaryKey, FlatTotal> = HashMap::new();
        for row in &rows {
            let key = SummaryKey {
                flat_id: row.flat_id.clone(),
                year_month,
            };
            match groups.entry(key) {
                Entry::Occupied(mut total) => total.get_mut().add_row(row)?,
                Entry::Vacant(slot) => {
                    slot.insert(FlatTotal::new(row));
                }
            }
        }
        let mut per_flat: Vec<FlatTotal> = groups.into_values().collect();
        per_flat.sort_by(|a, b| self.ordering.compare(&a.flat_id, &b.flat_id));

        let grand_total = checked_sum(rows.iter().map(|r| r.total_amount))?;
        let authoritative_total = checked_sum(rows.iter().filter_map(|r| r.amount))?;
        let legacy_rows = rows.iter().filter(|r| r.is_legacy()).count();

        debug!(
            year_month = %year_month,
            rows = rows.len(),
            legacy_rows,
            "Built monthly summary"
        );

        Ok(MonthlySummary {
            year_month,
            rows,
            per_flat,
            grand_total,
            authoritative_total,
            legacy_rows,
        })
    }

    /// Distinct billing months that have approved readings, most recent first
    pub fn available_months(&self, readings: &[Reading]) -> Vec<YearMonth> {
        let months: BTreeSet<YearMonth> = readings
            .iter()
            .filter(|r| r.status == ReadingStatus::Approved)
            .filter_map(|r| r.billing_month(self.timezone))
            .collect();
        months.into_iter().rev().collect()
    }

    fn row(&self, reading: &Reading, tenant_name: Option<String>) -> Result<SummaryRow> {
        let previous = reading.previous_reading.unwrap_or_default();
        let current = reading.effective_value().unwrap_or_default();
        let units_used = reading
            .units_used
            .unwrap_or_else(|| PricingSnapshot::units_used(previous, current));

        let unit_factor =
            Snapshotted::from_option(reading.unit_factor_at_approval, self.defaults.unit_factor);
        let minimum_charge = self.defaults.minimum_charge;
        let tariff = reading.tariff_at_approval.unwrap_or_default();

        // Same factor and tariff math as approval; the approval floor is
        // replaced by the summary's minimum charge
        let charge = PricingSnapshot::new(tariff, Decimal::ZERO, unit_factor.value())
            .charge(units_used)
            .map_err(|_| {
                MeterBillError::Internal(format!("reading {} too large to summarize", reading.id))
            })?;
        let total_amount = checked_sum([charge.energy_amount, minimum_charge])?;

        Ok(SummaryRow {
            reading_id: reading.id,
            flat_id: reading.flat_id.clone(),
            tenant_name,
            created_at: reading.created_at,
            previous,
            current,
            units_used,
            unit_factor,
            converted_units: charge.converted_units,
            tariff,
            energy_amount: charge.energy_amount,
            minimum_charge,
            total_amount,
            amount: reading.amount,
        })
    }
}

fn checked_sum(values: impl IntoIterator<Item = Decimal>) -> Result<Decimal> {
    values.into_iter().try_fold(Decimal::ZERO, |acc, v| {
        acc.checked_add(v)
            .ok_or_else(|| MeterBillError::Internal("summary total overflowed".into()))
    })
}
