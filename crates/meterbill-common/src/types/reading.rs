//! Reading - one tenant submission and its approval lifecycle
//!
//! ```text
//!            approve            reopen
//!   pending ─────────▶ approved ──────▶ pending
//!      │
//!      │ reject
//!      ▼
//!   rejected
//! ```
//!
//! Only the transitions above exist. The record methods here check the
//! source state and apply field changes; storage and pricing are handled by
//! the lifecycle engine.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::settings::PricingSnapshot;
use super::year_month::YearMonth;
use crate::error::{MeterBillError, Result};

/// Lifecycle status of a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for ReadingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReadingStatus::Pending => "pending",
            ReadingStatus::Approved => "approved",
            ReadingStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ReadingStatus {
    type Err = MeterBillError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ReadingStatus::Pending),
            "approved" => Ok(ReadingStatus::Approved),
            "rejected" => Ok(ReadingStatus::Rejected),
            other => Err(MeterBillError::validation(format!("unknown status {:?}", other))),
        }
    }
}

/// Admin transitions on an existing reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Approve,
    Reject,
    Reopen,
}

impl Transition {
    /// The only status this transition may start from
    pub fn source(&self) -> ReadingStatus {
        match self {
            Transition::Approve | Transition::Reject => ReadingStatus::Pending,
            Transition::Reopen => ReadingStatus::Approved,
        }
    }

    pub fn target(&self) -> ReadingStatus {
        match self {
            Transition::Approve => ReadingStatus::Approved,
            Transition::Reject => ReadingStatus::Rejected,
            Transition::Reopen => ReadingStatus::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Approve => "approve",
            Transition::Reject => "reject",
            Transition::Reopen => "reopen",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-suggested meter value. Advisory only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrCandidate {
    pub value: Option<Decimal>,
    pub confidence: Option<f64>,
}

impl OcrCandidate {
    pub fn new(value: Option<Decimal>, confidence: Option<f64>) -> Self {
        Self { value, confidence }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// Everything the engine computed for one approval
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalRecord {
    pub corrected_reading: Decimal,
    pub previous_reading: Decimal,
    pub units_used: Decimal,
    pub amount: Decimal,
    pub snapshot: PricingSnapshot,
    pub approved_at: DateTime<Utc>,
}

/// Reading record as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub id: Uuid,
    pub flat_id: String,
    pub image_ref: String,

    pub ocr_reading: Option<Decimal>,
    pub ocr_confidence: Option<f64>,
    /// Admin-entered value, authoritative once set
    pub corrected_reading: Option<Decimal>,
    pub previous_reading: Option<Decimal>,
    pub units_used: Option<Decimal>,
    pub amount: Option<Decimal>,

    pub status: ReadingStatus,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,

    // Frozen at approval
    pub tariff_at_approval: Option<Decimal>,
    #[serde(default)]
    pub unit_factor_at_approval: Option<Decimal>,
    #[serde(default)]
    pub minimum_price_at_approval: Option<Decimal>,

    /// Derived from `created_at`; absent on legacy records
    #[serde(default)]
    pub year_month: Option<YearMonth>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub reopen_reason: Option<String>,

    /// Incremented on every committed write
    #[serde(default)]
    pub version: u64,
}

impl Reading {
    /// Create a pending reading from a tenant submission
    pub fn new_pending(
        flat_id: impl Into<String>,
        image_ref: impl Into<String>,
        ocr: OcrCandidate,
        created_at: DateTime<Utc>,
        tz: Tz,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            flat_id: flat_id.into(),
            image_ref: image_ref.into(),
            ocr_reading: ocr.value,
            ocr_confidence: ocr.confidence,
            corrected_reading: None,
            previous_reading: None,
            units_used: None,
            amount: None,
            status: ReadingStatus::Pending,
            created_at,
            approved_at: None,
            tariff_at_approval: None,
            unit_factor_at_approval: None,
            minimum_price_at_approval: None,
            year_month: Some(YearMonth::from_datetime(created_at, tz)),
            rejection_reason: None,
            reopen_reason: None,
            version: 0,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.status == ReadingStatus::Approved
    }

    /// Fail with `InvalidTransition` unless the reading may take `transition`
    pub fn ensure_can(&self, transition: Transition) -> Result<()> {
        if self.status == transition.source() {
            Ok(())
        } else {
            Err(MeterBillError::InvalidTransition {
                reading_id: self.id,
                from: self.status,
                action: transition,
            })
        }
    }

    /// Meter value this reading contributes as a baseline for the next one
    pub fn effective_value(&self) -> Option<Decimal> {
        self.corrected_reading.or(self.ocr_reading)
    }

    /// Timestamp used to order approvals, most recent first
    pub fn approval_order_key(&self) -> DateTime<Utc> {
        self.approved_at.unwrap_or(self.created_at)
    }

    /// Month this reading bills to. Legacy records without `year_month`
    /// fall back to the month they were approved in.
    pub fn billing_month(&self, tz: Tz) -> Option<YearMonth> {
        self.year_month
            .or_else(|| self.approved_at.map(|at| YearMonth::from_datetime(at, tz)))
    }

    pub fn approve(&mut self, record: ApprovalRecord) -> Result<()> {
        self.ensure_can(Transition::Approve)?;

        self.corrected_reading = Some(record.corrected_reading);
        self.previous_reading = Some(record.previous_reading);
        self.units_used = Some(record.units_used);
        self.amount = Some(record.amount);
        self.tariff_at_approval = Some(record.snapshot.tariff_per_unit);
        self.unit_factor_at_approval = Some(record.snapshot.unit_factor);
        self.minimum_price_at_approval = Some(record.snapshot.minimum_price);
        self.approved_at = Some(record.approved_at);
        self.status = ReadingStatus::Approved;
        Ok(())
    }

    pub fn reject(&mut self, reason: &str) -> Result<()> {
        let reason = required_reason(reason)?;
        self.ensure_can(Transition::Reject)?;

        self.status = ReadingStatus::Rejected;
        self.rejection_reason = Some(reason);
        Ok(())
    }

    /// Revert an approval. `corrected_reading` is kept for audit.
    pub fn reopen(&mut self, reason: &str) -> Result<()> {
        let reason = required_reason(reason)?;
        self.ensure_can(Transition::Reopen)?;

        self.status = ReadingStatus::Pending;
        self.previous_reading = None;
        self.units_used = None;
        self.amount = None;
        self.approved_at = None;
        self.tariff_at_approval = None;
        self.unit_factor_at_approval = None;
        self.minimum_price_at_approval = None;
        self.rejection_reason = None;
        self.reopen_reason = Some(reason);
        Ok(())
    }

    /// Check the field invariants that must hold for the current status
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let frozen = [
            ("previousReading", self.previous_reading.is_some()),
            ("unitsUsed", self.units_used.is_some()),
            ("amount", self.amount.is_some()),
            ("tariffAtApproval", self.tariff_at_approval.is_some()),
            ("approvedAt", self.approved_at.is_some()),
        ];

        match self.status {
            ReadingStatus::Approved => {
                if self.corrected_reading.is_none() {
                    return Err("approved reading without correctedReading".into());
                }
                if let Some((name, _)) = frozen.iter().find(|(_, set)| !set) {
                    return Err(format!("approved reading without {}", name));
                }
            }
            ReadingStatus::Pending | ReadingStatus::Rejected => {
                if let Some((name, _)) = frozen.iter().find(|(_, set)| *set) {
                    return Err(format!("{} reading carries {}", self.status, name));
                }
            }
        }
        Ok(())
    }
}

fn required_reason(reason: &str) -> Result<String> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Err(MeterBillError::validation("reason is required"));
    }
    Ok(trimmed.to_string())
}
