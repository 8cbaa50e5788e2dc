//! Previous-reading resolution
//!
//! The baseline for an approval is, in order:
//! 1. the effective value of the flat's most recent approved reading
//! 2. the flat's `initial_reading`
//! 3. zero
//!
//! Resolution is recomputed from the store on every approval; nothing caches
//! a "latest" pointer.

use meterbill_common::{Reading, ReadingStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

/// Where a resolved previous reading came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "camelCase")]
pub enum PreviousSource {
    #[serde(rename_all = "camelCase")]
    PreviousApproval { reading_id: Uuid },
    InitialReading,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPrevious {
    pub value: Decimal,
    #[serde(flatten)]
    pub source: PreviousSource,
}

/// Most recent approval first; ties broken by creation time, then id
fn newest_first(a: &Reading, b: &Reading) -> Ordering {
    b.approval_order_key()
        .cmp(&a.approval_order_key())
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| b.id.cmp(&a.id))
}

/// Latest approved reading among `candidates` that has a usable value,
/// ignoring `excluding` (the reading being approved)
pub fn latest_approved<'a>(candidates: &'a [Reading], excluding: Option<Uuid>) -> Option<&'a Reading> {
    let mut approved: Vec<&Reading> = candidates
        .iter()
        .filter(|r| r.status == ReadingStatus::Approved)
        .filter(|r| Some(r.id) != excluding)
        .collect();
    approved.sort_by(|a, b| newest_first(a, b));

    approved.into_iter().find(|r| r.effective_value().is_some())
}

/// Resolve the previous reading for one flat
pub fn resolve_previous_reading(
    candidates: &[Reading],
    excluding: Option<Uuid>,
    initial_reading: Option<Decimal>,
) -> ResolvedPrevious {
    if let Some(prev) = latest_approved(candidates, excluding) {
        if let Some(value) = prev.effective_value() {
            return ResolvedPrevious {
                value,
                source: PreviousSource::PreviousApproval { reading_id: prev.id },
            };
        }
    }

    match initial_reading {
        Some(value) => ResolvedPrevious {
            value,
            source: PreviousSource::InitialReading,
        },
        None => ResolvedPrevious {
            value: Decimal::ZERO,
            source: PreviousSource::Default,
        },
    }
}

/// One step of a recomputed approval chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillEntry {
    pub reading_id: Uuid,
    /// Value frozen on the record at approval
    pub recorded: Option<Decimal>,
    /// Value the resolution rules produce today
    pub resolved: ResolvedPrevious,
}

impl BackfillEntry {
    pub fn is_consistent(&self) -> bool {
        self.recorded == Some(self.resolved.value)
    }
}

/// Recompute the previous reading for every approved reading of a flat, in
/// approval order, using the same rules as a single approval
pub fn backfill_previous_readings(
    approved: &[Reading],
    initial_reading: Option<Decimal>,
) -> Vec<BackfillEntry> {
    let mut chain: Vec<Reading> = approved
        .iter()
        .filter(|r| r.status == ReadingStatus::Approved)
        .cloned()
        .collect();
    chain.sort_by(|a, b| newest_first(b, a));

    chain
        .iter()
        .enumerate()
        .map(|(i, reading)| BackfillEntry {
            reading_id: reading.id,
            recorded: reading.previous_reading,
            resolved: resolve_previous_reading(&chain[..i], None, initial_reading),
        })
        .collect()
}
