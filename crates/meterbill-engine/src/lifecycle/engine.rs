//! Reading lifecycle engine
//!
//! Owns the pending/approved/rejected state machine and every write to the
//! computed billing fields. Each transition is one read-modify-write:
//! - per-flat async mutex around resolve + compute + write
//! - the reading is re-read inside the lock
//! - the store rejects the write if the version moved underneath us
//! - every store call is bounded by `store_timeout`

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use dashmap::DashMap;
use meterbill_common::{
    ApprovalRecord, DependencyError, MeterBillError, NotFoundError, OcrCandidate, PricingSnapshot,
    Reading, ReadingStatus, Result, Transition,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::resolution::{resolve_previous_reading, ResolvedPrevious};
use crate::events::{EventPublisher, ReadingEvent, ReadingEventKind};
use crate::metrics::LifecycleMetrics;
use crate::store::{FlatStore, ReadingQuery, ReadingStore, SettingsStore};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound for any single store call
    pub store_timeout: Duration,
    /// Refuse a second non-rejected reading for a flat in the same month
    pub one_reading_per_month: bool,
    /// Event channel capacity
    pub event_buffer: usize,
    /// Reference timezone for `year_month`
    pub timezone: Tz,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_millis(5000),
            one_reading_per_month: false,
            event_buffer: 256,
            timezone: chrono_tz::UTC,
        }
    }
}

pub struct ReadingEngine {
    readings: Arc<dyn ReadingStore>,
    flats: Arc<dyn FlatStore>,
    settings: Arc<dyn SettingsStore>,
    config: EngineConfig,
    /// One lock per flat; approvals of different flats never contend
    flat_locks: DashMap<String, Arc<Mutex<()>>>,
    events: EventPublisher,
    metrics: Arc<LifecycleMetrics>,
}

impl ReadingEngine {
    pub fn new(
        readings: Arc<dyn ReadingStore>,
        flats: Arc<dyn FlatStore>,
        settings: Arc<dyn SettingsStore>,
        config: EngineConfig,
    ) -> Result<Self> {
        let events = EventPublisher::new(config.event_buffer);
        Ok(Self {
            readings,
            flats,
            settings,
            config,
            flat_locks: DashMap::new(),
            events,
            metrics: Arc::new(LifecycleMetrics::new()?),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<LifecycleMetrics> {
        self.metrics.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReadingEvent> {
        self.events.subscribe()
    }

    /// Create a pending reading from a tenant submission
    #[instrument(skip(self, image_ref))]
    pub async fn submit(
        &self,
        flat_id: &str,
        image_ref: &str,
        ocr: OcrCandidate,
    ) -> Result<Reading> {
        let result = self.try_submit(flat_id, image_ref, ocr).await;
        self.observe("submit", ReadingEventKind::Submitted, result)
    }

    /// Approve a pending reading with the admin's corrected value
    #[instrument(skip(self))]
    pub async fn approve(&self, reading_id: Uuid, corrected_value: f64) -> Result<Reading> {
        let result = self.try_approve(reading_id, corrected_value).await;
        self.observe("approve", ReadingEventKind::Approved, result)
    }

    #[instrument(skip(self))]
    pub async fn reject(&self, reading_id: Uuid, reason: &str) -> Result<Reading> {
        let result = self
            .try_transition(reading_id, Transition::Reject, |reading| reading.reject(reason))
            .await;
        self.observe("reject", ReadingEventKind::Rejected, result)
    }

    /// Send an approved reading back to pending so it can be re-approved
    #[instrument(skip(self))]
    pub async fn reopen(&self, reading_id: Uuid, reason: &str) -> Result<Reading> {
        let result = self
            .try_transition(reading_id, Transition::Reopen, |reading| reading.reopen(reason))
            .await;
        self.observe("reopen", ReadingEventKind::Reopened, result)
    }

    pub async fn get(&self, reading_id: Uuid) -> Result<Reading> {
        self.load(reading_id).await
    }

    /// Readings matching the filter, newest first. Approved-only listings
    /// are ordered by approval time, everything else by submission time.
    pub async fn list(
        &self,
        flat_id: Option<&str>,
        status: Option<ReadingStatus>,
    ) -> Result<Vec<Reading>> {
        let query = ReadingQuery {
            flat_id: flat_id.map(str::to_string),
            status,
        };
        let mut readings = self
            .bounded("reading_store.query", self.readings.query(&query))
            .await?;

        if status == Some(ReadingStatus::Approved) {
            readings.sort_by(|a, b| b.approval_order_key().cmp(&a.approval_order_key()));
        } else {
            readings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        }
        Ok(readings)
    }

    /// Approved readings of one flat plus its initial reading, as used by
    /// previous-reading resolution
    pub async fn approval_chain(&self, flat_id: &str) -> Result<(Vec<Reading>, Option<Decimal>)> {
        let approved = self
            .bounded(
                "reading_store.query",
                self.readings
                    .query(&ReadingQuery::for_flat(flat_id).with_status(ReadingStatus::Approved)),
            )
            .await?;
        let initial = self.initial_reading(flat_id).await?;
        Ok((approved, initial))
    }

    async fn try_submit(&self, flat_id: &str, image_ref: &str, ocr: OcrCandidate) -> Result<Reading> {
        let flat_id = flat_id.trim();
        if flat_id.is_empty() {
            return Err(MeterBillError::validation("flatId is required"));
        }
        if image_ref.trim().is_empty() {
            return Err(MeterBillError::validation("imageRef is required"));
        }

        let flat = self
            .bounded("flat_store.get", self.flats.get_by_flat_id(flat_id))
            .await?;
        if flat.is_none() {
            return Err(NotFoundError::Flat(flat_id.to_string()).into());
        }

        let lock = self.flat_lock(flat_id);
        let _guard = lock.lock().await;

        let reading = Reading::new_pending(flat_id, image_ref, ocr, Utc::now(), self.config.timezone);

        if self.config.one_reading_per_month {
            let existing = self
                .bounded(
                    "reading_store.query",
                    self.readings.query(&ReadingQuery::for_flat(flat_id)),
                )
                .await?;
            let taken = existing.iter().any(|r| {
                r.status != ReadingStatus::Rejected && r.year_month == reading.year_month
            });
            if taken {
                return Err(MeterBillError::validation(format!(
                    "flat {} already has a reading for {}",
                    flat_id,
                    reading
                        .year_month
                        .map(|ym| ym.to_string())
                        .unwrap_or_default()
                )));
            }
        }

        self.bounded("reading_store.insert", self.readings.insert(reading))
            .await
    }

    async fn try_approve(&self, reading_id: Uuid, corrected_value: f64) -> Result<Reading> {
        let corrected = corrected_value_from(corrected_value)?;

        // One consistent settings read per approval
        let snapshot = self
            .bounded("settings_store.current", self.settings.current())
            .await?
            .snapshot();

        let flat_id = self.load(reading_id).await?.flat_id;
        let lock = self.flat_lock(&flat_id);
        let _guard = lock.lock().await;

        let mut reading = self.load(reading_id).await?;
        reading.ensure_can(Transition::Approve)?;

        let (approved, initial) = self.approval_chain(&reading.flat_id).await?;
        let previous = resolve_previous_reading(&approved, Some(reading_id), initial);
        debug!(
            reading_id = %reading_id,
            previous = %previous.value,
            source = ?previous.source,
            "Resolved previous reading"
        );

        let record = approval_record(corrected, previous, snapshot)?;
        let expected_version = reading.version;
        reading.approve(record)?;

        self.bounded(
            "reading_store.update",
            self.readings.update(reading, expected_version),
        )
        .await
    }

    async fn try_transition<F>(&self, reading_id: Uuid, transition: Transition, apply: F) -> Result<Reading>
    where
        F: FnOnce(&mut Reading) -> Result<()>,
    {
        let flat_id = self.load(reading_id).await?.flat_id;
        let lock = self.flat_lock(&flat_id);
        let _guard = lock.lock().await;

        let mut reading = self.load(reading_id).await?;
        reading.ensure_can(transition)?;

        let expected_version = reading.version;
        apply(&mut reading)?;

        self.bounded(
            "reading_store.update",
            self.readings.update(reading, expected_version),
        )
        .await
    }

    async fn load(&self, reading_id: Uuid) -> Result<Reading> {
        self.bounded("reading_store.get", self.readings.get(&reading_id))
            .await?
            .ok_or_else(|| NotFoundError::Reading(reading_id).into())
    }

    async fn initial_reading(&self, flat_id: &str) -> Result<Option<Decimal>> {
        let flat = self
            .bounded("flat_store.get", self.flats.get_by_flat_id(flat_id))
            .await?;
        Ok(flat.and_then(|f| f.initial_reading))
    }

    fn flat_lock(&self, flat_id: &str) -> Arc<Mutex<()>> {
        self.flat_locks
            .entry(flat_id.to_string())
            .or_default()
            .clone()
    }

    /// Run a store call with the configured timeout
    pub(crate) async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.config.store_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(DependencyError::Timeout {
                operation: operation.to_string(),
                limit_ms: self.config.store_timeout.as_millis() as u64,
            }
            .into()),
        }
    }

    /// Log, count, and publish the outcome of one operation
    fn observe(
        &self,
        operation: &str,
        kind: ReadingEventKind,
        result: Result<Reading>,
    ) -> Result<Reading> {
        match &result {
            Ok(reading) => {
                info!(
                    operation,
                    reading_id = %reading.id,
                    flat_id = %reading.flat_id,
                    status = %reading.status,
                    units_used = ?reading.units_used,
                    amount = ?reading.amount,
                    "Reading transition committed"
                );
                self.metrics.record_transition(operation);
                if kind == ReadingEventKind::Approved {
                    if let Some(amount) = reading.amount.and_then(|a| a.to_f64()) {
                        self.metrics.billed_amount.inc_by(amount);
                    }
                }
                self.events.publish(kind, reading);
            }
            Err(err) => {
                warn!(operation, error = %err, retryable = err.is_retryable(), "Reading operation failed");
                self.metrics.record_failure(operation, err);
            }
        }
        result
    }
}

/// Validate the admin's corrected value
fn corrected_value_from(value: f64) -> Result<Decimal> {
    if !value.is_finite() {
        return Err(MeterBillError::validation("correctedReading must be a finite number"));
    }
    if value < 0.0 {
        return Err(MeterBillError::validation("correctedReading cannot be negative"));
    }
    Decimal::try_from(value)
        .map(|d| d.normalize())
        .map_err(|e| MeterBillError::validation(format!("correctedReading out of range: {}", e)))
}

fn approval_record(
    corrected: Decimal,
    previous: ResolvedPrevious,
    snapshot: PricingSnapshot,
) -> Result<ApprovalRecord> {
    let units_used = PricingSnapshot::units_used(previous.value, corrected);
    let charge = snapshot.charge(units_used)?;
    Ok(ApprovalRecord {
        corrected_reading: corrected,
        previous_reading: previous.value,
        units_used,
        amount: charge.amount,
        snapshot,
        approved_at: Utc::now(),
    })
}
