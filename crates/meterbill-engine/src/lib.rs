//! # MeterBill Engine
//!
//! Reading lifecycle, previous-reading resolution, and monthly billing.
//!
//! ## Pricing Formula
//!
//! ```text
//! units     = max(0, corrected - previous)
//! converted = units × unit_factor
//! amount    = max(converted × tariff, minimum_price)
//! ```
//!
//! Tariff, unit factor and minimum price are read once per approval and
//! frozen onto the reading, so later settings changes never touch an
//! approved amount.

pub mod billing;
pub mod events;
pub mod lifecycle;
pub mod metrics;
pub mod ocr;
pub mod store;

use std::collections::HashMap;
use std::sync::Arc;

use meterbill_common::{
    Flat, GlobalSettings, MeterBillError, NotFoundError, OcrCandidate, Reading, ReadingStatus,
    Result, YearMonth,
};
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use billing::{BillingAggregator, FlatOrdering, MonthlySummary, SummaryDefaults};
use events::ReadingEvent;
use lifecycle::{backfill_previous_readings, BackfillEntry, EngineConfig, ReadingEngine};
use ocr::{MeterValueExtractor, NoopExtractor};
use store::{
    FlatStore, FlatUpdate, InMemoryFlatStore, InMemoryReadingStore, InMemorySettingsStore,
    ReadingStore, SettingsStore, SettingsUpdate,
};

/// MeterBill configuration
#[derive(Debug, Clone, Default)]
pub struct MeterBillConfig {
    pub engine: EngineConfig,
    /// Settings used when the settings store starts empty
    pub initial_settings: GlobalSettings,
    /// Summary minimum charge and legacy unit factor
    pub summary_defaults: SummaryDefaults,
    /// Report order for flats; `None` uses the built-in building layout
    pub flat_order: Option<Vec<String>>,
}

/// MeterBill service
pub struct MeterBill {
    engine: ReadingEngine,
    flats: Arc<dyn FlatStore>,
    settings: Arc<dyn SettingsStore>,
    aggregator: BillingAggregator,
    ordering: FlatOrdering,
    extractor: Arc<dyn MeterValueExtractor>,
}

impl MeterBill {
    pub fn new(
        readings: Arc<dyn ReadingStore>,
        flats: Arc<dyn FlatStore>,
        settings: Arc<dyn SettingsStore>,
        config: MeterBillConfig,
    ) -> Result<Self> {
        let ordering = match &config.flat_order {
            Some(order) => FlatOrdering::from_list(order.iter().cloned()),
            None => FlatOrdering::default(),
        };
        let aggregator = BillingAggregator::new(
            config.summary_defaults,
            ordering.clone(),
            config.engine.timezone,
        );
        let engine = ReadingEngine::new(readings, flats.clone(), settings.clone(), config.engine)?;

        Ok(Self {
            engine,
            flats,
            settings,
            aggregator,
            ordering,
            extractor: Arc::new(NoopExtractor),
        })
    }

    /// Service backed by the in-memory stores
    pub fn in_memory(config: MeterBillConfig) -> Result<Self> {
        config.initial_settings.validate()?;
        let settings = Arc::new(InMemorySettingsStore::new(config.initial_settings.clone()));
        Self::new(
            Arc::new(InMemoryReadingStore::new()),
            Arc::new(InMemoryFlatStore::new()),
            settings,
            config,
        )
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn MeterValueExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn engine(&self) -> &ReadingEngine {
        &self.engine
    }

    // Readings

    pub async fn submit_reading(
        &self,
        flat_id: &str,
        image_ref: &str,
        ocr: OcrCandidate,
    ) -> Result<Reading> {
        self.engine.submit(flat_id, image_ref, ocr).await
    }

    /// Submit a photo, running OCR first. A failed extraction does not block
    /// the submission; the admin enters the value by hand.
    #[instrument(skip(self, image_ref, image))]
    pub async fn submit_reading_image(
        &self,
        flat_id: &str,
        image_ref: &str,
        image: &[u8],
    ) -> Result<Reading> {
        let candidate = match self.extractor.extract(image).await {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!(flat_id, error = %e, "OCR extraction failed, submitting without candidate");
                OcrCandidate::empty()
            }
        };
        self.engine.submit(flat_id, image_ref, candidate).await
    }

    pub async fn approve_reading(&self, reading_id: Uuid, corrected_value: f64) -> Result<Reading> {
        self.engine.approve(reading_id, corrected_value).await
    }

    pub async fn reject_reading(&self, reading_id: Uuid, reason: &str) -> Result<Reading> {
        self.engine.reject(reading_id, reason).await
    }

    pub async fn reopen_reading(&self, reading_id: Uuid, reason: &str) -> Result<Reading> {
        self.engine.reopen(reading_id, reason).await
    }

    pub async fn get_reading(&self, reading_id: Uuid) -> Result<Reading> {
        self.engine.get(reading_id).await
    }

    pub async fn list_readings(
        &self,
        flat_id: Option<&str>,
        status: Option<ReadingStatus>,
    ) -> Result<Vec<Reading>> {
        self.engine.list(flat_id, status).await
    }

    /// Recompute the previous-reading chain of a flat and compare it to
    /// what was frozen at each approval
    pub async fn audit_previous_readings(&self, flat_id: &str) -> Result<Vec<BackfillEntry>> {
        self.require_flat(flat_id).await?;
        let (approved, initial) = self.engine.approval_chain(flat_id).await?;
        let entries = backfill_previous_readings(&approved, initial);

        let drifted = entries.iter().filter(|e| !e.is_consistent()).count();
        if drifted > 0 {
            warn!(flat_id, drifted, "Previous readings differ from recomputed chain");
        }
        Ok(entries)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReadingEvent> {
        self.engine.subscribe()
    }

    // Billing

    #[instrument(skip(self))]
    pub async fn monthly_summary(&self, year_month: YearMonth) -> Result<MonthlySummary> {
        let approved = self.engine.list(None, Some(ReadingStatus::Approved)).await?;
        let tenants: HashMap<String, String> = self
            .list_flats()
            .await?
            .into_iter()
            .filter_map(|f| f.tenant_name.map(|name| (f.flat_id, name)))
            .collect();

        self.aggregator.summarize(&approved, year_month, &tenants)
    }

    pub async fn available_months(&self) -> Result<Vec<YearMonth>> {
        let approved = self.engine.list(None, Some(ReadingStatus::Approved)).await?;
        Ok(self.aggregator.available_months(&approved))
    }

    // Admin

    pub async fn settings(&self) -> Result<GlobalSettings> {
        self.engine
            .bounded("settings_store.current", self.settings.current())
            .await
    }

    /// Applies to future approvals only
    pub async fn update_settings(&self, update: SettingsUpdate) -> Result<GlobalSettings> {
        let settings = self
            .engine
            .bounded("settings_store.update", self.settings.update(update))
            .await?;
        info!(
            tariff_per_unit = %settings.tariff_per_unit,
            minimum_price = %settings.minimum_price,
            unit_factor = %settings.unit_factor,
            "Settings updated"
        );
        Ok(settings)
    }

    pub async fn register_flat(&self, flat: Flat) -> Result<Flat> {
        flat.validate()?;
        let flat = self
            .engine
            .bounded("flat_store.upsert", self.flats.upsert(flat))
            .await?;
        info!(flat_id = %flat.flat_id, "Flat registered");
        Ok(flat)
    }

    pub async fn update_flat(&self, flat_id: &str, update: FlatUpdate) -> Result<Flat> {
        let mut flat = self.require_flat(flat_id).await?;

        if let Some(name) = update.tenant_name {
            let name = name.trim();
            let name = (!name.is_empty()).then(|| name.to_string());
            flat = self
                .engine
                .bounded(
                    "flat_store.update_tenant_name",
                    self.flats.update_tenant_name(flat_id, name),
                )
                .await?;
        }
        if let Some(initial) = update.initial_reading {
            flat = self
                .engine
                .bounded(
                    "flat_store.set_initial_reading",
                    self.flats.set_initial_reading(flat_id, Some(initial)),
                )
                .await?;
        }
        Ok(flat)
    }

    /// Flats in report order
    pub async fn list_flats(&self) -> Result<Vec<Flat>> {
        let mut flats = self
            .engine
            .bounded("flat_store.list", self.flats.list())
            .await?;
        flats.sort_by(|a, b| self.ordering.compare(&a.flat_id, &b.flat_id));
        Ok(flats)
    }

    /// Prometheus text exposition of the lifecycle counters
    pub fn metrics_text(&self) -> Result<String> {
        self.engine.metrics().encode()
    }

    async fn require_flat(&self, flat_id: &str) -> Result<Flat> {
        self.engine
            .bounded("flat_store.get", self.flats.get_by_flat_id(flat_id))
            .await?
            .ok_or_else(|| MeterBillError::from(NotFoundError::Flat(flat_id.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use meterbill_common::DependencyError;
    use rust_decimal_macros::dec;

    struct FailingExtractor;

    #[async_trait]
    impl MeterValueExtractor for FailingExtractor {
        async fn extract(&self, _image: &[u8]) -> Result<OcrCandidate> {
            Err(DependencyError::Unavailable("recognizer down".into()).into())
        }
    }

    struct FixedExtractor;

    #[async_trait]
    impl MeterValueExtractor for FixedExtractor {
        async fn extract(&self, _image: &[u8]) -> Result<OcrCandidate> {
            Ok(OcrCandidate::new(Some(dec!(190.981)), Some(91.0)))
        }
    }

    async fn service() -> MeterBill {
        let service = MeterBill::in_memory(MeterBillConfig::default()).unwrap();
        service
            .register_flat(Flat::new("A1", "user-1").with_tenant("R. Sharma"))
            .await
            .unwrap();
        service
    }

    #[tokio::test]
    async fn test_image_submission_uses_extractor() {
        let service = service().await.with_extractor(Arc::new(FixedExtractor));
        let reading = service
            .submit_reading_image("A1", "img://1", b"jpeg")
            .await
            .unwrap();
        assert_eq!(reading.ocr_reading, Some(dec!(190.981)));
        assert_eq!(reading.ocr_confidence, Some(91.0));
    }

    #[tokio::test]
    async fn test_ocr_failure_does_not_block_submission() {
        let service = service().await.with_extractor(Arc::new(FailingExtractor));
        let reading = service
            .submit_reading_image("A1", "img://1", b"jpeg")
            .await
            .unwrap();
        assert_eq!(reading.status, ReadingStatus::Pending);
        assert!(reading.ocr_reading.is_none());
        assert!(reading.ocr_confidence.is_none());
    }

    #[tokio::test]
    async fn test_default_settings() {
        let service = service().await;
        let settings = service.settings().await.unwrap();
        assert_eq!(settings.tariff_per_unit, dec!(0));
        assert_eq!(settings.minimum_price, dec!(250));
        assert_eq!(settings.unit_factor, dec!(2.3));
    }

    #[tokio::test]
    async fn test_update_flat() {
        let service = service().await;
        let flat = service
            .update_flat(
                "A1",
                FlatUpdate {
                    tenant_name: Some("  ".into()),
                    initial_reading: Some(dec!(1000)),
                },
            )
            .await
            .unwrap();
        assert!(flat.tenant_name.is_none());
        assert_eq!(flat.initial_reading, Some(dec!(1000)));

        assert!(matches!(
            service.update_flat("Z9", FlatUpdate::default()).await,
            Err(MeterBillError::NotFound(NotFoundError::Flat(_)))
        ));
    }

    #[tokio::test]
    async fn test_list_flats_in_report_order() {
        let service = service().await;
        for flat_id in ["A-101", "S1", "H1"] {
            service
                .register_flat(Flat::new(flat_id, "user"))
                .await
                .unwrap();
        }
        let order: Vec<String> = service
            .list_flats()
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.flat_id)
            .collect();
        assert_eq!(order, vec!["S1", "A1", "H1", "A-101"]);
    }

    #[tokio::test]
    async fn test_metrics_text_counts_transitions() {
        let service = service().await;
        service
            .submit_reading("A1", "img://1", OcrCandidate::empty())
            .await
            .unwrap();
        let text = service.metrics_text().unwrap();
        assert!(text.contains("meterbill_transitions_total{transition=\"submit\"} 1"));
    }
}
