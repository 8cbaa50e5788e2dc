//! In-memory store implementations
//!
//! DashMap-backed stores for tests and single-node deployments.

use async_trait::async_trait;
use dashmap::DashMap;
use meterbill_common::{
    DependencyError, Flat, GlobalSettings, MeterBillError, NotFoundError, Reading, Result,
};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{FlatStore, ReadingQuery, ReadingStore, SettingsStore, SettingsUpdate};

/// In-memory reading storage
///
/// Updates are compare-and-swap on `version` under the entry lock, so two
/// writers holding the same stale copy cannot both commit.
#[derive(Default)]
pub struct InMemoryReadingStore {
    /// All readings by ID
    readings: DashMap<Uuid, Reading>,

    /// Index of reading IDs by flat
    by_flat: DashMap<String, Vec<Uuid>>,
}

impl InMemoryReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

#[async_trait]
impl ReadingStore for InMemoryReadingStore {
    async fn insert(&self, reading: Reading) -> Result<Reading> {
        if self.readings.contains_key(&reading.id) {
            return Err(MeterBillError::Internal(format!(
                "reading {} already exists",
                reading.id
            )));
        }

        self.by_flat
            .entry(reading.flat_id.clone())
            .or_default()
            .push(reading.id);
        self.readings.insert(reading.id, reading.clone());

        Ok(reading)
    }

    async fn get(&self, id: &Uuid) -> Result<Option<Reading>> {
        Ok(self.readings.get(id).map(|r| r.clone()))
    }

    async fn update(&self, mut reading: Reading, expected_version: u64) -> Result<Reading> {
        let mut stored = self
            .readings
            .get_mut(&reading.id)
            .ok_or(NotFoundError::Reading(reading.id))?;

        if stored.version != expected_version {
            return Err(DependencyError::Conflict {
                reading_id: reading.id,
                expected: expected_version,
                actual: stored.version,
            }
            .into());
        }

        reading.version = expected_version + 1;
        *stored = reading.clone();
        Ok(reading)
    }

    async fn query(&self, query: &ReadingQuery) -> Result<Vec<Reading>> {
        let readings: Vec<Reading> = match &query.flat_id {
            Some(flat_id) => self
                .by_flat
                .get(flat_id)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| self.readings.get(id).map(|r| r.clone()))
                        .filter(|r| query.matches(r))
                        .collect()
                })
                .unwrap_or_default(),
            None => self
                .readings
                .iter()
                .filter(|r| query.matches(r.value()))
                .map(|r| r.value().clone())
                .collect(),
        };
        Ok(readings)
    }
}

/// In-memory flat registry keyed by display code
#[derive(Default)]
pub struct InMemoryFlatStore {
    flats: DashMap<String, Flat>,
}

impl InMemoryFlatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flats(flats: impl IntoIterator<Item = Flat>) -> Self {
        let store = Self::new();
        for flat in flats {
            store.flats.insert(flat.flat_id.clone(), flat);
        }
        store
    }

    fn modify(&self, flat_id: &str, apply: impl FnOnce(&mut Flat)) -> Result<Flat> {
        let mut flat = self
            .flats
            .get_mut(flat_id)
            .ok_or_else(|| NotFoundError::Flat(flat_id.to_string()))?;
        apply(flat.value_mut());
        Ok(flat.clone())
    }
}

#[async_trait]
impl FlatStore for InMemoryFlatStore {
    async fn get_by_flat_id(&self, flat_id: &str) -> Result<Option<Flat>> {
        Ok(self.flats.get(flat_id).map(|f| f.clone()))
    }

    async fn list(&self) -> Result<Vec<Flat>> {
        Ok(self.flats.iter().map(|f| f.value().clone()).collect())
    }

    async fn upsert(&self, flat: Flat) -> Result<Flat> {
        flat.validate()?;
        self.flats.insert(flat.flat_id.clone(), flat.clone());
        Ok(flat)
    }

    async fn update_tenant_name(&self, flat_id: &str, tenant_name: Option<String>) -> Result<Flat> {
        self.modify(flat_id, |flat| flat.tenant_name = tenant_name)
    }

    async fn set_initial_reading(
        &self,
        flat_id: &str,
        initial_reading: Option<Decimal>,
    ) -> Result<Flat> {
        if matches!(initial_reading, Some(v) if v < Decimal::ZERO) {
            return Err(MeterBillError::validation("initialReading cannot be negative"));
        }
        self.modify(flat_id, |flat| flat.initial_reading = initial_reading)
    }
}

/// In-memory settings record
pub struct InMemorySettingsStore {
    settings: RwLock<GlobalSettings>,
}

impl InMemorySettingsStore {
    pub fn new(initial: GlobalSettings) -> Self {
        Self {
            settings: RwLock::new(initial),
        }
    }
}

impl Default for InMemorySettingsStore {
    fn default() -> Self {
        Self::new(GlobalSettings::default())
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn current(&self) -> Result<GlobalSettings> {
        Ok(self.settings.read().clone())
    }

    async fn update(&self, update: SettingsUpdate) -> Result<GlobalSettings> {
        let mut settings = self.settings.write();
        let merged = update.apply_to(&settings);
        merged.validate()?;
        *settings = merged.clone();
        Ok(merged)
    }
}
