use async_trait::async_trait;
use dashmap::DashMap;

use crate::engine::EngineError;
use crate::limits::{MAX_CURRENCY_LEN, MAX_PRICE_PER_NIGHT};
use crate::model::{PropertyBookingConfig, PropertyId, TIER_THRESHOLDS};

/// Read-only source of per-property booking terms.
#[async_trait]
pub trait PropertyCatalog: Send + Sync {
    async fn booking_config(&self, property_id: PropertyId) -> Result<Option<PropertyBookingConfig>, EngineError>;
}

pub fn validate_config(config: &PropertyBookingConfig) -> Result<(), EngineError> {
    if config.price_per_night <= 0 {
        return Err(EngineError::InvalidConfig("price per night must be positive"));
    }
    if config.price_per_night > MAX_PRICE_PER_NIGHT {
        return Err(EngineError::InvalidConfig("price per night too large"));
    }
    if config.minimum_stay_nights < 1 {
        return Err(EngineError::InvalidConfig("minimum stay must be at least one night"));
    }
    if config.currency.is_empty() || config.currency.len() > MAX_CURRENCY_LEN {
        return Err(EngineError::InvalidConfig("currency code missing or too long"));
    }
    for (threshold, percent) in config.discount_tiers.iter() {
        if !TIER_THRESHOLDS.contains(&threshold) {
            return Err(EngineError::InvalidConfig("unknown discount tier threshold"));
        }
        if percent > 100 {
            return Err(EngineError::InvalidConfig("discount percent above 100"));
        }
    }
    Ok(())
}

/// Catalog kept in memory, for embedding and tests.
#[derive(Default)]
pub struct InMemoryCatalog {
    configs: DashMap<PropertyId, PropertyBookingConfig>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON array of configs.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let configs: Vec<PropertyBookingConfig> =
            serde_json::from_str(json).map_err(|e| EngineError::Catalog(e.to_string()))?;
        let catalog = Self::new();
        for config in configs {
            catalog.upsert(config)?;
        }
        Ok(catalog)
    }

    pub fn upsert(&self, config: PropertyBookingConfig) -> Result<(), EngineError> {
        validate_config(&config)?;
        self.configs.insert(config.property_id, config);
        Ok(())
    }

    pub fn remove(&self, property_id: &PropertyId) -> Option<PropertyBookingConfig> {
        self.configs.remove(property_id).map(|(_, c)| c)
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

#[async_trait]
impl PropertyCatalog for InMemoryCatalog {
    async fn booking_config(&self, property_id: PropertyId) -> Result<Option<PropertyBookingConfig>, EngineError> {
        Ok(self.configs.get(&property_id).map(|e| e.value().clone()))
    }
}
