//! MeterBill server configuration
//!
//! Layered, later sources win:
//! 1. built-in defaults
//! 2. `config/default.{toml,yaml,json}`
//! 3. `config/{METERBILL_ENV}` (defaults to `development`)
//! 4. `METERBILL__SECTION__KEY` environment variables
//! 5. `PORT`, for platforms that assign the listen port

use std::time::Duration;

use anyhow::{anyhow, Result};
use ::config::builder::DefaultState;
use ::config::{ConfigBuilder, Environment, File};
use chrono_tz::Tz;
use meterbill_common::{GlobalSettings, DEFAULT_MINIMUM_PRICE, DEFAULT_TARIFF_PER_UNIT, DEFAULT_UNIT_FACTOR};
use meterbill_engine::billing::SummaryDefaults;
use meterbill_engine::lifecycle::EngineConfig;
use meterbill_engine::MeterBillConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: HttpSettings,
    pub engine: EngineSettings,
    pub pricing: PricingSettings,
    pub billing: BillingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub host: String,
    pub port: u16,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Upper bound for a single store call
    pub store_timeout_ms: u64,
    pub one_reading_per_month: bool,
    /// Event channel capacity for SSE subscribers
    pub event_buffer: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            store_timeout_ms: 5000,
            one_reading_per_month: false,
            event_buffer: 256,
        }
    }
}

/// Settings the service starts with before any admin change
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingSettings {
    pub default_tariff_per_unit: Decimal,
    pub default_minimum_price: Decimal,
    pub default_unit_factor: Decimal,
}

impl Default for PricingSettings {
    fn default() -> Self {
        Self {
            default_tariff_per_unit: DEFAULT_TARIFF_PER_UNIT,
            default_minimum_price: DEFAULT_MINIMUM_PRICE,
            default_unit_factor: DEFAULT_UNIT_FACTOR,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingSettings {
    /// IANA zone used to derive billing months
    pub timezone: String,
    /// Unit factor for legacy readings without a frozen snapshot
    pub summary_unit_factor: Decimal,
    /// Fixed charge on every summary row
    pub summary_minimum_charge: Decimal,
    /// Report order for flats; empty keeps the built-in layout
    pub flat_order: Vec<String>,
}

impl Default for BillingSettings {
    fn default() -> Self {
        let summary = SummaryDefaults::default();
        Self {
            timezone: "UTC".to_string(),
            summary_unit_factor: summary.unit_factor,
            summary_minimum_charge: summary.minimum_charge,
            flat_order: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let env = std::env::var("METERBILL_ENV").unwrap_or_else(|_| "development".to_string());
        let builder = ::config::Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                Environment::with_prefix("METERBILL")
                    .separator("__")
                    .try_parsing(true),
            );

        let mut cfg = Self::from_builder(builder)?;

        if let Ok(port) = std::env::var("PORT") {
            if let Ok(p) = port.parse::<u16>() {
                cfg.server.port = p;
            }
        }

        Ok(cfg)
    }

    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let cfg: Self = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.timezone()?;
        self.initial_settings().validate()?;
        if self.engine.store_timeout_ms == 0 {
            return Err(anyhow!("engine.store_timeout_ms must be positive"));
        }
        if self.billing.summary_unit_factor <= Decimal::ZERO {
            return Err(anyhow!("billing.summary_unit_factor must be positive"));
        }
        if self.billing.summary_minimum_charge < Decimal::ZERO {
            return Err(anyhow!("billing.summary_minimum_charge cannot be negative"));
        }
        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.billing
            .timezone
            .parse::<Tz>()
            .map_err(|e| anyhow!("invalid billing.timezone {:?}: {}", self.billing.timezone, e))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    fn initial_settings(&self) -> GlobalSettings {
        GlobalSettings {
            tariff_per_unit: self.pricing.default_tariff_per_unit,
            minimum_price: self.pricing.default_minimum_price,
            unit_factor: self.pricing.default_unit_factor,
        }
    }

    /// Service configuration derived from these settings
    pub fn meterbill_config(&self) -> Result<MeterBillConfig> {
        Ok(MeterBillConfig {
            engine: EngineConfig {
                store_timeout: Duration::from_millis(self.engine.store_timeout_ms),
                one_reading_per_month: self.engine.one_reading_per_month,
                event_buffer: self.engine.event_buffer,
                timezone: self.timezone()?,
            },
            initial_settings: self.initial_settings(),
            summary_defaults: SummaryDefaults {
                unit_factor: self.billing.summary_unit_factor,
                minimum_charge: self.billing.summary_minimum_charge,
            },
            flat_order: (!self.billing.flat_order.is_empty()).then(|| self.billing.flat_order.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::config::FileFormat;
    use rust_decimal_macros::dec;

    fn from_toml(toml: &str) -> Result<ServerConfig> {
        ServerConfig::from_builder(
            ::config::Config::builder().add_source(File::from_str(toml, FileFormat::Toml)),
        )
    }

    #[test]
    fn test_empty_sources_use_defaults() {
        let cfg = from_toml("").unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.engine.store_timeout_ms, 5000);
        assert_eq!(cfg.pricing.default_minimum_price, dec!(250));
        assert_eq!(cfg.pricing.default_unit_factor, dec!(2.3));
        assert_eq!(cfg.billing.summary_minimum_charge, dec!(25));
        assert_eq!(cfg.timezone().unwrap(), chrono_tz::UTC);
    }

    #[test]
    fn test_file_overrides() {
        let cfg = from_toml(
            r#"
            [server]
            port = 9090

            [engine]
            one_reading_per_month = true

            [pricing]
            default_tariff_per_unit = "7.5"

            [billing]
            timezone = "Asia/Kolkata"
            flat_order = ["B-202", "A-101"]
            "#,
        )
        .unwrap();

        assert_eq!(cfg.server.port, 9090);
        assert_eq!(cfg.server.host, "0.0.0.0");

        let service = cfg.meterbill_config().unwrap();
        assert!(service.engine.one_reading_per_month);
        assert_eq!(service.engine.timezone, chrono_tz::Asia::Kolkata);
        assert_eq!(service.initial_settings.tariff_per_unit, dec!(7.5));
        assert_eq!(
            service.flat_order,
            Some(vec!["B-202".to_string(), "A-101".to_string()])
        );
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(from_toml("[billing]\ntimezone = \"Mars/Olympus\"").is_err());
        assert!(from_toml("[pricing]\ndefault_unit_factor = \"0\"").is_err());
        assert!(from_toml("[engine]\nstore_timeout_ms = 0").is_err());
    }

    #[test]
    fn test_default_flat_order_is_none() {
        let service = ServerConfig::default().meterbill_config().unwrap();
        assert!(service.flat_order.is_none());
        assert_eq!(service.engine.store_timeout, Duration::from_millis(5000));
    }
}
