//! Workflow settings, read from the environment (and an optional `.env`)
use anyhow::Context;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowConfig {
    /// Trip length assumed when neither the route legs nor the booking carry an estimate.
    pub fallback_trip_minutes: u32,
    /// VAT applied when an invoice request omits the tax amount, in basis points.
    pub tax_rate_bps: u32,
    pub payment_terms_days: u32,
    pub db_path: PathBuf,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            fallback_trip_minutes: 240,
            tax_rate_bps: 1_000,
            payment_terms_days: 30,
            db_path: PathBuf::from("fleet.db"),
        }
    }
}

impl WorkflowConfig {
    /// Defaults overridden by `FLEET_*` variables. Unset variables keep their default,
    /// malformed ones are an error.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        if let Some(minutes) = read_var("FLEET_FALLBACK_TRIP_MINUTES")? {
            config.fallback_trip_minutes = minutes;
        }
        if let Some(bps) = read_var("FLEET_TAX_RATE_BPS")? {
            config.tax_rate_bps = bps;
        }
        if let Some(days) = read_var("FLEET_PAYMENT_TERMS_DAYS")? {
            config.payment_terms_days = days;
        }
        if let Ok(path) = env::var("FLEET_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.fallback_trip_minutes == 0 {
            anyhow::bail!("FLEET_FALLBACK_TRIP_MINUTES must be greater than zero");
        }
        if self.tax_rate_bps > 10_000 {
            anyhow::bail!("FLEET_TAX_RATE_BPS must not exceed 10000 (100%)");
        }
        Ok(())
    }

    /// Tax on `subtotal` at the configured rate, rounded half up.
    pub fn tax_for(&self, subtotal: u64) -> u64 {
        let scaled = subtotal as u128 * self.tax_rate_bps as u128;
        ((scaled + 5_000) / 10_000) as u64
    }
}

fn read_var(name: &str) -> anyhow::Result<Option<u32>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{name} must be a whole number, got {raw:?}")),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tax_is_ten_percent() {
        let config = WorkflowConfig::default();
        assert_eq!(config.tax_for(1_000_000), 100_000);
        assert_eq!(config.tax_for(0), 0);
    }

    #[test]
    fn tax_rounds_half_up() {
        let config = WorkflowConfig {
            tax_rate_bps: 800,
            ..WorkflowConfig::default()
        };
        // 8% of 1_006_250 = 80_500
        assert_eq!(config.tax_for(1_006_250), 80_500);
        // 8% of 6 = 0.48
        assert_eq!(config.tax_for(6), 0);
        // 8% of 7 = 0.56
        assert_eq!(config.tax_for(7), 1);
    }

    #[test]
    fn rejects_zero_fallback() {
        let config = WorkflowConfig {
            fallback_trip_minutes: 0,
            ..WorkflowConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
