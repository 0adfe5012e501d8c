use crate::coordinator::DEFAULT_SCAN_INTERVAL;
use crate::costs::TariffConfig;
use crate::glowmarkt::{DEFAULT_TIMEZONE, GLOWMARKT_API_BASE, GLOWMARKT_APP_ID};
use anyhow::{bail, Context};
use chrono_tz::Tz;
use std::env;
use std::time::Duration;

/// Settings for one metering account, read from `GLOW_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct GlowConfig {
    pub username: String,
    pub password: String,
    pub api_base: String,
    pub app_id: String,
    pub virtual_entity_id: Option<String>,
    pub timezone: Tz,
    pub scan_interval: Duration,
    pub tariff: TariffConfig,
}

impl GlowConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key/value source; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let username = get("GLOW_USERNAME").context("GLOW_USERNAME must be set")?;
        let password = get("GLOW_PASSWORD").context("GLOW_PASSWORD must be set")?;

        let timezone = match get("GLOW_TIMEZONE") {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|e| anyhow::anyhow!("Invalid GLOW_TIMEZONE `{name}`: {e}"))?,
            None => DEFAULT_TIMEZONE,
        };

        let scan_interval = match get("GLOW_SCAN_INTERVAL_SECS") {
            Some(raw) => {
                let secs: u64 = raw
                    .parse()
                    .with_context(|| format!("Invalid GLOW_SCAN_INTERVAL_SECS `{raw}`"))?;
                if secs == 0 {
                    bail!("GLOW_SCAN_INTERVAL_SECS must be greater than zero");
                }
                Duration::from_secs(secs)
            }
            None => DEFAULT_SCAN_INTERVAL,
        };

        let defaults = TariffConfig::default();
        let tariff = TariffConfig {
            electricity_rate: parse_rate(
                get("GLOW_ELECTRICITY_RATE"),
                "GLOW_ELECTRICITY_RATE",
                defaults.electricity_rate,
            )?,
            electricity_standing_charge: parse_rate(
                get("GLOW_ELECTRICITY_STANDING_CHARGE"),
                "GLOW_ELECTRICITY_STANDING_CHARGE",
                defaults.electricity_standing_charge,
            )?,
            gas_rate: parse_rate(get("GLOW_GAS_RATE"), "GLOW_GAS_RATE", defaults.gas_rate)?,
            gas_standing_charge: parse_rate(
                get("GLOW_GAS_STANDING_CHARGE"),
                "GLOW_GAS_STANDING_CHARGE",
                defaults.gas_standing_charge,
            )?,
        };

        Ok(Self {
            username,
            password,
            api_base: get("GLOW_API_BASE").unwrap_or_else(|| GLOWMARKT_API_BASE.to_string()),
            app_id: get("GLOW_APP_ID").unwrap_or_else(|| GLOWMARKT_APP_ID.to_string()),
            virtual_entity_id: get("GLOW_VIRTUAL_ENTITY"),
            timezone,
            scan_interval,
            tariff,
        })
    }
}

fn parse_rate(raw: Option<String>, key: &str, default: f64) -> anyhow::Result<f64> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    let rate: f64 = raw
        .parse()
        .with_context(|| format!("Invalid {key} `{raw}`"))?;
    if !rate.is_finite() || rate < 0.0 {
        bail!("{key} must be a non-negative number, got {rate}");
    }
    Ok(rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<GlowConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GlowConfig::from_lookup(|key| vars.get(key).cloned())
    }

    const CREDENTIALS: [(&str, &str); 2] = [
        ("GLOW_USERNAME", "user@example.com"),
        ("GLOW_PASSWORD", "hunter2"),
    ];

    #[test]
    fn test_defaults() {
        let config = config_from(&CREDENTIALS).unwrap();

        assert_eq!(config.username, "user@example.com");
        assert_eq!(config.api_base, GLOWMARKT_API_BASE);
        assert_eq!(config.app_id, GLOWMARKT_APP_ID);
        assert_eq!(config.virtual_entity_id, None);
        assert_eq!(config.timezone, chrono_tz::Europe::London);
        assert_eq!(config.scan_interval, Duration::from_secs(300));
        assert_eq!(config.tariff, TariffConfig::default());
    }

    #[test]
    fn test_overrides() {
        let mut pairs = CREDENTIALS.to_vec();
        pairs.extend([
            ("GLOW_API_BASE", "http://localhost:8080"),
            ("GLOW_VIRTUAL_ENTITY", "ve-home"),
            ("GLOW_TIMEZONE", "Europe/Dublin"),
            ("GLOW_SCAN_INTERVAL_SECS", "60"),
            ("GLOW_ELECTRICITY_RATE", "0.2861"),
            ("GLOW_GAS_STANDING_CHARGE", " 0.2948 "),
        ]);
        let config = config_from(&pairs).unwrap();

        assert_eq!(config.api_base, "http://localhost:8080");
        assert_eq!(config.virtual_entity_id.as_deref(), Some("ve-home"));
        assert_eq!(config.timezone, chrono_tz::Europe::Dublin);
        assert_eq!(config.scan_interval, Duration::from_secs(60));
        assert_eq!(config.tariff.electricity_rate, 0.2861);
        assert_eq!(config.tariff.gas_standing_charge, 0.2948);
        assert_eq!(config.tariff.gas_rate, 0.065);
    }

    #[test]
    fn test_empty_values_fall_back() {
        let mut pairs = CREDENTIALS.to_vec();
        pairs.extend([("GLOW_VIRTUAL_ENTITY", ""), ("GLOW_GAS_RATE", "  ")]);
        let config = config_from(&pairs).unwrap();

        assert_eq!(config.virtual_entity_id, None);
        assert_eq!(config.tariff.gas_rate, 0.065);
    }

    #[test]
    fn test_missing_credentials() {
        let err = config_from(&[("GLOW_USERNAME", "user@example.com")]).unwrap_err();
        assert_eq!(err.to_string(), "GLOW_PASSWORD must be set");
        assert!(config_from(&[]).is_err());
    }

    #[test]
    fn test_invalid_values() {
        for bad in [
            ("GLOW_ELECTRICITY_RATE", "cheap"),
            ("GLOW_GAS_RATE", "-0.1"),
            ("GLOW_GAS_RATE", "NaN"),
            ("GLOW_TIMEZONE", "Mars/Olympus"),
            ("GLOW_SCAN_INTERVAL_SECS", "0"),
            ("GLOW_SCAN_INTERVAL_SECS", "soon"),
        ] {
            let mut pairs = CREDENTIALS.to_vec();
            pairs.push(bad);
            assert!(config_from(&pairs).is_err(), "{bad:?} should be rejected");
        }
    }
}
