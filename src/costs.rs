use crate::glowmarkt::{CLASSIFIER_ELECTRICITY_CONSUMPTION, CLASSIFIER_GAS_CONSUMPTION};
use serde_derive::Serialize;
use std::collections::BTreeMap;

pub const DEFAULT_ELECTRICITY_RATE: f64 = 0.245;
pub const DEFAULT_ELECTRICITY_STANDING_CHARGE: f64 = 0.45;
pub const DEFAULT_GAS_RATE: f64 = 0.065;
pub const DEFAULT_GAS_STANDING_CHARGE: f64 = 0.30;

/// Unit rates are per kWh, standing charges per day, all in GBP.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TariffConfig {
    pub electricity_rate: f64,
    pub electricity_standing_charge: f64,
    pub gas_rate: f64,
    pub gas_standing_charge: f64,
}

impl Default for TariffConfig {
    fn default() -> Self {
        Self {
            electricity_rate: DEFAULT_ELECTRICITY_RATE,
            electricity_standing_charge: DEFAULT_ELECTRICITY_STANDING_CHARGE,
            gas_rate: DEFAULT_GAS_RATE,
            gas_standing_charge: DEFAULT_GAS_STANDING_CHARGE,
        }
    }
}

/// Selects one field of [`Costs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostKind {
    Electricity,
    Gas,
    Total,
    StandingCharges,
}

/// Today's costs derived from consumption readings and the tariff.
#[derive(Default, Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Costs {
    pub electricity: Option<f64>,
    pub gas: Option<f64>,
    pub total: f64,
    pub standing_charges_total: f64,
}

impl Costs {
    pub fn compute(readings: &BTreeMap<String, Option<f64>>, tariff: &TariffConfig) -> Self {
        let consumption = |classifier: &str| readings.get(classifier).copied().flatten();

        let electricity = consumption(CLASSIFIER_ELECTRICITY_CONSUMPTION).map(|kwh| {
            round_to(
                kwh * tariff.electricity_rate + tariff.electricity_standing_charge,
                2,
            )
        });
        let gas = consumption(CLASSIFIER_GAS_CONSUMPTION)
            .map(|kwh| round_to(kwh * tariff.gas_rate + tariff.gas_standing_charge, 2));

        Self {
            electricity,
            gas,
            total: round_to(electricity.unwrap_or(0.0) + gas.unwrap_or(0.0), 2),
            standing_charges_total: round_to(
                tariff.electricity_standing_charge + tariff.gas_standing_charge,
                2,
            ),
        }
    }

    pub fn get(&self, kind: CostKind) -> Option<f64> {
        match kind {
            CostKind::Electricity => self.electricity,
            CostKind::Gas => self.gas,
            CostKind::Total => Some(self.total),
            CostKind::StandingCharges => Some(self.standing_charges_total),
        }
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn readings(pairs: &[(&str, Option<f64>)]) -> BTreeMap<String, Option<f64>> {
        pairs
            .iter()
            .map(|(classifier, value)| (classifier.to_string(), *value))
            .collect()
    }

    #[test]
    fn test_electricity_only() {
        let costs = Costs::compute(
            &readings(&[(CLASSIFIER_ELECTRICITY_CONSUMPTION, Some(10.0))]),
            &TariffConfig::default(),
        );

        assert_eq!(costs.electricity, Some(2.9));
        assert_eq!(costs.gas, None);
        assert_eq!(costs.total, 2.9);
        assert_eq!(costs.standing_charges_total, 0.75);
    }

    #[test]
    fn test_both_fuels() {
        let costs = Costs::compute(
            &readings(&[
                (CLASSIFIER_ELECTRICITY_CONSUMPTION, Some(10.0)),
                (CLASSIFIER_GAS_CONSUMPTION, Some(30.0)),
            ]),
            &TariffConfig::default(),
        );

        // 30 * 0.065 + 0.30 = 2.25
        assert_eq!(costs.gas, Some(2.25));
        assert_eq!(costs.total, 5.15);
    }

    #[test]
    fn test_unknown_readings_still_report_standing_charges() {
        let tariff = TariffConfig {
            electricity_rate: 0.3,
            electricity_standing_charge: 0.6123,
            gas_rate: 0.07,
            gas_standing_charge: 0.3111,
        };
        let costs = Costs::compute(
            &readings(&[
                (CLASSIFIER_ELECTRICITY_CONSUMPTION, None),
                (CLASSIFIER_GAS_CONSUMPTION, None),
            ]),
            &tariff,
        );

        assert_eq!(costs.electricity, None);
        assert_eq!(costs.gas, None);
        assert_eq!(costs.total, 0.0);
        assert_eq!(costs.standing_charges_total, 0.92);
    }

    #[test]
    fn test_zero_consumption_charges_standing_only() {
        let costs = Costs::compute(
            &readings(&[(CLASSIFIER_GAS_CONSUMPTION, Some(0.0))]),
            &TariffConfig::default(),
        );
        assert_eq!(costs.gas, Some(0.3));
        assert_eq!(costs.total, 0.3);
    }

    #[test]
    fn test_cost_classifiers_are_not_consumption() {
        let costs = Costs::compute(
            &readings(&[("electricity.consumption.cost", Some(412.0))]),
            &TariffConfig::default(),
        );
        assert_eq!(costs.electricity, None);
    }

    #[test]
    fn test_get_by_kind() {
        let costs = Costs {
            electricity: Some(1.5),
            gas: None,
            total: 1.5,
            standing_charges_total: 0.75,
        };
        assert_eq!(costs.get(CostKind::Electricity), Some(1.5));
        assert_eq!(costs.get(CostKind::Gas), None);
        assert_eq!(costs.get(CostKind::Total), Some(1.5));
        assert_eq!(costs.get(CostKind::StandingCharges), Some(0.75));
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(10.0 * 0.245 + 0.45, 2), 2.9);
        assert_eq!(round_to(1.23456, 3), 1.235);
        assert_eq!(round_to(0.0, 2), 0.0);
    }
}
