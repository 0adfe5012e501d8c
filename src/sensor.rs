use crate::coordinator::Snapshot;
use crate::costs::{round_to, CostKind};
use crate::glowmarkt::{
    CLASSIFIER_ELECTRICITY_CONSUMPTION, CLASSIFIER_ELECTRICITY_COST, CLASSIFIER_GAS_CONSUMPTION,
    CLASSIFIER_GAS_COST,
};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    KilowattHours,
    Gbp,
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KilowattHours => write!(f, "kWh"),
            Self::Gbp => write!(f, "GBP"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Keyed by classifier in `Snapshot::readings`.
    Reading(&'static str),
    Cost(CostKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorDescription {
    pub key: &'static str,
    pub name: &'static str,
    pub unit: Unit,
    pub source: Source,
    /// The API reports cost classifiers in pence.
    pub convert_pence: bool,
}

pub const SENSORS: [SensorDescription; 8] = [
    SensorDescription {
        key: CLASSIFIER_ELECTRICITY_CONSUMPTION,
        name: "Electricity Consumption",
        unit: Unit::KilowattHours,
        source: Source::Reading(CLASSIFIER_ELECTRICITY_CONSUMPTION),
        convert_pence: false,
    },
    SensorDescription {
        key: CLASSIFIER_GAS_CONSUMPTION,
        name: "Gas Consumption",
        unit: Unit::KilowattHours,
        source: Source::Reading(CLASSIFIER_GAS_CONSUMPTION),
        convert_pence: false,
    },
    SensorDescription {
        key: "electricity.consumption.cost_api",
        name: "Electricity Cost (API)",
        unit: Unit::Gbp,
        source: Source::Reading(CLASSIFIER_ELECTRICITY_COST),
        convert_pence: true,
    },
    SensorDescription {
        key: "gas.consumption.cost_api",
        name: "Gas Cost (API)",
        unit: Unit::Gbp,
        source: Source::Reading(CLASSIFIER_GAS_COST),
        convert_pence: true,
    },
    SensorDescription {
        key: "electricity_daily_cost",
        name: "Electricity Daily Cost",
        unit: Unit::Gbp,
        source: Source::Cost(CostKind::Electricity),
        convert_pence: false,
    },
    SensorDescription {
        key: "gas_daily_cost",
        name: "Gas Daily Cost",
        unit: Unit::Gbp,
        source: Source::Cost(CostKind::Gas),
        convert_pence: false,
    },
    SensorDescription {
        key: "total_daily_cost",
        name: "Total Daily Energy Cost",
        unit: Unit::Gbp,
        source: Source::Cost(CostKind::Total),
        convert_pence: false,
    },
    SensorDescription {
        key: "daily_standing_charges",
        name: "Daily Standing Charges",
        unit: Unit::Gbp,
        source: Source::Cost(CostKind::StandingCharges),
        convert_pence: false,
    },
];

#[derive(Debug, Clone, PartialEq)]
pub struct SensorValue {
    pub key: &'static str,
    pub name: &'static str,
    pub unit: Unit,
    pub value: Option<f64>,
}

impl SensorDescription {
    pub fn value(&self, snapshot: &Snapshot) -> Option<f64> {
        let raw = match self.source {
            Source::Reading(classifier) => snapshot.readings.get(classifier).copied().flatten(),
            Source::Cost(kind) => snapshot.costs.get(kind),
        }?;
        let value = if self.convert_pence { raw / 100.0 } else { raw };
        Some(match self.unit {
            Unit::Gbp => round_to(value, 2),
            Unit::KilowattHours => round_to(value, 3),
        })
    }
}

pub fn sensor_values(snapshot: &Snapshot) -> Vec<SensorValue> {
    SENSORS
        .iter()
        .map(|sensor| SensorValue {
            key: sensor.key,
            name: sensor.name,
            unit: sensor.unit,
            value: sensor.value(snapshot),
        })
        .collect()
}
