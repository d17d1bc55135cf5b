use crate::channel::Channel;
use chrono::{DateTime, FixedOffset};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TankReading {
    pub motor_status: String,
    pub percentage: u8,
    pub liters: u64,
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowReading {
    pub actual_flow: f64,
    pub total_flow: f64,
}

/// Valve/pump status. Only the rainwater inlet reports a mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReading {
    pub status: String,
    pub mode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reading {
    Tank(TankReading),
    Flow(FlowReading),
    Status(StatusReading),
}

impl Reading {
    pub fn as_tank(&self) -> Option<&TankReading> {
        match self {
            Reading::Tank(tank) => Some(tank),
            _ => None,
        }
    }
}

/// One decoded record, stamped at receipt. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub channel: Channel,
    pub timestamp: DateTime<FixedOffset>,
    #[serde(flatten)]
    pub reading: Reading,
}

/// A sample as persisted in its channel log. `seq` is the row identity and grows with append order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRow {
    pub seq: u64,
    #[serde(flatten)]
    pub sample: Sample,
}

impl StoredRow {
    pub fn timestamp(&self) -> DateTime<FixedOffset> {
        self.sample.timestamp
    }

    pub fn tank(&self) -> Option<&TankReading> {
        self.sample.reading.as_tank()
    }
}
