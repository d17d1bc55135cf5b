//! Row payload encoding. A row is a JSON array: `[seq, ts, ...columns]`, columns per
//! [`Channel::columns`]. The optional inlet mode is written as `""` when absent.

use crate::channel::Channel;
use crate::sample::{FlowReading, Reading, Sample, StatusReading, StoredRow, TankReading};
use chrono::DateTime;
use serde_json::{json, Value};

pub(crate) fn encode_record(row: &StoredRow) -> Result<Vec<u8>, serde_json::Error> {
    let mut values = vec![
        json!(row.seq),
        json!(row.sample.timestamp.to_rfc3339()),
    ];
    match &row.sample.reading {
        Reading::Tank(tank) => {
            values.push(json!(tank.motor_status));
            values.push(json!(tank.percentage));
            values.push(json!(tank.liters));
            values.push(json!(tank.mode));
        }
        Reading::Flow(flow) => {
            values.push(json!(flow.actual_flow));
            values.push(json!(flow.total_flow));
        }
        Reading::Status(status) => {
            values.push(json!(status.status));
            if row.sample.channel == Channel::RainwaterInlet {
                values.push(json!(status.mode.as_deref().unwrap_or("")));
            }
        }
    }
    serde_json::to_vec(&Value::Array(values))
}

pub(crate) fn decode_record(channel: Channel, payload: &[u8]) -> Option<StoredRow> {
    let values: Vec<Value> = serde_json::from_slice(payload).ok()?;
    if values.len() != 2 + channel.columns().len() {
        return None;
    }
    let seq = values[0].as_u64()?;
    let timestamp = DateTime::parse_from_rfc3339(values[1].as_str()?).ok()?;
    let cols = &values[2..];

    let reading = match channel {
        Channel::TankA | Channel::TankB => Reading::Tank(TankReading {
            motor_status: cols[0].as_str()?.to_string(),
            percentage: u8::try_from(cols[1].as_u64()?).ok()?,
            liters: cols[2].as_u64()?,
            mode: cols[3].as_str()?.to_string(),
        }),
        Channel::Flow => Reading::Flow(FlowReading {
            actual_flow: cols[0].as_f64()?,
            total_flow: cols[1].as_f64()?,
        }),
        Channel::RainwaterInlet => Reading::Status(StatusReading {
            status: cols[0].as_str()?.to_string(),
            mode: Some(cols[1].as_str()?)
                .filter(|mode| !mode.is_empty())
                .map(str::to_string),
        }),
        Channel::Borewell | Channel::RainwaterDrain => Reading::Status(StatusReading {
            status: cols[0].as_str()?.to_string(),
            mode: None,
        }),
    };

    Some(StoredRow {
        seq,
        sample: Sample {
            channel,
            timestamp,
            reading,
        },
    })
}
