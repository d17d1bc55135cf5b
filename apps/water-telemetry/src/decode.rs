//! Device line decoding.
//!
//! Records are comma-separated ASCII. The shape of a line (field count, plus a numeric check on the
//! second field) selects the channel:
//!
//! | fields | check                      | channel                          |
//! |--------|----------------------------|----------------------------------|
//! | 5      | `f[0] == "1"`              | TankA, otherwise TankB           |
//! | 3      | `f[1]` parses as a number  | Flow                             |
//! | >= 2   | `f[0]` in `4`/`5`/`6`      | RainwaterInlet/Borewell/Drain    |
//!
//! Rules are tried top to bottom, so a three-field line with a numeric second field is always Flow.
//! RainwaterInlet carries a mode only in the three-field form.

use crate::channel::Channel;
use crate::sample::{FlowReading, Reading, StatusReading, TankReading};

const DELIMITER: char = ',';

/// Longest record accepted, in bytes. The link reader keeps at most one byte more than this.
pub const MAX_LINE_LEN: usize = 1024;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("empty line")]
    Empty,
    #[error("line longer than {max} bytes")]
    TooLong { max: usize },
    #[error("unrecognised record shape ({fields} fields)")]
    UnknownShape { fields: usize },
    #[error("{channel}: field `{field}` is empty")]
    EmptyField {
        channel: Channel,
        field: &'static str,
    },
    #[error("{channel}: field `{field}` has invalid value `{value}`")]
    InvalidValue {
        channel: Channel,
        field: &'static str,
        value: String,
    },
}

/// Decodes one raw line into its channel and field values. Pure: no I/O, no clock.
pub fn decode_line(line: &str) -> Result<(Channel, Reading), DecodeError> {
    if line.len() > MAX_LINE_LEN {
        return Err(DecodeError::TooLong { max: MAX_LINE_LEN });
    }
    let line = line.trim();
    if line.is_empty() {
        return Err(DecodeError::Empty);
    }
    let fields: Vec<&str> = line.split(DELIMITER).map(str::trim).collect();

    if fields.len() == 5 {
        let channel = if fields[0] == "1" {
            Channel::TankA
        } else {
            Channel::TankB
        };
        return decode_tank(channel, &fields[1..]).map(|reading| (channel, reading));
    }

    if fields.len() == 3 && parse_number(fields[1]).is_some() {
        return decode_flow(fields[1], fields[2]).map(|reading| (Channel::Flow, reading));
    }

    if fields.len() >= 2 {
        if let Some(channel) = Channel::from_status_discriminator(fields[0]) {
            let status = token(channel, "status", fields[1])?;
            let mode = match channel {
                Channel::RainwaterInlet if fields.len() == 3 => {
                    Some(fields[2]).filter(|value| !value.is_empty()).map(str::to_string)
                }
                _ => None,
            };
            return Ok((channel, Reading::Status(StatusReading { status, mode })));
        }
    }

    Err(DecodeError::UnknownShape {
        fields: fields.len(),
    })
}

fn decode_tank(channel: Channel, fields: &[&str]) -> Result<Reading, DecodeError> {
    let motor_status = token(channel, "motorStatus", fields[0])?;
    let percentage = fields[1]
        .parse::<u8>()
        .ok()
        .filter(|value| *value <= 100)
        .ok_or_else(|| invalid(channel, "percentage", fields[1]))?;
    let liters = fields[2]
        .parse::<u64>()
        .map_err(|_| invalid(channel, "liters", fields[2]))?;
    let mode = token(channel, "mode", fields[3])?;
    Ok(Reading::Tank(TankReading {
        motor_status,
        percentage,
        liters,
        mode,
    }))
}

fn decode_flow(actual: &str, total: &str) -> Result<Reading, DecodeError> {
    let actual_flow = parse_number(actual)
        .filter(|value| *value >= 0.0)
        .ok_or_else(|| invalid(Channel::Flow, "actualFlow", actual))?;
    let total_flow =
        parse_number(total).ok_or_else(|| invalid(Channel::Flow, "totalFlow", total))?;
    Ok(Reading::Flow(FlowReading {
        actual_flow,
        total_flow,
    }))
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|value| value.is_finite())
}

fn token(channel: Channel, field: &'static str, raw: &str) -> Result<String, DecodeError> {
    if raw.is_empty() {
        return Err(DecodeError::EmptyField { channel, field });
    }
    Ok(raw.to_string())
}

fn invalid(channel: Channel, field: &'static str, raw: &str) -> DecodeError {
    DecodeError::InvalidValue {
        channel,
        field,
        value: raw.to_string(),
    }
}
