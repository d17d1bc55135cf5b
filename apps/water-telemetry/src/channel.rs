use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One fixed sensor/actuator stream reported by the field device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    TankA,
    TankB,
    Flow,
    RainwaterInlet,
    Borewell,
    RainwaterDrain,
}

const TANK_COLUMNS: &[&str] = &["motorStatus", "percentage", "liters", "mode"];
const FLOW_COLUMNS: &[&str] = &["actualFlow", "totalFlow"];
const INLET_COLUMNS: &[&str] = &["status", "mode"];
const VALVE_COLUMNS: &[&str] = &["status"];

impl Channel {
    pub const ALL: [Channel; 6] = [
        Channel::TankA,
        Channel::TankB,
        Channel::Flow,
        Channel::RainwaterInlet,
        Channel::Borewell,
        Channel::RainwaterDrain,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::TankA => "TankA",
            Channel::TankB => "TankB",
            Channel::Flow => "Flow",
            Channel::RainwaterInlet => "RainwaterInlet",
            Channel::Borewell => "Borewell",
            Channel::RainwaterDrain => "RainwaterDrain",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Tag written into the log file header.
    pub fn tag(self) -> u32 {
        self.index() as u32 + 1
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|channel| channel.tag() == tag)
    }

    /// Column set persisted after `seq` and `ts`, in order.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Channel::TankA | Channel::TankB => TANK_COLUMNS,
            Channel::Flow => FLOW_COLUMNS,
            Channel::RainwaterInlet => INLET_COLUMNS,
            Channel::Borewell | Channel::RainwaterDrain => VALVE_COLUMNS,
        }
    }

    pub fn is_tank(self) -> bool {
        matches!(self, Channel::TankA | Channel::TankB)
    }

    /// Case-insensitive lookup. `Tank1`/`Tank2` are the names older dashboards use.
    pub fn from_name(raw: &str) -> Option<Self> {
        let name = raw.trim().to_ascii_lowercase();
        let channel = match name.as_str() {
            "tanka" | "tank1" => Channel::TankA,
            "tankb" | "tank2" => Channel::TankB,
            "flow" => Channel::Flow,
            "rainwaterinlet" => Channel::RainwaterInlet,
            "borewell" => Channel::Borewell,
            "rainwaterdrain" => Channel::RainwaterDrain,
            _ => return None,
        };
        Some(channel)
    }

    /// Leading field of a status record on the wire.
    pub fn from_status_discriminator(field: &str) -> Option<Self> {
        match field {
            "4" => Some(Channel::RainwaterInlet),
            "5" => Some(Channel::Borewell),
            "6" => Some(Channel::RainwaterDrain),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown channel `{0}`")]
pub struct UnknownChannel(pub String);

/// Target of a range query: a stored channel or the synthetic TankA + TankB aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSelector {
    Single(Channel),
    Total,
}

impl FromStr for ChannelSelector {
    type Err = UnknownChannel;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.trim().eq_ignore_ascii_case("total") {
            return Ok(ChannelSelector::Total);
        }
        Channel::from_name(raw)
            .map(ChannelSelector::Single)
            .ok_or_else(|| UnknownChannel(raw.trim().to_string()))
    }
}
