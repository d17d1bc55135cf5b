//! Historical queries over the channel store.
//!
//! Request parsing ([`RangeRequest::parse`]) is separate from execution so that malformed input is
//! rejected before any storage access.

use crate::channel::{Channel, ChannelSelector, UnknownChannel};
use crate::sample::StoredRow;
use crate::store::{ChannelStore, StoreError};
use crate::time::{parse_local_time, start_of_day};
use chrono::{DateTime, FixedOffset};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("missing required query parameter `{0}`")]
    MissingParameter(&'static str),
    #[error("invalid time `{value}` for `{param}`; use YYYY-MM-DD HH:MM")]
    InvalidTime { param: &'static str, value: String },
    #[error("`from` ({from}) is after `to` ({to})")]
    InvertedWindow { from: String, to: String },
    #[error(transparent)]
    UnknownChannel(#[from] UnknownChannel),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: DateTime<FixedOffset>,
    pub to: DateTime<FixedOffset>,
}

impl TimeWindow {
    pub fn parse(
        from: Option<&str>,
        to: Option<&str>,
        offset: &FixedOffset,
    ) -> Result<Self, QueryError> {
        let from_raw = required("from", from)?;
        let to_raw = required("to", to)?;
        let from = parse_bound("from", from_raw, offset)?;
        let to = parse_bound("to", to_raw, offset)?;
        if from > to {
            return Err(QueryError::InvertedWindow {
                from: from_raw.trim().to_string(),
                to: to_raw.trim().to_string(),
            });
        }
        Ok(Self { from, to })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRequest {
    pub selector: ChannelSelector,
    pub window: TimeWindow,
}

impl RangeRequest {
    pub fn parse(
        from: Option<&str>,
        to: Option<&str>,
        channel: Option<&str>,
        offset: &FixedOffset,
    ) -> Result<Self, QueryError> {
        let channel = required("channel", channel)?;
        let window = TimeWindow::parse(from, to, offset)?;
        let selector = channel.parse::<ChannelSelector>()?;
        Ok(Self { selector, window })
    }
}

fn required<'a>(param: &'static str, value: Option<&'a str>) -> Result<&'a str, QueryError> {
    value
        .filter(|value| !value.trim().is_empty())
        .ok_or(QueryError::MissingParameter(param))
}

fn parse_bound(
    param: &'static str,
    raw: &str,
    offset: &FixedOffset,
) -> Result<DateTime<FixedOffset>, QueryError> {
    parse_local_time(raw, offset).ok_or_else(|| QueryError::InvalidTime {
        param,
        value: raw.trim().to_string(),
    })
}

/// One point of the TankA + TankB aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TotalRow {
    pub timestamp: DateTime<FixedOffset>,
    pub percentage: f64,
    pub liters: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RangeResult {
    Rows(Vec<StoredRow>),
    Total(Vec<TotalRow>),
    NoData,
}

/// Water drawn down since local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Harvesting {
    Liters(u64),
    InsufficientData,
    NotApplicable,
}

impl Serialize for Harvesting {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Harvesting::Liters(liters) => serializer.serialize_u64(*liters),
            Harvesting::InsufficientData => serializer.serialize_str("insufficient data"),
            Harvesting::NotApplicable => serializer.serialize_str("not applicable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelSnapshot {
    pub row: Option<StoredRow>,
    #[serde(rename = "lastHarvesting")]
    pub last_harvesting: Harvesting,
}

pub type LatestData = BTreeMap<Channel, ChannelSnapshot>;

#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<ChannelStore>,
}

impl QueryEngine {
    pub fn new(store: Arc<ChannelStore>) -> Self {
        Self { store }
    }

    pub fn query(&self, request: &RangeRequest) -> Result<RangeResult, StoreError> {
        match request.selector {
            ChannelSelector::Single(channel) => self.channel_range(channel, &request.window),
            ChannelSelector::Total => self.total_range(&request.window),
        }
    }

    /// Rows in the window; when there are none, the closest row after the window so callers
    /// still get an anchor point.
    fn channel_range(
        &self,
        channel: Channel,
        window: &TimeWindow,
    ) -> Result<RangeResult, StoreError> {
        let rows = self.store.scan(channel, window.from, window.to)?;
        if !rows.is_empty() {
            return Ok(RangeResult::Rows(rows));
        }
        Ok(match self.store.first_after(channel, window.to)? {
            Some(next) => RangeResult::Rows(vec![next]),
            None => RangeResult::NoData,
        })
    }

    /// Flow rows strictly inside the window, without the future-row fallback.
    pub fn flow_range(&self, window: &TimeWindow) -> Result<RangeResult, StoreError> {
        let rows = self.store.scan(Channel::Flow, window.from, window.to)?;
        Ok(if rows.is_empty() {
            RangeResult::NoData
        } else {
            RangeResult::Rows(rows)
        })
    }

    /// Joins the two tanks on exact timestamp equality. A side with no row at a timestamp counts
    /// as zero. Tanks report on independent clocks, so near-simultaneous readings that differ by
    /// a second appear as separate points.
    fn total_range(&self, window: &TimeWindow) -> Result<RangeResult, StoreError> {
        let tank_a = self.store.scan(Channel::TankA, window.from, window.to)?;
        let tank_b = self.store.scan(Channel::TankB, window.from, window.to)?;

        let mut joined: BTreeMap<DateTime<FixedOffset>, [(u64, u64); 2]> = BTreeMap::new();
        for (side, rows) in [&tank_a, &tank_b].into_iter().enumerate() {
            for row in rows {
                if let Some(tank) = row.tank() {
                    joined.entry(row.timestamp()).or_default()[side] =
                        (u64::from(tank.percentage), tank.liters);
                }
            }
        }

        if joined.is_empty() {
            return Ok(RangeResult::NoData);
        }
        Ok(RangeResult::Total(
            joined
                .into_iter()
                .map(|(timestamp, [(pct_a, liters_a), (pct_b, liters_b)])| TotalRow {
                    timestamp,
                    percentage: (pct_a + pct_b) as f64 / 2.0,
                    liters: liters_a + liters_b,
                })
                .collect(),
        ))
    }

    pub fn last_harvesting(
        &self,
        channel: Channel,
        now: DateTime<FixedOffset>,
    ) -> Result<Harvesting, StoreError> {
        if !channel.is_tank() {
            return Ok(Harvesting::NotApplicable);
        }
        let Some(midnight) = start_of_day(now) else {
            return Ok(Harvesting::InsufficientData);
        };
        let rows = self.store.scan(channel, midnight, now)?;
        let liters: Vec<u64> = rows
            .iter()
            .filter_map(|row| row.tank().map(|tank| tank.liters))
            .collect();
        match (liters.first(), liters.last()) {
            (Some(first), Some(last)) if liters.len() >= 2 => {
                Ok(Harvesting::Liters(first.saturating_sub(*last)))
            }
            _ => Ok(Harvesting::InsufficientData),
        }
    }

    pub fn latest_data(&self, now: DateTime<FixedOffset>) -> Result<LatestData, StoreError> {
        let mut latest = LatestData::new();
        for channel in Channel::ALL {
            latest.insert(
                channel,
                ChannelSnapshot {
                    row: self.store.latest(channel)?,
                    last_harvesting: self.last_harvesting(channel, now)?,
                },
            );
        }
        Ok(latest)
    }
}
