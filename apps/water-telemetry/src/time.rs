use chrono::{DateTime, FixedOffset, NaiveDateTime, SubsecRound, TimeZone, Utc};

/// Local time formats accepted for query bounds.
const QUERY_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

/// Source of receipt timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }
}

/// Receipt stamps have whole-second resolution; the Total join matches on them exactly.
pub fn receipt_timestamp(clock: &dyn Clock) -> DateTime<FixedOffset> {
    clock.now().trunc_subsecs(0)
}

/// Parses an ISO-like local time (`YYYY-MM-DD HH:MM[:SS]`, `T` separator allowed) in `offset`.
pub fn parse_local_time(raw: &str, offset: &FixedOffset) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    let naive = QUERY_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())?;
    offset.from_local_datetime(&naive).single()
}

/// Local midnight at the start of `now`'s calendar day.
pub fn start_of_day(now: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
    let midnight = now.date_naive().and_hms_opt(0, 0, 0)?;
    now.offset().from_local_datetime(&midnight).single()
}
