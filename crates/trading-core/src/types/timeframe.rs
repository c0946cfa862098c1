//! Bar timeframes.

use serde::{Deserialize, Serialize};
use std::fmt;

const MINUTE_MS: i64 = 60_000;

/// Width of a bar. Daily bars are the trend filter, 10-minute bars the
/// entry signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    Minute1,
    #[serde(rename = "10m")]
    #[default]
    Minute10,
    #[serde(rename = "1d")]
    Daily,
}

impl Timeframe {
    /// Bar width in minutes.
    pub const fn minutes(self) -> u64 {
        match self {
            Timeframe::Minute1 => 1,
            Timeframe::Minute10 => 10,
            Timeframe::Daily => 24 * 60,
        }
    }

    pub const fn as_millis(self) -> i64 {
        self.minutes() as i64 * MINUTE_MS
    }

    pub fn is_intraday(self) -> bool {
        self != Timeframe::Daily
    }

    /// Open time of the bar containing `timestamp_ms`.
    pub fn bucket_start(self, timestamp_ms: i64) -> i64 {
        timestamp_ms - timestamp_ms.rem_euclid(self.as_millis())
    }

    /// Close time of the bar opened at `open_ms`.
    pub fn bar_end(self, open_ms: i64) -> i64 {
        open_ms + self.as_millis()
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Timeframe::Minute1 => "1m",
            Timeframe::Minute10 => "10m",
            Timeframe::Daily => "1d",
        })
    }
}
