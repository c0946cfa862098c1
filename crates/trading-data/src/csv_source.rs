//! CSV bar files and replay loading.

use chrono::{FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;
use trading_core::error::DataFeedError;
use trading_core::types::{Bar, BarEvent, Timeframe};

/// CSV record format.
#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(alias = "Date", alias = "date", alias = "timestamp", alias = "Timestamp")]
    date: String,
    #[serde(alias = "Open", alias = "open")]
    open: f64,
    #[serde(alias = "High", alias = "high")]
    high: f64,
    #[serde(alias = "Low", alias = "low")]
    low: f64,
    #[serde(alias = "Close", alias = "close", alias = "Adj Close")]
    close: f64,
    #[serde(alias = "Volume", alias = "volume", default)]
    volume: f64,
}

/// Bars stored in one CSV file.
///
/// Timestamps without a zone are read in `offset`, the exchange's wall
/// clock. Each row's timestamp is the start of its bar.
pub struct CsvBarSource {
    path: PathBuf,
    offset: FixedOffset,
}

impl CsvBarSource {
    pub fn new(path: impl Into<PathBuf>, offset: FixedOffset) -> Self {
        Self {
            path: path.into(),
            offset,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all bars, oldest first.
    pub fn load(&self) -> Result<Vec<Bar>, DataFeedError> {
        if !self.path.exists() {
            return Err(DataFeedError::NoDataAvailable(self.path.display().to_string()));
        }
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .map_err(|e| DataFeedError::ParseError(e.to_string()))?;

        let mut bars = Vec::new();
        for (row, result) in reader.deserialize().enumerate() {
            let record: CsvRecord = result
                .map_err(|e| DataFeedError::ParseError(format!("{} row {}: {}", self.path.display(), row + 1, e)))?;
            let timestamp = self.parse_timestamp(&record.date)?;
            bars.push(Bar::new(
                timestamp,
                record.open,
                record.high,
                record.low,
                record.close,
                record.volume,
            ));
        }

        bars.sort_by_key(|b| b.timestamp);
        Ok(bars)
    }

    /// Parse various timestamp formats into Unix milliseconds.
    fn parse_timestamp(&self, date_str: &str) -> Result<i64, DataFeedError> {
        let datetime_formats = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];
        let date_formats = ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"];

        let naive = datetime_formats
            .iter()
            .find_map(|f| NaiveDateTime::parse_from_str(date_str, f).ok())
            .or_else(|| {
                date_formats
                    .iter()
                    .find_map(|f| NaiveDate::parse_from_str(date_str, f).ok())
                    .map(|d| d.and_time(chrono::NaiveTime::MIN))
            });

        if let Some(naive) = naive {
            return self
                .offset
                .from_local_datetime(&naive)
                .single()
                .map(|dt| dt.timestamp_millis())
                .ok_or_else(|| DataFeedError::ParseError(format!("Invalid local time: {}", date_str)));
        }

        // Unix timestamp, milliseconds past 10 digits
        if let Ok(ts) = date_str.parse::<i64>() {
            return Ok(if ts > 10_000_000_000 { ts } else { ts * 1000 });
        }

        Err(DataFeedError::ParseError(format!(
            "Could not parse date: {}",
            date_str
        )))
    }
}

/// Closed bars of every symbol in `dir`, ordered by bar end.
///
/// Reads `{symbol}_daily.csv` and `{symbol}_10m.csv` for each symbol. A
/// daily bar ends at the next local midnight, so it is delivered after the
/// intraday bars of its own day. Ties keep daily before intraday and then
/// symbol order.
pub fn load_replay(dir: &Path, symbols: &[String], offset: FixedOffset) -> Result<Vec<BarEvent>, DataFeedError> {
    let mut events = Vec::new();
    for symbol in symbols {
        for (suffix, timeframe) in [("daily", Timeframe::Daily), ("10m", Timeframe::Minute10)] {
            let source = CsvBarSource::new(dir.join(format!("{}_{}.csv", symbol, suffix)), offset);
            let bars = source.load()?;
            info!("Loaded {} {} bars for {} from {}", bars.len(), timeframe, symbol, source.path().display());
            events.extend(bars.into_iter().map(|bar| BarEvent::closed(symbol.as_str(), timeframe, bar)));
        }
    }

    events.sort_by(|a, b| {
        let end_a = a.timeframe.bar_end(a.bar.timestamp);
        let end_b = b.timeframe.bar_end(b.bar.timestamp);
        end_a
            .cmp(&end_b)
            .then_with(|| (a.timeframe != Timeframe::Daily).cmp(&(b.timeframe != Timeframe::Daily)))
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    Ok(events)
}
