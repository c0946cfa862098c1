//! Historical candles over the broker's REST API.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument};
use trading_core::error::DataFeedError;
use trading_core::traits::{AccessTokenProvider, HistorySource};
use trading_core::types::{Bar, Timeframe};

/// Offset of the exchange's wall clock (KST).
const KST_OFFSET_SECS: i32 = 9 * 3600;

#[derive(Debug, Deserialize)]
struct CandleResponse {
    #[serde(default)]
    data: Vec<Candle>,
}

#[derive(Debug, Deserialize)]
struct Candle {
    candle_date_time_kst: String,
    opening_price: f64,
    high_price: f64,
    low_price: f64,
    trade_price: f64,
    #[serde(default)]
    candle_acc_trade_volume: f64,
}

/// Parse an exchange-local candle time.
///
/// Date-only values (daily candles) map to local midnight.
pub fn parse_kst(raw: &str) -> Result<DateTime<Utc>, DataFeedError> {
    let kst = FixedOffset::east_opt(KST_OFFSET_SECS)
        .ok_or_else(|| DataFeedError::ParseError("invalid offset".to_string()))?;
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .or_else(|_| {
            chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .or_else(|_| chrono::NaiveDate::parse_from_str(raw, "%Y%m%d"))
                .map(|d| d.and_time(chrono::NaiveTime::MIN))
        })
        .map_err(|_| DataFeedError::ParseError(format!("bad candle time: {}", raw)))?;
    kst.from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| DataFeedError::ParseError(format!("ambiguous candle time: {}", raw)))
}

/// Convert candles to closed bars, oldest first.
///
/// The newest candle of an intraday request is still forming when its
/// bucket has not ended by `now`, and is dropped.
fn into_bars(candles: Vec<Candle>, timeframe: Timeframe, now: DateTime<Utc>) -> Result<Vec<Bar>, DataFeedError> {
    let mut bars = candles
        .into_iter()
        .map(|c| {
            let start = parse_kst(&c.candle_date_time_kst)?;
            Ok(Bar::new(
                start.timestamp_millis(),
                c.opening_price,
                c.high_price,
                c.low_price,
                c.trade_price,
                c.candle_acc_trade_volume,
            ))
        })
        .collect::<Result<Vec<_>, DataFeedError>>()?;

    bars.sort_by_key(|b| b.timestamp);
    bars.dedup_by_key(|b| b.timestamp);

    if timeframe.is_intraday() {
        let now_ms = now.timestamp_millis();
        bars.retain(|b| timeframe.bar_end(b.timestamp) <= now_ms);
    }
    Ok(bars)
}

/// Candle history from the broker.
pub struct RestHistory {
    client: Client,
    base_url: String,
    tokens: Arc<dyn AccessTokenProvider>,
}

impl RestHistory {
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn AccessTokenProvider>, client: Client) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            tokens,
        }
    }

    fn path(timeframe: Timeframe) -> String {
        match timeframe {
            Timeframe::Daily => "/v1/market/candles/days".to_string(),
            tf => format!("/v1/market/candles/minutes/{}", tf.minutes()),
        }
    }
}

#[async_trait]
impl HistorySource for RestHistory {
    #[instrument(skip(self), fields(source = "rest"))]
    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Bar>, DataFeedError> {
        let token = self.tokens.bearer_token().await?;
        let url = format!("{}{}", self.base_url, Self::path(timeframe));
        // One extra candle covers the in-progress bar that gets dropped
        let count = count + usize::from(timeframe.is_intraday());

        let resp = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(&[("symbol", symbol.to_string()), ("count", count.to_string())])
            .send()
            .await
            .map_err(|e| DataFeedError::Connection(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DataFeedError::Connection(format!("HTTP {}: {}", status, body)));
        }

        let body: CandleResponse = resp
            .json()
            .await
            .map_err(|e| DataFeedError::ParseError(e.to_string()))?;
        if body.data.is_empty() {
            return Err(DataFeedError::NoDataAvailable(format!("{} {}", symbol, timeframe)));
        }

        let bars = into_bars(body.data, timeframe, Utc::now())?;
        debug!("Fetched {} {} bars for {}", bars.len(), timeframe, symbol);
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candles(json: &str) -> Vec<Candle> {
        serde_json::from_str::<CandleResponse>(json).unwrap().data
    }

    #[test]
    fn test_parse_kst() {
        let dt = parse_kst("2024-03-04T09:10:00").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 3, 4, 0, 10, 0).unwrap());

        let day = parse_kst("2024-03-04").unwrap();
        assert_eq!(day, Utc.with_ymd_and_hms(2024, 3, 3, 15, 0, 0).unwrap());

        assert!(parse_kst("yesterday").is_err());
    }

    #[test]
    fn test_bars_sorted_and_forming_bar_dropped() {
        // Newest first, as the broker returns them
        let data = candles(
            r#"{"data":[
                {"candle_date_time_kst":"2024-03-04T09:20:00","opening_price":102,"high_price":103,"low_price":101,"trade_price":102,"candle_acc_trade_volume":10},
                {"candle_date_time_kst":"2024-03-04T09:10:00","opening_price":101,"high_price":102,"low_price":100,"trade_price":102,"candle_acc_trade_volume":20},
                {"candle_date_time_kst":"2024-03-04T09:00:00","opening_price":100,"high_price":101,"low_price":99,"trade_price":101,"candle_acc_trade_volume":30}
            ]}"#,
        );
        // 09:25 KST: the 09:20 bar is still forming
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 0, 25, 0).unwrap();
        let bars = into_bars(data, Timeframe::Minute10, now).unwrap();

        assert_eq!(bars.len(), 2);
        assert!(bars[0].timestamp < bars[1].timestamp);
        assert_eq!(bars[0].close, 101.0);
        assert_eq!(bars[1].volume, 20.0);
    }

    #[test]
    fn test_daily_bars_kept() {
        let data = candles(
            r#"{"data":[
                {"candle_date_time_kst":"2024-03-04","opening_price":1,"high_price":1,"low_price":1,"trade_price":1},
                {"candle_date_time_kst":"2024-03-01","opening_price":2,"high_price":2,"low_price":2,"trade_price":2}
            ]}"#,
        );
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 1, 0, 0).unwrap();
        let bars = into_bars(data, Timeframe::Daily, now).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 2.0);
    }

    #[test]
    fn test_endpoint_paths() {
        assert_eq!(RestHistory::path(Timeframe::Daily), "/v1/market/candles/days");
        assert_eq!(RestHistory::path(Timeframe::Minute10), "/v1/market/candles/minutes/10");
    }
}
