//! Market data sources.
//!
//! - [`WsFeed`]: live ticks and order book over the broker's WebSocket
//! - [`BarAggregator`]: tick to bar bucketing
//! - [`RestHistory`]: candle history used to seed indicators
//! - [`load_replay`]: CSV bars merged for offline replay

mod aggregator;
mod csv_source;
mod history;
mod stream;

pub use aggregator::BarAggregator;
pub use csv_source::{load_replay, CsvBarSource};
pub use history::{parse_kst, RestHistory};
pub use stream::{FeedSettings, WsFeed};
