//! Brokerage integrations.
//!
//! - [`RestGateway`]: order gateway over the broker's REST API
//! - [`TokenManager`]: bearer token issuance and background refresh
//! - [`RetryingGateway`]: bounded exponential backoff for retryable errors
//! - [`PaperGateway`]: in-process simulated broker

mod auth;
mod paper;
mod rest;
mod retry;
mod server;

pub use auth::{parse_expiry, Credentials, StaticToken, TokenManager, REFRESH_MARGIN_SECS};
pub use paper::PaperGateway;
pub use rest::RestGateway;
pub use retry::{BackoffPolicy, RetryingGateway};
pub use server::Server;
