//! Error types for the auto-trader.

use rust_decimal::Decimal;
use thiserror::Error;

/// Top-level trading system error.
#[derive(Error, Debug)]
pub enum TradingError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Strategy error: {0}")]
    Strategy(#[from] StrategyError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Data feed error: {0}")]
    DataFeed(#[from] DataFeedError),

    #[error("Indicator error: {0}")]
    Indicator(#[from] IndicatorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Strategy parameter errors.
#[derive(Error, Debug, Clone)]
pub enum StrategyError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Access token errors.
///
/// While the token is invalid every gateway call fails with this error until
/// the token manager obtains a fresh one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Token request failed: {0}")]
    TokenRequest(String),

    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    #[error("Token rejected by server: {0}")]
    Unauthorized(String),
}

/// Order gateway errors.
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl GatewayError {
    /// Whether retrying the same call may succeed.
    ///
    /// Transport failures, timeouts, rate limits and 5xx responses are
    /// retryable. Rejections, missing funds and auth failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Network(_)
                | GatewayError::Timeout
                | GatewayError::RateLimited { .. }
                | GatewayError::Server { .. }
        )
    }

    /// Whether a failed placement may still have reached the broker.
    ///
    /// The request was sent but no definite answer came back, so the order
    /// has to be looked up before it is given up.
    pub fn outcome_unknown(&self) -> bool {
        matches!(
            self,
            GatewayError::Network(_)
                | GatewayError::Timeout
                | GatewayError::Server { .. }
                | GatewayError::InvalidResponse(_)
        )
    }

    /// Whether the error comes from an invalid or expired access token.
    pub fn is_auth(&self) -> bool {
        matches!(self, GatewayError::Auth(_))
    }
}

/// Market data feed and history errors.
#[derive(Error, Debug, Clone)]
pub enum DataFeedError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Disconnected: {0}")]
    Disconnected(String),

    #[error("Subscription failed: {0}")]
    Subscribe(String),

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("No data available for {0}")]
    NoDataAvailable(String),
}

/// Indicator calculation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndicatorError {
    /// Not enough closed bars yet. Decisions depending on the indicator are
    /// skipped, not failed.
    #[error("Insufficient history: need {required} bars, have {available}")]
    InsufficientHistory { required: usize, available: usize },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type alias for trading operations.
pub type TradingResult<T> = Result<T, TradingError>;
