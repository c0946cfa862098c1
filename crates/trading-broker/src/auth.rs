//! Access token issuance and refresh.

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use trading_core::error::AuthError;
use trading_core::traits::AccessTokenProvider;

use crate::server::Server;

/// A token is refreshed once it is this close to expiring.
pub const REFRESH_MARGIN_SECS: i64 = 60;
/// Delay before the background refresher retries a failed refresh.
pub const REFRESH_RETRY_SECS: u64 = 10;
/// Upper bound of a single refresher sleep.
const MAX_REFRESH_SLEEP_SECS: i64 = 3600;
/// Expiry timestamps without an offset are exchange local time.
const EXCHANGE_UTC_OFFSET_SECS: i32 = 9 * 3600;

/// API key pair of the brokerage account.
#[derive(Clone)]
pub struct Credentials {
    pub app_key: String,
    pub secret_key: String,
}

impl Credentials {
    pub fn new(app_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Read the key pair from the named environment variables.
    pub fn from_env(app_key_var: &str, secret_key_var: &str) -> Result<Self, AuthError> {
        let app_key = std::env::var(app_key_var)
            .map_err(|_| AuthError::MissingCredentials(format!("{} not set", app_key_var)))?;
        let secret_key = std::env::var(secret_key_var)
            .map_err(|_| AuthError::MissingCredentials(format!("{} not set", secret_key_var)))?;
        Ok(Self::new(app_key, secret_key))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("app_key", &self.app_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    grant_type: &'a str,
    appkey: &'a str,
    secretkey: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    expires_dt: Option<String>,
    return_msg: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now > Duration::seconds(REFRESH_MARGIN_SECS)
    }
}

/// Issues the bearer token and keeps it fresh.
///
/// The token is cached and shared by every gateway and feed. Callers get a
/// refreshed token transparently once the cached one is within
/// [`REFRESH_MARGIN_SECS`] of expiring; concurrent callers share one refresh.
pub struct TokenManager {
    client: Client,
    token_url: String,
    credentials: Credentials,
    cached: RwLock<Option<CachedToken>>,
    refresh_lock: Mutex<()>,
}

impl TokenManager {
    pub fn new(server: Server, credentials: Credentials, client: Client) -> Self {
        Self::with_token_url(server.token_url(), credentials, client)
    }

    pub fn with_token_url(token_url: impl Into<String>, credentials: Credentials, client: Client) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            credentials,
            cached: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Expiry of the cached token, if any.
    pub async fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.cached.read().await.as_ref().map(|t| t.expires_at)
    }

    /// Request a new token and replace the cached one.
    #[instrument(skip(self), fields(url = %self.token_url))]
    pub async fn refresh(&self) -> Result<String, AuthError> {
        let body = TokenRequest {
            grant_type: "client_credentials",
            appkey: &self.credentials.app_key,
            secretkey: &self.credentials.secret_key,
        };

        let resp = self
            .client
            .post(&self.token_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json;charset=UTF-8")
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::TokenRequest(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            let text = resp.text().await.unwrap_or_default();
            return Err(AuthError::Unauthorized(format!("{}: {}", status, text)));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AuthError::TokenRequest(format!("{}: {}", status, text)));
        }

        let data: TokenResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        let cached = parse_token_response(data)?;

        info!("Access token issued, expires at {}", cached.expires_at);
        let token = cached.token.clone();
        *self.cached.write().await = Some(cached);
        Ok(token)
    }

    /// Keep the token fresh in the background.
    ///
    /// Sleeps until the token enters the refresh margin, refreshes it and
    /// retries every [`REFRESH_RETRY_SECS`] while refreshing fails.
    pub fn spawn_refresher(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let wait = match self.expires_at().await {
                    Some(expires_at) => {
                        let until_refresh =
                            expires_at - Utc::now() - Duration::seconds(REFRESH_MARGIN_SECS);
                        until_refresh.num_seconds().clamp(0, MAX_REFRESH_SLEEP_SECS)
                    }
                    None => 0,
                };
                if wait > 0 {
                    debug!("Next token refresh in {}s", wait);
                    tokio::time::sleep(std::time::Duration::from_secs(wait as u64)).await;
                    continue;
                }

                if let Err(e) = self.refresh().await {
                    warn!("Token refresh failed: {}, retrying in {}s", e, REFRESH_RETRY_SECS);
                    tokio::time::sleep(std::time::Duration::from_secs(REFRESH_RETRY_SECS)).await;
                }
            }
        })
    }
}

#[async_trait]
impl AccessTokenProvider for TokenManager {
    async fn bearer_token(&self) -> Result<String, AuthError> {
        if let Some(cached) = self.cached.read().await.as_ref() {
            if cached.is_fresh(Utc::now()) {
                return Ok(cached.token.clone());
            }
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited
        if let Some(cached) = self.cached.read().await.as_ref() {
            if cached.is_fresh(Utc::now()) {
                return Ok(cached.token.clone());
            }
        }
        self.refresh().await
    }

    async fn invalidate(&self) {
        warn!("Access token rejected, dropping cached token");
        *self.cached.write().await = None;
    }
}

fn parse_token_response(data: TokenResponse) -> Result<CachedToken, AuthError> {
    let token = data.token.filter(|t| !t.is_empty()).ok_or_else(|| {
        AuthError::InvalidResponse(
            data.return_msg
                .clone()
                .unwrap_or_else(|| "missing token".to_string()),
        )
    })?;
    let expires_dt = data
        .expires_dt
        .ok_or_else(|| AuthError::InvalidResponse("missing expires_dt".to_string()))?;

    Ok(CachedToken {
        token,
        expires_at: parse_expiry(&expires_dt)?,
    })
}

/// Parse an expiry as RFC 3339, or as exchange local time in
/// `YYYY-MM-DDTHH:MM:SS` or `YYYYMMDDHHMMSS` form.
pub fn parse_expiry(value: &str) -> Result<DateTime<Utc>, AuthError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y%m%d%H%M%S"))
        .map_err(|_| AuthError::InvalidResponse(format!("bad expires_dt: {}", value)))?;
    let offset = FixedOffset::east_opt(EXCHANGE_UTC_OFFSET_SECS)
        .ok_or_else(|| AuthError::InvalidResponse("bad exchange offset".to_string()))?;

    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| AuthError::InvalidResponse(format!("ambiguous expires_dt: {}", value)))
}

/// Fixed token, for tests and pre-issued tokens.
pub struct StaticToken(pub String);

#[async_trait]
impl AccessTokenProvider for StaticToken {
    async fn bearer_token(&self) -> Result<String, AuthError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_expiry_formats() {
        let expected = Utc.with_ymd_and_hms(2025, 6, 10, 3, 34, 56).unwrap();
        assert_eq!(parse_expiry("2025-06-10T12:34:56").unwrap(), expected);
        assert_eq!(parse_expiry("20250610123456").unwrap(), expected);
        assert_eq!(parse_expiry("2025-06-10T12:34:56+09:00").unwrap(), expected);
        assert!(parse_expiry("tomorrow").is_err());
    }

    #[test]
    fn test_token_response() {
        let data: TokenResponse = serde_json::from_str(
            r#"{"token_type":"Bearer","token":"abc","expires_dt":"20250610123456"}"#,
        )
        .unwrap();
        let cached = parse_token_response(data).unwrap();
        assert_eq!(cached.token, "abc");

        let data: TokenResponse =
            serde_json::from_str(r#"{"return_code":3,"return_msg":"invalid appkey"}"#).unwrap();
        match parse_token_response(data) {
            Err(AuthError::InvalidResponse(msg)) => assert_eq!(msg, "invalid appkey"),
            other => panic!("unexpected {:?}", other.map(|t| t.token)),
        }
    }

    #[test]
    fn test_refresh_margin() {
        let now = Utc::now();
        let token = CachedToken {
            token: "t".into(),
            expires_at: now + Duration::seconds(61),
        };
        assert!(token.is_fresh(now));
        assert!(!token.is_fresh(now + Duration::seconds(1)));
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let creds = Credentials::new("key", "hunter2");
        let printed = format!("{:?}", creds);
        assert!(printed.contains("key"));
        assert!(!printed.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_static_token() {
        let provider = StaticToken("fixed".into());
        assert_eq!(provider.bearer_token().await.unwrap(), "fixed");
        provider.invalidate().await;
        assert_eq!(provider.bearer_token().await.unwrap(), "fixed");
    }
}
