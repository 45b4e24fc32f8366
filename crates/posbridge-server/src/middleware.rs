use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    extract::{Request, State},
    http::{
        header::{AUTHORIZATION, RETRY_AFTER},
        HeaderValue, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use posbridge_cache::token_fingerprint;
use posbridge_core::AppConfig;
use serde::Serialize;
use subtle::ConstantTimeEq;
use tokio::{sync::Mutex, time::Instant};
use uuid::Uuid;

pub const API_KEYS_VAR: &str = "POSBRIDGE_API_KEYS";

/// Newtype wrapping a request ID string, stored as a request extension.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// API key auth settings used by middleware.
#[derive(Clone)]
pub struct AuthState {
    api_keys: Arc<Vec<String>>,
    pub enabled: bool,
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("api_keys", &format_args!("[{} redacted]", self.api_keys.len()))
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl AuthState {
    /// Builds auth config from `POSBRIDGE_API_KEYS` (comma-separated bearer tokens).
    ///
    /// # Errors
    ///
    /// Fails outside development when no keys are configured.
    pub fn from_env(is_development: bool) -> anyhow::Result<Self> {
        let raw = std::env::var(API_KEYS_VAR).unwrap_or_default();
        Self::from_keys(&raw, is_development)
    }

    /// In development, empty keys disable auth for local iteration.
    /// Anywhere else they fail startup.
    ///
    /// # Errors
    ///
    /// Fails outside development when `raw` holds no keys.
    pub fn from_keys(raw: &str, is_development: bool) -> anyhow::Result<Self> {
        let mut keys: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned)
            .collect();
        keys.sort();
        keys.dedup();

        if keys.is_empty() {
            if is_development {
                tracing::warn!(
                    "{API_KEYS_VAR} not set; bearer auth disabled in development environment"
                );
                return Ok(Self {
                    api_keys: Arc::new(Vec::new()),
                    enabled: false,
                });
            }

            anyhow::bail!(
                "{API_KEYS_VAR} is required outside development; provide comma-separated bearer tokens"
            );
        }

        Ok(Self {
            api_keys: Arc::new(keys),
            enabled: true,
        })
    }

    fn allows(&self, token: &str) -> bool {
        self.api_keys
            .iter()
            .fold(false, |found, key| {
                found | bool::from(key.as_bytes().ct_eq(token.as_bytes()))
            })
    }
}

/// Requests each API client may make per fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitSettings {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_requests: config.rate_limit_max_requests,
            window: config.rate_limit_window(),
        }
    }
}

#[derive(Debug)]
struct ClientWindow {
    started_at: Instant,
    count: u32,
}

/// Fixed-window limiter with one window per API client.
///
/// Clients are keyed by a fingerprint of their bearer token, so raw keys are
/// never held here. Requests without a token share the `anonymous` window.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    settings: RateLimitSettings,
    windows: Arc<Mutex<HashMap<String, ClientWindow>>>,
}

impl RateLimitState {
    #[must_use]
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            settings,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Count one request for `client`. `Err` carries the time until its
    /// window resets.
    async fn check(&self, client: &str) -> Result<(), Duration> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let window = windows
            .entry(client.to_owned())
            .or_insert(ClientWindow {
                started_at: now,
                count: 0,
            });

        if now.duration_since(window.started_at) >= self.settings.window {
            window.started_at = now;
            window.count = 0;
        }

        if window.count >= self.settings.max_requests {
            let elapsed = now.duration_since(window.started_at);
            return Err(self.settings.window.saturating_sub(elapsed));
        }

        window.count += 1;
        Ok(())
    }
}

fn client_key(authorization: Option<&HeaderValue>) -> String {
    extract_bearer_token(authorization)
        .map_or_else(|| "anonymous".to_string(), token_fingerprint)
}

/// Whole seconds, rounded up, never zero.
fn retry_after_secs(wait: Duration) -> u64 {
    (wait.as_secs() + u64::from(wait.subsec_nanos() > 0)).max(1)
}

#[derive(Debug, Serialize)]
struct MiddlewareErrorBody {
    error: MiddlewareError,
}

#[derive(Debug, Serialize)]
struct MiddlewareError {
    code: &'static str,
    message: &'static str,
}

/// Axum middleware that extracts or generates a request ID.
///
/// If the incoming request has an `x-request-id` header, that value is used.
/// Otherwise a new `UUIDv4` is generated. The ID is inserted into request
/// extensions as [`RequestId`] and echoed on the response.
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| Uuid::new_v4().to_string(), String::from);

    req.extensions_mut().insert(RequestId(id.clone()));

    let mut res = next.run(req).await;

    if let Ok(val) = HeaderValue::from_str(&id) {
        res.headers_mut().insert("x-request-id", val);
    }

    res
}

/// Middleware enforcing Bearer token auth when enabled.
pub async fn require_bearer_auth(
    State(auth): State<AuthState>,
    req: Request,
    next: Next,
) -> Response {
    if !auth.enabled {
        return next.run(req).await;
    }

    let token = extract_bearer_token(req.headers().get(AUTHORIZATION));

    match token {
        Some(token) if auth.allows(token) => next.run(req).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(MiddlewareErrorBody {
                error: MiddlewareError {
                    code: "unauthorized",
                    message: "missing or invalid bearer token",
                },
            }),
        )
            .into_response(),
    }
}

/// Middleware enforcing the per-client request window. Runs behind bearer
/// auth, so only accepted keys get a window of their own.
pub async fn enforce_rate_limit(
    State(rate_limit): State<RateLimitState>,
    req: Request,
    next: Next,
) -> Response {
    let client = client_key(req.headers().get(AUTHORIZATION));

    if let Err(wait) = rate_limit.check(&client).await {
        let retry_after = retry_after_secs(wait);
        tracing::warn!(
            client = %client,
            max_requests = rate_limit.settings.max_requests,
            retry_after,
            "rate limit exceeded"
        );
        let mut res = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(MiddlewareErrorBody {
                error: MiddlewareError {
                    code: "rate_limited",
                    message: "rate limit exceeded",
                },
            }),
        )
            .into_response();
        res.headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(retry_after));
        return res;
    }

    next.run(req).await
}

fn extract_bearer_token(value: Option<&HeaderValue>) -> Option<&str> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_bearer_token_accepts_valid_header() {
        let header = HeaderValue::from_static("Bearer test-token");
        assert_eq!(extract_bearer_token(Some(&header)), Some("test-token"));
    }

    #[test]
    fn extract_bearer_token_rejects_non_bearer_header() {
        let header = HeaderValue::from_static("Basic abc123");
        assert_eq!(extract_bearer_token(Some(&header)), None);
        assert_eq!(extract_bearer_token(None), None);
    }

    fn limiter(max_requests: u32) -> RateLimitState {
        RateLimitState::new(RateLimitSettings {
            max_requests,
            window: Duration::from_secs(60),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn each_client_gets_its_own_window() {
        let limiter = limiter(2);
        assert!(limiter.check("a").await.is_ok());
        assert!(limiter.check("a").await.is_ok());
        assert!(limiter.check("a").await.is_err());
        assert!(limiter.check("b").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_window_reports_wait_and_then_resets() {
        let limiter = limiter(1);
        assert!(limiter.check("a").await.is_ok());

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(limiter.check("a").await, Err(Duration::from_secs(40)));

        tokio::time::advance(Duration::from_secs(40)).await;
        assert!(limiter.check("a").await.is_ok());
    }

    #[test]
    fn client_key_fingerprints_the_token() {
        let header = HeaderValue::from_static("Bearer secret-key");
        let key = client_key(Some(&header));
        assert_eq!(key, token_fingerprint("secret-key"));
        assert!(!key.contains("secret"));
        assert_eq!(client_key(None), "anonymous");
    }

    #[test]
    fn retry_after_rounds_up_to_whole_seconds() {
        assert_eq!(retry_after_secs(Duration::from_millis(1_500)), 2);
        assert_eq!(retry_after_secs(Duration::from_secs(40)), 40);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
    }

    #[test]
    fn empty_keys_disable_auth_only_in_development() {
        let state = AuthState::from_keys(" , ", true).expect("dev allows missing keys");
        assert!(!state.enabled);
        assert!(AuthState::from_keys("", false).is_err());
    }

    #[test]
    fn configured_keys_match_exactly() {
        let state = AuthState::from_keys("alpha, beta ,alpha", false).expect("keys");
        assert!(state.enabled);
        assert!(state.allows("alpha"));
        assert!(state.allows("beta"));
        assert!(!state.allows("alph"));
        assert!(!state.allows("ALPHA"));
        assert!(!state.allows(""));
    }

    #[test]
    fn debug_output_hides_keys() {
        let state = AuthState::from_keys("super-secret", false).unwrap();
        let debug = format!("{state:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("1 redacted"));
    }
}
