//! Fixed-window rate limiting.
//!
//! Two kinds of buckets share one map:
//! - `client:{ip}`: every request from one client (default 1000 per window)
//! - `login:{email}|{ip}`: login attempts for one account from one client
//!   (default 5 per window), checked by the login handlers
//!
//! ## Configuration
//!
//! - `STOREFRONT_RATE_LIMIT_LOGIN`: login attempts per window (default: 5)
//! - `STOREFRONT_RATE_LIMIT_GLOBAL`: requests per window per client (default: 1000)
//! - `STOREFRONT_RATE_LIMIT_WINDOW_SECS`: window length in seconds (default: 60)
//! - `STOREFRONT_TRUSTED_PROXIES`: comma-separated proxy IPs whose
//!   `X-Forwarded-For` / `X-Real-IP` headers are honoured
//! - `STOREFRONT_RATE_LIMIT_MAX_BUCKETS`: bucket count that triggers cleanup (default: 10000)
//! - `STOREFRONT_RATE_LIMIT_BUCKET_TTL_SECS`: idle bucket TTL (default: 600)

use crate::error::ApiError;
use crate::routes::{AppState, ClientIp};
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use storefront_tenancy_core::TenancyError;
use tracing::{debug, warn};

const DEFAULT_LOGIN_LIMIT: u32 = 5;
const DEFAULT_GLOBAL_LIMIT: u32 = 1000;
const DEFAULT_WINDOW_SECS: u64 = 60;
const DEFAULT_MAX_BUCKETS: usize = 10_000;
const DEFAULT_BUCKET_TTL_SECS: u64 = 600;

const UNKNOWN_CLIENT: &str = "unknown";

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Configuration for rate limiting
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub login_limit: u32,
    pub global_limit: u32,
    pub window_secs: u64,
    pub trusted_proxies: Option<Vec<String>>,
    pub max_buckets: usize,
    pub bucket_ttl_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login_limit: DEFAULT_LOGIN_LIMIT,
            global_limit: DEFAULT_GLOBAL_LIMIT,
            window_secs: DEFAULT_WINDOW_SECS,
            trusted_proxies: None,
            max_buckets: DEFAULT_MAX_BUCKETS,
            bucket_ttl_secs: DEFAULT_BUCKET_TTL_SECS,
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        Self {
            login_limit: env_or("STOREFRONT_RATE_LIMIT_LOGIN", DEFAULT_LOGIN_LIMIT),
            global_limit: env_or("STOREFRONT_RATE_LIMIT_GLOBAL", DEFAULT_GLOBAL_LIMIT),
            window_secs: env_or("STOREFRONT_RATE_LIMIT_WINDOW_SECS", DEFAULT_WINDOW_SECS),
            trusted_proxies: std::env::var("STOREFRONT_TRUSTED_PROXIES")
                .ok()
                .map(|s| s.split(',').map(|ip| ip.trim().to_string()).collect()),
            max_buckets: env_or("STOREFRONT_RATE_LIMIT_MAX_BUCKETS", DEFAULT_MAX_BUCKETS),
            bucket_ttl_secs: env_or("STOREFRONT_RATE_LIMIT_BUCKET_TTL_SECS", DEFAULT_BUCKET_TTL_SECS),
        }
    }
}

#[derive(Clone, Debug)]
struct RateLimitBucket {
    count: u32,
    window_start: Instant,
    last_accessed: Instant,
}

/// Shared rate limiter state
#[derive(Clone)]
pub struct RateLimiter {
    config: Arc<RateLimitConfig>,
    buckets: Arc<DashMap<String, RateLimitBucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config: Arc::new(config),
            buckets: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Client address, honouring forwarded headers only from trusted proxies.
    pub fn client_ip<B>(&self, req: &axum::http::Request<B>) -> Option<String> {
        let peer_ip = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string());

        if let (Some(trusted), Some(peer)) = (&self.config.trusted_proxies, &peer_ip) {
            if trusted.contains(peer) {
                let forwarded = req
                    .headers()
                    .get("x-forwarded-for")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.split(',').next())
                    .map(|s| s.trim().to_string());
                let real_ip = || {
                    req.headers()
                        .get("x-real-ip")
                        .and_then(|v| v.to_str().ok())
                        .map(|s| s.trim().to_string())
                };
                if let Some(ip) = forwarded.or_else(real_ip).filter(|ip| !ip.is_empty()) {
                    debug!(client_ip = %ip, peer_ip = %peer, "Using forwarded client address");
                    return Some(ip);
                }
            } else {
                debug!(peer_ip = %peer, "Peer is not a trusted proxy, ignoring forwarded headers");
            }
        }

        peer_ip
    }

    /// Evict buckets idle for longer than the TTL. O(n), so only run once the
    /// map grows past half of `max_buckets`.
    fn cleanup_old_buckets(&self) {
        let now = Instant::now();
        let ttl = Duration::from_secs(self.config.bucket_ttl_secs);

        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_accessed) < ttl);

        let evicted = before.saturating_sub(self.buckets.len());
        if evicted > 0 {
            debug!(
                evicted,
                remaining = self.buckets.len(),
                "Cleaned up idle rate limit buckets"
            );
        }
    }

    /// Count one hit against `key`. On rejection returns seconds until the window resets.
    pub fn check(&self, key: &str, limit: u32) -> Result<(), u64> {
        if self.buckets.len() > self.config.max_buckets / 2 {
            self.cleanup_old_buckets();
        }

        let now = Instant::now();
        let window = Duration::from_secs(self.config.window_secs);

        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| RateLimitBucket {
                count: 0,
                window_start: now,
                last_accessed: now,
            });
        bucket.last_accessed = now;

        if now.duration_since(bucket.window_start) >= window {
            bucket.window_start = now;
            bucket.count = 0;
        }

        if bucket.count >= limit {
            let retry_after = self
                .config
                .window_secs
                .saturating_sub(now.duration_since(bucket.window_start).as_secs())
                .max(1);
            warn!(key = %key, count = bucket.count, limit, retry_after, "Rate limit exceeded");
            return Err(retry_after);
        }

        bucket.count += 1;
        Ok(())
    }

    pub fn check_global(&self, ip: Option<&str>) -> Result<(), u64> {
        let key = format!("client:{}", ip.unwrap_or(UNKNOWN_CLIENT));
        self.check(&key, self.config.global_limit)
    }

    pub fn check_login(&self, email: &str, ip: Option<&str>) -> Result<(), u64> {
        let key = format!(
            "login:{}|{}",
            email.trim().to_lowercase(),
            ip.unwrap_or(UNKNOWN_CLIENT)
        );
        self.check(&key, self.config.login_limit)
    }
}

/// Global per-client limit. Also records the client address for handlers.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let ip = state.rate_limiter.client_ip(&req);

    if let Err(retry_after_secs) = state.rate_limiter.check_global(ip.as_deref()) {
        return ApiError(TenancyError::RateLimited { retry_after_secs }).into_response();
    }

    if let Some(ip) = ip {
        req.extensions_mut().insert(ClientIp(ip));
    }
    next.run(req).await
}
