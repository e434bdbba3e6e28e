use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts, MatchedPath},
    http::request::Parts,
};
use dashmap::DashMap;
use tracing::warn;

use crate::{error::AppError, state::AppState};

/// Idle buckets are swept once every this many checks.
const PRUNE_EVERY: usize = 1024;

/// Sliding-window limiter keyed by client address and route pattern.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    window: Duration,
    quotas: Arc<HashMap<&'static str, u32>>,
    buckets: Arc<DashMap<String, Vec<Instant>>>,
    checks: Arc<AtomicUsize>,
}

impl RateLimiter {
    pub fn new(window: Duration, quotas: HashMap<&'static str, u32>) -> Self {
        Self {
            window,
            quotas: Arc::new(quotas),
            buckets: Arc::new(DashMap::new()),
            checks: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Routes without a quota are never limited.
    pub fn allow(&self, client: &str, route: &str) -> bool {
        let Some(&max_requests) = self.quotas.get(route) else {
            return true;
        };
        let now = Instant::now();
        let window = self.window;
        if self.checks.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune(now);
        }

        let mut entry = self.buckets.entry(format!("{client}:{route}")).or_default();
        entry.retain(|instant| now.duration_since(*instant) < window);

        if entry.len() as u32 >= max_requests {
            return false;
        }
        entry.push(now);
        true
    }

    /// Drops buckets whose requests have all left the window.
    fn prune(&self, now: Instant) {
        let window = self.window;
        self.buckets.retain(|_, hits| {
            hits.retain(|instant| now.duration_since(*instant) < window);
            !hits.is_empty()
        });
    }

    pub fn retry_after_secs(&self) -> u64 {
        self.window.as_secs().max(1)
    }
}

/// First extractor of throttled handlers; rejects with 429 once the quota is used.
pub struct Throttle;

#[async_trait]
impl FromRequestParts<AppState> for Throttle {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(route) = parts.extensions.get::<MatchedPath>() else {
            return Ok(Throttle);
        };
        let client = client_address(parts);
        if state.limiter.allow(&client, route.as_str()) {
            Ok(Throttle)
        } else {
            warn!(%client, route = route.as_str(), "rate limit exceeded");
            Err(AppError::RateLimited {
                retry_after: state.limiter.retry_after_secs(),
            })
        }
    }
}

fn client_address(parts: &Parts) -> String {
    if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }
    parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "unknown".into())
}
