//! In-process cache for serialized listing responses.
//!
//! Entries are keyed by request signature (path plus every query parameter,
//! order-normalized), expire lazily on read, and can be dropped in bulk by path
//! prefix after a write.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use bytes::Bytes;
use parking_lot::Mutex;
use time::OffsetDateTime;
use tracing::debug;

pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Normalized request signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    path: String,
    params: Vec<(String, String)>,
}

impl CacheKey {
    pub fn new(path: impl Into<String>, params: Vec<(String, String)>) -> Self {
        let mut params = params;
        params.sort();
        Self {
            path: path.into(),
            params,
        }
    }

    pub fn from_request(path: &str, raw_query: Option<&str>) -> Self {
        let params = raw_query
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();
        Self::new(path, params)
    }

    /// Replaces every occurrence of `name` with a single `name=value` pair.
    pub fn with_param(mut self, name: &str, value: &str) -> Self {
        self.params.retain(|(k, _)| k != name);
        self.params.push((name.to_string(), value.to_string()));
        self.params.sort();
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)?;
        for (i, (k, v)) in self.params.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{k}={v}")?;
        }
        Ok(())
    }
}

/// Proof of the invalidation epoch a computation started in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

struct Entry {
    value: Bytes,
    expires_at: OffsetDateTime,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<CacheKey, Entry>,
    epoch: u64,
}

#[derive(Clone)]
pub struct ResultCache {
    inner: Arc<Mutex<Inner>>,
    clock: Arc<dyn Clock>,
}

impl ResultCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            clock,
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Bytes> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        match inner.entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                inner.entries.remove(key);
                debug!(key = %key, "cache entry expired");
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: CacheKey, value: Bytes, ttl: Duration) {
        let expires_at = self.clock.now() + ttl;
        self.inner
            .lock()
            .entries
            .insert(key, Entry { value, expires_at });
    }

    /// Taken before reading the store for a value that will later be cached.
    pub fn ticket(&self) -> Ticket {
        Ticket(self.inner.lock().epoch)
    }

    /// Stores `value` unless an invalidation ran since `ticket` was taken.
    pub fn put_if_current(&self, ticket: Ticket, key: CacheKey, value: Bytes, ttl: Duration) -> bool {
        let expires_at = self.clock.now() + ttl;
        let mut inner = self.inner.lock();
        if inner.epoch != ticket.0 {
            debug!(key = %key, "discarding result computed before invalidation");
            return false;
        }
        inner.entries.insert(key, Entry { value, expires_at });
        true
    }

    /// Removes every entry whose path starts with `prefix`, whatever its query.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut inner = self.inner.lock();
        inner.epoch += 1;
        let before = inner.entries.len();
        inner.entries.retain(|key, _| !key.path.starts_with(prefix));
        let removed = before - inner.entries.len();
        debug!(prefix, removed, "cache invalidated");
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
