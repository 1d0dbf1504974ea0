//! Shared plugin state
//!
//! Two scopes exist: `SessionData` lives for one request and needs no
//! synchronization; `GlobalState` lives for the process and is shared by
//! every in-flight request. Instead of an untyped bag, the process scope
//! is a small set of typed slots so cross-plugin coupling is visible at
//! the type level: the throttle registry and the applied-mocks counters.

use std::{
    any::Any,
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::event::RequestEvent;

/// Per-request typed key/value store. Keys are plugin names; readers
/// type-check the opaque values on the way out.
#[derive(Default)]
pub struct SessionData {
    vars: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl SessionData {
    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.vars.insert(key.into(), Box::new(value));
    }

    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.vars.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn remove<T: Any>(&mut self, key: &str) -> Option<T> {
        self.vars
            .remove(key)
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }
}

/// What a throttle predicate answers for an incoming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleVerdict {
    /// Seconds the caller should wait; 0 means the request is not throttled
    /// by this entry.
    pub throttle_for_seconds: u64,

    /// Header name carrying the wait, usually `Retry-After`.
    pub retry_after_header: String,
}

impl ThrottleVerdict {
    pub fn pass(header: impl Into<String>) -> Self {
        Self {
            throttle_for_seconds: 0,
            retry_after_header: header.into(),
        }
    }
}

/// Decides whether an incoming request matches an active throttle.
pub type ThrottlePredicate =
    Arc<dyn Fn(&RequestEvent, &str) -> ThrottleVerdict + Send + Sync>;

/// An active throttle registered by any plugin that issued a 429/503.
/// Expired entries (`reset_at < now`) are pruned before consultation.
pub struct ThrottlerInfo {
    pub key: String,
    pub predicate: ThrottlePredicate,
    pub reset_at: DateTime<Utc>,
}

impl ThrottlerInfo {
    /// Throttle keyed by the request URL's host (the default key shape).
    pub fn by_host(host: impl Into<String>, retry_after_seconds: u64) -> Self {
        let key = host.into();
        Self {
            key,
            predicate: Arc::new(move |request: &RequestEvent, key: &str| {
                if request.host() == key {
                    ThrottleVerdict {
                        throttle_for_seconds: retry_after_seconds,
                        retry_after_header: "Retry-After".to_string(),
                    }
                } else {
                    ThrottleVerdict::pass("Retry-After")
                }
            }),
            reset_at: Utc::now() + chrono::Duration::seconds(retry_after_seconds as i64),
        }
    }

    /// Throttle keyed by an absolute URL (batch subrequests).
    pub fn by_url(url: impl Into<String>, retry_after_seconds: u64) -> Self {
        let key = url.into();
        Self {
            key,
            predicate: Arc::new(move |request: &RequestEvent, key: &str| {
                if request.url_str() == key {
                    ThrottleVerdict {
                        throttle_for_seconds: retry_after_seconds,
                        retry_after_header: "Retry-After".to_string(),
                    }
                } else {
                    ThrottleVerdict::pass("Retry-After")
                }
            }),
            reset_at: Utc::now() + chrono::Duration::seconds(retry_after_seconds as i64),
        }
    }
}

/// Process-wide typed state slots shared across concurrent requests.
#[derive(Default)]
pub struct GlobalState {
    throttles: Mutex<Vec<ThrottlerInfo>>,
    applied_mocks: DashMap<String, u64>,
}

impl GlobalState {
    /// Append a throttle. May race with pruners harmlessly: an entry that
    /// would be pruned is evaluated or pruned on the next request.
    pub fn register_throttler(&self, throttler: ThrottlerInfo) {
        self.lock_throttles().push(throttler);
    }

    /// Lock the registry for a prune-then-evaluate pass. The retry-after
    /// plugin holds this guard across both steps so they stay atomic with
    /// respect to other appenders.
    pub fn lock_throttles(&self) -> MutexGuard<'_, Vec<ThrottlerInfo>> {
        self.throttles.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn throttler_count(&self) -> usize {
        self.lock_throttles().len()
    }

    /// Record that a mock with the given key was selected. Returns the new
    /// occurrence count. Increment happens only on selection, never on
    /// mere evaluation.
    pub fn record_mock_applied(&self, key: &str) -> u64 {
        let mut entry = self.applied_mocks.entry(key.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Occurrence count so far for a mock key.
    pub fn mock_applications(&self, key: &str) -> u64 {
        self.applied_mocks.get(key).map(|v| *v).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{HeaderMap, Method};

    fn request(url: &str) -> RequestEvent {
        RequestEvent::new(
            Method::GET,
            url.parse().unwrap(),
            HeaderMap::new(),
            Bytes::new(),
        )
    }

    #[test]
    fn test_session_data_type_checked() {
        let mut data = SessionData::default();
        data.set("rate-limit", vec![("a".to_string(), "b".to_string())]);
        assert!(data.get::<Vec<(String, String)>>("rate-limit").is_some());
        assert!(data.get::<String>("rate-limit").is_none());
        let taken: Vec<(String, String)> = data.remove("rate-limit").unwrap();
        assert_eq!(taken.len(), 1);
        assert!(!data.contains("rate-limit"));
    }

    #[test]
    fn test_host_throttler_matches_only_its_host() {
        let throttler = ThrottlerInfo::by_host("api.example.com", 10);
        let hit = (throttler.predicate)(&request("https://api.example.com/x"), &throttler.key);
        assert_eq!(hit.throttle_for_seconds, 10);
        let miss = (throttler.predicate)(&request("https://other.example.com/x"), &throttler.key);
        assert_eq!(miss.throttle_for_seconds, 0);
        assert_eq!(miss.retry_after_header, "Retry-After");
    }

    #[test]
    fn test_url_throttler_requires_exact_url() {
        let throttler = ThrottlerInfo::by_url("https://api.example.com/users/1", 5);
        let hit = (throttler.predicate)(&request("https://api.example.com/users/1"), &throttler.key);
        assert_eq!(hit.throttle_for_seconds, 5);
        let miss = (throttler.predicate)(&request("https://api.example.com/users/2"), &throttler.key);
        assert_eq!(miss.throttle_for_seconds, 0);
    }

    #[test]
    fn test_applied_mocks_count_monotonically() {
        let state = GlobalState::default();
        assert_eq!(state.mock_applications("https://x/*"), 0);
        assert_eq!(state.record_mock_applied("https://x/*"), 1);
        assert_eq!(state.record_mock_applied("https://x/*"), 2);
        assert_eq!(state.mock_applications("https://x/*"), 2);
    }
}
