//! Outbound notification rate limiter
//!
//! Throttles sends per media target across three scopes: one global bucket,
//! one per media kind, and one per individual target. A single mutex covers
//! the whole check-and-update so two concurrent sends cannot both pass the
//! same window; this serializes unrelated sends, which is the intended
//! fairness trade-off.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;
use crate::model::Media;

struct ScopeKey {
    key: String,
    interval: Duration,
}

/// In-memory rate limiter for outbound media sends
pub struct MediaRateLimiter {
    config: RateLimitConfig,
    last_send: Mutex<HashMap<String, Instant>>,
}

impl MediaRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            last_send: Mutex::new(HashMap::new()),
        }
    }

    fn scope_keys(&self, media: &Media) -> Vec<ScopeKey> {
        let mut keys = Vec::with_capacity(3);
        if self.config.global_interval_seconds > 0 {
            keys.push(ScopeKey {
                key: "global".to_string(),
                interval: Duration::from_secs(self.config.global_interval_seconds),
            });
        }
        if self.config.media_type_interval_seconds > 0 && !media.kind.is_empty() {
            keys.push(ScopeKey {
                key: format!("type:{}", media.kind),
                interval: Duration::from_secs(self.config.media_type_interval_seconds),
            });
        }
        if self.config.media_interval_seconds > 0 && media.id > 0 {
            keys.push(ScopeKey {
                key: format!("media:{}", media.id),
                interval: Duration::from_secs(self.config.media_interval_seconds),
            });
        }
        keys
    }

    /// Decide whether a send to this media target may go out now.
    ///
    /// Returns `Err(wait)` with the remaining window when throttled. On
    /// success all scope timestamps are updated atomically.
    pub fn allow_send(&self, media: &Media) -> Result<(), Duration> {
        let keys = self.scope_keys(media);
        if keys.is_empty() {
            return Ok(());
        }

        let now = Instant::now();
        let mut last_send = match self.last_send.lock() {
            Ok(guard) => guard,
            // a poisoned map only loses throttling history
            Err(poisoned) => poisoned.into_inner(),
        };

        for scope in &keys {
            if let Some(last) = last_send.get(&scope.key) {
                let elapsed = now.duration_since(*last);
                if elapsed < scope.interval {
                    return Err(scope.interval - elapsed);
                }
            }
        }
        for scope in &keys {
            last_send.insert(scope.key.clone(), now);
        }
        Ok(())
    }
}
