//! Token-based rate limiter — sliding-window send ceilings.
//!
//! Enforces hourly/daily ceilings and a minimum delay between sends, per
//! provider and per recipient domain. Orthogonal to the circuit breaker:
//! both are consulted before any provider call and either may reject.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::DispatchError;

/// Rate-limit ceilings. Zero disables the corresponding check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Max sends per provider per hour.
    pub provider_hourly: u32,
    /// Max sends per provider per day.
    pub provider_daily: u32,
    /// Max sends per recipient domain per hour.
    pub domain_hourly: u32,
    /// Max sends per recipient domain per day.
    pub domain_daily: u32,
    /// Minimum seconds between any two sends through the same provider.
    pub min_delay_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            provider_hourly: 50,
            provider_daily: 400,
            domain_hourly: 5,
            domain_daily: 15,
            min_delay_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LimitKey {
    Provider(String),
    Domain(String, String),
}

/// Timestamps of recent sends for one key, pruned past 24h.
#[derive(Debug, Default)]
struct SendHistory {
    timestamps: VecDeque<DateTime<Utc>>,
}

impl SendHistory {
    fn prune(&mut self, now: DateTime<Utc>) {
        let horizon = now - Duration::hours(24);
        while let Some(front) = self.timestamps.front() {
            if *front < horizon {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn count_since(&self, cutoff: DateTime<Utc>) -> u32 {
        self.timestamps.iter().filter(|t| **t >= cutoff).count() as u32
    }

    fn last(&self) -> Option<DateTime<Utc>> {
        self.timestamps.back().copied()
    }
}

/// The limiter. One lock around all histories; sends through the same
/// provider are serialized at this point anyway. Ceilings come in per call
/// from the current config snapshot so hot reloads apply immediately.
#[derive(Default)]
pub struct RateLimiter {
    histories: Mutex<HashMap<LimitKey, SendHistory>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check every ceiling for (provider, recipient domain) and record the
    /// send on success. Rejection names the ceiling that fired.
    pub async fn acquire(
        &self,
        settings: &RateLimitSettings,
        provider: &str,
        domain: &str,
    ) -> Result<(), DispatchError> {
        self.acquire_at(settings, provider, domain, Utc::now())
            .await
    }

    async fn acquire_at(
        &self,
        s: &RateLimitSettings,
        provider: &str,
        domain: &str,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let provider_key = LimitKey::Provider(provider.to_string());
        let domain_key = LimitKey::Domain(provider.to_string(), domain.to_string());

        let mut histories = self.histories.lock().await;

        {
            let provider_history = histories.entry(provider_key.clone()).or_default();
            provider_history.prune(now);

            if s.min_delay_secs > 0
                && let Some(last) = provider_history.last()
                && now.signed_duration_since(last) < Duration::seconds(s.min_delay_secs as i64)
            {
                return Err(rejection(provider, "minimum send delay not elapsed"));
            }
            if s.provider_hourly > 0
                && provider_history.count_since(now - Duration::hours(1)) >= s.provider_hourly
            {
                return Err(rejection(provider, "provider hourly ceiling reached"));
            }
            if s.provider_daily > 0
                && provider_history.count_since(now - Duration::hours(24)) >= s.provider_daily
            {
                return Err(rejection(provider, "provider daily ceiling reached"));
            }
        }

        {
            let domain_history = histories.entry(domain_key.clone()).or_default();
            domain_history.prune(now);

            if s.domain_hourly > 0
                && domain_history.count_since(now - Duration::hours(1)) >= s.domain_hourly
            {
                return Err(rejection(
                    provider,
                    &format!("domain '{domain}' hourly ceiling reached"),
                ));
            }
            if s.domain_daily > 0
                && domain_history.count_since(now - Duration::hours(24)) >= s.domain_daily
            {
                return Err(rejection(
                    provider,
                    &format!("domain '{domain}' daily ceiling reached"),
                ));
            }
        }

        // All ceilings clear — record the send under both keys.
        histories
            .entry(provider_key)
            .or_default()
            .timestamps
            .push_back(now);
        histories
            .entry(domain_key)
            .or_default()
            .timestamps
            .push_back(now);
        Ok(())
    }
}

fn rejection(provider: &str, reason: &str) -> DispatchError {
    DispatchError::RateLimited {
        provider: provider.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> RateLimitSettings {
        RateLimitSettings {
            provider_hourly: 3,
            provider_daily: 5,
            domain_hourly: 2,
            domain_daily: 3,
            min_delay_secs: 60,
        }
    }

    #[tokio::test]
    async fn min_delay_enforced() {
        let limiter = RateLimiter::new();
        let s = settings();
        let t0 = Utc::now();
        limiter.acquire_at(&s, "email", "a.com", t0).await.unwrap();
        // 30s later: too soon.
        assert!(
            limiter
                .acquire_at(&s, "email", "b.com", t0 + Duration::seconds(30))
                .await
                .is_err()
        );
        // 60s later: fine.
        limiter
            .acquire_at(&s, "email", "b.com", t0 + Duration::seconds(60))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn provider_hourly_ceiling() {
        let limiter = RateLimiter::new();
        let s = RateLimitSettings {
            min_delay_secs: 0,
            domain_hourly: 0,
            domain_daily: 0,
            ..settings()
        };
        let t0 = Utc::now();
        for i in 0..3 {
            limiter
                .acquire_at(&s, "email", &format!("d{i}.com"), t0 + Duration::seconds(i))
                .await
                .unwrap();
        }
        assert!(
            limiter
                .acquire_at(&s, "email", "d9.com", t0 + Duration::seconds(10))
                .await
                .is_err()
        );
        // The window slides: an hour later the ceiling clears.
        limiter
            .acquire_at(&s, "email", "d9.com", t0 + Duration::minutes(61))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn domain_ceiling_independent_of_provider_budget() {
        let limiter = RateLimiter::new();
        let s = RateLimitSettings {
            min_delay_secs: 0,
            provider_hourly: 100,
            provider_daily: 100,
            domain_hourly: 2,
            domain_daily: 10,
        };
        let t0 = Utc::now();
        limiter
            .acquire_at(&s, "email", "corp.com", t0)
            .await
            .unwrap();
        limiter
            .acquire_at(&s, "email", "corp.com", t0 + Duration::seconds(1))
            .await
            .unwrap();
        // Third to the same domain within the hour: rejected.
        assert!(
            limiter
                .acquire_at(&s, "email", "corp.com", t0 + Duration::seconds(2))
                .await
                .is_err()
        );
        // A different domain still has budget.
        limiter
            .acquire_at(&s, "email", "other.com", t0 + Duration::seconds(3))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejected_attempts_consume_no_budget() {
        let limiter = RateLimiter::new();
        let s = RateLimitSettings {
            min_delay_secs: 0,
            provider_hourly: 100,
            provider_daily: 100,
            domain_hourly: 1,
            domain_daily: 10,
        };
        let t0 = Utc::now();
        limiter
            .acquire_at(&s, "email", "corp.com", t0)
            .await
            .unwrap();
        for i in 0..5 {
            assert!(
                limiter
                    .acquire_at(&s, "email", "corp.com", t0 + Duration::seconds(1 + i))
                    .await
                    .is_err()
            );
        }
        // Provider history only holds the one recorded send.
        limiter
            .acquire_at(&s, "email", "fresh.com", t0 + Duration::seconds(10))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn zero_disables_a_ceiling() {
        let limiter = RateLimiter::new();
        let s = RateLimitSettings {
            provider_hourly: 0,
            provider_daily: 0,
            domain_hourly: 0,
            domain_daily: 0,
            min_delay_secs: 0,
        };
        let t0 = Utc::now();
        for i in 0..50 {
            limiter
                .acquire_at(&s, "email", "corp.com", t0 + Duration::seconds(i))
                .await
                .unwrap();
        }
    }
}
