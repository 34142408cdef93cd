//! Per-provider circuit breaker.
//!
//! Closed → (N consecutive failures) → Open → (cooldown elapses) →
//! HalfOpen (exactly one probe) → probe success → Closed; probe failure →
//! Open with the cooldown reset. An Open circuit rejects locally with zero
//! provider calls. State is owned here exclusively and persisted so a
//! restart does not forget an Open breaker mid-cooldown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::DispatchError;
use crate::store::Database;

/// Breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the circuit.
    pub failure_threshold: u32,
    /// Seconds an Open circuit rejects before permitting a probe.
    pub cooldown_secs: u64,
    /// Also scope circuits per recipient domain for fairness.
    pub per_domain: bool,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 300,
            per_domain: false,
        }
    }
}

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "closed" => Some(Self::Closed),
            "open" => Some(Self::Open),
            "half_open" => Some(Self::HalfOpen),
            _ => None,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit identity: provider, optionally narrowed per recipient domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CircuitKey {
    pub provider: String,
    pub domain: Option<String>,
}

impl CircuitKey {
    pub fn provider(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            domain: None,
        }
    }

    pub fn scoped(provider: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            domain: Some(domain.into()),
        }
    }

    /// Stable storage key, e.g. `email` or `email:corp.com`.
    pub fn storage_key(&self) -> String {
        match &self.domain {
            Some(d) => format!("{}:{}", self.provider, d),
            None => self.provider.clone(),
        }
    }
}

impl std::fmt::Display for CircuitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// One circuit's state record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCircuit {
    pub key: CircuitKey,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_transition: DateTime<Utc>,
    /// True while the single HalfOpen probe is outstanding.
    pub probe_in_flight: bool,
}

impl ProviderCircuit {
    pub fn new(key: CircuitKey) -> Self {
        Self {
            key,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_transition: Utc::now(),
            probe_in_flight: false,
        }
    }

    fn transition(&mut self, to: CircuitState, now: DateTime<Utc>) {
        let from = self.state;
        self.state = to;
        self.last_transition = now;
        warn!(
            circuit = %self.key,
            from = %from,
            to = %to,
            failures = self.consecutive_failures,
            "Circuit transition"
        );
    }

    /// Decide whether a call may proceed, advancing Open → HalfOpen when the
    /// cooldown has elapsed. Returns the remaining cooldown on rejection.
    fn check(&mut self, config: &BreakerConfig, now: DateTime<Utc>) -> Result<(), Duration> {
        match self.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let cooldown = chrono::Duration::seconds(config.cooldown_secs as i64);
                let elapsed = now.signed_duration_since(self.last_transition);
                if elapsed >= cooldown {
                    self.transition(CircuitState::HalfOpen, now);
                    self.probe_in_flight = true;
                    Ok(())
                } else {
                    let remaining = (cooldown - elapsed).to_std().unwrap_or_default();
                    Err(remaining)
                }
            }
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    // Exactly one probe at a time.
                    Err(Duration::from_secs(config.cooldown_secs))
                } else {
                    self.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    fn record_success(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures = 0;
        self.probe_in_flight = false;
        if self.state != CircuitState::Closed {
            self.transition(CircuitState::Closed, now);
        }
    }

    fn record_failure(&mut self, config: &BreakerConfig, now: DateTime<Utc>) {
        match self.state {
            CircuitState::HalfOpen => {
                // Failed probe: back to Open, cooldown restarts.
                self.probe_in_flight = false;
                self.transition(CircuitState::Open, now);
            }
            CircuitState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= config.failure_threshold {
                    self.transition(CircuitState::Open, now);
                }
            }
            CircuitState::Open => {
                self.consecutive_failures += 1;
            }
        }
    }
}

/// Owns every circuit. All reads and writes go through one lock so two
/// concurrent sends cannot both pass a just-tripped breaker. Thresholds
/// come in per call from the current config snapshot, so hot reloads apply
/// without rebuilding the registry.
pub struct BreakerRegistry {
    circuits: Mutex<HashMap<CircuitKey, ProviderCircuit>>,
    store: Option<Arc<dyn Database>>,
}

impl BreakerRegistry {
    pub fn new(store: Option<Arc<dyn Database>>) -> Self {
        Self {
            circuits: Mutex::new(HashMap::new()),
            store,
        }
    }

    /// Load persisted circuits so Open breakers survive restarts.
    pub async fn hydrate(&self) {
        let Some(store) = &self.store else { return };
        match store.list_circuits().await {
            Ok(circuits) => {
                let mut guard = self.circuits.lock().await;
                for circuit in circuits {
                    info!(circuit = %circuit.key, state = %circuit.state, "Circuit restored");
                    guard.insert(circuit.key.clone(), circuit);
                }
            }
            Err(e) => warn!("Failed to restore circuits: {e}"),
        }
    }

    /// Key for a send to `provider` / `recipient_domain` under `config`.
    pub fn key_for(
        &self,
        config: &BreakerConfig,
        provider: &str,
        recipient_domain: &str,
    ) -> CircuitKey {
        if config.per_domain {
            CircuitKey::scoped(provider, recipient_domain)
        } else {
            CircuitKey::provider(provider)
        }
    }

    /// Check whether a call may proceed. Rejection carries the remaining
    /// cooldown; no provider call happens on rejection.
    pub async fn check(
        &self,
        config: &BreakerConfig,
        key: &CircuitKey,
    ) -> Result<(), DispatchError> {
        let now = Utc::now();
        let mut guard = self.circuits.lock().await;
        let circuit = guard
            .entry(key.clone())
            .or_insert_with(|| ProviderCircuit::new(key.clone()));

        let result = circuit.check(config, now);
        let snapshot = circuit.clone();
        drop(guard);

        match result {
            Ok(()) => Ok(()),
            Err(retry_after) => {
                self.persist(&snapshot).await;
                Err(DispatchError::CircuitOpen {
                    provider: key.provider.clone(),
                    retry_after,
                })
            }
        }
    }

    pub async fn record_success(&self, key: &CircuitKey) {
        let now = Utc::now();
        let snapshot = {
            let mut guard = self.circuits.lock().await;
            let circuit = guard
                .entry(key.clone())
                .or_insert_with(|| ProviderCircuit::new(key.clone()));
            circuit.record_success(now);
            circuit.clone()
        };
        self.persist(&snapshot).await;
    }

    pub async fn record_failure(&self, config: &BreakerConfig, key: &CircuitKey) {
        let now = Utc::now();
        let snapshot = {
            let mut guard = self.circuits.lock().await;
            let circuit = guard
                .entry(key.clone())
                .or_insert_with(|| ProviderCircuit::new(key.clone()));
            circuit.record_failure(config, now);
            circuit.clone()
        };
        self.persist(&snapshot).await;
    }

    /// Current state of every known circuit, for the ops surface.
    pub async fn snapshot(&self) -> Vec<ProviderCircuit> {
        self.circuits.lock().await.values().cloned().collect()
    }

    async fn persist(&self, circuit: &ProviderCircuit) {
        if let Some(store) = &self.store
            && let Err(e) = store.save_circuit(circuit).await
        {
            warn!(circuit = %circuit.key, "Failed to persist circuit: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: BreakerConfig = BreakerConfig {
        failure_threshold: 5,
        cooldown_secs: 300,
        per_domain: false,
    };

    fn circuit() -> ProviderCircuit {
        ProviderCircuit::new(CircuitKey::provider("email"))
    }

    #[test]
    fn opens_after_exactly_threshold_failures() {
        let now = Utc::now();
        let mut c = circuit();
        for i in 1..5 {
            c.record_failure(&CONFIG, now);
            assert_eq!(c.state, CircuitState::Closed, "still closed after {i}");
        }
        c.record_failure(&CONFIG, now);
        assert_eq!(c.state, CircuitState::Open);
    }

    #[test]
    fn success_resets_the_failure_streak() {
        let now = Utc::now();
        let mut c = circuit();
        for _ in 0..4 {
            c.record_failure(&CONFIG, now);
        }
        c.record_success(now);
        assert_eq!(c.consecutive_failures, 0);
        for _ in 0..4 {
            c.record_failure(&CONFIG, now);
        }
        assert_eq!(c.state, CircuitState::Closed);
    }

    #[test]
    fn open_rejects_until_cooldown_elapses() {
        let now = Utc::now();
        let mut c = circuit();
        for _ in 0..5 {
            c.record_failure(&CONFIG, now);
        }
        assert_eq!(c.state, CircuitState::Open);

        // Immediately after tripping: rejected.
        assert!(c.check(&CONFIG, now).is_err());
        // One second before the cooldown: still rejected.
        let almost = now + chrono::Duration::seconds(299);
        assert!(c.check(&CONFIG, almost).is_err());
        // After the cooldown: one probe permitted.
        let after = now + chrono::Duration::seconds(300);
        assert!(c.check(&CONFIG, after).is_ok());
        assert_eq!(c.state, CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_permits_exactly_one_probe() {
        let now = Utc::now();
        let mut c = circuit();
        for _ in 0..5 {
            c.record_failure(&CONFIG, now);
        }
        let after = now + chrono::Duration::seconds(301);
        assert!(c.check(&CONFIG, after).is_ok());
        // Second caller while the probe is outstanding: rejected.
        assert!(c.check(&CONFIG, after).is_err());
    }

    #[test]
    fn successful_probe_closes_the_circuit() {
        let now = Utc::now();
        let mut c = circuit();
        for _ in 0..5 {
            c.record_failure(&CONFIG, now);
        }
        let after = now + chrono::Duration::seconds(301);
        c.check(&CONFIG, after).unwrap();
        c.record_success(after);
        assert_eq!(c.state, CircuitState::Closed);
        assert!(c.check(&CONFIG, after).is_ok());
    }

    #[test]
    fn failed_probe_reopens_with_cooldown_reset() {
        let now = Utc::now();
        let mut c = circuit();
        for _ in 0..5 {
            c.record_failure(&CONFIG, now);
        }
        let probe_time = now + chrono::Duration::seconds(301);
        c.check(&CONFIG, probe_time).unwrap();
        c.record_failure(&CONFIG, probe_time);
        assert_eq!(c.state, CircuitState::Open);

        // The old cooldown origin no longer applies: 301s after the
        // original trip is rejected because the clock restarted.
        let old_expiry = now + chrono::Duration::seconds(601);
        assert!(c.check(&CONFIG, old_expiry).is_err());
        let new_expiry = probe_time + chrono::Duration::seconds(300);
        assert!(c.check(&CONFIG, new_expiry).is_ok());
    }

    #[test]
    fn storage_key_shapes() {
        assert_eq!(CircuitKey::provider("email").storage_key(), "email");
        assert_eq!(
            CircuitKey::scoped("email", "corp.com").storage_key(),
            "email:corp.com"
        );
    }

    #[tokio::test]
    async fn registry_serializes_checks() {
        let registry = BreakerRegistry::new(None);
        let key = CircuitKey::provider("email");
        for _ in 0..5 {
            registry.record_failure(&CONFIG, &key).await;
        }
        // Open: every concurrent check is rejected without a provider call.
        assert!(registry.check(&CONFIG, &key).await.is_err());
        assert!(registry.check(&CONFIG, &key).await.is_err());

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].state, CircuitState::Open);
    }

    #[tokio::test]
    async fn registry_per_domain_keys() {
        let config = BreakerConfig {
            per_domain: true,
            ..CONFIG
        };
        let registry = BreakerRegistry::new(None);
        let a = registry.key_for(&config, "email", "a.com");
        let b = registry.key_for(&config, "email", "b.com");
        assert_ne!(a, b);

        for _ in 0..5 {
            registry.record_failure(&config, &a).await;
        }
        assert!(registry.check(&config, &a).await.is_err());
        // b.com's circuit is unaffected.
        assert!(registry.check(&config, &b).await.is_ok());
    }
}
