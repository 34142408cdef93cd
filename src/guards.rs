//! Deliverability guard chain.
//!
//! Guards run in a fixed, documented order and short-circuit on the first
//! rejection, so every rejection is attributable to exactly one guard:
//!
//! 1. address-format validity
//! 2. organization-domain exclusion (registrable-domain match, subdomains
//!    of an excluded domain are also excluded)
//! 3. individual-address exclusion (exact, case-insensitive; the
//!    suppression list feeds this guard too)
//! 4. per-domain-per-batch concentration cap
//!
//! The chain only authorizes — the dispatch coordinator performs the send.
//! Rejections are policy, never retried, and never silent.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::channels::{ChannelKind, DispatchCandidate};
use crate::leads::domain_of;

/// Which guard fired. Order of declaration is evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardKind {
    AddressFormat,
    DomainExclusion,
    AddressExclusion,
    DomainConcentration,
}

impl GuardKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddressFormat => "address_format",
            Self::DomainExclusion => "domain_exclusion",
            Self::AddressExclusion => "address_exclusion",
            Self::DomainConcentration => "domain_concentration",
        }
    }
}

impl std::fmt::Display for GuardKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a chain evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardVerdict {
    Pass,
    Reject { guard: GuardKind, reason: String },
}

impl GuardVerdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// Guard configuration, loaded from the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Registrable domains never contacted (subdomains included).
    pub excluded_domains: Vec<String>,
    /// Individual addresses never contacted (exact, case-insensitive).
    pub excluded_addresses: Vec<String>,
    /// Max candidates to the same domain within one dispatch batch.
    pub domain_concentration_cap: u32,
}

/// Loose address shape check: local@domain.tld with no whitespace.
static ADDRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("address regex"));

/// Per-batch mutable state: the domain concentration counter.
///
/// Scoped to a single batch execution; never shared across batches.
#[derive(Debug, Default)]
pub struct BatchGuardState {
    domain_counts: HashMap<String, u32>,
}

impl BatchGuardState {
    pub fn new() -> Self {
        Self::default()
    }

    fn count(&self, domain: &str) -> u32 {
        self.domain_counts.get(domain).copied().unwrap_or(0)
    }

    fn record(&mut self, domain: &str) {
        *self.domain_counts.entry(domain.to_string()).or_insert(0) += 1;
    }
}

/// The ordered guard chain.
///
/// Immutable snapshot built from `GuardConfig` plus the current suppression
/// list; rebuild per dispatch cycle so hot-reloaded config takes effect.
#[derive(Debug, Clone)]
pub struct GuardChain {
    excluded_domains: Vec<String>,
    excluded_addresses: HashSet<String>,
    concentration_cap: u32,
}

impl GuardChain {
    /// Build a chain from config plus the persisted suppression list.
    /// Suppressed addresses behave exactly like configured exclusions.
    pub fn new(config: &GuardConfig, suppressed: &[String]) -> Self {
        let excluded_domains = config
            .excluded_domains
            .iter()
            .map(|d| d.to_ascii_lowercase())
            .collect();
        let excluded_addresses = config
            .excluded_addresses
            .iter()
            .chain(suppressed.iter())
            .map(|a| a.to_ascii_lowercase())
            .collect();

        Self {
            excluded_domains,
            excluded_addresses,
            concentration_cap: config.domain_concentration_cap,
        }
    }

    /// Evaluate one candidate. Runs guards in order, stops at the first
    /// rejection, and records the candidate's domain in the batch counter
    /// only when all guards pass.
    pub fn evaluate(
        &self,
        candidate: &DispatchCandidate,
        batch: &mut BatchGuardState,
    ) -> GuardVerdict {
        let verdict = self.evaluate_inner(candidate, batch);

        if let GuardVerdict::Reject { guard, reason } = &verdict {
            info!(
                lead = %candidate.lead.id,
                guard = %guard,
                reason = %reason,
                "Candidate rejected by guard"
            );
        }

        verdict
    }

    fn evaluate_inner(
        &self,
        candidate: &DispatchCandidate,
        batch: &mut BatchGuardState,
    ) -> GuardVerdict {
        // (1) Address-format validity.
        match candidate.channel {
            ChannelKind::Email => {
                if !ADDRESS_RE.is_match(&candidate.lead.address) {
                    return GuardVerdict::Reject {
                        guard: GuardKind::AddressFormat,
                        reason: format!("malformed address '{}'", candidate.lead.address),
                    };
                }
            }
            ChannelKind::Social => {
                if candidate.recipient().trim().is_empty() {
                    return GuardVerdict::Reject {
                        guard: GuardKind::AddressFormat,
                        reason: "missing profile handle".into(),
                    };
                }
            }
        }

        let domain = domain_of(&candidate.lead.address);

        // (2) Organization-domain exclusion, registrable-domain match.
        if let Some(excluded) = self
            .excluded_domains
            .iter()
            .find(|d| domain_matches(&domain, d))
        {
            return GuardVerdict::Reject {
                guard: GuardKind::DomainExclusion,
                reason: format!("domain '{domain}' excluded by '{excluded}'"),
            };
        }

        // (3) Individual-address exclusion (includes suppressions).
        let address = candidate.lead.address.to_ascii_lowercase();
        if self.excluded_addresses.contains(&address) {
            return GuardVerdict::Reject {
                guard: GuardKind::AddressExclusion,
                reason: format!("address '{address}' excluded"),
            };
        }

        // (4) Per-domain-per-batch concentration cap.
        if self.concentration_cap > 0 && batch.count(&domain) >= self.concentration_cap {
            return GuardVerdict::Reject {
                guard: GuardKind::DomainConcentration,
                reason: format!(
                    "domain '{domain}' already at batch cap {}",
                    self.concentration_cap
                ),
            };
        }

        batch.record(&domain);
        GuardVerdict::Pass
    }
}

/// True when `domain` is `excluded` itself or any subdomain of it.
/// Matching is on label boundaries — `notexcluded.com` never matches
/// `excluded.com`.
fn domain_matches(domain: &str, excluded: &str) -> bool {
    domain == excluded
        || (domain.len() > excluded.len()
            && domain.ends_with(excluded)
            && domain.as_bytes()[domain.len() - excluded.len() - 1] == b'.')
}
