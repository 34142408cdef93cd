//! Ramp controller.
//!
//! During a supervised rollout window the engine runs narrower: a lower
//! daily ceiling and a smaller tier allow-list. The directive is derived
//! fresh each dispatch cycle from configuration — never cached across
//! cycles — and only this controller produces it.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::scoring::Tier;

/// Standard (non-ramp) volume settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    /// Daily send ceiling. Zero = unlimited.
    pub daily_ceiling: u32,
    /// Tiers eligible for outbound.
    pub allowed_tiers: Vec<Tier>,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            daily_ceiling: 200,
            allowed_tiers: vec![Tier::Tier1, Tier::Tier2, Tier::Tier3],
        }
    }
}

/// Ramp window settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RampConfig {
    /// First day of the rollout window.
    pub start_date: NaiveDate,
    /// Window length in days; the ramp is active on [start, start+length).
    pub length_days: u32,
    /// Override daily ceiling while ramping.
    pub daily_ceiling: u32,
    /// Override tier allow-list while ramping.
    pub allowed_tiers: Vec<Tier>,
}

/// The directive a dispatch cycle operates under.
#[derive(Debug, Clone, PartialEq)]
pub struct RampDirective {
    pub ramp_active: bool,
    pub daily_ceiling: u32,
    pub allowed_tiers: Vec<Tier>,
}

impl RampDirective {
    pub fn tier_allowed(&self, tier: Tier) -> bool {
        self.allowed_tiers.contains(&tier)
    }
}

/// Derives the active directive from configuration.
#[derive(Debug, Clone)]
pub struct RampController {
    standard: VolumeConfig,
    ramp: Option<RampConfig>,
}

impl RampController {
    pub fn new(standard: VolumeConfig, ramp: Option<RampConfig>) -> Self {
        Self { standard, ramp }
    }

    /// Directive for today.
    pub fn directive(&self) -> RampDirective {
        self.directive_for(Utc::now().date_naive())
    }

    /// Directive for a given day (injectable for tests).
    pub fn directive_for(&self, today: NaiveDate) -> RampDirective {
        if let Some(ramp) = &self.ramp {
            let end = ramp.start_date + chrono::Days::new(ramp.length_days as u64);
            if today >= ramp.start_date && today < end {
                return RampDirective {
                    ramp_active: true,
                    daily_ceiling: ramp.daily_ceiling,
                    allowed_tiers: ramp.allowed_tiers.clone(),
                };
            }
        }

        RampDirective {
            ramp_active: false,
            daily_ceiling: self.standard.daily_ceiling,
            allowed_tiers: self.standard.allowed_tiers.clone(),
        }
    }
}
