//! Engine configuration.
//!
//! Loaded from a TOML file with environment-variable overrides, validated
//! at startup. Validation failures are fatal: the engine fails closed
//! rather than dispatching with an incomplete ruleset. A `ConfigHandle`
//! re-reads the file when its mtime changes so guard lists, ceilings, and
//! cadence tables are hot-reloadable; a reload that fails validation keeps
//! the previous snapshot.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::cadence::CadenceDefinition;
use crate::channels::{EmailConfig, SocialConfig};
use crate::dispatch::{RampConfig, RetryPolicy, VolumeConfig};
use crate::error::ConfigError;
use crate::guards::GuardConfig;
use crate::limits::{BreakerConfig, RateLimitSettings};
use crate::scoring::ScoringRules;
use crate::signals::state::DecayWindows;
use crate::templates::{TemplateCatalog, TemplateConfig};

/// Database settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "./data/leadflow.db".into(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_address: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8090".into(),
        }
    }
}

/// Dispatch/scheduler loop settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    pub retry: RetryPolicy,
    /// Cadence scan loop interval in seconds.
    pub scan_interval_secs: u64,
    /// Decay sweep interval in seconds.
    pub sweep_interval_secs: u64,
    /// Cron expression bounding when dispatch cycles may start (send
    /// window). Empty = always.
    pub send_window: Option<String>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            scan_interval_secs: 60,
            sweep_interval_secs: 600,
            send_window: None,
        }
    }
}

/// Outbound channel credentials.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub email: Option<EmailConfig>,
    pub social: Option<SocialConfig>,
}

/// The whole engine configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub database: DatabaseSettings,
    pub server: ServerSettings,
    pub dispatch: DispatchSettings,
    pub channels: ChannelsConfig,
    pub scoring: ScoringRules,
    pub guards: GuardConfig,
    pub breaker: BreakerConfig,
    pub rate_limits: RateLimitSettings,
    pub decay: DecayWindows,
    pub volume: VolumeConfig,
    pub ramp: Option<RampConfig>,
    pub templates: Vec<TemplateConfig>,
    pub cadences: Vec<CadenceDefinition>,
}

impl EngineConfig {
    /// Load from a TOML file, apply env overrides, and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: EngineConfig = toml::from_str(&raw)
            .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Environment overrides for deploy-time knobs. Structured tables
    /// (guards, scoring, cadences) live in the file only.
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("LEADFLOW_DB_PATH") {
            self.database.path = path;
        }
        if let Ok(addr) = std::env::var("LEADFLOW_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }
        if let Ok(secs) = std::env::var("LEADFLOW_SCAN_INTERVAL_SECS")
            && let Ok(parsed) = secs.parse()
        {
            self.dispatch.scan_interval_secs = parsed;
        }
        if let Ok(secs) = std::env::var("LEADFLOW_SWEEP_INTERVAL_SECS")
            && let Ok(parsed) = secs.parse()
        {
            self.dispatch.sweep_interval_secs = parsed;
        }
    }

    /// Fail-closed validation of the whole ruleset.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.scoring.tier_thresholds;
        if !(t.tier1 > t.tier2 && t.tier2 > t.tier3) {
            return Err(ConfigError::InvalidValue {
                key: "scoring.tier_thresholds".into(),
                message: format!(
                    "thresholds must be strictly descending, got {}/{}/{}",
                    t.tier1, t.tier2, t.tier3
                ),
            });
        }

        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                key: "breaker.failure_threshold".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.breaker.cooldown_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "breaker.cooldown_secs".into(),
                message: "must be at least 1 second".into(),
            });
        }

        for domain in &self.guards.excluded_domains {
            if domain.is_empty() || domain.contains('@') || domain.contains(char::is_whitespace) {
                return Err(ConfigError::InvalidValue {
                    key: "guards.excluded_domains".into(),
                    message: format!("'{domain}' is not a bare domain"),
                });
            }
        }
        for address in &self.guards.excluded_addresses {
            if !address.contains('@') {
                return Err(ConfigError::InvalidValue {
                    key: "guards.excluded_addresses".into(),
                    message: format!("'{address}' is not an address"),
                });
            }
        }

        if let Some(ramp) = &self.ramp
            && ramp.length_days == 0
        {
            return Err(ConfigError::InvalidValue {
                key: "ramp.length_days".into(),
                message: "must be at least 1".into(),
            });
        }

        if let Some(window) = &self.dispatch.send_window
            && cron::Schedule::from_str(window).is_err()
        {
            return Err(ConfigError::InvalidValue {
                key: "dispatch.send_window".into(),
                message: format!("'{window}' is not a valid cron expression"),
            });
        }

        // Every cadence step must resolve to a template on the right channel.
        let catalog = self.template_catalog();
        for cadence in &self.cadences {
            if cadence.steps.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: format!("cadences.{}", cadence.id),
                    message: "cadence has no steps".into(),
                });
            }
            let mut last_offset = 0u32;
            for (i, step) in cadence.steps.iter().enumerate() {
                match catalog.get(&step.template) {
                    None => {
                        return Err(ConfigError::MissingTemplate {
                            cadence: cadence.id.clone(),
                            step: i,
                            template: step.template.clone(),
                        });
                    }
                    Some(template) if template.channel != step.channel => {
                        return Err(ConfigError::InvalidValue {
                            key: format!("cadences.{}.steps[{i}]", cadence.id),
                            message: format!(
                                "template '{}' is a {} template, step wants {}",
                                step.template, template.channel, step.channel
                            ),
                        });
                    }
                    Some(_) => {}
                }
                if step.offset_days < last_offset {
                    return Err(ConfigError::InvalidValue {
                        key: format!("cadences.{}.steps[{i}]", cadence.id),
                        message: "step offsets must be non-decreasing".into(),
                    });
                }
                last_offset = step.offset_days;
            }
        }

        Ok(())
    }

    pub fn template_catalog(&self) -> TemplateCatalog {
        TemplateCatalog::new(self.templates.clone())
    }
}

/// Shared, hot-reloadable configuration snapshot.
pub struct ConfigHandle {
    path: PathBuf,
    current: RwLock<Arc<EngineConfig>>,
    last_modified: Mutex<Option<SystemTime>>,
}

impl ConfigHandle {
    /// Load the initial snapshot. Fails closed on any validation error.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = EngineConfig::load(&path)?;
        let mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
        Ok(Self {
            path,
            current: RwLock::new(Arc::new(config)),
            last_modified: Mutex::new(mtime),
        })
    }

    /// A handle around a fixed config (tests, or no file on disk).
    pub fn fixed(config: EngineConfig) -> Self {
        Self {
            path: PathBuf::new(),
            current: RwLock::new(Arc::new(config)),
            last_modified: Mutex::new(None),
        }
    }

    /// The current snapshot. Cheap; callers take one per cycle.
    pub async fn snapshot(&self) -> Arc<EngineConfig> {
        self.current.read().await.clone()
    }

    /// Re-read the file if its mtime changed. A snapshot that fails to
    /// parse or validate is rejected and the old one stays live.
    pub async fn reload_if_changed(&self) -> bool {
        if self.path.as_os_str().is_empty() {
            return false;
        }

        let mtime = match std::fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(m) => m,
            Err(e) => {
                error!(path = %self.path.display(), "Config stat failed: {e}");
                return false;
            }
        };

        {
            let mut last = self.last_modified.lock().await;
            if *last == Some(mtime) {
                return false;
            }
            *last = Some(mtime);
        }

        match EngineConfig::load(&self.path) {
            Ok(config) => {
                *self.current.write().await = Arc::new(config);
                info!(path = %self.path.display(), "Configuration reloaded");
                true
            }
            Err(e) => {
                error!(
                    path = %self.path.display(),
                    "Config reload rejected, keeping previous snapshot: {e}"
                );
                false
            }
        }
    }

    /// Spawn the periodic reload checker.
    pub fn spawn_reload_task(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.reload_if_changed().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadence::CadenceStep;
    use crate::channels::ChannelKind;

    #[test]
    fn default_config_validates() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_unordered_tier_thresholds() {
        let mut config = EngineConfig::default();
        config.scoring.tier_thresholds.tier2 = 90;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_breaker_threshold() {
        let mut config = EngineConfig::default();
        config.breaker.failure_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_malformed_exclusion_entries() {
        let mut config = EngineConfig::default();
        config.guards.excluded_domains = vec!["user@corp.com".into()];
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.guards.excluded_addresses = vec!["corp.com".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_missing_template_reference() {
        let mut config = EngineConfig::default();
        config.cadences = vec![CadenceDefinition {
            id: "c1".into(),
            name: "c1".into(),
            steps: vec![CadenceStep {
                offset_days: 0,
                channel: ChannelKind::Email,
                template: "nope".into(),
                exit_statuses: vec![],
                exit_on_min_opens: None,
            }],
        }];
        match config.validate() {
            Err(ConfigError::MissingTemplate { cadence, .. }) => assert_eq!(cadence, "c1"),
            other => panic!("expected MissingTemplate, got {other:?}"),
        }
    }

    #[test]
    fn rejects_channel_mismatched_template() {
        let mut config = EngineConfig::default();
        config.templates = vec![TemplateConfig {
            id: "t".into(),
            channel: ChannelKind::Social,
            subject: None,
            body: "b".into(),
        }];
        config.cadences = vec![CadenceDefinition {
            id: "c1".into(),
            name: "c1".into(),
            steps: vec![CadenceStep {
                offset_days: 0,
                channel: ChannelKind::Email,
                template: "t".into(),
                exit_statuses: vec![],
                exit_on_min_opens: None,
            }],
        }];
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_decreasing_offsets() {
        let mut config = EngineConfig::default();
        config.templates = vec![TemplateConfig {
            id: "t".into(),
            channel: ChannelKind::Email,
            subject: Some("s".into()),
            body: "b".into(),
        }];
        config.cadences = vec![CadenceDefinition {
            id: "c1".into(),
            name: "c1".into(),
            steps: vec![
                CadenceStep {
                    offset_days: 5,
                    channel: ChannelKind::Email,
                    template: "t".into(),
                    exit_statuses: vec![],
                    exit_on_min_opens: None,
                },
                CadenceStep {
                    offset_days: 2,
                    channel: ChannelKind::Email,
                    template: "t".into(),
                    exit_statuses: vec![],
                    exit_on_min_opens: None,
                },
            ],
        }];
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_send_window() {
        let mut config = EngineConfig::default();
        config.dispatch.send_window = Some("not a cron".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_minimal_toml() {
        let config: EngineConfig = toml::from_str(
            r#"
            [guards]
            excluded_domains = ["competitor.com"]
            domain_concentration_cap = 3

            [[templates]]
            id = "intro"
            channel = "email"
            subject = "Hello {{organization}}"
            body = "Hi."

            [[cadences]]
            id = "default"
            name = "Default"

            [[cadences.steps]]
            offset_days = 0
            channel = "email"
            template = "intro"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.guards.excluded_domains, vec!["competitor.com"]);
        assert_eq!(config.cadences[0].steps.len(), 1);
    }
}
