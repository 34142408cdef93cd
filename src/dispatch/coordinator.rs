//! Dispatch coordinator.
//!
//! Applies the full admission pipeline to every candidate, in order:
//! emergency stop → scoring/ramp admission → guard chain → daily ceiling →
//! rate limiter → circuit breaker → provider send → outcome recording.
//! Policy rejections are audited and never retried; transient provider
//! failures get bounded backoff under breaker supervision; permanent
//! failures move the lead to a terminal status and the suppression list.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tracing::{info, warn};

use crate::channels::{ChannelKind, DispatchCandidate, OutboundChannel};
use crate::config::{ConfigHandle, EngineConfig};
use crate::dispatch::ramp::{RampController, RampDirective};
use crate::dispatch::{DispatchOutcome, DispatchRequest, EmergencyStop};
use crate::error::Result;
use crate::guards::{BatchGuardState, GuardChain, GuardVerdict};
use crate::leads::domain_of;
use crate::limits::{BreakerRegistry, RateLimiter};
use crate::scoring::ScoreEngine;
use crate::signals::SignalProcessor;
use crate::store::{AuditKind, AuditRecord, Database};
use crate::templates::TemplateCatalog;

/// Per-cycle state: config snapshot, derived engines, the ramp directive,
/// and the batch-scoped guard counter. Built fresh at every cycle start so
/// hot-reloaded config and the current suppression list take effect.
pub struct CycleContext {
    pub snapshot: Arc<EngineConfig>,
    engine: ScoreEngine,
    chain: GuardChain,
    templates: TemplateCatalog,
    directive: RampDirective,
    batch: BatchGuardState,
}

impl CycleContext {
    pub fn directive(&self) -> &RampDirective {
        &self.directive
    }
}

/// The coordinator. Shared by the cadence scheduler and any ad-hoc
/// dispatch path; all provider-protective state lives in the injected
/// registry/limiter, never in ambient globals.
pub struct DispatchCoordinator {
    config: Arc<ConfigHandle>,
    store: Arc<dyn Database>,
    channels: HashMap<ChannelKind, Arc<dyn OutboundChannel>>,
    breakers: Arc<BreakerRegistry>,
    limiter: Arc<RateLimiter>,
    signals: Arc<SignalProcessor>,
    stop: EmergencyStop,
}

impl DispatchCoordinator {
    pub fn new(
        config: Arc<ConfigHandle>,
        store: Arc<dyn Database>,
        channels: HashMap<ChannelKind, Arc<dyn OutboundChannel>>,
        breakers: Arc<BreakerRegistry>,
        limiter: Arc<RateLimiter>,
        signals: Arc<SignalProcessor>,
        stop: EmergencyStop,
    ) -> Self {
        Self {
            config,
            store,
            channels,
            breakers,
            limiter,
            signals,
            stop,
        }
    }

    pub fn emergency_stop(&self) -> &EmergencyStop {
        &self.stop
    }

    /// Start a dispatch cycle: take a config snapshot, derive the ramp
    /// directive, and build the guard chain with the live suppression list.
    pub async fn begin_cycle(&self) -> Result<CycleContext> {
        let snapshot = self.config.snapshot().await;
        let suppressed = self.store.list_suppressed_addresses().await?;
        let ramp = RampController::new(snapshot.volume.clone(), snapshot.ramp.clone());

        Ok(CycleContext {
            engine: ScoreEngine::new(snapshot.scoring.clone()),
            chain: GuardChain::new(&snapshot.guards, &suppressed),
            templates: snapshot.template_catalog(),
            directive: ramp.directive(),
            batch: BatchGuardState::new(),
            snapshot,
        })
    }

    /// Dispatch a batch of requests under one cycle context.
    pub async fn dispatch_batch(
        &self,
        requests: Vec<DispatchRequest>,
    ) -> Result<Vec<DispatchOutcome>> {
        let mut ctx = self.begin_cycle().await?;
        let mut outcomes = Vec::with_capacity(requests.len());
        for request in requests {
            outcomes.push(self.dispatch(&mut ctx, request).await?);
        }
        Ok(outcomes)
    }

    /// Dispatch one request. The emergency stop is re-checked here — the
    /// start of every attempt — so an operator stop lands within one
    /// in-flight item, not one batch.
    pub async fn dispatch(
        &self,
        ctx: &mut CycleContext,
        request: DispatchRequest,
    ) -> Result<DispatchOutcome> {
        if self.stop.is_engaged() {
            return Ok(DispatchOutcome::Stopped);
        }

        let lead = request.lead;

        // Scoring and ramp admission gate what may be attempted at all.
        let score = ctx.engine.score(&lead.attributes);
        let tier = score.tier;
        if !ctx.directive.tier_allowed(tier) {
            self.audit(AuditRecord::new(
                AuditKind::RampRejection,
                Some(lead.id),
                "tier_filter",
                &format!("tier {tier} not in active allow-list"),
            ))
            .await;
            return Ok(DispatchOutcome::RampFiltered { tier });
        }

        let Some(message) = ctx
            .templates
            .render(&request.template, request.channel, tier, &lead)
        else {
            warn!(
                lead = %lead.id,
                template = %request.template,
                channel = %request.channel,
                "No matching template — candidate skipped"
            );
            return Ok(DispatchOutcome::Skipped {
                reason: format!("template '{}' unavailable", request.template),
            });
        };

        let candidate = DispatchCandidate {
            lead,
            channel: request.channel,
            message,
        };

        // Guard chain gates what is actually sent.
        if let GuardVerdict::Reject { guard, reason } =
            ctx.chain.evaluate(&candidate, &mut ctx.batch)
        {
            self.audit(AuditRecord::new(
                AuditKind::GuardRejection,
                Some(candidate.lead.id),
                guard.as_str(),
                &reason,
            ))
            .await;
            return Ok(DispatchOutcome::GuardRejected { guard, reason });
        }

        // Daily ceiling, atomically reserved.
        let ceiling = if ctx.directive.daily_ceiling > 0 {
            ctx.directive.daily_ceiling as i64
        } else {
            i64::MAX
        };
        if !self
            .store
            .try_reserve_daily_send(Utc::now().date_naive(), ceiling)
            .await?
        {
            self.audit(AuditRecord::new(
                AuditKind::RampRejection,
                Some(candidate.lead.id),
                "daily_ceiling",
                &format!("ceiling {ceiling} reached"),
            ))
            .await;
            return Ok(DispatchOutcome::CeilingReached);
        }

        let Some(channel) = self.channels.get(&candidate.channel) else {
            return Ok(DispatchOutcome::Skipped {
                reason: format!("no channel registered for {}", candidate.channel),
            });
        };
        let channel = channel.clone();

        // Rate limiter and breaker are orthogonal; either may reject.
        let domain = domain_of(&candidate.lead.address);
        if let Err(e) = self
            .limiter
            .acquire(&ctx.snapshot.rate_limits, channel.name(), &domain)
            .await
        {
            return Ok(DispatchOutcome::RateLimited {
                reason: e.to_string(),
            });
        }

        self.attempt_send(ctx, &candidate, channel, &domain, tier)
            .await
    }

    /// The provider-call loop: breaker check, send, bounded backoff retry.
    async fn attempt_send(
        &self,
        ctx: &CycleContext,
        candidate: &DispatchCandidate,
        channel: Arc<dyn OutboundChannel>,
        domain: &str,
        tier: crate::scoring::Tier,
    ) -> Result<DispatchOutcome> {
        let retry = &ctx.snapshot.dispatch.retry;
        let breaker_config = &ctx.snapshot.breaker;
        let key = self.breakers.key_for(breaker_config, channel.name(), domain);

        let mut last_error = String::new();
        for attempt in 1..=retry.max_attempts.max(1) {
            // Stop and breaker are both re-checked every attempt.
            if self.stop.is_engaged() {
                return Ok(DispatchOutcome::Stopped);
            }
            if self.breakers.check(breaker_config, &key).await.is_err() {
                return Ok(DispatchOutcome::CircuitOpen);
            }

            match channel.send(candidate).await {
                Ok(receipt) => {
                    self.breakers.record_success(&key).await;
                    self.signals
                        .record_send(candidate.lead.id, candidate.channel)
                        .await?;
                    info!(
                        lead = %candidate.lead.id,
                        channel = %channel.name(),
                        template = %candidate.message.template,
                        message_id = receipt.provider_message_id.as_deref().unwrap_or("-"),
                        "Dispatched"
                    );
                    return Ok(DispatchOutcome::Sent { tier });
                }
                Err(e) if e.is_permanent() => {
                    // Recipient-level failure: the provider is healthy, the
                    // lead is not. No breaker impact, no retry.
                    self.signals
                        .record_permanent_failure(candidate.lead.id, &e.to_string())
                        .await?;
                    return Ok(DispatchOutcome::PermanentFailure {
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(
                        lead = %candidate.lead.id,
                        channel = %channel.name(),
                        attempt,
                        "Transient send failure: {e}"
                    );
                    self.breakers.record_failure(breaker_config, &key).await;
                    last_error = e.to_string();

                    if attempt < retry.max_attempts {
                        tokio::time::sleep(backoff(retry.base_backoff_ms, attempt)).await;
                    }
                }
            }
        }

        Ok(DispatchOutcome::TransientFailure { reason: last_error })
    }

    async fn audit(&self, record: AuditRecord) {
        if let Err(e) = self.store.append_audit(&record).await {
            warn!("Failed to write audit record: {e}");
        }
    }
}

/// Exponential backoff with jitter: base × 2^(attempt-1) ± up to 25%.
fn backoff(base_ms: u64, attempt: u32) -> Duration {
    let exp = base_ms.saturating_mul(1u64 << (attempt - 1).min(16));
    let jitter = rand::thread_rng().gen_range(0..=exp / 4);
    Duration::from_millis(exp + jitter)
}
