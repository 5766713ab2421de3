//! Decision engine.
//!
//! Turns a signal into at most one order decision.
//!
//! # Stage Order
//!
//! 1. Received   → already processed? → Duplicate
//! 2. Enriching  → inference race + cached sentiment (never blocks on sentiment)
//! 3. Scored     → `|combined| < min_signal_threshold` → Discarded(BelowThreshold)
//! 4. Sized      → quantity rounds to zero → Discarded(ZeroQuantity)
//! 5. Published  → order stream, deduplicated on the order id
//!
//! The signal id is recorded as processed only after the last stage
//! completes, so abandoned work is redone on redelivery.

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tickflow_bus::{PublishOutcome, RecentIds};
use tickflow_core::{
    ContributingFactors, InferenceRequest, OrderDecision, OrderId, Side, Signal,
};
use tickflow_inference::InferenceOrchestrator;
use tickflow_telemetry::Metrics;
use tracing::{debug, info, warn};

use crate::config::DecisionConfig;
use crate::error::DecisionResult;
use crate::publisher::OrderPublisher;
use crate::sentiment::SentimentCache;
use crate::sizing::{combine, PositionSizer};

pub const TAG_DEGRADED: &str = "degraded";
pub const TAG_SENTIMENT_MISSING: &str = "sentiment_missing";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionStage {
    Received,
    Enriching,
    Scored,
    Sized,
    Published,
    Discarded,
}

impl DecisionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Enriching => "enriching",
            Self::Scored => "scored",
            Self::Sized => "sized",
            Self::Published => "published",
            Self::Discarded => "discarded",
        }
    }
}

impl fmt::Display for DecisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    BelowThreshold,
    ZeroQuantity,
}

impl DiscardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BelowThreshold => "below_threshold",
            Self::ZeroQuantity => "zero_quantity",
        }
    }
}

/// Result of the scoring and sizing stages.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Order(OrderDecision),
    Discard {
        reason: DiscardReason,
        factors: ContributingFactors,
    },
}

/// Result of processing one signal end to end.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Published {
        decision: OrderDecision,
        publish: PublishOutcome,
    },
    Discarded(DiscardReason),
    /// Signal id already processed by this engine.
    Duplicate,
}

/// Counters for the periodic summary.
#[derive(Debug, Default)]
pub struct EngineStats {
    processed: AtomicU64,
    published: AtomicU64,
    degraded: AtomicU64,
    discarded: AtomicU64,
    duplicates: AtomicU64,
    errors: AtomicU64,
    abandoned: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStatsSnapshot {
    pub processed: u64,
    pub published: u64,
    pub degraded: u64,
    pub discarded: u64,
    pub duplicates: u64,
    pub errors: u64,
    pub abandoned: u64,
}

impl EngineStats {
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }

    /// Processing cut off at the lease or budget deadline.
    pub fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn log_summary(&self) {
        let s = self.snapshot();
        info!(
            processed = s.processed,
            published = s.published,
            degraded = s.degraded,
            discarded = s.discarded,
            duplicates = s.duplicates,
            errors = s.errors,
            abandoned = s.abandoned,
            "Decision engine summary"
        );
    }
}

pub struct DecisionEngine {
    config: DecisionConfig,
    sizer: PositionSizer,
    horizon: u32,
    inference: Arc<InferenceOrchestrator>,
    sentiment: Arc<SentimentCache>,
    publisher: OrderPublisher,
    processed: Mutex<RecentIds>,
    stats: EngineStats,
}

impl DecisionEngine {
    pub fn new(
        config: DecisionConfig,
        horizon: u32,
        inference: Arc<InferenceOrchestrator>,
        sentiment: Arc<SentimentCache>,
        publisher: OrderPublisher,
    ) -> Self {
        let sizer = PositionSizer::new(&config);
        let processed = Mutex::new(RecentIds::new(config.dedup_capacity));
        Self {
            config,
            sizer,
            horizon,
            inference,
            sentiment,
            publisher,
            processed,
            stats: EngineStats::default(),
        }
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn publisher(&self) -> &OrderPublisher {
        &self.publisher
    }

    pub fn is_processed(&self, signal: &Signal) -> bool {
        self.processed.lock().contains(signal.id.as_str())
    }

    /// Enrich, score and size a signal. Does not publish.
    pub async fn decide(&self, signal: &Signal) -> Decision {
        self.trace_stage(signal, DecisionStage::Enriching);
        let request = InferenceRequest::new(signal.symbol.clone(), &signal.features(), self.horizon);
        let inference = self.inference.predict(request).await;
        let sentiment = self
            .sentiment
            .get_fresh(&signal.symbol, Utc::now())
            .map(|s| s.clamped_score());

        let mut tags = Vec::new();
        let (inference_signed, inference_backend) = match inference {
            Ok(result) => (result.signed_confidence(), Some(result.backend)),
            Err(e) => {
                warn!(
                    signal_id = %signal.id,
                    error = %e,
                    "Inference unavailable, deciding degraded"
                );
                tags.push(TAG_DEGRADED.to_string());
                (0.0, None)
            }
        };
        if sentiment.is_none() {
            tags.push(TAG_SENTIMENT_MISSING.to_string());
        }

        self.trace_stage(signal, DecisionStage::Scored);
        let combined = combine(&self.config, signal.score, inference_signed, sentiment);
        let mut factors = ContributingFactors {
            signal_score: signal.score,
            inference_signed,
            sentiment_score: sentiment,
            combined,
            volatility: signal.meta.volatility.unwrap_or(0.0),
            inference_backend,
            tags,
        };

        let side = match Side::from_score(combined) {
            Some(side) if combined.abs() >= self.config.min_signal_threshold => side,
            _ => {
                return Decision::Discard {
                    reason: DiscardReason::BelowThreshold,
                    factors,
                }
            }
        };

        self.trace_stage(signal, DecisionStage::Sized);
        let position = self
            .sizer
            .size(combined, signal.meta.volatility, signal.meta.price);
        factors.volatility = position.volatility;
        if position.quantity.is_zero() {
            return Decision::Discard {
                reason: DiscardReason::ZeroQuantity,
                factors,
            };
        }

        Decision::Order(OrderDecision {
            id: OrderId::for_signal(&signal.id),
            signal_id: signal.id.clone(),
            symbol: signal.symbol.clone(),
            side,
            quantity: position.quantity,
            confidence: combined.abs().min(1.0),
            contributing_factors: factors,
            decided_at: Utc::now(),
        })
    }

    /// Run every stage for one signal and publish the resulting order.
    ///
    /// Dropping the returned future abandons the work; nothing is recorded
    /// as processed until it completes.
    pub async fn process(
        &self,
        signal: &Signal,
        correlation_id: &str,
    ) -> DecisionResult<ProcessOutcome> {
        self.trace_stage(signal, DecisionStage::Received);
        if self.is_processed(signal) {
            self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
            Metrics::duplicate_skipped("decision");
            debug!(signal_id = %signal.id, "Signal already processed, skipping");
            return Ok(ProcessOutcome::Duplicate);
        }

        let outcome = match self.decide(signal).await {
            Decision::Order(decision) => {
                if decision.contributing_factors.is_degraded() {
                    self.stats.degraded.fetch_add(1, Ordering::Relaxed);
                }
                let publish = match self.publisher.publish(&decision, correlation_id).await {
                    Ok(publish) => publish,
                    Err(e) => {
                        self.stats.errors.fetch_add(1, Ordering::Relaxed);
                        return Err(e);
                    }
                };
                self.stats.published.fetch_add(1, Ordering::Relaxed);
                self.trace_stage(signal, DecisionStage::Published);
                ProcessOutcome::Published { decision, publish }
            }
            Decision::Discard { reason, factors } => {
                self.stats.discarded.fetch_add(1, Ordering::Relaxed);
                Metrics::signal_discarded(reason.as_str());
                debug!(
                    signal_id = %signal.id,
                    reason = reason.as_str(),
                    combined = factors.combined,
                    tags = ?factors.tags,
                    "Signal discarded"
                );
                self.trace_stage(signal, DecisionStage::Discarded);
                ProcessOutcome::Discarded(reason)
            }
        };

        self.processed.lock().insert(signal.id.as_str());
        self.stats.processed.fetch_add(1, Ordering::Relaxed);
        Ok(outcome)
    }

    fn trace_stage(&self, signal: &Signal, stage: DecisionStage) {
        debug!(signal_id = %signal.id, symbol = %signal.symbol, stage = %stage, "Decision stage");
    }
}
