// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Retry and backoff decisions for subscriptions.
//!
//! ```text
//! Subscribe fails (transport) ──► RetryAfter(backoff) ... ──► GiveUp ──► Failed
//! Subscribe fails (fault)     ──► GiveUp ──► Failed
//!
//! Poll fails (transport)      ──► RepollAfter(max(interval, backoff))
//!                                 ... threshold consecutive failures
//!                             ──► Resubscribe (fresh Subscribe, old handle dropped)
//! ```
//!
//! The controller only decides; the subscription manager sleeps and acts.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use xmlda_core::{ExponentialBackoff, InvokeError, RetryConfig, RetryDecision, RetryStrategy, TransportError};

use crate::error::{XmlDaError, XmlDaResult};

// =============================================================================
// RecoveryPolicy
// =============================================================================

/// Retry and resubscription settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPolicy {
    /// Backoff for Subscribe (and one-shot operations). `max_attempts`
    /// bounds the attempts before the subscription fails.
    #[serde(default = "default_subscribe_retry")]
    pub subscribe: RetryConfig,

    /// Backoff between failed polls. `max_attempts` is not used; polling
    /// continues until the resubscribe threshold is reached.
    #[serde(default = "default_poll_retry")]
    pub poll: RetryConfig,

    /// Consecutive poll transport failures that force a fresh Subscribe.
    #[serde(default = "default_resubscribe_threshold")]
    pub resubscribe_threshold: u32,
}

fn default_subscribe_retry() -> RetryConfig {
    RetryConfig::new()
        .with_max_attempts(5)
        .with_initial_delay(Duration::from_millis(500))
        .with_multiplier(2.0)
        .with_max_delay(Duration::from_secs(30))
}

fn default_poll_retry() -> RetryConfig {
    RetryConfig::new()
        .with_initial_delay(Duration::from_millis(250))
        .with_multiplier(2.0)
        .with_max_delay(Duration::from_secs(30))
}

fn default_resubscribe_threshold() -> u32 {
    3
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            subscribe: default_subscribe_retry(),
            poll: default_poll_retry(),
            resubscribe_threshold: default_resubscribe_threshold(),
        }
    }
}

impl RecoveryPolicy {
    /// Sets the resubscribe threshold.
    pub fn with_resubscribe_threshold(mut self, threshold: u32) -> Self {
        self.resubscribe_threshold = threshold;
        self
    }

    /// Sets the Subscribe retry configuration.
    pub fn with_subscribe_retry(mut self, config: RetryConfig) -> Self {
        self.subscribe = config;
        self
    }

    /// Sets the poll backoff configuration.
    pub fn with_poll_retry(mut self, config: RetryConfig) -> Self {
        self.poll = config;
        self
    }

    /// Validates the policy.
    pub fn validate(&self) -> XmlDaResult<()> {
        self.subscribe
            .validate()
            .map_err(|m| XmlDaError::invalid_config("recovery.subscribe", m))?;
        self.poll
            .validate()
            .map_err(|m| XmlDaError::invalid_config("recovery.poll", m))?;
        if self.resubscribe_threshold == 0 {
            return Err(XmlDaError::invalid_config(
                "recovery.resubscribe_threshold",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Decisions
// =============================================================================

/// What to do after a failed Subscribe attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeAction {
    /// Try again after the delay.
    RetryAfter(Duration),
    /// Stop; the subscription fails.
    GiveUp,
}

/// What to do after a failed poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollAction {
    /// Keep the handle and poll again after the delay.
    RepollAfter(Duration),
    /// Discard the handle and subscribe again.
    Resubscribe,
}

/// Consecutive poll failure count of one subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollFailureTracker {
    consecutive: u32,
}

impl PollFailureTracker {
    /// Returns the current run of consecutive failures.
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    /// Clears the failure run.
    pub fn reset(&mut self) {
        self.consecutive = 0;
    }
}

// =============================================================================
// RecoveryController
// =============================================================================

/// Turns failures into [`SubscribeAction`]s and [`PollAction`]s.
#[derive(Debug, Clone)]
pub struct RecoveryController {
    policy: RecoveryPolicy,
    subscribe: ExponentialBackoff,
    poll: ExponentialBackoff,
}

impl RecoveryController {
    /// Creates a controller.
    pub fn new(policy: RecoveryPolicy) -> Self {
        Self {
            subscribe: ExponentialBackoff::new(policy.subscribe.clone()),
            poll: ExponentialBackoff::new(policy.poll.clone()),
            policy,
        }
    }

    /// Returns the policy.
    pub fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    /// Returns the strategy used for Subscribe and one-shot operations.
    pub fn subscribe_strategy(&self) -> &ExponentialBackoff {
        &self.subscribe
    }

    /// Decides after Subscribe attempt `attempt` (1-based) failed.
    pub fn on_subscribe_failure(&self, error: &InvokeError, attempt: u32) -> SubscribeAction {
        match self.subscribe.should_retry(error, attempt) {
            RetryDecision::Retry(delay) => SubscribeAction::RetryAfter(delay),
            RetryDecision::DoNotRetry => SubscribeAction::GiveUp,
        }
    }

    /// Decides after a poll failed at the transport level.
    ///
    /// The re-poll delay never drops below `interval`. Reaching the
    /// resubscribe threshold clears the tracker.
    pub fn on_poll_failure(
        &self,
        tracker: &mut PollFailureTracker,
        error: &TransportError,
        interval: Duration,
    ) -> PollAction {
        tracker.consecutive = tracker.consecutive.saturating_add(1);

        if tracker.consecutive >= self.policy.resubscribe_threshold {
            tracing::warn!(
                failures = tracker.consecutive,
                error = %error,
                "Poll failure threshold reached"
            );
            tracker.reset();
            return PollAction::Resubscribe;
        }

        let backoff = self.poll.delay_for_attempt(tracker.consecutive);
        PollAction::RepollAfter(interval.max(backoff))
    }

    /// Records a successful poll.
    pub fn on_poll_success(&self, tracker: &mut PollFailureTracker) {
        tracker.reset();
    }
}

impl Default for RecoveryController {
    fn default() -> Self {
        Self::new(RecoveryPolicy::default())
    }
}

// =============================================================================
// Tests
// =============================================================================
