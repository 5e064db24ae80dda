// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Backoff for transport calls.
//!
//! [`ExponentialBackoff`] answers one question per failed attempt: try again,
//! and after how long? Only transport failures qualify. A server fault or an
//! undecodable reply is the server's final word and is returned as is.
//!
//! ```rust,ignore
//! use xmlda_core::retry::{ExponentialBackoff, RetryConfig, RetryStrategy};
//!
//! let backoff = ExponentialBackoff::new(
//!     RetryConfig::new()
//!         .with_max_attempts(5)
//!         .with_initial_delay(Duration::from_millis(500)),
//! );
//! let reply = backoff.execute(|| transport.invoke(request.clone(), timeout)).await?;
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{InvokeError, TransportError};

// =============================================================================
// RetryConfig
// =============================================================================

/// Attempt budget and delay curve.
///
/// Delays serialize as integer milliseconds (`initial_delay_ms`,
/// `max_delay_ms`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts in total, counting the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Wait after the first failure.
    #[serde(
        default = "default_initial_delay",
        with = "millis",
        rename = "initial_delay_ms"
    )]
    pub initial_delay: Duration,

    /// Upper bound on any wait.
    #[serde(default = "default_max_delay", with = "millis", rename = "max_delay_ms")]
    pub max_delay: Duration,

    /// Factor applied per further failure.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Fraction of each wait randomized in both directions, `0.0..=1.0`.
    #[serde(default)]
    pub jitter: f64,

    /// Retry timeouts.
    #[serde(default = "yes")]
    pub retry_on_timeout: bool,

    /// Retry refused or broken connections.
    #[serde(default = "yes")]
    pub retry_on_connection: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_multiplier() -> f64 {
    2.0
}

fn yes() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
            jitter: 0.0,
            retry_on_timeout: true,
            retry_on_connection: true,
        }
    }
}

impl RetryConfig {
    /// Same as [`Default::default`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the attempt budget.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the first wait.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the wait ceiling.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the growth factor.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the jitter fraction, clamped to `0.0..=1.0`.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Rejects budgets and curves that cannot work.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if self.multiplier < 1.0 {
            return Err(format!("multiplier {} would shrink delays", self.multiplier));
        }
        if self.initial_delay > self.max_delay {
            return Err(format!(
                "initial delay {:?} is above the ceiling {:?}",
                self.initial_delay, self.max_delay
            ));
        }
        Ok(())
    }

    /// Whether this kind of failure may be retried at all.
    pub fn allows(&self, error: &InvokeError) -> bool {
        match error {
            InvokeError::Transport(TransportError::Timeout { .. }) => self.retry_on_timeout,
            InvokeError::Transport(TransportError::Connection { .. }) => self.retry_on_connection,
            InvokeError::ServerFault { .. } | InvokeError::Decode { .. } => false,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// =============================================================================
// RetryStrategy
// =============================================================================

/// Outcome of [`RetryStrategy::should_retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait, then try again.
    Retry(Duration),
    /// Give up and return the error.
    DoNotRetry,
}

/// Per-attempt retry policy.
#[async_trait]
pub trait RetryStrategy: Send + Sync {
    /// Short name used in log fields.
    fn name(&self) -> &str;

    /// Decides after attempt `attempt` (1-based) failed with `error`.
    fn should_retry(&self, error: &InvokeError, attempt: u32) -> RetryDecision;

    /// Runs `operation` until it succeeds or the strategy gives up, returning
    /// the last error in that case.
    async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, InvokeError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, InvokeError>> + Send,
        T: Send,
    {
        let mut attempt = 1u32;
        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            let RetryDecision::Retry(delay) = self.should_retry(&error, attempt) else {
                return Err(error);
            };
            tracing::debug!(
                strategy = self.name(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transport call failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

// =============================================================================
// ExponentialBackoff
// =============================================================================

/// Waits `initial_delay * multiplier^(attempt - 1)`, never more than
/// `max_delay`, for at most `max_attempts` attempts.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: RetryConfig,
}

impl ExponentialBackoff {
    /// Creates the strategy.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Wait after failed attempt `attempt` (1-based), before jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let ceiling = self.config.max_delay.as_millis() as f64;
        let millis = (self.config.initial_delay.as_millis() as f64
            * self.config.multiplier.powi(exponent))
        .min(ceiling);
        Duration::from_millis(millis as u64)
    }
}

#[async_trait]
impl RetryStrategy for ExponentialBackoff {
    fn name(&self) -> &str {
        "exponential_backoff"
    }

    fn should_retry(&self, error: &InvokeError, attempt: u32) -> RetryDecision {
        if attempt >= self.config.max_attempts || !self.config.allows(error) {
            return RetryDecision::DoNotRetry;
        }
        RetryDecision::Retry(jittered(self.delay_for_attempt(attempt), self.config.jitter))
    }
}

// =============================================================================
// Jitter
// =============================================================================

/// Moves `delay` by up to `fraction` of itself in either direction.
fn jittered(delay: Duration, fraction: f64) -> Duration {
    if fraction <= 0.0 {
        return delay;
    }
    let unit = f64::from(next_random()) / f64::from(u32::MAX);
    let offset = (unit * 2.0 - 1.0) * fraction;
    Duration::from_millis((delay.as_millis() as f64 * (1.0 + offset)).max(0.0) as u64)
}

/// Clock-seeded xorshift32. Statistical spread only.
fn next_random() -> u32 {
    static STATE: AtomicU32 = AtomicU32::new(0);

    let mut x = STATE.load(Ordering::Relaxed);
    if x == 0 {
        x = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0x9e37_79b9, |d| d.subsec_nanos())
            | 1;
    }
    x ^= x << 13;
    x ^= x >> 17;
    x ^= x << 5;
    STATE.store(x, Ordering::Relaxed);
    x
}

// =============================================================================
// Tests
// =============================================================================
