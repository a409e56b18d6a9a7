//! Reconnection Policy
//!
//! Exponential backoff for the outbound relay connection. Delays double
//! per failed attempt, capped at a maximum; an optional jitter factor
//! randomizes each delay to avoid thundering-herd reconnects.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::RelaySettings;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Jitter factor as a fraction (e.g. 0.1 = ±10% randomization).
    pub jitter_factor: f64,
    /// Maximum number of delayed retries per cycle (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.0,
            max_attempts: 10,
        }
    }
}

impl ReconnectConfig {
    /// Create configuration from `RelaySettings`.
    #[must_use]
    pub const fn from_relay_settings(settings: &RelaySettings) -> Self {
        Self {
            base_delay: settings.reconnect_delay_base,
            max_delay: settings.reconnect_delay_max,
            jitter_factor: 0.0,
            max_attempts: settings.max_reconnect_attempts,
        }
    }
}

/// Per-cycle backoff state.
///
/// `next_delay` is called after each failed attempt; the Nth call yields
/// `min(base_delay * 2^(N-1), max_delay)`, and `None` once the retry
/// budget is spent.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Create a fresh policy for one reconnect cycle.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Get the delay before the next attempt, or `None` when the retry
    /// budget is exhausted.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.config.max_attempts > 0 && self.attempts >= self.config.max_attempts {
            return None;
        }

        // 2^exponent saturates well before u64 overflow.
        let exponent = self.attempts.min(32);
        self.attempts += 1;

        let base_millis = u64::try_from(self.config.base_delay.as_millis()).unwrap_or(u64::MAX);
        let scaled = base_millis.saturating_mul(1_u64 << exponent);
        let max_millis = u64::try_from(self.config.max_delay.as_millis()).unwrap_or(u64::MAX);
        let capped = scaled.min(max_millis);

        Some(self.apply_jitter(Duration::from_millis(capped)))
    }

    /// Reset after a successful connection.
    pub const fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Number of failed attempts recorded so far.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempts
    }

    /// Whether another retry is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempts < self.config.max_attempts
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_ms: u64, max_ms: u64, max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            jitter_factor: 0.0,
            max_attempts,
        }
    }

    #[test]
    fn delays_double_per_failure() {
        let mut policy = ReconnectPolicy::new(config(100, 10_000, 0));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(400)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(800)));
    }

    #[test]
    fn delay_is_capped_at_max() {
        let mut policy = ReconnectPolicy::new(config(1_000, 2_000, 0));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(1_000)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(2_000)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(2_000)));
    }

    #[test]
    fn budget_exhausts_after_max_attempts() {
        let mut policy = ReconnectPolicy::new(config(100, 1_000, 3));

        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert_eq!(policy.attempt_count(), 3);

        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());
    }

    #[test]
    fn reset_restores_the_budget() {
        let mut policy = ReconnectPolicy::new(config(100, 1_000, 2));
        let _ = policy.next_delay();
        let _ = policy.next_delay();
        assert!(!policy.should_retry());

        policy.reset();
        assert_eq!(policy.attempt_count(), 0);
        assert!(policy.should_retry());
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn unlimited_budget_never_exhausts() {
        let mut policy = ReconnectPolicy::new(config(1, 10, 0));
        for _ in 0..1_000 {
            assert!(policy.should_retry());
            assert!(policy.next_delay().is_some());
        }
    }

    #[test]
    fn huge_attempt_counts_stay_capped() {
        let mut policy = ReconnectPolicy::new(config(1_000, 5_000, 0));
        for _ in 0..100 {
            let delay = policy.next_delay().unwrap();
            assert!(delay <= Duration::from_millis(5_000));
        }
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                base_delay: Duration::from_millis(1_000),
                max_delay: Duration::from_secs(10),
                jitter_factor: 0.1,
                max_attempts: 0,
            });

            let millis = policy.next_delay().unwrap().as_millis();
            assert!(millis >= 900, "delay {millis}ms is below minimum 900ms");
            assert!(millis <= 1_100, "delay {millis}ms is above maximum 1100ms");
        }
    }

    #[test]
    fn settings_conversion_keeps_deterministic_backoff() {
        let settings = RelaySettings::default();
        let config = ReconnectConfig::from_relay_settings(&settings);
        assert_eq!(config.base_delay, settings.reconnect_delay_base);
        assert_eq!(config.max_delay, settings.reconnect_delay_max);
        assert_eq!(config.max_attempts, settings.max_reconnect_attempts);
        assert!(config.jitter_factor.abs() < f64::EPSILON);
    }
}
