//! Fixed-delay reconnection policy.

use super::SubscriptionSettings;
use std::time::Duration;

/// Retries forever on a fixed delay and tracks consecutive failures.
///
/// With a positive alarm threshold, [`record_failure`](Self::record_failure)
/// reports `true` exactly once per outage: on the failure that brings the
/// counter to the threshold.
#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    delay: Duration,
    alarm_threshold: i32,
    consecutive_failures: u32,
}

impl ReconnectPolicy {
    pub fn new(delay: Duration, alarm_threshold: i32) -> Self {
        Self {
            delay,
            alarm_threshold,
            consecutive_failures: 0,
        }
    }

    pub fn from_settings(settings: &SubscriptionSettings) -> Self {
        Self::new(settings.reconnect_delay, settings.reconnect_alarm_threshold)
    }

    /// Wait before each attempt.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn alarm_enabled(&self) -> bool {
        self.alarm_threshold > 0
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Count a failed attempt. Returns true if the alarm should fire now.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.alarm_enabled() && self.consecutive_failures == self.alarm_threshold as u32
    }

    /// Reset after a successful attempt, returning the failures it ended.
    pub fn record_success(&mut self) -> u32 {
        std::mem::take(&mut self.consecutive_failures)
    }
}
