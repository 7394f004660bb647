use crate::core::config::ConnectionConfig;
use std::time::Duration;

/// Reconnect delay schedule for one connection.
///
/// `delay = min(base * multiplier^attempts, ceiling)`. Once `attempts` exceeds the
/// maximum the policy returns the long cooldown and starts over; it never gives up.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base: Duration,
    multiplier: f64,
    ceiling: Duration,
    max_attempts: u32,
    cooldown: Duration,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            base: config.reconnect_delay(),
            multiplier: config.backoff_multiplier,
            ceiling: config.max_reconnect_delay(),
            max_attempts: config.max_reconnect_attempts,
            cooldown: config.reconnect_cooldown(),
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Delay before the next connect attempt; advances the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let exponent = i32::try_from(self.attempts).unwrap_or(i32::MAX);
        let raw = self.base.as_secs_f64() * self.multiplier.powi(exponent);
        let delay = Duration::try_from_secs_f64(raw)
            .unwrap_or(Duration::MAX)
            .min(self.ceiling);

        self.attempts += 1;
        if self.attempts > self.max_attempts {
            self.attempts = 0;
            return self.cooldown;
        }
        delay
    }
}
