use crate::core::config::{ConnectionConfig, HealthCheckMode};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    Healthy,
    /// Healthy; an application ping is due
    SendPing,
    /// No traffic for too long; the socket must be replaced
    Dead { idle: Duration },
}

/// Liveness bookkeeping for one socket.
///
/// Any inbound traffic counts as a heartbeat acknowledgement. In `Ping` mode the
/// socket is dead once nothing arrived for two ping intervals; in `Staleness` mode
/// once nothing arrived for the staleness window.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    mode: HealthCheckMode,
    ping_interval: Duration,
    staleness_window: Duration,
    last_message: Instant,
    last_ack: Instant,
}

impl HeartbeatMonitor {
    pub fn new(config: &ConnectionConfig, now: Instant) -> Self {
        Self {
            mode: config.health_check,
            ping_interval: config.ping_interval(),
            staleness_window: config.staleness_window(),
            last_message: now,
            last_ack: now,
        }
    }

    pub fn mode(&self) -> HealthCheckMode {
        self.mode
    }

    pub fn reset(&mut self, now: Instant) {
        self.last_message = now;
        self.last_ack = now;
    }

    pub fn on_message(&mut self, now: Instant) {
        self.last_message = now;
        self.last_ack = now;
    }

    pub fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_message)
    }

    pub fn check(&self, now: Instant) -> HealthVerdict {
        match self.mode {
            HealthCheckMode::Ping => {
                let silent = now.saturating_duration_since(self.last_ack);
                if silent > self.ping_interval * 2 {
                    HealthVerdict::Dead { idle: silent }
                } else {
                    HealthVerdict::SendPing
                }
            }
            HealthCheckMode::Staleness => {
                let idle = self.idle(now);
                if idle > self.staleness_window {
                    HealthVerdict::Dead { idle }
                } else {
                    HealthVerdict::Healthy
                }
            }
        }
    }
}
