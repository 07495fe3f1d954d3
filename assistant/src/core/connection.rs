//! Connection state machine and reconnect backoff.
//!
//! Transitions are computed here without any timers; the connection manager
//! in `io::connection` applies them and owns the sleeping.

use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32, next_delay: Duration },
    Failed { reason: String },
}

impl ConnectionState {
    /// Current reconnect attempt, zero outside of `Reconnecting`.
    pub fn attempt(&self) -> u32 {
        match self {
            Self::Reconnecting { attempt, .. } => *attempt,
            _ => 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reconnecting {
                attempt,
                next_delay,
            } => write!(
                f,
                "reconnecting (attempt {attempt}, next in {}ms)",
                next_delay.as_millis()
            ),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
            other => f.write_str(other.label()),
        }
    }
}

/// Bounded exponential backoff for reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry; doubles for each further attempt.
    pub interval: Duration,
    /// Retries allowed before giving up.
    pub max_attempts: u32,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30);
        self.interval
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay)
    }

    /// State entered when an established or in-progress connection fails.
    pub fn on_transport_failure(&self, reason: &str) -> ConnectionState {
        self.retry_state(1, reason)
    }

    /// State entered when retry number `attempt` fails.
    pub fn on_retry_failed(&self, attempt: u32, reason: &str) -> ConnectionState {
        self.retry_state(attempt.saturating_add(1), reason)
    }

    fn retry_state(&self, attempt: u32, reason: &str) -> ConnectionState {
        if attempt > self.max_attempts {
            return ConnectionState::Failed {
                reason: format!(
                    "gave up after {} reconnect attempts: {reason}",
                    self.max_attempts
                ),
            };
        }
        ConnectionState::Reconnecting {
            attempt,
            next_delay: self.delay_for(attempt),
        }
    }
}
