use std::time::Duration;

/// What the initialization engine does after a failed construction attempt.
///
/// The policy is chosen per service at initialization time and is not stored afterwards.
///
/// - `Retry` waits `delay`, grows it by 1.5x (capped) and tries the primary factory again.
/// - `Fallback` behaves like `Retry`, but first looks for a fallback factory registered under the
///   service name and, if one exists, commits that instance as `Degraded` instead. A missing or
///   unhealthy dependency also triggers the fallback.
/// - `Fail` makes a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPolicy {
    Retry { max_attempts: u32, delay: Duration },
    Fallback { max_attempts: u32, delay: Duration },
    Fail,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        RecoveryPolicy::Retry {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RecoveryPolicy {
    pub fn retry(max_attempts: u32, delay: Duration) -> Self {
        RecoveryPolicy::Retry {
            max_attempts,
            delay,
        }
    }

    pub fn fallback(max_attempts: u32, delay: Duration) -> Self {
        RecoveryPolicy::Fallback {
            max_attempts,
            delay,
        }
    }

    /// Attempt budget. Always at least one.
    pub fn max_attempts(&self) -> u32 {
        match self {
            RecoveryPolicy::Retry { max_attempts, .. }
            | RecoveryPolicy::Fallback { max_attempts, .. } => (*max_attempts).max(1),
            RecoveryPolicy::Fail => 1,
        }
    }

    pub fn initial_delay(&self) -> Duration {
        match self {
            RecoveryPolicy::Retry { delay, .. } | RecoveryPolicy::Fallback { delay, .. } => *delay,
            RecoveryPolicy::Fail => Duration::ZERO,
        }
    }

    pub fn allows_fallback(&self) -> bool {
        matches!(self, RecoveryPolicy::Fallback { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            RecoveryPolicy::Retry { .. } => "retry",
            RecoveryPolicy::Fallback { .. } => "fallback",
            RecoveryPolicy::Fail => "fail",
        }
    }
}
