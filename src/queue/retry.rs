use std::time::Duration;

use crate::config::QueueConfig;

/// How a failed delivery should be treated by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Storage hiccups and the like; retried up to `max_attempts`.
    Transient,
    /// Unknown user or product. Retried a few times in case the catalog is
    /// being fixed, then parked for an operator.
    Integrity,
    /// Undecodable messages. Never retried.
    Permanent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    DeadLetter,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub max_integrity_attempts: u32,
    /// Wall-clock length of one schedule second.
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

impl From<&QueueConfig> for RetryPolicy {
    fn from(config: &QueueConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            max_integrity_attempts: config.max_integrity_attempts,
            backoff_unit: Duration::from_millis(config.backoff_unit_ms),
        }
    }
}

impl RetryPolicy {
    /// `attempts` is the number of deliveries made so far, including the one
    /// that just failed.
    pub fn decide(&self, attempts: u32, class: FailureClass) -> RetryDecision {
        let budget = match class {
            FailureClass::Transient => self.max_attempts,
            FailureClass::Integrity => self.max_integrity_attempts,
            FailureClass::Permanent => return RetryDecision::DeadLetter,
        };

        if attempts >= budget {
            RetryDecision::DeadLetter
        } else {
            RetryDecision::RetryAfter(self.delay_for(attempts))
        }
    }

    /// True once a message has been delivered more often than any class allows,
    /// e.g. after repeated consumer crashes.
    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts > self.max_attempts
    }

    pub fn delay_for(&self, attempts: u32) -> Duration {
        self.backoff_unit
            .saturating_mul(backoff_delay(attempts).as_secs() as u32)
    }
}

/// Backoff schedule in schedule seconds.
///
/// | attempt | delay   |
/// |---------|---------|
/// | 0       | 0 s     |
/// | 1       | 10 s    |
/// | 2       | 30 s    |
/// | 3       | 2 min   |
/// | 4       | 5 min   |
/// | ≥ 5     | 10 min  |
pub fn backoff_delay(attempt: u32) -> Duration {
    match attempt {
        0 => Duration::from_secs(0),
        1 => Duration::from_secs(10),
        2 => Duration::from_secs(30),
        3 => Duration::from_secs(120),
        4 => Duration::from_secs(300),
        _ => Duration::from_secs(600),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delay_schedule_is_correct() {
        assert_eq!(backoff_delay(0), Duration::from_secs(0));
        assert_eq!(backoff_delay(1), Duration::from_secs(10));
        assert_eq!(backoff_delay(2), Duration::from_secs(30));
        assert_eq!(backoff_delay(3), Duration::from_secs(120));
        assert_eq!(backoff_delay(4), Duration::from_secs(300));
        assert_eq!(backoff_delay(99), Duration::from_secs(600));
    }

    #[test]
    fn transient_failures_retry_until_budget() {
        let policy = RetryPolicy::default();

        assert_eq!(
            policy.decide(1, FailureClass::Transient),
            RetryDecision::RetryAfter(Duration::from_secs(10))
        );
        assert_eq!(
            policy.decide(4, FailureClass::Transient),
            RetryDecision::RetryAfter(Duration::from_secs(300))
        );
        assert_eq!(policy.decide(5, FailureClass::Transient), RetryDecision::DeadLetter);
    }

    #[test]
    fn integrity_failures_have_smaller_budget() {
        let policy = RetryPolicy::default();

        assert!(matches!(
            policy.decide(2, FailureClass::Integrity),
            RetryDecision::RetryAfter(_)
        ));
        assert_eq!(policy.decide(3, FailureClass::Integrity), RetryDecision::DeadLetter);
    }

    #[test]
    fn permanent_failures_never_retry() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(1, FailureClass::Permanent), RetryDecision::DeadLetter);
    }

    #[test]
    fn backoff_unit_scales_schedule() {
        let policy = RetryPolicy {
            backoff_unit: Duration::from_millis(10),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(2), Duration::from_millis(300));

        let immediate = RetryPolicy {
            backoff_unit: Duration::ZERO,
            ..RetryPolicy::default()
        };
        assert_eq!(immediate.delay_for(4), Duration::ZERO);
    }

    #[test]
    fn exhausted_after_max_attempts() {
        let policy = RetryPolicy::default();
        assert!(!policy.exhausted(5));
        assert!(policy.exhausted(6));
    }
}
