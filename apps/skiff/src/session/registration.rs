use std::time::Duration;

/// Retry policy for identifier registration against the relay.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// How long to wait for the relay's acknowledgment before resending.
    pub ack_timeout: Duration,
    /// Upper bound on the grown retry delay.
    pub max_delay: Duration,
    /// Attempts per connection before giving up.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(3),
            max_delay: Duration::from_secs(8),
            max_attempts: 5,
        }
    }
}

/// Registration progress for the current control connection: pending until
/// the relay acknowledges, exhausted once the attempt ceiling is hit without
/// one. The engine replays this from scratch on every fresh connection.
#[derive(Debug)]
pub struct RegistrationState {
    policy: RetryPolicy,
    attempts: u32,
    acknowledged: bool,
    exhausted: bool,
}

impl RegistrationState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            acknowledged: false,
            exhausted: false,
        }
    }

    /// Start over for a fresh connection; the identifier must be replayed.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.acknowledged = false;
        self.exhausted = false;
    }

    /// Record one send of the register frame. Returns how long to wait for
    /// the acknowledgment before trying again, or `None` once acknowledged
    /// or out of attempts.
    pub fn begin_attempt(&mut self) -> Option<Duration> {
        if self.acknowledged {
            return None;
        }
        if self.attempts >= self.policy.max_attempts {
            self.exhausted = true;
            return None;
        }
        self.attempts += 1;
        Some(self.delay_for(self.attempts))
    }

    /// Mark the relay's acknowledgment. Returns false for duplicates.
    pub fn acknowledge(&mut self) -> bool {
        if self.acknowledged {
            return false;
        }
        self.acknowledged = true;
        self.attempts = 0;
        true
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let mut delay = self.policy.ack_timeout;
        for _ in 1..attempt {
            delay = (delay * 2).min(self.policy.max_delay);
        }
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn delays_grow_and_cap() {
        let mut state = RegistrationState::new(RetryPolicy::default());
        let delays: Vec<u64> = std::iter::from_fn(|| state.begin_attempt())
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(delays, vec![3, 6, 8, 8, 8]);
        assert!(state.is_exhausted());
    }

    #[test_timeout::timeout]
    fn ceiling_is_enforced_without_acknowledgment() {
        let mut state = RegistrationState::new(RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        });
        assert!(state.begin_attempt().is_some());
        assert!(state.begin_attempt().is_some());
        assert!(state.begin_attempt().is_none());
        assert!(state.is_exhausted());
        assert_eq!(state.attempts(), 2);
    }

    #[test_timeout::timeout]
    fn acknowledgment_stops_attempts_and_resets_the_counter() {
        let mut state = RegistrationState::new(RetryPolicy::default());
        assert!(state.begin_attempt().is_some());
        assert!(state.begin_attempt().is_some());

        assert!(state.acknowledge());
        assert!(!state.acknowledge());
        assert_eq!(state.attempts(), 0);
        assert!(state.is_acknowledged());
        // No further sends once acknowledged, and no exhaustion either.
        assert!(state.begin_attempt().is_none());
        assert!(!state.is_exhausted());
    }

    #[test_timeout::timeout]
    fn reset_replays_from_scratch() {
        let mut state = RegistrationState::new(RetryPolicy::default());
        while state.begin_attempt().is_some() {}
        assert!(state.is_exhausted());

        state.reset();
        assert!(!state.is_exhausted());
        assert!(!state.is_acknowledged());
        assert_eq!(state.begin_attempt(), Some(Duration::from_secs(3)));
    }
}
