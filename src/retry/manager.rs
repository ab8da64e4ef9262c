//! Per-message retry attempt records with backoff, jitter and expiry.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;
use thiserror::Error;
use tracing::debug;

/// Retry policy bucket.
#[derive(Debug, Clone)]
pub struct RetryProfile {
    pub id: String,
    pub name: String,
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Applied once per failure, and only when greater than one; a
    /// multiplier at or below one leaves the linear
    /// `initial_delay × attempt_count` growth untouched.
    pub backoff_multiplier: f64,
    /// Symmetric jitter fraction in [0, 1]: the delay moves by up to
    /// ±`jitter/2` of itself.
    pub jitter: f64,
    /// Attempts older than this (from their first failure) are dropped.
    pub expiry: Duration,
    /// Error categories this profile handles.
    pub error_categories: Vec<String>,
}

impl RetryProfile {
    pub fn new(id: impl Into<String>, max_attempts: u32, initial_delay: Duration) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            max_attempts,
            initial_delay,
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 1.0,
            jitter: 0.0,
            expiry: Duration::from_secs(3600),
            error_categories: Vec::new(),
        }
    }

    pub fn handles_category(&self, category: &str) -> bool {
        self.error_categories.is_empty()
            || self.error_categories.iter().any(|c| c == category)
    }
}

/// Retry bookkeeping for one message.
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    pub message_id: String,
    pub profile_id: String,
    pub attempt_count: u32,
    pub first_attempt: Instant,
    pub last_attempt: Instant,
    pub next_attempt: Instant,
    pub last_error: String,
    pub error_category: String,
}

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("retry profile '{0}' not found")]
    ProfileNotFound(String),

    /// The record is returned so the caller can escalate to a dead-letter
    /// path.
    #[error("maximum retry attempts reached for message '{}'", .0.message_id)]
    MaxAttemptsReached(Box<RetryAttempt>),

    #[error("retry callback failed: {0}")]
    CallbackFailed(String),
}

#[derive(Default)]
struct Inner {
    profiles: HashMap<String, RetryProfile>,
    attempts: HashMap<String, RetryAttempt>,
}

/// Registry of profiles and live attempts behind one lock; updates are
/// atomic with respect to scheduler workers.
#[derive(Default)]
pub struct RetryManager {
    inner: Mutex<Inner>,
}

impl RetryManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_profile(&self, profile: RetryProfile) {
        let mut inner = self.inner.lock().expect("retry lock poisoned");
        inner.profiles.insert(profile.id.clone(), profile);
    }

    pub fn profile(&self, id: &str) -> Option<RetryProfile> {
        self.inner
            .lock()
            .expect("retry lock poisoned")
            .profiles
            .get(id)
            .cloned()
    }

    /// Record one failure for `message_id` and schedule the next attempt.
    ///
    /// Delay: `base = initial_delay × attempt_count`, multiplied once by
    /// `backoff_multiplier` when that exceeds one, clamped to `max_delay`,
    /// then jittered by `base × jitter × (0.5 − rand[0,1))`.
    ///
    /// Returns `MaxAttemptsReached` carrying the final record once
    /// `attempt_count` hits the profile ceiling.
    pub fn record_failure(
        &self,
        message_id: &str,
        profile_id: &str,
        error: &str,
        category: &str,
    ) -> Result<RetryAttempt, RetryError> {
        let mut inner = self.inner.lock().expect("retry lock poisoned");

        let profile = inner
            .profiles
            .get(profile_id)
            .cloned()
            .ok_or_else(|| RetryError::ProfileNotFound(profile_id.to_string()))?;

        let now = Instant::now();
        let attempt = inner
            .attempts
            .entry(message_id.to_string())
            .or_insert(RetryAttempt {
                message_id: message_id.to_string(),
                profile_id: profile_id.to_string(),
                attempt_count: 0,
                first_attempt: now,
                last_attempt: now,
                next_attempt: now,
                last_error: String::new(),
                error_category: category.to_string(),
            });

        attempt.attempt_count += 1;
        attempt.error_category = category.to_string();
        attempt.last_attempt = now;
        attempt.last_error = error.to_string();

        if attempt.attempt_count >= profile.max_attempts {
            let record = attempt.clone();
            debug!(
                message_id,
                attempts = record.attempt_count,
                "retry budget exhausted"
            );
            return Err(RetryError::MaxAttemptsReached(Box::new(record)));
        }

        let mut delay = profile.initial_delay * attempt.attempt_count;
        if profile.backoff_multiplier > 1.0 {
            delay = delay.mul_f64(profile.backoff_multiplier);
        }
        if delay > profile.max_delay {
            delay = profile.max_delay;
        }

        if profile.jitter > 0.0 {
            let jitter_range = delay.as_secs_f64() * profile.jitter;
            let shifted =
                delay.as_secs_f64() + jitter_range * (0.5 - rand::rng().random::<f64>());
            delay = Duration::from_secs_f64(shifted.max(0.0));
        }

        attempt.next_attempt = now + delay;
        debug!(
            message_id,
            attempt = attempt.attempt_count,
            delay_ms = delay.as_millis(),
            "retry scheduled"
        );
        Ok(attempt.clone())
    }

    /// Attempts whose `next_attempt` has passed.
    pub fn pending_retries(&self) -> Vec<RetryAttempt> {
        let inner = self.inner.lock().expect("retry lock poisoned");
        let now = Instant::now();
        inner
            .attempts
            .values()
            .filter(|a| a.next_attempt <= now)
            .cloned()
            .collect()
    }

    /// Drop attempts whose profile expiry has elapsed since their first
    /// failure. Returns how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let mut inner = self.inner.lock().expect("retry lock poisoned");
        let now = Instant::now();
        let profiles = inner.profiles.clone();
        let before = inner.attempts.len();
        inner.attempts.retain(|_, attempt| {
            match profiles.get(&attempt.profile_id) {
                Some(profile) => now.duration_since(attempt.first_attempt) <= profile.expiry,
                None => true,
            }
        });
        before - inner.attempts.len()
    }

    /// Forget a message, typically after a successful retry.
    pub fn remove_attempt(&self, message_id: &str) {
        self.inner
            .lock()
            .expect("retry lock poisoned")
            .attempts
            .remove(message_id);
    }

    pub fn get_attempt(&self, message_id: &str) -> Option<RetryAttempt> {
        self.inner
            .lock()
            .expect("retry lock poisoned")
            .attempts
            .get(message_id)
            .cloned()
    }

    pub fn attempt_count(&self) -> usize {
        self.inner.lock().expect("retry lock poisoned").attempts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: &str) -> RetryProfile {
        RetryProfile {
            id: id.to_string(),
            name: id.to_string(),
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: 0.0,
            expiry: Duration::from_secs(60),
            error_categories: vec![],
        }
    }

    #[test]
    fn unknown_profile_is_an_error() {
        let manager = RetryManager::new();
        assert!(matches!(
            manager.record_failure("m1", "missing", "boom", "network"),
            Err(RetryError::ProfileNotFound(_))
        ));
    }

    #[test]
    fn backoff_deltas_double_with_multiplier_two() {
        let manager = RetryManager::new();
        manager.add_profile(profile("p"));

        // First failure: base = 100ms × 1, ×2 → 200ms.
        let a1 = manager.record_failure("m1", "p", "timeout", "network").unwrap();
        assert_eq!(a1.attempt_count, 1);
        let d1 = a1.next_attempt - a1.last_attempt;
        assert_eq!(d1, Duration::from_millis(200));

        // Second failure: base = 100ms × 2, ×2 → 400ms.
        let a2 = manager.record_failure("m1", "p", "timeout", "network").unwrap();
        assert_eq!(a2.attempt_count, 2);
        let d2 = a2.next_attempt - a2.last_attempt;
        assert_eq!(d2, Duration::from_millis(400));

        // Third failure exhausts the budget of 3.
        match manager.record_failure("m1", "p", "timeout", "network") {
            Err(RetryError::MaxAttemptsReached(record)) => {
                assert_eq!(record.attempt_count, 3);
                assert_eq!(record.message_id, "m1");
            }
            other => panic!("expected MaxAttemptsReached, got {:?}", other),
        }
    }

    #[test]
    fn multiplier_at_or_below_one_degenerates_to_linear_growth() {
        let manager = RetryManager::new();
        let mut p = profile("linear");
        p.backoff_multiplier = 1.0;
        p.max_attempts = 10;
        manager.add_profile(p);

        for expected_ms in [100u64, 200, 300, 400] {
            let attempt = manager.record_failure("m1", "linear", "e", "c").unwrap();
            let delta = attempt.next_attempt - attempt.last_attempt;
            assert_eq!(delta, Duration::from_millis(expected_ms));
        }
    }

    #[test]
    fn delay_clamps_to_max_delay() {
        let manager = RetryManager::new();
        let mut p = profile("clamped");
        p.max_attempts = 100;
        p.backoff_multiplier = 10.0;
        manager.add_profile(p);

        let attempt = manager.record_failure("m1", "clamped", "e", "c").unwrap();
        let delta = attempt.next_attempt - attempt.last_attempt;
        assert_eq!(delta, Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_the_symmetric_band() {
        let manager = RetryManager::new();
        let mut p = profile("jittered");
        p.max_attempts = u32::MAX;
        p.backoff_multiplier = 1.0;
        p.jitter = 0.5;
        manager.add_profile(p);

        // base for every first failure is 100ms; band is [75ms, 125ms].
        for i in 0..100 {
            let id = format!("m{i}");
            let attempt = manager.record_failure(&id, "jittered", "e", "c").unwrap();
            let delta = attempt.next_attempt - attempt.last_attempt;
            assert!(
                delta >= Duration::from_millis(75) && delta <= Duration::from_millis(125),
                "delta {delta:?} outside the jitter band"
            );
        }
    }

    #[test]
    fn next_attempt_never_precedes_last_attempt() {
        let manager = RetryManager::new();
        let mut p = profile("band");
        p.max_attempts = u32::MAX;
        p.jitter = 1.0;
        manager.add_profile(p);

        for i in 0..100 {
            let id = format!("m{i}");
            let attempt = manager.record_failure(&id, "band", "e", "c").unwrap();
            assert!(attempt.next_attempt >= attempt.last_attempt);
        }
    }

    #[test]
    fn pending_retries_surface_only_due_attempts() {
        let manager = RetryManager::new();
        let mut p = profile("p");
        p.initial_delay = Duration::from_secs(60);
        manager.add_profile(p);
        let mut immediate = profile("now");
        immediate.initial_delay = Duration::ZERO;
        immediate.backoff_multiplier = 1.0;
        manager.add_profile(immediate);

        manager.record_failure("later", "p", "e", "c").unwrap();
        manager.record_failure("due", "now", "e", "c").unwrap();

        let pending = manager.pending_retries();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].message_id, "due");
    }

    #[test]
    fn cleanup_drops_attempts_past_their_profile_expiry() {
        let manager = RetryManager::new();
        let mut p = profile("fleeting");
        p.expiry = Duration::ZERO;
        manager.add_profile(p);
        manager.add_profile(profile("lasting"));

        manager.record_failure("gone", "fleeting", "e", "c").unwrap();
        manager.record_failure("kept", "lasting", "e", "c").unwrap();

        let dropped = manager.cleanup_expired();
        assert_eq!(dropped, 1);
        assert!(manager.get_attempt("gone").is_none());
        assert!(manager.get_attempt("kept").is_some());
    }

    #[test]
    fn remove_attempt_forgets_the_message() {
        let manager = RetryManager::new();
        manager.add_profile(profile("p"));
        manager.record_failure("m1", "p", "e", "c").unwrap();
        assert!(manager.get_attempt("m1").is_some());

        manager.remove_attempt("m1");
        assert!(manager.get_attempt("m1").is_none());
        assert_eq!(manager.attempt_count(), 0);
    }

    #[test]
    fn profile_category_matching() {
        let mut p = profile("p");
        p.error_categories = vec!["network".into(), "throttle".into()];
        assert!(p.handles_category("network"));
        assert!(!p.handles_category("permanent"));

        let open = profile("open");
        assert!(open.handles_category("anything"));
    }
}
