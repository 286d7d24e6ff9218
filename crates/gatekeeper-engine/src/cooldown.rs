//! Fixed-window per-actor cooldown limiter.
//!
//! Admission control for attempt spacing: an actor gets one admission per
//! window. Expired entries are evicted on every admission, so the map is
//! bounded by the number of distinct actors seen within one window.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::game_session::{ActorId, GameTimestamp};

/// Rejection from the limiter, with the remaining wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownViolation {
    pub retry_after_ms: u64,
}

impl fmt::Display for CooldownViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cooldown active; retry in {} ms", self.retry_after_ms)
    }
}

impl std::error::Error for CooldownViolation {}

/// Fixed-window limiter keyed by actor. A window of zero disables it.
#[derive(Debug)]
pub struct CooldownLimiter {
    window_ms: u64,
    last_admitted: Mutex<BTreeMap<ActorId, u64>>,
}

impl CooldownLimiter {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            last_admitted: Mutex::new(BTreeMap::new()),
        }
    }

    fn map(&self) -> std::sync::MutexGuard<'_, BTreeMap<ActorId, u64>> {
        self.last_admitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit the actor if their window has elapsed, recording the admission.
    /// Eviction of every expired entry happens here, keeping memory bounded.
    pub fn check_and_record(
        &self,
        actor: &ActorId,
        now: GameTimestamp,
    ) -> Result<(), CooldownViolation> {
        if self.window_ms == 0 {
            return Ok(());
        }
        let now_ms = now.millis();
        let mut map = self.map();
        map.retain(|_, last| now_ms < last.saturating_add(self.window_ms));
        if let Some(last) = map.get(actor) {
            let retry_after_ms = last.saturating_add(self.window_ms).saturating_sub(now_ms);
            return Err(CooldownViolation { retry_after_ms });
        }
        map.insert(actor.clone(), now_ms);
        Ok(())
    }

    /// Number of actors currently tracked. Visible for eviction tests.
    pub fn tracked_actors(&self) -> usize {
        self.map().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: u64) -> GameTimestamp {
        GameTimestamp(ms)
    }

    #[test]
    fn second_admission_inside_window_is_rejected() {
        let limiter = CooldownLimiter::new(1_000);
        let actor = ActorId::new("a");
        limiter.check_and_record(&actor, at(10_000)).expect("first");
        let violation = limiter
            .check_and_record(&actor, at(10_400))
            .expect_err("inside window");
        assert_eq!(violation.retry_after_ms, 600);
    }

    #[test]
    fn admission_after_window_elapses() {
        let limiter = CooldownLimiter::new(1_000);
        let actor = ActorId::new("a");
        limiter.check_and_record(&actor, at(10_000)).expect("first");
        limiter
            .check_and_record(&actor, at(11_000))
            .expect("window elapsed");
    }

    #[test]
    fn distinct_actors_do_not_interfere() {
        let limiter = CooldownLimiter::new(1_000);
        limiter
            .check_and_record(&ActorId::new("a"), at(10_000))
            .expect("a");
        limiter
            .check_and_record(&ActorId::new("b"), at(10_001))
            .expect("b");
    }

    #[test]
    fn expired_entries_are_evicted() {
        let limiter = CooldownLimiter::new(1_000);
        for i in 0..10 {
            limiter
                .check_and_record(&ActorId::new(format!("actor-{i}")), at(10_000 + i))
                .expect("seed");
        }
        assert_eq!(limiter.tracked_actors(), 10);
        limiter
            .check_and_record(&ActorId::new("late"), at(20_000))
            .expect("late");
        assert_eq!(limiter.tracked_actors(), 1);
    }

    #[test]
    fn zero_window_disables_the_limiter() {
        let limiter = CooldownLimiter::new(0);
        let actor = ActorId::new("a");
        limiter.check_and_record(&actor, at(1)).expect("first");
        limiter.check_and_record(&actor, at(1)).expect("second");
        assert_eq!(limiter.tracked_actors(), 0);
    }
}
