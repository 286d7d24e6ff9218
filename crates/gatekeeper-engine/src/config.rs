//! Engine configuration surface.
//!
//! All tunables live in plain serializable structs with explicit defaults.
//! Amounts are integer stake units; timestamps and windows are unix
//! milliseconds supplied by callers.

use serde::{Deserialize, Serialize};

use crate::payment_oracle::PaymentRetryPolicy;

/// Defaults applied when a session is auto-provisioned or rotated in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDefaults {
    /// Jackpot seeded into a fresh session.
    pub initial_jackpot: u64,
    /// Number of attempts that must be admitted before a win can be honored.
    pub min_attempts_before_yield: u64,
    /// Price of one attempt, in stake units.
    pub attempt_price: u64,
    /// Share of each attempt price credited to the jackpot (0-100).
    pub jackpot_share_pct: u8,
    /// Round length; the deadline is `start_time + round_duration_ms`.
    pub round_duration_ms: u64,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            initial_jackpot: 100,
            min_attempts_before_yield: 50,
            attempt_price: 10,
            jackpot_share_pct: 80,
            round_duration_ms: 86_400_000,
        }
    }
}

/// Parimutuel market tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Nominal per-side pool floor used when quoting multipliers. Keeps the
    /// ratio defined while a side is still empty.
    pub min_pool_stake: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self { min_pool_stake: 100 }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub session: SessionDefaults,
    pub market: MarketConfig,
    /// Minimum spacing between one actor's attempts. Zero disables the
    /// cooldown entirely.
    pub cooldown_window_ms: u64,
    /// Maximum accepted attempt message length, in characters.
    pub max_message_chars: usize,
    /// Conversation turns replayed to the text oracle per actor.
    pub history_limit: usize,
    /// Records returned by the public feed query.
    pub feed_limit: usize,
    /// Reject payment proofs that were already consumed by a counted attempt.
    pub replay_protection: bool,
    pub payment_retry: PaymentRetryPolicy,
    /// Shared secret for the admin surface. Empty disables admin operations.
    pub admin_secret: String,
    /// Secret revealed to the winning actor. Empty means nothing to reveal.
    pub vault_secret: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session: SessionDefaults::default(),
            market: MarketConfig::default(),
            cooldown_window_ms: 5_000,
            max_message_chars: 2_000,
            history_limit: 5,
            feed_limit: 50,
            replay_protection: true,
            payment_retry: PaymentRetryPolicy::default(),
            admin_secret: String::new(),
            vault_secret: String::new(),
        }
    }
}
