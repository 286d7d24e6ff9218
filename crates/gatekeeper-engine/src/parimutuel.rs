//! Two-sided parimutuel wager book with locked odds.
//!
//! Each session carries a `fail` pool and a `breach` pool. Quotes divide the
//! combined pool by the side pool, with a nominal per-side floor so an empty
//! side still has defined odds. A wager locks the quoted multiplier at
//! placement and that number is never recomputed. Resolution pays winners
//! `amount × multiplier` exactly once; a repeat resolution returns the
//! recorded settlement untouched.
//!
//! Multipliers are integer hundredths (400 = 4.00×) with `u128`
//! intermediates, so pool math never touches floating point.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::MarketConfig;
use crate::game_session::{ActorId, GameTimestamp, SessionId, SessionOutcome};

const WAGER_ID_DOMAIN: &[u8] = b"GatekeeperEngine.Wager.v1";

/// Multiplier scale: stored values are hundredths of the payout ratio.
pub const MULTIPLIER_SCALE: u64 = 100;

// ---------------------------------------------------------------------------
// WagerSide / WagerStatus
// ---------------------------------------------------------------------------

/// Which outcome the wager backs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WagerSide {
    /// The challenger fails; the round ends without a breach.
    Fail,
    /// A challenger breaches the vault.
    Breach,
}

impl WagerSide {
    /// Whether this side wins under the given session outcome.
    pub fn wins(self, outcome: SessionOutcome) -> bool {
        matches!(
            (self, outcome),
            (Self::Breach, SessionOutcome::Breached) | (Self::Fail, SessionOutcome::Failed)
        )
    }
}

impl fmt::Display for WagerSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fail => f.write_str("fail"),
            Self::Breach => f.write_str("breach"),
        }
    }
}

/// Wager lifecycle. Exactly one `Pending → Won | Lost` transition happens,
/// at session resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WagerStatus {
    Pending,
    Won,
    Lost,
}

impl fmt::Display for WagerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Won => f.write_str("won"),
            Self::Lost => f.write_str("lost"),
        }
    }
}

// ---------------------------------------------------------------------------
// Wager
// ---------------------------------------------------------------------------

/// One placed wager. `multiplier_hundredths` is the odds snapshot locked at
/// placement; `payout` is set once, at resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wager {
    pub wager_id: String,
    pub session_id: SessionId,
    pub actor: ActorId,
    pub side: WagerSide,
    pub amount: u64,
    pub multiplier_hundredths: u64,
    pub status: WagerStatus,
    pub payout: Option<u64>,
    pub placed_at: GameTimestamp,
}

impl Wager {
    /// Payout owed if this wager wins: `amount × multiplier`, floored.
    fn winning_payout(&self) -> u64 {
        let gross = u128::from(self.amount) * u128::from(self.multiplier_hundredths)
            / u128::from(MULTIPLIER_SCALE);
        u64::try_from(gross).unwrap_or(u64::MAX)
    }
}

// ---------------------------------------------------------------------------
// MarketQuote
// ---------------------------------------------------------------------------

/// Live odds snapshot. Pools are actual pending stakes; multipliers apply
/// the configured floor to each side before dividing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketQuote {
    pub session_id: Option<SessionId>,
    pub pool_fail: u64,
    pub pool_breach: u64,
    pub fail_multiplier_hundredths: u64,
    pub breach_multiplier_hundredths: u64,
}

impl MarketQuote {
    /// Quote reported when no session is accepting wagers.
    pub fn idle() -> Self {
        Self {
            session_id: None,
            pool_fail: 0,
            pool_breach: 0,
            fail_multiplier_hundredths: MULTIPLIER_SCALE,
            breach_multiplier_hundredths: MULTIPLIER_SCALE,
        }
    }

    pub fn side_multiplier(&self, side: WagerSide) -> u64 {
        match side {
            WagerSide::Fail => self.fail_multiplier_hundredths,
            WagerSide::Breach => self.breach_multiplier_hundredths,
        }
    }
}

fn floored_ratio(total: u128, side: u128) -> u64 {
    let scaled = total * u128::from(MULTIPLIER_SCALE) / side;
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// MarketError / MarketState
// ---------------------------------------------------------------------------

/// Typed failures from wager placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketError {
    /// Wager amount must be positive.
    ZeroAmount,
    /// The session's market has already resolved.
    Closed { session_id: SessionId },
    /// One wager per actor per session.
    DuplicateWager {
        session_id: SessionId,
        actor: ActorId,
    },
}

impl fmt::Display for MarketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroAmount => f.write_str("wager amount must be positive"),
            Self::Closed { session_id } => write!(f, "market for {session_id} is closed"),
            Self::DuplicateWager { session_id, actor } => {
                write!(f, "{actor} already holds a wager in {session_id}")
            }
        }
    }
}

impl std::error::Error for MarketError {}

/// Per-session market sub-state. `Open → Resolved`, no reverse edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketState {
    Open,
    Resolved { outcome: SessionOutcome },
}

// ---------------------------------------------------------------------------
// MarketSettlement
// ---------------------------------------------------------------------------

/// Outcome of resolving one session's market. Computed exactly once; repeat
/// resolutions return this record unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSettlement {
    pub session_id: SessionId,
    pub outcome: SessionOutcome,
    /// Combined pending stakes at resolution time.
    pub total_pool: u64,
    /// Sum of winning payouts.
    pub paid_out: u64,
    pub wager_count: usize,
    pub wagers: Vec<Wager>,
}

// ---------------------------------------------------------------------------
// MarketBook
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SessionMarket {
    state: MarketState,
    wagers: BTreeMap<ActorId, Wager>,
    settlement: Option<MarketSettlement>,
}

impl Default for MarketState {
    fn default() -> Self {
        Self::Open
    }
}

/// Mutex-guarded wager book for all sessions. Placement snapshots odds and
/// writes one record inside a single short critical section; resolution is
/// guarded by the per-session `Open → Resolved` transition.
#[derive(Debug)]
pub struct MarketBook {
    config: MarketConfig,
    inner: Mutex<BTreeMap<SessionId, SessionMarket>>,
}

fn derive_wager_id(session_id: &SessionId, actor: &ActorId, placed_at: GameTimestamp) -> String {
    let mut hasher = Sha256::new();
    hasher.update(WAGER_ID_DOMAIN);
    hasher.update(session_id.as_str().as_bytes());
    hasher.update(actor.as_str().as_bytes());
    hasher.update(placed_at.millis().to_be_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        hex.push_str(&format!("{byte:02x}"));
    }
    format!("wager-{hex}")
}

impl MarketBook {
    pub fn new(config: MarketConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    fn book(&self) -> std::sync::MutexGuard<'_, BTreeMap<SessionId, SessionMarket>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn quote_of(&self, session_id: &SessionId, market: &SessionMarket) -> MarketQuote {
        let mut pool_fail: u64 = 0;
        let mut pool_breach: u64 = 0;
        for wager in market.wagers.values() {
            if wager.status != WagerStatus::Pending {
                continue;
            }
            match wager.side {
                WagerSide::Fail => pool_fail = pool_fail.saturating_add(wager.amount),
                WagerSide::Breach => pool_breach = pool_breach.saturating_add(wager.amount),
            }
        }
        let floor = self.config.min_pool_stake.max(1);
        let seeded_fail = u128::from(pool_fail.max(floor));
        let seeded_breach = u128::from(pool_breach.max(floor));
        let total = seeded_fail + seeded_breach;
        MarketQuote {
            session_id: Some(session_id.clone()),
            pool_fail,
            pool_breach,
            fail_multiplier_hundredths: floored_ratio(total, seeded_fail),
            breach_multiplier_hundredths: floored_ratio(total, seeded_breach),
        }
    }

    /// Live odds for a session. A session with no wagers quotes the floored
    /// even ratio (2.00× each with symmetric floors).
    pub fn quote(&self, session_id: &SessionId) -> MarketQuote {
        let book = self.book();
        match book.get(session_id) {
            Some(market) => self.quote_of(session_id, market),
            None => self.quote_of(session_id, &SessionMarket::default()),
        }
    }

    /// Validate, snapshot the current odds, lock the side's multiplier into
    /// a new wager, and persist it. Returns the wager plus the post-placement
    /// quote for broadcasting. Concurrent placements may observe slightly
    /// stale pools; the locked multiplier is whatever was quoted here.
    pub fn place_wager(
        &self,
        session_id: &SessionId,
        actor: &ActorId,
        side: WagerSide,
        amount: u64,
        placed_at: GameTimestamp,
    ) -> Result<(Wager, MarketQuote), MarketError> {
        if amount == 0 {
            return Err(MarketError::ZeroAmount);
        }
        let mut book = self.book();
        let market = book.entry(session_id.clone()).or_default();
        if market.state != MarketState::Open {
            return Err(MarketError::Closed {
                session_id: session_id.clone(),
            });
        }
        if market.wagers.contains_key(actor) {
            return Err(MarketError::DuplicateWager {
                session_id: session_id.clone(),
                actor: actor.clone(),
            });
        }
        let quote = self.quote_of(session_id, market);
        let wager = Wager {
            wager_id: derive_wager_id(session_id, actor, placed_at),
            session_id: session_id.clone(),
            actor: actor.clone(),
            side,
            amount,
            multiplier_hundredths: quote.side_multiplier(side),
            status: WagerStatus::Pending,
            payout: None,
            placed_at,
        };
        market.wagers.insert(actor.clone(), wager.clone());
        let after = self.quote_of(session_id, market);
        Ok((wager, after))
    }

    /// Resolve a session's market. Every pending wager transitions exactly
    /// once: the outcome-matching side to `Won` with its payout recorded,
    /// the rest to `Lost`. A session already resolved returns the original
    /// settlement and mutates nothing, so repeat invocations are no-ops.
    pub fn resolve(&self, session_id: &SessionId, outcome: SessionOutcome) -> MarketSettlement {
        let mut book = self.book();
        let market = book.entry(session_id.clone()).or_default();
        if let Some(settlement) = &market.settlement {
            return settlement.clone();
        }
        let mut total_pool: u64 = 0;
        let mut paid_out: u64 = 0;
        for wager in market.wagers.values_mut() {
            if wager.status != WagerStatus::Pending {
                continue;
            }
            total_pool = total_pool.saturating_add(wager.amount);
            if wager.side.wins(outcome) {
                let payout = wager.winning_payout();
                wager.status = WagerStatus::Won;
                wager.payout = Some(payout);
                paid_out = paid_out.saturating_add(payout);
            } else {
                wager.status = WagerStatus::Lost;
                wager.payout = Some(0);
            }
        }
        let settlement = MarketSettlement {
            session_id: session_id.clone(),
            outcome,
            total_pool,
            paid_out,
            wager_count: market.wagers.len(),
            wagers: market.wagers.values().cloned().collect(),
        };
        market.state = MarketState::Resolved { outcome };
        market.settlement = Some(settlement.clone());
        settlement
    }

    /// Most recent wagers for one actor across all sessions, newest first.
    pub fn wagers_for_actor(&self, actor: &ActorId, limit: usize) -> Vec<Wager> {
        let book = self.book();
        let mut wagers: Vec<Wager> = book
            .values()
            .filter_map(|market| market.wagers.get(actor).cloned())
            .collect();
        wagers.sort_by(|a, b| b.placed_at.cmp(&a.placed_at));
        wagers.truncate(limit);
        wagers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> MarketBook {
        MarketBook::new(MarketConfig { min_pool_stake: 100 })
    }

    fn session() -> SessionId {
        SessionId("session-test".to_string())
    }

    fn at(ms: u64) -> GameTimestamp {
        GameTimestamp(ms)
    }

    #[test]
    fn empty_market_quotes_even_floored_odds() {
        let book = book();
        let quote = book.quote(&session());
        assert_eq!(quote.pool_fail, 0);
        assert_eq!(quote.pool_breach, 0);
        assert_eq!(quote.fail_multiplier_hundredths, 200);
        assert_eq!(quote.breach_multiplier_hundredths, 200);
    }

    #[test]
    fn uneven_pools_quote_the_inverse_ratio() {
        // Pools 100 / 300 must quote fail 4.00x and breach 1.33x.
        let book = book();
        book.place_wager(&session(), &ActorId::new("a"), WagerSide::Fail, 100, at(1))
            .expect("fail wager");
        book.place_wager(&session(), &ActorId::new("b"), WagerSide::Breach, 300, at(2))
            .expect("breach wager");
        let quote = book.quote(&session());
        assert_eq!(quote.pool_fail, 100);
        assert_eq!(quote.pool_breach, 300);
        assert_eq!(quote.fail_multiplier_hundredths, 400);
        assert_eq!(quote.breach_multiplier_hundredths, 133);
    }

    #[test]
    fn placement_locks_the_quoted_multiplier() {
        let book = book();
        book.place_wager(&session(), &ActorId::new("a"), WagerSide::Fail, 100, at(1))
            .expect("seed fail");
        book.place_wager(&session(), &ActorId::new("b"), WagerSide::Breach, 300, at(2))
            .expect("seed breach");
        let (wager, _) = book
            .place_wager(&session(), &ActorId::new("c"), WagerSide::Fail, 10, at(3))
            .expect("locked wager");
        assert_eq!(wager.multiplier_hundredths, 400);
        assert_eq!(wager.status, WagerStatus::Pending);
        assert_eq!(wager.payout, None);
    }

    #[test]
    fn later_placements_do_not_rewrite_earlier_locks() {
        let book = book();
        let (first, _) = book
            .place_wager(&session(), &ActorId::new("a"), WagerSide::Fail, 100, at(1))
            .expect("first");
        let locked = first.multiplier_hundredths;
        book.place_wager(&session(), &ActorId::new("b"), WagerSide::Breach, 900, at(2))
            .expect("shift pools");
        let wagers = book.wagers_for_actor(&ActorId::new("a"), 10);
        assert_eq!(wagers.len(), 1);
        assert_eq!(wagers[0].multiplier_hundredths, locked);
    }

    #[test]
    fn one_wager_per_actor_per_session() {
        let book = book();
        book.place_wager(&session(), &ActorId::new("a"), WagerSide::Fail, 50, at(1))
            .expect("first");
        let second = book.place_wager(&session(), &ActorId::new("a"), WagerSide::Breach, 50, at(2));
        assert!(matches!(second, Err(MarketError::DuplicateWager { .. })));
    }

    #[test]
    fn zero_amount_is_rejected() {
        let book = book();
        let result = book.place_wager(&session(), &ActorId::new("a"), WagerSide::Fail, 0, at(1));
        assert!(matches!(result, Err(MarketError::ZeroAmount)));
    }

    #[test]
    fn resolution_pays_locked_odds_once() {
        let book = book();
        book.place_wager(&session(), &ActorId::new("a"), WagerSide::Fail, 100, at(1))
            .expect("a");
        book.place_wager(&session(), &ActorId::new("b"), WagerSide::Breach, 300, at(2))
            .expect("b");
        let settlement = book.resolve(&session(), SessionOutcome::Failed);
        assert_eq!(settlement.total_pool, 400);
        let winner = settlement
            .wagers
            .iter()
            .find(|w| w.actor == ActorId::new("a"))
            .expect("winner");
        // Locked at 2.00x against the empty floored book.
        assert_eq!(winner.status, WagerStatus::Won);
        assert_eq!(winner.payout, Some(200));
        let loser = settlement
            .wagers
            .iter()
            .find(|w| w.actor == ActorId::new("b"))
            .expect("loser");
        assert_eq!(loser.status, WagerStatus::Lost);
        assert_eq!(loser.payout, Some(0));
        assert_eq!(settlement.paid_out, 200);
    }

    #[test]
    fn repeat_resolution_is_a_noop() {
        let book = book();
        book.place_wager(&session(), &ActorId::new("a"), WagerSide::Breach, 40, at(1))
            .expect("a");
        let first = book.resolve(&session(), SessionOutcome::Breached);
        let second = book.resolve(&session(), SessionOutcome::Breached);
        assert_eq!(first, second);
        // Even a contradictory outcome cannot rewrite the settlement.
        let third = book.resolve(&session(), SessionOutcome::Failed);
        assert_eq!(first, third);
    }

    #[test]
    fn resolved_market_rejects_new_wagers() {
        let book = book();
        book.resolve(&session(), SessionOutcome::Failed);
        let result = book.place_wager(&session(), &ActorId::new("a"), WagerSide::Fail, 10, at(1));
        assert!(matches!(result, Err(MarketError::Closed { .. })));
    }

    #[test]
    fn actor_wagers_are_newest_first_and_bounded() {
        let book = book();
        let s1 = SessionId("session-1".to_string());
        let s2 = SessionId("session-2".to_string());
        book.place_wager(&s1, &ActorId::new("a"), WagerSide::Fail, 10, at(1))
            .expect("s1");
        book.place_wager(&s2, &ActorId::new("a"), WagerSide::Breach, 20, at(2))
            .expect("s2");
        let all = book.wagers_for_actor(&ActorId::new("a"), 10);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].session_id, s2);
        let bounded = book.wagers_for_actor(&ActorId::new("a"), 1);
        assert_eq!(bounded.len(), 1);
        assert_eq!(bounded[0].session_id, s2);
    }
}
