//! Authoritative state of a game round.
//!
//! One store owns every session and serializes the three mutations that
//! carry money or decide the round:
//! - get-or-create keeps at most one session active
//! - attempt admission is fetch-and-add on the counter plus jackpot credit
//! - winner sealing is a single conditional `Active → Completed` transition
//!
//! All three run inside one short critical section; no lock is ever held
//! across an oracle call. Sessions are never deleted, only superseded.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::SessionDefaults;

const SESSION_ID_DOMAIN: &[u8] = b"GatekeeperEngine.GameSession.v1";

// ---------------------------------------------------------------------------
// Identity newtypes
// ---------------------------------------------------------------------------

/// Opaque actor identity (a wallet address in the original deployment).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorId(pub String);

impl ActorId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique, immutable session identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Caller-supplied wall-clock instant, unix milliseconds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct GameTimestamp(pub u64);

impl GameTimestamp {
    pub fn millis(self) -> u64 {
        self.0
    }

    pub fn saturating_add(self, delta_ms: u64) -> Self {
        Self(self.0.saturating_add(delta_ms))
    }
}

impl fmt::Display for GameTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unix_ms:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Session state machine
// ---------------------------------------------------------------------------

/// Lifecycle status. Transitions: Active → Completed, no reverse edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Completed => f.write_str("completed"),
        }
    }
}

/// How a completed session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// A challenger extracted the secret; the session has a winner.
    Breached,
    /// The round timed out or was rotated away; nobody won.
    Failed,
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Breached => f.write_str("breached"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// One round: attempt counter, jackpot, winner, lifecycle.
///
/// Invariants: `total_attempts` only increases (the single exception is the
/// compensating revert when no oracle judgement was rendered); `winner` is
/// `Some` iff the session completed with outcome `Breached`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSession {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub outcome: Option<SessionOutcome>,
    pub winner: Option<ActorId>,
    pub jackpot: u64,
    pub total_attempts: u64,
    pub min_attempts_before_yield: u64,
    pub attempt_price: u64,
    pub jackpot_share_pct: u8,
    pub start_time: GameTimestamp,
    pub deadline: GameTimestamp,
    pub end_time: Option<GameTimestamp>,
}

impl GameSession {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// An active session past its deadline is due for a timeout seal.
    pub fn is_overdue(&self, now: GameTimestamp) -> bool {
        self.is_active() && now >= self.deadline
    }

    /// Jackpot share credited per counted attempt.
    pub fn jackpot_credit(&self) -> u64 {
        let share = u128::from(self.attempt_price) * u128::from(self.jackpot_share_pct) / 100;
        share as u64
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.session_id.clone(),
            status: self.status,
            outcome: self.outcome,
            winner: self.winner.clone(),
            jackpot: self.jackpot,
            total_attempts: self.total_attempts,
            min_attempts_before_yield: self.min_attempts_before_yield,
            attempt_price: self.attempt_price,
            start_time: self.start_time,
            deadline: self.deadline,
            end_time: self.end_time,
        }
    }
}

/// Read-only session snapshot for stats queries and broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub outcome: Option<SessionOutcome>,
    pub winner: Option<ActorId>,
    pub jackpot: u64,
    pub total_attempts: u64,
    pub min_attempts_before_yield: u64,
    pub attempt_price: u64,
    pub start_time: GameTimestamp,
    pub deadline: GameTimestamp,
    pub end_time: Option<GameTimestamp>,
}

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

/// Typed failures from session-store mutations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionError {
    /// Unknown session id.
    NotFound { session_id: SessionId },
    /// The conditional seal lost: the session is already completed. Carries
    /// the winner recorded by whoever sealed first (`None` on timeout).
    AlreadySealed {
        session_id: SessionId,
        winner: Option<ActorId>,
    },
    /// Mutation attempted against a session that is no longer active.
    NotActive { session_id: SessionId },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { session_id } => write!(f, "session {session_id} not found"),
            Self::AlreadySealed { session_id, .. } => {
                write!(f, "session {session_id} already sealed")
            }
            Self::NotActive { session_id } => write!(f, "session {session_id} is not active"),
        }
    }
}

impl std::error::Error for SessionError {}

// ---------------------------------------------------------------------------
// AttemptTicket — receipt for one admitted attempt
// ---------------------------------------------------------------------------

/// Receipt returned by `increment_attempts`, carrying everything the
/// compensation path needs to revert exactly what was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptTicket {
    pub session_id: SessionId,
    /// Counter value before this attempt was admitted. The gate judges the
    /// forced-rejection threshold against this number.
    pub prior_attempts: u64,
    /// Counter value including this attempt.
    pub attempt_number: u64,
    /// Jackpot share credited by this attempt.
    pub jackpot_credit: u64,
    /// Jackpot after the credit.
    pub jackpot_after: u64,
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SessionTable {
    sessions: std::collections::BTreeMap<SessionId, GameSession>,
    /// Most recent session, active or completed. A completed round stays
    /// current (and keeps rejecting attempts) until admin rotation.
    current: Option<SessionId>,
    created_seq: u64,
}

/// Mutex-guarded session table. Every mutation is a short critical section;
/// concurrent callers serialize here and nowhere else.
#[derive(Debug, Default)]
pub struct SessionStore {
    inner: Mutex<SessionTable>,
}

fn derive_session_id(seq: u64, created_at: GameTimestamp) -> SessionId {
    let mut hasher = Sha256::new();
    hasher.update(SESSION_ID_DOMAIN);
    hasher.update(seq.to_be_bytes());
    hasher.update(created_at.millis().to_be_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        hex.push_str(&format!("{byte:02x}"));
    }
    SessionId(format!("session-{hex}"))
}

fn new_session(defaults: &SessionDefaults, seq: u64, now: GameTimestamp) -> GameSession {
    GameSession {
        session_id: derive_session_id(seq, now),
        status: SessionStatus::Active,
        outcome: None,
        winner: None,
        jackpot: defaults.initial_jackpot,
        total_attempts: 0,
        min_attempts_before_yield: defaults.min_attempts_before_yield,
        attempt_price: defaults.attempt_price,
        jackpot_share_pct: defaults.jackpot_share_pct.min(100),
        start_time: now,
        deadline: now.saturating_add(defaults.round_duration_ms),
        end_time: None,
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, SessionTable> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the current session, provisioning a fresh active one only
    /// when the store holds none at all. The check-and-create is serialized
    /// by the store lock, so concurrent callers can never provision two
    /// active sessions. A completed round is returned as-is; callers decide
    /// between `RoundOver` and `RoundExpired`, and only admin rotation
    /// supersedes it. The boolean reports whether this call created the
    /// session.
    pub fn current_or_create(
        &self,
        defaults: &SessionDefaults,
        now: GameTimestamp,
    ) -> (GameSession, bool) {
        let mut table = self.table();
        if let Some(id) = table.current.clone() {
            if let Some(session) = table.sessions.get(&id) {
                return (session.clone(), false);
            }
        }
        table.created_seq += 1;
        let session = new_session(defaults, table.created_seq, now);
        table.current = Some(session.session_id.clone());
        table
            .sessions
            .insert(session.session_id.clone(), session.clone());
        (session, true)
    }

    /// Snapshot of the current session if it is still active.
    pub fn active(&self) -> Option<GameSession> {
        let table = self.table();
        let id = table.current.clone()?;
        table.sessions.get(&id).filter(|s| s.is_active()).cloned()
    }

    /// Snapshot of the current session regardless of status.
    pub fn current(&self) -> Option<GameSession> {
        let table = self.table();
        let id = table.current.clone()?;
        table.sessions.get(&id).cloned()
    }

    /// Snapshot of a specific session.
    pub fn get(&self, session_id: &SessionId) -> Option<GameSession> {
        self.table().sessions.get(session_id).cloned()
    }

    /// Fetch-and-add on the attempt counter plus the jackpot credit, as one
    /// atomic step. Returns the ticket needed to revert on compensation.
    pub fn increment_attempts(&self, session_id: &SessionId) -> Result<AttemptTicket, SessionError> {
        let mut table = self.table();
        let session = table
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound {
                session_id: session_id.clone(),
            })?;
        if !session.is_active() {
            return Err(SessionError::NotActive {
                session_id: session_id.clone(),
            });
        }
        let prior_attempts = session.total_attempts;
        let jackpot_credit = session.jackpot_credit();
        session.total_attempts += 1;
        session.jackpot = session.jackpot.saturating_add(jackpot_credit);
        Ok(AttemptTicket {
            session_id: session_id.clone(),
            prior_attempts,
            attempt_number: session.total_attempts,
            jackpot_credit,
            jackpot_after: session.jackpot,
        })
    }

    /// Compensating revert for an attempt whose oracle call produced no
    /// judgement. Undoes exactly the counter bump and jackpot credit from
    /// the ticket. Succeeds even if the session completed in between; the
    /// attempt legitimately never happened.
    pub fn revert_attempt(&self, ticket: &AttemptTicket) -> Result<(), SessionError> {
        let mut table = self.table();
        let session =
            table
                .sessions
                .get_mut(&ticket.session_id)
                .ok_or_else(|| SessionError::NotFound {
                    session_id: ticket.session_id.clone(),
                })?;
        session.total_attempts = session.total_attempts.saturating_sub(1);
        session.jackpot = session.jackpot.saturating_sub(ticket.jackpot_credit);
        Ok(())
    }

    /// The one conditional update that decides the round: transition
    /// `Active → Completed`, record the winner and end time, only if the
    /// session is still active. A lost race returns `AlreadySealed` with the
    /// recorded winner and never overwrites it.
    pub fn seal_with_winner(
        &self,
        session_id: &SessionId,
        winner: &ActorId,
        now: GameTimestamp,
    ) -> Result<GameSession, SessionError> {
        let mut table = self.table();
        let session = table
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound {
                session_id: session_id.clone(),
            })?;
        if !session.is_active() {
            return Err(SessionError::AlreadySealed {
                session_id: session_id.clone(),
                winner: session.winner.clone(),
            });
        }
        session.status = SessionStatus::Completed;
        session.outcome = Some(SessionOutcome::Breached);
        session.winner = Some(winner.clone());
        session.end_time = Some(now);
        Ok(session.clone())
    }

    /// Timeout seal: `Active → Completed` with outcome `Failed` and no
    /// winner. Loses cleanly to a concurrent winner seal.
    pub fn seal_expired(
        &self,
        session_id: &SessionId,
        now: GameTimestamp,
    ) -> Result<GameSession, SessionError> {
        let mut table = self.table();
        let session = table
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound {
                session_id: session_id.clone(),
            })?;
        if !session.is_active() {
            return Err(SessionError::AlreadySealed {
                session_id: session_id.clone(),
                winner: session.winner.clone(),
            });
        }
        session.status = SessionStatus::Completed;
        session.outcome = Some(SessionOutcome::Failed);
        session.end_time = Some(now);
        Ok(session.clone())
    }

    /// Admin rotation: seal the current session if it is still active
    /// (timeout outcome) and provision a fresh one. Returns the superseded
    /// session, if any.
    pub fn rotate_active(
        &self,
        defaults: &SessionDefaults,
        now: GameTimestamp,
    ) -> (Option<GameSession>, GameSession) {
        let mut table = self.table();
        let superseded = match table.current.take() {
            Some(id) => table.sessions.get_mut(&id).map(|session| {
                if session.is_active() {
                    session.status = SessionStatus::Completed;
                    session.outcome = Some(SessionOutcome::Failed);
                    session.end_time = Some(now);
                }
                session.clone()
            }),
            None => None,
        };
        table.created_seq += 1;
        let fresh = new_session(defaults, table.created_seq, now);
        table.current = Some(fresh.session_id.clone());
        table.sessions.insert(fresh.session_id.clone(), fresh.clone());
        (superseded, fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> SessionDefaults {
        SessionDefaults {
            initial_jackpot: 100,
            min_attempts_before_yield: 3,
            attempt_price: 10,
            jackpot_share_pct: 80,
            round_duration_ms: 1_000,
        }
    }

    fn now() -> GameTimestamp {
        GameTimestamp(1_700_000_000_000)
    }

    #[test]
    fn current_or_create_provisions_once() {
        let store = SessionStore::new();
        let (first, created) = store.current_or_create(&defaults(), now());
        assert!(created);
        let (second, created_again) = store.current_or_create(&defaults(), now());
        assert!(!created_again);
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(first.jackpot, 100);
        assert_eq!(first.deadline, GameTimestamp(1_700_000_001_000));
    }

    #[test]
    fn increment_returns_prior_and_new_counts() {
        let store = SessionStore::new();
        let (session, _) = store.current_or_create(&defaults(), now());
        let ticket = store.increment_attempts(&session.session_id).expect("ticket");
        assert_eq!(ticket.prior_attempts, 0);
        assert_eq!(ticket.attempt_number, 1);
        assert_eq!(ticket.jackpot_credit, 8);
        assert_eq!(ticket.jackpot_after, 108);
    }

    #[test]
    fn revert_undoes_counter_and_jackpot() {
        let store = SessionStore::new();
        let (session, _) = store.current_or_create(&defaults(), now());
        let ticket = store.increment_attempts(&session.session_id).expect("ticket");
        store.revert_attempt(&ticket).expect("revert");
        let snapshot = store.get(&session.session_id).expect("session");
        assert_eq!(snapshot.total_attempts, 0);
        assert_eq!(snapshot.jackpot, 100);
    }

    #[test]
    fn seal_is_exactly_once() {
        let store = SessionStore::new();
        let (session, _) = store.current_or_create(&defaults(), now());
        let sealed = store
            .seal_with_winner(&session.session_id, &ActorId::new("alice"), now())
            .expect("seal");
        assert_eq!(sealed.status, SessionStatus::Completed);
        assert_eq!(sealed.outcome, Some(SessionOutcome::Breached));
        assert_eq!(sealed.winner, Some(ActorId::new("alice")));

        let raced = store.seal_with_winner(&session.session_id, &ActorId::new("bob"), now());
        match raced {
            Err(SessionError::AlreadySealed { winner, .. }) => {
                assert_eq!(winner, Some(ActorId::new("alice")));
            }
            other => panic!("expected AlreadySealed, got {other:?}"),
        }
        let snapshot = store.get(&session.session_id).expect("session");
        assert_eq!(snapshot.winner, Some(ActorId::new("alice")));
    }

    #[test]
    fn sealed_session_rejects_new_attempts() {
        let store = SessionStore::new();
        let (session, _) = store.current_or_create(&defaults(), now());
        store
            .seal_with_winner(&session.session_id, &ActorId::new("alice"), now())
            .expect("seal");
        let result = store.increment_attempts(&session.session_id);
        assert!(matches!(result, Err(SessionError::NotActive { .. })));
    }

    #[test]
    fn timeout_seal_records_failed_outcome_without_winner() {
        let store = SessionStore::new();
        let (session, _) = store.current_or_create(&defaults(), now());
        let later = now().saturating_add(2_000);
        assert!(store.get(&session.session_id).expect("s").is_overdue(later));
        let sealed = store.seal_expired(&session.session_id, later).expect("seal");
        assert_eq!(sealed.outcome, Some(SessionOutcome::Failed));
        assert_eq!(sealed.winner, None);
    }

    #[test]
    fn completed_round_stays_current_until_rotation() {
        let store = SessionStore::new();
        let (session, _) = store.current_or_create(&defaults(), now());
        store
            .seal_with_winner(&session.session_id, &ActorId::new("alice"), now())
            .expect("seal");
        assert!(store.active().is_none());
        let current = store.current().expect("current");
        assert_eq!(current.session_id, session.session_id);
        assert_eq!(current.status, SessionStatus::Completed);
        // No auto-provisioning past a decided round.
        let (same, created) = store.current_or_create(&defaults(), now());
        assert!(!created);
        assert_eq!(same.session_id, session.session_id);
    }

    #[test]
    fn rotation_supersedes_active_session() {
        let store = SessionStore::new();
        let (old, _) = store.current_or_create(&defaults(), now());
        let (superseded, fresh) = store.rotate_active(&defaults(), now().saturating_add(10));
        let superseded = superseded.expect("superseded");
        assert_eq!(superseded.session_id, old.session_id);
        assert_eq!(superseded.outcome, Some(SessionOutcome::Failed));
        assert_ne!(fresh.session_id, old.session_id);
        assert_eq!(store.active().expect("active").session_id, fresh.session_id);
    }

    #[test]
    fn session_ids_are_unique_across_rotations() {
        let store = SessionStore::new();
        let (a, _) = store.current_or_create(&defaults(), now());
        let (_, b) = store.rotate_active(&defaults(), now());
        let (_, c) = store.rotate_active(&defaults(), now());
        assert_ne!(a.session_id, b.session_id);
        assert_ne!(b.session_id, c.session_id);
    }
}
