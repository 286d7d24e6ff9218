//! End-to-end attempt and wager orchestration.
//!
//! `GameEngine` owns every store and sequences one attempt: admission →
//! payment → session → gate → oracle → arbitration → seal/settle →
//! ledger → broadcast. Concurrency safety comes from the stores' own
//! critical sections; the engine holds no lock across an oracle call.
//!
//! Compensation: an attempt whose oracle call produced no judgement is
//! reverted (counter, jackpot credit, and payment-proof claim) and
//! reported as retryable. A win claim that loses the sealing race is
//! absorbed into an ordinary rejection; the caller never sees the race.

use serde::{Deserialize, Serialize};

use crate::attempt_gate::{decide_mode, instruction_block, interpret_response, RACED_REJECTION_REPLY};
use crate::attempt_log::{proof_digest, AttemptLog, AttemptRecord, LogError, Role};
use crate::broadcast::{
    rfc3339_from_millis, EngineEvent, EventSink, FeedEvent, MarketEvent, StatsEvent,
};
use crate::config::{EngineConfig, SessionDefaults};
use crate::cooldown::CooldownLimiter;
use crate::error::EngineError;
use crate::game_session::{
    ActorId, GameSession, GameTimestamp, SessionId, SessionOutcome, SessionStats, SessionStore,
};
use crate::parimutuel::{MarketBook, MarketError, MarketQuote, MarketSettlement, Wager, WagerSide};
use crate::payment_oracle::{
    verify_with_retry, PaymentContext, PaymentPurpose, PaymentRejectReason, PaymentVerdict,
    PaymentVerifier,
};
use crate::text_oracle::{CompletionRequest, HistoryTurn, ProviderRouter};

const COMPONENT: &str = "game_engine";
const MAX_ACTOR_CHARS: usize = 128;
const WAGER_QUERY_LIMIT: usize = 20;

// ---------------------------------------------------------------------------
// Requests and replies
// ---------------------------------------------------------------------------

/// One incoming chat attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRequest {
    pub actor: ActorId,
    pub message: String,
    pub payment_proof: Option<String>,
    pub submitted_at: GameTimestamp,
}

/// Outcome of a processed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptReply {
    pub session_id: SessionId,
    pub reply: String,
    pub is_winner: bool,
    pub attempt_number: u64,
    pub jackpot: u64,
    /// Vault secret, revealed to the winning actor only.
    pub revealed_secret: Option<String>,
    /// Provider that produced the response; `None` in simulation mode.
    pub provider: Option<String>,
}

/// One incoming wager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WagerRequest {
    pub actor: ActorId,
    pub side: WagerSide,
    pub amount: u64,
    pub payment_proof: Option<String>,
    pub submitted_at: GameTimestamp,
}

/// Placed wager plus the post-placement quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WagerReceipt {
    pub wager: Wager,
    pub quote: MarketQuote,
}

/// Admin request to supersede the current round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSessionRequest {
    pub admin_secret: String,
    /// Session parameters for the fresh round; engine defaults when absent.
    pub defaults: Option<SessionDefaults>,
    pub submitted_at: GameTimestamp,
}

// ---------------------------------------------------------------------------
// GameEngine
// ---------------------------------------------------------------------------

/// Facade over the session store, wager book, ledger, limiter, and the two
/// external oracles. Safe to share across request threads.
pub struct GameEngine {
    config: EngineConfig,
    sessions: SessionStore,
    market: MarketBook,
    ledger: AttemptLog,
    cooldown: CooldownLimiter,
    router: ProviderRouter,
    payments: Box<dyn PaymentVerifier>,
    sink: Box<dyn EventSink>,
}

impl GameEngine {
    pub fn new(
        config: EngineConfig,
        router: ProviderRouter,
        payments: Box<dyn PaymentVerifier>,
        sink: Box<dyn EventSink>,
    ) -> Self {
        let market = MarketBook::new(config.market.clone());
        let ledger = AttemptLog::new(config.max_message_chars);
        let cooldown = CooldownLimiter::new(config.cooldown_window_ms);
        Self {
            config,
            sessions: SessionStore::new(),
            market,
            ledger,
            cooldown,
            router,
            payments,
            sink,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -- queries ------------------------------------------------------------

    /// Stats for the current round, provisioning one on first call.
    pub fn session_stats(&self, now: GameTimestamp) -> SessionStats {
        let (session, created) = self.sessions.current_or_create(&self.config.session, now);
        if created {
            self.log_session_created(&session, now);
        }
        session.stats()
    }

    /// Live market quote; idle defaults when no round is accepting wagers.
    pub fn market_quote(&self) -> MarketQuote {
        match self.sessions.active() {
            Some(session) => self.market.quote(&session.session_id),
            None => MarketQuote::idle(),
        }
    }

    /// Public activity feed, newest first.
    pub fn recent_feed(&self) -> Vec<AttemptRecord> {
        self.ledger.recent_feed(self.config.feed_limit)
    }

    /// Most recent wagers for one actor, newest first.
    pub fn wagers_for_actor(&self, actor: &ActorId) -> Vec<Wager> {
        self.market.wagers_for_actor(actor, WAGER_QUERY_LIMIT)
    }

    // -- attempt path -------------------------------------------------------

    /// Process one attempt end-to-end.
    pub fn handle_attempt(&self, request: AttemptRequest) -> Result<AttemptReply, EngineError> {
        let now = request.submitted_at;
        validate_actor(&request.actor)?;
        let message = request.message.trim();
        if message.is_empty() {
            return Err(EngineError::InvalidRequest {
                field: "message".to_string(),
                detail: "must not be empty".to_string(),
            });
        }
        if message.chars().count() > self.config.max_message_chars {
            return Err(EngineError::InvalidRequest {
                field: "message".to_string(),
                detail: format!("exceeds {} characters", self.config.max_message_chars),
            });
        }
        self.cooldown
            .check_and_record(&request.actor, now)
            .map_err(|violation| EngineError::RateLimited {
                retry_after_ms: violation.retry_after_ms,
            })?;

        let (session, created) = self.sessions.current_or_create(&self.config.session, now);
        if created {
            self.log_session_created(&session, now);
        }

        let proof = required_proof(request.payment_proof.as_deref())?;
        self.verify_payment(
            proof,
            &request.actor,
            PaymentPurpose::AttemptFee,
            session.attempt_price,
            Some(&session.session_id),
        )?;
        let claimed_digest = self.claim_proof(proof)?;

        if !session.is_active() {
            self.release_claim(&claimed_digest);
            return Err(round_closed_error(&session));
        }
        if session.is_overdue(now) {
            self.expire_session(&session.session_id, now);
            self.release_claim(&claimed_digest);
            return Err(EngineError::RoundExpired);
        }

        let ticket = match self.sessions.increment_attempts(&session.session_id) {
            Ok(ticket) => ticket,
            Err(_) => {
                // Sealed between the status check and the increment.
                self.release_claim(&claimed_digest);
                let current = self.sessions.get(&session.session_id).unwrap_or(session);
                return Err(round_closed_error(&current));
            }
        };

        let mode = decide_mode(ticket.prior_attempts, session.min_attempts_before_yield);
        let history = self
            .ledger
            .recent_history(&session.session_id, &request.actor, self.config.history_limit)
            .into_iter()
            .map(|record| HistoryTurn {
                role: record.role,
                content: record.content,
            })
            .collect();
        let completion_request = CompletionRequest {
            instructions: instruction_block(mode),
            history,
            user_message: message.to_string(),
        };

        let completion = match self.router.complete(&completion_request) {
            Ok(completion) => completion,
            Err(failure) => {
                // No judgement was rendered: the attempt must not count.
                let _ = self.sessions.revert_attempt(&ticket);
                self.release_claim(&claimed_digest);
                self.sink.publish(EngineEvent::log(
                    COMPONENT,
                    "attempt_compensated",
                    "oracle_unavailable",
                    Some(EngineError::OracleUnavailable.stable_code()),
                    Some(&session.session_id),
                    Some(&request.actor),
                    Some(failure.to_string()),
                    now,
                ));
                return Err(EngineError::OracleUnavailable);
            }
        };

        let interpreted = interpret_response(&completion.text, mode);
        let mut is_winner = false;
        let mut revealed_secret = None;
        let reply = if interpreted.is_win() {
            match self
                .sessions
                .seal_with_winner(&session.session_id, &request.actor, now)
            {
                Ok(sealed) => {
                    is_winner = true;
                    if !self.config.vault_secret.is_empty() {
                        revealed_secret = Some(self.config.vault_secret.clone());
                    }
                    self.sink.publish(EngineEvent::log(
                        COMPONENT,
                        "session_sealed",
                        "breached",
                        None,
                        Some(&sealed.session_id),
                        Some(&request.actor),
                        None,
                        now,
                    ));
                    let settlement = self
                        .market
                        .resolve(&session.session_id, SessionOutcome::Breached);
                    self.publish_resolution(&settlement, now);
                    interpreted.reply().to_string()
                }
                Err(_) => {
                    // Someone else won first; this stays a counted rejection.
                    self.sink.publish(EngineEvent::log(
                        COMPONENT,
                        "seal_race_lost",
                        "absorbed",
                        None,
                        Some(&session.session_id),
                        Some(&request.actor),
                        None,
                        now,
                    ));
                    RACED_REJECTION_REPLY.to_string()
                }
            }
        } else {
            interpreted.reply().to_string()
        };

        self.ledger.append(
            &session.session_id,
            &request.actor,
            Role::User,
            message,
            Some(claimed_digest),
            false,
            now,
        );
        self.ledger.append(
            &session.session_id,
            &request.actor,
            Role::Ai,
            &reply,
            None,
            is_winner,
            now,
        );

        let stats = self
            .sessions
            .get(&session.session_id)
            .map(|s| s.stats())
            .unwrap_or_else(|| session.stats());
        self.sink.publish(EngineEvent::Feed(FeedEvent {
            session_id: session.session_id.clone(),
            actor: request.actor.clone(),
            user_message: message.to_string(),
            reply: reply.clone(),
            is_winner,
            timestamp_ms: now.millis(),
            timestamp_rfc3339: rfc3339_from_millis(now.millis()),
        }));
        self.sink.publish(EngineEvent::Stats(StatsEvent {
            stats: stats.clone(),
            timestamp_ms: now.millis(),
            timestamp_rfc3339: rfc3339_from_millis(now.millis()),
        }));

        Ok(AttemptReply {
            session_id: session.session_id,
            reply,
            is_winner,
            attempt_number: ticket.attempt_number,
            jackpot: stats.jackpot,
            revealed_secret,
            provider: completion.provider,
        })
    }

    // -- wager path ---------------------------------------------------------

    /// Place one wager against the active round.
    pub fn place_wager(&self, request: WagerRequest) -> Result<WagerReceipt, EngineError> {
        let now = request.submitted_at;
        validate_actor(&request.actor)?;
        if request.amount == 0 {
            return Err(EngineError::InvalidRequest {
                field: "amount".to_string(),
                detail: "must be positive".to_string(),
            });
        }
        let proof = required_proof(request.payment_proof.as_deref())?;
        let session = self.sessions.active().ok_or(EngineError::MarketClosed)?;
        if session.is_overdue(now) {
            self.expire_session(&session.session_id, now);
            return Err(EngineError::RoundExpired);
        }
        self.verify_payment(
            proof,
            &request.actor,
            PaymentPurpose::WagerStake,
            request.amount,
            Some(&session.session_id),
        )?;

        let (wager, quote) = self
            .market
            .place_wager(
                &session.session_id,
                &request.actor,
                request.side,
                request.amount,
                now,
            )
            .map_err(|error| match error {
                MarketError::ZeroAmount => EngineError::InvalidRequest {
                    field: "amount".to_string(),
                    detail: "must be positive".to_string(),
                },
                MarketError::Closed { .. } => EngineError::MarketClosed,
                MarketError::DuplicateWager { .. } => EngineError::DuplicateWager,
            })?;

        self.sink.publish(EngineEvent::Market(MarketEvent::WagerPlaced {
            session_id: session.session_id.clone(),
            actor: request.actor.clone(),
            side: wager.side,
            amount: wager.amount,
            locked_multiplier_hundredths: wager.multiplier_hundredths,
            quote: quote.clone(),
            timestamp_ms: now.millis(),
            timestamp_rfc3339: rfc3339_from_millis(now.millis()),
        }));

        Ok(WagerReceipt { wager, quote })
    }

    // -- admin path ---------------------------------------------------------

    /// Supersede the current round with a fresh one. Authorization runs
    /// before any state mutation; an empty configured secret disables the
    /// surface entirely.
    pub fn register_session(
        &self,
        request: RegisterSessionRequest,
    ) -> Result<SessionStats, EngineError> {
        if self.config.admin_secret.is_empty()
            || request.admin_secret != self.config.admin_secret
        {
            return Err(EngineError::Unauthorized);
        }
        let now = request.submitted_at;
        let defaults = request.defaults.unwrap_or_else(|| self.config.session.clone());
        let (superseded, fresh) = self.sessions.rotate_active(&defaults, now);
        if let Some(old) = superseded {
            let settlement = self.market.resolve(&old.session_id, SessionOutcome::Failed);
            self.publish_resolution(&settlement, now);
        }
        self.sink.publish(EngineEvent::log(
            COMPONENT,
            "session_rotated",
            "ok",
            None,
            Some(&fresh.session_id),
            None,
            None,
            now,
        ));
        self.sink.publish(EngineEvent::Stats(StatsEvent {
            stats: fresh.stats(),
            timestamp_ms: now.millis(),
            timestamp_rfc3339: rfc3339_from_millis(now.millis()),
        }));
        Ok(fresh.stats())
    }

    // -- internals ----------------------------------------------------------

    fn verify_payment(
        &self,
        proof: &str,
        actor: &ActorId,
        purpose: PaymentPurpose,
        expected_amount: u64,
        session_id: Option<&SessionId>,
    ) -> Result<(), EngineError> {
        let context = PaymentContext {
            purpose,
            expected_amount,
            session_id: session_id.cloned(),
        };
        match verify_with_retry(
            self.payments.as_ref(),
            &self.config.payment_retry,
            proof,
            actor,
            &context,
        ) {
            Ok(PaymentVerdict::Approved) => Ok(()),
            Ok(PaymentVerdict::Rejected { reason }) => {
                Err(EngineError::PaymentRequired { reason })
            }
            Err(_) => Err(EngineError::PaymentRequired {
                reason: PaymentRejectReason::VerificationUnavailable,
            }),
        }
    }

    /// Claim the proof in the replay index, or just digest it when replay
    /// protection is off.
    fn claim_proof(&self, proof: &str) -> Result<String, EngineError> {
        if !self.config.replay_protection {
            return Ok(proof_digest(proof));
        }
        self.ledger.claim_proof(proof).map_err(|error| match error {
            LogError::ProofReplayed => EngineError::PaymentReplayed,
        })
    }

    fn release_claim(&self, digest: &str) {
        if self.config.replay_protection {
            self.ledger.release_proof(digest);
        }
    }

    /// Timeout path: seal the round as failed and settle the market. Loses
    /// cleanly if a winner sealed concurrently.
    fn expire_session(&self, session_id: &SessionId, now: GameTimestamp) {
        if let Ok(expired) = self.sessions.seal_expired(session_id, now) {
            self.sink.publish(EngineEvent::log(
                COMPONENT,
                "session_expired",
                "failed",
                None,
                Some(session_id),
                None,
                None,
                now,
            ));
            let settlement = self.market.resolve(session_id, SessionOutcome::Failed);
            self.publish_resolution(&settlement, now);
            self.sink.publish(EngineEvent::Stats(StatsEvent {
                stats: expired.stats(),
                timestamp_ms: now.millis(),
                timestamp_rfc3339: rfc3339_from_millis(now.millis()),
            }));
        }
    }

    fn publish_resolution(&self, settlement: &MarketSettlement, now: GameTimestamp) {
        self.sink.publish(EngineEvent::Market(MarketEvent::Resolved {
            session_id: settlement.session_id.clone(),
            outcome: settlement.outcome,
            total_pool: settlement.total_pool,
            paid_out: settlement.paid_out,
            wager_count: settlement.wager_count,
            timestamp_ms: now.millis(),
            timestamp_rfc3339: rfc3339_from_millis(now.millis()),
        }));
    }

    fn log_session_created(&self, session: &GameSession, now: GameTimestamp) {
        self.sink.publish(EngineEvent::log(
            COMPONENT,
            "session_created",
            "ok",
            None,
            Some(&session.session_id),
            None,
            None,
            now,
        ));
    }
}

fn validate_actor(actor: &ActorId) -> Result<(), EngineError> {
    let raw = actor.as_str().trim();
    if raw.is_empty() {
        return Err(EngineError::InvalidRequest {
            field: "actor".to_string(),
            detail: "must not be empty".to_string(),
        });
    }
    if raw.chars().count() > MAX_ACTOR_CHARS {
        return Err(EngineError::InvalidRequest {
            field: "actor".to_string(),
            detail: format!("exceeds {MAX_ACTOR_CHARS} characters"),
        });
    }
    Ok(())
}

fn required_proof(proof: Option<&str>) -> Result<&str, EngineError> {
    match proof {
        Some(raw) if !raw.trim().is_empty() => Ok(raw),
        _ => Err(EngineError::PaymentRequired {
            reason: PaymentRejectReason::ProofMissing,
        }),
    }
}

fn round_closed_error(session: &GameSession) -> EngineError {
    match &session.winner {
        Some(winner) => EngineError::RoundOver {
            winner: winner.clone(),
        },
        None => EngineError::RoundExpired,
    }
}
