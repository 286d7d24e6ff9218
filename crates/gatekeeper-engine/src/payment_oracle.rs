//! Payment-proof verification boundary.
//!
//! The verifier is an external oracle confirming that a claimed payment
//! proof is valid and attributable to the claimed actor: confirmed, signed
//! by the actor, and covering the expected amount. Transport failures are
//! retried a bounded number of times with fixed backoff, then the attempt
//! fails closed.

use std::fmt;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::game_session::{ActorId, SessionId};

// ---------------------------------------------------------------------------
// PaymentContext
// ---------------------------------------------------------------------------

/// What the payment is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentPurpose {
    AttemptFee,
    WagerStake,
}

impl fmt::Display for PaymentPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AttemptFee => f.write_str("attempt_fee"),
            Self::WagerStake => f.write_str("wager_stake"),
        }
    }
}

/// Context handed to the verifier alongside the proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentContext {
    pub purpose: PaymentPurpose,
    pub expected_amount: u64,
    pub session_id: Option<SessionId>,
}

// ---------------------------------------------------------------------------
// Verdict / reasons
// ---------------------------------------------------------------------------

/// Why a proof was rejected. `VerificationUnavailable` is the fail-closed
/// mapping when the oracle itself could not be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentRejectReason {
    ProofMissing,
    ProofMalformed,
    TransactionNotFound,
    NotConfirmed,
    WrongSigner,
    InsufficientAmount,
    VerificationUnavailable,
    Other(String),
}

impl fmt::Display for PaymentRejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProofMissing => f.write_str("proof_missing"),
            Self::ProofMalformed => f.write_str("proof_malformed"),
            Self::TransactionNotFound => f.write_str("transaction_not_found"),
            Self::NotConfirmed => f.write_str("not_confirmed"),
            Self::WrongSigner => f.write_str("wrong_signer"),
            Self::InsufficientAmount => f.write_str("insufficient_amount"),
            Self::VerificationUnavailable => f.write_str("verification_unavailable"),
            Self::Other(detail) => write!(f, "other:{detail}"),
        }
    }
}

/// Verifier decision for one proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentVerdict {
    Approved,
    Rejected { reason: PaymentRejectReason },
}

impl PaymentVerdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

/// Transport-level failure reaching the oracle; eligible for retry.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum PaymentOracleError {
    #[error("payment oracle unavailable: {detail}")]
    Unavailable { detail: String },
}

/// External payment verifier.
pub trait PaymentVerifier: Send + Sync {
    fn verify(
        &self,
        proof: &str,
        claimed_actor: &ActorId,
        context: &PaymentContext,
    ) -> Result<PaymentVerdict, PaymentOracleError>;
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Bounded fixed-backoff retry for transport failures only; verdicts are
/// never retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for PaymentRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 250,
        }
    }
}

/// Run the verifier under the retry policy. Exhausting every attempt yields
/// the last transport error; the caller fails closed on it.
pub fn verify_with_retry(
    verifier: &dyn PaymentVerifier,
    policy: &PaymentRetryPolicy,
    proof: &str,
    claimed_actor: &ActorId,
    context: &PaymentContext,
) -> Result<PaymentVerdict, PaymentOracleError> {
    let attempts = policy.max_attempts.max(1);
    let mut last_error = None;
    for attempt in 1..=attempts {
        match verifier.verify(proof, claimed_actor, context) {
            Ok(verdict) => return Ok(verdict),
            Err(error) => {
                last_error = Some(error);
                if attempt < attempts && policy.backoff_ms > 0 {
                    thread::sleep(Duration::from_millis(policy.backoff_ms));
                }
            }
        }
    }
    Err(last_error.unwrap_or(PaymentOracleError::Unavailable {
        detail: "verifier returned no result".to_string(),
    }))
}
