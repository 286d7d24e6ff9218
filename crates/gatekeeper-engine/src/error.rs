//! Request-level error taxonomy.
//!
//! Every failure a caller can observe maps to one variant with a stable
//! snake_case code, so clients can distinguish retryable conditions (oracle
//! outage, cooldown) from terminal ones (bad payment, round over) without
//! parsing messages. Internal race losses (`AlreadySealed`) never surface
//! here; the orchestrator absorbs them into ordinary rejections.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::game_session::ActorId;
use crate::payment_oracle::PaymentRejectReason;

/// Terminal outcome of a rejected engine request.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum EngineError {
    #[error("invalid request field `{field}`: {detail}")]
    InvalidRequest { field: String, detail: String },
    #[error("payment verification failed: {reason}")]
    PaymentRequired { reason: PaymentRejectReason },
    #[error("payment proof already consumed")]
    PaymentReplayed,
    #[error("cooldown active; retry in {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("round already decided; winner {winner}")]
    RoundOver { winner: ActorId },
    #[error("round deadline has passed")]
    RoundExpired,
    #[error("no text provider produced a response; the attempt was not counted")]
    OracleUnavailable,
    #[error("market is not accepting wagers")]
    MarketClosed,
    #[error("actor already holds a wager for this session")]
    DuplicateWager,
    #[error("admin authorization failed")]
    Unauthorized,
}

impl EngineError {
    /// Stable machine-readable code. Codes are permanent once assigned.
    pub fn stable_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request",
            Self::PaymentRequired { .. } => "payment_required",
            Self::PaymentReplayed => "payment_replayed",
            Self::RateLimited { .. } => "rate_limited",
            Self::RoundOver { .. } => "round_over",
            Self::RoundExpired => "round_expired",
            Self::OracleUnavailable => "oracle_unavailable",
            Self::MarketClosed => "market_closed",
            Self::DuplicateWager => "duplicate_wager",
            Self::Unauthorized => "unauthorized",
        }
    }

    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::OracleUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_codes_are_unique() {
        let errors = [
            EngineError::InvalidRequest {
                field: "message".to_string(),
                detail: "empty".to_string(),
            },
            EngineError::PaymentRequired {
                reason: PaymentRejectReason::ProofMissing,
            },
            EngineError::PaymentReplayed,
            EngineError::RateLimited { retry_after_ms: 1 },
            EngineError::RoundOver {
                winner: ActorId::new("wallet-1"),
            },
            EngineError::RoundExpired,
            EngineError::OracleUnavailable,
            EngineError::MarketClosed,
            EngineError::DuplicateWager,
            EngineError::Unauthorized,
        ];
        let mut codes: Vec<&str> = errors.iter().map(EngineError::stable_code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(EngineError::OracleUnavailable.is_retryable());
        assert!(EngineError::RateLimited { retry_after_ms: 10 }.is_retryable());
        assert!(!EngineError::PaymentReplayed.is_retryable());
        assert!(
            !EngineError::RoundOver {
                winner: ActorId::new("w")
            }
            .is_retryable()
        );
    }
}
