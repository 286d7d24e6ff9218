//! Immutable attempt/response ledger and payment-proof replay index.
//!
//! Records are append-only and never mutated after insertion. The log also
//! owns the replay index: a payment proof is claimed atomically before any
//! downstream mutation and the claim can be released again when the attempt
//! is compensated away. Only the sha-256 digest of a proof token is kept,
//! never the raw token.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::game_session::{ActorId, GameTimestamp, SessionId};

const RECORD_ID_DOMAIN: &[u8] = b"GatekeeperEngine.AttemptRecord.v1";
const PROOF_DIGEST_DOMAIN: &[u8] = b"GatekeeperEngine.PaymentProof.v1";

// ---------------------------------------------------------------------------
// Role / AttemptRecord
// ---------------------------------------------------------------------------

/// Who authored a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Ai,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Ai => f.write_str("ai"),
        }
    }
}

/// One immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub record_id: String,
    pub session_id: SessionId,
    pub actor: ActorId,
    pub role: Role,
    pub content: String,
    /// Hex digest of the payment proof backing this attempt, if any.
    pub proof_digest: Option<String>,
    pub is_winner: bool,
    pub created_at: GameTimestamp,
}

// ---------------------------------------------------------------------------
// LogError
// ---------------------------------------------------------------------------

/// Typed failures from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogError {
    /// The payment proof was already consumed by a counted attempt.
    ProofReplayed,
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProofReplayed => f.write_str("payment proof already consumed"),
        }
    }
}

impl std::error::Error for LogError {}

// ---------------------------------------------------------------------------
// AttemptLog
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LogTable {
    records: Vec<AttemptRecord>,
    consumed_proofs: BTreeSet<String>,
    appended_seq: u64,
}

/// Mutex-guarded append-only ledger plus replay index.
#[derive(Debug)]
pub struct AttemptLog {
    max_content_chars: usize,
    inner: Mutex<LogTable>,
}

fn hex_of(bytes: &[u8], take: usize) -> String {
    let mut out = String::with_capacity(take * 2);
    for byte in bytes.iter().take(take) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Domain-separated digest of a raw proof token.
pub fn proof_digest(proof: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(PROOF_DIGEST_DOMAIN);
    hasher.update(proof.as_bytes());
    hex_of(&hasher.finalize(), 32)
}

fn truncate_chars(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => content[..cut].to_string(),
        None => content.to_string(),
    }
}

impl AttemptLog {
    pub fn new(max_content_chars: usize) -> Self {
        Self {
            max_content_chars,
            inner: Mutex::new(LogTable::default()),
        }
    }

    fn table(&self) -> std::sync::MutexGuard<'_, LogTable> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically claim a payment proof. The first claimant wins; everyone
    /// else observes `ProofReplayed`. Returns the digest used in the index.
    pub fn claim_proof(&self, proof: &str) -> Result<String, LogError> {
        let digest = proof_digest(proof);
        let mut table = self.table();
        if !table.consumed_proofs.insert(digest.clone()) {
            return Err(LogError::ProofReplayed);
        }
        Ok(digest)
    }

    /// Release a claim made by `claim_proof`. Used by the compensation path:
    /// an attempt that never counted must leave its proof spendable.
    pub fn release_proof(&self, digest: &str) {
        self.table().consumed_proofs.remove(digest);
    }

    /// Whether a proof has been consumed.
    pub fn proof_consumed(&self, proof: &str) -> bool {
        self.table().consumed_proofs.contains(&proof_digest(proof))
    }

    /// Append one record. Content beyond the configured bound is truncated.
    pub fn append(
        &self,
        session_id: &SessionId,
        actor: &ActorId,
        role: Role,
        content: &str,
        proof_digest: Option<String>,
        is_winner: bool,
        created_at: GameTimestamp,
    ) -> AttemptRecord {
        let mut table = self.table();
        table.appended_seq += 1;
        let mut hasher = Sha256::new();
        hasher.update(RECORD_ID_DOMAIN);
        hasher.update(table.appended_seq.to_be_bytes());
        hasher.update(actor.as_str().as_bytes());
        let record = AttemptRecord {
            record_id: format!("record-{}", hex_of(&hasher.finalize(), 8)),
            session_id: session_id.clone(),
            actor: actor.clone(),
            role,
            content: truncate_chars(content, self.max_content_chars),
            proof_digest,
            is_winner,
            created_at,
        };
        table.records.push(record.clone());
        record
    }

    /// Bounded conversation context for one actor in one session, oldest
    /// first, at most `limit` most-recent records.
    pub fn recent_history(
        &self,
        session_id: &SessionId,
        actor: &ActorId,
        limit: usize,
    ) -> Vec<AttemptRecord> {
        let table = self.table();
        let mut recent: Vec<AttemptRecord> = table
            .records
            .iter()
            .rev()
            .filter(|record| &record.session_id == session_id && &record.actor == actor)
            .take(limit)
            .cloned()
            .collect();
        recent.reverse();
        recent
    }

    /// Public activity feed, newest first.
    pub fn recent_feed(&self, limit: usize) -> Vec<AttemptRecord> {
        let table = self.table();
        table.records.iter().rev().take(limit).cloned().collect()
    }
}
