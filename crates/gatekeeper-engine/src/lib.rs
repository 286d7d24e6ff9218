#![forbid(unsafe_code)]

//! Gated-release arbitration and parimutuel settlement engine.
//!
//! A guarded persona protects a vault secret; challengers pay per attempt
//! and observers bet on the outcome. This crate is the part where money can
//! be lost to a race: it decides, under concurrent access, whether a win
//! claim is honored exactly once per round, and settles a two-sided
//! parimutuel market with odds locked at placement time.
//!
//! - `game_session`: round state, fetch-and-add attempt admission, and the
//!   exactly-once winner seal
//! - `attempt_gate`: forced-rejection gating and sentinel arbitration of
//!   untrusted oracle output
//! - `parimutuel`: pool accounting, locked multipliers, idempotent
//!   settlement
//! - `orchestrator`: the end-to-end attempt/wager/admin sequencing with a
//!   compensating revert when no oracle judgement was rendered
//!
//! External collaborators (the text-generation oracle, the payment-proof
//! verifier, and the broadcast channel) are trait boundaries; nothing here
//! performs network I/O.

pub mod attempt_gate;
pub mod attempt_log;
pub mod broadcast;
pub mod config;
pub mod cooldown;
pub mod error;
pub mod game_session;
pub mod orchestrator;
pub mod parimutuel;
pub mod payment_oracle;
pub mod text_oracle;

pub use config::EngineConfig;
pub use error::EngineError;
pub use orchestrator::GameEngine;
