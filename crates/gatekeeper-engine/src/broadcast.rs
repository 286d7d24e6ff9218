//! Observer broadcast channel.
//!
//! After each processed attempt the orchestrator publishes serializable
//! events through one sink: feed events (new exchanges), stats updates
//! (session counters), market events (placement/resolution), and structured
//! log events carrying component/event/outcome/error-code fields. Consumers
//! are out of scope; `RecordingSink` captures everything for tests.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::game_session::{ActorId, GameTimestamp, SessionId, SessionOutcome, SessionStats};
use crate::parimutuel::{MarketQuote, WagerSide};

/// RFC3339 UTC rendering of a unix-millisecond instant, for human-facing
/// payloads. Out-of-range values render the epoch.
pub fn rfc3339_from_millis(ms: u64) -> String {
    let instant = i64::try_from(ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ---------------------------------------------------------------------------
// Event payloads
// ---------------------------------------------------------------------------

/// One completed exchange, for the public activity feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEvent {
    pub session_id: SessionId,
    pub actor: ActorId,
    pub user_message: String,
    pub reply: String,
    pub is_winner: bool,
    pub timestamp_ms: u64,
    pub timestamp_rfc3339: String,
}

/// Session counter snapshot pushed after every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsEvent {
    pub stats: SessionStats,
    pub timestamp_ms: u64,
    pub timestamp_rfc3339: String,
}

/// Market activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MarketEvent {
    WagerPlaced {
        session_id: SessionId,
        actor: ActorId,
        side: WagerSide,
        amount: u64,
        locked_multiplier_hundredths: u64,
        quote: MarketQuote,
        timestamp_ms: u64,
        timestamp_rfc3339: String,
    },
    Resolved {
        session_id: SessionId,
        outcome: SessionOutcome,
        total_pool: u64,
        paid_out: u64,
        wager_count: usize,
        timestamp_ms: u64,
        timestamp_rfc3339: String,
    },
}

/// Structured log event. Logged as data; no global logger facade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub component: String,
    pub event: String,
    pub outcome: String,
    pub error_code: Option<String>,
    pub session_id: Option<SessionId>,
    pub actor: Option<ActorId>,
    pub detail: Option<String>,
    pub timestamp_ms: u64,
}

/// Everything the engine can publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    Feed(FeedEvent),
    Stats(StatsEvent),
    Market(MarketEvent),
    Log(LogEvent),
}

impl EngineEvent {
    /// Canonical JSON payload for transports and log pipelines.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn log(
        component: &str,
        event: &str,
        outcome: &str,
        error_code: Option<&str>,
        session_id: Option<&SessionId>,
        actor: Option<&ActorId>,
        detail: Option<String>,
        now: GameTimestamp,
    ) -> Self {
        Self::Log(LogEvent {
            component: component.to_string(),
            event: event.to_string(),
            outcome: outcome.to_string(),
            error_code: error_code.map(str::to_string),
            session_id: session_id.cloned(),
            actor: actor.cloned(),
            detail,
            timestamp_ms: now.millis(),
        })
    }
}

// ---------------------------------------------------------------------------
// EventSink
// ---------------------------------------------------------------------------

/// Publish boundary for observers.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: EngineEvent);
}

/// Sink that drops everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: EngineEvent) {}
}

/// Sink that records every event, for tests and local inspection.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<EngineEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: EngineEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_rendering_is_utc_millis() {
        assert_eq!(rfc3339_from_millis(0), "1970-01-01T00:00:00.000Z");
        assert_eq!(
            rfc3339_from_millis(1_700_000_000_123),
            "2023-11-14T22:13:20.123Z"
        );
    }

    #[test]
    fn events_serialize_with_type_tags() {
        let event = EngineEvent::log(
            "game_engine",
            "session_created",
            "ok",
            None,
            None,
            None,
            None,
            GameTimestamp(5),
        );
        let json = event.to_json();
        assert!(json.contains("\"type\":\"log\""));
        assert!(json.contains("\"event\":\"session_created\""));
    }

    #[test]
    fn recording_sink_captures_in_order() {
        let sink = RecordingSink::new();
        sink.publish(EngineEvent::log(
            "a",
            "first",
            "ok",
            None,
            None,
            None,
            None,
            GameTimestamp(1),
        ));
        sink.publish(EngineEvent::log(
            "a",
            "second",
            "ok",
            None,
            None,
            None,
            None,
            GameTimestamp(2),
        ));
        let events = sink.snapshot();
        assert_eq!(events.len(), 2);
        match &events[0] {
            EngineEvent::Log(log) => assert_eq!(log.event, "first"),
            other => panic!("expected log event, got {other:?}"),
        }
    }
}
