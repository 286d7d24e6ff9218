//! Text-generation oracle boundary and provider routing.
//!
//! Providers are untrusted and possibly unavailable. The router tries them
//! in registration order, except that the last provider to succeed is tried
//! first next time. That preference is a process-wide atomic hint: stale or
//! reset values only change try-order, never correctness. Exhausting every
//! configured provider is terminal for the attempt; a router with no
//! providers at all degrades to a canned simulation rejection.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::attempt_log::Role;

/// Reply produced when no provider is configured.
pub const SIMULATION_REPLY: &str = "Simulation mode: ACCESS DENIED. (No text provider configured.)";

// ---------------------------------------------------------------------------
// CompletionRequest
// ---------------------------------------------------------------------------

/// One conversation turn replayed to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: Role,
    pub content: String,
}

/// Everything a provider needs for one completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub instructions: String,
    pub history: Vec<HistoryTurn>,
    pub user_message: String,
}

// ---------------------------------------------------------------------------
// TextOracle trait
// ---------------------------------------------------------------------------

/// Provider-side failure for one completion call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextOracleError {
    pub detail: String,
}

impl fmt::Display for TextOracleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "text oracle failure: {}", self.detail)
    }
}

impl std::error::Error for TextOracleError {}

/// External text-generation provider. The output is scanned for the win
/// sentinel only; no other structural assumption is made about it.
pub trait TextOracle: Send + Sync {
    fn name(&self) -> &str;
    fn complete(&self, request: &CompletionRequest) -> Result<String, TextOracleError>;
}

// ---------------------------------------------------------------------------
// Completion / RouterError
// ---------------------------------------------------------------------------

/// Successful routing outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    /// Provider that produced the text; `None` in simulation mode.
    pub provider: Option<String>,
    pub text: String,
    pub simulated: bool,
}

/// One provider's failure, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub provider: String,
    pub detail: String,
}

/// Every configured provider failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllProvidersFailed {
    pub failures: Vec<ProviderFailure>,
}

impl fmt::Display for AllProvidersFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "all {} text providers failed", self.failures.len())
    }
}

impl std::error::Error for AllProvidersFailed {}

// ---------------------------------------------------------------------------
// ProviderRouter
// ---------------------------------------------------------------------------

/// Sticky last-good provider router over a fixed registration order.
pub struct ProviderRouter {
    providers: Vec<Box<dyn TextOracle>>,
    preferred: AtomicUsize,
}

impl fmt::Debug for ProviderRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRouter")
            .field("providers", &self.provider_names())
            .field("preferred", &self.preferred.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for ProviderRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            preferred: AtomicUsize::new(0),
        }
    }

    pub fn with_providers(providers: Vec<Box<dyn TextOracle>>) -> Self {
        Self {
            providers,
            preferred: AtomicUsize::new(0),
        }
    }

    pub fn register(&mut self, provider: Box<dyn TextOracle>) {
        self.providers.push(provider);
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Name of the provider currently tried first.
    pub fn preferred_name(&self) -> Option<String> {
        let idx = self.preferred.load(Ordering::Relaxed);
        self.providers
            .get(idx.min(self.providers.len().saturating_sub(1)))
            .map(|p| p.name().to_string())
    }

    /// Route one completion. The preferred slot is read once up front to fix
    /// the try-order for this call; it is updated after a success.
    pub fn complete(&self, request: &CompletionRequest) -> Result<Completion, AllProvidersFailed> {
        if self.providers.is_empty() {
            return Ok(Completion {
                provider: None,
                text: SIMULATION_REPLY.to_string(),
                simulated: true,
            });
        }
        let preferred = self
            .preferred
            .load(Ordering::Relaxed)
            .min(self.providers.len() - 1);
        let mut order = Vec::with_capacity(self.providers.len());
        order.push(preferred);
        order.extend((0..self.providers.len()).filter(|idx| *idx != preferred));

        let mut failures = Vec::new();
        for idx in order {
            let provider = &self.providers[idx];
            match provider.complete(request) {
                Ok(text) => {
                    self.preferred.store(idx, Ordering::Relaxed);
                    return Ok(Completion {
                        provider: Some(provider.name().to_string()),
                        text,
                        simulated: false,
                    });
                }
                Err(error) => failures.push(ProviderFailure {
                    provider: provider.name().to_string(),
                    detail: error.detail,
                }),
            }
        }
        Err(AllProvidersFailed { failures })
    }
}
