//! Ordered provider chains and the shared "first success wins" loop.
//!
//! Location and weather resolution both walk a static, ordered list of
//! providers. Each attempt is bounded by the provider's own timeout and by
//! the request deadline, and is recorded in an [`AttemptTrace`] in call
//! order. A provider that fails is never retried; the loop moves on to the
//! next one.

use std::{fmt::Debug, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::ProviderError;

/// One upstream service able to answer queries of type `Q` with a `T`.
#[async_trait]
pub trait Provider<Q, T>: Send + Sync + Debug
where
    Q: Send,
{
    /// Stable identifier used in traces and logs.
    fn name(&self) -> &'static str;

    /// Human-facing name reported as provenance.
    fn label(&self) -> &'static str {
        self.name()
    }

    fn timeout(&self) -> Duration;

    /// Run the provider. May refine `query` for the providers after it.
    async fn invoke(&self, query: &mut Q) -> Result<T, ProviderError>;
}

/// Statically ordered provider list, built once at startup.
pub type ProviderChain<Q, T> = Vec<Arc<dyn Provider<Q, T>>>;

/// Result of a single provider attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum AttemptOutcome {
    Success,
    Failure { reason: String },
    TimedOut,
}

impl AttemptOutcome {
    pub fn failure(reason: impl Into<String>) -> Self {
        AttemptOutcome::Failure { reason: reason.into() }
    }

    fn from_error(err: &ProviderError) -> Self {
        if err.is_timeout() {
            AttemptOutcome::TimedOut
        } else {
            AttemptOutcome::failure(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attempt {
    pub provider: &'static str,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

/// Attempts in the order they were made. Diagnostic only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AttemptTrace(Vec<Attempt>);

impl AttemptTrace {
    pub fn record(&mut self, provider: &'static str, outcome: AttemptOutcome) {
        self.0.push(Attempt { provider, outcome });
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Attempt> {
        self.0.iter()
    }
}

/// The provider that won a chain, and what it returned.
#[derive(Debug)]
pub struct Win<T> {
    pub value: T,
    pub provider: &'static str,
    pub label: &'static str,
}

/// Try `chain` in order until one provider returns a value accepted by
/// `accept`. Providers after the winner are never called.
///
/// Returns `None` when the chain is exhausted or `deadline` passes first.
pub async fn first_success<Q, T, A>(
    chain: &[Arc<dyn Provider<Q, T>>],
    query: &mut Q,
    deadline: Instant,
    trace: &mut AttemptTrace,
    accept: A,
) -> Option<Win<T>>
where
    Q: Send,
    A: Fn(&T) -> Result<(), ProviderError>,
{
    for provider in chain {
        let now = Instant::now();
        if now >= deadline {
            warn!(provider = provider.name(), "request deadline elapsed, abandoning chain");
            return None;
        }

        let limit = deadline.min(now + provider.timeout());
        debug!(provider = provider.name(), "trying provider");

        // Dropping the future on timeout aborts the in-flight call.
        let result = match tokio::time::timeout_at(limit, provider.invoke(&mut *query)).await {
            Ok(result) => result.and_then(|value| accept(&value).map(|()| value)),
            Err(_) => Err(ProviderError::Timeout),
        };

        match result {
            Ok(value) => {
                trace.record(provider.name(), AttemptOutcome::Success);
                return Some(Win { value, provider: provider.name(), label: provider.label() });
            }
            Err(err) => {
                debug!(provider = provider.name(), error = %err, "provider failed, falling back");
                trace.record(provider.name(), AttemptOutcome::from_error(&err));
            }
        }
    }

    None
}
