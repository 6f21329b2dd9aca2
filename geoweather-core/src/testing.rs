//! In-process providers for resolver and orchestrator tests.

use std::{
    fmt::Debug,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{chain::Provider, error::ProviderError};

#[derive(Debug, Clone)]
pub(crate) enum Script<T> {
    Succeed(T),
    Transport,
    Schema(&'static str),
    /// Never answers; only the timeout ends the call.
    Hang,
}

#[derive(Debug)]
pub(crate) struct FakeProvider<Q, T> {
    name: &'static str,
    script: Script<T>,
    timeout: Duration,
    calls: Arc<AtomicUsize>,
    refine: Option<fn(&mut Q)>,
}

impl<Q, T> FakeProvider<Q, T> {
    pub(crate) fn new(name: &'static str, script: Script<T>) -> Self {
        Self {
            name,
            script,
            timeout: Duration::from_secs(5),
            calls: Arc::new(AtomicUsize::new(0)),
            refine: None,
        }
    }

    pub(crate) fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Mutates the query before the scripted outcome, like a provider that
    /// corrects the city name and then fails its second step.
    pub(crate) fn refining(mut self, refine: fn(&mut Q)) -> Self {
        self.refine = Some(refine);
        self
    }

    pub(crate) fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl<Q, T> Provider<Q, T> for FakeProvider<Q, T>
where
    Q: Send + Debug,
    T: Clone + Send + Sync + Debug,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn invoke(&self, query: &mut Q) -> Result<T, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(refine) = self.refine {
            refine(query);
        }

        match &self.script {
            Script::Succeed(value) => Ok(value.clone()),
            Script::Transport => Err(ProviderError::Transport("connection refused".into())),
            Script::Schema(msg) => Err(ProviderError::schema(*msg)),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ProviderError::Transport("unreachable".into()))
            }
        }
    }
}
