use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Once},
    time::Duration,
};

use async_trait::async_trait;
use tracing::subscriber::set_global_default;
use tracing_log::LogTracer;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

use crate::{
    endpoint::Endpoint,
    probe::{ProbeReply, ServerProbe},
};

static TRACING: Once = Once::new();

/// Installs a subscriber once per test binary. `RUST_LOG` overrides the default filter.
pub(crate) fn init_tracing() {
    TRACING.call_once(|| {
        let _ = LogTracer::init();
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let subscriber = Registry::default()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_test_writer());
        let _ = set_global_default(subscriber);
    });
}

pub(crate) fn ep(host: &str) -> Endpoint {
    Endpoint::new(host, 27017)
}

#[derive(Debug, Clone)]
pub(crate) enum ProbeBehavior {
    Reply(ProbeReply),
    Fail(String),
    /// Never answers; only the probe timeout or cancellation ends the call.
    Hang,
}

/// In-memory probe whose answers can be changed while a cluster is running.
#[derive(Debug, Default)]
pub(crate) struct ScriptedProbe {
    behaviors: Mutex<HashMap<Endpoint, ProbeBehavior>>,
    calls: Mutex<HashMap<Endpoint, usize>>,
}

impl ScriptedProbe {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn set(&self, endpoint: &Endpoint, behavior: ProbeBehavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(endpoint.clone(), behavior);
    }

    pub(crate) fn reply(&self, host: &str, reply: ProbeReply) {
        self.set(&ep(host), ProbeBehavior::Reply(reply));
    }

    pub(crate) fn fail(&self, host: &str) {
        self.set(&ep(host), ProbeBehavior::Fail("connection refused".to_string()));
    }

    pub(crate) fn calls(&self, endpoint: &Endpoint) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(endpoint)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ServerProbe for ScriptedProbe {
    async fn probe(&self, endpoint: &Endpoint, _timeout: Duration) -> anyhow::Result<ProbeReply> {
        *self.calls.lock().unwrap().entry(endpoint.clone()).or_default() += 1;
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(endpoint)
            .cloned()
            .unwrap_or_else(|| ProbeBehavior::Fail("no route to host".to_string()));

        match behavior {
            ProbeBehavior::Reply(reply) => Ok(reply),
            ProbeBehavior::Fail(message) => Err(anyhow::anyhow!(message)),
            ProbeBehavior::Hang => std::future::pending().await,
        }
    }
}
