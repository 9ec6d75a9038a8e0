//! Boundary to the protocol layer that actually talks to a node.
//!
//! The cluster never opens connections itself. A [`ServerProbe`] performs one round trip
//! (a heartbeat command, a streamed response, or a test double) and reports what the
//! node said about itself. The monitor times the call and folds failures into a
//! [`ServerDescription`](crate::server_description::ServerDescription).

use std::time::Duration;

use async_trait::async_trait;

use crate::{
    endpoint::Endpoint,
    server_description::{ServerRole, TagSet},
};

/// Status a node reported in answer to a probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReply {
    pub role: ServerRole,
    pub set_name: Option<String>,
    pub set_version: Option<i32>,
    pub election_id: Option<u64>,
    pub tags: TagSet,
    /// Replica-set members listed in the node's configuration.
    pub hosts: Vec<Endpoint>,
}

impl ProbeReply {
    pub fn new(role: ServerRole) -> Self {
        Self {
            role,
            ..Default::default()
        }
    }

    pub fn standalone() -> Self {
        Self::new(ServerRole::Standalone)
    }

    pub fn shard_router() -> Self {
        Self::new(ServerRole::ShardRouter)
    }

    pub fn primary(set_name: &str) -> Self {
        Self::new(ServerRole::ReplicaSetPrimary).with_set_name(set_name)
    }

    pub fn secondary(set_name: &str) -> Self {
        Self::new(ServerRole::ReplicaSetSecondary).with_set_name(set_name)
    }

    pub fn arbiter(set_name: &str) -> Self {
        Self::new(ServerRole::ReplicaSetArbiter).with_set_name(set_name)
    }

    pub fn with_set_name(mut self, set_name: &str) -> Self {
        self.set_name = Some(set_name.to_string());
        self
    }

    pub fn with_set_version(mut self, set_version: i32) -> Self {
        self.set_version = Some(set_version);
        self
    }

    pub fn with_election_id(mut self, election_id: u64) -> Self {
        self.election_id = Some(election_id);
        self
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_hosts<I>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = Endpoint>,
    {
        self.hosts = hosts.into_iter().collect();
        self
    }
}

/// One health/status round trip against a node.
///
/// Implementations should give up on their own after `timeout`; the monitor also enforces
/// it from the outside and drops the future when the cluster shuts down.
#[async_trait]
pub trait ServerProbe: Send + Sync + 'static {
    async fn probe(&self, endpoint: &Endpoint, timeout: Duration) -> anyhow::Result<ProbeReply>;
}

#[async_trait]
impl<P: ServerProbe + ?Sized> ServerProbe for std::sync::Arc<P> {
    async fn probe(&self, endpoint: &Endpoint, timeout: Duration) -> anyhow::Result<ProbeReply> {
        (**self).probe(endpoint, timeout).await
    }
}
