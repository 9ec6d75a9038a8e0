use std::{collections::BTreeMap, fmt, time::Duration};

use serde::Serialize;

use crate::{cluster_settings::ConnectionMode, endpoint::Endpoint, probe::ProbeReply};

/// Tags a node advertises, matched by read-preference tag sets.
pub type TagSet = BTreeMap<String, String>;

/// Connection state of a node as last observed by its monitor.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ServerState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Role a node reported for itself.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ServerRole {
    Standalone,
    ReplicaSetPrimary,
    ReplicaSetSecondary,
    ReplicaSetArbiter,
    ReplicaSetOther,
    ShardRouter,
    #[default]
    Unknown,
}

impl ServerRole {
    pub fn is_replica_set_member(&self) -> bool {
        matches!(
            self,
            ServerRole::ReplicaSetPrimary
                | ServerRole::ReplicaSetSecondary
                | ServerRole::ReplicaSetArbiter
                | ServerRole::ReplicaSetOther
        )
    }

    /// Roles that hold data and can therefore serve reads.
    pub fn is_data_bearing(&self) -> bool {
        matches!(
            self,
            ServerRole::Standalone
                | ServerRole::ReplicaSetPrimary
                | ServerRole::ReplicaSetSecondary
                | ServerRole::ShardRouter
        )
    }

    pub fn is_writable(&self) -> bool {
        matches!(
            self,
            ServerRole::Standalone | ServerRole::ReplicaSetPrimary | ServerRole::ShardRouter
        )
    }
}

impl fmt::Display for ServerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why a node is not usable. Kept on the description so it can be compared and cloned.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ServerError {
    #[error("Probe did not complete within {0:?}")]
    ProbeTimeout(Duration),
    #[error("Probe failed: {0}")]
    ProbeFailed(String),
    #[error("Replica set name `{actual:?}` does not match required name `{expected}`")]
    ReplicaSetNameMismatch {
        expected: String,
        actual: Option<String>,
    },
    #[error("Role {role} is not allowed in {mode:?} mode")]
    IncompatibleRole { mode: ConnectionMode, role: ServerRole },
    #[error("Server was invalidated: {0}")]
    Invalidated(String),
}

impl ServerError {
    /// Errors raised by topology validation rather than by talking to the node.
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            ServerError::ReplicaSetNameMismatch { .. } | ServerError::IncompatibleRole { .. }
        )
    }
}

/// Immutable snapshot of one node's last known state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerDescription {
    endpoint: Endpoint,
    state: ServerState,
    role: ServerRole,
    round_trip_time: Option<Duration>,
    set_name: Option<String>,
    set_version: Option<i32>,
    election_id: Option<u64>,
    tags: TagSet,
    hosts: Vec<Endpoint>,
    last_error: Option<ServerError>,
    revision: u64,
}

impl ServerDescription {
    /// A node nobody has heard from yet.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            state: ServerState::Disconnected,
            role: ServerRole::Unknown,
            round_trip_time: None,
            set_name: None,
            set_version: None,
            election_id: None,
            tags: TagSet::new(),
            hosts: Vec::new(),
            last_error: None,
            revision: 0,
        }
    }

    pub fn from_reply(endpoint: Endpoint, reply: ProbeReply, round_trip_time: Duration) -> Self {
        Self {
            endpoint,
            state: ServerState::Connected,
            role: reply.role,
            round_trip_time: Some(round_trip_time),
            set_name: reply.set_name,
            set_version: reply.set_version,
            election_id: reply.election_id,
            tags: reply.tags,
            hosts: reply.hosts,
            last_error: None,
            revision: 0,
        }
    }

    pub fn from_error(endpoint: Endpoint, error: ServerError) -> Self {
        Self {
            last_error: Some(error),
            ..Self::new(endpoint)
        }
    }

    /// Returns a copy stamped with the revision of the cluster description that owns it.
    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = revision;
        self
    }

    /// True when both describe the same observation, whatever revision they were stamped with.
    pub fn same_observation(&self, other: &ServerDescription) -> bool {
        self.clone().with_revision(0) == other.clone().with_revision(0)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn role(&self) -> ServerRole {
        self.role
    }

    pub fn round_trip_time(&self) -> Option<Duration> {
        self.round_trip_time
    }

    pub fn set_name(&self) -> Option<&str> {
        self.set_name.as_deref()
    }

    pub fn set_version(&self) -> Option<i32> {
        self.set_version
    }

    pub fn election_id(&self) -> Option<u64> {
        self.election_id
    }

    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    /// Replica-set members this node reported in its configuration.
    pub fn hosts(&self) -> &[Endpoint] {
        &self.hosts
    }

    pub fn last_error(&self) -> Option<&ServerError> {
        self.last_error.as_ref()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_connected(&self) -> bool {
        self.state == ServerState::Connected
    }

    pub fn is_data_bearing(&self) -> bool {
        self.is_connected() && self.role.is_data_bearing()
    }

    pub fn is_writable(&self) -> bool {
        self.is_connected() && self.role.is_writable()
    }

    pub fn is_replica_set_member(&self) -> bool {
        self.is_connected() && self.role.is_replica_set_member()
    }

    /// True when every tag in `tag_set` is present with the same value.
    pub fn matches_tags(&self, tag_set: &TagSet) -> bool {
        tag_set
            .iter()
            .all(|(key, value)| self.tags.get(key) == Some(value))
    }
}

impl fmt::Display for ServerDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ {} {:?} {}", self.endpoint, self.state, self.role)?;
        if let Some(rtt) = self.round_trip_time {
            write!(f, " rtt={}ms", rtt.as_millis())?;
        }
        if let Some(error) = &self.last_error {
            write!(f, " error=\"{}\"", error)?;
        }
        write!(f, " }}")
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{ServerDescription, ServerError, ServerRole, ServerState, TagSet};
    use crate::{endpoint::Endpoint, probe::ProbeReply};

    fn endpoint() -> Endpoint {
        Endpoint::new("a", 27017)
    }

    #[test]
    fn new_description_is_disconnected_and_unknown() {
        let description = ServerDescription::new(endpoint());

        assert_eq!(description.state(), ServerState::Disconnected);
        assert_eq!(description.role(), ServerRole::Unknown);
        assert!(description.last_error().is_none());
        assert!(!description.is_data_bearing());
    }

    #[test]
    fn from_reply_is_connected() {
        let reply = ProbeReply::secondary("rs0").with_tag("dc", "east");

        let description =
            ServerDescription::from_reply(endpoint(), reply, Duration::from_millis(4));

        assert!(description.is_connected());
        assert!(description.is_replica_set_member());
        assert!(!description.is_writable());
        assert_eq!(description.set_name(), Some("rs0"));
        assert_eq!(description.round_trip_time(), Some(Duration::from_millis(4)));
    }

    #[test]
    fn same_observation_ignores_revision() {
        let first = ServerDescription::new(endpoint()).with_revision(3);
        let second = ServerDescription::new(endpoint()).with_revision(9);

        assert_ne!(first, second);
        assert!(first.same_observation(&second));
    }

    #[test]
    fn matches_tags_requires_every_pair() {
        let reply = ProbeReply::secondary("rs0")
            .with_tag("dc", "east")
            .with_tag("rack", "1");
        let description = ServerDescription::from_reply(endpoint(), reply, Duration::ZERO);

        let mut wanted = TagSet::new();
        wanted.insert("dc".to_string(), "east".to_string());
        assert!(description.matches_tags(&wanted));
        assert!(description.matches_tags(&TagSet::new()));

        wanted.insert("rack".to_string(), "2".to_string());
        assert!(!description.matches_tags(&wanted));
    }

    #[test]
    fn validation_errors_are_flagged() {
        let mismatch = ServerError::ReplicaSetNameMismatch {
            expected: "rs0".to_string(),
            actual: Some("rs1".to_string()),
        };

        assert!(mismatch.is_validation_error());
        assert!(!ServerError::ProbeFailed("refused".to_string()).is_validation_error());
    }
}
