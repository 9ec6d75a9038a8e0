use std::{collections::BTreeMap, fmt};

use serde::Serialize;
use uuid::Uuid;

use crate::{
    cluster_settings::{ClusterSettings, ConnectionMode},
    endpoint::Endpoint,
    server_description::{ServerDescription, ServerRole},
};

/// Identifies one cluster instance in logs and descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ClusterId(Uuid);

impl ClusterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClusterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cluster-wide classification derived from member roles.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TopologyType {
    #[default]
    Unknown,
    Single,
    ReplicaSetNoPrimary,
    ReplicaSetWithPrimary,
    Sharded,
}

impl TopologyType {
    pub fn is_replica_set(&self) -> bool {
        matches!(
            self,
            TopologyType::ReplicaSetNoPrimary | TopologyType::ReplicaSetWithPrimary
        )
    }
}

/// The parts of [`ClusterSettings`] that shape the topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterSettingsSnapshot {
    pub connection_mode: ConnectionMode,
    pub replica_set_name: Option<String>,
    pub seeds: Vec<Endpoint>,
}

impl From<&ClusterSettings> for ClusterSettingsSnapshot {
    fn from(settings: &ClusterSettings) -> Self {
        Self {
            connection_mode: settings.connection_mode(),
            replica_set_name: settings.replica_set_name().map(str::to_string),
            seeds: settings.seeds().to_vec(),
        }
    }
}

/// Immutable snapshot of the whole cluster.
///
/// Never patched in place: the topology state machine builds a new one for every change and
/// the cluster swaps the shared reference, so readers always see a consistent picture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterDescription {
    pub(crate) cluster_id: ClusterId,
    pub(crate) topology_type: TopologyType,
    pub(crate) servers: BTreeMap<Endpoint, ServerDescription>,
    pub(crate) revision: u64,
    pub(crate) settings: ClusterSettingsSnapshot,
    /// Replica set name in effect, either required by settings or learned from a member.
    pub(crate) set_name: Option<String>,
    pub(crate) max_set_version: Option<i32>,
    pub(crate) topology_error: Option<String>,
}

impl ClusterDescription {
    pub fn cluster_id(&self) -> ClusterId {
        self.cluster_id
    }

    pub fn topology_type(&self) -> TopologyType {
        self.topology_type
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn settings(&self) -> &ClusterSettingsSnapshot {
        &self.settings
    }

    pub fn set_name(&self) -> Option<&str> {
        self.set_name.as_deref()
    }

    pub fn max_set_version(&self) -> Option<i32> {
        self.max_set_version
    }

    /// Set when the observed members cannot form the configured topology.
    pub fn topology_error(&self) -> Option<&str> {
        self.topology_error.as_deref()
    }

    pub fn server(&self, endpoint: &Endpoint) -> Option<&ServerDescription> {
        self.servers.get(endpoint)
    }

    /// Members in endpoint order.
    pub fn servers(&self) -> impl Iterator<Item = &ServerDescription> {
        self.servers.values()
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.servers.keys()
    }

    pub fn primary(&self) -> Option<&ServerDescription> {
        let mut primaries = self
            .servers()
            .filter(|server| server.is_connected() && server.role() == ServerRole::ReplicaSetPrimary);
        match (primaries.next(), primaries.next()) {
            (Some(primary), None) => Some(primary),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

impl fmt::Display for ClusterDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ ClusterId: {}, Type: {:?}, Revision: {}, Servers: [",
            self.cluster_id, self.topology_type, self.revision
        )?;
        for (index, server) in self.servers().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", server)?;
        }
        write!(f, "]")?;
        if let Some(error) = &self.topology_error {
            write!(f, ", Error: \"{}\"", error)?;
        }
        write!(f, " }}")
    }
}
