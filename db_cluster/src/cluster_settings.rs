use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{endpoint::Endpoint, ClusterError};

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_LOCAL_THRESHOLD: Duration = Duration::from_millis(15);

/// How the cluster interprets what its members report.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionMode {
    /// Discover the topology type from the members.
    #[default]
    Automatic,
    /// Talk to the single seed only, whatever it is.
    Direct,
    ReplicaSet,
    Sharded,
    Standalone,
}

impl ConnectionMode {
    /// Modes that pin the topology to the one configured node.
    pub fn is_single(&self) -> bool {
        matches!(self, ConnectionMode::Direct | ConnectionMode::Standalone)
    }
}

/// Immutable cluster configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterSettings {
    pub(crate) connection_mode: ConnectionMode,
    pub(crate) seeds: Vec<Endpoint>,
    pub(crate) replica_set_name: Option<String>,
    #[serde(with = "duration_ms")]
    pub(crate) heartbeat_interval: Duration,
    #[serde(with = "duration_ms")]
    pub(crate) min_heartbeat_interval: Duration,
    #[serde(with = "duration_ms")]
    pub(crate) probe_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub(crate) server_selection_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub(crate) local_threshold: Duration,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            connection_mode: ConnectionMode::default(),
            seeds: Vec::new(),
            replica_set_name: None,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            min_heartbeat_interval: DEFAULT_MIN_HEARTBEAT_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            server_selection_timeout: DEFAULT_SERVER_SELECTION_TIMEOUT,
            local_threshold: DEFAULT_LOCAL_THRESHOLD,
        }
    }
}

// Getters
impl ClusterSettings {
    pub fn connection_mode(&self) -> ConnectionMode {
        self.connection_mode
    }

    pub fn seeds(&self) -> &[Endpoint] {
        &self.seeds
    }

    pub fn replica_set_name(&self) -> Option<&str> {
        self.replica_set_name.as_deref()
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    pub fn min_heartbeat_interval(&self) -> Duration {
        self.min_heartbeat_interval
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    pub fn server_selection_timeout(&self) -> Duration {
        self.server_selection_timeout
    }

    pub fn local_threshold(&self) -> Duration {
        self.local_threshold
    }
}

impl ClusterSettings {
    /// Loads settings from a JSON document such as
    /// `{"seeds": ["db1:27017"], "replicaSetName": "rs0", "heartbeatInterval": 5000}`.
    #[instrument(level = "debug", name = "Load ClusterSettings", skip(json))]
    pub fn from_json_str(json: &str) -> Result<Self, ClusterError> {
        let settings = serde_json::from_str::<ClusterSettings>(json)
            .context("Unable to deserialize cluster settings")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks the combination of options, not just each one on its own.
    pub fn validate(&self) -> Result<(), ClusterError> {
        if self.seeds.is_empty() {
            tracing::error!(
                "No seeds were supplied and a cluster can't exist without at least one"
            );
            return Err(ClusterError::MissingSeedsError);
        }

        if self.connection_mode.is_single() && self.seeds.len() > 1 {
            return Err(ClusterError::InvalidSettings(format!(
                "{:?} mode requires exactly one seed but {} were supplied",
                self.connection_mode,
                self.seeds.len()
            )));
        }

        if self.min_heartbeat_interval > self.heartbeat_interval {
            return Err(ClusterError::InvalidSettings(format!(
                "Minimum heartbeat interval {:?} exceeds heartbeat interval {:?}",
                self.min_heartbeat_interval, self.heartbeat_interval
            )));
        }

        if self.heartbeat_interval.is_zero() || self.probe_timeout.is_zero() {
            return Err(ClusterError::InvalidSettings(
                "Heartbeat interval and probe timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
