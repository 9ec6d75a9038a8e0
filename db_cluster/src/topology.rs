//! The single-writer reducer that turns server observations into cluster descriptions.
//!
//! [`TopologyStateMachine::apply`] is pure: the next description depends only on the
//! previous one and the incoming [`ServerDescription`]. The cluster actor is the only
//! caller, which gives the serial execution the type classification needs because it
//! reads the whole membership, not just the changed entry.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    cluster_description::{ClusterDescription, ClusterId, ClusterSettingsSnapshot, TopologyType},
    cluster_settings::{ClusterSettings, ConnectionMode},
    endpoint::Endpoint,
    server_description::{ServerDescription, ServerError, ServerRole},
};

/// Result of applying one observation.
#[derive(Debug, Clone)]
pub struct TopologyTransition {
    pub description: ClusterDescription,
    /// Members discovered from a replica-set configuration. They need a monitor.
    pub added: Vec<Endpoint>,
    /// Members dropped from the configuration. Their monitors must stop.
    pub removed: Vec<Endpoint>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TopologyStateMachine;

impl TopologyStateMachine {
    /// Revision 0: every seed tracked but not yet heard from.
    pub fn initial(cluster_id: ClusterId, settings: &ClusterSettings) -> ClusterDescription {
        let servers = settings
            .seeds()
            .iter()
            .map(|seed| (seed.clone(), ServerDescription::new(seed.clone())))
            .collect::<BTreeMap<_, _>>();

        ClusterDescription {
            cluster_id,
            topology_type: Self::classify(settings.connection_mode(), &servers),
            servers,
            revision: 0,
            settings: ClusterSettingsSnapshot::from(settings),
            set_name: settings.replica_set_name().map(str::to_string),
            max_set_version: None,
            topology_error: None,
        }
    }

    /// Folds `update` into `current`.
    ///
    /// Returns `None` when nothing should be published: the endpoint is no longer tracked,
    /// or the observation is identical to the one already recorded and its host list, if it
    /// carries one, already matches the tracked members.
    pub fn apply(
        current: &ClusterDescription,
        update: ServerDescription,
    ) -> Option<TopologyTransition> {
        let endpoint = update.endpoint().clone();
        let existing = match current.servers.get(&endpoint) {
            Some(existing) => existing,
            None => {
                tracing::trace!(%endpoint, "Discarding update for an endpoint that is no longer tracked");
                return None;
            }
        };

        let update = Self::validate(current, update);
        let reconcile = Self::carries_membership(current, &update)
            && !Self::tracks_exactly(current, update.hosts());
        if !reconcile && existing.same_observation(&update) {
            return None;
        }

        let mode = current.settings.connection_mode;
        let revision = current.revision + 1;
        let mut servers = current.servers.clone();
        let mut set_name = current.set_name.clone();
        let mut max_set_version = current.max_set_version;

        if update.is_replica_set_member() {
            if set_name.is_none() && mode != ConnectionMode::Direct {
                tracing::debug!(set_name = ?update.set_name(), "Adopting replica set name reported by {}", endpoint);
                set_name = update.set_name().map(str::to_string);
            }
            if let Some(version) = update.set_version() {
                max_set_version = Some(max_set_version.map_or(version, |max| max.max(version)));
            }
        }

        let hosts = update.hosts().to_vec();
        servers.insert(endpoint, update.with_revision(revision));

        let (added, removed) = if reconcile {
            Self::reconcile(&mut servers, &hosts, revision)
        } else {
            (Vec::new(), Vec::new())
        };

        let topology_type = Self::classify(mode, &servers);
        if topology_type != current.topology_type {
            tracing::info!(
                from = ?current.topology_type,
                to = ?topology_type,
                revision,
                "Topology type changed"
            );
        }

        let description = ClusterDescription {
            cluster_id: current.cluster_id,
            topology_type,
            topology_error: Self::topology_error(&servers),
            servers,
            revision,
            settings: current.settings.clone(),
            set_name,
            max_set_version,
        };

        Some(TopologyTransition {
            description,
            added,
            removed,
        })
    }

    /// Replaces a connected observation that contradicts the configured topology with a
    /// disconnected one carrying the reason.
    fn validate(current: &ClusterDescription, update: ServerDescription) -> ServerDescription {
        if !update.is_connected() {
            return update;
        }

        let mode = current.settings.connection_mode;
        let role = update.role();
        let compatible = role == ServerRole::Unknown
            || match mode {
                ConnectionMode::Direct => true,
                ConnectionMode::Standalone => role == ServerRole::Standalone,
                ConnectionMode::Sharded => role == ServerRole::ShardRouter,
                ConnectionMode::ReplicaSet => role.is_replica_set_member(),
                ConnectionMode::Automatic => match current.topology_type {
                    TopologyType::Sharded => role == ServerRole::ShardRouter,
                    TopologyType::ReplicaSetNoPrimary | TopologyType::ReplicaSetWithPrimary => {
                        role.is_replica_set_member()
                    }
                    TopologyType::Single | TopologyType::Unknown => {
                        !(role == ServerRole::Standalone && current.servers.len() > 1)
                            // A replica set whose members are all down is still a replica set.
                            && !(role == ServerRole::ShardRouter && current.set_name.is_some())
                    }
                },
            };

        if !compatible {
            tracing::warn!(endpoint = %update.endpoint(), %role, ?mode, "Invalidating member with incompatible role");
            return ServerDescription::from_error(
                update.endpoint().clone(),
                ServerError::IncompatibleRole { mode, role },
            );
        }

        if let Some(expected) = current.set_name.as_deref() {
            let checked = role.is_replica_set_member()
                || (mode == ConnectionMode::Direct && current.settings.replica_set_name.is_some());
            if checked && update.set_name() != Some(expected) {
                tracing::warn!(
                    endpoint = %update.endpoint(),
                    expected,
                    actual = ?update.set_name(),
                    "Invalidating member of a different replica set"
                );
                return ServerDescription::from_error(
                    update.endpoint().clone(),
                    ServerError::ReplicaSetNameMismatch {
                        expected: expected.to_string(),
                        actual: update.set_name().map(str::to_string),
                    },
                );
            }
        }

        update
    }

    /// Whether `update` carries a replica-set configuration the membership should follow.
    fn carries_membership(current: &ClusterDescription, update: &ServerDescription) -> bool {
        let mode_discovers = matches!(
            current.settings.connection_mode,
            ConnectionMode::Automatic | ConnectionMode::ReplicaSet
        );
        let reports_config = update.is_connected()
            && matches!(
                update.role(),
                ServerRole::ReplicaSetPrimary | ServerRole::ReplicaSetSecondary
            )
            && !update.hosts().is_empty();
        if !mode_discovers || !reports_config {
            return false;
        }

        match (current.max_set_version, update.set_version()) {
            (Some(max), Some(version)) if version < max => {
                tracing::debug!(
                    endpoint = %update.endpoint(),
                    version,
                    max,
                    "Ignoring membership from a stale replica set configuration"
                );
                false
            }
            _ => true,
        }
    }

    fn tracks_exactly(current: &ClusterDescription, hosts: &[Endpoint]) -> bool {
        let listed = hosts.iter().collect::<BTreeSet<_>>();
        listed.len() == current.servers.len()
            && listed.iter().all(|host| current.servers.contains_key(*host))
    }

    /// Makes the tracked members exactly `hosts`. Returns `(added, removed)`.
    fn reconcile(
        servers: &mut BTreeMap<Endpoint, ServerDescription>,
        hosts: &[Endpoint],
        revision: u64,
    ) -> (Vec<Endpoint>, Vec<Endpoint>) {
        let listed = hosts.iter().cloned().collect::<BTreeSet<_>>();

        let removed = servers
            .keys()
            .filter(|endpoint| !listed.contains(*endpoint))
            .cloned()
            .collect::<Vec<_>>();
        for endpoint in &removed {
            tracing::info!(%endpoint, "Member removed from the replica set configuration");
            servers.remove(endpoint);
        }

        let mut added = Vec::new();
        for endpoint in listed {
            if !servers.contains_key(&endpoint) {
                tracing::info!(%endpoint, "Member discovered from the replica set configuration");
                servers.insert(
                    endpoint.clone(),
                    ServerDescription::new(endpoint.clone()).with_revision(revision),
                );
                added.push(endpoint);
            }
        }

        (added, removed)
    }

    fn classify(
        mode: ConnectionMode,
        servers: &BTreeMap<Endpoint, ServerDescription>,
    ) -> TopologyType {
        if mode.is_single() {
            return TopologyType::Single;
        }

        let connected = || servers.values().filter(|server| server.is_connected());

        if connected().any(|server| server.role() == ServerRole::ShardRouter) {
            return TopologyType::Sharded;
        }

        if connected().any(|server| server.role().is_replica_set_member()) {
            let primaries = connected()
                .filter(|server| server.role() == ServerRole::ReplicaSetPrimary)
                .count();
            return if primaries == 1 {
                TopologyType::ReplicaSetWithPrimary
            } else {
                TopologyType::ReplicaSetNoPrimary
            };
        }

        if connected().any(|server| server.role() == ServerRole::Standalone) {
            return TopologyType::Single;
        }

        TopologyType::Unknown
    }

    /// Set only when every member has been rejected by validation.
    fn topology_error(servers: &BTreeMap<Endpoint, ServerDescription>) -> Option<String> {
        let rejected = servers
            .values()
            .map(|server| match server.last_error() {
                Some(error) if error.is_validation_error() => {
                    Some(format!("{}: {}", server.endpoint(), error))
                }
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;

        if rejected.is_empty() {
            return None;
        }

        Some(format!(
            "Every member was rejected by the configured topology ({})",
            rejected.join("; ")
        ))
    }
}
