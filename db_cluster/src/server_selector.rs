//! Strategies that pick eligible servers out of a [`ClusterDescription`].
//!
//! A selector is stateless and is evaluated against a fresh snapshot on every selection
//! attempt. Selectors filter the candidates they are given, so chaining them in a
//! [`CompositeServerSelector`] intersects their results. An empty result is not an error:
//! the cluster treats it as "wait for the next description".

use std::{fmt, sync::Arc, time::Duration};

use dyn_clone::DynClone;

use crate::{
    cluster_description::{ClusterDescription, TopologyType},
    endpoint::Endpoint,
    read_preference::{ReadPreference, ReadPreferenceMode},
    server_description::{ServerDescription, ServerRole},
};

pub trait ServerSelector: DynClone + fmt::Debug + Send + Sync {
    /// Keeps the eligible members of `servers`, which all belong to `cluster`.
    fn select<'a>(
        &self,
        cluster: &'a ClusterDescription,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription>;

    /// Runs the selector over every member of `cluster`.
    fn select_from<'a>(&self, cluster: &'a ClusterDescription) -> Vec<&'a ServerDescription> {
        self.select(cluster, cluster.servers().collect())
    }
}

dyn_clone::clone_trait_object!(ServerSelector);

/// Any connected server.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyServerSelector;

impl ServerSelector for AnyServerSelector {
    fn select<'a>(
        &self,
        _cluster: &'a ClusterDescription,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription> {
        servers
            .into_iter()
            .filter(|server| server.is_connected())
            .collect()
    }
}

/// Servers that accept writes: a standalone, the primary, or a router.
#[derive(Debug, Clone, Copy, Default)]
pub struct WritableServerSelector;

impl ServerSelector for WritableServerSelector {
    fn select<'a>(
        &self,
        _cluster: &'a ClusterDescription,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription> {
        servers
            .into_iter()
            .filter(|server| server.is_writable())
            .collect()
    }
}

/// Exact endpoint match.
#[derive(Debug, Clone)]
pub struct EndpointServerSelector {
    endpoint: Endpoint,
}

impl EndpointServerSelector {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }
}

impl ServerSelector for EndpointServerSelector {
    fn select<'a>(
        &self,
        _cluster: &'a ClusterDescription,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription> {
        servers
            .into_iter()
            .filter(|server| server.endpoint() == &self.endpoint)
            .collect()
    }
}

/// Keeps servers whose round trip is within `window` of the fastest candidate.
#[derive(Debug, Clone, Copy)]
pub struct LatencyLimitingServerSelector {
    window: Duration,
}

impl LatencyLimitingServerSelector {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }
}

impl ServerSelector for LatencyLimitingServerSelector {
    fn select<'a>(
        &self,
        _cluster: &'a ClusterDescription,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription> {
        let fastest = match servers
            .iter()
            .filter_map(|server| server.round_trip_time())
            .min()
        {
            Some(fastest) => fastest,
            None => return servers,
        };
        let limit = fastest.saturating_add(self.window);

        servers
            .into_iter()
            .filter(|server| {
                server
                    .round_trip_time()
                    .map_or(false, |round_trip_time| round_trip_time <= limit)
            })
            .collect()
    }
}

/// Filters by role according to a [`ReadPreference`], then by its tag sets.
#[derive(Debug, Clone, Default)]
pub struct ReadPreferenceServerSelector {
    read_preference: ReadPreference,
}

impl ReadPreferenceServerSelector {
    pub fn new(read_preference: ReadPreference) -> Self {
        Self { read_preference }
    }

    fn primaries<'a>(servers: &[&'a ServerDescription]) -> Vec<&'a ServerDescription> {
        servers
            .iter()
            .copied()
            .filter(|server| server.is_connected() && server.role() == ServerRole::ReplicaSetPrimary)
            .collect()
    }

    fn secondaries<'a>(servers: &[&'a ServerDescription]) -> Vec<&'a ServerDescription> {
        servers
            .iter()
            .copied()
            .filter(|server| {
                server.is_connected() && server.role() == ServerRole::ReplicaSetSecondary
            })
            .collect()
    }

    fn matching_tags<'a>(&self, servers: Vec<&'a ServerDescription>) -> Vec<&'a ServerDescription> {
        if self.read_preference.tag_sets.is_empty() {
            return servers;
        }

        for tag_set in &self.read_preference.tag_sets {
            let matching = servers
                .iter()
                .copied()
                .filter(|server| server.matches_tags(tag_set))
                .collect::<Vec<_>>();
            if !matching.is_empty() {
                return matching;
            }
        }
        Vec::new()
    }
}

impl ServerSelector for ReadPreferenceServerSelector {
    fn select<'a>(
        &self,
        cluster: &'a ClusterDescription,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription> {
        match cluster.topology_type() {
            TopologyType::Unknown => Vec::new(),
            // No roles to tell apart: every data-bearing node serves every mode.
            TopologyType::Single | TopologyType::Sharded => servers
                .into_iter()
                .filter(|server| server.is_data_bearing())
                .collect(),
            TopologyType::ReplicaSetNoPrimary | TopologyType::ReplicaSetWithPrimary => {
                match self.read_preference.mode {
                    ReadPreferenceMode::Primary => Self::primaries(&servers),
                    ReadPreferenceMode::PrimaryPreferred => {
                        let primaries = Self::primaries(&servers);
                        if primaries.is_empty() {
                            self.matching_tags(Self::secondaries(&servers))
                        } else {
                            primaries
                        }
                    }
                    ReadPreferenceMode::Secondary => {
                        self.matching_tags(Self::secondaries(&servers))
                    }
                    ReadPreferenceMode::SecondaryPreferred => {
                        let secondaries = self.matching_tags(Self::secondaries(&servers));
                        if secondaries.is_empty() {
                            Self::primaries(&servers)
                        } else {
                            secondaries
                        }
                    }
                    ReadPreferenceMode::Nearest => {
                        let mut members = Self::primaries(&servers);
                        members.extend(Self::secondaries(&servers));
                        self.matching_tags(members)
                    }
                }
            }
        }
    }
}

/// Runs selectors one after another, each over the survivors of the previous one.
#[derive(Debug, Clone, Default)]
pub struct CompositeServerSelector {
    selectors: Vec<Box<dyn ServerSelector>>,
}

impl CompositeServerSelector {
    pub fn new(selectors: Vec<Box<dyn ServerSelector>>) -> Self {
        Self { selectors }
    }

    pub fn with(mut self, selector: impl ServerSelector + 'static) -> Self {
        self.selectors.push(Box::new(selector));
        self
    }
}

impl ServerSelector for CompositeServerSelector {
    fn select<'a>(
        &self,
        cluster: &'a ClusterDescription,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription> {
        self.selectors
            .iter()
            .fold(servers, |candidates, selector| {
                if candidates.is_empty() {
                    return candidates;
                }
                selector.select(cluster, candidates)
            })
    }
}

type ServerPredicate = dyn Fn(&ClusterDescription, &ServerDescription) -> bool + Send + Sync;

/// Wraps a per-server predicate.
#[derive(Clone)]
pub struct DelegateServerSelector {
    predicate: Arc<ServerPredicate>,
}

impl DelegateServerSelector {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&ClusterDescription, &ServerDescription) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }
}

impl fmt::Debug for DelegateServerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegateServerSelector").finish_non_exhaustive()
    }
}

impl ServerSelector for DelegateServerSelector {
    fn select<'a>(
        &self,
        cluster: &'a ClusterDescription,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription> {
        servers
            .into_iter()
            .filter(|server| (self.predicate)(cluster, server))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{
        AnyServerSelector, CompositeServerSelector, DelegateServerSelector,
        EndpointServerSelector, LatencyLimitingServerSelector, ReadPreferenceServerSelector,
        ServerSelector, WritableServerSelector,
    };
    use crate::{
        cluster_description::{ClusterDescription, ClusterId, TopologyType},
        cluster_settings::ClusterSettings,
        endpoint::Endpoint,
        probe::ProbeReply,
        read_preference::ReadPreference,
        server_description::ServerDescription,
        topology::TopologyStateMachine,
    };

    fn ep(host: &str) -> Endpoint {
        Endpoint::new(host, 27017)
    }

    fn cluster(replies: Vec<(&str, ProbeReply, u64)>) -> ClusterDescription {
        let settings = ClusterSettings {
            seeds: replies.iter().map(|(host, _, _)| ep(host)).collect(),
            ..Default::default()
        };
        let mut description = TopologyStateMachine::initial(ClusterId::new(), &settings);
        for (host, reply, rtt_ms) in replies {
            let update =
                ServerDescription::from_reply(ep(host), reply, Duration::from_millis(rtt_ms));
            if let Some(transition) = TopologyStateMachine::apply(&description, update) {
                description = transition.description;
            }
        }
        description
    }

    fn replica_set() -> ClusterDescription {
        cluster(vec![
            ("a", ProbeReply::primary("rs0").with_tag("dc", "east"), 10),
            ("b", ProbeReply::secondary("rs0").with_tag("dc", "east"), 12),
            ("c", ProbeReply::secondary("rs0").with_tag("dc", "west"), 40),
            ("d", ProbeReply::arbiter("rs0"), 1),
        ])
    }

    fn endpoints(servers: Vec<&ServerDescription>) -> Vec<String> {
        servers.iter().map(|server| server.endpoint().host().to_string()).collect()
    }

    #[test]
    fn any_selector_keeps_connected_servers() {
        let description = replica_set();

        let selected = AnyServerSelector.select_from(&description);

        assert_eq!(endpoints(selected), ["a", "b", "c", "d"]);
    }

    #[test]
    fn writable_selector_picks_primary() {
        let description = replica_set();

        let selected = WritableServerSelector.select_from(&description);

        assert_eq!(endpoints(selected), ["a"]);
    }

    #[test]
    fn endpoint_selector_matches_exactly() {
        let description = replica_set();

        let selected = EndpointServerSelector::new(ep("c")).select_from(&description);
        let missing = EndpointServerSelector::new(ep("zzz")).select_from(&description);

        assert_eq!(endpoints(selected), ["c"]);
        assert!(missing.is_empty());
    }

    #[test]
    fn read_preference_modes_over_replica_set() {
        let description = replica_set();
        let select = |read_preference: ReadPreference| {
            endpoints(ReadPreferenceServerSelector::new(read_preference).select_from(&description))
        };

        assert_eq!(select(ReadPreference::primary()), ["a"]);
        assert_eq!(select(ReadPreference::primary_preferred()), ["a"]);
        assert_eq!(select(ReadPreference::secondary()), ["b", "c"]);
        assert_eq!(select(ReadPreference::secondary_preferred()), ["b", "c"]);
        assert_eq!(select(ReadPreference::nearest()), ["a", "b", "c"]);
    }

    #[test]
    fn preferred_modes_fall_back() {
        let no_secondaries = cluster(vec![("a", ProbeReply::primary("rs0"), 1)]);
        let no_primary = cluster(vec![("b", ProbeReply::secondary("rs0"), 1)]);

        let secondary_preferred =
            ReadPreferenceServerSelector::new(ReadPreference::secondary_preferred());
        let primary_preferred =
            ReadPreferenceServerSelector::new(ReadPreference::primary_preferred());

        assert_eq!(endpoints(secondary_preferred.select_from(&no_secondaries)), ["a"]);
        assert_eq!(endpoints(primary_preferred.select_from(&no_primary)), ["b"]);
    }

    #[test]
    fn tag_sets_are_tried_in_order() {
        let description = replica_set();
        let selector = ReadPreferenceServerSelector::new(
            ReadPreference::secondary()
                .with_tag_set([("dc", "north")])
                .with_tag_set([("dc", "west")])
                .with_tag_set(Vec::<(String, String)>::new()),
        );

        let selected = selector.select_from(&description);

        assert_eq!(endpoints(selected), ["c"]);
    }

    #[test]
    fn absent_tag_selects_nothing() {
        let description = replica_set();
        let selector = ReadPreferenceServerSelector::new(
            ReadPreference::nearest().with_tag_set([("rack", "42")]),
        );

        assert!(selector.select_from(&description).is_empty());
    }

    #[test]
    fn read_preference_ignores_roles_when_sharded() {
        let description = cluster(vec![
            ("a", ProbeReply::shard_router(), 3),
            ("b", ProbeReply::shard_router(), 4),
        ]);
        assert_eq!(description.topology_type(), TopologyType::Sharded);

        let selected = ReadPreferenceServerSelector::new(ReadPreference::secondary())
            .select_from(&description);

        assert_eq!(endpoints(selected), ["a", "b"]);
    }

    #[test]
    fn latency_window_keeps_near_fastest() {
        let description = replica_set();
        let secondaries_and_primary = ReadPreferenceServerSelector::new(ReadPreference::nearest())
            .select_from(&description);

        let selected = LatencyLimitingServerSelector::new(Duration::from_millis(5))
            .select(&description, secondaries_and_primary);

        assert_eq!(endpoints(selected), ["a", "b"]);
    }

    #[test]
    fn composite_intersects() {
        let description = replica_set();
        let selector = CompositeServerSelector::default()
            .with(ReadPreferenceServerSelector::new(ReadPreference::nearest()))
            .with(DelegateServerSelector::new(|_, server| {
                server.tags().get("dc").map(String::as_str) == Some("east")
            }))
            .with(LatencyLimitingServerSelector::new(Duration::from_millis(1)));

        let selected = selector.select_from(&description);

        assert_eq!(endpoints(selected), ["a"]);
    }

    #[test]
    fn composing_a_selector_with_itself_changes_nothing() {
        let description = replica_set();
        let selector = ReadPreferenceServerSelector::new(
            ReadPreference::secondary().with_tag_set([("dc", "east")]),
        );
        let doubled = CompositeServerSelector::new(vec![
            Box::new(selector.clone()),
            Box::new(selector.clone()),
        ]);

        assert_eq!(
            endpoints(doubled.select_from(&description)),
            endpoints(selector.select_from(&description))
        );
    }

    #[test]
    fn selection_is_repeatable_for_an_unchanged_description() {
        let description = replica_set();
        let selector: Box<dyn ServerSelector> =
            Box::new(ReadPreferenceServerSelector::new(ReadPreference::nearest()));
        let cloned = selector.clone();

        assert_eq!(
            endpoints(selector.select_from(&description)),
            endpoints(cloned.select_from(&description))
        );
    }

    #[test]
    fn unknown_topology_selects_nothing() {
        let settings = ClusterSettings {
            seeds: vec![ep("a")],
            ..Default::default()
        };
        let description = TopologyStateMachine::initial(ClusterId::new(), &settings);

        let selected = ReadPreferenceServerSelector::new(ReadPreference::nearest())
            .select_from(&description);

        assert!(selected.is_empty());
        assert!(AnyServerSelector.select_from(&description).is_empty());
    }
}
