use std::{collections::BTreeSet, fmt, sync::Arc, time::Duration};

use tracing::instrument;

use crate::{
    cluster_settings::{ClusterSettings, ConnectionMode},
    endpoint::Endpoint,
    probe::ServerProbe,
    Cluster, ClusterError,
};

/// Collects cluster options and spawns a [`Cluster`].
pub struct ClusterBuilder {
    seeds: Vec<String>,
    settings: ClusterSettings,
    probe: Option<Arc<dyn ServerProbe>>,
}

impl ClusterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from already loaded settings, e.g. from [`ClusterSettings::from_json_str`].
    pub fn from_settings(settings: ClusterSettings) -> Self {
        let seeds = settings.seeds.iter().map(ToString::to_string).collect();
        Self {
            seeds,
            settings,
            probe: None,
        }
    }

    pub fn set_seeds<T>(mut self, seeds: &[T]) -> Self
    where
        T: AsRef<str>,
    {
        for s in seeds {
            self.seeds.push(s.as_ref().to_string());
        }
        self
    }

    pub fn set_connection_mode(mut self, connection_mode: ConnectionMode) -> Self {
        self.settings.connection_mode = connection_mode;
        self
    }

    pub fn set_replica_set_name(mut self, replica_set_name: &str) -> Self {
        self.settings.replica_set_name = Some(replica_set_name.to_string());
        self
    }

    pub fn set_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.settings.heartbeat_interval = interval;
        self
    }

    pub fn set_min_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.settings.min_heartbeat_interval = interval;
        self
    }

    pub fn set_probe_timeout(mut self, timeout: Duration) -> Self {
        self.settings.probe_timeout = timeout;
        self
    }

    pub fn set_server_selection_timeout(mut self, timeout: Duration) -> Self {
        self.settings.server_selection_timeout = timeout;
        self
    }

    pub fn set_local_threshold(mut self, threshold: Duration) -> Self {
        self.settings.local_threshold = threshold;
        self
    }

    /// The capability used to check each node. Required.
    pub fn set_probe(mut self, probe: impl ServerProbe) -> Self {
        self.probe = Some(Arc::new(probe));
        self
    }

    /// Validates the options, then spawns the cluster actor and one monitor per seed.
    ///
    /// Must be called inside a tokio runtime. The builder is left untouched, so it can be
    /// reused as a template for further clusters.
    #[instrument(level = "debug", name = "Build ClusterBuilder", skip(self))]
    pub fn build(&self) -> Result<Cluster, ClusterError> {
        let settings = self.settings()?;

        let probe = match &self.probe {
            Some(probe) => probe.clone(),
            None => {
                tracing::error!("No probe was supplied, so no server could ever be checked");
                return Err(ClusterError::InvalidSettings(
                    "A server probe is required".to_string(),
                ));
            }
        };

        tracing::trace!("Cluster settings: {:?}", &settings);

        Ok(Cluster::new(settings, probe))
    }

    /// The validated settings [`ClusterBuilder::build`] would use.
    pub fn settings(&self) -> Result<ClusterSettings, ClusterError> {
        if self.seeds.is_empty() {
            tracing::error!(
                "No seeds were supplied and a cluster can't exist without at least one"
            );
            return Err(ClusterError::MissingSeedsError);
        }

        let settings = ClusterSettings {
            seeds: validate_seeds(self.seeds.as_slice())?,
            ..self.settings.clone()
        };
        settings.validate()?;
        Ok(settings)
    }
}

impl Default for ClusterBuilder {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            settings: ClusterSettings::default(),
            probe: None,
        }
    }
}

impl fmt::Debug for ClusterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterBuilder")
            .field("seeds", &self.seeds)
            .field("settings", &self.settings)
            .field("probe", &self.probe.as_ref().map(|_| "dyn ServerProbe"))
            .finish()
    }
}

/// Parses the seed strings, dropping duplicates while keeping the first-seen order.
#[instrument(level = "debug", name = "Validate Seeds")]
fn validate_seeds<T: fmt::Debug>(seeds: &[T]) -> Result<Vec<Endpoint>, ClusterError>
where
    T: AsRef<str>,
{
    let mut seen = BTreeSet::new();
    let mut endpoints = Vec::with_capacity(seeds.len());
    for seed in seeds {
        let endpoint = seed.as_ref().parse::<Endpoint>()?;
        if seen.insert(endpoint.clone()) {
            endpoints.push(endpoint);
        }
    }
    Ok(endpoints)
}
