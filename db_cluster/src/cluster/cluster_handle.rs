use std::{sync::Arc, time::Duration};

use rand::seq::SliceRandom;
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, Instrument};

use crate::{
    cluster_description::{ClusterDescription, ClusterId},
    cluster_settings::ClusterSettings,
    endpoint::Endpoint,
    events::{ClusterEvent, ClusterEvents},
    probe::ServerProbe,
    server_description::ServerDescription,
    server_selector::{LatencyLimitingServerSelector, ServerSelector},
    topology::TopologyStateMachine,
    ClusterBuilder,
};

use super::{
    run_cluster_actor, ClusterActor, ClusterError, ClusterMessage, ClusterState, WaitOutcome,
};

/**
Handle to a running cluster.

The handle is cheap to clone; every clone talks to the same background actor and its server
monitors. The actor stops once [`Cluster::dispose`] is called or the last handle is dropped.

```rust
# tokio_test::block_on(async {
use std::time::Duration;

use async_trait::async_trait;
use db_cluster::{AnyServerSelector, Cluster, Endpoint, ProbeReply, ServerProbe};
use tokio_util::sync::CancellationToken;

struct AlwaysStandalone;

#[async_trait]
impl ServerProbe for AlwaysStandalone {
    async fn probe(&self, _: &Endpoint, _: Duration) -> anyhow::Result<ProbeReply> {
        Ok(ProbeReply::standalone())
    }
}

let cluster = Cluster::builder()
    .set_seeds(&["localhost:27017"])
    .set_probe(AlwaysStandalone)
    .build()
    .unwrap();

let server = cluster
    .select_server(&AnyServerSelector, Some(Duration::from_secs(5)), &CancellationToken::new())
    .await
    .unwrap();
assert_eq!(server.endpoint().to_string(), "localhost:27017");

cluster.dispose().await;
# })
```
*/
#[derive(Clone, Debug)]
pub struct Cluster {
    cluster_id: ClusterId,
    settings: Arc<ClusterSettings>,
    sender: mpsc::Sender<ClusterMessage>,
    description: watch::Receiver<Arc<ClusterDescription>>,
    events: broadcast::Sender<ClusterEvent>,
    disposed: CancellationToken,
}

impl Cluster {
    pub fn builder() -> ClusterBuilder {
        ClusterBuilder::default()
    }

    // Only the builder creates clusters, after validating the settings.
    pub(crate) fn new(settings: ClusterSettings, probe: Arc<dyn ServerProbe>) -> Self {
        let cluster_id = ClusterId::new();
        let settings = Arc::new(settings);
        let initial = Arc::new(TopologyStateMachine::initial(cluster_id, &settings));

        let (sender, receiver) = mpsc::channel(8);
        let (description_sender, description) = watch::channel(initial);
        let (events, _) = broadcast::channel(64);
        let disposed = CancellationToken::new();

        let actor = ClusterActor::new(
            settings.clone(),
            probe,
            receiver,
            description_sender,
            events.clone(),
            disposed.clone(),
        );
        tokio::spawn(run_cluster_actor(actor).in_current_span());

        Self {
            cluster_id,
            settings,
            sender,
            description,
            events,
            disposed,
        }
    }

    pub fn cluster_id(&self) -> ClusterId {
        self.cluster_id
    }

    pub fn settings(&self) -> &ClusterSettings {
        &self.settings
    }

    pub fn state(&self) -> ClusterState {
        if self.disposed.is_cancelled() {
            ClusterState::Disposed
        } else if self.description.borrow().revision() == 0 {
            ClusterState::Initializing
        } else {
            ClusterState::Monitoring
        }
    }

    /// The latest published description, without waiting.
    pub fn description(&self) -> Arc<ClusterDescription> {
        self.description.borrow().clone()
    }

    /// Subscribes to cluster events. Drop the returned value to unsubscribe.
    pub fn subscribe(&self) -> ClusterEvents {
        ClusterEvents::new(self.events.subscribe(), self.disposed.clone())
    }

    /// Asks every monitor to probe its server as soon as the minimum heartbeat interval allows.
    pub fn request_heartbeat(&self) {
        if self
            .sender
            .try_send(ClusterMessage::RequestHeartbeat { endpoint: None })
            .is_err()
        {
            tracing::trace!("Heartbeat request dropped, the cluster is busy or gone");
        }
    }

    /// Returns a description whose revision is at least `minimum_revision`.
    ///
    /// Returns at once if the current one qualifies, otherwise waits for a qualifying
    /// publish. `timeout` defaults to the server selection timeout.
    #[instrument(
        level = "debug",
        name = "Cluster - Get Description",
        skip(self, cancellation),
        fields(cluster_id = %self.cluster_id)
    )]
    pub async fn get_description(
        &self,
        minimum_revision: u64,
        timeout: Option<Duration>,
        cancellation: &CancellationToken,
    ) -> Result<Arc<ClusterDescription>, ClusterError> {
        let timeout = timeout.unwrap_or_else(|| self.settings.server_selection_timeout());
        let deadline = deadline_after(timeout);
        let mut receiver = self.description.clone();

        loop {
            self.ensure_usable(cancellation)?;

            let description = receiver.borrow_and_update().clone();
            if description.revision() >= minimum_revision {
                return Ok(description);
            }

            match self.wait_for_change(&mut receiver, deadline, cancellation).await {
                WaitOutcome::Changed => continue,
                WaitOutcome::TimedOut => {
                    return Err(ClusterError::DescriptionTimeout {
                        minimum_revision,
                        timeout,
                        description: receiver.borrow().clone(),
                    })
                }
                WaitOutcome::Cancelled => return Err(ClusterError::OperationCancelled),
                WaitOutcome::Disposed => return Err(ClusterError::ClusterDisposed),
            }
        }
    }

    /// Looks up a member by endpoint in the current description. Never waits.
    pub fn get_server(&self, endpoint: &Endpoint) -> Option<Server> {
        if self.disposed.is_cancelled() {
            return None;
        }
        let description = self.description.borrow().clone();
        description
            .server(endpoint)
            .map(|server| Server::new(server.clone(), description.revision(), self.sender.clone()))
    }

    /// Picks a connected server that `selector` accepts, waiting for one to appear if needed.
    ///
    /// Candidates are narrowed to the configured latency window and one is chosen at random.
    /// `timeout` defaults to the server selection timeout; a zero timeout never waits.
    #[instrument(
        level = "debug",
        name = "Cluster - Select Server",
        skip(self, cancellation),
        fields(cluster_id = %self.cluster_id)
    )]
    pub async fn select_server(
        &self,
        selector: &dyn ServerSelector,
        timeout: Option<Duration>,
        cancellation: &CancellationToken,
    ) -> Result<Server, ClusterError> {
        let timeout = timeout.unwrap_or_else(|| self.settings.server_selection_timeout());
        let deadline = deadline_after(timeout);
        let latency_window = LatencyLimitingServerSelector::new(self.settings.local_threshold());
        let mut receiver = self.description.clone();
        let mut heartbeat_requested = false;

        loop {
            self.ensure_usable(cancellation)?;

            let description = receiver.borrow_and_update().clone();
            if let Some(reason) = description.topology_error() {
                return Err(ClusterError::InvalidTopology {
                    reason: reason.to_string(),
                    description: description.clone(),
                });
            }

            let selected = Self::choose(&description, selector, &latency_window);
            if let Some(server) = selected {
                tracing::debug!(
                    endpoint = %server.endpoint(),
                    revision = description.revision(),
                    "Selected server"
                );
                return Ok(Server::new(server, description.revision(), self.sender.clone()));
            }

            if !heartbeat_requested {
                self.request_heartbeat();
                heartbeat_requested = true;
            }

            match self.wait_for_change(&mut receiver, deadline, cancellation).await {
                WaitOutcome::Changed => continue,
                WaitOutcome::TimedOut => {
                    let description = receiver.borrow().clone();
                    tracing::debug!(%description, "Server selection timed out");
                    return Err(ClusterError::ServerSelectionTimeout {
                        timeout,
                        description,
                    });
                }
                WaitOutcome::Cancelled => return Err(ClusterError::OperationCancelled),
                WaitOutcome::Disposed => return Err(ClusterError::ClusterDisposed),
            }
        }
    }

    /// Stops every monitor and fails all pending calls with [`ClusterError::ClusterDisposed`].
    ///
    /// Returns once the monitors have exited. Calling it again is harmless.
    #[instrument(
        level = "debug",
        name = "Cluster - Dispose",
        skip(self),
        fields(cluster_id = %self.cluster_id)
    )]
    pub async fn dispose(&self) {
        if !self.disposed.is_cancelled() {
            tracing::info!("Disposing cluster");
        }
        // Wake waiters before the monitors are torn down.
        self.disposed.cancel();

        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(ClusterMessage::Dispose { respond_to: tx })
            .await
            .is_ok()
        {
            // Errors only if the actor was already on its way out.
            let _ = rx.await;
        }
    }

    fn ensure_usable(&self, cancellation: &CancellationToken) -> Result<(), ClusterError> {
        if self.disposed.is_cancelled() {
            return Err(ClusterError::ClusterDisposed);
        }
        if cancellation.is_cancelled() {
            return Err(ClusterError::OperationCancelled);
        }
        Ok(())
    }

    fn choose(
        description: &ClusterDescription,
        selector: &dyn ServerSelector,
        latency_window: &LatencyLimitingServerSelector,
    ) -> Option<ServerDescription> {
        let connected = description
            .servers()
            .filter(|server| server.is_connected())
            .collect::<Vec<_>>();
        let candidates = latency_window.select(description, selector.select(description, connected));
        candidates
            .choose(&mut rand::thread_rng())
            .map(|server| (*server).clone())
    }

    async fn wait_for_change(
        &self,
        receiver: &mut watch::Receiver<Arc<ClusterDescription>>,
        deadline: Instant,
        cancellation: &CancellationToken,
    ) -> WaitOutcome {
        tokio::select! {
            biased;
            _ = self.disposed.cancelled() => WaitOutcome::Disposed,
            _ = cancellation.cancelled() => WaitOutcome::Cancelled,
            changed = receiver.changed() => match changed {
                Ok(()) => WaitOutcome::Changed,
                // The actor is gone.
                Err(_) => WaitOutcome::Disposed,
            },
            _ = tokio::time::sleep_until(deadline) => WaitOutcome::TimedOut,
        }
    }
}

/// Far enough to mean "no deadline" without overflowing `Instant`.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(60 * 60 * 24 * 365))
}

/// A member picked by [`Cluster::select_server`] or [`Cluster::get_server`].
#[derive(Clone, Debug)]
pub struct Server {
    description: ServerDescription,
    cluster_revision: u64,
    sender: mpsc::Sender<ClusterMessage>,
}

impl Server {
    fn new(
        description: ServerDescription,
        cluster_revision: u64,
        sender: mpsc::Sender<ClusterMessage>,
    ) -> Self {
        Self {
            description,
            cluster_revision,
            sender,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.description.endpoint()
    }

    /// The member as it was described when this handle was created.
    pub fn description(&self) -> &ServerDescription {
        &self.description
    }

    /// Revision of the cluster description this server was picked from.
    pub fn cluster_revision(&self) -> u64 {
        self.cluster_revision
    }

    /// Marks the member unusable after an operation failed against it.
    ///
    /// The member is published as disconnected and probed again as soon as allowed.
    #[instrument(level = "debug", name = "Server - Invalidate", skip(self), fields(endpoint = %self.endpoint()))]
    pub async fn invalidate(&self, reason: &str) -> Result<(), ClusterError> {
        self.sender
            .send(ClusterMessage::InvalidateServer {
                endpoint: self.endpoint().clone(),
                reason: reason.to_string(),
            })
            .await
            .map_err(|_| ClusterError::ClusterDisposed)
    }

    /// Asks this member's monitor for an early probe.
    pub fn request_heartbeat(&self) {
        let _ = self.sender.try_send(ClusterMessage::RequestHeartbeat {
            endpoint: Some(self.endpoint().clone()),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_test::{assert_err, assert_ok};
    use tokio_util::sync::CancellationToken;

    use crate::{
        cluster_description::TopologyType,
        events::ClusterEvent,
        probe::ProbeReply,
        server_description::{ServerError, ServerRole, ServerState},
        server_selector::{AnyServerSelector, WritableServerSelector},
        test_support::{ep, init_tracing, ProbeBehavior, ScriptedProbe},
        Cluster, ClusterError, ClusterState,
    };

    const WAIT: Option<Duration> = Some(Duration::from_secs(5));

    fn start(probe: &std::sync::Arc<ScriptedProbe>, seeds: &[&str]) -> Cluster {
        init_tracing();
        Cluster::builder()
            .set_seeds(seeds)
            .set_heartbeat_interval(Duration::from_millis(50))
            .set_min_heartbeat_interval(Duration::from_millis(10))
            .set_probe_timeout(Duration::from_millis(100))
            .set_probe(probe.clone())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn standalone_seed_is_selected() {
        // Arrange
        let probe = ScriptedProbe::new();
        probe.reply("a", ProbeReply::standalone());
        let cluster = start(&probe, &["a"]);

        // Act
        let server = cluster
            .select_server(&AnyServerSelector, WAIT, &CancellationToken::new())
            .await
            .unwrap();

        // Assert
        assert_eq!(server.endpoint(), &ep("a"));
        assert_eq!(server.description().role(), ServerRole::Standalone);
        assert_eq!(cluster.description().topology_type(), TopologyType::Single);
        assert_eq!(cluster.state(), ClusterState::Monitoring);
        cluster.dispose().await;
    }

    #[tokio::test]
    async fn failed_server_ends_in_selection_timeout() {
        // Arrange
        let probe = ScriptedProbe::new();
        probe.reply("a", ProbeReply::standalone());
        let cluster = start(&probe, &["a"]);
        let token = CancellationToken::new();
        let server = cluster
            .select_server(&AnyServerSelector, WAIT, &token)
            .await
            .unwrap();

        // Act
        probe.fail("a");
        let mut revision = server.cluster_revision();
        loop {
            let description = cluster
                .get_description(revision + 1, WAIT, &token)
                .await
                .unwrap();
            if !description.server(&ep("a")).unwrap().is_connected() {
                break;
            }
            revision = description.revision();
        }
        let result = cluster
            .select_server(&AnyServerSelector, Some(Duration::from_millis(100)), &token)
            .await;

        // Assert
        let error = assert_err!(result);
        assert!(matches!(error, ClusterError::ServerSelectionTimeout { .. }));
        let a = error.description().unwrap().server(&ep("a")).unwrap().clone();
        assert_eq!(a.state(), ServerState::Disconnected);
        assert!(matches!(a.last_error(), Some(ServerError::ProbeFailed(_))));
        cluster.dispose().await;
    }

    #[tokio::test]
    async fn primary_host_list_adds_a_monitored_member() {
        // Arrange
        let probe = ScriptedProbe::new();
        probe.reply(
            "a",
            ProbeReply::primary("rs0").with_hosts(vec![ep("a"), ep("b")]),
        );
        let cluster = start(&probe, &["a"]);
        let mut events = cluster.subscribe();

        // Act
        let added = loop {
            match events.recv().await.unwrap() {
                ClusterEvent::ServerAdded(endpoint) => break endpoint,
                _ => continue,
            }
        };

        // Assert
        assert_eq!(added, ep("b"));
        let description = cluster.description();
        assert!(description.server(&ep("b")).is_some());
        assert_eq!(description.set_name(), Some("rs0"));
        assert_eq!(
            description.topology_type(),
            TopologyType::ReplicaSetWithPrimary
        );
        tokio::time::timeout(Duration::from_secs(5), async {
            while probe.calls(&ep("b")) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("b should be probed by its own monitor");
        cluster.dispose().await;
    }

    #[tokio::test]
    async fn member_is_added_before_its_first_probe() {
        // Arrange
        let probe = ScriptedProbe::new();
        probe.reply(
            "a",
            ProbeReply::primary("rs0").with_hosts(vec![ep("a"), ep("b")]),
        );
        probe.set(&ep("b"), ProbeBehavior::Hang);
        let cluster = start(&probe, &["a"]);

        // Act
        let description = cluster
            .get_description(1, WAIT, &CancellationToken::new())
            .await
            .unwrap();

        // Assert
        let b = description.server(&ep("b")).unwrap();
        assert_eq!(b.state(), ServerState::Disconnected);
        assert_eq!(b.role(), ServerRole::Unknown);
        assert!(b.last_error().is_none());
        cluster.dispose().await;
    }

    #[tokio::test]
    async fn zero_timeout_fails_without_waiting() {
        // Arrange
        let probe = ScriptedProbe::new();
        probe.set(&ep("a"), ProbeBehavior::Hang);
        let cluster = start(&probe, &["a"]);

        // Act
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            cluster.select_server(
                &AnyServerSelector,
                Some(Duration::ZERO),
                &CancellationToken::new(),
            ),
        )
        .await
        .expect("a zero timeout must not wait");

        // Assert
        assert!(matches!(
            result,
            Err(ClusterError::ServerSelectionTimeout { .. })
        ));
        cluster.dispose().await;
    }

    #[tokio::test]
    async fn current_revision_is_returned_at_once() {
        // Arrange
        let probe = ScriptedProbe::new();
        probe.set(&ep("a"), ProbeBehavior::Hang);
        let cluster = start(&probe, &["a"]);
        let current = cluster.description().revision();

        // Act
        let description = cluster
            .get_description(current, Some(Duration::ZERO), &CancellationToken::new())
            .await;

        // Assert
        assert_eq!(assert_ok!(description).revision(), current);
        assert_eq!(cluster.state(), ClusterState::Initializing);
        cluster.dispose().await;
    }

    #[tokio::test]
    async fn missing_revision_ends_in_description_timeout() {
        // Arrange
        let probe = ScriptedProbe::new();
        probe.set(&ep("a"), ProbeBehavior::Hang);
        let cluster = start(&probe, &["a"]);

        // Act
        let result = cluster
            .get_description(
                1,
                Some(Duration::from_millis(20)),
                &CancellationToken::new(),
            )
            .await;

        // Assert
        match result {
            Err(ClusterError::DescriptionTimeout {
                minimum_revision,
                description,
                ..
            }) => {
                assert_eq!(minimum_revision, 1);
                assert_eq!(description.revision(), 0);
            }
            other => panic!("expected a description timeout, got {:?}", other),
        }
        cluster.dispose().await;
    }

    #[tokio::test]
    async fn dispose_resolves_pending_selection() {
        // Arrange
        let probe = ScriptedProbe::new();
        probe.set(&ep("a"), ProbeBehavior::Hang);
        let cluster = start(&probe, &["a"]);
        let pending = {
            let cluster = cluster.clone();
            tokio::spawn(async move {
                cluster
                    .select_server(
                        &AnyServerSelector,
                        Some(Duration::from_secs(60)),
                        &CancellationToken::new(),
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Act
        cluster.dispose().await;
        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("pending selection should resolve after disposal")
            .unwrap();

        // Assert
        assert!(matches!(result, Err(ClusterError::ClusterDisposed)));
        assert_eq!(cluster.state(), ClusterState::Disposed);
        assert!(cluster.get_server(&ep("a")).is_none());
        assert!(matches!(
            cluster
                .get_description(0, None, &CancellationToken::new())
                .await,
            Err(ClusterError::ClusterDisposed)
        ));
        // Idempotent.
        cluster.dispose().await;
    }

    #[tokio::test]
    async fn cancellation_is_distinct_from_timeout() {
        // Arrange
        let probe = ScriptedProbe::new();
        probe.set(&ep("a"), ProbeBehavior::Hang);
        let cluster = start(&probe, &["a"]);
        let token = CancellationToken::new();
        let pending = {
            let cluster = cluster.clone();
            let token = token.clone();
            tokio::spawn(async move {
                cluster
                    .select_server(&WritableServerSelector, Some(Duration::from_secs(60)), &token)
                    .await
            })
        };

        // Act
        token.cancel();
        let result = pending.await.unwrap();

        // Assert
        assert!(matches!(result, Err(ClusterError::OperationCancelled)));
        cluster.dispose().await;
    }

    #[tokio::test]
    async fn mismatched_set_name_everywhere_is_an_invalid_topology() {
        // Arrange
        init_tracing();
        let probe = ScriptedProbe::new();
        probe.reply("a", ProbeReply::primary("other"));
        let cluster = Cluster::builder()
            .set_seeds(&["a"])
            .set_replica_set_name("rs0")
            .set_min_heartbeat_interval(Duration::from_millis(10))
            .set_probe(probe.clone())
            .build()
            .unwrap();
        cluster
            .get_description(1, WAIT, &CancellationToken::new())
            .await
            .unwrap();

        // Act
        let result = cluster
            .select_server(&AnyServerSelector, WAIT, &CancellationToken::new())
            .await;

        // Assert
        assert!(matches!(result, Err(ClusterError::InvalidTopology { .. })));
        cluster.dispose().await;
    }

    #[tokio::test]
    async fn invalidated_server_is_published_as_disconnected() {
        // Arrange
        let probe = ScriptedProbe::new();
        probe.reply("a", ProbeReply::standalone());
        let cluster = start(&probe, &["a"]);
        let server = cluster
            .select_server(&AnyServerSelector, WAIT, &CancellationToken::new())
            .await
            .unwrap();
        let mut events = cluster.subscribe();

        // Act
        server.invalidate("socket closed").await.unwrap();

        // Assert
        let invalidated = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(ClusterEvent::DescriptionChanged { new, .. }) = events.recv().await {
                    let a = new.server(&ep("a")).unwrap();
                    if a.last_error() == Some(&ServerError::Invalidated("socket closed".to_string())) {
                        break a.clone();
                    }
                }
            }
        })
        .await
        .expect("invalidation should be published");
        assert_eq!(invalidated.state(), ServerState::Disconnected);
        cluster.dispose().await;
    }

    #[tokio::test]
    async fn get_server_looks_up_the_current_description() {
        // Arrange
        let probe = ScriptedProbe::new();
        probe.set(&ep("a"), ProbeBehavior::Hang);
        let cluster = start(&probe, &["a"]);

        // Act
        let known = cluster.get_server(&ep("a"));
        let unknown = cluster.get_server(&ep("z"));

        // Assert
        assert_eq!(known.unwrap().description().state(), ServerState::Disconnected);
        assert!(unknown.is_none());
        cluster.dispose().await;
    }

    #[tokio::test]
    async fn subscription_ends_after_dispose() {
        // Arrange
        let probe = ScriptedProbe::new();
        probe.set(&ep("a"), ProbeBehavior::Hang);
        let cluster = start(&probe, &["a"]);
        let mut events = cluster.subscribe();

        // Act
        cluster.dispose().await;

        // Assert
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn member_dropped_from_the_configuration_stops_being_probed() {
        // Arrange
        let probe = ScriptedProbe::new();
        probe.reply("a", ProbeReply::primary("rs0").with_hosts(vec![ep("a")]));
        let cluster = start(&probe, &["a", "b"]);
        let mut events = cluster.subscribe();

        // Act
        let removed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(ClusterEvent::ServerRemoved(endpoint)) = events.recv().await {
                    break endpoint;
                }
            }
        })
        .await
        .expect("b should be removed");

        // Assert
        assert_eq!(removed, ep("b"));
        assert!(cluster.description().server(&ep("b")).is_none());
        assert!(cluster.get_server(&ep("b")).is_none());
        let calls = probe.calls(&ep("b"));
        // Several heartbeat intervals.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(probe.calls(&ep("b")), calls);
        assert!(probe.calls(&ep("a")) > 1);
        cluster.dispose().await;
    }

    #[tokio::test]
    async fn one_publish_wakes_every_waiter() {
        // Arrange
        let probe = ScriptedProbe::new();
        probe.set(&ep("a"), ProbeBehavior::Hang);
        let cluster = start(&probe, &["a"]);
        let token = CancellationToken::new();
        let timeout = Some(Duration::from_secs(30));

        let mut descriptions = Vec::new();
        let mut selections = Vec::new();
        for _ in 0..4 {
            let (waiting_cluster, waiting_token) = (cluster.clone(), token.clone());
            descriptions.push(tokio::spawn(async move {
                waiting_cluster
                    .get_description(1, timeout, &waiting_token)
                    .await
            }));
            let (selecting_cluster, selecting_token) = (cluster.clone(), token.clone());
            selections.push(tokio::spawn(async move {
                selecting_cluster
                    .select_server(&AnyServerSelector, timeout, &selecting_token)
                    .await
            }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cluster.description().revision(), 0);

        // Act
        probe.reply("a", ProbeReply::standalone());

        // Assert
        for waiter in descriptions {
            let description = tokio::time::timeout(Duration::from_secs(5), waiter)
                .await
                .expect("every description waiter should wake")
                .unwrap();
            assert!(assert_ok!(description).revision() >= 1);
        }
        for waiter in selections {
            let server = tokio::time::timeout(Duration::from_secs(5), waiter)
                .await
                .expect("every selection waiter should wake")
                .unwrap();
            let server = assert_ok!(server);
            assert_eq!(server.endpoint(), &ep("a"));
            assert!(server.cluster_revision() >= 1);
        }
        cluster.dispose().await;
    }
}
