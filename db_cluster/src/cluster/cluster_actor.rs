use std::{collections::HashMap, sync::Arc};

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::{
    cluster_description::{ClusterDescription, ClusterId},
    cluster_settings::ClusterSettings,
    endpoint::Endpoint,
    events::ClusterEvent,
    probe::ServerProbe,
    server_description::{ServerDescription, ServerError},
    server_monitor::{MonitorUpdate, ServerMonitor},
    topology::TopologyStateMachine,
};

use super::ClusterMessage;

/// The single writer of the cluster description.
///
/// Monitors push observations into one update channel and this actor folds them in one at a
/// time, so the reducer, the publish step, and monitor start/stop never race each other.
/// Readers only ever touch the published snapshot in the watch channel.
pub(crate) struct ClusterActor {
    cluster_id: ClusterId,
    settings: Arc<ClusterSettings>,
    probe: Arc<dyn ServerProbe>,
    receiver: mpsc::Receiver<ClusterMessage>,
    update_receiver: mpsc::Receiver<MonitorUpdate>,
    /// Cloned into every monitor.
    update_sender: mpsc::Sender<MonitorUpdate>,
    description: watch::Sender<Arc<ClusterDescription>>,
    events: broadcast::Sender<ClusterEvent>,
    monitors: HashMap<Endpoint, ServerMonitor>,
    next_generation: u64,
    disposed: CancellationToken,
}

impl ClusterActor {
    pub(crate) fn new(
        settings: Arc<ClusterSettings>,
        probe: Arc<dyn ServerProbe>,
        receiver: mpsc::Receiver<ClusterMessage>,
        description: watch::Sender<Arc<ClusterDescription>>,
        events: broadcast::Sender<ClusterEvent>,
        disposed: CancellationToken,
    ) -> Self {
        let (update_sender, update_receiver) = mpsc::channel(32);
        let cluster_id = description.borrow().cluster_id();
        Self {
            cluster_id,
            settings,
            probe,
            receiver,
            update_receiver,
            update_sender,
            description,
            events,
            monitors: HashMap::new(),
            next_generation: 1,
            disposed,
        }
    }

    fn start_monitor(&mut self, endpoint: Endpoint) {
        if self.monitors.contains_key(&endpoint) {
            return;
        }
        let generation = self.next_generation;
        self.next_generation += 1;
        tracing::debug!(%endpoint, generation, "Starting server monitor");
        let monitor = ServerMonitor::start(
            endpoint.clone(),
            generation,
            self.probe.clone(),
            self.settings.clone(),
            self.update_sender.clone(),
            self.disposed.child_token(),
        );
        self.monitors.insert(endpoint, monitor);
    }

    async fn stop_monitor(&mut self, endpoint: &Endpoint) {
        if let Some(monitor) = self.monitors.remove(endpoint) {
            tracing::debug!(%endpoint, "Stopping server monitor");
            monitor.stop().await;
        }
    }

    fn start_seed_monitors(&mut self) {
        let seeds = self
            .description
            .borrow()
            .endpoints()
            .cloned()
            .collect::<Vec<_>>();
        for seed in seeds {
            self.start_monitor(seed);
        }
    }

    /// Drops outcomes from a monitor that has since been stopped.
    async fn handle_monitor_update(&mut self, update: MonitorUpdate) {
        let current = self
            .monitors
            .get(update.description.endpoint())
            .map(ServerMonitor::generation);
        if current != Some(update.generation) {
            tracing::trace!(
                endpoint = %update.description.endpoint(),
                generation = update.generation,
                "Discarding update from a stopped monitor"
            );
            return;
        }
        self.handle_update(update.description).await;
    }

    /// Runs the reducer and publishes the result, if any.
    #[instrument(level = "trace", skip(self, update), fields(endpoint = %update.endpoint()))]
    async fn handle_update(&mut self, update: ServerDescription) {
        let current = self.description.borrow().clone();
        let transition = match TopologyStateMachine::apply(&current, update) {
            Some(transition) => transition,
            None => return,
        };

        for endpoint in &transition.removed {
            self.stop_monitor(endpoint).await;
        }
        for endpoint in &transition.added {
            self.start_monitor(endpoint.clone());
        }

        if current.revision() == 0 {
            tracing::info!("Cluster is monitoring");
        }
        let new = Arc::new(transition.description);
        self.description.send_replace(new.clone());
        tracing::debug!(
            revision = new.revision(),
            topology_type = ?new.topology_type(),
            "Published cluster description"
        );

        // Nobody listening is fine.
        for endpoint in transition.removed {
            let _ = self.events.send(ClusterEvent::ServerRemoved(endpoint));
        }
        for endpoint in transition.added {
            let _ = self.events.send(ClusterEvent::ServerAdded(endpoint));
        }
        let _ = self.events.send(ClusterEvent::DescriptionChanged { old: current, new });
    }

    fn request_heartbeat(&self, endpoint: Option<&Endpoint>) {
        match endpoint {
            Some(endpoint) => {
                if let Some(monitor) = self.monitors.get(endpoint) {
                    monitor.request_heartbeat();
                }
            }
            None => self
                .monitors
                .values()
                .for_each(ServerMonitor::request_heartbeat),
        }
    }

    #[instrument(level = "debug", skip(self))]
    async fn invalidate_server(&mut self, endpoint: Endpoint, reason: String) {
        tracing::warn!(%endpoint, %reason, "Invalidating server");
        let update = ServerDescription::from_error(endpoint.clone(), ServerError::Invalidated(reason));
        self.handle_update(update).await;
        self.request_heartbeat(Some(&endpoint));
    }

    /// Stops every monitor and waits for all of them.
    async fn shutdown(&mut self) {
        self.disposed.cancel();
        let monitors = self.monitors.drain().map(|(_, monitor)| monitor).collect::<Vec<_>>();
        for monitor in monitors {
            tracing::debug!(endpoint = %monitor.endpoint(), "Stopping server monitor");
            monitor.stop().await;
        }
        tracing::info!("Cluster disposed");
    }
}

#[instrument(
    level = "debug",
    name = "Running Cluster Actor",
    skip(actor),
    fields(cluster_id = %actor.cluster_id)
)]
pub(crate) async fn run_cluster_actor(mut actor: ClusterActor) {
    actor.start_seed_monitors();

    let mut respond_to: Option<oneshot::Sender<()>> = None;
    loop {
        tokio::select! {
            opt_msg = actor.receiver.recv() => {
                let msg = match opt_msg {
                    Some(msg) => msg,
                    // Every handle was dropped.
                    None => break,
                };
                match msg {
                    ClusterMessage::RequestHeartbeat { endpoint } => {
                        actor.request_heartbeat(endpoint.as_ref());
                    }
                    ClusterMessage::InvalidateServer { endpoint, reason } => {
                        actor.invalidate_server(endpoint, reason).await;
                    }
                    ClusterMessage::Dispose { respond_to: tx } => {
                        respond_to = Some(tx);
                        break;
                    }
                }
            },
            Some(update) = actor.update_receiver.recv() => {
                actor.handle_monitor_update(update).await;
            }
        }
    }

    actor.shutdown().await;
    // Waiters see the watch channel close once the actor is dropped.
    drop(actor);
    if let Some(tx) = respond_to {
        let _ = tx.send(());
    }
}
