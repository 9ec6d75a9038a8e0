use std::sync::Arc;

use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{cluster_settings::ClusterSettings, endpoint::Endpoint, probe::ServerProbe};

use super::{
    server_monitor_actor::run_server_monitor, MonitorUpdate, ServerMonitorActor,
    ServerMonitorMessage,
};

/// Owned handle to the background loop probing one endpoint.
///
/// The cluster keeps exactly one per tracked member, next to the membership it guards.
/// Dropping the handle also ends the loop, but [`ServerMonitor::stop`] waits for it.
#[derive(Debug)]
pub(crate) struct ServerMonitor {
    endpoint: Endpoint,
    generation: u64,
    sender: mpsc::Sender<ServerMonitorMessage>,
    cancellation: CancellationToken,
    join_handle: JoinHandle<()>,
}

impl ServerMonitor {
    pub(crate) fn start(
        endpoint: Endpoint,
        generation: u64,
        probe: Arc<dyn ServerProbe>,
        settings: Arc<ClusterSettings>,
        updates: mpsc::Sender<MonitorUpdate>,
        cancellation: CancellationToken,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(8);
        let actor = ServerMonitorActor::new(
            endpoint.clone(),
            generation,
            probe,
            settings,
            receiver,
            updates,
            cancellation.clone(),
        );

        let join_handle = tokio::spawn(run_server_monitor(actor).in_current_span());

        Self {
            endpoint,
            generation,
            sender,
            cancellation,
            join_handle,
        }
    }

    pub(crate) fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Asks for a probe sooner than the regular heartbeat.
    pub(crate) fn request_heartbeat(&self) {
        // A full queue already holds a pending request.
        let _ = self.sender.try_send(ServerMonitorMessage::RequestHeartbeat);
    }

    /// Cancels the loop and waits until it has exited.
    pub(crate) async fn stop(self) {
        self.cancellation.cancel();
        if let Err(e) = self.join_handle.await {
            if e.is_panic() {
                tracing::error!(
                    endpoint = %self.endpoint,
                    "Server monitor panicked. Caused by: {}",
                    e
                );
            }
        }
    }
}
