use std::sync::Arc;

use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::{
    cluster_settings::ClusterSettings,
    endpoint::Endpoint,
    probe::ServerProbe,
    server_description::{ServerDescription, ServerError, ServerRole, ServerState},
};

use super::{AverageRoundTripTime, MonitorUpdate, ServerMonitorMessage};

pub(crate) struct ServerMonitorActor {
    endpoint: Endpoint,
    generation: u64,
    probe: Arc<dyn ServerProbe>,
    settings: Arc<ClusterSettings>,
    receiver: mpsc::Receiver<ServerMonitorMessage>,
    /// The cluster's single update channel. Every probe outcome goes here.
    updates: mpsc::Sender<MonitorUpdate>,
    cancellation: CancellationToken,
    round_trip_time: AverageRoundTripTime,
    last_reported: (ServerState, ServerRole),
}

impl ServerMonitorActor {
    pub(crate) fn new(
        endpoint: Endpoint,
        generation: u64,
        probe: Arc<dyn ServerProbe>,
        settings: Arc<ClusterSettings>,
        receiver: mpsc::Receiver<ServerMonitorMessage>,
        updates: mpsc::Sender<MonitorUpdate>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            endpoint,
            generation,
            probe,
            settings,
            receiver,
            updates,
            cancellation,
            round_trip_time: AverageRoundTripTime::default(),
            last_reported: (ServerState::Disconnected, ServerRole::Unknown),
        }
    }

    /// Runs one probe. Returns `None` if the monitor was cancelled meanwhile.
    #[instrument(level = "trace", skip(self), fields(endpoint = %self.endpoint))]
    async fn check(&mut self) -> Option<ServerDescription> {
        let timeout = self.settings.probe_timeout();
        let started = Instant::now();

        let outcome = tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => return None,
            outcome = tokio::time::timeout(timeout, self.probe.probe(&self.endpoint, timeout)) => outcome,
        };

        let description = match outcome {
            Ok(Ok(reply)) => {
                let round_trip_time = self.round_trip_time.add_sample(started.elapsed());
                ServerDescription::from_reply(self.endpoint.clone(), reply, round_trip_time)
            }
            Ok(Err(e)) => {
                tracing::warn!(endpoint = %self.endpoint, "Probe failed. Caused by: {:#}", e);
                self.round_trip_time.reset();
                ServerDescription::from_error(
                    self.endpoint.clone(),
                    ServerError::ProbeFailed(format!("{:#}", e)),
                )
            }
            Err(_) => {
                tracing::warn!(endpoint = %self.endpoint, ?timeout, "Probe timed out");
                self.round_trip_time.reset();
                ServerDescription::from_error(self.endpoint.clone(), ServerError::ProbeTimeout(timeout))
            }
        };

        Some(description)
    }

    /// Hands the description to the cluster. Returns `false` when the monitor should stop.
    async fn report(&mut self, description: ServerDescription) -> bool {
        let update = MonitorUpdate {
            generation: self.generation,
            description,
        };
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => false,
            sent = self.updates.send(update) => sent.is_ok(),
        }
    }

    /// Sleeps until the next probe is due. Returns `false` when the monitor should stop.
    async fn wait(&mut self, probe_started: Instant, state_changed: bool) -> bool {
        let min_interval = self.settings.min_heartbeat_interval();
        let earliest = probe_started + min_interval;
        let mut next_probe = if state_changed {
            earliest
        } else {
            probe_started + self.settings.heartbeat_interval()
        };

        loop {
            tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => return false,
                msg = self.receiver.recv() => match msg {
                    Some(ServerMonitorMessage::RequestHeartbeat) => {
                        tracing::trace!(endpoint = %self.endpoint, "Heartbeat requested");
                        next_probe = next_probe.min(earliest);
                    }
                    // The owning handle is gone.
                    None => return false,
                },
                _ = tokio::time::sleep_until(next_probe) => return true,
            }
        }
    }
}

#[instrument(
    level = "debug",
    name = "Running Server Monitor",
    skip(actor),
    fields(endpoint = %actor.endpoint)
)]
pub(crate) async fn run_server_monitor(mut actor: ServerMonitorActor) {
    tracing::debug!("Server monitor started");
    loop {
        let probe_started = Instant::now();
        let description = match actor.check().await {
            Some(description) => description,
            None => break,
        };

        let observed = (description.state(), description.role());
        let state_changed = observed != actor.last_reported;
        if state_changed {
            tracing::debug!(
                state = ?observed.0,
                role = %observed.1,
                "Server state changed"
            );
        }
        actor.last_reported = observed;

        if !actor.report(description).await || !actor.wait(probe_started, state_changed).await {
            break;
        }
    }
    tracing::debug!("Server monitor stopped");
}
