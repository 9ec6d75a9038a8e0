mod round_trip_time;
mod server_monitor_actor;
mod server_monitor_handle;

pub(crate) use round_trip_time::AverageRoundTripTime;
pub(crate) use server_monitor_actor::ServerMonitorActor;
pub(crate) use server_monitor_handle::ServerMonitor;

use crate::server_description::ServerDescription;

#[derive(Debug)]
pub(crate) enum ServerMonitorMessage {
    /// Probe again as soon as the minimum heartbeat interval allows.
    RequestHeartbeat,
}

/// One probe outcome, tagged with the monitor instance that produced it.
///
/// An endpoint that is removed and re-added gets a new monitor with a new generation, so
/// outcomes still queued from the old one can be told apart.
#[derive(Debug)]
pub(crate) struct MonitorUpdate {
    pub(crate) generation: u64,
    pub(crate) description: ServerDescription,
}
