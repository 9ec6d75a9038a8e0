use tokio::sync::oneshot;

use crate::endpoint::Endpoint;

#[derive(Debug)]
pub(crate) enum ClusterMessage {
    /// Probe the given member, or every member, as soon as allowed.
    RequestHeartbeat { endpoint: Option<Endpoint> },
    /// An operation found the member unusable; mark it disconnected until a probe says otherwise.
    InvalidateServer { endpoint: Endpoint, reason: String },
    /// Stop every monitor, then answer.
    Dispose { respond_to: oneshot::Sender<()> },
}

/// Lifecycle of a [`Cluster`](crate::Cluster).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClusterState {
    /// Seed monitors are starting and nothing has been observed yet.
    Initializing,

    /// Descriptions are being published.
    Monitoring,

    /// [`Cluster::dispose`](crate::Cluster::dispose) was called. Terminal.
    Disposed,
}

/// Why a suspended call woke up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    Changed,
    TimedOut,
    Cancelled,
    Disposed,
}
