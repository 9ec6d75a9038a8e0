use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::{cluster_description::ClusterDescription, endpoint::Endpoint};

#[derive(Clone, Debug)]
pub enum ClusterEvent {
    /// A new description was published.
    DescriptionChanged {
        old: Arc<ClusterDescription>,
        new: Arc<ClusterDescription>,
    },
    /// A member was discovered and its monitor started.
    ServerAdded(Endpoint),
    /// A member left the configuration and its monitor stopped.
    ServerRemoved(Endpoint),
}

/// A subscription to [`ClusterEvent`]s. Dropping it unsubscribes.
///
/// Publishing never waits for subscribers; one that falls too far behind skips the events it
/// missed.
#[derive(Debug)]
pub struct ClusterEvents {
    receiver: broadcast::Receiver<ClusterEvent>,
    disposed: CancellationToken,
}

impl ClusterEvents {
    pub(crate) fn new(
        receiver: broadcast::Receiver<ClusterEvent>,
        disposed: CancellationToken,
    ) -> Self {
        Self { receiver, disposed }
    }

    /// Waits for the next event. Returns `None` once the cluster is disposed and every
    /// event published before that has been received.
    pub async fn recv(&mut self) -> Option<ClusterEvent> {
        loop {
            let received = tokio::select! {
                biased;
                result = self.receiver.recv() => Some(result),
                _ = self.disposed.cancelled() => None,
            };

            let result = match received {
                Some(result) => result,
                None => match self.receiver.try_recv() {
                    Ok(event) => Ok(event),
                    Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                        Err(broadcast::error::RecvError::Lagged(skipped))
                    }
                    Err(_) => Err(broadcast::error::RecvError::Closed),
                },
            };

            match result {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Cluster event subscriber lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
