use std::{sync::Arc, time::Duration};

use crate::{cluster_description::ClusterDescription, error_chain_fmt};

#[derive(thiserror::Error)]
pub enum ClusterError {
    #[error("No suitable server was found within {timeout:?}. Last known cluster description: {description}")]
    ServerSelectionTimeout {
        timeout: Duration,
        description: Arc<ClusterDescription>,
    },
    #[error("Cluster description revision {minimum_revision} was not published within {timeout:?}. Last known cluster description: {description}")]
    DescriptionTimeout {
        minimum_revision: u64,
        timeout: Duration,
        description: Arc<ClusterDescription>,
    },
    #[error("The operation was cancelled")]
    OperationCancelled,
    #[error("The cluster has been disposed")]
    ClusterDisposed,
    #[error("The observed servers do not fit the configured topology: {reason}")]
    InvalidTopology {
        reason: String,
        description: Arc<ClusterDescription>,
    },
    #[error("No seeds were supplied and a cluster can't exist without at least one")]
    MissingSeedsError,
    #[error("Invalid endpoint `{0}`")]
    InvalidEndpoint(String),
    #[error("Invalid cluster settings: {0}")]
    InvalidSettings(String),
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

impl ClusterError {
    /// The description the failing operation last saw, if it waited on one.
    pub fn description(&self) -> Option<&Arc<ClusterDescription>> {
        match self {
            ClusterError::ServerSelectionTimeout { description, .. }
            | ClusterError::DescriptionTimeout { description, .. }
            | ClusterError::InvalidTopology { description, .. } => Some(description),
            _ => None,
        }
    }
}

impl std::fmt::Debug for ClusterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
