mod cluster_actor;
mod cluster_builder;
mod cluster_error;
mod cluster_handle;
mod cluster_helpers;

pub(crate) use cluster_actor::{run_cluster_actor, ClusterActor};
pub use cluster_builder::ClusterBuilder;
pub use cluster_error::ClusterError;
pub use cluster_handle::{Cluster, Server};
pub use cluster_helpers::ClusterState;
pub(crate) use cluster_helpers::{ClusterMessage, WaitOutcome};
