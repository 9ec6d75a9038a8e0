/*!
db_cluster is the cluster-awareness layer of a database driver. It discovers and monitors
the nodes of a standalone, replica set, or sharded deployment and answers two questions
at any time: what does the cluster look like right now, and which node should run the next
operation.

This library requires tokio. A single background actor owns the topology and one monitor
task per known node; every change is published as an immutable [`ClusterDescription`]
snapshot, so readers never wait on the writer. Talking to a node is left to a
[`ServerProbe`] supplied by the protocol layer.

# Example
```rust,no_run
# async fn run(probe: impl db_cluster::ServerProbe) -> Result<(), db_cluster::ClusterError> {
use std::time::Duration;

use db_cluster::{Cluster, ReadPreference, ReadPreferenceServerSelector};
use tokio_util::sync::CancellationToken;

let cluster = Cluster::builder()
    .set_seeds(&["db1:27017", "db2:27017"])
    .set_replica_set_name("rs0")
    .set_probe(probe)
    .build()?;

let selector = ReadPreferenceServerSelector::new(ReadPreference::secondary_preferred());
let server = cluster
    .select_server(&selector, Some(Duration::from_secs(5)), &CancellationToken::new())
    .await?;

//...run the operation against server.endpoint() here...

cluster.dispose().await;
# Ok(())
# }
```
*/

mod cluster;
mod cluster_description;
mod cluster_settings;
mod endpoint;
mod events;
mod probe;
mod read_preference;
mod server_description;
mod server_monitor;
mod server_selector;
mod topology;

#[cfg(test)]
mod test_support;

pub use cluster::{Cluster, ClusterBuilder, ClusterError, ClusterState, Server};
pub use cluster_description::{ClusterDescription, ClusterId, ClusterSettingsSnapshot, TopologyType};
pub use cluster_settings::{
    ClusterSettings, ConnectionMode, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_LOCAL_THRESHOLD,
    DEFAULT_MIN_HEARTBEAT_INTERVAL, DEFAULT_PROBE_TIMEOUT, DEFAULT_SERVER_SELECTION_TIMEOUT,
};
pub use endpoint::{Endpoint, DEFAULT_PORT};
pub use events::{ClusterEvent, ClusterEvents};
pub use probe::{ProbeReply, ServerProbe};
pub use read_preference::{ReadPreference, ReadPreferenceMode};
pub use server_description::{ServerDescription, ServerError, ServerRole, ServerState, TagSet};
pub use server_selector::{
    AnyServerSelector, CompositeServerSelector, DelegateServerSelector, EndpointServerSelector,
    LatencyLimitingServerSelector, ReadPreferenceServerSelector, ServerSelector,
    WritableServerSelector,
};
pub use topology::{TopologyStateMachine, TopologyTransition};

pub fn error_chain_fmt(
    e: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{}\n", e)?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{}", cause)?;
        current = cause.source();
    }
    Ok(())
}
