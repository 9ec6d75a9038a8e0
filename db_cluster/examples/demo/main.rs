use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use db_cluster::{
    Cluster, ClusterEvent, Endpoint, ProbeReply, ReadPreference, ReadPreferenceServerSelector,
    ServerProbe, WritableServerSelector,
};
use tokio_util::sync::CancellationToken;
use tracing::subscriber::set_global_default;
use tracing_log::LogTracer;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

const MEMBERS: [&str; 3] = ["node1:27017", "node2:27017", "node3:27017"];

/// Pretends to be a three-member replica set whose primary moves every few seconds.
struct SimulatedReplicaSet {
    hosts: Vec<Endpoint>,
    primary: AtomicUsize,
}

impl SimulatedReplicaSet {
    fn new() -> anyhow::Result<Self> {
        let hosts = MEMBERS
            .iter()
            .map(|member| member.parse::<Endpoint>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            hosts,
            primary: AtomicUsize::new(0),
        })
    }

    fn elect_next(&self) {
        let next = (self.primary.load(Ordering::SeqCst) + 1) % self.hosts.len();
        self.primary.store(next, Ordering::SeqCst);
        tracing::info!(primary = %self.hosts[next], "Simulated election");
    }
}

#[async_trait]
impl ServerProbe for SimulatedReplicaSet {
    async fn probe(&self, endpoint: &Endpoint, _timeout: Duration) -> anyhow::Result<ProbeReply> {
        let index = self
            .hosts
            .iter()
            .position(|host| host == endpoint)
            .ok_or_else(|| anyhow::anyhow!("Unknown host {}", endpoint))?;

        // Some network latency, different per member.
        tokio::time::sleep(Duration::from_millis(5 + 10 * index as u64)).await;

        let reply = if index == self.primary.load(Ordering::SeqCst) {
            ProbeReply::primary("rs0")
        } else {
            ProbeReply::secondary("rs0")
        };
        Ok(reply
            .with_set_version(1)
            .with_tag("dc", if index == 2 { "west" } else { "east" })
            .with_hosts(self.hosts.clone()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();

    let replica_set = Arc::new(SimulatedReplicaSet::new()?);

    // Only one seed; the others are discovered from its host list.
    let cluster = Cluster::builder()
        .set_seeds(&[MEMBERS[0]])
        .set_replica_set_name("rs0")
        .set_heartbeat_interval(Duration::from_secs(1))
        .set_min_heartbeat_interval(Duration::from_millis(100))
        .set_probe(replica_set.clone())
        .build()?;

    let mut events = cluster.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ClusterEvent::DescriptionChanged { new, .. } => println!("{}", new),
                ClusterEvent::ServerAdded(endpoint) => println!("+ {}", endpoint),
                ClusterEvent::ServerRemoved(endpoint) => println!("- {}", endpoint),
            }
        }
    });

    let cancellation = CancellationToken::new();
    let east_secondary = ReadPreferenceServerSelector::new(
        ReadPreference::secondary().with_tag_set([("dc", "east")]),
    );

    for round in 0..3 {
        let primary = cluster
            .select_server(&WritableServerSelector, None, &cancellation)
            .await?;
        println!("round {}: writes go to {}", round, primary.endpoint());

        let secondary = cluster
            .select_server(&east_secondary, Some(Duration::from_secs(5)), &cancellation)
            .await?;
        println!(
            "round {}: east reads go to {} ({:?})",
            round,
            secondary.endpoint(),
            secondary.description().round_trip_time()
        );

        replica_set.elect_next();
        // The old primary's handle is no longer trustworthy.
        primary.invalidate("not primary").await?;
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    cluster.dispose().await;
    Ok(())
}

fn setup_tracing() {
    // Redirect all `log`'s events to the subscriber
    LogTracer::init().expect("Failed to set logger");
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer());
    set_global_default(subscriber).expect("Failed to set subscriber");
}
