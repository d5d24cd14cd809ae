//! End-to-end lifecycle of a virtual cluster.
//!
//! Drives a full bring-up, status query and both teardown flavours against
//! the in-memory scheduler and coordination store, verifying:
//!
//! 1. Bring-up order (ZooKeeper, master, agents with Cassandra, Peloton)
//! 2. Wiring of endpoints into dependent modules
//! 3. Distinct agent hostnames
//! 4. Leader discovery
//! 5. Stop-only teardown keeps jobs; removing teardown deletes them
//! 6. Shutdown cancels a bring-up stuck waiting for the leader
//!
//! ## Running
//!
//! ```bash
//! cargo test -p vcluster-e2e --test cluster_lifecycle
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use vcluster::leader::MESOS_LEADER_KEY;
use vcluster::{ClusterSpec, ErrorKind, LeaderLookup, VirtualCluster};
use vcluster_converge::PollConfig;
use vcluster_id::{JobId, Label};
use vcluster_scheduler::{JobState, WorkloadStatus};
use vcluster_testing::{Call, FakeCoordinationStore, FakeScheduler};

const PELOTON_JOBS: [&str; 4] = [
    "e2e_peloton_resmgr",
    "e2e_peloton_hostmgr",
    "e2e_peloton_placement",
    "e2e_peloton_jobmgr",
];

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("vcluster=debug")
        .with_test_writer()
        .try_init();
}

fn poll() -> PollConfig {
    PollConfig::new(10, Duration::from_secs(1))
}

struct Fixture {
    scheduler: Arc<FakeScheduler>,
    store: Arc<FakeCoordinationStore>,
    cluster: VirtualCluster,
}

fn fixture(spec: ClusterSpec) -> Fixture {
    init_tracing();
    let scheduler = Arc::new(FakeScheduler::new());
    let store = Arc::new(FakeCoordinationStore::new());
    store.insert(
        MESOS_LEADER_KEY,
        r#"{"hostname":"mesos-master-0","port":5050}"#,
    );

    let cluster = VirtualCluster::new(Label::parse("e2e").unwrap(), spec, scheduler.clone())
        .with_poll_config(poll())
        .with_leader_lookup(LeaderLookup::new(store.clone()));

    Fixture {
        scheduler,
        store,
        cluster,
    }
}

fn created_names(scheduler: &FakeScheduler) -> Vec<String> {
    scheduler
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Create { name, .. } => Some(name),
            _ => None,
        })
        .collect()
}

fn only_job(scheduler: &FakeScheduler, name: &str) -> JobId {
    let ids = scheduler.jobs_named(name);
    assert_eq!(ids.len(), 1, "expected one job named {name}");
    ids[0].clone()
}

#[tokio::test(start_paused = true)]
async fn test_bring_up_and_remove() {
    let mut spec = ClusterSpec::default();
    spec.peloton.version = Some("0.9.1".to_string());
    let Fixture {
        scheduler,
        store: _store,
        mut cluster,
    } = fixture(spec);

    let info = cluster.setup().await.unwrap();

    // Order: ZooKeeper, master, then agents and Cassandra, then Peloton.
    let names = created_names(&scheduler);
    assert_eq!(names.len(), 8);
    assert_eq!(names[0], "e2e_zookeeper");
    assert_eq!(names[1], "e2e_mesos-master");
    assert_eq!(
        names[2..4].iter().cloned().collect::<BTreeSet<_>>(),
        BTreeSet::from(["e2e_cassandra".to_string(), "e2e_mesos-agent".to_string()])
    );
    assert_eq!(&names[4..], &PELOTON_JOBS);

    // Only one pool is created for the whole cluster.
    assert_eq!(
        scheduler.count_calls(|c| matches!(c, Call::CreatePool(_))),
        1
    );

    // Endpoints.
    assert_eq!(info.zookeeper, "fake-host-0:31000");
    assert_eq!(info.cassandra, "fake-host-0:31000");
    assert_eq!(
        info.mesos_leader,
        Some(("mesos-master-0".to_string(), 5050))
    );
    assert_eq!(info.jobs.len(), 8);

    // Dependent modules see the endpoints of earlier ones.
    let master = scheduler
        .spec(&only_job(&scheduler, "e2e_mesos-master"))
        .unwrap();
    let env = &master.default_config.command.environment;
    assert_eq!(env["MESOS_ZK"], "zk://fake-host-0:31000/mesos");
    assert_eq!(env["MESOS_QUORUM"], "1");

    let jobmgr = scheduler
        .spec(&only_job(&scheduler, "e2e_peloton_jobmgr"))
        .unwrap();
    let env = &jobmgr.default_config.command.environment;
    assert_eq!(env["APP"], "peloton_jobmgr");
    assert_eq!(env["ELECTION_ZK_SERVERS"], "fake-host-0:31000");
    assert_eq!(env["CASSANDRA_HOSTS"], "fake-host-0");
    assert_eq!(env["CASSANDRA_PORT"], "31000");
    assert_eq!(jobmgr.default_config.container.image, "uber/peloton:0.9.1");
    assert!(jobmgr.respool_id.is_some());

    // Every agent registers under its own hostname.
    let agents = scheduler
        .spec(&only_job(&scheduler, "e2e_mesos-agent"))
        .unwrap();
    let hostnames: BTreeSet<_> = (0..agents.instance_count)
        .map(|i| agents.config_for(i).command.environment["MESOS_HOSTNAME"].clone())
        .collect();
    assert_eq!(hostnames.len(), 3);
    assert!(hostnames.iter().all(|h| h.starts_with("e2e-mesos-agent-")));

    let statuses = cluster.status().await.unwrap();
    assert_eq!(statuses.len(), 8);
    assert!(statuses
        .iter()
        .all(|s| s.status.state == JobState::Running));

    let removed = cluster.teardown(true).await.unwrap();
    assert_eq!(removed.len(), 8);
    assert!(removed.iter().all(|id| scheduler.is_deleted(id)));

    // Teardown runs in reverse: the Peloton job manager goes first.
    let first_stop = scheduler
        .calls()
        .into_iter()
        .find_map(|c| match c {
            Call::Stop(id) => Some(id),
            _ => None,
        })
        .unwrap();
    assert_eq!(first_stop, only_job(&scheduler, "e2e_peloton_jobmgr"));

    assert!(cluster.status().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_then_remove() {
    let Fixture {
        scheduler,
        store: _store,
        mut cluster,
    } = fixture(ClusterSpec::default());
    cluster.setup().await.unwrap();

    let stopped = cluster.teardown(false).await.unwrap();
    assert_eq!(stopped.len(), 8);
    assert_eq!(scheduler.count_calls(|c| matches!(c, Call::Delete(_))), 0);
    assert!(stopped.iter().all(|id| !scheduler.is_deleted(id)));

    // Stopped jobs are still listed until removed.
    assert_eq!(cluster.status().await.unwrap().len(), 8);

    let removed = cluster.teardown(true).await.unwrap();
    assert_eq!(
        removed.iter().collect::<BTreeSet<_>>(),
        stopped.iter().collect::<BTreeSet<_>>()
    );
    assert!(removed.iter().all(|id| scheduler.is_deleted(id)));
}

#[tokio::test(start_paused = true)]
async fn test_failed_module_stops_bring_up() {
    let fixture = fixture(ClusterSpec::default());
    let scheduler = fixture.scheduler;
    let mut cluster = fixture.cluster;
    scheduler.script(
        "e2e_cassandra",
        vec![
            WorkloadStatus::new(JobState::Pending, [(JobState::Pending, 1)]),
            WorkloadStatus::new(JobState::Failed, [(JobState::Failed, 1)]),
        ],
    );

    let err = cluster.setup().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Launch);

    // Peloton never starts; the failed job is kept for inspection.
    let names = created_names(&scheduler);
    assert!(PELOTON_JOBS.iter().all(|job| !names.iter().any(|n| n == job)));
    let cassandra = only_job(&scheduler, "e2e_cassandra");
    assert!(!scheduler.is_deleted(&cassandra));

    // A removing teardown still cleans everything up.
    let removed = cluster.teardown(true).await.unwrap();
    assert_eq!(removed.len(), 4);
    assert!(removed.iter().all(|id| scheduler.is_deleted(id)));
}

#[tokio::test(start_paused = true)]
async fn test_bring_up_waits_for_leader() {
    init_tracing();
    let scheduler = Arc::new(FakeScheduler::new());
    let store = Arc::new(FakeCoordinationStore::new());
    let mut cluster = VirtualCluster::new(
        Label::parse("e2e").unwrap(),
        ClusterSpec::default(),
        scheduler.clone(),
    )
    .with_poll_config(PollConfig::new(3, Duration::from_secs(1)))
    .with_leader_lookup(LeaderLookup::new(store.clone()));

    let err = cluster.setup().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);

    // Nothing past the master was started.
    assert_eq!(
        created_names(&scheduler),
        vec!["e2e_zookeeper".to_string(), "e2e_mesos-master".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_leader_wait() {
    init_tracing();
    let scheduler = Arc::new(FakeScheduler::new());
    let store = Arc::new(FakeCoordinationStore::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut cluster = VirtualCluster::new(
        Label::parse("e2e").unwrap(),
        ClusterSpec::default(),
        scheduler.clone(),
    )
    .with_poll_config(PollConfig::new(60, Duration::from_secs(1)))
    .with_shutdown(shutdown_rx)
    .with_leader_lookup(LeaderLookup::new(store));

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        shutdown_tx.send(true).unwrap();
    });

    let err = cluster.setup().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    canceller.await.unwrap();

    // Nothing past the master was started.
    assert_eq!(scheduler.count_calls(|c| matches!(c, Call::Create { .. })), 2);
}
