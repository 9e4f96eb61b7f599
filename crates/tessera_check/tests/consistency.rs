//! Consistency checker behavior over scripted clusters.

mod common;

use std::sync::Arc;

use common::{fetch_cluster, table, tablet, FakeMaster, FakeTabletServer};
use tessera_check::{
    CheckError, CheckOutput, ClusterCheck, DataState, ReplicaRole, TabletState, TabletStatus,
};

const REPLICAS: [(&str, ReplicaRole); 3] = [
    ("ts-1", ReplicaRole::Leader),
    ("ts-2", ReplicaRole::Follower),
    ("ts-3", ReplicaRole::Follower),
];

fn running_server(i: usize) -> FakeTabletServer {
    FakeTabletServer::new(&format!("ts-{i}"), &format!("10.0.0.{i}:7051"))
        .with_replica("tb", TabletState::Running)
}

fn one_tablet_master(servers: Vec<Arc<FakeTabletServer>>) -> FakeMaster {
    FakeMaster::new(vec![table("t", 3, vec![tablet("tb", &REPLICAS)])], servers)
}

#[tokio::test]
async fn healthy_table_passes() {
    let servers = (1..=3).map(|i| Arc::new(running_server(i))).collect();
    let master = one_tablet_master(servers);
    let (out, report) = CheckOutput::capture();
    let check = ClusterCheck::new(fetch_cluster(&master).await, out);

    check.check_tables_consistency().expect("healthy table");

    let report = report.contents();
    assert!(report.contains("Table t is HEALTHY (1 tablets checked)"));
    assert!(report.contains("The metadata for 1 table(s) is HEALTHY"));
}

#[tokio::test]
async fn missing_leader_is_an_error() {
    let servers = (1..=3).map(|i| Arc::new(running_server(i))).collect();
    let followers = [
        ("ts-1", ReplicaRole::Follower),
        ("ts-2", ReplicaRole::Follower),
        ("ts-3", ReplicaRole::Follower),
    ];
    let master = FakeMaster::new(vec![table("t", 3, vec![tablet("tb", &followers)])], servers);
    let (out, report) = CheckOutput::capture();
    let check = ClusterCheck::new(fetch_cluster(&master).await, out);

    let err = check
        .check_tables_consistency()
        .expect_err("leaderless tablet");
    assert!(matches!(err, CheckError::Corruption(_)), "{err:?}");

    let report = report.contents();
    assert!(report.contains("ERROR: No leader detected"));
    assert!(report.contains("1 out of 1 table(s) are not in a healthy state"));
}

#[tokio::test]
async fn no_matching_tables_is_ok() {
    let servers = (1..=3).map(|i| Arc::new(running_server(i))).collect();
    let master = one_tablet_master(servers);
    let (out, report) = CheckOutput::capture();
    let check = ClusterCheck::new(fetch_cluster(&master).await, out)
        .with_table_filters(vec!["nope".to_string()]);

    check.check_tables_consistency().expect("nothing to check");
    assert!(report
        .contents()
        .contains("The cluster doesn't have any matching tables"));
}

#[tokio::test]
async fn replica_count_mismatch_warns() {
    let servers = (1..=3).map(|i| Arc::new(running_server(i))).collect();
    let two_replicas = [
        ("ts-1", ReplicaRole::Leader),
        ("ts-2", ReplicaRole::Follower),
    ];
    let master = FakeMaster::new(
        vec![table("t", 3, vec![tablet("tb", &two_replicas)])],
        servers,
    );
    let (out, report) = CheckOutput::capture();
    let check = ClusterCheck::new(fetch_cluster(&master).await, out);

    let err = check
        .check_tables_consistency()
        .expect_err("under-replicated tablet");
    assert!(matches!(err, CheckError::Corruption(_)), "{err:?}");
    assert!(report.contents().contains("has 2 instead of 3 replicas"));
}

#[tokio::test]
async fn replica_count_check_can_be_disabled() {
    let servers = (1..=3).map(|i| Arc::new(running_server(i))).collect();
    let two_replicas = [
        ("ts-1", ReplicaRole::Leader),
        ("ts-2", ReplicaRole::Follower),
    ];
    let master = FakeMaster::new(
        vec![table("t", 3, vec![tablet("tb", &two_replicas)])],
        servers,
    );
    let (out, _report) = CheckOutput::capture();
    let check = ClusterCheck::new(fetch_cluster(&master).await, out)
        .with_replica_count_check(false);

    // Two running replicas still form a majority of the declared three.
    check.check_tables_consistency().expect("still a quorum");
}

#[tokio::test]
async fn unavailable_server_warns() {
    let servers = vec![
        Arc::new(running_server(1)),
        Arc::new(running_server(2)),
        Arc::new(running_server(3).unhealthy()),
    ];
    let master = one_tablet_master(servers);
    let (out, report) = CheckOutput::capture();
    let check = ClusterCheck::new(fetch_cluster(&master).await, out);

    let err = check.check_tables_consistency().expect_err("bad tablet");
    assert!(matches!(err, CheckError::Corruption(_)), "{err:?}");
    assert!(report.contents().contains(
        "Should have a replica on tablet server ts-3 (10.0.0.3:7051), but it is unavailable"
    ));
}

#[tokio::test]
async fn unreported_replica_warns() {
    let servers = vec![
        Arc::new(running_server(1)),
        Arc::new(running_server(2)),
        // ts-3 answers but does not host the tablet.
        Arc::new(FakeTabletServer::new("ts-3", "10.0.0.3:7051")),
    ];
    let master = one_tablet_master(servers);
    let (out, report) = CheckOutput::capture();
    let check = ClusterCheck::new(fetch_cluster(&master).await, out);

    let err = check.check_tables_consistency().expect_err("bad tablet");
    assert!(matches!(err, CheckError::Corruption(_)), "{err:?}");
    assert!(report
        .contents()
        .contains("Missing a tablet replica on tablet server ts-3"));
}

#[tokio::test]
async fn bad_state_reports_status_details() {
    let servers = vec![
        Arc::new(running_server(1)),
        Arc::new(running_server(2)),
        Arc::new(FakeTabletServer::new("ts-3", "10.0.0.3:7051").with_replica_status(
            "tb",
            TabletStatus {
                state: TabletState::Failed,
                last_status: "disk error".to_string(),
                data_state: DataState::Copying,
            },
        )),
    ];
    let master = one_tablet_master(servers);
    let (out, report) = CheckOutput::capture();
    let check = ClusterCheck::new(fetch_cluster(&master).await, out);

    let err = check.check_tables_consistency().expect_err("bad tablet");
    assert!(matches!(err, CheckError::Corruption(_)), "{err:?}");

    let report = report.contents();
    assert!(report.contains("Bad state on tablet server ts-3 (10.0.0.3:7051): FAILED"));
    assert!(report.contains("Last status: disk error"));
    assert!(report.contains("Data state:  COPYING"));
    // Healthy replicas print as info next to the findings.
    assert!(report.contains("OK state on tablet server ts-1 (10.0.0.1:7051): RUNNING"));
}

#[tokio::test]
async fn losing_the_live_majority_is_an_error() {
    let servers = vec![
        Arc::new(running_server(1)),
        Arc::new(running_server(2).unhealthy()),
        Arc::new(running_server(3).unhealthy()),
    ];
    let master = one_tablet_master(servers);
    let (out, report) = CheckOutput::capture();
    let check = ClusterCheck::new(fetch_cluster(&master).await, out);

    check.check_tables_consistency().expect_err("no quorum");
    assert!(report
        .contents()
        .contains("does not have a majority of replicas on live tablet servers"));
}

#[tokio::test]
async fn losing_the_running_majority_is_an_error() {
    let servers = vec![
        Arc::new(running_server(1)),
        Arc::new(
            FakeTabletServer::new("ts-2", "10.0.0.2:7051")
                .with_replica("tb", TabletState::Bootstrapping),
        ),
        Arc::new(
            FakeTabletServer::new("ts-3", "10.0.0.3:7051")
                .with_replica("tb", TabletState::Bootstrapping),
        ),
    ];
    let master = one_tablet_master(servers);
    let (out, report) = CheckOutput::capture();
    let check = ClusterCheck::new(fetch_cluster(&master).await, out);

    check.check_tables_consistency().expect_err("not running");
    assert!(report
        .contents()
        .contains("does not have a majority of replicas in RUNNING state"));
}

#[tokio::test]
async fn fetch_info_succeeds_across_all_servers() {
    let servers = (1..=3).map(|i| Arc::new(running_server(i))).collect();
    let master = one_tablet_master(servers);
    let (out, report) = CheckOutput::capture();
    let check = ClusterCheck::new(fetch_cluster(&master).await, out);

    check
        .fetch_info_from_tablet_servers()
        .await
        .expect("all reachable");
    assert!(report
        .contents()
        .contains("Fetched info from all 3 tablet servers"));
}

#[tokio::test]
async fn partially_unreachable_servers_warn_but_pass() {
    let servers = vec![
        Arc::new(running_server(1)),
        Arc::new(running_server(2).unhealthy()),
        Arc::new(running_server(3)),
    ];
    let master = one_tablet_master(servers);
    let (out, report) = CheckOutput::capture();
    let check = ClusterCheck::new(fetch_cluster(&master).await, out);

    check
        .fetch_info_from_tablet_servers()
        .await
        .expect("partial fetch still passes");

    let report = report.contents();
    assert!(report.contains("Unable to fetch info from tablet server ts-2"));
    assert!(report.contains("Fetched info from 2 tablet servers, 1 weren't reachable"));
}

#[tokio::test]
async fn fully_unreachable_cluster_is_a_network_error() {
    let servers = (1..=3)
        .map(|i| Arc::new(running_server(i).unhealthy()))
        .collect();
    let master = one_tablet_master(servers);
    let (out, _report) = CheckOutput::capture();
    let check = ClusterCheck::new(fetch_cluster(&master).await, out);

    let err = check
        .fetch_info_from_tablet_servers()
        .await
        .expect_err("nothing reachable");
    assert!(matches!(err, CheckError::NetworkError(_)), "{err:?}");
}

#[tokio::test]
async fn cluster_without_tablet_servers_is_not_found() {
    let master = FakeMaster::new(vec![table("t", 3, vec![])], vec![]);
    let (out, _report) = CheckOutput::capture();
    let check = ClusterCheck::new(fetch_cluster(&master).await, out);

    let err = check
        .fetch_info_from_tablet_servers()
        .await
        .expect_err("no servers");
    assert!(matches!(err, CheckError::NotFound(_)), "{err:?}");
}
