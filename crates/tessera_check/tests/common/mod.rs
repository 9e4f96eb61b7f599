#![allow(dead_code)]

//! Shared fixtures for integration tests: scripted master and tablet server
//! implementations plus cluster builders.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use tessera_check::{
    ChecksumOptions, Cluster, Master, Replica, ReplicaRole, ScanProgress, Table, TableSchema,
    Tablet, TabletServer, TabletState, TabletStatus,
};

/// Scripted outcome of one tablet's checksum scan.
#[derive(Clone, Debug)]
pub enum ScanScript {
    /// Report some progress, then finish with this digest.
    Checksum(u64),
    /// Fail with this message.
    Error(String),
    /// Never finish. Used for timeout scenarios.
    Hang,
}

/// In-memory tablet server with scripted state and scan outcomes.
pub struct FakeTabletServer {
    uuid: String,
    address: String,
    healthy: bool,
    timestamp: u64,
    tablets: BTreeMap<String, TabletStatus>,
    scans: BTreeMap<String, ScanScript>,
    scan_delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    seen_snapshots: Mutex<Vec<Option<u64>>>,
}

impl FakeTabletServer {
    pub fn new(uuid: &str, address: &str) -> Self {
        Self {
            uuid: uuid.to_string(),
            address: address.to_string(),
            healthy: true,
            timestamp: 0,
            tablets: BTreeMap::new(),
            scans: BTreeMap::new(),
            scan_delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            seen_snapshots: Mutex::new(Vec::new()),
        }
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Host a replica of `tablet_id` in the given state.
    pub fn with_replica(mut self, tablet_id: &str, state: TabletState) -> Self {
        self.tablets.insert(
            tablet_id.to_string(),
            TabletStatus {
                state,
                ..TabletStatus::default()
            },
        );
        self
    }

    pub fn with_replica_status(mut self, tablet_id: &str, status: TabletStatus) -> Self {
        self.tablets.insert(tablet_id.to_string(), status);
        self
    }

    pub fn with_scan(mut self, tablet_id: &str, script: ScanScript) -> Self {
        self.scans.insert(tablet_id.to_string(), script);
        self
    }

    pub fn with_scan_delay(mut self, delay: Duration) -> Self {
        self.scan_delay = delay;
        self
    }

    /// Highest number of scans observed in flight at once.
    pub fn max_in_flight_scans(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Snapshot timestamp received by each scan, in arrival order. `None`
    /// means the scan was not a snapshot scan.
    pub fn seen_snapshot_timestamps(&self) -> Vec<Option<u64>> {
        self.seen_snapshots
            .lock()
            .expect("snapshot log")
            .clone()
    }

    async fn run_script(&self, tablet_id: &str, progress: &ScanProgress) -> anyhow::Result<u64> {
        if !self.scan_delay.is_zero() {
            tokio::time::sleep(self.scan_delay).await;
        }
        match self.scans.get(tablet_id) {
            Some(ScanScript::Checksum(checksum)) => {
                progress.record(100, 4096);
                Ok(*checksum)
            }
            Some(ScanScript::Error(message)) => Err(anyhow!("{message}")),
            Some(ScanScript::Hang) => std::future::pending().await,
            None => Err(anyhow!("no scan scripted for tablet {tablet_id}")),
        }
    }
}

#[async_trait]
impl TabletServer for FakeTabletServer {
    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self) -> anyhow::Result<()> {
        if self.healthy {
            Ok(())
        } else {
            bail!("connection refused")
        }
    }

    async fn fetch_info(&self) -> anyhow::Result<()> {
        if self.healthy {
            Ok(())
        } else {
            bail!("connection refused")
        }
    }

    fn is_healthy(&self) -> bool {
        self.healthy
    }

    fn current_timestamp(&self) -> u64 {
        self.timestamp
    }

    fn replica_state(&self, tablet_id: &str) -> TabletState {
        self.tablets
            .get(tablet_id)
            .map(|status| status.state)
            .unwrap_or_default()
    }

    fn tablet_status(&self, tablet_id: &str) -> Option<TabletStatus> {
        self.tablets.get(tablet_id).cloned()
    }

    async fn checksum_tablet(
        &self,
        tablet_id: &str,
        _schema: &TableSchema,
        options: &ChecksumOptions,
        progress: ScanProgress,
    ) -> anyhow::Result<u64> {
        self.seen_snapshots
            .lock()
            .expect("snapshot log")
            .push(options.use_snapshot.then_some(options.snapshot_timestamp));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let result = self.run_script(tablet_id, &progress).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// In-memory master serving a fixed cluster layout.
pub struct FakeMaster {
    tables: Vec<Table>,
    servers: BTreeMap<String, Arc<dyn TabletServer>>,
}

impl FakeMaster {
    pub fn new(tables: Vec<Table>, servers: Vec<Arc<FakeTabletServer>>) -> Self {
        let servers = servers
            .into_iter()
            .map(|server| (server.uuid().to_string(), server as Arc<dyn TabletServer>))
            .collect();
        Self { tables, servers }
    }
}

#[async_trait]
impl Master for FakeMaster {
    async fn connect(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn list_tables(&self) -> anyhow::Result<Vec<Table>> {
        Ok(self
            .tables
            .iter()
            .map(|table| Table {
                tablets: Vec::new(),
                ..table.clone()
            })
            .collect())
    }

    async fn list_tablets(&self, table_name: &str) -> anyhow::Result<Vec<Tablet>> {
        self.tables
            .iter()
            .find(|table| table.name == table_name)
            .map(|table| table.tablets.clone())
            .ok_or_else(|| anyhow!("unknown table {table_name}"))
    }

    async fn list_tablet_servers(
        &self,
    ) -> anyhow::Result<BTreeMap<String, Arc<dyn TabletServer>>> {
        Ok(self.servers.clone())
    }
}

pub fn table(name: &str, num_replicas: usize, tablets: Vec<Tablet>) -> Table {
    Table {
        name: name.to_string(),
        num_replicas,
        schema: TableSchema {
            columns: vec!["key".to_string(), "value".to_string()],
        },
        tablets,
    }
}

pub fn tablet(id: &str, replicas: &[(&str, ReplicaRole)]) -> Tablet {
    Tablet {
        id: id.to_string(),
        replicas: replicas
            .iter()
            .map(|(uuid, role)| Replica {
                server_uuid: uuid.to_string(),
                role: *role,
            })
            .collect(),
    }
}

pub async fn fetch_cluster(master: &FakeMaster) -> Cluster {
    Cluster::fetch(master).await.expect("cluster fetch")
}
