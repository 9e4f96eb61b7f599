//! Immutable snapshot of cluster metadata fetched from the master.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::remote::{Master, TabletServer};

/// Role of one tablet replica in its consensus group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaRole {
    Leader,
    Follower,
    #[default]
    Unknown,
}

/// One copy of a tablet, hosted on one tablet server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Replica {
    pub server_uuid: String,
    #[serde(default)]
    pub role: ReplicaRole,
}

impl Replica {
    pub fn is_leader(&self) -> bool {
        self.role == ReplicaRole::Leader
    }

    pub fn is_follower(&self) -> bool {
        self.role == ReplicaRole::Follower
    }
}

/// Horizontal partition of a table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tablet {
    pub id: String,
    #[serde(default)]
    pub replicas: Vec<Replica>,
}

/// Column layout, forwarded opaquely to checksum scans.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<String>,
}

/// One table and its tablet list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    /// Declared replication factor. The per-tablet replica lists carry the
    /// observed counts.
    pub num_replicas: usize,
    #[serde(default)]
    pub schema: TableSchema,
    #[serde(default)]
    pub tablets: Vec<Tablet>,
}

/// Cluster membership and table layout, built once from the master and
/// read-only afterwards.
pub struct Cluster {
    pub tables: Vec<Table>,
    pub tablet_servers: BTreeMap<String, Arc<dyn TabletServer>>,
}

impl Cluster {
    /// Connect to the master and retrieve the tables, the tablet servers,
    /// and the tablet list of every table.
    pub async fn fetch(master: &dyn Master) -> Result<Cluster> {
        master.connect().await?;
        let mut tables = master.list_tables().await?;
        let tablet_servers = master.list_tablet_servers().await?;
        debug!(
            tables = tables.len(),
            tablet_servers = tablet_servers.len(),
            "retrieved cluster membership"
        );
        for table in &mut tables {
            table.tablets = master.list_tablets(&table.name).await?;
            debug!(table = %table.name, tablets = table.tablets.len(), "retrieved tablet list");
        }
        Ok(Cluster {
            tables,
            tablet_servers,
        })
    }
}
