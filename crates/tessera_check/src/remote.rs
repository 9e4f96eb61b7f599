//! Interface contracts for the master and tablet server collaborators.
//!
//! The check engine only consumes these traits. [`crate::rpc`] provides the
//! wire clients; test fixtures provide scripted implementations.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::checksum::ChecksumOptions;
use crate::cluster::{Table, TableSchema, Tablet};
use crate::reporter::ScanProgress;

/// Replica state as reported by the hosting tablet server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TabletState {
    /// The server did not report this tablet at all.
    #[default]
    Unknown,
    Bootstrapping,
    Running,
    Failed,
    Stopped,
    Tombstoned,
}

impl fmt::Display for TabletState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TabletState::Unknown => "UNKNOWN",
            TabletState::Bootstrapping => "BOOTSTRAPPING",
            TabletState::Running => "RUNNING",
            TabletState::Failed => "FAILED",
            TabletState::Stopped => "STOPPED",
            TabletState::Tombstoned => "TOMBSTONED",
        };
        f.write_str(name)
    }
}

/// On-disk data state of one replica.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataState {
    #[default]
    Ready,
    Copying,
    Deleted,
    Tombstoned,
}

impl fmt::Display for DataState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataState::Ready => "READY",
            DataState::Copying => "COPYING",
            DataState::Deleted => "DELETED",
            DataState::Tombstoned => "TOMBSTONED",
        };
        f.write_str(name)
    }
}

/// Per-tablet status cached from a tablet server's `fetch_info` response.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TabletStatus {
    pub state: TabletState,
    #[serde(default)]
    pub last_status: String,
    #[serde(default)]
    pub data_state: DataState,
}

/// Cluster coordinator: the source of table, tablet, and server membership.
#[async_trait]
pub trait Master: Send + Sync {
    /// Establish a session. Idempotent.
    async fn connect(&self) -> anyhow::Result<()>;

    /// Tables with schema and declared replication factor. Tablet lists are
    /// retrieved separately per table.
    async fn list_tables(&self) -> anyhow::Result<Vec<Table>>;

    /// Tablets of one table, with their replica sets.
    async fn list_tablets(&self, table_name: &str) -> anyhow::Result<Vec<Tablet>>;

    /// All known tablet servers, keyed by uuid.
    async fn list_tablet_servers(&self)
        -> anyhow::Result<BTreeMap<String, Arc<dyn TabletServer>>>;
}

/// One tablet server: identity, state cached by `fetch_info`, and the
/// checksum scan entry point.
///
/// The state accessors are only meaningful after a successful `fetch_info`.
#[async_trait]
pub trait TabletServer: Send + Sync {
    fn uuid(&self) -> &str;

    fn address(&self) -> &str;

    /// `"uuid (address)"`, the form used in report lines.
    fn describe(&self) -> String {
        format!("{} ({})", self.uuid(), self.address())
    }

    /// Establish a session. Idempotent.
    async fn connect(&self) -> anyhow::Result<()>;

    /// Populate health, the tablet status map, and the current timestamp.
    async fn fetch_info(&self) -> anyhow::Result<()>;

    fn is_healthy(&self) -> bool;

    /// The server's current logical timestamp, the candidate snapshot point.
    fn current_timestamp(&self) -> u64;

    /// State of one replica; `Unknown` when the server does not host it.
    fn replica_state(&self, tablet_id: &str) -> TabletState;

    /// Full cached status of one replica, if the server reported it.
    fn tablet_status(&self, tablet_id: &str) -> Option<TabletStatus>;

    /// Run one full checksum scan of `tablet_id`, reporting incremental
    /// progress through `progress` and resolving with the tablet digest.
    /// Exactly one terminal outcome per invocation.
    async fn checksum_tablet(
        &self,
        tablet_id: &str,
        schema: &TableSchema,
        options: &ChecksumOptions,
        progress: ScanProgress,
    ) -> anyhow::Result<u64>;
}
