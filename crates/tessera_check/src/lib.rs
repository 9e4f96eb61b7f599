//! Cluster health-check and data-integrity tool for Tessera, a distributed
//! tablet-based storage service.
//!
//! Two orthogonal passes run over one immutable [`Cluster`] snapshot fetched
//! from the master:
//!
//! - consistency verification ([`ClusterCheck::check_tables_consistency`]):
//!   per-tablet replica counts, leadership, liveness, and running-state
//!   majorities, cross-checked between the master's view and each tablet
//!   server's;
//! - checksum verification ([`ClusterCheck::checksum_data`]): concurrent
//!   full-tablet scans across every replica, with bounded per-server
//!   concurrency, a single cluster-wide snapshot timestamp, and a
//!   cross-replica comparison of the resulting digests.
//!
//! RPC collaborators are consumed through the [`remote::Master`] and
//! [`remote::TabletServer`] traits; [`rpc`] provides the wire clients and
//! the `tessck` binary the CLI.

pub mod checker;
pub mod checksum;
pub mod cluster;
pub mod error;
pub mod filter;
pub mod output;
pub mod queue;
pub mod remote;
pub mod reporter;
pub mod rpc;

pub use checker::{majority_size, ClusterCheck, DEFAULT_FETCH_CONCURRENCY};
pub use checksum::{ChecksumOptions, CURRENT_TIMESTAMP};
pub use cluster::{Cluster, Replica, ReplicaRole, Table, TableSchema, Tablet};
pub use error::{CheckError, Result};
pub use output::CheckOutput;
pub use remote::{DataState, Master, TabletServer, TabletState, TabletStatus};
pub use reporter::ScanProgress;
