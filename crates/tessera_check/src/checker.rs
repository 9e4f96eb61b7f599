//! Cluster check driver: metadata fan-out and consistency verification.

use std::sync::Arc;

use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::checksum::{self, ChecksumOptions};
use crate::cluster::{Cluster, Table, Tablet};
use crate::error::{CheckError, Result};
use crate::filter::matches_any_pattern;
use crate::output::CheckOutput;
use crate::remote::TabletState;

/// Concurrent tablet servers to fetch replica info from.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 20;

/// Smallest replica count that constitutes a quorum of `num_replicas`.
pub fn majority_size(num_replicas: usize) -> usize {
    num_replicas / 2 + 1
}

/// Health and integrity checks over one fetched [`Cluster`] snapshot.
pub struct ClusterCheck {
    cluster: Cluster,
    table_filters: Vec<String>,
    tablet_id_filters: Vec<String>,
    check_replica_count: bool,
    fetch_concurrency: usize,
    out: CheckOutput,
}

impl ClusterCheck {
    pub fn new(cluster: Cluster, out: CheckOutput) -> Self {
        Self {
            cluster,
            table_filters: Vec::new(),
            tablet_id_filters: Vec::new(),
            check_replica_count: true,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            out,
        }
    }

    /// Restrict checks to tables whose name matches any of `filters`.
    pub fn with_table_filters(mut self, filters: Vec<String>) -> Self {
        self.table_filters = filters;
        self
    }

    /// Restrict checks to tablets whose id matches any of `filters`.
    pub fn with_tablet_id_filters(mut self, filters: Vec<String>) -> Self {
        self.tablet_id_filters = filters;
        self
    }

    /// Toggle the warning for tablets whose replica count differs from the
    /// table's declared replication factor.
    pub fn with_replica_count_check(mut self, enabled: bool) -> Self {
        self.check_replica_count = enabled;
        self
    }

    /// Bound on concurrent tablet server metadata fetches.
    pub fn with_fetch_concurrency(mut self, limit: usize) -> Self {
        self.fetch_concurrency = limit.max(1);
        self
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    /// Connect to every tablet server and pull health, replica states, and
    /// timestamps, `fetch_concurrency` servers at a time. Unreachable
    /// servers are warned about and skipped; the phase only fails when no
    /// server responded at all.
    pub async fn fetch_info_from_tablet_servers(&self) -> Result<()> {
        let servers_count = self.cluster.tablet_servers.len();
        if servers_count == 0 {
            return Err(CheckError::NotFound("no tablet servers found".into()));
        }
        debug!(servers = servers_count, "fetching info from tablet servers");

        let limit = Arc::new(Semaphore::new(self.fetch_concurrency));
        let mut fetches = FuturesUnordered::new();
        for server in self.cluster.tablet_servers.values() {
            let server = Arc::clone(server);
            let limit = Arc::clone(&limit);
            fetches.push(async move {
                let _permit = limit.acquire().await.ok();
                let outcome = async {
                    server.connect().await?;
                    server.fetch_info().await
                }
                .await;
                (server.describe(), outcome)
            });
        }

        let mut bad_servers = 0usize;
        while let Some((server, outcome)) = fetches.next().await {
            match outcome {
                Ok(()) => debug!(server = %server, "fetched tablet server info"),
                Err(err) => {
                    bad_servers += 1;
                    self.out.warn(format!(
                        "Unable to fetch info from tablet server {server}: {err:#}"
                    ));
                }
            }
        }

        if bad_servers == 0 {
            self.out
                .info(format!("Fetched info from all {servers_count} tablet servers"));
            return Ok(());
        }
        self.out.warn(format!(
            "Fetched info from {} tablet servers, {} weren't reachable",
            servers_count - bad_servers,
            bad_servers
        ));
        if bad_servers == servers_count {
            return Err(CheckError::NetworkError(
                "no tablet servers are reachable".into(),
            ));
        }
        Ok(())
    }

    /// Verify every filtered table against the tablet servers' cached view.
    /// Pure over the cluster snapshot.
    pub fn check_tables_consistency(&self) -> Result<()> {
        let mut tables_checked = 0usize;
        let mut bad_tables = 0usize;
        for table in &self.cluster.tables {
            if !matches_any_pattern(&self.table_filters, &table.name) {
                debug!(table = %table.name, "table filtered out of consistency check");
                continue;
            }
            tables_checked += 1;
            if !self.verify_table(table) {
                bad_tables += 1;
            }
        }

        if tables_checked == 0 {
            self.out.info("The cluster doesn't have any matching tables");
            return Ok(());
        }
        if bad_tables == 0 {
            self.out.info(format!(
                "The metadata for {tables_checked} table(s) is HEALTHY"
            ));
            return Ok(());
        }
        self.out.warn(format!(
            "{bad_tables} out of {tables_checked} table(s) are not in a healthy state"
        ));
        Err(CheckError::Corruption(format!(
            "{bad_tables} table(s) are bad"
        )))
    }

    fn verify_table(&self, table: &Table) -> bool {
        let tablets: Vec<&Tablet> = table
            .tablets
            .iter()
            .filter(|t| matches_any_pattern(&self.tablet_id_filters, &t.id))
            .collect();
        if tablets.is_empty() {
            self.out
                .info(format!("Table {} has 0 matching tablets", table.name));
            return true;
        }
        debug!(
            table = %table.name,
            tablets = tablets.len(),
            num_replicas = table.num_replicas,
            "verifying table"
        );

        let mut bad_tablets = 0usize;
        for tablet in &tablets {
            if !self.verify_tablet(table, tablet) {
                bad_tablets += 1;
            }
        }
        if bad_tablets == 0 {
            self.out.info(format!(
                "Table {} is HEALTHY ({} tablets checked)",
                table.name,
                tablets.len()
            ));
            true
        } else {
            self.out.warn(format!(
                "Table {} has {} bad tablets",
                table.name, bad_tablets
            ));
            false
        }
    }

    /// Triage one tablet into info/warning/error findings. Findings print
    /// only when the tablet has at least one warning or error.
    fn verify_tablet(&self, table: &Table, tablet: &Tablet) -> bool {
        let tablet_str = format!("Tablet {} of table '{}'", tablet.id, table.name);
        let mut infos = Vec::new();
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if self.check_replica_count && tablet.replicas.len() != table.num_replicas {
            warnings.push(format!(
                "{} has {} instead of {} replicas",
                tablet_str,
                tablet.replicas.len(),
                table.num_replicas
            ));
        }

        let mut leaders_count = 0usize;
        let mut followers_count = 0usize;
        let mut alive_count = 0usize;
        let mut running_count = 0usize;
        for replica in &tablet.replicas {
            match self.cluster.tablet_servers.get(&replica.server_uuid) {
                Some(ts) if ts.is_healthy() => {
                    alive_count += 1;
                    let state = ts.replica_state(&tablet.id);
                    match state {
                        TabletState::Running => {
                            running_count += 1;
                            infos.push(format!(
                                "OK state on tablet server {}: {}",
                                ts.describe(),
                                state
                            ));
                        }
                        TabletState::Unknown => {
                            warnings.push(format!(
                                "Missing a tablet replica on tablet server {}",
                                ts.describe()
                            ));
                        }
                        _ => {
                            let status = ts.tablet_status(&tablet.id).unwrap_or_default();
                            warnings.push(format!(
                                "Bad state on tablet server {}: {}\n  Last status: {}\n  Data state:  {}",
                                ts.describe(),
                                state,
                                status.last_status,
                                status.data_state
                            ));
                        }
                    }
                }
                Some(ts) => {
                    warnings.push(format!(
                        "Should have a replica on tablet server {}, but it is unavailable",
                        ts.describe()
                    ));
                }
                None => {
                    warnings.push(format!(
                        "Should have a replica on tablet server {}, but it is unavailable",
                        replica.server_uuid
                    ));
                }
            }
            if replica.is_leader() {
                leaders_count += 1;
            } else if replica.is_follower() {
                followers_count += 1;
            }
        }
        if leaders_count == 0 {
            errors.push("No leader detected".to_string());
        }
        debug!(
            tablet = %tablet.id,
            leaders = leaders_count,
            followers = followers_count,
            "replica roles"
        );

        // Quorum comes from the declared factor, not the observed replica
        // count, so under-replication counts against the majority.
        let majority = majority_size(table.num_replicas);
        if alive_count < majority {
            errors.push(format!(
                "{tablet_str} does not have a majority of replicas on live tablet servers"
            ));
        } else if running_count < majority {
            errors.push(format!(
                "{tablet_str} does not have a majority of replicas in RUNNING state"
            ));
        }

        let has_issues = !warnings.is_empty() || !errors.is_empty();
        if has_issues {
            self.out.warn(format!("Detected problems with {tablet_str}"));
            self.out
                .line("------------------------------------------------------------");
            for warning in &warnings {
                self.out.warn(warning);
            }
            for error in &errors {
                self.out.error(error);
            }
            // Info lines only print next to findings; healthy tablets stay
            // quiet.
            for info in &infos {
                self.out.info(info);
            }
            self.out.line("");
        }
        !has_issues
    }

    /// Run the checksum verification pass with this checker's filters.
    pub async fn checksum_data(&self, options: &ChecksumOptions) -> Result<()> {
        checksum::run_checksum(
            &self.cluster,
            &self.table_filters,
            &self.tablet_id_filters,
            options,
            &self.out,
        )
        .await
    }
}
