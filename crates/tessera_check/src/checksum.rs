//! Checksum scan scheduling and cross-replica comparison.
//!
//! Fan-out: one bounded queue of (schema, tablet) work per tablet server,
//! with up to `scan_concurrency` worker tasks per server chaining to the
//! next queue item as each scan finishes. Fan-in: a shared reporter under a
//! global deadline, reduced by the comparator into the run verdict.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tracing::debug;

use crate::cluster::{Cluster, Table, TableSchema, Tablet};
use crate::error::{CheckError, Result};
use crate::filter::matches_any_pattern;
use crate::output::CheckOutput;
use crate::queue::TabletQueue;
use crate::remote::TabletServer;
use crate::reporter::{ChecksumReporter, TabletResultMap};

/// Sentinel: elect the snapshot timestamp from a healthy participating
/// server.
pub const CURRENT_TIMESTAMP: u64 = 0;

/// Default total deadline for one checksum run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);
/// In-flight scans per tablet server.
pub const DEFAULT_SCAN_CONCURRENCY: usize = 4;

/// Tuning for one checksum verification run.
#[derive(Clone, Debug)]
pub struct ChecksumOptions {
    pub timeout: Duration,
    pub scan_concurrency: usize,
    pub use_snapshot: bool,
    /// Snapshot point for every scan; [`CURRENT_TIMESTAMP`] means "elect one
    /// from a healthy server".
    pub snapshot_timestamp: u64,
}

impl Default for ChecksumOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            scan_concurrency: DEFAULT_SCAN_CONCURRENCY,
            use_snapshot: true,
            snapshot_timestamp: CURRENT_TIMESTAMP,
        }
    }
}

type WorkItem = (TableSchema, String);
type ServerQueues = BTreeMap<String, (Arc<dyn TabletServer>, Arc<TabletQueue<WorkItem>>)>;

/// Run the checksum verification pass over every filtered tablet replica.
pub(crate) async fn run_checksum(
    cluster: &Cluster,
    table_filters: &[String],
    tablet_id_filters: &[String],
    opts: &ChecksumOptions,
    out: &CheckOutput,
) -> Result<()> {
    // Local copy so the elected snapshot timestamp can be filled in.
    let mut options = opts.clone();

    let mut num_tablet_replicas = 0usize;
    let mut selected: Vec<(&Table, &Tablet)> = Vec::new();
    for table in &cluster.tables {
        if !matches_any_pattern(table_filters, &table.name) {
            debug!(table = %table.name, "table filtered out of checksum scan");
            continue;
        }
        for tablet in &table.tablets {
            if !matches_any_pattern(tablet_id_filters, &tablet.id) {
                continue;
            }
            num_tablet_replicas += tablet.replicas.len();
            selected.push((table, tablet));
        }
    }
    if num_tablet_replicas == 0 {
        return Err(CheckError::NotFound(not_found_message(
            table_filters,
            tablet_id_filters,
        )));
    }

    let reporter = Arc::new(ChecksumReporter::new(num_tablet_replicas));

    // One queue per participating server, sized so puts can never block.
    let mut queues: ServerQueues = BTreeMap::new();
    for (table, tablet) in &selected {
        for replica in &tablet.replicas {
            let server = cluster
                .tablet_servers
                .get(&replica.server_uuid)
                .ok_or_else(|| {
                    anyhow!(
                        "tablet {} references unknown tablet server {}",
                        tablet.id,
                        replica.server_uuid
                    )
                })?;
            let (_, queue) = queues.entry(replica.server_uuid.clone()).or_insert_with(|| {
                (
                    Arc::clone(server),
                    Arc::new(TabletQueue::new(num_tablet_replicas)),
                )
            });
            queue.put((table.schema.clone(), tablet.id.clone()));
        }
    }

    // A scan at the "current" sentinel reads at one timestamp taken from the
    // first healthy participating server, in uuid order, so every replica
    // scans the same point in logical time.
    if options.use_snapshot && options.snapshot_timestamp == CURRENT_TIMESTAMP {
        options.snapshot_timestamp = queues
            .values()
            .find(|(server, _)| server.is_healthy())
            .map(|(server, _)| server.current_timestamp())
            .ok_or_else(|| {
                CheckError::ServiceUnavailable(
                    "no tablet servers were available to fetch the current timestamp".into(),
                )
            })?;
        out.info(format!(
            "Using snapshot timestamp: {}",
            options.snapshot_timestamp
        ));
    }

    // Queues are shut down before workers start so a drained queue reads as
    // `None` instead of blocking the worker's completion path.
    for (server, queue) in queues.values() {
        queue.shutdown();
        for _ in 0..options.scan_concurrency.max(1) {
            let Some(item) = queue.get().await else { break };
            spawn_scan_worker(
                item,
                Arc::clone(server),
                Arc::clone(queue),
                Arc::clone(&reporter),
                options.clone(),
            );
        }
    }

    let timed_out = !reporter.wait_for(options.timeout, out).await;
    let checksums = reporter.snapshot();

    compare_replica_checksums(
        cluster,
        num_tablet_replicas,
        timed_out,
        &options,
        &checksums,
        out,
    )
}

/// One chained worker: scan, report, pull the next tablet from the server's
/// queue until it drains. A run that outlives the global deadline keeps
/// going detached; only the reporter hears from it.
fn spawn_scan_worker(
    first: WorkItem,
    server: Arc<dyn TabletServer>,
    queue: Arc<TabletQueue<WorkItem>>,
    reporter: Arc<ChecksumReporter>,
    options: ChecksumOptions,
) {
    let progress = reporter.progress();
    tokio::spawn(async move {
        let mut next = Some(first);
        while let Some((schema, tablet_id)) = next {
            debug!(server = %server.uuid(), tablet = %tablet_id, "starting checksum scan");
            let result = server
                .checksum_tablet(&tablet_id, &schema, &options, progress.clone())
                .await
                .map_err(|err| format!("{err:#}"));
            reporter.report_result(&tablet_id, server.uuid(), result);
            next = queue.get().await;
        }
    });
}

/// Reduce the collected results into the run verdict, printing per-replica
/// lines grouped by table.
fn compare_replica_checksums(
    cluster: &Cluster,
    num_tablet_replicas: usize,
    timed_out: bool,
    options: &ChecksumOptions,
    checksums: &TabletResultMap,
    out: &CheckOutput,
) -> Result<()> {
    let mut num_errors = 0usize;
    let mut num_mismatches = 0usize;
    let mut num_results = 0usize;

    for table in &cluster.tables {
        let mut printed_table_name = false;
        for tablet in &table.tablets {
            let Some(replica_results) = checksums.get(&tablet.id) else {
                continue;
            };
            if !printed_table_name {
                printed_table_name = true;
                out.line("-----------------------");
                out.line(&table.name);
                out.line("-----------------------");
            }
            let mut first_checksum = None;
            for (replica_uuid, result) in replica_results {
                let location = cluster
                    .tablet_servers
                    .get(replica_uuid)
                    .map(|ts| ts.describe())
                    .unwrap_or_else(|| replica_uuid.clone());
                match result {
                    Ok(checksum) => {
                        out.line(format!(
                            "T {} P {}: Checksum: {}",
                            tablet.id, location, checksum
                        ));
                        match first_checksum {
                            None => first_checksum = Some(*checksum),
                            Some(first) if first != *checksum => {
                                num_mismatches += 1;
                                out.error(format!(
                                    ">> Mismatch found in table {} tablet {}",
                                    table.name, tablet.id
                                ));
                            }
                            Some(_) => {}
                        }
                    }
                    Err(message) => {
                        num_errors += 1;
                        out.line(format!("T {} P {}: Error: {}", tablet.id, location, message));
                    }
                }
                num_results += 1;
            }
        }
        if printed_table_name {
            out.line("");
        }
    }

    if num_results != num_tablet_replicas {
        assert!(
            timed_out,
            "only got {num_results} out of {num_tablet_replicas} replica results without a timeout"
        );
        return Err(CheckError::TimedOut(format!(
            "checksum scan did not complete within {:?}: received results for {} out of {} expected replicas",
            options.timeout, num_results, num_tablet_replicas
        )));
    }
    if num_mismatches != 0 {
        return Err(CheckError::Corruption(format!(
            "{num_mismatches} checksum mismatches were detected"
        )));
    }
    if num_errors != 0 {
        return Err(CheckError::Aborted(format!(
            "{num_errors} errors were detected"
        )));
    }
    Ok(())
}

fn not_found_message(table_filters: &[String], tablet_id_filters: &[String]) -> String {
    let mut filters = Vec::new();
    if !table_filters.is_empty() {
        filters.push(format!("table_filters={}", table_filters.join(",")));
    }
    if !tablet_id_filters.is_empty() {
        filters.push(format!("tablet_id_filters={}", tablet_id_filters.join(",")));
    }
    if filters.is_empty() {
        "no tablet replicas found".to_string()
    } else {
        format!("no tablet replicas found (filter: {})", filters.join(" "))
    }
}
