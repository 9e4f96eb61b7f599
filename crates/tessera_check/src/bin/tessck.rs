//! Command-line cluster checker for Tessera.

use std::io::IsTerminal;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tessera_check::rpc::RpcMaster;
use tessera_check::{
    CheckError, CheckOutput, ChecksumOptions, Cluster, ClusterCheck, CURRENT_TIMESTAMP,
};

#[derive(Parser)]
#[command(name = "tessck")]
#[command(about = "Health and data-integrity checks for a Tessera cluster", long_about = None)]
struct Args {
    /// Master address (host:port).
    #[arg(long, default_value = "127.0.0.1:7050")]
    master: String,
    /// Only check tables whose name matches one of these glob patterns.
    #[arg(long = "tables", value_name = "PATTERN")]
    table_filters: Vec<String>,
    /// Only check tablets whose id matches one of these glob patterns.
    #[arg(long = "tablets", value_name = "PATTERN")]
    tablet_id_filters: Vec<String>,
    /// Also run a full checksum scan over every filtered tablet replica.
    #[arg(long, default_value_t = false)]
    checksum_scan: bool,
    /// Skip the warning for tablets whose replica count differs from the
    /// table's declared replication factor.
    #[arg(long, default_value_t = false)]
    no_replica_count_check: bool,
    /// Maximum total seconds to wait for checksum scans to complete.
    #[arg(long, default_value_t = 3600)]
    checksum_timeout_sec: u64,
    /// Concurrent checksum scans to execute per tablet server.
    #[arg(long, default_value_t = 4)]
    checksum_scan_concurrency: usize,
    /// Use a snapshot scan at one cluster-wide timestamp.
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    checksum_snapshot: bool,
    /// Timestamp for snapshot scans; 0 uses the current timestamp of a
    /// healthy tablet server involved in the scan.
    #[arg(long, default_value_t = CURRENT_TIMESTAMP)]
    checksum_snapshot_timestamp: u64,
    /// Concurrent tablet servers to fetch replica info from.
    #[arg(long, default_value_t = 20)]
    fetch_replica_info_concurrency: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    // ANSI colors only when stderr is a terminal and NO_COLOR is unset.
    let ansi = std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    tracing_subscriber::fmt()
        .with_ansi(ansi)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ERROR: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

async fn run(args: Args) -> Result<(), CheckError> {
    let out = CheckOutput::stderr();
    let master = RpcMaster::new(&args.master);
    let cluster = Cluster::fetch(&master).await?;
    out.info("Connected to the master");

    let check = ClusterCheck::new(cluster, out.clone())
        .with_table_filters(args.table_filters)
        .with_tablet_id_filters(args.tablet_id_filters)
        .with_replica_count_check(!args.no_replica_count_check)
        .with_fetch_concurrency(args.fetch_replica_info_concurrency);

    // Later phases still run when an earlier one fails; the most severe
    // failure decides the exit status.
    let mut failures: Vec<CheckError> = Vec::new();

    if let Err(err) = check.fetch_info_from_tablet_servers().await {
        match err {
            // Nothing to check against.
            CheckError::NotFound(_) => return Err(err),
            other => failures.push(other),
        }
    }

    if let Err(err) = check.check_tables_consistency() {
        failures.push(err);
    }

    if args.checksum_scan {
        let options = ChecksumOptions {
            timeout: Duration::from_secs(args.checksum_timeout_sec),
            scan_concurrency: args.checksum_scan_concurrency,
            use_snapshot: args.checksum_snapshot,
            snapshot_timestamp: args.checksum_snapshot_timestamp,
        };
        if let Err(err) = check.checksum_data(&options).await {
            failures.push(err);
        }
    }

    match failures.into_iter().max_by_key(CheckError::severity) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
