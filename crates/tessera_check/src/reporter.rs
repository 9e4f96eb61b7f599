//! Thread-safe aggregation of checksum scan results and progress.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::output::{format_bytes, CheckOutput};

/// How often `wait_for` wakes to report scan liveness.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Outcome of one replica scan: the tablet digest, or an error message.
pub type ReplicaResult = std::result::Result<u64, String>;
/// One tablet's results, keyed by replica server uuid.
pub type ReplicaResultMap = BTreeMap<String, ReplicaResult>;
/// All collected results, keyed by tablet id.
pub type TabletResultMap = BTreeMap<String, ReplicaResultMap>;

/// Cheap handle through which scans report incremental progress. Clones
/// share the same counters; counts only grow.
#[derive(Clone, Debug, Default)]
pub struct ScanProgress {
    rows: Arc<AtomicU64>,
    bytes: Arc<AtomicU64>,
}

impl ScanProgress {
    pub fn record(&self, delta_rows: u64, delta_bytes: u64) {
        self.rows.fetch_add(delta_rows, Ordering::Relaxed);
        self.bytes.fetch_add(delta_bytes, Ordering::Relaxed);
    }

    pub fn rows(&self) -> u64 {
        self.rows.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// Collects per-(tablet, replica) scan results until the expected count is
/// reached or the caller's deadline expires.
pub struct ChecksumReporter {
    expected: usize,
    remaining: AtomicUsize,
    drained: Notify,
    results: Mutex<TabletResultMap>,
    progress: ScanProgress,
}

impl ChecksumReporter {
    /// `expected` is the number of (tablet, replica) pairs being scanned.
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            remaining: AtomicUsize::new(expected),
            drained: Notify::new(),
            results: Mutex::new(BTreeMap::new()),
            progress: ScanProgress::default(),
        }
    }

    /// Handle scans use to report rows/bytes progress.
    pub fn progress(&self) -> ScanProgress {
        self.progress.clone()
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Replicas that have not reported yet.
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Record one replica's terminal result. Each (tablet, replica) pair
    /// reports exactly once; a duplicate is a caller bug.
    pub fn report_result(&self, tablet_id: &str, replica_uuid: &str, result: ReplicaResult) {
        {
            let mut results = self.results.lock().unwrap_or_else(|e| e.into_inner());
            let replicas = results.entry(tablet_id.to_string()).or_default();
            let previous = replicas.insert(replica_uuid.to_string(), result);
            assert!(
                previous.is_none(),
                "duplicate checksum result for tablet {tablet_id} replica {replica_uuid}"
            );
        }
        let before = self.remaining.fetch_sub(1, Ordering::AcqRel);
        assert!(before > 0, "more checksum results than expected replicas");
        if before == 1 {
            self.drained.notify_one();
        }
    }

    /// Consistent copy of the result map.
    pub fn snapshot(&self) -> TabletResultMap {
        self.results.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Block until every expected replica has reported or `timeout` elapses,
    /// waking at most every five seconds to print a liveness line. Returns
    /// true when all replicas reported in time.
    pub async fn wait_for(&self, timeout: Duration, out: &CheckOutput) -> bool {
        let start = Instant::now();
        let deadline = start + timeout;
        let mut done = false;
        while !done {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let window = PROGRESS_INTERVAL.min(deadline - now);
            done = tokio::time::timeout(window, self.wait_drained()).await.is_ok();
            out.info(format!(
                "Checksum {} {}s: {}/{} replicas remaining ({} from disk, {} rows summed)",
                if done { "finished in" } else { "running for" },
                start.elapsed().as_secs(),
                self.remaining(),
                self.expected,
                format_bytes(self.progress.bytes()),
                self.progress.rows(),
            ));
        }
        true
    }

    async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.remaining() == 0 {
                return;
            }
            notified.await;
        }
    }
}
