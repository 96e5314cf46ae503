//! Archive pipeline metrics for Prometheus
//!
//! Tracks archive runs, per-provider copy outcomes, and statted bytes.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use archivio_common::types::FailureCause;

/// Archive pipeline metrics collector
#[derive(Debug)]
pub struct ArchiverMetrics {
    /// Archive runs started
    archives_started: AtomicU64,
    /// Archive runs where every provider succeeded
    archives_succeeded: AtomicU64,
    /// Archive runs failed by a provider copy error
    archives_failed_copy: AtomicU64,
    /// Archive runs failed by the size gate
    archives_failed_size: AtomicU64,
    /// Archive runs failed by the stall sweeper
    archives_failed_stalled: AtomicU64,
    /// Registrations tombstoned by the sweep loop
    registrations_swept: AtomicU64,
    /// Provider copies that reached success
    copies_succeeded: AtomicU64,
    /// Provider copies that were rejected or failed
    copies_failed: AtomicU64,
    /// Bytes counted across statted provider trees
    bytes_statted: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl ArchiverMetrics {
    /// Create a new archiver metrics collector
    #[must_use]
    pub fn new() -> Self {
        Self {
            archives_started: AtomicU64::new(0),
            archives_succeeded: AtomicU64::new(0),
            archives_failed_copy: AtomicU64::new(0),
            archives_failed_size: AtomicU64::new(0),
            archives_failed_stalled: AtomicU64::new(0),
            registrations_swept: AtomicU64::new(0),
            copies_succeeded: AtomicU64::new(0),
            copies_failed: AtomicU64::new(0),
            bytes_statted: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record an archive run start
    pub fn record_started(&self) {
        self.archives_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a fully archived registration
    pub fn record_succeeded(&self) {
        self.archives_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed archive run by cause
    pub fn record_failed(&self, cause: FailureCause) {
        let counter = match cause {
            FailureCause::Copy => &self.archives_failed_copy,
            FailureCause::SizeExceeded => &self.archives_failed_size,
            FailureCause::Stalled => &self.archives_failed_stalled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a registration tombstoned by the sweeper
    pub fn record_swept(&self) {
        self.registrations_swept.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a provider copy that reached success
    pub fn record_copy_succeeded(&self) {
        self.copies_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a provider copy that was rejected or failed
    pub fn record_copy_failed(&self) {
        self.copies_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record bytes counted during a provider stat walk
    pub fn record_bytes_statted(&self, bytes: u64) {
        self.bytes_statted.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Export metrics in Prometheus format
    #[must_use]
    pub fn export_prometheus(&self) -> String {
        let mut output = String::with_capacity(2 * 1024);

        let uptime_secs = self.start_time.elapsed().as_secs();
        writeln!(
            output,
            "# HELP archivio_uptime_seconds Archiver uptime in seconds"
        )
        .unwrap();
        writeln!(output, "# TYPE archivio_uptime_seconds counter").unwrap();
        writeln!(output, "archivio_uptime_seconds {}", uptime_secs).unwrap();

        writeln!(
            output,
            "# HELP archivio_archives_started_total Archive runs started"
        )
        .unwrap();
        writeln!(output, "# TYPE archivio_archives_started_total counter").unwrap();
        writeln!(
            output,
            "archivio_archives_started_total {}",
            self.archives_started.load(Ordering::Relaxed)
        )
        .unwrap();

        writeln!(
            output,
            "# HELP archivio_archives_succeeded_total Archive runs fully archived"
        )
        .unwrap();
        writeln!(output, "# TYPE archivio_archives_succeeded_total counter").unwrap();
        writeln!(
            output,
            "archivio_archives_succeeded_total {}",
            self.archives_succeeded.load(Ordering::Relaxed)
        )
        .unwrap();

        writeln!(
            output,
            "# HELP archivio_archives_failed_total Archive runs failed, by cause"
        )
        .unwrap();
        writeln!(output, "# TYPE archivio_archives_failed_total counter").unwrap();
        for (cause, counter) in [
            (FailureCause::Copy, &self.archives_failed_copy),
            (FailureCause::SizeExceeded, &self.archives_failed_size),
            (FailureCause::Stalled, &self.archives_failed_stalled),
        ] {
            writeln!(
                output,
                "archivio_archives_failed_total{{cause=\"{}\"}} {}",
                cause.as_str(),
                counter.load(Ordering::Relaxed)
            )
            .unwrap();
        }

        writeln!(
            output,
            "# HELP archivio_registrations_swept_total Registrations failed by the stall sweeper"
        )
        .unwrap();
        writeln!(output, "# TYPE archivio_registrations_swept_total counter").unwrap();
        writeln!(
            output,
            "archivio_registrations_swept_total {}",
            self.registrations_swept.load(Ordering::Relaxed)
        )
        .unwrap();

        writeln!(
            output,
            "# HELP archivio_provider_copies_total Provider copy requests by outcome"
        )
        .unwrap();
        writeln!(output, "# TYPE archivio_provider_copies_total counter").unwrap();
        writeln!(
            output,
            "archivio_provider_copies_total{{outcome=\"success\"}} {}",
            self.copies_succeeded.load(Ordering::Relaxed)
        )
        .unwrap();
        writeln!(
            output,
            "archivio_provider_copies_total{{outcome=\"failure\"}} {}",
            self.copies_failed.load(Ordering::Relaxed)
        )
        .unwrap();

        writeln!(
            output,
            "# HELP archivio_stat_bytes_total Bytes counted across statted provider trees"
        )
        .unwrap();
        writeln!(output, "# TYPE archivio_stat_bytes_total counter").unwrap();
        writeln!(
            output,
            "archivio_stat_bytes_total {}",
            self.bytes_statted.load(Ordering::Relaxed)
        )
        .unwrap();

        output
    }
}

impl Default for ArchiverMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Global archiver metrics instance
static ARCHIVER_METRICS: std::sync::OnceLock<ArchiverMetrics> = std::sync::OnceLock::new();

/// Get the global archiver metrics instance
pub fn archiver_metrics() -> &'static ArchiverMetrics {
    ARCHIVER_METRICS.get_or_init(ArchiverMetrics::new)
}
