//! Store counters, per-pass results, and cumulative engine statistics.

use chrono::{DateTime, Utc};
use mirrorsync_protocol::SyncIssue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Per-store counters.
///
/// All counters are atomic and can be read while a pass is in progress.
#[derive(Debug, Default)]
pub struct StoreStats {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    individual_lookups: AtomicU64,
    applied: AtomicU64,
    skipped: AtomicU64,
    issues: AtomicU64,
    saves: AtomicU64,
    deletes: AtomicU64,
}

impl StoreStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_individual_lookup(&self) {
        self.individual_lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_applied(&self) {
        self.applied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_issue(&self) {
        self.issues.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_save(&self) {
        self.saves.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    /// Lookups that went to the repository because the cache missed.
    pub fn individual_lookups(&self) -> u64 {
        self.individual_lookups.load(Ordering::Relaxed)
    }

    /// Takes a point-in-time copy of every counter.
    pub fn snapshot(&self) -> StoreStatsSnapshot {
        StoreStatsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            individual_lookups: self.individual_lookups.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            issues: self.issues.load(Ordering::Relaxed),
            saves: self.saves.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`StoreStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStatsSnapshot {
    /// Relationship lookups answered by the identifier cache.
    pub cache_hits: u64,
    /// Relationship lookups the cache could not answer.
    pub cache_misses: u64,
    /// Fallback lookups against the repository.
    pub individual_lookups: u64,
    /// Incoming objects written.
    pub applied: u64,
    /// Incoming objects not written because the local copy was as new or newer.
    pub skipped: u64,
    /// Incoming objects reported back as issues.
    pub issues: u64,
    /// Local saves, touches included.
    pub saves: u64,
    /// Local hard deletes.
    pub deletes: u64,
}

/// Outcome of one direction of a pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectionResult {
    /// Objects read from the source peer.
    pub pulled: usize,
    /// Objects the source peer read but did not send (filtered or declined).
    pub withheld: usize,
    /// Objects the target wrote.
    pub applied: usize,
    /// Objects the target received but did not write.
    pub skipped: usize,
    /// Issues the target reported on the first apply.
    pub issues: usize,
    /// Objects sent in the correction round.
    pub corrections: usize,
}

/// Outcome of one complete bidirectional pass.
#[derive(Debug, Clone)]
pub struct SyncPassResult {
    /// Session id shared by both peers.
    pub session_id: Uuid,
    /// Client session start, the next client watermark.
    pub client_started_on: DateTime<Utc>,
    /// Server session start, the next server watermark.
    pub server_started_on: DateTime<Utc>,
    /// Server to client.
    pub download: DirectionResult,
    /// Client to server.
    pub upload: DirectionResult,
    /// Issues the client still could not apply after the correction round.
    pub unresolved_on_client: Vec<SyncIssue>,
    /// Issues the server still could not apply after the correction round.
    pub unresolved_on_server: Vec<SyncIssue>,
    /// Wall time of the pass.
    pub duration: Duration,
}

impl SyncPassResult {
    /// Returns true when neither direction pulled anything.
    pub fn is_reset(&self) -> bool {
        self.download.pulled == 0 && self.upload.pulled == 0
    }

    /// Returns true when every issue was resolved.
    pub fn is_clean(&self) -> bool {
        self.unresolved_on_client.is_empty() && self.unresolved_on_server.is_empty()
    }

    /// All unresolved issues, client side first.
    pub fn unresolved(&self) -> impl Iterator<Item = &SyncIssue> {
        self.unresolved_on_client
            .iter()
            .chain(self.unresolved_on_server.iter())
    }
}

/// Cumulative statistics of an engine.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Passes completed.
    pub passes_completed: u64,
    /// Passes that pulled nothing either way.
    pub reset_passes: u64,
    /// Objects pulled from the server.
    pub objects_downloaded: u64,
    /// Objects pulled from the client.
    pub objects_uploaded: u64,
    /// Issues reported on first apply, both sides.
    pub issues_reported: u64,
    /// Objects sent in correction rounds, both ways.
    pub corrections_sent: u64,
    /// Retries performed by `run_with_retry`.
    pub retries: u64,
    /// When the last pass finished.
    pub last_pass_at: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

impl SyncStats {
    pub(crate) fn record_pass(&mut self, result: &SyncPassResult) {
        self.passes_completed += 1;
        if result.is_reset() {
            self.reset_passes += 1;
        }
        self.objects_downloaded += result.download.pulled as u64;
        self.objects_uploaded += result.upload.pulled as u64;
        self.issues_reported += (result.download.issues + result.upload.issues) as u64;
        self.corrections_sent += (result.download.corrections + result.upload.corrections) as u64;
        self.last_pass_at = Some(Instant::now());
        self.last_error = None;
    }
}
