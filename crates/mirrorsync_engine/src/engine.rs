//! The bidirectional sync engine.
//!
//! One pass opens a session on both peers, downloads server changes into the
//! client, uploads client changes into the server, then runs one correction
//! round covering the issues both pulls left. It closes both sessions and
//! only then advances the watermarks.

use crate::config::EngineConfig;
use crate::error::{SyncError, SyncResult};
use crate::peer::SyncPeer;
use crate::stats::{DirectionResult, SyncPassResult, SyncStats};
use mirrorsync_core::{ReplicaId, StableId, Timestamp};
use mirrorsync_protocol::{
    ProtocolError, ServiceRequest, SyncIssue, SyncOptions, SyncRequest, SyncSession,
};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Engine is idle, not syncing.
    Idle,
    /// Engine is opening sessions.
    Connecting,
    /// Engine is moving server changes into the client.
    Downloading,
    /// Engine is moving client changes into the server.
    Uploading,
    /// Engine is running a correction round.
    Correcting,
    /// Engine has completed a pass.
    Synced,
    /// Engine encountered an error.
    Error,
    /// Engine is waiting before retrying.
    RetryWait,
}

impl SyncState {
    /// Returns true if a pass is in progress.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Connecting
                | SyncState::Downloading
                | SyncState::Uploading
                | SyncState::Correcting
        )
    }

    /// Returns true if the engine can start a new pass.
    pub fn can_start_sync(&self) -> bool {
        matches!(
            self,
            SyncState::Idle | SyncState::Synced | SyncState::Error | SyncState::RetryWait
        )
    }
}

/// Issues left unresolved by the last pass, per receiving side.
#[derive(Debug, Clone, Default)]
struct CarriedIssues {
    client: Vec<SyncIssue>,
    server: Vec<SyncIssue>,
}

/// One direction of a pass.
struct Leg<'a> {
    source: &'a dyn SyncPeer,
    target: &'a dyn SyncPeer,
    source_replica: ReplicaId,
    target_replica: ReplicaId,
    since: Option<Timestamp>,
    until: Timestamp,
}

/// Drives sync passes between a client peer and a server peer.
pub struct SyncEngine {
    config: EngineConfig,
    client: Arc<dyn SyncPeer>,
    server: Arc<dyn SyncPeer>,
    options: RwLock<SyncOptions>,
    carried: RwLock<CarriedIssues>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    cancelled: AtomicBool,
}

impl SyncEngine {
    /// Creates an engine between two peers.
    pub fn new(config: EngineConfig, client: Arc<dyn SyncPeer>, server: Arc<dyn SyncPeer>) -> Self {
        Self {
            config,
            client,
            server,
            options: RwLock::new(SyncOptions::default()),
            carried: RwLock::new(CarriedIssues::default()),
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Sets the initial pass options, watermarks included.
    #[must_use]
    pub fn with_options(self, options: SyncOptions) -> Self {
        *self.options.write() = options;
        self
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the cumulative stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Options the next pass will use.
    pub fn options(&self) -> SyncOptions {
        self.options.read().clone()
    }

    /// Replaces the options the next pass will use.
    pub fn set_options(&self, options: SyncOptions) {
        *self.options.write() = options;
    }

    /// Applies an edit to the options the next pass will use.
    pub fn update_options(&self, edit: impl FnOnce(&mut SyncOptions)) {
        edit(&mut self.options.write());
    }

    /// Issues the next pass will retry, client side first.
    pub fn carried_issues(&self) -> Vec<SyncIssue> {
        let carried = self.carried.read();
        carried
            .client
            .iter()
            .chain(carried.server.iter())
            .cloned()
            .collect()
    }

    /// Stops the pass in progress before its next protocol call.
    ///
    /// Pages already applied stay committed on the receiving store. The pass
    /// fails with [`SyncError::Cancelled`] and the watermarks do not move, so
    /// the next pass re-reads the same windows and skips what already arrived.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    /// Runs one complete bidirectional pass.
    ///
    /// On error both sessions are closed on a best-effort basis and the
    /// watermarks are left untouched, so the next pass re-covers the same
    /// windows.
    pub fn run(&self) -> SyncResult<SyncPassResult> {
        let start = Instant::now();
        self.reset_cancel();

        let current = self.state();
        if !current.can_start_sync() {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{current:?}"),
                to: "sync".into(),
            });
        }

        let session_id = Uuid::new_v4();
        let options = self.options();
        self.set_state(SyncState::Connecting);

        let client_session = match self.client.begin_sync(session_id, &options) {
            Ok(session) => session,
            Err(e) => return Err(self.handle_error(e)),
        };
        let server_session = match self.server.begin_sync(session_id, &options) {
            Ok(session) => session,
            Err(e) => {
                close_quietly(self.client.as_ref(), &client_session);
                return Err(self.handle_error(e));
            }
        };
        tracing::info!(
            %session_id,
            client_started_on = %client_session.started_on,
            server_started_on = %server_session.started_on,
            "sync pass started"
        );

        let mut result = match self.exchange(&options, &client_session, &server_session) {
            Ok(result) => result,
            Err(e) => {
                close_quietly(self.client.as_ref(), &client_session);
                close_quietly(self.server.as_ref(), &server_session);
                return Err(self.handle_error(e));
            }
        };

        if let Err(e) = self.client.end_sync(&client_session) {
            close_quietly(self.server.as_ref(), &server_session);
            return Err(self.handle_error(e));
        }
        if let Err(e) = self.server.end_sync(&server_session) {
            return Err(self.handle_error(e));
        }

        // A watermark only moves past a window the source served in full.
        {
            let mut next = self.options.write();
            if server_session.covers_all {
                next.last_synced_on_server = Some(server_session.started_on);
            }
            if client_session.covers_all {
                next.last_synced_on_client = Some(client_session.started_on);
            }
        }
        if !(server_session.covers_all && client_session.covers_all) {
            tracing::debug!(%session_id, "partial pass; watermarks of partial sides kept");
        }

        *self.carried.write() = if self.config.carry_over_issues {
            CarriedIssues {
                client: correctable(&result.unresolved_on_client),
                server: correctable(&result.unresolved_on_server),
            }
        } else {
            CarriedIssues::default()
        };

        result.duration = start.elapsed();
        self.stats.write().record_pass(&result);
        self.set_state(SyncState::Synced);

        tracing::info!(
            %session_id,
            downloaded = result.download.pulled,
            uploaded = result.upload.pulled,
            unresolved = result.unresolved().count(),
            duration_ms = result.duration.as_millis() as u64,
            "sync pass finished"
        );
        Ok(result)
    }

    /// Runs passes until one pulls nothing either way and leaves no
    /// unresolved issues, or `max_passes` from the configuration is reached.
    ///
    /// Returns every pass result in order; check the last one to see whether
    /// the peers converged.
    pub fn run_until_converged(&self) -> SyncResult<Vec<SyncPassResult>> {
        let mut results = Vec::new();
        for _ in 0..self.config.max_passes {
            let result = self.run()?;
            let converged = result.is_reset() && result.is_clean();
            results.push(result);
            if converged {
                return Ok(results);
            }
        }
        tracing::warn!(
            passes = results.len(),
            "peers did not converge within the pass limit"
        );
        Ok(results)
    }

    /// Runs one pass, retrying transient failures per the retry config.
    pub fn run_with_retry(&self) -> SyncResult<SyncPassResult> {
        let retry = &self.config.retry;
        let mut last_error = None;

        for attempt in 0..retry.max_attempts.max(1) {
            if attempt > 0 {
                self.set_state(SyncState::RetryWait);
                let delay = retry.delay_for_attempt(attempt);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying sync pass");
                std::thread::sleep(delay);
                self.stats.write().retries += 1;
            }

            match self.run() {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt + 1 < retry.max_attempts => {
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(SyncError::NotConnected))
    }

    fn exchange(
        &self,
        options: &SyncOptions,
        client: &SyncSession,
        server: &SyncSession,
    ) -> SyncResult<SyncPassResult> {
        let session_id = client.session_id;
        self.client
            .update_options(session_id, &self.config.client_options)?;
        self.server
            .update_options(session_id, &self.config.client_options)?;
        let carried = self.carried.read().clone();
        let download_leg = Leg {
            source: self.server.as_ref(),
            target: self.client.as_ref(),
            source_replica: server.replica_id,
            target_replica: client.replica_id,
            since: options.last_synced_on_server,
            until: server.started_on,
        };
        let upload_leg = Leg {
            source: self.client.as_ref(),
            target: self.server.as_ref(),
            source_replica: client.replica_id,
            target_replica: server.replica_id,
            since: options.last_synced_on_client,
            until: client.started_on,
        };

        self.set_state(SyncState::Downloading);
        let (mut download, client_issues) = self.transfer(session_id, &download_leg)?;
        self.set_state(SyncState::Uploading);
        let (mut upload, server_issues) = self.transfer(session_id, &upload_leg)?;

        self.set_state(SyncState::Correcting);
        let unresolved_on_client = self.correct(
            session_id,
            &download_leg,
            &mut download,
            &carried.client,
            client_issues,
        )?;
        let unresolved_on_server = self.correct(
            session_id,
            &upload_leg,
            &mut upload,
            &carried.server,
            server_issues,
        )?;

        Ok(SyncPassResult {
            session_id,
            client_started_on: client.started_on,
            server_started_on: server.started_on,
            download,
            upload,
            unresolved_on_client,
            unresolved_on_server,
            duration: Duration::ZERO,
        })
    }

    /// Pulls every page of one direction's window into its target.
    fn transfer(
        &self,
        session_id: Uuid,
        leg: &Leg<'_>,
    ) -> SyncResult<(DirectionResult, Vec<SyncIssue>)> {
        let mut result = DirectionResult::default();
        let mut issues = Vec::new();
        let mut skip = 0;

        loop {
            self.check_cancelled()?;
            let page = leg.source.get_changes(
                session_id,
                SyncRequest::new(leg.since, Some(leg.until))
                    .at(skip)
                    .for_replica(leg.target_replica),
            )?;
            let read = page.collection.len() + page.skipped;
            if read == 0 {
                if skip < page.total_count {
                    return Err(ProtocolError::violation(format!(
                        "empty page at offset {skip} of {}",
                        page.total_count
                    ))
                    .into());
                }
                break;
            }
            skip += read;
            result.pulled += page.collection.len();
            result.withheld += page.skipped;

            if !page.collection.is_empty() {
                let applied = leg.target.apply_changes(
                    session_id,
                    ServiceRequest::new(page.collection).from_replica(leg.source_replica),
                )?;
                result.skipped += applied.skipped;
                result.applied += applied
                    .total_count
                    .saturating_sub(applied.skipped + applied.collection.len());
                issues.extend(applied.collection);
            }
            if skip >= page.total_count {
                break;
            }
        }
        result.issues = issues.len();
        Ok((result, issues))
    }

    /// Asks one direction's source for corrections to the issues its target
    /// reported, plus carried ones, and applies them. Returns what is still
    /// unresolved.
    fn correct(
        &self,
        session_id: Uuid,
        leg: &Leg<'_>,
        result: &mut DirectionResult,
        carried: &[SyncIssue],
        issues: Vec<SyncIssue>,
    ) -> SyncResult<Vec<SyncIssue>> {
        let mut pending = carried.to_vec();
        merge_issues(&mut pending, issues);
        let (to_correct, mut unresolved): (Vec<SyncIssue>, Vec<SyncIssue>) =
            pending.into_iter().partition(SyncIssue::is_correctable);
        if to_correct.is_empty() {
            return Ok(unresolved);
        }

        self.check_cancelled()?;
        let corrections = leg
            .source
            .get_corrections(session_id, ServiceRequest::new(to_correct.clone()))?;
        result.corrections = corrections.collection.len();

        let delivered: HashSet<(&str, StableId)> = corrections
            .collection
            .iter()
            .map(|object| (object.type_name.as_str(), object.stable_id))
            .collect();
        let undelivered: Vec<SyncIssue> = to_correct
            .into_iter()
            .filter(|issue| !delivered.contains(&(issue.type_name.as_str(), issue.stable_id)))
            .collect();
        merge_issues(&mut unresolved, undelivered);

        if !corrections.collection.is_empty() {
            let applied = leg.target.apply_corrections(
                session_id,
                ServiceRequest::new(corrections.collection).from_replica(leg.source_replica),
            )?;
            merge_issues(&mut unresolved, applied.collection);
        }

        for issue in &unresolved {
            tracing::warn!(%session_id, type_name = %issue.type_name, stable_id = %issue.stable_id, issue = %issue.issue_type, "unresolved after corrections");
        }
        Ok(unresolved)
    }

    fn handle_error(&self, error: SyncError) -> SyncError {
        tracing::warn!(error = %error, "sync pass aborted");
        self.set_state(SyncState::Error);
        self.stats.write().last_error = Some(error.to_string());
        error
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

fn close_quietly(peer: &dyn SyncPeer, session: &SyncSession) {
    if let Err(e) = peer.end_sync(session) {
        tracing::warn!(session_id = %session.session_id, error = %e, "failed to close session");
    }
}

fn correctable(issues: &[SyncIssue]) -> Vec<SyncIssue> {
    issues
        .iter()
        .filter(|issue| issue.is_correctable())
        .cloned()
        .collect()
}

/// Appends issues not already present, keyed by type name and stable id.
fn merge_issues(into: &mut Vec<SyncIssue>, more: impl IntoIterator<Item = SyncIssue>) {
    for issue in more {
        let known = into
            .iter()
            .any(|seen| seen.type_name == issue.type_name && seen.stable_id == issue.stable_id);
        if !known {
            into.push(issue);
        }
    }
}
