//! Repository-level sync orchestration.
//!
//! A cycle pulls first and pushes second:
//!
//! ```text
//! Idle -> Pulling -> Pushing -> Idle
//!           |           ^
//!           +-----------+  (push skipped on pull failure or cancel)
//! ```
//!
//! Every remote update of a cycle is applied or flagged as a conflict
//! before anything is pushed. Entities with an open conflict are held back
//! from push until the caller resolves them.

use crate::client::RemoteSyncClient;
use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use crate::queue::PendingChangeStore;
use crate::registry::ConflictRegistry;
use crate::store::LocalStore;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tidemark_sync_protocol::{
    now_millis, ConflictType, LogicalTime, PendingChange, PullResult, PushResult, RemoteUpdate,
    SyncConflict, SyncEntity,
};
use tracing::{debug, info, warn};

/// The current phase of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No cycle is running.
    Idle,
    /// Pulling and applying remote changes.
    Pulling,
    /// Pushing pending local changes.
    Pushing,
}

impl SyncState {
    /// Returns true while a cycle is running.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Pulling | SyncState::Pushing)
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Pull and push completed and every pushed change was accounted for
    /// as accepted or conflicted.
    Succeeded,
    /// The pull succeeded but the push did not fully complete.
    PartiallyFailed {
        /// What went wrong.
        reason: String,
    },
    /// The pull failed; nothing was applied and nothing was pushed.
    Failed {
        /// What went wrong.
        reason: String,
    },
}

impl SyncOutcome {
    /// Returns true for [`SyncOutcome::Succeeded`].
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Succeeded)
    }

    /// Returns true for [`SyncOutcome::Failed`].
    pub fn is_failed(&self) -> bool {
        matches!(self, SyncOutcome::Failed { .. })
    }
}

/// Summary of one sync cycle.
#[derive(Debug, Clone)]
pub struct SyncReport<T> {
    /// Remote updates received (after per-entity deduplication).
    pub pulled_count: usize,
    /// Remote updates written to the local store.
    pub applied_count: usize,
    /// Pending changes accepted by the remote.
    pub pushed_success_count: usize,
    /// Pending changes left queued after a push.
    pub pushed_failed_count: usize,
    /// Conflicts detected during this cycle, in detection order.
    pub conflicts: Vec<SyncConflict<T>>,
    /// How the cycle ended.
    pub outcome: SyncOutcome,
    /// Watermark to persist for the next cycle.
    pub watermark: LogicalTime,
    /// Wall-clock duration of the cycle.
    pub duration: Duration,
}

impl<T> SyncReport<T> {
    fn new(watermark: LogicalTime) -> Self {
        Self {
            pulled_count: 0,
            applied_count: 0,
            pushed_success_count: 0,
            pushed_failed_count: 0,
            conflicts: Vec::new(),
            outcome: SyncOutcome::Succeeded,
            watermark,
            duration: Duration::ZERO,
        }
    }
}

/// Cumulative counters across cycles.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Cycles that ran to completion (any outcome).
    pub cycles_completed: u64,
    /// Cycles whose outcome was `Failed`.
    pub cycles_failed: u64,
    /// Remote updates received.
    pub updates_pulled: u64,
    /// Remote updates applied locally.
    pub updates_applied: u64,
    /// Pending changes accepted by the remote.
    pub changes_pushed: u64,
    /// Conflicts detected.
    pub conflicts_detected: u64,
    /// Retries performed by `sync_with_retry`.
    pub retries: u64,
    /// When the last cycle finished.
    pub last_sync_time: Option<Instant>,
    /// Reason of the last non-successful cycle, cleared on success.
    pub last_error: Option<String>,
}

/// How the caller resolved an open conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
    /// Keep this version of the entity (local, remote or merged).
    Keep(T),
    /// Delete the entity on both sides.
    Delete,
}

/// Marks a cycle as running for as long as it is alive.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> SyncResult<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SyncError::SyncInProgress)?;
        Ok(Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives sync cycles for one entity type.
///
/// The orchestrator owns the local store handle, the pending queue and the
/// conflict registry. Only one cycle runs at a time; a concurrent call to
/// [`run_sync_cycle`](Self::run_sync_cycle), [`enqueue_change`](Self::enqueue_change)
/// or [`resolve_conflict`](Self::resolve_conflict) fails with
/// [`SyncError::SyncInProgress`] without touching any state.
///
/// Without a client the orchestrator runs offline: pulls observe nothing
/// and pending changes stay queued.
pub struct RepositorySyncOrchestrator<T, L, Q, C> {
    store: L,
    queue: Q,
    client: Option<C>,
    retry: RetryConfig,
    registry: RwLock<ConflictRegistry<T>>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    watermark: AtomicU64,
    running: AtomicBool,
    cancelled: Arc<AtomicBool>,
    _marker: PhantomData<fn() -> T>,
}

/// What a cycle did, plus the error behind a `Failed` outcome.
struct CycleRun<T> {
    report: SyncReport<T>,
    pull_error: Option<SyncError>,
}

impl<T, L, Q, C> RepositorySyncOrchestrator<T, L, Q, C>
where
    T: SyncEntity,
    L: LocalStore<T>,
    Q: PendingChangeStore<T>,
    C: RemoteSyncClient<T>,
{
    /// Creates an orchestrator that syncs through `client`.
    pub fn new(store: L, queue: Q, client: C) -> Self {
        Self::build(store, queue, Some(client))
    }

    /// Creates an orchestrator without a remote.
    pub fn offline(store: L, queue: Q) -> Self {
        Self::build(store, queue, None)
    }

    fn build(store: L, queue: Q, client: Option<C>) -> Self {
        Self {
            store,
            queue,
            client,
            retry: RetryConfig::default(),
            registry: RwLock::new(ConflictRegistry::new()),
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            watermark: AtomicU64::new(0),
            running: AtomicBool::new(false),
            cancelled: Arc::new(AtomicBool::new(false)),
            _marker: PhantomData,
        }
    }

    /// Sets the retry policy used by [`sync_with_retry`](Self::sync_with_retry).
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the local store.
    pub fn store(&self) -> &L {
        &self.store
    }

    /// Returns the pending queue.
    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Returns true if a remote client is configured.
    pub fn is_online(&self) -> bool {
        self.client.is_some()
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the cumulative stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Watermark reached by the last cycle whose pull succeeded.
    pub fn watermark(&self) -> LogicalTime {
        self.watermark.load(Ordering::SeqCst)
    }

    /// Requests cancellation of the running cycle.
    ///
    /// Takes effect between the pull and push phases.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// A handle that cancels the running cycle from another thread.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    /// Records a local mutation for the next push.
    pub fn enqueue_change(&self, change: PendingChange<T>) -> SyncResult<u64> {
        let _guard = RunGuard::acquire(&self.running)?;
        let seq = self.queue.enqueue(change);
        debug!(seq, "change enqueued");
        Ok(seq)
    }

    /// All unresolved conflicts, oldest first.
    pub fn open_conflicts(&self) -> Vec<SyncConflict<T>> {
        self.registry.read().open_conflicts()
    }

    /// Resolves an open conflict.
    ///
    /// Writes the chosen version to the local store, drops the entity's
    /// stale queued changes and enqueues a corrective change. Keeping an
    /// entity the remote deleted re-creates it; any other kept version is
    /// sent as an Update. Returns the sequence number of the corrective
    /// change.
    pub fn resolve_conflict(&self, entity_id: &str, resolution: Resolution<T>) -> SyncResult<u64> {
        let _guard = RunGuard::acquire(&self.running)?;
        let conflict = self
            .registry
            .write()
            .take(entity_id)
            .ok_or_else(|| SyncError::UnknownConflict(entity_id.to_string()))?;

        let stale: Vec<u64> = self
            .queue
            .changes_for(entity_id)
            .iter()
            .map(|c| c.seq)
            .collect();
        self.queue.remove(&stale);

        let remote_id = self.store.remote_id(entity_id)?;
        let change = match resolution {
            Resolution::Keep(entity) => {
                self.store.upsert(entity.clone())?;
                if conflict.remote_deleted() {
                    PendingChange::create(entity)
                } else {
                    PendingChange::update(entity)
                }
            }
            Resolution::Delete => {
                self.store.remove(entity_id)?;
                PendingChange::delete(entity_id)
            }
        };
        let change = match remote_id {
            Some(remote_id) => change.with_remote_id(remote_id),
            None => change,
        };

        let seq = self.queue.enqueue(change);
        info!(entity_id, seq, conflict_type = ?conflict.conflict_type, "conflict resolved");
        Ok(seq)
    }

    /// Runs one pull-then-push cycle starting at `watermark`.
    ///
    /// Transport failures, rejected changes and conflicts are reported in
    /// the returned [`SyncReport`]. The only error is
    /// [`SyncError::SyncInProgress`].
    pub fn run_sync_cycle(&self, watermark: LogicalTime) -> SyncResult<SyncReport<T>> {
        self.cycle(watermark).map(|run| run.report)
    }

    /// Runs cycles until one completes a pull, retrying pull failures that
    /// are retryable with the configured backoff.
    pub fn sync_with_retry(&self, watermark: LogicalTime) -> SyncResult<SyncReport<T>> {
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                std::thread::sleep(self.retry.delay_for_attempt(attempt));
                if self.is_cancelled() {
                    return Err(SyncError::Cancelled);
                }
                self.stats.write().retries += 1;
            }

            let run = match self.cycle(watermark) {
                Ok(run) => run,
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    attempt += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            match &run.pull_error {
                Some(e) if e.is_retryable() && attempt + 1 < attempts => {
                    debug!(attempt, error = %e, "retrying sync cycle");
                    attempt += 1;
                }
                _ => return Ok(run.report),
            }
        }
    }

    fn cycle(&self, watermark: LogicalTime) -> SyncResult<CycleRun<T>> {
        let _guard = RunGuard::acquire(&self.running)?;
        let start = Instant::now();
        self.cancelled.store(false, Ordering::SeqCst);

        let mut run = CycleRun {
            report: SyncReport::new(watermark),
            pull_error: None,
        };

        self.set_state(SyncState::Pulling);
        let pulled = match self.pull(watermark) {
            Ok(pulled) => pulled,
            Err(e) => {
                warn!(error = %e, watermark, "pull failed");
                run.report.outcome = SyncOutcome::Failed {
                    reason: e.to_string(),
                };
                run.pull_error = Some(e);
                return Ok(self.finish(run, start));
            }
        };

        let new_watermark = pulled.new_watermark.max(watermark);
        if let Err(e) = self.apply_pull(pulled, &mut run.report) {
            warn!(error = %e, "applying remote updates failed");
            run.report.outcome = SyncOutcome::Failed {
                reason: e.to_string(),
            };
            run.pull_error = Some(e);
            return Ok(self.finish(run, start));
        }
        run.report.watermark = new_watermark;
        self.watermark.fetch_max(new_watermark, Ordering::SeqCst);

        if self.is_cancelled() {
            info!("sync cancelled before push");
            run.report.outcome = SyncOutcome::PartiallyFailed {
                reason: SyncError::Cancelled.to_string(),
            };
            return Ok(self.finish(run, start));
        }

        self.set_state(SyncState::Pushing);
        run.report.outcome = self.push(&mut run.report);
        Ok(self.finish(run, start))
    }

    fn pull(&self, watermark: LogicalTime) -> SyncResult<PullResult<T>> {
        match &self.client {
            Some(client) => client.pull(watermark),
            None => Ok(PullResult::unchanged(watermark)),
        }
    }

    /// Applies deduplicated remote updates, flagging those that collide with
    /// pending local changes.
    fn apply_pull(&self, pulled: PullResult<T>, report: &mut SyncReport<T>) -> SyncResult<()> {
        let updates = latest_per_entity(pulled.updates);
        report.pulled_count = updates.len();
        debug!(updates = updates.len(), "applying remote updates");

        for update in updates {
            let queued = self.queue.changes_for(&update.entity_id);
            let Some(local) = queued.last() else {
                self.apply_remote(update)?;
                report.applied_count += 1;
                continue;
            };

            match ConflictType::classify(local.is_delete(), update.is_delete()) {
                Some(conflict_type) => {
                    debug!(entity_id = %update.entity_id, ?conflict_type, "conflict on pull");
                    let conflict = SyncConflict::new(
                        update.entity_id,
                        conflict_type,
                        local.entity.clone(),
                        update.entity,
                        now_millis(),
                    );
                    self.record_conflict(conflict, report);
                }
                None => {
                    // Both sides deleted; the queued delete is still pushed.
                    self.apply_remote(update)?;
                    report.applied_count += 1;
                }
            }
        }

        for conflict in pulled.conflicts {
            self.record_conflict(conflict, report);
        }
        Ok(())
    }

    fn apply_remote(&self, update: RemoteUpdate<T>) -> SyncResult<()> {
        match update.entity {
            Some(entity) => self.store.upsert(entity),
            None => self.store.remove(&update.entity_id),
        }
    }

    fn record_conflict(&self, conflict: SyncConflict<T>, report: &mut SyncReport<T>) {
        self.registry.write().record(conflict.clone());
        report.conflicts.push(conflict);
    }

    fn push(&self, report: &mut SyncReport<T>) -> SyncOutcome {
        let outgoing: Vec<PendingChange<T>> = {
            let registry = self.registry.read();
            self.queue
                .snapshot()
                .into_iter()
                .filter(|c| !registry.contains(&c.entity_id))
                .collect()
        };
        let held = self.queue.len() - outgoing.len();

        if outgoing.is_empty() {
            debug!(held, "nothing to push");
            return SyncOutcome::Succeeded;
        }

        let result: PushResult<T> = match &self.client {
            Some(client) => client.push(&outgoing),
            None => PushResult::empty(),
        };

        if let Some(reason) = &result.transport_error {
            warn!(%reason, changes = outgoing.len(), "push failed, changes stay queued");
            report.pushed_failed_count = outgoing.len();
            return SyncOutcome::PartiallyFailed {
                reason: reason.clone(),
            };
        }

        let mut store_errors = Vec::new();
        let accepted: Vec<u64> = result.successful.iter().map(|c| c.seq).collect();
        self.queue.remove(&accepted);
        for change in &result.successful {
            if let Some(remote_id) = &change.remote_id {
                self.queue.assign_remote_id(&change.entity_id, remote_id);
                if let Err(e) = self.store.assign_remote_id(&change.entity_id, remote_id) {
                    warn!(entity_id = %change.entity_id, error = %e, "could not record remote id");
                    store_errors.push(e);
                }
            }
        }

        let conflicted: Vec<u64> = result.conflicted_changes.iter().map(|c| c.seq).collect();
        self.queue.remove(&conflicted);
        let pulled_ids: HashSet<String> =
            report.conflicts.iter().map(|c| c.entity_id.clone()).collect();
        for conflict in result.conflicts {
            if pulled_ids.contains(&conflict.entity_id) {
                continue;
            }
            debug!(entity_id = %conflict.entity_id, conflict_type = ?conflict.conflict_type, "conflict on push");
            self.record_conflict(conflict, report);
        }

        // Changes the client never reported on stay queued like failures.
        report.pushed_success_count = result.successful.len();
        report.pushed_failed_count = result.failed.len();

        if !result.failed.is_empty() {
            SyncOutcome::PartiallyFailed {
                reason: format!("{} change(s) rejected by remote", result.failed.len()),
            }
        } else if let Some(e) = store_errors.first() {
            SyncOutcome::PartiallyFailed {
                reason: e.to_string(),
            }
        } else {
            SyncOutcome::Succeeded
        }
    }

    fn finish(&self, mut run: CycleRun<T>, start: Instant) -> CycleRun<T> {
        let report = &mut run.report;
        report.duration = start.elapsed();
        self.set_state(SyncState::Idle);

        {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            stats.updates_pulled += report.pulled_count as u64;
            stats.updates_applied += report.applied_count as u64;
            stats.changes_pushed += report.pushed_success_count as u64;
            stats.conflicts_detected += report.conflicts.len() as u64;
            stats.last_sync_time = Some(Instant::now());
            match &report.outcome {
                SyncOutcome::Succeeded => stats.last_error = None,
                SyncOutcome::PartiallyFailed { reason } => stats.last_error = Some(reason.clone()),
                SyncOutcome::Failed { reason } => {
                    stats.cycles_failed += 1;
                    stats.last_error = Some(reason.clone());
                }
            }
        }

        info!(
            pulled = report.pulled_count,
            applied = report.applied_count,
            pushed = report.pushed_success_count,
            failed = report.pushed_failed_count,
            conflicts = report.conflicts.len(),
            watermark = report.watermark,
            outcome = ?report.outcome,
            "sync cycle finished"
        );
        run
    }
}

/// Keeps one update per entity: the latest timestamp, the later position
/// on ties. Order of first appearance is preserved.
fn latest_per_entity<T>(updates: Vec<RemoteUpdate<T>>) -> Vec<RemoteUpdate<T>> {
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut latest: Vec<RemoteUpdate<T>> = Vec::with_capacity(updates.len());
    for update in updates {
        match position.get(&update.entity_id) {
            Some(&i) => {
                if update.timestamp >= latest[i].timestamp {
                    latest[i] = update;
                }
            }
            None => {
                position.insert(update.entity_id.clone(), latest.len());
                latest.push(update);
            }
        }
    }
    latest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::NullSyncClient;
    use crate::queue::MemoryPendingQueue;
    use crate::store::MemoryLocalStore;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tidemark_testkit::{note, Note};

    /// A client that replays scripted pull results and records pushes.
    #[derive(Default)]
    struct ScriptedClient {
        pulls: Mutex<VecDeque<SyncResult<PullResult<Note>>>>,
        pushes: Mutex<Vec<Vec<PendingChange<Note>>>>,
        push_reply: Mutex<Option<Box<dyn Fn(&[PendingChange<Note>]) -> PushResult<Note> + Send>>>,
    }

    impl ScriptedClient {
        fn with_pull(self, result: SyncResult<PullResult<Note>>) -> Self {
            self.pulls.lock().push_back(result);
            self
        }

        fn replying(
            self,
            reply: impl Fn(&[PendingChange<Note>]) -> PushResult<Note> + Send + 'static,
        ) -> Self {
            *self.push_reply.lock() = Some(Box::new(reply));
            self
        }

        fn pushed(&self) -> Vec<Vec<PendingChange<Note>>> {
            self.pushes.lock().clone()
        }
    }

    impl RemoteSyncClient<Note> for ScriptedClient {
        fn push(&self, changes: &[PendingChange<Note>]) -> PushResult<Note> {
            self.pushes.lock().push(changes.to_vec());
            match &*self.push_reply.lock() {
                Some(reply) => reply(changes),
                None => accept_all(changes),
            }
        }

        fn pull(&self, last_watermark: LogicalTime) -> SyncResult<PullResult<Note>> {
            self.pulls
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(PullResult::unchanged(last_watermark)))
        }
    }

    fn accept_all(changes: &[PendingChange<Note>]) -> PushResult<Note> {
        PushResult {
            successful: changes
                .iter()
                .cloned()
                .map(|c| {
                    let id = format!("r-{}", c.entity_id);
                    c.with_remote_id(id)
                })
                .collect(),
            ..PushResult::empty()
        }
    }

    fn pulled(updates: Vec<RemoteUpdate<Note>>, new_watermark: LogicalTime) -> PullResult<Note> {
        PullResult {
            updates,
            conflicts: Vec::new(),
            new_watermark,
        }
    }

    type Orchestrator =
        RepositorySyncOrchestrator<Note, MemoryLocalStore<Note>, MemoryPendingQueue<Note>, ScriptedClient>;

    fn orchestrator(client: ScriptedClient) -> Orchestrator {
        RepositorySyncOrchestrator::new(MemoryLocalStore::new(), MemoryPendingQueue::new(), client)
    }

    #[test]
    fn create_round_trip_empties_queue_and_assigns_remote_id() {
        let orch = orchestrator(ScriptedClient::default());
        orch.store().upsert(note("e1", "hello")).unwrap();
        orch.enqueue_change(PendingChange::create(note("e1", "hello")))
            .unwrap();

        let report = orch.run_sync_cycle(0).unwrap();
        assert_eq!(report.outcome, SyncOutcome::Succeeded);
        assert_eq!(report.pushed_success_count, 1);
        assert!(orch.queue().is_empty());
        assert_eq!(
            orch.store().remote_id("e1").unwrap().as_deref(),
            Some("r-e1")
        );
    }

    #[test]
    fn remote_update_without_local_change_is_applied() {
        let client = ScriptedClient::default()
            .with_pull(Ok(pulled(vec![RemoteUpdate::upsert("e1", note("e1", "remote"), 7)], 7)));
        let orch = orchestrator(client);

        let report = orch.run_sync_cycle(0).unwrap();
        assert_eq!(report.applied_count, 1);
        assert_eq!(report.watermark, 7);
        assert_eq!(orch.watermark(), 7);
        assert_eq!(orch.store().get("e1").unwrap(), Some(note("e1", "remote")));
    }

    #[test]
    fn both_modified_is_flagged_and_not_pushed() {
        let client = ScriptedClient::default()
            .with_pull(Ok(pulled(vec![RemoteUpdate::upsert("e1", note("e1", "theirs"), 5)], 5)));
        let orch = orchestrator(client);
        orch.store().upsert(note("e1", "mine")).unwrap();
        orch.enqueue_change(PendingChange::update(note("e1", "mine")))
            .unwrap();

        let report = orch.run_sync_cycle(0).unwrap();
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].conflict_type, ConflictType::BothModified);
        assert_eq!(report.outcome, SyncOutcome::Succeeded);
        assert_eq!(orch.store().get("e1").unwrap(), Some(note("e1", "mine")));
        assert!(orch.client.as_ref().unwrap().pushed().is_empty());
        assert_eq!(orch.open_conflicts().len(), 1);
        assert_eq!(orch.queue().len(), 1);
    }

    #[test]
    fn remote_delete_against_local_update() {
        let client = ScriptedClient::default()
            .with_pull(Ok(pulled(vec![RemoteUpdate::deleted("e1", 5)], 5)));
        let orch = orchestrator(client);
        orch.store().upsert(note("e1", "mine")).unwrap();
        orch.enqueue_change(PendingChange::update(note("e1", "mine")))
            .unwrap();

        let report = orch.run_sync_cycle(0).unwrap();
        assert_eq!(
            report.conflicts[0].conflict_type,
            ConflictType::LocalModifiedRemoteDeleted
        );
        assert!(report.conflicts[0].remote_entity.is_none());
        assert_eq!(orch.store().get("e1").unwrap(), Some(note("e1", "mine")));
    }

    #[test]
    fn local_delete_against_remote_update() {
        let client = ScriptedClient::default()
            .with_pull(Ok(pulled(vec![RemoteUpdate::upsert("e1", note("e1", "theirs"), 5)], 5)));
        let orch = orchestrator(client);
        orch.enqueue_change(PendingChange::delete("e1")).unwrap();

        let report = orch.run_sync_cycle(0).unwrap();
        assert_eq!(
            report.conflicts[0].conflict_type,
            ConflictType::LocalDeletedRemoteModified
        );
        assert!(report.conflicts[0].local_entity.is_none());
        assert!(orch.store().get("e1").unwrap().is_none());
    }

    #[test]
    fn both_deleted_converges() {
        let client = ScriptedClient::default()
            .with_pull(Ok(pulled(vec![RemoteUpdate::deleted("e1", 5)], 5)));
        let orch = orchestrator(client);
        orch.store().upsert(note("e1", "x")).unwrap();
        orch.enqueue_change(PendingChange::delete("e1")).unwrap();

        let report = orch.run_sync_cycle(0).unwrap();
        assert!(report.conflicts.is_empty());
        assert_eq!(report.applied_count, 1);
        assert!(orch.store().get("e1").unwrap().is_none());
        assert_eq!(report.pushed_success_count, 1);
        assert!(orch.queue().is_empty());
    }

    #[test]
    fn pull_failure_keeps_watermark_and_skips_push() {
        let client = ScriptedClient::default()
            .with_pull(Err(SyncError::transport_retryable("offline")));
        let orch = orchestrator(client);
        orch.enqueue_change(PendingChange::create(note("e1", "x")))
            .unwrap();

        let report = orch.run_sync_cycle(9).unwrap();
        assert!(report.outcome.is_failed());
        assert_eq!(report.watermark, 9);
        assert_eq!(orch.queue().len(), 1);
        assert!(orch.client.as_ref().unwrap().pushed().is_empty());
        assert_eq!(orch.stats().cycles_failed, 1);
    }

    #[test]
    fn push_transport_failure_loses_nothing() {
        let client = ScriptedClient::default()
            .replying(|changes| PushResult::transport_failed(changes.to_vec(), "reset"));
        let orch = orchestrator(client);
        orch.enqueue_change(PendingChange::create(note("a", "1")))
            .unwrap();
        orch.enqueue_change(PendingChange::create(note("b", "2")))
            .unwrap();

        let report = orch.run_sync_cycle(0).unwrap();
        assert!(matches!(report.outcome, SyncOutcome::PartiallyFailed { .. }));
        assert_eq!(report.pushed_failed_count, 2);
        assert_eq!(orch.queue().len(), 2);
    }

    #[test]
    fn rejected_change_stays_queued() {
        let client = ScriptedClient::default().replying(|changes| PushResult {
            failed: changes.to_vec(),
            ..PushResult::empty()
        });
        let orch = orchestrator(client);
        orch.enqueue_change(PendingChange::update(note("a", "1")))
            .unwrap();

        let report = orch.run_sync_cycle(0).unwrap();
        assert_eq!(report.pushed_failed_count, 1);
        assert!(matches!(report.outcome, SyncOutcome::PartiallyFailed { .. }));
        assert_eq!(orch.queue().len(), 1);
    }

    #[test]
    fn push_conflict_removes_change_and_opens_conflict() {
        let client = ScriptedClient::default().replying(|changes| PushResult {
            conflicts: vec![SyncConflict::new(
                "a",
                ConflictType::DuplicateCreation,
                changes[0].entity.clone(),
                Some(note("a", "server")),
                3,
            )],
            conflicted_changes: changes.to_vec(),
            ..PushResult::empty()
        });
        let orch = orchestrator(client);
        orch.enqueue_change(PendingChange::create(note("a", "client")))
            .unwrap();

        let report = orch.run_sync_cycle(0).unwrap();
        assert_eq!(report.outcome, SyncOutcome::Succeeded);
        assert!(orch.queue().is_empty());
        assert_eq!(
            orch.open_conflicts()[0].conflict_type,
            ConflictType::DuplicateCreation
        );
    }

    #[test]
    fn cancelled_cycle_advances_watermark_but_keeps_queue() {
        // The flag is reset when a cycle starts, so cancel from inside pull.
        struct CancelOnPull(Arc<AtomicBool>);
        impl RemoteSyncClient<Note> for CancelOnPull {
            fn push(&self, changes: &[PendingChange<Note>]) -> PushResult<Note> {
                accept_all(changes)
            }
            fn pull(&self, w: LogicalTime) -> SyncResult<PullResult<Note>> {
                self.0.store(true, Ordering::SeqCst);
                Ok(PullResult::unchanged(w + 4))
            }
        }

        let store: MemoryLocalStore<Note> = MemoryLocalStore::new();
        let queue = MemoryPendingQueue::new();
        queue.enqueue(PendingChange::create(note("a", "1")));
        let flag = Arc::new(AtomicBool::new(false));
        let mut orch = RepositorySyncOrchestrator::new(store, queue, CancelOnPull(flag.clone()));
        orch.cancelled = flag;

        let report = orch.run_sync_cycle(1).unwrap();
        assert_eq!(
            report.outcome,
            SyncOutcome::PartiallyFailed {
                reason: "sync cancelled".into()
            }
        );
        assert_eq!(report.watermark, 5);
        assert_eq!(orch.queue().len(), 1);
    }

    #[test]
    fn concurrent_cycle_is_rejected() {
        let orch = orchestrator(ScriptedClient::default());
        let _guard = RunGuard::acquire(&orch.running).unwrap();

        assert_eq!(orch.run_sync_cycle(0).unwrap_err(), SyncError::SyncInProgress);
        assert_eq!(
            orch.enqueue_change(PendingChange::delete("x")).unwrap_err(),
            SyncError::SyncInProgress
        );
        assert_eq!(orch.state(), SyncState::Idle);
    }

    #[test]
    fn resolve_keep_enqueues_corrective_update() {
        let client = ScriptedClient::default()
            .with_pull(Ok(pulled(vec![RemoteUpdate::upsert("e1", note("e1", "theirs"), 5)], 5)));
        let orch = orchestrator(client);
        orch.store().assign_remote_id("e1", "r-e1").unwrap();
        orch.enqueue_change(PendingChange::update(note("e1", "mine")))
            .unwrap();
        orch.run_sync_cycle(0).unwrap();

        orch.resolve_conflict("e1", Resolution::Keep(note("e1", "merged")))
            .unwrap();
        assert!(orch.open_conflicts().is_empty());
        assert_eq!(orch.store().get("e1").unwrap(), Some(note("e1", "merged")));

        let queued = orch.queue().snapshot();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].operation, tidemark_sync_protocol::ChangeOperation::Update);
        assert_eq!(queued[0].remote_id.as_deref(), Some("r-e1"));
        assert_eq!(queued[0].entity, Some(note("e1", "merged")));
    }

    #[test]
    fn resolve_delete_enqueues_delete() {
        let client = ScriptedClient::default()
            .with_pull(Ok(pulled(vec![RemoteUpdate::upsert("e1", note("e1", "theirs"), 5)], 5)));
        let orch = orchestrator(client);
        orch.store().upsert(note("e1", "mine")).unwrap();
        orch.enqueue_change(PendingChange::update(note("e1", "mine")))
            .unwrap();
        orch.run_sync_cycle(0).unwrap();

        orch.resolve_conflict("e1", Resolution::Delete).unwrap();
        assert!(orch.store().get("e1").unwrap().is_none());
        assert!(orch.queue().snapshot()[0].is_delete());
    }

    #[test]
    fn resolve_unknown_conflict_fails() {
        let orch = orchestrator(ScriptedClient::default());
        assert_eq!(
            orch.resolve_conflict("ghost", Resolution::Delete),
            Err(SyncError::UnknownConflict("ghost".into()))
        );
    }

    #[test]
    fn open_conflict_blocks_push_until_resolved() {
        let client = ScriptedClient::default()
            .with_pull(Ok(pulled(vec![RemoteUpdate::upsert("e1", note("e1", "theirs"), 5)], 5)));
        let orch = orchestrator(client);
        orch.enqueue_change(PendingChange::update(note("e1", "mine")))
            .unwrap();
        orch.run_sync_cycle(0).unwrap();

        orch.run_sync_cycle(5).unwrap();
        assert!(orch.client.as_ref().unwrap().pushed().is_empty());

        orch.resolve_conflict("e1", Resolution::Keep(note("e1", "mine")))
            .unwrap();
        let report = orch.run_sync_cycle(5).unwrap();
        assert_eq!(report.pushed_success_count, 1);
    }

    #[test]
    fn duplicate_updates_keep_latest() {
        let updates = vec![
            RemoteUpdate::upsert("a", note("a", "old"), 5),
            RemoteUpdate::upsert("b", note("b", "only"), 1),
            RemoteUpdate::upsert("a", note("a", "new"), 9),
            RemoteUpdate::upsert("a", note("a", "stale"), 2),
            RemoteUpdate::upsert("b", note("b", "tie"), 1),
        ];
        let latest = latest_per_entity(updates);
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].entity, Some(note("a", "new")));
        assert_eq!(latest[1].entity, Some(note("b", "tie")));
    }

    #[test]
    fn offline_orchestrator_keeps_changes() {
        let orch: RepositorySyncOrchestrator<Note, _, _, NullSyncClient> =
            RepositorySyncOrchestrator::offline(MemoryLocalStore::new(), MemoryPendingQueue::new());
        orch.enqueue_change(PendingChange::create(note("a", "1")))
            .unwrap();

        let report = orch.run_sync_cycle(3).unwrap();
        assert_eq!(report.outcome, SyncOutcome::Succeeded);
        assert_eq!(report.watermark, 3);
        assert_eq!(orch.queue().len(), 1);
        assert!(!orch.is_online());
    }

    #[test]
    fn retry_reruns_retryable_pull_failures() {
        let client = ScriptedClient::default()
            .with_pull(Err(SyncError::Timeout))
            .with_pull(Ok(pulled(vec![], 8)));
        let orch = orchestrator(client).with_retry(
            RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(1))
                .with_jitter(false),
        );

        let report = orch.sync_with_retry(0).unwrap();
        assert_eq!(report.outcome, SyncOutcome::Succeeded);
        assert_eq!(report.watermark, 8);
        assert_eq!(orch.stats().retries, 1);
    }

    #[test]
    fn retry_gives_up_on_fatal_failure() {
        let client = ScriptedClient::default()
            .with_pull(Err(SyncError::transport_fatal("bad certificate")));
        let orch = orchestrator(client).with_retry(
            RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(1))
                .with_jitter(false),
        );

        let report = orch.sync_with_retry(0).unwrap();
        assert!(report.outcome.is_failed());
        assert_eq!(orch.stats().retries, 0);
    }
}
