//! The sync engine
//!
//! [`Store`] owns the authoritative in-memory thought set. UI layers send
//! [`Action`]s to mutate it; every mutation is written through to the
//! local cache and persisted to the remote store. Remote-originated
//! changes arrive through the adapter's change feed and are merged into
//! the same set.
//!
//! Concurrency discipline: all actions (and the initial bootstrap) are
//! serialized through a single-slot gate, so no two mutating operations
//! ever run concurrently. The change-feed merge task intentionally does
//! NOT take the gate: merges are idempotent upserts/deletes by id and
//! may interleave with a gate-held action. Readers only ever observe
//! published `watch` snapshots.

use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, warn};

use crate::cache::LocalCache;
use crate::error::Error;
use crate::ids::IdService;
use crate::models::{Thought, ThoughtId};
use crate::prefs::Preferences;
use crate::remote::{AccountState, CloudChange, FetchResult, RemoteStoreAdapter};

/// How often a waiting refresh re-checks whether remote setup completed.
const SETUP_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// The in-memory thought set: insertion-ordered, unique ids.
pub type ThoughtSet = IndexMap<ThoughtId, Thought>;

/// How the store behaves after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// The store should not run any logic.
    ///
    /// For tests that need a store which talks to nothing.
    Blank,

    /// Regular behavior.
    Regular,
}

/// User-driven inputs to the store.
#[derive(Debug, Clone)]
pub enum Action {
    /// Create a new thought with the indicated content.
    SaveNew { title: String, body: String },

    /// Update an existing thought with the indicated content.
    Modify {
        thought: Thought,
        title: String,
        body: String,
    },

    /// Delete this thought.
    Delete(Thought),

    /// Clear local state and re-download everything.
    ///
    /// Requested manually from settings, or triggered when a remote
    /// identity mismatch is detected (another account logged in, which
    /// must not see the previous account's content).
    ClearLocalState,

    /// Refresh data from the cloud, e.g. pull-to-refresh.
    Refresh,

    /// Treat all saving to the remote store as failed (test/demo).
    SimulateSendFailure(bool),

    /// Treat all change fetching as failed (test/demo).
    SimulateFetchFailure(bool),
}

/// Cloud transaction status in a form suitable for presenting to the user.
///
/// Not a log: the latest transition overwrites the previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    /// No operations in progress.
    Idle,

    /// Saving one thought.
    Saving(Thought),

    /// Fetching new changes from the cloud.
    Fetching,

    /// There was an error fetching or syncing.
    Error(Error),
}

/// The sync engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

struct Inner {
    cache: Arc<dyn LocalCache>,
    remote: RemoteStoreAdapter,
    prefs: Arc<dyn Preferences>,
    ids: Arc<dyn IdService>,

    /// Single-slot gate serializing every state-modifying operation,
    /// bootstrap included.
    gate: Mutex<()>,

    thoughts: watch::Sender<ThoughtSet>,
    account_state: watch::Sender<AccountState>,
    status: watch::Sender<TransactionStatus>,
}

impl Store {
    /// Build a store and, for regular behavior, spawn its background
    /// tasks: remote setup, bootstrap (cache load + identity check),
    /// account-state forwarding, and the change-feed merge loop.
    pub fn new(
        cache: Arc<dyn LocalCache>,
        remote: RemoteStoreAdapter,
        prefs: Arc<dyn Preferences>,
        ids: Arc<dyn IdService>,
        behavior: Behavior,
    ) -> Self {
        Self::with_initial_status(cache, remote, prefs, ids, behavior, TransactionStatus::Idle)
    }

    /// Like [`Store::new`], with an explicit starting transaction status.
    pub fn with_initial_status(
        cache: Arc<dyn LocalCache>,
        remote: RemoteStoreAdapter,
        prefs: Arc<dyn Preferences>,
        ids: Arc<dyn IdService>,
        behavior: Behavior,
        initial_status: TransactionStatus,
    ) -> Self {
        let (thoughts, _) = watch::channel(ThoughtSet::new());
        let (account_state, _) = watch::channel(AccountState::ProvisionalAvailable);
        let (status, _) = watch::channel(initial_status);

        let inner = Arc::new(Inner {
            cache,
            remote,
            prefs,
            ids,
            gate: Mutex::new(()),
            thoughts,
            account_state,
            status,
        });
        let store = Self { inner };

        if behavior == Behavior::Regular {
            store.spawn_background_tasks();
        }
        store
    }

    fn spawn_background_tasks(&self) {
        self.inner.remote.start();

        // Bootstrap: load the cached set, then verify the remote identity.
        // Takes the gate so no user action can race the initial load.
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let _gate = inner.gate.lock().await;
            inner.load_thoughts_from_cache();
            inner.verify_remote_user().await;
        });

        // Republish account-state transitions for the store's lifetime.
        let inner = Arc::clone(&self.inner);
        let mut account_states = inner.remote.account_states();
        tokio::spawn(async move {
            while let Some(state) = account_states.recv().await {
                inner.account_state.send_replace(state);
            }
        });

        // Merge every change-feed batch as it arrives. This subscription
        // is never closed, and it runs outside the action gate.
        match self.inner.remote.changes() {
            Some(mut feed) => {
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    while let Some(batch) = feed.recv().await {
                        inner.apply_changes(&batch);
                    }
                });
            }
            None => error!("change feed already consumed; remote merges disabled"),
        }
    }

    /// Receive an action and process it.
    ///
    /// Actions are processed serially, guarded by the gate.
    pub async fn send(&self, action: Action) {
        let _gate = self.inner.gate.lock().await;
        self.inner.handle(action).await;
    }

    /// Forward a platform push notification to the remote adapter.
    ///
    /// Returns the fetch outcome for platform-level acknowledgment. This
    /// is the one entry point that bypasses the action gate: it only
    /// triggers a fetch whose results flow through the normal feed-merge
    /// path, never a direct mutation.
    pub async fn ingest_remote_notification(&self, payload: &serde_json::Value) -> FetchResult {
        self.inner.remote.ingest_push_notification(payload).await
    }

    /// Snapshot of the current thought set, in insertion order.
    pub fn thoughts(&self) -> Vec<Thought> {
        self.inner.thoughts.borrow().values().cloned().collect()
    }

    /// Subscribe to thought-set changes.
    pub fn watch_thoughts(&self) -> watch::Receiver<ThoughtSet> {
        self.inner.thoughts.subscribe()
    }

    pub fn account_state(&self) -> AccountState {
        *self.inner.account_state.borrow()
    }

    pub fn watch_account_state(&self) -> watch::Receiver<AccountState> {
        self.inner.account_state.subscribe()
    }

    pub fn status(&self) -> TransactionStatus {
        self.inner.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<TransactionStatus> {
        self.inner.status.subscribe()
    }

    pub fn simulate_send_failure_enabled(&self) -> bool {
        self.inner.prefs.simulate_send_failure()
    }

    pub fn simulate_fetch_failure_enabled(&self) -> bool {
        self.inner.prefs.simulate_fetch_failure()
    }
}

impl Inner {
    async fn handle(&self, action: Action) {
        match action {
            Action::SaveNew { title, body } => {
                let thought = Thought::new(self.ids.next_id(), title, body);
                self.thoughts.send_modify(|set| {
                    set.insert(thought.id, thought.clone());
                });
                self.save_thought(thought).await;
            }

            Action::Modify {
                thought,
                title,
                body,
            } => {
                let updated = thought.edited(title, body);
                self.thoughts.send_modify(|set| {
                    set.insert(updated.id, updated.clone());
                });
                self.save_thought(updated).await;
            }

            Action::Delete(thought) => {
                self.thoughts.send_modify(|set| {
                    set.shift_remove(&thought.id);
                });
                self.write_through();

                match self.remote.delete(&thought).await {
                    Ok(id) => debug!(%id, "deleted thought from remote store"),
                    // Local state already reflects user intent; the
                    // operation is locally complete, so no error status.
                    Err(err) => error!(%err, "could not delete thought from remote store"),
                }
            }

            Action::ClearLocalState => self.clear_local_state().await,

            Action::Refresh => {
                let _ = self.fetch_changes_from_cloud().await;
            }

            Action::SimulateSendFailure(simulate) => {
                self.prefs.set_simulate_send_failure(simulate);
            }

            Action::SimulateFetchFailure(simulate) => {
                self.prefs.set_simulate_fetch_failure(simulate);
            }
        }
    }

    /// Persist a thought that was just created or updated locally.
    ///
    /// Optimistic: the local insert stays in place on failure. On success
    /// the server-confirmed thought funnels through the same merge path
    /// used for feed batches, so one code path reconciles both sources.
    async fn save_thought(&self, thought: Thought) {
        self.status
            .send_replace(TransactionStatus::Saving(thought.clone()));
        self.write_through();

        match self.remote.save(&thought).await {
            Ok(saved) => {
                debug!(id = %saved.id, "saved thought to remote store");
                self.apply_changes(&[CloudChange::Modified(saved)]);
                self.status.send_replace(TransactionStatus::Idle);
            }
            Err(err) => {
                error!(%err, "could not save thought to remote store");
                self.status.send_replace(TransactionStatus::Error(err));
            }
        }
    }

    async fn fetch_changes_from_cloud(&self) -> FetchResult {
        // Wait for the initial remote setup before fetching, checking at a
        // short interval. This guarantees the initial pull happens on a
        // fresh device as well as on one where setup already completed.
        // The wait is deliberately unbounded: the setup sequence runs
        // concurrently and flips the flag when done.
        while !self.prefs.remote_setup_done() {
            tokio::time::sleep(SETUP_POLL_INTERVAL).await;
        }

        debug!("starting to fetch changes from cloud");
        self.status.send_replace(TransactionStatus::Fetching);
        let result = self.remote.fetch_changes().await;
        match &result {
            FetchResult::NewData | FetchResult::NoData => {
                debug!("fetched changes from cloud");
                self.status.send_replace(TransactionStatus::Idle);
            }
            FetchResult::Failed(err) => {
                error!(%err, "error fetching changes from cloud");
                self.status
                    .send_replace(TransactionStatus::Error(err.clone()));
            }
        }
        result
    }

    /// Ingest a batch of changes and write the result through to cache.
    ///
    /// Applied in order; a later entry for the same id overrides an
    /// earlier one. The cache write happens once per batch.
    fn apply_changes(&self, changes: &[CloudChange]) {
        self.thoughts.send_modify(|set| {
            for change in changes {
                match change {
                    CloudChange::Modified(thought) => {
                        set.insert(thought.id, thought.clone());
                    }
                    CloudChange::Deleted(id) => {
                        set.shift_remove(id);
                    }
                }
            }
        });
        self.write_through();
    }

    /// Empty everything local and rebuild from the remote source of truth.
    ///
    /// Called with the gate already held (by `send` or by bootstrap).
    async fn clear_local_state(&self) {
        self.thoughts.send_replace(ThoughtSet::new());
        if let Err(err) = self.cache.clear() {
            warn!(%err, "could not clear local cache");
        }
        self.remote.clear_sync_state();
        let _ = self.remote.fetch_changes().await;
    }

    /// Verify that we are running as the expected remote user.
    ///
    /// A changed identity means another account is signed in on this
    /// device; local state is cleared so that account cannot see the
    /// previous one's thoughts. Runs while bootstrap holds the gate, so
    /// the reset goes through the internal handler rather than `send`.
    async fn verify_remote_user(&self) {
        let user_id = match self.remote.current_user_id().await {
            Ok(id) => id,
            Err(err) => {
                // Transient; never clear state on a failed identity check.
                debug!(%err, "skipping remote identity check");
                return;
            }
        };

        match self.prefs.remote_user_id() {
            None => {
                debug!("no previous remote user id found, storing new one");
                self.prefs.set_remote_user_id(Some(&user_id));
            }
            Some(previous) if previous == user_id => {
                debug!("remote user id matches known id");
            }
            Some(_) => {
                error!("remote user id does not match known id, clearing local state");
                self.prefs.set_remote_user_id(Some(&user_id));
                self.clear_local_state().await;
            }
        }
    }

    fn load_thoughts_from_cache(&self) {
        let cached = match self.cache.read() {
            Ok(thoughts) => thoughts,
            Err(err) => {
                // Cache is best-effort; start empty rather than fail.
                warn!(%err, "could not read local cache, starting empty");
                Vec::new()
            }
        };
        debug!(count = cached.len(), "restoring thoughts from local cache");
        self.thoughts
            .send_replace(cached.into_iter().map(|t| (t.id, t)).collect());
    }

    /// Mirror the in-memory set to the local cache.
    ///
    /// The in-memory set stays authoritative regardless of persistence
    /// outcome; failures are logged and never surfaced.
    fn write_through(&self) {
        let snapshot: Vec<Thought> = self.thoughts.borrow().values().cloned().collect();
        if let Err(err) = self.cache.write_all(&snapshot) {
            warn!(%err, "could not persist thoughts to local cache");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{AdapterConfig, RemoteRecord, RetryPolicy};
    use crate::testing::{MemoryCache, MemoryPreferences, ReplayingRemoteStore, SequenceIds};
    use pretty_assertions::assert_eq;

    fn blank_store_with_cache() -> (Store, Arc<MemoryCache>) {
        let cache = Arc::new(MemoryCache::new());
        let prefs = Arc::new(MemoryPreferences::new());
        let remote = RemoteStoreAdapter::new(
            Arc::new(ReplayingRemoteStore::new()),
            Arc::clone(&prefs) as _,
            Arc::clone(&prefs) as _,
            AdapterConfig {
                retry: RetryPolicy::none(),
                ..AdapterConfig::default()
            },
        );
        let store = Store::new(
            Arc::clone(&cache) as _,
            remote,
            prefs,
            Arc::new(SequenceIds::with_fresh_ids(8)),
            Behavior::Blank,
        );
        (store, cache)
    }

    fn confirmed(title: &str) -> Thought {
        let now = chrono::Utc::now();
        Thought {
            id: ThoughtId::new(),
            title: title.to_string(),
            body: format!("{title} body"),
            created_at: Some(now),
            modified_at: Some(now),
        }
    }

    #[tokio::test]
    async fn test_merge_is_idempotent() {
        let (store, _cache) = blank_store_with_cache();
        let thought = confirmed("a");

        store
            .inner
            .apply_changes(&[CloudChange::Modified(thought.clone())]);
        let once = store.thoughts();
        store
            .inner
            .apply_changes(&[CloudChange::Modified(thought)]);
        assert_eq!(store.thoughts(), once);
    }

    #[tokio::test]
    async fn test_later_batch_entry_wins_for_same_id() {
        let (store, _cache) = blank_store_with_cache();
        let v1 = confirmed("v1");
        let v2 = Thought {
            title: "v2".to_string(),
            ..v1.clone()
        };

        store.inner.apply_changes(&[
            CloudChange::Modified(v1),
            CloudChange::Modified(v2.clone()),
        ]);
        assert_eq!(store.thoughts(), vec![v2]);
    }

    #[tokio::test]
    async fn test_delete_after_modify_in_one_batch() {
        let (store, _cache) = blank_store_with_cache();
        let thought = confirmed("doomed");

        store.inner.apply_changes(&[
            CloudChange::Modified(thought.clone()),
            CloudChange::Deleted(thought.id),
        ]);
        assert_eq!(store.thoughts(), vec![]);
    }

    #[tokio::test]
    async fn test_deleting_absent_id_is_noop() {
        let (store, _cache) = blank_store_with_cache();
        let kept = confirmed("kept");

        store
            .inner
            .apply_changes(&[CloudChange::Modified(kept.clone())]);
        store
            .inner
            .apply_changes(&[CloudChange::Deleted(ThoughtId::new())]);
        assert_eq!(store.thoughts(), vec![kept]);
    }

    #[tokio::test]
    async fn test_merge_writes_through_to_cache_once() {
        let (store, cache) = blank_store_with_cache();
        let a = confirmed("a");
        let b = confirmed("b");

        store.inner.apply_changes(&[
            CloudChange::Modified(a.clone()),
            CloudChange::Modified(b.clone()),
        ]);
        assert_eq!(cache.stored(), vec![a, b]);
        assert_eq!(cache.write_count(), 1);
    }

    #[tokio::test]
    async fn test_merge_preserves_insertion_order_on_update() {
        let (store, _cache) = blank_store_with_cache();
        let a = confirmed("a");
        let b = confirmed("b");

        store.inner.apply_changes(&[
            CloudChange::Modified(a.clone()),
            CloudChange::Modified(b.clone()),
        ]);
        // Updating the first thought must not move it to the end.
        let a2 = Thought {
            title: "a2".to_string(),
            ..a
        };
        store
            .inner
            .apply_changes(&[CloudChange::Modified(a2.clone())]);
        assert_eq!(store.thoughts(), vec![a2, b]);
    }

    #[tokio::test]
    async fn test_blank_store_starts_idle_and_provisional() {
        let (store, _cache) = blank_store_with_cache();
        assert_eq!(store.status(), TransactionStatus::Idle);
        assert_eq!(store.account_state(), AccountState::ProvisionalAvailable);
        assert_eq!(store.thoughts(), vec![]);
    }

    #[tokio::test]
    async fn test_initial_status_injection() {
        let cache = Arc::new(MemoryCache::new());
        let prefs = Arc::new(MemoryPreferences::new());
        let remote = RemoteStoreAdapter::new(
            Arc::new(ReplayingRemoteStore::new()),
            Arc::clone(&prefs) as _,
            Arc::clone(&prefs) as _,
            AdapterConfig::default(),
        );
        let failed = TransactionStatus::Error(Error::RemoteUnavailable("offline".to_string()));
        let store = Store::with_initial_status(
            cache,
            remote,
            prefs,
            Arc::new(SequenceIds::with_fresh_ids(1)),
            Behavior::Blank,
            failed.clone(),
        );
        assert_eq!(store.status(), failed);
    }

    #[test]
    fn test_record_conversion_helper_used_by_feed() {
        // Guard the id<->record-name mapping the feed depends on.
        let thought = confirmed("wire");
        let record = RemoteRecord::from_thought(&thought);
        assert_eq!(record.name.parse::<ThoughtId>().unwrap(), thought.id);
    }
}
