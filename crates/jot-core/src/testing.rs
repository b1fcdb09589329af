//! Test doubles for the engine's injection points
//!
//! Everything here is deterministic and in-memory. The replaying remote
//! store answers with benign defaults so a test only queues the responses
//! it actually cares about.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::warn;

use crate::cache::LocalCache;
use crate::error::{Error, Result};
use crate::ids::IdService;
use crate::models::{Thought, ThoughtId};
use crate::prefs::{Preferences, TokenStore};
use crate::remote::{
    AccountState, DatabaseChanges, ModifyRecordsResult, RemoteRecord, RemoteStore, ZoneChanges,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// In-memory [`LocalCache`] that records write traffic.
#[derive(Default)]
pub struct MemoryCache {
    thoughts: Mutex<Vec<Thought>>,
    writes: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache pre-seeded with previously persisted thoughts.
    #[must_use]
    pub fn with_thoughts(thoughts: Vec<Thought>) -> Self {
        Self {
            thoughts: Mutex::new(thoughts),
            ..Self::default()
        }
    }

    /// When set, every cache operation fails with a persistence error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// The currently persisted set.
    #[must_use]
    pub fn stored(&self) -> Vec<Thought> {
        lock(&self.thoughts).clone()
    }

    /// Number of `write_all` calls so far, failed ones included.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(Error::LocalPersistence(
                "simulated cache failure".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

impl LocalCache for MemoryCache {
    fn read(&self) -> Result<Vec<Thought>> {
        self.check()?;
        Ok(self.stored())
    }

    fn write_all(&self, thoughts: &[Thought]) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        *lock(&self.thoughts) = thoughts.to_vec();
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.check()?;
        lock(&self.thoughts).clear();
        Ok(())
    }
}

#[derive(Default)]
struct PrefState {
    setup_done: bool,
    user_id: Option<String>,
    simulate_send: bool,
    simulate_fetch: bool,
    database_token: Option<String>,
    zone_tokens: HashMap<String, String>,
}

/// In-memory [`Preferences`] and [`TokenStore`].
#[derive(Default)]
pub struct MemoryPreferences {
    state: Mutex<PrefState>,
}

impl MemoryPreferences {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Preferences for a device where remote setup already completed.
    #[must_use]
    pub fn with_setup_done() -> Self {
        let prefs = Self::default();
        lock(&prefs.state).setup_done = true;
        prefs
    }

    /// Preferences with a previously seen remote user identity.
    #[must_use]
    pub fn with_user_id(user_id: &str) -> Self {
        let prefs = Self::default();
        lock(&prefs.state).user_id = Some(user_id.to_string());
        prefs
    }
}

impl Preferences for MemoryPreferences {
    fn remote_setup_done(&self) -> bool {
        lock(&self.state).setup_done
    }

    fn set_remote_setup_done(&self, done: bool) {
        lock(&self.state).setup_done = done;
    }

    fn remote_user_id(&self) -> Option<String> {
        lock(&self.state).user_id.clone()
    }

    fn set_remote_user_id(&self, user_id: Option<&str>) {
        lock(&self.state).user_id = user_id.map(ToString::to_string);
    }

    fn simulate_send_failure(&self) -> bool {
        lock(&self.state).simulate_send
    }

    fn set_simulate_send_failure(&self, simulate: bool) {
        lock(&self.state).simulate_send = simulate;
    }

    fn simulate_fetch_failure(&self) -> bool {
        lock(&self.state).simulate_fetch
    }

    fn set_simulate_fetch_failure(&self, simulate: bool) {
        lock(&self.state).simulate_fetch = simulate;
    }

    fn clear(&self) {
        let mut state = lock(&self.state);
        state.setup_done = false;
        state.user_id = None;
        state.simulate_send = false;
        state.simulate_fetch = false;
    }
}

impl TokenStore for MemoryPreferences {
    fn database_token(&self) -> Option<String> {
        lock(&self.state).database_token.clone()
    }

    fn set_database_token(&self, token: Option<&str>) {
        lock(&self.state).database_token = token.map(ToString::to_string);
    }

    fn zone_token(&self, zone: &str) -> Option<String> {
        lock(&self.state).zone_tokens.get(zone).cloned()
    }

    fn set_zone_token(&self, zone: &str, token: Option<&str>) {
        let mut state = lock(&self.state);
        match token {
            Some(token) => {
                state.zone_tokens.insert(zone.to_string(), token.to_string());
            }
            None => {
                state.zone_tokens.remove(zone);
            }
        }
    }

    fn clear(&self) {
        let mut state = lock(&self.state);
        state.database_token = None;
        state.zone_tokens.clear();
    }
}

/// [`IdService`] replaying a fixed sequence of ids.
///
/// Falls back to fresh ids when the sequence runs out, so a test that
/// creates more thoughts than it scripted still behaves sensibly.
pub struct SequenceIds {
    ids: Mutex<VecDeque<ThoughtId>>,
}

impl SequenceIds {
    #[must_use]
    pub fn new(ids: Vec<ThoughtId>) -> Self {
        Self {
            ids: Mutex::new(ids.into()),
        }
    }

    /// A sequence of `count` freshly generated ids.
    #[must_use]
    pub fn with_fresh_ids(count: usize) -> Self {
        Self::new((0..count).map(|_| ThoughtId::new()).collect())
    }
}

impl IdService for SequenceIds {
    fn next_id(&self) -> ThoughtId {
        lock(&self.ids).pop_front().unwrap_or_else(ThoughtId::new)
    }
}

type Queue<T> = Mutex<VecDeque<T>>;

/// [`RemoteStore`] that replays queued responses.
///
/// Every operation has a benign default used when its queue is empty:
/// zone and subscription writes succeed, change fetches report nothing
/// new, and record modifications echo the request back with
/// server-assigned timestamps, the way the real store confirms a save.
/// Identity lookups have no sensible default and fail unless queued.
#[derive(Default)]
pub struct ReplayingRemoteStore {
    zone_results: Queue<Result<()>>,
    subscription_results: Queue<Result<()>>,
    database_changes: Queue<Result<DatabaseChanges>>,
    zone_changes: Queue<Result<ZoneChanges>>,
    modify_results: Queue<Result<ModifyRecordsResult>>,
    user_record_names: Queue<Result<String>>,
    account_feed: Mutex<Option<AccountFeed>>,
}

struct AccountFeed {
    tx: mpsc::UnboundedSender<AccountState>,
    rx: Option<mpsc::UnboundedReceiver<AccountState>>,
}

impl ReplayingRemoteStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_zone_result(&self, result: Result<()>) {
        lock(&self.zone_results).push_back(result);
    }

    pub fn queue_subscription_result(&self, result: Result<()>) {
        lock(&self.subscription_results).push_back(result);
    }

    pub fn queue_database_changes(&self, result: Result<DatabaseChanges>) {
        lock(&self.database_changes).push_back(result);
    }

    pub fn queue_zone_changes(&self, result: Result<ZoneChanges>) {
        lock(&self.zone_changes).push_back(result);
    }

    pub fn queue_modify_records(&self, result: Result<ModifyRecordsResult>) {
        lock(&self.modify_results).push_back(result);
    }

    pub fn queue_user_record_name(&self, result: Result<String>) {
        lock(&self.user_record_names).push_back(result);
    }

    /// Emit an account-state transition on the live feed.
    pub fn push_account_state(&self, state: AccountState) {
        let mut feed = lock(&self.account_feed);
        let feed = feed.get_or_insert_with(AccountFeed::new);
        let _ = feed.tx.send(state);
    }

    fn next<T>(queue: &Queue<T>) -> Option<T> {
        lock(queue).pop_front()
    }
}

impl AccountFeed {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx) }
    }
}

#[async_trait]
impl RemoteStore for ReplayingRemoteStore {
    async fn modify_zones(&self, _saving: Vec<String>) -> Result<()> {
        Self::next(&self.zone_results).unwrap_or(Ok(()))
    }

    async fn modify_subscriptions(&self, _saving: Vec<String>) -> Result<()> {
        Self::next(&self.subscription_results).unwrap_or(Ok(()))
    }

    async fn fetch_database_changes(&self, _since: Option<String>) -> Result<DatabaseChanges> {
        Self::next(&self.database_changes).unwrap_or_else(|| Ok(DatabaseChanges::default()))
    }

    async fn fetch_zone_changes(
        &self,
        _zone: String,
        _since: Option<String>,
    ) -> Result<ZoneChanges> {
        Self::next(&self.zone_changes).unwrap_or_else(|| Ok(ZoneChanges::default()))
    }

    async fn modify_records(
        &self,
        saving: Vec<RemoteRecord>,
        deleting: Vec<String>,
    ) -> Result<ModifyRecordsResult> {
        if let Some(queued) = Self::next(&self.modify_results) {
            return queued;
        }

        let now = chrono::Utc::now();
        let saved_records = saving
            .into_iter()
            .map(|mut record| {
                record.created_at = record.created_at.or(Some(now));
                record.modified_at = Some(now);
                record
            })
            .collect();
        Ok(ModifyRecordsResult {
            saved_records,
            deleted_record_names: deleting,
        })
    }

    async fn user_record_name(&self) -> Result<String> {
        Self::next(&self.user_record_names)
            .unwrap_or_else(|| Err(Error::IdentityUnavailable("no identity queued".to_string())))
    }

    fn account_states(&self) -> mpsc::UnboundedReceiver<AccountState> {
        let mut feed = lock(&self.account_feed);
        let feed = feed.get_or_insert_with(AccountFeed::new);
        feed.rx.take().unwrap_or_else(|| {
            warn!("account feed consumed twice, returning a closed feed");
            mpsc::unbounded_channel().1
        })
    }
}
