//! Domain-level adapter over the remote record-store transport

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::models::{Thought, ThoughtId};
use crate::prefs::{Preferences, TokenStore};
use crate::remote::retry::RetryPolicy;
use crate::remote::transport::RemoteStore;
use crate::remote::types::{
    AccountState, CloudChange, FetchResult, PushEnvelope, RemoteRecord,
};

/// Names and policies for the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    /// Remote zone holding this app's thought records.
    pub zone_name: String,
    /// Database subscription id for push notifications.
    pub subscription_id: String,
    /// Container identifier, matched against push-notification envelopes.
    pub container_id: String,
    pub retry: RetryPolicy,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            zone_name: "thoughts".to_string(),
            subscription_id: "thoughts-changes".to_string(),
            container_id: "app.jot".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Wraps a [`RemoteStore`] transport and exposes the domain-shaped surface
/// the sync engine consumes: thought save/delete, token-based change
/// fetching into an ordered change feed, idempotent zone/subscription
/// setup, and push-notification ingestion.
///
/// Cheap to clone; clones share the same feed and state.
#[derive(Clone)]
pub struct RemoteStoreAdapter {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn RemoteStore>,
    tokens: Arc<dyn TokenStore>,
    prefs: Arc<dyn Preferences>,
    config: AdapterConfig,
    changes_tx: mpsc::UnboundedSender<Vec<CloudChange>>,
    changes_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<CloudChange>>>>,
}

impl RemoteStoreAdapter {
    pub fn new(
        transport: Arc<dyn RemoteStore>,
        tokens: Arc<dyn TokenStore>,
        prefs: Arc<dyn Preferences>,
        config: AdapterConfig,
    ) -> Self {
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                transport,
                tokens,
                prefs,
                config,
                changes_tx,
                changes_rx: Mutex::new(Some(changes_rx)),
            }),
        }
    }

    /// Spawn the startup sequence: ensure the zone, run one initial fetch,
    /// then ensure the subscription. Skipped (apart from the fetch) when
    /// setup already completed on this device.
    pub fn start(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.run_setup().await;
        });
    }

    /// Take the change feed. Single consumer; returns `None` if already
    /// taken.
    pub fn changes(&self) -> Option<mpsc::UnboundedReceiver<Vec<CloudChange>>> {
        self.inner
            .changes_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Live feed of remote-account availability transitions.
    pub fn account_states(&self) -> mpsc::UnboundedReceiver<AccountState> {
        self.inner.transport.account_states()
    }

    /// Pull remote deltas and push them onto the change feed as one batch.
    pub async fn fetch_changes(&self) -> FetchResult {
        self.inner.fetch_changes().await
    }

    /// Upsert one thought. On success, returns the thought with
    /// server-assigned timestamps.
    pub async fn save(&self, thought: &Thought) -> Result<Thought> {
        self.inner.save(thought).await
    }

    /// Delete one thought. On success, returns the deleted id.
    pub async fn delete(&self, thought: &Thought) -> Result<ThoughtId> {
        self.inner.delete(thought).await
    }

    /// The currently authenticated remote user.
    pub async fn current_user_id(&self) -> Result<String> {
        self.inner
            .transport
            .user_record_name()
            .await
            .map_err(|err| match err {
                identity @ Error::IdentityUnavailable(_) => identity,
                other => Error::IdentityUnavailable(other.to_string()),
            })
    }

    /// Validate a platform push notification and, if it announces database
    /// changes for our container, fetch them.
    pub async fn ingest_push_notification(&self, payload: &serde_json::Value) -> FetchResult {
        let Ok(envelope) = serde_json::from_value::<PushEnvelope>(payload.clone()) else {
            debug!("ignoring malformed push notification payload");
            return FetchResult::NoData;
        };
        if !envelope.is_database_change_for(&self.inner.config.container_id) {
            debug!(?envelope, "ignoring push notification for other scope/container");
            return FetchResult::NoData;
        }
        self.inner.fetch_changes().await
    }

    /// Drop all change-token continuation state, forcing the next fetch to
    /// start from scratch.
    pub fn clear_sync_state(&self) {
        self.inner.tokens.clear();
    }

    #[cfg(test)]
    pub(crate) async fn run_setup_for_test(&self) {
        self.inner.run_setup().await;
    }
}

impl Inner {
    async fn run_setup(&self) {
        if self.prefs.remote_setup_done() {
            let _ = self.fetch_changes().await;
            return;
        }

        let transport = Arc::clone(&self.transport);
        let zone_name = self.config.zone_name.clone();
        let zone_result = self
            .config
            .retry
            .run(move || {
                let transport = Arc::clone(&transport);
                let zone_name = zone_name.clone();
                async move { transport.modify_zones(vec![zone_name]).await }
            })
            .await;
        let zone_ok = match zone_result {
            Ok(()) => {
                debug!(zone = %self.config.zone_name, "stored remote zone");
                true
            }
            Err(err) => {
                error!(%err, "error storing remote zone");
                false
            }
        };

        let _ = self.fetch_changes().await;

        let transport = Arc::clone(&self.transport);
        let subscription_id = self.config.subscription_id.clone();
        let subscription_result = self
            .config
            .retry
            .run(move || {
                let transport = Arc::clone(&transport);
                let subscription_id = subscription_id.clone();
                async move { transport.modify_subscriptions(vec![subscription_id]).await }
            })
            .await;
        let subscription_ok = match subscription_result {
            Ok(()) => {
                debug!(subscription = %self.config.subscription_id, "stored database subscription");
                true
            }
            Err(err) => {
                error!(%err, "error storing database subscription");
                false
            }
        };

        // The flag gates both the Refresh wait in the engine and whether
        // this sequence runs again, so it is set only once both halves
        // have succeeded.
        if zone_ok && subscription_ok {
            self.prefs.set_remote_setup_done(true);
        }
    }

    async fn fetch_changes(&self) -> FetchResult {
        if self.prefs.simulate_fetch_failure() {
            return FetchResult::Failed(Error::RemoteUnavailable(
                "simulated fetch failure".to_string(),
            ));
        }

        let transport = Arc::clone(&self.transport);
        let since = self.tokens.database_token();
        let database_changes = match self
            .config
            .retry
            .run(move || {
                let transport = Arc::clone(&transport);
                let since = since.clone();
                async move { transport.fetch_database_changes(since).await }
            })
            .await
        {
            Ok(changes) => changes,
            Err(err) => return FetchResult::Failed(err),
        };

        if !database_changes
            .changed_zones
            .iter()
            .any(|zone| zone == &self.config.zone_name)
        {
            self.tokens
                .set_database_token(database_changes.change_token.as_deref());
            return FetchResult::NoData;
        }

        let transport = Arc::clone(&self.transport);
        let zone_name = self.config.zone_name.clone();
        let since = self.tokens.zone_token(&self.config.zone_name);
        let zone_changes = match self
            .config
            .retry
            .run(move || {
                let transport = Arc::clone(&transport);
                let zone_name = zone_name.clone();
                let since = since.clone();
                async move { transport.fetch_zone_changes(zone_name, since).await }
            })
            .await
        {
            Ok(changes) => changes,
            Err(err) => return FetchResult::Failed(err),
        };

        // Continuation state is committed only once the zone deltas are in
        // hand: advancing the database token past a failed zone fetch would
        // drop those records from every future delta.
        self.tokens
            .set_zone_token(&self.config.zone_name, zone_changes.change_token.as_deref());
        self.tokens
            .set_database_token(database_changes.change_token.as_deref());

        let mut changes = Vec::new();
        for record in &zone_changes.changed_records {
            match Thought::try_from(record) {
                Ok(thought) => changes.push(CloudChange::Modified(thought)),
                // One bad record never aborts the batch.
                Err(err) => warn!(%err, record = %record.name, "skipping unconvertible record"),
            }
        }
        for name in &zone_changes.deleted_record_names {
            match name.parse::<ThoughtId>() {
                Ok(id) => changes.push(CloudChange::Deleted(id)),
                Err(_) => warn!(record = %name, "skipping deleted record with invalid id"),
            }
        }

        debug!(count = changes.len(), "fetched zone changes");
        let has_changes = !changes.is_empty();
        let _ = self.changes_tx.send(changes);
        if has_changes {
            FetchResult::NewData
        } else {
            FetchResult::NoData
        }
    }

    async fn save(&self, thought: &Thought) -> Result<Thought> {
        if self.prefs.simulate_send_failure() {
            return Err(Error::RemoteUnavailable(
                "simulated send failure".to_string(),
            ));
        }

        let transport = Arc::clone(&self.transport);
        let record = RemoteRecord::from_thought(thought);
        let result = self
            .config
            .retry
            .run(move || {
                let transport = Arc::clone(&transport);
                let record = record.clone();
                async move { transport.modify_records(vec![record], vec![]).await }
            })
            .await?;

        let saved = result.saved_records.first().ok_or_else(|| {
            Error::RecordConversion("save response contained no saved record".to_string())
        })?;
        Thought::try_from(saved)
    }

    async fn delete(&self, thought: &Thought) -> Result<ThoughtId> {
        if self.prefs.simulate_send_failure() {
            return Err(Error::RemoteUnavailable(
                "simulated send failure".to_string(),
            ));
        }

        let transport = Arc::clone(&self.transport);
        let name = thought.id.to_string();
        let result = self
            .config
            .retry
            .run(move || {
                let transport = Arc::clone(&transport);
                let name = name.clone();
                async move { transport.modify_records(vec![], vec![name]).await }
            })
            .await?;

        result
            .deleted_record_names
            .first()
            .and_then(|name| name.parse().ok())
            .ok_or_else(|| {
                Error::RecordConversion("delete response contained no deleted id".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::types::{DatabaseChanges, ZoneChanges};
    use crate::testing::{MemoryPreferences, ReplayingRemoteStore};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn adapter_with(
        transport: Arc<ReplayingRemoteStore>,
        prefs: Arc<MemoryPreferences>,
    ) -> RemoteStoreAdapter {
        RemoteStoreAdapter::new(
            transport,
            Arc::clone(&prefs) as Arc<dyn TokenStore>,
            prefs,
            AdapterConfig {
                retry: RetryPolicy::none(),
                ..AdapterConfig::default()
            },
        )
    }

    fn thought_record(thought: &Thought) -> RemoteRecord {
        let mut record = RemoteRecord::from_thought(thought);
        record.created_at = Some(chrono::Utc::now());
        record.modified_at = record.created_at;
        record
    }

    #[tokio::test]
    async fn test_fetch_no_changed_zones_is_no_data() {
        let transport = Arc::new(ReplayingRemoteStore::new());
        transport.queue_database_changes(Ok(DatabaseChanges {
            changed_zones: vec![],
            change_token: Some("t1".to_string()),
        }));
        let prefs = Arc::new(MemoryPreferences::new());
        let adapter = adapter_with(transport, Arc::clone(&prefs));

        assert_eq!(adapter.fetch_changes().await, FetchResult::NoData);
        assert_eq!(prefs.database_token().as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn test_fetch_delivers_batch_and_stores_tokens() {
        let thought = Thought::new(ThoughtId::new(), "t", "b");
        let transport = Arc::new(ReplayingRemoteStore::new());
        transport.queue_database_changes(Ok(DatabaseChanges {
            changed_zones: vec!["thoughts".to_string()],
            change_token: Some("db-2".to_string()),
        }));
        transport.queue_zone_changes(Ok(ZoneChanges {
            changed_records: vec![thought_record(&thought)],
            deleted_record_names: vec![],
            change_token: Some("zone-2".to_string()),
        }));
        let prefs = Arc::new(MemoryPreferences::new());
        let adapter = adapter_with(transport, Arc::clone(&prefs));
        let mut feed = adapter.changes().unwrap();

        assert_eq!(adapter.fetch_changes().await, FetchResult::NewData);
        assert_eq!(prefs.zone_token("thoughts").as_deref(), Some("zone-2"));

        let batch = feed.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
        match &batch[0] {
            CloudChange::Modified(fetched) => assert_eq!(fetched.id, thought.id),
            other => panic!("unexpected change: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unconvertible_record_is_skipped_not_fatal() {
        let good = Thought::new(ThoughtId::new(), "ok", "ok");
        let bad = RemoteRecord {
            name: "garbage".to_string(),
            title: String::new(),
            body: String::new(),
            created_at: None,
            modified_at: None,
        };
        let transport = Arc::new(ReplayingRemoteStore::new());
        transport.queue_database_changes(Ok(DatabaseChanges {
            changed_zones: vec!["thoughts".to_string()],
            change_token: None,
        }));
        transport.queue_zone_changes(Ok(ZoneChanges {
            changed_records: vec![bad, thought_record(&good)],
            deleted_record_names: vec!["also-garbage".to_string()],
            change_token: None,
        }));
        let prefs = Arc::new(MemoryPreferences::new());
        let adapter = adapter_with(transport, prefs);
        let mut feed = adapter.changes().unwrap();

        assert_eq!(adapter.fetch_changes().await, FetchResult::NewData);
        let batch = feed.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert!(matches!(&batch[0], CloudChange::Modified(t) if t.id == good.id));
    }

    #[tokio::test]
    async fn test_failed_zone_fetch_leaves_database_token_uncommitted() {
        let thought = Thought::new(ThoughtId::new(), "pending", "b");
        let summary = DatabaseChanges {
            changed_zones: vec!["thoughts".to_string()],
            change_token: Some("db-1".to_string()),
        };
        let transport = Arc::new(ReplayingRemoteStore::new());
        transport.queue_database_changes(Ok(summary.clone()));
        transport.queue_zone_changes(Err(Error::RemoteUnavailable("blip".to_string())));
        // The retry replays the same summary because the token never moved.
        transport.queue_database_changes(Ok(summary));
        transport.queue_zone_changes(Ok(ZoneChanges {
            changed_records: vec![thought_record(&thought)],
            deleted_record_names: vec![],
            change_token: Some("zone-1".to_string()),
        }));
        let prefs = Arc::new(MemoryPreferences::new());
        let adapter = adapter_with(transport, Arc::clone(&prefs));
        let mut feed = adapter.changes().unwrap();

        assert!(matches!(
            adapter.fetch_changes().await,
            FetchResult::Failed(Error::RemoteUnavailable(_))
        ));
        assert!(prefs.database_token().is_none());

        assert_eq!(adapter.fetch_changes().await, FetchResult::NewData);
        assert_eq!(prefs.database_token().as_deref(), Some("db-1"));
        let batch = feed.recv().await.unwrap();
        assert!(matches!(&batch[0], CloudChange::Modified(t) if t.id == thought.id));
    }

    #[tokio::test]
    async fn test_simulated_fetch_failure() {
        let transport = Arc::new(ReplayingRemoteStore::new());
        let prefs = Arc::new(MemoryPreferences::new());
        prefs.set_simulate_fetch_failure(true);
        let adapter = adapter_with(transport, prefs);

        assert!(matches!(
            adapter.fetch_changes().await,
            FetchResult::Failed(Error::RemoteUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_retries_transient_failures() {
        let transport = Arc::new(ReplayingRemoteStore::new());
        transport.queue_database_changes(Err(Error::RemoteUnavailable("blip".to_string())));
        transport.queue_database_changes(Ok(DatabaseChanges::default()));
        let prefs = Arc::new(MemoryPreferences::new());
        let adapter = RemoteStoreAdapter::new(
            Arc::clone(&transport) as Arc<dyn RemoteStore>,
            Arc::clone(&prefs) as Arc<dyn TokenStore>,
            prefs,
            AdapterConfig {
                retry: RetryPolicy::new(3, Duration::from_millis(1)),
                ..AdapterConfig::default()
            },
        );

        assert_eq!(adapter.fetch_changes().await, FetchResult::NoData);
    }

    #[tokio::test]
    async fn test_save_echoes_server_timestamps() {
        let transport = Arc::new(ReplayingRemoteStore::new());
        let prefs = Arc::new(MemoryPreferences::new());
        let adapter = adapter_with(transport, prefs);

        let local = Thought::new(ThoughtId::new(), "title", "body");
        let saved = adapter.save(&local).await.unwrap();
        assert_eq!(saved.id, local.id);
        assert!(saved.created_at.is_some());
        assert!(saved.modified_at.is_some());
    }

    #[tokio::test]
    async fn test_simulated_send_failure() {
        let transport = Arc::new(ReplayingRemoteStore::new());
        let prefs = Arc::new(MemoryPreferences::new());
        prefs.set_simulate_send_failure(true);
        let adapter = adapter_with(transport, prefs);

        let local = Thought::new(ThoughtId::new(), "title", "body");
        assert!(matches!(
            adapter.save(&local).await,
            Err(Error::RemoteUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_returns_id() {
        let transport = Arc::new(ReplayingRemoteStore::new());
        let prefs = Arc::new(MemoryPreferences::new());
        let adapter = adapter_with(transport, prefs);

        let thought = Thought::new(ThoughtId::new(), "t", "b");
        let deleted = adapter.delete(&thought).await.unwrap();
        assert_eq!(deleted, thought.id);
    }

    #[tokio::test]
    async fn test_push_ingestion_validates_envelope() {
        let transport = Arc::new(ReplayingRemoteStore::new());
        transport.queue_database_changes(Ok(DatabaseChanges::default()));
        let prefs = Arc::new(MemoryPreferences::new());
        let adapter = adapter_with(transport, prefs);

        // Wrong container: acknowledged without touching the transport.
        let foreign = serde_json::to_value(PushEnvelope::database_change("app.other")).unwrap();
        assert_eq!(
            adapter.ingest_push_notification(&foreign).await,
            FetchResult::NoData
        );

        // Malformed payload.
        let junk = serde_json::json!({ "hello": "world" });
        assert_eq!(
            adapter.ingest_push_notification(&junk).await,
            FetchResult::NoData
        );

        // Matching envelope delegates to a fetch, consuming the queue.
        let ours = serde_json::to_value(PushEnvelope::database_change("app.jot")).unwrap();
        assert_eq!(
            adapter.ingest_push_notification(&ours).await,
            FetchResult::NoData
        );
    }

    #[tokio::test]
    async fn test_setup_marks_done_when_zone_and_subscription_succeed() {
        let transport = Arc::new(ReplayingRemoteStore::new());
        let prefs = Arc::new(MemoryPreferences::new());
        let adapter = adapter_with(transport, Arc::clone(&prefs));

        adapter.run_setup_for_test().await;
        assert!(prefs.remote_setup_done());
    }

    #[tokio::test]
    async fn test_setup_not_marked_done_on_subscription_failure() {
        let transport = Arc::new(ReplayingRemoteStore::new());
        transport.queue_subscription_result(Err(Error::RemoteUnavailable("down".to_string())));
        let prefs = Arc::new(MemoryPreferences::new());
        let adapter = adapter_with(transport, Arc::clone(&prefs));

        adapter.run_setup_for_test().await;
        assert!(!prefs.remote_setup_done());
    }

    #[tokio::test]
    async fn test_clear_sync_state_drops_tokens() {
        let transport = Arc::new(ReplayingRemoteStore::new());
        let prefs = Arc::new(MemoryPreferences::new());
        prefs.set_database_token(Some("stale"));
        prefs.set_zone_token("thoughts", Some("stale"));
        let adapter = adapter_with(transport, Arc::clone(&prefs));

        adapter.clear_sync_state();
        assert!(prefs.database_token().is_none());
        assert!(prefs.zone_token("thoughts").is_none());
    }
}
