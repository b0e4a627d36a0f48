// End-to-end pipeline tests over in-memory infrastructure: trigger
// evaluation, dispatch deduplication, orchestration, record state machine,
// and the round-robin content cursor, without Postgres, Redis, or NATS.

use async_trait::async_trait;
use chrono::{NaiveTime, TimeZone, Utc};
use common::credentials::CredentialResolver;
use common::errors::{CredentialError, DatabaseError, PublishError, QueueError, StorageError};
use common::lock::{ListLock, ListLockGuard};
use common::models::{
    AutoList, ContentItem, DestinationAccount, MediaKind, Platform, PlatformCredential,
    PublicationRecord, PublicationStatus, PublishRequested, ScheduleSpec, StatusChanged,
    ALL_DAYS_MASK,
};
use common::orchestrator::{
    ListStore, OrchestratorConfig, PublicationOrchestrator, PublicationStore,
};
use common::publisher::{PlatformPublisher, PublishOutcome, PublisherRegistry};
use common::queue::{StatusPublisher, TriggerDispatcher};
use common::trigger::{minute_bucket, InMemoryWatermarkStore, TriggerEvaluator};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// In-memory infrastructure
// ============================================================================

struct ListState {
    list: AutoList,
    specs: Vec<ScheduleSpec>,
    items: Vec<ContentItem>,
    accounts: Vec<DestinationAccount>,
    pop_count: usize,
}

struct InMemoryListStore {
    state: Mutex<ListState>,
}

impl InMemoryListStore {
    fn new(list: AutoList) -> Self {
        Self {
            state: Mutex::new(ListState {
                list,
                specs: Vec::new(),
                items: Vec::new(),
                accounts: Vec::new(),
                pop_count: 0,
            }),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut ListState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }
}

#[async_trait]
impl ListStore for InMemoryListStore {
    async fn find_enabled_specs(&self) -> Result<Vec<ScheduleSpec>, DatabaseError> {
        Ok(self.with(|s| {
            if s.list.enabled {
                s.specs.clone()
            } else {
                Vec::new()
            }
        }))
    }

    async fn get_list(&self, list_id: Uuid) -> Result<Option<AutoList>, DatabaseError> {
        Ok(self.with(|s| (s.list.id == list_id).then(|| s.list.clone())))
    }

    async fn pop_next_content_item(
        &self,
        list_id: Uuid,
    ) -> Result<Option<ContentItem>, DatabaseError> {
        Ok(self.with(|s| {
            if s.list.id != list_id || s.items.is_empty() {
                return None;
            }
            s.pop_count += 1;
            let offset = (s.list.queue_position as usize) % s.items.len();
            s.list.queue_position = (offset + 1) as i32;
            Some(s.items[offset].clone())
        }))
    }

    async fn destination_accounts(
        &self,
        _list_id: Uuid,
    ) -> Result<Vec<DestinationAccount>, DatabaseError> {
        Ok(self.with(|s| s.accounts.clone()))
    }
}

#[derive(Default)]
struct InMemoryPublicationStore {
    records: Mutex<HashMap<Uuid, PublicationRecord>>,
}

impl InMemoryPublicationStore {
    fn all(&self) -> Vec<PublicationRecord> {
        self.records.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl PublicationStore for InMemoryPublicationStore {
    async fn create(&self, record: &PublicationRecord) -> Result<(), DatabaseError> {
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&record.id) {
            return Err(DatabaseError::DuplicateKey(record.id.to_string()));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, record_id: Uuid) -> Result<Option<PublicationRecord>, DatabaseError> {
        Ok(self.records.lock().unwrap().get(&record_id).cloned())
    }

    async fn transition(
        &self,
        record_id: Uuid,
        from: PublicationStatus,
        to: PublicationStatus,
        public_url: Option<String>,
        error_message: Option<String>,
    ) -> Result<bool, DatabaseError> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&record_id)
            .ok_or_else(|| DatabaseError::NotFound(record_id.to_string()))?;

        if record.status != from || !from.can_transition(to) {
            return Ok(false);
        }

        record.status = to;
        record.public_url = public_url;
        record.error_message = error_message;
        record.last_transition_at = Utc::now();
        Ok(true)
    }

    async fn has_processing(&self, list_id: Uuid) -> Result<bool, DatabaseError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .any(|r| r.list_id == list_id && r.status == PublicationStatus::Processing))
    }
}

struct InMemoryListLock {
    held: Arc<Mutex<HashSet<Uuid>>>,
}

impl InMemoryListLock {
    fn new() -> Self {
        Self {
            held: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

#[async_trait]
impl ListLock for InMemoryListLock {
    async fn try_acquire(
        &self,
        list_id: Uuid,
        _ttl: Duration,
    ) -> Result<Option<ListLockGuard>, StorageError> {
        if !self.held.lock().unwrap().insert(list_id) {
            return Ok(None);
        }
        let held = Arc::clone(&self.held);
        Ok(Some(ListLockGuard::new(move || {
            held.lock().unwrap().remove(&list_id);
        })))
    }
}

/// Dispatcher with server-side deduplication semantics: a request whose
/// dedup key was already seen is dropped.
#[derive(Default)]
struct InMemoryDispatcher {
    seen_keys: Mutex<HashSet<String>>,
    queue: Mutex<Vec<PublishRequested>>,
}

impl InMemoryDispatcher {
    fn drain(&self) -> Vec<PublishRequested> {
        std::mem::take(&mut self.queue.lock().unwrap())
    }
}

#[async_trait]
impl TriggerDispatcher for InMemoryDispatcher {
    async fn dispatch(&self, event: &PublishRequested, dedup_key: &str) -> Result<(), QueueError> {
        if !self.seen_keys.lock().unwrap().insert(dedup_key.to_string()) {
            return Ok(());
        }
        self.queue.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingStatusPublisher {
    events: Mutex<Vec<StatusChanged>>,
}

impl RecordingStatusPublisher {
    fn statuses(&self) -> Vec<PublicationStatus> {
        self.events.lock().unwrap().iter().map(|e| e.status).collect()
    }
}

#[async_trait]
impl StatusPublisher for RecordingStatusPublisher {
    async fn publish_status(&self, event: &StatusChanged) -> Result<(), QueueError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

struct StaticCredentials;

#[async_trait]
impl CredentialResolver for StaticCredentials {
    async fn resolve(
        &self,
        account: &DestinationAccount,
    ) -> Result<PlatformCredential, CredentialError> {
        Ok(PlatformCredential {
            access_token: "token".to_string(),
            external_account_id: account.external_account_id.clone(),
        })
    }
}

/// Publisher scripted per destination: accounts in `failing` get a permanent
/// error, everything else publishes and records the media URL it saw.
struct ScriptedPublisher {
    failing: HashSet<String>,
    published_urls: Mutex<Vec<String>>,
}

impl ScriptedPublisher {
    fn succeeding() -> Self {
        Self {
            failing: HashSet::new(),
            published_urls: Mutex::new(Vec::new()),
        }
    }

    fn failing_for(external_account_id: &str) -> Self {
        Self {
            failing: HashSet::from([external_account_id.to_string()]),
            published_urls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PlatformPublisher for ScriptedPublisher {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    async fn publish(
        &self,
        credential: &PlatformCredential,
        item: &ContentItem,
    ) -> Result<PublishOutcome, PublishError> {
        if self.failing.contains(&credential.external_account_id) {
            return Err(PublishError::Permanent("Media rejected".to_string()));
        }
        self.published_urls.lock().unwrap().push(item.media_url.clone());
        Ok(PublishOutcome {
            public_url: Some(format!("https://instagram.com/p/{}", item.id)),
        })
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn list() -> AutoList {
    AutoList {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        name: "daily posts".to_string(),
        enabled: true,
        queue_position: 0,
        created_at: Utc::now(),
    }
}

fn item(list_id: Uuid, position: i32) -> ContentItem {
    ContentItem {
        id: Uuid::new_v4(),
        list_id,
        position,
        media_kind: MediaKind::Image,
        media_url: format!("https://cdn.example.com/{}.jpg", position),
        caption: None,
    }
}

fn account(user_id: Uuid, external_id: &str) -> DestinationAccount {
    DestinationAccount {
        id: Uuid::new_v4(),
        user_id,
        platform: Platform::Instagram,
        external_account_id: external_id.to_string(),
    }
}

struct Pipeline {
    lists: Arc<InMemoryListStore>,
    publications: Arc<InMemoryPublicationStore>,
    status: Arc<RecordingStatusPublisher>,
    publisher: Arc<ScriptedPublisher>,
    orchestrator: PublicationOrchestrator,
}

fn pipeline(lists: Arc<InMemoryListStore>, publisher: ScriptedPublisher) -> Pipeline {
    let publications = Arc::new(InMemoryPublicationStore::default());
    let status = Arc::new(RecordingStatusPublisher::default());
    let publisher = Arc::new(publisher);

    let orchestrator = PublicationOrchestrator::new(
        OrchestratorConfig::default(),
        Arc::clone(&lists) as Arc<dyn ListStore>,
        Arc::clone(&publications) as Arc<dyn PublicationStore>,
        Arc::new(InMemoryListLock::new()),
        Arc::new(StaticCredentials),
        Arc::new(
            PublisherRegistry::new().register(Arc::clone(&publisher) as Arc<dyn PlatformPublisher>),
        ),
        Arc::clone(&status) as Arc<dyn StatusPublisher>,
    );

    Pipeline {
        lists,
        publications,
        status,
        publisher,
        orchestrator,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_fired_trigger_publishes_next_item_end_to_end() {
    let the_list = list();
    let user_id = the_list.user_id;
    let list_id = the_list.id;

    let lists = Arc::new(InMemoryListStore::new(the_list));
    lists.with(|s| {
        s.specs.push(ScheduleSpec {
            id: Uuid::new_v4(),
            list_id,
            days_of_week_mask: ALL_DAYS_MASK,
            time_of_day: NaiveTime::from_hms_opt(12, 30, 0).unwrap(),
        });
        s.items.push(item(list_id, 0));
        s.accounts.push(account(user_id, "17841400000000000"));
    });

    let evaluator = TriggerEvaluator::new(chrono_tz::UTC, Arc::new(InMemoryWatermarkStore::new()));
    let dispatcher = InMemoryDispatcher::default();

    // A tick lands five seconds into the scheduled minute.
    let now = Utc.with_ymd_and_hms(2024, 6, 3, 12, 30, 5).unwrap();
    let specs = lists.find_enabled_specs().await.unwrap();
    let fired = evaluator.evaluate(now, &specs).await.unwrap();
    assert_eq!(fired.len(), 1);

    for spec in &fired {
        let event = PublishRequested {
            list_id: spec.list_id,
            requested_at: now,
        };
        let dedup_key = format!("{}:{}", spec.id, minute_bucket(now));
        dispatcher.dispatch(&event, &dedup_key).await.unwrap();
    }

    let p = pipeline(lists, ScriptedPublisher::succeeding());
    for event in dispatcher.drain() {
        p.orchestrator.on_publish_requested(&event).await.unwrap();
    }

    let records = p.publications.all();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, PublicationStatus::Published);
    assert!(records[0].public_url.is_some());
    assert_eq!(records[0].user_id, user_id);

    assert_eq!(
        p.status.statuses(),
        vec![
            PublicationStatus::Scheduled,
            PublicationStatus::Processing,
            PublicationStatus::Published
        ]
    );

    // Cursor advanced past the published item.
    assert_eq!(p.lists.with(|s| s.list.queue_position), 1);
}

#[tokio::test]
async fn test_duplicate_ticks_collapse_to_one_dispatch() {
    let spec = ScheduleSpec {
        id: Uuid::new_v4(),
        list_id: Uuid::new_v4(),
        days_of_week_mask: ALL_DAYS_MASK,
        time_of_day: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
    };

    let evaluator = TriggerEvaluator::new(chrono_tz::UTC, Arc::new(InMemoryWatermarkStore::new()));
    let dispatcher = InMemoryDispatcher::default();

    // Two ticks inside the same minute: the watermark absorbs the second.
    for second in [3, 47] {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, second).unwrap();
        for fired in evaluator
            .evaluate(now, std::slice::from_ref(&spec))
            .await
            .unwrap()
        {
            let event = PublishRequested {
                list_id: fired.list_id,
                requested_at: now,
            };
            let dedup_key = format!("{}:{}", fired.id, minute_bucket(now));
            dispatcher.dispatch(&event, &dedup_key).await.unwrap();
            // A dispatcher retry with the same key is also collapsed.
            dispatcher.dispatch(&event, &dedup_key).await.unwrap();
        }
    }

    assert_eq!(dispatcher.drain().len(), 1);
}

#[tokio::test]
async fn test_round_robin_cursor_wraps_past_queue_end() {
    let the_list = list();
    let user_id = the_list.user_id;
    let list_id = the_list.id;

    let lists = Arc::new(InMemoryListStore::new(the_list));
    lists.with(|s| {
        s.items.push(item(list_id, 0));
        s.items.push(item(list_id, 1));
        s.accounts.push(account(user_id, "17841400000000000"));
    });

    let p = pipeline(lists, ScriptedPublisher::succeeding());

    for _ in 0..3 {
        let event = PublishRequested {
            list_id,
            requested_at: Utc::now(),
        };
        p.orchestrator.on_publish_requested(&event).await.unwrap();
    }

    // Third publish wraps back to the first item.
    let urls = p.publisher.published_urls.lock().unwrap().clone();
    assert_eq!(
        urls,
        vec![
            "https://cdn.example.com/0.jpg",
            "https://cdn.example.com/1.jpg",
            "https://cdn.example.com/0.jpg"
        ]
    );
    assert_eq!(p.publications.all().len(), 3);
}

#[tokio::test]
async fn test_terminal_record_rejects_further_transitions() {
    let store = InMemoryPublicationStore::default();
    let record = PublicationRecord::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    store.create(&record).await.unwrap();

    assert!(store
        .transition(
            record.id,
            PublicationStatus::Scheduled,
            PublicationStatus::Processing,
            None,
            None,
        )
        .await
        .unwrap());
    assert!(store
        .transition(
            record.id,
            PublicationStatus::Processing,
            PublicationStatus::Published,
            Some("https://instagram.com/p/abc".to_string()),
            None,
        )
        .await
        .unwrap());

    // Any further transition attempt fails the guard, whatever it claims
    // the current status to be.
    for (from, to) in [
        (PublicationStatus::Published, PublicationStatus::Failed),
        (PublicationStatus::Processing, PublicationStatus::Failed),
        (PublicationStatus::Published, PublicationStatus::Processing),
    ] {
        assert!(!store
            .transition(record.id, from, to, None, Some("late".to_string()))
            .await
            .unwrap());
    }

    let stored = store.get(record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PublicationStatus::Published);
    assert_eq!(
        stored.public_url.as_deref(),
        Some("https://instagram.com/p/abc")
    );
    assert!(stored.error_message.is_none());
}

#[tokio::test]
async fn test_skipping_a_state_is_rejected() {
    let store = InMemoryPublicationStore::default();
    let record = PublicationRecord::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    store.create(&record).await.unwrap();

    // Scheduled -> Published skips Processing.
    assert!(!store
        .transition(
            record.id,
            PublicationStatus::Scheduled,
            PublicationStatus::Published,
            None,
            None,
        )
        .await
        .unwrap());

    let stored = store.get(record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PublicationStatus::Scheduled);
}

#[tokio::test]
async fn test_one_destination_failure_leaves_sibling_published() {
    let the_list = list();
    let user_id = the_list.user_id;
    let list_id = the_list.id;

    let lists = Arc::new(InMemoryListStore::new(the_list));
    lists.with(|s| {
        s.items.push(item(list_id, 0));
        s.accounts.push(account(user_id, "acct-ok"));
        s.accounts.push(account(user_id, "acct-bad"));
    });

    let p = pipeline(lists, ScriptedPublisher::failing_for("acct-bad"));

    let event = PublishRequested {
        list_id,
        requested_at: Utc::now(),
    };
    p.orchestrator.on_publish_requested(&event).await.unwrap();

    let records = p.publications.all();
    assert_eq!(records.len(), 2);

    let published: Vec<_> = records
        .iter()
        .filter(|r| r.status == PublicationStatus::Published)
        .collect();
    let failed: Vec<_> = records
        .iter()
        .filter(|r| r.status == PublicationStatus::Failed)
        .collect();
    assert_eq!(published.len(), 1);
    assert_eq!(failed.len(), 1);
    assert!(published[0].public_url.is_some());
    assert!(failed[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("Media rejected"));

    // Both records cover the same content item; the queue advanced once.
    assert_eq!(published[0].content_item_id, failed[0].content_item_id);
    assert_eq!(p.lists.with(|s| s.pop_count), 1);
}

#[tokio::test]
async fn test_processing_sibling_blocks_new_cycle() {
    let the_list = list();
    let user_id = the_list.user_id;
    let list_id = the_list.id;

    let lists = Arc::new(InMemoryListStore::new(the_list));
    lists.with(|s| {
        s.items.push(item(list_id, 0));
        s.accounts.push(account(user_id, "17841400000000000"));
    });

    let p = pipeline(Arc::clone(&lists), ScriptedPublisher::succeeding());

    // A record stuck in Processing from a previous cycle.
    let mut stuck = PublicationRecord::new(Uuid::new_v4(), Uuid::new_v4(), list_id, user_id);
    stuck.status = PublicationStatus::Processing;
    p.publications.create(&stuck).await.unwrap();

    let event = PublishRequested {
        list_id,
        requested_at: Utc::now(),
    };
    p.orchestrator.on_publish_requested(&event).await.unwrap();

    // No new record, no pop, no status traffic.
    assert_eq!(p.publications.all().len(), 1);
    assert_eq!(lists.with(|s| s.pop_count), 0);
    assert!(p.status.statuses().is_empty());
}

#[test]
fn test_status_event_wire_shape_is_stable() {
    let event = StatusChanged {
        publication_record_id: Uuid::nil(),
        user_id: Uuid::nil(),
        status: PublicationStatus::Failed,
        public_url: None,
        error_message: Some("Media rejected".to_string()),
    };

    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["publicationRecordId"], Uuid::nil().to_string());
    assert_eq!(json["status"], "Failed");
    assert_eq!(json["errorMessage"], "Media rejected");
    assert!(json.get("publicUrl").is_none());
}
