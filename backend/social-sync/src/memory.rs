//! In-process backend implementing every port
//!
//! Tables are vectors of JSON rows. Inserts get a numeric `id` and a strictly
//! increasing `created_at` when the row has none, unique keys reject
//! duplicates with `23505`, and every insert or delete fans out to matching
//! realtime subscribers. Failures can be injected one call at a time.

use crate::config::TableNames;
use crate::context::Ports;
use crate::domain::{CurrentUser, EntityId, MediaFile, OutgoingNotification, Profile};
use crate::ports::{
    AuthProvider, ChangeEvent, ChangeKind, Filter, MediaUploader, NotificationSender, Order,
    RealtimeChannel, RelationalStore, Row, StoreError, StoreResult, Subscription,
    SubscriptionHandle, SubscriptionSpec,
};
use crate::schema::fixed::{self, notification_row};
use async_trait::async_trait;
use chrono::{DateTime, Duration, DurationRound, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Store operation a failure can be injected into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailOp {
    Select,
    Insert,
    Update,
    Delete,
    Upsert,
}

struct Subscriber {
    specs: Vec<SubscriptionSpec>,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

/// Stored upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUpload {
    pub bucket: String,
    pub path: String,
    pub file: MediaFile,
}

#[derive(Default)]
struct State {
    tables: HashMap<String, Vec<Row>>,
    unique_keys: HashMap<String, Vec<String>>,
    dropped: HashSet<String>,
    failures: HashMap<(String, FailOp), String>,
    holds: HashMap<(String, FailOp), oneshot::Receiver<()>>,
    upload_failure: Option<String>,
    notification_failure: Option<String>,
    subscribers: HashMap<SubscriptionHandle, Subscriber>,
    sent: Vec<OutgoingNotification>,
    uploads: Vec<StoredUpload>,
    next_id: i64,
    last_created: Option<DateTime<Utc>>,
}

impl State {
    fn check(&mut self, table: &str, op: FailOp) -> StoreResult<()> {
        if let Some(message) = self.failures.remove(&(table.to_string(), op)) {
            return Err(StoreError::new(message));
        }
        if self.dropped.contains(table) {
            return Err(StoreError::with_code(
                format!("relation \"public.{table}\" does not exist"),
                "42P01",
            ));
        }
        Ok(())
    }

    /// Strictly increasing at the millisecond precision rows are written with
    fn next_created_at(&mut self) -> String {
        let now = Utc::now();
        let now = now.duration_trunc(Duration::milliseconds(1)).unwrap_or(now);
        let created = match self.last_created {
            Some(last) if last >= now => last + Duration::milliseconds(1),
            _ => now,
        };
        self.last_created = Some(created);
        created.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    fn stamp(&mut self, mut row: Row) -> Row {
        if !row.get(fixed::ID).is_some_and(|v| !v.is_null()) {
            self.next_id += 1;
            row.insert(fixed::ID.into(), Value::from(self.next_id));
        }
        if !row.get(fixed::CREATED_AT).is_some_and(|v| !v.is_null()) {
            let created = self.next_created_at();
            row.insert(fixed::CREATED_AT.into(), Value::String(created));
        }
        row
    }

    fn key_filter(columns: &[String], row: &Row) -> Filter {
        columns.iter().fold(Filter::new(), |filter, column| {
            filter.eq(column.clone(), row.get(column).cloned().unwrap_or(Value::Null))
        })
    }

    fn violates_unique(&self, table: &str, row: &Row) -> bool {
        let rows = self.tables.get(table);
        let mut keys = vec![vec![fixed::ID.to_string()]];
        if let Some(columns) = self.unique_keys.get(table) {
            keys.push(columns.clone());
        }
        keys.iter().any(|columns| {
            let filter = Self::key_filter(columns, row);
            rows.is_some_and(|rows| rows.iter().any(|existing| filter.matches(existing)))
        })
    }

    fn insert(&mut self, table: &str, row: Row) -> StoreResult<Row> {
        let row = self.stamp(row);
        if self.violates_unique(table, &row) {
            return Err(StoreError::with_code(
                format!("duplicate key value violates unique constraint \"{table}_key\""),
                "23505",
            ));
        }
        self.tables
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        self.fan_out(&ChangeEvent {
            table: table.to_string(),
            kind: ChangeKind::Insert,
            row: row.clone(),
        });
        Ok(row)
    }

    fn fan_out(&mut self, event: &ChangeEvent) {
        self.subscribers.retain(|handle, subscriber| {
            if !subscriber.specs.iter().any(|spec| spec.accepts(event)) {
                return true;
            }
            let delivered = subscriber.sender.send(event.clone()).is_ok();
            if !delivered {
                debug!(handle = %handle.0, "Dropping closed subscriber");
            }
            delivered
        });
    }
}

/// In-process implementation of every collaborator port
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    /// Empty backend with the unique keys of the default table names
    pub fn new() -> Arc<Self> {
        let tables = TableNames::default();
        let backend = Arc::new(Self::default());
        backend.set_unique_key(&tables.post_likes, &[fixed::POST_ID, fixed::USER_ID]);
        backend.set_unique_key(&tables.comment_likes, &[fixed::COMMENT_ID, fixed::USER_ID]);
        backend.set_unique_key(
            &tables.conversation_participants,
            &[fixed::CONVERSATION_ID, fixed::USER_ID],
        );
        backend
    }

    /// Ports acting as `user`; `None` means signed out
    pub fn ports(self: &Arc<Self>, user: Option<CurrentUser>) -> Ports {
        Ports {
            auth: Arc::new(MemoryAuth { user }),
            store: self.clone(),
            realtime: self.clone(),
            media: self.clone(),
            notifier: self.clone(),
        }
    }

    /// Create the profile row (once) and return the matching signed-in user
    pub fn register_user(&self, id: &str, name: &str) -> CurrentUser {
        let id = EntityId::from(id);
        let profiles = TableNames::default().profiles;
        let known = self
            .rows(&profiles)
            .iter()
            .any(|row| Filter::new().eq(fixed::ID, id.to_value()).matches(row));
        if !known {
            let mut row = Row::new();
            row.insert(fixed::ID.into(), id.to_value());
            row.insert("full_name".into(), Value::String(name.to_string()));
            self.seed(&profiles, vec![row]);
        }
        CurrentUser {
            profile: Some(Profile {
                display_name: Some(name.to_string()),
                ..Profile::new(id.clone())
            }),
            id,
        }
    }

    pub fn set_unique_key(&self, table: &str, columns: &[&str]) {
        self.state.lock().unique_keys.insert(
            table.to_string(),
            columns.iter().map(|c| c.to_string()).collect(),
        );
    }

    /// Insert rows without notifying subscribers
    pub fn seed(&self, table: &str, rows: Vec<Row>) -> Vec<Row> {
        let mut state = self.state.lock();
        state.dropped.remove(table);
        let stamped: Vec<Row> = rows.into_iter().map(|row| state.stamp(row)).collect();
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .extend(stamped.iter().cloned());
        stamped
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state
            .lock()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Make `table` behave as if it did not exist
    pub fn drop_table(&self, table: &str) {
        let mut state = self.state.lock();
        state.tables.remove(table);
        state.dropped.insert(table.to_string());
    }

    /// Fail the next `op` on `table` with `message`
    pub fn fail_next(&self, table: &str, op: FailOp, message: &str) {
        self.state
            .lock()
            .failures
            .insert((table.to_string(), op), message.to_string());
    }

    /// Park the next `op` on `table` until the returned sender fires or drops
    pub fn hold_next(&self, table: &str, op: FailOp) -> oneshot::Sender<()> {
        let (release, held) = oneshot::channel();
        self.state.lock().holds.insert((table.to_string(), op), held);
        release
    }

    async fn wait_if_held(&self, table: &str, op: FailOp) {
        let held = self.state.lock().holds.remove(&(table.to_string(), op));
        if let Some(held) = held {
            let _ = held.await;
        }
    }

    pub fn fail_next_upload(&self, message: &str) {
        self.state.lock().upload_failure = Some(message.to_string());
    }

    pub fn fail_next_notification(&self, message: &str) {
        self.state.lock().notification_failure = Some(message.to_string());
    }

    /// Deliver an event to matching subscribers without touching the tables
    pub fn push_event(&self, event: ChangeEvent) {
        self.state.lock().fan_out(&event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    pub fn sent_notifications(&self) -> Vec<OutgoingNotification> {
        self.state.lock().sent.clone()
    }

    pub fn uploads(&self) -> Vec<StoredUpload> {
        self.state.lock().uploads.clone()
    }
}

struct MemoryAuth {
    user: Option<CurrentUser>,
}

#[async_trait]
impl AuthProvider for MemoryAuth {
    async fn current_user(&self) -> StoreResult<Option<CurrentUser>> {
        Ok(self.user.clone())
    }
}

#[async_trait]
impl RelationalStore for MemoryBackend {
    async fn select(
        &self,
        table: &str,
        filter: &Filter,
        order: Option<&Order>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Row>> {
        self.wait_if_held(table, FailOp::Select).await;
        let mut state = self.state.lock();
        state.check(table, FailOp::Select)?;
        let mut rows: Vec<Row> = state
            .tables
            .get(table)
            .map(|rows| rows.iter().filter(|row| filter.matches(row)).cloned().collect())
            .unwrap_or_default();
        if let Some(order) = order {
            rows.sort_by(|a, b| order.compare(a, b));
        }
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn insert(&self, table: &str, row: Row) -> StoreResult<Row> {
        self.wait_if_held(table, FailOp::Insert).await;
        let mut state = self.state.lock();
        state.check(table, FailOp::Insert)?;
        state.insert(table, row)
    }

    async fn update(&self, table: &str, filter: &Filter, patch: Row) -> StoreResult<()> {
        self.wait_if_held(table, FailOp::Update).await;
        let mut state = self.state.lock();
        state.check(table, FailOp::Update)?;
        if let Some(rows) = state.tables.get_mut(table) {
            for row in rows.iter_mut().filter(|row| filter.matches(row)) {
                for (column, value) in &patch {
                    row.insert(column.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    async fn delete(&self, table: &str, filter: &Filter) -> StoreResult<()> {
        self.wait_if_held(table, FailOp::Delete).await;
        let mut state = self.state.lock();
        state.check(table, FailOp::Delete)?;
        let removed: Vec<Row> = match state.tables.get_mut(table) {
            Some(rows) => {
                let (removed, kept): (Vec<Row>, Vec<Row>) = std::mem::take(rows)
                    .into_iter()
                    .partition(|row| filter.matches(row));
                *rows = kept;
                removed
            }
            None => Vec::new(),
        };
        for row in removed {
            state.fan_out(&ChangeEvent {
                table: table.to_string(),
                kind: ChangeKind::Delete,
                row,
            });
        }
        Ok(())
    }

    async fn upsert(&self, table: &str, row: Row, conflict_key: &[&str]) -> StoreResult<Row> {
        self.wait_if_held(table, FailOp::Upsert).await;
        let mut state = self.state.lock();
        state.check(table, FailOp::Upsert)?;
        let columns: Vec<String> = conflict_key.iter().map(|c| c.to_string()).collect();
        let filter = State::key_filter(&columns, &row);
        if let Some(existing) = state
            .tables
            .get_mut(table)
            .and_then(|rows| rows.iter_mut().find(|r| filter.matches(r)))
        {
            for (column, value) in row {
                existing.insert(column, value);
            }
            return Ok(existing.clone());
        }
        state.insert(table, row)
    }
}

#[async_trait]
impl RealtimeChannel for MemoryBackend {
    async fn subscribe(&self, specs: Vec<SubscriptionSpec>) -> StoreResult<Subscription> {
        let (sender, events) = mpsc::unbounded_channel();
        let handle = SubscriptionHandle::new();
        self.state
            .lock()
            .subscribers
            .insert(handle, Subscriber { specs, sender });
        Ok(Subscription { handle, events })
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> StoreResult<()> {
        self.state.lock().subscribers.remove(&handle);
        Ok(())
    }
}

#[async_trait]
impl MediaUploader for MemoryBackend {
    async fn upload(&self, bucket: &str, path: &str, file: MediaFile) -> StoreResult<String> {
        let mut state = self.state.lock();
        if let Some(message) = state.upload_failure.take() {
            return Err(StoreError::new(message));
        }
        state.uploads.push(StoredUpload {
            bucket: bucket.to_string(),
            path: path.to_string(),
            file,
        });
        Ok(format!("memory://{bucket}/{path}"))
    }
}

#[async_trait]
impl NotificationSender for MemoryBackend {
    async fn send(&self, notification: OutgoingNotification) -> StoreResult<()> {
        let mut state = self.state.lock();
        if let Some(message) = state.notification_failure.take() {
            return Err(StoreError::new(message));
        }
        let table = TableNames::default().notifications;
        state.check(&table, FailOp::Insert)?;
        state.insert(&table, notification_row(&notification))?;
        state.sent.push(notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_insert_assigns_ids_and_increasing_timestamps() {
        let backend = MemoryBackend::new();
        let a = backend.insert("posts", row(json!({ "content": "a" }))).await.unwrap();
        let b = backend.insert("posts", row(json!({ "content": "b" }))).await.unwrap();

        assert_eq!(a.get("id"), Some(&json!(1)));
        assert_eq!(b.get("id"), Some(&json!(2)));
        assert_eq!(
            Order::asc("created_at").compare(&a, &b),
            std::cmp::Ordering::Less
        );
    }

    #[tokio::test]
    async fn test_rapid_inserts_never_share_a_timestamp() {
        let backend = MemoryBackend::new();
        let mut stamps = Vec::new();
        for i in 0..50 {
            let stored = backend
                .insert("messages", row(json!({ "content": format!("m{i}") })))
                .await
                .unwrap();
            stamps.push(stored["created_at"].as_str().unwrap().to_string());
        }

        let mut unique = stamps.clone();
        unique.dedup();
        assert_eq!(unique.len(), stamps.len());
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_unique_key_violation() {
        let backend = MemoryBackend::new();
        let like = row(json!({ "post_id": 1, "user_id": "u1" }));
        backend.insert("post_likes", like.clone()).await.unwrap();

        let err = backend.insert("post_likes", like).await.unwrap_err();
        assert!(err.is_unique_violation());
        assert_eq!(backend.rows("post_likes").len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_table_and_injected_failure() {
        let backend = MemoryBackend::new();
        backend.drop_table("comment_likes");
        let err = backend
            .select("comment_likes", &Filter::new(), None, Some(1))
            .await
            .unwrap_err();
        assert!(err.is_missing_relation());

        backend.fail_next("posts", FailOp::Insert, "boom");
        let err = backend.insert("posts", Row::new()).await.unwrap_err();
        assert_eq!(err.message, "boom");
        // one-shot
        assert!(backend.insert("posts", Row::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_fan_out_respects_filters() {
        let backend = MemoryBackend::new();
        let mut sub = backend
            .subscribe(vec![SubscriptionSpec::inserts(
                "comments",
                Filter::new().eq("post_id", 7),
            )])
            .await
            .unwrap();

        backend
            .insert("comments", row(json!({ "post_id": 8, "content": "x" })))
            .await
            .unwrap();
        backend
            .insert("comments", row(json!({ "post_id": "7", "content": "y" })))
            .await
            .unwrap();

        let event = sub.events.try_recv().unwrap();
        assert_eq!(event.row.get("content"), Some(&json!("y")));
        assert!(sub.events.try_recv().is_err());

        backend.unsubscribe(sub.handle).await.unwrap();
        assert_eq!(backend.subscriber_count(), 0);
    }
}
