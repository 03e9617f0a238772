//! Interfaces to the managed backend the engine runs against
//!
//! Every collaborator is an async trait object so the engine can be driven by
//! a hosted backend in production and by [`crate::memory::MemoryBackend`] in
//! tests.

mod filter;

pub use filter::{Condition, Filter, Order, Row};

use crate::domain::{CurrentUser, MediaFile, OutgoingNotification};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Postgres `undefined_table`
const UNDEFINED_TABLE: &str = "42P01";
/// PostgREST "relation not in schema cache"
const SCHEMA_CACHE_MISS: &str = "PGRST205";
/// Postgres `unique_violation`
const UNIQUE_VIOLATION: &str = "23505";
/// Postgres `insufficient_privilege`
const INSUFFICIENT_PRIVILEGE: &str = "42501";

/// Failure reported by a remote collaborator
///
/// `message` is the remote layer's own text and is shown to users verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StoreError {
    pub message: String,
    pub code: Option<String>,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code.into()),
        }
    }

    /// The table (or view) the request targeted does not exist
    pub fn is_missing_relation(&self) -> bool {
        matches!(
            self.code.as_deref(),
            Some(UNDEFINED_TABLE) | Some(SCHEMA_CACHE_MISS)
        ) || (self.message.contains("relation") && self.message.contains("does not exist"))
    }

    pub fn is_unique_violation(&self) -> bool {
        self.code.as_deref() == Some(UNIQUE_VIOLATION)
            || self.message.contains("duplicate key value")
    }

    /// Row-level policy or grant rejection
    pub fn is_permission_denied(&self) -> bool {
        self.code.as_deref() == Some(INSUFFICIENT_PRIVILEGE)
            || self.message.contains("row-level security")
            || self.message.contains("permission denied")
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Session lookup; `None` means nobody is signed in
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn current_user(&self) -> StoreResult<Option<CurrentUser>>;
}

/// Request/response access to the authoritative relational store
#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn select(
        &self,
        table: &str,
        filter: &Filter,
        order: Option<&Order>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Row>>;

    /// Insert one row and return it as stored (server-assigned id included)
    async fn insert(&self, table: &str, row: Row) -> StoreResult<Row>;

    async fn update(&self, table: &str, filter: &Filter, patch: Row) -> StoreResult<()>;

    async fn delete(&self, table: &str, filter: &Filter) -> StoreResult<()>;

    /// Insert or merge on the given conflict columns
    async fn upsert(&self, table: &str, row: Row, conflict_key: &[&str]) -> StoreResult<Row>;
}

/// Row change kinds carried by the realtime channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Insert,
    Delete,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Delete => "delete",
        }
    }
}

/// One pushed row change
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    pub row: Row,
}

/// What to listen to
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionSpec {
    pub table: String,
    pub kind: ChangeKind,
    pub filter: Filter,
}

impl SubscriptionSpec {
    pub fn inserts(table: impl Into<String>, filter: Filter) -> Self {
        Self {
            table: table.into(),
            kind: ChangeKind::Insert,
            filter,
        }
    }

    pub fn deletes(table: impl Into<String>, filter: Filter) -> Self {
        Self {
            table: table.into(),
            kind: ChangeKind::Delete,
            filter,
        }
    }

    pub fn accepts(&self, event: &ChangeEvent) -> bool {
        event.table == self.table && event.kind == self.kind && self.filter.matches(&event.row)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub Uuid);

impl SubscriptionHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Live subscription: events arrive on `events` in channel order until the
/// handle is unsubscribed (the sender side is then dropped).
#[derive(Debug)]
pub struct Subscription {
    pub handle: SubscriptionHandle,
    pub events: mpsc::UnboundedReceiver<ChangeEvent>,
}

/// Server-push change stream
///
/// Delivery is at-least-once and ordered per subscription; events missed
/// across reconnects are not replayed.
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    async fn subscribe(&self, specs: Vec<SubscriptionSpec>) -> StoreResult<Subscription>;

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> StoreResult<()>;
}

/// File storage; returns the public URL of the stored object
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaUploader: Send + Sync {
    async fn upload(&self, bucket: &str, path: &str, file: MediaFile) -> StoreResult<String>;
}

/// Fire-and-forget notification delivery
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, notification: OutgoingNotification) -> StoreResult<()>;
}
