//! Realtime reconciler
//!
//! Merges pushed row changes into the stores exactly once. Subscriptions are
//! scoped to what is on screen: opening a scope closes the previous scope of
//! the same family (one comment thread, one conversation at a time).
//!
//! A pushed insert is handled in this order:
//! 1. already processed (same `table:kind:id`) or already in the store:
//!    duplicate, skipped
//! 2. authored by the current user and a pending entry of the same scope
//!    exists: the pending entry takes the server id in place
//! 3. otherwise appended at the tail, after looking up the author's profile

mod comments;
mod messages;
mod notifications;

pub use comments::CommentReducer;
pub use messages::MessageReducer;
pub use notifications::NotificationReducer;

use crate::context::SyncContext;
use crate::domain::EntityId;
use crate::error::SyncResult;
use crate::guard::run_guarded;
use crate::ports::{ChangeEvent, Filter, SubscriptionHandle, SubscriptionSpec};
use crate::schema::fixed;
use crate::services::ProfileDirectory;
use crate::store::{FeedStore, MessageStore, Shared};
use async_trait::async_trait;
use idempotent_consumer::IdempotencyGuard;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// What one subscription follows
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    CommentThread(EntityId),
    Community,
    Conversation(EntityId),
    Notifications,
}

/// Scopes of one family replace each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeFamily {
    CommentThread,
    Community,
    Conversation,
    Notifications,
}

impl ScopeKey {
    pub fn family(&self) -> ScopeFamily {
        match self {
            ScopeKey::CommentThread(_) => ScopeFamily::CommentThread,
            ScopeKey::Community => ScopeFamily::Community,
            ScopeKey::Conversation(_) => ScopeFamily::Conversation,
            ScopeKey::Notifications => ScopeFamily::Notifications,
        }
    }
}

/// Effect of one pushed event on the stores
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// New entry at the tail
    Appended(EntityId),
    /// A pending entry took its server id
    Confirmed { temp_id: EntityId, server_id: EntityId },
    /// Already applied; nothing changed
    Duplicate,
    Removed(EntityId),
    /// Outside the scope, or not parseable
    Ignored,
}

/// Applies pushed events of one scope to the stores
#[async_trait]
pub trait EventReducer: Send + Sync {
    async fn reduce(&self, event: ChangeEvent) -> SyncResult<ReconcileOutcome>;
}

/// Processed-event bookkeeping shared by all reducers of a session
#[derive(Clone)]
pub(crate) struct Dedup {
    guard: IdempotencyGuard,
}

impl Dedup {
    pub(crate) fn key(event: &ChangeEvent, id: &EntityId) -> String {
        format!("{}:{}:{}", event.table, event.kind.as_str(), id)
    }

    pub(crate) fn seen(&self, key: &str) -> SyncResult<bool> {
        Ok(self.guard.is_processed(key)?)
    }

    pub(crate) fn record(&self, key: &str, outcome: &ReconcileOutcome) -> SyncResult<()> {
        if *outcome != ReconcileOutcome::Ignored {
            self.guard.mark_processed(key, None)?;
        }
        Ok(())
    }
}

/// One live, scoped subscription
///
/// Events are reduced in arrival order. The stream ends when the scope is
/// closed or replaced through the [`Reconciler`].
pub struct ScopedSubscription<R> {
    key: ScopeKey,
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    reducer: R,
}

impl<R> fmt::Debug for ScopedSubscription<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedSubscription")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl<R: EventReducer> ScopedSubscription<R> {
    pub fn key(&self) -> &ScopeKey {
        &self.key
    }

    async fn reduce(&self, event: ChangeEvent) -> SyncResult<ReconcileOutcome> {
        let table = event.table.clone();
        let result = run_guarded(self.reducer.reduce(event)).await;
        if let Err(e) = &result {
            warn!(scope = ?self.key, table = %table, error = %e, "Failed to apply pushed change");
        }
        result
    }

    /// Wait for the next event and apply it; `None` once the scope closed
    pub async fn next(&mut self) -> Option<SyncResult<ReconcileOutcome>> {
        let event = self.events.recv().await?;
        Some(self.reduce(event).await)
    }

    /// Apply every event already delivered, without waiting
    pub async fn drain(&mut self) -> Vec<SyncResult<ReconcileOutcome>> {
        let mut outcomes = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            outcomes.push(self.reduce(event).await);
        }
        outcomes
    }

    /// Apply events until the scope closes
    pub async fn run(mut self) {
        while let Some(outcome) = self.next().await {
            if let Ok(outcome) = outcome {
                debug!(scope = ?self.key, outcome = ?outcome, "Pushed change applied");
            }
        }
        debug!(scope = ?self.key, "Subscription ended");
    }
}

/// Opens scoped subscriptions and builds their reducers
pub struct Reconciler {
    ctx: Arc<SyncContext>,
    feed: Shared<FeedStore>,
    messages: Shared<MessageStore>,
    profiles: ProfileDirectory,
    dedup: Dedup,
    active: Mutex<HashMap<ScopeFamily, (ScopeKey, SubscriptionHandle)>>,
}

impl Reconciler {
    pub fn new(
        ctx: Arc<SyncContext>,
        feed: Shared<FeedStore>,
        messages: Shared<MessageStore>,
        profiles: ProfileDirectory,
    ) -> Self {
        let guard = IdempotencyGuard::new(
            ctx.config.realtime.dedup_capacity,
            ctx.config.realtime.dedup_retention,
        );
        Self {
            ctx,
            feed,
            messages,
            profiles,
            dedup: Dedup { guard },
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Scopes currently subscribed
    pub fn active_scopes(&self) -> Vec<ScopeKey> {
        self.active.lock().values().map(|(key, _)| key.clone()).collect()
    }

    async fn unsubscribe(&self, key: &ScopeKey, handle: SubscriptionHandle) -> SyncResult<()> {
        self.ctx.realtime.unsubscribe(handle).await?;
        info!(scope = ?key, "Realtime scope closed");
        Ok(())
    }

    async fn open<R: EventReducer>(
        &self,
        key: ScopeKey,
        specs: Vec<SubscriptionSpec>,
        reducer: R,
    ) -> SyncResult<ScopedSubscription<R>> {
        let previous = self.active.lock().remove(&key.family());
        if let Some((previous_key, handle)) = previous {
            if let Err(e) = self.unsubscribe(&previous_key, handle).await {
                warn!(scope = ?previous_key, error = %e, "Failed to close previous scope");
            }
        }
        if let Err(e) = self.dedup.guard.cleanup_old_events() {
            warn!(error = %e, "Failed to clean up processed events");
        }

        let subscription = self.ctx.realtime.subscribe(specs).await?;
        self.active
            .lock()
            .insert(key.family(), (key.clone(), subscription.handle));
        info!(scope = ?key, "Realtime scope opened");

        Ok(ScopedSubscription {
            key,
            events: subscription.events,
            reducer,
        })
    }

    /// Stop following `key` if it is the open scope of its family
    pub async fn close(&self, key: &ScopeKey) -> SyncResult<()> {
        let current = {
            let mut active = self.active.lock();
            let is_open = active
                .get(&key.family())
                .is_some_and(|(open, _)| open == key);
            if is_open {
                active.remove(&key.family())
            } else {
                None
            }
        };
        match current {
            Some((key, handle)) => self.unsubscribe(&key, handle).await,
            None => Ok(()),
        }
    }

    /// Close every scope (sign-out, teardown)
    pub async fn close_all(&self) {
        let open: Vec<(ScopeKey, SubscriptionHandle)> =
            self.active.lock().drain().map(|(_, entry)| entry).collect();
        for (key, handle) in open {
            if let Err(e) = self.unsubscribe(&key, handle).await {
                warn!(scope = ?key, error = %e, "Failed to close scope");
            }
        }
    }

    /// Follow new and deleted comments of one post
    pub async fn open_comment_thread(
        &self,
        post_id: &EntityId,
    ) -> SyncResult<ScopedSubscription<CommentReducer>> {
        let table = &self.ctx.tables().comments;
        let post_key = self
            .ctx
            .schema
            .comments()
            .map(|c| c.post_key().to_string())
            .unwrap_or_else(|| "post_id".to_string());
        let specs = vec![
            SubscriptionSpec::inserts(table.as_str(), Filter::new().eq(post_key, post_id.to_value())),
            // delete payloads usually carry only the key
            SubscriptionSpec::deletes(table.as_str(), Filter::new()),
        ];
        let reducer = CommentReducer::new(
            self.ctx.clone(),
            self.feed.clone(),
            self.profiles.clone(),
            self.dedup.clone(),
            post_id.clone(),
        );
        self.open(ScopeKey::CommentThread(post_id.clone()), specs, reducer)
            .await
    }

    /// Follow the community room
    pub async fn open_community(&self) -> SyncResult<ScopedSubscription<MessageReducer>> {
        let table = &self.ctx.tables().community_messages;
        let specs = vec![
            SubscriptionSpec::inserts(table.as_str(), Filter::new()),
            SubscriptionSpec::deletes(table.as_str(), Filter::new()),
        ];
        let reducer = MessageReducer::new(
            self.ctx.clone(),
            self.messages.clone(),
            self.profiles.clone(),
            self.dedup.clone(),
            crate::domain::ChatScope::Community,
        );
        self.open(ScopeKey::Community, specs, reducer).await
    }

    /// Follow one private conversation
    pub async fn open_conversation(
        &self,
        conversation_id: &EntityId,
    ) -> SyncResult<ScopedSubscription<MessageReducer>> {
        let table = &self.ctx.tables().private_messages;
        let specs = vec![
            SubscriptionSpec::inserts(
                table.as_str(),
                Filter::new().eq(fixed::CONVERSATION_ID, conversation_id.to_value()),
            ),
            SubscriptionSpec::deletes(table.as_str(), Filter::new()),
        ];
        let reducer = MessageReducer::new(
            self.ctx.clone(),
            self.messages.clone(),
            self.profiles.clone(),
            self.dedup.clone(),
            crate::domain::ChatScope::Conversation(conversation_id.clone()),
        );
        self.open(ScopeKey::Conversation(conversation_id.clone()), specs, reducer)
            .await
    }

    /// Follow notifications addressed to the current user
    pub async fn open_notifications(
        &self,
    ) -> SyncResult<ScopedSubscription<NotificationReducer>> {
        let specs = vec![SubscriptionSpec::inserts(
            self.ctx.tables().notifications.as_str(),
            Filter::new().eq(fixed::RECIPIENT_ID, self.ctx.user_id().to_value()),
        )];
        let reducer = NotificationReducer::new(
            self.ctx.clone(),
            self.messages.clone(),
            self.dedup.clone(),
        );
        self.open(ScopeKey::Notifications, specs, reducer).await
    }
}
