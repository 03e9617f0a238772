use super::{Dedup, EventReducer, ReconcileOutcome};
use crate::context::SyncContext;
use crate::domain::{ChatScope, EntityId};
use crate::error::SyncResult;
use crate::ports::{ChangeEvent, ChangeKind};
use crate::schema::fixed::{self, message_from_row};
use crate::services::ProfileDirectory;
use crate::store::{MessageStore, Shared, Upsert};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Merges pushed messages of the community room or one conversation
pub struct MessageReducer {
    ctx: Arc<SyncContext>,
    messages: Shared<MessageStore>,
    profiles: ProfileDirectory,
    dedup: Dedup,
    scope: ChatScope,
}

impl MessageReducer {
    pub(crate) fn new(
        ctx: Arc<SyncContext>,
        messages: Shared<MessageStore>,
        profiles: ProfileDirectory,
        dedup: Dedup,
        scope: ChatScope,
    ) -> Self {
        Self {
            ctx,
            messages,
            profiles,
            dedup,
            scope,
        }
    }

    async fn inserted(&self, event: &ChangeEvent) -> SyncResult<ReconcileOutcome> {
        let community = self.scope == ChatScope::Community;
        let Some(message) = message_from_row(&event.row, community) else {
            return Ok(ReconcileOutcome::Ignored);
        };
        if message.scope != self.scope {
            return Ok(ReconcileOutcome::Ignored);
        }

        let key = Dedup::key(event, &message.id);
        if self.dedup.seen(&key)? {
            debug!(message_id = %message.id, "Skipping redelivered message");
            return Ok(ReconcileOutcome::Duplicate);
        }

        let me = self.ctx.user_id();
        let mine = message.sender_id.as_ref() == Some(me);
        if !mine {
            if let Some(sender) = &message.sender_id {
                self.profiles.ensure(sender).await;
            }
        }

        let outcome = {
            let mut messages = self.messages.write();
            let pending = if mine {
                messages.pending_message_for(&self.scope, me, &message.text)
            } else {
                None
            };
            if messages.contains_message(&self.scope, &message.id) {
                ReconcileOutcome::Duplicate
            } else if let Some(temp_id) = pending {
                let server_id = message.id.clone();
                messages.confirm_message(&temp_id, message);
                ReconcileOutcome::Confirmed { temp_id, server_id }
            } else {
                let id = message.id.clone();
                match messages.append(message) {
                    Upsert::Inserted => ReconcileOutcome::Appended(id),
                    Upsert::Replaced => ReconcileOutcome::Duplicate,
                    Upsert::Ignored => ReconcileOutcome::Ignored,
                }
            }
        };

        self.dedup.record(&key, &outcome)?;
        debug!(scope = ?self.scope, outcome = ?outcome, "Pushed message merged");
        Ok(outcome)
    }

    fn deleted(&self, event: &ChangeEvent) -> SyncResult<ReconcileOutcome> {
        let Some(id) = event.row.get(fixed::ID).and_then(EntityId::from_value) else {
            return Ok(ReconcileOutcome::Ignored);
        };
        let key = Dedup::key(event, &id);
        if self.dedup.seen(&key)? {
            return Ok(ReconcileOutcome::Duplicate);
        }
        let outcome = match self.messages.write().remove_message(&self.scope, &id) {
            Some(_) => ReconcileOutcome::Removed(id),
            None => ReconcileOutcome::Ignored,
        };
        self.dedup.record(&key, &outcome)?;
        Ok(outcome)
    }
}

#[async_trait]
impl EventReducer for MessageReducer {
    async fn reduce(&self, event: ChangeEvent) -> SyncResult<ReconcileOutcome> {
        match event.kind {
            ChangeKind::Insert => self.inserted(&event).await,
            ChangeKind::Delete => self.deleted(&event),
        }
    }
}
