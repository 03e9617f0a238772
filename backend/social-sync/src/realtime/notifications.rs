use super::{Dedup, EventReducer, ReconcileOutcome};
use crate::context::SyncContext;
use crate::error::SyncResult;
use crate::ports::{ChangeEvent, ChangeKind};
use crate::schema::fixed::notification_from_row;
use crate::store::{MessageStore, Shared, Upsert};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Puts notifications addressed to the current user on top of the list
pub struct NotificationReducer {
    ctx: Arc<SyncContext>,
    messages: Shared<MessageStore>,
    dedup: Dedup,
}

impl NotificationReducer {
    pub(crate) fn new(ctx: Arc<SyncContext>, messages: Shared<MessageStore>, dedup: Dedup) -> Self {
        Self {
            ctx,
            messages,
            dedup,
        }
    }
}

#[async_trait]
impl EventReducer for NotificationReducer {
    async fn reduce(&self, event: ChangeEvent) -> SyncResult<ReconcileOutcome> {
        if event.kind != ChangeKind::Insert {
            return Ok(ReconcileOutcome::Ignored);
        }
        let Some(notification) = notification_from_row(&event.row) else {
            return Ok(ReconcileOutcome::Ignored);
        };
        if &notification.recipient_id != self.ctx.user_id() {
            return Ok(ReconcileOutcome::Ignored);
        }

        let key = Dedup::key(&event, &notification.id);
        if self.dedup.seen(&key)? {
            return Ok(ReconcileOutcome::Duplicate);
        }

        let id = notification.id.clone();
        let kind = notification.kind;
        let upsert = self.messages.write().upsert_notification(notification);
        let outcome = match upsert {
            Upsert::Inserted => ReconcileOutcome::Appended(id),
            Upsert::Replaced | Upsert::Ignored => ReconcileOutcome::Duplicate,
        };
        self.dedup.record(&key, &outcome)?;
        debug!(kind = kind.as_str(), outcome = ?outcome, "Pushed notification merged");
        Ok(outcome)
    }
}
