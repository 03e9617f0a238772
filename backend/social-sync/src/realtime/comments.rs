use super::{Dedup, EventReducer, ReconcileOutcome};
use crate::context::SyncContext;
use crate::domain::EntityId;
use crate::error::SyncResult;
use crate::ports::{ChangeEvent, ChangeKind};
use crate::services::ProfileDirectory;
use crate::store::{FeedStore, Shared, Upsert};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Merges pushed comment changes of one post's thread
pub struct CommentReducer {
    ctx: Arc<SyncContext>,
    feed: Shared<FeedStore>,
    profiles: ProfileDirectory,
    dedup: Dedup,
    post_id: EntityId,
}

impl CommentReducer {
    pub(crate) fn new(
        ctx: Arc<SyncContext>,
        feed: Shared<FeedStore>,
        profiles: ProfileDirectory,
        dedup: Dedup,
        post_id: EntityId,
    ) -> Self {
        Self {
            ctx,
            feed,
            profiles,
            dedup,
            post_id,
        }
    }

    async fn inserted(&self, event: &ChangeEvent) -> SyncResult<ReconcileOutcome> {
        let columns = self.ctx.schema.comments_for(&event.row);
        let comment = columns.map(&event.row);
        if comment.id.is_temporary() || comment.post_id.as_ref() != Some(&self.post_id) {
            return Ok(ReconcileOutcome::Ignored);
        }

        let key = Dedup::key(event, &comment.id);
        if self.dedup.seen(&key)? {
            debug!(comment_id = %comment.id, "Skipping redelivered comment");
            return Ok(ReconcileOutcome::Duplicate);
        }

        let me = self.ctx.user_id();
        let mine = comment.is_authored_by(me);
        if !mine {
            if let Some(author) = &comment.author_id {
                self.profiles.ensure(author).await;
            }
        }

        let outcome = {
            let mut feed = self.feed.write();
            let pending = if mine {
                feed.pending_comment_for(&self.post_id, me, &comment.text)
            } else {
                None
            };
            if feed.find_comment(&comment.id).is_some() {
                ReconcileOutcome::Duplicate
            } else if let Some(temp_id) = pending {
                let server_id = comment.id.clone();
                feed.confirm_comment(&temp_id, comment);
                ReconcileOutcome::Confirmed { temp_id, server_id }
            } else {
                let id = comment.id.clone();
                match feed.upsert_comment(comment) {
                    Upsert::Inserted => ReconcileOutcome::Appended(id),
                    Upsert::Replaced => ReconcileOutcome::Duplicate,
                    Upsert::Ignored => ReconcileOutcome::Ignored,
                }
            }
        };

        self.dedup.record(&key, &outcome)?;
        debug!(post_id = %self.post_id, outcome = ?outcome, "Pushed comment merged");
        Ok(outcome)
    }

    fn deleted(&self, event: &ChangeEvent) -> SyncResult<ReconcileOutcome> {
        let columns = self.ctx.schema.comments_for(&event.row);
        let Some(id) = event
            .row
            .get(columns.id_key())
            .and_then(EntityId::from_value)
        else {
            return Ok(ReconcileOutcome::Ignored);
        };

        let key = Dedup::key(event, &id);
        if self.dedup.seen(&key)? {
            return Ok(ReconcileOutcome::Duplicate);
        }

        let outcome = {
            let mut feed = self.feed.write();
            let in_thread = feed
                .find_comment(&id)
                .is_some_and(|c| c.post_id.as_ref() == Some(&self.post_id));
            if in_thread && feed.remove_comment(&id).is_some() {
                ReconcileOutcome::Removed(id)
            } else {
                ReconcileOutcome::Ignored
            }
        };
        self.dedup.record(&key, &outcome)?;
        Ok(outcome)
    }
}

#[async_trait]
impl EventReducer for CommentReducer {
    async fn reduce(&self, event: ChangeEvent) -> SyncResult<ReconcileOutcome> {
        match event.kind {
            ChangeKind::Insert => self.inserted(&event).await,
            ChangeKind::Delete => self.deleted(&event),
        }
    }
}
