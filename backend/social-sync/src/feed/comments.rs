use super::FeedEngine;
use crate::context::SyncContext;
use crate::domain::{Comment, EntityId, NotificationKind, OutgoingNotification};
use crate::error::{SyncError, SyncResult};
use crate::mutation::{execute, MutationKind, OptimisticMutation};
use crate::ports::{Filter, Row};
use crate::schema::CommentColumns;
use crate::store::{FeedStore, RemovedComment};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map};
use tracing::{info, warn};

const SNIPPET_CHARS: usize = 80;

struct SendComment {
    temp_id: EntityId,
    comment: Comment,
    row: Row,
    columns: CommentColumns,
    post_owner: Option<EntityId>,
}

#[async_trait]
impl OptimisticMutation for SendComment {
    type State = FeedStore;
    type Committed = Row;
    type Output = Comment;

    fn kind(&self) -> MutationKind {
        MutationKind::SendComment
    }

    fn entity_id(&self) -> Option<EntityId> {
        Some(self.comment.id.clone())
    }

    fn apply(&mut self, feed: &mut FeedStore) {
        feed.upsert_comment(self.comment.clone());
    }

    async fn commit(&self, ctx: &SyncContext) -> SyncResult<Row> {
        Ok(ctx.store.insert(&ctx.tables().comments, self.row.clone()).await?)
    }

    fn confirm(&mut self, feed: &mut FeedStore, row: Row) -> Comment {
        if !self.columns.fits(&row) {
            self.columns = CommentColumns::detect(Some(&row));
        }
        let mut confirmed = self.columns.map(&row);
        if confirmed.id.is_temporary() {
            warn!(temp_id = %self.temp_id, "Created comment came back without an id");
            confirmed.id = self.temp_id.clone();
        }
        confirmed.post_id = confirmed.post_id.or_else(|| self.comment.post_id.clone());
        confirmed.author_id = confirmed.author_id.or_else(|| self.comment.author_id.clone());
        confirmed.parent_id = confirmed.parent_id.or_else(|| self.comment.parent_id.clone());
        confirmed.created_at = confirmed.created_at.or(self.comment.created_at);
        if confirmed.text.is_empty() {
            confirmed.text = self.comment.text.clone();
        }
        confirmed.pending = false;

        feed.confirm_comment(&self.temp_id, confirmed.clone());
        self.comment = confirmed.clone();
        confirmed
    }

    fn rollback(&mut self, feed: &mut FeedStore) {
        feed.remove_comment(&self.temp_id);
    }

    async fn after_confirm(&self, ctx: &SyncContext, comment: &Comment) {
        let Some(owner) = self.post_owner.as_ref().filter(|o| *o != ctx.user_id()) else {
            return;
        };
        let snippet: String = comment.text.chars().take(SNIPPET_CHARS).collect();
        let mut metadata = Map::new();
        metadata.insert("sender_id".into(), ctx.user_id().to_value());
        metadata.insert("comment_id".into(), comment.id.to_value());
        if let Some(post_id) = &comment.post_id {
            metadata.insert("post_id".into(), post_id.to_value());
        }
        metadata.insert("action".into(), json!("comment"));
        ctx.notify(OutgoingNotification {
            recipient_id: owner.clone(),
            title: "New comment".to_string(),
            body: format!("{} commented: {}", ctx.display_name(), snippet),
            metadata,
            kind: NotificationKind::Alert,
        })
        .await;
    }
}

struct DeleteComment {
    comment_id: EntityId,
    filter: Filter,
    removed: Option<RemovedComment>,
}

#[async_trait]
impl OptimisticMutation for DeleteComment {
    type State = FeedStore;
    type Committed = ();
    type Output = ();

    fn kind(&self) -> MutationKind {
        MutationKind::DeleteComment
    }

    fn entity_id(&self) -> Option<EntityId> {
        Some(self.comment_id.clone())
    }

    fn apply(&mut self, feed: &mut FeedStore) {
        self.removed = feed.remove_comment(&self.comment_id);
    }

    async fn commit(&self, ctx: &SyncContext) -> SyncResult<()> {
        Ok(ctx.store.delete(&ctx.tables().comments, &self.filter).await?)
    }

    fn confirm(&mut self, _feed: &mut FeedStore, _: ()) {}

    fn rollback(&mut self, feed: &mut FeedStore) {
        if let Some(removed) = self.removed.take() {
            feed.restore_comment(removed);
        }
    }
}

impl FeedEngine {
    /// Comment on a rendered post, or reply to one of its comments
    ///
    /// The thread is loaded first so the count stays equal to the rendered
    /// entries. A reply must target a comment of the same post; replying to
    /// a reply attaches to that reply's parent, keeping threads one level
    /// deep.
    pub async fn send_comment(
        &self,
        post_id: &EntityId,
        text: &str,
        parent_id: Option<&EntityId>,
    ) -> SyncResult<Comment> {
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(SyncError::validation("Write a comment first"));
        }
        let post_owner = {
            let feed = self.feed.read();
            let post = feed
                .post(post_id)
                .ok_or_else(|| SyncError::NotFound(format!("post {post_id}")))?;
            if post.pending {
                return Err(SyncError::validation("This post is still being published"));
            }
            post.author_id.clone()
        };

        self.ensure_thread_loaded(post_id).await?;
        let parent_id = match parent_id {
            Some(parent) => Some(self.resolve_parent(post_id, parent)?),
            None => None,
        };

        let author = self.ctx.user_id().clone();
        let columns = self.ctx.schema.comments().unwrap_or_default();
        let temp_id = EntityId::temporary();
        let comment = Comment {
            id: temp_id.clone(),
            post_id: Some(post_id.clone()),
            author_id: Some(author.clone()),
            text: text.clone(),
            parent_id: parent_id.clone(),
            created_at: Some(Utc::now()),
            pending: true,
        };
        let mutation = SendComment {
            row: columns.insert_row(post_id, &author, &text, parent_id.as_ref()),
            temp_id,
            comment,
            columns,
            post_owner,
        };

        let comment = execute(&self.ctx, &self.feed, mutation).await?;
        info!(post_id = %post_id, comment_id = %comment.id, "Comment created");
        Ok(comment)
    }

    /// Parent a reply should attach to
    fn resolve_parent(&self, post_id: &EntityId, parent_id: &EntityId) -> SyncResult<EntityId> {
        let feed = self.feed.read();
        let parent = feed
            .thread(post_id)
            .and_then(|thread| thread.iter().find(|c| &c.id == parent_id))
            .ok_or_else(|| {
                SyncError::validation("You can only reply to a comment on the same post")
            })?;
        if parent.pending {
            return Err(SyncError::validation("That comment is still being sent"));
        }
        Ok(parent.parent_id.clone().unwrap_or_else(|| parent.id.clone()))
    }

    /// Delete one of the current user's comments
    pub async fn delete_comment(&self, comment_id: &EntityId) -> SyncResult<()> {
        let comment = self
            .feed
            .read()
            .find_comment(comment_id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("comment {comment_id}")))?;
        let me = self.ctx.user_id();
        if !comment.is_authored_by(me) {
            return Err(SyncError::PermissionDenied(
                "Only the author can delete this comment".to_string(),
            ));
        }
        if comment.pending {
            return Err(SyncError::validation("That comment is still being sent"));
        }

        let columns = self.ctx.schema.comments().unwrap_or_default();
        let filter = Filter::new()
            .eq(columns.id_key(), comment_id.to_value())
            .eq(columns.owner_key(), me.to_value());
        let mutation = DeleteComment {
            comment_id: comment_id.clone(),
            filter,
            removed: None,
        };
        execute(&self.ctx, &self.feed, mutation).await?;
        info!(comment_id = %comment_id, "Comment deleted");
        Ok(())
    }
}
