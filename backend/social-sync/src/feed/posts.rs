use super::FeedEngine;
use crate::context::SyncContext;
use crate::domain::{has_post_content, EntityId, MediaFile, Post};
use crate::error::{SyncError, SyncResult};
use crate::mutation::{execute, MutationKind, OptimisticMutation};
use crate::ports::{Filter, Row};
use crate::schema::PostColumns;
use crate::store::{FeedStore, RemovedPost};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

struct CreatePost {
    temp_id: EntityId,
    post: Post,
    row: Row,
    columns: PostColumns,
}

#[async_trait]
impl OptimisticMutation for CreatePost {
    type State = FeedStore;
    type Committed = Row;
    type Output = Post;

    fn kind(&self) -> MutationKind {
        MutationKind::CreatePost
    }

    fn entity_id(&self) -> Option<EntityId> {
        Some(self.post.id.clone())
    }

    fn apply(&mut self, feed: &mut FeedStore) {
        feed.upsert_post(self.post.clone());
    }

    async fn commit(&self, ctx: &SyncContext) -> SyncResult<Row> {
        Ok(ctx.store.insert(&ctx.tables().posts, self.row.clone()).await?)
    }

    fn confirm(&mut self, feed: &mut FeedStore, row: Row) -> Post {
        if self.columns.id.is_none() {
            self.columns = PostColumns::detect(Some(&row));
        }
        let mut confirmed = self.columns.map(&row);
        if confirmed.id.is_temporary() {
            // Keep the optimistic id; the next reload brings the real one.
            warn!(temp_id = %self.temp_id, "Created post came back without an id");
            confirmed.id = self.temp_id.clone();
        }
        confirmed.author_id = confirmed.author_id.or_else(|| self.post.author_id.clone());
        confirmed.created_at = confirmed.created_at.or(self.post.created_at);
        if confirmed.text.is_empty() && confirmed.media_url.is_none() {
            confirmed.text = self.post.text.clone();
            confirmed.media_url = self.post.media_url.clone();
        }
        confirmed.pending = false;

        feed.confirm_post(&self.temp_id, confirmed.clone());
        self.post = confirmed.clone();
        confirmed
    }

    fn rollback(&mut self, feed: &mut FeedStore) {
        feed.remove_post(&self.temp_id);
    }
}

struct DeletePost {
    post_id: EntityId,
    filter: Filter,
    removed: Option<RemovedPost>,
}

#[async_trait]
impl OptimisticMutation for DeletePost {
    type State = FeedStore;
    type Committed = ();
    type Output = ();

    fn kind(&self) -> MutationKind {
        MutationKind::DeletePost
    }

    fn entity_id(&self) -> Option<EntityId> {
        Some(self.post_id.clone())
    }

    fn apply(&mut self, feed: &mut FeedStore) {
        self.removed = feed.remove_post(&self.post_id);
    }

    async fn commit(&self, ctx: &SyncContext) -> SyncResult<()> {
        Ok(ctx.store.delete(&ctx.tables().posts, &self.filter).await?)
    }

    fn confirm(&mut self, _feed: &mut FeedStore, _: ()) {}

    fn rollback(&mut self, feed: &mut FeedStore) {
        if let Some(removed) = self.removed.take() {
            feed.restore_post(removed);
        }
    }
}

impl FeedEngine {
    /// Publish a post with text, media, or both
    ///
    /// Media is uploaded first; the post only becomes visible once the
    /// upload returned a URL.
    pub async fn create_post(&self, text: &str, media: Option<MediaFile>) -> SyncResult<Post> {
        let text = text.trim().to_string();
        if text.is_empty() && media.is_none() {
            return Err(SyncError::validation("Write something or attach a photo"));
        }

        let author = self.ctx.user_id().clone();
        let media_url = match media {
            Some(file) => {
                let path = format!("{}/{}-{}", author, Uuid::new_v4(), file.file_name);
                let url = self
                    .ctx
                    .media
                    .upload(&self.ctx.config.media.post_bucket, &path, file)
                    .await
                    .map_err(SyncError::Upload)?;
                Some(url)
            }
            None => None,
        };
        if !has_post_content(&text, media_url.as_deref()) {
            return Err(SyncError::validation("Write something or attach a photo"));
        }

        let columns = self.ctx.schema.posts().unwrap_or_default();
        let temp_id = EntityId::temporary();
        let post = Post {
            id: temp_id.clone(),
            author_id: Some(author.clone()),
            text: text.clone(),
            media_url: media_url.clone(),
            created_at: Some(Utc::now()),
            pending: true,
        };
        let mutation = CreatePost {
            row: columns.insert_row(&author, &text, media_url.as_deref()),
            temp_id,
            post,
            columns,
        };

        let post = execute(&self.ctx, &self.feed, mutation).await?;
        info!(post_id = %post.id, "Post created");
        Ok(post)
    }

    /// Delete one of the current user's posts
    ///
    /// On failure the post is put back with its counters and loaded thread.
    pub async fn delete_post(&self, post_id: &EntityId) -> SyncResult<()> {
        let post = self
            .feed
            .read()
            .post(post_id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("post {post_id}")))?;
        let me = self.ctx.user_id();
        if !post.is_authored_by(me) {
            return Err(SyncError::PermissionDenied(
                "Only the author can delete this post".to_string(),
            ));
        }
        if post.pending {
            return Err(SyncError::validation("This post is still being published"));
        }

        let columns = self.ctx.schema.posts().unwrap_or_default();
        let filter = Filter::new()
            .eq(columns.id_key(), post_id.to_value())
            .eq(columns.owner_key(), me.to_value());
        let mutation = DeletePost {
            post_id: post_id.clone(),
            filter,
            removed: None,
        };
        execute(&self.ctx, &self.feed, mutation).await?;
        info!(post_id = %post_id, "Post deleted");
        Ok(())
    }
}
