//! Feed engine: full loads and the post, comment and like mutations
//!
//! Reads degrade the affected view and return the error; writes go through
//! [`crate::mutation::execute`] so every action is applied optimistically
//! and rolled back on failure.

mod comment_likes;
mod comments;
mod likes;
mod posts;

use crate::context::SyncContext;
use crate::domain::{EntityId, Post};
use crate::error::SyncResult;
use crate::ports::{Filter, Order};
use crate::realtime::{CommentReducer, Reconciler, ScopedSubscription};
use crate::services::{CounterService, ProfileDirectory};
use crate::store::{view, CommentView, FeedStatus, FeedStore, PostView, Shared};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct FeedEngine {
    ctx: Arc<SyncContext>,
    feed: Shared<FeedStore>,
    profiles: ProfileDirectory,
    counters: CounterService,
    realtime: Arc<Reconciler>,
}

impl FeedEngine {
    pub fn new(
        ctx: Arc<SyncContext>,
        feed: Shared<FeedStore>,
        profiles: ProfileDirectory,
        realtime: Arc<Reconciler>,
    ) -> Self {
        Self {
            counters: CounterService::new(ctx.clone()),
            ctx,
            feed,
            profiles,
            realtime,
        }
    }

    pub fn store(&self) -> Shared<FeedStore> {
        self.feed.clone()
    }

    pub fn status(&self) -> FeedStatus {
        self.feed.read().status().clone()
    }

    // ========== Reads ==========

    /// Reload the feed window: posts, like and comment aggregates, authors
    ///
    /// A failed post read marks the feed [`FeedStatus::Failed`] and keeps the
    /// previous entries; failed aggregate reads only zero the counters.
    pub async fn load_feed(&self) -> SyncResult<()> {
        self.feed.write().set_status(FeedStatus::Loading);

        let tables = self.ctx.tables();
        let order_key = self
            .ctx
            .schema
            .posts()
            .map(|c| c.created_key().to_string())
            .unwrap_or_else(|| "created_at".to_string());
        let rows = match self
            .ctx
            .store
            .select(
                &tables.posts,
                &Filter::new(),
                Some(&Order::desc(order_key)),
                Some(self.ctx.config.feed.window_size),
            )
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Failed to load feed");
                self.feed
                    .write()
                    .set_status(FeedStatus::Failed(e.message.clone()));
                return Err(e.into());
            }
        };

        let columns = self.ctx.schema.detect_posts(rows.first());
        let posts: Vec<Post> = rows.iter().map(|row| columns.map(row)).collect();
        let ids: Vec<EntityId> = posts.iter().map(|p| p.id.clone()).collect();

        let likes = self
            .counters
            .batch_like_states(&tables.post_likes, crate::schema::fixed::POST_ID, &ids)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to load like counts");
                Default::default()
            });
        let comment_counts = self
            .counters
            .batch_comment_counts(&ids)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to load comment counts");
                Default::default()
            });

        let authors: Vec<EntityId> = posts.iter().filter_map(|p| p.author_id.clone()).collect();
        if let Err(e) = self.profiles.refresh(&authors).await {
            warn!(error = %e, "Failed to load author profiles");
        }

        let loaded = posts.len();
        self.feed.write().replace_feed(posts, likes, comment_counts);
        info!(posts = loaded, "Feed loaded");
        Ok(())
    }

    /// Load (or reload) the comment thread of a rendered post
    pub async fn load_comments(&self, post_id: &EntityId) -> SyncResult<()> {
        let order_key = self
            .ctx
            .schema
            .comments()
            .map(|c| c.created_key().to_string())
            .unwrap_or_else(|| "created_at".to_string());
        let post_key = self
            .ctx
            .schema
            .comments()
            .map(|c| c.post_key().to_string())
            .unwrap_or_else(|| "post_id".to_string());

        let rows = match self
            .ctx
            .store
            .select(
                &self.ctx.tables().comments,
                &Filter::new().eq(post_key, post_id.to_value()),
                Some(&Order::asc(order_key)),
                None,
            )
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(post_id = %post_id, error = %e, "Failed to load comments");
                self.feed.write().set_thread_error(post_id, e.message.clone());
                return Err(e.into());
            }
        };

        let columns = self.ctx.schema.detect_comments(rows.first());
        let comments: Vec<_> = rows
            .iter()
            .map(|row| {
                let mut comment = columns.map(row);
                comment.post_id.get_or_insert_with(|| post_id.clone());
                comment
            })
            .collect();
        let comment_ids: Vec<EntityId> = comments.iter().map(|c| c.id.clone()).collect();
        let authors: Vec<EntityId> = comments.iter().filter_map(|c| c.author_id.clone()).collect();

        debug!(post_id = %post_id, comments = comments.len(), "Comments loaded");
        self.feed.write().set_thread(post_id, comments);

        self.load_comment_likes(&comment_ids).await;
        self.profiles.fill_missing(&authors).await;
        Ok(())
    }

    /// Load the thread unless it is already displayed
    pub async fn ensure_thread_loaded(&self, post_id: &EntityId) -> SyncResult<()> {
        let loaded = self.feed.read().is_thread_loaded(post_id);
        if loaded {
            return Ok(());
        }
        self.load_comments(post_id).await
    }

    /// Load a thread and follow its new comments until another thread is
    /// opened
    pub async fn open_thread(
        &self,
        post_id: &EntityId,
    ) -> SyncResult<ScopedSubscription<CommentReducer>> {
        self.ensure_thread_loaded(post_id).await?;
        self.realtime.open_comment_thread(post_id).await
    }

    /// Stop following a thread and drop its comments from the cache
    pub async fn close_thread(&self, post_id: &EntityId) -> SyncResult<()> {
        self.realtime
            .close(&crate::realtime::ScopeKey::CommentThread(post_id.clone()))
            .await?;
        self.feed.write().close_thread(post_id);
        Ok(())
    }

    // ========== Views ==========

    pub fn post_views(&self) -> Vec<PostView> {
        let feed = self.feed.read();
        let book = self.profiles.book();
        let book = book.read();
        view::post_views(&feed, &book, self.ctx.user_id())
    }

    pub fn comment_views(&self, post_id: &EntityId) -> Option<Vec<CommentView>> {
        let feed = self.feed.read();
        let book = self.profiles.book();
        let book = book.read();
        view::comment_views(&feed, &book, self.ctx.user_id(), post_id)
    }

    pub fn thread_error(&self, post_id: &EntityId) -> Option<String> {
        self.feed.read().thread_error(post_id).map(str::to_string)
    }
}
