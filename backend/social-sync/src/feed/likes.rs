use super::FeedEngine;
use crate::context::SyncContext;
use crate::domain::{EntityId, NotificationKind, OutgoingNotification};
use crate::error::{SyncError, SyncResult};
use crate::mutation::{execute, MutationKind, OptimisticMutation};
use crate::ports::Filter;
use crate::schema::fixed::{like_row, COMMENT_ID, POST_ID, USER_ID};
use crate::store::{FeedStore, LikeState};
use async_trait::async_trait;
use serde_json::{json, Map};
use tracing::debug;

/// What a like row points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum LikeTarget {
    Post(EntityId),
    Comment(EntityId),
}

impl LikeTarget {
    fn id(&self) -> &EntityId {
        match self {
            LikeTarget::Post(id) | LikeTarget::Comment(id) => id,
        }
    }

    fn column(&self) -> &'static str {
        match self {
            LikeTarget::Post(_) => POST_ID,
            LikeTarget::Comment(_) => COMMENT_ID,
        }
    }

    fn table<'a>(&self, ctx: &'a SyncContext) -> &'a str {
        match self {
            LikeTarget::Post(_) => &ctx.tables().post_likes,
            LikeTarget::Comment(_) => &ctx.tables().comment_likes,
        }
    }

    fn state<'s>(&self, feed: &'s mut FeedStore) -> &'s mut LikeState {
        match self {
            LikeTarget::Post(id) => feed.like_state_mut(id),
            LikeTarget::Comment(id) => feed.comment_like_state_mut(id),
        }
    }
}

/// Like or unlike; the direction is decided from the displayed state when
/// the toggle is applied
pub(super) struct ToggleLike {
    pub(super) target: LikeTarget,
    /// Post owner notified on a confirmed like
    pub(super) owner: Option<EntityId>,
    liked: bool,
}

impl ToggleLike {
    pub(super) fn new(target: LikeTarget, owner: Option<EntityId>) -> Self {
        Self {
            target,
            owner,
            liked: false,
        }
    }
}

#[async_trait]
impl OptimisticMutation for ToggleLike {
    type State = FeedStore;
    type Committed = ();
    type Output = LikeState;

    fn kind(&self) -> MutationKind {
        match self.target {
            LikeTarget::Post(_) => MutationKind::TogglePostLike,
            LikeTarget::Comment(_) => MutationKind::ToggleCommentLike,
        }
    }

    fn entity_id(&self) -> Option<EntityId> {
        Some(self.target.id().clone())
    }

    fn apply(&mut self, feed: &mut FeedStore) {
        self.liked = self.target.state(feed).begin_toggle();
    }

    async fn commit(&self, ctx: &SyncContext) -> SyncResult<()> {
        let table = self.target.table(ctx);
        let me = ctx.user_id();
        if self.liked {
            match ctx
                .store
                .insert(table, like_row(self.target.column(), self.target.id(), me))
                .await
            {
                Ok(_) => Ok(()),
                // Already liked remotely: the pair is unique, nothing to add.
                Err(e) if e.is_unique_violation() => {
                    debug!(target_id = %self.target.id(), "Like already recorded");
                    Ok(())
                }
                Err(e) => Err(SyncError::from(e)),
            }
        } else {
            let filter = Filter::new()
                .eq(self.target.column(), self.target.id().to_value())
                .eq(USER_ID, me.to_value());
            Ok(ctx.store.delete(table, &filter).await?)
        }
    }

    fn confirm(&mut self, feed: &mut FeedStore, _: ()) -> LikeState {
        let state = self.target.state(feed);
        state.settle(Some(self.liked));
        *state
    }

    fn rollback(&mut self, feed: &mut FeedStore) {
        self.target.state(feed).settle(None);
    }

    async fn after_confirm(&self, ctx: &SyncContext, _state: &LikeState) {
        if !self.liked {
            return;
        }
        let Some(owner) = self.owner.as_ref().filter(|o| *o != ctx.user_id()) else {
            return;
        };
        let mut metadata = Map::new();
        metadata.insert("sender_id".into(), ctx.user_id().to_value());
        metadata.insert("target_id".into(), self.target.id().to_value());
        metadata.insert("action".into(), json!("like"));
        ctx.notify(OutgoingNotification {
            recipient_id: owner.clone(),
            title: "New like".to_string(),
            body: format!("{} liked your post", ctx.display_name()),
            metadata,
            kind: NotificationKind::Alert,
        })
        .await;
    }
}

impl FeedEngine {
    /// Like the post if the viewer does not like it yet, otherwise unlike
    ///
    /// Returns the settled state. Overlapping toggles on one post settle to
    /// the membership the server last confirmed.
    pub async fn toggle_like(&self, post_id: &EntityId) -> SyncResult<LikeState> {
        let owner = {
            let feed = self.feed.read();
            let post = feed
                .post(post_id)
                .ok_or_else(|| SyncError::NotFound(format!("post {post_id}")))?;
            if post.pending {
                return Err(SyncError::validation("This post is still being published"));
            }
            post.author_id.clone()
        };

        let mutation = ToggleLike::new(LikeTarget::Post(post_id.clone()), owner);
        execute(&self.ctx, &self.feed, mutation).await
    }

    pub fn like_state(&self, post_id: &EntityId) -> LikeState {
        self.feed.read().like_state(post_id)
    }
}
