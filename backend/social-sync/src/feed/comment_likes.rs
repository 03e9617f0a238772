use super::likes::{LikeTarget, ToggleLike};
use super::FeedEngine;
use crate::domain::EntityId;
use crate::error::{SyncError, SyncResult};
use crate::mutation::execute;
use crate::ports::{Filter, StoreError};
use crate::schema::fixed::COMMENT_ID;
use crate::store::{Capability, LikeState};
use tracing::{info, warn};

impl FeedEngine {
    /// Whether this deployment has a comment-likes table
    ///
    /// Checked once with a one-row read and cached; a missing table is a
    /// normal outcome. Any other failure leaves the capability unknown so
    /// the next call checks again.
    pub async fn comment_like_capability(&self) -> Capability {
        let known = self.feed.read().comment_like_capability();
        if known != Capability::Unknown {
            return known;
        }

        let lookup = self
            .ctx
            .store
            .select(&self.ctx.tables().comment_likes, &Filter::new(), None, Some(1))
            .await;
        let capability = match lookup {
            Ok(_) => Capability::Available,
            Err(e) if e.is_missing_relation() => {
                info!(table = %self.ctx.tables().comment_likes, "Comment likes unavailable");
                Capability::Unavailable
            }
            Err(e) => {
                warn!(error = %e, "Failed to check comment likes");
                return Capability::Unknown;
            }
        };
        self.feed.write().set_comment_like_capability(capability);
        capability
    }

    /// Load like aggregates for freshly loaded comments
    pub(super) async fn load_comment_likes(&self, comment_ids: &[EntityId]) {
        if self.comment_like_capability().await != Capability::Available {
            return;
        }
        let result = self
            .counters
            .batch_like_states(&self.ctx.tables().comment_likes, COMMENT_ID, comment_ids)
            .await;
        match result {
            Ok(states) => self.feed.write().set_comment_likes(states),
            Err(e) => self.degrade_comment_likes(&e),
        }
    }

    fn degrade_comment_likes(&self, error: &StoreError) {
        if error.is_missing_relation() {
            self.feed
                .write()
                .set_comment_like_capability(Capability::Unavailable);
        } else {
            warn!(error = %error, "Failed to load comment likes");
        }
    }

    /// Like or unlike a comment
    ///
    /// Fails with [`SyncError::Unavailable`] without writing anything when
    /// the deployment has no comment likes.
    pub async fn toggle_comment_like(&self, comment_id: &EntityId) -> SyncResult<LikeState> {
        if self.comment_like_capability().await != Capability::Available {
            return Err(SyncError::Unavailable("Comment likes"));
        }
        let pending = self
            .feed
            .read()
            .find_comment(comment_id)
            .map(|c| c.pending)
            .ok_or_else(|| SyncError::NotFound(format!("comment {comment_id}")))?;
        if pending {
            return Err(SyncError::validation("That comment is still being sent"));
        }

        let mutation = ToggleLike::new(LikeTarget::Comment(comment_id.clone()), None);
        let result = execute(&self.ctx, &self.feed, mutation).await;
        if let Err(SyncError::Remote(e)) = &result {
            if e.is_missing_relation() {
                self.degrade_comment_likes(e);
            }
        }
        result
    }
}
