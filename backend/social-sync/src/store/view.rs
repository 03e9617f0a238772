//! Projections handed to the renderer
//!
//! Views are computed from the stores on demand and never cached; the
//! renderer holds nothing that can drift from the stores.

use super::feed::{Capability, FeedStore};
use super::likes::LikeState;
use super::messages::MessageStore;
use super::profiles::ProfileBook;
use crate::domain::{ChatScope, Comment, EntityId, Message, Post, Profile};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostView {
    pub post: Post,
    pub author: Option<Profile>,
    pub like_count: u64,
    pub liked_by_me: bool,
    pub comment_count: u64,
    pub can_delete: bool,
}

/// A top-level comment with its replies, or a reply (no nested replies)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentView {
    pub comment: Comment,
    pub author: Option<Profile>,
    /// `None` when comment likes are unavailable: no like affordance
    pub likes: Option<LikeState>,
    pub can_delete: bool,
    pub replies: Vec<CommentView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageView {
    pub message: Message,
    pub author: Option<Profile>,
    pub is_mine: bool,
}

fn author_of(profiles: &ProfileBook, author: Option<&EntityId>) -> Option<Profile> {
    author.and_then(|id| profiles.get(id)).cloned()
}

pub fn post_views(feed: &FeedStore, profiles: &ProfileBook, viewer: &EntityId) -> Vec<PostView> {
    feed.posts()
        .iter()
        .map(|post| {
            let likes = feed.like_state(&post.id);
            PostView {
                author: author_of(profiles, post.author_id.as_ref()),
                like_count: likes.count,
                liked_by_me: likes.liked,
                comment_count: feed.comment_count(&post.id),
                can_delete: post.is_authored_by(viewer) && !post.pending,
                post: post.clone(),
            }
        })
        .collect()
}

/// Thread of `post_id` as top-level comments with replies nested under
/// them; `None` until the thread is loaded.
///
/// A reply whose parent is not in the thread is shown at top level.
pub fn comment_views(
    feed: &FeedStore,
    profiles: &ProfileBook,
    viewer: &EntityId,
    post_id: &EntityId,
) -> Option<Vec<CommentView>> {
    let thread = feed.thread(post_id)?;
    let likes_available = feed.comment_like_capability() == Capability::Available;

    let single = |comment: &Comment| CommentView {
        author: author_of(profiles, comment.author_id.as_ref()),
        likes: likes_available.then(|| feed.comment_like_state(&comment.id)),
        can_delete: comment.is_authored_by(viewer) && !comment.pending,
        replies: Vec::new(),
        comment: comment.clone(),
    };

    let is_top_level = |comment: &Comment| match &comment.parent_id {
        Some(parent) => !thread.iter().any(|c| &c.id == parent),
        None => true,
    };

    let views = thread
        .iter()
        .filter(|c| is_top_level(*c))
        .map(|top| {
            let mut view = single(top);
            view.replies = thread
                .iter()
                .filter(|c| c.parent_id.as_ref() == Some(&top.id))
                .map(&single)
                .collect();
            view
        })
        .collect();
    Some(views)
}

pub fn message_views(
    messages: &MessageStore,
    profiles: &ProfileBook,
    viewer: &EntityId,
    scope: &ChatScope,
) -> Option<Vec<MessageView>> {
    let timeline = messages.timeline(scope)?;
    Some(
        timeline
            .iter()
            .map(|message| MessageView {
                author: author_of(profiles, message.sender_id.as_ref()),
                is_mine: message.sender_id.as_ref() == Some(viewer),
                message: message.clone(),
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(id: &str, parent: Option<&str>, author: &str) -> Comment {
        Comment {
            id: EntityId::from(id),
            post_id: Some(EntityId::from("p")),
            author_id: Some(EntityId::from(author)),
            text: id.to_string(),
            parent_id: parent.map(EntityId::from),
            created_at: None,
            pending: false,
        }
    }

    #[test]
    fn replies_nest_under_parent() {
        let p = EntityId::from("p");
        let mut feed = FeedStore::new(10);
        feed.set_thread(
            &p,
            vec![
                comment("1", None, "u1"),
                comment("2", Some("1"), "u2"),
                comment("3", Some("gone"), "u2"),
            ],
        );
        let views = comment_views(&feed, &ProfileBook::new(), &EntityId::from("u1"), &p).unwrap();

        assert_eq!(views.len(), 2);
        assert_eq!(views[0].replies.len(), 1);
        assert!(views[0].can_delete);
        assert!(!views[0].replies[0].can_delete);
        assert_eq!(views[1].comment.id, EntityId::from("3"));
    }

    #[test]
    fn like_affordance_follows_capability() {
        let p = EntityId::from("p");
        let viewer = EntityId::from("u1");
        let mut feed = FeedStore::new(10);
        feed.set_thread(&p, vec![comment("1", None, "u1")]);

        feed.set_comment_like_capability(Capability::Unavailable);
        let views = comment_views(&feed, &ProfileBook::new(), &viewer, &p).unwrap();
        assert_eq!(views[0].likes, None);

        feed.set_comment_like_capability(Capability::Available);
        let views = comment_views(&feed, &ProfileBook::new(), &viewer, &p).unwrap();
        assert_eq!(views[0].likes, Some(LikeState::default()));
    }

    #[test]
    fn unloaded_thread_has_no_view() {
        let feed = FeedStore::new(10);
        assert!(comment_views(&feed, &ProfileBook::new(), &EntityId::from("u1"), &EntityId::from("p")).is_none());
    }
}
