use super::likes::LikeState;
use crate::domain::{Comment, EntityId, Post};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Whether an optional backing table exists in this deployment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Capability {
    /// Not checked yet
    #[default]
    Unknown,
    Available,
    Unavailable,
}

/// Load state of the feed window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FeedStatus {
    #[default]
    Idle,
    Loading,
    Ready,
    /// The last reload failed; the message replaces the feed in the view
    Failed(String),
}

/// Result of merging an entry by id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Replaced,
    /// The owning scope is not loaded, nothing changed
    Ignored,
}

/// Everything removed with a post, kept for reinsertion
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedPost {
    pub post: Post,
    likes: Option<LikeState>,
    comment_count: Option<u64>,
    thread: Option<Vec<Comment>>,
}

/// A removed comment, kept for reinsertion
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedComment {
    pub comment: Comment,
    likes: Option<LikeState>,
}

/// Client-side cache of the visible feed
///
/// Posts are kept newest-first and bounded to the window size; comment
/// threads are loaded per post and kept oldest-first. Everything is keyed by
/// [`EntityId`]; nothing outside this type relies on positions.
#[derive(Debug)]
pub struct FeedStore {
    window: usize,
    posts: Vec<Post>,
    post_likes: HashMap<EntityId, LikeState>,
    comment_counts: HashMap<EntityId, u64>,
    threads: HashMap<EntityId, Vec<Comment>>,
    thread_errors: HashMap<EntityId, String>,
    comment_likes: HashMap<EntityId, LikeState>,
    comment_like_capability: Capability,
    status: FeedStatus,
}

/// Sort key, compared descending: optimistic posts stay on top and
/// undated rows sink to the bottom
fn newest_first_key(post: &Post) -> (bool, Option<DateTime<Utc>>) {
    (post.pending, post.created_at)
}

impl FeedStore {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            posts: Vec::new(),
            post_likes: HashMap::new(),
            comment_counts: HashMap::new(),
            threads: HashMap::new(),
            thread_errors: HashMap::new(),
            comment_likes: HashMap::new(),
            comment_like_capability: Capability::Unknown,
            status: FeedStatus::Idle,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn status(&self) -> &FeedStatus {
        &self.status
    }

    pub fn set_status(&mut self, status: FeedStatus) {
        self.status = status;
    }

    // ========== Posts ==========

    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    pub fn post(&self, id: &EntityId) -> Option<&Post> {
        self.posts.iter().find(|p| &p.id == id)
    }

    pub fn contains_post(&self, id: &EntityId) -> bool {
        self.post(id).is_some()
    }

    /// Replace the window with a fresh load
    ///
    /// Optimistic posts still awaiting confirmation survive the reload;
    /// threads of posts that left the window are dropped.
    pub fn replace_feed(
        &mut self,
        posts: Vec<Post>,
        likes: HashMap<EntityId, LikeState>,
        comment_counts: HashMap<EntityId, u64>,
    ) {
        let pending: Vec<Post> = self.posts.drain(..).filter(|p| p.pending).collect();
        let pending_likes: Vec<(EntityId, LikeState)> = pending
            .iter()
            .filter_map(|p| self.post_likes.get(&p.id).map(|l| (p.id.clone(), *l)))
            .collect();

        self.posts = pending;
        self.post_likes = likes;
        self.post_likes.extend(pending_likes);
        self.comment_counts = comment_counts;

        for post in posts {
            if !self.contains_post(&post.id) {
                self.posts.push(post);
            }
        }
        self.posts
            .sort_by(|a, b| newest_first_key(b).cmp(&newest_first_key(a)));
        self.posts.truncate(self.window);

        let visible: std::collections::HashSet<EntityId> =
            self.posts.iter().map(|p| p.id.clone()).collect();
        self.threads.retain(|post_id, _| visible.contains(post_id));
        self.thread_errors.clear();
        self.post_likes.retain(|post_id, _| visible.contains(post_id));
        self.comment_counts.retain(|post_id, _| visible.contains(post_id));
        let live_comments: std::collections::HashSet<EntityId> = self
            .threads
            .values()
            .flatten()
            .map(|c| c.id.clone())
            .collect();
        self.comment_likes.retain(|id, _| live_comments.contains(id));
        self.status = FeedStatus::Ready;
    }

    /// Insert or replace a post by id
    pub fn upsert_post(&mut self, post: Post) -> Upsert {
        if let Some(existing) = self.posts.iter_mut().find(|p| p.id == post.id) {
            *existing = post;
            return Upsert::Replaced;
        }

        let key = newest_first_key(&post);
        let position = self
            .posts
            .iter()
            .position(|p| newest_first_key(p) < key)
            .unwrap_or(self.posts.len());
        self.post_likes.entry(post.id.clone()).or_default();
        self.posts.insert(position, post);
        self.enforce_window();
        Upsert::Inserted
    }

    fn enforce_window(&mut self) {
        while self.posts.len() > self.window {
            let Some(index) = self.posts.iter().rposition(|p| !p.pending) else {
                break;
            };
            let dropped = self.posts.remove(index);
            self.forget_post_aggregates(&dropped.id);
        }
    }

    fn forget_post_aggregates(&mut self, post_id: &EntityId) {
        self.post_likes.remove(post_id);
        self.comment_counts.remove(post_id);
        if let Some(thread) = self.threads.remove(post_id) {
            for comment in thread {
                self.comment_likes.remove(&comment.id);
            }
        }
    }

    /// Remove a post with its aggregates; the snapshot can be restored
    pub fn remove_post(&mut self, id: &EntityId) -> Option<RemovedPost> {
        let index = self.posts.iter().position(|p| &p.id == id)?;
        let post = self.posts.remove(index);
        let thread = self.threads.remove(id);
        if let Some(thread) = &thread {
            for comment in thread {
                self.comment_likes.remove(&comment.id);
            }
        }
        Some(RemovedPost {
            post,
            likes: self.post_likes.remove(id),
            comment_count: self.comment_counts.remove(id),
            thread,
        })
    }

    /// Put a removed post back where its timestamp places it
    pub fn restore_post(&mut self, removed: RemovedPost) {
        let id = removed.post.id.clone();
        self.upsert_post(removed.post);
        if !self.contains_post(&id) {
            return;
        }
        if let Some(likes) = removed.likes {
            self.post_likes.insert(id.clone(), likes);
        }
        if let Some(count) = removed.comment_count {
            self.comment_counts.insert(id.clone(), count);
        }
        if let Some(thread) = removed.thread {
            self.threads.insert(id, thread);
        }
    }

    /// Swap an optimistic post for its confirmed row
    ///
    /// If the confirmed id is already present (a push got there first) the
    /// optimistic entry is dropped instead, so no duplicate remains.
    pub fn confirm_post(&mut self, temp_id: &EntityId, confirmed: Post) {
        if confirmed.id != *temp_id && self.contains_post(&confirmed.id) {
            self.remove_post(temp_id);
            return;
        }
        let Some(entry) = self.posts.iter_mut().find(|p| &p.id == temp_id) else {
            self.upsert_post(confirmed);
            return;
        };
        let new_id = confirmed.id.clone();
        *entry = confirmed;
        if new_id != *temp_id {
            if let Some(likes) = self.post_likes.remove(temp_id) {
                self.post_likes.insert(new_id.clone(), likes);
            }
            if let Some(count) = self.comment_counts.remove(temp_id) {
                self.comment_counts.insert(new_id.clone(), count);
            }
            if let Some(thread) = self.threads.remove(temp_id) {
                self.threads.insert(new_id, thread);
            }
        }
    }

    // ========== Like Aggregates ==========

    pub fn like_state(&self, post_id: &EntityId) -> LikeState {
        self.post_likes.get(post_id).copied().unwrap_or_default()
    }

    pub fn like_state_mut(&mut self, post_id: &EntityId) -> &mut LikeState {
        self.post_likes.entry(post_id.clone()).or_default()
    }

    /// Adjust a post's like count; `liked` updates the viewer's membership
    pub fn adjust_like_count(&mut self, post_id: &EntityId, delta: i64, liked: Option<bool>) {
        self.like_state_mut(post_id).adjust(delta, liked);
    }

    // ========== Comment Aggregates ==========

    pub fn comment_count(&self, post_id: &EntityId) -> u64 {
        self.comment_counts.get(post_id).copied().unwrap_or(0)
    }

    /// Adjust a post's comment count, clamped at zero
    pub fn adjust_comment_count(&mut self, post_id: &EntityId, delta: i64) {
        let count = self.comment_counts.entry(post_id.clone()).or_insert(0);
        *count = if delta.is_negative() {
            count.saturating_sub(delta.unsigned_abs())
        } else {
            count.saturating_add(delta as u64)
        };
    }

    // ========== Comment Threads ==========

    pub fn is_thread_loaded(&self, post_id: &EntityId) -> bool {
        self.threads.contains_key(post_id)
    }

    pub fn thread(&self, post_id: &EntityId) -> Option<&[Comment]> {
        self.threads.get(post_id).map(Vec::as_slice)
    }

    /// Install a freshly loaded thread; the post's comment count becomes the
    /// number of loaded entries. Optimistic comments still pending are kept.
    pub fn set_thread(&mut self, post_id: &EntityId, mut comments: Vec<Comment>) {
        if let Some(previous) = self.threads.remove(post_id) {
            for comment in previous {
                if comment.pending {
                    comments.push(comment);
                } else {
                    self.comment_likes.remove(&comment.id);
                }
            }
        }
        self.comment_counts
            .insert(post_id.clone(), comments.len() as u64);
        self.thread_errors.remove(post_id);
        self.threads.insert(post_id.clone(), comments);
    }

    /// Record a failed thread load; the view shows the message in place of
    /// the comments
    pub fn set_thread_error(&mut self, post_id: &EntityId, message: impl Into<String>) {
        self.thread_errors.insert(post_id.clone(), message.into());
    }

    pub fn thread_error(&self, post_id: &EntityId) -> Option<&str> {
        self.thread_errors.get(post_id).map(String::as_str)
    }

    /// Drop a thread that is no longer displayed; the count stays
    pub fn close_thread(&mut self, post_id: &EntityId) {
        if let Some(thread) = self.threads.remove(post_id) {
            for comment in thread {
                self.comment_likes.remove(&comment.id);
            }
        }
    }

    pub fn find_comment(&self, id: &EntityId) -> Option<&Comment> {
        self.threads.values().flatten().find(|c| &c.id == id)
    }

    fn thread_of(&self, comment_id: &EntityId) -> Option<EntityId> {
        self.threads
            .iter()
            .find(|(_, thread)| thread.iter().any(|c| &c.id == comment_id))
            .map(|(post_id, _)| post_id.clone())
    }

    /// Append (or replace by id) a comment in its post's loaded thread;
    /// a new entry bumps the post's comment count.
    pub fn upsert_comment(&mut self, comment: Comment) -> Upsert {
        let Some(post_id) = comment.post_id.clone() else {
            return Upsert::Ignored;
        };
        let Some(thread) = self.threads.get_mut(&post_id) else {
            return Upsert::Ignored;
        };
        if let Some(existing) = thread.iter_mut().find(|c| c.id == comment.id) {
            *existing = comment;
            return Upsert::Replaced;
        }
        thread.push(comment);
        self.adjust_comment_count(&post_id, 1);
        Upsert::Inserted
    }

    /// Remove a comment from whichever thread holds it
    pub fn remove_comment(&mut self, id: &EntityId) -> Option<RemovedComment> {
        let post_id = self.thread_of(id)?;
        let thread = self.threads.get_mut(&post_id)?;
        let index = thread.iter().position(|c| &c.id == id)?;
        let comment = thread.remove(index);
        self.adjust_comment_count(&post_id, -1);
        Some(RemovedComment {
            comment,
            likes: self.comment_likes.remove(id),
        })
    }

    /// Put a removed comment back in timestamp order
    pub fn restore_comment(&mut self, removed: RemovedComment) {
        let Some(post_id) = removed.comment.post_id.clone() else {
            return;
        };
        let Some(thread) = self.threads.get_mut(&post_id) else {
            return;
        };
        if thread.iter().any(|c| c.id == removed.comment.id) {
            return;
        }
        let id = removed.comment.id.clone();
        let position = match removed.comment.created_at {
            Some(at) => thread
                .iter()
                .position(|c| c.created_at.is_some_and(|other| other > at))
                .unwrap_or(thread.len()),
            None => thread.len(),
        };
        thread.insert(position, removed.comment);
        self.adjust_comment_count(&post_id, 1);
        if let Some(likes) = removed.likes {
            self.comment_likes.insert(id, likes);
        }
    }

    /// Swap an optimistic comment for its confirmed row, in place
    pub fn confirm_comment(&mut self, temp_id: &EntityId, confirmed: Comment) {
        if confirmed.id != *temp_id && self.find_comment(&confirmed.id).is_some() {
            self.remove_comment(temp_id);
            return;
        }
        let Some(post_id) = self.thread_of(temp_id) else {
            self.upsert_comment(confirmed);
            return;
        };
        let new_id = confirmed.id.clone();
        if let Some(entry) = self
            .threads
            .get_mut(&post_id)
            .and_then(|t| t.iter_mut().find(|c| &c.id == temp_id))
        {
            *entry = confirmed;
        }
        if let Some(likes) = self.comment_likes.remove(temp_id) {
            self.comment_likes.insert(new_id, likes);
        }
    }

    /// Oldest pending comment by `author` in `post_id`'s thread, preferring
    /// one with the same text
    pub fn pending_comment_for(
        &self,
        post_id: &EntityId,
        author: &EntityId,
        text: &str,
    ) -> Option<EntityId> {
        let thread = self.threads.get(post_id)?;
        let mut candidates = thread
            .iter()
            .filter(|c| c.pending && c.id.is_temporary() && c.is_authored_by(author));
        let first = candidates.clone().next();
        candidates
            .find(|c| c.text == text)
            .or(first)
            .map(|c| c.id.clone())
    }

    // ========== Comment Likes ==========

    pub fn comment_like_capability(&self) -> Capability {
        self.comment_like_capability
    }

    pub fn set_comment_like_capability(&mut self, capability: Capability) {
        self.comment_like_capability = capability;
        if capability == Capability::Unavailable {
            self.comment_likes.clear();
        }
    }

    pub fn comment_like_state(&self, comment_id: &EntityId) -> LikeState {
        self.comment_likes
            .get(comment_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn comment_like_state_mut(&mut self, comment_id: &EntityId) -> &mut LikeState {
        self.comment_likes.entry(comment_id.clone()).or_default()
    }

    pub fn set_comment_likes(&mut self, likes: HashMap<EntityId, LikeState>) {
        self.comment_likes.extend(likes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn post(id: &str, minute: u32) -> Post {
        Post {
            id: EntityId::from(id),
            author_id: Some(EntityId::from("u1")),
            text: format!("post {id}"),
            media_url: None,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 12, minute, 0).single(),
            pending: false,
        }
    }

    fn comment(id: &str, post_id: &str, minute: u32) -> Comment {
        Comment {
            id: EntityId::from(id),
            post_id: Some(EntityId::from(post_id)),
            author_id: Some(EntityId::from("u2")),
            text: format!("comment {id}"),
            parent_id: None,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 13, minute, 0).single(),
            pending: false,
        }
    }

    #[test]
    fn window_is_bounded_newest_first() {
        let mut store = FeedStore::new(2);
        store.upsert_post(post("a", 1));
        store.upsert_post(post("c", 3));
        store.upsert_post(post("b", 2));

        let ids: Vec<&str> = store.posts().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[test]
    fn comment_count_tracks_rendered_entries() {
        let mut store = FeedStore::new(10);
        let p = EntityId::from("p");
        store.upsert_post(post("p", 1));
        store.set_thread(&p, vec![comment("1", "p", 1), comment("2", "p", 2)]);
        assert_eq!(store.comment_count(&p), 2);

        assert_eq!(store.upsert_comment(comment("3", "p", 3)), Upsert::Inserted);
        assert_eq!(store.upsert_comment(comment("3", "p", 3)), Upsert::Replaced);
        assert_eq!(store.comment_count(&p), 3);

        let removed = store.remove_comment(&EntityId::from("2")).unwrap();
        assert_eq!(store.comment_count(&p), 2);
        store.restore_comment(removed);

        let ids: Vec<&str> = store.thread(&p).unwrap().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(store.comment_count(&p) as usize, store.thread(&p).unwrap().len());
    }

    #[test]
    fn unloaded_thread_ignores_comments() {
        let mut store = FeedStore::new(10);
        store.upsert_post(post("p", 1));
        assert_eq!(store.upsert_comment(comment("1", "p", 1)), Upsert::Ignored);
        assert_eq!(store.comment_count(&EntityId::from("p")), 0);
    }

    #[test]
    fn confirm_post_rewrites_id_in_place() {
        let mut store = FeedStore::new(10);
        store.upsert_post(post("old", 1));
        let temp = EntityId::temporary();
        let mut optimistic = post("x", 2);
        optimistic.id = temp.clone();
        optimistic.pending = true;
        store.upsert_post(optimistic);
        store.adjust_like_count(&temp, 1, Some(true));

        store.confirm_post(&temp, post("42", 2));
        assert_eq!(store.posts().len(), 2);
        assert_eq!(store.posts()[0].id, EntityId::from("42"));
        assert_eq!(store.like_state(&EntityId::from("42")).count, 1);
        assert!(!store.contains_post(&temp));
    }

    #[test]
    fn restore_post_brings_back_aggregates() {
        let mut store = FeedStore::new(10);
        let p = EntityId::from("p");
        store.upsert_post(post("q", 5));
        store.upsert_post(post("p", 1));
        store.set_thread(&p, vec![comment("1", "p", 1)]);
        store.adjust_like_count(&p, 7, None);

        let removed = store.remove_post(&p).unwrap();
        assert!(!store.contains_post(&p));
        store.restore_post(removed);

        assert_eq!(store.posts()[1].id, p);
        assert_eq!(store.like_state(&p).count, 7);
        assert_eq!(store.comment_count(&p), 1);
    }

    #[test]
    fn comment_count_never_negative() {
        let mut store = FeedStore::new(10);
        let p = EntityId::from("p");
        store.adjust_comment_count(&p, -3);
        assert_eq!(store.comment_count(&p), 0);
    }
}
