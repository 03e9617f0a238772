//! Schema adapter for externally-owned tables
//!
//! The posts, comments and profiles tables are owned by the hosted backend
//! and their column names drift between deployments (`content` vs `body` vs
//! `text`, ...). Column detection runs against one representative row and
//! produces a column map; mapping a row through it never fails: absent
//! columns become empty text, `None` media, unknown timestamps.
//!
//! Nothing outside this module looks at raw column names of these tables.

mod columns;
pub mod fixed;

pub use columns::{parse_timestamp, CommentColumns, PostColumns, ProfileColumns};

use crate::ports::Row;
use parking_lot::RwLock;

/// First candidate present as a key of `sample`
pub fn detect_column(sample: Option<&Row>, candidates: &[&str]) -> Option<String> {
    let sample = sample?;
    candidates
        .iter()
        .find(|candidate| sample.contains_key(**candidate))
        .map(|c| (*c).to_string())
}

/// Per-session cache of detected column maps
///
/// Full reloads re-detect and overwrite; realtime rows use the cached map
/// and fall back to detecting on the row itself.
#[derive(Debug, Default)]
pub struct SchemaCache {
    posts: RwLock<Option<PostColumns>>,
    comments: RwLock<Option<CommentColumns>>,
    profiles: RwLock<Option<ProfileColumns>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn posts(&self) -> Option<PostColumns> {
        self.posts.read().clone()
    }

    pub fn comments(&self) -> Option<CommentColumns> {
        self.comments.read().clone()
    }

    pub fn profiles(&self) -> Option<ProfileColumns> {
        self.profiles.read().clone()
    }

    /// Detect from `sample` and remember the result; an empty sample keeps
    /// whatever was detected before.
    pub fn detect_posts(&self, sample: Option<&Row>) -> PostColumns {
        if sample.is_none() {
            return self.posts().unwrap_or_default();
        }
        let columns = PostColumns::detect(sample);
        *self.posts.write() = Some(columns.clone());
        columns
    }

    pub fn detect_comments(&self, sample: Option<&Row>) -> CommentColumns {
        if sample.is_none() {
            return self.comments().unwrap_or_default();
        }
        let columns = CommentColumns::detect(sample);
        *self.comments.write() = Some(columns.clone());
        columns
    }

    pub fn detect_profiles(&self, sample: Option<&Row>) -> ProfileColumns {
        if sample.is_none() {
            return self.profiles().unwrap_or_default();
        }
        let columns = ProfileColumns::detect(sample);
        *self.profiles.write() = Some(columns.clone());
        columns
    }

    /// Column map for a pushed comment row
    pub fn comments_for(&self, row: &Row) -> CommentColumns {
        match self.comments() {
            Some(cached) if cached.fits(row) => cached,
            _ => CommentColumns::detect(Some(row)),
        }
    }

    /// Forget everything (sign-out, deployment switch)
    pub fn clear(&self) {
        *self.posts.write() = None;
        *self.comments.write() = None;
        *self.profiles.write() = None;
    }
}
