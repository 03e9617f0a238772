/// Configuration management for social-sync
///
/// Loads configuration from environment variables.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Feed and message window sizes
    pub feed: FeedConfig,
    /// Storage bucket names for uploads
    pub media: MediaConfig,
    /// Realtime reconciliation settings
    pub realtime: RealtimeConfig,
    /// Table names in the relational store
    pub tables: TableNames,
}

/// Window sizes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    /// Most recent posts kept in the feed window
    #[serde(default = "default_feed_window")]
    pub window_size: usize,
    /// Community messages loaded on open
    #[serde(default = "default_community_history")]
    pub community_history: usize,
    /// Private messages loaded when a conversation opens
    #[serde(default = "default_conversation_history")]
    pub conversation_history: usize,
    /// Notifications loaded per refresh
    #[serde(default = "default_notification_limit")]
    pub notification_limit: usize,
}

/// Upload buckets
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaConfig {
    pub post_bucket: String,
    pub avatar_bucket: String,
}

/// Realtime settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RealtimeConfig {
    /// Processed event ids remembered for de-duplication
    pub dedup_capacity: usize,
    /// How long a processed event id is remembered
    pub dedup_retention: Duration,
    /// Buffer of the mutation lifecycle broadcast channel
    pub lifecycle_capacity: usize,
}

/// Names of the externally-owned tables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableNames {
    pub posts: String,
    pub post_likes: String,
    pub comments: String,
    pub comment_likes: String,
    pub profiles: String,
    pub conversations: String,
    pub conversation_participants: String,
    pub private_messages: String,
    pub community_messages: String,
    pub notifications: String,
}

// Default values
fn default_feed_window() -> usize {
    50
}

fn default_community_history() -> usize {
    100
}

fn default_conversation_history() -> usize {
    200
}

fn default_notification_limit() -> usize {
    50
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            window_size: default_feed_window(),
            community_history: default_community_history(),
            conversation_history: default_conversation_history(),
            notification_limit: default_notification_limit(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            post_bucket: "post-media".to_string(),
            avatar_bucket: "avatars".to_string(),
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            dedup_capacity: 10_000,
            dedup_retention: Duration::from_secs(3600),
            lifecycle_capacity: 256,
        }
    }
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            posts: "posts".to_string(),
            post_likes: "post_likes".to_string(),
            comments: "comments".to_string(),
            comment_likes: "comment_likes".to_string(),
            profiles: "profiles".to_string(),
            conversations: "conversations".to_string(),
            conversation_participants: "conversation_participants".to_string(),
            private_messages: "private_messages".to_string(),
            community_messages: "community_messages".to_string(),
            notifications: "notifications".to_string(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            media: MediaConfig::default(),
            realtime: RealtimeConfig::default(),
            tables: TableNames::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        Err(_) => Ok(None),
    }
}

fn env_string(key: &str, default: String) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(default)
}

impl SyncConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = SyncConfig::default();

        let window_size: usize =
            env_parse("FEED_WINDOW_SIZE")?.unwrap_or(defaults.feed.window_size);
        if window_size == 0 {
            anyhow::bail!("FEED_WINDOW_SIZE must be greater than zero");
        }

        let feed = FeedConfig {
            window_size,
            community_history: env_parse("COMMUNITY_HISTORY_LIMIT")?
                .unwrap_or(defaults.feed.community_history),
            conversation_history: env_parse("CONVERSATION_HISTORY_LIMIT")?
                .unwrap_or(defaults.feed.conversation_history),
            notification_limit: env_parse("NOTIFICATION_LIMIT")?
                .unwrap_or(defaults.feed.notification_limit),
        };

        let media = MediaConfig {
            post_bucket: env_string("POST_MEDIA_BUCKET", defaults.media.post_bucket),
            avatar_bucket: env_string("AVATAR_BUCKET", defaults.media.avatar_bucket),
        };

        let realtime = RealtimeConfig {
            dedup_capacity: env_parse("REALTIME_DEDUP_CAPACITY")?
                .unwrap_or(defaults.realtime.dedup_capacity),
            dedup_retention: env_parse::<u64>("REALTIME_DEDUP_RETENTION_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.realtime.dedup_retention),
            lifecycle_capacity: env_parse("LIFECYCLE_CHANNEL_CAPACITY")?
                .unwrap_or(defaults.realtime.lifecycle_capacity)
                .max(1),
        };

        let t = defaults.tables;
        let tables = TableNames {
            posts: env_string("SYNC_TABLE_POSTS", t.posts),
            post_likes: env_string("SYNC_TABLE_POST_LIKES", t.post_likes),
            comments: env_string("SYNC_TABLE_COMMENTS", t.comments),
            comment_likes: env_string("SYNC_TABLE_COMMENT_LIKES", t.comment_likes),
            profiles: env_string("SYNC_TABLE_PROFILES", t.profiles),
            conversations: env_string("SYNC_TABLE_CONVERSATIONS", t.conversations),
            conversation_participants: env_string(
                "SYNC_TABLE_CONVERSATION_PARTICIPANTS",
                t.conversation_participants,
            ),
            private_messages: env_string("SYNC_TABLE_PRIVATE_MESSAGES", t.private_messages),
            community_messages: env_string(
                "SYNC_TABLE_COMMUNITY_MESSAGES",
                t.community_messages,
            ),
            notifications: env_string("SYNC_TABLE_NOTIFICATIONS", t.notifications),
        };

        Ok(SyncConfig {
            feed,
            media,
            realtime,
            tables,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test body: the process environment is shared between test threads.
    #[test]
    fn test_env_values() {
        std::env::remove_var("FEED_WINDOW_SIZE");
        std::env::set_var("SYNC_TABLE_COMMENT_LIKES", "post_comment_likes");

        let config = SyncConfig::from_env().unwrap();

        assert_eq!(config.feed.window_size, 50);
        assert_eq!(config.feed.community_history, 100);
        assert_eq!(config.media.post_bucket, "post-media");
        assert_eq!(config.tables.posts, "posts");
        assert_eq!(config.tables.comment_likes, "post_comment_likes");
        assert_eq!(config.realtime.dedup_retention, Duration::from_secs(3600));
        std::env::remove_var("SYNC_TABLE_COMMENT_LIKES");

        std::env::set_var("REALTIME_DEDUP_CAPACITY", "lots");
        let err = SyncConfig::from_env().unwrap_err();
        std::env::remove_var("REALTIME_DEDUP_CAPACITY");
        assert!(format!("{err:#}").contains("REALTIME_DEDUP_CAPACITY"));

        std::env::set_var("FEED_WINDOW_SIZE", "0");
        assert!(SyncConfig::from_env().is_err());
        std::env::remove_var("FEED_WINDOW_SIZE");
    }
}
