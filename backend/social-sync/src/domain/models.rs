use super::id::EntityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Post entity - canonical shape regardless of the posts table's column names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: EntityId,
    pub author_id: Option<EntityId>,
    pub text: String,
    pub media_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    /// True while the post only exists optimistically
    #[serde(default)]
    pub pending: bool,
}

impl Post {
    pub fn is_authored_by(&self, user_id: &EntityId) -> bool {
        self.author_id.as_ref() == Some(user_id)
    }
}

/// A post needs text or media; whitespace-only text counts as empty
pub fn has_post_content(text: &str, media_url: Option<&str>) -> bool {
    !text.trim().is_empty() || media_url.is_some_and(|m| !m.trim().is_empty())
}

/// Like entity - a user liking a post (or a comment)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Like {
    pub target_id: EntityId,
    pub user_id: EntityId,
}

/// Comment entity - a comment or a one-level reply on a post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: EntityId,
    pub post_id: Option<EntityId>,
    pub author_id: Option<EntityId>,
    pub text: String,
    pub parent_id: Option<EntityId>,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pending: bool,
}

impl Comment {
    pub fn is_authored_by(&self, user_id: &EntityId) -> bool {
        self.author_id.as_ref() == Some(user_id)
    }
}

/// Denormalized profile projection used for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: EntityId,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub rank: Option<String>,
    pub country: Option<String>,
}

impl Profile {
    /// Profile with only its id known
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            display_name: None,
            avatar_url: None,
            rank: None,
            country: None,
        }
    }
}

/// Authenticated session user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: EntityId,
    pub profile: Option<Profile>,
}

/// Private 1:1 conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: EntityId,
    pub participants: [EntityId; 2],
}

impl Conversation {
    pub fn includes(&self, user_id: &EntityId) -> bool {
        self.participants.contains(user_id)
    }

    /// The participant that isn't `user_id`
    pub fn peer_of(&self, user_id: &EntityId) -> Option<&EntityId> {
        match &self.participants {
            [a, b] if a == user_id => Some(b),
            [a, b] if b == user_id => Some(a),
            _ => None,
        }
    }
}

/// Where a chat message lives
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatScope {
    /// Global broadcast room
    Community,
    /// Private conversation
    Conversation(EntityId),
}

/// Community or private chat message
///
/// Community messages have no read state and report `is_read = true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: EntityId,
    pub scope: ChatScope,
    pub sender_id: Option<EntityId>,
    pub text: String,
    pub created_at: Option<DateTime<Utc>>,
    pub is_read: bool,
    #[serde(default)]
    pub pending: bool,
}

/// Notification type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Alert,
    MessageRequest,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Alert => "alert",
            NotificationKind::MessageRequest => "message_request",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "message_request" => NotificationKind::MessageRequest,
            _ => NotificationKind::Alert,
        }
    }
}

/// System-to-user notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: EntityId,
    pub recipient_id: EntityId,
    pub title: String,
    pub body: String,
    pub metadata: Map<String, Value>,
    pub kind: NotificationKind,
    pub is_read: bool,
    pub created_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// Sender recorded in a message request's metadata
    pub fn sender_id(&self) -> Option<EntityId> {
        self.metadata.get("sender_id").and_then(EntityId::from_value)
    }
}

/// Notification handed to the notification sender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingNotification {
    pub recipient_id: EntityId,
    pub title: String,
    pub body: String,
    pub metadata: Map<String, Value>,
    pub kind: NotificationKind,
}

/// File handed to the media uploader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl MediaFile {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_profile_carries_only_its_id() {
        let profile = Profile::new(EntityId::from("u1"));
        assert_eq!(profile.id, EntityId::from("u1"));
        assert_eq!(profile.display_name, None);
        assert_eq!(profile.avatar_url, None);
    }
}
