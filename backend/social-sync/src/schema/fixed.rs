//! Row shapes of the messaging tables
//!
//! Unlike posts and comments these tables have one known layout, so the
//! column names are constants.

use super::parse_timestamp;
use crate::domain::{
    ChatScope, EntityId, Message, Notification, NotificationKind, OutgoingNotification,
};
use crate::ports::Row;
use serde_json::{Map, Value};

pub const ID: &str = "id";
pub const CREATED_AT: &str = "created_at";

pub const SENDER_ID: &str = "sender_id";
pub const CONTENT: &str = "content";
pub const CONVERSATION_ID: &str = "conversation_id";
pub const IS_READ: &str = "is_read";
pub const USER_ID: &str = "user_id";

pub const RECIPIENT_ID: &str = "recipient_id";
pub const TITLE: &str = "title";
pub const BODY: &str = "body";
pub const METADATA: &str = "metadata";
pub const KIND: &str = "type";

/// Like tables: (target, user) pairs
pub const POST_ID: &str = "post_id";
pub const COMMENT_ID: &str = "comment_id";

fn text(row: &Row, column: &str) -> String {
    match row.get(column) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn id(row: &Row, column: &str) -> Option<EntityId> {
    row.get(column).and_then(EntityId::from_value)
}

fn flag(row: &Row, column: &str) -> Option<bool> {
    match row.get(column)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Chat message from a community or private message row; `None` for rows
/// without an id or, for private rows, without a conversation
pub fn message_from_row(row: &Row, community: bool) -> Option<Message> {
    let scope = if community {
        ChatScope::Community
    } else {
        ChatScope::Conversation(id(row, CONVERSATION_ID)?)
    };
    Some(Message {
        id: id(row, ID)?,
        sender_id: id(row, SENDER_ID),
        text: text(row, CONTENT),
        created_at: row.get(CREATED_AT).and_then(parse_timestamp),
        // community messages carry no read state
        is_read: community || flag(row, IS_READ).unwrap_or(false),
        pending: false,
        scope,
    })
}

pub fn message_row(scope: &ChatScope, sender: &EntityId, text: &str) -> Row {
    let mut row = Row::new();
    row.insert(SENDER_ID.into(), sender.to_value());
    row.insert(CONTENT.into(), Value::String(text.to_string()));
    if let ChatScope::Conversation(conversation_id) = scope {
        row.insert(CONVERSATION_ID.into(), conversation_id.to_value());
        row.insert(IS_READ.into(), Value::Bool(false));
    }
    row
}

pub fn notification_from_row(row: &Row) -> Option<Notification> {
    let metadata = match row.get(METADATA) {
        Some(Value::Object(map)) => map.clone(),
        // some deployments store metadata as serialized text
        Some(Value::String(raw)) => serde_json::from_str::<Map<String, Value>>(raw)
            .unwrap_or_default(),
        _ => Map::new(),
    };
    Some(Notification {
        id: id(row, ID)?,
        recipient_id: id(row, RECIPIENT_ID)?,
        title: text(row, TITLE),
        body: text(row, BODY),
        kind: NotificationKind::parse(&text(row, KIND)),
        is_read: flag(row, IS_READ).unwrap_or(false),
        created_at: row.get(CREATED_AT).and_then(parse_timestamp),
        metadata,
    })
}

pub fn notification_row(notification: &OutgoingNotification) -> Row {
    let mut row = Row::new();
    row.insert(RECIPIENT_ID.into(), notification.recipient_id.to_value());
    row.insert(TITLE.into(), Value::String(notification.title.clone()));
    row.insert(BODY.into(), Value::String(notification.body.clone()));
    row.insert(METADATA.into(), Value::Object(notification.metadata.clone()));
    row.insert(KIND.into(), Value::String(notification.kind.as_str().to_string()));
    row.insert(IS_READ.into(), Value::Bool(false));
    row
}

/// Row of a like table pairing `target_column = target` with the user
pub fn like_row(target_column: &str, target: &EntityId, user: &EntityId) -> Row {
    let mut row = Row::new();
    row.insert(target_column.to_string(), target.to_value());
    row.insert(USER_ID.into(), user.to_value());
    row
}

pub fn participant_row(conversation_id: &EntityId, user: &EntityId) -> Row {
    let mut row = Row::new();
    row.insert(CONVERSATION_ID.into(), conversation_id.to_value());
    row.insert(USER_ID.into(), user.to_value());
    row
}
