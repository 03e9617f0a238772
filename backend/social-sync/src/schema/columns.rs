use super::detect_column;
use crate::domain::{Comment, EntityId, Post, Profile};
use crate::ports::Row;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

const ID: &[&str] = &["id", "post_id", "uuid"];
const COMMENT_ID: &[&str] = &["id", "comment_id", "uuid"];
const OWNER: &[&str] = &["user_id", "author_id", "owner_id", "created_by", "profile_id"];
const TEXT: &[&str] = &["content", "body", "text", "caption", "message"];
const MEDIA: &[&str] = &["image_url", "media_url", "photo_url", "image", "media"];
const CREATED: &[&str] = &["created_at", "inserted_at", "timestamp", "created"];
const COMMENT_POST: &[&str] = &["post_id", "post", "parent_post_id"];
const COMMENT_PARENT: &[&str] = &["parent_id", "parent_comment_id", "reply_to"];

const PROFILE_ID: &[&str] = &["id", "user_id", "profile_id"];
const DISPLAY_NAME: &[&str] = &["full_name", "display_name", "username", "name"];
const AVATAR: &[&str] = &["avatar_url", "avatar", "photo_url"];
const RANK: &[&str] = &["rank", "position", "role"];
const COUNTRY: &[&str] = &["country", "nationality", "flag"];

fn cell<'a>(row: &'a Row, column: &Option<String>) -> Option<&'a Value> {
    column.as_ref().and_then(|c| row.get(c))
}

fn cell_id(row: &Row, column: &Option<String>) -> Option<EntityId> {
    cell(row, column).and_then(EntityId::from_value)
}

fn cell_text(row: &Row, column: &Option<String>) -> Option<String> {
    match cell(row, column)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn cell_non_empty(row: &Row, column: &Option<String>) -> Option<String> {
    cell_text(row, column).filter(|s| !s.trim().is_empty())
}

/// Parse the timestamp shapes seen in the wild: RFC 3339, naive
/// `YYYY-MM-DD HH:MM:SS[.f]` (assumed UTC), and epoch seconds/millis.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
                        .ok()
                        .map(|naive| Utc.from_utc_datetime(&naive))
                })
        }
        Value::Number(n) => {
            let raw = n.as_i64()?;
            // Anything past year 5138 in seconds is really milliseconds.
            if raw.abs() > 100_000_000_000 {
                Utc.timestamp_millis_opt(raw).single()
            } else {
                Utc.timestamp_opt(raw, 0).single()
            }
        }
        _ => None,
    }
}

fn cell_time(row: &Row, column: &Option<String>) -> Option<DateTime<Utc>> {
    cell(row, column).and_then(parse_timestamp)
}

fn write_key<'a>(detected: &'a Option<String>, canonical: &'a str) -> &'a str {
    detected.as_deref().unwrap_or(canonical)
}

/// Column map for the posts table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostColumns {
    pub id: Option<String>,
    pub owner: Option<String>,
    pub text: Option<String>,
    pub media: Option<String>,
    pub created_at: Option<String>,
}

impl PostColumns {
    pub fn detect(sample: Option<&Row>) -> Self {
        Self {
            id: detect_column(sample, ID),
            owner: detect_column(sample, OWNER),
            text: detect_column(sample, TEXT),
            media: detect_column(sample, MEDIA),
            created_at: detect_column(sample, CREATED),
        }
    }

    /// Map a row; a row without a usable id gets a temporary one so it can
    /// still be displayed.
    pub fn map(&self, row: &Row) -> Post {
        Post {
            id: cell_id(row, &self.id).unwrap_or_else(EntityId::temporary),
            author_id: cell_id(row, &self.owner),
            text: cell_text(row, &self.text).unwrap_or_default(),
            media_url: cell_non_empty(row, &self.media),
            created_at: cell_time(row, &self.created_at),
            pending: false,
        }
    }

    pub fn id_key(&self) -> &str {
        write_key(&self.id, "id")
    }

    pub fn owner_key(&self) -> &str {
        write_key(&self.owner, "user_id")
    }

    pub fn created_key(&self) -> &str {
        write_key(&self.created_at, "created_at")
    }

    /// Row for inserting a new post
    pub fn insert_row(&self, author: &EntityId, text: &str, media_url: Option<&str>) -> Row {
        let mut row = Row::new();
        row.insert(self.owner_key().to_string(), author.to_value());
        row.insert(
            write_key(&self.text, "content").to_string(),
            Value::String(text.to_string()),
        );
        if let Some(url) = media_url {
            row.insert(
                write_key(&self.media, "image_url").to_string(),
                Value::String(url.to_string()),
            );
        }
        row
    }
}

/// Column map for the comments table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentColumns {
    pub id: Option<String>,
    pub post: Option<String>,
    pub owner: Option<String>,
    pub text: Option<String>,
    pub parent: Option<String>,
    pub created_at: Option<String>,
}

impl CommentColumns {
    pub fn detect(sample: Option<&Row>) -> Self {
        Self {
            id: detect_column(sample, COMMENT_ID),
            post: detect_column(sample, COMMENT_POST),
            owner: detect_column(sample, OWNER),
            text: detect_column(sample, TEXT),
            parent: detect_column(sample, COMMENT_PARENT),
            created_at: detect_column(sample, CREATED),
        }
    }

    /// Whether every detected key used for identity and text exists in `row`
    pub fn fits(&self, row: &Row) -> bool {
        [&self.id, &self.post, &self.owner, &self.text]
            .into_iter()
            .all(|column| column.as_ref().is_some_and(|c| row.contains_key(c)))
    }

    pub fn map(&self, row: &Row) -> Comment {
        Comment {
            id: cell_id(row, &self.id).unwrap_or_else(EntityId::temporary),
            post_id: cell_id(row, &self.post),
            author_id: cell_id(row, &self.owner),
            text: cell_text(row, &self.text).unwrap_or_default(),
            parent_id: cell_id(row, &self.parent),
            created_at: cell_time(row, &self.created_at),
            pending: false,
        }
    }

    pub fn id_key(&self) -> &str {
        write_key(&self.id, "id")
    }

    pub fn post_key(&self) -> &str {
        write_key(&self.post, "post_id")
    }

    pub fn owner_key(&self) -> &str {
        write_key(&self.owner, "user_id")
    }

    pub fn created_key(&self) -> &str {
        write_key(&self.created_at, "created_at")
    }

    pub fn insert_row(
        &self,
        post_id: &EntityId,
        author: &EntityId,
        text: &str,
        parent_id: Option<&EntityId>,
    ) -> Row {
        let mut row = Row::new();
        row.insert(self.post_key().to_string(), post_id.to_value());
        row.insert(self.owner_key().to_string(), author.to_value());
        row.insert(
            write_key(&self.text, "content").to_string(),
            Value::String(text.to_string()),
        );
        if let Some(parent) = parent_id {
            row.insert(
                write_key(&self.parent, "parent_id").to_string(),
                parent.to_value(),
            );
        }
        row
    }
}

/// Column map for the profiles table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileColumns {
    pub id: Option<String>,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub rank: Option<String>,
    pub country: Option<String>,
}

impl ProfileColumns {
    pub fn detect(sample: Option<&Row>) -> Self {
        Self {
            id: detect_column(sample, PROFILE_ID),
            display_name: detect_column(sample, DISPLAY_NAME),
            avatar: detect_column(sample, AVATAR),
            rank: detect_column(sample, RANK),
            country: detect_column(sample, COUNTRY),
        }
    }

    /// Profiles without an id are useless as a lookup and are skipped
    pub fn map(&self, row: &Row) -> Option<Profile> {
        Some(Profile {
            id: cell_id(row, &self.id)?,
            display_name: cell_non_empty(row, &self.display_name),
            avatar_url: cell_non_empty(row, &self.avatar),
            rank: cell_non_empty(row, &self.rank),
            country: cell_non_empty(row, &self.country),
        })
    }

    pub fn id_key(&self) -> &str {
        write_key(&self.id, "id")
    }

    pub fn avatar_key(&self) -> &str {
        write_key(&self.avatar, "avatar_url")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn maps_post_with_alternate_columns() {
        let sample = row(json!({
            "uuid": "p-1",
            "created_by": "u1",
            "caption": "Sunrise over the Solent",
            "photo_url": "https://cdn/x.jpg",
            "inserted_at": "2024-03-01 08:30:00"
        }));
        let columns = PostColumns::detect(Some(&sample));
        let post = columns.map(&sample);

        assert_eq!(post.id, EntityId::from("p-1"));
        assert_eq!(post.author_id, Some(EntityId::from("u1")));
        assert_eq!(post.text, "Sunrise over the Solent");
        assert_eq!(post.media_url.as_deref(), Some("https://cdn/x.jpg"));
        assert!(post.created_at.is_some());
    }

    #[test]
    fn missing_columns_fail_closed() {
        let sample = row(json!({ "id": 5 }));
        let columns = PostColumns::detect(Some(&sample));
        let post = columns.map(&sample);

        assert_eq!(post.id, EntityId::from(5));
        assert_eq!(post.author_id, None);
        assert_eq!(post.text, "");
        assert_eq!(post.media_url, None);
        assert_eq!(post.created_at, None);

        let nothing = PostColumns::detect(None);
        assert_eq!(nothing, PostColumns::default());
        assert!(nothing.map(&sample).id.is_temporary());
    }

    #[test]
    fn insert_rows_use_detected_or_canonical_keys() {
        let detected = PostColumns::detect(Some(&row(json!({
            "id": 1, "author_id": "u", "body": "", "media_url": null
        }))));
        let written = detected.insert_row(&EntityId::from("u2"), "hello", Some("m.png"));
        assert_eq!(written.get("author_id"), Some(&json!("u2")));
        assert_eq!(written.get("body"), Some(&json!("hello")));
        assert_eq!(written.get("media_url"), Some(&json!("m.png")));

        let canonical = PostColumns::default().insert_row(&EntityId::from("u2"), "hi", None);
        assert_eq!(canonical.get("user_id"), Some(&json!("u2")));
        assert_eq!(canonical.get("content"), Some(&json!("hi")));
        assert!(!canonical.contains_key("image_url"));
    }

    #[test]
    fn parses_timestamp_shapes() {
        assert!(parse_timestamp(&json!("2024-05-01T10:00:00+02:00")).is_some());
        assert!(parse_timestamp(&json!("2024-05-01 10:00:00.123")).is_some());
        assert_eq!(
            parse_timestamp(&json!(1_700_000_000)),
            parse_timestamp(&json!(1_700_000_000_000i64))
        );
        assert_eq!(parse_timestamp(&json!("yesterday")), None);
    }

    #[test]
    fn profile_without_id_is_skipped() {
        let columns = ProfileColumns::detect(Some(&row(json!({ "full_name": "A" }))));
        assert_eq!(columns.map(&row(json!({ "full_name": "A" }))), None);
    }
}
