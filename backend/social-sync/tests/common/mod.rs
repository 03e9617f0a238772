#![allow(dead_code)]

use serde_json::Value;
use social_sync::domain::EntityId;
use social_sync::memory::MemoryBackend;
use social_sync::ports::Row;
use social_sync::{SocialSync, SyncConfig};
use std::sync::Arc;

pub fn row(value: Value) -> Row {
    value.as_object().cloned().unwrap_or_default()
}

pub fn id_of(row: &Row) -> EntityId {
    EntityId::from_value(&row["id"]).unwrap()
}

/// Backend with three registered users: u1 (Ada), u2 (Bea), u3 (Cal)
pub fn backend() -> Arc<MemoryBackend> {
    social_sync::logging::init_tracing();
    let backend = MemoryBackend::new();
    backend.register_user("u1", "Ada");
    backend.register_user("u2", "Bea");
    backend.register_user("u3", "Cal");
    backend
}

pub async fn sign_in(backend: &Arc<MemoryBackend>, id: &str, name: &str) -> SocialSync {
    let user = backend.register_user(id, name);
    SocialSync::connect(backend.ports(Some(user)), SyncConfig::default())
        .await
        .unwrap()
}

/// Seed one post and return its id
pub fn seed_post(backend: &MemoryBackend, author: &str, text: &str) -> EntityId {
    let rows = backend.seed(
        "posts",
        vec![row(serde_json::json!({ "user_id": author, "content": text }))],
    );
    id_of(&rows[0])
}

pub fn seed_comment(backend: &MemoryBackend, post_id: &EntityId, author: &str, text: &str) -> EntityId {
    let rows = backend.seed(
        "comments",
        vec![row(serde_json::json!({
            "post_id": post_id.to_value(),
            "user_id": author,
            "content": text,
        }))],
    );
    id_of(&rows[0])
}
