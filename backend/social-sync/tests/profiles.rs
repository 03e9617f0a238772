mod common;

use common::{backend, sign_in};
use social_sync::domain::{EntityId, MediaFile};
use social_sync::SyncError;

#[tokio::test]
async fn test_avatar_upload_updates_profile_row_and_cache() {
    let backend = backend();
    let ada = sign_in(&backend, "u1", "Ada").await;
    let file = MediaFile::new("me.png", "image/png", vec![1, 2, 3]);

    let url = ada.profiles().update_avatar(file).await.unwrap();

    let uploads = backend.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].bucket, "avatars");
    assert!(uploads[0].path.starts_with("u1/"));
    assert!(uploads[0].path.ends_with("me.png"));

    let stored = backend
        .rows("profiles")
        .into_iter()
        .find(|row| row["id"] == "u1")
        .unwrap();
    assert_eq!(stored["avatar_url"], url.as_str());
    // the name column is left alone
    assert_eq!(stored["full_name"], "Ada");

    let cached = ada.profiles().get(&EntityId::from("u1")).unwrap();
    assert_eq!(cached.avatar_url.as_deref(), Some(url.as_str()));
}

#[tokio::test]
async fn test_failed_avatar_upload_leaves_profile_untouched() {
    let backend = backend();
    let ada = sign_in(&backend, "u1", "Ada").await;
    backend.fail_next_upload("bucket full");

    let err = ada
        .profiles()
        .update_avatar(MediaFile::new("me.png", "image/png", vec![1]))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Upload(_)));
    assert!(err.user_message().contains("bucket full"));
    assert!(backend.uploads().is_empty());
    assert!(backend
        .rows("profiles")
        .iter()
        .all(|row| row.get("avatar_url").is_none()));
}

#[tokio::test]
async fn test_empty_avatar_is_rejected_before_upload() {
    let backend = backend();
    let ada = sign_in(&backend, "u1", "Ada").await;

    let err = ada
        .profiles()
        .update_avatar(MediaFile::new("me.png", "image/png", Vec::new()))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Validation(_)));
    assert!(backend.uploads().is_empty());
}

#[tokio::test]
async fn test_refresh_reads_alternate_name_column() {
    let backend = backend();
    backend.seed(
        "profiles",
        vec![common::row(serde_json::json!({ "id": "u9", "username": "dora" }))],
    );
    let ada = sign_in(&backend, "u1", "Ada").await;

    let loaded = ada
        .profiles()
        .refresh(&[EntityId::from("u9")])
        .await
        .unwrap();

    assert_eq!(loaded, 1);
    assert_eq!(
        ada.profiles()
            .get(&EntityId::from("u9"))
            .and_then(|p| p.display_name),
        Some("dora".to_string())
    );
}
