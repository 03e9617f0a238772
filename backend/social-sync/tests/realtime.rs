mod common;

use common::{backend, row, seed_comment, seed_post, sign_in};
use serde_json::json;
use social_sync::domain::{ChatScope, Comment, EntityId};
use social_sync::ports::{ChangeEvent, ChangeKind, Filter, RelationalStore};
use social_sync::realtime::{ReconcileOutcome, ScopeKey};

fn outcomes(results: Vec<social_sync::SyncResult<ReconcileOutcome>>) -> Vec<ReconcileOutcome> {
    results.into_iter().map(|r| r.unwrap()).collect()
}

// ==== Comment threads ====

#[tokio::test]
async fn test_own_insert_confirms_pending_comment_in_place() {
    let backend = backend();
    let post_id = seed_post(&backend, "u2", "Sunset");
    let ada = sign_in(&backend, "u1", "Ada").await;
    ada.feed().load_feed().await.unwrap();
    let mut thread = ada.feed().open_thread(&post_id).await.unwrap();

    // A send still waiting for its response
    let temp_id = EntityId::temporary();
    ada.feed().store().write().upsert_comment(Comment {
        id: temp_id.clone(),
        post_id: Some(post_id.clone()),
        author_id: Some(EntityId::from("u1")),
        text: "hi".to_string(),
        parent_id: None,
        created_at: None,
        pending: true,
    });
    assert_eq!(ada.feed().post_views()[0].comment_count, 1);

    let stored = backend
        .insert(
            "comments",
            row(json!({ "post_id": post_id.to_value(), "user_id": "u1", "content": "hi" })),
        )
        .await
        .unwrap();
    let server_id = EntityId::from_value(&stored["id"]).unwrap();

    assert_eq!(
        outcomes(thread.drain().await),
        vec![ReconcileOutcome::Confirmed {
            temp_id,
            server_id: server_id.clone()
        }]
    );
    assert_eq!(ada.feed().post_views()[0].comment_count, 1);
    let views = ada.feed().comment_views(&post_id).unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].comment.id, server_id);
    assert!(!views[0].comment.pending);
}

#[tokio::test]
async fn test_redelivered_comment_is_applied_once() {
    let backend = backend();
    let post_id = seed_post(&backend, "u1", "Sunset");
    let ada = sign_in(&backend, "u1", "Ada").await;
    ada.feed().load_feed().await.unwrap();
    let mut thread = ada.feed().open_thread(&post_id).await.unwrap();

    let stored = backend
        .insert(
            "comments",
            row(json!({ "post_id": post_id.to_value(), "user_id": "u2", "content": "Ahoy" })),
        )
        .await
        .unwrap();
    let comment_id = EntityId::from_value(&stored["id"]).unwrap();
    backend.push_event(ChangeEvent {
        table: "comments".to_string(),
        kind: ChangeKind::Insert,
        row: stored,
    });

    assert_eq!(
        outcomes(thread.drain().await),
        vec![
            ReconcileOutcome::Appended(comment_id),
            ReconcileOutcome::Duplicate
        ]
    );
    assert_eq!(ada.feed().post_views()[0].comment_count, 1);
    let views = ada.feed().comment_views(&post_id).unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(
        views[0].author.as_ref().and_then(|p| p.display_name.as_deref()),
        Some("Bea")
    );
}

#[tokio::test]
async fn test_push_of_already_loaded_comment_is_duplicate() {
    let backend = backend();
    let post_id = seed_post(&backend, "u1", "Sunset");
    seed_comment(&backend, &post_id, "u2", "Loaded already");
    let ada = sign_in(&backend, "u1", "Ada").await;
    ada.feed().load_feed().await.unwrap();
    let mut thread = ada.feed().open_thread(&post_id).await.unwrap();

    let loaded = backend.rows("comments").remove(0);
    backend.push_event(ChangeEvent {
        table: "comments".to_string(),
        kind: ChangeKind::Insert,
        row: loaded,
    });

    assert_eq!(outcomes(thread.drain().await), vec![ReconcileOutcome::Duplicate]);
    assert_eq!(ada.feed().post_views()[0].comment_count, 1);
}

#[tokio::test]
async fn test_own_send_then_push_keeps_one_entry() {
    let backend = backend();
    let post_id = seed_post(&backend, "u2", "Sunset");
    let ada = sign_in(&backend, "u1", "Ada").await;
    ada.feed().load_feed().await.unwrap();
    let mut thread = ada.feed().open_thread(&post_id).await.unwrap();

    ada.feed().send_comment(&post_id, "Mine", None).await.unwrap();

    assert_eq!(outcomes(thread.drain().await), vec![ReconcileOutcome::Duplicate]);
    assert_eq!(ada.feed().comment_views(&post_id).unwrap().len(), 1);
    assert_eq!(ada.feed().post_views()[0].comment_count, 1);
}

#[tokio::test]
async fn test_pushed_delete_removes_comment() {
    let backend = backend();
    let post_id = seed_post(&backend, "u1", "Sunset");
    let comment_id = seed_comment(&backend, &post_id, "u2", "Soon gone");
    let ada = sign_in(&backend, "u1", "Ada").await;
    ada.feed().load_feed().await.unwrap();
    let mut thread = ada.feed().open_thread(&post_id).await.unwrap();

    backend
        .delete("comments", &Filter::new().eq("id", comment_id.to_value()))
        .await
        .unwrap();

    assert_eq!(
        outcomes(thread.drain().await),
        vec![ReconcileOutcome::Removed(comment_id)]
    );
    assert_eq!(ada.feed().post_views()[0].comment_count, 0);
}

#[tokio::test]
async fn test_comments_of_other_posts_are_not_delivered() {
    let backend = backend();
    let open_post = seed_post(&backend, "u1", "Open");
    let other_post = seed_post(&backend, "u1", "Other");
    let ada = sign_in(&backend, "u1", "Ada").await;
    ada.feed().load_feed().await.unwrap();
    let mut thread = ada.feed().open_thread(&open_post).await.unwrap();

    backend
        .insert(
            "comments",
            row(json!({ "post_id": other_post.to_value(), "user_id": "u2", "content": "Elsewhere" })),
        )
        .await
        .unwrap();

    assert!(thread.drain().await.is_empty());
    assert_eq!(ada.feed().post_views()[0].comment_count, 0);
    assert_eq!(ada.feed().post_views()[1].comment_count, 0);
}

// ==== Scope lifecycle ====

#[tokio::test]
async fn test_opening_a_thread_closes_the_previous_one() {
    let backend = backend();
    let first = seed_post(&backend, "u2", "First");
    let second = seed_post(&backend, "u2", "Second");
    let ada = sign_in(&backend, "u1", "Ada").await;
    ada.feed().load_feed().await.unwrap();

    let mut first_thread = ada.feed().open_thread(&first).await.unwrap();
    assert_eq!(backend.subscriber_count(), 1);
    let _second_thread = ada.feed().open_thread(&second).await.unwrap();

    assert_eq!(backend.subscriber_count(), 1);
    assert_eq!(
        ada.realtime().active_scopes(),
        vec![ScopeKey::CommentThread(second)]
    );
    assert!(first_thread.next().await.is_none());
}

#[tokio::test]
async fn test_scopes_of_different_families_coexist() {
    let backend = backend();
    let post_id = seed_post(&backend, "u2", "First");
    let ada = sign_in(&backend, "u1", "Ada").await;
    ada.feed().load_feed().await.unwrap();

    let _thread = ada.feed().open_thread(&post_id).await.unwrap();
    let _community = ada.messenger().open_community().await.unwrap();
    let _notifications = ada.messenger().open_notifications().await.unwrap();
    assert_eq!(backend.subscriber_count(), 3);

    ada.shutdown().await;
    assert_eq!(backend.subscriber_count(), 0);
    assert!(ada.realtime().active_scopes().is_empty());
}

// ==== Messages ====

#[tokio::test]
async fn test_community_message_reaches_other_session_once() {
    let backend = backend();
    let ada = sign_in(&backend, "u1", "Ada").await;
    let bea = sign_in(&backend, "u2", "Bea").await;
    let mut ada_room = ada.messenger().open_community().await.unwrap();
    let mut bea_room = bea.messenger().open_community().await.unwrap();

    let sent = bea.messenger().send_community_message("Ahoy all").await.unwrap();

    assert_eq!(
        outcomes(ada_room.drain().await),
        vec![ReconcileOutcome::Appended(sent.id.clone())]
    );
    assert_eq!(outcomes(bea_room.drain().await), vec![ReconcileOutcome::Duplicate]);

    let ada_view = ada.messenger().message_views(&ChatScope::Community).unwrap();
    assert_eq!(ada_view.len(), 1);
    assert!(!ada_view[0].is_mine);
    assert_eq!(
        ada_view[0].author.as_ref().and_then(|p| p.display_name.as_deref()),
        Some("Bea")
    );
    let bea_view = bea.messenger().message_views(&ChatScope::Community).unwrap();
    assert_eq!(bea_view.len(), 1);
    assert!(bea_view[0].is_mine);
    assert!(!bea_view[0].message.pending);
}

#[tokio::test]
async fn test_notifications_arrive_on_top() {
    let backend = backend();
    let post_id = seed_post(&backend, "u2", "Sunset");
    let ada = sign_in(&backend, "u1", "Ada").await;
    let bea = sign_in(&backend, "u2", "Bea").await;
    let mut inbox = bea.messenger().open_notifications().await.unwrap();
    ada.feed().load_feed().await.unwrap();

    ada.feed().toggle_like(&post_id).await.unwrap();

    let applied = outcomes(inbox.drain().await);
    assert_eq!(applied.len(), 1);
    assert!(matches!(applied[0], ReconcileOutcome::Appended(_)));
    assert_eq!(bea.messenger().unread_notification_count(), 1);
    assert_eq!(bea.messenger().notifications()[0].title, "New like");
}

#[tokio::test]
async fn test_spawned_subscription_applies_until_shutdown() {
    let backend = backend();
    let ada = sign_in(&backend, "u1", "Ada").await;
    let bea = sign_in(&backend, "u2", "Bea").await;
    let room = ada.messenger().open_community().await.unwrap();
    assert_eq!(room.key(), &ScopeKey::Community);
    assert!(format!("{room:?}").contains("Community"));
    let worker = tokio::spawn(room.run());

    bea.messenger().send_community_message("Ahoy").await.unwrap();
    ada.shutdown().await;
    worker.await.unwrap();

    let views = ada.messenger().message_views(&ChatScope::Community).unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].message.text, "Ahoy");
}
