mod common;

use common::{backend, sign_in};
use social_sync::domain::{ChatScope, EntityId, NotificationKind};
use social_sync::memory::FailOp;
use social_sync::messaging::{ConnectionStatus, RequestDirection};
use social_sync::realtime::ReconcileOutcome;
use social_sync::{SocialSync, SyncConfig, SyncError};

fn requests(backend: &social_sync::memory::MemoryBackend) -> usize {
    backend
        .rows("notifications")
        .iter()
        .filter(|row| row["type"] == "message_request")
        .count()
}

// ==== Session ====

#[tokio::test]
async fn test_signed_out_session_is_rejected() {
    let backend = backend();

    let result = SocialSync::connect(backend.ports(None), SyncConfig::default()).await;

    assert!(matches!(result, Err(SyncError::NotAuthenticated)));
}

// ==== Handshake ====

#[tokio::test]
async fn test_handshake_goes_from_none_to_pending_to_connected() {
    let backend = backend();
    let ada = sign_in(&backend, "u1", "Ada").await;
    let bea = sign_in(&backend, "u2", "Bea").await;
    let u1 = EntityId::from("u1");
    let u2 = EntityId::from("u2");

    assert_eq!(ada.messenger().connection_status(&u2).await.unwrap(), ConnectionStatus::None);

    let requested = ada.messenger().request_connection(&u2).await.unwrap();
    let ConnectionStatus::Pending { request_id, direction } = requested.clone() else {
        panic!("expected a pending request, got {requested:?}");
    };
    assert_eq!(direction, RequestDirection::Outgoing);

    // asking twice does not create a second request
    assert_eq!(ada.messenger().request_connection(&u2).await.unwrap(), requested);
    assert_eq!(requests(&backend), 1);

    assert_eq!(
        bea.messenger().connection_status(&u1).await.unwrap(),
        ConnectionStatus::Pending {
            request_id: request_id.clone(),
            direction: RequestDirection::Incoming,
        }
    );
    let inbox = bea.messenger().load_notifications().await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].kind, NotificationKind::MessageRequest);
    assert_eq!(inbox[0].sender_id(), Some(u1.clone()));

    let conversation = bea.messenger().accept_request(&request_id).await.unwrap();

    let connected = ConnectionStatus::Connected {
        conversation_id: conversation.id.clone(),
    };
    assert_eq!(ada.messenger().connection_status(&u2).await.unwrap(), connected);
    assert_eq!(bea.messenger().connection_status(&u1).await.unwrap(), connected);
    assert_eq!(backend.rows("conversations").len(), 1);
    assert_eq!(backend.rows("conversation_participants").len(), 2);
    assert_eq!(bea.messenger().unread_notification_count(), 0);

    let accepted: Vec<_> = backend
        .sent_notifications()
        .into_iter()
        .filter(|n| n.title == "Request accepted")
        .collect();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].recipient_id, u1);
}

#[tokio::test]
async fn test_accepting_twice_reuses_the_conversation() {
    let backend = backend();
    let ada = sign_in(&backend, "u1", "Ada").await;
    let bea = sign_in(&backend, "u2", "Bea").await;
    let ConnectionStatus::Pending { request_id, .. } = ada
        .messenger()
        .request_connection(&EntityId::from("u2"))
        .await
        .unwrap()
    else {
        panic!("expected a pending request");
    };

    let first = bea.messenger().accept_request(&request_id).await.unwrap();
    let second = bea.messenger().accept_request(&request_id).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(backend.rows("conversations").len(), 1);
    assert_eq!(backend.rows("conversation_participants").len(), 2);
}

#[tokio::test]
async fn test_requesting_back_accepts_the_incoming_request() {
    let backend = backend();
    let ada = sign_in(&backend, "u1", "Ada").await;
    let bea = sign_in(&backend, "u2", "Bea").await;
    bea.messenger()
        .request_connection(&EntityId::from("u1"))
        .await
        .unwrap();

    let status = ada
        .messenger()
        .request_connection(&EntityId::from("u2"))
        .await
        .unwrap();

    assert!(matches!(status, ConnectionStatus::Connected { .. }));
    assert_eq!(requests(&backend), 1);
    assert_eq!(backend.rows("conversations").len(), 1);
}

#[tokio::test]
async fn test_declined_request_returns_to_none() {
    let backend = backend();
    let ada = sign_in(&backend, "u1", "Ada").await;
    let bea = sign_in(&backend, "u2", "Bea").await;
    let u2 = EntityId::from("u2");
    let ConnectionStatus::Pending { request_id, .. } =
        ada.messenger().request_connection(&u2).await.unwrap()
    else {
        panic!("expected a pending request");
    };

    bea.messenger().decline_request(&request_id).await.unwrap();

    assert_eq!(ada.messenger().connection_status(&u2).await.unwrap(), ConnectionStatus::None);
    assert!(backend.rows("conversations").is_empty());
    // a new request can be made afterwards
    assert!(matches!(
        ada.messenger().request_connection(&u2).await.unwrap(),
        ConnectionStatus::Pending { .. }
    ));
}

#[tokio::test]
async fn test_only_the_recipient_can_accept() {
    let backend = backend();
    let ada = sign_in(&backend, "u1", "Ada").await;
    let cal = sign_in(&backend, "u3", "Cal").await;
    let ConnectionStatus::Pending { request_id, .. } = ada
        .messenger()
        .request_connection(&EntityId::from("u2"))
        .await
        .unwrap()
    else {
        panic!("expected a pending request");
    };

    let err = cal.messenger().accept_request(&request_id).await.unwrap_err();

    assert!(matches!(err, SyncError::PermissionDenied(_)));
    assert!(backend.rows("conversations").is_empty());
}

#[tokio::test]
async fn test_messaging_yourself_is_rejected() {
    let backend = backend();
    let ada = sign_in(&backend, "u1", "Ada").await;

    let err = ada
        .messenger()
        .request_connection(&EntityId::from("u1"))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Validation(_)));
}

#[tokio::test]
async fn test_failed_participant_insert_leaves_no_conversation() {
    let backend = backend();
    let ada = sign_in(&backend, "u1", "Ada").await;
    let bea = sign_in(&backend, "u2", "Bea").await;
    let ConnectionStatus::Pending { request_id, .. } = ada
        .messenger()
        .request_connection(&EntityId::from("u2"))
        .await
        .unwrap()
    else {
        panic!("expected a pending request");
    };
    backend.fail_next("conversation_participants", FailOp::Insert, "network down");

    let err = bea.messenger().accept_request(&request_id).await.unwrap_err();

    assert_eq!(err.user_message(), "network down");
    assert!(backend.rows("conversations").is_empty());
    assert!(backend.rows("conversation_participants").is_empty());
    assert!(matches!(
        bea.messenger()
            .connection_status(&EntityId::from("u1"))
            .await
            .unwrap(),
        ConnectionStatus::Pending { .. }
    ));
}

#[tokio::test]
async fn test_group_conversation_does_not_count_as_connected() {
    let backend = backend();
    backend.seed("conversations", vec![common::row(serde_json::json!({ "id": 900 }))]);
    backend.seed(
        "conversation_participants",
        ["u1", "u2", "u3"]
            .into_iter()
            .map(|user| common::row(serde_json::json!({ "conversation_id": 900, "user_id": user })))
            .collect(),
    );
    let ada = sign_in(&backend, "u1", "Ada").await;
    let bea = sign_in(&backend, "u2", "Bea").await;
    let u2 = EntityId::from("u2");

    assert_eq!(ada.messenger().connection_status(&u2).await.unwrap(), ConnectionStatus::None);

    let ConnectionStatus::Pending { request_id, .. } =
        ada.messenger().request_connection(&u2).await.unwrap()
    else {
        panic!("expected a pending request");
    };
    let conversation = bea.messenger().accept_request(&request_id).await.unwrap();

    assert_ne!(conversation.id, EntityId::from(900_i64));
    assert_eq!(
        ada.messenger().connection_status(&u2).await.unwrap(),
        ConnectionStatus::Connected {
            conversation_id: conversation.id,
        }
    );
}

// ==== Conversations ====

async fn connected_pair(
    backend: &std::sync::Arc<social_sync::memory::MemoryBackend>,
) -> (SocialSync, SocialSync, EntityId) {
    let ada = sign_in(backend, "u1", "Ada").await;
    let bea = sign_in(backend, "u2", "Bea").await;
    let ConnectionStatus::Pending { request_id, .. } = ada
        .messenger()
        .request_connection(&EntityId::from("u2"))
        .await
        .unwrap()
    else {
        panic!("expected a pending request");
    };
    let conversation = bea.messenger().accept_request(&request_id).await.unwrap();
    (ada, bea, conversation.id)
}

#[tokio::test]
async fn test_private_message_counts_unread_until_opened() {
    let backend = backend();
    let (ada, bea, conversation_id) = connected_pair(&backend).await;

    ada.messenger()
        .send_private_message(&conversation_id, "Fancy a sail?")
        .await
        .unwrap();

    let inbox = bea.messenger().list_conversations().await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].unread, 1);
    assert_eq!(
        inbox[0].peer.as_ref().and_then(|p| p.display_name.as_deref()),
        Some("Ada")
    );

    let _open = bea.messenger().open_conversation(&conversation_id).await.unwrap();
    let views = bea
        .messenger()
        .message_views(&ChatScope::Conversation(conversation_id.clone()))
        .unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].message.text, "Fancy a sail?");
    assert!(!views[0].is_mine);
    assert!(views[0].message.is_read);

    assert_eq!(bea.messenger().store().read().unread_count(&conversation_id), 0);
    let inbox = bea.messenger().list_conversations().await.unwrap();
    assert_eq!(inbox[0].unread, 0);

    let notified: Vec<_> = backend
        .sent_notifications()
        .into_iter()
        .filter(|n| n.title == "New message")
        .collect();
    assert_eq!(notified.len(), 1);
    assert_eq!(notified[0].recipient_id, EntityId::from("u2"));
}

#[tokio::test]
async fn test_open_conversation_receives_peer_messages() {
    let backend = backend();
    let (ada, bea, conversation_id) = connected_pair(&backend).await;
    let mut thread = bea.messenger().open_conversation(&conversation_id).await.unwrap();

    let sent = ada
        .messenger()
        .send_private_message(&conversation_id, "Tide turns at six")
        .await
        .unwrap();

    let applied: Vec<_> = thread.drain().await.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(applied, vec![ReconcileOutcome::Appended(sent.id)]);
}

#[tokio::test]
async fn test_failed_peer_notification_keeps_the_message() {
    let backend = backend();
    let (ada, bea, conversation_id) = connected_pair(&backend).await;
    backend.fail_next_notification("push service down");

    let sent = ada
        .messenger()
        .send_private_message(&conversation_id, "Still here")
        .await
        .unwrap();

    assert!(!sent.pending);
    assert_eq!(backend.rows("private_messages").len(), 1);
    assert_eq!(bea.messenger().list_conversations().await.unwrap()[0].unread, 1);
}

#[tokio::test]
async fn test_closing_chats_releases_their_subscriptions() {
    let backend = backend();
    let (ada, _bea, conversation_id) = connected_pair(&backend).await;
    let mut room = ada.messenger().open_community().await.unwrap();
    let mut thread = ada.messenger().open_conversation(&conversation_id).await.unwrap();
    assert_eq!(backend.subscriber_count(), 2);

    ada.messenger().close_conversation(&conversation_id).await.unwrap();
    ada.messenger().close_community().await.unwrap();

    assert_eq!(backend.subscriber_count(), 0);
    assert!(thread.next().await.is_none());
    assert!(room.next().await.is_none());
    assert!(ada
        .messenger()
        .message_views(&ChatScope::Conversation(conversation_id))
        .is_none());
    assert!(ada.messenger().message_views(&ChatScope::Community).is_none());
}

#[tokio::test]
async fn test_outsider_cannot_open_conversation() {
    let backend = backend();
    let (_ada, _bea, conversation_id) = connected_pair(&backend).await;
    let cal = sign_in(&backend, "u3", "Cal").await;

    let err = cal
        .messenger()
        .open_conversation(&conversation_id)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::PermissionDenied(_)));
    assert!(cal.realtime().active_scopes().is_empty());
}

#[tokio::test]
async fn test_failed_send_removes_pending_message() {
    let backend = backend();
    let ada = sign_in(&backend, "u1", "Ada").await;
    ada.messenger().load_community().await.unwrap();
    backend.fail_next("community_messages", FailOp::Insert, "network down");

    let err = ada
        .messenger()
        .send_community_message("Anyone there?")
        .await
        .unwrap_err();

    assert_eq!(err.user_message(), "network down");
    assert!(ada
        .messenger()
        .message_views(&ChatScope::Community)
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_failed_history_read_shows_error_in_place() {
    let backend = backend();
    let ada = sign_in(&backend, "u1", "Ada").await;
    backend.fail_next("community_messages", FailOp::Select, "connection reset");

    assert!(ada.messenger().load_community().await.is_err());

    assert_eq!(
        ada.messenger().load_error(&ChatScope::Community).as_deref(),
        Some("connection reset")
    );
}

// ==== Notifications ====

#[tokio::test]
async fn test_mark_all_notifications_read() {
    let backend = backend();
    let ada = sign_in(&backend, "u1", "Ada").await;
    let bea = sign_in(&backend, "u2", "Bea").await;
    ada.messenger()
        .request_connection(&EntityId::from("u2"))
        .await
        .unwrap();
    ada.messenger()
        .send_community_message("Hello")
        .await
        .unwrap();
    bea.messenger().load_notifications().await.unwrap();
    assert_eq!(bea.messenger().unread_notification_count(), 1);

    bea.messenger().mark_all_notifications_read().await.unwrap();

    assert_eq!(bea.messenger().unread_notification_count(), 0);
    assert!(backend
        .rows("notifications")
        .iter()
        .all(|row| row["is_read"] == true));
}

#[tokio::test]
async fn test_mark_one_notification_read() {
    let backend = backend();
    let ada = sign_in(&backend, "u1", "Ada").await;
    let bea = sign_in(&backend, "u2", "Bea").await;
    let cal = sign_in(&backend, "u3", "Cal").await;
    ada.messenger()
        .request_connection(&EntityId::from("u2"))
        .await
        .unwrap();
    cal.messenger()
        .request_connection(&EntityId::from("u2"))
        .await
        .unwrap();
    let inbox = bea.messenger().load_notifications().await.unwrap();
    assert_eq!(inbox.len(), 2);

    bea.messenger().mark_notification_read(&inbox[0].id).await.unwrap();

    assert_eq!(bea.messenger().unread_notification_count(), 1);
    let unread: Vec<_> = backend
        .rows("notifications")
        .into_iter()
        .filter(|row| row["is_read"] == false)
        .collect();
    assert_eq!(unread.len(), 1);

    let err = bea
        .messenger()
        .mark_notification_read(&EntityId::from("9999"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
}
