//! Connection requests between users
//!
//! A request is an unread `message_request` notification addressed to the
//! other user. Accepting it creates the 1:1 conversation (or reuses an
//! existing one); declining marks it read. Status is recomputed from the
//! store on every call, never cached.

use super::{read_patch, Messenger};
use crate::domain::{
    Conversation, EntityId, Notification, NotificationKind, OutgoingNotification,
};
use crate::error::{SyncError, SyncResult};
use crate::ports::{Filter, Row};
use crate::schema::fixed::{self, notification_from_row, notification_row, participant_row};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDirection {
    /// The current user asked
    Outgoing,
    /// The other user asked
    Incoming,
}

/// Relationship between the current user and another user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    None,
    Pending {
        request_id: EntityId,
        direction: RequestDirection,
    },
    Connected {
        conversation_id: EntityId,
    },
}

impl Messenger {
    /// Unread message requests between the current user and `other`
    async fn open_requests(&self, other: &EntityId) -> SyncResult<Vec<Notification>> {
        let me = self.ctx.user_id();
        let rows = self
            .ctx
            .store
            .select(
                &self.ctx.tables().notifications,
                &Filter::new()
                    .eq(fixed::KIND, NotificationKind::MessageRequest.as_str())
                    .eq(fixed::IS_READ, false)
                    .is_in(fixed::RECIPIENT_ID, [me.to_value(), other.to_value()]),
                None,
                None,
            )
            .await?;
        Ok(rows
            .iter()
            .filter_map(notification_from_row)
            .filter(|n| {
                let sender = n.sender_id();
                (&n.recipient_id == other && sender.as_ref() == Some(me))
                    || (&n.recipient_id == me && sender.as_ref() == Some(other))
            })
            .collect())
    }

    pub async fn connection_status(&self, other: &EntityId) -> SyncResult<ConnectionStatus> {
        if other == self.ctx.user_id() {
            return Err(SyncError::validation("You can't message yourself"));
        }
        if let Some(conversation_id) = self.shared_conversation(other).await? {
            return Ok(ConnectionStatus::Connected { conversation_id });
        }

        let requests = self.open_requests(other).await?;
        let me = self.ctx.user_id();
        let outgoing = requests.iter().find(|n| &n.recipient_id == other);
        let incoming = requests.iter().find(|n| &n.recipient_id == me);
        Ok(match (outgoing, incoming) {
            (Some(request), _) => ConnectionStatus::Pending {
                request_id: request.id.clone(),
                direction: RequestDirection::Outgoing,
            },
            (None, Some(request)) => ConnectionStatus::Pending {
                request_id: request.id.clone(),
                direction: RequestDirection::Incoming,
            },
            (None, None) => ConnectionStatus::None,
        })
    }

    /// Ask `other` to connect
    ///
    /// Already connected or already asked is a no-op. If `other` has asked
    /// first, their request is accepted instead.
    pub async fn request_connection(&self, other: &EntityId) -> SyncResult<ConnectionStatus> {
        let status = self.connection_status(other).await?;
        match status {
            ConnectionStatus::Connected { .. }
            | ConnectionStatus::Pending {
                direction: RequestDirection::Outgoing,
                ..
            } => {
                debug!(other = %other, status = ?status, "Connection request skipped");
                Ok(status)
            }
            ConnectionStatus::Pending {
                request_id,
                direction: RequestDirection::Incoming,
            } => {
                let conversation = self.accept_request(&request_id).await?;
                Ok(ConnectionStatus::Connected {
                    conversation_id: conversation.id,
                })
            }
            ConnectionStatus::None => {
                let name = self.ctx.display_name();
                let mut metadata = Map::new();
                metadata.insert("sender_id".into(), self.ctx.user_id().to_value());
                metadata.insert("sender_name".into(), Value::String(name.clone()));
                let row = notification_row(&OutgoingNotification {
                    recipient_id: other.clone(),
                    title: "Message request".to_string(),
                    body: format!("{name} wants to message you"),
                    metadata,
                    kind: NotificationKind::MessageRequest,
                });

                let stored = self
                    .ctx
                    .store
                    .insert(&self.ctx.tables().notifications, row)
                    .await?;
                let request_id = stored
                    .get(fixed::ID)
                    .and_then(EntityId::from_value)
                    .ok_or_else(|| SyncError::Internal("Message request stored without an id".into()))?;
                info!(other = %other, request_id = %request_id, "Connection requested");
                Ok(ConnectionStatus::Pending {
                    request_id,
                    direction: RequestDirection::Outgoing,
                })
            }
        }
    }

    /// Fetch a message request addressed to the current user
    async fn incoming_request(&self, notification_id: &EntityId) -> SyncResult<(Notification, EntityId)> {
        let rows = self
            .ctx
            .store
            .select(
                &self.ctx.tables().notifications,
                &Filter::new().eq(fixed::ID, notification_id.to_value()),
                None,
                Some(1),
            )
            .await?;
        let request = rows
            .first()
            .and_then(notification_from_row)
            .ok_or_else(|| SyncError::NotFound(format!("request {notification_id}")))?;

        if &request.recipient_id != self.ctx.user_id() {
            return Err(SyncError::PermissionDenied(
                "This request was sent to someone else".to_string(),
            ));
        }
        if request.kind != NotificationKind::MessageRequest {
            return Err(SyncError::validation("This notification is not a message request"));
        }
        let sender = request
            .sender_id()
            .ok_or_else(|| SyncError::validation("This request has no sender"))?;
        Ok((request, sender))
    }

    async fn create_conversation(&self, peer: &EntityId) -> SyncResult<Conversation> {
        let me = self.ctx.user_id().clone();
        let tables = self.ctx.tables();
        let stored = self.ctx.store.insert(&tables.conversations, Row::new()).await?;
        let id = stored
            .get(fixed::ID)
            .and_then(EntityId::from_value)
            .ok_or_else(|| SyncError::Internal("Conversation created without an id".into()))?;

        for user in [&me, peer] {
            if let Err(e) = self
                .ctx
                .store
                .insert(&tables.conversation_participants, participant_row(&id, user))
                .await
            {
                warn!(conversation_id = %id, error = %e, "Failed to add participant, removing conversation");
                let cleanup = Filter::new().eq(fixed::CONVERSATION_ID, id.to_value());
                if let Err(e) = self.ctx.store.delete(&tables.conversation_participants, &cleanup).await {
                    warn!(conversation_id = %id, error = %e, "Failed to remove participants");
                }
                let cleanup = Filter::new().eq(fixed::ID, id.to_value());
                if let Err(e) = self.ctx.store.delete(&tables.conversations, &cleanup).await {
                    warn!(conversation_id = %id, error = %e, "Failed to remove conversation");
                }
                return Err(e.into());
            }
        }

        info!(conversation_id = %id, peer = %peer, "Conversation created");
        Ok(Conversation {
            id,
            participants: [me, peer.clone()],
        })
    }

    /// Accept a message request, returning the conversation with its sender
    ///
    /// Accepting twice, or accepting when a conversation already exists,
    /// reuses that conversation.
    pub async fn accept_request(&self, notification_id: &EntityId) -> SyncResult<Conversation> {
        let (_, sender) = self.incoming_request(notification_id).await?;

        let conversation = match self.shared_conversation(&sender).await? {
            Some(id) => Conversation {
                id,
                participants: [self.ctx.user_id().clone(), sender.clone()],
            },
            None => self.create_conversation(&sender).await?,
        };

        // Close every open request between the two users, in both directions.
        let mut settled = vec![notification_id.clone()];
        match self.open_requests(&sender).await {
            Ok(open) => settled.extend(open.into_iter().map(|n| n.id)),
            Err(e) => warn!(error = %e, "Failed to look up other open requests"),
        }
        settled.sort();
        settled.dedup();
        self.ctx
            .store
            .update(
                &self.ctx.tables().notifications,
                &Filter::new().is_in(fixed::ID, settled.iter().map(EntityId::to_value)),
                read_patch(),
            )
            .await?;

        {
            let mut messages = self.messages.write();
            for id in &settled {
                messages.mark_notification_read(id);
            }
            messages.upsert_conversation(conversation.clone());
        }
        self.profiles.ensure(&sender).await;

        let mut metadata = Map::new();
        metadata.insert("sender_id".into(), self.ctx.user_id().to_value());
        metadata.insert("conversation_id".into(), conversation.id.to_value());
        self.ctx
            .notify(OutgoingNotification {
                recipient_id: sender.clone(),
                title: "Request accepted".to_string(),
                body: format!("{} accepted your message request", self.ctx.display_name()),
                metadata,
                kind: NotificationKind::Alert,
            })
            .await;

        info!(conversation_id = %conversation.id, sender = %sender, "Message request accepted");
        Ok(conversation)
    }

    /// Decline a message request; the sender may ask again later
    pub async fn decline_request(&self, notification_id: &EntityId) -> SyncResult<()> {
        let (request, sender) = self.incoming_request(notification_id).await?;
        self.ctx
            .store
            .update(
                &self.ctx.tables().notifications,
                &Filter::new().eq(fixed::ID, request.id.to_value()),
                read_patch(),
            )
            .await?;
        self.messages.write().mark_notification_read(&request.id);
        info!(sender = %sender, "Message request declined");
        Ok(())
    }
}
