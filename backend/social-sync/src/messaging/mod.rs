//! Messaging engine: community room, private conversations, notifications
//! and the connection-request handshake
//!
//! Sending uses the same optimistic lifecycle as the feed; pushed messages
//! are merged by [`crate::realtime::MessageReducer`].

mod community;
mod conversations;
mod handshake;
mod notifications;

pub use conversations::ConversationSummary;
pub use handshake::{ConnectionStatus, RequestDirection};

use crate::context::SyncContext;
use crate::domain::{ChatScope, EntityId, Message, NotificationKind, OutgoingNotification};
use crate::error::SyncResult;
use crate::mutation::{MutationKind, OptimisticMutation};
use crate::ports::{Filter, Order, Row};
use crate::realtime::Reconciler;
use crate::schema::fixed::{self, message_from_row};
use crate::services::ProfileDirectory;
use crate::store::{view, MessageStore, MessageView, Shared};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

const SNIPPET_CHARS: usize = 80;

fn read_patch() -> Row {
    Row::from_iter([(fixed::IS_READ.to_string(), Value::Bool(true))])
}

pub struct Messenger {
    ctx: Arc<SyncContext>,
    messages: Shared<MessageStore>,
    profiles: ProfileDirectory,
    realtime: Arc<Reconciler>,
}

impl Messenger {
    pub fn new(
        ctx: Arc<SyncContext>,
        messages: Shared<MessageStore>,
        profiles: ProfileDirectory,
        realtime: Arc<Reconciler>,
    ) -> Self {
        Self {
            ctx,
            messages,
            profiles,
            realtime,
        }
    }

    pub fn store(&self) -> Shared<MessageStore> {
        self.messages.clone()
    }

    pub fn message_views(&self, scope: &ChatScope) -> Option<Vec<MessageView>> {
        let messages = self.messages.read();
        let book = self.profiles.book();
        let book = book.read();
        view::message_views(&messages, &book, self.ctx.user_id(), scope)
    }

    /// Message shown in place of a timeline that failed to load
    pub fn load_error(&self, scope: &ChatScope) -> Option<String> {
        self.messages.read().load_error(scope).map(str::to_string)
    }

    /// Load the newest `limit` messages of `scope`, oldest-first
    async fn load_timeline(
        &self,
        scope: ChatScope,
        table: &str,
        filter: Filter,
        limit: usize,
    ) -> SyncResult<()> {
        let rows = match self
            .ctx
            .store
            .select(table, &filter, Some(&Order::desc(fixed::CREATED_AT)), Some(limit))
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(scope = ?scope, error = %e, "Failed to load messages");
                self.messages
                    .write()
                    .set_load_error(scope, e.message.clone());
                return Err(e.into());
            }
        };

        let community = scope == ChatScope::Community;
        let mut messages: Vec<Message> = rows
            .iter()
            .filter_map(|row| message_from_row(row, community))
            .filter(|m| m.scope == scope)
            .collect();
        messages.reverse();

        let senders: Vec<EntityId> = messages.iter().filter_map(|m| m.sender_id.clone()).collect();
        self.profiles.fill_missing(&senders).await;

        debug!(scope = ?scope, messages = messages.len(), "Messages loaded");
        self.messages.write().open_timeline(scope, messages);
        Ok(())
    }
}

/// Send a chat message; `peer` is notified once it is stored
struct SendMessage {
    temp_id: EntityId,
    message: Message,
    table: String,
    row: Row,
    peer: Option<EntityId>,
}

impl SendMessage {
    fn new(ctx: &SyncContext, scope: ChatScope, text: String, peer: Option<EntityId>) -> Self {
        let sender = ctx.user_id().clone();
        let table = match scope {
            ChatScope::Community => ctx.tables().community_messages.clone(),
            ChatScope::Conversation(_) => ctx.tables().private_messages.clone(),
        };
        let temp_id = EntityId::temporary();
        Self {
            row: fixed::message_row(&scope, &sender, &text),
            message: Message {
                id: temp_id.clone(),
                is_read: true,
                sender_id: Some(sender),
                created_at: Some(chrono::Utc::now()),
                pending: true,
                scope,
                text,
            },
            temp_id,
            table,
            peer,
        }
    }
}

#[async_trait]
impl OptimisticMutation for SendMessage {
    type State = MessageStore;
    type Committed = Row;
    type Output = Message;

    fn kind(&self) -> MutationKind {
        match self.message.scope {
            ChatScope::Community => MutationKind::SendCommunityMessage,
            ChatScope::Conversation(_) => MutationKind::SendPrivateMessage,
        }
    }

    fn entity_id(&self) -> Option<EntityId> {
        Some(self.message.id.clone())
    }

    fn apply(&mut self, messages: &mut MessageStore) {
        messages.append(self.message.clone());
    }

    async fn commit(&self, ctx: &SyncContext) -> SyncResult<Row> {
        Ok(ctx.store.insert(&self.table, self.row.clone()).await?)
    }

    fn confirm(&mut self, messages: &mut MessageStore, row: Row) -> Message {
        let community = self.message.scope == ChatScope::Community;
        let mut confirmed = match message_from_row(&row, community) {
            Some(message) => message,
            None => {
                warn!(temp_id = %self.temp_id, "Sent message came back without an id");
                self.message.clone()
            }
        };
        confirmed.scope = self.message.scope.clone();
        confirmed.sender_id = confirmed.sender_id.or_else(|| self.message.sender_id.clone());
        confirmed.created_at = confirmed.created_at.or(self.message.created_at);
        if confirmed.text.is_empty() {
            confirmed.text = self.message.text.clone();
        }
        // The sender has read their own message.
        confirmed.is_read = true;
        confirmed.pending = false;

        messages.confirm_message(&self.temp_id, confirmed.clone());
        self.message = confirmed.clone();
        confirmed
    }

    fn rollback(&mut self, messages: &mut MessageStore) {
        messages.remove_message(&self.message.scope, &self.temp_id);
    }

    async fn after_confirm(&self, ctx: &SyncContext, message: &Message) {
        let (Some(peer), ChatScope::Conversation(conversation_id)) = (&self.peer, &message.scope)
        else {
            return;
        };
        let snippet: String = message.text.chars().take(SNIPPET_CHARS).collect();
        let mut metadata = Map::new();
        metadata.insert("sender_id".into(), ctx.user_id().to_value());
        metadata.insert("conversation_id".into(), conversation_id.to_value());
        ctx.notify(OutgoingNotification {
            recipient_id: peer.clone(),
            title: "New message".to_string(),
            body: format!("{}: {}", ctx.display_name(), snippet),
            metadata,
            kind: NotificationKind::Alert,
        })
        .await;
    }
}
