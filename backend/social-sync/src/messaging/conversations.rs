use super::{read_patch, Messenger, SendMessage};
use crate::domain::{ChatScope, Conversation, EntityId, Message, Profile};
use crate::error::{SyncError, SyncResult};
use crate::mutation::execute;
use crate::ports::{Filter, Row};
use crate::realtime::{MessageReducer, ScopeKey, ScopedSubscription};
use crate::schema::fixed;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

/// One row of the conversation list
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub peer: Option<Profile>,
    pub unread: u64,
}

/// Group participant rows into conversations; anything but a pair is skipped
fn pair_participants(rows: &[Row]) -> Vec<Conversation> {
    let mut members: BTreeMap<EntityId, Vec<EntityId>> = BTreeMap::new();
    for row in rows {
        let conversation = row.get(fixed::CONVERSATION_ID).and_then(EntityId::from_value);
        let user = row.get(fixed::USER_ID).and_then(EntityId::from_value);
        if let (Some(conversation), Some(user)) = (conversation, user) {
            let users = members.entry(conversation).or_default();
            if !users.contains(&user) {
                users.push(user);
            }
        }
    }

    members
        .into_iter()
        .filter_map(|(id, users)| match <[EntityId; 2]>::try_from(users) {
            Ok(participants) => Some(Conversation { id, participants }),
            Err(users) => {
                warn!(conversation_id = %id, participants = users.len(), "Skipping conversation that is not 1:1");
                None
            }
        })
        .collect()
}

fn conversation_ids(rows: &[Row]) -> Vec<Value> {
    let mut ids: Vec<EntityId> = rows
        .iter()
        .filter_map(|row| row.get(fixed::CONVERSATION_ID).and_then(EntityId::from_value))
        .collect();
    ids.sort();
    ids.dedup();
    ids.iter().map(EntityId::to_value).collect()
}

impl Messenger {
    /// 1:1 conversation between the current user and `peer`, if any
    ///
    /// Conversations with any other number of participants never count.
    pub(super) async fn shared_conversation(&self, peer: &EntityId) -> SyncResult<Option<EntityId>> {
        let table = self.ctx.tables().conversation_participants.clone();
        let mine = self
            .ctx
            .store
            .select(
                &table,
                &Filter::new().eq(fixed::USER_ID, self.ctx.user_id().to_value()),
                None,
                None,
            )
            .await?;
        let ids = conversation_ids(&mine);
        if ids.is_empty() {
            return Ok(None);
        }

        let members = self
            .ctx
            .store
            .select(&table, &Filter::new().is_in(fixed::CONVERSATION_ID, ids), None, None)
            .await?;
        Ok(pair_participants(&members)
            .into_iter()
            .filter(|conversation| conversation.includes(peer))
            .map(|conversation| conversation.id)
            .min())
    }

    /// Look a conversation up locally, then remotely; the current user must
    /// take part in it
    async fn member_conversation(&self, conversation_id: &EntityId) -> SyncResult<Conversation> {
        let cached = self.messages.read().conversation(conversation_id).cloned();
        let conversation = match cached {
            Some(conversation) => conversation,
            None => {
                let rows = self
                    .ctx
                    .store
                    .select(
                        &self.ctx.tables().conversation_participants,
                        &Filter::new().eq(fixed::CONVERSATION_ID, conversation_id.to_value()),
                        None,
                        None,
                    )
                    .await?;
                pair_participants(&rows)
                    .into_iter()
                    .next()
                    .ok_or_else(|| SyncError::NotFound(format!("conversation {conversation_id}")))?
            }
        };

        if !conversation.includes(self.ctx.user_id()) {
            return Err(SyncError::PermissionDenied(
                "You are not part of this conversation".to_string(),
            ));
        }
        self.messages.write().upsert_conversation(conversation.clone());
        Ok(conversation)
    }

    /// Conversations of the current user with their peer and unread count
    pub async fn list_conversations(&self) -> SyncResult<Vec<ConversationSummary>> {
        let me = self.ctx.user_id().clone();
        let participants = self.ctx.tables().conversation_participants.clone();

        let mine = self
            .ctx
            .store
            .select(&participants, &Filter::new().eq(fixed::USER_ID, me.to_value()), None, None)
            .await?;
        let ids = conversation_ids(&mine);
        if ids.is_empty() {
            self.messages.write().set_conversations(Vec::new(), HashMap::new());
            return Ok(Vec::new());
        }

        let rows = self
            .ctx
            .store
            .select(
                &participants,
                &Filter::new().is_in(fixed::CONVERSATION_ID, ids.clone()),
                None,
                None,
            )
            .await?;
        let conversations: Vec<Conversation> = pair_participants(&rows)
            .into_iter()
            .filter(|c| c.includes(&me))
            .collect();

        let unread_rows = self
            .ctx
            .store
            .select(
                &self.ctx.tables().private_messages,
                &Filter::new()
                    .is_in(fixed::CONVERSATION_ID, ids)
                    .eq(fixed::IS_READ, false)
                    .neq(fixed::SENDER_ID, me.to_value()),
                None,
                None,
            )
            .await;
        let mut unread: HashMap<EntityId, u64> = HashMap::new();
        match unread_rows {
            Ok(rows) => {
                for id in rows
                    .iter()
                    .filter_map(|row| row.get(fixed::CONVERSATION_ID).and_then(EntityId::from_value))
                {
                    *unread.entry(id).or_insert(0) += 1;
                }
            }
            Err(e) => warn!(error = %e, "Failed to count unread messages"),
        }

        let peers: Vec<EntityId> = conversations
            .iter()
            .filter_map(|c| c.peer_of(&me).cloned())
            .collect();
        self.profiles.fill_missing(&peers).await;

        let summaries = conversations
            .iter()
            .map(|conversation| ConversationSummary {
                peer: conversation
                    .peer_of(&me)
                    .and_then(|peer| self.profiles.get(peer)),
                unread: unread.get(&conversation.id).copied().unwrap_or(0),
                conversation: conversation.clone(),
            })
            .collect();
        self.messages.write().set_conversations(conversations, unread);
        Ok(summaries)
    }

    async fn load_conversation(&self, conversation_id: &EntityId) -> SyncResult<()> {
        let table = self.ctx.tables().private_messages.clone();
        let limit = self.ctx.config.feed.conversation_history;
        self.load_timeline(
            ChatScope::Conversation(conversation_id.clone()),
            &table,
            Filter::new().eq(fixed::CONVERSATION_ID, conversation_id.to_value()),
            limit,
        )
        .await
    }

    /// Load a conversation, mark the peer's messages read and follow it
    ///
    /// Opening another conversation replaces this subscription.
    pub async fn open_conversation(
        &self,
        conversation_id: &EntityId,
    ) -> SyncResult<ScopedSubscription<MessageReducer>> {
        self.member_conversation(conversation_id).await?;
        self.load_conversation(conversation_id).await?;

        let marked = self
            .ctx
            .store
            .update(
                &self.ctx.tables().private_messages,
                &Filter::new()
                    .eq(fixed::CONVERSATION_ID, conversation_id.to_value())
                    .eq(fixed::IS_READ, false)
                    .neq(fixed::SENDER_ID, self.ctx.user_id().to_value()),
                read_patch(),
            )
            .await;
        if let Err(e) = marked {
            warn!(conversation_id = %conversation_id, error = %e, "Failed to mark messages read");
        }
        self.messages.write().mark_conversation_read(conversation_id);

        self.realtime.open_conversation(conversation_id).await
    }

    pub async fn close_conversation(&self, conversation_id: &EntityId) -> SyncResult<()> {
        self.realtime
            .close(&ScopeKey::Conversation(conversation_id.clone()))
            .await?;
        self.messages
            .write()
            .close_timeline(&ChatScope::Conversation(conversation_id.clone()));
        Ok(())
    }

    /// Send a private message; the peer gets a notification once it is stored
    pub async fn send_private_message(
        &self,
        conversation_id: &EntityId,
        text: &str,
    ) -> SyncResult<Message> {
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(SyncError::validation("Write a message first"));
        }
        let conversation = self.member_conversation(conversation_id).await?;
        let peer = conversation.peer_of(self.ctx.user_id()).cloned();

        let scope = ChatScope::Conversation(conversation_id.clone());
        let open = self.messages.read().is_open(&scope);
        if !open {
            self.load_conversation(conversation_id).await?;
        }

        let mutation = SendMessage::new(&self.ctx, scope, text, peer);
        let message = execute(&self.ctx, &self.messages, mutation).await?;
        info!(conversation_id = %conversation_id, message_id = %message.id, "Private message sent");
        Ok(message)
    }
}
