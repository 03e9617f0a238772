use super::{Messenger, SendMessage};
use crate::domain::{ChatScope, Message};
use crate::error::{SyncError, SyncResult};
use crate::mutation::execute;
use crate::ports::Filter;
use crate::realtime::{MessageReducer, ScopeKey, ScopedSubscription};
use tracing::info;

impl Messenger {
    /// Load the newest community messages
    pub async fn load_community(&self) -> SyncResult<()> {
        let table = self.ctx.tables().community_messages.clone();
        let limit = self.ctx.config.feed.community_history;
        self.load_timeline(ChatScope::Community, &table, Filter::new(), limit)
            .await
    }

    /// Load the community room and follow it
    pub async fn open_community(&self) -> SyncResult<ScopedSubscription<MessageReducer>> {
        self.load_community().await?;
        self.realtime.open_community().await
    }

    pub async fn close_community(&self) -> SyncResult<()> {
        self.realtime.close(&ScopeKey::Community).await?;
        self.messages.write().close_timeline(&ChatScope::Community);
        Ok(())
    }

    /// Post to the community room
    pub async fn send_community_message(&self, text: &str) -> SyncResult<Message> {
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(SyncError::validation("Write a message first"));
        }
        let open = self.messages.read().is_open(&ChatScope::Community);
        if !open {
            self.load_community().await?;
        }

        let mutation = SendMessage::new(&self.ctx, ChatScope::Community, text, None);
        let message = execute(&self.ctx, &self.messages, mutation).await?;
        info!(message_id = %message.id, "Community message sent");
        Ok(message)
    }
}
