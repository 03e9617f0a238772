use super::feed::Upsert;
use crate::domain::{ChatScope, Conversation, EntityId, Message, Notification};
use std::collections::HashMap;

/// Client-side cache of chat timelines, conversations and notifications
///
/// A timeline exists only while its scope is open; messages for a closed
/// scope are ignored. Timelines are oldest-first and append at the tail.
#[derive(Debug)]
pub struct MessageStore {
    community_window: usize,
    timelines: HashMap<ChatScope, Vec<Message>>,
    load_errors: HashMap<ChatScope, String>,
    conversations: HashMap<EntityId, Conversation>,
    unread: HashMap<EntityId, u64>,
    notifications: Vec<Notification>,
}

impl MessageStore {
    pub fn new(community_window: usize) -> Self {
        Self {
            community_window: community_window.max(1),
            timelines: HashMap::new(),
            load_errors: HashMap::new(),
            conversations: HashMap::new(),
            unread: HashMap::new(),
            notifications: Vec::new(),
        }
    }

    // ========== Timelines ==========

    /// Install a loaded timeline, keeping optimistic messages still pending
    pub fn open_timeline(&mut self, scope: ChatScope, mut messages: Vec<Message>) {
        if let Some(previous) = self.timelines.remove(&scope) {
            messages.extend(previous.into_iter().filter(|m| m.pending));
        }
        self.load_errors.remove(&scope);
        self.timelines.insert(scope.clone(), messages);
        self.trim(&scope);
    }

    pub fn close_timeline(&mut self, scope: &ChatScope) {
        self.timelines.remove(scope);
        self.load_errors.remove(scope);
    }

    pub fn is_open(&self, scope: &ChatScope) -> bool {
        self.timelines.contains_key(scope)
    }

    pub fn timeline(&self, scope: &ChatScope) -> Option<&[Message]> {
        self.timelines.get(scope).map(Vec::as_slice)
    }

    pub fn set_load_error(&mut self, scope: ChatScope, message: impl Into<String>) {
        self.load_errors.insert(scope, message.into());
    }

    pub fn load_error(&self, scope: &ChatScope) -> Option<&str> {
        self.load_errors.get(scope).map(String::as_str)
    }

    pub fn contains_message(&self, scope: &ChatScope, id: &EntityId) -> bool {
        self.timelines
            .get(scope)
            .is_some_and(|t| t.iter().any(|m| &m.id == id))
    }

    /// Append at the tail (or replace by id) in the message's scope
    pub fn append(&mut self, message: Message) -> Upsert {
        let scope = message.scope.clone();
        let Some(timeline) = self.timelines.get_mut(&scope) else {
            return Upsert::Ignored;
        };
        if let Some(existing) = timeline.iter_mut().find(|m| m.id == message.id) {
            *existing = message;
            return Upsert::Replaced;
        }
        timeline.push(message);
        self.trim(&scope);
        Upsert::Inserted
    }

    fn trim(&mut self, scope: &ChatScope) {
        if *scope != ChatScope::Community {
            return;
        }
        let window = self.community_window;
        if let Some(timeline) = self.timelines.get_mut(scope) {
            while timeline.len() > window {
                let Some(index) = timeline.iter().position(|m| !m.pending) else {
                    break;
                };
                timeline.remove(index);
            }
        }
    }

    pub fn remove_message(&mut self, scope: &ChatScope, id: &EntityId) -> Option<Message> {
        let timeline = self.timelines.get_mut(scope)?;
        let index = timeline.iter().position(|m| &m.id == id)?;
        Some(timeline.remove(index))
    }

    /// Swap an optimistic message for its confirmed row, keeping its slot
    pub fn confirm_message(&mut self, temp_id: &EntityId, confirmed: Message) {
        let scope = confirmed.scope.clone();
        if confirmed.id != *temp_id && self.contains_message(&scope, &confirmed.id) {
            self.remove_message(&scope, temp_id);
            return;
        }
        match self
            .timelines
            .get_mut(&scope)
            .and_then(|t| t.iter_mut().find(|m| &m.id == temp_id))
        {
            Some(entry) => *entry = confirmed,
            None => {
                self.append(confirmed);
            }
        }
    }

    /// Oldest pending message by `sender` in `scope`, preferring one with
    /// the same text
    pub fn pending_message_for(
        &self,
        scope: &ChatScope,
        sender: &EntityId,
        text: &str,
    ) -> Option<EntityId> {
        let timeline = self.timelines.get(scope)?;
        let mine: Vec<&Message> = timeline
            .iter()
            .filter(|m| m.pending && m.id.is_temporary() && m.sender_id.as_ref() == Some(sender))
            .collect();
        mine.iter()
            .find(|m| m.text == text)
            .or_else(|| mine.first())
            .map(|m| m.id.clone())
    }

    // ========== Conversations ==========

    pub fn set_conversations(
        &mut self,
        conversations: Vec<Conversation>,
        unread: HashMap<EntityId, u64>,
    ) {
        self.conversations = conversations
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();
        self.unread = unread;
    }

    pub fn upsert_conversation(&mut self, conversation: Conversation) {
        self.conversations
            .insert(conversation.id.clone(), conversation);
    }

    pub fn conversation(&self, id: &EntityId) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    pub fn conversations(&self) -> impl Iterator<Item = &Conversation> {
        self.conversations.values()
    }

    pub fn unread_count(&self, conversation_id: &EntityId) -> u64 {
        self.unread.get(conversation_id).copied().unwrap_or(0)
    }

    /// Mark every loaded message of the conversation read and zero its
    /// unread counter
    pub fn mark_conversation_read(&mut self, conversation_id: &EntityId) {
        let scope = ChatScope::Conversation(conversation_id.clone());
        if let Some(timeline) = self.timelines.get_mut(&scope) {
            for message in timeline.iter_mut() {
                message.is_read = true;
            }
        }
        self.unread.insert(conversation_id.clone(), 0);
    }

    // ========== Notifications ==========

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn set_notifications(&mut self, notifications: Vec<Notification>) {
        self.notifications = notifications;
    }

    pub fn notification(&self, id: &EntityId) -> Option<&Notification> {
        self.notifications.iter().find(|n| &n.id == id)
    }

    /// New notifications go on top; known ids are replaced in place
    pub fn upsert_notification(&mut self, notification: Notification) -> Upsert {
        if let Some(existing) = self
            .notifications
            .iter_mut()
            .find(|n| n.id == notification.id)
        {
            *existing = notification;
            return Upsert::Replaced;
        }
        self.notifications.insert(0, notification);
        Upsert::Inserted
    }

    /// Returns whether the notification was unread
    pub fn mark_notification_read(&mut self, id: &EntityId) -> bool {
        match self.notifications.iter_mut().find(|n| &n.id == id) {
            Some(n) if !n.is_read => {
                n.is_read = true;
                true
            }
            _ => false,
        }
    }

    pub fn mark_all_notifications_read(&mut self) {
        for notification in &mut self.notifications {
            notification.is_read = true;
        }
    }

    pub fn unread_notification_count(&self) -> usize {
        self.notifications.iter().filter(|n| !n.is_read).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NotificationKind;

    fn message(id: &str, scope: ChatScope, pending: bool) -> Message {
        Message {
            id: EntityId::from(id),
            scope,
            sender_id: Some(EntityId::from("u1")),
            text: format!("message {id}"),
            created_at: None,
            is_read: false,
            pending,
        }
    }

    #[test]
    fn closed_scope_ignores_messages() {
        let mut store = MessageStore::new(10);
        assert_eq!(
            store.append(message("1", ChatScope::Community, false)),
            Upsert::Ignored
        );
        store.open_timeline(ChatScope::Community, vec![]);
        assert_eq!(
            store.append(message("1", ChatScope::Community, false)),
            Upsert::Inserted
        );
        assert_eq!(
            store.append(message("1", ChatScope::Community, false)),
            Upsert::Replaced
        );
    }

    #[test]
    fn community_window_drops_oldest() {
        let mut store = MessageStore::new(2);
        store.open_timeline(ChatScope::Community, vec![]);
        for id in ["1", "2", "3"] {
            store.append(message(id, ChatScope::Community, false));
        }
        let ids: Vec<&str> = store
            .timeline(&ChatScope::Community)
            .unwrap()
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(ids, vec!["2", "3"]);
    }

    #[test]
    fn confirm_keeps_slot() {
        let scope = ChatScope::Conversation(EntityId::from("c1"));
        let mut store = MessageStore::new(10);
        store.open_timeline(scope.clone(), vec![message("1", scope.clone(), false)]);
        let temp = EntityId::temporary();
        let mut optimistic = message("x", scope.clone(), true);
        optimistic.id = temp.clone();
        store.append(optimistic);
        store.append(message("2", scope.clone(), false));

        assert_eq!(
            store.pending_message_for(&scope, &EntityId::from("u1"), "anything"),
            Some(temp.clone())
        );
        store.confirm_message(&temp, message("9", scope.clone(), false));

        let ids: Vec<&str> = store
            .timeline(&scope)
            .unwrap()
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(ids, vec!["1", "9", "2"]);
    }

    #[test]
    fn notification_read_state() {
        let mut store = MessageStore::new(10);
        store.upsert_notification(Notification {
            id: EntityId::from("n1"),
            recipient_id: EntityId::from("u1"),
            title: "Message request".into(),
            body: String::new(),
            metadata: Default::default(),
            kind: NotificationKind::MessageRequest,
            is_read: false,
            created_at: None,
        });
        assert_eq!(store.unread_notification_count(), 1);
        assert!(store.mark_notification_read(&EntityId::from("n1")));
        assert!(!store.mark_notification_read(&EntityId::from("n1")));
        assert_eq!(store.unread_notification_count(), 0);
    }
}
