use super::{read_patch, Messenger};
use crate::domain::{EntityId, Notification};
use crate::error::{SyncError, SyncResult};
use crate::ports::{Filter, Order};
use crate::realtime::{NotificationReducer, ScopedSubscription};
use crate::schema::fixed::{self, notification_from_row};
use tracing::debug;

impl Messenger {
    /// Newest notifications addressed to the current user
    pub async fn load_notifications(&self) -> SyncResult<Vec<Notification>> {
        let rows = self
            .ctx
            .store
            .select(
                &self.ctx.tables().notifications,
                &Filter::new().eq(fixed::RECIPIENT_ID, self.ctx.user_id().to_value()),
                Some(&Order::desc(fixed::CREATED_AT)),
                Some(self.ctx.config.feed.notification_limit),
            )
            .await?;
        let notifications: Vec<Notification> =
            rows.iter().filter_map(notification_from_row).collect();
        debug!(count = notifications.len(), "Notifications loaded");
        self.messages
            .write()
            .set_notifications(notifications.clone());
        Ok(notifications)
    }

    /// Load notifications and follow new ones
    pub async fn open_notifications(&self) -> SyncResult<ScopedSubscription<NotificationReducer>> {
        self.load_notifications().await?;
        self.realtime.open_notifications().await
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.messages.read().notifications().to_vec()
    }

    pub fn unread_notification_count(&self) -> usize {
        self.messages.read().unread_notification_count()
    }

    pub async fn mark_notification_read(&self, notification_id: &EntityId) -> SyncResult<()> {
        let known = self.messages.read().notification(notification_id).is_some();
        if !known {
            return Err(SyncError::NotFound(format!("notification {notification_id}")));
        }
        self.ctx
            .store
            .update(
                &self.ctx.tables().notifications,
                &Filter::new()
                    .eq(fixed::ID, notification_id.to_value())
                    .eq(fixed::RECIPIENT_ID, self.ctx.user_id().to_value()),
                read_patch(),
            )
            .await?;
        self.messages.write().mark_notification_read(notification_id);
        Ok(())
    }

    pub async fn mark_all_notifications_read(&self) -> SyncResult<()> {
        self.ctx
            .store
            .update(
                &self.ctx.tables().notifications,
                &Filter::new()
                    .eq(fixed::RECIPIENT_ID, self.ctx.user_id().to_value())
                    .eq(fixed::IS_READ, false),
                read_patch(),
            )
            .await?;
        self.messages.write().mark_all_notifications_read();
        Ok(())
    }
}
