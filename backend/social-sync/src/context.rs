//! Session context passed to every engine
//!
//! Holds the signed-in user, the collaborator ports and the per-session
//! caches. Engines receive an `Arc<SyncContext>` at construction instead of
//! reading session state from globals.

use crate::config::{SyncConfig, TableNames};
use crate::domain::{CurrentUser, EntityId, OutgoingNotification};
use crate::error::{SyncError, SyncResult};
use crate::mutation::LifecycleEvent;
use crate::ports::{
    AuthProvider, MediaUploader, NotificationSender, RealtimeChannel, RelationalStore,
};
use crate::schema::SchemaCache;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// The external collaborators
#[derive(Clone)]
pub struct Ports {
    pub auth: Arc<dyn AuthProvider>,
    pub store: Arc<dyn RelationalStore>,
    pub realtime: Arc<dyn RealtimeChannel>,
    pub media: Arc<dyn MediaUploader>,
    pub notifier: Arc<dyn NotificationSender>,
}

pub struct SyncContext {
    pub user: CurrentUser,
    pub store: Arc<dyn RelationalStore>,
    pub realtime: Arc<dyn RealtimeChannel>,
    pub media: Arc<dyn MediaUploader>,
    pub notifier: Arc<dyn NotificationSender>,
    pub config: SyncConfig,
    pub schema: SchemaCache,
    lifecycle: broadcast::Sender<LifecycleEvent>,
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("user", &self.user.id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SyncContext {
    /// Resolve the current user and build the context
    ///
    /// Fails with [`SyncError::NotAuthenticated`] when nobody is signed in;
    /// no engine can be built without a user.
    pub async fn connect(ports: Ports, config: SyncConfig) -> SyncResult<Arc<Self>> {
        let user = ports
            .auth
            .current_user()
            .await?
            .ok_or(SyncError::NotAuthenticated)?;

        info!(user_id = %user.id, "Sync session started");

        let (lifecycle, _) = broadcast::channel(config.realtime.lifecycle_capacity.max(1));
        Ok(Arc::new(Self {
            user,
            store: ports.store,
            realtime: ports.realtime,
            media: ports.media,
            notifier: ports.notifier,
            config,
            schema: SchemaCache::new(),
            lifecycle,
        }))
    }

    pub fn user_id(&self) -> &EntityId {
        &self.user.id
    }

    /// Name shown to other users in notification texts
    pub fn display_name(&self) -> String {
        self.user
            .profile
            .as_ref()
            .and_then(|p| p.display_name.clone())
            .unwrap_or_else(|| "Someone".to_string())
    }

    pub fn tables(&self) -> &TableNames {
        &self.config.tables
    }

    /// Receive mutation lifecycle events from now on
    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe()
    }

    pub(crate) fn publish(&self, event: LifecycleEvent) {
        // No receivers is fine; nobody is showing toasts.
        if self.lifecycle.send(event).is_err() {
            debug!("No lifecycle listeners");
        }
    }

    /// Fire-and-forget notification; failures are logged and dropped
    pub async fn notify(&self, notification: OutgoingNotification) {
        let recipient = notification.recipient_id.clone();
        let kind = notification.kind;
        match self.notifier.send(notification).await {
            Ok(()) => debug!(recipient_id = %recipient, kind = kind.as_str(), "Notification sent"),
            Err(e) => warn!(
                recipient_id = %recipient,
                kind = kind.as_str(),
                error = %e,
                "Failed to send notification"
            ),
        }
    }
}
