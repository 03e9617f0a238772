//! Wiring of one signed-in session

use crate::config::SyncConfig;
use crate::context::{Ports, SyncContext};
use crate::error::SyncResult;
use crate::feed::FeedEngine;
use crate::messaging::Messenger;
use crate::mutation::LifecycleEvent;
use crate::realtime::Reconciler;
use crate::services::ProfileDirectory;
use crate::store::{shared, FeedStore, MessageStore};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// Feed, messaging and realtime engines sharing one context and one set of
/// stores
pub struct SocialSync {
    ctx: Arc<SyncContext>,
    feed: FeedEngine,
    messenger: Messenger,
    profiles: ProfileDirectory,
    realtime: Arc<Reconciler>,
}

impl SocialSync {
    /// Resolve the signed-in user and build the engines
    pub async fn connect(ports: Ports, config: SyncConfig) -> SyncResult<Self> {
        let window = config.feed.window_size;
        let community_window = config.feed.community_history;
        let ctx = SyncContext::connect(ports, config).await?;

        let feed = shared(FeedStore::new(window));
        let messages = shared(MessageStore::new(community_window));
        let profiles = ProfileDirectory::new(ctx.clone());
        let realtime = Arc::new(Reconciler::new(
            ctx.clone(),
            feed.clone(),
            messages.clone(),
            profiles.clone(),
        ));

        Ok(Self {
            feed: FeedEngine::new(ctx.clone(), feed, profiles.clone(), realtime.clone()),
            messenger: Messenger::new(ctx.clone(), messages, profiles.clone(), realtime.clone()),
            ctx,
            profiles,
            realtime,
        })
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.ctx
    }

    pub fn feed(&self) -> &FeedEngine {
        &self.feed
    }

    pub fn messenger(&self) -> &Messenger {
        &self.messenger
    }

    pub fn profiles(&self) -> &ProfileDirectory {
        &self.profiles
    }

    pub fn realtime(&self) -> &Reconciler {
        &self.realtime
    }

    /// Mutation lifecycle transitions, for toasts
    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.ctx.subscribe_lifecycle()
    }

    /// Close every realtime scope
    pub async fn shutdown(&self) {
        self.realtime.close_all().await;
        info!(user_id = %self.ctx.user_id(), "Sync session closed");
    }
}
