use crate::context::SyncContext;
use crate::domain::{EntityId, MediaFile, Profile};
use crate::error::{SyncError, SyncResult};
use crate::ports::{Filter, Row};
use crate::store::{shared, ProfileBook, Shared};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Profile lookup shared by the feed and messaging engines
#[derive(Clone)]
pub struct ProfileDirectory {
    ctx: Arc<SyncContext>,
    book: Shared<ProfileBook>,
}

impl ProfileDirectory {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        let mut book = ProfileBook::new();
        if let Some(profile) = ctx.user.profile.clone() {
            book.insert(profile);
        }
        Self {
            ctx,
            book: shared(book),
        }
    }

    pub fn book(&self) -> Shared<ProfileBook> {
        self.book.clone()
    }

    pub fn get(&self, id: &EntityId) -> Option<Profile> {
        self.book.read().get(id).cloned()
    }

    /// Batch load the profiles of `ids`, replacing cached entries
    pub async fn refresh(&self, ids: &[EntityId]) -> SyncResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let columns = self.ctx.schema.profiles().unwrap_or_default();
        let filter = Filter::new().is_in(columns.id_key(), ids.iter().map(EntityId::to_value));
        let rows = self
            .ctx
            .store
            .select(&self.ctx.tables().profiles, &filter, None, None)
            .await?;

        let columns = self.ctx.schema.detect_profiles(rows.first());
        let profiles: Vec<Profile> = rows.iter().filter_map(|row| columns.map(row)).collect();
        let loaded = profiles.len();
        self.book.write().extend(profiles);

        debug!(requested = ids.len(), loaded, "Profiles refreshed");
        Ok(loaded)
    }

    /// Load profiles not cached yet; a failed lookup only leaves the
    /// authors without a name
    pub async fn fill_missing(&self, ids: &[EntityId]) {
        let missing = self.book.read().missing(ids.iter());
        if let Err(e) = self.refresh(&missing).await {
            warn!(count = missing.len(), error = %e, "Failed to load profiles");
        }
    }

    /// Profile of `id`, looked up remotely when not cached
    pub async fn ensure(&self, id: &EntityId) -> Option<Profile> {
        if let Some(profile) = self.get(id) {
            return Some(profile);
        }
        self.fill_missing(std::slice::from_ref(id)).await;
        self.get(id)
    }

    /// Upload a new avatar for the current user and point the profile at it
    pub async fn update_avatar(&self, file: MediaFile) -> SyncResult<String> {
        if file.bytes.is_empty() {
            return Err(SyncError::validation("Choose an image first"));
        }
        let user_id = self.ctx.user_id().clone();
        let path = format!("{}/{}-{}", user_id, Uuid::new_v4(), file.file_name);
        let url = self
            .ctx
            .media
            .upload(&self.ctx.config.media.avatar_bucket, &path, file)
            .await
            .map_err(SyncError::Upload)?;

        let columns = self.ctx.schema.profiles().unwrap_or_default();
        let mut patch = Row::new();
        patch.insert(columns.avatar_key().to_string(), Value::String(url.clone()));
        self.ctx
            .store
            .update(
                &self.ctx.tables().profiles,
                &Filter::new().eq(columns.id_key(), user_id.to_value()),
                patch,
            )
            .await?;

        {
            let mut book = self.book.write();
            let mut profile = book
                .get(&user_id)
                .cloned()
                .unwrap_or_else(|| Profile::new(user_id.clone()));
            profile.avatar_url = Some(url.clone());
            book.insert(profile);
        }

        info!(user_id = %user_id, "Avatar updated");
        Ok(url)
    }
}
