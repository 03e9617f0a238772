use crate::context::SyncContext;
use crate::domain::EntityId;
use crate::ports::{Filter, StoreResult};
use crate::schema::fixed::USER_ID;
use crate::store::LikeState;
use std::collections::HashMap;
use std::sync::Arc;

/// Batch aggregate reads for the feed window
///
/// Counts are recomputed from the like and comment rows on every full load;
/// between loads the stores adjust them incrementally.
#[derive(Clone)]
pub struct CounterService {
    ctx: Arc<SyncContext>,
}

impl CounterService {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    // ========== Like Aggregates ==========

    /// Like count and viewer membership for each target in `ids`
    ///
    /// `table` is a like table whose rows pair `target_column` with
    /// `user_id`. Targets without likes get a zero state.
    pub async fn batch_like_states(
        &self,
        table: &str,
        target_column: &str,
        ids: &[EntityId],
    ) -> StoreResult<HashMap<EntityId, LikeState>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let filter = Filter::new().is_in(target_column, ids.iter().map(EntityId::to_value));
        let rows = self.ctx.store.select(table, &filter, None, None).await?;

        let viewer = self.ctx.user_id();
        let mut counts: HashMap<EntityId, (u64, bool)> =
            ids.iter().map(|id| (id.clone(), (0, false))).collect();
        for row in &rows {
            let Some(target) = row.get(target_column).and_then(EntityId::from_value) else {
                continue;
            };
            let entry = counts.entry(target).or_insert((0, false));
            entry.0 += 1;
            if row.get(USER_ID).and_then(EntityId::from_value).as_ref() == Some(viewer) {
                entry.1 = true;
            }
        }

        Ok(counts
            .into_iter()
            .map(|(id, (count, liked))| (id, LikeState::new(count, liked)))
            .collect())
    }

    // ========== Comment Aggregates ==========

    /// Comment count per post, read from the comments table
    pub async fn batch_comment_counts(
        &self,
        post_ids: &[EntityId],
    ) -> StoreResult<HashMap<EntityId, u64>> {
        if post_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let columns = self.ctx.schema.comments().unwrap_or_default();
        let post_key = columns.post_key().to_string();
        let filter = Filter::new().is_in(post_key.as_str(), post_ids.iter().map(EntityId::to_value));
        let rows = self
            .ctx
            .store
            .select(&self.ctx.tables().comments, &filter, None, None)
            .await?;

        // The first full comment load may not have happened yet.
        let columns = match columns.post {
            Some(_) => columns,
            None => self.ctx.schema.detect_comments(rows.first()),
        };

        let mut counts: HashMap<EntityId, u64> =
            post_ids.iter().map(|id| (id.clone(), 0)).collect();
        for row in &rows {
            if let Some(post_id) = columns.map(row).post_id {
                *counts.entry(post_id).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}
