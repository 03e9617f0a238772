//! Optimistic mutation lifecycle
//!
//! Every user action runs through [`execute`]:
//!
//! ```text
//! Pending (apply) ──commit ok──▶ Confirmed (confirm, then after_confirm)
//!        │
//!        └──commit err─▶ RolledBack (rollback, error returned)
//! ```
//!
//! `apply`, `confirm` and `rollback` run under the store's write lock and
//! must not block; `commit` and `after_confirm` run with no lock held.

use crate::context::SyncContext;
use crate::domain::EntityId;
use crate::error::SyncResult;
use crate::store::Shared;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationPhase {
    Pending,
    Confirmed,
    RolledBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    CreatePost,
    DeletePost,
    TogglePostLike,
    SendComment,
    DeleteComment,
    ToggleCommentLike,
    SendCommunityMessage,
    SendPrivateMessage,
}

impl MutationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MutationKind::CreatePost => "create_post",
            MutationKind::DeletePost => "delete_post",
            MutationKind::TogglePostLike => "toggle_post_like",
            MutationKind::SendComment => "send_comment",
            MutationKind::DeleteComment => "delete_comment",
            MutationKind::ToggleCommentLike => "toggle_comment_like",
            MutationKind::SendCommunityMessage => "send_community_message",
            MutationKind::SendPrivateMessage => "send_private_message",
        }
    }
}

/// One phase transition of one mutation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleEvent {
    pub mutation_id: Uuid,
    pub kind: MutationKind,
    pub phase: MutationPhase,
    /// Entity the mutation targets; the temporary id while pending
    pub entity_id: Option<EntityId>,
    /// User-facing message of a rolled back mutation
    pub error: Option<String>,
}

/// A mutation with an optimistic local step
#[async_trait]
pub trait OptimisticMutation: Send + Sync {
    /// Store the local steps operate on
    type State: Send + Sync;
    /// What the remote write returns
    type Committed: Send;
    /// What the caller gets back
    type Output: Send + Sync;

    fn kind(&self) -> MutationKind;

    fn entity_id(&self) -> Option<EntityId> {
        None
    }

    /// Optimistic step, visible immediately
    fn apply(&mut self, state: &mut Self::State);

    /// Remote write
    async fn commit(&self, ctx: &SyncContext) -> SyncResult<Self::Committed>;

    /// Reconcile the optimistic step with the server's answer
    fn confirm(&mut self, state: &mut Self::State, committed: Self::Committed) -> Self::Output;

    /// Exact inverse of `apply`
    fn rollback(&mut self, state: &mut Self::State);

    /// Side effects of a confirmed mutation; never fails the mutation
    async fn after_confirm(&self, _ctx: &SyncContext, _output: &Self::Output) {}
}

/// Drive `mutation` through its lifecycle against `state`
pub async fn execute<M>(
    ctx: &SyncContext,
    state: &Shared<M::State>,
    mut mutation: M,
) -> SyncResult<M::Output>
where
    M: OptimisticMutation,
{
    let mutation_id = Uuid::new_v4();
    let kind = mutation.kind();

    {
        let mut guard = state.write();
        mutation.apply(&mut guard);
    }
    ctx.publish(LifecycleEvent {
        mutation_id,
        kind,
        phase: MutationPhase::Pending,
        entity_id: mutation.entity_id(),
        error: None,
    });

    match mutation.commit(ctx).await {
        Ok(committed) => {
            let output = {
                let mut guard = state.write();
                mutation.confirm(&mut guard, committed)
            };
            let entity_id = mutation.entity_id();
            info!(
                mutation_id = %mutation_id,
                kind = kind.as_str(),
                entity_id = ?entity_id.as_ref().map(EntityId::as_str),
                "Mutation confirmed"
            );
            ctx.publish(LifecycleEvent {
                mutation_id,
                kind,
                phase: MutationPhase::Confirmed,
                entity_id,
                error: None,
            });
            mutation.after_confirm(ctx, &output).await;
            Ok(output)
        }
        Err(e) => {
            {
                let mut guard = state.write();
                mutation.rollback(&mut guard);
            }
            warn!(
                mutation_id = %mutation_id,
                kind = kind.as_str(),
                error = %e,
                "Mutation rolled back"
            );
            ctx.publish(LifecycleEvent {
                mutation_id,
                kind,
                phase: MutationPhase::RolledBack,
                entity_id: mutation.entity_id(),
                error: Some(e.user_message()),
            });
            Err(e)
        }
    }
}
