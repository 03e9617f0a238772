//! Entity stores
//!
//! Plain in-memory state with no I/O. Engines share each store as
//! [`Shared`] and only hold the lock between suspension points.

mod feed;
mod likes;
mod messages;
mod profiles;
pub mod view;

pub use feed::{Capability, FeedStatus, FeedStore, RemovedComment, RemovedPost, Upsert};
pub use likes::LikeState;
pub use messages::MessageStore;
pub use profiles::ProfileBook;
pub use view::{CommentView, MessageView, PostView};

use parking_lot::RwLock;
use std::sync::Arc;

pub type Shared<S> = Arc<RwLock<S>>;

pub fn shared<S>(state: S) -> Shared<S> {
    Arc::new(RwLock::new(state))
}
