//! Feed synchronization and social-graph interaction engine
//!
//! Keeps an optimistic local view of a social feed (posts, likes, threaded
//! comments) and of chat (community room, private conversations,
//! notifications) in step with a remote relational store and its realtime
//! change stream.

pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod feed;
pub mod guard;
pub mod logging;
pub mod memory;
pub mod messaging;
pub mod mutation;
pub mod ports;
pub mod realtime;
pub mod schema;
pub mod services;
pub mod session;
pub mod store;

pub use config::SyncConfig;
pub use context::{Ports, SyncContext};
pub use error::{SyncError, SyncResult};
pub use session::SocialSync;
