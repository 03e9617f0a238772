pub mod id;
pub mod models;

pub use id::{value_key, EntityId};
pub use models::*;
