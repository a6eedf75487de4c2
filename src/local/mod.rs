//! Local Fallback Mode: single-user timing with no Sync Server.

pub mod storage;
pub mod timer;

pub use storage::LocalStorage;
pub use timer::{LocalTimer, START_KEY};
