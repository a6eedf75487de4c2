pub mod agent;
pub mod ticker;

pub use agent::SyncAgent;
pub use ticker::{spawn_ticker, TickerHandle, TICK_INTERVAL};
