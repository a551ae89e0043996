//! Storage layer for a sensor hub: nodes register, push temperature/humidity
//! readings, and are queried for their current reading, history and liveness.

pub mod models {
    pub mod node;
    pub mod reading;
}

pub mod config;
pub mod db {
    pub mod models;
}
pub mod error;
pub mod liveness;
pub mod reading_log;
pub mod registry;
pub mod schema;
pub mod storage;
pub mod store;
pub mod utils;
pub mod services {
    pub mod compaction;
    pub mod seed;
}

pub use config::Config;
pub use error::{Error, Result};
pub use models::node::{Node, NodeFields, NodeStatus};
pub use models::reading::{HistoryEntry, Reading, StoredReading};
pub use storage::Storage;
