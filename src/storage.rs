//! Storage service: the node registry and the reading log behind one handle
//! with an explicit open/close lifecycle.
//!
//! Submitting a reading touches both stores in order: the node's current
//! reading first, then its log. There is no transaction spanning the two; a
//! failure in the second step is reported as [`Error::PartialWrite`].

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::node::{Node, NodeFields, NodeStatus};
use crate::models::reading::{HistoryEntry, Reading, StoredReading};
use crate::reading_log::ReadingLog;
use crate::registry::NodeRegistry;
use crate::services::compaction::{self, CompactionTask};
use crate::store::Location;
use crate::utils::parse_limit;

pub struct Storage {
    registry: NodeRegistry,
    log: Arc<ReadingLog>,
    history_limit: usize,
    compaction: Mutex<Option<CompactionTask>>,
}

impl Storage {
    pub fn open(config: &Config) -> Result<Self> {
        let (nodes, partitions) = if config.in_memory {
            (Location::Memory, Location::Memory)
        } else {
            (Location::File(config.nodes_path()), Location::File(config.partitions_dir()))
        };
        info!("Opening node registry at {:?}", nodes);
        let registry = NodeRegistry::open(nodes)?;
        let log = Arc::new(ReadingLog::new(partitions));

        let compaction = match config.compaction_interval {
            Some(interval) => Some(compaction::spawn(registry.store().clone(), log.clone(), interval)?),
            None => None,
        };

        Ok(Storage {
            registry,
            log,
            history_limit: config.history_limit,
            compaction: Mutex::new(compaction),
        })
    }

    /// Isolated memory-only storage without background compaction.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(&Config::in_memory())
    }

    /// Stop background compaction and release every partition handle.
    pub fn close(self) -> Result<()> {
        self.stop_compaction();
        self.log.release_all()?;
        info!("Storage closed");
        Ok(())
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn log(&self) -> &ReadingLog {
        &self.log
    }

    pub fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    pub fn list_nodes(&self) -> Result<Vec<Node>> {
        self.registry.list_nodes()
    }

    pub fn get_node(&self, id: &str) -> Result<Node> {
        self.registry.get_node(id)
    }

    pub fn create_node(&self, fields: NodeFields) -> Result<Node> {
        let node = self.registry.create_node(fields)?;
        info!("Node {} registered (frequency={}ms)", node.id, node.frequency);
        Ok(node)
    }

    /// The node with its liveness judged at `now`.
    pub fn node_status(&self, id: &str, now: DateTime<Utc>) -> Result<NodeStatus> {
        let node = self.registry.get_node(id)?;
        let is_online = node.is_online(now);
        Ok(NodeStatus {
            node,
            is_online,
            checked_at: now,
        })
    }

    /// Current reading from the node document, falling back to the newest
    /// logged reading when only history exists.
    pub fn current_reading(&self, id: &str) -> Result<Reading> {
        match self.registry.current_reading(id) {
            Err(Error::NotFound(what)) => match self.log.latest(id) {
                Ok(stored) => Ok(stored.reading()),
                Err(Error::NotFound(_)) => Err(Error::NotFound(what)),
                Err(e) => Err(e),
            },
            other => other,
        }
    }

    /// Newest-first history. `limit` is the raw caller input; anything that
    /// is not a positive integer means the configured default.
    pub fn reading_history(&self, id: &str, limit: Option<&str>) -> Result<Vec<HistoryEntry>> {
        self.log.recent(id, parse_limit(limit, self.history_limit))
    }

    /// Record a reading: update the node's current fields, then append to its log.
    pub fn submit_reading(&self, id: &str, reading: Reading) -> Result<StoredReading> {
        if reading.is_empty() {
            return Err(Error::Validation(
                "reading has no usable temperature or humidity".to_string(),
            ));
        }

        if let Err(e) = self.registry.set_current_reading(id, &reading) {
            warn!("Reading for node {} rejected: {}", id, e);
            return Err(e);
        }

        self.log.append(id, &reading).map_err(|cause| {
            error!(
                "Node {} current reading updated but history append failed: {}",
                id, cause
            );
            Error::PartialWrite {
                node_id: id.to_string(),
                cause: Box::new(cause),
            }
        })
    }

    /// Parse a raw submission body, then [`Storage::submit_reading`].
    pub fn submit_reading_json(&self, id: &str, body: &str) -> Result<StoredReading> {
        let reading = Reading::from_json(body)?;
        self.submit_reading(id, reading)
    }

    /// Run one compaction pass right now.
    pub fn compact_now(&self) {
        compaction::compact_once(self.registry.store(), &self.log);
    }

    fn stop_compaction(&self) {
        let task = match self.compaction.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.stop();
        }
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        self.stop_compaction();
    }
}
