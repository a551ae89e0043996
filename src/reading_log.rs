//! Append-only reading history, partitioned by node ID.
//!
//! Each node's log is its own database (`<dir>/<encoded id>.db`), provisioned
//! on the first append for that node and cached for as long as the log lives.
//! The cache never evicts, so open partitions grow with the number of distinct
//! node IDs seen. Each ID owns a slot with its own lock; opening a partition
//! holds only that slot, so other nodes keep reading and writing meanwhile.

use diesel::dsl::max;
use diesel::prelude::*;
use log::{info, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::db::models::{NewReadingRow, ReadingRow};
use crate::error::{Error, Result};
use crate::models::reading::{HistoryEntry, Reading, StoredReading};
use crate::schema;
use crate::store::{Location, READING_MIGRATIONS, Store};
use crate::utils::{new_document_id, now_millis, partition_file_name};

/// A node's partition, empty until its store has been opened.
type Slot = Arc<Mutex<Option<Arc<Store>>>>;

#[derive(Debug)]
pub struct ReadingLog {
    /// Partition directory, or `None` when every partition lives in memory.
    dir: Option<PathBuf>,
    partitions: Mutex<HashMap<String, Slot>>,
}

impl ReadingLog {
    /// `Location::File` names the directory partitions are kept in.
    pub fn new(location: Location) -> Self {
        let dir = match location {
            Location::File(dir) => Some(dir),
            Location::Memory => None,
        };
        Self {
            dir,
            partitions: Mutex::new(HashMap::new()),
        }
    }

    /// Append `reading` to the node's log, provisioning the partition if this is
    /// the node's first reading. `created_at` strictly increases within a partition.
    pub fn append(&self, node_id: &str, reading: &Reading) -> Result<StoredReading> {
        use schema::readings::dsl as R;

        let partition = self.provision(node_id)?;
        let row = partition.with_conn(|conn| {
            let last: Option<i64> = R::readings.select(max(R::created_at)).first(conn)?;
            let created_at = match last {
                Some(last) => now_millis().max(last + 1),
                None => now_millis(),
            };
            let row = NewReadingRow {
                doc_id: new_document_id(),
                temperature: reading.temperature,
                humidity: reading.humidity,
                created_at,
            };
            diesel::insert_into(R::readings).values(&row).execute(conn)?;
            Ok(row)
        })?;

        Ok(ReadingRow {
            doc_id: row.doc_id,
            temperature: row.temperature,
            humidity: row.humidity,
            created_at: row.created_at,
        }
        .into())
    }

    /// Most recent reading in the node's log.
    pub fn latest(&self, node_id: &str) -> Result<StoredReading> {
        use schema::readings::dsl as R;

        let not_found = || Error::NotFound(format!("readings for node {}", node_id));
        let Some(partition) = self.existing(node_id)? else {
            return Err(not_found());
        };
        let row = partition.with_conn(|conn| {
            Ok(R::readings
                .order(R::created_at.desc())
                .select(ReadingRow::as_select())
                .first::<ReadingRow>(conn)
                .optional()?)
        })?;
        row.map(StoredReading::from).ok_or_else(not_found)
    }

    /// Up to `limit` readings, newest first. A node that never reported has an
    /// empty history.
    pub fn recent(&self, node_id: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        use schema::readings::dsl as R;

        let Some(partition) = self.existing(node_id)? else {
            return Ok(Vec::new());
        };
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<(Option<f64>, Option<f64>, i64)> = partition.with_conn(|conn| {
            Ok(R::readings
                .select((R::temperature, R::humidity, R::created_at))
                .order(R::created_at.desc())
                .limit(limit)
                .load(conn)?)
        })?;
        Ok(rows.into_iter().map(HistoryEntry::from).collect())
    }

    pub fn partition_count(&self) -> Result<usize> {
        Ok(self.open_partitions()?.len())
    }

    /// Compact every open partition, one lock at a time. Returns how many succeeded.
    pub fn compact_all(&self) -> Result<usize> {
        let mut compacted = 0;
        for partition in self.open_partitions()? {
            match partition.compact() {
                Ok(()) => compacted += 1,
                Err(e) => warn!("Compaction of partition `{}` failed: {}", partition.label(), e),
            }
        }
        Ok(compacted)
    }

    /// Drop every cached partition handle.
    pub fn release_all(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }

    /// Cached partition, or a freshly created one. Concurrent first writers for
    /// the same ID wait on its slot and share a single store.
    fn provision(&self, node_id: &str) -> Result<Arc<Store>> {
        let slot = self.lock()?.entry(node_id.to_string()).or_default().clone();
        let mut partition = lock_slot(&slot)?;
        if let Some(store) = partition.as_ref() {
            return Ok(store.clone());
        }
        let store = Arc::new(Store::open(node_id, self.location_for(node_id), READING_MIGRATIONS)?);
        info!("Provisioned reading log for node {}", node_id);
        *partition = Some(store.clone());
        Ok(store)
    }

    /// Cached partition, or one found on disk; never creates a new partition.
    fn existing(&self, node_id: &str) -> Result<Option<Arc<Store>>> {
        let slot = {
            let mut partitions = self.lock()?;
            match partitions.get(node_id) {
                Some(slot) => slot.clone(),
                None if self.on_disk(node_id) => partitions.entry(node_id.to_string()).or_default().clone(),
                None => return Ok(None),
            }
        };
        let mut partition = lock_slot(&slot)?;
        if let Some(store) = partition.as_ref() {
            return Ok(Some(store.clone()));
        }
        if !self.on_disk(node_id) {
            return Ok(None);
        }
        let store = Arc::new(Store::open(node_id, self.location_for(node_id), READING_MIGRATIONS)?);
        *partition = Some(store.clone());
        Ok(Some(store))
    }

    fn open_partitions(&self) -> Result<Vec<Arc<Store>>> {
        let slots: Vec<Slot> = self.lock()?.values().cloned().collect();
        let mut open = Vec::with_capacity(slots.len());
        for slot in &slots {
            if let Some(store) = lock_slot(slot)?.as_ref() {
                open.push(store.clone());
            }
        }
        Ok(open)
    }

    fn on_disk(&self, node_id: &str) -> bool {
        matches!(self.location_for(node_id), Location::File(path) if path.is_file())
    }

    fn location_for(&self, node_id: &str) -> Location {
        match &self.dir {
            Some(dir) => Location::File(dir.join(partition_file_name(node_id))),
            None => Location::Memory,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Slot>>> {
        self.partitions.lock().map_err(|_| Error::poisoned("reading log partitions"))
    }
}

fn lock_slot(slot: &Slot) -> Result<MutexGuard<'_, Option<Arc<Store>>>> {
    slot.lock().map_err(|_| Error::poisoned("reading log partition"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn first_append_provisions_exactly_one_partition() {
        let log = ReadingLog::new(Location::Memory);
        assert_eq!(log.partition_count().unwrap(), 0);

        log.append("rpi_hub", &Reading::new(30.0, 40.0)).unwrap();
        log.append("rpi_hub", &Reading::new(35.0, 44.0)).unwrap();
        assert_eq!(log.partition_count().unwrap(), 1);

        let history = log.recent("rpi_hub", 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].temperature, Some(35.0));
        assert_eq!(history[1].temperature, Some(30.0));
    }

    #[test]
    fn recent_is_limited_and_strictly_newest_first() {
        let log = ReadingLog::new(Location::Memory);
        for i in 0..15 {
            log.append("attic", &Reading::new(f64::from(i), 50.0)).unwrap();
        }
        let history = log.recent("attic", 10).unwrap();
        assert_eq!(history.len(), 10);
        assert!(history.windows(2).all(|w| w[0].created_at > w[1].created_at));
        assert_eq!(history[0].temperature, Some(14.0));
        assert_eq!(log.recent("attic", 100).unwrap().len(), 15);
    }

    #[test]
    fn reads_never_provision_partitions() {
        let log = ReadingLog::new(Location::Memory);
        assert!(log.recent("ghost", 100).unwrap().is_empty());
        assert!(matches!(log.latest("ghost"), Err(Error::NotFound(_))));
        assert_eq!(log.partition_count().unwrap(), 0);
    }

    #[test]
    fn latest_returns_the_last_append() {
        let log = ReadingLog::new(Location::Memory);
        log.append("rpi_hub", &Reading::new(1.0, 2.0)).unwrap();
        let stored = log.append("rpi_hub", &Reading::new(3.0, 4.0)).unwrap();
        assert_eq!(log.latest("rpi_hub").unwrap(), stored);
        assert_eq!(stored.reading(), Reading::new(3.0, 4.0));
    }

    #[test]
    fn partitions_are_isolated_per_node() {
        let log = ReadingLog::new(Location::Memory);
        log.append("a", &Reading::new(1.0, 1.0)).unwrap();
        log.append("b", &Reading::new(2.0, 2.0)).unwrap();
        assert_eq!(log.partition_count().unwrap(), 2);
        assert_eq!(log.recent("a", 10).unwrap().len(), 1);
        assert_eq!(log.latest("b").unwrap().temperature, Some(2.0));
    }

    #[test]
    fn concurrent_first_writers_share_one_partition() {
        let log = Arc::new(ReadingLog::new(Location::Memory));
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let log = log.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    log.append("new_node", &Reading::new(f64::from(i), 50.0)).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(log.partition_count().unwrap(), 1);
        assert_eq!(log.recent("new_node", 100).unwrap().len(), 8);
    }

    #[test]
    fn opening_one_partition_does_not_block_other_nodes() {
        let log = Arc::new(ReadingLog::new(Location::Memory));
        log.append("steady", &Reading::new(1.0, 1.0)).unwrap();

        // Hold a new node's slot as if its store were still opening.
        let slot = log.lock().unwrap().entry("opening".to_string()).or_default().clone();
        let held = slot.lock().unwrap();

        let (done, finished) = mpsc::channel();
        let worker = {
            let log = log.clone();
            thread::spawn(move || {
                log.append("steady", &Reading::new(2.0, 2.0)).unwrap();
                log.append("fresh", &Reading::new(3.0, 3.0)).unwrap();
                let latest = log.latest("steady").unwrap();
                done.send(latest.temperature).unwrap();
            })
        };
        assert_eq!(finished.recv_timeout(Duration::from_secs(5)).unwrap(), Some(2.0));
        worker.join().unwrap();

        drop(held);
        assert_eq!(log.partition_count().unwrap(), 2);
        log.append("opening", &Reading::new(4.0, 4.0)).unwrap();
        assert_eq!(log.partition_count().unwrap(), 3);
    }

    #[test]
    fn failed_provisioning_can_be_retried() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = ReadingLog::new(Location::File(dir.path().to_path_buf()));
        let blocker = dir.path().join("rpi_hub.db");
        std::fs::create_dir_all(&blocker).unwrap();
        assert!(log.append("rpi_hub", &Reading::new(1.0, 1.0)).is_err());
        assert_eq!(log.partition_count().unwrap(), 0);
        assert!(log.recent("rpi_hub", 10).unwrap().is_empty());

        std::fs::remove_dir(&blocker).unwrap();
        log.append("rpi_hub", &Reading::new(2.0, 2.0)).unwrap();
        assert_eq!(log.partition_count().unwrap(), 1);
        assert_eq!(log.recent("rpi_hub", 10).unwrap().len(), 1);
    }

    #[test]
    fn file_partitions_survive_a_restart() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = ReadingLog::new(Location::File(dir.path().to_path_buf()));
        log.append("../escape", &Reading::new(21.0, 60.0)).unwrap();
        assert!(dir.path().join("%2E%2E%2Fescape.db").is_file());
        assert_eq!(log.compact_all().unwrap(), 1);
        log.release_all().unwrap();
        drop(log);

        let log = ReadingLog::new(Location::File(dir.path().to_path_buf()));
        let history = log.recent("../escape", 100).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].humidity, Some(60.0));
        assert!(log.recent("never_written", 100).unwrap().is_empty());
        assert!(!dir.path().join("never_written.db").exists());
    }
}
