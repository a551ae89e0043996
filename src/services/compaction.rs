//! Background compaction of the primary store and every open log partition.

use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::reading_log::ReadingLog;
use crate::store::Store;

/// Running compaction thread. Dropping the handle without calling
/// [`CompactionTask::stop`] detaches the thread, which exits on its next tick.
pub struct CompactionTask {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

impl CompactionTask {
    /// Signal the thread and wait for it to finish its current pass.
    pub fn stop(self) {
        let _ = self.stop.send(());
        if self.thread.join().is_err() {
            warn!("Compaction thread panicked");
        }
    }
}

pub fn spawn(primary: Arc<Store>, log: Arc<ReadingLog>, interval: Duration) -> Result<CompactionTask> {
    let (stop, stopped) = mpsc::channel();
    let thread = thread::Builder::new()
        .name("compaction".to_string())
        .spawn(move || {
            info!("Compaction running every {}s", interval.as_secs());
            let mut next_tick = Instant::now() + interval;
            loop {
                // Maintain steady cadence
                let wait = next_tick.saturating_duration_since(Instant::now());
                match stopped.recv_timeout(wait) {
                    Err(RecvTimeoutError::Timeout) => {
                        compact_once(&primary, &log);
                        next_tick += interval;
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!("Compaction stopped");
        })?;
    Ok(CompactionTask { stop, thread })
}

/// One compaction pass. Failures are logged and never abort the pass.
pub fn compact_once(primary: &Store, log: &ReadingLog) {
    let started = Instant::now();
    if let Err(e) = primary.compact() {
        warn!("Compaction of `{}` failed: {}", primary.label(), e);
    }
    match log.compact_all() {
        Ok(partitions) => debug!(
            "Compaction pass done in {}ms ({} partition(s))",
            started.elapsed().as_millis(),
            partitions
        ),
        Err(e) => warn!("Compaction of reading log failed: {}", e),
    }
}
