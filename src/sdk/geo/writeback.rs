//! Background backfill of the slower tiers.
//!
//! The read path only ever does a non-blocking `try_send`. L2 and L3 writes
//! go to separate lanes, each drained in order by its own task, so a slow
//! store never holds up cache writes. Every write is bounded by a timeout
//! and failures are logged.

use super::address::AddressKey;
use super::distance::Coordinate;
use super::distributed::DistributedCache;
use super::error::GeoError;
use super::store::{CoordinateStore, EntityId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub const DEFAULT_QUEUE_SIZE: usize = 256;

#[derive(Debug)]
pub enum WriteBack {
    Distributed {
        key: AddressKey,
        coord: Coordinate,
        ttl: Duration,
    },
    Store {
        id: EntityId,
        coord: Coordinate,
    },
}

#[derive(Debug)]
enum Message {
    Write(WriteBack),
    Flush(oneshot::Sender<()>),
}

struct Lane {
    tx: mpsc::Sender<Message>,
    _worker: JoinHandle<()>,
}

impl Lane {
    fn spawn(name: &'static str, capacity: usize, sink: Sink) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            _worker: tokio::spawn(run_worker(name, rx, sink)),
        }
    }

    async fn flush(&self) -> Result<oneshot::Receiver<()>, GeoError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Message::Flush(done_tx))
            .await
            .map_err(|_| GeoError::QueueClosed)?;
        Ok(done_rx)
    }
}

#[derive(Clone)]
struct Sink {
    distributed: Arc<dyn DistributedCache>,
    store: Arc<dyn CoordinateStore>,
    write_timeout: Duration,
}

pub struct WriteBackQueue {
    l2: Lane,
    l3: Lane,
    dropped: Arc<AtomicU64>,
}

impl WriteBackQueue {
    /// Spawns both lane workers on the current Tokio runtime. `capacity`
    /// applies to each lane and `write_timeout` to each write.
    pub fn spawn(
        capacity: usize,
        write_timeout: Duration,
        distributed: Arc<dyn DistributedCache>,
        store: Arc<dyn CoordinateStore>,
    ) -> Self {
        let sink = Sink {
            distributed,
            store,
            write_timeout,
        };
        Self {
            l2: Lane::spawn("L2", capacity, sink.clone()),
            l3: Lane::spawn("L3", capacity, sink),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queues a write without waiting. Returns false if it was dropped.
    pub fn enqueue(&self, write: WriteBack) -> bool {
        let lane = match write {
            WriteBack::Distributed { .. } => &self.l2,
            WriteBack::Store { .. } => &self.l3,
        };
        match lane.tx.try_send(Message::Write(write)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(message)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("[WRITEBACK] queue full, dropping {:?}", message);
                false
            }
            Err(mpsc::error::TrySendError::Closed(message)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("[WRITEBACK] {}, dropping {:?}", GeoError::QueueClosed, message);
                false
            }
        }
    }

    /// Waits until every write queued before this call has been applied or
    /// has timed out.
    pub async fn flush(&self) -> Result<(), GeoError> {
        let l2 = self.l2.flush().await?;
        let l3 = self.l3.flush().await?;
        l2.await.map_err(|_| GeoError::QueueClosed)?;
        l3.await.map_err(|_| GeoError::QueueClosed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn run_worker(name: &'static str, mut rx: mpsc::Receiver<Message>, sink: Sink) {
    while let Some(message) = rx.recv().await {
        match message {
            Message::Write(write) => apply(&sink, write).await,
            Message::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    log::debug!("[WRITEBACK] {} lane closed, worker exiting", name);
}

async fn apply(sink: &Sink, write: WriteBack) {
    match write {
        WriteBack::Distributed { key, coord, ttl } => {
            match timeout(sink.write_timeout, sink.distributed.set(&key, coord, ttl)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("[WRITEBACK] L2 set failed for \"{}\": {}", key, e),
                Err(_) => log::warn!(
                    "[WRITEBACK] L2 set for \"{}\" timed out after {:?}",
                    key,
                    sink.write_timeout
                ),
            }
        }
        WriteBack::Store { id, coord } => {
            match timeout(sink.write_timeout, sink.store.update_coordinate(id, coord)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("[WRITEBACK] L3 update failed for entity {}: {}", id, e),
                Err(_) => log::warn!(
                    "[WRITEBACK] L3 update for entity {} timed out after {:?}",
                    id,
                    sink.write_timeout
                ),
            }
        }
    }
}
