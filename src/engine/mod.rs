mod availability;
mod booking;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;
mod validate;

pub use availability::{free_ranges, subtract_ranges};
pub use booking::{BookingState, BookingWorkflow};
pub use error::EngineError;
pub use store::DayLedger;
pub use validate::ValidBooking;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::observability;
use crate::spaces::SpaceDirectory;
use crate::wal::Wal;

/// One `(space, date)` ledger behind its own lock. Inserts for the same key
/// serialize on the write half; inserts for different keys never contend.
pub type SharedLedger = Arc<RwLock<DayLedger>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first append, drains whatever else is already queued,
/// then pays for a single fsync and answers every sender in the batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // Commit what we have before a compaction swaps the file.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} events: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even after an append error, so half-buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// The reservation store.
pub struct Engine {
    ledgers: DashMap<SpaceDay, SharedLedger>,
    /// Reverse lookup: reservation id → ledger key.
    index: DashMap<Ulid, SpaceDay>,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Writers hold this shared, compaction holds it exclusive, so a
    /// compacted log can never drop an append made during the rewrite.
    compact_gate: RwLock<()>,
    spaces: Option<Arc<dyn SpaceDirectory>>,
}

/// Apply an event to its ledger. Caller holds the ledger's write lock.
fn apply_to_ledger(ledger: &mut DayLedger, event: &Event, index: &DashMap<Ulid, SpaceDay>) {
    match event {
        Event::ReservationCreated { reservation } => {
            index.insert(reservation.id, reservation.key());
            ledger.insert(reservation.clone());
        }
        Event::ReservationDeleted { id, .. } => {
            ledger.remove(*id);
            index.remove(id);
        }
    }
}

impl Engine {
    /// Replay the WAL at `wal_path` and start the group-commit writer.
    /// Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            ledgers: DashMap::new(),
            index: DashMap::new(),
            wal_tx,
            compact_gate: RwLock::new(()),
            spaces: None,
        };

        // Sole owner of every Arc during replay, so try_write never contends.
        // Never use blocking_write here: this may run inside an async context.
        for event in &events {
            let ledger = engine.ledger_for(&event.key());
            let Ok(mut guard) = ledger.try_write() else {
                return Err(io::Error::other("replay: ledger unexpectedly locked"));
            };
            apply_to_ledger(&mut guard, event, &engine.index);
        }
        if !events.is_empty() {
            tracing::info!(
                "replayed {} events, {} live reservations",
                events.len(),
                engine.index.len()
            );
        }

        Ok(engine)
    }

    /// Reject bookings for spaces the directory does not know.
    pub fn with_space_directory(mut self, spaces: Arc<dyn SpaceDirectory>) -> Self {
        self.spaces = Some(spaces);
        self
    }

    pub(crate) fn space_directory(&self) -> Option<&dyn SpaceDirectory> {
        self.spaces.as_deref()
    }

    pub fn reservation_count(&self) -> usize {
        self.index.len()
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Store("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Store("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Store(e.to_string()))
    }

    pub(crate) fn get_ledger(&self, key: &SpaceDay) -> Option<SharedLedger> {
        self.ledgers.get(key).map(|e| e.value().clone())
    }

    /// Get or create the ledger for `key`. Writers call this under the shared
    /// compaction gate and ledgers are only removed under the exclusive one,
    /// so an Arc handed out here stays the one every concurrent writer locks.
    pub(crate) fn ledger_for(&self, key: &SpaceDay) -> SharedLedger {
        if let Some(ledger) = self.get_ledger(key) {
            return ledger;
        }
        self.ledgers
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RwLock::new(DayLedger::new(key.clone()))))
            .value()
            .clone()
    }

    /// Clone out every ledger whose key passes `pred`. DashMap guards are
    /// dropped before returning so callers can await the ledger locks.
    pub(crate) fn ledgers_where(&self, pred: impl Fn(&SpaceDay) -> bool) -> Vec<SharedLedger> {
        self.ledgers
            .iter()
            .filter(|e| pred(e.key()))
            .map(|e| e.value().clone())
            .collect()
    }

    pub(crate) fn key_of(&self, id: &Ulid) -> Option<SpaceDay> {
        self.index.get(id).map(|e| e.value().clone())
    }

    /// WAL-append then apply. The caller holds the ledger write lock, so
    /// readers see either nothing or the whole committed record.
    pub(super) async fn persist_and_apply(
        &self,
        ledger: &mut DayLedger,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_ledger(ledger, event, &self.index);
        Ok(())
    }
}
