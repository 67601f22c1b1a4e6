use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::find_conflict;
use super::{Engine, EngineError, WalCommand};

impl Engine {
    /// Atomic conditional insert.
    ///
    /// The overlap check and the write happen under the `(space, date)`
    /// write lock, so of two overlapping inserts racing on the same key
    /// exactly one commits and the other gets `Conflict`.
    pub async fn insert(&self, reservation: Reservation) -> Result<Reservation, EngineError> {
        let _gate = self.compact_gate.read().await;
        if self.index.contains_key(&reservation.id) {
            return Err(EngineError::validation(format!(
                "reservation id {} already exists",
                reservation.id
            )));
        }
        let ledger = self.ledger_for(&reservation.key());
        let mut guard = ledger.write().await;
        if guard.len() >= MAX_RESERVATIONS_PER_SPACE_DAY {
            return Err(EngineError::LimitExceeded("too many reservations for space on this date"));
        }
        if let Some(existing) = find_conflict(&guard, &reservation.slot(), None) {
            return Err(EngineError::Conflict(existing));
        }

        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(reservation)
    }

    /// Hard delete. Returns the removed reservation.
    pub async fn delete_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let _gate = self.compact_gate.read().await;
        let key = self.key_of(&id).ok_or(EngineError::NotFound(id))?;
        let ledger = self.get_ledger(&key).ok_or(EngineError::NotFound(id))?;
        let mut guard = ledger.write().await;
        // A concurrent delete may have won while we waited for the lock.
        let existing = guard.get(id).cloned().ok_or(EngineError::NotFound(id))?;

        let event = Event::ReservationDeleted { id, key };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(existing)
    }

    /// Compact the WAL down to one create event per live reservation and
    /// drop ledgers that no longer hold any.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.compact_gate.write().await;

        let mut reservations = Vec::with_capacity(self.index.len());
        let mut empty = Vec::new();
        for ledger in self.ledgers_where(|_| true) {
            let guard = ledger.read().await;
            if guard.is_empty() {
                empty.push(guard.key.clone());
            }
            reservations.extend(guard.reservations.iter().cloned());
        }
        // No writer holds a ledger while the gate is exclusive, so a pruned
        // key is simply recreated by its next insert.
        let pruned = empty
            .iter()
            .filter(|key| {
                self.ledgers
                    .remove_if(*key, |_, l| l.try_read().is_ok_and(|g| g.is_empty()))
                    .is_some()
            })
            .count();
        reservations.sort_by(|a, b| a.chrono_key().cmp(&b.chrono_key()));
        let events: Vec<Event> = reservations
            .into_iter()
            .map(|reservation| Event::ReservationCreated { reservation })
            .collect();
        let live = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Store("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Store("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Store(e.to_string()))?;
        tracing::info!("compacted WAL to {live} reservations, pruned {pruned} empty ledgers");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
