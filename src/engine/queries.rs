use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::conflict::find_conflict;
use super::{Engine, EngineError, SharedLedger};

/// Read every ledger, keep what passes `keep`, and sort chronologically.
async fn collect_sorted(
    ledgers: Vec<SharedLedger>,
    keep: impl Fn(&Reservation) -> bool,
) -> Vec<Reservation> {
    let mut out = Vec::new();
    for ledger in ledgers {
        let guard = ledger.read().await;
        out.extend(guard.reservations.iter().filter(|r| keep(r)).cloned());
    }
    out.sort_by(|a, b| a.chrono_key().cmp(&b.chrono_key()));
    out
}

impl Engine {
    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let key = self.key_of(&id).ok_or(EngineError::NotFound(id))?;
        let ledger = self.get_ledger(&key).ok_or(EngineError::NotFound(id))?;
        let guard = ledger.read().await;
        guard.get(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// All live reservations, ordered by date, start, then space.
    pub async fn all_reservations(&self) -> Vec<Reservation> {
        collect_sorted(self.ledgers_where(|_| true), |_| true).await
    }

    /// Chronological bookings of one space.
    pub async fn reservations_for_space(&self, space_id: &str) -> Vec<Reservation> {
        let space_id = space_id.trim();
        collect_sorted(self.ledgers_where(|k| k.space_id == space_id), |_| true).await
    }

    /// Bookings attributed to `user_name`. Anonymous bookings carry no
    /// identity and never match.
    pub async fn reservations_for_user(&self, user_name: &str) -> Vec<Reservation> {
        let user_name = user_name.trim();
        collect_sorted(self.ledgers_where(|_| true), |r| {
            r.attributed_user_name() == Some(user_name)
        })
        .await
    }

    /// Bookings on `date` across every space.
    pub async fn reservations_on(&self, date: NaiveDate) -> Vec<Reservation> {
        collect_sorted(self.ledgers_where(|k| k.date == date), |_| true).await
    }

    /// The live reservation on `space_id` that collides with `slot`, if any.
    /// `exclude` skips one id, for re-checking a booking against its peers.
    pub async fn conflicting_reservation(
        &self,
        space_id: &str,
        slot: &DaySlot,
        exclude: Option<Ulid>,
    ) -> Option<Ulid> {
        let ledger = self.get_ledger(&SpaceDay::new(space_id, slot.date))?;
        let guard = ledger.read().await;
        find_conflict(&guard, slot, exclude)
    }

    pub async fn has_conflict(&self, space_id: &str, slot: &DaySlot, exclude: Option<Ulid>) -> bool {
        self.conflicting_reservation(space_id, slot, exclude)
            .await
            .is_some()
    }
}
