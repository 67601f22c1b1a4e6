use ulid::Ulid;

use crate::model::*;

/// Live reservations for one `(space, date)` key, kept sorted by start.
///
/// The no-overlap invariant holds for everything in here, so sorting by
/// start also sorts by end.
#[derive(Debug, Clone)]
pub struct DayLedger {
    pub key: SpaceDay,
    pub reservations: Vec<Reservation>,
}

impl DayLedger {
    pub fn new(key: SpaceDay) -> Self {
        Self {
            key,
            reservations: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }

    /// Insert maintaining sort order by start.
    pub fn insert(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.start, |r| r.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn get(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Reservations whose range intersects `range`.
    /// Binary search skips everything starting at or after `range.end`.
    pub fn overlapping(&self, range: &DayRange) -> impl Iterator<Item = &Reservation> {
        let right_bound = self.reservations.partition_point(|r| r.start < range.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.end > range.start)
    }

    /// Booked ranges in start order.
    pub fn booked(&self) -> Vec<DayRange> {
        self.reservations
            .iter()
            .map(|r| DayRange::new(r.start, r.end))
            .collect()
    }
}
