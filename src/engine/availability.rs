use crate::model::*;

use super::validate::{validate_date, validate_slot, validate_space_id};
use super::{Engine, EngineError};

// ── Availability ─────────────────────────────────────────────────

impl Engine {
    /// Is `[start_time, end_time)` on `date` free for `space_id`?
    ///
    /// Pure read. Malformed input is a validation error, never "unavailable".
    pub async fn check_availability(
        &self,
        space_id: &str,
        date: &str,
        start_time: &str,
        end_time: &str,
    ) -> Result<Availability, EngineError> {
        let (space_id, slot) = validate_slot(space_id, date, start_time, end_time)?;
        let available = !self.has_conflict(space_id, &slot, None).await;
        Ok(Availability { available })
    }

    /// Free windows of the bookable day `[00:00, 23:59)` for one space.
    pub async fn free_slots(&self, space_id: &str, date: &str) -> Result<Vec<DayRange>, EngineError> {
        let space_id = validate_space_id(space_id)?;
        let date = validate_date(date)?;
        let booked = match self.get_ledger(&SpaceDay::new(space_id, date)) {
            Some(ledger) => {
                let guard = ledger.read().await;
                guard.booked()
            }
            None => Vec::new(),
        };
        Ok(free_ranges(&booked))
    }
}

/// Gaps in the bookable day left by `booked` (sorted, non-overlapping).
pub fn free_ranges(booked: &[DayRange]) -> Vec<DayRange> {
    subtract_ranges(&[DayRange::new(0, DAY_END)], booked)
}

/// Subtract sorted `to_remove` ranges from sorted, disjoint `base` ranges.
pub fn subtract_ranges(base: &[DayRange], to_remove: &[DayRange]) -> Vec<DayRange> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < b.end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(DayRange::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < b.end {
            result.push(DayRange::new(current_start, b.end));
        }
    }

    result
}
