use ulid::Ulid;

use crate::model::*;

use super::store::DayLedger;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or_default()
}

/// First live reservation in `ledger` that collides with `candidate`,
/// skipping `exclude`. The ledger is already scoped to one space and day.
pub(crate) fn find_conflict(
    ledger: &DayLedger,
    candidate: &DaySlot,
    exclude: Option<Ulid>,
) -> Option<Ulid> {
    if ledger.key.date != candidate.date {
        return None;
    }
    ledger
        .overlapping(&candidate.range)
        .filter(|r| Some(r.id) != exclude)
        .find(|r| overlaps(candidate, &r.slot()))
        .map(|r| r.id)
}
