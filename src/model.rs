use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used for record timestamps.
pub type Ms = i64;

/// Minutes since midnight, `0..=1439`.
pub type Minute = u16;

/// Last bookable minute of a day (`23:59`).
pub const DAY_END: Minute = 23 * 60 + 59;

/// Parse a strict `HH:MM` 24-hour time into minutes since midnight.
///
/// Returns `None` for anything else, including single-digit hours and
/// out-of-range values like `24:00` or `12:60`.
pub fn to_minutes(time: &str) -> Option<Minute> {
    let b = time.as_bytes();
    if b.len() != 5 || b[2] != b':' {
        return None;
    }
    let digit = |c: u8| c.is_ascii_digit().then(|| (c - b'0') as Minute);
    let hours = digit(b[0])? * 10 + digit(b[1])?;
    let minutes = digit(b[3])? * 10 + digit(b[4])?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(hours * 60 + minutes)
}

/// Render minutes since midnight as `HH:MM`.
pub fn format_minutes(m: Minute) -> String {
    format!("{:02}:{:02}", m / 60, m % 60)
}

/// Parse a strict `YYYY-MM-DD` calendar date.
pub fn parse_date(date: &str) -> Option<NaiveDate> {
    let b = date.as_bytes();
    if b.len() != 10 || b[4] != b'-' || b[7] != b'-' {
        return None;
    }
    let digits = [0, 1, 2, 3, 5, 6, 8, 9];
    if !digits.iter().all(|&i| b[i].is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Half-open time-of-day range `[start, end)` in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DayRange {
    pub start: Minute,
    pub end: Minute,
}

impl DayRange {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "DayRange start must be before end");
        Self { start, end }
    }
}

/// A range on a specific calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DaySlot {
    pub date: NaiveDate,
    pub range: DayRange,
}

impl DaySlot {
    pub fn new(date: NaiveDate, start: Minute, end: Minute) -> Self {
        Self {
            date,
            range: DayRange::new(start, end),
        }
    }
}

/// Does `candidate` collide with `existing`?
///
/// Slots on different dates never collide. On the same date the candidate
/// collides when its start falls in `[existing.start, existing.end)`, its end
/// falls in `(existing.start, existing.end]`, or it encloses `existing`.
/// Touching boundaries do not collide, so back-to-back bookings are fine.
pub fn overlaps(candidate: &DaySlot, existing: &DaySlot) -> bool {
    if candidate.date != existing.date {
        return false;
    }
    let (new_start, new_end) = (candidate.range.start, candidate.range.end);
    let (ex_start, ex_end) = (existing.range.start, existing.range.end);

    let start_inside = new_start >= ex_start && new_start < ex_end;
    let end_inside = new_end > ex_start && new_end <= ex_end;
    let encloses = new_start <= ex_start && new_end >= ex_end;
    start_inside || end_inside || encloses
}

/// Ledger key: one space on one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpaceDay {
    pub space_id: String,
    pub date: NaiveDate,
}

impl SpaceDay {
    pub fn new(space_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            space_id: space_id.into(),
            date,
        }
    }
}

/// A committed booking of one space for one time range on one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub space_id: String,
    /// Display name captured at booking time, never re-synced.
    pub space_name: String,
    pub date: NaiveDate,
    pub start: Minute,
    pub end: Minute,
    pub is_anonymous: bool,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Reservation {
    pub fn key(&self) -> SpaceDay {
        SpaceDay::new(self.space_id.clone(), self.date)
    }

    pub fn slot(&self) -> DaySlot {
        DaySlot::new(self.date, self.start, self.end)
    }

    /// The identity this reservation is attributed to, if any.
    /// Anonymous reservations are attributed to nobody.
    pub fn attributed_user_id(&self) -> Option<&str> {
        if self.is_anonymous {
            None
        } else {
            self.user_id.as_deref()
        }
    }

    pub fn attributed_user_name(&self) -> Option<&str> {
        if self.is_anonymous {
            None
        } else {
            self.user_name.as_deref()
        }
    }

    /// Chronological sort key: date, then start, then space, then id.
    pub fn chrono_key(&self) -> (NaiveDate, Minute, &str, Ulid) {
        (self.date, self.start, self.space_id.as_str(), self.id)
    }
}

/// Raw create-reservation input, before validation. Every field may be
/// missing; the booking workflow decides what is acceptable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingRequest {
    pub space_id: Option<String>,
    pub space_name: Option<String>,
    pub date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub is_anonymous: bool,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
}

impl BookingRequest {
    /// Convenience constructor for the common fully-specified case.
    pub fn new(space_id: &str, space_name: &str, date: &str, start_time: &str, end_time: &str) -> Self {
        Self {
            space_id: Some(space_id.to_string()),
            space_name: Some(space_name.to_string()),
            date: Some(date.to_string()),
            start_time: Some(start_time.to_string()),
            end_time: Some(end_time.to_string()),
            ..Default::default()
        }
    }

    pub fn by_user(mut self, user_id: &str, user_name: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self.user_name = Some(user_name.to_string());
        self
    }

    pub fn anonymous(mut self) -> Self {
        self.is_anonymous = true;
        self
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationDeleted {
        id: Ulid,
        key: SpaceDay,
    },
}

impl Event {
    pub fn key(&self) -> SpaceDay {
        match self {
            Event::ReservationCreated { reservation } => reservation.key(),
            Event::ReservationDeleted { key, .. } => key.clone(),
        }
    }
}

/// Result of an availability query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Availability {
    pub available: bool,
}
