use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;
use crate::spaces::SpaceDirectory;

use super::EngineError;

/// A booking request that passed the Validating state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidBooking {
    pub space_id: String,
    pub space_name: String,
    pub slot: DaySlot,
    pub is_anonymous: bool,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
}

fn required<'a>(field: &'static str, value: &'a Option<String>) -> Result<&'a str, EngineError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(EngineError::validation(format!("{field} is required"))),
    }
}

fn optional(field: &'static str, value: &Option<String>) -> Result<Option<String>, EngineError> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) if v.len() > MAX_ID_LEN => Err(EngineError::LimitExceeded(field)),
        Some(v) => Ok(Some(v.to_string())),
    }
}

/// Surrounding whitespace is dropped from every key and time field, on
/// every path, so a padded query finds what a padded booking stored.
pub(crate) fn validate_space_id(space_id: &str) -> Result<&str, EngineError> {
    let space_id = space_id.trim();
    if space_id.is_empty() {
        return Err(EngineError::validation("spaceId is required"));
    }
    if space_id.len() > MAX_ID_LEN {
        return Err(EngineError::LimitExceeded("spaceId too long"));
    }
    Ok(space_id)
}

pub(crate) fn validate_date(date: &str) -> Result<NaiveDate, EngineError> {
    parse_date(date.trim())
        .ok_or_else(|| EngineError::validation(format!("date must be YYYY-MM-DD, got {date:?}")))
}

/// Parse and order-check a time range.
pub(crate) fn validate_range(start_time: &str, end_time: &str) -> Result<DayRange, EngineError> {
    let (start_time, end_time) = (start_time.trim(), end_time.trim());
    let start = to_minutes(start_time).ok_or_else(|| {
        EngineError::validation(format!("startTime must be HH:MM, got {start_time:?}"))
    })?;
    let end = to_minutes(end_time).ok_or_else(|| {
        EngineError::validation(format!("endTime must be HH:MM, got {end_time:?}"))
    })?;
    if start >= end {
        return Err(EngineError::validation(format!(
            "startTime {start_time} must be before endTime {end_time}"
        )));
    }
    Ok(DayRange::new(start, end))
}

/// Validate a full `(space, date, start, end)` slot query.
/// Returns the normalized space id with the slot.
pub(crate) fn validate_slot<'a>(
    space_id: &'a str,
    date: &str,
    start_time: &str,
    end_time: &str,
) -> Result<(&'a str, DaySlot), EngineError> {
    let space_id = validate_space_id(space_id)?;
    let date = validate_date(date)?;
    let range = validate_range(start_time, end_time)?;
    Ok((space_id, DaySlot { date, range }))
}

pub(crate) fn validate_booking(
    req: &BookingRequest,
    spaces: Option<&dyn SpaceDirectory>,
) -> Result<ValidBooking, EngineError> {
    let space_id = required("spaceId", &req.space_id)?;
    let space_name = required("spaceName", &req.space_name)?;
    let date = required("date", &req.date)?;
    let start_time = required("startTime", &req.start_time)?;
    let end_time = required("endTime", &req.end_time)?;

    let (space_id, slot) = validate_slot(space_id, date, start_time, end_time)?;
    if space_name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("spaceName too long"));
    }
    if spaces.is_some_and(|dir| dir.lookup(space_id).is_none()) {
        return Err(EngineError::validation(format!("unknown space: {space_id}")));
    }

    Ok(ValidBooking {
        space_id: space_id.to_string(),
        space_name: space_name.to_string(),
        slot,
        is_anonymous: req.is_anonymous,
        user_id: optional("userId too long", &req.user_id)?,
        user_name: optional("userName too long", &req.user_name)?,
    })
}
