use ulid::Ulid;

use crate::model::*;
use crate::observability;

use super::conflict::now_ms;
use super::validate::{validate_booking, ValidBooking};
use super::{Engine, EngineError};

/// Where a booking attempt is. `Committed` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingState {
    Validating,
    CheckingConflict,
    Inserting,
    Committed,
    Rejected,
}

enum Stage {
    Validating(BookingRequest),
    CheckingConflict(ValidBooking),
    Inserting(ValidBooking),
    Committed,
    Rejected,
}

/// Drives one create-reservation attempt:
/// `Validating → CheckingConflict → Inserting → {Committed | Rejected}`.
///
/// The conflict check is a cheap early exit under a read lock. The insert
/// re-checks atomically, so a competing booking that lands in between still
/// turns this attempt into `Rejected` instead of a double booking. There is
/// no retry; the caller decides whether to resubmit.
pub struct BookingWorkflow<'e> {
    engine: &'e Engine,
    stage: Stage,
}

impl<'e> BookingWorkflow<'e> {
    pub fn new(engine: &'e Engine, request: BookingRequest) -> Self {
        Self {
            engine,
            stage: Stage::Validating(request),
        }
    }

    pub fn state(&self) -> BookingState {
        match self.stage {
            Stage::Validating(_) => BookingState::Validating,
            Stage::CheckingConflict(_) => BookingState::CheckingConflict,
            Stage::Inserting(_) => BookingState::Inserting,
            Stage::Committed => BookingState::Committed,
            Stage::Rejected => BookingState::Rejected,
        }
    }

    /// Run every remaining step.
    pub async fn run(mut self) -> Result<Reservation, EngineError> {
        self.validate()?;
        self.check_conflict().await?;
        self.insert().await
    }

    pub fn validate(&mut self) -> Result<(), EngineError> {
        let request = match self.take_stage() {
            Stage::Validating(request) => request,
            other => return Err(self.out_of_order(other, "validate")),
        };
        match validate_booking(&request, self.engine.space_directory()) {
            Ok(valid) => {
                self.advance(Stage::CheckingConflict(valid));
                Ok(())
            }
            Err(e) => Err(self.reject(e, "validation")),
        }
    }

    pub async fn check_conflict(&mut self) -> Result<(), EngineError> {
        let valid = match self.take_stage() {
            Stage::CheckingConflict(valid) => valid,
            other => return Err(self.out_of_order(other, "check_conflict")),
        };
        let existing = self
            .engine
            .conflicting_reservation(&valid.space_id, &valid.slot, None)
            .await;
        match existing {
            Some(id) => Err(self.reject(EngineError::Conflict(id), "conflict")),
            None => {
                self.advance(Stage::Inserting(valid));
                Ok(())
            }
        }
    }

    pub async fn insert(&mut self) -> Result<Reservation, EngineError> {
        let valid = match self.take_stage() {
            Stage::Inserting(valid) => valid,
            other => return Err(self.out_of_order(other, "insert")),
        };
        let now = now_ms();
        let reservation = Reservation {
            id: Ulid::new(),
            space_id: valid.space_id,
            space_name: valid.space_name,
            date: valid.slot.date,
            start: valid.slot.range.start,
            end: valid.slot.range.end,
            is_anonymous: valid.is_anonymous,
            user_id: valid.user_id,
            user_name: valid.user_name,
            created_at: now,
            updated_at: now,
        };
        match self.engine.insert(reservation).await {
            Ok(committed) => {
                self.advance(Stage::Committed);
                metrics::counter!(observability::BOOKINGS_COMMITTED_TOTAL).increment(1);
                tracing::info!(
                    id = %committed.id,
                    space_id = %committed.space_id,
                    date = %committed.date,
                    "booked {}-{}",
                    format_minutes(committed.start),
                    format_minutes(committed.end)
                );
                Ok(committed)
            }
            // Lost the race between our check and the atomic insert.
            Err(e @ EngineError::Conflict(_)) => Err(self.reject(e, "race")),
            Err(e) => {
                let reason = e.kind();
                Err(self.reject(e, reason))
            }
        }
    }

    fn take_stage(&mut self) -> Stage {
        std::mem::replace(&mut self.stage, Stage::Rejected)
    }

    fn advance(&mut self, next: Stage) {
        self.stage = next;
        tracing::debug!("booking -> {:?}", self.state());
    }

    fn reject(&mut self, err: EngineError, reason: &'static str) -> EngineError {
        self.stage = Stage::Rejected;
        metrics::counter!(observability::BOOKINGS_REJECTED_TOTAL, "reason" => reason).increment(1);
        tracing::debug!("booking rejected ({reason}): {err}");
        err
    }

    fn out_of_order(&mut self, stage: Stage, step: &'static str) -> EngineError {
        self.stage = stage;
        EngineError::validation(format!(
            "booking step {step} not allowed in state {:?}",
            self.state()
        ))
    }
}

impl Engine {
    /// Create a reservation through the booking workflow.
    pub async fn create_reservation(&self, request: BookingRequest) -> Result<Reservation, EngineError> {
        BookingWorkflow::new(self, request).run().await
    }
}
