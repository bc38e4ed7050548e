use chrono::{NaiveDate, NaiveDateTime};
use ulid::Ulid;

use crate::model::*;

use super::calendar::Calendar;
use super::conflict::{check_no_conflict, check_not_past, validate_scope, Blocking};
use super::error::{StateError, ValidationError};
use super::recurrence::expand;
use super::EngineError;

/// A request to book one window, or a series of windows when `recurrence` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub lab_id: Ulid,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub scope: Scope,
    pub description: Option<String>,
    pub recurrence: Option<Recurrence>,
}

impl BookingRequest {
    pub fn new(lab_id: Ulid, start: NaiveDateTime, end: NaiveDateTime, scope: Scope) -> Self {
        Self {
            lab_id,
            start,
            end,
            scope,
            description: None,
            recurrence: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn repeating(mut self, recurrence: Recurrence) -> Self {
        self.recurrence = Some(recurrence);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Invalid(ValidationError),
    Conflict(Vec<Ulid>),
}

impl SkipReason {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::Conflict(_) => "conflict",
            SkipReason::Invalid(ValidationError::LabClosed { .. }) => "closed",
            SkipReason::Invalid(ValidationError::OutsideHours { .. }) => "outside_hours",
            SkipReason::Invalid(ValidationError::InPast { .. }) => "in_past",
            SkipReason::Invalid(_) => "invalid",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedOccurrence {
    pub date: NaiveDate,
    pub reason: SkipReason,
}

/// What `create_reservation` committed, plus every date it left out and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationResult {
    pub group_id: Option<Ulid>,
    pub accepted: Vec<Reservation>,
    pub skipped: Vec<SkippedOccurrence>,
}

/// Verdicts for every occurrence of a request, computed without side effects.
/// Only `accepted` is ever persisted, in a single WAL record.
#[derive(Debug, Clone)]
pub struct CreationPlan {
    pub pattern: Option<RecurrencePattern>,
    pub accepted: Vec<Reservation>,
    pub skipped: Vec<SkippedOccurrence>,
}

impl CreationPlan {
    pub fn into_result(self) -> CreationResult {
        CreationResult {
            group_id: self.pattern.map(|p| p.group_id),
            accepted: self.accepted,
            skipped: self.skipped,
        }
    }
}

/// Build the reservations a request would create against the current lab state.
///
/// A single-window request fails with the specific rule it breaks. A series
/// drops failing dates into `skipped` and only fails when nothing is left.
pub fn plan_creation(
    lab: &LabState,
    global_closures: &[ClosureRule],
    request: &BookingRequest,
    owner: &UserId,
    now: NaiveDateTime,
) -> Result<CreationPlan, EngineError> {
    if request.end <= request.start {
        return Err(ValidationError::InvalidRange {
            start: request.start,
            end: request.end,
        }
        .into());
    }
    let span = Span::new(request.start, request.end);
    let scope = validate_scope(lab, &request.scope)?;
    let calendar = Calendar::new(lab, global_closures);
    let build = |span: Span, group: Option<Ulid>| Reservation {
        id: Ulid::new(),
        lab_id: lab.info.id,
        owner: owner.clone(),
        span,
        description: request.description.clone(),
        status: ReservationStatus::Pending,
        scope: scope.clone(),
        recurring_group_id: group,
        created_at: now,
        updated_at: now,
    };

    let Some(recurrence) = request.recurrence else {
        calendar.check_window(&span)?;
        check_not_past(&span, now)?;
        check_no_conflict(lab, &scope, &span, None, Blocking::Active)?;
        return Ok(CreationPlan {
            pattern: None,
            accepted: vec![build(span, None)],
            skipped: Vec::new(),
        });
    };

    if !span.is_single_day() {
        return Err(ValidationError::CrossesMidnight(span).into());
    }
    let group_id = Ulid::new();
    let mut occurrences = expand(
        &calendar,
        span.date(),
        span.start.time(),
        span.end.time(),
        &recurrence,
    )?;

    let mut accepted = Vec::new();
    let mut skipped = Vec::new();
    for occurrence in occurrences.by_ref() {
        match check_occurrence(lab, &calendar, &scope, &occurrence, now)? {
            None => accepted.push(build(occurrence, Some(group_id))),
            Some(reason) => skipped.push(SkippedOccurrence {
                date: occurrence.date(),
                reason,
            }),
        }
    }
    skipped.extend(occurrences.closed().iter().map(|(date, by)| SkippedOccurrence {
        date: *date,
        reason: SkipReason::Invalid(ValidationError::LabClosed { date: *date, by: *by }),
    }));
    skipped.sort_by_key(|s| s.date);
    if occurrences.truncated() {
        tracing::debug!(
            "recurrence for lab {} stopped at lookahead limit with {} of the requested dates",
            lab.info.id,
            accepted.len()
        );
    }

    if accepted.is_empty() {
        return Err(ValidationError::NoValidOccurrences(skipped).into());
    }
    Ok(CreationPlan {
        pattern: Some(RecurrencePattern {
            group_id,
            lab_id: lab.info.id,
            recurrence,
        }),
        accepted,
        skipped,
    })
}

/// The reason an occurrence is skipped, if any. Errors other than a broken
/// rule or a conflict abort the whole request.
fn check_occurrence(
    lab: &LabState,
    calendar: &Calendar<'_>,
    scope: &Scope,
    span: &Span,
    now: NaiveDateTime,
) -> Result<Option<SkipReason>, EngineError> {
    let checked = || -> Result<(), EngineError> {
        calendar.check_window(span)?;
        check_not_past(span, now)?;
        check_no_conflict(lab, scope, span, None, Blocking::Active)
    };
    match checked() {
        Ok(()) => Ok(None),
        Err(EngineError::Validation(e)) => Ok(Some(SkipReason::Invalid(e))),
        Err(EngineError::Conflict(ids)) => Ok(Some(SkipReason::Conflict(ids))),
        Err(e) => Err(e),
    }
}

/// PENDING → APPROVED | DECLINED | CANCELLED, APPROVED → CANCELLED.
pub fn can_transition(from: ReservationStatus, to: ReservationStatus) -> bool {
    use ReservationStatus::*;
    matches!(
        (from, to),
        (Pending, Approved) | (Pending, Declined) | (Pending, Cancelled) | (Approved, Cancelled)
    )
}

pub fn check_transition(
    reservation: &Reservation,
    to: ReservationStatus,
) -> Result<(), StateError> {
    if can_transition(reservation.status, to) {
        Ok(())
    } else {
        Err(StateError::IllegalTransition {
            id: reservation.id,
            from: reservation.status,
            to,
        })
    }
}

/// Owners may withdraw any non-terminal reservation; lab managers may cancel
/// anything not already cancelled or declined. Both reduce to the transition
/// table once the caller holds one of the two capabilities.
pub fn check_cancel(reservation: &Reservation, by: &Actor) -> Result<(), EngineError> {
    if !by.is_owner && !by.is_lab_manager {
        return Err(EngineError::Forbidden(
            "only the owner or a lab manager may cancel a reservation",
        ));
    }
    check_transition(reservation, ReservationStatus::Cancelled)?;
    Ok(())
}
