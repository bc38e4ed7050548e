use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use ulid::Ulid;

use crate::model::{EditResolution, ReservationStatus, Span};

use super::calendar::ClosedBy;
use super::lifecycle::SkippedOccurrence;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Lab,
    Workstation,
    Reservation,
    Proposal,
    Closure,
    HoursRule,
    RecurringGroup,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Lab => "lab",
            EntityKind::Workstation => "workstation",
            EntityKind::Reservation => "reservation",
            EntityKind::Proposal => "edit proposal",
            EntityKind::Closure => "closure",
            EntityKind::HoursRule => "operating hours rule",
            EntityKind::RecurringGroup => "recurring group",
        };
        f.write_str(name)
    }
}

/// A business rule the input violates. The caller is expected to fix the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    InvalidRange {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    CrossesMidnight(Span),
    InPast {
        start: NaiveDateTime,
        now: NaiveDateTime,
    },
    LabClosed {
        date: NaiveDate,
        by: ClosedBy,
    },
    OutsideHours {
        requested: Span,
        open: Span,
    },
    NoWorkstations,
    WorkstationInactive(Ulid),
    /// Unknown, or belongs to another lab.
    WorkstationForeign(Ulid),
    InvalidInterval(i64),
    InvalidBound(&'static str),
    InvalidHours,
    NoValidOccurrences(Vec<SkippedOccurrence>),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidRange { start, end } => {
                write!(f, "end {end} must be after start {start}")
            }
            ValidationError::CrossesMidnight(span) => write!(
                f,
                "window [{}, {}) crosses midnight; book each day separately",
                span.start, span.end
            ),
            ValidationError::InPast { start, now } => {
                write!(f, "window starts at {start}, before now ({now})")
            }
            ValidationError::LabClosed { date, by } => write!(f, "lab closed on {date}: {by}"),
            ValidationError::OutsideHours { requested, open } => write!(
                f,
                "window [{}, {}) outside operating hours {}-{}",
                requested.start,
                requested.end,
                open.start.time(),
                open.end.time()
            ),
            ValidationError::NoWorkstations => {
                write!(f, "no workstations selected for a partial reservation")
            }
            ValidationError::WorkstationInactive(id) => write!(f, "workstation {id} is inactive"),
            ValidationError::WorkstationForeign(id) => {
                write!(f, "workstation {id} does not belong to this lab")
            }
            ValidationError::InvalidInterval(days) => {
                write!(f, "custom recurrence interval must be positive, got {days} days")
            }
            ValidationError::InvalidBound(msg) => write!(f, "invalid recurrence bound: {msg}"),
            ValidationError::InvalidHours => write!(f, "opening time must be before closing time"),
            ValidationError::NoValidOccurrences(skipped) => {
                write!(f, "no valid occurrences ({} dates skipped)", skipped.len())
            }
        }
    }
}

/// The operation is illegal for the current status of its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    IllegalTransition {
        id: Ulid,
        from: ReservationStatus,
        to: ReservationStatus,
    },
    NotEditable {
        id: Ulid,
        status: ReservationStatus,
    },
    ProposalAlreadyPending {
        reservation_id: Ulid,
        proposal_id: Ulid,
    },
    ProposalResolved {
        id: Ulid,
        resolution: EditResolution,
    },
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::IllegalTransition { id, from, to } => {
                write!(f, "reservation {id} cannot go from {from} to {to}")
            }
            StateError::NotEditable { id, status } => {
                write!(f, "reservation {id} is {status} and cannot be edited")
            }
            StateError::ProposalAlreadyPending {
                reservation_id,
                proposal_id,
            } => write!(
                f,
                "reservation {reservation_id} already has pending proposal {proposal_id}"
            ),
            StateError::ProposalResolved { id, resolution } => {
                write!(f, "proposal {id} already {}", resolution.as_str())
            }
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(EntityKind, Ulid),
    AlreadyExists(Ulid),
    Validation(ValidationError),
    /// Overlaps the listed blocking reservations.
    Conflict(Vec<Ulid>),
    StateConflict(StateError),
    Forbidden(&'static str),
    CapacityExceeded(u32),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Only persistence faults are worth retrying; everything else is a
    /// business-rule outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::WalError(_))
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::NotFound(kind, id) => write!(f, "{kind} not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Validation(e) => write!(f, "invalid request: {e}"),
            EngineError::Conflict(ids) => {
                write!(f, "conflicts with reservation")?;
                if ids.len() > 1 {
                    write!(f, "s")?;
                }
                for (i, id) in ids.iter().enumerate() {
                    write!(f, "{}{id}", if i == 0 { " " } else { ", " })?;
                }
                Ok(())
            }
            EngineError::StateConflict(e) => write!(f, "state conflict: {e}"),
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::CapacityExceeded(cap) => {
                write!(f, "capacity {cap} exceeded: lab has no room for more workstations")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ValidationError> for EngineError {
    fn from(e: ValidationError) -> Self {
        EngineError::Validation(e)
    }
}

impl From<StateError> for EngineError {
    fn from(e: StateError) -> Self {
        EngineError::StateConflict(e)
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::WalError(e.to_string())
    }
}
