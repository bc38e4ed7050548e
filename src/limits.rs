//! Hard limits enforced by the engine. Anything beyond these is rejected with
//! `EngineError::LimitExceeded` before touching the WAL.

pub const MAX_LABS: usize = 10_000;
pub const MAX_WORKSTATIONS_PER_LAB: usize = 2_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_DESCRIPTION_LEN: usize = 2_000;
pub const MAX_RESERVATIONS_PER_LAB: usize = 500_000;

/// Upper bound on accepted occurrences for one recurrence request.
pub const MAX_OCCURRENCES: u32 = 366;

/// Candidate dates examined per expansion, accepted or skipped. Bounds the
/// lookahead of a count-bound series whose dates keep landing on closures.
pub const MAX_RECURRENCE_CANDIDATES: u32 = 730;

/// Largest CUSTOM step.
pub const MAX_INTERVAL_DAYS: i64 = 366;

/// Widest range accepted by range queries.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 400;

/// Workstation ids named by one reservation.
pub const MAX_WORKSTATIONS_PER_RESERVATION: usize = 256;
