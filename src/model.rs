use std::collections::HashMap;
use std::fmt;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Half-open window `[start, end)` in lab-local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Span {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// The window `start..end` on `date`.
    pub fn on(date: NaiveDate, start: NaiveTime, end: NaiveTime) -> Self {
        Self::new(date.and_time(start), date.and_time(end))
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn date(&self) -> NaiveDate {
        self.start.date()
    }

    pub fn is_single_day(&self) -> bool {
        self.start.date() == self.end.date()
    }
}

/// Opaque user reference handed over by the identity subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The caller, with capabilities precomputed by the authorization layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub is_owner: bool,
    pub is_lab_manager: bool,
}

impl Actor {
    pub fn owner(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            is_owner: true,
            is_lab_manager: false,
        }
    }

    pub fn manager(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            is_owner: false,
            is_lab_manager: true,
        }
    }

    /// Neither owner nor manager of whatever is being touched.
    pub fn other(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            is_owner: false,
            is_lab_manager: false,
        }
    }
}

// ── Labs and reference data ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl DailyHours {
    pub fn new(open: NaiveTime, close: NaiveTime) -> Self {
        Self { open, close }
    }

    pub fn is_valid(&self) -> bool {
        self.open < self.close
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabInfo {
    pub id: Ulid,
    pub name: String,
    /// Max number of workstations the lab holds.
    pub capacity: u32,
    /// Fallback hours for weekdays without an explicit rule. `None` = closed.
    pub default_hours: Option<DailyHours>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workstation {
    pub id: Ulid,
    pub lab_id: Ulid,
    /// Human-facing identifier, unique within the lab.
    pub code: String,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DayHours {
    Closed,
    Open(DailyHours),
}

/// Per-weekday override of a lab's default hours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingHoursRule {
    pub id: Ulid,
    pub lab_id: Ulid,
    pub weekday: Weekday,
    pub hours: DayHours,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClosureKind {
    Date(NaiveDate),
    Weekday(Weekday),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureRule {
    pub id: Ulid,
    /// `None` closes every lab.
    pub lab_id: Option<Ulid>,
    pub kind: ClosureKind,
    pub reason: Option<String>,
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Approved,
    Declined,
    Cancelled,
}

impl ReservationStatus {
    /// Whether a reservation in this status holds its window.
    pub fn is_blocking(self) -> bool {
        matches!(self, Self::Pending | Self::Approved)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Declined | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Declined => "declined",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a reservation occupies inside its lab.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    WholeLab,
    Workstations(Vec<Ulid>),
}

impl Scope {
    pub fn is_whole_lab(&self) -> bool {
        matches!(self, Scope::WholeLab)
    }

    /// Empty for whole-lab scopes.
    pub fn workstation_ids(&self) -> &[Ulid] {
        match self {
            Scope::WholeLab => &[],
            Scope::Workstations(ids) => ids,
        }
    }

    /// Two scopes in the same lab contend if either is whole-lab or they
    /// share a workstation.
    pub fn contends_with(&self, other: &Scope) -> bool {
        match (self, other) {
            (Scope::WholeLab, _) | (_, Scope::WholeLab) => true,
            (Scope::Workstations(a), Scope::Workstations(b)) => a.iter().any(|id| b.contains(id)),
        }
    }

    /// Sorted, deduplicated copy.
    pub fn normalized(&self) -> Scope {
        match self {
            Scope::WholeLab => Scope::WholeLab,
            Scope::Workstations(ids) => {
                let mut ids = ids.clone();
                ids.sort();
                ids.dedup();
                Scope::Workstations(ids)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub lab_id: Ulid,
    pub owner: UserId,
    pub span: Span,
    pub description: Option<String>,
    pub status: ReservationStatus,
    pub scope: Scope,
    pub recurring_group_id: Option<Ulid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Reservation {
    pub fn snapshot(&self) -> ReservationSnapshot {
        ReservationSnapshot {
            status: self.status,
            span: self.span,
            description: self.description.clone(),
            scope: self.scope.clone(),
        }
    }

    pub fn values(&self) -> EditValues {
        EditValues {
            span: self.span,
            description: self.description.clone(),
            scope: self.scope.clone(),
        }
    }
}

// ── Recurrence ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecurrenceKind {
    Weekly,
    Biweekly,
    Monthly,
    Custom { interval_days: i64 },
}

/// Where a series stops. Exactly one bound per series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeriesBound {
    /// Exclusive end date.
    Until(NaiveDate),
    /// Number of accepted (open) dates.
    Count(u32),
}

/// A recurrence request, before it owns a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    pub kind: RecurrenceKind,
    pub bound: SeriesBound,
}

impl Recurrence {
    pub fn weekly(bound: SeriesBound) -> Self {
        Self { kind: RecurrenceKind::Weekly, bound }
    }

    pub fn biweekly(bound: SeriesBound) -> Self {
        Self { kind: RecurrenceKind::Biweekly, bound }
    }

    pub fn monthly(bound: SeriesBound) -> Self {
        Self { kind: RecurrenceKind::Monthly, bound }
    }

    pub fn every_days(interval_days: i64, bound: SeriesBound) -> Self {
        Self {
            kind: RecurrenceKind::Custom { interval_days },
            bound,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrencePattern {
    pub group_id: Ulid,
    pub lab_id: Ulid,
    pub recurrence: Recurrence,
}

// ── Edit proposals ───────────────────────────────────────────────

/// The reservation as it was when a proposal was filed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationSnapshot {
    pub status: ReservationStatus,
    pub span: Span,
    pub description: Option<String>,
    pub scope: Scope,
}

/// The editable fields of a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditValues {
    pub span: Span,
    pub description: Option<String>,
    pub scope: Scope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EditResolution {
    Pending,
    Approved,
    Rejected,
}

impl EditResolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditProposal {
    pub id: Ulid,
    pub reservation_id: Ulid,
    pub lab_id: Ulid,
    pub proposed_by: UserId,
    pub proposed_at: NaiveDateTime,
    pub original: ReservationSnapshot,
    pub proposed: EditValues,
    pub resolution: EditResolution,
    pub resolved_by: Option<UserId>,
    pub resolved_at: Option<NaiveDateTime>,
}

// ── Per-lab state ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LabState {
    pub info: LabInfo,
    pub workstations: Vec<Workstation>,
    /// At most one rule per weekday.
    pub hours: Vec<OperatingHoursRule>,
    /// Lab-specific closures only; global ones live on the engine.
    pub closures: Vec<ClosureRule>,
    /// All reservations ever made in the lab, sorted by `span.start`.
    pub reservations: Vec<Reservation>,
    pub patterns: HashMap<Ulid, RecurrencePattern>,
    pub proposals: HashMap<Ulid, EditProposal>,
}

impl LabState {
    pub fn new(info: LabInfo) -> Self {
        Self {
            info,
            workstations: Vec::new(),
            hours: Vec::new(),
            closures: Vec::new(),
            reservations: Vec::new(),
            patterns: HashMap::new(),
            proposals: HashMap::new(),
        }
    }

    pub fn workstation(&self, id: &Ulid) -> Option<&Workstation> {
        self.workstations.iter().find(|w| w.id == *id)
    }

    pub fn hours_for(&self, weekday: Weekday) -> Option<&OperatingHoursRule> {
        self.hours.iter().find(|r| r.weekday == weekday)
    }

    /// Insert or replace the rule for the rule's weekday.
    pub fn set_hours(&mut self, rule: OperatingHoursRule) {
        self.hours.retain(|r| r.weekday != rule.weekday && r.id != rule.id);
        self.hours.push(rule);
    }

    /// Insert reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn reservation(&self, id: &Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == *id)
    }

    pub fn reservation_mut(&mut self, id: &Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == *id)
    }

    /// Return only reservations whose span overlaps the query window.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }

    pub fn pending_proposal_for(&self, reservation_id: &Ulid) -> Option<&EditProposal> {
        self.proposals
            .values()
            .find(|p| {
                p.reservation_id == *reservation_id && p.resolution == EditResolution::Pending
            })
    }
}

/// The event types. This is the WAL record format.
///
/// Each record is one atomic unit: a whole recurring group is created by a
/// single `ReservationsCreated`, and an approved edit is applied by the same
/// `EditResolved` that closes the proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    LabCreated {
        lab: LabInfo,
    },
    LabUpdated {
        lab: LabInfo,
    },
    WorkstationAdded {
        workstation: Workstation,
    },
    WorkstationUpdated {
        id: Ulid,
        lab_id: Ulid,
        active: bool,
    },
    OperatingHoursSet {
        rule: OperatingHoursRule,
    },
    OperatingHoursCleared {
        id: Ulid,
        lab_id: Ulid,
    },
    ClosureAdded {
        closure: ClosureRule,
    },
    ClosureRemoved {
        id: Ulid,
        lab_id: Option<Ulid>,
    },
    ReservationsCreated {
        lab_id: Ulid,
        pattern: Option<RecurrencePattern>,
        reservations: Vec<Reservation>,
    },
    StatusChanged {
        lab_id: Ulid,
        ids: Vec<Ulid>,
        status: ReservationStatus,
        at: NaiveDateTime,
    },
    EditProposed {
        proposal: EditProposal,
    },
    EditResolved {
        id: Ulid,
        lab_id: Ulid,
        resolution: EditResolution,
        resolved_by: UserId,
        resolved_at: NaiveDateTime,
        /// Present iff approved; written into the reservation.
        applied: Option<EditValues>,
    },
}
