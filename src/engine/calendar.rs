use std::fmt;

use chrono::{Datelike, NaiveDate, Weekday};
use ulid::Ulid;

use crate::model::*;

use super::error::ValidationError;

/// Which rule closed a date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedBy {
    DateClosure(Ulid),
    WeekdayClosure(Ulid),
    WeekdayRule(Weekday),
    /// No rule for the weekday and no default hours on the lab.
    NoHours,
}

impl fmt::Display for ClosedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClosedBy::DateClosure(id) => write!(f, "closure {id}"),
            ClosedBy::WeekdayClosure(id) => write!(f, "weekly closure {id}"),
            ClosedBy::WeekdayRule(day) => write!(f, "closed every {day}"),
            ClosedBy::NoHours => write!(f, "no operating hours"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayStatus {
    Open(DailyHours),
    Closed(ClosedBy),
}

/// Read-only view over one lab's hours and the closures that apply to it.
///
/// Resolution order for a date:
/// 1. a date closure (global or lab) closes it;
/// 2. a weekday closure (global or lab) closes it;
/// 3. the lab's rule for the weekday decides, closed or open;
/// 4. otherwise the lab's default hours, or closed when it has none.
pub struct Calendar<'a> {
    lab: &'a LabState,
    global_closures: &'a [ClosureRule],
}

impl<'a> Calendar<'a> {
    pub fn new(lab: &'a LabState, global_closures: &'a [ClosureRule]) -> Self {
        Self { lab, global_closures }
    }

    fn closures(&self) -> impl Iterator<Item = &'a ClosureRule> {
        self.global_closures.iter().chain(self.lab.closures.iter())
    }

    pub fn status(&self, date: NaiveDate) -> DayStatus {
        if let Some(c) = self.closures().find(|c| c.kind == ClosureKind::Date(date)) {
            return DayStatus::Closed(ClosedBy::DateClosure(c.id));
        }
        let weekday = date.weekday();
        if let Some(c) = self.closures().find(|c| c.kind == ClosureKind::Weekday(weekday)) {
            return DayStatus::Closed(ClosedBy::WeekdayClosure(c.id));
        }
        match self.lab.hours_for(weekday).map(|r| r.hours) {
            Some(DayHours::Closed) => DayStatus::Closed(ClosedBy::WeekdayRule(weekday)),
            Some(DayHours::Open(hours)) => DayStatus::Open(hours),
            None => match self.lab.info.default_hours {
                Some(hours) => DayStatus::Open(hours),
                None => DayStatus::Closed(ClosedBy::NoHours),
            },
        }
    }

    /// The open window of `date`, if any.
    pub fn open_window(&self, date: NaiveDate) -> Option<Span> {
        match self.status(date) {
            DayStatus::Open(h) if h.is_valid() => Some(Span::on(date, h.open, h.close)),
            _ => None,
        }
    }

    /// Check that `span` sits on one date and inside that date's open window.
    pub fn check_window(&self, span: &Span) -> Result<Span, ValidationError> {
        if !span.is_single_day() {
            return Err(ValidationError::CrossesMidnight(*span));
        }
        let date = span.date();
        let hours = match self.status(date) {
            DayStatus::Closed(by) => return Err(ValidationError::LabClosed { date, by }),
            DayStatus::Open(hours) => hours,
        };
        if !hours.is_valid() {
            return Err(ValidationError::LabClosed {
                date,
                by: ClosedBy::NoHours,
            });
        }
        let open = Span::on(date, hours.open, hours.close);
        if !open.contains_span(span) {
            return Err(ValidationError::OutsideHours {
                requested: *span,
                open,
            });
        }
        Ok(open)
    }
}
