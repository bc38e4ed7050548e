use std::iter::FusedIterator;

use chrono::{Days, Months, NaiveDate, NaiveTime};

use crate::limits::{MAX_INTERVAL_DAYS, MAX_OCCURRENCES, MAX_RECURRENCE_CANDIDATES};
use crate::model::*;

use super::calendar::{Calendar, ClosedBy, DayStatus};
use super::error::ValidationError;

/// Lazily walks a series, yielding the window on every date the calendar
/// reports open. Closed dates are recorded in `closed()` and do not count
/// toward a `Count` bound.
///
/// Stops at the first candidate on or after an `Until` date, once `Count`
/// dates were yielded, or after `MAX_RECURRENCE_CANDIDATES` candidates,
/// whichever comes first.
pub struct Occurrences<'c, 'a> {
    calendar: &'c Calendar<'a>,
    start: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
    kind: RecurrenceKind,
    bound: SeriesBound,
    index: u32,
    accepted: u32,
    closed: Vec<(NaiveDate, ClosedBy)>,
    truncated: bool,
    done: bool,
}

/// Validate a recurrence and start expanding it from `start`.
pub fn expand<'c, 'a>(
    calendar: &'c Calendar<'a>,
    start: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
    recurrence: &Recurrence,
) -> Result<Occurrences<'c, 'a>, ValidationError> {
    if end_time <= start_time {
        return Err(ValidationError::InvalidRange {
            start: start.and_time(start_time),
            end: start.and_time(end_time),
        });
    }
    if let RecurrenceKind::Custom { interval_days } = recurrence.kind
        && !(1..=MAX_INTERVAL_DAYS).contains(&interval_days)
    {
        return Err(ValidationError::InvalidInterval(interval_days));
    }
    match recurrence.bound {
        SeriesBound::Count(0) => {
            return Err(ValidationError::InvalidBound("occurrence count must be positive"));
        }
        SeriesBound::Count(n) if n > MAX_OCCURRENCES => {
            return Err(ValidationError::InvalidBound("too many occurrences"));
        }
        SeriesBound::Until(end) if end <= start => {
            return Err(ValidationError::InvalidBound("end date must be after the start date"));
        }
        _ => {}
    }
    Ok(Occurrences {
        calendar,
        start,
        start_time,
        end_time,
        kind: recurrence.kind,
        bound: recurrence.bound,
        index: 0,
        accepted: 0,
        closed: Vec::new(),
        truncated: false,
        done: false,
    })
}

impl Occurrences<'_, '_> {
    /// Candidate dates skipped so far because the lab was closed.
    pub fn closed(&self) -> &[(NaiveDate, ClosedBy)] {
        &self.closed
    }

    /// True if the lookahead ran out before a `Count` bound was met.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// The k-th candidate date. Monthly steps anchor on the start date, so a
    /// 31st lands on the last day of shorter months and returns to the 31st.
    fn candidate(&self, k: u32) -> Option<NaiveDate> {
        let step_days = |n: u64| self.start.checked_add_days(Days::new(n * u64::from(k)));
        match self.kind {
            RecurrenceKind::Weekly => step_days(7),
            RecurrenceKind::Biweekly => step_days(14),
            RecurrenceKind::Custom { interval_days } => step_days(interval_days.unsigned_abs()),
            RecurrenceKind::Monthly => self.start.checked_add_months(Months::new(k)),
        }
    }

    fn finish(&mut self) -> Option<Span> {
        self.done = true;
        None
    }
}

impl Iterator for Occurrences<'_, '_> {
    type Item = Span;

    fn next(&mut self) -> Option<Span> {
        while !self.done {
            if let SeriesBound::Count(n) = self.bound
                && self.accepted >= n
            {
                return self.finish();
            }
            if self.index >= MAX_RECURRENCE_CANDIDATES {
                self.truncated = matches!(self.bound, SeriesBound::Count(_));
                return self.finish();
            }
            let Some(date) = self.candidate(self.index) else {
                return self.finish();
            };
            self.index += 1;
            if let SeriesBound::Until(end) = self.bound
                && date >= end
            {
                return self.finish();
            }
            match self.calendar.status(date) {
                DayStatus::Closed(by) => self.closed.push((date, by)),
                DayStatus::Open(_) => {
                    self.accepted += 1;
                    return Some(Span::on(date, self.start_time, self.end_time));
                }
            }
        }
        None
    }
}

impl FusedIterator for Occurrences<'_, '_> {}
