use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::limits::MAX_WORKSTATIONS_PER_RESERVATION;
use crate::model::*;

use super::error::ValidationError;
use super::EngineError;

/// Which reservations hold their window against a new claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blocking {
    /// PENDING and APPROVED. Used when creating and when applying edits.
    Active,
    /// APPROVED only. Used when approving: two pending requests for the same
    /// slot may coexist, and whichever is approved first wins.
    Approved,
}

impl Blocking {
    fn blocks(self, status: ReservationStatus) -> bool {
        match self {
            Blocking::Active => status.is_blocking(),
            Blocking::Approved => status == ReservationStatus::Approved,
        }
    }
}

/// Check a requested scope against the lab's workstations and return it
/// normalized (sorted, no duplicates).
pub fn validate_scope(lab: &LabState, scope: &Scope) -> Result<Scope, EngineError> {
    let ids = match scope {
        Scope::WholeLab => return Ok(Scope::WholeLab),
        Scope::Workstations(ids) => ids,
    };
    if ids.is_empty() {
        return Err(ValidationError::NoWorkstations.into());
    }
    if ids.len() > MAX_WORKSTATIONS_PER_RESERVATION {
        return Err(EngineError::LimitExceeded("too many workstations in one reservation"));
    }
    for id in ids {
        match lab.workstation(id) {
            None => return Err(ValidationError::WorkstationForeign(*id).into()),
            Some(w) if !w.active => return Err(ValidationError::WorkstationInactive(*id).into()),
            Some(_) => {}
        }
    }
    Ok(scope.normalized())
}

/// Every reservation in `lab` that blocks `scope` during `span`.
///
/// Windows conflict iff `existing.start < span.end && existing.end > span.start`;
/// touching boundaries do not. `exclude` lets an edit re-check its own
/// reservation's new window without meeting itself.
pub fn find_conflicts<'a>(
    lab: &'a LabState,
    scope: &Scope,
    span: &Span,
    exclude: Option<Ulid>,
    blocking: Blocking,
) -> Vec<&'a Reservation> {
    lab.overlapping(span)
        .filter(|r| Some(r.id) != exclude)
        .filter(|r| blocking.blocks(r.status))
        .filter(|r| r.scope.contends_with(scope))
        .collect()
}

pub fn check_no_conflict(
    lab: &LabState,
    scope: &Scope,
    span: &Span,
    exclude: Option<Ulid>,
    blocking: Blocking,
) -> Result<(), EngineError> {
    let conflicts = find_conflicts(lab, scope, span, exclude, blocking);
    if conflicts.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Conflict(conflicts.iter().map(|r| r.id).collect()))
    }
}

pub fn check_not_past(span: &Span, now: NaiveDateTime) -> Result<(), ValidationError> {
    if span.start < now {
        return Err(ValidationError::InPast {
            start: span.start,
            now,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2030, 3, 4)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    struct Fixture {
        lab: LabState,
        w1: Ulid,
        w2: Ulid,
        retired: Ulid,
    }

    fn fixture() -> Fixture {
        let mut lab = LabState::new(LabInfo {
            id: Ulid::new(),
            name: "Robotics".into(),
            capacity: 3,
            default_hours: None,
        });
        let mut add = |code: &str, active: bool| {
            let id = Ulid::new();
            lab.workstations.push(Workstation {
                id,
                lab_id: lab.info.id,
                code: code.into(),
                active,
            });
            id
        };
        let w1 = add("R1", true);
        let w2 = add("R2", true);
        let retired = add("R3", false);
        Fixture { lab, w1, w2, retired }
    }

    fn book(
        lab: &mut LabState,
        scope: Scope,
        start: NaiveDateTime,
        end: NaiveDateTime,
        status: ReservationStatus,
    ) -> Ulid {
        let id = Ulid::new();
        lab.insert_reservation(Reservation {
            id,
            lab_id: lab.info.id,
            owner: UserId::from("someone"),
            span: Span::new(start, end),
            description: None,
            status,
            scope,
            recurring_group_id: None,
            created_at: start,
            updated_at: start,
        });
        id
    }

    #[test]
    fn overlap_on_shared_workstation_conflicts() {
        let mut f = fixture();
        let existing = book(
            &mut f.lab,
            Scope::Workstations(vec![f.w1]),
            at(10, 0),
            at(11, 0),
            ReservationStatus::Approved,
        );
        let hits = find_conflicts(
            &f.lab,
            &Scope::Workstations(vec![f.w1]),
            &Span::new(at(10, 30), at(11, 30)),
            None,
            Blocking::Active,
        );
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, existing);
    }

    #[test]
    fn touching_boundary_does_not_conflict() {
        let mut f = fixture();
        book(
            &mut f.lab,
            Scope::Workstations(vec![f.w1]),
            at(10, 0),
            at(11, 0),
            ReservationStatus::Approved,
        );
        assert!(check_no_conflict(
            &f.lab,
            &Scope::Workstations(vec![f.w1]),
            &Span::new(at(11, 0), at(12, 0)),
            None,
            Blocking::Active,
        )
        .is_ok());
    }

    #[test]
    fn disjoint_workstations_do_not_conflict() {
        let mut f = fixture();
        book(
            &mut f.lab,
            Scope::Workstations(vec![f.w1]),
            at(10, 0),
            at(11, 0),
            ReservationStatus::Approved,
        );
        assert!(find_conflicts(
            &f.lab,
            &Scope::Workstations(vec![f.w2]),
            &Span::new(at(10, 0), at(11, 0)),
            None,
            Blocking::Active,
        )
        .is_empty());
    }

    #[test]
    fn whole_lab_conflicts_both_ways() {
        let mut f = fixture();
        book(
            &mut f.lab,
            Scope::Workstations(vec![f.w2]),
            at(10, 0),
            at(11, 0),
            ReservationStatus::Pending,
        );
        let span = Span::new(at(9, 0), at(12, 0));
        let whole = find_conflicts(&f.lab, &Scope::WholeLab, &span, None, Blocking::Active);
        assert_eq!(whole.len(), 1);

        let mut g = fixture();
        book(&mut g.lab, Scope::WholeLab, at(10, 0), at(11, 0), ReservationStatus::Approved);
        let partial = find_conflicts(
            &g.lab,
            &Scope::Workstations(vec![g.w1]),
            &Span::new(at(10, 45), at(11, 15)),
            None,
            Blocking::Active,
        );
        assert_eq!(partial.len(), 1);
    }

    #[test]
    fn declined_and_cancelled_never_block() {
        let mut f = fixture();
        book(&mut f.lab, Scope::WholeLab, at(10, 0), at(11, 0), ReservationStatus::Declined);
        book(&mut f.lab, Scope::WholeLab, at(10, 0), at(11, 0), ReservationStatus::Cancelled);
        let span = Span::new(at(10, 0), at(11, 0));
        assert!(find_conflicts(&f.lab, &Scope::WholeLab, &span, None, Blocking::Active).is_empty());
    }

    #[test]
    fn approved_only_ignores_pending() {
        let mut f = fixture();
        book(&mut f.lab, Scope::WholeLab, at(10, 0), at(11, 0), ReservationStatus::Pending);
        let span = Span::new(at(10, 0), at(11, 0));
        let active = find_conflicts(&f.lab, &Scope::WholeLab, &span, None, Blocking::Active);
        assert_eq!(active.len(), 1);
        let approved = find_conflicts(&f.lab, &Scope::WholeLab, &span, None, Blocking::Approved);
        assert!(approved.is_empty());
    }

    #[test]
    fn exclude_skips_own_reservation() {
        let mut f = fixture();
        let own = book(
            &mut f.lab,
            Scope::Workstations(vec![f.w1]),
            at(10, 0),
            at(11, 0),
            ReservationStatus::Approved,
        );
        let span = Span::new(at(10, 30), at(11, 30));
        let scope = Scope::Workstations(vec![f.w1]);
        assert!(check_no_conflict(&f.lab, &scope, &span, Some(own), Blocking::Active).is_ok());
        assert!(matches!(
            check_no_conflict(&f.lab, &scope, &span, None, Blocking::Active),
            Err(EngineError::Conflict(ids)) if ids == vec![own]
        ));
    }

    #[test]
    fn scope_validation() {
        let f = fixture();
        assert!(matches!(
            validate_scope(&f.lab, &Scope::Workstations(vec![])),
            Err(EngineError::Validation(ValidationError::NoWorkstations))
        ));
        assert!(matches!(
            validate_scope(&f.lab, &Scope::Workstations(vec![f.w1, f.retired])),
            Err(EngineError::Validation(ValidationError::WorkstationInactive(id)))
                if id == f.retired
        ));
        let stranger = Ulid::new();
        assert!(matches!(
            validate_scope(&f.lab, &Scope::Workstations(vec![stranger])),
            Err(EngineError::Validation(ValidationError::WorkstationForeign(id))) if id == stranger
        ));
        let ok = validate_scope(&f.lab, &Scope::Workstations(vec![f.w2, f.w1, f.w2])).unwrap();
        assert_eq!(ok.workstation_ids().len(), 2);
        assert_eq!(validate_scope(&f.lab, &Scope::WholeLab).unwrap(), Scope::WholeLab);
    }

    #[test]
    fn past_windows_rejected() {
        let span = Span::new(at(10, 0), at(11, 0));
        assert!(check_not_past(&span, at(9, 0)).is_ok());
        assert!(check_not_past(&span, at(10, 0)).is_ok());
        assert!(matches!(
            check_not_past(&span, at(10, 1)),
            Err(ValidationError::InPast { .. })
        ));
    }
}
