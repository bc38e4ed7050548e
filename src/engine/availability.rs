use crate::model::*;

use super::calendar::Calendar;
use super::conflict::{find_conflicts, Blocking};

/// Free windows for `scope` on the date of `day`: the lab's open window minus
/// every active reservation that contends with the scope.
pub fn free_windows(
    calendar: &Calendar<'_>,
    lab: &LabState,
    scope: &Scope,
    day: chrono::NaiveDate,
) -> Vec<Span> {
    let Some(open) = calendar.open_window(day) else {
        return Vec::new();
    };
    let mut taken: Vec<Span> = find_conflicts(lab, scope, &open, None, Blocking::Active)
        .into_iter()
        .map(|r| r.span)
        .collect();
    taken.sort_by_key(|s| s.start);
    subtract_intervals(&[open], &merge_overlapping(&taken))
}

/// Merge sorted overlapping/adjacent spans into disjoint spans.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`; both sorted by start and internally disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut cursor = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= cursor {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < b.end {
            let r = &to_remove[j];
            if r.start > cursor {
                result.push(Span::new(cursor, r.start));
            }
            cursor = cursor.max(r.end);
            j += 1;
        }

        if cursor < b.end {
            result.push(Span::new(cursor, b.end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
    use ulid::Ulid;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 3, 4).unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        day().and_hms_opt(h, m, 0).unwrap()
    }

    fn s(h1: u32, m1: u32, h2: u32, m2: u32) -> Span {
        Span::new(at(h1, m1), at(h2, m2))
    }

    #[test]
    fn subtract_punches_holes() {
        let base = vec![s(9, 0, 17, 0)];
        let remove = vec![s(10, 0, 11, 0), s(13, 0, 14, 30)];
        assert_eq!(
            subtract_intervals(&base, &remove),
            vec![s(9, 0, 10, 0), s(11, 0, 13, 0), s(14, 30, 17, 0)]
        );
    }

    #[test]
    fn subtract_full_and_edge_overlaps() {
        assert!(subtract_intervals(&[s(10, 0, 11, 0)], &[s(9, 0, 12, 0)]).is_empty());
        assert_eq!(
            subtract_intervals(&[s(10, 0, 12, 0)], &[s(9, 0, 11, 0)]),
            vec![s(11, 0, 12, 0)]
        );
        assert_eq!(
            subtract_intervals(&[s(10, 0, 12, 0)], &[s(12, 0, 13, 0)]),
            vec![s(10, 0, 12, 0)]
        );
    }

    #[test]
    fn merge_overlapping_and_adjacent() {
        let spans = vec![s(9, 0, 10, 0), s(9, 30, 11, 0), s(11, 0, 12, 0), s(13, 0, 14, 0)];
        assert_eq!(merge_overlapping(&spans), vec![s(9, 0, 12, 0), s(13, 0, 14, 0)]);
    }

    #[test]
    fn free_windows_for_workstation() {
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let five = NaiveTime::from_hms_opt(17, 0, 0).unwrap();
        let mut lab = LabState::new(LabInfo {
            id: Ulid::new(),
            name: "Chem".into(),
            capacity: 2,
            default_hours: Some(DailyHours::new(nine, five)),
        });
        let (w1, w2) = (Ulid::new(), Ulid::new());
        let mut book = |scope: Scope, span: Span, status: ReservationStatus| {
            lab.insert_reservation(Reservation {
                id: Ulid::new(),
                lab_id: Ulid::nil(),
                owner: UserId::from("u"),
                span,
                description: None,
                status,
                scope,
                recurring_group_id: None,
                created_at: span.start,
                updated_at: span.start,
            })
        };
        book(Scope::Workstations(vec![w1]), s(10, 0, 11, 0), ReservationStatus::Approved);
        book(Scope::Workstations(vec![w2]), s(12, 0, 13, 0), ReservationStatus::Pending);
        book(Scope::WholeLab, s(15, 0, 16, 0), ReservationStatus::Pending);
        book(Scope::Workstations(vec![w1]), s(13, 0, 14, 0), ReservationStatus::Cancelled);

        let cal = Calendar::new(&lab, &[]);
        assert_eq!(
            free_windows(&cal, &lab, &Scope::Workstations(vec![w1]), day()),
            vec![s(9, 0, 10, 0), s(11, 0, 15, 0), s(16, 0, 17, 0)]
        );
        assert_eq!(
            free_windows(&cal, &lab, &Scope::WholeLab, day()),
            vec![s(9, 0, 10, 0), s(11, 0, 12, 0), s(13, 0, 15, 0), s(16, 0, 17, 0)]
        );
    }
}
