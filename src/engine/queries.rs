use chrono::{Duration, NaiveDate};
use ulid::Ulid;

use crate::limits::MAX_QUERY_WINDOW_DAYS;
use crate::model::*;

use super::availability;
use super::calendar::{Calendar, DayStatus};
use super::conflict::validate_scope;
use super::error::ValidationError;
use super::{Engine, EngineError, EntityKind, SharedLabState};

impl Engine {
    fn all_labs(&self) -> Vec<SharedLabState> {
        self.labs.iter().map(|e| e.value().clone()).collect()
    }

    pub async fn get_lab(&self, id: Ulid) -> Result<LabInfo, EngineError> {
        let guard = self.lab_read(&id).await?;
        Ok(guard.info.clone())
    }

    /// Every lab, ordered by name.
    pub async fn list_labs(&self) -> Vec<LabInfo> {
        let mut labs = Vec::with_capacity(self.labs.len());
        for ls in self.all_labs() {
            labs.push(ls.read().await.info.clone());
        }
        labs.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        labs
    }

    pub async fn workstations(&self, lab_id: Ulid) -> Result<Vec<Workstation>, EngineError> {
        let guard = self.lab_read(&lab_id).await?;
        Ok(guard.workstations.clone())
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let guard = self.resolve_entity_read(&id, EntityKind::Reservation).await?;
        guard
            .reservation(&id)
            .cloned()
            .ok_or(EngineError::NotFound(EntityKind::Reservation, id))
    }

    /// Reservations of any status overlapping `span`, ordered by start.
    pub async fn reservations_in_range(
        &self,
        lab_id: Ulid,
        span: Span,
    ) -> Result<Vec<Reservation>, EngineError> {
        if span.end <= span.start {
            return Err(ValidationError::InvalidRange {
                start: span.start,
                end: span.end,
            }
            .into());
        }
        if span.duration() > Duration::days(MAX_QUERY_WINDOW_DAYS) {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let guard = self.lab_read(&lab_id).await?;
        Ok(guard.overlapping(&span).cloned().collect())
    }

    pub async fn reservations_by_group(
        &self,
        group_id: Ulid,
    ) -> Result<Vec<Reservation>, EngineError> {
        let guard = self
            .resolve_entity_read(&group_id, EntityKind::RecurringGroup)
            .await?;
        Ok(guard
            .reservations
            .iter()
            .filter(|r| r.recurring_group_id == Some(group_id))
            .cloned()
            .collect())
    }

    /// Everything `owner` has booked, across labs, ordered by start.
    pub async fn reservations_by_owner(&self, owner: &UserId) -> Vec<Reservation> {
        let mut out = Vec::new();
        for ls in self.all_labs() {
            let guard = ls.read().await;
            out.extend(guard.reservations.iter().filter(|r| r.owner == *owner).cloned());
        }
        out.sort_by_key(|r| (r.span.start, r.id));
        out
    }

    pub async fn reservations_by_status(
        &self,
        lab_id: Ulid,
        status: ReservationStatus,
    ) -> Result<Vec<Reservation>, EngineError> {
        let guard = self.lab_read(&lab_id).await?;
        Ok(guard
            .reservations
            .iter()
            .filter(|r| r.status == status)
            .cloned()
            .collect())
    }

    pub async fn recurrence_pattern(
        &self,
        group_id: Ulid,
    ) -> Result<RecurrencePattern, EngineError> {
        let guard = self
            .resolve_entity_read(&group_id, EntityKind::RecurringGroup)
            .await?;
        guard
            .patterns
            .get(&group_id)
            .cloned()
            .ok_or(EngineError::NotFound(EntityKind::RecurringGroup, group_id))
    }

    pub async fn get_proposal(&self, id: Ulid) -> Result<EditProposal, EngineError> {
        let guard = self.resolve_entity_read(&id, EntityKind::Proposal).await?;
        guard
            .proposals
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(EntityKind::Proposal, id))
    }

    /// Proposals filed on a reservation, oldest first, optionally filtered by resolution.
    pub async fn proposals_for_reservation(
        &self,
        reservation_id: Ulid,
        resolution: Option<EditResolution>,
    ) -> Result<Vec<EditProposal>, EngineError> {
        let guard = self
            .resolve_entity_read(&reservation_id, EntityKind::Reservation)
            .await?;
        let mut out: Vec<EditProposal> = guard
            .proposals
            .values()
            .filter(|p| p.reservation_id == reservation_id)
            .filter(|p| resolution.is_none_or(|want| p.resolution == want))
            .cloned()
            .collect();
        out.sort_by_key(|p| (p.proposed_at, p.id));
        Ok(out)
    }

    /// Whether the lab is open on `date`, and with which hours.
    pub async fn day_status(
        &self,
        lab_id: Ulid,
        date: NaiveDate,
    ) -> Result<DayStatus, EngineError> {
        let guard = self.lab_read(&lab_id).await?;
        let global_closures = self.global_closure_snapshot();
        Ok(Calendar::new(&guard, &global_closures).status(date))
    }

    /// Open time on `date` that `scope` could still book.
    pub async fn free_windows(
        &self,
        lab_id: Ulid,
        scope: Scope,
        date: NaiveDate,
    ) -> Result<Vec<Span>, EngineError> {
        let guard = self.lab_read(&lab_id).await?;
        let global_closures = self.global_closure_snapshot();
        let scope = validate_scope(&guard, &scope)?;
        let calendar = Calendar::new(&guard, &global_closures);
        Ok(availability::free_windows(&calendar, &guard, &scope, date))
    }

    pub fn global_closures(&self) -> Vec<ClosureRule> {
        self.global_closure_snapshot()
    }
}
