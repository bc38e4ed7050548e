use std::sync::Arc;

use chrono::Weekday;
use tokio::sync::RwLock;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_no_conflict, Blocking};
use super::error::ValidationError;
use super::lifecycle::{
    check_cancel, check_transition, plan_creation, BookingRequest, CreationResult,
};
use super::{Engine, EngineError, EntityKind};

/// Count a rejected overlap before handing the error back.
pub(super) fn note_conflict(operation: &'static str, err: EngineError) -> EngineError {
    if let EngineError::Conflict(ids) = &err {
        metrics::counter!(observability::CONFLICTS_TOTAL, "operation" => operation).increment(1);
        debug!("{operation} rejected: overlaps {} reservation(s)", ids.len());
    }
    err
}

fn check_name(name: &str) -> Result<(), EngineError> {
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

pub(super) fn check_description(description: Option<&str>) -> Result<(), EngineError> {
    if let Some(d) = description
        && d.len() > MAX_DESCRIPTION_LEN
    {
        return Err(EngineError::LimitExceeded("description too long"));
    }
    Ok(())
}

fn check_hours(hours: Option<DailyHours>) -> Result<(), EngineError> {
    match hours {
        Some(h) if !h.is_valid() => Err(ValidationError::InvalidHours.into()),
        _ => Ok(()),
    }
}

impl Engine {
    // ── Labs and reference data ──────────────────────────────

    pub async fn create_lab(
        &self,
        id: Ulid,
        name: String,
        capacity: u32,
        default_hours: Option<DailyHours>,
    ) -> Result<LabInfo, EngineError> {
        let _catalog = self.catalog.write().await;
        if self.labs.len() >= MAX_LABS {
            return Err(EngineError::LimitExceeded("too many labs"));
        }
        check_name(&name)?;
        check_hours(default_hours)?;
        if self.labs.contains_key(&id) || self.entity_to_lab.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let lab = LabInfo {
            id,
            name,
            capacity,
            default_hours,
        };
        self.wal_append(&Event::LabCreated { lab: lab.clone() }).await?;
        self.labs
            .insert(id, Arc::new(RwLock::new(LabState::new(lab.clone()))));
        metrics::gauge!(observability::LABS_ACTIVE).set(self.labs.len() as f64);
        info!("lab {id} created: {}", lab.name);
        Ok(lab)
    }

    /// Rename a lab or change its capacity and default hours. Capacity may not
    /// drop below the number of workstations the lab already has.
    pub async fn update_lab(
        &self,
        id: Ulid,
        name: String,
        capacity: u32,
        default_hours: Option<DailyHours>,
    ) -> Result<LabInfo, EngineError> {
        check_name(&name)?;
        check_hours(default_hours)?;
        let mut guard = self.lab_write(&id).await?;
        if (capacity as usize) < guard.workstations.len() {
            return Err(EngineError::CapacityExceeded(capacity));
        }
        let lab = LabInfo {
            id,
            name,
            capacity,
            default_hours,
        };
        self.persist_and_apply(&mut guard, &Event::LabUpdated { lab: lab.clone() })
            .await?;
        Ok(lab)
    }

    pub async fn add_workstation(
        &self,
        id: Ulid,
        lab_id: Ulid,
        code: String,
    ) -> Result<Workstation, EngineError> {
        check_name(&code)?;
        if self.entity_to_lab.contains_key(&id) || self.labs.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let mut guard = self.lab_write(&lab_id).await?;
        if guard.workstations.len() >= MAX_WORKSTATIONS_PER_LAB {
            return Err(EngineError::LimitExceeded("too many workstations in lab"));
        }
        if guard.workstations.len() >= guard.info.capacity as usize {
            return Err(EngineError::CapacityExceeded(guard.info.capacity));
        }
        if let Some(existing) = guard.workstations.iter().find(|w| w.code == code) {
            return Err(EngineError::AlreadyExists(existing.id));
        }

        let workstation = Workstation {
            id,
            lab_id,
            code,
            active: true,
        };
        let event = Event::WorkstationAdded {
            workstation: workstation.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(workstation)
    }

    /// Deactivating a workstation leaves its existing reservations alone; it
    /// only stops new ones from naming it.
    pub async fn set_workstation_active(
        &self,
        id: Ulid,
        active: bool,
    ) -> Result<Workstation, EngineError> {
        let mut guard = self.resolve_entity_write(&id, EntityKind::Workstation).await?;
        let mut workstation = guard
            .workstation(&id)
            .cloned()
            .ok_or(EngineError::NotFound(EntityKind::Workstation, id))?;
        if workstation.active == active {
            return Ok(workstation);
        }
        let event = Event::WorkstationUpdated {
            id,
            lab_id: workstation.lab_id,
            active,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        workstation.active = active;
        Ok(workstation)
    }

    /// Set the hours for one weekday, replacing whatever rule it had.
    pub async fn set_operating_hours(
        &self,
        lab_id: Ulid,
        weekday: Weekday,
        hours: DayHours,
    ) -> Result<OperatingHoursRule, EngineError> {
        if let DayHours::Open(h) = hours {
            check_hours(Some(h))?;
        }
        let mut guard = self.lab_write(&lab_id).await?;
        let rule = OperatingHoursRule {
            id: guard.hours_for(weekday).map_or_else(Ulid::new, |r| r.id),
            lab_id,
            weekday,
            hours,
        };
        self.persist_and_apply(&mut guard, &Event::OperatingHoursSet { rule: rule.clone() })
            .await?;
        Ok(rule)
    }

    /// Drop the rule for `weekday` so the lab's default hours apply again.
    /// Returns the removed rule, if there was one.
    pub async fn clear_operating_hours(
        &self,
        lab_id: Ulid,
        weekday: Weekday,
    ) -> Result<Option<OperatingHoursRule>, EngineError> {
        let mut guard = self.lab_write(&lab_id).await?;
        let Some(rule) = guard.hours_for(weekday).cloned() else {
            return Ok(None);
        };
        let event = Event::OperatingHoursCleared {
            id: rule.id,
            lab_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(Some(rule))
    }

    /// Add a closure. `lab_id: None` closes every lab.
    pub async fn add_closure(
        &self,
        id: Ulid,
        lab_id: Option<Ulid>,
        kind: ClosureKind,
        reason: Option<String>,
    ) -> Result<ClosureRule, EngineError> {
        if let Some(r) = &reason {
            check_name(r)?;
        }
        if self.global_closures.contains_key(&id) || self.entity_to_lab.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let closure = ClosureRule {
            id,
            lab_id,
            kind,
            reason,
        };
        let event = Event::ClosureAdded {
            closure: closure.clone(),
        };
        match lab_id {
            Some(lab_id) => {
                let mut guard = self.lab_write(&lab_id).await?;
                self.persist_and_apply(&mut guard, &event).await?;
            }
            None => {
                let _catalog = self.catalog.write().await;
                if self.global_closures.contains_key(&id) {
                    return Err(EngineError::AlreadyExists(id));
                }
                self.wal_append(&event).await?;
                self.global_closures.insert(id, closure.clone());
            }
        }
        info!("closure {id} added ({:?})", closure.kind);
        Ok(closure)
    }

    pub async fn remove_closure(&self, id: Ulid) -> Result<(), EngineError> {
        if self.global_closures.contains_key(&id) {
            let _catalog = self.catalog.write().await;
            if !self.global_closures.contains_key(&id) {
                return Err(EngineError::NotFound(EntityKind::Closure, id));
            }
            self.wal_append(&Event::ClosureRemoved { id, lab_id: None })
                .await?;
            self.global_closures.remove(&id);
            return Ok(());
        }
        let mut guard = self.resolve_entity_write(&id, EntityKind::Closure).await?;
        if !guard.closures.iter().any(|c| c.id == id) {
            return Err(EngineError::NotFound(EntityKind::Closure, id));
        }
        let event = Event::ClosureRemoved {
            id,
            lab_id: Some(guard.info.id),
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    // ── Reservations ─────────────────────────────────────────

    /// Book a window, or every open date of a series.
    ///
    /// All verdicts are computed under the lab's write lock, then the accepted
    /// reservations are written as one record. Nothing is written when the
    /// request fails.
    pub async fn create_reservation(
        &self,
        request: BookingRequest,
        by: &Actor,
    ) -> Result<CreationResult, EngineError> {
        check_description(request.description.as_deref())?;
        let catalog = self.catalog.read().await;
        let mut guard = self.lab_write(&request.lab_id).await?;
        let global_closures = self.global_closure_snapshot();
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_LAB {
            return Err(EngineError::LimitExceeded("too many reservations in lab"));
        }

        let now = self.clock.now();
        let plan = plan_creation(&guard, &global_closures, &request, &by.user_id, now)
            .map_err(|e| note_conflict("create", e))?;
        let event = Event::ReservationsCreated {
            lab_id: request.lab_id,
            pattern: plan.pattern.clone(),
            reservations: plan.accepted.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        drop(guard);
        drop(catalog);

        let kind = if plan.pattern.is_some() { "recurring" } else { "single" };
        metrics::counter!(observability::RESERVATIONS_CREATED_TOTAL, "kind" => kind)
            .increment(plan.accepted.len() as u64);
        for skipped in &plan.skipped {
            let reason = skipped.reason.label();
            metrics::counter!(observability::OCCURRENCES_SKIPPED_TOTAL, "reason" => reason)
                .increment(1);
            debug!("skipped {}: {}", skipped.date, skipped.reason.label());
        }
        info!(
            "lab {}: {} reservation(s) created for {}, {} date(s) skipped",
            request.lab_id,
            plan.accepted.len(),
            by.user_id,
            plan.skipped.len()
        );
        Ok(plan.into_result())
    }

    /// PENDING → APPROVED, after re-checking the window against every
    /// reservation approved in the meantime.
    pub async fn approve_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let mut guard = self.resolve_entity_write(&id, EntityKind::Reservation).await?;
        let reservation = guard
            .reservation(&id)
            .cloned()
            .ok_or(EngineError::NotFound(EntityKind::Reservation, id))?;
        check_transition(&reservation, ReservationStatus::Approved)?;
        check_no_conflict(
            &guard,
            &reservation.scope,
            &reservation.span,
            Some(id),
            Blocking::Approved,
        )
        .map_err(|e| note_conflict("approve", e))?;
        self.set_status(&mut guard, vec![id], ReservationStatus::Approved)
            .await?;
        reservation_after(&guard, id)
    }

    pub async fn decline_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let mut guard = self.resolve_entity_write(&id, EntityKind::Reservation).await?;
        let reservation = guard
            .reservation(&id)
            .ok_or(EngineError::NotFound(EntityKind::Reservation, id))?;
        check_transition(reservation, ReservationStatus::Declined)?;
        self.set_status(&mut guard, vec![id], ReservationStatus::Declined)
            .await?;
        reservation_after(&guard, id)
    }

    pub async fn cancel_reservation(
        &self,
        id: Ulid,
        by: &Actor,
    ) -> Result<Reservation, EngineError> {
        let mut guard = self.resolve_entity_write(&id, EntityKind::Reservation).await?;
        let reservation = guard
            .reservation(&id)
            .ok_or(EngineError::NotFound(EntityKind::Reservation, id))?;
        check_cancel(reservation, by)?;
        self.set_status(&mut guard, vec![id], ReservationStatus::Cancelled)
            .await?;
        info!("reservation {id} cancelled by {}", by.user_id);
        reservation_after(&guard, id)
    }

    /// Cancel every sibling of a recurring group that can still be cancelled,
    /// in one record. Returns the ids that changed; terminal siblings are skipped.
    pub async fn cancel_group(&self, group_id: Ulid, by: &Actor) -> Result<Vec<Ulid>, EngineError> {
        if !by.is_owner && !by.is_lab_manager {
            return Err(EngineError::Forbidden(
                "only the owner or a lab manager may cancel a reservation",
            ));
        }
        let mut guard = self
            .resolve_entity_write(&group_id, EntityKind::RecurringGroup)
            .await?;
        let ids: Vec<Ulid> = guard
            .reservations
            .iter()
            .filter(|r| r.recurring_group_id == Some(group_id))
            .filter(|r| check_cancel(r, by).is_ok())
            .map(|r| r.id)
            .collect();
        if ids.is_empty() {
            return Ok(ids);
        }
        self.set_status(&mut guard, ids.clone(), ReservationStatus::Cancelled)
            .await?;
        info!(
            "group {group_id}: {} reservation(s) cancelled by {}",
            ids.len(),
            by.user_id
        );
        Ok(ids)
    }

    async fn set_status(
        &self,
        ls: &mut LabState,
        ids: Vec<Ulid>,
        status: ReservationStatus,
    ) -> Result<(), EngineError> {
        let count = ids.len() as u64;
        let event = Event::StatusChanged {
            lab_id: ls.info.id,
            ids,
            status,
            at: self.clock.now(),
        };
        self.persist_and_apply(ls, &event).await?;
        metrics::counter!(observability::TRANSITIONS_TOTAL, "to" => status.as_str())
            .increment(count);
        Ok(())
    }
}

fn reservation_after(ls: &LabState, id: Ulid) -> Result<Reservation, EngineError> {
    ls.reservation(&id)
        .cloned()
        .ok_or(EngineError::NotFound(EntityKind::Reservation, id))
}
