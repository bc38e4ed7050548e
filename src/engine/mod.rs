mod availability;
mod calendar;
mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod proposals;
mod queries;
mod recurrence;

pub use availability::{free_windows, merge_overlapping, subtract_intervals};
pub use calendar::{Calendar, ClosedBy, DayStatus};
pub use conflict::{check_no_conflict, find_conflicts, validate_scope, Blocking};
pub use error::{EngineError, EntityKind, StateError, ValidationError};
pub use lifecycle::{
    can_transition, plan_creation, BookingRequest, CreationPlan, CreationResult, SkipReason,
    SkippedOccurrence,
};
pub use recurrence::{expand, Occurrences};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::model::*;
use crate::observability;
use crate::wal::{Wal, WalWriter};

pub type SharedLabState = Arc<RwLock<LabState>>;

/// Reservations per record when compacting.
const COMPACT_CHUNK: usize = 1024;

/// The booking engine: per-lab state behind async locks, persisted through the WAL.
///
/// Every check-then-write operation holds its lab's write lock from the check
/// to the in-memory apply, so two requests for overlapping windows in the same
/// lab serialize and the second one sees the first one's result.
pub struct Engine {
    pub(super) labs: DashMap<Ulid, SharedLabState>,
    /// Closures that apply to every lab.
    pub(super) global_closures: DashMap<Ulid, ClosureRule>,
    /// Reverse lookup: entity (workstation/rule/reservation/group/proposal) id → lab id
    pub(super) entity_to_lab: DashMap<Ulid, Ulid>,
    pub(super) wal: WalWriter,
    pub(super) clock: Arc<dyn Clock>,
    /// Guards the lab list and the global closures. Writers of either hold it
    /// exclusively across append and apply, as does compaction. Bookings hold
    /// it shared while they read the global closures. Taken before any lab lock.
    pub(super) catalog: RwLock<()>,
}

/// Apply a lab-scoped event to its LabState. The caller holds the lock.
fn apply_to_lab(ls: &mut LabState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    let lab_id = ls.info.id;
    match event {
        Event::LabUpdated { lab } => ls.info = lab.clone(),
        Event::WorkstationAdded { workstation } => {
            ls.workstations.push(workstation.clone());
            index.insert(workstation.id, lab_id);
        }
        Event::WorkstationUpdated { id, active, .. } => {
            if let Some(w) = ls.workstations.iter_mut().find(|w| w.id == *id) {
                w.active = *active;
            }
        }
        Event::OperatingHoursSet { rule } => {
            if let Some(old) = ls.hours_for(rule.weekday)
                && old.id != rule.id
            {
                index.remove(&old.id);
            }
            ls.set_hours(rule.clone());
            index.insert(rule.id, lab_id);
        }
        Event::OperatingHoursCleared { id, .. } => {
            ls.hours.retain(|r| r.id != *id);
            index.remove(id);
        }
        Event::ClosureAdded { closure } => {
            ls.closures.push(closure.clone());
            index.insert(closure.id, lab_id);
        }
        Event::ClosureRemoved { id, .. } => {
            ls.closures.retain(|c| c.id != *id);
            index.remove(id);
        }
        Event::ReservationsCreated {
            pattern,
            reservations,
            ..
        } => {
            if let Some(p) = pattern {
                ls.patterns.insert(p.group_id, p.clone());
                index.insert(p.group_id, lab_id);
            }
            for r in reservations {
                ls.insert_reservation(r.clone());
                index.insert(r.id, lab_id);
            }
        }
        Event::StatusChanged { ids, status, at, .. } => {
            for id in ids {
                if let Some(r) = ls.reservation_mut(id) {
                    r.status = *status;
                    r.updated_at = *at;
                }
            }
        }
        Event::EditProposed { proposal } => {
            ls.proposals.insert(proposal.id, proposal.clone());
            index.insert(proposal.id, lab_id);
        }
        Event::EditResolved {
            id,
            resolution,
            resolved_by,
            resolved_at,
            applied,
            ..
        } => {
            let Some(proposal) = ls.proposals.get_mut(id) else {
                return;
            };
            proposal.resolution = *resolution;
            proposal.resolved_by = Some(resolved_by.clone());
            proposal.resolved_at = Some(*resolved_at);
            let reservation_id = proposal.reservation_id;
            if let Some(values) = applied
                && let Some(mut r) = ls.remove_reservation(reservation_id)
            {
                // Re-insert to keep the start ordering.
                r.span = values.span;
                r.description = values.description.clone();
                r.scope = values.scope.clone();
                r.updated_at = *resolved_at;
                ls.insert_reservation(r);
            }
        }
        // Lab creation and global closures are handled at the engine level.
        Event::LabCreated { .. } => {}
    }
}

/// The lab an event belongs to, if any.
fn event_lab_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::LabCreated { lab } | Event::LabUpdated { lab } => Some(lab.id),
        Event::WorkstationAdded { workstation } => Some(workstation.lab_id),
        Event::OperatingHoursSet { rule } => Some(rule.lab_id),
        Event::ClosureAdded { closure } => closure.lab_id,
        Event::ClosureRemoved { lab_id, .. } => *lab_id,
        Event::EditProposed { proposal } => Some(proposal.lab_id),
        Event::WorkstationUpdated { lab_id, .. }
        | Event::OperatingHoursCleared { lab_id, .. }
        | Event::ReservationsCreated { lab_id, .. }
        | Event::StatusChanged { lab_id, .. }
        | Event::EditResolved { lab_id, .. } => Some(*lab_id),
    }
}

impl Engine {
    /// Replay the WAL at `wal_path` and start the writer task.
    /// Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;

        let index = DashMap::new();
        let global_closures = DashMap::new();
        // Replay into plain state first; locks are only added once we're done.
        let mut labs: HashMap<Ulid, LabState> = HashMap::new();
        for event in &events {
            match event {
                Event::LabCreated { lab } => {
                    labs.insert(lab.id, LabState::new(lab.clone()));
                }
                Event::ClosureAdded { closure } if closure.lab_id.is_none() => {
                    global_closures.insert(closure.id, closure.clone());
                }
                Event::ClosureRemoved { id, lab_id: None } => {
                    global_closures.remove(id);
                }
                other => {
                    if let Some(lab_id) = event_lab_id(other)
                        && let Some(ls) = labs.get_mut(&lab_id)
                    {
                        apply_to_lab(ls, other, &index);
                    }
                }
            }
        }

        let state = DashMap::new();
        for (id, ls) in labs {
            state.insert(id, Arc::new(RwLock::new(ls)));
        }
        metrics::gauge!(observability::LABS_ACTIVE).set(state.len() as f64);
        info!(
            "replayed {} events from {}: {} labs",
            events.len(),
            wal_path.display(),
            state.len()
        );

        Ok(Self {
            labs: state,
            global_closures,
            entity_to_lab: index,
            wal: WalWriter::spawn(wal),
            clock,
            catalog: RwLock::new(()),
        })
    }

    /// Open the engine under `config.data_dir` with the system clock.
    pub fn open(config: &Config) -> io::Result<Self> {
        Self::new(config.wal_path(), Arc::new(SystemClock))
    }

    pub fn now(&self) -> chrono::NaiveDateTime {
        self.clock.now()
    }

    pub fn get_lab_state(&self, id: &Ulid) -> Option<SharedLabState> {
        self.labs.get(id).map(|e| e.value().clone())
    }

    pub fn get_lab_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_lab.get(entity_id).map(|e| *e.value())
    }

    /// Snapshot of the global closures, taken once per operation. Callers that
    /// act on it hold `catalog`.
    pub(super) fn global_closure_snapshot(&self) -> Vec<ClosureRule> {
        self.global_closures.iter().map(|e| e.value().clone()).collect()
    }

    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        self.wal.append(event.clone()).await?;
        Ok(())
    }

    /// WAL-append + apply in one call.
    pub(super) async fn persist_and_apply(
        &self,
        ls: &mut LabState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_lab(ls, event, &self.entity_to_lab);
        Ok(())
    }

    pub(super) async fn lab_write(
        &self,
        lab_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<LabState>, EngineError> {
        let ls = self
            .get_lab_state(lab_id)
            .ok_or(EngineError::NotFound(EntityKind::Lab, *lab_id))?;
        Ok(ls.write_owned().await)
    }

    pub(super) async fn lab_read(
        &self,
        lab_id: &Ulid,
    ) -> Result<OwnedRwLockReadGuard<LabState>, EngineError> {
        let ls = self
            .get_lab_state(lab_id)
            .ok_or(EngineError::NotFound(EntityKind::Lab, *lab_id))?;
        Ok(ls.read_owned().await)
    }

    pub(super) async fn resolve_entity_read(
        &self,
        entity_id: &Ulid,
        kind: EntityKind,
    ) -> Result<OwnedRwLockReadGuard<LabState>, EngineError> {
        let lab_id = self
            .get_lab_for_entity(entity_id)
            .ok_or(EngineError::NotFound(kind, *entity_id))?;
        self.lab_read(&lab_id).await
    }

    /// Lookup entity → lab, acquire the lab's write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
        kind: EntityKind,
    ) -> Result<OwnedRwLockWriteGuard<LabState>, EngineError> {
        let lab_id = self
            .get_lab_for_entity(entity_id)
            .ok_or(EngineError::NotFound(kind, *entity_id))?;
        self.lab_write(&lab_id).await
    }

    /// Rewrite the WAL as the minimal set of events that rebuilds the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Held until the rewrite lands, so no lab or global closure is appended
        // to the old file after it was copied.
        let _catalog = self.catalog.write().await;
        let mut events = Vec::new();
        for closure in self.global_closure_snapshot() {
            events.push(Event::ClosureAdded { closure });
        }

        // Read guards stay held until the rewrite lands so no append slips in between.
        let labs: Vec<SharedLabState> = self.labs.iter().map(|e| e.value().clone()).collect();
        let mut guards = Vec::with_capacity(labs.len());
        for ls in labs {
            let guard = ls.read_owned().await;
            let lab_id = guard.info.id;
            events.push(Event::LabCreated {
                lab: guard.info.clone(),
            });
            for workstation in &guard.workstations {
                events.push(Event::WorkstationAdded {
                    workstation: workstation.clone(),
                });
            }
            for rule in &guard.hours {
                events.push(Event::OperatingHoursSet { rule: rule.clone() });
            }
            for closure in &guard.closures {
                events.push(Event::ClosureAdded {
                    closure: closure.clone(),
                });
            }

            let mut by_group: HashMap<Option<Ulid>, Vec<Reservation>> = HashMap::new();
            for r in &guard.reservations {
                by_group
                    .entry(r.recurring_group_id)
                    .or_default()
                    .push(r.clone());
            }
            for (group, reservations) in by_group {
                let mut pattern = group.and_then(|g| guard.patterns.get(&g).cloned());
                for chunk in reservations.chunks(COMPACT_CHUNK) {
                    events.push(Event::ReservationsCreated {
                        lab_id,
                        pattern: pattern.take(),
                        reservations: chunk.to_vec(),
                    });
                }
            }
            for proposal in guard.proposals.values() {
                events.push(Event::EditProposed {
                    proposal: proposal.clone(),
                });
            }
            guards.push(guard);
        }

        let count = events.len();
        let result = self.wal.compact(events).await;
        drop(guards);
        match result {
            Ok(()) => {
                metrics::counter!(observability::WAL_COMPACTIONS_TOTAL, "status" => "ok")
                    .increment(1);
                info!("compacted WAL to {count} events");
                Ok(())
            }
            Err(e) => {
                metrics::counter!(observability::WAL_COMPACTIONS_TOTAL, "status" => "error")
                    .increment(1);
                tracing::warn!("WAL compaction failed: {e}");
                Err(e.into())
            }
        }
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.wal.appends_since_compact().await
    }
}
