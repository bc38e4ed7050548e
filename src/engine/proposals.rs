use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::observability;

use super::calendar::Calendar;
use super::conflict::{check_no_conflict, validate_scope, Blocking};
use super::error::{StateError, ValidationError};
use super::mutations::{check_description, note_conflict};
use super::{Engine, EngineError, EntityKind};

fn check_editable(reservation: &Reservation) -> Result<(), StateError> {
    match reservation.status {
        ReservationStatus::Pending | ReservationStatus::Approved => Ok(()),
        status => Err(StateError::NotEditable {
            id: reservation.id,
            status,
        }),
    }
}

impl Engine {
    /// Record a requested change to a PENDING or APPROVED reservation.
    ///
    /// The proposed values are stored as given; they are checked against the
    /// calendar and other reservations only when the proposal is approved.
    pub async fn propose_edit(
        &self,
        reservation_id: Ulid,
        proposed: EditValues,
        by: &UserId,
    ) -> Result<EditProposal, EngineError> {
        check_description(proposed.description.as_deref())?;
        let mut guard = self
            .resolve_entity_write(&reservation_id, EntityKind::Reservation)
            .await?;
        let reservation = guard
            .reservation(&reservation_id)
            .ok_or(EngineError::NotFound(EntityKind::Reservation, reservation_id))?;
        check_editable(reservation)?;
        if let Some(existing) = guard.pending_proposal_for(&reservation_id) {
            return Err(StateError::ProposalAlreadyPending {
                reservation_id,
                proposal_id: existing.id,
            }
            .into());
        }

        let proposal = EditProposal {
            id: Ulid::new(),
            reservation_id,
            lab_id: reservation.lab_id,
            proposed_by: by.clone(),
            proposed_at: self.clock.now(),
            original: reservation.snapshot(),
            proposed,
            resolution: EditResolution::Pending,
            resolved_by: None,
            resolved_at: None,
        };
        let event = Event::EditProposed {
            proposal: proposal.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("proposal {} filed on reservation {reservation_id} by {by}", proposal.id);
        Ok(proposal)
    }

    /// Approve or reject a PENDING proposal.
    ///
    /// Approval re-validates the proposed window and workstations with the
    /// target reservation left out of its own conflict set, then closes the
    /// proposal and rewrites the reservation in one record. If any check
    /// fails nothing is written and the proposal stays PENDING.
    pub async fn resolve_edit(
        &self,
        proposal_id: Ulid,
        approve: bool,
        by: &UserId,
    ) -> Result<EditProposal, EngineError> {
        let _catalog = self.catalog.read().await;
        let mut guard = self
            .resolve_entity_write(&proposal_id, EntityKind::Proposal)
            .await?;
        let global_closures = self.global_closure_snapshot();
        let proposal = guard
            .proposals
            .get(&proposal_id)
            .ok_or(EngineError::NotFound(EntityKind::Proposal, proposal_id))?;
        if proposal.resolution != EditResolution::Pending {
            return Err(StateError::ProposalResolved {
                id: proposal_id,
                resolution: proposal.resolution,
            }
            .into());
        }

        let (resolution, applied) = if approve {
            let reservation = guard.reservation(&proposal.reservation_id).ok_or(
                EngineError::NotFound(EntityKind::Reservation, proposal.reservation_id),
            )?;
            check_editable(reservation)?;
            let values = &proposal.proposed;
            if values.span.end <= values.span.start {
                return Err(ValidationError::InvalidRange {
                    start: values.span.start,
                    end: values.span.end,
                }
                .into());
            }
            let scope = validate_scope(&guard, &values.scope)?;
            Calendar::new(&guard, &global_closures).check_window(&values.span)?;
            check_no_conflict(
                &guard,
                &scope,
                &values.span,
                Some(reservation.id),
                Blocking::Active,
            )
            .map_err(|e| note_conflict("edit", e))?;
            let applied = EditValues {
                span: values.span,
                description: values.description.clone(),
                scope,
            };
            (EditResolution::Approved, Some(applied))
        } else {
            (EditResolution::Rejected, None)
        };

        let event = Event::EditResolved {
            id: proposal_id,
            lab_id: guard.info.id,
            resolution,
            resolved_by: by.clone(),
            resolved_at: self.clock.now(),
            applied,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let label = resolution.as_str();
        metrics::counter!(observability::PROPOSALS_RESOLVED_TOTAL, "resolution" => label)
            .increment(1);
        info!("proposal {proposal_id} {} by {by}", resolution.as_str());
        guard
            .proposals
            .get(&proposal_id)
            .cloned()
            .ok_or(EngineError::NotFound(EntityKind::Proposal, proposal_id))
    }
}
