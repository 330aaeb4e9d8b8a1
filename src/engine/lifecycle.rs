use chrono::DateTime;
use ulid::Ulid;

use crate::model::*;
use crate::notify::{Notification, NotificationKind};

use super::conflict::validate_span;
use super::{Actor, Engine, EngineError};

/// Permissive forward-only: any hop further along the chain is allowed
/// (SCHEDULED may jump straight to COMPLETED), never backwards, and the
/// cancellation-style terminals are reachable from any non-terminal state.
pub(super) fn can_transition(from: AppointmentStatus, to: AppointmentStatus) -> bool {
    if from.is_terminal() {
        return false;
    }
    match (from.forward_rank(), to.forward_rank()) {
        (_, None) => true, // CANCELLED / NO_SHOW
        (Some(f), Some(t)) => t > f,
        (None, _) => false,
    }
}

impl Engine {
    /// Drive an appointment to a new status. Completion flows into the
    /// ledger; everything else only touches the appointment record.
    pub async fn transition_appointment(
        &self,
        actor: Actor,
        id: Ulid,
        to: AppointmentStatus,
        actual_span: Option<Span>,
    ) -> Result<Appointment, EngineError> {
        if to == AppointmentStatus::Scheduled {
            return Err(EngineError::Validation("cannot transition back to SCHEDULED"));
        }
        if to == AppointmentStatus::Completed {
            return self.complete_appointment(actor, id, actual_span).await;
        }
        if actual_span.is_some() {
            return Err(EngineError::Validation(
                "actual times only apply to completion",
            ));
        }

        let (tutor_id, mut guard) = self.resolve_entity_book_write(&id).await?;
        let appointment = guard.appointment(id).ok_or(EngineError::NotFound(id))?;
        let (student_id, from) = (appointment.student_id, appointment.status);

        match to {
            // Either party may confirm or cancel.
            AppointmentStatus::Confirmed | AppointmentStatus::Cancelled => {
                if !actor.owns_any(&[student_id, tutor_id]) {
                    return Err(EngineError::Forbidden("caller is not a party"));
                }
            }
            // Only the tutor marks the session started or the student absent.
            _ => {
                if !actor.owns(tutor_id) {
                    return Err(EngineError::Forbidden("only the tutor may do this"));
                }
            }
        }
        if !can_transition(from, to) {
            return Err(EngineError::InvalidTransition { from, to });
        }

        let event = Event::AppointmentTransitioned {
            id,
            tutor_id,
            status: to,
            actual_span: None,
        };
        self.append_and_apply_book(&mut guard, &event).await?;
        let updated = guard
            .appointment(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        drop(guard);

        if to == AppointmentStatus::Cancelled {
            self.notify_parties(
                &updated,
                NotificationKind::AppointmentCancelled,
                "Appointment cancelled",
                format!("{} session at {} was cancelled", updated.subject, updated.span.start),
            );
        }
        Ok(updated)
    }

    pub async fn cancel_appointment(
        &self,
        actor: Actor,
        id: Ulid,
    ) -> Result<Appointment, EngineError> {
        self.transition_appointment(actor, id, AppointmentStatus::Cancelled, None)
            .await
    }

    /// The one transition with side effects beyond the record: compute the
    /// taught duration (actual times if supplied, scheduled otherwise),
    /// append a lecture session to the matching ledger, and let the ledger
    /// decide whether a payment reminder is due.
    async fn complete_appointment(
        &self,
        actor: Actor,
        id: Ulid,
        actual_span: Option<Span>,
    ) -> Result<Appointment, EngineError> {
        if let Some(ref span) = actual_span {
            validate_span(span)?;
        }

        let (tutor_id, mut guard) = self.resolve_entity_book_write(&id).await?;
        let appointment = guard.appointment(id).ok_or(EngineError::NotFound(id))?;
        let from = appointment.status;

        if !actor.owns(tutor_id) {
            return Err(EngineError::Forbidden("only the tutor may complete"));
        }
        if !can_transition(from, AppointmentStatus::Completed) {
            return Err(EngineError::InvalidTransition {
                from,
                to: AppointmentStatus::Completed,
            });
        }

        let event = Event::AppointmentTransitioned {
            id,
            tutor_id,
            status: AppointmentStatus::Completed,
            actual_span,
        };
        self.append_and_apply_book(&mut guard, &event).await?;
        let completed = guard
            .appointment(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        drop(guard);

        let billed = completed.billable_span();
        let hours = billed.duration_hours();
        let date = DateTime::from_timestamp_millis(billed.start)
            .map(|dt| dt.date_naive())
            .ok_or(EngineError::Validation("span start out of range"))?;
        let key = LedgerKey {
            student_id: completed.student_id,
            tutor_id: completed.tutor_id,
            subject: completed.subject.clone(),
        };
        self.record_session_inner(key, hours, date, Some(id)).await?;

        self.notify_parties(
            &completed,
            NotificationKind::SessionCompleted,
            "Session completed",
            format!("{:.2} hours of {} recorded", hours, completed.subject),
        );
        Ok(completed)
    }

    fn notify_parties(
        &self,
        appointment: &Appointment,
        kind: NotificationKind,
        title: &str,
        message: String,
    ) {
        let payload = serde_json::json!({
            "appointment_id": appointment.id.to_string(),
            "status": appointment.status.as_str(),
        });
        for recipient in [appointment.student_id, appointment.tutor_id] {
            self.notify.send(Notification {
                recipient,
                kind,
                title: title.into(),
                message: message.clone(),
                payload: payload.clone(),
            });
        }
    }
}
