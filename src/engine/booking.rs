use tracing::warn;
use ulid::Ulid;

use crate::idempotency::ClaimOutcome;
use crate::limits::*;
use crate::model::*;
use crate::notify::{Notification, NotificationKind};

use super::conflict::{find_appointment_conflict, now_ms, validate_span};
use super::{Actor, Engine, EngineError};

/// One booking request. The claim key is derived from the request when the
/// caller doesn't supply one, so retried identical requests collapse.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub id: Ulid,
    pub student_id: Ulid,
    pub tutor_id: Ulid,
    pub subject: String,
    pub span: Span,
    pub hourly_cents: i64,
    pub currency: String,
    pub notes: Option<String>,
    pub request_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BookOutcome {
    Created(Appointment),
    /// A completed claim was found within the TTL — the earlier appointment
    /// is the outcome; no new row was created.
    Duplicate(Ulid),
}

impl Engine {
    /// Book an appointment exactly once.
    ///
    /// Claim the idempotency key, conflict-check against the tutor's
    /// non-terminal appointments, persist, notify both parties. The tutor
    /// book's write lock makes check-and-insert a single unit; the claim is
    /// released on every definitive failure path so a legitimate retry is
    /// not blocked for the full TTL.
    pub async fn book_appointment(
        &self,
        actor: Actor,
        req: BookingRequest,
    ) -> Result<BookOutcome, EngineError> {
        validate_span(&req.span)?;
        if req.subject.is_empty() {
            return Err(EngineError::Validation("subject required"));
        }
        if req.subject.len() > MAX_SUBJECT_LEN {
            return Err(EngineError::LimitExceeded("subject too long"));
        }
        if let Some(ref n) = req.notes
            && n.len() > MAX_NOTES_LEN {
                return Err(EngineError::LimitExceeded("notes too long"));
            }
        if req.hourly_cents < 0 {
            return Err(EngineError::Validation("negative rate"));
        }
        if !actor.owns_any(&[req.student_id, req.tutor_id]) {
            return Err(EngineError::Forbidden("caller is not a party to this booking"));
        }
        if self.tutor_of_entity(&req.id).is_some() {
            return Err(EngineError::AlreadyExists(req.id));
        }

        let key = req.request_key.clone().unwrap_or_else(|| derive_key(&req));
        if key.len() > MAX_REQUEST_KEY_LEN {
            return Err(EngineError::LimitExceeded("request key too long"));
        }

        let now = now_ms();
        // Fail open when the claim store is down: a small duplicate-booking
        // risk beats refusing all bookings. Logged distinctly from a genuine
        // duplicate rejection.
        let tracked = match self.claims.claim(&key, self.claim_ttl_ms, now) {
            Ok(ClaimOutcome::Acquired) => true,
            Ok(ClaimOutcome::InFlight) => return Err(EngineError::DuplicateRequest),
            Ok(ClaimOutcome::Completed(appointment_id)) => {
                return Ok(BookOutcome::Duplicate(appointment_id));
            }
            Err(e) => {
                warn!("claim store down, booking proceeds untracked: {e}");
                metrics::counter!(crate::observability::CLAIMS_FAILOPEN_TOTAL).increment(1);
                false
            }
        };

        let book = self.get_or_create_book(req.tutor_id);
        let mut guard = book.write_owned().await;

        if guard.appointments.len() >= MAX_APPOINTMENTS_PER_TUTOR {
            drop(guard);
            self.release_claim(&key, tracked);
            return Err(EngineError::LimitExceeded("too many appointments for tutor"));
        }
        if let Some(conflicting) = find_appointment_conflict(&guard, &req.span) {
            drop(guard);
            self.release_claim(&key, tracked);
            return Err(EngineError::Conflict(conflicting));
        }

        let event = Event::AppointmentBooked {
            id: req.id,
            student_id: req.student_id,
            tutor_id: req.tutor_id,
            subject: req.subject.clone(),
            span: req.span,
            hourly_cents: req.hourly_cents,
            currency: req.currency.clone(),
            notes: req.notes.clone(),
        };
        if let Err(e) = self.append_and_apply_book(&mut guard, &event).await {
            drop(guard);
            self.release_claim(&key, tracked);
            return Err(e);
        }
        let appointment = guard
            .appointment(req.id)
            .cloned()
            .ok_or_else(|| EngineError::WalError("booked appointment missing from state".into()))?;
        drop(guard);

        // Success: record the outcome and let the claim expire naturally so a
        // replayed request within the TTL is still recognized as a duplicate.
        if tracked && let Err(e) = self.claims.complete(&key, req.id) {
            warn!("claim store down while recording outcome: {e}");
        }

        self.notify_booking(&appointment);
        metrics::counter!(crate::observability::BOOKINGS_TOTAL).increment(1);
        Ok(BookOutcome::Created(appointment))
    }

    fn release_claim(&self, key: &str, tracked: bool) {
        if tracked && let Err(e) = self.claims.release(key) {
            warn!("claim store down while releasing {key}: {e}");
        }
    }

    fn notify_booking(&self, appointment: &Appointment) {
        let payload = serde_json::json!({
            "appointment_id": appointment.id.to_string(),
            "subject": appointment.subject,
            "start": appointment.span.start,
            "end": appointment.span.end,
        });
        for recipient in [appointment.student_id, appointment.tutor_id] {
            self.notify.send(Notification {
                recipient,
                kind: NotificationKind::BookingConfirmed,
                title: "Booking confirmed".into(),
                message: format!(
                    "{} session booked from {} to {}",
                    appointment.subject, appointment.span.start, appointment.span.end
                ),
                payload: payload.clone(),
            });
        }
    }
}

fn derive_key(req: &BookingRequest) -> String {
    format!(
        "book:{}:{}:{}:{}",
        req.student_id, req.tutor_id, req.span.start, req.span.end
    )
}
