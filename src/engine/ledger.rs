use std::sync::Arc;

use chrono::{DateTime, NaiveDate};
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::{Notification, NotificationKind};

use super::conflict::now_ms;
use super::{Actor, Engine, EngineError, SharedLedger};

/// Slack for f64 hour accounting at equality boundaries.
const HOURS_EPS: f64 = 1e-9;

/// A reminder is due within one hour of the next billing threshold, once per
/// cycle. The one-hour lead is deliberate and load-bearing: it warns before
/// the threshold is actually crossed.
pub fn reminder_due(ledger: &Ledger) -> bool {
    !ledger.reminder_sent && ledger.unpaid_hours >= ledger.payment_interval - 1.0 - HOURS_EPS
}

/// Mark the oldest unpaid whole sessions paid, in creation order, until the
/// paid hours are used up. Sessions are never split.
pub(super) fn settle_sessions_fifo(sessions: &mut [LectureSession], hours_included: f64) {
    let mut remaining = hours_included;
    for session in sessions.iter_mut().filter(|s| !s.paid) {
        if session.hours <= remaining + HOURS_EPS {
            session.paid = true;
            remaining -= session.hours;
        } else {
            break;
        }
    }
}

/// Apply a ledger event directly (no locking — caller holds the lock).
pub(super) fn apply_to_ledger(ledger: &mut Ledger, event: &Event) {
    match event {
        Event::SessionRecorded {
            id,
            hours,
            date,
            appointment_id,
            ..
        } => {
            ledger.sessions.push(LectureSession {
                id: *id,
                appointment_id: *appointment_id,
                hours: *hours,
                date: *date,
                paid: false,
            });
            ledger.total_hours += *hours;
            ledger.unpaid_hours += *hours;
            ledger.last_session_date = Some(*date);
        }
        Event::PaymentRecorded {
            id,
            hours_included,
            amount_cents,
            currency,
            status,
            due_date,
            method,
            ..
        } => {
            ledger.payments.push(Payment {
                id: *id,
                hours_included: *hours_included,
                amount_cents: *amount_cents,
                currency: currency.clone(),
                status: *status,
                due_date: *due_date,
                paid_date: None,
                method: method.clone(),
            });
        }
        Event::PaymentMarkedPaid { id, paid_date, .. } => {
            let Some(pos) = ledger.payments.iter().position(|p| p.id == *id) else {
                return;
            };
            ledger.payments[pos].status = PaymentStatus::Paid;
            ledger.payments[pos].paid_date = Some(*paid_date);
            let hours = ledger.payments[pos].hours_included;
            // Floored at zero: over-payment is absorbed, never carried as credit.
            ledger.unpaid_hours = (ledger.unpaid_hours - hours).max(0.0);
            settle_sessions_fifo(&mut ledger.sessions, hours);
            // Fresh cycle: the next threshold approach may remind again.
            ledger.reminder_sent = false;
        }
        Event::PaymentStatusChanged { id, status, .. } => {
            if let Some(p) = ledger.payments.iter_mut().find(|p| p.id == *id) {
                p.status = *status;
            }
        }
        Event::ReminderMarked { .. } => {
            ledger.reminder_sent = true;
        }
        Event::PaymentIntervalChanged { hours, .. } => {
            ledger.payment_interval = *hours;
        }
        _ => {}
    }
}

fn today() -> NaiveDate {
    DateTime::from_timestamp_millis(now_ms())
        .map(|dt| dt.date_naive())
        .unwrap_or_default()
}

impl Engine {
    pub(super) fn get_or_create_ledger(&self, key: &LedgerKey) -> (Ulid, SharedLedger) {
        let id = *self.ledger_index.entry(key.clone()).or_insert_with(Ulid::new);
        let shared = self
            .ledgers
            .entry(id)
            .or_insert_with(|| {
                Arc::new(RwLock::new(Ledger::new(
                    id,
                    key.clone(),
                    DEFAULT_PAYMENT_INTERVAL_HOURS,
                )))
            })
            .clone();
        (id, shared)
    }

    /// Add taught hours to the (student, tutor, subject) ledger, creating it
    /// on first use. Returns the resulting unpaid total. This is the manual
    /// entry path (a tutor backdating hours with no linked appointment);
    /// completion goes through the same accounting internally.
    pub async fn record_session(
        &self,
        actor: Actor,
        student_id: Ulid,
        tutor_id: Ulid,
        subject: String,
        hours: f64,
        date: NaiveDate,
    ) -> Result<f64, EngineError> {
        if !actor.owns(tutor_id) {
            return Err(EngineError::Forbidden("only the tutor may record hours"));
        }
        if subject.is_empty() {
            return Err(EngineError::Validation("subject required"));
        }
        if subject.len() > MAX_SUBJECT_LEN {
            return Err(EngineError::LimitExceeded("subject too long"));
        }
        validate_hours(hours)?;

        let key = LedgerKey {
            student_id,
            tutor_id,
            subject,
        };
        self.record_session_inner(key, hours, date, None).await
    }

    /// Shared accounting path for completion-driven and manual entries.
    pub(super) async fn record_session_inner(
        &self,
        key: LedgerKey,
        hours: f64,
        date: NaiveDate,
        appointment_id: Option<Ulid>,
    ) -> Result<f64, EngineError> {
        let (ledger_id, shared) = self.get_or_create_ledger(&key);
        let mut guard = shared.write().await;

        let event = Event::SessionRecorded {
            id: Ulid::new(),
            ledger_id,
            student_id: key.student_id,
            tutor_id: key.tutor_id,
            subject: key.subject.clone(),
            hours,
            date,
            appointment_id,
        };
        self.append_and_apply_ledger(&mut guard, &event).await?;

        if reminder_due(&guard) {
            let event = Event::ReminderMarked { ledger_id };
            self.append_and_apply_ledger(&mut guard, &event).await?;
            self.notify_reminder(&guard);
            metrics::counter!(crate::observability::REMINDERS_EMITTED_TOTAL).increment(1);
        }

        Ok(guard.unpaid_hours)
    }

    /// Record a payment against a ledger. Default status is PAID, which
    /// settles immediately; PENDING/OVERDUE payments sit until marked.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_payment(
        &self,
        actor: Actor,
        payment_id: Ulid,
        ledger_id: Ulid,
        hours_included: f64,
        amount_cents: i64,
        currency: String,
        method: Option<String>,
        status: PaymentStatus,
        due_date: Option<NaiveDate>,
    ) -> Result<(), EngineError> {
        validate_hours(hours_included)?;
        if amount_cents < 0 {
            return Err(EngineError::Validation("negative amount"));
        }
        if currency.is_empty() || currency.len() > 8 {
            return Err(EngineError::Validation("bad currency"));
        }
        if let Some(ref m) = method
            && m.len() > MAX_METHOD_LEN {
                return Err(EngineError::LimitExceeded("method too long"));
            }
        if status == PaymentStatus::Cancelled {
            return Err(EngineError::Validation("cannot record a cancelled payment"));
        }
        if self.payment_to_ledger.contains_key(&payment_id) {
            return Err(EngineError::AlreadyExists(payment_id));
        }

        let shared = self
            .get_ledger(&ledger_id)
            .ok_or(EngineError::NotFound(ledger_id))?;
        let mut guard = shared.write().await;
        if !actor.owns(guard.key.tutor_id) {
            return Err(EngineError::Forbidden("caller does not own this ledger"));
        }

        let recorded_status = if status == PaymentStatus::Paid {
            PaymentStatus::Pending
        } else {
            status
        };
        let event = Event::PaymentRecorded {
            id: payment_id,
            ledger_id,
            hours_included,
            amount_cents,
            currency,
            status: recorded_status,
            due_date,
            method,
        };
        self.append_and_apply_ledger(&mut guard, &event).await?;

        if status == PaymentStatus::Paid {
            self.settle_payment(&mut guard, payment_id, ledger_id).await?;
        }
        Ok(())
    }

    /// Move a payment to a new status. Only the hop to PAID settles the
    /// ledger, exactly once.
    pub async fn update_payment_status(
        &self,
        actor: Actor,
        payment_id: Ulid,
        status: PaymentStatus,
    ) -> Result<(), EngineError> {
        let ledger_id = self
            .payment_to_ledger
            .get(&payment_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(payment_id))?;
        let shared = self
            .get_ledger(&ledger_id)
            .ok_or(EngineError::NotFound(ledger_id))?;
        let mut guard = shared.write().await;
        if !actor.owns(guard.key.tutor_id) {
            return Err(EngineError::Forbidden("caller does not own this ledger"));
        }

        let current = guard
            .payment(payment_id)
            .ok_or(EngineError::NotFound(payment_id))?
            .status;
        let allowed = matches!(
            (current, status),
            (PaymentStatus::Pending, PaymentStatus::Paid)
                | (PaymentStatus::Pending, PaymentStatus::Overdue)
                | (PaymentStatus::Pending, PaymentStatus::Cancelled)
                | (PaymentStatus::Overdue, PaymentStatus::Paid)
                | (PaymentStatus::Overdue, PaymentStatus::Cancelled)
        );
        if !allowed {
            return Err(EngineError::Validation("payment already settled"));
        }

        if status == PaymentStatus::Paid {
            self.settle_payment(&mut guard, payment_id, ledger_id).await
        } else {
            let event = Event::PaymentStatusChanged {
                id: payment_id,
                ledger_id,
                status,
            };
            self.append_and_apply_ledger(&mut guard, &event).await
        }
    }

    async fn settle_payment(
        &self,
        guard: &mut Ledger,
        payment_id: Ulid,
        ledger_id: Ulid,
    ) -> Result<(), EngineError> {
        let event = Event::PaymentMarkedPaid {
            id: payment_id,
            ledger_id,
            paid_date: today(),
        };
        self.append_and_apply_ledger(guard, &event).await?;
        self.notify_payment_received(guard, payment_id);
        metrics::counter!(crate::observability::PAYMENTS_SETTLED_TOTAL).increment(1);
        Ok(())
    }

    /// Only affects future reminder evaluations — an already-accumulated
    /// balance past the new interval does not fire retroactively.
    pub async fn set_payment_interval(
        &self,
        actor: Actor,
        ledger_id: Ulid,
        hours: f64,
    ) -> Result<(), EngineError> {
        if !hours.is_finite() || hours <= 0.0 {
            return Err(EngineError::Validation("interval must be positive"));
        }
        let shared = self
            .get_ledger(&ledger_id)
            .ok_or(EngineError::NotFound(ledger_id))?;
        let mut guard = shared.write().await;
        if !actor.owns(guard.key.tutor_id) {
            return Err(EngineError::Forbidden("caller does not own this ledger"));
        }

        let event = Event::PaymentIntervalChanged { ledger_id, hours };
        self.append_and_apply_ledger(&mut guard, &event).await
    }

    fn notify_reminder(&self, ledger: &Ledger) {
        let payload = serde_json::json!({
            "ledger_id": ledger.id.to_string(),
            "unpaid_hours": ledger.unpaid_hours,
            "payment_interval": ledger.payment_interval,
        });
        for recipient in [ledger.key.student_id, ledger.key.tutor_id] {
            self.notify.send(Notification {
                recipient,
                kind: NotificationKind::PaymentReminder,
                title: "Payment due soon".into(),
                message: format!(
                    "{:.1} unpaid hours of {} — billing threshold approaching",
                    ledger.unpaid_hours, ledger.key.subject
                ),
                payload: payload.clone(),
            });
        }
    }

    fn notify_payment_received(&self, ledger: &Ledger, payment_id: Ulid) {
        let payload = serde_json::json!({
            "ledger_id": ledger.id.to_string(),
            "payment_id": payment_id.to_string(),
            "unpaid_hours": ledger.unpaid_hours,
        });
        for recipient in [ledger.key.student_id, ledger.key.tutor_id] {
            self.notify.send(Notification {
                recipient,
                kind: NotificationKind::PaymentReceived,
                title: "Payment received".into(),
                message: format!("Payment recorded for {}", ledger.key.subject),
                payload: payload.clone(),
            });
        }
    }
}

fn validate_hours(hours: f64) -> Result<(), EngineError> {
    if !hours.is_finite() || hours <= 0.0 {
        return Err(EngineError::Validation("hours must be positive"));
    }
    if hours > 24.0 {
        return Err(EngineError::LimitExceeded("hours entry too large"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with(unpaid: f64, interval: f64, reminder_sent: bool) -> Ledger {
        let mut ledger = Ledger::new(
            Ulid::new(),
            LedgerKey {
                student_id: Ulid::new(),
                tutor_id: Ulid::new(),
                subject: "math".into(),
            },
            interval,
        );
        ledger.total_hours = unpaid;
        ledger.unpaid_hours = unpaid;
        ledger.reminder_sent = reminder_sent;
        ledger
    }

    #[test]
    fn reminder_due_one_hour_before_threshold() {
        assert!(!reminder_due(&ledger_with(8.5, 10.0, false)));
        assert!(reminder_due(&ledger_with(9.0, 10.0, false)));
        assert!(reminder_due(&ledger_with(10.0, 10.0, false)));
        assert!(reminder_due(&ledger_with(15.0, 10.0, false)));
    }

    #[test]
    fn reminder_suppressed_once_sent() {
        assert!(!reminder_due(&ledger_with(9.5, 10.0, true)));
    }

    #[test]
    fn settle_fifo_marks_oldest_whole_sessions() {
        let mut sessions = vec![
            session(1.0, false),
            session(1.5, false),
            session(2.0, false),
        ];
        settle_sessions_fifo(&mut sessions, 2.5);
        assert!(sessions[0].paid);
        assert!(sessions[1].paid);
        assert!(!sessions[2].paid); // 2.0 doesn't fit in the 0.0 remainder
    }

    #[test]
    fn settle_fifo_skips_already_paid() {
        let mut sessions = vec![session(1.0, true), session(1.0, false)];
        settle_sessions_fifo(&mut sessions, 1.0);
        assert!(sessions[1].paid);
    }

    #[test]
    fn settle_fifo_stops_at_partial_fit() {
        let mut sessions = vec![session(2.0, false), session(1.0, false)];
        settle_sessions_fifo(&mut sessions, 1.0);
        // The oldest doesn't fit whole; nothing is split.
        assert!(!sessions[0].paid);
        assert!(!sessions[1].paid);
    }

    #[test]
    fn paid_event_clamps_at_zero() {
        let mut ledger = ledger_with(2.0, 10.0, true);
        let ledger_id = ledger.id;
        let payment_id = Ulid::new();
        apply_to_ledger(
            &mut ledger,
            &Event::PaymentRecorded {
                id: payment_id,
                ledger_id,
                hours_included: 5.0,
                amount_cents: 10_000,
                currency: "USD".into(),
                status: PaymentStatus::Pending,
                due_date: None,
                method: None,
            },
        );
        apply_to_ledger(
            &mut ledger,
            &Event::PaymentMarkedPaid {
                id: payment_id,
                ledger_id,
                paid_date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            },
        );
        assert_eq!(ledger.unpaid_hours, 0.0); // excess absorbed, no credit
        assert!(!ledger.reminder_sent); // cycle reset
    }

    fn session(hours: f64, paid: bool) -> LectureSession {
        LectureSession {
            id: Ulid::new(),
            appointment_id: None,
            hours,
            date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            paid,
        }
    }
}
