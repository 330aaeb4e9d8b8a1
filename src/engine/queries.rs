use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::Engine;

impl Engine {
    pub async fn list_templates(&self, tutor_id: Ulid) -> Vec<SlotTemplate> {
        let Some(book) = self.get_book(&tutor_id) else {
            return Vec::new();
        };
        let guard = book.read().await;
        guard.templates.clone()
    }

    /// Slots for a tutor, optionally bounded to a date window (inclusive).
    pub async fn list_slots(
        &self,
        tutor_id: Ulid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Vec<Slot> {
        let Some(book) = self.get_book(&tutor_id) else {
            return Vec::new();
        };
        let guard = book.read().await;
        guard
            .slots
            .iter()
            .filter(|s| from.is_none_or(|f| s.date >= f) && to.is_none_or(|t| s.date <= t))
            .cloned()
            .collect()
    }

    pub async fn list_appointments(&self, tutor_id: Ulid) -> Vec<Appointment> {
        let Some(book) = self.get_book(&tutor_id) else {
            return Vec::new();
        };
        let guard = book.read().await;
        guard.appointments.clone()
    }

    pub async fn get_appointment(&self, id: Ulid) -> Option<Appointment> {
        let tutor_id = self.tutor_of_entity(&id)?;
        let book = self.get_book(&tutor_id)?;
        let guard = book.read().await;
        guard.appointment(id).cloned()
    }

    pub async fn ledger_info(&self, ledger_id: Ulid) -> Option<LedgerInfo> {
        let shared = self.get_ledger(&ledger_id)?;
        let guard = shared.read().await;
        Some(guard.summary())
    }

    pub async fn list_ledgers_for_tutor(&self, tutor_id: Ulid) -> Vec<LedgerInfo> {
        let shared: Vec<_> = self
            .ledgers
            .iter()
            .map(|e| e.value().clone())
            .collect();
        let mut out = Vec::new();
        for ledger in shared {
            let guard = ledger.read().await;
            if guard.key.tutor_id == tutor_id {
                out.push(guard.summary());
            }
        }
        // Listing order is stable for clients regardless of map iteration.
        out.sort_by_key(|l| l.id);
        out
    }

    pub async fn list_sessions(&self, ledger_id: Ulid) -> Vec<LectureSession> {
        let Some(shared) = self.get_ledger(&ledger_id) else {
            return Vec::new();
        };
        let guard = shared.read().await;
        guard.sessions.clone()
    }

    pub async fn list_payments(&self, ledger_id: Ulid) -> Vec<Payment> {
        let Some(shared) = self.get_ledger(&ledger_id) else {
            return Vec::new();
        };
        let guard = shared.read().await;
        guard.payments.clone()
    }
}
