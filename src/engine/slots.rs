use chrono::NaiveDate;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{expansion_dates, filter_unpopulated, Expansion, ExpansionWindow, NothingToCreate};
use super::conflict::{find_appointment_conflict, find_slot_collision, validate_minutes};
use super::{Actor, Engine, EngineError};

impl Engine {
    /// Publish a recurring weekly availability pattern.
    pub async fn add_template(
        &self,
        actor: Actor,
        id: Ulid,
        tutor_id: Ulid,
        weekday: u8,
        start_min: MinuteOfDay,
        end_min: MinuteOfDay,
    ) -> Result<(), EngineError> {
        validate_minutes(start_min, end_min)?;
        if weekday > 6 {
            return Err(EngineError::Validation("weekday must be 0..=6"));
        }
        if !actor.owns(tutor_id) {
            return Err(EngineError::Forbidden("only the tutor may publish availability"));
        }
        if self.tutor_of_entity(&id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }

        let book = self.get_or_create_book(tutor_id);
        let mut guard = book.write_owned().await;
        if guard.templates.len() >= MAX_TEMPLATES_PER_TUTOR {
            return Err(EngineError::LimitExceeded("too many templates for tutor"));
        }
        if let Some(existing) = guard
            .templates
            .iter()
            .filter(|t| t.active && t.weekday == weekday)
            .find(|t| start_min < t.end_min && t.start_min < end_min)
        {
            return Err(EngineError::Conflict(existing.id));
        }

        let event = Event::TemplateAdded {
            id,
            tutor_id,
            weekday,
            start_min,
            end_min,
        };
        self.append_and_apply_book(&mut guard, &event).await
    }

    /// Move a recurring pattern to a new weekday or time range. Slots already
    /// materialized from it are untouched; only future expansions change.
    pub async fn update_template(
        &self,
        actor: Actor,
        id: Ulid,
        weekday: u8,
        start_min: MinuteOfDay,
        end_min: MinuteOfDay,
    ) -> Result<Ulid, EngineError> {
        validate_minutes(start_min, end_min)?;
        if weekday > 6 {
            return Err(EngineError::Validation("weekday must be 0..=6"));
        }
        let (tutor_id, mut guard) = self.resolve_entity_book_write(&id).await?;
        if !actor.owns(tutor_id) {
            return Err(EngineError::Forbidden("only the tutor may edit availability"));
        }
        let template = guard.template(id).ok_or(EngineError::NotFound(id))?;
        if !template.active {
            return Err(EngineError::Validation("template is deactivated"));
        }
        if let Some(existing) = guard
            .templates
            .iter()
            .filter(|t| t.id != id && t.active && t.weekday == weekday)
            .find(|t| start_min < t.end_min && t.start_min < end_min)
        {
            return Err(EngineError::Conflict(existing.id));
        }

        let event = Event::TemplateUpdated {
            id,
            tutor_id,
            weekday,
            start_min,
            end_min,
        };
        self.append_and_apply_book(&mut guard, &event).await?;
        Ok(tutor_id)
    }

    /// Deactivation stops future expansions; already-materialized slots stay.
    pub async fn deactivate_template(&self, actor: Actor, id: Ulid) -> Result<Ulid, EngineError> {
        let (tutor_id, mut guard) = self.resolve_entity_book_write(&id).await?;
        if !actor.owns(tutor_id) {
            return Err(EngineError::Forbidden("only the tutor may deactivate availability"));
        }
        let template = guard.template(id).ok_or(EngineError::NotFound(id))?;
        if !template.active {
            return Ok(tutor_id); // already done
        }

        let event = Event::TemplateDeactivated { id, tutor_id };
        self.append_and_apply_book(&mut guard, &event).await?;
        Ok(tutor_id)
    }

    /// Create a one-off date-bound slot.
    pub async fn add_slot(
        &self,
        actor: Actor,
        id: Ulid,
        tutor_id: Ulid,
        date: NaiveDate,
        start_min: MinuteOfDay,
        end_min: MinuteOfDay,
    ) -> Result<(), EngineError> {
        validate_minutes(start_min, end_min)?;
        if !actor.owns(tutor_id) {
            return Err(EngineError::Forbidden("only the tutor may publish availability"));
        }
        if self.tutor_of_entity(&id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }

        let book = self.get_or_create_book(tutor_id);
        let mut guard = book.write_owned().await;
        if guard.slots.len() >= MAX_SLOTS_PER_TUTOR {
            return Err(EngineError::LimitExceeded("too many slots for tutor"));
        }
        // One slot per (date, start-minute), active or not — the sorted slot
        // index relies on the key being unique.
        if let Some(existing) = guard.slot_at(date, start_min) {
            return Err(EngineError::Conflict(existing.id));
        }
        if let Some(existing) = find_slot_collision(&guard, date, start_min, end_min) {
            return Err(EngineError::Conflict(existing));
        }
        if let Some(conflicting) =
            find_appointment_conflict(&guard, &date_span(date, start_min, end_min))
        {
            return Err(EngineError::Conflict(conflicting));
        }

        let event = Event::SlotAdded {
            id,
            tutor_id,
            date,
            start_min,
            end_min,
            origin: SlotOrigin::OneOff,
        };
        self.append_and_apply_book(&mut guard, &event).await
    }

    /// Soft-disable: the slot stops being offered but stays on record.
    pub async fn disable_slot(&self, actor: Actor, id: Ulid) -> Result<Ulid, EngineError> {
        let (tutor_id, mut guard) = self.resolve_entity_book_write(&id).await?;
        if !actor.owns(tutor_id) {
            return Err(EngineError::Forbidden("only the tutor may disable slots"));
        }
        let slot = guard.slot(id).ok_or(EngineError::NotFound(id))?;
        if !slot.available {
            return Ok(tutor_id); // already done
        }

        let event = Event::SlotDisabled { id, tutor_id };
        self.append_and_apply_book(&mut guard, &event).await?;
        Ok(tutor_id)
    }

    /// Materialize a recurring template into date-bound slots.
    ///
    /// Idempotent on re-run: candidates whose (date, start-minute) already
    /// carry a slot are dropped, and a run that drops everything reports
    /// `NothingToCreate` instead of silently succeeding with zero rows.
    pub async fn expand_template(
        &self,
        actor: Actor,
        template_id: Ulid,
        from: NaiveDate,
        window: ExpansionWindow,
    ) -> Result<Expansion, EngineError> {
        match window {
            ExpansionWindow::Weeks(weeks) => {
                if weeks > MAX_EXPANSION_WEEKS {
                    return Err(EngineError::LimitExceeded("expansion window too wide"));
                }
            }
            ExpansionWindow::Until(until) => {
                if (until - from).num_days() > 7 * MAX_EXPANSION_WEEKS as i64 {
                    return Err(EngineError::LimitExceeded("expansion window too wide"));
                }
            }
        }

        let (tutor_id, mut guard) = self.resolve_entity_book_write(&template_id).await?;
        if !actor.owns(tutor_id) {
            return Err(EngineError::Forbidden("only the tutor may expand availability"));
        }
        let template = guard
            .template(template_id)
            .ok_or(EngineError::NotFound(template_id))?
            .clone();
        if !template.active {
            return Err(EngineError::Validation("template is deactivated"));
        }

        let dates = expansion_dates(template.weekday, from, window);
        if dates.is_empty() {
            info!("expansion of {template_id}: window holds no occurrence");
            return Ok(Expansion::NothingToCreate(NothingToCreate::EmptyWindow));
        }
        let fresh = filter_unpopulated(&guard, dates, template.start_min);
        if fresh.is_empty() {
            info!("expansion of {template_id}: all dates already populated");
            return Ok(Expansion::NothingToCreate(NothingToCreate::AlreadyPopulated));
        }
        if guard.slots.len() + fresh.len() > MAX_SLOTS_PER_TUTOR {
            return Err(EngineError::LimitExceeded("too many slots for tutor"));
        }

        let mut created = 0usize;
        for date in fresh {
            let event = Event::SlotAdded {
                id: Ulid::new(),
                tutor_id,
                date,
                start_min: template.start_min,
                end_min: template.end_min,
                origin: SlotOrigin::Expanded { template_id },
            };
            self.append_and_apply_book(&mut guard, &event).await?;
            created += 1;
        }
        Ok(Expansion::Created(created))
    }
}
