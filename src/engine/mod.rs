mod availability;
mod booking;
mod conflict;
mod error;
mod ledger;
mod lifecycle;
mod queries;
mod slots;

pub use availability::{expansion_dates, Expansion, ExpansionWindow, NothingToCreate};
pub use booking::{BookOutcome, BookingRequest};
pub use error::EngineError;
pub use ledger::reminder_due;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Timelike};
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::idempotency::ClaimStore;
use crate::limits::DEFAULT_PAYMENT_INTERVAL_HOURS;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedTutorBook = Arc<RwLock<TutorBook>>;
pub type SharedLedger = Arc<RwLock<Ledger>>;

/// Who is asking. The identity collaborator authenticates upstream; the
/// engine only checks ownership. The service account skips those checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Service,
    User(Ulid),
}

impl Actor {
    pub fn owns(&self, user_id: Ulid) -> bool {
        match self {
            Actor::Service => true,
            Actor::User(id) => *id == user_id,
        }
    }

    pub fn owns_any(&self, user_ids: &[Ulid]) -> bool {
        match self {
            Actor::Service => true,
            Actor::User(id) => user_ids.contains(id),
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

pub struct Engine {
    /// Per-tutor calendars (templates, slots, appointments).
    pub books: DashMap<Ulid, SharedTutorBook>,
    /// Ledger rows by id.
    pub ledgers: DashMap<Ulid, SharedLedger>,
    /// (student, tutor, subject) → ledger id.
    pub(super) ledger_index: DashMap<LedgerKey, Ulid>,
    /// Reverse lookup: template/slot/appointment id → tutor id.
    pub(super) entity_to_tutor: DashMap<Ulid, Ulid>,
    /// Reverse lookup: payment id → ledger id.
    pub(super) payment_to_ledger: DashMap<Ulid, Ulid>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub claims: Arc<dyn ClaimStore>,
    pub(super) claim_ttl_ms: Ms,
}

/// Apply a calendar event directly to a TutorBook (no locking — caller holds
/// the lock).
fn apply_to_book(book: &mut TutorBook, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::TemplateAdded {
            id,
            tutor_id,
            weekday,
            start_min,
            end_min,
        } => {
            book.templates.push(SlotTemplate {
                id: *id,
                tutor_id: *tutor_id,
                weekday: *weekday,
                start_min: *start_min,
                end_min: *end_min,
                active: true,
            });
            entity_map.insert(*id, *tutor_id);
        }
        Event::TemplateUpdated {
            id,
            weekday,
            start_min,
            end_min,
            ..
        } => {
            if let Some(t) = book.template_mut(*id) {
                t.weekday = *weekday;
                t.start_min = *start_min;
                t.end_min = *end_min;
            }
        }
        Event::TemplateDeactivated { id, .. } => {
            if let Some(t) = book.template_mut(*id) {
                t.active = false;
            }
        }
        Event::SlotAdded {
            id,
            tutor_id,
            date,
            start_min,
            end_min,
            origin,
        } => {
            book.insert_slot(Slot {
                id: *id,
                tutor_id: *tutor_id,
                date: *date,
                start_min: *start_min,
                end_min: *end_min,
                available: true,
                origin: *origin,
            });
            entity_map.insert(*id, *tutor_id);
        }
        Event::SlotDisabled { id, .. } => {
            if let Some(s) = book.slot_mut(*id) {
                s.available = false;
            }
        }
        Event::AppointmentBooked {
            id,
            student_id,
            tutor_id,
            subject,
            span,
            hourly_cents,
            currency,
            notes,
        } => {
            book.insert_appointment(Appointment {
                id: *id,
                student_id: *student_id,
                tutor_id: *tutor_id,
                subject: subject.clone(),
                span: *span,
                status: AppointmentStatus::Scheduled,
                notes: notes.clone(),
                rate: RateSnapshot::at_booking(*hourly_cents, currency.clone(), span),
                actual_span: None,
            });
            entity_map.insert(*id, *tutor_id);
            disable_matching_slot(book, span);
        }
        Event::AppointmentTransitioned {
            id,
            status,
            actual_span,
            ..
        } => {
            if let Some(a) = book.appointment_mut(*id) {
                a.status = *status;
                if actual_span.is_some() {
                    a.actual_span = *actual_span;
                }
            }
        }
        // Ledger events are applied at the ledger level, not here.
        _ => {}
    }
}

/// A booked span soft-disables the exactly matching slot so it stops being
/// offered. The slot stays on record (never deleted) for history.
fn disable_matching_slot(book: &mut TutorBook, span: &Span) {
    let Some((date, start_min, end_min)) = span_date_minutes(span) else {
        return;
    };
    if let Ok(pos) = book
        .slots
        .binary_search_by_key(&(date, start_min), |s| (s.date, s.start_min))
    {
        let slot = &mut book.slots[pos];
        if slot.end_min == end_min {
            slot.available = false;
        }
    }
}

/// Project a span back onto (date, start-minute, end-minute). None when the
/// span is not minute-aligned within a single UTC day.
fn span_date_minutes(span: &Span) -> Option<(chrono::NaiveDate, MinuteOfDay, MinuteOfDay)> {
    let start = DateTime::from_timestamp_millis(span.start)?;
    let end = DateTime::from_timestamp_millis(span.end)?;
    let date = start.date_naive();
    if end.date_naive() != date {
        return None;
    }
    let start_min = (start.time().hour() * 60 + start.time().minute()) as MinuteOfDay;
    let end_min = (end.time().hour() * 60 + end.time().minute()) as MinuteOfDay;
    if start_min >= end_min || date_span(date, start_min, end_min) != *span {
        return None;
    }
    Some((date, start_min, end_min))
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        claims: Arc<dyn ClaimStore>,
        claim_ttl_ms: Ms,
    ) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            books: DashMap::new(),
            ledgers: DashMap::new(),
            ledger_index: DashMap::new(),
            entity_to_tutor: DashMap::new(),
            payment_to_ledger: DashMap::new(),
            wal_tx,
            notify,
            claims,
            claim_ttl_ms,
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context (lazy tenant creation).
        for event in &events {
            engine.replay_event(event);
        }

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::LedgerSnapshot { ledger } => {
                self.index_ledger(ledger);
                self.ledgers
                    .insert(ledger.id, Arc::new(RwLock::new(ledger.clone())));
            }
            Event::SessionRecorded {
                ledger_id,
                student_id,
                tutor_id,
                subject,
                ..
            } => {
                let key = LedgerKey {
                    student_id: *student_id,
                    tutor_id: *tutor_id,
                    subject: subject.clone(),
                };
                let shared = self
                    .ledgers
                    .entry(*ledger_id)
                    .or_insert_with(|| {
                        Arc::new(RwLock::new(Ledger::new(
                            *ledger_id,
                            key.clone(),
                            DEFAULT_PAYMENT_INTERVAL_HOURS,
                        )))
                    })
                    .clone();
                self.ledger_index.insert(key, *ledger_id);
                let mut guard = shared.try_write().expect("replay: uncontended write");
                ledger::apply_to_ledger(&mut guard, event);
            }
            _ => {
                if let Some(ledger_id) = event_ledger_id(event) {
                    if let Some(entry) = self.ledgers.get(&ledger_id) {
                        let shared = entry.value().clone();
                        let mut guard = shared.try_write().expect("replay: uncontended write");
                        ledger::apply_to_ledger(&mut guard, event);
                    }
                    if let Event::PaymentRecorded { id, ledger_id, .. } = event {
                        self.payment_to_ledger.insert(*id, *ledger_id);
                    }
                } else if let Some(tutor_id) = event_tutor_id(event) {
                    let shared = self.get_or_create_book(tutor_id);
                    let mut guard = shared.try_write().expect("replay: uncontended write");
                    apply_to_book(&mut guard, event, &self.entity_to_tutor);
                }
            }
        }
    }

    fn index_ledger(&self, ledger: &Ledger) {
        self.ledger_index.insert(ledger.key.clone(), ledger.id);
        for p in &ledger.payments {
            self.payment_to_ledger.insert(p.id, ledger.id);
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append + apply to a locked book in one call.
    pub(super) async fn append_and_apply_book(
        &self,
        book: &mut TutorBook,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_book(book, event, &self.entity_to_tutor);
        Ok(())
    }

    /// WAL-append + apply to a locked ledger in one call.
    pub(super) async fn append_and_apply_ledger(
        &self,
        ledger: &mut Ledger,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        ledger::apply_to_ledger(ledger, event);
        if let Event::PaymentRecorded { id, ledger_id, .. } = event {
            self.payment_to_ledger.insert(*id, *ledger_id);
        }
        Ok(())
    }

    pub fn get_or_create_book(&self, tutor_id: Ulid) -> SharedTutorBook {
        self.books
            .entry(tutor_id)
            .or_insert_with(|| Arc::new(RwLock::new(TutorBook::new(tutor_id))))
            .clone()
    }

    pub fn get_book(&self, tutor_id: &Ulid) -> Option<SharedTutorBook> {
        self.books.get(tutor_id).map(|e| e.value().clone())
    }

    pub fn tutor_of_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_tutor.get(entity_id).map(|e| *e.value())
    }

    pub fn get_ledger(&self, id: &Ulid) -> Option<SharedLedger> {
        self.ledgers.get(id).map(|e| e.value().clone())
    }

    pub fn ledger_id_for(&self, key: &LedgerKey) -> Option<Ulid> {
        self.ledger_index.get(key).map(|e| *e.value())
    }

    /// Lookup entity → tutor, get book, acquire write lock.
    pub(super) async fn resolve_entity_book_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<TutorBook>), EngineError> {
        let tutor_id = self
            .tutor_of_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let book = self
            .get_book(&tutor_id)
            .ok_or(EngineError::NotFound(tutor_id))?;
        let guard = book.write_owned().await;
        Ok((tutor_id, guard))
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let book_arcs: Vec<SharedTutorBook> =
            self.books.iter().map(|e| e.value().clone()).collect();
        for book in book_arcs {
            let guard = book.read().await;
            for t in &guard.templates {
                events.push(Event::TemplateAdded {
                    id: t.id,
                    tutor_id: t.tutor_id,
                    weekday: t.weekday,
                    start_min: t.start_min,
                    end_min: t.end_min,
                });
                if !t.active {
                    events.push(Event::TemplateDeactivated {
                        id: t.id,
                        tutor_id: t.tutor_id,
                    });
                }
            }
            for s in &guard.slots {
                events.push(Event::SlotAdded {
                    id: s.id,
                    tutor_id: s.tutor_id,
                    date: s.date,
                    start_min: s.start_min,
                    end_min: s.end_min,
                    origin: s.origin,
                });
                if !s.available {
                    events.push(Event::SlotDisabled {
                        id: s.id,
                        tutor_id: s.tutor_id,
                    });
                }
            }
            for a in &guard.appointments {
                events.push(Event::AppointmentBooked {
                    id: a.id,
                    student_id: a.student_id,
                    tutor_id: a.tutor_id,
                    subject: a.subject.clone(),
                    span: a.span,
                    hourly_cents: a.rate.hourly_cents,
                    currency: a.rate.currency.clone(),
                    notes: a.notes.clone(),
                });
                if a.status != AppointmentStatus::Scheduled {
                    events.push(Event::AppointmentTransitioned {
                        id: a.id,
                        tutor_id: a.tutor_id,
                        status: a.status,
                        actual_span: a.actual_span,
                    });
                }
            }
        }

        let ledger_arcs: Vec<SharedLedger> =
            self.ledgers.iter().map(|e| e.value().clone()).collect();
        for ledger in ledger_arcs {
            let guard = ledger.read().await;
            events.push(Event::LedgerSnapshot {
                ledger: guard.clone(),
            });
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Extract the owning tutor from a calendar event.
fn event_tutor_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::TemplateAdded { tutor_id, .. }
        | Event::TemplateUpdated { tutor_id, .. }
        | Event::TemplateDeactivated { tutor_id, .. }
        | Event::SlotAdded { tutor_id, .. }
        | Event::SlotDisabled { tutor_id, .. }
        | Event::AppointmentBooked { tutor_id, .. }
        | Event::AppointmentTransitioned { tutor_id, .. } => Some(*tutor_id),
        _ => None,
    }
}

/// Extract the target ledger from a ledger event (SessionRecorded is handled
/// separately because it may create the ledger).
fn event_ledger_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::PaymentRecorded { ledger_id, .. }
        | Event::PaymentMarkedPaid { ledger_id, .. }
        | Event::PaymentStatusChanged { ledger_id, .. }
        | Event::ReminderMarked { ledger_id }
        | Event::PaymentIntervalChanged { ledger_id, .. } => Some(*ledger_id),
        _ => None,
    }
}
