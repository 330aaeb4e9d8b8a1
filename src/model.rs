use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only timestamp type.
pub type Ms = i64;

/// Minute of day, 0..=1440. Slot times are minute-granular.
pub type MinuteOfDay = u16;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn duration_hours(&self) -> f64 {
        self.duration_ms() as f64 / 3_600_000.0
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Day of week, 0 = Sunday .. 6 = Saturday.
pub fn weekday_of(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// Concrete UTC span of a date-bound time range.
pub fn date_span(date: NaiveDate, start_min: MinuteOfDay, end_min: MinuteOfDay) -> Span {
    let midnight = date.and_time(NaiveTime::MIN).and_utc().timestamp_millis();
    Span::new(
        midnight + start_min as Ms * 60_000,
        midnight + end_min as Ms * 60_000,
    )
}

// ── Appointments ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    /// Position in the forward-only chain. The cancellation-style terminal
    /// states sit outside the chain and have none.
    pub fn forward_rank(&self) -> Option<u8> {
        match self {
            AppointmentStatus::Scheduled => Some(0),
            AppointmentStatus::Confirmed => Some(1),
            AppointmentStatus::InProgress => Some(2),
            AppointmentStatus::Completed => Some(3),
            AppointmentStatus::Cancelled | AppointmentStatus::NoShow => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "SCHEDULED",
            AppointmentStatus::Confirmed => "CONFIRMED",
            AppointmentStatus::InProgress => "IN_PROGRESS",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::Cancelled => "CANCELLED",
            AppointmentStatus::NoShow => "NO_SHOW",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "SCHEDULED" => Some(AppointmentStatus::Scheduled),
            "CONFIRMED" => Some(AppointmentStatus::Confirmed),
            "IN_PROGRESS" => Some(AppointmentStatus::InProgress),
            "COMPLETED" => Some(AppointmentStatus::Completed),
            "CANCELLED" => Some(AppointmentStatus::Cancelled),
            "NO_SHOW" => Some(AppointmentStatus::NoShow),
            _ => None,
        }
    }
}

/// Rate captured at booking time so later profile edits don't rewrite history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSnapshot {
    pub hourly_cents: i64,
    pub currency: String,
    pub cost_cents: i64,
}

impl RateSnapshot {
    pub fn at_booking(hourly_cents: i64, currency: String, span: &Span) -> Self {
        let cost_cents = (hourly_cents as f64 * span.duration_hours()).round() as i64;
        Self {
            hourly_cents,
            currency,
            cost_cents,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub student_id: Ulid,
    pub tutor_id: Ulid,
    pub subject: String,
    pub span: Span,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub rate: RateSnapshot,
    /// Recorded at completion when the taught time differed from the scheduled time.
    pub actual_span: Option<Span>,
}

impl Appointment {
    /// The span hours are billed against: actual if recorded, else scheduled.
    pub fn billable_span(&self) -> Span {
        self.actual_span.unwrap_or(self.span)
    }
}

// ── Availability ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotOrigin {
    /// Materialized from a recurring template.
    Expanded { template_id: Ulid },
    /// Entered directly by the tutor.
    OneOff,
}

/// Recurring weekly availability pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotTemplate {
    pub id: Ulid,
    pub tutor_id: Ulid,
    pub weekday: u8,
    pub start_min: MinuteOfDay,
    pub end_min: MinuteOfDay,
    pub active: bool,
}

/// Concrete date-bound bookable slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: Ulid,
    pub tutor_id: Ulid,
    pub date: NaiveDate,
    pub start_min: MinuteOfDay,
    pub end_min: MinuteOfDay,
    pub available: bool,
    pub origin: SlotOrigin,
}

impl Slot {
    pub fn span(&self) -> Span {
        date_span(self.date, self.start_min, self.end_min)
    }
}

// ── Ledger ───────────────────────────────────────────────────────

/// A ledger row is keyed by this triple for its whole life.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerKey {
    pub student_id: Ulid,
    pub tutor_id: Ulid,
    pub subject: String,
}

/// One historical record of actual taught time. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LectureSession {
    pub id: Ulid,
    pub appointment_id: Option<Ulid>,
    pub hours: f64,
    pub date: NaiveDate,
    pub paid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Paid,
    Overdue,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Overdue => "OVERDUE",
            PaymentStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(PaymentStatus::Pending),
            "PAID" => Some(PaymentStatus::Paid),
            "OVERDUE" => Some(PaymentStatus::Overdue),
            "CANCELLED" => Some(PaymentStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Ulid,
    pub hours_included: f64,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub due_date: Option<NaiveDate>,
    pub paid_date: Option<NaiveDate>,
    pub method: Option<String>,
}

/// Running balance of taught vs. paid hours for one (student, tutor, subject).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    pub id: Ulid,
    pub key: LedgerKey,
    pub total_hours: f64,
    pub unpaid_hours: f64,
    pub payment_interval: f64,
    pub last_session_date: Option<NaiveDate>,
    pub reminder_sent: bool,
    pub sessions: Vec<LectureSession>,
    pub payments: Vec<Payment>,
}

impl Ledger {
    pub fn new(id: Ulid, key: LedgerKey, payment_interval: f64) -> Self {
        Self {
            id,
            key,
            total_hours: 0.0,
            unpaid_hours: 0.0,
            payment_interval,
            last_session_date: None,
            reminder_sent: false,
            sessions: Vec::new(),
            payments: Vec::new(),
        }
    }

    pub fn payment(&self, id: Ulid) -> Option<&Payment> {
        self.payments.iter().find(|p| p.id == id)
    }
}

// ── Per-tutor calendar state ─────────────────────────────────────

/// All scheduling state owned by one tutor. Guarded by one RwLock in the
/// engine, which is what makes conflict-check-then-insert a single unit.
#[derive(Debug, Clone)]
pub struct TutorBook {
    pub tutor_id: Ulid,
    pub templates: Vec<SlotTemplate>,
    /// Sorted by (date, start_min).
    pub slots: Vec<Slot>,
    /// Sorted by span.start.
    pub appointments: Vec<Appointment>,
}

impl TutorBook {
    pub fn new(tutor_id: Ulid) -> Self {
        Self {
            tutor_id,
            templates: Vec::new(),
            slots: Vec::new(),
            appointments: Vec::new(),
        }
    }

    /// Insert keeping appointments sorted by span.start.
    pub fn insert_appointment(&mut self, appt: Appointment) {
        let pos = self
            .appointments
            .binary_search_by_key(&appt.span.start, |a| a.span.start)
            .unwrap_or_else(|e| e);
        self.appointments.insert(pos, appt);
    }

    /// Appointments whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn appointments_overlapping(&self, query: &Span) -> impl Iterator<Item = &Appointment> {
        let right_bound = self
            .appointments
            .partition_point(|a| a.span.start < query.end);
        self.appointments[..right_bound]
            .iter()
            .filter(move |a| a.span.end > query.start)
    }

    pub fn appointment(&self, id: Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }

    pub fn appointment_mut(&mut self, id: Ulid) -> Option<&mut Appointment> {
        self.appointments.iter_mut().find(|a| a.id == id)
    }

    /// Insert keeping slots sorted by (date, start_min).
    pub fn insert_slot(&mut self, slot: Slot) {
        let pos = self
            .slots
            .binary_search_by_key(&(slot.date, slot.start_min), |s| (s.date, s.start_min))
            .unwrap_or_else(|e| e);
        self.slots.insert(pos, slot);
    }

    /// Exact (date, start-minute) lookup, availability flag ignored.
    pub fn slot_at(&self, date: NaiveDate, start_min: MinuteOfDay) -> Option<&Slot> {
        self.slots
            .binary_search_by_key(&(date, start_min), |s| (s.date, s.start_min))
            .ok()
            .map(|pos| &self.slots[pos])
    }

    pub fn slot(&self, id: Ulid) -> Option<&Slot> {
        self.slots.iter().find(|s| s.id == id)
    }

    pub fn slot_mut(&mut self, id: Ulid) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|s| s.id == id)
    }

    pub fn template(&self, id: Ulid) -> Option<&SlotTemplate> {
        self.templates.iter().find(|t| t.id == id)
    }

    pub fn template_mut(&mut self, id: Ulid) -> Option<&mut SlotTemplate> {
        self.templates.iter_mut().find(|t| t.id == id)
    }
}

// ── WAL events ───────────────────────────────────────────────────

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    TemplateAdded {
        id: Ulid,
        tutor_id: Ulid,
        weekday: u8,
        start_min: MinuteOfDay,
        end_min: MinuteOfDay,
    },
    TemplateUpdated {
        id: Ulid,
        tutor_id: Ulid,
        weekday: u8,
        start_min: MinuteOfDay,
        end_min: MinuteOfDay,
    },
    TemplateDeactivated {
        id: Ulid,
        tutor_id: Ulid,
    },
    SlotAdded {
        id: Ulid,
        tutor_id: Ulid,
        date: NaiveDate,
        start_min: MinuteOfDay,
        end_min: MinuteOfDay,
        origin: SlotOrigin,
    },
    SlotDisabled {
        id: Ulid,
        tutor_id: Ulid,
    },
    AppointmentBooked {
        id: Ulid,
        student_id: Ulid,
        tutor_id: Ulid,
        subject: String,
        span: Span,
        hourly_cents: i64,
        currency: String,
        notes: Option<String>,
    },
    AppointmentTransitioned {
        id: Ulid,
        tutor_id: Ulid,
        status: AppointmentStatus,
        actual_span: Option<Span>,
    },
    SessionRecorded {
        id: Ulid,
        ledger_id: Ulid,
        student_id: Ulid,
        tutor_id: Ulid,
        subject: String,
        hours: f64,
        date: NaiveDate,
        appointment_id: Option<Ulid>,
    },
    PaymentRecorded {
        id: Ulid,
        ledger_id: Ulid,
        hours_included: f64,
        amount_cents: i64,
        currency: String,
        status: PaymentStatus,
        due_date: Option<NaiveDate>,
        method: Option<String>,
    },
    PaymentMarkedPaid {
        id: Ulid,
        ledger_id: Ulid,
        paid_date: NaiveDate,
    },
    /// Non-settling status moves (cancelled, overdue). Settlement goes
    /// through `PaymentMarkedPaid`, which is the only ledger-affecting one.
    PaymentStatusChanged {
        id: Ulid,
        ledger_id: Ulid,
        status: PaymentStatus,
    },
    ReminderMarked {
        ledger_id: Ulid,
    },
    PaymentIntervalChanged {
        ledger_id: Ulid,
        hours: f64,
    },
    /// Compaction snapshot — restores a ledger verbatim, history included.
    LedgerSnapshot {
        ledger: Ledger,
    },
}

// ── Query result types ───────────────────────────────────────────

/// Flat ledger summary for listing (history vectors omitted).
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerInfo {
    pub id: Ulid,
    pub student_id: Ulid,
    pub tutor_id: Ulid,
    pub subject: String,
    pub total_hours: f64,
    pub unpaid_hours: f64,
    pub payment_interval: f64,
    pub last_session_date: Option<NaiveDate>,
    pub reminder_sent: bool,
}

impl Ledger {
    pub fn summary(&self) -> LedgerInfo {
        LedgerInfo {
            id: self.id,
            student_id: self.key.student_id,
            tutor_id: self.key.tutor_id,
            subject: self.key.subject.clone(),
            total_hours: self.total_hours,
            unpaid_hours: self.unpaid_hours,
            payment_interval: self.payment_interval,
            last_session_date: self.last_session_date,
            reminder_sent: self.reminder_sent,
        }
    }
}
