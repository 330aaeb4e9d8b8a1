//! Hard caps enforced at the engine boundary.

use crate::model::Ms;

/// 2000-01-01T00:00:00Z — anything earlier is a malformed timestamp.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;

/// 2100-01-01T00:00:00Z — anything later is a malformed timestamp.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// A single appointment never spans more than 24 hours.
pub const MAX_SPAN_DURATION_MS: Ms = 24 * 3_600_000;

/// Listing queries are bounded to a one-year window.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * 24 * 3_600_000;

pub const MAX_SUBJECT_LEN: usize = 128;
pub const MAX_NOTES_LEN: usize = 2048;
pub const MAX_METHOD_LEN: usize = 64;
pub const MAX_REQUEST_KEY_LEN: usize = 256;

pub const MAX_SLOTS_PER_TUTOR: usize = 10_000;
pub const MAX_TEMPLATES_PER_TUTOR: usize = 256;
pub const MAX_APPOINTMENTS_PER_TUTOR: usize = 50_000;

/// Expansion windows are capped at one year of weekly occurrences.
pub const MAX_EXPANSION_WEEKS: u32 = 52;
pub const DEFAULT_EXPANSION_WEEKS: u32 = 4;

/// Idempotency claims live for one hour unless released earlier.
pub const DEFAULT_CLAIM_TTL_MS: Ms = 3_600_000;

/// Hours per billing cycle for lazily created ledgers.
pub const DEFAULT_PAYMENT_INTERVAL_HOURS: f64 = 10.0;

pub const MAX_TENANTS: usize = 64;
pub const MAX_TENANT_NAME_LEN: usize = 256;
