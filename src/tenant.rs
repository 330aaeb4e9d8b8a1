use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::engine::Engine;
use crate::idempotency::InMemoryClaimStore;
use crate::limits::*;
use crate::notify::NotifyHub;
use crate::reaper;

/// Manages per-tenant engines. Each tenant gets its own Engine + WAL + claim
/// store + background tasks. Tenant = database name from the pgwire connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    claim_ttl_ms: i64,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, claim_ttl_ms: i64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            claim_ttl_ms,
        }
    }

    /// Get or lazily create an engine for the given tenant.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // Sanitize tenant name to prevent path traversal
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let notify = Arc::new(NotifyHub::new());
        let claims = Arc::new(InMemoryClaimStore::new());
        let engine = Arc::new(Engine::new(wal_path, notify, claims, self.claim_ttl_ms)?);

        // Spawn reaper + compactor for this tenant
        let reaper_engine = engine.clone();
        tokio::spawn(async move {
            reaper::run_reaper(reaper_engine).await;
        });
        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            reaper::run_compactor(compactor_engine, threshold).await;
        });

        self.engines.insert(tenant.to_string(), engine.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Actor;
    use crate::model::date_span;
    use chrono::NaiveDate;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("lectern_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn tenant_isolation() {
        let dir = test_data_dir("isolation");
        let tm = TenantManager::new(dir, 1000, 3_600_000);

        let eng_a = tm.get_or_create("tenant_a").unwrap();
        let eng_b = tm.get_or_create("tenant_b").unwrap();

        let tutor = Ulid::new();
        let d = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();

        // Book the same tutor/time in both tenants — isolated calendars.
        for engine in [&eng_a, &eng_b] {
            engine
                .book_appointment(
                    Actor::Service,
                    crate::engine::BookingRequest {
                        id: Ulid::new(),
                        student_id: Ulid::new(),
                        tutor_id: tutor,
                        subject: "math".into(),
                        span: date_span(d, 9 * 60, 10 * 60),
                        hourly_cents: 3000,
                        currency: "USD".into(),
                        notes: None,
                        request_key: None,
                    },
                )
                .await
                .unwrap();
        }

        assert_eq!(eng_a.list_appointments(tutor).await.len(), 1);
        assert_eq!(eng_b.list_appointments(tutor).await.len(), 1);
    }

    #[tokio::test]
    async fn tenant_lazy_creation() {
        let dir = test_data_dir("lazy");
        let tm = TenantManager::new(dir.clone(), 1000, 3_600_000);

        // No WAL files should exist yet
        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        // Create a tenant
        let _eng = tm.get_or_create("my_db").unwrap();

        // WAL file should now exist
        assert!(dir.join("my_db.wal").exists());
    }

    #[tokio::test]
    async fn tenant_same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let tm = TenantManager::new(dir, 1000, 3_600_000);

        let eng1 = tm.get_or_create("foo").unwrap();
        let eng2 = tm.get_or_create("foo").unwrap();

        // Should be the same Arc
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn tenant_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let tm = TenantManager::new(dir.clone(), 1000, 3_600_000);

        // Path traversal attempt
        let _eng = tm.get_or_create("../evil").unwrap();
        // Should create "evil.wal", not "../evil.wal"
        assert!(dir.join("evil.wal").exists());

        // Empty after sanitization
        let result = tm.get_or_create("../..");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn tenant_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let tm = TenantManager::new(dir, 1000, 3_600_000);

        let long_name = "x".repeat(MAX_TENANT_NAME_LEN + 1);
        let result = tm.get_or_create(&long_name);
        assert!(result.is_err());
        let err = result.err().unwrap();
        assert!(err.to_string().contains("tenant name too long"));
    }

    #[tokio::test]
    async fn tenant_count_limit() {
        let dir = test_data_dir("count_limit");
        let tm = TenantManager::new(dir, 1000, 3_600_000);

        for i in 0..MAX_TENANTS {
            tm.get_or_create(&format!("t{i}")).unwrap();
        }
        let result = tm.get_or_create("one_more");
        assert!(result.is_err());
        let err = result.err().unwrap();
        assert!(err.to_string().contains("too many tenants"));
    }
}
