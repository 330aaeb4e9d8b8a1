use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

use lectern::model::date_span;
use lectern::tenant::TenantManager;
use lectern::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<TenantManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("lectern_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(dir, 1000, 3_600_000));

    let tm2 = tm.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, "lectern".to_string(), None).await;
            });
        }
    });

    (addr, tm)
}

/// Connect as a given actor (the startup user). Non-ULID users act as the
/// backend service account.
async fn connect_as(addr: SocketAddr, db: &str, user: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(db)
        .user(user)
        .password("lectern");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn connect(addr: SocketAddr, db: &str) -> tokio_postgres::Client {
    connect_as(addr, db, "lectern").await
}

/// Rows affected according to the CommandComplete tag of a simple query.
async fn exec_rows(client: &tokio_postgres::Client, sql: &str) -> u64 {
    let messages = client.simple_query(sql).await.unwrap();
    messages
        .iter()
        .find_map(|m| match m {
            SimpleQueryMessage::CommandComplete(n) => Some(*n),
            _ => None,
        })
        .unwrap_or(0)
}

fn data_rows(messages: &[SimpleQueryMessage]) -> Vec<&tokio_postgres::SimpleQueryRow> {
    messages
        .iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(r) => Some(r),
            _ => None,
        })
        .collect()
}

fn sqlstate(err: &tokio_postgres::Error) -> String {
    err.as_db_error()
        .map(|db| db.code().code().to_string())
        .unwrap_or_default()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn slot_roundtrip_over_wire() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "slots_db").await;
    let tutor = Ulid::new();

    let rows = exec_rows(
        &client,
        &format!(
            "INSERT INTO slots (id, tutor_id, date, start_min, end_min) VALUES ('{}', '{tutor}', '2026-03-02', 540, 600)",
            Ulid::new()
        ),
    )
    .await;
    assert_eq!(rows, 1);

    let messages = client
        .simple_query(&format!("SELECT * FROM slots WHERE tutor_id = '{tutor}'"))
        .await
        .unwrap();
    let rows = data_rows(&messages);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("date"), Some("2026-03-02"));
    assert_eq!(rows[0].get("available"), Some("t"));

    // Outside the date window → empty
    let messages = client
        .simple_query(&format!(
            "SELECT * FROM slots WHERE tutor_id = '{tutor}' AND date >= '2026-04-01' AND date <= '2026-04-30'"
        ))
        .await
        .unwrap();
    assert!(data_rows(&messages).is_empty());
}

#[tokio::test]
async fn expansion_reports_created_then_nothing() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "expand_db").await;
    let tutor = Ulid::new();
    let template = Ulid::new();

    exec_rows(
        &client,
        &format!(
            "INSERT INTO templates (id, tutor_id, weekday, start_min, end_min) VALUES ('{template}', '{tutor}', 1, 540, 600)"
        ),
    )
    .await;

    // Monday 09:00–10:00 for 4 weeks → 4 date-bound slots
    let created = exec_rows(
        &client,
        &format!(
            "INSERT INTO expansions (template_id, from_date, weeks) VALUES ('{template}', '2026-03-02', 4)"
        ),
    )
    .await;
    assert_eq!(created, 4);

    // Identical re-run reports "nothing to create", not a failure.
    let rerun = exec_rows(
        &client,
        &format!(
            "INSERT INTO expansions (template_id, from_date, weeks) VALUES ('{template}', '2026-03-02', 4)"
        ),
    )
    .await;
    assert_eq!(rerun, 0);

    let messages = client
        .simple_query(&format!("SELECT * FROM slots WHERE tutor_id = '{tutor}'"))
        .await
        .unwrap();
    assert_eq!(data_rows(&messages).len(), 4);
}

#[tokio::test]
async fn booking_conflict_maps_to_sqlstate() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "conflict_db").await;
    let tutor = Ulid::new();
    let d = chrono::NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
    let span = date_span(d, 10 * 60, 11 * 60);

    exec_rows(
        &client,
        &format!(
            r#"INSERT INTO appointments (id, student_id, tutor_id, subject, start, "end") VALUES ('{}', '{}', '{tutor}', 'algebra', {}, {})"#,
            Ulid::new(),
            Ulid::new(),
            span.start,
            span.end
        ),
    )
    .await;

    // Overlapping request from another student → slot unavailable
    let overlapping = date_span(d, 10 * 60 + 30, 11 * 60 + 30);
    let err = client
        .simple_query(&format!(
            r#"INSERT INTO appointments (id, student_id, tutor_id, subject, start, "end") VALUES ('{}', '{}', '{tutor}', 'algebra', {}, {})"#,
            Ulid::new(),
            Ulid::new(),
            overlapping.start,
            overlapping.end
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "23P01");

    // Touching interval is fine
    let adjacent = date_span(d, 11 * 60, 12 * 60);
    let rows = exec_rows(
        &client,
        &format!(
            r#"INSERT INTO appointments (id, student_id, tutor_id, subject, start, "end") VALUES ('{}', '{}', '{tutor}', 'algebra', {}, {})"#,
            Ulid::new(),
            Ulid::new(),
            adjacent.start,
            adjacent.end
        ),
    )
    .await;
    assert_eq!(rows, 1);
}

#[tokio::test]
async fn duplicate_idempotent_retry_completes_with_zero_rows() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "dup_db").await;
    let (student, tutor) = (Ulid::new(), Ulid::new());
    let span = date_span(
        chrono::NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
        9 * 60,
        10 * 60,
    );

    let insert = |id: Ulid| {
        format!(
            r#"INSERT INTO appointments (id, student_id, tutor_id, subject, start, "end", rate_cents, currency, request_key) VALUES ('{id}', '{student}', '{tutor}', 'algebra', {}, {}, 3000, 'USD', 'req-42')"#,
            span.start, span.end
        )
    };

    assert_eq!(exec_rows(&client, &insert(Ulid::new())).await, 1);
    // Same request key within the TTL → prior outcome, zero new rows.
    assert_eq!(exec_rows(&client, &insert(Ulid::new())).await, 0);

    let messages = client
        .simple_query(&format!(
            "SELECT * FROM appointments WHERE tutor_id = '{tutor}'"
        ))
        .await
        .unwrap();
    assert_eq!(data_rows(&messages).len(), 1);
}

#[tokio::test]
async fn completion_feeds_ledger_and_payment_clears_it() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "ledger_db").await;
    let (student, tutor) = (Ulid::new(), Ulid::new());
    let span = date_span(
        chrono::NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
        9 * 60,
        10 * 60,
    );
    let appt = Ulid::new();

    exec_rows(
        &client,
        &format!(
            r#"INSERT INTO appointments (id, student_id, tutor_id, subject, start, "end", rate_cents) VALUES ('{appt}', '{student}', '{tutor}', 'algebra', {}, {}, 3000)"#,
            span.start, span.end
        ),
    )
    .await;
    exec_rows(
        &client,
        &format!("UPDATE appointments SET status = 'COMPLETED' WHERE id = '{appt}'"),
    )
    .await;

    let messages = client
        .simple_query(&format!("SELECT * FROM ledgers WHERE tutor_id = '{tutor}'"))
        .await
        .unwrap();
    let rows = data_rows(&messages);
    assert_eq!(rows.len(), 1);
    let ledger_id = rows[0].get("id").unwrap().to_string();
    let unpaid: f64 = rows[0].get("unpaid_hours").unwrap().parse().unwrap();
    assert_eq!(unpaid, 1.0);

    exec_rows(
        &client,
        &format!(
            "INSERT INTO payments (id, ledger_id, hours, amount_cents, currency) VALUES ('{}', '{ledger_id}', 1.0, 3000, 'USD')",
            Ulid::new()
        ),
    )
    .await;

    let messages = client
        .simple_query(&format!("SELECT * FROM ledgers WHERE id = '{ledger_id}'"))
        .await
        .unwrap();
    let rows = data_rows(&messages);
    let unpaid: f64 = rows[0].get("unpaid_hours").unwrap().parse().unwrap();
    assert_eq!(unpaid, 0.0);

    let messages = client
        .simple_query(&format!(
            "SELECT * FROM sessions WHERE ledger_id = '{ledger_id}'"
        ))
        .await
        .unwrap();
    let rows = data_rows(&messages);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("paid"), Some("t"));
}

#[tokio::test]
async fn ownership_violation_maps_to_insufficient_privilege() {
    let (addr, _tm) = start_test_server().await;
    let tutor = Ulid::new();
    let stranger = Ulid::new();
    // Connect as an end user who is not the tutor.
    let client = connect_as(addr, "owner_db", &stranger.to_string()).await;

    let err = client
        .simple_query(&format!(
            "INSERT INTO slots (id, tutor_id, date, start_min, end_min) VALUES ('{}', '{tutor}', '2026-03-02', 540, 600)",
            Ulid::new()
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "42501");
}

#[tokio::test]
async fn malformed_time_range_maps_to_validation() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "validation_db").await;
    let tutor = Ulid::new();

    // start >= end
    let err = client
        .simple_query(&format!(
            "INSERT INTO slots (id, tutor_id, date, start_min, end_min) VALUES ('{}', '{tutor}', '2026-03-02', 600, 540)",
            Ulid::new()
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "22023");
}

#[tokio::test]
async fn tenants_are_isolated_over_wire() {
    let (addr, _tm) = start_test_server().await;
    let client_a = connect(addr, "tenant_a").await;
    let client_b = connect(addr, "tenant_b").await;
    let tutor = Ulid::new();

    exec_rows(
        &client_a,
        &format!(
            "INSERT INTO slots (id, tutor_id, date, start_min, end_min) VALUES ('{}', '{tutor}', '2026-03-02', 540, 600)",
            Ulid::new()
        ),
    )
    .await;

    let messages = client_b
        .simple_query(&format!("SELECT * FROM slots WHERE tutor_id = '{tutor}'"))
        .await
        .unwrap();
    assert!(data_rows(&messages).is_empty());
}

#[tokio::test]
async fn listen_validates_channel_shape() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "listen_db").await;

    client
        .batch_execute(&format!("LISTEN user_{}", Ulid::new()))
        .await
        .unwrap();

    let err = client.batch_execute("LISTEN bogus_channel").await.unwrap_err();
    assert_eq!(sqlstate(&err), "42000");
}
