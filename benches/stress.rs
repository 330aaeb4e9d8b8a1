use std::time::{Duration, Instant};

use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

const HOUR: i64 = 3_600_000; // 1 hour in ms
const BASE: i64 = 1_772_409_600_000; // 2026-03-02T00:00:00Z

async fn connect(host: &str, port: u16, db: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(db)
        .user("lectern")
        .password("lectern");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn book_sql(student: Ulid, tutor: Ulid, start: i64, end: i64) -> String {
    format!(
        r#"INSERT INTO appointments (id, student_id, tutor_id, subject, start, "end", rate_cents) VALUES ('{}', '{student}', '{tutor}', 'bench', {start}, {end}, 3000)"#,
        Ulid::new()
    )
}

/// Phase 1: sequential non-conflicting bookings against one tutor.
async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port, &format!("bench_{}", Ulid::new())).await;
    let tutor = Ulid::new();
    let student = Ulid::new();

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let s = BASE + (i as i64) * HOUR;
        let t = Instant::now();
        client
            .batch_execute(&book_sql(student, tutor, s, s + HOUR))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    println!(
        "  throughput: {:.0} bookings/s",
        n as f64 / elapsed.as_secs_f64()
    );
    print_latency("sequential booking", &mut latencies);
}

/// Phase 2: concurrent clients hammering the same hour of the same tutor.
/// Exactly one booking must win per hour; the rest take the conflict path.
async fn phase2_contention(host: &str, port: u16) {
    let db = format!("bench_{}", Ulid::new());
    let tutor = Ulid::new();
    let clients = 16;
    let rounds = 50;

    // Warm the tenant up front so all clients share one engine.
    connect(host, port, &db).await;

    let mut handles = Vec::new();
    for _ in 0..clients {
        let host = host.to_string();
        let db = db.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &db).await;
            let student = Ulid::new();
            let mut won = 0usize;
            let mut lost = 0usize;
            let mut latencies = Vec::with_capacity(rounds);
            for round in 0..rounds {
                let s = BASE + (round as i64) * HOUR;
                let t = Instant::now();
                match client
                    .batch_execute(&book_sql(student, tutor, s, s + HOUR))
                    .await
                {
                    Ok(()) => won += 1,
                    Err(_) => lost += 1,
                }
                latencies.push(t.elapsed());
            }
            (won, lost, latencies)
        }));
    }

    let mut total_won = 0;
    let mut total_lost = 0;
    let mut latencies = Vec::new();
    for handle in handles {
        let (won, lost, mut l) = handle.await.unwrap();
        total_won += won;
        total_lost += lost;
        latencies.append(&mut l);
    }

    println!("  contended rounds: {rounds}, winners: {total_won}, conflicts: {total_lost}");
    assert_eq!(total_won, rounds, "exactly one winner per contended hour");
    print_latency("contended booking", &mut latencies);
}

/// Phase 3: expansion + listing mix.
async fn phase3_expansion(host: &str, port: u16) {
    let client = connect(host, port, &format!("bench_{}", Ulid::new())).await;
    let tutor = Ulid::new();

    // 12 hour-slots across 7 weekdays — every (weekday, start) pair unique.
    let n = 84;
    let mut latencies = Vec::with_capacity(n);
    for i in 0..n {
        let template = Ulid::new();
        let start_min = 6 * 60 + (i as i64 / 7 % 12) * 60;
        client
            .batch_execute(&format!(
                "INSERT INTO templates (id, tutor_id, weekday, start_min, end_min) VALUES ('{template}', '{tutor}', {}, {start_min}, {})",
                i % 7,
                start_min + 60
            ))
            .await
            .unwrap();

        let t = Instant::now();
        client
            .batch_execute(&format!(
                "INSERT INTO expansions (template_id, from_date, weeks) VALUES ('{template}', '2026-03-02', 8)"
            ))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let rows = client
        .simple_query(&format!("SELECT * FROM slots WHERE tutor_id = '{tutor}'"))
        .await
        .unwrap();
    println!("  slots materialized: {}", rows.len().saturating_sub(1));
    print_latency("expansion (8 weeks)", &mut latencies);
}

#[tokio::main]
async fn main() {
    let host = std::env::var("LECTERN_BENCH_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("LECTERN_BENCH_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5433);

    println!("lectern stress bench against {host}:{port}");

    println!("phase 1: sequential bookings");
    phase1_sequential(&host, port).await;

    println!("phase 2: contended bookings");
    phase2_contention(&host, port).await;

    println!("phase 3: template expansion");
    phase3_expansion(&host, port).await;
}
