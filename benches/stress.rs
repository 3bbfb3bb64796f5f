use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use ulid::Ulid;

use vigil::config::Config;
use vigil::engine::Engine;
use vigil::lifecycle::ReservationStatus;
use vigil::model::{CatalogRefs, CustomerSnapshot, OperatingHours, PetSnapshot, Reservation, Room};
use vigil::scheduler::{AvailabilityRequest, Scheduler};

const SLOT_MINUTES: i64 = 120;

fn bench_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("vigil_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).expect("create bench dir");
    dir
}

fn base_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2031, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .expect("valid base time")
}

fn bench_now() -> NaiveDateTime {
    base_time() - TimeDelta::days(1)
}

fn room(name: &str) -> Room {
    Room {
        id: Ulid::new(),
        name: name.into(),
        capacity: None,
        hours: OperatingHours::new(NaiveTime::MIN, NaiveTime::from_hms_opt(23, 59, 0).unwrap_or(NaiveTime::MIN)),
        active: true,
    }
}

fn reservation(room_id: Ulid, slot: i64) -> Reservation {
    let now = Utc::now();
    Reservation {
        id: Ulid::new(),
        room_id,
        scheduled_at: base_time() + TimeDelta::minutes(slot * SLOT_MINUTES),
        duration_minutes: SLOT_MINUTES as u32,
        status: ReservationStatus::Pending,
        customer: CustomerSnapshot {
            name: "bench".into(),
            phone: "000".into(),
            ..Default::default()
        },
        pet: PetSnapshot {
            name: "bench".into(),
            ..Default::default()
        },
        catalog: CatalogRefs::default(),
        memo: None,
        created_at: now,
        updated_at: now,
    }
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
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
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

async fn phase1_sequential(engine: &Engine) {
    let r = engine.create_room(room("sequential")).await.expect("create room");
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        engine
            .insert_reservation(reservation(r.id, i as i64))
            .await
            .expect("sequential insert");
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} reservations in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("commit latency", &mut latencies);
}

async fn phase2_concurrent_rooms(engine: &Arc<Engine>) {
    let n_tasks = 10;
    let n_per_task = 200;
    let start = Instant::now();
    let mut handles = Vec::new();

    for i in 0..n_tasks {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let r = engine
                .create_room(room(&format!("room {i}")))
                .await
                .expect("create room");
            for j in 0..n_per_task {
                engine
                    .insert_reservation(reservation(r.id, j))
                    .await
                    .expect("concurrent insert");
            }
        }));
    }
    for h in handles {
        h.await.expect("task panicked");
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task as usize;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} rooms x {n_per_task} reservations = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

/// Many callers racing for the same windows on one room.
async fn phase3_contention(engine: &Arc<Engine>) {
    let room_id = engine.create_room(room("contended")).await.expect("create room").id;
    let n_tasks = 16;
    let n_slots = 100;
    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let mut won = 0usize;
            let mut latencies = Vec::with_capacity(n_slots);
            for slot in 0..n_slots as i64 {
                let t = Instant::now();
                if engine.insert_reservation(reservation(room_id, slot)).await.is_ok() {
                    won += 1;
                }
                latencies.push(t.elapsed());
            }
            (won, latencies)
        }));
    }

    let mut won = 0;
    let mut latencies = Vec::new();
    for h in handles {
        let (w, l) = h.await.expect("task panicked");
        won += w;
        latencies.extend(l);
    }
    let elapsed = start.elapsed();
    println!(
        "  {n_tasks} callers x {n_slots} slots: {won} committed (expect {n_slots}) in {:.2}s",
        elapsed.as_secs_f64()
    );
    print_latency("attempt latency", &mut latencies);
}

async fn phase4_check_under_load(engine: Arc<Engine>) {
    let scheduler = Arc::new(Scheduler::new(engine.clone(), &Config::default()).with_clock(bench_now));
    let room_id = engine.create_room(room("mixed")).await.expect("create room").id;

    let writer = {
        let engine = engine.clone();
        tokio::spawn(async move {
            for slot in 0..1000 {
                let _ = engine.insert_reservation(reservation(room_id, slot)).await;
            }
        })
    };

    let mut latencies = Vec::with_capacity(1000);
    for slot in 0..1000i64 {
        let t = Instant::now();
        let _ = scheduler
            .check_availability(AvailabilityRequest {
                room_id: Some(room_id),
                scheduled_at: Some(base_time() + TimeDelta::minutes(slot * SLOT_MINUTES + 60)),
                duration_minutes: None,
                exclude_reservation_id: None,
            })
            .await;
        latencies.push(t.elapsed());
    }
    writer.await.expect("writer panicked");
    print_latency("advisory check latency", &mut latencies);
}

#[tokio::main]
async fn main() {
    println!("=== vigil stress benchmark ===");
    let dir = bench_dir();
    println!("journal dir: {}\n", dir.display());

    let engine = Arc::new(Engine::new(dir.join("vigil.journal")).expect("open journal"));

    println!("[phase 1] sequential commit throughput");
    phase1_sequential(&engine).await;

    println!("\n[phase 2] concurrent commits on separate rooms");
    phase2_concurrent_rooms(&engine).await;

    println!("\n[phase 3] contention on one room");
    phase3_contention(&engine).await;

    println!("\n[phase 4] advisory checks under write load");
    phase4_check_under_load(engine.clone()).await;

    let t = Instant::now();
    engine.compact_journal().await.expect("compact");
    println!("\n  compaction of {} reservations: {:.2}ms", engine.reservation_count(), t.elapsed().as_secs_f64() * 1000.0);

    let _ = std::fs::remove_dir_all(&dir);
    println!("\n=== benchmark complete ===");
}
