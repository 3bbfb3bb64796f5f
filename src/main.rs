use std::process::ExitCode;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use ulid::Ulid;

use vigil::cache::MonthKey;
use vigil::config::Config;
use vigil::engine::{Engine, EngineError};
use vigil::lifecycle::ReservationStatus;
use vigil::maintenance;
use vigil::model::{CatalogRefs, CustomerSnapshot, OperatingHours, PetSnapshot, Room};
use vigil::observability;
use vigil::scheduler::{AvailabilityRequest, AvailableTimesRequest, NewReservation, ReservationPatch, Scheduler};

/// Memorial room reservations. Prints JSON on stdout, logs on stderr.
#[derive(Debug, Parser)]
#[command(name = "vigil", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage rooms
    #[command(subcommand)]
    Room(RoomCommand),
    /// Slot map of a room for one day
    Slots {
        #[arg(long)]
        room: Ulid,
        #[arg(long)]
        date: NaiveDate,
        /// Start of the booking being considered, HH:MM
        #[arg(long, value_parser = parse_time)]
        selected: Option<NaiveTime>,
    },
    /// Check whether a window is free
    Check {
        #[arg(long)]
        room: Ulid,
        /// YYYY-MM-DD HH:MM
        #[arg(long, value_parser = parse_datetime)]
        at: NaiveDateTime,
        #[arg(long)]
        minutes: Option<u32>,
        /// Reservation being edited
        #[arg(long)]
        exclude: Option<Ulid>,
    },
    /// Book a room
    Book(BookArgs),
    /// Change an existing reservation
    Edit {
        id: Ulid,
        #[arg(long)]
        room: Option<Ulid>,
        #[arg(long, value_parser = parse_datetime)]
        at: Option<NaiveDateTime>,
        #[arg(long)]
        status: Option<ReservationStatus>,
        #[arg(long)]
        memo: Option<String>,
        #[arg(long)]
        staff: Option<String>,
    },
    /// Move one reservation to a new status
    Status { id: Ulid, status: ReservationStatus },
    /// Move several reservations to a new status, all or none
    BulkStatus {
        status: ReservationStatus,
        #[arg(required = true)]
        ids: Vec<Ulid>,
    },
    /// Delete a reservation
    Delete { id: Ulid },
    /// Every reservation in a month (YYYY-MM)
    Month { month: MonthKey },
    /// Rewrite the journal down to current state
    Compact,
}

#[derive(Debug, Subcommand)]
enum RoomCommand {
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        capacity: Option<u32>,
        #[arg(long, value_parser = parse_time, default_value = "09:00")]
        open: NaiveTime,
        #[arg(long, value_parser = parse_time, default_value = "18:00")]
        close: NaiveTime,
        #[arg(long)]
        inactive: bool,
    },
    List,
    Update {
        id: Ulid,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        capacity: Option<u32>,
        #[arg(long, value_parser = parse_time)]
        open: Option<NaiveTime>,
        #[arg(long, value_parser = parse_time)]
        close: Option<NaiveTime>,
        #[arg(long)]
        active: Option<bool>,
    },
    Remove {
        id: Ulid,
    },
}

#[derive(Debug, Args)]
struct BookArgs {
    #[arg(long)]
    room: Ulid,
    #[arg(long, value_parser = parse_datetime)]
    at: NaiveDateTime,
    #[arg(long)]
    status: Option<ReservationStatus>,
    #[arg(long)]
    customer: String,
    #[arg(long)]
    phone: String,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    address: Option<String>,
    #[arg(long)]
    pet: String,
    #[arg(long)]
    species: Option<String>,
    #[arg(long)]
    breed: Option<String>,
    #[arg(long)]
    weight: Option<f64>,
    #[arg(long)]
    death_date: Option<NaiveDate>,
    #[arg(long)]
    death_reason: Option<String>,
    #[arg(long)]
    package: Option<String>,
    #[arg(long)]
    premium_line: Option<String>,
    /// Additional option id; repeatable
    #[arg(long = "option")]
    options: Vec<String>,
    #[arg(long)]
    staff: Option<String>,
    #[arg(long)]
    memo: Option<String>,
}

fn parse_time(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|e| format!("expected HH:MM: {e}"))
}

fn parse_datetime(s: &str) -> Result<NaiveDateTime, String> {
    ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .ok_or_else(|| format!("expected YYYY-MM-DD HH:MM, got {s:?}"))
}

fn to_json<T: Serialize>(value: T) -> Result<Value, EngineError> {
    serde_json::to_value(value).map_err(|e| EngineError::Persistence(e.to_string()))
}

fn error_json(e: &EngineError) -> Value {
    let mut body = json!({ "code": e.code(), "message": e.to_string() });
    if let EngineError::BulkRejected(failures) = e {
        body["failures"] = json!(failures);
    }
    body
}

async fn run_room(engine: &Engine, cmd: RoomCommand) -> Result<Value, EngineError> {
    match cmd {
        RoomCommand::Add {
            name,
            capacity,
            open,
            close,
            inactive,
        } => {
            let room = Room {
                id: Ulid::new(),
                name,
                capacity,
                hours: OperatingHours::new(open, close),
                active: !inactive,
            };
            to_json(engine.create_room(room).await?)
        }
        RoomCommand::List => to_json(engine.list_rooms().await),
        RoomCommand::Update {
            id,
            name,
            capacity,
            open,
            close,
            active,
        } => {
            let mut room = engine.get_room(id).await?;
            if let Some(name) = name {
                room.name = name;
            }
            if capacity.is_some() {
                room.capacity = capacity;
            }
            room.hours = OperatingHours::new(open.unwrap_or(room.hours.open), close.unwrap_or(room.hours.close));
            if let Some(active) = active {
                room.active = active;
            }
            to_json(engine.update_room(room).await?)
        }
        RoomCommand::Remove { id } => {
            engine.delete_room(id).await?;
            Ok(json!({ "deleted": id }))
        }
    }
}

async fn run(scheduler: &Scheduler<Engine>, command: Command) -> Result<Value, EngineError> {
    let engine = scheduler.store().as_ref();
    match command {
        Command::Room(cmd) => run_room(engine, cmd).await,
        Command::Slots { room, date, selected } => to_json(
            scheduler
                .get_available_times(AvailableTimesRequest {
                    date: Some(date),
                    room_id: Some(room),
                    selected_time: selected,
                })
                .await?,
        ),
        Command::Check {
            room,
            at,
            minutes,
            exclude,
        } => to_json(
            scheduler
                .check_availability(AvailabilityRequest {
                    room_id: Some(room),
                    scheduled_at: Some(at),
                    duration_minutes: minutes,
                    exclude_reservation_id: exclude,
                })
                .await?,
        ),
        Command::Book(args) => {
            let input = NewReservation {
                room_id: Some(args.room),
                scheduled_at: Some(args.at),
                status: args.status,
                customer: CustomerSnapshot {
                    name: args.customer,
                    phone: args.phone,
                    email: args.email,
                    address: args.address,
                },
                pet: PetSnapshot {
                    name: args.pet,
                    species: args.species,
                    breed: args.breed,
                    weight_kg: args.weight,
                    death_date: args.death_date,
                    death_reason: args.death_reason,
                },
                catalog: CatalogRefs {
                    package_id: args.package,
                    premium_line_id: args.premium_line,
                    option_ids: args.options,
                    staff_id: args.staff,
                },
                memo: args.memo,
            };
            to_json(scheduler.create_reservation(input).await?)
        }
        Command::Edit {
            id,
            room,
            at,
            status,
            memo,
            staff,
        } => {
            let patch = ReservationPatch {
                room_id: room,
                scheduled_at: at,
                status,
                staff_id: staff,
                memo,
                ..Default::default()
            };
            to_json(scheduler.update_reservation(id, patch).await?)
        }
        Command::Status { id, status } => to_json(scheduler.update_status(id, status).await?),
        Command::BulkStatus { status, ids } => to_json(scheduler.bulk_update_status(&ids, status).await?),
        Command::Delete { id } => {
            scheduler.delete_reservation(id).await?;
            Ok(json!({ "deleted": id }))
        }
        Command::Month { month } => {
            let reservations = scheduler.month_reservations(month).await?;
            Ok(json!({ "month": month.to_string(), "reservations": reservations }))
        }
        Command::Compact => {
            engine.compact_journal().await?;
            Ok(json!({ "compacted": true }))
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(2);
        }
    };
    observability::init_logging(&config.log_filter);
    if let Err(e) = observability::init_metrics(config.metrics_port) {
        warn!(error = %e, "metrics exporter not installed");
    }

    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        eprintln!("cannot create data dir {}: {e}", config.data_dir.display());
        return ExitCode::FAILURE;
    }
    let engine = match Engine::new(config.journal_path()) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            eprintln!("cannot open journal {}: {e}", config.journal_path().display());
            return ExitCode::FAILURE;
        }
    };
    info!(data_dir = %config.data_dir.display(), slot_minutes = config.slot_minutes, "vigil ready");
    let scheduler = Scheduler::new(engine.clone(), &config);

    let result = run(&scheduler, cli.command).await;
    if let Err(e) = maintenance::compact_if_needed(&engine, config.compact_threshold).await {
        warn!(error = %e, "journal compaction failed");
    }

    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()));
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}", error_json(&e));
            ExitCode::FAILURE
        }
    }
}
