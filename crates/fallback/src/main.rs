//! `protrack`: operate the offline reconciliation layer from a terminal.
//!
//! Every command prints its result as JSON on stdout; logs go to stderr.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use protrack_core::{
    Collection, ComplianceStatus, NewComplianceRecord, NewProduct, NewQualityTest, NewShipment,
    NewUser, OperationId, RecordId, SensorKind, ShipmentStatus, TestResult, UserRole,
};
use protrack_fallback::commands::{self, AppState};
use protrack_fallback::config::Config;
use protrack_observability::LogFormat;

#[derive(Parser, Debug)]
#[command(name = "protrack")]
#[command(about = "ProTrack offline queue and reconciliation", long_about = None)]
struct Cli {
    /// Log output format (`json` or `pretty`)
    #[arg(long, env = "PROTRACK_LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the backend and print the layer's status
    Status,
    /// Check the backend only
    Check,
    /// Mark the layer online and replay everything queued
    ForceOnline,
    /// Replay queued operations if the backend is reachable
    Sync,
    /// List queued operations in replay order
    Pending,
    /// List operations parked after the backend rejected them
    DeadLetters,
    /// Move a dead-lettered operation back to the end of the queue
    Requeue { id: OperationId },
    /// Drop a dead-lettered operation for good
    Discard { id: OperationId },
    /// Write demo fixtures into the local mirror
    Seed,
    /// List a collection (`products`, `shipments`, `iot_data`, ...)
    List { collection: Collection },
    CreateProduct {
        #[arg(long)]
        name: String,
        #[arg(long)]
        batch_number: String,
        #[arg(long)]
        manufacturer: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "")]
        category: String,
        #[arg(long, default_value = "")]
        origin: String,
        #[arg(long)]
        rfid_tag: Option<String>,
    },
    CreateShipment {
        #[arg(long)]
        product_id: RecordId,
        #[arg(long)]
        origin: String,
        #[arg(long)]
        destination: String,
        #[arg(long)]
        carrier: String,
        #[arg(long)]
        tracking_number: String,
        /// RFC 3339 timestamp
        #[arg(long)]
        estimated_arrival: Option<DateTime<Utc>>,
    },
    RecordIot {
        #[arg(long)]
        product_id: RecordId,
        #[arg(long)]
        device_id: String,
        #[arg(long)]
        sensor: SensorKind,
        #[arg(long)]
        value: f64,
        #[arg(long)]
        unit: String,
    },
    RecordQualityTest {
        #[arg(long)]
        product_id: RecordId,
        #[arg(long)]
        test_type: String,
        /// `pass`, `fail` or `pending`
        #[arg(long)]
        result: TestResult,
        #[arg(long)]
        inspector: String,
        #[arg(long)]
        notes: Option<String>,
    },
    RecordCompliance {
        #[arg(long)]
        product_id: RecordId,
        #[arg(long)]
        standard: String,
        /// `compliant`, `non_compliant` or `pending_review`
        #[arg(long)]
        status: ComplianceStatus,
        #[arg(long)]
        certificate_number: Option<String>,
        #[arg(long)]
        expires_at: Option<DateTime<Utc>>,
    },
    CreateUser {
        #[arg(long)]
        email: String,
        #[arg(long)]
        display_name: String,
        #[arg(long)]
        role: UserRole,
    },
    /// Move a product to the next lifecycle stage
    AdvanceProduct { id: RecordId },
    /// Set a shipment's status
    AdvanceShipment {
        id: RecordId,
        #[arg(long)]
        status: ShipmentStatus,
    },
    /// Run the background sync worker until Ctrl-C
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    protrack_observability::init(cli.log_format);

    let config = Config::from_env()?;
    let app = AppState::from_config(config).await?;

    let output = run(&app, cli.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run(app: &AppState, command: Command) -> anyhow::Result<serde_json::Value> {
    match command {
        Command::Status => commands::status(app).await,
        Command::Check => commands::check(app).await,
        Command::ForceOnline => commands::force_online(app).await,
        Command::Sync => commands::sync(app).await,
        Command::Pending => commands::pending(app).await,
        Command::DeadLetters => commands::dead_letters(app).await,
        Command::Requeue { id } => commands::requeue(app, id).await,
        Command::Discard { id } => commands::discard(app, id).await,
        Command::Seed => commands::seed(app).await,
        Command::List { collection } => commands::list(app, collection).await,
        Command::CreateProduct {
            name,
            batch_number,
            manufacturer,
            description,
            category,
            origin,
            rfid_tag,
        } => {
            let new = NewProduct {
                name,
                description,
                category,
                batch_number,
                manufacturer,
                origin,
                rfid_tag,
            };
            commands::create_product(app, new).await
        }
        Command::CreateShipment {
            product_id,
            origin,
            destination,
            carrier,
            tracking_number,
            estimated_arrival,
        } => {
            let new = NewShipment {
                product_id,
                origin,
                destination,
                carrier,
                tracking_number,
                estimated_arrival,
            };
            commands::create_shipment(app, new).await
        }
        Command::RecordIot {
            product_id,
            device_id,
            sensor,
            value,
            unit,
        } => commands::record_iot(app, product_id, device_id, sensor, value, unit).await,
        Command::RecordQualityTest {
            product_id,
            test_type,
            result,
            inspector,
            notes,
        } => {
            let new = NewQualityTest {
                product_id,
                test_type,
                result,
                inspector,
                notes,
            };
            commands::record_quality_test(app, new).await
        }
        Command::RecordCompliance {
            product_id,
            standard,
            status,
            certificate_number,
            expires_at,
        } => {
            let new = NewComplianceRecord {
                product_id,
                standard,
                status,
                certificate_number,
                expires_at,
            };
            commands::record_compliance(app, new).await
        }
        Command::CreateUser {
            email,
            display_name,
            role,
        } => {
            let new = NewUser {
                email,
                display_name,
                role,
            };
            commands::create_user(app, new).await
        }
        Command::AdvanceProduct { id } => commands::advance_product(app, id).await,
        Command::AdvanceShipment { id, status } => {
            commands::advance_shipment(app, id, status).await
        }
        Command::Watch => commands::watch(app).await,
    }
}
