//! # Queue Report
//!
//! Prints the state of an offline queue database.
//!
//! ## Usage
//! ```bash
//! cargo run -p stockzip-store --bin queue-report -- --db ./offline.db
//!
//! # Include every failed operation with its last error
//! cargo run -p stockzip-store --bin queue-report -- --db ./offline.db --failed
//!
//! # What the scanner would find for a code (id, barcode or SKU)
//! cargo run -p stockzip-store --bin queue-report -- --lookup 0123456789
//!
//! # One operation, and the scan sessions on the device
//! cargo run -p stockzip-store --bin queue-report -- --op <OPERATION_ID> --sessions
//!
//! # More logging
//! RUST_LOG=stockzip_store=debug cargo run -p stockzip-store --bin queue-report
//! ```

use std::env;

use stockzip_core::OperationStatus;
use stockzip_store::migrations::migration_status;
use stockzip_store::{Database, DbConfig, LAST_CACHE_SYNC, LAST_SUCCESSFUL_SYNC, LAST_SYNC_ERROR};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args: Vec<String> = env::args().collect();

    let mut db_path = String::from("./offline.db");
    let mut show_failed = false;
    let mut show_sessions = false;
    let mut lookup: Option<String> = None;
    let mut operation_id: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--failed" | "-f" => show_failed = true,
            "--sessions" | "-s" => show_sessions = true,
            "--lookup" | "-l" => {
                if i + 1 < args.len() {
                    lookup = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--op" | "-o" => {
                if i + 1 < args.len() {
                    operation_id = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("StockZip Offline Queue Report");
                println!();
                println!("Usage: queue-report [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./offline.db)");
                println!("  -f, --failed       List failed operations");
                println!("  -l, --lookup <KEY> Find a cached entity by id, barcode or SKU");
                println!("  -o, --op <ID>      Show one queued operation");
                println!("  -s, --sessions     List scan sessions");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            other => eprintln!("Ignoring unknown argument: {}", other),
        }
        i += 1;
    }

    let db = Database::new(DbConfig::new(&db_path).max_connections(1)).await?;
    if !db.health_check().await {
        return Err(format!("database {} is not readable", db_path).into());
    }
    let operations = db.pending_operations();
    let metadata = db.sync_metadata();

    let (total, applied) = migration_status(db.pool()).await?;
    println!("Database: {} (schema {}/{})", db_path, applied, total);
    println!();

    for status in [
        OperationStatus::Pending,
        OperationStatus::Syncing,
        OperationStatus::Completed,
        OperationStatus::Failed,
    ] {
        let count = operations.count_by_status(status).await?;
        println!("  {:<10} {}", status.as_str(), count);
    }
    println!("  {:<10} {}", "cached", db.cached_entities().count().await?);
    println!();

    let describe = |value: Option<String>| value.unwrap_or_else(|| "never".to_string());
    println!(
        "Last successful sync: {}",
        describe(metadata.get(LAST_SUCCESSFUL_SYNC).await?)
    );
    println!(
        "Last cache refresh:   {}",
        describe(metadata.get(LAST_CACHE_SYNC).await?)
    );
    if let Some(error) = metadata.get(LAST_SYNC_ERROR).await? {
        println!("Last error:           {}", error);
    }

    if show_failed {
        let failed = operations.list_by_status(OperationStatus::Failed).await?;
        println!();
        println!("Failed operations ({}):", failed.len());
        for op in failed {
            println!(
                "  {} {} {}/{} after {} attempts: {}",
                op.timestamp.to_rfc3339(),
                op.kind(),
                op.entity_type,
                op.entity_id,
                op.retry_count,
                op.last_error.as_deref().unwrap_or("-")
            );
        }
    }

    if let Some(id) = operation_id {
        println!();
        match operations.get(&id).await? {
            Some(op) => {
                println!("Operation {}:", op.id);
                println!("  kind:        {}", op.kind());
                println!("  entity:      {}/{}", op.entity_type, op.entity_id);
                println!("  status:      {}", op.status);
                println!("  enqueued:    {}", op.timestamp.to_rfc3339());
                println!("  retries:     {}/{}", op.retry_count, op.max_retries);
                println!("  last error:  {}", op.last_error.as_deref().unwrap_or("-"));
                println!("  payload:     {}", serde_json::to_string(&op.payload)?);
            }
            None => println!("Operation {} not found", id),
        }
    }

    if let Some(key) = lookup {
        let entities = db.cached_entities();
        let found = match entities.get(&key).await? {
            Some(entity) => Some(entity),
            None => entities.find_by_secondary_key(&key).await?,
        };
        println!();
        match found {
            Some(entity) => println!(
                "{} -> {} {} {}",
                key,
                entity.entity_type,
                entity.id,
                serde_json::to_string(&entity.fields)?
            ),
            None => println!("{} -> not cached", key),
        }
    }

    if show_sessions {
        let sessions = db.scan_sessions().list_all().await?;
        println!();
        println!("Scan sessions ({}):", sessions.len());
        for session in sessions {
            println!(
                "  {} {:<20} {:>4} scans {:>3} unresolved  {}",
                session.created_at.to_rfc3339(),
                session.name.as_deref().unwrap_or("(unnamed)"),
                session.entries.len(),
                session.unresolved().count(),
                if session.is_active() { "active" } else { "completed" }
            );
        }
    }

    db.close().await;
    Ok(())
}
