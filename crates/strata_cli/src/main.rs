//! Strata CLI
//!
//! Command-line access to a strata store.
//!
//! # Commands
//!
//! - `get` / `set` / `remove` - read and write JSON values by key
//! - `keys` / `length` - list and count entries
//! - `clear` - delete every entry in the store
//! - `drop` - delete the store (or the whole database)
//! - `drivers` - report driver support in this environment

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use strata_core::{
    DropTarget, Registries, Store, StoreConfig, Value, FLAT_DRIVER, SQL_DRIVER, STRUCTURED_DRIVER,
};
use tracing_subscriber::EnvFilter;

/// Strata command-line key-value tools.
#[derive(Parser)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Root directory for backend files
    #[arg(global = true, long, default_value = "strata-data")]
    root: PathBuf,

    /// Database name
    #[arg(global = true, long, default_value = "strata")]
    db: String,

    /// Store name within the database
    #[arg(global = true, long, default_value = "keyvaluepairs")]
    store: String,

    /// Driver preference, highest first (repeatable)
    #[arg(global = true, long)]
    driver: Vec<String>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the JSON value stored under a key
    Get {
        /// Entry key
        key: String,
    },

    /// Store a JSON value under a key
    Set {
        /// Entry key
        key: String,
        /// The value, as JSON text
        value: String,
    },

    /// Delete a key
    Remove {
        /// Entry key
        key: String,
    },

    /// List every key in the store
    Keys,

    /// Print the number of entries in the store
    Length,

    /// Delete every entry in the store
    Clear,

    /// Delete the store, or the whole database
    Drop {
        /// Delete the entire database, not just this store
        #[arg(long)]
        database: bool,
    },

    /// Report which drivers are supported in this environment
    Drivers,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let registries = Registries::new();
    let mut config = StoreConfig::new()
        .name(&cli.db)
        .store_name(&cli.store)
        .root_dir(&cli.root);
    if !cli.driver.is_empty() {
        config = config.driver(cli.driver.clone());
    }
    let store = Store::new(Arc::clone(&registries), config);

    match cli.command {
        Commands::Get { key } => {
            match store.get(&key).await? {
                Some(Value::Json(json)) => println!("{}", serde_json::to_string_pretty(&json)?),
                Some(other) => println!("<{} value, {}>", other.kind_name(), describe(&other)),
                None => println!("null"),
            }
        }
        Commands::Set { key, value } => {
            let json: serde_json::Value = serde_json::from_str(&value)?;
            store.set(&key, Value::Json(json)).await?;
        }
        Commands::Remove { key } => {
            store.remove(&key).await?;
        }
        Commands::Keys => {
            for key in store.keys().await? {
                println!("{key}");
            }
        }
        Commands::Length => {
            println!("{}", store.length().await?);
        }
        Commands::Clear => {
            store.clear().await?;
        }
        Commands::Drop { database } => {
            let config = store.config();
            let target = DropTarget {
                name: config.name.clone(),
                store_name: (!database).then(|| config.store_name.clone()),
            };
            store.drop_instance(Some(target)).await?;
        }
        Commands::Drivers => {
            let config = store.config();
            for id in [STRUCTURED_DRIVER, SQL_DRIVER, FLAT_DRIVER] {
                let supported = registries.drivers().is_supported(id, &config);
                println!(
                    "{id}: {}",
                    if supported { "supported" } else { "unsupported" }
                );
            }
        }
    }

    Ok(())
}

fn describe(value: &Value) -> String {
    match value {
        Value::Buffer(b) | Value::Uint8(b) | Value::Uint8Clamped(b) => format!("{} bytes", b.len()),
        Value::Blob(blob) => format!("{} bytes of {}", blob.bytes.len(), blob.content_type),
        Value::Int8(v) => format!("{} elements", v.len()),
        Value::Int16(v) => format!("{} elements", v.len()),
        Value::Uint16(v) => format!("{} elements", v.len()),
        Value::Int32(v) => format!("{} elements", v.len()),
        Value::Uint32(v) => format!("{} elements", v.len()),
        Value::Float32(v) => format!("{} elements", v.len()),
        Value::Float64(v) => format!("{} elements", v.len()),
        Value::Json(_) => String::new(),
    }
}
