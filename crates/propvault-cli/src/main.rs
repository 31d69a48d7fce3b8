//! propvault command line tool.
//!
//! Provides the `propvault` binary for inspecting and editing the properties
//! of resources in a repository directory. Writes commit immediately.
//!
//! Configuration starts from the `PROPVAULT_*` environment variables; the
//! `--root` and `--compression` flags override them.

use std::error::Error;
use std::fs::File;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use propvault_core::{Value, ValueType};
use propvault_storage::{
    CompressionFormat, PropertyStore, ResourcePath, StoreConfig,
};

/// Inspect and edit stored resource properties.
#[derive(Parser, Debug)]
#[command(name = "propvault", about = "Inspect and edit stored resource properties")]
struct Cli {
    /// Repository root (default: $PROPVAULT_ROOT or ./filerepository).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Compression for written documents: none, gzip, deflate.
    #[arg(long, global = true)]
    compression: Option<CompressionFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the decoded properties of a resource.
    Show { path: String },

    /// Print the stored document of a resource.
    Raw { path: String },

    /// Set a property from text, converted to the given type.
    Set {
        path: String,
        name: String,
        value: String,

        /// Target type name, e.g. int, double, date, [long.
        #[arg(short = 't', long = "type", default_value = "string")]
        type_name: String,
    },

    /// Store the contents of a file as a binary property.
    Attach {
        path: String,
        name: String,
        file: PathBuf,
    },

    /// Remove a property.
    Remove { path: String, name: String },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = execute(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Runs a command, then removes whatever temporary binaries it left behind,
/// whether or not it succeeded.
fn execute(cli: Cli) -> Result<(), Box<dyn Error>> {
    let result = run(cli);
    let cleanup = propvault_core::shutdown_cleanup();
    if !cleanup.still_pending.is_empty() {
        warn!(pending = cleanup.still_pending.len(), "temporary binaries left behind");
    }
    debug!(removed = cleanup.removed, temp_dir_removed = cleanup.temp_dir_removed, "cleanup done");
    result
}

fn config_for(cli: &Cli) -> StoreConfig {
    let mut config = StoreConfig::from_env();
    if let Some(root) = &cli.root {
        config.root = root.clone();
    }
    if let Some(compression) = cli.compression {
        config.compression = compression;
    }
    config
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = config_for(&cli);
    debug!(root = %config.root.display(), compression = %config.compression, "opening store");
    let store = Arc::new(PropertyStore::open(config)?);

    match cli.command {
        Commands::Show { path } => {
            let path = ResourcePath::parse(&path)?;
            let resource = store.require_resource(&path)?;
            let types = store.registry().types();
            for (name, value) in store.get(resource.path()) {
                println!("{} ({}) = {}", name, types.value_type_name(value.value_type()), value);
            }
        }
        Commands::Raw { path } => {
            let path = ResourcePath::parse(&path)?;
            match store.read_document(&path)? {
                Some(doc) => println!("{}", serde_json::to_string_pretty(&doc.to_json())?),
                None => return Err(format!("no stored properties for '{}'", path).into()),
            }
        }
        Commands::Set {
            path,
            name,
            value,
            type_name,
        } => {
            let path = ResourcePath::parse(&path)?;
            let target = parse_type(&store, &type_name)?;
            let converted = store
                .registry()
                .convert(&Value::from(value.as_str()), target)
                .ok_or_else(|| format!("cannot convert '{}' to {}", value, type_name))?;
            store.put(&path, &name, converted)?;
            store.commit()?;
        }
        Commands::Attach { path, name, file } => {
            let path = ResourcePath::parse(&path)?;
            let reader = File::open(&file)
                .map_err(|e| format!("failed to open '{}': {}", file.display(), e))?;
            let handle = store.create_binary(reader)?;
            let staged = store
                .put(&path, &name, Value::Binary(handle.clone()))
                .and_then(|_| store.commit());
            handle.dispose();
            staged?;
        }
        Commands::Remove { path, name } => {
            let path = ResourcePath::parse(&path)?;
            if store.remove(&path, &name)?.is_none() {
                return Err(format!("'{}' has no property '{}'", path, name).into());
            }
            store.commit()?;
        }
    }
    Ok(())
}

/// Resolve a type name (`int`, `[long`, a registered name) against the store's
/// registry.
fn parse_type(store: &PropertyStore, name: &str) -> Result<ValueType, String> {
    store
        .registry()
        .types()
        .resolve_name(name)
        .ok_or_else(|| format!("unknown type '{}'", name))
}
