//! CLI entry point for storefront-tables: table export/import tool.

use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use storefront::config::{load_config, SqliteConfig, TablesConfig};
use storefront::serialization::{export_tables, import_tables, ExportOptions, ImportOptions};
use storefront::table::{open_table_store, TableStore};

#[derive(Parser)]
#[command(name = "storefront-tables", about = "Storefront table export/import tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export tables to JSON
    Export {
        #[arg(long, default_value = "storefront.example.yaml")]
        config: PathBuf,
        /// SQLite file to read instead of the configured backend.
        #[arg(long)]
        db: Option<String>,
        #[arg(long, default_value = "-")]
        output: String,
        /// Comma-separated table names; default is every table.
        #[arg(long)]
        tables: Option<String>,
    },
    /// Import tables from JSON
    Import {
        #[arg(long, default_value = "storefront.example.yaml")]
        config: PathBuf,
        /// SQLite file to write instead of the configured backend.
        #[arg(long)]
        db: Option<String>,
        #[arg(long, default_value = "-")]
        input: String,
        /// Empty each imported table first.
        #[arg(long, default_value_t = false)]
        replace: bool,
    },
}

fn open_store(config: &Path, db: Option<String>) -> anyhow::Result<Arc<dyn TableStore>> {
    let tables = match db {
        Some(path) => TablesConfig {
            backend: "sqlite".to_string(),
            sqlite: SqliteConfig { path },
            azure: None,
        },
        None => load_config(config)?.tables,
    };
    open_table_store(&tables)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let rc = match cli.command {
        Commands::Export {
            config,
            db,
            output,
            tables,
        } => run_export(config, db, output, tables).await,
        Commands::Import {
            config,
            db,
            input,
            replace,
        } => run_import(config, db, input, replace).await,
    };
    std::process::exit(rc);
}

async fn run_export(config: PathBuf, db: Option<String>, output: String, tables: Option<String>) -> i32 {
    let store = match open_store(&config, db) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error opening table store: {:#}", e);
            return 1;
        }
    };

    let table_list: Vec<String> = tables
        .map(|t| {
            t.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let opts = ExportOptions { tables: table_list };

    match export_tables(store.as_ref(), &opts).await {
        Ok(result) => {
            if output == "-" {
                println!("{}", result);
            } else {
                if let Err(e) = std::fs::write(&output, format!("{}\n", result)) {
                    eprintln!("Error writing output: {}", e);
                    return 1;
                }
                eprintln!("Exported to {}", output);
            }
            0
        }
        Err(e) => {
            eprintln!("Error exporting: {:#}", e);
            1
        }
    }
}

async fn run_import(config: PathBuf, db: Option<String>, input: String, replace: bool) -> i32 {
    let store = match open_store(&config, db) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error opening table store: {:#}", e);
            return 1;
        }
    };

    let json_str = if input == "-" {
        let mut buf = String::new();
        if let Err(e) = std::io::stdin().read_to_string(&mut buf) {
            eprintln!("Error reading stdin: {}", e);
            return 1;
        }
        buf
    } else {
        match std::fs::read_to_string(&input) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("Error reading input: {}", e);
                return 1;
            }
        }
    };

    let opts = ImportOptions { replace };

    match import_tables(store.as_ref(), &json_str, &opts).await {
        Ok(result) => {
            for (table, count) in &result.counts {
                let skip = result.skipped.get(table).unwrap_or(&0);
                let mut msg = format!("  {}: {} imported", table, count);
                if *skip > 0 {
                    msg.push_str(&format!(", {} skipped", skip));
                }
                eprintln!("{}", msg);
            }
            for w in &result.warnings {
                eprintln!("  WARNING: {}", w);
            }
            0
        }
        Err(e) => {
            eprintln!("Error importing: {:#}", e);
            1
        }
    }
}
