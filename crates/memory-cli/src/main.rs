mod cli;
mod tracing_setup;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use memory_core::health;
use memory_core::types::MemoryCategory;
use memory_core::{MemoryRuntime, MemoryRuntimeConfig};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_setup::init();

    let cli = Cli::parse();
    let workspace = PathBuf::from(&cli.workspace);
    let config = load_config(cli.config.as_deref())?;
    let runtime = MemoryRuntime::init(&workspace, config).await?;

    match cli.command {
        Commands::Store {
            key,
            content,
            category,
            session,
        } => {
            runtime
                .store(&key, &content, MemoryCategory::parse(&category), session.as_deref())
                .await?;
            println!("stored {key}");
        }
        Commands::Search {
            query,
            limit,
            session,
            format,
        } => {
            let results = runtime.search(&query, limit, session.as_deref()).await?;
            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                for candidate in &results {
                    println!("{:>6.3}  {:<24}  {}", candidate.final_score, candidate.key, candidate.snippet);
                }
            }
        }
        Commands::Hygiene => {
            let report = runtime.run_hygiene()?;
            println!(
                "archived {} purged {} conversation_trimmed {}",
                report.archived, report.purged, report.conversation_trimmed
            );
        }
        Commands::DrainOutbox => {
            let processed = runtime.drain_outbox().await?;
            println!("drained {processed} outbox entries");
        }
        Commands::Readiness { format } => {
            let readiness = health::readiness();
            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&readiness)?);
            } else {
                println!("status: {}", readiness.status);
                for check in &readiness.checks {
                    let mark = if check.healthy { "ok" } else { "error" };
                    match &check.message {
                        Some(message) => println!("  {} [{mark}] {message}", check.name),
                        None => println!("  {} [{mark}]", check.name),
                    }
                }
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&str>) -> Result<MemoryRuntimeConfig> {
    match path {
        Some(path) => MemoryRuntimeConfig::load(Path::new(path)),
        None => Ok(MemoryRuntimeConfig::default()),
    }
}
