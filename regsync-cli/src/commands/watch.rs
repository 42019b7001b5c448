//! Watch command
//!
//! Runs a consumer against the register center and prints every batch it
//! receives until interrupted.

use super::load_config;
use crate::error::CliResult;
use async_trait::async_trait;
use colored::Colorize;
use regsync_register::{Publisher, RecordBatch, ServerRegisterRepository, Subscriber};
use std::path::Path;
use tracing::info;

/// Prints batches to stdout, one line per record
pub struct PrintSubscriber {
    json: bool,
}

impl PrintSubscriber {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    fn lines(&self, batch: &RecordBatch) -> Vec<String> {
        match batch {
            RecordBatch::Metadata(records) => records
                .iter()
                .map(|record| {
                    if self.json {
                        serde_json::to_string(record).unwrap_or_default()
                    } else {
                        format!(
                            "{} {} {}{}",
                            "metadata".cyan(),
                            record.rpc_type,
                            record.context_path,
                            match record.node_name() {
                                Ok(name) => format!(" {}", name),
                                Err(_) => String::new(),
                            }
                        )
                    }
                })
                .collect(),
            RecordBatch::Uri(records) => records
                .iter()
                .map(|record| {
                    if self.json {
                        serde_json::to_string(record).unwrap_or_default()
                    } else if record.is_withdrawal() {
                        format!("{} {} {}", "uri".yellow(), record.context_path, "withdrawn".red())
                    } else {
                        format!(
                            "{} {} {}",
                            "uri".yellow(),
                            record.context_path,
                            record.node_name().unwrap_or_default()
                        )
                    }
                })
                .collect(),
        }
    }
}

#[async_trait]
impl Subscriber for PrintSubscriber {
    async fn on_batch(&self, batch: RecordBatch) {
        for line in self.lines(&batch) {
            println!("{}", line);
        }
    }
}

pub async fn run(config: Option<&Path>, json: bool) -> CliResult<()> {
    let config = load_config(config)?;

    let publisher = Publisher::new();
    publisher.subscribe(PrintSubscriber::new(json));
    let repository = ServerRegisterRepository::init(publisher, &config).await?;

    info!(
        "Watching {} register center at {}",
        config.register_type()?,
        config.root_path()
    );
    println!("  {} Press {} to stop", "→".dimmed(), "Ctrl+C".yellow());

    tokio::signal::ctrl_c().await?;
    repository.close().await?;
    Ok(())
}
