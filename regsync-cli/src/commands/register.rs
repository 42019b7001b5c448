//! Register command
//!
//! Persists one metadata record, as a producer would at startup.

use super::load_config;
use crate::error::{CliError, CliResult};
use regsync_register::{ClientRegisterRepository, MetadataRecord};
use std::fs;
use std::path::Path;
use tracing::info;

pub struct RegisterArgs<'a> {
    pub config: Option<&'a Path>,
    pub record: Option<&'a str>,
    pub record_file: Option<&'a Path>,
    pub hold: bool,
}

/// Parse the record given inline or in a file
pub fn parse_record(record: Option<&str>, record_file: Option<&Path>) -> CliResult<MetadataRecord> {
    let raw = match (record, record_file) {
        (Some(inline), None) => inline.to_string(),
        (None, Some(path)) => fs::read_to_string(path)?,
        _ => {
            return Err(CliError::InvalidArgument(
                "pass exactly one of --record or --record-file".to_string(),
            ));
        }
    };
    Ok(serde_json::from_str(&raw)?)
}

pub async fn run(args: RegisterArgs<'_>) -> CliResult<()> {
    let record = parse_record(args.record, args.record_file)?;
    let config = load_config(args.config)?;

    let repository = ClientRegisterRepository::new(&config).await?;
    repository.persist_interface(&record).await?;
    println!("Registered {} {}", record.rpc_type, record.node_name()?);

    if args.hold {
        // endpoints on tree backends live only as long as this connection
        info!("Holding registration until Ctrl+C");
        tokio::signal::ctrl_c().await?;
    }

    repository.close().await?;
    Ok(())
}
