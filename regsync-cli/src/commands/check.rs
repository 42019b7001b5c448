//! Config check command
//!
//! Loads a register center configuration and prints what it resolves to.

use super::load_config;
use crate::error::CliResult;
use colored::Colorize;
use std::path::Path;

pub fn execute(config: Option<&Path>) -> CliResult<()> {
    let config = load_config(config)?;

    println!("Register center configuration");
    println!("=============================");
    println!("  register type:      {}", config.register_type()?);
    println!(
        "  server lists:       {}",
        if config.server_lists.is_empty() {
            "-".dimmed().to_string()
        } else {
            config.server_lists.clone()
        }
    );
    println!("  root path:          {}", config.root_path());
    println!("  session timeout:    {:?}", config.session_timeout()?);
    println!("  connection timeout: {:?}", config.connection_timeout()?);
    println!(
        "  evict removed:      {}",
        config.evict_removed_context_paths()?
    );

    let mut props: Vec<_> = config.props.iter().collect();
    props.sort();
    if !props.is_empty() {
        println!();
        println!("Properties:");
        for (key, value) in props {
            println!("  {} = {}", key, value);
        }
    }

    println!();
    println!("{} Configuration is valid", "✓".green());
    Ok(())
}
