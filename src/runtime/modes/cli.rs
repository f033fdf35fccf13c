//! CLI mode
//!
//! One-shot commands that run without starting the HTTP server.

use anyhow::{Context, Result, bail};
use colored::Colorize;

use crate::config::StaticConfig;
use crate::runtime::lifetime;

/// Print or write a sample configuration
pub fn run_generate_config(output: Option<&str>) -> Result<()> {
    match output {
        Some(path) => {
            StaticConfig::default()
                .save_to_file(path)
                .with_context(|| format!("Failed to write sample config to {}", path))?;
            println!("{} {}", "Sample configuration written to".green(), path);
        }
        None => println!("{}", StaticConfig::generate_sample_config()),
    }
    Ok(())
}

/// Print a stored session (or its debug snapshot) as pretty JSON
pub async fn run_inspect(session_id: &str, debug: bool) -> Result<()> {
    let config = crate::config::get_config();
    let (_, engine) = lifetime::startup::prepare_engine(&config).await?;

    let record = if debug {
        engine.load_debug_snapshot(session_id).await?
    } else {
        engine.load_session(session_id).await?
    };

    let Some(record) = record else {
        let what = if debug { "debug snapshot" } else { "session" };
        bail!("No {} found for session {}", what, session_id);
    };

    let pretty = serde_json::to_string_pretty(&record.to_value())?;
    println!("{}", pretty);
    Ok(())
}
