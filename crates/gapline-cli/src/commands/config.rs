//! Configuration display.

use std::path::Path;

use anyhow::Result;

use super::load_config;
use crate::Format;

/// Shows the effective configuration after all sources are merged.
pub fn show(project: &Path, format: Format) -> Result<()> {
    let config = load_config(project)?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&config)?),
        Format::Toml => println!("{}", config.to_toml()?),
        Format::Text => {
            println!("gapline Configuration");
            println!("=====================\n");

            println!("Client:");
            println!("  App id: {}", config.client.app_id);
            let hash = if config.client.app_hash.is_empty() {
                "(unset)"
            } else {
                "(set)"
            };
            println!("  App hash: {hash}");
            println!("  Phone: {}", config.client.phone);
            println!();

            println!("Storage:");
            println!("  Data directory: {}", config.storage.data_dir.display());
            println!();

            println!("Rate limit:");
            println!("  Interval: {}ms", config.rate_limit.interval_ms);
            println!("  Burst: {}", config.rate_limit.burst);
            println!();

            println!("Recovery:");
            println!("  Difference limit: {}", config.recovery.difference_limit);
            println!("  Max buffered: {}", config.recovery.max_buffered);
            println!("  Max rounds: {}", config.recovery.max_rounds);

            if let Err(e) = config.validate() {
                println!();
                println!("Warning: {e}");
            }
        }
    }

    Ok(())
}
