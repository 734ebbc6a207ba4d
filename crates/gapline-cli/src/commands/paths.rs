//! Shows where configuration and session files live.

use std::path::Path;

use anyhow::Result;
use gapline_config::Paths;
use gapline_storage::{PEERS_FILENAME, SESSION_FILENAME, STATE_FILENAME};

use super::load_config;

pub fn run(project: &Path) -> Result<()> {
    let config = load_config(project)?;
    let paths = Paths::new();

    println!("Configuration:");
    match paths.user_config_file() {
        Ok(file) => println!("  User:    {}", file.display()),
        Err(e) => println!("  User:    unavailable ({e})"),
    }
    println!("  Project: {}", Paths::project_config_file(project).display());
    println!("  Local:   {}", Paths::local_config_file(project).display());
    println!();

    println!("Storage:");
    println!("  Data directory: {}", config.storage.data_dir.display());
    if config.client.phone.trim().is_empty() {
        println!("  Session:        (no phone configured)");
        return Ok(());
    }

    let session = config.session_dir();
    println!("  Session:        {}", session.display());
    for name in [STATE_FILENAME, PEERS_FILENAME, SESSION_FILENAME] {
        let file = session.join(name);
        let marker = if file.exists() { "present" } else { "missing" };
        println!("    {name:<20} {marker}");
    }
    Ok(())
}
