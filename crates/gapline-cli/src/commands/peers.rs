//! Peer cache inspection.

use std::path::Path;

use anyhow::{Result, bail};
use gapline_storage::PeerStore;
use gapline_types::{PeerId, PeerKind, PeerRecord};

use super::open_session;
use crate::table::{print_with_count, table};

pub fn list(project: &Path) -> Result<()> {
    let stores = open_session(project)?;
    if stores.peers.is_empty()? {
        println!("Peer cache is empty.");
        return Ok(());
    }

    let mut rows = table(&["Peer", "Name", "Username", "Access hash"]);
    let mut count = 0;
    for record in stores.peers.scan()? {
        let record = record?;
        count += 1;
        rows.add_row(vec![
            record.id.to_string(),
            record.display_name.clone(),
            record
                .username
                .as_deref()
                .map_or_else(String::new, |username| format!("@{username}")),
            access_hash_marker(&record).to_string(),
        ]);
    }
    print_with_count(&rows, count, "peer");

    stores.close()?;
    Ok(())
}

pub fn get(project: &Path, kind: PeerKind, id: i64) -> Result<()> {
    let stores = open_session(project)?;
    let peer = PeerId::new(kind, id);
    let Some(record) = stores.peers.get(peer)? else {
        bail!("Peer {peer} is not cached");
    };
    print_record(&record);
    stores.close()?;
    Ok(())
}

pub fn find(project: &Path, username: &str) -> Result<()> {
    let stores = open_session(project)?;
    let Some(record) = stores.peers.find_username(username)? else {
        bail!("No cached peer with username @{}", username.trim_start_matches('@'));
    };
    print_record(&record);
    stores.close()?;
    Ok(())
}

fn print_record(record: &PeerRecord) {
    println!("Peer {}", record.id);
    println!("  Name:        {}", record.display_name);
    if let Some(username) = &record.username {
        println!("  Username:    @{username}");
    }
    println!("  Access hash: {}", access_hash_marker(record));
}

fn access_hash_marker(record: &PeerRecord) -> &'static str {
    if record.has_access_hash() {
        "present"
    } else {
        "missing"
    }
}
