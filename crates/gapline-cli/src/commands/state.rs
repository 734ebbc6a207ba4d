//! Stored sequence state inspection.

use std::path::Path;

use anyhow::Result;
use chrono::DateTime;
use gapline_storage::SequenceStateStore;
use gapline_types::StreamId;

use super::open_session;
use crate::table::{print_with_count, table};

/// Lists the stored counters of every stream.
pub fn list(project: &Path) -> Result<()> {
    let stores = open_session(project)?;

    let mut streams = stores.state.streams()?;
    if streams.is_empty() {
        println!("No stored sequence state.");
        return Ok(());
    }
    streams.sort();

    let mut rows = table(&["Stream", "pts", "qts", "seq", "Last update"]);
    let count = streams.len();
    for stream in streams {
        let Some(state) = stores.state.get(stream)? else {
            continue;
        };
        let (qts, seq) = match stream {
            StreamId::Common => (state.qts.to_string(), state.seq.to_string()),
            StreamId::Channel(_) => ("-".to_string(), "-".to_string()),
        };
        rows.add_row(vec![
            stream.to_string(),
            state.pts.to_string(),
            qts,
            seq,
            format_date(state.date),
        ]);
    }
    print_with_count(&rows, count, "stream");

    stores.close()?;
    Ok(())
}

/// Formats a unix timestamp, or `-` for "never".
pub fn format_date(date: i64) -> String {
    if date <= 0 {
        return "-".to_string();
    }
    DateTime::from_timestamp(date, 0).map_or_else(|| date.to_string(), |at| at.to_rfc3339())
}
