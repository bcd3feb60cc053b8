//! JSON export of index contents and cache statistics.
//!
//! Intended for debugging tools and regression fixtures: the output is
//! deterministic (ordered keys, sorted node sets), so two exports of the same
//! scene compare byte-for-byte.
//!
//! ```text
//! PropertyIndex → IndexSnapshot → serde_json → writer / String
//! ```

use std::io::Write;

use crate::index::{IndexSnapshot, PropertyIndex};
use crate::stats::StatsSnapshot;
use crate::Result;

/// Write the index as pretty-printed JSON.
pub fn export_index_json(index: &PropertyIndex, writer: &mut dyn Write) -> Result<()> {
    let snapshot = index.snapshot();
    serde_json::to_writer_pretty(&mut *writer, &snapshot)?;
    writeln!(writer)?;
    Ok(())
}

pub fn index_to_json(index: &PropertyIndex) -> Result<String> {
    Ok(serde_json::to_string_pretty(&index.snapshot())?)
}

/// Parse an export back into a snapshot, e.g. to diff against a live index.
pub fn index_from_json(json: &str) -> Result<IndexSnapshot> {
    Ok(serde_json::from_str(json)?)
}

pub fn stats_to_json(stats: &StatsSnapshot) -> Result<String> {
    Ok(serde_json::to_string_pretty(stats)?)
}
