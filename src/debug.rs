//! Debug sessions.
//!
//! A debug session is a named directory into which the phases dump
//! labelled snapshots of intermediate tables as JSON. Labels are stable
//! across runs (`align_step1_sorted`, `topdown_step4_foreign_sum`, …) so
//! two sessions can be diffed file by file for post-mortems.
//!
//! Snapshot failures are logged and swallowed: debugging must never change
//! the outcome of an execution.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::ObliJoinError;
use crate::table::ObliviousTable;
use crate::tuple::Tuple;

#[derive(Serialize)]
struct Snapshot<'a> {
    session: &'a str,
    label: &'a str,
    written_at: String,
    table: &'a str,
    rows: usize,
    tuples: &'a [Tuple],
}

/// An open snapshot directory.
pub struct DebugSession {
    name: String,
    dir: PathBuf,
    seq: u32,
}

impl DebugSession {
    /// Create `<base>/<name>/` (cleared if it already exists).
    pub fn open(base: &Path, name: &str) -> Result<DebugSession, ObliJoinError> {
        let dir = base.join(name);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;
        Ok(DebugSession {
            name: name.to_string(),
            dir,
            seq: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write one labelled table snapshot.
    pub fn dump(&mut self, table: &ObliviousTable, label: &str) {
        self.seq += 1;
        let path = self.dir.join(format!("{:03}_{label}.json", self.seq));
        let snapshot = Snapshot {
            session: &self.name,
            label,
            written_at: chrono::Utc::now().to_rfc3339(),
            table: table.name(),
            rows: table.len(),
            tuples: table.tuples(),
        };
        let write = || -> Result<(), ObliJoinError> {
            let json = serde_json::to_string_pretty(&snapshot).map_err(|e| {
                ObliJoinError::Parse {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                }
            })?;
            fs::write(&path, json)?;
            Ok(())
        };
        if let Err(e) = write() {
            tracing::warn!(label, error = %e, "debug snapshot failed");
        }
    }
}

/// Dump into an optional session; no-op when debugging is off.
pub(crate) fn dump_opt(session: &mut Option<DebugSession>, table: &ObliviousTable, label: &str) {
    if let Some(s) = session.as_mut() {
        s.dump(table, label);
    }
}
