use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::training::EpochMetrics;

fn append_json_line<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> io::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    serde_json::to_writer(&mut file, value)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
    file.write_all(b"\n")
}

#[derive(Debug, Serialize)]
pub struct EpochLogEntry<'a> {
    #[serde(flatten)]
    pub metrics: &'a EpochMetrics,
    pub global_step: u64,
    pub timestamp_ms: u128,
}

/// Appends one JSON line describing a finished epoch.
pub fn log_epoch<P: AsRef<Path>>(
    path: P,
    metrics: &EpochMetrics,
    global_step: u64,
) -> io::Result<()> {
    let entry = EpochLogEntry {
        metrics,
        global_step,
        timestamp_ms: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis(),
    };
    append_json_line(path, &entry)
}
