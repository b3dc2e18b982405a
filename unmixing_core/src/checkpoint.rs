//! Versioned binary checkpoints for trained networks.
//!
//! A checkpoint is an envelope holding a schema version and the payload
//! produced by [`Checkpointable::to_snapshot`]. Files written under another
//! version are rejected before the payload is interpreted.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub enum CheckpointError {
    /// The checkpoint file at `path` could not be opened, created or flushed.
    Io { path: PathBuf, source: io::Error },
    /// bincode rejected the envelope or payload.
    Serialization(bincode::Error),
    /// Written by a network whose snapshot layout differs from this build's.
    VersionMismatch { expected: u32, found: u32 },
    /// Decoded, but the arrays do not describe a consistent network.
    InvalidFormat(String),
}

impl CheckpointError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointError::Io { path, source } => {
                write!(f, "cannot access checkpoint {}: {source}", path.display())
            }
            CheckpointError::Serialization(err) => write!(f, "corrupt checkpoint: {err}"),
            CheckpointError::VersionMismatch { expected, found } => write!(
                f,
                "checkpoint layout v{found} is not readable by this build (v{expected})"
            ),
            CheckpointError::InvalidFormat(msg) => write!(f, "inconsistent checkpoint: {msg}"),
        }
    }
}

impl std::error::Error for CheckpointError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CheckpointError::Io { source, .. } => Some(source),
            CheckpointError::Serialization(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<bincode::Error> for CheckpointError {
    fn from(err: bincode::Error) -> Self {
        CheckpointError::Serialization(err)
    }
}

/// On-disk layout: version first, so a mismatch is detected without trusting the payload.
#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    version: u32,
    payload: T,
}

#[derive(Deserialize)]
struct Header {
    version: u32,
}

/// Fixed-width little-endian integers; the header is decoded from the same
/// bytes as the envelope, so trailing payload bytes must be allowed.
fn encoding() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_little_endian()
}

/// Components that can be persisted and restored.
pub trait Checkpointable: Sized {
    /// Schema version written into every file.
    const VERSION: u32;

    /// Serializable, detached copy of the state.
    type Snapshot: Serialize + DeserializeOwned;

    fn to_snapshot(&self) -> Self::Snapshot;

    /// Rebuild from a decoded payload, rejecting inconsistent contents.
    fn from_snapshot(snapshot: Self::Snapshot) -> Result<Self, CheckpointError>;

    fn save_checkpoint<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(CheckpointError::io(parent))?;
            }
        }

        let envelope = Envelope {
            version: Self::VERSION,
            payload: self.to_snapshot(),
        };
        let file = File::create(path).map_err(CheckpointError::io(path))?;
        let mut writer = BufWriter::new(file);
        encoding().serialize_into(&mut writer, &envelope)?;
        writer.flush().map_err(CheckpointError::io(path))?;
        Ok(())
    }

    fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        let path = path.as_ref();
        let open = || File::open(path).map(BufReader::new).map_err(CheckpointError::io(path));

        let header: Header = encoding().deserialize_from(open()?)?;
        if header.version != Self::VERSION {
            return Err(CheckpointError::VersionMismatch {
                expected: Self::VERSION,
                found: header.version,
            });
        }

        let envelope: Envelope<Self::Snapshot> = encoding().deserialize_from(open()?)?;
        Self::from_snapshot(envelope.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Counter {
        value: u64,
    }

    impl Checkpointable for Counter {
        const VERSION: u32 = 7;
        type Snapshot = u64;

        fn to_snapshot(&self) -> u64 {
            self.value
        }

        fn from_snapshot(value: u64) -> Result<Self, CheckpointError> {
            if value == u64::MAX {
                return Err(CheckpointError::InvalidFormat("saturated counter".into()));
            }
            Ok(Self { value })
        }
    }

    struct FutureCounter;

    impl Checkpointable for FutureCounter {
        const VERSION: u32 = 8;
        type Snapshot = u64;

        fn to_snapshot(&self) -> u64 {
            0
        }

        fn from_snapshot(_: u64) -> Result<Self, CheckpointError> {
            Ok(FutureCounter)
        }
    }

    fn temp_path() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("unmixing_checkpoint_{}.bin", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_roundtrip() {
        let path = temp_path();
        Counter { value: 41 }.save_checkpoint(&path).expect("save");
        let restored = Counter::load_checkpoint(&path).expect("load");
        std::fs::remove_file(&path).ok();
        assert_eq!(restored, Counter { value: 41 });
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let path = temp_path();
        Counter { value: 1 }.save_checkpoint(&path).expect("save");
        let err = FutureCounter::load_checkpoint(&path)
            .err()
            .expect("version must be checked");
        std::fs::remove_file(&path).ok();
        assert!(matches!(
            err,
            CheckpointError::VersionMismatch {
                expected: 8,
                found: 7
            }
        ));
    }

    #[test]
    fn test_invalid_payload_is_reported() {
        let path = temp_path();
        Counter { value: u64::MAX }.save_checkpoint(&path).expect("save");
        let err = Counter::load_checkpoint(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, CheckpointError::InvalidFormat(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = Counter::load_checkpoint("/nonexistent/checkpoint.bin").unwrap_err();
        assert!(matches!(
            err,
            CheckpointError::Io { ref path, .. } if path.ends_with("checkpoint.bin")
        ));
        assert!(err.to_string().contains("/nonexistent/checkpoint.bin"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
