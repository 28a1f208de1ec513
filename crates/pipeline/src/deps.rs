//! Dependency-resolution cache gate.
//!
//! `flutter pub get` is slow and only needs to run when `pubspec.yaml`
//! changed. The digest of the manifest is stored in a sidecar record after
//! every successful resolution; the next run compares against it.
//!
//! Decision table, first match wins:
//!
//! | lock file | record  | digest    | decision            |
//! |-----------|---------|-----------|---------------------|
//! | absent    | any     | any       | [`Decision::NoLockFile`]      |
//! | present   | absent  | any       | [`Decision::FirstRun`]        |
//! | present   | present | differs   | [`Decision::ManifestChanged`] |
//! | present   | present | equal     | [`Decision::UpToDate`]        |

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

/// Outcome of [`needs_resolution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The lock file is missing.
    NoLockFile,
    /// No fingerprint has been recorded yet.
    FirstRun,
    /// The manifest differs from the recorded fingerprint.
    ManifestChanged,
    /// Resolution requested explicitly, gate not consulted.
    Forced,
    /// Manifest unchanged since the last successful resolution.
    UpToDate,
}

impl Decision {
    /// Whether the resolve command has to run.
    pub fn needed(self) -> bool {
        !matches!(self, Self::UpToDate)
    }

    /// Short explanation shown in the resolve banner.
    pub fn reason(self) -> Option<&'static str> {
        match self {
            Self::NoLockFile => Some("no lock file"),
            Self::FirstRun => Some("first run"),
            Self::ManifestChanged => Some("manifest changed"),
            Self::Forced => Some("forced"),
            Self::UpToDate => None,
        }
    }
}

/// Fingerprint gate I/O failures.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// The dependency manifest does not exist.
    #[error("dependency manifest not found: {}", .0.display())]
    MissingManifest(PathBuf),
    /// The manifest could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The fingerprint record could not be written.
    #[error("failed to write fingerprint record {}: {source}", path.display())]
    Write {
        /// Record file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// Hex SHA-256 of the manifest contents, `None` if the manifest is absent.
///
/// # Errors
///
/// Returns [`GateError::Read`] if the manifest exists but cannot be read.
pub fn fingerprint(manifest: &Path) -> Result<Option<String>, GateError> {
    match fs::read(manifest) {
        Ok(bytes) => Ok(Some(format!("{:x}", Sha256::digest(&bytes)))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(GateError::Read {
            path: manifest.to_path_buf(),
            source,
        }),
    }
}

/// Decide whether dependency resolution has to run.
///
/// Never fails: an unreadable record counts as a first run and an unreadable
/// manifest as a change.
pub fn needs_resolution(manifest: &Path, lock: &Path, record: &Path) -> Decision {
    if !lock.exists() {
        return Decision::NoLockFile;
    }
    let saved = match fs::read_to_string(record) {
        Ok(saved) => saved.trim().to_string(),
        Err(_) => return Decision::FirstRun,
    };
    match fingerprint(manifest) {
        Ok(Some(current)) if current == saved => Decision::UpToDate,
        _ => Decision::ManifestChanged,
    }
}

/// Persist the current manifest digest as the last-resolved fingerprint.
///
/// Call only after resolution succeeded. The record is replaced atomically so
/// an interrupted write leaves the previous record (or none) in place.
///
/// # Errors
///
/// Returns [`GateError::MissingManifest`] when there is nothing to record,
/// and [`GateError::Write`] when the record cannot be replaced.
pub fn record_resolution(manifest: &Path, record: &Path) -> Result<(), GateError> {
    let digest =
        fingerprint(manifest)?.ok_or_else(|| GateError::MissingManifest(manifest.to_path_buf()))?;
    let dir = match record.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let write_err = |source| GateError::Write {
        path: record.to_path_buf(),
        source,
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(digest.as_bytes()).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(record).map_err(|e| write_err(e.error))?;
    tracing::debug!(record = %record.display(), %digest, "dependency fingerprint recorded");
    Ok(())
}
