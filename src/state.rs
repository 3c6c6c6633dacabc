//! File-backed state that must survive restarts.
//!
//! - [`load_marker`] / [`save_marker`]: the last-known marker, one JSON object
//! - [`SentSet`]: fingerprints already delivered from result files, a JSON array
//!
//! Both files are written through a temporary sibling and renamed into place so
//! a crash never leaves a half-written file behind. A missing file is the
//! first-run base case; an unreadable marker degrades to "no marker".

use crate::models::LastKnownMarker;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed state file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StateError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        StateError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Write `contents` to `path` via a temporary file and rename.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StateError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StateError::io(parent, e))?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, contents)
        .await
        .map_err(|e| StateError::io(&tmp, e))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| StateError::io(path, e))?;
    Ok(())
}

/// Load the last-known marker. Missing or malformed files yield `None`.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn load_marker(path: &Path) -> Option<LastKnownMarker> {
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No marker file; treating as first run");
            return None;
        }
        Err(e) => {
            warn!(error = %e, "Could not read marker; treating whole feed as new");
            return None;
        }
    };
    match serde_json::from_str::<LastKnownMarker>(&raw) {
        Ok(marker) => Some(marker),
        Err(e) => {
            warn!(error = %e, "Malformed marker; treating whole feed as new");
            None
        }
    }
}

/// Overwrite the marker file.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn save_marker(path: &Path, marker: &LastKnownMarker) -> Result<(), StateError> {
    let json = serde_json::to_vec_pretty(marker).map_err(|e| StateError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    write_atomic(path, &json).await?;
    debug!(title = %marker.title, "Marker saved");
    Ok(())
}

/// Persisted set of delivered fingerprints. Grows monotonically.
#[derive(Debug)]
pub struct SentSet {
    path: PathBuf,
    fingerprints: BTreeSet<String>,
}

impl SentSet {
    /// Load the set from `path`; a missing file is an empty set.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn load(path: &Path) -> Result<Self, StateError> {
        let fingerprints = match fs::read_to_string(path).await {
            Ok(raw) if raw.trim().is_empty() => BTreeSet::new(),
            Ok(raw) => serde_json::from_str::<BTreeSet<String>>(&raw).map_err(|e| {
                StateError::Json {
                    path: path.to_path_buf(),
                    source: e,
                }
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => return Err(StateError::io(path, e)),
        };
        info!(count = fingerprints.len(), "Loaded sent-set");
        Ok(Self {
            path: path.to_path_buf(),
            fingerprints,
        })
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.fingerprints.contains(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    /// Add a fingerprint and persist immediately. Returns `false` (and writes
    /// nothing) when it was already present.
    pub async fn insert(&mut self, fingerprint: &str) -> Result<bool, StateError> {
        if !self.fingerprints.insert(fingerprint.to_string()) {
            return Ok(false);
        }
        if let Err(e) = self.persist().await {
            self.fingerprints.remove(fingerprint);
            return Err(e);
        }
        Ok(true)
    }

    async fn persist(&self) -> Result<(), StateError> {
        let json = serde_json::to_vec_pretty(&self.fingerprints).map_err(|e| StateError::Json {
            path: self.path.clone(),
            source: e,
        })?;
        write_atomic(&self.path, &json).await
    }
}
