//! A [`LoadBackend`] that delivers segments into a directory tree.
//!
//! Each destination `dataset/table` becomes a directory. A segment is
//! written under a temporary name and hard-linked into place, so readers
//! never observe a partial file and a delivered file is never replaced. When the load options carry a schema, it is
//! written once per table as `_schema.json`.

use loadbatch_core::{BackendError, LoadBackend, LoadReceipt, LoadRequest};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File extension of delivered segments.
pub const SEGMENT_EXTENSION: &str = "ndjson.zst";

const MAX_DELIVERY_ATTEMPTS: u32 = 1024;

/// Delivers segments to `root/<dataset>/<table>/<segment>.ndjson.zst`.
#[derive(Debug, Clone)]
pub struct DirectoryBackend {
    root: PathBuf,
}

impl DirectoryBackend {
    /// Creates a backend delivering under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn table_dir(&self, request: &LoadRequest) -> Result<PathBuf, BackendError> {
        let key = &request.destination;
        for part in [&key.primary, &key.secondary] {
            if part.is_empty()
                || part == "."
                || part == ".."
                || part.contains(['/', '\\'])
            {
                return Err(BackendError::fatal(format!(
                    "invalid destination component {part:?}"
                )));
            }
        }
        Ok(self.root.join(&key.primary).join(&key.secondary))
    }

    fn deliver(&self, dir: &Path, request: &LoadRequest) -> io::Result<PathBuf> {
        if !dir.exists() {
            if !request.options.create_if_needed {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("destination {} does not exist", dir.display()),
                ));
            }
            fs::create_dir_all(dir)?;
        }

        if let Some(schema) = &request.options.schema {
            let path = dir.join("_schema.json");
            if !path.exists() {
                fs::write(&path, serde_json::to_vec_pretty(schema)?)?;
            }
        }

        let staging = dir.join(format!(".{}.tmp", request.segment));
        fs::write(&staging, &request.content)?;
        let delivered = publish(dir, &staging, request);
        fs::remove_file(&staging)?;
        delivered
    }
}

/// Links the staged file to its final name without ever replacing a file.
///
/// With `write_append` an existing delivery keeps its file and the new one
/// gets the next free `{segment}.{n}` name; without it an existing delivery
/// is an error.
fn publish(dir: &Path, staging: &Path, request: &LoadRequest) -> io::Result<PathBuf> {
    for attempt in 0..MAX_DELIVERY_ATTEMPTS {
        let target = if attempt == 0 {
            dir.join(format!("{}.{SEGMENT_EXTENSION}", request.segment))
        } else {
            dir.join(format!("{}.{attempt}.{SEGMENT_EXTENSION}", request.segment))
        };

        match fs::hard_link(staging, &target) {
            Ok(()) => return Ok(target),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if !request.options.write_append {
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("{} already delivered", target.display()),
                    ));
                }
            }
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free delivery name for {}", request.segment),
    ))
}

impl LoadBackend for DirectoryBackend {
    fn load(&self, request: &LoadRequest) -> Result<LoadReceipt, BackendError> {
        let dir = self.table_dir(request)?;
        let path = self.deliver(&dir, request).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::AlreadyExists => {
                BackendError::fatal(e.to_string())
            }
            _ => BackendError::retryable(e.to_string()),
        })?;

        debug!(path = %path.display(), size = request.size, "segment delivered");
        Ok(LoadReceipt {
            job_id: Some(path.display().to_string()),
        })
    }
}
