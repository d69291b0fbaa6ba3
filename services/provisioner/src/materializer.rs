//! Idempotent creation of volume backing directories.
//!
//! Materialization is additive-only: an existing node at the target path
//! is accepted as-is, whatever its type or permissions.

use std::fs::DirBuilder;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Permission mode for directories created by the materializer.
pub const DIR_MODE: u32 = 0o755;

/// Filesystem failures while materializing a path.
#[derive(Debug, Error)]
pub enum FilesystemError {
    /// Checking whether the path exists failed for a reason other than absence.
    #[error("failed to stat {}: {source}", path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Creating the directory (or a missing parent) failed.
    #[error("failed to create directory {}: {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FilesystemError {
    /// The path the operation was attempted on.
    pub fn path(&self) -> &Path {
        match self {
            Self::Stat { path, .. } | Self::Create { path, .. } => path,
        }
    }
}

/// Result of a successful materialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Materialization {
    /// The directory (and any missing parents) was created.
    Created(PathBuf),

    /// Something already existed at the path; nothing was touched.
    AlreadyPresent(PathBuf),
}

impl Materialization {
    /// The materialized path.
    pub fn path(&self) -> &Path {
        match self {
            Self::Created(path) | Self::AlreadyPresent(path) => path,
        }
    }
}

/// Ensures a directory exists under a root.
pub trait Materializer {
    /// Ensure `relative`, joined under `root`, exists.
    fn ensure(&self, root: &Path, relative: &str) -> Result<Materialization, FilesystemError>;
}

/// Materializer backed by the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirMaterializer;

impl DirMaterializer {
    /// Create a new materializer.
    pub fn new() -> Self {
        Self
    }
}

impl Materializer for DirMaterializer {
    fn ensure(&self, root: &Path, relative: &str) -> Result<Materialization, FilesystemError> {
        let path = join_under_root(root, relative);

        match std::fs::metadata(&path) {
            Ok(_) => return Ok(Materialization::AlreadyPresent(path)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(FilesystemError::Stat { path, source }),
        }

        match DirBuilder::new().recursive(true).mode(DIR_MODE).create(&path) {
            Ok(()) => Ok(Materialization::Created(path)),
            Err(source) => Err(FilesystemError::Create { path, source }),
        }
    }
}

/// Join `relative` under `root` so the result never leaves `root`.
///
/// The relative path is normalized lexically as if it were absolute: a
/// leading `/` is ignored, `.` is dropped and `..` stops at the root.
pub fn join_under_root(root: &Path, relative: &str) -> PathBuf {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();

    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::ParentDir => {
                parts.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }

    let mut path = root.to_path_buf();
    path.extend(parts);
    path
}
