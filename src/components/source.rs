use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::errors::{RasterError, Result};

/// Where a dataset is read from.
#[derive(Debug, Clone)]
pub enum Source {
    Path(PathBuf),
    /// In-memory file content, e.g. an upload. `name` is only descriptive.
    Bytes { name: String, data: Arc<[u8]> },
}

impl Source {
    pub fn path(path: impl AsRef<Path>) -> Self {
        Source::Path(path.as_ref().to_path_buf())
    }

    pub fn bytes(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Source::Bytes {
            name: name.into(),
            data: data.into(),
        }
    }

    pub fn description(&self) -> String {
        match self {
            Source::Path(path) => path.display().to_string(),
            Source::Bytes { name, .. } => name.clone(),
        }
    }

    /// Whole content of the source.
    pub fn read_all(&self) -> Result<Arc<[u8]>> {
        match self {
            Source::Path(path) => std::fs::read(path)
                .map(Arc::from)
                .map_err(|err| not_found_or_io(path, err)),
            Source::Bytes { data, .. } => Ok(Arc::clone(data)),
        }
    }
}

impl From<&Path> for Source {
    fn from(value: &Path) -> Self {
        Source::Path(value.to_path_buf())
    }
}

impl From<PathBuf> for Source {
    fn from(value: PathBuf) -> Self {
        Source::Path(value)
    }
}

impl From<&str> for Source {
    fn from(value: &str) -> Self {
        Source::Path(PathBuf::from(value))
    }
}

impl From<Vec<u8>> for Source {
    fn from(value: Vec<u8>) -> Self {
        Source::bytes("memory", value)
    }
}

pub(crate) fn not_found_or_io(path: &Path, err: std::io::Error) -> RasterError {
    match err.kind() {
        ErrorKind::NotFound => RasterError::NotFound(path.to_path_buf()),
        _ => RasterError::Io(err),
    }
}
