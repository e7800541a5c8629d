use std::path::PathBuf;

use itertools::Itertools;

use crate::{components::DatasetHandle, engines::BackendKind};

pub type Result<T> = std::result::Result<T, RasterError>;

/// Boxed engine error kept as the source of a translated [RasterError].
pub type EngineError = Box<dyn std::error::Error + Send + Sync>;

#[derive(thiserror::Error, Debug)]
pub enum RasterError {
    #[error("{backend} recognizes no raster container in the source")]
    UnsupportedFormat {
        backend: BackendKind,
        #[source]
        source: EngineError,
    },
    #[error("path does not resolve to readable content: {0}")]
    NotFound(PathBuf),
    #[error("{backend} opened the container but could not read its structure")]
    CorruptDataset {
        backend: BackendKind,
        #[source]
        source: EngineError,
    },
    #[error("band {index} is out of range, dataset has {band_count} band(s)")]
    BandIndexOutOfRange { index: usize, band_count: usize },
    #[error("{0} is closed or was not opened by this processor")]
    InvalidHandle(DatasetHandle),
    #[error("backend {requested} is not available (checked: {})", names(.checked))]
    BackendUnavailable {
        requested: String,
        checked: Vec<BackendKind>,
    },
    #[error("no raster backend is available (checked: {})", names(.checked))]
    NoBackendAvailable { checked: Vec<BackendKind> },
    #[error("unknown index formula {0:?}")]
    UnknownFormula(String),
    #[error("formula {formula} needs a band for role {role:?}")]
    MissingBandRole {
        formula: &'static str,
        role: &'static str,
    },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("band {0} has no valid pixels")]
    NoValidPixels(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

fn names(kinds: &[BackendKind]) -> String {
    kinds.iter().join(", ")
}

impl RasterError {
    pub(crate) fn unsupported(backend: BackendKind, source: impl Into<EngineError>) -> Self {
        RasterError::UnsupportedFormat {
            backend,
            source: source.into(),
        }
    }

    pub(crate) fn corrupt(backend: BackendKind, source: impl Into<EngineError>) -> Self {
        RasterError::CorruptDataset {
            backend,
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_lists_use_identifiers() {
        let err = RasterError::BackendUnavailable {
            requested: "gdal".into(),
            checked: vec![BackendKind::Gdal, BackendKind::GeoTiff],
        };
        assert_eq!(
            err.to_string(),
            "backend gdal is not available (checked: gdal, geotiff)"
        );
        let err = RasterError::NoBackendAvailable {
            checked: BackendKind::PRIORITY.to_vec(),
        };
        assert!(err.to_string().ends_with("(checked: gdal, geotiff, image)"));
    }
}
