use std::{fmt::Display, str::FromStr};

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::{
    components::{
        BandMapping, BandStatistics, DatasetHandle, Histogram, ImageInfo, Normalization,
        PixelArray, Sampling, Source,
    },
    errors::{RasterError, Result},
    processor::{Adapter, Engine, RasterProcessor},
};

#[cfg(feature = "gdal")]
pub mod gdal_engine;
pub mod geotiff_engine;
pub mod image_engine;

#[cfg(feature = "gdal")]
pub use gdal_engine::GdalEngine;
pub use geotiff_engine::GeoTiffEngine;
pub use image_engine::ImageEngine;

#[cfg(feature = "gdal")]
pub type GdalProcessor = Adapter<GdalEngine>;
pub type GeoTiffProcessor = Adapter<GeoTiffEngine>;
pub type ImageProcessor = Adapter<ImageEngine>;

/// Identifier of a raster backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Gdal,
    GeoTiff,
    Image,
}

impl BackendKind {
    /// Default selection order, most capable first.
    pub const PRIORITY: [BackendKind; 3] = [BackendKind::Gdal, BackendKind::GeoTiff, BackendKind::Image];

    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Gdal => "gdal",
            BackendKind::GeoTiff => "geotiff",
            BackendKind::Image => "image",
        }
    }

    /// Whether support for this backend was built into the crate.
    pub fn is_compiled(&self) -> bool {
        match self {
            BackendKind::Gdal => cfg!(feature = "gdal"),
            BackendKind::GeoTiff | BackendKind::Image => true,
        }
    }

    /// Capability probe, run once per process and cached.
    pub fn probe(&self) -> bool {
        match self {
            #[cfg(feature = "gdal")]
            BackendKind::Gdal => GdalEngine::is_available(),
            #[cfg(not(feature = "gdal"))]
            BackendKind::Gdal => false,
            BackendKind::GeoTiff => GeoTiffEngine::is_available(),
            BackendKind::Image => ImageEngine::is_available(),
        }
    }
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = RasterError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_lowercase();
        BackendKind::PRIORITY
            .into_iter()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| RasterError::BackendUnavailable {
                requested: s.to_string(),
                checked: BackendKind::PRIORITY.to_vec(),
            })
    }
}

/// Processor for any compiled backend.
#[derive(Debug)]
pub enum Processor {
    #[cfg(feature = "gdal")]
    Gdal(GdalProcessor),
    GeoTiff(GeoTiffProcessor),
    Image(ImageProcessor),
}

macro_rules! dispatch {
    ($self:expr, $processor:ident => $call:expr) => {
        match $self {
            #[cfg(feature = "gdal")]
            Processor::Gdal($processor) => $call,
            Processor::GeoTiff($processor) => $call,
            Processor::Image($processor) => $call,
        }
    };
}

impl Processor {
    /// Fresh processor for `kind`, `None` when the backend is not compiled in.
    pub fn new(kind: BackendKind) -> Option<Self> {
        match kind {
            #[cfg(feature = "gdal")]
            BackendKind::Gdal => Some(Processor::Gdal(GdalProcessor::new())),
            #[cfg(not(feature = "gdal"))]
            BackendKind::Gdal => None,
            BackendKind::GeoTiff => Some(Processor::GeoTiff(GeoTiffProcessor::new())),
            BackendKind::Image => Some(Processor::Image(ImageProcessor::new())),
        }
    }

    pub fn open_count(&self) -> usize {
        dispatch!(self, processor => processor.open_count())
    }
}

impl RasterProcessor for Processor {
    fn kind(&self) -> BackendKind {
        dispatch!(self, processor => processor.kind())
    }

    fn is_available(&self) -> bool {
        dispatch!(self, processor => processor.is_available())
    }

    fn open(&mut self, source: Source) -> Result<DatasetHandle> {
        dispatch!(self, processor => processor.open(source))
    }

    fn close(&mut self, handle: &DatasetHandle) {
        dispatch!(self, processor => processor.close(handle))
    }

    fn get_info(&self, handle: &DatasetHandle) -> Result<ImageInfo> {
        dispatch!(self, processor => processor.get_info(handle))
    }

    fn read_band(&self, handle: &DatasetHandle, band_index: usize) -> Result<PixelArray> {
        dispatch!(self, processor => processor.read_band(handle, band_index))
    }

    fn read_bands(&self, handle: &DatasetHandle) -> Result<PixelArray> {
        dispatch!(self, processor => processor.read_bands(handle))
    }

    fn get_statistics_sampled(
        &self,
        handle: &DatasetHandle,
        band_index: usize,
        sampling: Sampling,
    ) -> Result<BandStatistics> {
        dispatch!(self, processor => processor.get_statistics_sampled(handle, band_index, sampling))
    }

    fn get_all_statistics(
        &self,
        handle: &DatasetHandle,
        sampling: Sampling,
    ) -> Result<Vec<BandStatistics>> {
        dispatch!(self, processor => processor.get_all_statistics(handle, sampling))
    }

    fn get_histogram(
        &self,
        handle: &DatasetHandle,
        band_index: usize,
        bins: usize,
        sampling: Sampling,
    ) -> Result<Histogram> {
        dispatch!(self, processor => processor.get_histogram(handle, band_index, bins, sampling))
    }

    fn band_correlation(
        &self,
        handle: &DatasetHandle,
        sampling: Sampling,
    ) -> Result<Array2<f64>> {
        dispatch!(self, processor => processor.band_correlation(handle, sampling))
    }

    fn get_preview(&self, handle: &DatasetHandle, max_dimension: usize) -> Result<PixelArray> {
        dispatch!(self, processor => processor.get_preview(handle, max_dimension))
    }

    fn calculate_index(
        &self,
        handle: &DatasetHandle,
        formula_name: &str,
        band_mapping: &BandMapping,
    ) -> Result<PixelArray> {
        dispatch!(self, processor => processor.calculate_index(handle, formula_name, band_mapping))
    }

    fn normalize_band(
        &self,
        array: &PixelArray,
        normalization: &Normalization,
    ) -> Result<PixelArray> {
        dispatch!(self, processor => processor.normalize_band(array, normalization))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("gdal", BackendKind::Gdal)]
    #[case("GeoTIFF", BackendKind::GeoTiff)]
    #[case(" image ", BackendKind::Image)]
    fn parses_identifiers(#[case] name: &str, #[case] kind: BackendKind) {
        assert_eq!(name.parse::<BackendKind>().unwrap(), kind);
        assert_eq!(kind.to_string().parse::<BackendKind>().unwrap(), kind);
    }

    #[test]
    fn unknown_identifier() {
        assert!(matches!(
            "rasterio".parse::<BackendKind>(),
            Err(RasterError::BackendUnavailable { requested, .. }) if requested == "rasterio"
        ));
    }

    #[test]
    fn processors_exist_for_compiled_backends() {
        for kind in BackendKind::PRIORITY {
            match Processor::new(kind) {
                Some(processor) => {
                    assert_eq!(processor.kind(), kind);
                    assert_eq!(processor.name(), kind.name());
                    assert_eq!(processor.open_count(), 0);
                }
                None => assert!(!kind.is_compiled()),
            }
        }
    }

    #[test]
    fn pure_rust_backends_are_available() {
        assert!(BackendKind::GeoTiff.probe());
        assert!(BackendKind::Image.probe());
        if !BackendKind::Gdal.is_compiled() {
            assert!(!BackendKind::Gdal.probe());
        }
    }

    #[test]
    fn serde_uses_identifiers() {
        assert_eq!(
            serde_json::to_string(&BackendKind::GeoTiff).unwrap(),
            "\"geotiff\""
        );
    }
}
