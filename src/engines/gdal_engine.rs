//! Implementations for gdal

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        OnceLock,
    },
};

use gdal::{
    raster::{GdalDataType, ResampleAlg},
    vsi, Dataset as GdalDataset, DriverManager, Metadata as GdalMetadata,
    MetadataEntry as GdalMetadataEntry,
};
use log::{debug, warn};
use ndarray::Array2;

use crate::{
    components::{BandInfo, DataType, GeoTransform, ImageInfo, Metadata, Source},
    engines::BackendKind,
    errors::{RasterError, Result},
    processor::{cached_probe, Engine},
};

static NEXT_MEM_FILE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug)]
pub struct GdalEngine;

/// In-memory file registered with GDAL, unlinked on drop.
#[derive(Debug)]
struct MemFile(PathBuf);

impl Drop for MemFile {
    fn drop(&mut self) {
        if let Err(err) = vsi::unlink_mem_file(&self.0) {
            warn!("could not release {}: {err}", self.0.display());
        }
    }
}

pub struct GdalRaster {
    // Declared first so the dataset is closed before its backing memory file goes.
    dataset: GdalDataset,
    _mem_file: Option<MemFile>,
}

fn probe() -> bool {
    DriverManager::register_all();
    DriverManager::count() > 0
}

/// Strings GDAL resolves itself, which are not plain filesystem paths.
///
/// `/vsi*` paths and `DRIVER:...` connection strings, whose driver segment is
/// upper case (`NETCDF:`, `SENTINEL2_L2A:`). Single letter drive prefixes stay paths.
fn is_virtual(path: &Path) -> bool {
    let text = path.to_string_lossy();
    if text.starts_with("/vsi") {
        return true;
    }
    text.split_once(':').is_some_and(|(driver, _)| {
        driver.len() > 1
            && driver.starts_with(|c: char| c.is_ascii_uppercase())
            && driver
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
    })
}

fn data_type(band_type: GdalDataType) -> Option<DataType> {
    match band_type {
        GdalDataType::UInt8 => Some(DataType::Byte),
        GdalDataType::Int8 => Some(DataType::Int8),
        GdalDataType::UInt16 => Some(DataType::UInt16),
        GdalDataType::Int16 => Some(DataType::Int16),
        GdalDataType::UInt32 => Some(DataType::UInt32),
        GdalDataType::Int32 => Some(DataType::Int32),
        GdalDataType::Float32 => Some(DataType::Float32),
        GdalDataType::Float64 => Some(DataType::Float64),
        _ => None,
    }
}

fn crs(dataset: &GdalDataset) -> Option<String> {
    if dataset.projection().is_empty() {
        return None;
    }
    let spatial_ref = dataset.spatial_ref().ok()?;
    match (spatial_ref.auth_name(), spatial_ref.auth_code()) {
        (Ok(name), Ok(code)) => Some(format!("{name}:{code}")),
        _ => spatial_ref.to_wkt().ok(),
    }
}

/// Default domain entries only.
fn filter_metadata_gdal(object: &impl GdalMetadata) -> Metadata {
    GdalMetadata::metadata(object)
        .filter_map(|GdalMetadataEntry { domain, key, value }| {
            domain.is_empty().then_some((key, value))
        })
        .collect()
}

fn non_empty(text: String) -> Option<String> {
    (!text.is_empty()).then_some(text)
}

fn to_array((cols, rows): (usize, usize), data: Vec<f64>) -> Result<Array2<f64>> {
    Ok(Array2::from_shape_vec((rows, cols), data)?)
}

impl Engine for GdalEngine {
    type Dataset = GdalRaster;

    const KIND: BackendKind = BackendKind::Gdal;

    fn is_available() -> bool {
        static AVAILABLE: OnceLock<bool> = OnceLock::new();
        cached_probe(&AVAILABLE, Self::KIND, probe)
    }

    fn open(source: &Source) -> Result<Self::Dataset> {
        let (path, mem_file) = match source {
            Source::Path(path) => {
                if !is_virtual(path) && !path.exists() {
                    return Err(RasterError::NotFound(path.clone()));
                }
                (path.clone(), None)
            }
            Source::Bytes { data, .. } => {
                let path = PathBuf::from(format!(
                    "/vsimem/terrascan/{}-{}",
                    std::process::id(),
                    NEXT_MEM_FILE.fetch_add(1, Ordering::Relaxed)
                ));
                vsi::create_mem_file(&path, data.to_vec())
                    .map_err(|err| RasterError::corrupt(Self::KIND, err))?;
                (path.clone(), Some(MemFile(path)))
            }
        };
        let dataset =
            GdalDataset::open(&path).map_err(|err| RasterError::unsupported(Self::KIND, err))?;
        if dataset.raster_count() == 0 {
            return Err(RasterError::unsupported(
                Self::KIND,
                format!("{} holds no raster bands", source.description()),
            ));
        }
        debug!(
            "{} opened with driver {}",
            source.description(),
            dataset.driver().short_name()
        );
        Ok(GdalRaster {
            dataset,
            _mem_file: mem_file,
        })
    }

    fn info(raster: &Self::Dataset, source: &Source) -> Result<ImageInfo> {
        let dataset = &raster.dataset;
        let (width, height) = dataset.raster_size();
        let bands = (1..=dataset.raster_count())
            .map(|index| {
                let band = dataset
                    .rasterband(index)
                    .map_err(|err| RasterError::corrupt(Self::KIND, err))?;
                let band_type = band.band_type();
                let data_type = data_type(band_type).ok_or_else(|| {
                    RasterError::unsupported(Self::KIND, format!("band type {band_type:?}"))
                })?;
                Ok(BandInfo {
                    no_data: band.no_data_value(),
                    description: band.description().ok().and_then(non_empty),
                    color_interpretation: Some(band.color_interpretation().name()),
                    scale: band.scale(),
                    offset: band.offset(),
                    unit: non_empty(band.unit()),
                    metadata: filter_metadata_gdal(&band),
                    ..BandInfo::new(index, data_type)
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let first = bands
            .first()
            .cloned()
            .ok_or_else(|| RasterError::corrupt(Self::KIND, "dataset lost its bands"))?;

        Ok(ImageInfo {
            width,
            height,
            band_count: bands.len(),
            driver: dataset.driver().short_name(),
            data_type: first.data_type,
            crs: crs(dataset),
            geotransform: dataset.geo_transform().ok().map(GeoTransform),
            no_data: first.no_data,
            description: dataset
                .description()
                .ok()
                .and_then(non_empty)
                .unwrap_or_else(|| source.description()),
            metadata: filter_metadata_gdal(dataset),
            bands,
        })
    }

    fn read_band(raster: &Self::Dataset, info: &ImageInfo, band: usize) -> Result<Array2<f64>> {
        let size = (info.width, info.height);
        Self::read_resampled(raster, info, band, size)
    }

    fn read_resampled(
        raster: &Self::Dataset,
        info: &ImageInfo,
        band: usize,
        size: (usize, usize),
    ) -> Result<Array2<f64>> {
        let window = (info.width, info.height);
        let resample = (size != window).then_some(ResampleAlg::Average);
        let buf = raster
            .dataset
            .rasterband(band)
            .and_then(|band| band.read_as::<f64>((0, 0), window, size, resample))
            .map_err(|err| RasterError::corrupt(Self::KIND, err))?;
        let buf_shape = buf.shape();
        to_array(buf_shape, buf.data().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{Adapter, RasterProcessor};

    #[test]
    fn virtual_paths_skip_existence_check() {
        assert!(is_virtual(Path::new("/vsizip/archive.zip/scene.tif")));
        assert!(is_virtual(Path::new(
            "SENTINEL2_L2A:S2A_MSIL2A.SAFE/MTD_MSIL2A.xml:10m:EPSG_32633"
        )));
        assert!(is_virtual(Path::new("NETCDF:sst.nc:analysed_sst")));
        assert!(!is_virtual(Path::new("/data/scene.tif")));
        assert!(!is_virtual(Path::new("scene:v2.tif")));
        assert!(!is_virtual(Path::new("C:\\data\\scene.tif")));
    }

    #[test]
    fn missing_relative_path_with_colon_is_not_found() {
        let missing = PathBuf::from("terrascan-missing:v2.tif");
        assert!(matches!(
            GdalEngine::open(&Source::path(&missing)),
            Err(RasterError::NotFound(path)) if path == missing
        ));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.tif");
        assert!(matches!(
            GdalEngine::open(&Source::path(&missing)),
            Err(RasterError::NotFound(path)) if path == missing
        ));
    }

    #[test]
    fn reads_in_memory_geotiff() {
        if !GdalEngine::is_available() {
            return;
        }
        let mut file = std::io::Cursor::new(Vec::new());
        tiff::encoder::TiffEncoder::new(&mut file)
            .unwrap()
            .write_image::<tiff::encoder::colortype::Gray8>(3, 2, &[1, 2, 3, 4, 5, 6])
            .unwrap();
        let mut processor = Adapter::<GdalEngine>::new();
        let handle = processor
            .open(Source::bytes("memory.tif", file.into_inner()))
            .unwrap();
        let info = processor.get_info(&handle).unwrap();
        assert_eq!((info.width, info.height, info.band_count), (3, 2, 1));
        assert_eq!(info.driver, "GTiff");
        assert_eq!(info.data_type, DataType::Byte);
        assert_eq!(info.bands[0].color_interpretation.as_deref(), Some("Gray"));

        let band = processor.read_band(&handle, 1).unwrap().into_band().unwrap();
        assert_eq!(band, ndarray::array![[1., 2., 3.], [4., 5., 6.]]);
        processor.close(&handle);
    }
}
