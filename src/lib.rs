//! Open raster datasets through interchangeable engines (GDAL, GeoTIFF,
//! plain images) and derive statistics, previews, spectral indices and
//! normalized bands as `ndarray` arrays.
//!
//! ```no_run
//! use terrascan::{ProcessorManager, RasterProcessor, Source};
//!
//! let manager = ProcessorManager::new();
//! let mut processor = manager.get_default()?;
//! let dataset = processor.open_scoped(Source::path("scene.tif"))?;
//! let stats = dataset.statistics(1)?;
//! println!("{} .. {}", stats.min, stats.max);
//! # Ok::<(), terrascan::RasterError>(())
//! ```

pub mod components;
pub mod config;
pub mod engines;
mod errors;
pub mod manager;
pub mod processor;

pub use components::{
    BandInfo, BandMapping, BandStatistics, DataType, DatasetHandle, GeoTransform, Histogram,
    ImageInfo, Normalization, PixelArray, Sampling, Source, SpectralIndex,
};
pub use config::ManagerConfig;
pub use engines::{BackendKind, Processor};
pub use errors::{EngineError, RasterError, Result};
pub use manager::{BackendStatus, ProcessorManager, Selection};
pub use processor::{Adapter, Engine, RasterProcessor, ScopedDataset};
