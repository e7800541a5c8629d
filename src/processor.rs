use log::{debug, info};
use ndarray::{stack, Array2, ArrayView2, Axis};
use rayon::prelude::*;
use std::{fmt::Debug, sync::OnceLock};

use crate::{
    components::{
        indexes::normalized_difference,
        preview::{downsample_area, preview_size, stretch_to_byte},
        statistics::{band_statistics, correlation_matrix, histogram},
        BandMapping, BandStatistics, DatasetHandle, DatasetTable, Histogram, ImageInfo,
        Normalization, PixelArray, Sampling, Source, SpectralIndex,
    },
    engines::BackendKind,
    errors::{RasterError, Result},
};

/// Operations every raster backend provides, whatever engine it wraps.
///
/// Band indexes are 1-based. Every method taking a [DatasetHandle] fails
/// with [RasterError::InvalidHandle] once the handle was closed or when it
/// belongs to another processor.
pub trait RasterProcessor {
    fn kind(&self) -> BackendKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Whether the backend engine can be used on this host. Never fails and
    /// has no side effects.
    fn is_available(&self) -> bool;

    fn open(&mut self, source: Source) -> Result<DatasetHandle>;

    /// Releases the dataset. Closing twice, or closing a foreign handle, is a no-op.
    fn close(&mut self, handle: &DatasetHandle);

    fn get_info(&self, handle: &DatasetHandle) -> Result<ImageInfo>;

    /// Single band as `(rows, cols)`.
    fn read_band(&self, handle: &DatasetHandle, band_index: usize) -> Result<PixelArray>;

    /// All bands as `(bands, rows, cols)`.
    fn read_bands(&self, handle: &DatasetHandle) -> Result<PixelArray>;

    fn get_statistics(&self, handle: &DatasetHandle, band_index: usize) -> Result<BandStatistics> {
        self.get_statistics_sampled(handle, band_index, Sampling::Full)
    }

    fn get_statistics_sampled(
        &self,
        handle: &DatasetHandle,
        band_index: usize,
        sampling: Sampling,
    ) -> Result<BandStatistics>;

    fn get_all_statistics(
        &self,
        handle: &DatasetHandle,
        sampling: Sampling,
    ) -> Result<Vec<BandStatistics>>;

    fn get_histogram(
        &self,
        handle: &DatasetHandle,
        band_index: usize,
        bins: usize,
        sampling: Sampling,
    ) -> Result<Histogram>;

    /// Pearson correlation between all bands, `(bands, bands)`.
    fn band_correlation(&self, handle: &DatasetHandle, sampling: Sampling)
        -> Result<Array2<f64>>;

    /// Byte-stretched preview whose longest side is at most `max_dimension`.
    ///
    /// RGB `(3, rows, cols)` from the first three bands when there are at
    /// least three, otherwise the first band as `(rows, cols)`.
    fn get_preview(&self, handle: &DatasetHandle, max_dimension: usize) -> Result<PixelArray>;

    /// Normalized difference index named by `formula_name`, see [SpectralIndex].
    fn calculate_index(
        &self,
        handle: &DatasetHandle,
        formula_name: &str,
        band_mapping: &BandMapping,
    ) -> Result<PixelArray>;

    fn normalize_band(
        &self,
        array: &PixelArray,
        normalization: &Normalization,
    ) -> Result<PixelArray> {
        Ok(normalization.apply(array))
    }

    /// Opens a dataset that is closed when the returned guard goes out of scope.
    fn open_scoped(&mut self, source: Source) -> Result<ScopedDataset<'_, Self>>
    where
        Self: Sized,
    {
        let handle = self.open(source)?;
        Ok(ScopedDataset {
            processor: self,
            handle,
        })
    }
}

/// Primitive access to one backend engine.
///
/// Derived products are composed by [Adapter] from these primitives so all
/// engines share the same numeric semantics.
pub trait Engine {
    type Dataset;

    const KIND: BackendKind;

    /// Cached capability probe.
    fn is_available() -> bool;

    fn open(source: &Source) -> Result<Self::Dataset>;

    fn info(dataset: &Self::Dataset, source: &Source) -> Result<ImageInfo>;

    /// Full resolution band, `band` already validated.
    fn read_band(dataset: &Self::Dataset, info: &ImageInfo, band: usize) -> Result<Array2<f64>>;

    /// Band resampled to `(cols, rows)`. Engines with native resampling override this.
    fn read_resampled(
        dataset: &Self::Dataset,
        info: &ImageInfo,
        band: usize,
        size: (usize, usize),
    ) -> Result<Array2<f64>> {
        let full = Self::read_band(dataset, info, band)?;
        let no_data = info.band(band).and_then(|band| band.no_data);
        Ok(downsample_area(full.view(), no_data, size))
    }

    /// Several full resolution bands in the order of `bands`. Engines that
    /// store bands interleaved override this to decode once.
    fn read_bands(
        dataset: &Self::Dataset,
        info: &ImageInfo,
        bands: &[usize],
    ) -> Result<Vec<Array2<f64>>> {
        bands
            .iter()
            .map(|&band| Self::read_band(dataset, info, band))
            .collect()
    }

    fn read_bands_resampled(
        dataset: &Self::Dataset,
        info: &ImageInfo,
        bands: &[usize],
        size: (usize, usize),
    ) -> Result<Vec<Array2<f64>>> {
        bands
            .iter()
            .map(|&band| Self::read_resampled(dataset, info, band, size))
            .collect()
    }
}

/// Runs `probe` once per process and remembers the outcome.
pub(crate) fn cached_probe(
    cell: &'static OnceLock<bool>,
    kind: BackendKind,
    probe: fn() -> bool,
) -> bool {
    *cell.get_or_init(|| {
        let available = probe();
        debug!("{kind} backend available: {available}");
        available
    })
}

struct OpenDataset<D> {
    dataset: D,
    info: ImageInfo,
}

/// [RasterProcessor] over one [Engine].
pub struct Adapter<E: Engine> {
    datasets: DatasetTable<OpenDataset<E::Dataset>>,
}

impl<E: Engine> Debug for Adapter<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("backend", &E::KIND)
            .field("open_datasets", &self.datasets.len())
            .finish()
    }
}

impl<E: Engine> Default for Adapter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Engine> Adapter<E> {
    /// Never probes the engine and never fails.
    pub fn new() -> Self {
        Self {
            datasets: DatasetTable::new(E::KIND),
        }
    }

    pub fn open_count(&self) -> usize {
        self.datasets.len()
    }

    fn dataset(&self, handle: &DatasetHandle) -> Result<&OpenDataset<E::Dataset>> {
        self.datasets.get(handle)
    }

    fn checked_band(
        &self,
        handle: &DatasetHandle,
        band_index: usize,
    ) -> Result<(&OpenDataset<E::Dataset>, Option<f64>)> {
        let open = self.dataset(handle)?;
        let band_count = open.info.band_count;
        if band_index == 0 || band_index > band_count {
            return Err(RasterError::BandIndexOutOfRange {
                index: band_index,
                band_count,
            });
        }
        let no_data = open.info.band(band_index).and_then(|band| band.no_data);
        Ok((open, no_data))
    }

    fn read(&self, handle: &DatasetHandle, band_index: usize) -> Result<(Array2<f64>, Option<f64>)> {
        let (open, no_data) = self.checked_band(handle, band_index)?;
        Ok((E::read_band(&open.dataset, &open.info, band_index)?, no_data))
    }

    /// Validated bands read together, each with its no-data value.
    fn read_many(
        &self,
        handle: &DatasetHandle,
        band_indexes: &[usize],
    ) -> Result<Vec<(Array2<f64>, Option<f64>)>> {
        let no_data = band_indexes
            .iter()
            .map(|&band_index| Ok(self.checked_band(handle, band_index)?.1))
            .collect::<Result<Vec<_>>>()?;
        let open = self.dataset(handle)?;
        let bands = E::read_bands(&open.dataset, &open.info, band_indexes)?;
        Ok(bands.into_iter().zip(no_data).collect())
    }

    fn read_all(&self, handle: &DatasetHandle) -> Result<Vec<(Array2<f64>, Option<f64>)>> {
        let band_count = self.dataset(handle)?.info.band_count;
        self.read_many(handle, &(1..=band_count).collect::<Vec<_>>())
    }
}

fn views(bands: &[(Array2<f64>, Option<f64>)]) -> Vec<(ArrayView2<f64>, Option<f64>)> {
    bands
        .iter()
        .map(|(band, no_data)| (band.view(), *no_data))
        .collect()
}

impl<E: Engine> RasterProcessor for Adapter<E> {
    fn kind(&self) -> BackendKind {
        E::KIND
    }

    fn is_available(&self) -> bool {
        E::is_available()
    }

    fn open(&mut self, source: Source) -> Result<DatasetHandle> {
        if !E::is_available() {
            return Err(RasterError::BackendUnavailable {
                requested: E::KIND.to_string(),
                checked: vec![E::KIND],
            });
        }
        let dataset = E::open(&source)?;
        let info = E::info(&dataset, &source)?;
        if info.width == 0 || info.height == 0 || info.band_count == 0 {
            return Err(RasterError::corrupt(
                E::KIND,
                format!(
                    "{}x{} raster with {} band(s)",
                    info.width, info.height, info.band_count
                ),
            ));
        }
        let handle = self.datasets.insert(OpenDataset { dataset, info });
        info!("opened {} as {handle}", source.description());
        Ok(handle)
    }

    fn close(&mut self, handle: &DatasetHandle) {
        match self.datasets.remove(handle) {
            Some(_) => info!("closed {handle}"),
            None => debug!("{handle} already closed"),
        }
    }

    fn get_info(&self, handle: &DatasetHandle) -> Result<ImageInfo> {
        Ok(self.dataset(handle)?.info.clone())
    }

    fn read_band(&self, handle: &DatasetHandle, band_index: usize) -> Result<PixelArray> {
        let (band, _) = self.read(handle, band_index)?;
        Ok(PixelArray::from_band(band))
    }

    fn read_bands(&self, handle: &DatasetHandle) -> Result<PixelArray> {
        let bands = self.read_all(handle)?;
        let views: Vec<ArrayView2<f64>> = bands.iter().map(|(band, _)| band.view()).collect();
        Ok(PixelArray::from_stack(stack(Axis(0), &views)?))
    }

    fn get_statistics_sampled(
        &self,
        handle: &DatasetHandle,
        band_index: usize,
        sampling: Sampling,
    ) -> Result<BandStatistics> {
        let (band, no_data) = self.read(handle, band_index)?;
        band_statistics(band_index, band.view(), no_data, sampling)
    }

    fn get_all_statistics(
        &self,
        handle: &DatasetHandle,
        sampling: Sampling,
    ) -> Result<Vec<BandStatistics>> {
        let bands = self.read_all(handle)?;
        bands
            .par_iter()
            .enumerate()
            .map(|(idx, (band, no_data))| band_statistics(idx + 1, band.view(), *no_data, sampling))
            .collect()
    }

    fn get_histogram(
        &self,
        handle: &DatasetHandle,
        band_index: usize,
        bins: usize,
        sampling: Sampling,
    ) -> Result<Histogram> {
        let (band, no_data) = self.read(handle, band_index)?;
        histogram(band_index, band.view(), no_data, bins, sampling)
    }

    fn band_correlation(
        &self,
        handle: &DatasetHandle,
        sampling: Sampling,
    ) -> Result<Array2<f64>> {
        let bands = self.read_all(handle)?;
        correlation_matrix(&views(&bands), sampling)
    }

    fn get_preview(&self, handle: &DatasetHandle, max_dimension: usize) -> Result<PixelArray> {
        let open = self.dataset(handle)?;
        let info = &open.info;
        let size = preview_size(info.width, info.height, max_dimension)?;
        debug!(
            "preview of {handle}: {}x{} -> {}x{}",
            info.width, info.height, size.0, size.1
        );
        let band_indexes: &[usize] = if info.band_count >= 3 { &[1, 2, 3] } else { &[1] };
        let stretched = E::read_bands_resampled(&open.dataset, info, band_indexes, size)?
            .iter()
            .zip(band_indexes)
            .map(|(resampled, &band_index)| {
                let no_data = info.band(band_index).and_then(|band| band.no_data);
                stretch_to_byte(resampled.view(), no_data)
            })
            .collect::<Vec<_>>();

        match stretched.as_slice() {
            [single] => Ok(PixelArray::from_band(single.clone())),
            rgb => {
                let views: Vec<ArrayView2<f64>> = rgb.iter().map(|band| band.view()).collect();
                Ok(PixelArray::from_stack(stack(Axis(0), &views)?))
            }
        }
    }

    fn calculate_index(
        &self,
        handle: &DatasetHandle,
        formula_name: &str,
        band_mapping: &BandMapping,
    ) -> Result<PixelArray> {
        let formula: SpectralIndex = formula_name.parse()?;
        let (a_index, b_index) = formula.bands(band_mapping)?;
        let [(a, a_no_data), (b, b_no_data)]: [(Array2<f64>, Option<f64>); 2] = self
            .read_many(handle, &[a_index, b_index])?
            .try_into()
            .map_err(|_| RasterError::corrupt(E::KIND, "engine returned the wrong band count"))?;
        debug!("{formula} of {handle} from bands {a_index} and {b_index}");
        Ok(PixelArray::from_band(normalized_difference(
            a.view(),
            a_no_data,
            b.view(),
            b_no_data,
        )?))
    }
}

/// Open dataset bound to the processor that opened it; closed on drop.
pub struct ScopedDataset<'p, P: RasterProcessor> {
    processor: &'p mut P,
    handle: DatasetHandle,
}

impl<P: RasterProcessor> ScopedDataset<'_, P> {
    pub fn handle(&self) -> &DatasetHandle {
        &self.handle
    }

    pub fn info(&self) -> Result<ImageInfo> {
        self.processor.get_info(&self.handle)
    }

    pub fn read_band(&self, band_index: usize) -> Result<PixelArray> {
        self.processor.read_band(&self.handle, band_index)
    }

    pub fn read_bands(&self) -> Result<PixelArray> {
        self.processor.read_bands(&self.handle)
    }

    pub fn statistics(&self, band_index: usize) -> Result<BandStatistics> {
        self.processor.get_statistics(&self.handle, band_index)
    }

    pub fn statistics_sampled(&self, band_index: usize, sampling: Sampling) -> Result<BandStatistics> {
        self.processor
            .get_statistics_sampled(&self.handle, band_index, sampling)
    }

    pub fn all_statistics(&self, sampling: Sampling) -> Result<Vec<BandStatistics>> {
        self.processor.get_all_statistics(&self.handle, sampling)
    }

    pub fn histogram(&self, band_index: usize, bins: usize, sampling: Sampling) -> Result<Histogram> {
        self.processor
            .get_histogram(&self.handle, band_index, bins, sampling)
    }

    pub fn correlation(&self, sampling: Sampling) -> Result<Array2<f64>> {
        self.processor.band_correlation(&self.handle, sampling)
    }

    pub fn preview(&self, max_dimension: usize) -> Result<PixelArray> {
        self.processor.get_preview(&self.handle, max_dimension)
    }

    pub fn index(&self, formula_name: &str, band_mapping: &BandMapping) -> Result<PixelArray> {
        self.processor
            .calculate_index(&self.handle, formula_name, band_mapping)
    }
}

impl<P: RasterProcessor> Drop for ScopedDataset<'_, P> {
    fn drop(&mut self) {
        self.processor.close(&self.handle);
    }
}
