use itertools::Itertools;
use log::debug;
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::{RasterError, Result};

/// Which pixels of a band take part in a computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Sampling {
    #[default]
    Full,
    /// Every k-th pixel in row-major order so that at most `n` are visited.
    MaxPixels(usize),
}

impl Sampling {
    pub fn stride(&self, pixel_count: usize) -> Result<usize> {
        match self {
            Sampling::Full => Ok(1),
            Sampling::MaxPixels(0) => Err(RasterError::InvalidParameter(
                "sample size must be positive".into(),
            )),
            Sampling::MaxPixels(n) => Ok(pixel_count.div_ceil(*n).max(1)),
        }
    }
}

/// Summary of the valid pixels of one band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandStatistics {
    pub band: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub median: Option<f64>,
    /// Only known when every pixel was visited.
    pub unique_count: Option<usize>,
    pub valid_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub counts: Vec<u64>,
    /// `counts.len() + 1` bin edges.
    pub edges: Vec<f64>,
}

pub fn is_valid(value: f64, no_data: Option<f64>) -> bool {
    value.is_finite() && no_data.map_or(true, |no_data| value != no_data)
}

/// Valid pixel values picked by `sampling`.
pub fn valid_values(
    band: ArrayView2<f64>,
    no_data: Option<f64>,
    sampling: Sampling,
) -> Result<Vec<f64>> {
    let stride = sampling.stride(band.len())?;
    if stride > 1 {
        debug!("sampling every {stride} pixel(s) of {}", band.len());
    }
    Ok(band
        .iter()
        .step_by(stride)
        .copied()
        .filter(|value| is_valid(*value, no_data))
        .collect())
}

pub fn band_statistics(
    band_index: usize,
    band: ArrayView2<f64>,
    no_data: Option<f64>,
    sampling: Sampling,
) -> Result<BandStatistics> {
    let mut values = valid_values(band, no_data, sampling)?;
    let (min, max) = values
        .iter()
        .copied()
        .minmax_by(f64::total_cmp)
        .into_option()
        .ok_or(RasterError::NoValidPixels(band_index))?;

    let count = values.len() as f64;
    let mean = values.iter().sum::<f64>() / count;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count;

    values.sort_unstable_by(f64::total_cmp);
    let mid = values.len() / 2;
    let median = if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.
    } else {
        values[mid]
    };
    let unique_count = (sampling.stride(band.len())? == 1).then(|| values.iter().dedup().count());

    Ok(BandStatistics {
        band: band_index,
        min,
        max,
        mean,
        std_dev: variance.sqrt(),
        median: Some(median),
        unique_count,
        valid_count: values.len(),
    })
}

/// Equal width histogram over the valid range, last bin closed on the right.
pub fn histogram(
    band_index: usize,
    band: ArrayView2<f64>,
    no_data: Option<f64>,
    bins: usize,
    sampling: Sampling,
) -> Result<Histogram> {
    if bins == 0 {
        return Err(RasterError::InvalidParameter(
            "histogram needs at least one bin".into(),
        ));
    }
    let values = valid_values(band, no_data, sampling)?;
    let (mut low, mut high) = values
        .iter()
        .copied()
        .minmax_by(f64::total_cmp)
        .into_option()
        .ok_or(RasterError::NoValidPixels(band_index))?;
    if low == high {
        low -= 0.5;
        high += 0.5;
    }
    let width = (high - low) / bins as f64;
    let edges = (0..=bins).map(|idx| low + width * idx as f64).collect();
    let mut counts = vec![0u64; bins];
    for value in values {
        let bin = (((value - low) / width) as usize).min(bins - 1);
        counts[bin] += 1;
    }
    Ok(Histogram { counts, edges })
}

/// Pearson correlation between every pair of bands, over pixels valid in both.
pub fn correlation_matrix(
    bands: &[(ArrayView2<f64>, Option<f64>)],
    sampling: Sampling,
) -> Result<Array2<f64>> {
    let count = bands.len();
    let stride = match bands.first() {
        Some((band, _)) => sampling.stride(band.len())?,
        None => 1,
    };
    let pairs: Vec<(usize, usize)> = (0..count).tuple_combinations().collect();
    let coefficients: Vec<((usize, usize), f64)> = pairs
        .into_par_iter()
        .map(|(i, j)| ((i, j), pearson(bands[i], bands[j], stride)))
        .collect();

    let mut matrix = Array2::eye(count);
    for ((i, j), coefficient) in coefficients {
        matrix[[i, j]] = coefficient;
        matrix[[j, i]] = coefficient;
    }
    Ok(matrix)
}

fn pearson(
    (x, x_no_data): (ArrayView2<f64>, Option<f64>),
    (y, y_no_data): (ArrayView2<f64>, Option<f64>),
    stride: usize,
) -> f64 {
    let pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(y.iter())
        .step_by(stride)
        .filter(|(x, y)| is_valid(**x, x_no_data) && is_valid(**y, y_no_data))
        .map(|(x, y)| (*x, *y))
        .collect();
    if pairs.is_empty() {
        return 0.;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;
    let (cov, var_x, var_y) = pairs.iter().fold((0., 0., 0.), |(c, vx, vy), (x, y)| {
        let (dx, dy) = (x - mean_x, y - mean_y);
        (c + dx * dy, vx + dx * dx, vy + dy * dy)
    });
    let denominator = (var_x * var_y).sqrt();
    if denominator == 0. {
        0.
    } else {
        (cov / denominator).clamp(-1., 1.)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};
    use rstest::rstest;

    #[test]
    fn no_data_pixels_are_excluded() {
        // Left half no-data, right half 1..=50 per row.
        let band = Array2::from_shape_fn((100, 100), |(_, col)| {
            if col < 50 {
                0.
            } else {
                (col - 49) as f64
            }
        });
        let stats = band_statistics(1, band.view(), Some(0.), Sampling::Full).unwrap();
        assert_eq!(stats.valid_count, 5000);
        assert_eq!(stats.min, 1.);
        assert_eq!(stats.max, 50.);
        assert!((stats.mean - 25.5).abs() < 1e-12);
        assert_eq!(stats.median, Some(25.5));
        assert_eq!(stats.unique_count, Some(50));
    }

    #[test]
    fn population_standard_deviation() {
        let band = array![[2., 4., 4., 4.], [5., 5., 7., 9.]];
        let stats = band_statistics(1, band.view(), None, Sampling::Full).unwrap();
        assert_eq!(stats.mean, 5.);
        assert_eq!(stats.std_dev, 2.);
        assert_eq!(stats.median, Some(4.5));
    }

    #[test]
    fn non_finite_values_are_ignored() {
        let band = array![[f64::NAN, 1.], [f64::INFINITY, 3.]];
        let stats = band_statistics(2, band.view(), None, Sampling::Full).unwrap();
        assert_eq!((stats.min, stats.max, stats.valid_count), (1., 3., 2));
    }

    #[test]
    fn all_no_data_is_an_error() {
        let band = Array2::<f64>::zeros((3, 3));
        assert!(matches!(
            band_statistics(4, band.view(), Some(0.), Sampling::Full),
            Err(RasterError::NoValidPixels(4))
        ));
    }

    #[rstest]
    #[case(Sampling::Full, 10_000, 1)]
    #[case(Sampling::MaxPixels(1_000), 10_000, 10)]
    #[case(Sampling::MaxPixels(3_000), 10_000, 4)]
    #[case(Sampling::MaxPixels(50_000), 10_000, 1)]
    fn sampling_stride(#[case] sampling: Sampling, #[case] pixels: usize, #[case] stride: usize) {
        assert_eq!(sampling.stride(pixels).unwrap(), stride);
    }

    #[test]
    fn sampled_statistics_do_not_report_unique_count() {
        let band = Array2::from_shape_fn((100, 100), |(row, col)| (row * 100 + col) as f64);
        let stats = band_statistics(1, band.view(), None, Sampling::MaxPixels(100)).unwrap();
        assert_eq!(stats.valid_count, 100);
        assert_eq!(stats.unique_count, None);
        assert!(matches!(
            Sampling::MaxPixels(0).stride(10),
            Err(RasterError::InvalidParameter(_))
        ));
    }

    #[test]
    fn histogram_closes_last_bin() {
        let band = array![[0., 1., 2., 3.], [4., 5., 6., 10.]];
        let histogram = histogram(1, band.view(), None, 5, Sampling::Full).unwrap();
        assert_eq!(histogram.edges, vec![0., 2., 4., 6., 8., 10.]);
        assert_eq!(histogram.counts, vec![2, 2, 2, 1, 1]);
    }

    #[test]
    fn histogram_of_constant_band_is_centered() {
        let band = Array2::from_elem((2, 2), 7.);
        let histogram = histogram(1, band.view(), None, 1, Sampling::Full).unwrap();
        assert_eq!(histogram.edges, vec![6.5, 7.5]);
        assert_eq!(histogram.counts, vec![4]);
    }

    #[test]
    fn correlation_of_linear_and_constant_bands() {
        let a = Array2::from_shape_fn((10, 10), |(row, col)| (row * 10 + col) as f64);
        let b = a.mapv(|v| 2. * v + 1.);
        let c = a.mapv(|v| -v);
        let flat = Array2::from_elem((10, 10), 3.);
        let matrix = correlation_matrix(
            &[
                (a.view(), None),
                (b.view(), None),
                (c.view(), None),
                (flat.view(), None),
            ],
            Sampling::Full,
        )
        .unwrap();
        assert_eq!(matrix.dim(), (4, 4));
        assert!((matrix[[0, 1]] - 1.).abs() < 1e-12);
        assert!((matrix[[2, 0]] + 1.).abs() < 1e-12);
        assert_eq!(matrix[[3, 0]], 0.);
        assert_eq!(matrix[[3, 3]], 1.);
    }
}
