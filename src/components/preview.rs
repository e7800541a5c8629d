use itertools::Itertools;
use ndarray::{Array2, ArrayView2};

use crate::{
    components::statistics::is_valid,
    errors::{RasterError, Result},
};

/// Output `(cols, rows)` whose longest side is `max_dimension`, keeping the
/// aspect ratio. Rasters that already fit are returned at full size.
pub fn preview_size(width: usize, height: usize, max_dimension: usize) -> Result<(usize, usize)> {
    if max_dimension == 0 {
        return Err(RasterError::InvalidParameter(
            "preview dimension must be positive".into(),
        ));
    }
    let longest = width.max(height);
    if longest <= max_dimension {
        return Ok((width, height));
    }
    let scale = max_dimension as f64 / longest as f64;
    let scaled = |side: usize| {
        if side == longest {
            max_dimension
        } else {
            ((side as f64 * scale).round() as usize).clamp(1, max_dimension)
        }
    };
    Ok((scaled(width), scaled(height)))
}

/// Area average of the valid source pixels covered by each output cell.
///
/// Cells without any valid pixel are NaN.
pub fn downsample_area(
    band: ArrayView2<f64>,
    no_data: Option<f64>,
    (cols, rows): (usize, usize),
) -> Array2<f64> {
    let (src_rows, src_cols) = band.dim();
    let span = |idx: usize, out: usize, src: usize| {
        let start = idx * src / out;
        let end = ((idx + 1) * src / out).max(start + 1).min(src);
        start..end
    };
    Array2::from_shape_fn((rows, cols), |(row, col)| {
        let (sum, count) = span(row, rows, src_rows)
            .cartesian_product(span(col, cols, src_cols))
            .map(|(r, c)| band[[r, c]])
            .filter(|value| is_valid(*value, no_data))
            .fold((0., 0usize), |(sum, count), value| (sum + value, count + 1));
        if count == 0 {
            f64::NAN
        } else {
            sum / count as f64
        }
    })
}

/// Linear stretch of the valid range onto 0..=255, rounded to whole values.
///
/// Invalid pixels become 0; a constant band keeps its values clamped to the
/// byte range.
pub fn stretch_to_byte(band: ArrayView2<f64>, no_data: Option<f64>) -> Array2<f64> {
    let range = band
        .iter()
        .copied()
        .filter(|value| is_valid(*value, no_data))
        .minmax_by(f64::total_cmp)
        .into_option();
    band.mapv(|value| {
        if !is_valid(value, no_data) {
            return 0.;
        }
        match range {
            Some((low, high)) if high > low => ((value - low) / (high - low) * 255.).round(),
            _ => value.clamp(0., 255.).round(),
        }
    })
}
