use std::{collections::HashMap, str::FromStr};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    components::PixelArray,
    errors::{RasterError, Result},
};

/// Rescaling applied by `normalize_band`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Normalization {
    /// Observed `[min, max]` onto `[out_min, out_max]`.
    MinMax { out_min: f64, out_max: f64 },
    /// `(x - mean) / std`.
    ZScore,
}

impl Default for Normalization {
    fn default() -> Self {
        Normalization::MinMax {
            out_min: 0.,
            out_max: 255.,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    MinMax,
    ZScore,
}

impl FromStr for Method {
    type Err = RasterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "min_max" | "minmax" => Ok(Method::MinMax),
            "z_score" | "zscore" => Ok(Method::ZScore),
            other => Err(RasterError::InvalidParameter(format!(
                "unknown normalization method {other:?}"
            ))),
        }
    }
}

impl Normalization {
    pub fn min_max(out_min: f64, out_max: f64) -> Result<Self> {
        if !(out_min < out_max) {
            return Err(RasterError::InvalidParameter(format!(
                "output range [{out_min}, {out_max}] is empty"
            )));
        }
        Ok(Normalization::MinMax { out_min, out_max })
    }

    /// Builds from a method name and a loose parameter map
    /// (`out_min`/`out_max`, or `output_min`/`output_max`).
    pub fn from_params(method: &str, params: &HashMap<String, f64>) -> Result<Self> {
        match method.parse::<Method>()? {
            Method::MinMax => {
                let param = |keys: [&str; 2], default: f64| {
                    keys.iter()
                        .find_map(|key| params.get(*key).copied())
                        .unwrap_or(default)
                };
                Self::min_max(
                    param(["out_min", "output_min"], 0.),
                    param(["out_max", "output_max"], 255.),
                )
            }
            Method::ZScore => Ok(Normalization::ZScore),
        }
    }

    /// NaN and infinite values pass through untouched and do not influence
    /// the observed range or moments.
    pub fn apply(&self, array: &PixelArray) -> PixelArray {
        let finite = || array.iter().copied().filter(|value| value.is_finite());
        let normalized = match *self {
            Normalization::MinMax { out_min, out_max } => {
                match finite().minmax_by(f64::total_cmp).into_option() {
                    Some((low, high)) if high > low => array.mapv(|value| {
                        (value - low) / (high - low) * (out_max - out_min) + out_min
                    }),
                    _ => array.mapv(|value| if value.is_finite() { out_min } else { value }),
                }
            }
            Normalization::ZScore => {
                let (sum, count) = finite().fold((0., 0usize), |(s, c), v| (s + v, c + 1));
                let mean = sum / count.max(1) as f64;
                let variance =
                    finite().map(|v| (v - mean).powi(2)).sum::<f64>() / count.max(1) as f64;
                let std_dev = variance.sqrt();
                if std_dev > 0. {
                    array.mapv(|value| (value - mean) / std_dev)
                } else {
                    array.mapv(|value| if value.is_finite() { 0. } else { value })
                }
            }
        };
        PixelArray::from(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2, Array3};

    fn assert_close(left: &PixelArray, right: &PixelArray) {
        assert_eq!(left.shape(), right.shape());
        for (l, r) in left.iter().zip(right.iter()) {
            assert!((l - r).abs() < 1e-9, "{l} != {r}");
        }
    }

    #[test]
    fn min_max_spans_output_range_and_is_idempotent() {
        let array = PixelArray::from(array![[3., 7.], [5., 11.]]);
        let normalization = Normalization::default();
        let once = normalization.apply(&array);
        assert_eq!(once.iter().copied().fold(f64::INFINITY, f64::min), 0.);
        assert_eq!(once.iter().copied().fold(f64::NEG_INFINITY, f64::max), 255.);
        let twice = normalization.apply(&once);
        assert_close(&once, &twice);
    }

    #[test]
    fn z_score_of_constant_is_zero() {
        let array = PixelArray::from(Array2::from_elem((4, 4), 42.));
        let normalized = Normalization::ZScore.apply(&array);
        assert!(normalized.iter().all(|value| *value == 0.));
    }

    #[test]
    fn z_score_moments() {
        let array = PixelArray::from(array![[2., 4., 4., 4.], [5., 5., 7., 9.]]);
        let normalized = Normalization::ZScore.apply(&array);
        assert_close(
            &normalized,
            &PixelArray::from(array![[-1.5, -0.5, -0.5, -0.5], [0., 0., 1., 2.]]),
        );
    }

    #[test]
    fn nan_passes_through() {
        let array = PixelArray::from(array![[f64::NAN, 0.], [10., 5.]]);
        let normalized = Normalization::min_max(0., 1.).unwrap().apply(&array);
        let band = normalized.band_view().unwrap();
        assert!(band[[0, 0]].is_nan());
        assert_eq!(band[[1, 1]], 0.5);
    }

    #[test]
    fn from_params() {
        let params = HashMap::from([("output_max".to_string(), 1.)]);
        assert_eq!(
            Normalization::from_params("minmax", &params).unwrap(),
            Normalization::MinMax {
                out_min: 0.,
                out_max: 1.
            }
        );
        assert_eq!(
            Normalization::from_params("Z_SCORE", &HashMap::new()).unwrap(),
            Normalization::ZScore
        );
        assert!(Normalization::from_params("log", &HashMap::new()).is_err());
        let inverted = HashMap::from([("out_min".to_string(), 5.), ("out_max".to_string(), 1.)]);
        assert!(Normalization::from_params("min_max", &inverted).is_err());
    }

    #[test]
    fn stacks_keep_their_shape() {
        let stack = PixelArray::from(Array3::from_shape_fn((2, 3, 3), |(b, r, c)| {
            (b * 9 + r * 3 + c) as f64
        }));
        let normalized = Normalization::default().apply(&stack);
        assert_eq!(normalized.shape(), &[2, 3, 3]);
        assert!(!normalized.is_band());
    }
}
