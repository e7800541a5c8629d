use ndarray::{Array2, Array3, ArrayD, ArrayView2, Ix2, Ix3};
use shrinkwraprs::Shrinkwrap;

use crate::errors::Result;

/// Row-major numeric grid handed to consumers.
///
/// Either a single band `(rows, cols)` or a band stack `(bands, rows, cols)`.
/// Values are widened to `f64` whatever the native band type.
#[derive(Shrinkwrap, Debug, Clone, PartialEq)]
pub struct PixelArray(ArrayD<f64>);

impl PixelArray {
    pub fn from_band(band: Array2<f64>) -> Self {
        Self(band.into_dyn())
    }

    pub fn from_stack(stack: Array3<f64>) -> Self {
        Self(stack.into_dyn())
    }

    pub fn is_band(&self) -> bool {
        self.0.ndim() == 2
    }

    pub fn band_view(&self) -> Option<ArrayView2<f64>> {
        self.0.view().into_dimensionality::<Ix2>().ok()
    }

    pub fn into_band(self) -> Result<Array2<f64>> {
        Ok(self.0.into_dimensionality::<Ix2>()?)
    }

    pub fn into_stack(self) -> Result<Array3<f64>> {
        Ok(self.0.into_dimensionality::<Ix3>()?)
    }

    pub fn into_inner(self) -> ArrayD<f64> {
        self.0
    }

    /// Every value is neither NaN nor infinite.
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|value| value.is_finite())
    }
}

impl From<Array2<f64>> for PixelArray {
    fn from(value: Array2<f64>) -> Self {
        Self::from_band(value)
    }
}

impl From<Array3<f64>> for PixelArray {
    fn from(value: Array3<f64>) -> Self {
        Self::from_stack(value)
    }
}

impl From<ArrayD<f64>> for PixelArray {
    fn from(value: ArrayD<f64>) -> Self {
        Self(value)
    }
}
