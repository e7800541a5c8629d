use std::{collections::HashMap, fmt::Display, str::FromStr};

use ndarray::{Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};

use crate::{
    components::statistics::is_valid,
    errors::{RasterError, Result},
};

/// Normalized difference `(A - B) / (A + B)` indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpectralIndex {
    /// Vegetation: A = nir, B = red.
    Ndvi,
    /// Water: A = green, B = nir.
    Ndwi,
    /// Built-up: A = swir, B = nir.
    Ndbi,
    /// Plain A/B roles.
    NormalizedDifference,
}

impl SpectralIndex {
    pub fn name(&self) -> &'static str {
        match self {
            SpectralIndex::Ndvi => "ndvi",
            SpectralIndex::Ndwi => "ndwi",
            SpectralIndex::Ndbi => "ndbi",
            SpectralIndex::NormalizedDifference => "normalized_difference",
        }
    }

    /// Band roles `(A, B)`.
    pub fn roles(&self) -> (&'static str, &'static str) {
        match self {
            SpectralIndex::Ndvi => ("nir", "red"),
            SpectralIndex::Ndwi => ("green", "nir"),
            SpectralIndex::Ndbi => ("swir", "nir"),
            SpectralIndex::NormalizedDifference => ("a", "b"),
        }
    }

    /// Resolves `(A, B)` band indexes from a role mapping.
    ///
    /// Falls back to the generic `a`/`b` roles for every formula.
    pub fn bands(&self, mapping: &BandMapping) -> Result<(usize, usize)> {
        let (a, b) = self.roles();
        let lookup = |role: &'static str, generic: &str| {
            mapping
                .get(role)
                .or_else(|| mapping.get(generic))
                .ok_or(RasterError::MissingBandRole {
                    formula: self.name(),
                    role,
                })
        };
        Ok((lookup(a, "a")?, lookup(b, "b")?))
    }
}

impl Display for SpectralIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SpectralIndex {
    type Err = RasterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ndvi" => Ok(SpectralIndex::Ndvi),
            "ndwi" => Ok(SpectralIndex::Ndwi),
            "ndbi" => Ok(SpectralIndex::Ndbi),
            "normalized_difference" | "nd" => Ok(SpectralIndex::NormalizedDifference),
            _ => Err(RasterError::UnknownFormula(s.to_string())),
        }
    }
}

/// Role name to 1-based band index. Role names are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandMapping(HashMap<String, usize>);

impl BandMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, role: &str, band: usize) -> Self {
        self.insert(role, band);
        self
    }

    pub fn insert(&mut self, role: &str, band: usize) {
        self.0.insert(role.to_ascii_lowercase(), band);
    }

    pub fn get(&self, role: &str) -> Option<usize> {
        self.0.get(&role.to_ascii_lowercase()).copied()
    }
}

impl<S: AsRef<str>, const N: usize> From<[(S, usize); N]> for BandMapping {
    fn from(value: [(S, usize); N]) -> Self {
        value
            .into_iter()
            .fold(BandMapping::new(), |mapping, (role, band)| {
                mapping.with(role.as_ref(), band)
            })
    }
}

impl<S: AsRef<str>> FromIterator<(S, usize)> for BandMapping {
    fn from_iter<I: IntoIterator<Item = (S, usize)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(BandMapping::new(), |mapping, (role, band)| {
                mapping.with(role.as_ref(), band)
            })
    }
}

/// `(a - b) / (a + b)`, zero wherever the denominator is zero or an input
/// pixel is invalid, so the output is always finite.
pub fn normalized_difference(
    a: ArrayView2<f64>,
    a_no_data: Option<f64>,
    b: ArrayView2<f64>,
    b_no_data: Option<f64>,
) -> Result<Array2<f64>> {
    if a.dim() != b.dim() {
        return Err(RasterError::InvalidParameter(format!(
            "index bands differ in shape: {:?} and {:?}",
            a.dim(),
            b.dim()
        )));
    }
    Ok(Zip::from(&a).and(&b).map_collect(|&a, &b| {
        if !is_valid(a, a_no_data) || !is_valid(b, b_no_data) {
            return 0.;
        }
        let denominator = a + b;
        if denominator == 0. {
            return 0.;
        }
        let index = (a - b) / denominator;
        if index.is_finite() {
            index
        } else {
            0.
        }
    }))
}
