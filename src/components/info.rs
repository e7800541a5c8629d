use geo::{AffineTransform, Coord, Rect};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt::Display};

/// Free form key/value pairs attached to a dataset or band.
pub type Metadata = HashMap<String, String>;

/// Native sample type of a band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Byte,
    Int8,
    UInt16,
    Int16,
    UInt32,
    Int32,
    Float32,
    Float64,
}

impl DataType {
    pub fn bits(&self) -> u8 {
        match self {
            DataType::Byte | DataType::Int8 => 8,
            DataType::UInt16 | DataType::Int16 => 16,
            DataType::UInt32 | DataType::Int32 | DataType::Float32 => 32,
            DataType::Float64 => 64,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataType::Byte => "byte",
            DataType::Int8 => "int8",
            DataType::UInt16 => "uint16",
            DataType::Int16 => "int16",
            DataType::UInt32 => "uint32",
            DataType::Int32 => "int32",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
        };
        f.write_str(name)
    }
}

/// GDAL ordered affine coefficients:
/// `[origin_x, pixel_width, row_rotation, origin_y, column_rotation, pixel_height]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    /// North-up transform without rotation terms.
    pub fn north_up(origin: (f64, f64), pixel_size: (f64, f64)) -> Self {
        Self([origin.0, pixel_size.0, 0., origin.1, 0., -pixel_size.1.abs()])
    }

    pub fn origin(&self) -> (f64, f64) {
        (self.0[0], self.0[3])
    }

    pub fn pixel_size(&self) -> (f64, f64) {
        (self.0[1], self.0[5])
    }

    pub fn to_affine(&self) -> AffineTransform {
        let [xoff, a, b, yoff, d, e] = self.0;
        AffineTransform::new(a, b, xoff, d, e, yoff)
    }

    /// World coordinates of the pixel corner `(col, row)`.
    pub fn apply(&self, col: f64, row: f64) -> Coord {
        self.to_affine().apply(Coord { x: col, y: row })
    }
}

/// Per band description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandInfo {
    /// 1-based.
    pub index: usize,
    pub data_type: DataType,
    pub no_data: Option<f64>,
    pub description: Option<String>,
    /// Color role as named by the engine, e.g. `Red` or `Gray`.
    pub color_interpretation: Option<String>,
    pub scale: Option<f64>,
    pub offset: Option<f64>,
    pub unit: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl BandInfo {
    /// Band with only its index and type known.
    pub fn new(index: usize, data_type: DataType) -> Self {
        Self {
            index,
            data_type,
            no_data: None,
            description: None,
            color_interpretation: None,
            scale: None,
            offset: None,
            unit: None,
            metadata: Metadata::new(),
        }
    }
}

/// Engine agnostic description of an open dataset.
///
/// Geospatial fields are `None` whenever the engine or the container has no
/// notion of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub width: usize,
    pub height: usize,
    pub band_count: usize,
    pub driver: String,
    pub data_type: DataType,
    pub crs: Option<String>,
    pub geotransform: Option<GeoTransform>,
    pub no_data: Option<f64>,
    pub description: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub bands: Vec<BandInfo>,
}

impl ImageInfo {
    /// Geographic extent of the full raster.
    pub fn bounds(&self) -> Option<Rect> {
        self.geotransform.map(|transform| {
            let corners = [
                transform.apply(0., 0.),
                transform.apply(self.width as f64, 0.),
                transform.apply(0., self.height as f64),
                transform.apply(self.width as f64, self.height as f64),
            ];
            let min = corners.iter().fold(corners[0], |acc, c| Coord {
                x: acc.x.min(c.x),
                y: acc.y.min(c.y),
            });
            let max = corners.iter().fold(corners[0], |acc, c| Coord {
                x: acc.x.max(c.x),
                y: acc.y.max(c.y),
            });
            Rect::new(min, max)
        })
    }

    pub fn band(&self, index: usize) -> Option<&BandInfo> {
        index.checked_sub(1).and_then(|idx| self.bands.get(idx))
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }
}
