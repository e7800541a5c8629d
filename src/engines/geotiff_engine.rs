//! Pure Rust GeoTIFF reader on top of the `tiff` crate.
//!
//! Georeferencing comes from the GeoTIFF tags: model pixel scale with a tie
//! point, or a full model transformation, plus the EPSG code from the geo key
//! directory. No-data comes from the GDAL_NODATA ascii tag.
//!
//! Pixel interleaved (chunky) strips and tiles are decoded one chunk at a
//! time. Band interleaved files are left to GDAL.

use std::{
    io::{Cursor, Read, Seek},
    sync::{Arc, OnceLock},
};

use itertools::Itertools;
use log::{debug, warn};
use ndarray::{s, Array2};
use tiff::{
    decoder::{Decoder, DecodingResult, Limits},
    encoder::{colortype, TiffEncoder},
    tags::Tag,
    ColorType, TiffError, TiffFormatError, TiffResult,
};

use crate::{
    components::{
        preview::downsample_area, BandInfo, DataType, GeoTransform, ImageInfo, Metadata, Source,
    },
    engines::BackendKind,
    errors::{RasterError, Result},
    processor::{cached_probe, Engine},
};

pub const MODEL_PIXEL_SCALE: u16 = 33550;
pub const MODEL_TIEPOINT: u16 = 33922;
pub const MODEL_TRANSFORMATION: u16 = 34264;
pub const GEO_KEY_DIRECTORY: u16 = 34735;
pub const GDAL_NODATA: u16 = 42113;

const RASTER_TYPE_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;
const USER_DEFINED: u16 = 32767;
const RASTER_PIXEL_IS_POINT: u16 = 2;
const PLANAR_SEPARATE: u16 = 2;

/// Largest band this engine materializes, counted as decoded `f64` bytes.
/// Also bounds every decoder buffer.
pub const MAX_BAND_BYTES: usize = 1 << 31;

const MAGIC: [&[u8]; 4] = [b"II*\0", b"MM\0*", b"II+\0", b"MM\0+"];

/// Ascii tags surfaced as dataset metadata, under GDAL's names.
const TEXT_TAGS: [(Tag, &str); 6] = [
    (Tag::ImageDescription, "TIFFTAG_IMAGEDESCRIPTION"),
    (Tag::Software, "TIFFTAG_SOFTWARE"),
    (Tag::DateTime, "TIFFTAG_DATETIME"),
    (Tag::Artist, "TIFFTAG_ARTIST"),
    (Tag::HostComputer, "TIFFTAG_HOSTCOMPUTER"),
    (Tag::Copyright, "TIFFTAG_COPYRIGHT"),
];

#[derive(Debug)]
pub struct GeoTiffEngine;

/// Undecoded file content plus what was parsed from its first image directory.
#[derive(Debug)]
pub struct GeoTiffDataset {
    bytes: Arc<[u8]>,
    width: usize,
    height: usize,
    samples: usize,
    chunk_size: (usize, usize),
    data_type: DataType,
    colors: &'static [&'static str],
    crs: Option<String>,
    geotransform: Option<GeoTransform>,
    no_data: Option<f64>,
    description: Option<String>,
    metadata: Metadata,
}

fn probe() -> bool {
    let mut file = Cursor::new(Vec::new());
    let written = TiffEncoder::new(&mut file)
        .and_then(|mut encoder| encoder.write_image::<colortype::Gray8>(1, 1, &[7]));
    if written.is_err() {
        return false;
    }
    decoder(file.get_ref())
        .and_then(|mut decoder| decoder.read_image())
        .map(|image| matches!(image, DecodingResult::U8(data) if data == [7]))
        .unwrap_or(false)
}

fn limits() -> Limits {
    let mut limits = Limits::default();
    limits.decoding_buffer_size = MAX_BAND_BYTES;
    limits.intermediate_buffer_size = MAX_BAND_BYTES;
    limits
}

fn decoder(bytes: &[u8]) -> TiffResult<Decoder<Cursor<&[u8]>>> {
    Ok(Decoder::new(Cursor::new(bytes))?.with_limits(limits()))
}

/// Features the decoder lacks and oversized buffers are unsupported, the rest
/// is a broken container.
fn translate(err: TiffError) -> RasterError {
    match err {
        TiffError::UnsupportedError(_) | TiffError::LimitsExceeded => {
            RasterError::unsupported(GeoTiffEngine::KIND, err)
        }
        err => RasterError::corrupt(GeoTiffEngine::KIND, err),
    }
}

fn is_tiff(bytes: &[u8]) -> bool {
    MAGIC.iter().any(|magic| bytes.starts_with(magic))
}

fn tag(number: u16) -> Tag {
    Tag::from_u16_exhaustive(number)
}

fn data_type(sample_format: u16, bits: u16) -> Option<DataType> {
    match (sample_format, bits) {
        (1, 8) => Some(DataType::Byte),
        (1, 16) => Some(DataType::UInt16),
        (1, 32) => Some(DataType::UInt32),
        (2, 8) => Some(DataType::Int8),
        (2, 16) => Some(DataType::Int16),
        (2, 32) => Some(DataType::Int32),
        (3, 32) => Some(DataType::Float32),
        (3, 64) | (1 | 2, 64) => Some(DataType::Float64),
        _ => None,
    }
}

fn color_names(color: ColorType) -> &'static [&'static str] {
    match color {
        ColorType::Gray(_) => &["Gray"],
        ColorType::GrayA(_) => &["Gray", "Alpha"],
        ColorType::RGB(_) => &["Red", "Green", "Blue"],
        ColorType::RGBA(_) => &["Red", "Green", "Blue", "Alpha"],
        ColorType::CMYK(_) => &["Cyan", "Magenta", "Yellow", "Black"],
        ColorType::YCbCr(_) => &["YCbCr_Y", "YCbCr_Cb", "YCbCr_Cr"],
        ColorType::Palette(_) => &["Palette"],
    }
}

/// Inline value of `key` in a geo key directory.
fn geo_key(directory: &[u16], key: u16) -> Option<u16> {
    directory
        .get(4..)?
        .chunks_exact(4)
        .find(|entry| entry[0] == key && entry[1] == 0)
        .map(|entry| entry[3])
}

fn crs_from_geo_keys(directory: &[u16]) -> Option<String> {
    [PROJECTED_CS_TYPE_KEY, GEOGRAPHIC_TYPE_KEY]
        .into_iter()
        .filter_map(|key| geo_key(directory, key))
        .find(|code| *code != 0 && *code != USER_DEFINED)
        .map(|code| format!("EPSG:{code}"))
}

fn geotransform_from_tags(
    scale: Option<&[f64]>,
    tiepoint: Option<&[f64]>,
    transformation: Option<&[f64]>,
) -> Option<GeoTransform> {
    if let Some(m) = transformation.filter(|m| m.len() >= 16) {
        return Some(GeoTransform([m[3], m[0], m[1], m[7], m[4], m[5]]));
    }
    match (scale?, tiepoint?) {
        ([sx, sy, ..], [i, j, _, x, y, ..]) => Some(GeoTransform([
            x - i * sx,
            *sx,
            0.,
            y + j * sy,
            0.,
            -sy,
        ])),
        _ => None,
    }
}

/// Moves a point registered transform onto pixel corners.
fn shift_to_corner(transform: GeoTransform) -> GeoTransform {
    let [x, a, b, y, d, e] = transform.0;
    GeoTransform([x - 0.5 * (a + b), a, b, y - 0.5 * (d + e), d, e])
}

fn parse_no_data(text: &str) -> Option<f64> {
    let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    match text.to_ascii_lowercase().as_str() {
        "nan" => Some(f64::NAN),
        _ => text.parse().ok(),
    }
}

fn f64_tag<R: Read + Seek>(decoder: &mut Decoder<R>, number: u16) -> TiffResult<Option<Vec<f64>>> {
    decoder
        .find_tag(tag(number))?
        .map(|value| value.into_f64_vec())
        .transpose()
}

fn text_tag<R: Read + Seek>(decoder: &mut Decoder<R>, tag: Tag) -> TiffResult<Option<String>> {
    Ok(decoder
        .find_tag(tag)?
        .map(|value| value.into_string())
        .transpose()?
        .map(|text| text.trim_end_matches('\0').to_string())
        .filter(|text| !text.is_empty()))
}

/// Outer error: the directory can't be read or decoded. Inner error: a sample
/// layout this engine does not handle.
fn read_metadata(bytes: Arc<[u8]>) -> TiffResult<std::result::Result<GeoTiffDataset, String>> {
    let content = Arc::clone(&bytes);
    let mut decoder = decoder(&content)?;
    let (width, height) = decoder.dimensions()?;
    let (width, height) = (width as usize, height as usize);

    let samples = decoder
        .find_tag_unsigned::<u16>(Tag::SamplesPerPixel)?
        .unwrap_or(1) as usize;
    let bits = decoder
        .find_tag_unsigned_vec::<u16>(Tag::BitsPerSample)?
        .and_then(|bits| bits.first().copied())
        .unwrap_or(1);
    let sample_format = decoder
        .find_tag_unsigned_vec::<u16>(Tag::SampleFormat)?
        .and_then(|formats| formats.first().copied())
        .unwrap_or(1);
    let Some(data_type) = data_type(sample_format, bits) else {
        return Ok(Err(format!(
            "{bits} bit samples with sample format {sample_format}"
        )));
    };
    let planar = decoder
        .find_tag_unsigned::<u16>(Tag::PlanarConfiguration)?
        .unwrap_or(1);
    if planar == PLANAR_SEPARATE && samples > 1 {
        return Ok(Err(format!("{samples} band interleaved (planar) samples")));
    }
    let fits = width
        .checked_mul(height)
        .and_then(|pixels| pixels.checked_mul(std::mem::size_of::<f64>()))
        .is_some_and(|band_bytes| band_bytes <= MAX_BAND_BYTES);
    if !fits {
        return Ok(Err(format!("{width}x{height} bands exceed the decode limit")));
    }

    let colors = color_names(decoder.colortype()?);
    let (chunk_width, chunk_height) = decoder.chunk_dimensions();
    if chunk_width == 0 || chunk_height == 0 {
        return Err(TiffError::FormatError(
            TiffFormatError::InconsistentSizesEncountered,
        ));
    }
    // Decoding the first chunk surfaces unsupported compressions before any read.
    decoder.read_chunk(0)?;

    let scale = f64_tag(&mut decoder, MODEL_PIXEL_SCALE)?;
    let tiepoint = f64_tag(&mut decoder, MODEL_TIEPOINT)?;
    let transformation = f64_tag(&mut decoder, MODEL_TRANSFORMATION)?;
    let geo_keys = decoder
        .find_tag(tag(GEO_KEY_DIRECTORY))?
        .map(|value| value.into_u16_vec())
        .transpose()?
        .unwrap_or_default();
    let no_data = text_tag(&mut decoder, tag(GDAL_NODATA))?.and_then(|text| parse_no_data(&text));

    let mut metadata = Metadata::new();
    for (tag, key) in TEXT_TAGS {
        if let Some(text) = text_tag(&mut decoder, tag)? {
            metadata.insert(key.to_string(), text);
        }
    }

    let mut geotransform = geotransform_from_tags(
        scale.as_deref(),
        tiepoint.as_deref(),
        transformation.as_deref(),
    );
    let point = geo_key(&geo_keys, RASTER_TYPE_KEY) == Some(RASTER_PIXEL_IS_POINT);
    if point {
        geotransform = geotransform.map(shift_to_corner);
    }
    if !geo_keys.is_empty() {
        let area_or_point = if point { "Point" } else { "Area" };
        metadata.insert("AREA_OR_POINT".to_string(), area_or_point.to_string());
    }

    Ok(Ok(GeoTiffDataset {
        width,
        height,
        samples,
        chunk_size: (chunk_width as usize, chunk_height as usize),
        data_type,
        colors,
        crs: crs_from_geo_keys(&geo_keys),
        geotransform,
        no_data,
        description: metadata.get("TIFFTAG_IMAGEDESCRIPTION").cloned(),
        metadata,
        bytes,
    }))
}

fn widen(image: DecodingResult) -> Vec<f64> {
    match image {
        DecodingResult::U8(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::U16(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::U32(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::U64(data) => data.into_iter().map(|v| v as f64).collect(),
        DecodingResult::I8(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::I16(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::I32(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::I64(data) => data.into_iter().map(|v| v as f64).collect(),
        DecodingResult::F32(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::F64(data) => data,
    }
}

impl Engine for GeoTiffEngine {
    type Dataset = GeoTiffDataset;

    const KIND: BackendKind = BackendKind::GeoTiff;

    fn is_available() -> bool {
        static AVAILABLE: OnceLock<bool> = OnceLock::new();
        cached_probe(&AVAILABLE, Self::KIND, probe)
    }

    fn open(source: &Source) -> Result<Self::Dataset> {
        let bytes = source.read_all()?;
        if !is_tiff(&bytes) {
            return Err(RasterError::unsupported(
                Self::KIND,
                format!("{} is not a TIFF container", source.description()),
            ));
        }
        match read_metadata(bytes) {
            Ok(Ok(dataset)) => Ok(dataset),
            Ok(Err(layout)) => Err(RasterError::unsupported(Self::KIND, layout)),
            Err(err) => Err(translate(err)),
        }
    }

    fn info(dataset: &Self::Dataset, source: &Source) -> Result<ImageInfo> {
        let bands = (1..=dataset.samples)
            .map(|index| BandInfo {
                no_data: dataset.no_data,
                color_interpretation: Some(
                    dataset
                        .colors
                        .get(index - 1)
                        .copied()
                        .unwrap_or("Undefined")
                        .to_string(),
                ),
                ..BandInfo::new(index, dataset.data_type)
            })
            .collect();
        Ok(ImageInfo {
            width: dataset.width,
            height: dataset.height,
            band_count: dataset.samples,
            driver: "GTiff".to_string(),
            data_type: dataset.data_type,
            crs: dataset.crs.clone(),
            geotransform: dataset.geotransform,
            no_data: dataset.no_data,
            description: dataset
                .description
                .clone()
                .unwrap_or_else(|| source.description()),
            metadata: dataset.metadata.clone(),
            bands,
        })
    }

    fn read_band(dataset: &Self::Dataset, info: &ImageInfo, band: usize) -> Result<Array2<f64>> {
        Self::read_bands(dataset, info, &[band])?
            .pop()
            .ok_or_else(|| RasterError::corrupt(Self::KIND, "no band decoded"))
    }

    /// Decodes every chunk once and scatters its samples into all requested bands.
    fn read_bands(
        dataset: &Self::Dataset,
        _info: &ImageInfo,
        bands: &[usize],
    ) -> Result<Vec<Array2<f64>>> {
        let mut decoder = decoder(&dataset.bytes).map_err(translate)?;
        let (chunk_width, chunk_height) = dataset.chunk_size;
        let across = dataset.width.div_ceil(chunk_width);
        let down = dataset.height.div_ceil(chunk_height);
        let mut out = vec![Array2::<f64>::zeros((dataset.height, dataset.width)); bands.len()];

        for (chunk_row, chunk_col) in (0..down).cartesian_product(0..across) {
            let index = u32::try_from(chunk_row * across + chunk_col)
                .map_err(|err| RasterError::corrupt(Self::KIND, err))?;
            let (data_width, data_height) = decoder.chunk_data_dimensions(index);
            let (data_width, data_height) = (data_width as usize, data_height as usize);
            let samples = widen(decoder.read_chunk(index).map_err(translate)?);
            if samples.len() < data_width * data_height * dataset.samples {
                warn!(
                    "chunk {index} decoded {} samples, expected {}",
                    samples.len(),
                    data_width * data_height * dataset.samples
                );
                return Err(RasterError::corrupt(
                    Self::KIND,
                    "chunk data is shorter than its dimensions",
                ));
            }

            let (row, col) = (chunk_row * chunk_height, chunk_col * chunk_width);
            let rows = data_height.min(dataset.height - row);
            let cols = data_width.min(dataset.width - col);
            for (target, &band) in out.iter_mut().zip(bands) {
                let values = samples
                    .iter()
                    .skip(band - 1)
                    .step_by(dataset.samples)
                    .take(data_width * data_height)
                    .copied()
                    .collect();
                let chunk = Array2::from_shape_vec((data_height, data_width), values)?;
                target
                    .slice_mut(s![row..row + rows, col..col + cols])
                    .assign(&chunk.slice(s![..rows, ..cols]));
            }
        }
        debug!(
            "decoded bands {bands:?} of {}x{} from {} chunk(s)",
            dataset.width,
            dataset.height,
            across * down
        );
        Ok(out)
    }

    fn read_bands_resampled(
        dataset: &Self::Dataset,
        info: &ImageInfo,
        bands: &[usize],
        size: (usize, usize),
    ) -> Result<Vec<Array2<f64>>> {
        let full = Self::read_bands(dataset, info, bands)?;
        Ok(full
            .iter()
            .zip(bands)
            .map(|(band, &index)| {
                let no_data = info.band(index).and_then(|band| band.no_data);
                downsample_area(band.view(), no_data, size)
            })
            .collect())
    }
}
