//! Plain image files (PNG, JPEG, TIFF, WebP) through the `image` crate.
//!
//! Every channel is a band. There is no georeferencing and no no-data.

use std::sync::OnceLock;

use image::{imageops::FilterType, ColorType, DynamicImage, ImageFormat};
use log::debug;
use ndarray::Array2;
use num_traits::AsPrimitive;

use crate::{
    components::{BandInfo, DataType, ImageInfo, Metadata, Source},
    engines::BackendKind,
    errors::{RasterError, Result},
    processor::{cached_probe, Engine},
};

#[derive(Debug)]
pub struct ImageEngine;

#[derive(Debug)]
pub struct ImageDataset {
    format: ImageFormat,
    image: DynamicImage,
}

fn probe() -> bool {
    [ImageFormat::Png, ImageFormat::Jpeg]
        .iter()
        .any(|format| format.reading_enabled())
}

fn data_type(color: ColorType) -> DataType {
    match color {
        ColorType::L8 | ColorType::La8 | ColorType::Rgb8 | ColorType::Rgba8 => DataType::Byte,
        ColorType::L16 | ColorType::La16 | ColorType::Rgb16 | ColorType::Rgba16 => {
            DataType::UInt16
        }
        _ => DataType::Float32,
    }
}

fn channel_names(color: ColorType) -> &'static [&'static str] {
    match color.channel_count() {
        1 => &["Gray"],
        2 => &["Gray", "Alpha"],
        3 => &["Red", "Green", "Blue"],
        _ => &["Red", "Green", "Blue", "Alpha"],
    }
}

/// Channel `band` (1-based) out of interleaved samples.
fn channel<T: AsPrimitive<f64>>(
    samples: &[T],
    channels: usize,
    band: usize,
    (rows, cols): (usize, usize),
) -> Result<Array2<f64>> {
    let values = samples
        .iter()
        .skip(band - 1)
        .step_by(channels)
        .take(rows * cols)
        .map(|sample| sample.as_())
        .collect();
    Ok(Array2::from_shape_vec((rows, cols), values)?)
}

fn extract_band(image: &DynamicImage, band: usize) -> Result<Array2<f64>> {
    let shape = (image.height() as usize, image.width() as usize);
    match image {
        DynamicImage::ImageLuma8(buffer) => channel(buffer.as_raw(), 1, band, shape),
        DynamicImage::ImageLumaA8(buffer) => channel(buffer.as_raw(), 2, band, shape),
        DynamicImage::ImageRgb8(buffer) => channel(buffer.as_raw(), 3, band, shape),
        DynamicImage::ImageRgba8(buffer) => channel(buffer.as_raw(), 4, band, shape),
        DynamicImage::ImageLuma16(buffer) => channel(buffer.as_raw(), 1, band, shape),
        DynamicImage::ImageLumaA16(buffer) => channel(buffer.as_raw(), 2, band, shape),
        DynamicImage::ImageRgb16(buffer) => channel(buffer.as_raw(), 3, band, shape),
        DynamicImage::ImageRgba16(buffer) => channel(buffer.as_raw(), 4, band, shape),
        DynamicImage::ImageRgb32F(buffer) => channel(buffer.as_raw(), 3, band, shape),
        DynamicImage::ImageRgba32F(buffer) => channel(buffer.as_raw(), 4, band, shape),
        other => channel(other.to_rgba32f().as_raw(), 4, band, shape),
    }
}

impl Engine for ImageEngine {
    type Dataset = ImageDataset;

    const KIND: BackendKind = BackendKind::Image;

    fn is_available() -> bool {
        static AVAILABLE: OnceLock<bool> = OnceLock::new();
        cached_probe(&AVAILABLE, Self::KIND, probe)
    }

    fn open(source: &Source) -> Result<Self::Dataset> {
        let bytes = source.read_all()?;
        let format = image::guess_format(&bytes)
            .map_err(|err| RasterError::unsupported(Self::KIND, err))?;
        if !format.reading_enabled() {
            return Err(RasterError::unsupported(
                Self::KIND,
                format!("{format:?} decoding is not compiled in"),
            ));
        }
        let image = image::load_from_memory_with_format(&bytes, format)
            .map_err(|err| RasterError::corrupt(Self::KIND, err))?;
        debug!(
            "decoded {format:?} {}x{} {:?}",
            image.width(),
            image.height(),
            image.color()
        );
        Ok(ImageDataset { format, image })
    }

    fn info(dataset: &Self::Dataset, source: &Source) -> Result<ImageInfo> {
        let color = dataset.image.color();
        let data_type = data_type(color);
        let bands = channel_names(color)
            .iter()
            .enumerate()
            .map(|(idx, name)| BandInfo {
                description: Some(name.to_ascii_lowercase()),
                color_interpretation: Some(name.to_string()),
                ..BandInfo::new(idx + 1, data_type)
            })
            .collect::<Vec<_>>();
        Ok(ImageInfo {
            width: dataset.image.width() as usize,
            height: dataset.image.height() as usize,
            band_count: bands.len(),
            driver: format!("{:?}", dataset.format).to_ascii_uppercase(),
            data_type,
            crs: None,
            geotransform: None,
            no_data: None,
            description: source.description(),
            metadata: Metadata::new(),
            bands,
        })
    }

    fn read_band(dataset: &Self::Dataset, _info: &ImageInfo, band: usize) -> Result<Array2<f64>> {
        extract_band(&dataset.image, band)
    }

    fn read_resampled(
        dataset: &Self::Dataset,
        _info: &ImageInfo,
        band: usize,
        (cols, rows): (usize, usize),
    ) -> Result<Array2<f64>> {
        let resized = dataset
            .image
            .resize_exact(cols as u32, rows as u32, FilterType::Triangle);
        extract_band(&resized, band)
    }
}
