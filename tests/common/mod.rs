#![allow(dead_code)]

use std::io::Cursor;

use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use tiff::{
    encoder::{colortype::ColorType, TiffEncoder, TiffValue},
    tags::Tag,
};

pub const ORIGIN: (f64, f64) = (500_000., 4_000_000.);
pub const PIXEL_SIZE: f64 = 10.;

/// North-up GeoTIFF in EPSG:32633 with 10 m pixels.
pub fn geotiff<C: ColorType>(
    width: u32,
    height: u32,
    data: &[C::Inner],
    no_data: Option<&str>,
) -> Vec<u8>
where
    [C::Inner]: TiffValue,
{
    let mut file = Cursor::new(Vec::new());
    let mut encoder = TiffEncoder::new(&mut file).unwrap();
    let mut image = encoder.new_image::<C>(width, height).unwrap();
    image
        .encoder()
        .write_tag(
            Tag::from_u16_exhaustive(33550),
            &[PIXEL_SIZE, PIXEL_SIZE, 0.][..],
        )
        .unwrap();
    image
        .encoder()
        .write_tag(
            Tag::from_u16_exhaustive(33922),
            &[0., 0., 0., ORIGIN.0, ORIGIN.1, 0.][..],
        )
        .unwrap();
    image
        .encoder()
        .write_tag(
            Tag::from_u16_exhaustive(34735),
            &[1u16, 1, 0, 2, 1024, 0, 1, 1, 3072, 0, 1, 32633][..],
        )
        .unwrap();
    if let Some(no_data) = no_data {
        image
            .encoder()
            .write_tag(Tag::from_u16_exhaustive(42113), no_data)
            .unwrap();
    }
    image.write_data(data).unwrap();
    file.into_inner()
}

/// 100x100 band whose left half is the no-data value 0 and right half 1..=50.
pub fn half_no_data() -> Vec<u16> {
    (0..100 * 100)
        .map(|idx| match idx % 100 {
            col if col < 50 => 0,
            col => (col - 49) as u16,
        })
        .collect()
}

/// Interleaved 4-band samples: red, green, blue, nir.
pub fn four_bands(width: usize, height: usize) -> Vec<u16> {
    (0..width * height)
        .flat_map(|idx| {
            let red = (idx % 7 + 1) as u16 * 10;
            let nir = (idx % 5 + 1) as u16 * 30;
            [red, 500, 1000, nir]
        })
        .collect()
}

pub fn png_rgb(width: u32, height: u32) -> Vec<u8> {
    let buffer = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut bytes = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(buffer)
        .write_to(&mut bytes, ImageFormat::Png)
        .unwrap();
    bytes.into_inner()
}
