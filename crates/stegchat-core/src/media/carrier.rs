use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use image::codecs::png::PngEncoder;
use image::{ColorType, DynamicImage, GenericImageView, ImageEncoder, ImageFormat};
use log::error;

use crate::error::StegchatError;
use crate::result::Result;

use super::Persist;

/// A raster image used as steganographic container.
///
/// Pixels are kept as one flat buffer in raster (row-major) order, every pixel
/// occupies `channels` consecutive bytes. Grayscale, grayscale+alpha, RGB and RGBA
/// carriers keep their layout, anything else is converted to RGBA on load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarrierImage {
    width: u32,
    height: u32,
    channels: u8,
    pixels: Vec<u8>,
}

impl CarrierImage {
    pub fn from_raw(width: u32, height: u32, channels: u8, pixels: Vec<u8>) -> Result<Self> {
        if !(1..=4).contains(&channels)
            || pixels.len() != width as usize * height as usize * channels as usize
        {
            return Err(StegchatError::InvalidImageMedia);
        }

        Ok(Self {
            width,
            height,
            channels,
            pixels,
        })
    }

    pub fn from_dynamic(img: DynamicImage) -> Self {
        let (width, height) = img.dimensions();
        let (channels, pixels) = match img {
            DynamicImage::ImageLuma8(buf) => (1, buf.into_raw()),
            DynamicImage::ImageLumaA8(buf) => (2, buf.into_raw()),
            DynamicImage::ImageRgb8(buf) => (3, buf.into_raw()),
            DynamicImage::ImageRgba8(buf) => (4, buf.into_raw()),
            other => (4, other.to_rgba8().into_raw()),
        };

        Self {
            width,
            height,
            channels,
            pixels,
        }
    }

    pub fn from_file(f: &Path) -> Result<Self> {
        let Some(ext) = f.extension().and_then(|e| e.to_str()) else {
            return Err(StegchatError::UnsupportedMedia);
        };
        match ext.to_lowercase().as_str() {
            "png" => {
                let img = image::open(f).map_err(|e| {
                    error!("Error loading carrier image {f:?}: {e}");
                    StegchatError::InvalidImageMedia
                })?;
                Ok(Self::from_dynamic(img))
            }
            _ => Err(StegchatError::UnsupportedMedia),
        }
    }

    /// decodes a PNG received over the wire
    pub fn from_png_bytes(bytes: &[u8]) -> Result<Self> {
        let img = image::load_from_memory_with_format(bytes, ImageFormat::Png).map_err(|e| {
            error!("Error decoding received image: {e}");
            StegchatError::InvalidImageMedia
        })?;
        Ok(Self::from_dynamic(img))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// number of color channels per pixel
    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// total number of bits available for header and payload at the given density
    pub fn capacity_bits(&self, density: u8) -> usize {
        self.pixel_count() * self.channels as usize * density as usize
    }

    /// channel values of the pixel at the raster index
    pub fn pixel(&self, index: usize) -> &[u8] {
        let c = self.channels as usize;
        &self.pixels[index * c..(index + 1) * c]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }

    pub(crate) fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    fn color_type(&self) -> ColorType {
        match self.channels {
            1 => ColorType::L8,
            2 => ColorType::La8,
            3 => ColorType::Rgb8,
            _ => ColorType::Rgba8,
        }
    }

    /// writes the image losslessly as PNG
    pub fn save_to_writer<W: Write>(&self, writer: W) -> Result<()> {
        PngEncoder::new(writer)
            .write_image(&self.pixels, self.width, self.height, self.color_type())
            .map_err(|e| {
                error!("Error saving image: {e}");
                StegchatError::ImageEncodingError
            })
    }

    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.save_to_writer(&mut buf)?;
        Ok(buf)
    }
}

impl Persist for CarrierImage {
    fn save_as(&self, file: &Path) -> Result<()> {
        let f = File::create(file).map_err(|e| {
            error!("Error creating file {file:?}: {e}");
            StegchatError::WriteError { source: e }
        })?;
        let mut writer = BufWriter::new(f);
        self.save_to_writer(&mut writer)?;
        writer
            .flush()
            .map_err(|source| StegchatError::WriteError { source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::prepare_rgb_image;
    use image::{ImageBuffer, LumaA, Rgba};
    use tempfile::TempDir;

    #[test]
    fn should_keep_rgb_layout() {
        let img = CarrierImage::from_dynamic(DynamicImage::ImageRgb8(prepare_rgb_image(4, 3)));

        assert_eq!(img.dimensions(), (4, 3));
        assert_eq!(img.channels(), 3);
        assert_eq!(img.pixel_count(), 12);
        assert_eq!(img.capacity_bits(2), 72);
    }

    #[test]
    fn should_address_pixels_in_raster_order() {
        let buf = ImageBuffer::from_fn(3, 2, |x, y| Rgba([x as u8, y as u8, 7, 255]));
        let img = CarrierImage::from_dynamic(DynamicImage::ImageRgba8(buf));

        // index = row * width + col
        assert_eq!(img.pixel(0), &[0, 0, 7, 255]);
        assert_eq!(img.pixel(2), &[2, 0, 7, 255]);
        assert_eq!(img.pixel(4), &[1, 1, 7, 255]);
    }

    #[test]
    fn should_keep_two_channel_images() {
        let buf = ImageBuffer::from_fn(2, 2, |x, _| LumaA([x as u8, 255]));
        let img = CarrierImage::from_dynamic(DynamicImage::ImageLumaA8(buf));

        assert_eq!(img.channels(), 2);
    }

    #[test]
    fn should_reject_inconsistent_raw_buffers() {
        assert!(matches!(
            CarrierImage::from_raw(2, 2, 3, vec![0; 11]),
            Err(StegchatError::InvalidImageMedia)
        ));
        assert!(matches!(
            CarrierImage::from_raw(1, 1, 5, vec![0; 5]),
            Err(StegchatError::InvalidImageMedia)
        ));
    }

    #[test]
    fn should_reject_non_png_files() {
        assert!(matches!(
            CarrierImage::from_file(Path::new("Cargo.toml")),
            Err(StegchatError::UnsupportedMedia)
        ));
        assert!(matches!(
            CarrierImage::from_file(Path::new("no-extension")),
            Err(StegchatError::UnsupportedMedia)
        ));
    }

    #[test]
    fn should_fail_on_missing_png() {
        assert!(matches!(
            CarrierImage::from_file(Path::new("some_random_file.png")),
            Err(StegchatError::InvalidImageMedia)
        ));
    }

    #[test]
    fn should_save_and_load_losslessly() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("carrier.png");
        let img = CarrierImage::from_dynamic(DynamicImage::ImageRgb8(prepare_rgb_image(7, 5)));

        img.save_as(&path).unwrap();
        let loaded = CarrierImage::from_file(&path).unwrap();

        assert_eq!(loaded, img);
    }

    #[test]
    fn should_decode_png_bytes_from_memory() {
        let img = CarrierImage::from_dynamic(DynamicImage::ImageRgb8(prepare_rgb_image(6, 6)));
        let bytes = img.to_png_bytes().unwrap();

        assert_eq!(&bytes[1..4], b"PNG");
        assert_eq!(CarrierImage::from_png_bytes(&bytes).unwrap(), img);
        assert!(matches!(
            CarrierImage::from_png_bytes(b"definitely not a png"),
            Err(StegchatError::InvalidImageMedia)
        ));
    }
}
