use std::io::Cursor;
use std::path::Path;

use bitstream_io::{BitRead, BitReader, BitWrite, BitWriter, LittleEndian};
use log::{debug, warn};

use crate::error::StegchatError;
use crate::media::{CarrierImage, Persist, TranscoderOptions, HEADER_BITS};
use crate::result::Result;
use crate::stego::permutation::PermutationOrder;

/// Largest payload the 16 bit length header can describe
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Embeds and extracts byte payloads in the low order bits of a carrier image.
///
/// The payload is prefixed by a 16 bit length header that always lives in the first
/// pixels in raster order. Without a key the payload continues right after the header
/// bits, with a key it is written into a keyed permutation of the pixels that follow
/// the header pixels.
///
/// ## Example of usage
/// ```rust
/// use image::{DynamicImage, ImageBuffer, Rgb};
/// use stegchat_core::{CarrierImage, StegoTranscoder, TranscoderOptions};
///
/// let carrier = CarrierImage::from_dynamic(DynamicImage::ImageRgb8(ImageBuffer::from_fn(
///     32,
///     32,
///     |x, y| Rgb([x as u8, y as u8, 128]),
/// )));
/// let transcoder = StegoTranscoder::new(TranscoderOptions::default().with_key("s3cr3t"))
///     .expect("valid options");
///
/// let secret = transcoder
///     .encode(b"Hello World!", &carrier)
///     .expect("Cannot hide the message");
/// assert_eq!(transcoder.decode(&secret).unwrap(), b"Hello World!");
/// ```
#[derive(Debug, Clone, Default)]
pub struct StegoTranscoder {
    options: TranscoderOptions,
}

impl StegoTranscoder {
    pub fn new(options: TranscoderOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { options })
    }

    pub fn options(&self) -> &TranscoderOptions {
        &self.options
    }

    fn bits_per_pixel(&self, image: &CarrierImage) -> usize {
        image.channels() as usize * self.options.density as usize
    }

    fn header_pixels(&self, image: &CarrierImage) -> usize {
        HEADER_BITS.div_ceil(self.bits_per_pixel(image))
    }

    /// number of payload bytes the carrier can hold with the current options
    pub fn capacity(&self, image: &CarrierImage) -> usize {
        let bits = match self.options.key {
            None => image
                .capacity_bits(self.options.density)
                .saturating_sub(HEADER_BITS),
            Some(_) => {
                image
                    .pixel_count()
                    .saturating_sub(self.header_pixels(image))
                    * self.bits_per_pixel(image)
            }
        };

        (bits / 8).min(MAX_PAYLOAD_LEN)
    }

    /// hides `payload` in a copy of `carrier`, the carrier itself is left untouched
    pub fn encode(&self, payload: &[u8], carrier: &CarrierImage) -> Result<CarrierImage> {
        let density = self.options.density;
        let available = carrier.capacity_bits(density);
        let payload_bits = payload.len() * 8;
        let needed = HEADER_BITS + payload_bits;

        if needed > available || payload.len() > MAX_PAYLOAD_LEN {
            return Err(StegchatError::CapacityExceeded { needed, available });
        }

        let channels = carrier.channels() as usize;
        let bpp = self.bits_per_pixel(carrier);
        let header_pixels = self.header_pixels(carrier);

        let mut data = Vec::with_capacity(2 + payload.len());
        data.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        data.extend_from_slice(payload);
        let mut bits = BitReader::endian(Cursor::new(data.as_slice()), LittleEndian);

        match &self.options.key {
            None => {
                let mut image = carrier.clone();
                embed_bits(
                    image.as_bytes_mut(),
                    slots(0..carrier.pixel_count(), channels, density),
                    &mut bits,
                    needed,
                    density,
                )?;
                debug!("hid {} bytes in raster order", payload.len());
                Ok(image)
            }
            Some(key) => {
                let payload_pixels = payload_bits.div_ceil(bpp);
                if header_pixels + payload_pixels > carrier.pixel_count() {
                    return Err(StegchatError::CapacityExceeded {
                        needed: (header_pixels + payload_pixels) * bpp,
                        available,
                    });
                }
                let order = PermutationOrder::new(
                    key,
                    payload_bits as u32,
                    carrier.dimensions(),
                    header_pixels,
                    payload_pixels,
                )?;

                let mut image = carrier.clone();
                let buf = image.as_bytes_mut();
                embed_bits(
                    buf,
                    slots(0..header_pixels, channels, density),
                    &mut bits,
                    HEADER_BITS,
                    density,
                )?;
                embed_bits(
                    buf,
                    slots(order.indices().iter().copied(), channels, density),
                    &mut bits,
                    payload_bits,
                    density,
                )?;
                debug!(
                    "hid {} bytes in {} permuted pixels",
                    payload.len(),
                    order.len()
                );
                Ok(image)
            }
        }
    }

    /// recovers the payload announced by the length header.
    ///
    /// There is no checksum: a damaged header yields a read of the wrong length, which
    /// is clamped to what the image can hold.
    pub fn decode(&self, image: &CarrierImage) -> Result<Vec<u8>> {
        let density = self.options.density;
        let channels = image.channels() as usize;
        let bpp = self.bits_per_pixel(image);
        let capacity = image.capacity_bits(density);
        if capacity < HEADER_BITS {
            return Err(StegchatError::InvalidImageMedia);
        }

        let buf = image.as_bytes();
        let mut raster = slots(0..image.pixel_count(), channels, density);
        let header = extract_bytes(buf, raster.by_ref(), HEADER_BITS)?;
        let payload_bits = u16::from_le_bytes([header[0], header[1]]) as usize * 8;

        let payload = match &self.options.key {
            None => {
                let bits = clamp_bits(payload_bits, capacity - HEADER_BITS);
                extract_bytes(buf, raster, bits)?
            }
            Some(key) => {
                let header_pixels = self.header_pixels(image);
                let order = PermutationOrder::new(
                    key,
                    payload_bits as u32,
                    image.dimensions(),
                    header_pixels,
                    payload_bits.div_ceil(bpp),
                )?;
                let bits = clamp_bits(payload_bits, order.len() * bpp);
                extract_bytes(
                    buf,
                    slots(order.indices().iter().copied(), channels, density),
                    bits,
                )?
            }
        };

        debug!("unveiled {} bytes", payload.len());
        Ok(payload)
    }

    /// reads the carrier from `input`, hides `payload` and writes the result as PNG to `output`
    pub fn encode_file(&self, payload: &[u8], input: &Path, output: &Path) -> Result<()> {
        let carrier = CarrierImage::from_file(input)?;
        self.encode(payload, &carrier)?.save_as(output)
    }

    pub fn decode_file(&self, input: &Path) -> Result<Vec<u8>> {
        self.decode(&CarrierImage::from_file(input)?)
    }
}

/// every `(byte offset, bit position)` a pixel sequence offers, channel by channel,
/// least significant bit first
fn slots<I>(pixels: I, channels: usize, density: u8) -> impl Iterator<Item = (usize, u8)>
where
    I: Iterator<Item = usize>,
{
    pixels.flat_map(move |pixel| {
        (0..channels)
            .flat_map(move |channel| (0..density).map(move |bit| (pixel * channels + channel, bit)))
    })
}

fn low_bits_mask(density: u8) -> u8 {
    ((1u16 << density) - 1) as u8
}

fn clamp_bits(wanted: usize, available: usize) -> usize {
    if wanted > available {
        warn!("length header announces {wanted} bits but only {available} are available");
    }
    let bits = wanted.min(available);
    bits - bits % 8
}

fn embed_bits<I>(
    buf: &mut [u8],
    slots: I,
    bits: &mut BitReader<Cursor<&[u8]>, LittleEndian>,
    count: usize,
    density: u8,
) -> Result<()>
where
    I: Iterator<Item = (usize, u8)>,
{
    let mask = low_bits_mask(density);
    for (offset, bit_pos) in slots.take(count) {
        let bit = bits
            .read_bit()
            .map_err(|_| StegchatError::ImageEncodingError)?;
        let color = &mut buf[offset];
        if bit_pos == 0 {
            *color &= !mask;
        }
        *color |= (bit as u8) << bit_pos;
    }

    Ok(())
}

fn extract_bytes<I>(buf: &[u8], slots: I, count: usize) -> Result<Vec<u8>>
where
    I: Iterator<Item = (usize, u8)>,
{
    let mut writer = BitWriter::endian(Vec::with_capacity(count / 8), LittleEndian);
    for (offset, bit_pos) in slots.take(count) {
        writer
            .write_bit((buf[offset] >> bit_pos) & 1 == 1)
            .map_err(|_| StegchatError::InvalidImageMedia)?;
    }

    Ok(writer.into_writer())
}
