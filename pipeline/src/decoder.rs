use frame_distill_common::config::OutputFormat;
use frame_distill_common::frame::SampledFrame;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, ImageReader, RgbaImage};
use std::io::Cursor;

/// A sampled frame decoded to an RGBA raster.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub pixels: RgbaImage,
}

impl DecodedFrame {
    pub fn new(index: u32, pixels: RgbaImage) -> Self {
        let (width, height) = pixels.dimensions();
        Self {
            index,
            width,
            height,
            pixels,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("could not read image header: {0}")]
    Header(#[from] std::io::Error),
    #[error("malformed or unsupported image data: {0}")]
    Image(#[from] image::ImageError),
    #[error("image has no pixels")]
    Empty,
    #[error("decode worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, thiserror::Error)]
#[error("failed to encode frame {index}: {source}")]
pub struct EncodeError {
    pub index: u32,
    pub source: image::ImageError,
}

/// Decode one sampled still image. The container format is sniffed from the bytes.
///
/// Pure and free of shared state, so it is safe to run on many frames at once.
pub fn decode(frame: &SampledFrame) -> Result<DecodedFrame, DecodeError> {
    let img = ImageReader::new(Cursor::new(frame.encoded.as_ref()))
        .with_guessed_format()?
        .decode()?;

    let pixels = img.into_rgba8();
    if pixels.width() == 0 || pixels.height() == 0 {
        return Err(DecodeError::Empty);
    }
    Ok(DecodedFrame::new(frame.index, pixels))
}

/// Re-encode a decoded raster for output.
pub fn encode(
    frame: &DecodedFrame,
    format: OutputFormat,
    jpeg_quality: u8,
) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Cursor::new(Vec::new());
    let written = match format {
        OutputFormat::Png => frame.pixels.write_to(&mut buf, ImageFormat::Png),
        OutputFormat::Jpeg => {
            // JPEG carries no alpha channel.
            let rgb = DynamicImage::ImageRgba8(frame.pixels.clone()).into_rgb8();
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, jpeg_quality))
        }
    };
    written.map_err(|source| EncodeError {
        index: frame.index,
        source,
    })?;
    Ok(buf.into_inner())
}
