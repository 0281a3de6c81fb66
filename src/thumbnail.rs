use image::codecs::jpeg::JpegEncoder;
use image::ImageEncoder;

use crate::error::Result;

pub const THUMBNAIL_WIDTH: u32 = 300;
pub const THUMBNAIL_HEIGHT: u32 = 400;
pub const THUMBNAIL_QUALITY: u8 = 85;

/// Fits the image inside 300x400 keeping aspect ratio and re-encodes it as JPEG.
pub fn generate_thumbnail(bytes: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes)?;
    // Never upscale
    let thumb = if img.width() <= THUMBNAIL_WIDTH && img.height() <= THUMBNAIL_HEIGHT {
        img.to_rgb8()
    } else {
        img.thumbnail(THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT).to_rgb8()
    };

    let mut jpeg_bytes: Vec<u8> = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg_bytes, THUMBNAIL_QUALITY).write_image(
        thumb.as_raw(),
        thumb.width(),
        thumb.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(jpeg_bytes)
}
