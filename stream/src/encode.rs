use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;

use crate::error::EncodeError;

const MAX_JPEG_SIDE: u32 = u16::MAX as u32;

/// Encode `image` as a baseline JPEG into `out`, replacing its contents.
///
/// 8-bit gray and RGB images are encoded as-is. Other gray layouts are
/// reduced to 8-bit gray, everything else is converted to RGB8 first.
/// On error `out` holds unspecified bytes.
pub fn encode_jpeg(image: &DynamicImage, quality: u8, out: &mut Vec<u8>) -> Result<(), EncodeError> {
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return Err(EncodeError::EmptyImage { width, height });
    }
    if width > MAX_JPEG_SIDE || height > MAX_JPEG_SIDE {
        return Err(EncodeError::TooLarge { width, height });
    }

    out.clear();
    let mut encoder = JpegEncoder::new_with_quality(&mut *out, quality.clamp(1, 100));
    match image {
        DynamicImage::ImageLuma8(gray) => encoder.encode_image(gray)?,
        DynamicImage::ImageRgb8(rgb) => encoder.encode_image(rgb)?,
        DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageLuma16(_)
        | DynamicImage::ImageLumaA16(_) => encoder.encode_image(&image.to_luma8())?,
        other => encoder.encode_image(&other.to_rgb8())?,
    }
    Ok(())
}
