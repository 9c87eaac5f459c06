//! Image geometry and loading for embedded report photos.
//!
//! Every photo is placed at a fixed 10 cm height with its width following
//! the aspect ratio; photos that would exceed the 15 cm text column are
//! clamped to 15 cm wide instead.

use crate::docx_common::EMU_PER_CM;
use std::io::Cursor;
use std::path::Path;

pub const TARGET_HEIGHT_CM: f64 = 10.0;
pub const MAX_WIDTH_CM: f64 = 15.0;
/// Pixels per centimetre at 96 dpi.
pub const PX_PER_CM: f64 = 96.0 / 2.54;
pub const JPEG_QUALITY: u8 = 95;

/// Display size of an embedded image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageSize {
    pub width_cm: f64,
    pub height_cm: f64,
}

impl ImageSize {
    pub fn width_emu(&self) -> u64 {
        (self.width_cm * EMU_PER_CM).round() as u64
    }

    pub fn height_emu(&self) -> u64 {
        (self.height_cm * EMU_PER_CM).round() as u64
    }
}

/// Size for a `px_w` x `px_h` image.
pub fn fit_image(px_w: u32, px_h: u32) -> ImageSize {
    let px_w = px_w.max(1) as f64;
    let px_h = px_h.max(1) as f64;
    let native_w_cm = px_w / PX_PER_CM;
    let native_h_cm = px_h / PX_PER_CM;

    let mut height_cm = TARGET_HEIGHT_CM;
    let mut width_cm = native_w_cm * (height_cm / native_h_cm);
    if width_cm > MAX_WIDTH_CM {
        width_cm = MAX_WIDTH_CM;
        height_cm = native_h_cm * (width_cm / native_w_cm);
    }
    ImageSize {
        width_cm,
        height_cm,
    }
}

/// Why an image could not be embedded.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageLoadError {
    Missing,
    Empty,
    Decode(String),
}

/// Image bytes ready to be stored under `word/media/`.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub data: Vec<u8>,
    /// `png` or `jpeg`
    pub extension: &'static str,
    pub width_px: u32,
    pub height_px: u32,
}

impl PreparedImage {
    pub fn size(&self) -> ImageSize {
        fit_image(self.width_px, self.height_px)
    }
}

/// Load an image for embedding.
///
/// PNG and JPEG files in RGB or grayscale are stored as-is. Anything else
/// (other formats, alpha, palette, 16-bit) is re-encoded as an RGB JPEG.
pub fn load_for_embedding(path: &Path) -> Result<PreparedImage, ImageLoadError> {
    let data = std::fs::read(path).map_err(|_| ImageLoadError::Missing)?;
    if data.is_empty() {
        return Err(ImageLoadError::Empty);
    }

    let reader = image::ImageReader::new(Cursor::new(data.as_slice()))
        .with_guessed_format()
        .map_err(|e| ImageLoadError::Decode(e.to_string()))?;
    let format = reader.format();
    let decoded = reader
        .decode()
        .map_err(|e| ImageLoadError::Decode(e.to_string()))?;
    let (width_px, height_px) = (decoded.width(), decoded.height());

    let native_extension = match format {
        Some(image::ImageFormat::Png) => Some("png"),
        Some(image::ImageFormat::Jpeg) => Some("jpeg"),
        _ => None,
    };
    let plain_color = matches!(
        decoded.color(),
        image::ColorType::Rgb8 | image::ColorType::L8
    );

    if let (Some(extension), true) = (native_extension, plain_color) {
        return Ok(PreparedImage {
            data,
            extension,
            width_px,
            height_px,
        });
    }

    let rgb = decoded.to_rgb8();
    let mut out = Vec::new();
    let mut encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    encoder
        .encode_image(&rgb)
        .map_err(|e| ImageLoadError::Decode(e.to_string()))?;
    log::debug!("re-encoded {} as JPEG", path.display());
    Ok(PreparedImage {
        data: out,
        extension: "jpeg",
        width_px,
        height_px,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_landscape_keeps_height() {
        // 4:3 at 10 cm tall is 13.33 cm wide, under the limit
        let size = fit_image(800, 600);
        assert!(approx(size.height_cm, 10.0));
        assert!(approx(size.width_cm, 40.0 / 3.0));
        assert_eq!(size.height_emu(), 3_600_000);
    }

    #[test]
    fn test_wide_image_clamped_to_max_width() {
        // 2:1 would be 20 cm wide
        let size = fit_image(2000, 1000);
        assert!(approx(size.width_cm, 15.0));
        assert!(approx(size.height_cm, 7.5));
        assert_eq!(size.width_emu(), 5_400_000);
    }

    #[test]
    fn test_portrait_and_tiny_images() {
        let size = fit_image(600, 800);
        assert!(approx(size.height_cm, 10.0));
        assert!(approx(size.width_cm, 7.5));

        let tiny = fit_image(1, 1);
        assert!(approx(tiny.height_cm, 10.0));
        assert!(approx(tiny.width_cm, 10.0));
    }

    #[test]
    fn test_load_missing_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.jpg");
        assert_eq!(load_for_embedding(&missing).unwrap_err(), ImageLoadError::Missing);

        let empty = dir.path().join("empty.jpg");
        std::fs::write(&empty, b"").unwrap();
        assert_eq!(load_for_embedding(&empty).unwrap_err(), ImageLoadError::Empty);

        let junk = dir.path().join("junk.png");
        std::fs::write(&junk, b"not an image at all").unwrap();
        assert!(matches!(
            load_for_embedding(&junk),
            Err(ImageLoadError::Decode(_))
        ));
    }

    #[test]
    fn test_rgb_png_kept_and_rgba_reencoded() {
        let dir = tempfile::tempdir().unwrap();

        let rgb_path = dir.path().join("rgb.png");
        image::RgbImage::from_pixel(4, 2, image::Rgb([10, 20, 30]))
            .save(&rgb_path)
            .unwrap();
        let rgb = load_for_embedding(&rgb_path).unwrap();
        assert_eq!(rgb.extension, "png");
        assert_eq!(rgb.data, std::fs::read(&rgb_path).unwrap());
        assert_eq!((rgb.width_px, rgb.height_px), (4, 2));

        let rgba_path = dir.path().join("rgba.png");
        image::RgbaImage::from_pixel(3, 3, image::Rgba([10, 20, 30, 128]))
            .save(&rgba_path)
            .unwrap();
        let rgba = load_for_embedding(&rgba_path).unwrap();
        assert_eq!(rgba.extension, "jpeg");
        assert_eq!(&rgba.data[..2], &[0xFF, 0xD8]);
    }
}
