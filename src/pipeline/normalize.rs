//! Format normalisation: any decodable raster image → baseline JPEG.
//!
//! PDF viewers render a JPEG stream natively (`/DCTDecode`), so JPEG is the
//! one encoding the document builder needs. Inputs that already are an 8-bit
//! gray or RGB JPEG are copied byte-for-byte; re-encoding them would only add
//! generation loss. Everything else is decoded, flattened onto white if it
//! carries alpha, and encoded once.
//!
//! The source file is never touched: the result always lands in a fresh temp
//! file in the client's staging directory, which the cleanup stage removes.

use crate::error::SourceError;
use crate::pipeline::classify::{ClassifiedSource, SourceKind};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, RgbImage};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// A raster image in canonical encoding, ready to be placed on a page.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    /// Baseline JPEG bytes.
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// 1 (gray) or 3 (RGB).
    pub components: u8,
    /// Temp file holding `bytes`.
    pub path: PathBuf,
}

/// Header fields of a JPEG start-of-frame segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JpegFrame {
    pub marker: u8,
    pub precision: u8,
    pub width: u32,
    pub height: u32,
    pub components: u8,
}

impl JpegFrame {
    /// Whether the stream can be embedded as `/DCTDecode` without re-encoding:
    /// Huffman-coded (baseline, extended or progressive), 8-bit, gray or RGB.
    pub fn embeddable(&self) -> bool {
        matches!(self.marker, 0xC0..=0xC2)
            && self.precision == 8
            && matches!(self.components, 1 | 3)
            && self.width > 0
            && self.height > 0
    }
}

/// Walk the JPEG marker segments up to the first start-of-frame.
pub fn jpeg_frame(data: &[u8]) -> Option<JpegFrame> {
    if data.len() < 4 || data[0] != 0xFF || data[1] != 0xD8 {
        return None;
    }
    let mut i = 2;
    while i + 4 <= data.len() {
        if data[i] != 0xFF {
            return None;
        }
        let marker = data[i + 1];
        // Fill bytes and standalone markers carry no length.
        if marker == 0xFF {
            i += 1;
            continue;
        }
        i += 2;
        if matches!(marker, 0x01 | 0xD0..=0xD8) {
            continue;
        }
        let len = u16::from_be_bytes([data[i], data[i + 1]]) as usize;
        if len < 2 {
            return None;
        }
        match marker {
            0xC0..=0xCF if !matches!(marker, 0xC4 | 0xC8 | 0xCC) => {
                if i + 8 > data.len() {
                    return None;
                }
                return Some(JpegFrame {
                    marker,
                    precision: data[i + 2],
                    height: u16::from_be_bytes([data[i + 3], data[i + 4]]) as u32,
                    width: u16::from_be_bytes([data[i + 5], data[i + 6]]) as u32,
                    components: data[i + 7],
                });
            }
            // Scan data before any frame header: malformed.
            0xDA | 0xD9 => return None,
            _ => i += len,
        }
    }
    None
}

/// Normalise one classified image into the staging directory.
///
/// Decoding and encoding run in `spawn_blocking`; `timeout` bounds that part.
pub async fn normalize(
    source: &ClassifiedSource,
    staging_dir: &Path,
    quality: u8,
    timeout: Duration,
) -> Result<NormalizedImage, SourceError> {
    let name = source.file.original_name.clone();
    let SourceKind::Image(format) = source.kind else {
        return Err(SourceError::Unsupported {
            name,
            mime_type: source.file.mime_type.clone(),
        });
    };

    let input = source.bytes.clone();
    let task = tokio::task::spawn_blocking(move || to_canonical(&input, format, quality));
    let (bytes, frame) = match tokio::time::timeout(timeout, task).await {
        Err(_) => {
            return Err(SourceError::Timeout {
                name,
                millis: timeout.as_millis() as u64,
            })
        }
        Ok(Err(join)) => {
            return Err(SourceError::Unreadable {
                name,
                detail: format!("decoder panicked: {join}"),
            })
        }
        Ok(Ok(Err(detail))) => return Err(SourceError::Unreadable { name, detail }),
        Ok(Ok(Ok(out))) => out,
    };

    let path = write_staged(staging_dir, &bytes)
        .await
        .map_err(|e| SourceError::Unreadable {
            name: name.clone(),
            detail: format!("failed to stage normalised image: {e}"),
        })?;

    debug!(
        "Normalised '{}' ({:?}) → {}x{} JPEG at {}",
        name,
        format,
        frame.width,
        frame.height,
        path.display()
    );

    Ok(NormalizedImage {
        bytes,
        width: frame.width,
        height: frame.height,
        components: frame.components,
        path,
    })
}

/// Blocking core of [`normalize`]: returns canonical JPEG bytes and their frame.
pub fn to_canonical(
    bytes: &[u8],
    format: ImageFormat,
    quality: u8,
) -> Result<(Vec<u8>, JpegFrame), String> {
    // Full decode even on the fast path: a valid header on a truncated body
    // must still be rejected here rather than produce a broken page.
    let decoded = image::load_from_memory_with_format(bytes, format).map_err(|e| e.to_string())?;

    if format == ImageFormat::Jpeg {
        if let Some(frame) = jpeg_frame(bytes).filter(JpegFrame::embeddable) {
            return Ok((bytes.to_vec(), frame));
        }
    }

    let rgb = flatten_onto_white(decoded);
    let mut out = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality))
        .map_err(|e| e.to_string())?;
    let frame = jpeg_frame(&out).ok_or_else(|| "encoder produced no frame header".to_string())?;
    Ok((out, frame))
}

/// Drop alpha by compositing over white; transparent scans otherwise turn black.
fn flatten_onto_white(img: DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    let mut rgb = RgbImage::new(rgba.width(), rgba.height());
    for (dst, src) in rgb.pixels_mut().zip(rgba.pixels()) {
        let a = src[3] as u32;
        for c in 0..3 {
            dst[c] = ((src[c] as u32 * a + 255 * (255 - a) + 127) / 255) as u8;
        }
    }
    rgb
}

async fn write_staged(staging_dir: &Path, bytes: &[u8]) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(staging_dir).await?;
    let tmp = tempfile::Builder::new()
        .prefix("norm-")
        .suffix(".jpg")
        .tempfile_in(staging_dir)?;
    let path = tmp.into_temp_path().keep().map_err(|e| e.error)?;
    if let Err(e) = tokio::fs::write(&path, bytes).await {
        let _ = tokio::fs::remove_file(&path).await;
        return Err(e);
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submission::{Category, SourceFile};
    use image::{GrayImage, Luma, Rgb, Rgba, RgbaImage};
    use std::io::Cursor;

    fn encode(img: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
        buf
    }

    fn classified(bytes: Vec<u8>, format: ImageFormat) -> ClassifiedSource {
        ClassifiedSource {
            file: SourceFile::new("/tmp/in", Category::PersonalDocuments, "image/x", "in"),
            kind: SourceKind::Image(format),
            bytes,
        }
    }

    #[test]
    fn jpeg_input_is_copied_verbatim() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(30, 20, Rgb([10, 200, 30])));
        let jpeg = encode(&img, ImageFormat::Jpeg);
        let (out, frame) = to_canonical(&jpeg, ImageFormat::Jpeg, 90).unwrap();
        assert_eq!(out, jpeg);
        assert_eq!((frame.width, frame.height, frame.components), (30, 20, 3));
    }

    #[test]
    fn gray_jpeg_keeps_one_component() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 9, Luma([128])));
        let jpeg = encode(&img, ImageFormat::Jpeg);
        let (out, frame) = to_canonical(&jpeg, ImageFormat::Jpeg, 90).unwrap();
        assert_eq!(out, jpeg);
        assert_eq!(frame.components, 1);
    }

    #[test]
    fn png_is_reencoded_to_rgb_jpeg() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(17, 11, Rgba([0, 0, 0, 0])));
        let png = encode(&img, ImageFormat::Png);
        let (out, frame) = to_canonical(&png, ImageFormat::Png, 90).unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Jpeg);
        assert_eq!((frame.width, frame.height, frame.components), (17, 11, 3));

        // Fully transparent pixels become white, not black.
        let back = image::load_from_memory(&out).unwrap().to_rgb8();
        assert!(back.get_pixel(5, 5).0.iter().all(|&c| c > 240));
    }

    #[test]
    fn truncated_image_is_rejected() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(64, 64));
        let png = encode(&img, ImageFormat::Png);
        assert!(to_canonical(&png[..png.len() / 3], ImageFormat::Png, 90).is_err());
    }

    #[test]
    fn jpeg_frame_rejects_non_jpeg() {
        assert_eq!(jpeg_frame(b"\x89PNG\r\n\x1a\n"), None);
        assert_eq!(jpeg_frame(&[0xFF, 0xD8, 0xFF, 0xDA, 0x00, 0x02]), None);
    }

    #[test]
    fn frame_embeddable_rules() {
        let base = JpegFrame {
            marker: 0xC0,
            precision: 8,
            width: 1,
            height: 1,
            components: 3,
        };
        assert!(base.embeddable());
        assert!(!JpegFrame { components: 4, ..base }.embeddable());
        assert!(!JpegFrame { precision: 12, ..base }.embeddable());
        assert!(!JpegFrame { marker: 0xC9, ..base }.embeddable());
    }

    #[tokio::test]
    async fn normalize_writes_new_staged_file() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join(".staging");
        let img = DynamicImage::ImageRgb8(RgbImage::new(12, 7));
        let src = classified(encode(&img, ImageFormat::Bmp), ImageFormat::Bmp);

        let out = normalize(&src, &staging, 90, Duration::from_secs(10))
            .await
            .unwrap();
        assert!(out.path.starts_with(&staging));
        assert_eq!(std::fs::read(&out.path).unwrap(), out.bytes);
        assert_eq!((out.width, out.height), (12, 7));
    }

    #[tokio::test]
    async fn normalize_garbage_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let src = classified(b"\x89PNG\r\n\x1a\nnot really".to_vec(), ImageFormat::Png);
        let err = normalize(&src, dir.path(), 90, Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Unreadable { .. }));
        // Nothing staged for a failed file.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
