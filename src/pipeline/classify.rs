//! Content probing and batch partitioning.
//!
//! The declared mime type comes from the client and is only a hint. Every
//! decision with correctness implications (re-encode or copy, image page or
//! verbatim PDF pages) is taken from the file's leading bytes instead.

use crate::error::SourceError;
use crate::submission::{Category, SourceFile};
use image::ImageFormat;
use std::collections::BTreeMap;
use tracing::debug;

/// PDF files may carry junk before the header; readers accept it within the
/// first kilobyte.
const PDF_HEADER_WINDOW: usize = 1024;

/// What a file actually contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// A raster image in a format this build can decode.
    Image(ImageFormat),
    /// A structured document (PDF).
    Document,
}

/// An upload whose bytes have been read and probed.
#[derive(Debug, Clone)]
pub struct ClassifiedSource {
    pub file: SourceFile,
    pub kind: SourceKind,
    pub bytes: Vec<u8>,
}

/// Decide what `bytes` contain. `None` means neither a decodable image nor a PDF.
///
/// Image signatures sit at offset zero and are checked first: image metadata
/// such as a JPEG comment may contain the text `%PDF-`.
pub fn probe(bytes: &[u8]) -> Option<SourceKind> {
    if let Ok(format) = image::guess_format(bytes) {
        if format.reading_enabled() {
            return Some(SourceKind::Image(format));
        }
    }
    is_pdf(bytes).then_some(SourceKind::Document)
}

/// Whether a `%PDF-` header appears within the first kilobyte.
pub fn is_pdf(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(PDF_HEADER_WINDOW)];
    window.windows(5).any(|w| w == b"%PDF-")
}

/// Read an upload from disk and probe its content.
pub async fn classify(file: &SourceFile) -> Result<ClassifiedSource, SourceError> {
    let bytes = tokio::fs::read(&file.temporary_path)
        .await
        .map_err(|e| SourceError::Unreadable {
            name: file.original_name.clone(),
            detail: e.to_string(),
        })?;

    let kind = probe(&bytes).ok_or_else(|| SourceError::Unsupported {
        name: file.original_name.clone(),
        mime_type: file.mime_type.clone(),
    })?;

    let declared_image = file.declares_image();
    let is_image = matches!(kind, SourceKind::Image(_));
    if declared_image != is_image {
        debug!(
            "'{}' declared as '{}' but content is {:?}; trusting content",
            file.original_name, file.mime_type, kind
        );
    }

    Ok(ClassifiedSource {
        file: file.clone(),
        kind,
        bytes,
    })
}

/// Group files by declared category, keeping upload order within each group.
pub fn partition(files: &[SourceFile]) -> BTreeMap<Category, Vec<SourceFile>> {
    let mut groups: BTreeMap<Category, Vec<SourceFile>> = BTreeMap::new();
    for file in files {
        groups
            .entry(file.declared_category)
            .or_default()
            .push(file.clone());
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn probes_png() {
        assert_eq!(probe(&png_bytes()), Some(SourceKind::Image(ImageFormat::Png)));
    }

    #[test]
    fn probes_pdf_with_leading_junk() {
        let mut bytes = b"\r\n\x00garbage".to_vec();
        bytes.extend_from_slice(b"%PDF-1.7\n...");
        assert_eq!(probe(&bytes), Some(SourceKind::Document));
    }

    #[test]
    fn jpeg_mentioning_pdf_header_in_comment_stays_image() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(8, 8));
        let mut jpeg = Vec::new();
        img.write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .unwrap();

        // COM segment right after SOI.
        let comment = b"scanned from %PDF-export tool";
        let len = (comment.len() + 2) as u16;
        let mut bytes = jpeg[..2].to_vec();
        bytes.extend_from_slice(&[0xFF, 0xFE]);
        bytes.extend_from_slice(&len.to_be_bytes());
        bytes.extend_from_slice(comment);
        bytes.extend_from_slice(&jpeg[2..]);

        assert!(is_pdf(&bytes));
        assert!(image::load_from_memory(&bytes).is_ok());
        assert_eq!(probe(&bytes), Some(SourceKind::Image(ImageFormat::Jpeg)));
    }

    #[test]
    fn rejects_text() {
        assert_eq!(probe(b"hello, world"), None);
        assert_eq!(probe(b""), None);
    }

    #[test]
    fn partition_keeps_upload_order() {
        let f = |name: &str, c| SourceFile::new(format!("/tmp/{name}"), c, "image/png", name);
        let files = vec![
            f("a", Category::BankStatement),
            f("b", Category::PersonalDocuments),
            f("c", Category::BankStatement),
        ];
        let groups = partition(&files);
        assert_eq!(groups.len(), 2);
        let bank: Vec<_> = groups[&Category::BankStatement]
            .iter()
            .map(|f| f.original_name.as_str())
            .collect();
        assert_eq!(bank, ["a", "c"]);
    }

    #[tokio::test]
    async fn classify_trusts_content_over_mime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.bin");
        std::fs::write(&path, png_bytes()).unwrap();
        let file = SourceFile::new(&path, Category::SpouseDocuments, "application/pdf", "x.pdf");
        let classified = classify(&file).await.unwrap();
        assert_eq!(classified.kind, SourceKind::Image(ImageFormat::Png));
    }

    #[tokio::test]
    async fn classify_missing_file_is_unreadable() {
        let file = SourceFile::new(
            "/definitely/not/here.png",
            Category::SpouseDocuments,
            "image/png",
            "here.png",
        );
        let err = classify(&file).await.unwrap_err();
        assert!(matches!(err, SourceError::Unreadable { .. }));
    }
}
