//! Content-type classification of fetched resources.

use image::ImageFormat;

const OCTET_STREAM: &str = "application/octet-stream";
const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const SNIFF_WINDOW: usize = 512;

/// Transform family a content type belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Css,
    JavaScript,
    RasterImage(ImageFormat),
    Other,
}

impl ContentKind {
    pub fn of(content_type: &str) -> Self {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "text/css" => ContentKind::Css,
            "application/javascript" | "text/javascript" | "application/x-javascript" => {
                ContentKind::JavaScript
            }
            other => match ImageFormat::from_mime_type(other) {
                Some(format) if is_supported_raster(format) => ContentKind::RasterImage(format),
                _ => ContentKind::Other,
            },
        }
    }
}

fn is_supported_raster(format: ImageFormat) -> bool {
    matches!(
        format,
        ImageFormat::Png
            | ImageFormat::Jpeg
            | ImageFormat::Gif
            | ImageFormat::WebP
            | ImageFormat::Bmp
    )
}

/// Content type from the path's extension, falling back to sniffing the body.
pub fn classify(resource_path: &str, body: &[u8]) -> String {
    match mime_guess::from_path(resource_path).first_raw() {
        Some(mime) => mime.to_string(),
        None => sniff(body).to_string(),
    }
}

/// Best-effort detection from leading bytes.
pub fn sniff(body: &[u8]) -> &'static str {
    if let Ok(format) = image::guess_format(body) {
        return format.to_mime_type();
    }

    let window = &body[..body.len().min(SNIFF_WINDOW)];
    let text = trim_leading_whitespace(window);
    let lowered: Vec<u8> = text.iter().take(64).map(u8::to_ascii_lowercase).collect();

    if lowered.starts_with(b"<!doctype html") || lowered.starts_with(b"<html") {
        return "text/html; charset=utf-8";
    }
    if lowered.starts_with(b"<svg") {
        return "image/svg+xml";
    }
    if lowered.starts_with(b"<?xml") {
        return "text/xml; charset=utf-8";
    }
    if body.starts_with(b"%PDF-") {
        return "application/pdf";
    }
    if body.starts_with(&[0x1f, 0x8b, 0x08]) {
        return "application/x-gzip";
    }
    if body.starts_with(b"PK\x03\x04") {
        return "application/zip";
    }
    if is_text(window) {
        return TEXT_PLAIN;
    }
    OCTET_STREAM
}

fn trim_leading_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    &bytes[start..]
}

fn is_text(window: &[u8]) -> bool {
    let valid = match std::str::from_utf8(window) {
        Ok(_) => true,
        // A multi-byte character cut by the window is still text.
        Err(err) => err.error_len().is_none(),
    };
    valid
        && !window
            .iter()
            .any(|b| b.is_ascii_control() && !b.is_ascii_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_wins_over_body() {
        assert_eq!(classify("/a.css", b"\x89PNG\r\n\x1a\n"), "text/css");
        assert_eq!(classify("/img/photo.jpg", b"not really a jpeg"), "image/jpeg");
    }

    #[test]
    fn unknown_extension_falls_back_to_sniffing() {
        let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
        assert_eq!(classify("/img/avatar", png), "image/png");
        assert_eq!(classify("/download.unknownext", b"%PDF-1.7"), "application/pdf");
        assert_eq!(classify("/index", b"  <!DOCTYPE html><html>"), "text/html; charset=utf-8");
        assert_eq!(classify("/readme", b"hello world\n"), TEXT_PLAIN);
        assert_eq!(classify("/blob", &[0u8, 1, 2, 3, 0xff]), OCTET_STREAM);
    }

    #[test]
    fn kinds_cover_transformable_types() {
        assert_eq!(ContentKind::of("text/css"), ContentKind::Css);
        assert_eq!(ContentKind::of("text/css; charset=utf-8"), ContentKind::Css);
        assert_eq!(ContentKind::of("application/javascript"), ContentKind::JavaScript);
        assert_eq!(ContentKind::of("text/javascript"), ContentKind::JavaScript);
        assert_eq!(
            ContentKind::of("image/png"),
            ContentKind::RasterImage(ImageFormat::Png)
        );
        assert_eq!(
            ContentKind::of("image/jpeg"),
            ContentKind::RasterImage(ImageFormat::Jpeg)
        );
        assert_eq!(ContentKind::of("image/svg+xml"), ContentKind::Other);
        assert_eq!(ContentKind::of("text/html"), ContentKind::Other);
    }
}
