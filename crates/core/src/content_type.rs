//! Best-effort content type resolution

use std::path::Path;

/// Fallback when nothing better is known
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Content types accepted by `--validate-mime`
pub const UPLOADABLE_TYPES: &[&str] = &[
    "image/*",
    "video/*",
    "audio/*",
    "text/*",
    "application/pdf",
    "application/json",
];

// (magic prefix, content type)
const SIGNATURES: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"%PDF-", "application/pdf"),
    (b"\x1f\x8b", "application/gzip"),
    (b"PK\x03\x04", "application/zip"),
];

/// Resolve a content type from the file extension, then from the leading
/// bytes of the payload. Never fails.
pub fn resolve(path: &Path, head: &[u8]) -> String {
    from_extension(path).unwrap_or_else(|| sniff(head).unwrap_or(OCTET_STREAM).to_string())
}

/// Content type implied by the file extension alone
pub fn from_extension(path: &Path) -> Option<String> {
    mime_guess::from_path(path)
        .first()
        .map(|mime| mime.essence_str().to_string())
}

/// Match the payload against known magic numbers
pub fn sniff(head: &[u8]) -> Option<&'static str> {
    SIGNATURES
        .iter()
        .find(|(magic, _)| head.starts_with(magic))
        .map(|(_, mime)| *mime)
}

/// Check `content_type` against patterns like `image/*` or `application/pdf`
pub fn is_allowed(content_type: &str, allowed: &[&str]) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    allowed.iter().any(|pattern| match pattern.strip_suffix("/*") {
        Some(top_level) => essence
            .split_once('/')
            .map(|(kind, _)| kind == top_level)
            .unwrap_or(false),
        None => essence == *pattern,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_wins() {
        let png_bytes = b"\x89PNG\r\n\x1a\n....";
        assert_eq!(resolve(Path::new("report.pdf"), png_bytes), "application/pdf");
        assert_eq!(resolve(Path::new("notes.txt"), b""), "text/plain");
    }

    #[test]
    fn test_sniff_without_extension() {
        assert_eq!(resolve(Path::new("upload"), b"\x89PNG\r\n\x1a\nrest"), "image/png");
        assert_eq!(resolve(Path::new("upload"), b"\xff\xd8\xff\xe0"), "image/jpeg");
        assert_eq!(resolve(Path::new("upload"), b"%PDF-1.7"), "application/pdf");
        assert_eq!(resolve(Path::new("upload"), b"\x1f\x8b\x08"), "application/gzip");
    }

    #[test]
    fn test_unknown_defaults_to_octet_stream() {
        assert_eq!(resolve(Path::new("blob"), b"random"), OCTET_STREAM);
        assert_eq!(resolve(Path::new("blob"), b""), OCTET_STREAM);
    }

    #[test]
    fn test_is_allowed() {
        assert!(is_allowed("image/png", UPLOADABLE_TYPES));
        assert!(is_allowed("text/html; charset=utf-8", UPLOADABLE_TYPES));
        assert!(is_allowed("application/pdf", UPLOADABLE_TYPES));
        assert!(!is_allowed("application/x-msdownload", UPLOADABLE_TYPES));
        assert!(!is_allowed(OCTET_STREAM, UPLOADABLE_TYPES));
        assert!(!is_allowed("imagepng", UPLOADABLE_TYPES));
    }
}
