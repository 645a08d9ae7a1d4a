//! Extension to MIME type table for callers feeding `Writer::add`.

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_HTML: &str = "text/html";
pub const MIME_CSS: &str = "text/css";
pub const MIME_JS: &str = "application/javascript";

pub const MIME_TYPES: &[(&str, &str)] = &[
    ("html", MIME_HTML),
    ("txt", MIME_TEXT),
    ("js", MIME_JS),
    ("css", MIME_CSS),
    ("json", "application/json"),
    ("woff", "application/font-woff"),
    ("svg", "image/svg+xml"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("ttf", "application/x-font-ttf"),
    ("otf", "application/x-font-opentype"),
];

/// Look up the MIME type for a file extension (without the dot).
pub fn mime_type_for_extension(extension: &str) -> Option<&'static str> {
    MIME_TYPES
        .iter()
        .find(|(ext, _)| ext.eq_ignore_ascii_case(extension))
        .map(|(_, mime)| *mime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extensions() {
        assert_eq!(mime_type_for_extension("html"), Some("text/html"));
        assert_eq!(mime_type_for_extension("JPEG"), Some("image/jpeg"));
        assert_eq!(mime_type_for_extension("exe"), None);
    }
}
