//! MIME classification by extension, by declared type, and by content sniffing.

use std::path::Path;

use crate::attachment::model::ContentBlockMode;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_OCTET_STREAM: &str = "application/octet-stream";
pub const MIME_TEXT_PLAIN: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_HTML: &str = "text/html";

/// How a local file or remote resource is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    /// Readable as UTF-8 text.
    Text,
    /// Raster image a provider can take inline.
    Image,
    /// Binary document (PDF, office formats).
    Document,
    /// Anything else.
    Other,
}

/// (extension, mime, bucket)
const EXTENSIONS: &[(&str, &str, Bucket)] = &[
    ("txt", "text/plain", Bucket::Text),
    ("text", "text/plain", Bucket::Text),
    ("log", "text/plain", Bucket::Text),
    ("md", "text/markdown", Bucket::Text),
    ("markdown", "text/markdown", Bucket::Text),
    ("rst", "text/x-rst", Bucket::Text),
    ("csv", "text/csv", Bucket::Text),
    ("tsv", "text/tab-separated-values", Bucket::Text),
    ("json", "application/json", Bucket::Text),
    ("jsonl", "application/jsonl", Bucket::Text),
    ("yaml", "application/yaml", Bucket::Text),
    ("yml", "application/yaml", Bucket::Text),
    ("toml", "application/toml", Bucket::Text),
    ("xml", "application/xml", Bucket::Text),
    ("svg", "image/svg+xml", Bucket::Text),
    ("html", "text/html", Bucket::Text),
    ("htm", "text/html", Bucket::Text),
    ("css", "text/css", Bucket::Text),
    ("js", "text/javascript", Bucket::Text),
    ("mjs", "text/javascript", Bucket::Text),
    ("ts", "text/x-typescript", Bucket::Text),
    ("tsx", "text/x-typescript", Bucket::Text),
    ("jsx", "text/javascript", Bucket::Text),
    ("py", "text/x-python", Bucket::Text),
    ("rs", "text/x-rust", Bucket::Text),
    ("go", "text/x-go", Bucket::Text),
    ("java", "text/x-java", Bucket::Text),
    ("kt", "text/x-kotlin", Bucket::Text),
    ("swift", "text/x-swift", Bucket::Text),
    ("c", "text/x-c", Bucket::Text),
    ("h", "text/x-c", Bucket::Text),
    ("cc", "text/x-c++", Bucket::Text),
    ("cpp", "text/x-c++", Bucket::Text),
    ("hpp", "text/x-c++", Bucket::Text),
    ("cs", "text/x-csharp", Bucket::Text),
    ("rb", "text/x-ruby", Bucket::Text),
    ("php", "text/x-php", Bucket::Text),
    ("lua", "text/x-lua", Bucket::Text),
    ("sh", "text/x-shellscript", Bucket::Text),
    ("bash", "text/x-shellscript", Bucket::Text),
    ("zsh", "text/x-shellscript", Bucket::Text),
    ("sql", "application/sql", Bucket::Text),
    ("proto", "text/plain", Bucket::Text),
    ("graphql", "application/graphql", Bucket::Text),
    ("ini", "text/plain", Bucket::Text),
    ("cfg", "text/plain", Bucket::Text),
    ("conf", "text/plain", Bucket::Text),
    ("env", "text/plain", Bucket::Text),
    ("png", "image/png", Bucket::Image),
    ("jpg", "image/jpeg", Bucket::Image),
    ("jpeg", "image/jpeg", Bucket::Image),
    ("gif", "image/gif", Bucket::Image),
    ("webp", "image/webp", Bucket::Image),
    ("bmp", "image/bmp", Bucket::Image),
    ("pdf", MIME_PDF, Bucket::Document),
    ("doc", "application/msword", Bucket::Document),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Bucket::Document,
    ),
    ("xls", "application/vnd.ms-excel", Bucket::Document),
    (
        "xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Bucket::Document,
    ),
    ("ppt", "application/vnd.ms-powerpoint", Bucket::Document),
    (
        "pptx",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        Bucket::Document,
    ),
    ("odt", "application/vnd.oasis.opendocument.text", Bucket::Document),
    ("rtf", "application/rtf", Bucket::Document),
    ("epub", "application/epub+zip", Bucket::Document),
];

fn lookup(ext: &str) -> Option<(&'static str, Bucket)> {
    let ext = ext.trim_start_matches('.').to_ascii_lowercase();
    EXTENSIONS
        .iter()
        .find(|(e, _, _)| *e == ext)
        .map(|(_, m, b)| (*m, *b))
}

pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    lookup(ext).map(|(m, _)| m)
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(mime_for_extension)
}

/// Bucket by extension. `None` when the path has no extension at all,
/// which callers resolve by sniffing the content.
pub fn bucket_for_path(path: &Path) -> Option<Bucket> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => Some(lookup(ext).map(|(_, b)| b).unwrap_or(Bucket::Other)),
        None => None,
    }
}

/// Lowercased type without parameters.
pub fn normalize_mime(raw: &str) -> String {
    raw.split(';').next().unwrap_or("").trim().to_ascii_lowercase()
}

pub fn is_html_mime(mime: &str) -> bool {
    let m = normalize_mime(mime);
    m == MIME_HTML || m == "application/xhtml+xml"
}

pub fn is_text_mime(mime: &str) -> bool {
    let m = normalize_mime(mime);
    if m.starts_with("text/") {
        return true;
    }
    matches!(
        m.as_str(),
        "application/json"
            | "application/jsonl"
            | "application/xml"
            | "application/yaml"
            | "application/x-yaml"
            | "application/toml"
            | "application/javascript"
            | "application/sql"
            | "application/graphql"
            | "image/svg+xml"
    ) || m.ends_with("+json")
        || m.ends_with("+xml")
}

pub fn bucket_for_mime(mime: &str) -> Bucket {
    let m = normalize_mime(mime);
    if is_text_mime(&m) {
        Bucket::Text
    } else if m.starts_with("image/") {
        Bucket::Image
    } else if EXTENSIONS
        .iter()
        .any(|(_, em, b)| *b == Bucket::Document && *em == m)
    {
        Bucket::Document
    } else {
        Bucket::Other
    }
}

/// Default mode for a local file: text for text, image for images, file for
/// documents, not-readable otherwise. Extension-less files start as text and
/// are sniffed at build time.
pub fn default_mode_for_path(path: &Path) -> ContentBlockMode {
    match bucket_for_path(path) {
        None | Some(Bucket::Text) => ContentBlockMode::Text,
        Some(Bucket::Image) => ContentBlockMode::Image,
        Some(Bucket::Document) => ContentBlockMode::File,
        Some(Bucket::Other) => ContentBlockMode::NotReadable,
    }
}

/// Guess a MIME type from leading bytes. At most the first 512 bytes are
/// considered.
pub fn sniff(bytes: &[u8]) -> &'static str {
    let head = &bytes[..bytes.len().min(512)];
    if head.is_empty() {
        return MIME_TEXT_PLAIN;
    }
    if let Ok(format) = image::guess_format(head) {
        return format.to_mime_type();
    }
    if head.starts_with(b"%PDF-") {
        return MIME_PDF;
    }
    if head.starts_with(b"PK\x03\x04") {
        return "application/zip";
    }

    let trimmed = trim_ascii_start(head);
    let lower: Vec<u8> = trimmed
        .iter()
        .take(16)
        .map(|b| b.to_ascii_lowercase())
        .collect();
    if lower.starts_with(b"<!doctype html")
        || lower.starts_with(b"<html")
        || lower.starts_with(b"<head")
        || lower.starts_with(b"<body")
    {
        return MIME_HTML;
    }
    if lower.starts_with(b"<?xml") {
        return "text/xml";
    }

    if looks_like_text(head) {
        MIME_TEXT_PLAIN
    } else {
        MIME_OCTET_STREAM
    }
}

fn trim_ascii_start(bytes: &[u8]) -> &[u8] {
    let skip = bytes
        .iter()
        .take_while(|b| b.is_ascii_whitespace())
        .count();
    let rest = &bytes[skip..];
    rest.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(rest)
}

/// UTF-8 (tolerating a sequence cut at the end of the window) with no
/// control bytes besides common whitespace.
pub fn looks_like_text(bytes: &[u8]) -> bool {
    let valid = match std::str::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) if e.error_len().is_none() => {
            // Truncated multibyte sequence at the end of the window.
            match std::str::from_utf8(&bytes[..e.valid_up_to()]) {
                Ok(s) => s,
                Err(_) => return false,
            }
        }
        Err(_) => return false,
    };
    !valid
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t' | '\x0c'))
}

/// Image header facts, read without decoding pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHeader {
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub mime_type: String,
}

pub fn read_image_header(path: &Path) -> Option<ImageHeader> {
    let reader = image::ImageReader::open(path)
        .ok()?
        .with_guessed_format()
        .ok()?;
    let format = reader.format()?;
    let (width, height) = reader.into_dimensions().ok()?;
    Some(ImageHeader {
        width,
        height,
        format: format!("{:?}", format).to_ascii_lowercase(),
        mime_type: format.to_mime_type().to_string(),
    })
}
