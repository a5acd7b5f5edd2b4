//! Attachment and content-block data types.
//!
//! An [`Attachment`] is what the chat surface sends: a kind, a chosen mode,
//! and exactly one reference variant. A [`ContentBlock`] is what the
//! pipeline hands to the inference composer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::attachment::mime;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttachmentKind {
    File,
    Image,
    Url,
    DocIndex,
    Pr,
    Commit,
}

/// How an attachment contributes to a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentBlockMode {
    Text,
    File,
    Image,
    Page,
    #[serde(rename = "textlink")]
    TextLink,
    #[serde(rename = "imageurl")]
    ImageUrl,
    #[serde(rename = "fileurl")]
    FileUrl,
    NotReadable,
    PrDiff,
    PrPage,
    CommitDiff,
    CommitPage,
}

impl AttachmentKind {
    /// Modes this kind can ever produce. The UI may advertise a subset.
    pub fn allowed_modes(self) -> &'static [ContentBlockMode] {
        use ContentBlockMode::*;
        match self {
            AttachmentKind::File => &[Text, File, Image, NotReadable],
            AttachmentKind::Image => &[Image, File],
            AttachmentKind::Url => &[Page, Text, TextLink, ImageUrl, FileUrl, Image, File],
            AttachmentKind::DocIndex => &[TextLink],
            AttachmentKind::Pr => &[PrDiff, PrPage, TextLink],
            AttachmentKind::Commit => &[CommitDiff, CommitPage, TextLink],
        }
    }
}

/// Result of a `stat` on a local path. `mod_time` is absent when the path
/// does not exist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathInfo {
    pub path: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub exists: bool,
    #[serde(default)]
    pub is_dir: bool,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mod_time: Option<DateTime<Utc>>,
}

impl PathInfo {
    pub fn stat(path: &str) -> Result<PathInfo> {
        let p = Path::new(path);
        let name = p
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        match std::fs::metadata(p) {
            Ok(meta) => Ok(PathInfo {
                path: path.to_string(),
                name,
                exists: true,
                is_dir: meta.is_dir(),
                size: if meta.is_dir() { 0 } else { meta.len() },
                mod_time: meta.modified().ok().map(DateTime::<Utc>::from),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PathInfo {
                path: path.to_string(),
                name,
                ..Default::default()
            }),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    #[serde(flatten)]
    pub info: PathInfo,
    #[serde(default)]
    pub orig_path: String,
    #[serde(default)]
    pub orig_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orig_mod_time: Option<DateTime<Utc>>,
}

impl FileRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            info: PathInfo {
                path: path.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Re-stat the path. The snapshot triple is captured on first
    /// population and kept afterwards unless `replace_orig` is set.
    pub fn populate(&mut self, replace_orig: bool) -> Result<()> {
        self.info = PathInfo::stat(&self.info.path)?;
        if replace_orig || self.orig_path.is_empty() {
            self.orig_path = self.info.path.clone();
            self.orig_size = self.info.size;
            self.orig_mod_time = self.info.mod_time;
        }
        Ok(())
    }

    pub fn is_modified(&self) -> bool {
        self.info.path != self.orig_path
            || self.info.size != self.orig_size
            || self.info.mod_time != self.orig_mod_time
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRef {
    #[serde(flatten)]
    pub info: PathInfo,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub orig_path: String,
    #[serde(default)]
    pub orig_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orig_mod_time: Option<DateTime<Utc>>,
}

impl ImageRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            info: PathInfo {
                path: path.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Re-stat the path and decode the image header for dimensions.
    /// Header decoding failures leave the dimensions at zero.
    pub fn populate(&mut self, replace_orig: bool) -> Result<()> {
        self.info = PathInfo::stat(&self.info.path)?;
        if self.info.exists && !self.info.is_dir {
            if let Some(header) = mime::read_image_header(Path::new(&self.info.path)) {
                self.width = header.width;
                self.height = header.height;
                self.format = header.format;
                self.mime_type = header.mime_type;
            } else if self.mime_type.is_empty() {
                self.mime_type = mime::mime_for_path(Path::new(&self.info.path))
                    .unwrap_or(mime::MIME_OCTET_STREAM)
                    .to_string();
            }
        }
        if replace_orig || self.orig_path.is_empty() {
            self.orig_path = self.info.path.clone();
            self.orig_size = self.info.size;
            self.orig_mod_time = self.info.mod_time;
        }
        Ok(())
    }

    pub fn is_modified(&self) -> bool {
        self.info.path != self.orig_path
            || self.info.size != self.orig_size
            || self.info.mod_time != self.orig_mod_time
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlRef {
    pub url: String,
    #[serde(default)]
    pub normalized: String,
    #[serde(default)]
    pub orig_normalized: String,
}

impl UrlRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn populate(&mut self, replace_orig: bool) -> Result<()> {
        let parsed = crate::attachment::fetch::validate_url(&self.url)?;
        self.normalized = normalize_url(parsed);
        if replace_orig || self.orig_normalized.is_empty() {
            self.orig_normalized = self.normalized.clone();
        }
        Ok(())
    }

    pub fn is_modified(&self) -> bool {
        self.normalized != self.orig_normalized
    }
}

/// Lowercased scheme and host (done by the parser), fragment dropped,
/// default port elided.
pub fn normalize_url(mut url: url::Url) -> String {
    url.set_fragment(None);
    if url.port() == url.port_or_known_default() && url.port().is_some() {
        let _ = url.set_port(None);
    }
    url.to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericRef {
    pub handle: String,
    #[serde(default)]
    pub orig_handle: String,
}

impl GenericRef {
    pub fn populate(&mut self, replace_orig: bool) -> Result<()> {
        if self.handle.trim().is_empty() {
            return Err(Error::invalid("attachment handle is required"));
        }
        if replace_orig || self.orig_handle.is_empty() {
            self.orig_handle = self.handle.clone();
        }
        Ok(())
    }

    pub fn is_modified(&self) -> bool {
        self.handle != self.orig_handle
    }
}

/// Exactly one reference variant per attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttachmentRef {
    FileRef(FileRef),
    ImageRef(ImageRef),
    UrlRef(UrlRef),
    GenericRef(GenericRef),
}

impl AttachmentRef {
    pub fn populate(&mut self, replace_orig: bool) -> Result<()> {
        match self {
            AttachmentRef::FileRef(r) => r.populate(replace_orig),
            AttachmentRef::ImageRef(r) => r.populate(replace_orig),
            AttachmentRef::UrlRef(r) => r.populate(replace_orig),
            AttachmentRef::GenericRef(r) => r.populate(replace_orig),
        }
    }

    pub fn is_modified(&self) -> bool {
        match self {
            AttachmentRef::FileRef(r) => r.is_modified(),
            AttachmentRef::ImageRef(r) => r.is_modified(),
            AttachmentRef::UrlRef(r) => r.is_modified(),
            AttachmentRef::GenericRef(r) => r.is_modified(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub kind: AttachmentKind,
    #[serde(default)]
    pub label: String,
    pub mode: ContentBlockMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available_modes: Vec<ContentBlockMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_block: Option<ContentBlock>,
    #[serde(flatten)]
    pub reference: AttachmentRef,
}

impl Attachment {
    /// A local file attachment with its default mode picked by extension.
    pub fn file(path: impl Into<String>) -> Self {
        let path = path.into();
        let mode = mime::default_mode_for_path(Path::new(&path));
        let label = label_for_path(&path);
        Self {
            kind: AttachmentKind::File,
            label,
            mode,
            available_modes: Vec::new(),
            content_block: None,
            reference: AttachmentRef::FileRef(FileRef::new(path)),
        }
    }

    pub fn image(path: impl Into<String>) -> Self {
        let path = path.into();
        let label = label_for_path(&path);
        Self {
            kind: AttachmentKind::Image,
            label,
            mode: ContentBlockMode::Image,
            available_modes: Vec::new(),
            content_block: None,
            reference: AttachmentRef::ImageRef(ImageRef::new(path)),
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            kind: AttachmentKind::Url,
            label: url.clone(),
            mode: ContentBlockMode::Page,
            available_modes: Vec::new(),
            content_block: None,
            reference: AttachmentRef::UrlRef(UrlRef::new(url)),
        }
    }

    pub fn generic(kind: AttachmentKind, handle: impl Into<String>) -> Self {
        let handle = handle.into();
        let mode = kind
            .allowed_modes()
            .first()
            .copied()
            .unwrap_or(ContentBlockMode::TextLink);
        Self {
            kind,
            label: handle.clone(),
            mode,
            available_modes: Vec::new(),
            content_block: None,
            reference: AttachmentRef::GenericRef(GenericRef {
                handle,
                orig_handle: String::new(),
            }),
        }
    }

    pub fn with_mode(mut self, mode: ContentBlockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Kind/reference congruence and mode admissibility.
    pub fn validate(&self) -> Result<()> {
        let congruent = matches!(
            (self.kind, &self.reference),
            (AttachmentKind::File, AttachmentRef::FileRef(_))
                | (AttachmentKind::Image, AttachmentRef::ImageRef(_))
                | (AttachmentKind::Url, AttachmentRef::UrlRef(_))
                | (AttachmentKind::DocIndex, AttachmentRef::GenericRef(_))
                | (AttachmentKind::Pr, AttachmentRef::GenericRef(_))
                | (AttachmentKind::Commit, AttachmentRef::GenericRef(_))
        );
        if !congruent {
            return Err(Error::invalid(format!(
                "attachment kind {:?} does not match its reference",
                self.kind
            )));
        }

        let allowed = self.kind.allowed_modes();
        if let Some(bad) = self.available_modes.iter().find(|m| !allowed.contains(m)) {
            return Err(Error::invalid(format!(
                "mode {:?} is not allowed for {:?} attachments",
                bad, self.kind
            )));
        }
        let admissible = if self.available_modes.is_empty() {
            allowed.contains(&self.mode)
        } else {
            self.available_modes.contains(&self.mode)
        };
        if !admissible {
            return Err(Error::invalid(format!(
                "mode {:?} is not available for this {:?} attachment",
                self.mode, self.kind
            )));
        }
        Ok(())
    }

    /// Human-facing name for synthesized messages.
    pub fn display_label(&self) -> String {
        if !self.label.is_empty() {
            return self.label.clone();
        }
        match &self.reference {
            AttachmentRef::FileRef(r) => r.info.path.clone(),
            AttachmentRef::ImageRef(r) => r.info.path.clone(),
            AttachmentRef::UrlRef(r) => r.url.clone(),
            AttachmentRef::GenericRef(r) => r.handle.clone(),
        }
    }
}

fn label_for_path(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

// ═══════════════════════════════════════════════════════════════════════
// Content blocks
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextBlock {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// Payload shared by image and file blocks: inline bytes, a remote
/// reference, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ContentBlock {
    Text(TextBlock),
    Image(BinaryBlock),
    File(BinaryBlock),
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text(TextBlock {
            text: text.into(),
            ..Default::default()
        })
    }

    /// A text block that only carries a link to the source.
    pub fn link(url: &str) -> Self {
        ContentBlock::Text(TextBlock {
            text: url.to_string(),
            url: Some(url.to_string()),
            ..Default::default()
        })
    }

    pub fn is_text(&self) -> bool {
        matches!(self, ContentBlock::Text(_))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ContentBlock::Text(_) => "text",
            ContentBlock::Image(_) => "image",
            ContentBlock::File(_) => "file",
        }
    }

    /// A block is only emitted when it carries some payload.
    pub fn has_payload(&self) -> bool {
        fn non_empty(s: &Option<String>) -> bool {
            s.as_deref().is_some_and(|v| !v.is_empty())
        }
        match self {
            ContentBlock::Text(t) => !t.text.is_empty() || non_empty(&t.url),
            ContentBlock::Image(b) | ContentBlock::File(b) => {
                non_empty(&b.base64_data) || non_empty(&b.url)
            }
        }
    }
}
