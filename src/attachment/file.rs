//! Local file and image pipelines.

use std::path::Path;

use base64::Engine;

use crate::attachment::mime::{self, Bucket};
use crate::attachment::model::{
    BinaryBlock, ContentBlock, ContentBlockMode, FileRef, ImageRef, PathInfo, TextBlock,
};
use crate::attachment::pdf;
use crate::error::{Error, Result};

async fn read_capped(info: &PathInfo, max_bytes: u64) -> Result<Vec<u8>> {
    if !info.exists {
        return Err(Error::UnreadableFile(format!("{} does not exist", info.path)));
    }
    if info.is_dir {
        return Err(Error::UnreadableFile(format!("{} is a directory", info.path)));
    }
    if info.size > max_bytes {
        return Err(Error::UnreadableFile(format!(
            "{} is {} bytes, over the {} byte limit",
            info.path, info.size, max_bytes
        )));
    }
    let bytes = tokio::fs::read(&info.path).await?;
    if bytes.len() as u64 > max_bytes {
        return Err(Error::UnreadableFile(format!(
            "{} grew past the {} byte limit",
            info.path, max_bytes
        )));
    }
    Ok(bytes)
}

fn file_name(info: &PathInfo) -> Option<String> {
    (!info.name.is_empty()).then(|| info.name.clone())
}

fn not_readable(info: &PathInfo, mime: &str) -> ContentBlock {
    ContentBlock::Text(TextBlock {
        text: format!(
            "[Attachment: {}] content is not readable ({})",
            info.name, mime
        ),
        mime_type: None,
        url: None,
        file_name: file_name(info),
    })
}

/// Build a block for a local file in the requested mode.
pub async fn build_file_block(
    r: &FileRef,
    mode: ContentBlockMode,
    max_bytes: u64,
) -> Result<ContentBlock> {
    let info = &r.info;
    let path = Path::new(&info.path);
    let declared = mime::mime_for_path(path);

    let (bucket, mime_type, bytes) = match mime::bucket_for_path(path) {
        Some(b) => (b, declared.unwrap_or(mime::MIME_OCTET_STREAM).to_string(), None),
        None => {
            // No extension: sniff the content to decide.
            let bytes = read_capped(info, max_bytes).await?;
            let sniffed = mime::sniff(&bytes);
            (mime::bucket_for_mime(sniffed), sniffed.to_string(), Some(bytes))
        }
    };

    if mode == ContentBlockMode::NotReadable || bucket == Bucket::Other {
        return Ok(not_readable(info, &mime_type));
    }

    let bytes = match bytes {
        Some(b) => b,
        None => read_capped(info, max_bytes).await?,
    };

    match (mode, bucket) {
        (ContentBlockMode::Text, Bucket::Text) => {
            let text = String::from_utf8(bytes).map_err(|_| {
                Error::UnreadableFile(format!("{} is not valid UTF-8", info.path))
            })?;
            Ok(ContentBlock::Text(TextBlock {
                text,
                mime_type: Some(mime_type),
                url: None,
                file_name: file_name(info),
            }))
        }
        (ContentBlockMode::Text, Bucket::Document) if mime_type == mime::MIME_PDF => {
            let text = pdf::extract_pdf_text(bytes.clone(), max_bytes).await?;
            if text.trim().is_empty() {
                // Scanned or image-only PDF: send the document itself.
                return Ok(binary_file(info, &mime_type, &bytes));
            }
            Ok(ContentBlock::Text(TextBlock {
                text,
                mime_type: Some(mime::MIME_TEXT_PLAIN.to_string()),
                url: None,
                file_name: file_name(info),
            }))
        }
        (ContentBlockMode::Text, Bucket::Document) => Err(Error::UnreadableFile(format!(
            "{} has no text extractor ({})",
            info.path, mime_type
        ))),
        (ContentBlockMode::Text, Bucket::Image) | (ContentBlockMode::Image, Bucket::Image) => {
            Ok(ContentBlock::Image(BinaryBlock {
                base64_data: Some(encode(&bytes)),
                url: None,
                mime_type,
                file_name: file_name(info),
            }))
        }
        (ContentBlockMode::Image, _) => Err(Error::invalid(format!(
            "{} is not an image ({})",
            info.path, mime_type
        ))),
        _ => Ok(binary_file(info, &mime_type, &bytes)),
    }
}

/// Build a block for a local image. `file` mode sends the bytes as a file block.
pub async fn build_image_block(
    r: &ImageRef,
    mode: ContentBlockMode,
    max_bytes: u64,
) -> Result<ContentBlock> {
    let bytes = read_capped(&r.info, max_bytes).await?;
    let mime_type = if r.mime_type.is_empty() {
        mime::sniff(&bytes).to_string()
    } else {
        r.mime_type.clone()
    };

    match mode {
        ContentBlockMode::File => Ok(binary_file(&r.info, &mime_type, &bytes)),
        _ => {
            if !mime_type.starts_with("image/") {
                return Err(Error::invalid(format!(
                    "{} is not an image ({})",
                    r.info.path, mime_type
                )));
            }
            Ok(ContentBlock::Image(BinaryBlock {
                base64_data: Some(encode(&bytes)),
                url: None,
                mime_type,
                file_name: file_name(&r.info),
            }))
        }
    }
}

fn binary_file(info: &PathInfo, mime_type: &str, bytes: &[u8]) -> ContentBlock {
    ContentBlock::File(BinaryBlock {
        base64_data: Some(encode(bytes)),
        url: None,
        mime_type: mime_type.to_string(),
        file_name: file_name(info),
    })
}

pub(crate) fn encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
