//! On-disk naming: bundle directories and item file names.

use crate::error::{Error, Result};

pub const ITEM_EXT: &str = "json";

/// Keep ASCII letters, digits and `-`; everything else becomes `-`.
pub fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

/// `<sanitized-id>_<slug>`
pub fn bundle_dir_name(id: &str, slug: &str) -> String {
    format!("{}_{}", sanitize_id(id), slug)
}

/// Inverse of [`bundle_dir_name`]: split at the first `_`.
pub fn parse_bundle_dir(name: &str) -> Result<(String, String)> {
    match name.split_once('_') {
        Some((id, slug)) if !id.is_empty() && !slug.is_empty() => {
            Ok((id.to_string(), slug.to_string()))
        }
        _ => Err(Error::invalid(format!("not a bundle directory name: {name}"))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFileInfo {
    pub slug: String,
    pub version: String,
    pub file_name: String,
}

/// `<escaped-slug>_<escaped-version>.json`
pub fn item_file_info(slug: &str, version: &str) -> ItemFileInfo {
    ItemFileInfo {
        slug: slug.to_string(),
        version: version.to_string(),
        file_name: format!(
            "{}_{}.{}",
            urlencoding::encode(slug),
            urlencoding::encode(version),
            ITEM_EXT
        ),
    }
}

pub fn parse_item_file_name(file_name: &str) -> Result<(String, String)> {
    let invalid = || Error::invalid(format!("not an item file name: {file_name}"));
    let stem = file_name
        .strip_suffix(&format!(".{ITEM_EXT}"))
        .ok_or_else(invalid)?;
    let (slug, version) = stem.split_once('_').ok_or_else(invalid)?;
    let slug = urlencoding::decode(slug).map_err(|_| invalid())?;
    let version = urlencoding::decode(version).map_err(|_| invalid())?;
    if slug.is_empty() || version.is_empty() {
        return Err(invalid());
    }
    Ok((slug.into_owned(), version.into_owned()))
}
