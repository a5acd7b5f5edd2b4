//! Identifier validation for bundles and items.

use std::collections::HashSet;

use crate::error::{Error, Result};

pub const MAX_SLUG_LEN: usize = 64;
pub const MAX_TAGS: usize = 32;

fn check_chars(value: &str, what: &str, allow_dot: bool) -> Result<()> {
    if value.is_empty() {
        return Err(Error::invalid(format!("{what} is required")));
    }
    if value.chars().count() > MAX_SLUG_LEN {
        return Err(Error::invalid(format!(
            "{what} exceeds {MAX_SLUG_LEN} characters"
        )));
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_alphanumeric() || *c == '-' || (allow_dot && *c == '.')))
    {
        return Err(Error::invalid(format!(
            "{what} contains invalid character {bad:?}"
        )));
    }
    Ok(())
}

/// Unicode letters and digits plus `-`, at most 64 characters.
pub fn validate_slug(slug: &str) -> Result<()> {
    check_chars(slug, "slug", false)
}

/// Like a slug, but `.` is also allowed.
pub fn validate_version(version: &str) -> Result<()> {
    check_chars(version, "version", true)
}

pub fn validate_tags(tags: &[String]) -> Result<()> {
    if tags.len() > MAX_TAGS {
        return Err(Error::invalid(format!("at most {MAX_TAGS} tags allowed")));
    }
    let mut seen = HashSet::new();
    for tag in tags {
        check_chars(tag, "tag", false)?;
        if !seen.insert(tag.as_str()) {
            return Err(Error::invalid(format!("duplicate tag {tag:?}")));
        }
    }
    Ok(())
}

/// Bundle ids are UUID v7 strings.
pub fn validate_bundle_id(id: &str) -> Result<()> {
    let parsed = uuid::Uuid::parse_str(id)
        .map_err(|_| Error::invalid(format!("bundle id {id:?} is not a UUID")))?;
    if parsed.get_version_num() != 7 {
        return Err(Error::invalid(format!("bundle id {id:?} is not a UUID v7")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs() {
        assert!(validate_slug("code-review").is_ok());
        assert!(validate_slug("résumé-2").is_ok());
        assert!(validate_slug("").is_err());
        assert!(validate_slug("has space").is_err());
        assert!(validate_slug("has_underscore").is_err());
        assert!(validate_slug("v1.0").is_err());
        assert!(validate_slug(&"a".repeat(64)).is_ok());
        assert!(validate_slug(&"a".repeat(65)).is_err());
    }

    #[test]
    fn versions_allow_dots() {
        assert!(validate_version("1.2.3").is_ok());
        assert!(validate_version("v2-beta").is_ok());
        assert!(validate_version("1/2").is_err());
    }

    #[test]
    fn tags_reject_duplicates() {
        assert!(validate_tags(&["a".into(), "b".into()]).is_ok());
        assert!(validate_tags(&["a".into(), "a".into()]).is_err());
        assert!(validate_tags(&["not ok".into()]).is_err());
    }

    #[test]
    fn bundle_ids_must_be_v7() {
        assert!(validate_bundle_id(&uuid::Uuid::now_v7().to_string()).is_ok());
        assert!(validate_bundle_id(&uuid::Uuid::new_v4().to_string()).is_err());
        assert!(validate_bundle_id("B1").is_err());
    }
}
