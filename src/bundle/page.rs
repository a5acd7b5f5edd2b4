//! Page sizes and opaque page tokens.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_PAGE_SIZE: usize = 25;
pub const MAX_PAGE_SIZE: usize = 256;

pub fn clamp_page_size(requested: Option<usize>) -> usize {
    match requested {
        None | Some(0) => DEFAULT_PAGE_SIZE,
        Some(n) => n.min(MAX_PAGE_SIZE),
    }
}

/// Cursor for `ListBundles`: the last bundle returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleCursor {
    pub cursor_mod: DateTime<Utc>,
    pub cursor_id: String,
}

/// Cursor for `ListItems`: built-ins are paged by offset, user items by
/// the last `(modifiedAt, path)` returned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemCursor {
    #[serde(default)]
    pub built_in_done: bool,
    #[serde(default)]
    pub built_in_offset: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_mod: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_path: Option<String>,
}

/// Cursor for `SearchItems`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCursor {
    pub offset: usize,
}

pub fn encode_token<T: Serialize>(cursor: &T) -> Result<String> {
    Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(cursor)?))
}

pub fn decode_token<T: DeserializeOwned>(token: &str) -> Result<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token.trim())
        .map_err(|_| Error::invalid("malformed page token"))?;
    serde_json::from_slice(&bytes).map_err(|_| Error::invalid("malformed page token"))
}

/// Decode an optional token, treating an empty string as absent.
pub fn decode_opt<T: DeserializeOwned + Default>(token: Option<&str>) -> Result<T> {
    match token {
        Some(t) if !t.trim().is_empty() => decode_token(t),
        _ => Ok(T::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_defaults_and_caps() {
        assert_eq!(clamp_page_size(None), DEFAULT_PAGE_SIZE);
        assert_eq!(clamp_page_size(Some(0)), DEFAULT_PAGE_SIZE);
        assert_eq!(clamp_page_size(Some(5)), 5);
        assert_eq!(clamp_page_size(Some(10_000)), MAX_PAGE_SIZE);
    }

    #[test]
    fn tokens_are_opaque_json() {
        let c = ItemCursor {
            built_in_done: true,
            cursor_path: Some("d/a.json".into()),
            ..Default::default()
        };
        let token = encode_token(&c).unwrap();
        assert!(!token.contains('{'));
        let back: ItemCursor = decode_token(&token).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn garbage_token_is_invalid_request() {
        let err = decode_token::<BundleCursor>("%%%").unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
        let empty: SearchCursor = decode_opt(Some("")).unwrap();
        assert_eq!(empty.offset, 0);
    }
}
