//! PDF text extraction.
//!
//! `pdf-extract` can panic on malformed input; extraction runs on the
//! blocking pool behind `catch_unwind` so a bad file only fails its own
//! attachment.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::error::{Error, Result};

/// Extract UTF-8 text from PDF bytes. Inputs larger than `max_bytes` are
/// refused, and the returned text is cut to at most `max_bytes`.
pub async fn extract_pdf_text(bytes: Vec<u8>, max_bytes: u64) -> Result<String> {
    if bytes.len() as u64 > max_bytes {
        return Err(Error::ResponseTooLarge { limit: max_bytes });
    }

    let text = tokio::task::spawn_blocking(move || extract_blocking(&bytes))
        .await
        .map_err(|e| Error::Internal(format!("pdf extraction task failed: {e}")))??;

    Ok(truncate_utf8(text, max_bytes as usize))
}

fn extract_blocking(bytes: &[u8]) -> Result<String> {
    guarded(|| pdf_extract::extract_text_from_mem(bytes))
}

/// Extractor errors mean the file is unreadable; a panic is an internal
/// failure and must not take the process down.
fn guarded<E, F>(extract: F) -> Result<String>
where
    E: std::fmt::Display,
    F: FnOnce() -> std::result::Result<String, E>,
{
    match catch_unwind(AssertUnwindSafe(extract)) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(Error::UnreadableFile(format!("PDF extraction failed: {e}"))),
        Err(_) => Err(Error::Internal(
            "PDF extraction panicked on malformed input".into(),
        )),
    }
}

fn truncate_utf8(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut cut = max;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_pdf_is_unreadable() {
        let err = extract_pdf_text(b"not a pdf".to_vec(), 1024).await.unwrap_err();
        assert!(matches!(err, Error::UnreadableFile(_)));
    }

    #[test]
    fn extractor_panic_is_internal() {
        let err = guarded(|| -> std::result::Result<String, String> { panic!("bad xref") })
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)), "{err:?}");

        let err = guarded(|| Err::<String, _>("no pages")).unwrap_err();
        assert!(matches!(err, Error::UnreadableFile(_)));
    }

    #[tokio::test]
    async fn oversize_input_refused() {
        let err = extract_pdf_text(vec![0u8; 32], 16).await.unwrap_err();
        assert!(matches!(err, Error::ResponseTooLarge { limit: 16 }));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_utf8("héllo".into(), 2), "h");
        assert_eq!(truncate_utf8("abc".into(), 8), "abc");
    }
}
