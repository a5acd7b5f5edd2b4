//! URL attachment pipeline.
//!
//! Every failure that is the remote's fault degrades to a link-only block;
//! only invalid input surfaces as an error.

use crate::attachment::fetch::{file_name_of, HttpFetcher};
use crate::attachment::file::encode;
use crate::attachment::html;
use crate::attachment::mime::{self, Bucket};
use crate::attachment::model::{BinaryBlock, ContentBlock, ContentBlockMode, TextBlock, UrlRef};
use crate::error::{Error, Result};

/// Byte caps applied by the URL pipeline.
#[derive(Debug, Clone, Copy)]
pub struct UrlLimits {
    pub max_fetch_bytes: u64,
    pub max_page_bytes: u64,
}

pub async fn build_url_block(
    fetcher: &HttpFetcher,
    r: &UrlRef,
    mode: ContentBlockMode,
    limits: UrlLimits,
) -> Result<ContentBlock> {
    let url = if r.normalized.is_empty() {
        r.url.as_str()
    } else {
        r.normalized.as_str()
    };

    match mode {
        ContentBlockMode::ImageUrl | ContentBlockMode::FileUrl => {
            Ok(reference_block(fetcher, url, mode).await)
        }
        ContentBlockMode::Image | ContentBlockMode::File => {
            match inline_binary(fetcher, url, limits.max_fetch_bytes).await {
                Ok(block) => Ok(block),
                Err(e) => Ok(degrade(url, e)),
            }
        }
        ContentBlockMode::Page | ContentBlockMode::Text => {
            match page_or_text(fetcher, url, limits).await {
                Ok(block) => Ok(block),
                Err(e) => Ok(degrade(url, e)),
            }
        }
        _ => Ok(ContentBlock::link(url)),
    }
}

fn degrade(url: &str, err: Error) -> ContentBlock {
    match err {
        Error::PageTooLarge { .. } => {
            tracing::info!(url, error = %err, "page too large, sending link only")
        }
        _ => tracing::warn!(url, error = %err, "url fetch failed, sending link only"),
    }
    ContentBlock::link(url)
}

/// `imageurl` / `fileurl`: pass the URL through when the probed type fits.
async fn reference_block(fetcher: &HttpFetcher, url: &str, mode: ContentBlockMode) -> ContentBlock {
    let Some(probe) = fetcher.probe(url).await else {
        return ContentBlock::link(url);
    };
    let bucket = mime::bucket_for_mime(&probe.mime);
    let block = BinaryBlock {
        base64_data: None,
        url: Some(url.to_string()),
        mime_type: probe.mime.clone(),
        file_name: file_name_of(url),
    };
    match (mode, bucket) {
        (ContentBlockMode::ImageUrl, Bucket::Image) => ContentBlock::Image(block),
        (ContentBlockMode::FileUrl, Bucket::Document) => ContentBlock::File(block),
        _ => {
            tracing::debug!(url, mime = %probe.mime, ?mode, "declared type does not fit mode");
            ContentBlock::link(url)
        }
    }
}

/// `image` / `file`: download and inline.
async fn inline_binary(fetcher: &HttpFetcher, url: &str, max_bytes: u64) -> Result<ContentBlock> {
    let body = fetcher.fetch_url_bytes(url, max_bytes).await?;
    let mime_type = body.mime();
    let block = BinaryBlock {
        base64_data: Some(encode(&body.bytes)),
        url: Some(url.to_string()),
        file_name: file_name_of(url),
        mime_type: mime_type.clone(),
    };
    if mime_type.starts_with("image/") {
        Ok(ContentBlock::Image(block))
    } else {
        Ok(ContentBlock::File(block))
    }
}

/// `page` / `text`: images and PDFs go to the binary path, plain text is
/// passed through, anything else is treated as HTML and converted.
async fn page_or_text(fetcher: &HttpFetcher, url: &str, limits: UrlLimits) -> Result<ContentBlock> {
    let probed = fetcher.probe(url).await.map(|p| p.mime);

    if let Some(m) = probed.as_deref() {
        if m.starts_with("image/") || m == mime::MIME_PDF {
            return inline_binary(fetcher, url, limits.max_fetch_bytes).await;
        }
        if mime::is_text_mime(m) && !mime::is_html_mime(m) {
            let body = fetcher.fetch_url_bytes(url, limits.max_fetch_bytes).await?;
            return Ok(ContentBlock::Text(TextBlock {
                text: String::from_utf8_lossy(&body.bytes).into_owned(),
                mime_type: Some(m.to_string()),
                url: Some(url.to_string()),
                file_name: None,
            }));
        }
    }

    let body = fetcher
        .fetch_url_bytes(url, limits.max_page_bytes)
        .await
        .map_err(|e| match e {
            Error::ResponseTooLarge { limit } => Error::PageTooLarge { limit },
            other => other,
        })?;
    let html_text = String::from_utf8_lossy(&body.bytes);
    let page = html::extract_page(&html_text, limits.max_page_bytes)?;
    Ok(ContentBlock::Text(TextBlock {
        text: page.into_document(),
        mime_type: Some(mime::MIME_MARKDOWN.to_string()),
        url: Some(url.to_string()),
        file_name: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LIMITS: UrlLimits = UrlLimits {
        max_fetch_bytes: 4096,
        max_page_bytes: 4096,
    };

    fn url_ref(u: String) -> UrlRef {
        let mut r = UrlRef::new(u);
        r.populate(false).unwrap();
        r
    }

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn html_page_becomes_markdown() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/post"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_string("<html><head><title>Post</title></head><body><p>Body text</p></body></html>"),
            )
            .mount(&server)
            .await;

        let u = format!("{}/post", server.uri());
        let block = build_url_block(&fetcher(), &url_ref(u), ContentBlockMode::Page, LIMITS)
            .await
            .unwrap();
        match block {
            ContentBlock::Text(t) => {
                assert!(t.text.contains("Body text"));
                assert_eq!(t.mime_type.as_deref(), Some("text/markdown"));
                assert!(t.url.is_some());
            }
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversize_page_degrades_to_link() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string(format!("<p>{}</p>", "a".repeat(8192))),
            )
            .mount(&server)
            .await;

        let u = format!("{}/huge", server.uri());
        let block = build_url_block(&fetcher(), &url_ref(u.clone()), ContentBlockMode::Page, LIMITS)
            .await
            .unwrap();
        assert_eq!(block, ContentBlock::link(&u));
    }

    #[tokio::test]
    async fn imageurl_passes_reference_through() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/cat.png"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "image/png"))
            .mount(&server)
            .await;

        let u = format!("{}/cat.png", server.uri());
        let block =
            build_url_block(&fetcher(), &url_ref(u.clone()), ContentBlockMode::ImageUrl, LIMITS)
                .await
                .unwrap();
        match block {
            ContentBlock::Image(b) => {
                assert_eq!(b.url.as_deref(), Some(u.as_str()));
                assert!(b.base64_data.is_none());
                assert_eq!(b.mime_type, "image/png");
            }
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[tokio::test]
    async fn fileurl_with_mismatched_type_is_link() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html"))
            .mount(&server)
            .await;

        let u = format!("{}/page", server.uri());
        let block =
            build_url_block(&fetcher(), &url_ref(u.clone()), ContentBlockMode::FileUrl, LIMITS)
                .await
                .unwrap();
        assert_eq!(block, ContentBlock::link(&u));
    }

    #[tokio::test]
    async fn plain_text_url_is_passed_through() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/plain"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/plain")
                    .set_body_string("raw notes"),
            )
            .mount(&server)
            .await;

        let u = format!("{}/notes.txt", server.uri());
        let block = build_url_block(&fetcher(), &url_ref(u), ContentBlockMode::Text, LIMITS)
            .await
            .unwrap();
        assert!(matches!(block, ContentBlock::Text(ref t) if t.text == "raw notes"));
    }

    #[tokio::test]
    async fn textlink_mode_never_fetches() {
        let u = "https://unreachable.invalid/a".to_string();
        let block = build_url_block(&fetcher(), &url_ref(u.clone()), ContentBlockMode::TextLink, LIMITS)
            .await
            .unwrap();
        assert_eq!(block, ContentBlock::link(&u));
    }
}
