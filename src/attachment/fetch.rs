//! Bounded HTTP fetching and content-type probing.
//!
//! One [`HttpFetcher`] is shared by every URL pipeline. Bodies are read
//! chunk by chunk and never buffered past `max_bytes + 1`.

use std::time::Duration;

use reqwest::header::{ACCEPT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, RANGE};
use url::Url;

use crate::attachment::mime;
use crate::error::{Error, Result};

const MAX_URL_LENGTH: usize = 8192;
/// Bytes requested by the range probe and considered by the sniffer.
pub const PROBE_BYTES: usize = 512;

/// Parse and check an attachment URL: absolute, http(s), with a host.
pub fn validate_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid("URL is empty"));
    }
    if trimmed.len() > MAX_URL_LENGTH {
        return Err(Error::invalid("URL is too long"));
    }
    let parsed =
        Url::parse(trimmed).map_err(|e| Error::invalid(format!("invalid URL {trimmed}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(Error::invalid(format!(
                "unsupported URL scheme: {other} (only http/https)"
            )))
        }
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(Error::invalid(format!("URL has no host: {trimmed}")));
    }
    Ok(parsed)
}

/// A fully read response body.
#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub bytes: Vec<u8>,
    /// Normalized `Content-Type` as declared by the server.
    pub content_type: Option<String>,
    pub final_url: String,
}

impl FetchedBody {
    /// Declared type, falling back to sniffing the body.
    pub fn mime(&self) -> String {
        match &self.content_type {
            Some(ct) if !ct.is_empty() && ct != mime::MIME_OCTET_STREAM => ct.clone(),
            _ => mime::sniff(&self.bytes).to_string(),
        }
    }
}

/// Where a probed MIME type came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeSource {
    Head,
    Range,
    Sniff,
    Extension,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub mime: String,
    pub source: ProbeSource,
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// GET `url` and read at most `max_bytes` of body.
    ///
    /// Fails with [`Error::ResponseTooLarge`] when the declared length or the
    /// bytes actually received exceed the cap, and with
    /// [`Error::HttpStatus`] for non-2xx responses.
    pub async fn fetch_url_bytes(&self, url: &str, max_bytes: u64) -> Result<FetchedBody> {
        let parsed = validate_url(url)?;
        let mut response = self.client.get(parsed).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        if let Some(len) = declared_length(&response) {
            if len > max_bytes {
                return Err(Error::ResponseTooLarge { limit: max_bytes });
            }
        }

        let content_type = content_type(&response);
        let final_url = response.url().to_string();

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            bytes.extend_from_slice(&chunk);
            if bytes.len() as u64 > max_bytes {
                return Err(Error::ResponseTooLarge { limit: max_bytes });
            }
        }

        tracing::debug!(url, bytes = bytes.len(), "fetched url");
        Ok(FetchedBody {
            bytes,
            content_type,
            final_url,
        })
    }

    /// Determine the MIME type of a remote resource without downloading it.
    ///
    /// Order: `HEAD`, then a ranged `GET` of the first bytes (declared type,
    /// else a sniff), then the URL's file extension. `None` means the caller
    /// should fall back to a link-only block.
    pub async fn probe(&self, url: &str) -> Option<Probe> {
        let parsed = validate_url(url).ok()?;

        match self
            .client
            .head(parsed.clone())
            .header(ACCEPT_ENCODING, "identity")
            .send()
            .await
        {
            Ok(resp) if resp.status().as_u16() < 400 => {
                if let Some(ct) = content_type(&resp) {
                    if ct != mime::MIME_OCTET_STREAM {
                        return Some(Probe {
                            mime: ct,
                            source: ProbeSource::Head,
                        });
                    }
                }
            }
            Ok(resp) => tracing::debug!(url, status = %resp.status(), "HEAD probe refused"),
            Err(e) => tracing::debug!(url, error = %e, "HEAD probe failed"),
        }

        match self
            .client
            .get(parsed.clone())
            .header(ACCEPT_ENCODING, "identity")
            .header(RANGE, format!("bytes=0-{}", PROBE_BYTES - 1))
            .send()
            .await
        {
            Ok(mut resp) if resp.status().is_success() => {
                if let Some(ct) = content_type(&resp) {
                    if ct != mime::MIME_OCTET_STREAM {
                        return Some(Probe {
                            mime: ct,
                            source: ProbeSource::Range,
                        });
                    }
                }
                let mut head = Vec::with_capacity(PROBE_BYTES);
                while head.len() < PROBE_BYTES {
                    match resp.chunk().await {
                        Ok(Some(chunk)) => head.extend_from_slice(&chunk),
                        _ => break,
                    }
                }
                if !head.is_empty() {
                    return Some(Probe {
                        mime: mime::sniff(&head).to_string(),
                        source: ProbeSource::Sniff,
                    });
                }
            }
            Ok(resp) => tracing::debug!(url, status = %resp.status(), "range probe refused"),
            Err(e) => tracing::debug!(url, error = %e, "range probe failed"),
        }

        extension_of(&parsed)
            .and_then(|ext| mime::mime_for_extension(&ext))
            .map(|m| Probe {
                mime: m.to_string(),
                source: ProbeSource::Extension,
            })
    }
}

fn content_type(resp: &reqwest::Response) -> Option<String> {
    resp.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(mime::normalize_mime)
        .filter(|m| !m.is_empty())
}

fn declared_length(resp: &reqwest::Response) -> Option<u64> {
    resp.headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn extension_of(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    let decoded = urlencoding::decode(last).ok()?;
    let (_, ext) = decoded.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_ascii_lowercase())
    }
}

/// Last path segment of a URL, for use as a file name.
pub fn file_name_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    let decoded = urlencoding::decode(last).ok()?.into_owned();
    if decoded.is_empty() {
        None
    } else {
        Some(decoded)
    }
}
