//! HTML page to readable markdown.
//!
//! `scraper` finds the title, `html2text` renders the body.

use scraper::{Html, Selector};

use crate::error::{Error, Result};

const WRAP_WIDTH: usize = 100;

#[derive(Debug, Clone)]
pub struct ExtractedPage {
    pub title: String,
    pub markdown: String,
}

impl ExtractedPage {
    /// Markdown with the title as a heading, unless the body already starts with it.
    pub fn into_document(self) -> String {
        if self.title.is_empty() || self.markdown.starts_with(&format!("# {}", self.title)) {
            self.markdown
        } else {
            format!("# {}\n\n{}", self.title, self.markdown)
        }
    }
}

/// Convert an HTML page. Refuses inputs larger than `max_bytes` with
/// [`Error::PageTooLarge`] and pages that render to nothing with
/// [`Error::NoContentExtracted`].
pub fn extract_page(html: &str, max_bytes: u64) -> Result<ExtractedPage> {
    if html.len() as u64 > max_bytes {
        return Err(Error::PageTooLarge { limit: max_bytes });
    }

    let document = Html::parse_document(html);
    let title = extract_title(&document);

    let rendered = html2text::from_read(html.as_bytes(), WRAP_WIDTH).unwrap_or_default();
    let markdown = clean_markdown(&rendered);
    if markdown.is_empty() {
        return Err(Error::NoContentExtracted("page rendered to no text".into()));
    }

    Ok(ExtractedPage { title, markdown })
}

fn extract_title(doc: &Html) -> String {
    let first_text = |selector: &str| -> Option<String> {
        let sel = Selector::parse(selector).ok()?;
        let el = doc.select(&sel).next()?;
        let text = el.text().collect::<String>().trim().to_string();
        (!text.is_empty()).then_some(text)
    };

    if let Some(t) = first_text("title") {
        return t;
    }
    if let Some(og) = Selector::parse(r#"meta[property="og:title"]"#)
        .ok()
        .and_then(|s| doc.select(&s).next())
        .and_then(|el| el.value().attr("content"))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
    {
        return og;
    }
    first_text("h1").unwrap_or_default()
}

/// Collapse runs of blank lines to at most one.
fn clean_markdown(md: &str) -> String {
    let mut out = String::with_capacity(md.len());
    let mut blank = false;
    for line in md.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            if !blank && !out.is_empty() {
                out.push('\n');
            }
            blank = true;
        } else {
            blank = false;
            out.push_str(line);
            out.push('\n');
        }
    }
    out.trim().to_string()
}
