//! Attachment to content block.
//!
//! [`AttachmentBuilder`] owns the shared HTTP client and the byte caps, and
//! dispatches each attachment to its kind's pipeline.

use std::path::PathBuf;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::attachment::fetch::HttpFetcher;
use crate::attachment::file;
use crate::attachment::model::{
    Attachment, AttachmentKind, AttachmentRef, ContentBlock, ContentBlockMode, TextBlock,
};
use crate::attachment::remote::{self, UrlLimits};
use crate::attachment::walk::{self, OverflowDir, WalkError};
use crate::config::AttachmentsConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildOptions {
    /// Refresh the snapshot fields instead of failing on modification.
    pub override_original: bool,
    /// Fail with [`Error::NonTextContentBlock`] unless the result is text.
    pub only_if_text_kind: bool,
    /// Rebuild even if the attachment already carries a block.
    pub force_fetch: bool,
}

/// Files found under a dropped directory, as ready-to-build attachments.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryAttachments {
    pub attachments: Vec<Attachment>,
    pub overflow_dirs: Vec<OverflowDir>,
    pub has_more: bool,
}

#[derive(Debug, Clone)]
pub struct AttachmentBuilder {
    fetcher: HttpFetcher,
    limits: AttachmentsConfig,
}

impl AttachmentBuilder {
    pub fn new(config: &AttachmentsConfig) -> Result<Self> {
        Ok(Self {
            fetcher: HttpFetcher::new(config.http_timeout())?,
            limits: config.clone(),
        })
    }

    pub fn fetcher(&self) -> &HttpFetcher {
        &self.fetcher
    }

    /// Build and store the content block for one attachment.
    ///
    /// Returns [`Error::ExistingContentBlock`] if a block is already present
    /// and `force_fetch` is off, and
    /// [`Error::AttachmentModifiedSinceSnapshot`] if the source changed since
    /// the attachment was first populated and `override_original` is off.
    pub async fn build_content_block(
        &self,
        att: &mut Attachment,
        opts: BuildOptions,
    ) -> Result<ContentBlock> {
        if att.content_block.is_some() && !opts.force_fetch {
            return Err(Error::ExistingContentBlock);
        }
        att.validate()?;

        att.reference.populate(opts.override_original)?;
        if !opts.override_original && att.reference.is_modified() {
            return Err(Error::AttachmentModifiedSinceSnapshot(att.display_label()));
        }

        let block = self.dispatch(att).await?;
        if opts.only_if_text_kind && !block.is_text() {
            return Err(Error::NonTextContentBlock(att.display_label()));
        }
        if !block.has_payload() {
            return Err(Error::NoContentExtracted(att.display_label()));
        }

        att.content_block = Some(block.clone());
        Ok(block)
    }

    async fn dispatch(&self, att: &Attachment) -> Result<ContentBlock> {
        let max_file = self.limits.max_file_bytes;
        match &att.reference {
            AttachmentRef::FileRef(r) => file::build_file_block(r, att.mode, max_file).await,
            AttachmentRef::ImageRef(r) => file::build_image_block(r, att.mode, max_file).await,
            AttachmentRef::UrlRef(r) => {
                let limits = UrlLimits {
                    max_fetch_bytes: self.limits.max_fetch_bytes,
                    max_page_bytes: self.limits.max_page_bytes,
                };
                remote::build_url_block(&self.fetcher, r, att.mode, limits).await
            }
            AttachmentRef::GenericRef(r) => Ok(generic_block(att.kind, att.mode, &r.handle)),
        }
    }

    /// Build every attachment of a message.
    ///
    /// Existing blocks are reused, modified sources get a notice block, and
    /// other failures are logged and skipped. Output order follows input
    /// order.
    pub async fn build_content_blocks(
        &self,
        attachments: &mut [Attachment],
        opts: BuildOptions,
    ) -> Vec<ContentBlock> {
        let mut out = Vec::with_capacity(attachments.len());
        for att in attachments.iter_mut() {
            match self.build_content_block(att, opts).await {
                Ok(block) => out.push(block),
                Err(Error::ExistingContentBlock) => {
                    if let Some(block) = &att.content_block {
                        out.push(block.clone());
                    }
                }
                Err(Error::AttachmentModifiedSinceSnapshot(label)) => {
                    out.push(ContentBlock::Text(TextBlock {
                        text: format!(
                            "[Attachment: {label}] attachment modified since this message was sent"
                        ),
                        ..Default::default()
                    }));
                }
                Err(e) => {
                    tracing::warn!(
                        attachment = %att.display_label(),
                        error = %e,
                        "skipping attachment"
                    );
                }
            }
        }
        out
    }

    /// Walk a directory and return one file attachment per file found.
    pub async fn expand_directory(
        &self,
        dir: PathBuf,
        max_files: i64,
        cancel: CancellationToken,
    ) -> std::result::Result<DirectoryAttachments, WalkError> {
        let walked = walk::walk_directory(dir, max_files, cancel).await?;
        let attachments = walked
            .files
            .iter()
            .map(|info| {
                let mut att = Attachment::file(info.path.clone());
                if let AttachmentRef::FileRef(r) = &mut att.reference {
                    r.info = info.clone();
                }
                att
            })
            .collect();
        Ok(DirectoryAttachments {
            attachments,
            overflow_dirs: walked.overflow_dirs,
            has_more: walked.has_more,
        })
    }
}

/// Doc-index, PR and commit attachments are resolved by the chat surface;
/// here they are passed on as a reference the model can see.
fn generic_block(kind: AttachmentKind, mode: ContentBlockMode, handle: &str) -> ContentBlock {
    let label = match kind {
        AttachmentKind::DocIndex => "Document index",
        AttachmentKind::Pr => "Pull request",
        AttachmentKind::Commit => "Commit",
        AttachmentKind::File | AttachmentKind::Image | AttachmentKind::Url => "Reference",
    };
    let detail = match mode {
        ContentBlockMode::PrDiff | ContentBlockMode::CommitDiff => " (diff)",
        ContentBlockMode::PrPage | ContentBlockMode::CommitPage => " (page)",
        _ => "",
    };
    ContentBlock::text(format!("{label}{detail}: {handle}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::model::TextBlock;
    use tempfile::TempDir;

    fn builder() -> AttachmentBuilder {
        AttachmentBuilder::new(&AttachmentsConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn builds_and_stores_block() {
        let tmp = TempDir::new().unwrap();
        let p = tmp.path().join("a.txt");
        std::fs::write(&p, "hello").unwrap();

        let mut att = Attachment::file(p.to_string_lossy());
        let block = builder()
            .build_content_block(&mut att, BuildOptions::default())
            .await
            .unwrap();
        assert!(matches!(block, ContentBlock::Text(ref t) if t.text == "hello"));
        assert_eq!(att.content_block.as_ref(), Some(&block));
    }

    #[tokio::test]
    async fn existing_block_requires_force() {
        let tmp = TempDir::new().unwrap();
        let p = tmp.path().join("a.txt");
        std::fs::write(&p, "hello").unwrap();

        let b = builder();
        let mut att = Attachment::file(p.to_string_lossy());
        b.build_content_block(&mut att, BuildOptions::default())
            .await
            .unwrap();
        let err = b
            .build_content_block(&mut att, BuildOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExistingContentBlock));

        let forced = BuildOptions {
            force_fetch: true,
            ..Default::default()
        };
        assert!(b.build_content_block(&mut att, forced).await.is_ok());
    }

    #[tokio::test]
    async fn modified_file_is_detected_then_overridden() {
        let tmp = TempDir::new().unwrap();
        let p = tmp.path().join("a.txt");
        std::fs::write(&p, "v1").unwrap();

        let b = builder();
        let mut att = Attachment::file(p.to_string_lossy());
        b.build_content_block(&mut att, BuildOptions::default())
            .await
            .unwrap();

        std::fs::write(&p, "version two").unwrap();
        let forced = BuildOptions {
            force_fetch: true,
            ..Default::default()
        };
        let err = b.build_content_block(&mut att, forced).await.unwrap_err();
        assert!(matches!(err, Error::AttachmentModifiedSinceSnapshot(_)));

        let refresh = BuildOptions {
            force_fetch: true,
            override_original: true,
            ..Default::default()
        };
        let block = b.build_content_block(&mut att, refresh).await.unwrap();
        assert!(matches!(block, ContentBlock::Text(ref t) if t.text == "version two"));
    }

    #[tokio::test]
    async fn only_text_rejects_binary_results() {
        let tmp = TempDir::new().unwrap();
        let p = tmp.path().join("report.docx");
        std::fs::write(&p, "PK\x03\x04").unwrap();

        let mut att = Attachment::file(p.to_string_lossy());
        assert_eq!(att.mode, ContentBlockMode::File);
        let opts = BuildOptions {
            only_if_text_kind: true,
            ..Default::default()
        };
        let err = builder()
            .build_content_block(&mut att, opts)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NonTextContentBlock(_)));
        assert!(att.content_block.is_none());
    }

    #[tokio::test]
    async fn generic_kinds_become_text_references() {
        let mut att = Attachment::generic(AttachmentKind::Pr, "org/repo#42");
        let block = builder()
            .build_content_block(&mut att, BuildOptions::default())
            .await
            .unwrap();
        assert_eq!(block, ContentBlock::text("Pull request (diff): org/repo#42"));
    }

    #[tokio::test]
    async fn fan_out_reuses_and_skips() {
        let tmp = TempDir::new().unwrap();
        let good = tmp.path().join("good.txt");
        std::fs::write(&good, "ok").unwrap();

        let cached = ContentBlock::Text(TextBlock {
            text: "cached".into(),
            ..Default::default()
        });
        let mut with_block = Attachment::file(good.to_string_lossy());
        with_block.content_block = Some(cached.clone());

        let missing = Attachment::file(tmp.path().join("gone.txt").to_string_lossy());

        let mut atts = vec![
            Attachment::file(good.to_string_lossy()),
            missing,
            with_block,
        ];
        let blocks = builder()
            .build_content_blocks(&mut atts, BuildOptions::default())
            .await;
        assert_eq!(blocks.len(), 2);
        assert!(matches!(&blocks[0], ContentBlock::Text(t) if t.text == "ok"));
        assert_eq!(blocks[1], cached);
    }

    #[tokio::test]
    async fn fan_out_notes_modified_sources() {
        let tmp = TempDir::new().unwrap();
        let p = tmp.path().join("a.txt");
        std::fs::write(&p, "v1").unwrap();

        let b = builder();
        let mut att = Attachment::file(p.to_string_lossy());
        att.reference.populate(false).unwrap();
        std::fs::write(&p, "changed!").unwrap();

        let blocks = b
            .build_content_blocks(std::slice::from_mut(&mut att), BuildOptions::default())
            .await;
        assert_eq!(blocks.len(), 1);
        match &blocks[0] {
            ContentBlock::Text(t) => assert_eq!(
                t.text,
                "[Attachment: a.txt] attachment modified since this message was sent"
            ),
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[tokio::test]
    async fn directory_expands_into_file_attachments() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.md"), "a").unwrap();
        std::fs::write(tmp.path().join("b.png"), "b").unwrap();

        let out = builder()
            .expand_directory(tmp.path().to_path_buf(), 0, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.attachments.len(), 2);
        assert!(!out.has_more);
        let modes: Vec<_> = out.attachments.iter().map(|a| a.mode).collect();
        assert!(modes.contains(&ContentBlockMode::Text));
        assert!(modes.contains(&ContentBlockMode::Image));
    }
}
