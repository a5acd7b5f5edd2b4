//! Attachment pipeline: local files, images and URLs into content blocks.

pub mod build;
pub mod fetch;
pub mod file;
pub mod html;
pub mod mime;
pub mod model;
pub mod pdf;
pub mod remote;
pub mod walk;

pub use build::{AttachmentBuilder, BuildOptions, DirectoryAttachments};
pub use model::{
    Attachment, AttachmentKind, AttachmentRef, BinaryBlock, ContentBlock, ContentBlockMode,
    FileRef, GenericRef, ImageRef, PathInfo, TextBlock, UrlRef,
};
pub use walk::{walk_directory_bfs, OverflowDir, WalkError, WalkResult};
