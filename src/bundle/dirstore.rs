//! JSON files under a base directory, with change notifications.
//!
//! Every mutation is reported to an optional [`FileListener`] after it hits
//! disk. The FTS indexer is the only listener in this crate.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    /// A new file was written.
    SetFile,
    /// An existing file was rewritten in place (or moved here).
    ResetFile,
    DeleteFile,
    /// A key inside a keyed file (the manifest) changed.
    SetKey,
    DeleteKey,
}

#[derive(Debug, Clone)]
pub struct FileEvent {
    pub op: FileOp,
    /// Path relative to the store's base directory, `/`-separated.
    pub file: String,
    /// The written document, for set/reset events.
    pub data: Option<serde_json::Value>,
}

#[async_trait]
pub trait FileListener: Send + Sync {
    async fn on_event(&self, event: FileEvent) -> Result<()>;
}

#[derive(Clone)]
pub struct DirStore {
    base: PathBuf,
    listener: Option<Arc<dyn FileListener>>,
}

impl std::fmt::Debug for DirStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirStore")
            .field("base", &self.base)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

/// `a/b.json` style key for a path under `base`.
pub fn relative_key(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

impl DirStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn FileListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.base.join(rel)
    }

    async fn notify(&self, op: FileOp, file: String, data: Option<serde_json::Value>) {
        if let Some(listener) = &self.listener {
            let event = FileEvent {
                op,
                file: file.clone(),
                data,
            };
            if let Err(e) = listener.on_event(event).await {
                tracing::warn!(file, ?op, error = %e, "file listener failed");
            }
        }
    }

    pub async fn exists(&self, rel: &str) -> bool {
        tokio::fs::try_exists(self.path(rel)).await.unwrap_or(false)
    }

    pub async fn read_json<T: DeserializeOwned>(&self, rel: &str) -> Result<Option<T>> {
        match tokio::fs::read(self.path(rel)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write `value` as pretty JSON through a temp file and rename.
    pub async fn write_json<T: Serialize>(&self, rel: &str, value: &T) -> Result<()> {
        let target = self.path(rel);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let existed = tokio::fs::try_exists(&target).await.unwrap_or(false);

        let data = serde_json::to_value(value)?;
        let bytes = serde_json::to_vec_pretty(&data)?;
        let tmp = target.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        let op = if existed {
            FileOp::ResetFile
        } else {
            FileOp::SetFile
        };
        self.notify(op, rel.to_string(), Some(data)).await;
        Ok(())
    }

    /// Report a keyed change inside an already written file.
    pub async fn notify_key(&self, rel: &str, key: &str, deleted: bool) {
        let op = if deleted {
            FileOp::DeleteKey
        } else {
            FileOp::SetKey
        };
        self.notify(op, format!("{rel}#{key}"), None).await;
    }

    pub async fn delete_file(&self, rel: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path(rel)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::Io(e));
            }
            Err(e) => return Err(e.into()),
        }
        self.notify(FileOp::DeleteFile, rel.to_string(), None).await;
        Ok(())
    }

    pub async fn create_dir(&self, rel: &str) -> Result<()> {
        tokio::fs::create_dir_all(self.path(rel)).await?;
        Ok(())
    }

    /// File names (not paths) of the regular `.json` files in a directory.
    pub async fn list_json_files(&self, rel_dir: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(self.path(rel_dir)).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".json") && entry.file_type().await?.is_file() {
                out.push(name);
            }
        }
        out.sort();
        Ok(out)
    }

    /// Move a directory; each moved file is reported as deleted at the old
    /// path and reset at the new one.
    pub async fn rename_dir(&self, from: &str, to: &str) -> Result<()> {
        let src = self.path(from);
        if !tokio::fs::try_exists(&src).await.unwrap_or(false) {
            return Ok(());
        }
        let dst = self.path(to);
        if tokio::fs::try_exists(&dst).await.unwrap_or(false) {
            return Err(Error::Conflict(format!("directory {to} already exists")));
        }
        let files = self.list_json_files(from).await?;
        tokio::fs::rename(&src, &dst).await?;

        for name in files {
            self.notify(FileOp::DeleteFile, format!("{from}/{name}"), None)
                .await;
            let rel = format!("{to}/{name}");
            let data = self.read_json::<serde_json::Value>(&rel).await.ok().flatten();
            self.notify(FileOp::ResetFile, rel, data).await;
        }
        Ok(())
    }
}
