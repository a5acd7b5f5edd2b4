//! Bundle and item records shared by the prompt and tool stores.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

pub const SCHEMA_VERSION: &str = "2025-07-01";

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

fn yes() -> bool {
    true
}

/// A named container of item versions. Lives in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub id: String,
    pub slug: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "yes")]
    pub is_enabled: bool,
    #[serde(default)]
    pub is_built_in: bool,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub modified_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft_deleted_at: Option<DateTime<Utc>>,
}

impl Bundle {
    pub fn is_live(&self) -> bool {
        self.soft_deleted_at.is_none()
    }
}

/// The manifest file: every bundle keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllBundles {
    #[serde(default)]
    pub bundles: BTreeMap<String, Bundle>,
}

/// Body of `PutBundle`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutBundleBody {
    pub slug: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "yes")]
    pub is_enabled: bool,
}

/// Body of the `PATCH` endpoints.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchEnabled {
    pub is_enabled: bool,
}

/// Fields every item version carries, flattened into each kind's record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemMeta {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "yes")]
    pub is_enabled: bool,
    #[serde(default)]
    pub is_built_in: bool,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub modified_at: DateTime<Utc>,
}

impl Default for ItemMeta {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            id: String::new(),
            slug: String::new(),
            version: String::new(),
            display_name: String::new(),
            description: String::new(),
            tags: Vec::new(),
            is_enabled: true,
            is_built_in: false,
            created_at: DateTime::<Utc>::default(),
            modified_at: DateTime::<Utc>::default(),
        }
    }
}

/// Which store an item belongs to. Decides file names and error sentinels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Prompt,
    Tool,
}

impl ItemKind {
    /// Manifest file name under the store's base directory.
    pub fn meta_file(self) -> &'static str {
        match self {
            ItemKind::Prompt => "prompts.bundles.json",
            ItemKind::Tool => "tools.bundles.json",
        }
    }

    pub fn fts_file(self) -> &'static str {
        match self {
            ItemKind::Prompt => "prompts.fts.sqlite",
            ItemKind::Tool => "tools.fts.sqlite",
        }
    }

    pub fn overlay_file(self) -> &'static str {
        match self {
            ItemKind::Prompt => "promptsbuiltin.overlay.sqlite",
            ItemKind::Tool => "toolsbuiltin.overlay.sqlite",
        }
    }

    pub fn noun(self) -> &'static str {
        match self {
            ItemKind::Prompt => "template",
            ItemKind::Tool => "tool",
        }
    }

    pub fn not_found(self, what: String) -> Error {
        match self {
            ItemKind::Prompt => Error::TemplateNotFound(what),
            ItemKind::Tool => Error::ToolNotFound(what),
        }
    }

    pub fn disabled(self, what: String) -> Error {
        match self {
            ItemKind::Prompt => Error::TemplateDisabled(what),
            ItemKind::Tool => Error::ToolDisabled(what),
        }
    }

    /// True for files that live in the base directory but are not items.
    pub fn is_reserved_file(self, name: &str) -> bool {
        let fts = self.fts_file();
        let overlay = self.overlay_file();
        name == self.meta_file()
            || name.starts_with(fts)
            || name.starts_with(overlay)
    }
}

/// A versioned record stored in a bundle.
pub trait BundleItem:
    Clone + std::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: ItemKind;

    /// Indexed FTS columns, in order.
    const FTS_COLUMNS: &'static [&'static str];
    /// bm25 weight per indexed column, same order as [`Self::FTS_COLUMNS`].
    const FTS_WEIGHTS: &'static [f64];

    fn meta(&self) -> &ItemMeta;
    fn meta_mut(&mut self) -> &mut ItemMeta;

    /// Kind-specific invariants on the payload.
    fn validate_payload(&self) -> Result<()>;

    /// Text for each of [`Self::FTS_COLUMNS`].
    fn fts_values(&self) -> Vec<String>;
}

/// One entry of `ListItems` / `SearchItems`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListItem<K> {
    pub bundle_id: String,
    pub bundle_slug: String,
    #[serde(flatten)]
    pub item: K,
}

#[derive(Debug, Clone, Default)]
pub struct ListBundlesRequest {
    pub bundle_ids: Vec<String>,
    pub include_disabled: bool,
    pub page_size: Option<usize>,
    pub page_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundlePage {
    pub bundles: Vec<Bundle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListItemsRequest {
    pub bundle_ids: Vec<String>,
    pub tags: Vec<String>,
    pub include_disabled: bool,
    pub page_size: Option<usize>,
    pub page_token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchItemsRequest {
    pub query: String,
    pub include_disabled: bool,
    pub page_size: Option<usize>,
    pub page_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPage<K> {
    pub items: Vec<ListItem<K>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// `prev` moved forward: now, or one millisecond past `prev` if the clock
/// has not advanced.
pub fn advance_timestamp(prev: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > prev {
        now
    } else {
        prev + chrono::Duration::milliseconds(1)
    }
}
