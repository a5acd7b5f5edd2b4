//! Prompt templates: the item kind stored by the prompt bundle store.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::bundle::model::{BundleItem, ItemKind, ItemMeta};
use crate::bundle::store::BundleStore;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::overlay::builtin::BuiltinFs;

pub type PromptStore = BundleStore<PromptTemplate>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Developer,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBlock {
    pub id: String,
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarType {
    String,
    Number,
    Boolean,
    Enum,
    Date,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarSource {
    #[default]
    User,
    Static,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptVariable {
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: VarType,
    #[serde(default)]
    pub source: VarSource,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_val: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptTemplate {
    #[serde(flatten)]
    pub meta: ItemMeta,
    pub blocks: Vec<MessageBlock>,
    #[serde(default)]
    pub variables: Vec<PromptVariable>,
}

impl PromptVariable {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid("variable name is required"));
        }
        let name = &self.name;
        if self.source == VarSource::Static && self.static_val.is_none() {
            return Err(Error::invalid(format!("static variable {name} needs staticVal")));
        }
        if self.var_type == VarType::Enum {
            let values = self.enum_values.as_deref().unwrap_or_default();
            if values.is_empty() {
                return Err(Error::invalid(format!("enum variable {name} needs enumValues")));
            }
            for v in [&self.default, &self.static_val].into_iter().flatten() {
                if !values.contains(v) {
                    return Err(Error::invalid(format!(
                        "variable {name}: {v:?} is not one of its enumValues"
                    )));
                }
            }
        } else if self.enum_values.is_some() {
            return Err(Error::invalid(format!(
                "variable {name}: enumValues only apply to enum variables"
            )));
        }
        Ok(())
    }
}

impl BundleItem for PromptTemplate {
    const KIND: ItemKind = ItemKind::Prompt;
    const FTS_COLUMNS: &'static [&'static str] =
        &["slug", "display_name", "description", "messages", "tags"];
    const FTS_WEIGHTS: &'static [f64] = &[10.0, 8.0, 4.0, 2.0, 6.0];

    fn meta(&self) -> &ItemMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ItemMeta {
        &mut self.meta
    }

    fn validate_payload(&self) -> Result<()> {
        if self.blocks.is_empty() {
            return Err(Error::invalid("template needs at least one message block"));
        }
        let mut ids = HashSet::new();
        for block in &self.blocks {
            if block.id.trim().is_empty() {
                return Err(Error::invalid("message block id is required"));
            }
            if !ids.insert(block.id.as_str()) {
                return Err(Error::invalid(format!("duplicate message block id {}", block.id)));
            }
        }
        let mut names = HashSet::new();
        for var in &self.variables {
            var.validate()?;
            if !names.insert(var.name.as_str()) {
                return Err(Error::invalid(format!("duplicate variable {}", var.name)));
            }
        }
        Ok(())
    }

    fn fts_values(&self) -> Vec<String> {
        let messages = self
            .blocks
            .iter()
            .map(|b| b.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        vec![
            self.meta.slug.clone(),
            self.meta.display_name.clone(),
            self.meta.description.clone(),
            messages,
            self.meta.tags.join(" "),
        ]
    }
}

/// Open the prompt store under `<base_dir>/prompts` with the built-in set.
pub async fn open_store(config: &Config) -> Result<PromptStore> {
    PromptStore::open(
        &config.storage.prompts_dir(),
        Some(builtin_fs()),
        config.builtin.snapshot_max_age(),
    )
    .await
}

/// The prompt bundles compiled into the binary.
pub fn builtin_fs() -> BuiltinFs {
    BuiltinFs::from_entries([
        (
            "prompts.bundles.json",
            include_str!("../data/builtin/prompts/prompts.bundles.json"),
        ),
        (
            "0190f3a4-5b6c-7d8e-9f01-23456789abcd_writing/summarize_1.0.0.json",
            include_str!(
                "../data/builtin/prompts/0190f3a4-5b6c-7d8e-9f01-23456789abcd_writing/summarize_1.0.0.json"
            ),
        ),
        (
            "0190f3a4-5b6c-7d8e-9f01-23456789abcd_writing/rewrite_1.0.0.json",
            include_str!(
                "../data/builtin/prompts/0190f3a4-5b6c-7d8e-9f01-23456789abcd_writing/rewrite_1.0.0.json"
            ),
        ),
        (
            "0190f3a4-5b6c-7d8e-9f02-23456789abcd_engineering/code-review_1.0.0.json",
            include_str!(
                "../data/builtin/prompts/0190f3a4-5b6c-7d8e-9f02-23456789abcd_engineering/code-review_1.0.0.json"
            ),
        ),
    ])
}
