//! In-process tool functions.
//!
//! Native tools name a function id (`parley/text.count`) that is looked up
//! in a [`NativeRegistry`]. The process-wide registry from [`global`] is
//! created on first use with the built-in functions; embedders add their
//! own at start-up with [`NativeRegistry::register`]. Functions are never
//! removed.
//!
//! # Writing a function
//!
//! ```rust,ignore
//! use parley::tools::native::{decode_args, NativeFunction};
//!
//! #[derive(serde::Deserialize)]
//! #[serde(deny_unknown_fields)]
//! struct Args { name: String }
//!
//! struct Greet;
//!
//! #[async_trait::async_trait]
//! impl NativeFunction for Greet {
//!     fn id(&self) -> &str { "acme/greet" }
//!     async fn call(&self, args: serde_json::Value) -> parley::error::Result<Vec<ContentBlock>> {
//!         let args: Args = decode_args(args)?;
//!         Ok(vec![ContentBlock::text(format!("hello {}", args.name))])
//!     }
//! }
//! ```

use async_trait::async_trait;
use chrono::{FixedOffset, SecondsFormat, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::attachment::model::ContentBlock;
use crate::error::{Error, Result};

#[async_trait]
pub trait NativeFunction: Send + Sync {
    /// Fully qualified id, `<namespace>/<name>`.
    fn id(&self) -> &str;

    /// Run with the raw JSON arguments. An `Err` is reported to the model
    /// as a tool error, not as a failed call.
    async fn call(&self, args: Value) -> Result<Vec<ContentBlock>>;
}

/// Decode arguments strictly. `null` is treated as `{}`.
pub fn decode_args<A: DeserializeOwned>(args: Value) -> Result<A> {
    let args = if args.is_null() {
        Value::Object(Default::default())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|e| Error::invalid(format!("invalid arguments: {e}")))
}

#[derive(Default)]
pub struct NativeRegistry {
    funcs: RwLock<HashMap<String, Arc<dyn NativeFunction>>>,
}

impl std::fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids = self.ids();
        ids.sort();
        f.debug_struct("NativeRegistry").field("funcs", &ids).finish()
    }
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in functions.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for f in builtin_functions() {
            // ids are distinct, so this cannot conflict
            let _ = registry.register(f);
        }
        registry
    }

    /// Add a function. Registering an id twice is a conflict.
    pub fn register(&self, func: Arc<dyn NativeFunction>) -> Result<()> {
        let id = func.id().to_string();
        if id.is_empty() || !id.contains('/') {
            return Err(Error::invalid(format!(
                "native function id {id:?} must look like namespace/name"
            )));
        }
        let mut funcs = self.funcs.write();
        if funcs.contains_key(&id) {
            return Err(Error::Conflict(format!("native function {id} already registered")));
        }
        funcs.insert(id, func);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn NativeFunction>> {
        self.funcs.read().get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.funcs.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.funcs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The process-wide registry.
pub fn global() -> &'static Arc<NativeRegistry> {
    static REGISTRY: OnceLock<Arc<NativeRegistry>> = OnceLock::new();
    REGISTRY.get_or_init(|| Arc::new(NativeRegistry::with_builtins()))
}

fn builtin_functions() -> Vec<Arc<dyn NativeFunction>> {
    vec![
        Arc::new(DateTimeNow) as Arc<dyn NativeFunction>,
        Arc::new(TextCount),
    ]
}

// ─── built-ins ─────────────────────────────────────────────────────────

struct DateTimeNow;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DateTimeArgs {
    /// Offset from UTC in minutes; UTC when absent.
    #[serde(default)]
    utc_offset_minutes: Option<i32>,
}

#[async_trait]
impl NativeFunction for DateTimeNow {
    fn id(&self) -> &str {
        "parley/datetime.now"
    }

    async fn call(&self, args: Value) -> Result<Vec<ContentBlock>> {
        let args: DateTimeArgs = decode_args(args)?;
        let minutes = args.utc_offset_minutes.unwrap_or(0);
        let offset = FixedOffset::east_opt(minutes * 60)
            .ok_or_else(|| Error::invalid(format!("utcOffsetMinutes {minutes} out of range")))?;
        let now = Utc::now().with_timezone(&offset);
        Ok(vec![ContentBlock::text(
            now.to_rfc3339_opts(SecondsFormat::Secs, true),
        )])
    }
}

struct TextCount;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TextCountArgs {
    text: String,
}

#[async_trait]
impl NativeFunction for TextCount {
    fn id(&self) -> &str {
        "parley/text.count"
    }

    async fn call(&self, args: Value) -> Result<Vec<ContentBlock>> {
        let args: TextCountArgs = decode_args(args)?;
        let t = &args.text;
        let counts = serde_json::json!({
            "bytes": t.len(),
            "chars": t.chars().count(),
            "words": t.split_whitespace().count(),
            "lines": t.lines().count(),
        });
        Ok(vec![ContentBlock::text(counts.to_string())])
    }
}
