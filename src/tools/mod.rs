//! Tools: records, the native function registry, and invocation.

pub mod invoke;
pub mod model;
pub mod native;

pub use invoke::{InvokeRequest, InvokeResponse, ToolInvoker};
pub use model::{LlmToolType, Tool, ToolImplType};

use crate::bundle::store::BundleStore;
use crate::config::Config;
use crate::error::Result;
use crate::overlay::builtin::BuiltinFs;

pub type ToolStore = BundleStore<Tool>;

/// Open the tool store under `<base_dir>/tools` with the built-in set.
pub async fn open_store(config: &Config) -> Result<ToolStore> {
    ToolStore::open(
        &config.storage.tools_dir(),
        Some(builtin_fs()),
        config.builtin.snapshot_max_age(),
    )
    .await
}

/// The tool bundles compiled into the binary.
pub fn builtin_fs() -> BuiltinFs {
    BuiltinFs::from_entries([
        (
            "tools.bundles.json",
            include_str!("../../data/builtin/tools/tools.bundles.json"),
        ),
        (
            "0190f3a4-5b6c-7d8e-9f03-23456789abcd_essentials/current-time_1.0.0.json",
            include_str!(
                "../../data/builtin/tools/0190f3a4-5b6c-7d8e-9f03-23456789abcd_essentials/current-time_1.0.0.json"
            ),
        ),
        (
            "0190f3a4-5b6c-7d8e-9f03-23456789abcd_essentials/text-stats_1.0.0.json",
            include_str!(
                "../../data/builtin/tools/0190f3a4-5b6c-7d8e-9f03-23456789abcd_essentials/text-stats_1.0.0.json"
            ),
        ),
        (
            "0190f3a4-5b6c-7d8e-9f03-23456789abcd_essentials/web-search_1.0.0.json",
            include_str!(
                "../../data/builtin/tools/0190f3a4-5b6c-7d8e-9f03-23456789abcd_essentials/web-search_1.0.0.json"
            ),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::builtin::load_snapshot;
    use std::collections::HashMap;

    #[test]
    fn embedded_tools_load_and_resolve() {
        let snap = load_snapshot::<Tool>(&builtin_fs(), &HashMap::new(), &HashMap::new()).unwrap();
        assert_eq!(snap.item_count(), 3);
        for (_, tool) in snap.iter_items() {
            if let Some(native) = &tool.native_impl {
                assert!(native::global().get(&native.func).is_some(), "{}", native.func);
            }
        }
    }
}
