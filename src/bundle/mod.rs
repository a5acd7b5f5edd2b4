//! Bundles of versioned items on disk.

pub mod dirstore;
pub mod layout;
pub mod locks;
pub mod model;
pub mod page;
pub mod store;
pub mod validate;

pub use model::{
    AllBundles, Bundle, BundleItem, BundlePage, ItemKind, ItemMeta, ItemPage, ListBundlesRequest,
    ListItem, ListItemsRequest, PatchEnabled, PutBundleBody, SearchItemsRequest,
};
pub use store::BundleStore;
