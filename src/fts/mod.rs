//! Full-text search over bundle items.

pub mod index;
pub mod sync;

pub use index::{FtsHit, FtsIndex, FtsRow};
pub use sync::{FtsSync, SyncStats};
