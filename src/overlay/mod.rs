//! Built-in data, overlay flags, and the snapshot rebuilder.

pub mod builtin;
pub mod kv;
pub mod rebuild;

pub use builtin::{BuiltinData, BuiltinFs, BuiltinSnapshot};
pub use kv::OverlayKv;
pub use rebuild::AsyncRebuilder;
