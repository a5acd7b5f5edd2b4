//! # Parley
//!
//! A local-first orchestrator that sits between a chat surface and LLM
//! providers.
//!
//! Parley turns user attachments (files, images, URLs, directories) into
//! provider-agnostic content blocks, stores versioned prompt templates and
//! tool definitions in bundles on disk with full-text search, and composes
//! normalized inference requests from a conversation.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐
//! │ Attachments │──▶│              │   ┌──────────────────┐
//! │ file/url/dir│   │   Composer   │──▶│ InferenceClient  │
//! └─────────────┘   │              │   └──────────────────┘
//! ┌─────────────┐   │              │
//! │ Tool store  │──▶│              │
//! └──────┬──────┘   └──────────────┘
//!        │   ┌──────────────┐  ┌──────────┐
//!        ├──▶│ FTS5 (SQLite)│  │ Overlay  │ built-in enable flags
//!        │   └──────────────┘  └──────────┘
//! ┌──────┴──────┐
//! │ JSON files  │ user bundles, one file per item version
//! └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! parley init                       # create store directories and indexes
//! parley attach ./README.md         # print the content block for a file
//! parley prompts search "summary"   # full-text search over templates
//! parley serve                      # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`attachment`] | Attachments to content blocks, directory walker |
//! | [`bundle`] | Generic bundle store |
//! | [`overlay`] | Built-in data with enable/disable overlay |
//! | [`fts`] | Full-text index and its sync |
//! | [`prompts`] | Prompt templates |
//! | [`tools`] | Tools, native functions, invocation |
//! | [`inference`] | Request composition and streaming |
//! | [`server`] | HTTP API |
//! | [`db`] | SQLite connections |

pub mod attachment;
pub mod bundle;
pub mod config;
pub mod db;
pub mod error;
pub mod fts;
pub mod inference;
pub mod overlay;
pub mod prompts;
pub mod server;
pub mod tools;
