//! # Parley CLI (`parley`)
//!
//! Commands for setting up the stores, building attachment content
//! blocks, searching prompt templates and tools, and starting the HTTP
//! API.
//!
//! ## Usage
//!
//! ```bash
//! parley --config ./config/parley.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `parley init` | Create store directories, manifests and indexes |
//! | `parley serve` | Start the HTTP API |
//! | `parley attach <path-or-url>` | Print the content block for an attachment |
//! | `parley walk <dir>` | Print the bounded directory walk |
//! | `parley prompts search "<q>"` | Full-text search over prompt templates |
//! | `parley tools list` | List tools |
//! | `parley reindex` | Resync the full-text indexes |
//! | `parley completions <shell>` | Print shell completions |

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use parley::attachment::mime::{bucket_for_path, Bucket};
use parley::attachment::{walk, Attachment, AttachmentBuilder, BuildOptions, ContentBlockMode};
use parley::bundle::model::{BundleItem, ItemPage, ListItemsRequest, SearchItemsRequest};
use parley::bundle::store::BundleStore;
use parley::config::{self, Config};
use parley::{prompts, server, tools};

/// Parley: attachments, prompt and tool bundles, and inference request
/// composition for LLM chat surfaces.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/parley.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "parley",
    about = "Parley: a local-first orchestrator between a chat surface and LLM providers",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/parley.toml`. When the file does not exist the
    /// built-in defaults are used.
    #[arg(long, global = true, default_value = "./config/parley.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store directories, manifests and SQLite files.
    ///
    /// Safe to run repeatedly.
    Init,

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Build the content block for a local path or URL and print it as JSON.
    ///
    /// A directory is walked and every file found is built.
    Attach {
        /// File, image, directory or http(s) URL.
        target: String,

        /// Content block mode, e.g. `text`, `image`, `page`, `textlink`.
        #[arg(long)]
        mode: Option<String>,
    },

    /// Walk a directory breadth-first and print the files found.
    Walk {
        dir: PathBuf,

        /// File budget; values outside 1..=256 use 256.
        #[arg(long, default_value_t = 256)]
        max_files: i64,
    },

    /// Prompt template commands.
    Prompts {
        #[command(subcommand)]
        action: ItemAction,
    },

    /// Tool commands.
    Tools {
        #[command(subcommand)]
        action: ItemAction,
    },

    /// Force a full resync of the full-text indexes.
    ///
    /// Also removes rows for files deleted while no process was running.
    Reindex,

    /// Print shell completions.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ItemAction {
    /// Full-text search.
    Search {
        query: String,

        #[arg(long)]
        limit: Option<usize>,

        /// Include disabled bundles and items.
        #[arg(long)]
        all: bool,
    },
    /// List items, built-ins first.
    List {
        #[arg(long)]
        limit: Option<usize>,

        /// Only items carrying one of these tags (comma separated).
        #[arg(long)]
        tags: Option<String>,

        #[arg(long)]
        all: bool,
    },
}

fn load(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        return config::load_config(path);
    }
    let mut cfg = Config::default();
    config::validate(&mut cfg)?;
    Ok(cfg)
}

fn init_logging(cfg: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.logging.filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cfg.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "parley", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = load(&cli.config)?;
    init_logging(&cfg);

    match cli.command {
        Commands::Init => {
            let prompts = prompts::open_store(&cfg).await?;
            let tools = tools::open_store(&cfg).await?;
            println!("Prompt store ready at {}", prompts.base_dir().display());
            println!("Tool store ready at {}", tools.base_dir().display());
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Attach { target, mode } => {
            run_attach(&cfg, &target, mode.as_deref()).await?;
        }
        Commands::Walk { dir, max_files } => {
            let res = walk::walk_directory(dir, max_files, CancellationToken::new())
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            print_json(&res)?;
        }
        Commands::Prompts { action } => {
            let store = prompts::open_store(&cfg).await?;
            run_item_action(&store, action).await?;
        }
        Commands::Tools { action } => {
            let store = tools::open_store(&cfg).await?;
            run_item_action(&store, action).await?;
        }
        Commands::Reindex => {
            let p = prompts::open_store(&cfg).await?.reindex().await?;
            let t = tools::open_store(&cfg).await?.reindex().await?;
            println!(
                "prompts: {} indexed, {} removed; tools: {} indexed, {} removed",
                p.indexed, p.removed, t.indexed, t.removed
            );
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_attach(cfg: &Config, target: &str, mode: Option<&str>) -> anyhow::Result<()> {
    let builder = AttachmentBuilder::new(&cfg.attachments)?;
    let opts = BuildOptions::default();

    let is_url = target.starts_with("http://") || target.starts_with("https://");
    if !is_url && Path::new(target).is_dir() {
        let dir = builder
            .expand_directory(
                PathBuf::from(target),
                cfg.attachments.walk_max_files as i64,
                CancellationToken::new(),
            )
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        let mut attachments = dir.attachments;
        let blocks = builder.build_content_blocks(&mut attachments, opts).await;
        print_json(&serde_json::json!({
            "contentBlocks": blocks,
            "overflowDirs": dir.overflow_dirs,
            "hasMore": dir.has_more,
        }))?;
        return Ok(());
    }

    let mut attachment = if is_url {
        Attachment::url(target)
    } else if bucket_for_path(Path::new(target)) == Some(Bucket::Image) {
        Attachment::image(target)
    } else {
        Attachment::file(target)
    };
    if let Some(mode) = mode {
        let mode: ContentBlockMode = serde_json::from_value(serde_json::Value::from(mode))
            .with_context(|| format!("unknown mode {mode:?}"))?;
        attachment = attachment.with_mode(mode);
    }
    attachment.validate()?;
    let block = builder.build_content_block(&mut attachment, opts).await?;
    print_json(&block)
}

async fn run_item_action<K: BundleItem>(
    store: &BundleStore<K>,
    action: ItemAction,
) -> anyhow::Result<()> {
    let page: ItemPage<K> = match action {
        ItemAction::Search { query, limit, all } => {
            store
                .search_items(SearchItemsRequest {
                    query,
                    include_disabled: all,
                    page_size: limit,
                    page_token: None,
                })
                .await?
        }
        ItemAction::List { limit, tags, all } => {
            let tags = tags
                .map(|t| t.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default();
            store
                .list_items(ListItemsRequest {
                    bundle_ids: Vec::new(),
                    tags,
                    include_disabled: all,
                    page_size: limit,
                    page_token: None,
                })
                .await?
        }
    };

    if page.items.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, entry) in page.items.iter().enumerate() {
        let meta = entry.item.meta();
        let flags = match (meta.is_built_in, meta.is_enabled) {
            (true, true) => " [built-in]",
            (true, false) => " [built-in, disabled]",
            (false, false) => " [disabled]",
            (false, true) => "",
        };
        println!(
            "{}. {}/{}@{}{}",
            i + 1,
            entry.bundle_slug,
            meta.slug,
            meta.version,
            flags
        );
        if !meta.description.is_empty() {
            println!("    {}", meta.description);
        }
    }
    if page.next_page_token.is_some() {
        println!("(more results available)");
    }
    Ok(())
}
