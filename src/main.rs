use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use navcache::config::NavConfig;
use navcache::menu::source::{HttpMenuSource, MenuSource};
use navcache::NavCache;

#[derive(Parser)]
#[command(name = "navcache", about = "Inspect and manage a navigation state cache.")]
struct Cli {
    /// Config file (defaults to .navcache/config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the storage namespace
    #[arg(short, long)]
    namespace: Option<String>,

    /// Menu source base URL (overrides config)
    #[arg(long)]
    source: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show systems, the current system, and persisted tree sizes
    Inspect,
    /// Print which system owns a menu path
    Resolve { path: String },
    /// Load menus from the configured source and print the result
    Load,
    /// Purge all cached menu and tab state
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("navcache=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let mut config = NavConfig::load(cli.config.as_deref());
    if let Some(namespace) = cli.namespace {
        config.namespace = namespace;
    }
    let source = cli
        .source
        .map(|url| Arc::new(HttpMenuSource::new(url)) as Arc<dyn MenuSource>);

    let mut nav = NavCache::open(&config, source)
        .with_context(|| format!("opening store in {}", config.data_dir().display()))?;
    info!(namespace = %config.namespace, "navcache opened");

    match cli.command {
        Command::Inspect => {
            let current = nav.menus().current_system();
            for system in nav.menus().systems() {
                let marker = if current.as_deref() == Some(system.code.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!("{marker} {} ({})", system.code, system.name);
            }
            for (code, bytes) in nav.menus().persisted_tree_sizes() {
                println!("menu-tree:{code}  {bytes} bytes");
            }
            println!("path index: {} entries", nav.menus().path_index_len());
        }
        Command::Resolve { path } => match nav.menus().resolve_system_by_menu_key(&path) {
            Some(code) => println!("{code}"),
            None => anyhow::bail!("no system owns {path}"),
        },
        Command::Load => {
            let summary = nav.load_menus(None).await?;
            println!(
                "loaded {} system(s) via {:?}, current = {}",
                summary.systems.len(),
                summary.fetched_via,
                summary.current.as_deref().unwrap_or("-")
            );
        }
        Command::Reset => {
            nav.reset();
            println!("cache reset");
        }
    }

    Ok(())
}
