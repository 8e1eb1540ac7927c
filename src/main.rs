//! Dirscope — lazy directory explorer with on-demand size aggregation.
//!
//! Thin headless driver. Opens the directory named on the command line (or
//! the current directory), pumps the session until every task has finished
//! and logs the root listing and chart. All logic lives in the
//! `dirscope-core` and `dirscope-session` crates.

use anyhow::Context;
use dirscope_core::config::ScanConfig;
use dirscope_session::Session;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming an optional JSON config file.
const CONFIG_ENV: &str = "DIRSCOPE_CONFIG";

const IDLE_TIMEOUT: Duration = Duration::from_secs(600);

fn main() -> anyhow::Result<()> {
    // Initialise structured logging.
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    tracing::info!("Dirscope starting");

    let config = match std::env::var_os(CONFIG_ENV) {
        Some(path) => {
            let path = PathBuf::from(path);
            ScanConfig::load(&path)
                .with_context(|| format!("loading config from {}", path.display()))?
        }
        None => ScanConfig::default(),
    };

    let root = match std::env::args_os().nth(1) {
        Some(arg) => PathBuf::from(arg),
        None => std::env::current_dir().context("resolving current directory")?,
    };

    let mut session = Session::new(config)?;
    let root_node = session.request_open_root(root)?;
    if !session.wait_until_idle(IDLE_TIMEOUT) {
        tracing::warn!("Gave up waiting after {IDLE_TIMEOUT:?}");
    }

    let tree = session.tree();
    let root = tree.node(root_node);
    if let Some(err) = &root.load_error {
        anyhow::bail!("cannot list {}: {err}", tree.root_path().display());
    }
    for child in tree.sorted_children(root_node) {
        let node = tree.node(child);
        let marker = if node.is_dir { "/" } else { "" };
        tracing::info!("{:>14}  {}{}", node.size_column(), node.name, marker);
    }

    let chart = session.chart();
    tracing::info!("{}", chart.title());
    for slice in chart.slices() {
        tracing::info!("{:>6.2}%  {}", slice.percent, slice.legend);
    }

    Ok(())
}
