use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use rs_torrent_client::cli::Args;
use rs_torrent_client::orchestrator::Orchestrator;
use rs_torrent_client::torrent::TorrentFile;
use rs_torrent_client::{cli, logging};

const DEFAULT_LISTEN_PORT: u16 = 6881;
const DEFAULT_SESSION_POOL_SIZE: usize = 30;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Err(err) = logging::init(args.log_level, &args.log_output) {
        eprintln!("failed to initialize logging: {err}");
        std::process::exit(1);
    }

    if let Err(err) = run(&args).await {
        tracing::error!(error = %err, "fatal error, aborting");
        std::process::exit(1);
    }

    Ok(())
}

async fn run(args: &cli::Args) -> Result<()> {
    let torrent = TorrentFile::load(&args.source_file)
        .with_context(|| format!("failed to parse metainfo file {:?}", args.source_file))?;
    tracing::info!(
        name = %torrent.info.name,
        pieces = torrent.num_pieces(),
        info_hash = %hex::encode(torrent.info_hash),
        "loaded torrent"
    );

    let output_dir = std::env::current_dir().context("failed to resolve output directory")?;
    let orchestrator = Orchestrator::new(
        Arc::new(torrent),
        &output_dir,
        DEFAULT_LISTEN_PORT,
        DEFAULT_SESSION_POOL_SIZE,
    )
    .context("failed to initialize piece manager")?;

    orchestrator.run().await.context("download failed")?;
    Ok(())
}
