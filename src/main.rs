mod codec;
mod config;
mod error;
mod fs_ops;
mod job;
mod recording;
mod store;

use std::process::exit;

use clap::Parser;
use config::{Args, ResolvedConfig};
use env_logger::Env;
use log::info;
use tokio::fs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // a missing .env is fine
    let _ = dotenv::dotenv();
    env_logger::Builder::from_env(Env::default().default_filter_or("ephys_compressor=info"))
        .init();

    let args = Args::parse();
    let config = match ResolvedConfig::resolve(&args, |name| std::env::var(name).ok()) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", error::error_chain(&e));
            exit(1);
        }
    };

    let threads = match config::install_thread_pool(config.parallelism) {
        Ok(threads) => threads,
        Err(e) => {
            log::error!("{}", e);
            exit(1);
        }
    };

    let compression = match config.bits_per_sample {
        Some(bps) => format!("wavpack, {} bits per sample", bps),
        None => "wavpack, lossless".to_string(),
    };
    info!("Running compression with the following parameters:");
    info!("\tCOMPRESSION: {}", compression);
    info!("\tHIGHPASS: {}", config.highpass_enabled);
    info!("\tCHUNK DURATION: {}s", config.chunk_duration);
    info!("\tN_JOBS: {} ({} threads)", config.parallelism, threads);
    info!(
        "\tDATA: {}, RESULTS: {}",
        config.data_dir.display(),
        config.results_dir.display()
    );

    fs::create_dir_all(&config.results_dir).await?;
    fs::create_dir_all(&config.scratch_dir).await?;

    let summary = job::run(&config).await?;
    if !summary.is_success() {
        anyhow::bail!(
            "{} of {} jobs failed",
            summary.failed.len(),
            summary.failed.len() + summary.succeeded.len()
        );
    }

    info!("Compression done");
    Ok(())
}
