mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use serde_json::json;
use vidqueue::config::Config;
use vidqueue::fetch::{Fetcher, YtDlpFetcher, media};

type AnyError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    vidqueue::observability::init_tracing();

    let cli = Cli::parse();
    let config = match cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Server(args) => vidqueue::api::run(config, args.address).await?,
        Commands::Probe(args) => probe(config, args.url).await?,
    }

    Ok(())
}

async fn probe(config: Config, url: String) -> Result<(), AnyError> {
    let fetcher = YtDlpFetcher::from_config(&config);
    let info = tokio::task::spawn_blocking(move || fetcher.probe(&url)).await??;

    let summary = json!({
        "id": info.get("id"),
        "title": info.get("title"),
        "thumbnail": media::best_thumbnail(&info),
        "stream_url": media::stream_url(&info),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
