use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "vidqueue")]
#[command(about = "Single-worker video download queue", long_about = None)]
pub struct Cli {
    /// Configuration file (default: $VIDQUEUE_CONFIG or config/vidqueue.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server and download dispatcher
    Server(ServerArgs),
    /// Print the best thumbnail and a preview url for a video
    Probe(ProbeArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServerArgs {
    /// Address to bind the HTTP server to (overrides server.bind_addr)
    #[arg(long)]
    pub address: Option<SocketAddr>,
}

#[derive(clap::Args, Debug)]
pub struct ProbeArgs {
    /// Video or playlist url
    pub url: String,
}
