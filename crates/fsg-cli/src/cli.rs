use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{ArgGroup, Parser};

#[derive(Parser, Debug)]
#[command(
    name = "fsg",
    about = "Share files peer to peer by content address",
    version,
    group(ArgGroup::new("mode").args(["file", "cid"]))
)]
pub struct Cli {
    /// File or directory to publish; keeps seeding until interrupted
    #[arg(short = 'f', long = "file", value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// CID to fetch, optionally as /ipfs/<cid>
    #[arg(short = 'c', long = "cid", value_name = "CID")]
    pub cid: Option<String>,

    /// Enable all experimental features
    #[arg(long)]
    pub experimental: bool,

    /// Node config file (TOML)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Address to accept peer sessions on
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<SocketAddr>,

    /// Bootstrap peer address (repeatable)
    #[arg(long = "peer", value_name = "ADDR")]
    pub peers: Vec<SocketAddr>,

    /// Give up fetching after this many seconds
    #[arg(long, default_value_t = 120, value_name = "SECS")]
    pub timeout: u64,

    /// Where fetched content is written, as <dir>/<cid>
    #[arg(long, default_value = "Download", value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Publish a single file inside a directory so its name is kept
    #[arg(long)]
    pub wrap: bool,

    /// Only issue DHT lookups; do not serve DHT requests
    #[arg(long)]
    pub dht_client: bool,

    #[arg(short, long)]
    pub verbose: bool,

    #[arg(long, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}
