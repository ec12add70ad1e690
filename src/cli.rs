use std::path::PathBuf;

use clap::Parser;
use recon_guard::Operation;

#[derive(clap::Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable detailed debug logging (global)
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,

    /// Enable verbose logging (global)
    #[arg(long, global = true, default_value_t = false)]
    pub verbose: bool,

    /// JSON config file overriding the built-in limits and TTLs
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RequestArgs {
    /// Domain, URL or IP address to look up
    pub target: String,

    /// Client key the rate limiter counts against
    #[arg(long, default_value = "127.0.0.1")]
    pub client: String,

    /// Send the same request N times (useful to watch the limiter kick in)
    #[arg(short = 'n', long, default_value_t = 1_u32)]
    pub repeat: u32,

    /// Export the result log as JSONL when done
    #[arg(long, value_name = "FILE")]
    pub log_out: Option<PathBuf>,

    /// Skip rate limiting (internal callers)
    #[arg(long, default_value_t = false)]
    pub bypass: bool,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Domains hosted on the same IP address
    Reverse(RequestArgs),

    /// Subdomains seen in certificate transparency logs
    Subdomains(RequestArgs),

    /// Detect the CMS or platform behind a site
    Cms(RequestArgs),

    /// CMS detection plus exposed-path probing
    Scan(RequestArgs),
}

impl Commands {
    pub fn operation(&self) -> Operation {
        match self {
            Commands::Reverse(_) => Operation::Reverse,
            Commands::Subdomains(_) => Operation::Subdomain,
            Commands::Cms(_) => Operation::Cms,
            Commands::Scan(_) => Operation::VulnScan,
        }
    }

    pub fn args(&self) -> &RequestArgs {
        match self {
            Commands::Reverse(a) | Commands::Subdomains(a) | Commands::Cms(a) | Commands::Scan(a) => a,
        }
    }
}

pub fn parse_cli() -> Cli {
    Cli::parse()
}
