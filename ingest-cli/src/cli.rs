use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Define CLI arguments
#[derive(Parser, Debug)]
#[command(
    author = "hua0512 <https://github.com/hua0512>",
    version,
    about = "Live CMAF ingest server",
    long_about = "Pushes simulated live CMAF streams to remote HTTP destinations.\n\
                  \n\
                  VOD assets found under the asset directory are looped as live streams.\n\
                  Ingest sessions are created, advanced, inspected and stopped through a\n\
                  small REST API under /api/cmaf-ingests."
)]
pub struct CliArgs {
    /// Address to serve the control API on
    #[arg(
        short,
        long,
        default_value = "127.0.0.1:8888",
        help = "Address the control API listens on"
    )]
    pub listen: SocketAddr,

    /// Root directory of the VOD asset catalogue
    #[arg(
        short,
        long,
        default_value = "./assets",
        help = "Directory searched recursively for asset.json files"
    )]
    pub assets: PathBuf,

    /// Overall PUT timeout with optional unit (ms, s, m, h)
    #[arg(
        long,
        default_value = "30s",
        help = "Overall timeout of a single segment PUT. Examples: \"30s\", \"1m\". Use 0 to disable."
    )]
    pub timeout: String,

    /// Connection timeout with optional unit (ms, s, m, h)
    #[arg(
        long,
        default_value = "10s",
        help = "Timeout for establishing a connection to the destination"
    )]
    pub connect_timeout: String,

    /// Chunks buffered per segment between producer and request body
    #[arg(
        long,
        default_value = "32",
        help = "Number of chunks buffered per segment before the producer waits for the network"
    )]
    pub bridge_capacity: usize,

    /// Drain grace period with optional unit (ms, s, m, h)
    #[arg(
        long,
        default_value = "5s",
        help = "How long a stopped session may take to finish its in-flight pushes"
    )]
    pub drain_grace: String,

    /// Custom HTTP headers sent with every push
    #[arg(
        short = 'H',
        long = "header",
        help = "Add custom HTTP header sent with every push (format: 'Name: Value'). Can be used multiple times."
    )]
    pub headers: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable detailed debug logging")]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, help = "Write logs to this file in addition to stdout")]
    pub log_file: Option<PathBuf>,
}
