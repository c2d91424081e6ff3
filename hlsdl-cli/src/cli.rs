use clap::Parser;
use std::path::PathBuf;

/// Define CLI arguments
#[derive(Parser)]
#[command(
    author = "hua0512 <https://github.com/hua0512>",
    version,
    about = "Resumable HLS stream downloader",
    long_about = "Downloads every segment of an HLS media playlist into a single file.\n\
                  \n\
                  Segments are fetched in concurrent windows and written in playlist order.\n\
                  AES-128 encrypted streams are decrypted on the fly. An interrupted download\n\
                  leaves a '<output>.resume' record next to the output and picks up where it\n\
                  stopped when run again with the same playlist."
)]
pub struct CliArgs {
    /// Media playlist path or URL
    #[arg(required = true, help = "Path or http(s) URL of the .m3u8 media playlist")]
    pub input: String,

    /// Output file
    #[arg(
        short,
        long,
        default_value = hlsdl_engine::DEFAULT_OUTPUT_FILE,
        help = "File the assembled stream is written to"
    )]
    pub output: PathBuf,

    /// Base URL for relative segment and key URIs
    #[arg(
        short = 'b',
        long = "base-url",
        help = "Prefix for relative segment/key URIs (default: directory of the playlist)"
    )]
    pub base_url: Option<String>,

    /// Concurrent segment downloads per window
    #[arg(
        short,
        long,
        default_value = "5",
        help = "Number of segments downloaded concurrently"
    )]
    pub threads: usize,

    /// Retries per request
    #[arg(
        short,
        long,
        default_value = "4",
        help = "Number of retries for a failed segment or key request"
    )]
    pub retries: u32,

    /// Start from this segment
    #[arg(
        long,
        default_value = "0",
        help = "Number of leading segments to skip; disables automatic resume"
    )]
    pub offset: usize,

    /// Skip the initialization segment
    #[arg(long, help = "Do not download the EXT-X-MAP init segment (output may not play)")]
    pub skip_init: bool,

    /// Per-request timeout in seconds
    #[arg(
        long,
        default_value = "60",
        help = "Timeout in seconds for a single request attempt (0 disables it)"
    )]
    pub timeout: u64,

    /// Connection timeout in seconds
    #[arg(
        long,
        default_value = "10",
        help = "Connection timeout in seconds (time to establish initial connection)"
    )]
    pub connect_timeout: u64,

    /// Overwrite an existing output file without asking
    #[arg(short, long, conflicts_with = "continue_existing")]
    pub force: bool,

    /// Append to an existing output file without asking
    #[arg(long = "continue", help = "Append to an existing output file without asking")]
    pub continue_existing: bool,

    /// Custom HTTP headers for download requests
    #[arg(
        long = "header",
        short = 'H',
        help = "Add custom HTTP header to requests (can be used multiple times). Format: 'Name: Value'",
        value_name = "HEADER"
    )]
    pub headers: Vec<String>,

    /// Custom user agent
    #[arg(long, help = "User-Agent sent with every request")]
    pub user_agent: Option<String>,

    /// Proxy as a URL or as host[:port]
    #[arg(
        long,
        help = "Proxy for all requests, as a URL (\"socks5://10.0.0.2:1080\") or host[:port]"
    )]
    pub proxy: Option<String>,

    /// Proxy scheme for a host[:port] proxy (http, socks5)
    #[arg(
        long,
        default_value = "http",
        help = "Proxy scheme when --proxy is host[:port]; a URL carries its own",
        value_parser = ["http", "socks5"]
    )]
    pub proxy_type: String,

    /// Proxy username
    #[arg(long, help = "Username for proxy authentication")]
    pub proxy_user: Option<String>,

    /// Proxy password
    #[arg(long, help = "Password for proxy authentication")]
    pub proxy_pass: Option<String>,

    /// Use system proxy settings for downloads
    #[arg(
        long,
        default_value = "true",
        help = "Use system proxy settings for downloads if no explicit proxy is configured"
    )]
    pub use_system_proxy: bool,

    /// Disable all proxy settings for downloads
    #[arg(
        long,
        help = "Disable all proxy settings (including system proxy) for downloads"
    )]
    pub no_proxy: bool,

    /// Show a progress bar
    #[arg(
        short = 'P',
        long = "progress",
        default_value = "false",
        help = "Show a progress bar while downloading"
    )]
    pub show_progress: bool,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable detailed debug logging")]
    pub verbose: bool,
}
