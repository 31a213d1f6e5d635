use clap::Parser;

/// Command-line interface definition.
/// Provides command-line options for the monitoring service binary.
///
/// Verbosity levels:
/// 0 - warnings and errors only
/// 1 - info (default)
/// 2 - debug
/// 3+ - trace
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Monitor a root domain for typosquatting and phishing lookalikes via an external fuzzing tool"
)]
pub struct Cli {
    /// Bind address for the HTTP server
    #[arg(long)]
    pub bind: Option<String>,

    /// Listen port for the HTTP server
    #[arg(long)]
    pub port: Option<u16>,

    /// Database connection URL, e.g. sqlite:twistwatch.db
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Path or name of the external fuzzing binary
    #[arg(long = "scanner-bin", value_name = "BIN")]
    pub scanner_bin: Option<String>,

    /// Pub/Sub emulator host (host:port); enables the message-queue pass-through
    #[arg(long = "pubsub-emulator", value_name = "HOST")]
    pub pubsub_emulator: Option<String>,

    /// Disable the root-domain metadata probe on domain registration
    #[arg(long = "no-probe", default_value_t = false)]
    pub no_probe: bool,

    /// Disable the in-process queue subscriber loop
    #[arg(long = "no-subscriber", default_value_t = false)]
    pub no_subscriber: bool,

    /// Verbosity level (0,1,2,3)
    #[arg(long, short, default_value_t = 1)]
    pub verbose: u8,
}

impl Cli {
    /// Parse CLI arguments from process args.
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Default tracing filter directive for the chosen verbosity.
    pub fn log_directive(&self) -> &'static str {
        match self.verbose {
            0 => "twistwatch=warn",
            1 => "twistwatch=info",
            2 => "twistwatch=debug",
            _ => "twistwatch=trace",
        }
    }
}
