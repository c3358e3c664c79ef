//! Command-line flags for the headless host binary.

use std::path::PathBuf;

use clap::Parser;

/// HelixScreen core host
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "helix-core",
    about = "Headless HelixScreen core: AMS state engine, material settings and geometry budget."
)]
pub struct Cli {
    /// Path to helixconfig.json (defaults to the per-user config directory)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Mock every printer-facing collaborator
    #[arg(long)]
    pub test: bool,

    /// Use real Wi-Fi in test mode
    #[arg(long, requires = "test")]
    pub real_wifi: bool,

    /// Use real Ethernet in test mode
    #[arg(long, requires = "test")]
    pub real_ethernet: bool,

    /// Use a real Moonraker connection in test mode
    #[arg(long, requires = "test")]
    pub real_moonraker: bool,

    /// Use real printer files in test mode
    #[arg(long, requires = "test")]
    pub real_files: bool,

    /// Number of gates on the mock AMS unit
    #[arg(long, default_value_t = 4)]
    pub mock_gates: usize,
}

/// Parse `args` (including the program name). `--real-*` without `--test`
/// is rejected.
pub fn parse_args<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args)
}
