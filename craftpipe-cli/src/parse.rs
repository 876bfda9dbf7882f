//! Implementation of the command line parser, using clap struct derivation.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use uuid::Uuid;


// ================= //
//    MAIN COMMAND   //
// ================= //

/// Command line utility for installing game client versions, with their assets,
/// libraries, natives and optional mod loader.
#[derive(Debug, Parser)]
#[command(name = "craftpipe", version, author, disable_help_subcommand = true, max_term_width = 140)]
pub struct CliArgs {
    #[command(subcommand)]
    pub cmd: CliCmd,
    /// Enable verbose output, the more -v argument you put, the more verbose the
    /// installer will be. This is ignored if 'RUST_LOG' is set.
    #[arg(short, env = "CRAFTPIPE_VERBOSE", action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Set the directory where versions, libraries and assets are installed, and where
    /// the game is run.
    ///
    /// If left unspecified, this argument defaults to the standard directory for your
    /// system: in '%APPDATA%/.minecraft' on Windows, '$HOME/Library/Application
    /// Support/minecraft' on macOS and '$HOME/.minecraft' on other systems.
    #[arg(long, env = "CRAFTPIPE_MAIN_DIR", value_name = "PATH")]
    pub main_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum CliCmd {
    Install(InstallArgs),
    Search(SearchArgs),
}

// ================= //
//  INSTALL COMMAND  //
// ================= //

/// Install a version and print the command to launch it.
///
/// Everything already installed and valid is kept, so running this command twice only
/// checks the installation.
#[derive(Debug, Args)]
pub struct InstallArgs {
    /// The version to install, 'release' or 'snapshot' for the latest version of that
    /// type, or any version id, installed locally or known by the remote version list.
    ///
    /// This is ignored when '--installer' is given, the mod loader installer defines
    /// the version to install.
    #[arg(default_value = "release")]
    pub version: String,
    /// Path to a mod loader installer jar, its libraries are installed and its
    /// processors are run with the JVM given with '--jvm'.
    #[arg(long, value_name = "PATH")]
    pub installer: Option<PathBuf>,
    /// The path to the JVM executable, used for running mod loader processors and in
    /// the printed launch command.
    #[arg(long, env = "CRAFTPIPE_JVM", value_name = "PATH", default_value = "java")]
    pub jvm: PathBuf,
    /// Maximum number of concurrent downloads.
    #[arg(long, env = "CRAFTPIPE_CONCURRENCY", value_name = "COUNT", default_value_t = 32)]
    pub concurrency: usize,
    /// Download all files again, even if they are already present and valid.
    #[arg(long)]
    pub force: bool,
    /// Change the default username of the player.
    #[arg(short = 'u', long, value_name = "NAME", default_value = "Player")]
    pub username: String,
    /// Change the UUID of the player, derived from the username if not given.
    #[arg(short = 'i', long)]
    pub uuid: Option<Uuid>,
    /// The access token given to the game.
    #[arg(long, env = "CRAFTPIPE_ACCESS_TOKEN", value_name = "TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,
    /// Print the launch command once installed, one argument per line.
    #[arg(long)]
    pub print_command: bool,
}

// ================= //
//  SEARCH COMMAND   //
// ================= //

/// Search for versions in the remote version list.
#[derive(Debug, Args)]
pub struct SearchArgs {
    /// Only show versions containing this string.
    pub filter: Option<String>,
    /// Only show versions of this kind.
    #[arg(long, default_value = "all")]
    pub kind: SearchKind,
    /// Maximum number of versions shown, latest first.
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SearchKind {
    All,
    Release,
    Snapshot,
    /// Old alpha and beta versions.
    Old,
}
