//! Implementing the logic for the different CLI commands.

mod install;
mod search;

use std::process::{self, ExitCode};
use std::path::{Path, PathBuf};
use std::error::Error;

use tracing_subscriber::EnvFilter;

use craftpipe::task::CancelToken;

use crate::parse::{CliArgs, CliCmd};


pub fn main(args: &CliArgs) -> ExitCode {

    init_tracing(args.verbose);

    // A single Ctrl-C handler for the whole CLI, the first one cancels the running
    // command and the second one exits immediately.
    let cancel = CancelToken::new();
    let handler_cancel = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        if handler_cancel.is_cancelled() {
            process::exit(130);
        }
        eprintln!("Cancelling...");
        handler_cancel.cancel();
    }) {
        tracing::warn!(error = %e, "failed to set the Ctrl-C handler");
    }

    let Some(main_dir) = args.main_dir.as_deref()
        .or_else(|| craftpipe::install::default_main_dir())
        .map(Path::to_path_buf) else {
        eprintln!("error: there is no default main directory for your platform, please specify it using --main-dir");
        return ExitCode::FAILURE;
    };

    let cli = Cli {
        main_dir,
        cancel,
    };

    match &args.cmd {
        CliCmd::Install(install_args) => install::install(&cli, install_args),
        CliCmd::Search(search_args) => search::search(&cli, search_args),
    }

}

/// Shared state of all commands.
#[derive(Debug)]
pub struct Cli {
    pub main_dir: PathBuf,
    pub cancel: CancelToken,
}

/// Install the tracing subscriber, the filter is taken from 'RUST_LOG' if set, or
/// derived from the verbosity level.
fn init_tracing(verbose: u8) {

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "warn",
            1 => "craftpipe=info,warn",
            2 => "craftpipe=debug,info",
            3.. => "trace",
        })
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose >= 2)
        .init();

}

/// Print an error, its display already includes the error it wraps, if any.
pub fn log_error(error: &dyn Error) {
    eprintln!("error: {error}");
}
