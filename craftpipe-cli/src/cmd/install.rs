//! Implementation of the 'install' command.

use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Mutex;

use craftpipe::download::ReplacePolicy;
use craftpipe::install::{Account, Event, Handler, Installer};

use crate::parse::InstallArgs;

use super::{Cli, log_error};


pub fn install(cli: &Cli, args: &InstallArgs) -> ExitCode {

    let mut account = Account::offline(&args.username);
    if let Some(uuid) = args.uuid {
        account.uuid = uuid;
    }
    if let Some(access_token) = &args.access_token {
        account.access_token = access_token.clone();
        account.user_type = "msa".to_string();
    }

    let mut installer = Installer::new(&args.version);
    installer
        .set_main_dir(&cli.main_dir)
        .set_jvm_file(&args.jvm)
        .set_concurrency(args.concurrency)
        .set_account(account)
        .set_launcher_name("craftpipe")
        .set_launcher_version(env!("CARGO_PKG_VERSION"))
        .set_cancel_token(cli.cancel.clone());

    if args.force {
        installer.set_replace_policy(ReplacePolicy::Replace);
    }

    if let Some(installer_file) = &args.installer {
        installer.set_modloader(installer_file);
    }

    let instance = match installer.install_blocking(CliHandler::default()) {
        Ok(instance) => instance,
        Err(e) => {
            // Progress line is left unterminated.
            eprintln!();
            log_error(&e);
            return ExitCode::FAILURE;
        }
    };

    println!("Installed {} in {}", instance.version, cli.main_dir.display());

    if args.print_command {
        let command = instance.command();
        println!("{}", command.get_program().to_string_lossy());
        for arg in command.get_args() {
            println!("{}", arg.to_string_lossy());
        }
    }

    ExitCode::SUCCESS

}

/// Handler printing installation events to the standard error.
#[derive(Debug, Default)]
struct CliHandler {
    /// Last total progress printed, in percent.
    last_percent: Mutex<Option<u32>>,
}

impl CliHandler {

    fn line(&self, message: std::fmt::Arguments<'_>) {
        let mut stderr = io::stderr().lock();
        // Erase the progress line, if any.
        if self.last_percent.lock().map(|p| p.is_some()).unwrap_or(false) {
            let _ = write!(stderr, "\r\x1b[K");
        }
        let _ = writeln!(stderr, "{message}");
    }

}

impl Handler for CliHandler {
    fn on_event(&self, event: Event<'_>) {
        match event {
            Event::InstallerUnpacked { version, dir } =>
                self.line(format_args!("Unpacked installer for {version} in {}", dir.display())),
            Event::ManifestFetching { id } =>
                self.line(format_args!("Fetching manifest {id}")),
            Event::ManifestLoaded { manifest } =>
                self.line(format_args!("Loaded manifest {} ({} libraries)", manifest.id, manifest.libraries.len())),
            Event::NativesRemapped { count } if count > 0 =>
                self.line(format_args!("Remapped {count} native libraries")),
            Event::AssetIndexLoaded { id, count } =>
                self.line(format_args!("Loaded asset index {id} ({count} objects)")),
            Event::LibrariesSelected { libraries, natives } =>
                self.line(format_args!("Selected {libraries} libraries and {natives} natives")),
            Event::NativeMissing { file } =>
                self.line(format_args!("Missing native archive, skipped: {}", file.display())),
            Event::NativesExtracted { dir, count } =>
                self.line(format_args!("Extracted {count} natives in {}", dir.display())),
            Event::ProcessorStarted { index, jar } =>
                self.line(format_args!("Running processor #{index}: {jar}")),
            Event::ProcessorSkipped { index, jar } =>
                self.line(format_args!("Skipped processor #{index}, outputs are valid: {jar}")),
            Event::Progress { total } => {
                let percent = (total * 100.0) as u32;
                let Ok(mut last) = self.last_percent.lock() else { return };
                if *last != Some(percent) {
                    *last = Some(percent);
                    let mut stderr = io::stderr().lock();
                    let _ = write!(stderr, "\r\x1b[K[{percent:>3}%] Installing...");
                    let _ = stderr.flush();
                }
            }
            Event::Installed { .. } => {
                if let Ok(mut last) = self.last_percent.lock() && last.take().is_some() {
                    eprintln!();
                }
            }
            _ => {}
        }
    }
}
