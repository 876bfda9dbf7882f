//! Implementation of the 'search' command.

use std::process::ExitCode;
use std::fs;

use chrono::{Local, Utc};

use craftpipe::download::{DownloadItem, Downloader, ReplacePolicy};
use craftpipe::manifest::{VersionList, VersionType, VERSION_LIST_URL};
use craftpipe::progress::ProgressAggregator;

use crate::format::{DATE_FORMAT, TimeDeltaFmt};
use crate::parse::{SearchArgs, SearchKind};

use super::{Cli, log_error};


pub fn search(cli: &Cli, args: &SearchArgs) -> ExitCode {

    let file = cli.main_dir.join("versions").join("version_manifest_v2.json");
    let item = DownloadItem::new(VERSION_LIST_URL, &file);

    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            log_error(&e);
            return ExitCode::FAILURE;
        }
    };

    let res = rt.block_on(async {
        let downloader = Downloader::http()?;
        let progress = ProgressAggregator::detached().create_channel(1.0);
        downloader.download(&item, ReplacePolicy::Replace, &progress, &cli.cancel).await?;
        Ok::<_, Box<dyn std::error::Error>>(())
    });

    if let Err(e) = res {
        log_error(&*e);
        return ExitCode::FAILURE;
    }

    let list = match fs::read(&file) {
        Ok(raw) => VersionList::parse(&raw, &file.display().to_string()),
        Err(e) => {
            log_error(&e);
            return ExitCode::FAILURE;
        }
    };

    let list = match list {
        Ok(list) => list,
        Err(e) => {
            log_error(&e);
            return ExitCode::FAILURE;
        }
    };

    let now = Utc::now();
    let versions = list.versions.iter()
        .filter(|v| match args.kind {
            SearchKind::All => true,
            SearchKind::Release => v.version_type == VersionType::Release,
            SearchKind::Snapshot => v.version_type == VersionType::Snapshot,
            SearchKind::Old => matches!(v.version_type, VersionType::Beta | VersionType::Alpha),
        })
        .filter(|v| args.filter.as_deref().is_none_or(|filter| v.id.contains(filter)))
        .take(args.limit);

    for version in versions {

        let mut flags = "";
        if version.id == list.latest_release || version.id == list.latest_snapshot {
            flags = " (latest)";
        }

        println!("{:<24} {:<10} {} ({}){flags}",
            version.id,
            version.version_type.as_str(),
            version.release_time.with_timezone(&Local).format(DATE_FORMAT),
            TimeDeltaFmt(now.signed_duration_since(version.release_time)));

    }

    ExitCode::SUCCESS

}
