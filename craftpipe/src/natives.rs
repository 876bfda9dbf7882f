//! Remapping of native libraries to builds that exist for the target architecture, and
//! extraction of native binaries from their archives.
//!
//! The knowledge of which native builds exist for which platform is kept in a
//! versioned JSON table, bundled with the crate, so that it can be updated without
//! touching the mapping logic.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::ffi::OsStr;

use chrono::{DateTime, FixedOffset};

use tracing::{debug, warn};

use zip::ZipArchive;

use crate::manifest::{Arch, Library, LibraryArtifact, Manifest, Os};
use crate::serde::{RegexString, Sha1HashString};


/// The natives table bundled with this crate.
const BUNDLED_TABLE: &str = include_str!("natives.json");

/// The only schema version of the natives table supported by this crate.
pub const TABLE_SCHEMA: u32 = 1;

/// Unix timestamp of the release date of 1.19 (2022-06-07), versions released from that
/// date ship their own architecture-specific natives.
const REMAP_CUTOFF_TIMESTAMP: i64 = 1654560000;

/// A table of native library substitutions.
#[derive(Debug, Clone)]
pub struct NativesTable {
    entries: Vec<NativesEntry>,
}

/// One entry of the natives table. Libraries match if their group is equal, their
/// artifact and version match the regexes and if the target platform matches.
#[derive(serde::Deserialize, Debug, Clone)]
pub struct NativesEntry {
    pub group: String,
    pub artifact: RegexString,
    pub version: RegexString,
    #[serde(default)]
    pub os: Option<String>,
    pub arch: String,
    /// The classifier replacing the natives classifier.
    pub classifier: String,
    /// The version replacing the library version, for both the natives and the
    /// matching non-natives libraries.
    #[serde(default)]
    pub new_version: Option<String>,
    /// Base URL of the maven repository hosting the replacement.
    pub repository: String,
    /// Expected SHA-1 of replacement artifacts, keyed by their file name. Artifacts
    /// missing from this map are downloaded without verification.
    #[serde(default)]
    pub sha1: HashMap<String, Sha1HashString>,
}

#[derive(serde::Deserialize)]
struct RawTable {
    schema: u32,
    entries: Vec<NativesEntry>,
}

impl NativesTable {

    /// Parse a natives table from its JSON.
    pub fn parse(raw: &str) -> Result<Self> {

        let mut deserializer = serde_json::Deserializer::from_str(raw);
        let table: RawTable = serde_path_to_error::deserialize(&mut deserializer)
            .map_err(|e| Error::Format { message: e.to_string() })?;

        if table.schema != TABLE_SCHEMA {
            return Err(Error::Schema { schema: table.schema });
        }

        Ok(Self { entries: table.entries })

    }

    /// The table bundled with this crate.
    pub fn bundled() -> Result<Self> {
        Self::parse(BUNDLED_TABLE)
    }

    #[inline]
    pub fn entries(&self) -> &[NativesEntry] {
        &self.entries
    }

    fn find(&self, library: &Library, os: Os, arch: Arch) -> Option<&NativesEntry> {
        self.entries.iter().find(|entry| {
            entry.arch == arch.key()
                && entry.os.as_deref().is_none_or(|entry_os| entry_os == os.key())
                && entry.group == library.name.group()
                && entry.artifact.is_match(library.name.artifact())
                && entry.version.is_match(library.name.version())
        })
    }

}

/// Rewrites native libraries of manifests into their architecture-specific builds.
#[derive(Debug, Clone)]
pub struct NativeLibraryMapper {
    table: NativesTable,
}

impl NativeLibraryMapper {

    pub fn new(table: NativesTable) -> Self {
        Self { table }
    }

    /// A mapper using the bundled table.
    pub fn bundled() -> Result<Self> {
        NativesTable::bundled().map(Self::new)
    }

    #[inline]
    pub fn table(&self) -> &NativesTable {
        &self.table
    }

    /// Return true if natives of the given manifest are eligible for remapping, this
    /// is only the case for versions released before the cutoff.
    pub fn is_eligible(&self, manifest: &Manifest) -> bool {
        // FIXME: Versions without release time are never remapped, and the cutoff does
        // not account for snapshots of 1.19 that already ship arm natives.
        manifest.release_time.is_some_and(|time| time < remap_cutoff())
    }

    /// Return a copy of the manifest with its matching libraries remapped for the
    /// target architecture, other libraries are unchanged.
    pub fn remap(&self, manifest: &Manifest, arch: Arch) -> Manifest {

        let mut remapped = manifest.clone();
        if !self.is_eligible(manifest) {
            return remapped;
        }

        let os = manifest.platform.os;
        for library in &mut remapped.libraries {
            if let Some(replacement) = self.remap_library(library, os, arch) {
                debug!(from = %library.name, to = %replacement.name, "remapped native library");
                *library = replacement;
            }
        }

        remapped

    }

    /// Return the replacement of a single library, none if it's unchanged. Natives
    /// libraries receive the entry's classifier, other libraries only have their
    /// version replaced, if the entry does.
    pub fn remap_library(&self, library: &Library, os: Os, arch: Arch) -> Option<Library> {

        let entry = self.table.find(library, os, arch)?;

        let mut name = library.name.clone();
        if let Some(version) = &entry.new_version {
            name = name.with_version(version)?;
        }

        if library.natives {
            name = name.with_classifier(Some(entry.classifier.as_str()))?;
        } else if entry.new_version.is_none() {
            return None;
        }

        if name == library.name {
            return None;
        }

        let mut url = entry.repository.clone();
        if !url.ends_with('/') {
            url.push('/');
        }
        url.push_str(&name.url().to_string());

        let sha1 = entry.sha1.get(&name.file_name()).map(|sha1| sha1.0);
        if sha1.is_none() {
            debug!(name = %name, "no known sha1 for remapped library");
        }

        Some(Library {
            artifact: Some(LibraryArtifact {
                path: name.file(),
                url,
                sha1,
                size: None,
            }),
            name,
            rules: library.rules.clone(),
            natives: library.natives,
        })

    }

}

fn remap_cutoff() -> DateTime<FixedOffset> {
    DateTime::from_timestamp(REMAP_CUTOFF_TIMESTAMP, 0)
        .unwrap_or_default()
        .fixed_offset()
}

/// The outcome of a natives extraction.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Binary files written into the destination directory.
    pub extracted: Vec<PathBuf>,
    /// Archives that were missing and skipped.
    pub missing: Vec<PathBuf>,
}

/// Extract the binaries (`.so`, `.dll`, `.dylib`) of the given native archives into the
/// destination directory, flattened. Archives that are missing are logged and skipped,
/// plain binary files are copied as-is.
pub fn extract_natives(archives: &[PathBuf], dest_dir: &Path) -> Result<Extraction> {

    fs::create_dir_all(dest_dir)
        .map_err(|e| Error::new_io_file(e, dest_dir))?;

    let mut extraction = Extraction::default();

    for src_file in archives {

        let reader = match File::open(src_file) {
            Ok(file) => BufReader::new(file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(file = %src_file.display(), "missing native archive, skipped");
                extraction.missing.push(src_file.clone());
                continue;
            }
            Err(e) => return Err(Error::new_io_file(e, src_file)),
        };

        let ext = src_file.extension()
            .map(OsStr::as_encoded_bytes)
            .unwrap_or_default();

        if !matches!(ext, b"zip" | b"jar") {
            if is_native_binary(src_file) && let Some(file_name) = src_file.file_name() {
                let dst_file = dest_dir.join(file_name);
                fs::copy(src_file, &dst_file)
                    .map_err(|e| Error::new_io_file(e, &dst_file))?;
                extraction.extracted.push(dst_file);
            }
            continue;
        }

        let mut archive = ZipArchive::new(reader)
            .map_err(|e| Error::Zip { error: e, origin: src_file.display().to_string().into() })?;

        for i in 0..archive.len() {

            let mut file = archive.by_index(i)
                .map_err(|e| Error::Zip { error: e, origin: src_file.display().to_string().into() })?;

            let Some(file_path) = file.enclosed_name() else {
                continue;
            };

            if !is_native_binary(&file_path) {
                continue;
            }

            let Some(file_name) = file_path.file_name() else {
                continue;
            };

            let dst_file = dest_dir.join(file_name);
            let mut writer = File::create(&dst_file)
                .map_err(|e| Error::new_io_file(e, &dst_file))?;

            io::copy(&mut file, &mut writer)
                .map_err(|e| Error::new_io_file(e, &dst_file))?;

            extraction.extracted.push(dst_file);

        }

        debug!(file = %src_file.display(), "extracted native archive");

    }

    Ok(extraction)

}

fn is_native_binary(file: &Path) -> bool {
    file.extension()
        .is_some_and(|ext| matches!(ext.as_encoded_bytes(), b"so" | b"dll" | b"dylib"))
}

/// The natives table is invalid or the natives could not be extracted.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid natives table: {message}")]
    Format {
        message: String,
    },
    #[error("unsupported natives table schema: {schema}")]
    Schema {
        schema: u32,
    },
    #[error("zip: {error} @ {origin}")]
    Zip {
        #[source]
        error: zip::result::ZipError,
        origin: Box<str>,
    },
    #[error("io: {error} @ {origin}")]
    Io {
        #[source]
        error: io::Error,
        origin: Box<str>,
    },
}

/// Type alias for a result with the natives error type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {

    #[inline]
    pub(crate) fn new_io_file(error: io::Error, file: impl AsRef<Path>) -> Self {
        Self::Io { error, origin: file.as_ref().display().to_string().into() }
    }

}
