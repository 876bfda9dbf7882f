//! Version manifest resolution, evaluating platform rules to select the libraries and
//! arguments that apply to a given platform.
//!
//! A manifest is loaded from `versions/<id>/<id>.json`, possibly inheriting from another
//! version through `inheritsFrom`, the whole hierarchy is then merged into a single
//! immutable [`Manifest`].

pub(crate) mod serde;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::fmt::Write as _;
use std::{env, fmt, fs, io};

use chrono::{DateTime, FixedOffset};

use tracing::{debug, trace};

use crate::path::{check_relative_path, PathExt};
use crate::maven::Gav;


/// Remote list of all versions, to locate a manifest when it's missing locally.
pub const VERSION_LIST_URL: &str = "https://piston-meta.mojang.com/mc/game/version_manifest_v2.json";

/// The default JVM arguments used if no one are presents, such as for old versions.
pub(crate) const LEGACY_JVM_ARGS: &[&str] = &[
    "-Djava.library.path=${natives_directory}",
    "-Dminecraft.launcher.brand=${launcher_name}",
    "-Dminecraft.launcher.version=${launcher_version}",
    "-cp",
    "${classpath}",
];

/// The operating system part of a [`Platform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    Windows,
    Linux,
    Osx,
}

impl Os {

    /// The key of this OS, as used in rules and natives mappings.
    pub fn key(self) -> &'static str {
        match self {
            Os::Windows => "windows",
            Os::Linux => "linux",
            Os::Osx => "osx",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            "windows" => Os::Windows,
            "linux" => Os::Linux,
            "osx" => Os::Osx,
            _ => return None,
        })
    }

}

/// The architecture part of a [`Platform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X86,
    X86_64,
    Arm32,
    Arm64,
}

impl Arch {

    /// The key of this architecture, as used in rules and natives mappings.
    pub fn key(self) -> &'static str {
        match self {
            Arch::X86 => "x86",
            Arch::X86_64 => "x86_64",
            Arch::Arm32 => "arm32",
            Arch::Arm64 => "arm64",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            "x86" => Arch::X86,
            "x86_64" => Arch::X86_64,
            "arm32" => Arch::Arm32,
            "arm64" => Arch::Arm64,
            _ => return None,
        })
    }

    /// The bit-ness of this architecture, used for `${arch}` in natives classifiers.
    pub fn bits(self) -> &'static str {
        match self {
            Arch::X86 | Arch::Arm32 => "32",
            Arch::X86_64 | Arch::Arm64 => "64",
        }
    }

}

/// An explicit platform descriptor, rules are only ever evaluated against one of this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
}

impl Platform {

    #[inline]
    pub const fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }

    /// Return the platform this binary has been compiled for, none if not supported.
    pub fn current() -> Option<Self> {

        let os = match env::consts::OS {
            "windows" => Os::Windows,
            "linux" => Os::Linux,
            "macos" => Os::Osx,
            _ => return None,
        };

        let arch = match env::consts::ARCH {
            "x86" => Arch::X86,
            "x86_64" => Arch::X86_64,
            "arm" => Arch::Arm32,
            "aarch64" => Arch::Arm64,
            _ => return None,
        };

        Some(Self { os, arch })

    }

}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os.key(), self.arch.key())
    }
}

/// A conditional predicate gating a library or an argument group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// True for an allow rule, false for a disallow one.
    pub allow: bool,
    pub os_name: Option<String>,
    pub os_arch: Option<String>,
    /// Set when the rule is gated by features, such features are never enabled.
    pub has_features: bool,
}

impl Rule {

    /// Evaluate this rule against the given platform. The rule applies when all its
    /// constraints match, an applying rule yields its action, a non-applying rule
    /// yields the inverse.
    pub fn is_satisfied(&self, platform: &Platform) -> bool {

        let os_match = self.os_name.as_deref()
            .is_none_or(|name| name == platform.os.key());
        let arch_match = self.os_arch.as_deref()
            .is_none_or(|arch| arch == platform.arch.key());

        // FIXME: Feature-gated rules never apply, so feature arguments are never enabled.
        let applies = os_match && arch_match && !self.has_features;
        applies == self.allow

    }

}

/// Return true if all the given rules are satisfied for the platform, true if empty.
pub fn rules_satisfied(rules: &[Rule], platform: &Platform) -> bool {
    rules.iter().all(|rule| rule.is_satisfied(platform))
}

/// A group of argument values that are included only if all rules are satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentGroup {
    pub values: Vec<String>,
    pub rules: Vec<Rule>,
}

impl ArgumentGroup {

    fn unconditional(value: impl Into<String>) -> Self {
        Self { values: vec![value.into()], rules: Vec::new() }
    }

}

/// A download descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub url: String,
    pub size: Option<u32>,
    pub sha1: Option<[u8; 20]>,
}

/// The downloadable artifact of a library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryArtifact {
    /// Path of the artifact relative to the libraries directory.
    pub path: PathBuf,
    pub url: String,
    pub sha1: Option<[u8; 20]>,
    pub size: Option<u32>,
}

/// A resolved library of a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Library {
    /// The coordinate of this library, for natives it has the classifier resolved for
    /// the manifest's platform, if any.
    pub name: Gav,
    /// None if the library contributes no download, it's then expected to be present.
    pub artifact: Option<LibraryArtifact>,
    pub rules: Vec<Rule>,
    /// True if this library is a native one, selected with a per-OS classifier.
    pub natives: bool,
}

impl Library {

    /// Return true if all rules of this library are satisfied for the platform.
    #[inline]
    pub fn is_rules_satisfied(&self, platform: &Platform) -> bool {
        rules_satisfied(&self.rules, platform)
    }

    /// Path of this library relative to the libraries directory.
    pub fn path(&self) -> PathBuf {
        match &self.artifact {
            Some(artifact) => artifact.path.clone(),
            None => self.name.file(),
        }
    }

}

/// Reference to the asset index of a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetIndexRef {
    pub id: String,
    pub download: Download,
}

/// The logging configuration of the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Logging {
    /// The JVM argument template, with `${path}` to be replaced by the file path.
    pub argument: String,
    /// Identifier of the configuration, this is also its file name.
    pub id: String,
    pub download: Download,
}

/// The type of a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionType {
    Release,
    Snapshot,
    Beta,
    Alpha,
}

impl VersionType {

    pub fn as_str(self) -> &'static str {
        match self {
            VersionType::Release => "release",
            VersionType::Snapshot => "snapshot",
            VersionType::Beta => "old_beta",
            VersionType::Alpha => "old_alpha",
        }
    }

}

impl From<serde::VersionType> for VersionType {
    fn from(value: serde::VersionType) -> Self {
        match value {
            serde::VersionType::Release => Self::Release,
            serde::VersionType::Snapshot => Self::Snapshot,
            serde::VersionType::OldBeta => Self::Beta,
            serde::VersionType::OldAlpha => Self::Alpha,
        }
    }
}

/// A fully resolved version manifest, with its whole hierarchy merged, for a platform.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub id: String,
    pub version_type: Option<VersionType>,
    pub release_time: Option<DateTime<FixedOffset>>,
    pub main_class: String,
    pub game_arguments: Vec<ArgumentGroup>,
    pub jvm_arguments: Vec<ArgumentGroup>,
    pub asset_index: Option<AssetIndexRef>,
    /// Entry point downloads, such as `client`, `server`, `client_mappings`.
    pub downloads: Vec<(String, Download)>,
    /// All libraries, in class path order, rules not yet evaluated.
    pub libraries: Vec<Library>,
    pub logging: Option<Logging>,
    pub java_version: Option<u32>,
    /// The platform this manifest has been resolved for.
    pub platform: Platform,
}

impl Manifest {

    /// Return the download descriptor of the given entry point, like `client`.
    pub fn download(&self, key: &str) -> Option<&Download> {
        self.downloads.iter()
            .find(|(k, _)| k == key)
            .map(|(_, dl)| dl)
    }

    /// Select libraries that are not natives and have their rules satisfied, in order,
    /// the first library of a given group, artifact and classifier wins.
    pub fn select_libraries(&self) -> Vec<&Library> {
        self.select(false)
    }

    /// Select natives libraries that have their rules satisfied.
    pub fn select_natives(&self) -> Vec<&Library> {
        self.select(true)
    }

    fn select(&self, natives: bool) -> Vec<&Library> {

        let mut unique = HashSet::new();
        let mut libraries = Vec::new();

        for lib in &self.libraries {

            if !lib.is_rules_satisfied(&self.platform) {
                continue;
            }

            // Wildcard version, we shouldn't override if the other components match.
            let key = (lib.name.group(), lib.name.artifact(), lib.name.classifier(), lib.name.extension());
            if !unique.insert(key) {
                trace!(name = %lib.name, "duplicated library ignored");
                continue;
            }

            if lib.natives == natives {
                libraries.push(lib);
            }

        }

        libraries

    }

    /// Return the JVM arguments templates with their rules satisfied.
    pub fn jvm_arguments(&self) -> Vec<String> {
        flatten_arguments(&self.jvm_arguments, &self.platform)
    }

    /// Return the game arguments templates with their rules satisfied.
    pub fn game_arguments(&self) -> Vec<String> {
        flatten_arguments(&self.game_arguments, &self.platform)
    }

}

fn flatten_arguments(groups: &[ArgumentGroup], platform: &Platform) -> Vec<String> {
    groups.iter()
        .filter(|group| rules_satisfied(&group.rules, platform))
        .flat_map(|group| group.values.iter().cloned())
        .collect()
}

/// Resolver of manifests from a versions directory, for a given platform.
#[derive(Debug, Clone)]
pub struct ManifestResolver {
    versions_dir: PathBuf,
    platform: Platform,
}

impl ManifestResolver {

    pub fn new(versions_dir: impl Into<PathBuf>, platform: Platform) -> Self {
        Self {
            versions_dir: versions_dir.into(),
            platform,
        }
    }

    #[inline]
    pub fn versions_dir(&self) -> &Path {
        &self.versions_dir
    }

    #[inline]
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Return the path of the manifest file of the given version.
    pub fn manifest_file(&self, id: &str) -> PathBuf {
        self.versions_dir.join(id).join_with_extension(id, "json")
    }

    /// Load the manifest of the given version from the versions directory and resolve
    /// it, with its whole hierarchy.
    pub fn load(&self, id: &str) -> Result<Manifest> {
        let metadata = self.load_metadata(id)?;
        self.resolve_metadata(metadata)
    }

    /// Resolve a raw JSON manifest, parents are loaded from the versions directory.
    pub fn resolve(&self, raw: &[u8]) -> Result<Manifest> {
        let metadata = parse_metadata(raw, "<raw>")?;
        self.resolve_metadata(metadata)
    }

    fn load_metadata(&self, id: &str) -> Result<serde::VersionMetadata> {

        if id.is_empty() {
            return Err(Error::Missing { id: String::new(), file: self.versions_dir.clone() });
        }

        let file = self.manifest_file(id);
        let raw = match fs::read(&file) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound =>
                return Err(Error::Missing { id: id.to_string(), file }),
            Err(e) => return Err(Error::new_io_file(e, &file)),
        };

        debug!(id, file = %file.display(), "loaded manifest file");
        parse_metadata(&raw, &file.display().to_string())

    }

    fn resolve_metadata(&self, root: serde::VersionMetadata) -> Result<Manifest> {

        // Hierarchy from the child (root) to the farthest parent.
        let mut hierarchy = vec![root];
        let mut unique_ids = HashSet::new();
        unique_ids.insert(hierarchy[0].id.clone());

        while let Some(parent_id) = hierarchy.last().and_then(|v| v.inherits_from.clone()) {
            if !unique_ids.insert(parent_id.clone()) {
                return Err(Error::HierarchyLoop { id: parent_id });
            }
            hierarchy.push(self.load_metadata(&parent_id)?);
        }

        let root = &hierarchy[0];
        let origin = root.id.as_str();

        let main_class = hierarchy.iter()
            .find_map(|v| v.main_class.clone())
            .ok_or_else(|| Error::Format { origin: origin.into(), message: "missing mainClass".to_string() })?;

        let mut libraries = Vec::new();
        for version in &hierarchy {
            for lib in &version.libraries {
                libraries.push(self.resolve_library(lib, &version.id)?);
            }
        }

        // Arguments are merged from the farthest parent to the child.
        let mut game_arguments = Vec::new();
        let mut jvm_arguments = Vec::new();
        for version in hierarchy.iter().rev() {
            if let Some(args) = &version.arguments {
                game_arguments.extend(args.game.iter().map(|arg| self.resolve_argument(arg)));
                jvm_arguments.extend(args.jvm.iter().map(|arg| self.resolve_argument(arg)));
            } else if let Some(legacy_args) = &version.legacy_arguments {
                // Legacy arguments always contain the full command line.
                game_arguments = legacy_args.split_whitespace()
                    .map(ArgumentGroup::unconditional)
                    .collect();
            }
        }

        if jvm_arguments.is_empty() {
            jvm_arguments = LEGACY_JVM_ARGS.iter()
                .copied()
                .map(ArgumentGroup::unconditional)
                .collect();
        }

        let mut downloads = Vec::new();
        for version in &hierarchy {
            let mut keys = version.downloads.keys().collect::<Vec<_>>();
            keys.sort();
            for key in keys {
                if downloads.iter().all(|(k, _)| k != key) {
                    downloads.push((key.clone(), convert_download(&version.downloads[key])));
                }
            }
        }

        let asset_index = hierarchy.iter()
            .find_map(|v| v.asset_index.as_ref())
            .map(|index| AssetIndexRef {
                id: index.id.clone(),
                download: convert_download(&index.download),
            });

        let logging = hierarchy.iter()
            .find_map(|v| v.logging.get("client"))
            .map(|logging| Logging {
                argument: logging.argument.clone(),
                id: logging.file.id.clone(),
                download: convert_download(&logging.file.download),
            });

        Ok(Manifest {
            id: root.id.clone(),
            version_type: hierarchy.iter().find_map(|v| v.r#type).map(VersionType::from),
            // The farthest parent is the vanilla version, its release time is the one
            // that matters for platform support.
            release_time: hierarchy.iter().rev().find_map(|v| v.release_time),
            main_class,
            game_arguments,
            jvm_arguments,
            asset_index,
            downloads,
            libraries,
            logging,
            java_version: hierarchy.iter().find_map(|v| v.java_version.as_ref()).map(|j| j.major_version),
            platform: self.platform,
        })

    }

    fn resolve_argument(&self, arg: &serde::VersionArgument) -> ArgumentGroup {
        match arg {
            serde::VersionArgument::Raw(value) => ArgumentGroup::unconditional(value.clone()),
            serde::VersionArgument::Conditional(cond) => ArgumentGroup {
                values: match &cond.value {
                    serde::SingleOrVec::Single(value) => vec![value.clone()],
                    serde::SingleOrVec::Vec(values) => values.clone(),
                },
                rules: convert_rules(cond.rules.as_deref()),
            },
        }
    }

    /// Resolve a single raw library for the platform of this resolver.
    pub(crate) fn resolve_library(&self, lib: &serde::VersionLibrary, version_id: &str) -> Result<Library> {

        let mut name = lib.name.clone();
        let natives = lib.natives.is_some();
        let mut download = None;

        if let Some(lib_natives) = &lib.natives {
            // If natives object is present, the classifier associated to the OS
            // overrides the library classifier. If not existing, the library has no
            // artifact for this platform but we keep it.
            if let Some(classifier) = lib_natives.get(self.platform.os.key()) {
                let classifier = classifier.replace("${arch}", self.platform.arch.bits());
                name = name.with_classifier(Some(classifier.as_str()))
                    .ok_or_else(|| Error::Format {
                        origin: version_id.into(),
                        message: format!("invalid natives classifier for {}: {classifier}", lib.name),
                    })?;
                download = lib.downloads.classifiers.get(&classifier);
            } else {
                return Ok(Library {
                    name,
                    artifact: None,
                    rules: convert_rules(lib.rules.as_deref()),
                    natives,
                });
            }
        } else {
            download = lib.downloads.artifact.as_ref();
        }

        let mut artifact = None;
        if let Some(download) = download {

            let path = match download.path.as_deref() {
                Some(path) => check_relative_path(path)
                    .ok_or_else(|| Error::Format {
                        origin: version_id.into(),
                        message: format!("unsafe library path for {name}: {path}"),
                    })?,
                None => name.file(),
            };

            artifact = Some(LibraryArtifact {
                path,
                url: download.download.url.clone(),
                sha1: download.download.sha1.as_deref().copied(),
                size: download.download.size,
            });

        } else if let Some(repo_url) = &lib.url {

            // If we don't have any download information, it's possible to use the
            // 'url', which is the base URL of a maven repository.
            let mut url = repo_url.clone();
            if !url.ends_with('/') {
                url.push('/');
            }
            let _ = write!(url, "{}", name.url());

            artifact = Some(LibraryArtifact {
                path: name.file(),
                url,
                sha1: None,
                size: None,
            });

        }

        // Libraries with empty URLs have been seen in the wild.
        if artifact.as_ref().is_some_and(|a| a.url.is_empty()) {
            artifact = None;
        }

        Ok(Library {
            name,
            artifact,
            rules: convert_rules(lib.rules.as_deref()),
            natives,
        })

    }

}

/// Parse a version manifest from raw JSON, the origin is used for errors.
pub(crate) fn parse_metadata(raw: &[u8], origin: &str) -> Result<serde::VersionMetadata> {
    let mut deserializer = serde_json::Deserializer::from_slice(raw);
    serde_path_to_error::deserialize(&mut deserializer)
        .map_err(|e| Error::new_json(e, origin))
}

fn convert_download(download: &serde::Download) -> Download {
    Download {
        url: download.url.clone(),
        size: download.size,
        sha1: download.sha1.as_deref().copied(),
    }
}

fn convert_rules(rules: Option<&[serde::Rule]>) -> Vec<Rule> {
    rules.unwrap_or_default()
        .iter()
        .map(|rule| Rule {
            allow: rule.action == serde::RuleAction::Allow,
            os_name: rule.os.name.clone(),
            os_arch: rule.os.arch.clone(),
            has_features: !rule.features.is_empty(),
        })
        .collect()
}

/// The list of versions available remotely.
#[derive(Debug, Clone)]
pub struct VersionList {
    pub latest_release: String,
    pub latest_snapshot: String,
    pub versions: Vec<VersionListEntry>,
}

#[derive(Debug, Clone)]
pub struct VersionListEntry {
    pub id: String,
    pub url: String,
    pub version_type: VersionType,
    pub release_time: DateTime<FixedOffset>,
    pub sha1: Option<[u8; 20]>,
}

impl VersionList {

    /// Parse a version list from its raw JSON.
    pub fn parse(raw: &[u8], origin: &str) -> Result<Self> {

        let mut deserializer = serde_json::Deserializer::from_slice(raw);
        let list: serde::VersionList = serde_path_to_error::deserialize(&mut deserializer)
            .map_err(|e| Error::new_json(e, origin))?;

        Ok(Self {
            latest_release: list.latest.release,
            latest_snapshot: list.latest.snapshot,
            versions: list.versions.into_iter()
                .map(|v| VersionListEntry {
                    id: v.id,
                    url: v.url,
                    version_type: v.r#type.into(),
                    release_time: v.release_time,
                    sha1: v.sha1.map(|h| h.0),
                })
                .collect(),
        })

    }

    /// Find a version by its id, or the `release` and `snapshot` aliases.
    pub fn find(&self, id: &str) -> Option<&VersionListEntry> {
        let id = match id {
            "release" => self.latest_release.as_str(),
            "snapshot" => self.latest_snapshot.as_str(),
            id => id,
        };
        self.versions.iter().find(|v| v.id == id)
    }

}

/// The manifest resolver could not resolve a version.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// No manifest file exists for the given version.
    #[error("missing manifest: {id} @ {}", file.display())]
    Missing {
        id: String,
        file: PathBuf,
    },
    /// The manifest is structurally invalid, such as a missing required field.
    #[error("unknown manifest format: {message} @ {origin}")]
    Format {
        origin: Box<str>,
        message: String,
    },
    /// The given version appears twice in the hierarchy.
    #[error("hierarchy loop: {id}")]
    HierarchyLoop {
        id: String,
    },
    #[error("io: {error} @ {origin}")]
    Io {
        #[source]
        error: io::Error,
        origin: Box<str>,
    },
}

/// Type alias for a result with the manifest error type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {

    #[inline]
    pub(crate) fn new_io_file(error: io::Error, file: impl AsRef<Path>) -> Self {
        Self::Io { error, origin: file.as_ref().display().to_string().into() }
    }

    #[inline]
    pub(crate) fn new_json(error: serde_path_to_error::Error<serde_json::Error>, origin: impl Into<Box<str>>) -> Self {
        Self::Format { origin: origin.into(), message: error.to_string() }
    }

}


#[cfg(test)]
mod tests {

    use super::*;

    const LINUX: Platform = Platform::new(Os::Linux, Arch::X86_64);

    fn rule(allow: bool, os_name: Option<&str>, os_arch: Option<&str>, has_features: bool) -> Rule {
        Rule {
            allow,
            os_name: os_name.map(str::to_string),
            os_arch: os_arch.map(str::to_string),
            has_features,
        }
    }

    fn resolver(dir: &Path) -> ManifestResolver {
        ManifestResolver::new(dir, LINUX)
    }

    #[test]
    fn rule_unconstrained() {
        assert!(rule(true, None, None, false).is_satisfied(&LINUX));
        assert!(!rule(false, None, None, false).is_satisfied(&LINUX));
    }

    #[test]
    fn rule_os_mismatch() {
        assert!(!rule(true, Some("windows"), None, false).is_satisfied(&LINUX));
        assert!(rule(false, Some("osx"), None, false).is_satisfied(&LINUX));
        assert!(rule(true, Some("linux"), None, false).is_satisfied(&LINUX));
        assert!(!rule(false, Some("linux"), None, false).is_satisfied(&LINUX));
    }

    #[test]
    fn rule_arch_and_features() {
        assert!(!rule(true, None, Some("x86"), false).is_satisfied(&LINUX));
        assert!(rule(true, Some("linux"), Some("x86_64"), false).is_satisfied(&LINUX));
        assert!(!rule(true, None, None, true).is_satisfied(&LINUX));
        assert!(rule(false, None, None, true).is_satisfied(&LINUX));
    }

    #[test]
    fn rules_all_satisfied() {
        let rules = [rule(true, None, None, false), rule(false, Some("osx"), None, false)];
        assert!(rules_satisfied(&rules, &LINUX));
        let rules = [rule(true, None, None, false), rule(false, Some("linux"), None, false)];
        assert!(!rules_satisfied(&rules, &LINUX));
        assert!(rules_satisfied(&[], &LINUX));
    }

    #[test]
    fn select_libraries() {

        let raw = br#"{
            "id": "1.0",
            "mainClass": "net.minecraft.client.main.Main",
            "libraries": [
                { "name": "com.example:a:1.0", "downloads": { "artifact": { "path": "a.jar", "url": "https://example.com/a.jar" } } },
                { "name": "com.example:b:1.0", "rules": [{ "action": "allow", "os": { "name": "osx" } }] },
                { "name": "com.example:c:1.0", "rules": [{ "action": "allow" }, { "action": "disallow", "os": { "name": "windows" } }] }
            ]
        }"#;

        let dir = tempfile::tempdir().unwrap();
        let manifest = resolver(dir.path()).resolve(raw).unwrap();

        let names = manifest.select_libraries().iter()
            .map(|lib| lib.name.to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, ["com.example:a:1.0", "com.example:c:1.0"]);
        assert!(manifest.select_natives().is_empty());
        assert_eq!(manifest.libraries[0].path(), Path::new("a.jar"));
        assert_eq!(manifest.libraries[2].path(), Path::new("com/example/c/1.0/c-1.0.jar"));

    }

    #[test]
    fn natives_classifier() {

        let raw = br#"{
            "id": "1.8",
            "mainClass": "net.minecraft.client.main.Main",
            "libraries": [
                {
                    "name": "org.lwjgl.lwjgl:lwjgl-platform:2.9.4",
                    "natives": { "linux": "natives-linux-${arch}", "windows": "natives-windows" },
                    "downloads": { "classifiers": { "natives-linux-64": { "path": "lwjgl-natives.jar", "url": "https://example.com/n.jar", "size": 10 } } }
                },
                {
                    "name": "org.example:osx-only:1.0",
                    "natives": { "osx": "natives-osx" }
                }
            ]
        }"#;

        let dir = tempfile::tempdir().unwrap();
        let manifest = resolver(dir.path()).resolve(raw).unwrap();
        let natives = manifest.select_natives();
        assert_eq!(natives.len(), 2);

        assert_eq!(natives[0].name.classifier(), Some("natives-linux-64"));
        let artifact = natives[0].artifact.as_ref().unwrap();
        assert_eq!(artifact.url, "https://example.com/n.jar");
        assert_eq!(artifact.size, Some(10));

        assert_eq!(natives[1].name.to_string(), "org.example:osx-only:1.0");
        assert!(natives[1].artifact.is_none());
        assert!(manifest.select_libraries().is_empty());

    }

    #[test]
    fn arguments_normalized() {

        let raw = br#"{
            "id": "1.20",
            "mainClass": "net.minecraft.client.main.Main",
            "arguments": {
                "game": [
                    "--username", "${auth_player_name}",
                    { "rules": [{ "action": "allow", "features": { "is_demo_user": true } }], "value": "--demo" }
                ],
                "jvm": [
                    { "rules": [{ "action": "allow", "os": { "name": "linux" } }], "value": ["-Xss1M", "-Dfoo"] },
                    { "rules": [{ "action": "allow", "os": { "name": "windows" } }], "value": "-XX:Windows" },
                    "-cp", "${classpath}"
                ]
            }
        }"#;

        let dir = tempfile::tempdir().unwrap();
        let manifest = resolver(dir.path()).resolve(raw).unwrap();
        assert_eq!(manifest.game_arguments.len(), 3);
        assert_eq!(manifest.game_arguments(), ["--username", "${auth_player_name}"]);
        assert_eq!(manifest.jvm_arguments(), ["-Xss1M", "-Dfoo", "-cp", "${classpath}"]);

    }

    #[test]
    fn legacy_arguments() {

        let raw = br#"{
            "id": "1.5",
            "mainClass": "net.minecraft.client.Minecraft",
            "minecraftArguments": "${auth_player_name}  ${auth_session}"
        }"#;

        let dir = tempfile::tempdir().unwrap();
        let manifest = resolver(dir.path()).resolve(raw).unwrap();
        assert_eq!(manifest.game_arguments(), ["${auth_player_name}", "${auth_session}"]);
        assert_eq!(manifest.jvm_arguments(), LEGACY_JVM_ARGS);

    }

    #[test]
    fn hierarchy() {

        let dir = tempfile::tempdir().unwrap();
        let parent_dir = dir.path().join("1.21");
        fs::create_dir_all(&parent_dir).unwrap();
        fs::write(parent_dir.join("1.21.json"), br#"{
            "id": "1.21",
            "type": "release",
            "releaseTime": "2024-06-13T08:24:03+00:00",
            "mainClass": "net.minecraft.client.main.Main",
            "arguments": { "game": ["--parent"], "jvm": ["-cp", "${classpath}"] },
            "assetIndex": { "id": "17", "url": "https://example.com/17.json" },
            "downloads": { "client": { "url": "https://example.com/client.jar" } },
            "libraries": [
                { "name": "com.example:shared:1.0" },
                { "name": "com.example:parent:1.0" }
            ]
        }"#).unwrap();

        let raw = br#"{
            "id": "fabric-1.21",
            "inheritsFrom": "1.21",
            "releaseTime": "2024-12-09T23:22:49.408008176",
            "mainClass": "net.fabricmc.loader.impl.launch.knot.KnotClient",
            "arguments": { "game": ["--child"] },
            "libraries": [
                { "name": "com.example:shared:2.0" }
            ]
        }"#;

        let manifest = resolver(dir.path()).resolve(raw).unwrap();
        assert_eq!(manifest.id, "fabric-1.21");
        assert_eq!(manifest.main_class, "net.fabricmc.loader.impl.launch.knot.KnotClient");
        assert_eq!(manifest.version_type, Some(VersionType::Release));
        assert_eq!(manifest.game_arguments(), ["--parent", "--child"]);
        assert_eq!(manifest.asset_index.as_ref().unwrap().id, "17");
        assert!(manifest.download("client").is_some());
        assert_eq!(manifest.release_time.unwrap().to_rfc3339(), "2024-06-13T08:24:03+00:00");

        let names = manifest.select_libraries().iter()
            .map(|lib| lib.name.to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, ["com.example:shared:2.0", "com.example:parent:1.0"]);

    }

    #[test]
    fn hierarchy_loop() {

        let dir = tempfile::tempdir().unwrap();
        for (id, parent) in [("a", "b"), ("b", "a")] {
            let version_dir = dir.path().join(id);
            fs::create_dir_all(&version_dir).unwrap();
            fs::write(version_dir.join(format!("{id}.json")), format!(r#"{{ "id": "{id}", "inheritsFrom": "{parent}" }}"#)).unwrap();
        }

        assert!(matches!(resolver(dir.path()).load("a"), Err(Error::HierarchyLoop { id }) if id == "a"));

    }

    #[test]
    fn missing_and_format() {

        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(resolver(dir.path()).load("nope"), Err(Error::Missing { id, .. }) if id == "nope"));
        assert!(matches!(resolver(dir.path()).resolve(br#"{ "mainClass": "Main" }"#), Err(Error::Format { .. })));
        assert!(matches!(resolver(dir.path()).resolve(br#"{ "id": "x" }"#), Err(Error::Format { .. })));

        let raw = br#"{ "id": "x", "mainClass": "Main", "libraries": [
            { "name": "a:b:1", "downloads": { "artifact": { "path": "../../evil.jar", "url": "https://example.com" } } }
        ] }"#;
        assert!(matches!(resolver(dir.path()).resolve(raw), Err(Error::Format { .. })));

    }

    #[test]
    fn version_list() {

        let raw = br#"{
            "latest": { "release": "1.21.4", "snapshot": "25w02a" },
            "versions": [
                { "id": "25w02a", "type": "snapshot", "url": "https://example.com/25w02a.json", "releaseTime": "2025-01-08T13:00:24+00:00" },
                { "id": "1.21.4", "type": "release", "url": "https://example.com/1.21.4.json", "releaseTime": "2024-12-03T10:12:57+00:00", "sha1": "a3bcba436caa849622fd7e1e5b89489ed6c9ac63" }
            ]
        }"#;

        let list = VersionList::parse(raw, "test").unwrap();
        assert_eq!(list.find("release").unwrap().id, "1.21.4");
        assert_eq!(list.find("snapshot").unwrap().version_type, VersionType::Snapshot);
        assert!(list.find("1.21.4").unwrap().sha1.is_some());
        assert!(list.find("1.0").is_none());

    }

}
