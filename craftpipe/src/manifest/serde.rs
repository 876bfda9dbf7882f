//! Raw JSON layout of version manifests, the version list and asset indexes.
//!
//! These types are only deserialized, they mirror the remote documents and are
//! converted into their resolved counterparts by the parent module.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset};

use crate::serde::Sha1HashString;
use crate::maven::Gav;


/// Content of `versions/<id>/<id>.json`, possibly partial when it inherits from
/// another version.
#[derive(serde::Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct VersionMetadata {
    pub id: String,
    #[serde(default)]
    pub r#type: Option<VersionType>,
    #[serde(default, with = "lenient_time::option")]
    pub release_time: Option<DateTime<FixedOffset>>,
    /// Id of the parent version, its values are used as fallback.
    #[serde(default)]
    pub inherits_from: Option<String>,
    #[serde(default)]
    pub java_version: Option<JavaVersion>,
    #[serde(default)]
    pub asset_index: Option<AssetIndexInfo>,
    /// Entry point jars, keyed by `client`, `server` or their mappings.
    #[serde(default)]
    pub downloads: HashMap<String, Download>,
    /// Class path libraries, in class path order.
    #[serde(default)]
    pub libraries: Vec<VersionLibrary>,
    #[serde(default)]
    pub main_class: Option<String>,
    /// Space-separated game arguments of versions predating `arguments`.
    #[serde(default, rename = "minecraftArguments")]
    pub legacy_arguments: Option<String>,
    #[serde(default)]
    pub arguments: Option<Arguments>,
    #[serde(default)]
    pub logging: HashMap<String, LoggingConfig>,
}

#[derive(serde::Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VersionType {
    Release,
    Snapshot,
    OldBeta,
    OldAlpha,
}

#[derive(serde::Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct JavaVersion {
    pub major_version: u32,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct AssetIndexInfo {
    pub id: String,
    #[serde(flatten)]
    pub download: Download,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct VersionLibrary {
    pub name: Gav,
    #[serde(default)]
    pub downloads: LibraryDownloads,
    /// Mapping of OS keys to the natives classifier, which may contain `${arch}`.
    #[serde(default)]
    pub natives: Option<HashMap<String, String>>,
    #[serde(default)]
    pub rules: Option<Vec<Rule>>,
    /// Base URL of a maven repository, used when no download is specified.
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(serde::Deserialize, Debug, Default, Clone)]
pub struct LibraryDownloads {
    #[serde(default)]
    pub artifact: Option<LibraryDownload>,
    #[serde(default)]
    pub classifiers: HashMap<String, LibraryDownload>,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct LibraryDownload {
    /// Repository-relative path, derived from the library name when absent.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(flatten)]
    pub download: Download,
}

#[derive(serde::Deserialize, Debug, Default, Clone)]
pub struct Arguments {
    #[serde(default)]
    pub game: Vec<VersionArgument>,
    #[serde(default)]
    pub jvm: Vec<VersionArgument>,
}

#[derive(serde::Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum VersionArgument {
    Raw(String),
    Conditional(ConditionalArgument),
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct ConditionalArgument {
    pub value: SingleOrVec<String>,
    #[serde(default)]
    pub rules: Option<Vec<Rule>>,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct LoggingConfig {
    /// Argument template, `${path}` is replaced by the configuration file.
    pub argument: String,
    pub file: LoggingFile,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct LoggingFile {
    pub id: String,
    #[serde(flatten)]
    pub download: Download,
}

/// Content of `version_manifest_v2.json`.
#[derive(serde::Deserialize, Debug, Clone)]
pub struct VersionList {
    pub latest: LatestVersions,
    pub versions: Vec<VersionListEntry>,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct LatestVersions {
    pub release: String,
    pub snapshot: String,
}

#[derive(serde::Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct VersionListEntry {
    pub id: String,
    pub url: String,
    pub r#type: VersionType,
    #[serde(with = "lenient_time")]
    pub release_time: DateTime<FixedOffset>,
    #[serde(default)]
    pub sha1: Option<Sha1HashString>,
}

/// Content of `assets/indexes/<id>.json`.
#[derive(serde::Deserialize, Debug, Clone)]
pub struct AssetIndex {
    /// Logical asset path to its object.
    pub objects: HashMap<String, AssetObject>,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct AssetObject {
    pub size: u32,
    pub hash: Sha1HashString,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct Rule {
    pub action: RuleAction,
    #[serde(default)]
    pub os: RuleOs,
    #[serde(default)]
    pub features: HashMap<String, bool>,
}

#[derive(serde::Deserialize, Debug, Default, Clone)]
pub struct RuleOs {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arch: Option<String>,
}

#[derive(serde::Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Allow,
    Disallow,
}

#[derive(serde::Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub url: String,
    #[serde(default)]
    pub size: Option<u32>,
    #[serde(default)]
    pub sha1: Option<Sha1HashString>,
}

#[derive(serde::Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum SingleOrVec<T> {
    Single(T),
    Vec(Vec<T>),
}

/// RFC 3339 date times, also accepting a missing offset which is then UTC. Manifests
/// embedded in mod loader installers have been seen with such times.
mod lenient_time {

    use chrono::{DateTime, FixedOffset};
    use chrono::format::ParseErrorKind;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<FixedOffset>, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = <std::borrow::Cow<'de, str> as serde::Deserialize>::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub fn parse(raw: &str) -> chrono::ParseResult<DateTime<FixedOffset>> {
        match DateTime::parse_from_rfc3339(raw) {
            Err(e) if e.kind() == ParseErrorKind::TooShort =>
                DateTime::parse_from_rfc3339(&format!("{raw}Z")),
            res => res,
        }
    }

    pub mod option {

        use chrono::{DateTime, FixedOffset};

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<FixedOffset>>, D::Error>
        where
            D: serde::Deserializer<'de>,
        {
            super::deserialize(deserializer).map(Some)
        }

    }

}


#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn time_without_offset() {
        let strict = lenient_time::parse("2024-12-09T23:22:49+00:00").unwrap();
        let missing_offset = lenient_time::parse("2024-12-09T23:22:49").unwrap();
        assert_eq!(strict, missing_offset);
        assert!(lenient_time::parse("2024-12-09").is_err());
    }

    #[test]
    fn conditional_argument() {
        let args: Vec<VersionArgument> = serde_json::from_str(r#"[
            "--demo",
            {"rules": [{"action": "allow", "os": {"name": "osx"}}], "value": "-XstartOnFirstThread"},
            {"value": ["--width", "${resolution_width}"]}
        ]"#).unwrap();
        assert!(matches!(&args[0], VersionArgument::Raw(v) if v == "--demo"));
        assert!(matches!(&args[1], VersionArgument::Conditional(ConditionalArgument { value: SingleOrVec::Single(_), rules: Some(rules) }) if rules.len() == 1));
        assert!(matches!(&args[2], VersionArgument::Conditional(ConditionalArgument { value: SingleOrVec::Vec(v), rules: None }) if v.len() == 2));
    }

}
