//! JSON schemas of mod loader installer profiles.

use std::collections::HashMap;

use crate::manifest::serde::VersionLibrary;
use crate::maven::Gav;


/// The `install_profile.json` file at the root of an installer jar.
#[derive(serde::Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InstallProfile {
    /// The identifier of the installed version.
    pub version: String,
    /// Path, within the installer, of the version manifest to install.
    pub json: String,
    /// Coordinate of the mod loader's own library, if any.
    #[serde(default)]
    pub path: Option<Gav>,
    /// The game version this installer applies to.
    pub minecraft: String,
    #[serde(default)]
    pub data: HashMap<String, SidedData>,
    #[serde(default)]
    pub processors: Vec<Processor>,
    #[serde(default)]
    pub libraries: Vec<VersionLibrary>,
}

#[derive(serde::Deserialize, Debug, Clone, Default)]
pub struct SidedData {
    /// Value on the client side, the server value is not used.
    #[serde(default)]
    pub client: String,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct Processor {
    #[serde(default)]
    pub sides: Option<Vec<String>>,
    pub jar: Gav,
    #[serde(default)]
    pub classpath: Vec<Gav>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Mapping of output file templates to their expected SHA-1 templates.
    #[serde(default)]
    pub outputs: HashMap<String, String>,
}
