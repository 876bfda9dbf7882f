//! Building of the flat list of items to download for a resolved manifest and its
//! asset index.

use std::path::{Path, PathBuf};
use std::io;

use indexmap::IndexMap;

use crate::manifest::{Library, Manifest};
use crate::manifest::serde as manifest_serde;
use crate::download::DownloadItem;
use crate::path::{PathBufExt, PathExt};
use crate::serde::format_hex_bytes;


/// Base URL for downloading game's assets.
pub const RESOURCES_URL: &str = "https://resources.download.minecraft.net/";

/// The directory layout where artifacts are installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub versions_dir: PathBuf,
    pub libraries_dir: PathBuf,
    pub assets_dir: PathBuf,
}

impl Layout {

    /// The standard layout under a main directory.
    pub fn new(main_dir: &Path) -> Self {
        Self {
            versions_dir: main_dir.join("versions"),
            libraries_dir: main_dir.join("libraries"),
            assets_dir: main_dir.join("assets"),
        }
    }

    /// Directory of the given version.
    pub fn version_dir(&self, id: &str) -> PathBuf {
        self.versions_dir.join(id)
    }

    /// The client JAR file of the given version.
    pub fn client_file(&self, id: &str) -> PathBuf {
        self.versions_dir.join(id).join_with_extension(id, "jar")
    }

    /// The file of the given library.
    pub fn library_file(&self, library: &Library) -> PathBuf {
        self.libraries_dir.join(library.path())
    }

    pub fn asset_index_file(&self, id: &str) -> PathBuf {
        self.assets_dir.join("indexes").join_with_extension(id, "json")
    }

    /// The object file of an asset, sharded by the first two hex characters of its hash.
    pub fn asset_object_file(&self, hash: &[u8; 20]) -> PathBuf {
        let hash = format_hex_bytes(hash);
        self.assets_dir.join("objects")
            .joined(&hash[..2])
            .joined(&hash)
    }

    pub fn log_config_file(&self, id: &str) -> PathBuf {
        self.assets_dir.join("log_configs").joined(id)
    }

}

/// The kind of an artifact, allowing to split downloads in groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Client,
    Library,
    Native,
    Asset,
    Logging,
}

/// The asset index of a version, objects are sorted by their logical path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetIndex {
    pub objects: Vec<AssetObject>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetObject {
    pub path: String,
    pub hash: [u8; 20],
    pub size: u32,
}

impl AssetIndex {

    /// Parse an asset index from its raw JSON.
    pub fn parse(raw: &[u8], origin: &str) -> Result<Self> {

        let mut deserializer = serde_json::Deserializer::from_slice(raw);
        let index: manifest_serde::AssetIndex = serde_path_to_error::deserialize(&mut deserializer)
            .map_err(|e| Error::Format { origin: origin.into(), message: e.to_string() })?;

        let mut objects = index.objects.into_iter()
            .map(|(path, object)| AssetObject {
                path,
                hash: object.hash.0,
                size: object.size,
            })
            .collect::<Vec<_>>();

        objects.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(Self { objects })

    }

    /// Read and parse an asset index file.
    pub fn load(file: &Path) -> Result<Self> {
        let raw = std::fs::read(file)
            .map_err(|e| Error::Io { error: e, origin: file.display().to_string().into() })?;
        Self::parse(&raw, &file.display().to_string())
    }

}

/// The set of artifacts to download, unique by destination file.
#[derive(Debug, Clone, Default)]
pub struct ArtifactGraph {
    items: IndexMap<PathBuf, (ArtifactKind, DownloadItem)>,
}

impl ArtifactGraph {

    /// Push an item, ignored if another item already has the same destination.
    pub fn push(&mut self, kind: ArtifactKind, item: DownloadItem) {
        self.items.entry(item.file.clone()).or_insert((kind, item));
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate over all items and their kind.
    pub fn iter(&self) -> impl Iterator<Item = (ArtifactKind, &DownloadItem)> {
        self.items.values().map(|(kind, item)| (*kind, item))
    }

    /// Return the items of the given kinds, in insertion order.
    pub fn items_of(&self, kinds: &[ArtifactKind]) -> Vec<DownloadItem> {
        self.iter()
            .filter(|(kind, _)| kinds.contains(kind))
            .map(|(_, item)| item.clone())
            .collect()
    }

    pub fn into_items(self) -> Vec<DownloadItem> {
        self.items.into_values().map(|(_, item)| item).collect()
    }

}

/// Builder of the download items of a manifest.
#[derive(Debug, Clone)]
pub struct ArtifactGraphBuilder<'a> {
    layout: &'a Layout,
    resources_url: &'a str,
}

impl<'a> ArtifactGraphBuilder<'a> {

    pub fn new(layout: &'a Layout) -> Self {
        Self {
            layout,
            resources_url: RESOURCES_URL,
        }
    }

    /// Use another base URL for asset objects.
    pub fn with_resources_url(mut self, url: &'a str) -> Self {
        self.resources_url = url;
        self
    }

    /// Item of the asset index of the manifest, if any.
    pub fn asset_index_item(&self, manifest: &Manifest) -> Option<DownloadItem> {
        manifest.asset_index.as_ref().map(|index| {
            DownloadItem::new(&index.download.url, self.layout.asset_index_file(&index.id))
                .with_sha1(index.download.sha1)
                .with_size(index.download.size)
        })
    }

    /// Build all items: client, libraries and natives with their rules satisfied,
    /// the logging configuration and every asset object.
    pub fn build(&self, manifest: &Manifest, asset_index: Option<&AssetIndex>) -> ArtifactGraph {

        let mut graph = ArtifactGraph::default();

        if let Some(client) = manifest.download("client") {
            graph.push(ArtifactKind::Client, DownloadItem::new(&client.url, self.layout.client_file(&manifest.id))
                .with_sha1(client.sha1)
                .with_size(client.size));
        }

        self.push_libraries(&mut graph, ArtifactKind::Library, manifest.select_libraries());
        self.push_libraries(&mut graph, ArtifactKind::Native, manifest.select_natives());

        if let Some(logging) = &manifest.logging {
            graph.push(ArtifactKind::Logging, DownloadItem::new(&logging.download.url, self.layout.log_config_file(&logging.id))
                .with_sha1(logging.download.sha1)
                .with_size(logging.download.size));
        }

        if let Some(asset_index) = asset_index {
            self.push_assets(&mut graph, asset_index);
        }

        graph

    }

    /// Push an item for each object of the asset index.
    pub fn push_assets(&self, graph: &mut ArtifactGraph, asset_index: &AssetIndex) {
        for object in &asset_index.objects {
            let hash = format_hex_bytes(&object.hash);
            let url = format!("{}{}/{hash}", self.resources_url, &hash[..2]);
            graph.push(ArtifactKind::Asset, DownloadItem::new(url, self.layout.asset_object_file(&object.hash))
                .with_sha1(Some(object.hash))
                .with_size(Some(object.size)));
        }
    }

    /// Push an item for each library with a downloadable artifact.
    pub fn push_libraries<'l>(&self, graph: &mut ArtifactGraph, kind: ArtifactKind, libraries: impl IntoIterator<Item = &'l Library>) {
        for library in libraries {
            if let Some(artifact) = &library.artifact {
                graph.push(kind, DownloadItem::new(&artifact.url, self.layout.libraries_dir.join(&artifact.path))
                    .with_sha1(artifact.sha1)
                    .with_size(artifact.size));
            }
        }
    }

}

/// The asset index could not be loaded.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid asset index: {message} @ {origin}")]
    Format {
        origin: Box<str>,
        message: String,
    },
    #[error("io: {error} @ {origin}")]
    Io {
        #[source]
        error: io::Error,
        origin: Box<str>,
    },
}

/// Type alias for a result with the artifact error type.
pub type Result<T> = std::result::Result<T, Error>;


#[cfg(test)]
mod tests {

    use std::collections::HashSet;

    use crate::manifest::{Arch, ManifestResolver, Os, Platform};

    use super::*;

    const MANIFEST: &[u8] = br#"{
        "id": "1.21",
        "mainClass": "net.minecraft.client.main.Main",
        "assetIndex": { "id": "17", "url": "https://example.com/17.json", "sha1": "a3bcba436caa849622fd7e1e5b89489ed6c9ac63", "size": 10 },
        "downloads": { "client": { "url": "https://example.com/client.jar", "size": 100 } },
        "logging": { "client": { "argument": "-Dlog4j.configurationFile=${path}", "type": "log4j2-xml", "file": { "id": "client-1.12.xml", "url": "https://example.com/client-1.12.xml" } } },
        "libraries": [
            { "name": "com.example:a:1.0", "downloads": { "artifact": { "path": "a.jar", "url": "https://example.com/a.jar" } } },
            { "name": "com.example:b:1.0", "downloads": { "artifact": { "url": "https://example.com/b.jar" } }, "rules": [{ "action": "allow", "os": { "name": "windows" } }] },
            { "name": "com.example:nat:1.0", "natives": { "linux": "natives-linux" }, "downloads": { "classifiers": { "natives-linux": { "url": "https://example.com/nat.jar" } } } },
            { "name": "com.example:local:1.0" }
        ]
    }"#;

    const ASSET_INDEX: &[u8] = br#"{
        "objects": {
            "icons/icon_16x16.png": { "hash": "bdf48ef6b5d0d23bbb02e17d04865216179f510a", "size": 3665 },
            "icons/icon_32x32.png": { "hash": "92750c5f93c312ba9ab413d546f32190c56d6f1f", "size": 5362 },
            "icons/duplicate.png": { "hash": "92750c5f93c312ba9ab413d546f32190c56d6f1f", "size": 5362 }
        }
    }"#;

    fn build() -> (Layout, ArtifactGraph) {
        let dir = tempfile::tempdir().unwrap();
        let resolver = ManifestResolver::new(dir.path(), Platform::new(Os::Linux, Arch::X86_64));
        let manifest = resolver.resolve(MANIFEST).unwrap();
        let index = AssetIndex::parse(ASSET_INDEX, "test").unwrap();
        let layout = Layout::new(Path::new("/mc"));
        let graph = ArtifactGraphBuilder::new(&layout).build(&manifest, Some(&index));
        (layout, graph)
    }

    #[test]
    fn items() {

        let (layout, graph) = build();

        // Client, library a, native, logging and two unique assets.
        assert_eq!(graph.len(), 6);

        let client = graph.items_of(&[ArtifactKind::Client]);
        assert_eq!(client[0].file, layout.client_file("1.21"));
        assert_eq!(client[0].size, Some(100));

        let libraries = graph.items_of(&[ArtifactKind::Library]);
        assert_eq!(libraries.len(), 1);
        assert_eq!(libraries[0].file, Path::new("/mc/libraries/a.jar"));

        let natives = graph.items_of(&[ArtifactKind::Native]);
        assert_eq!(natives[0].file, Path::new("/mc/libraries/com/example/nat/1.0/nat-1.0-natives-linux.jar"));

        let logging = graph.items_of(&[ArtifactKind::Logging]);
        assert_eq!(logging[0].file, Path::new("/mc/assets/log_configs/client-1.12.xml"));

        let assets = graph.items_of(&[ArtifactKind::Asset]);
        assert_eq!(assets.len(), 2);
        let asset = assets.iter().find(|item| item.url.ends_with("bdf48ef6b5d0d23bbb02e17d04865216179f510a")).unwrap();
        assert_eq!(asset.url, "https://resources.download.minecraft.net/bd/bdf48ef6b5d0d23bbb02e17d04865216179f510a");
        assert_eq!(asset.file, Path::new("/mc/assets/objects/bd/bdf48ef6b5d0d23bbb02e17d04865216179f510a"));
        assert_eq!(asset.size, Some(3665));
        assert!(asset.sha1.is_some());

    }

    #[test]
    fn deterministic() {
        let (_, a) = build();
        let (_, b) = build();
        let a = a.into_items().into_iter().collect::<HashSet<_>>();
        let b = b.into_items().into_iter().collect::<HashSet<_>>();
        assert_eq!(a, b);
    }

    #[test]
    fn asset_index_item() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = ManifestResolver::new(dir.path(), Platform::new(Os::Linux, Arch::X86_64));
        let manifest = resolver.resolve(MANIFEST).unwrap();
        let layout = Layout::new(Path::new("/mc"));
        let item = ArtifactGraphBuilder::new(&layout).asset_index_item(&manifest).unwrap();
        assert_eq!(item.file, Path::new("/mc/assets/indexes/17.json"));
        assert_eq!(item.size, Some(10));
        assert!(item.sha1.is_some());
    }

}
