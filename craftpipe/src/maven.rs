//! Maven coordinates, known as GAV, and their repository layout.

use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::borrow::Cow;
use std::fmt;


/// The default extension of an artifact, it's never stored.
const DEFAULT_EXTENSION: &str = "jar";

/// A maven coordinate, known as GAV for Group, Artifact, Version, with an optional
/// classifier and extension: `group:artifact:version[:classifier][@extension]`.
///
/// All parts are non-empty and only made of ASCII alphanumerics, `-_+.` (without any
/// `..`), so they are safe to join into paths and URLs. The `jar` extension is the
/// default one and is never explicitly stored, so `a:b:1@jar` equals `a:b:1`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Gav {
    group: Box<str>,
    artifact: Box<str>,
    version: Box<str>,
    classifier: Option<Box<str>>,
    extension: Option<Box<str>>,
}

impl Gav {

    /// Create a new coordinate, none if any part is empty or has invalid characters.
    pub fn new(group: &str, artifact: &str, version: &str, classifier: Option<&str>, extension: Option<&str>) -> Option<Self> {

        fn part(s: &str) -> Option<Box<str>> {
            is_valid_part(s).then(|| Box::from(s))
        }

        Some(Self {
            group: part(group)?,
            artifact: part(artifact)?,
            version: part(version)?,
            classifier: match classifier {
                Some(classifier) => Some(part(classifier)?),
                None => None,
            },
            extension: match extension {
                Some(DEFAULT_EXTENSION) | None => None,
                Some(extension) => Some(part(extension)?),
            },
        })

    }

    /// Return the group, its dot-separated parts are directories in a repository.
    #[inline]
    pub fn group(&self) -> &str {
        &self.group
    }

    #[inline]
    pub fn artifact(&self) -> &str {
        &self.artifact
    }

    #[inline]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[inline]
    pub fn with_version(&self, version: &str) -> Option<Self> {
        Self::new(self.group(), self.artifact(), version, self.classifier(), Some(self.extension()))
    }

    #[inline]
    pub fn classifier(&self) -> Option<&str> {
        self.classifier.as_deref()
    }

    #[inline]
    pub fn with_classifier(&self, classifier: Option<&str>) -> Option<Self> {
        Self::new(self.group(), self.artifact(), self.version(), classifier, Some(self.extension()))
    }

    /// Return the extension of the artifact file, `jar` by default.
    #[inline]
    pub fn extension(&self) -> &str {
        self.extension.as_deref().unwrap_or(DEFAULT_EXTENSION)
    }

    /// Return the name of the artifact file: `artifact-version[-classifier].extension`.
    pub fn file_name(&self) -> String {
        let mut name = format!("{}-{}", self.artifact, self.version);
        if let Some(classifier) = &self.classifier {
            name.push('-');
            name.push_str(classifier);
        }
        name.push('.');
        name.push_str(self.extension());
        name
    }

    /// Get a URL path formatter for this coordinate, to be appended to the base URL of
    /// a repository, for example `net.minecraft:client:1.21.1` gives
    /// `net/minecraft/client/1.21.1/client-1.21.1.jar`.
    #[inline]
    pub fn url(&self) -> GavUrl<'_> {
        GavUrl(self)
    }

    /// Return the repository-relative file path, with the same layout as [`Self::url`].
    pub fn file(&self) -> PathBuf {
        let mut buf = self.group.split('.').collect::<PathBuf>();
        buf.push(&*self.artifact);
        buf.push(&*self.version);
        buf.push(self.file_name());
        buf
    }

    /// Parse a repository-relative file path, as produced by [`Self::file`], back into
    /// its coordinate. The group is made of all leading directories, followed by the
    /// artifact and version directories, the file name must then start with the artifact
    /// and the version, optionally followed by a classifier, and then an extension.
    pub fn from_file(file: &Path) -> Option<Self> {

        let parts = file.components()
            .map(|component| match component {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;

        let [group_parts @ .., artifact, version, file_name] = &parts[..] else {
            return None;
        };

        if group_parts.is_empty() {
            return None;
        }

        let rem = file_name
            .strip_prefix(*artifact)?
            .strip_prefix('-')?
            .strip_prefix(*version)?;

        let (name, extension) = rem.rsplit_once('.')?;
        let classifier = match name {
            "" => None,
            name => Some(name.strip_prefix('-')?),
        };

        Self::new(&group_parts.join("."), artifact, version, classifier, Some(extension))

    }

}

impl FromStr for Gav {

    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {

        let (coord, extension) = match s.split_once('@') {
            Some((coord, extension)) => (coord, Some(extension)),
            None => (s, None),
        };

        let mut parts = coord.split(':');
        let (Some(group), Some(artifact), Some(version)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(());
        };
        let classifier = parts.next();

        if parts.next().is_some() {
            return Err(());
        }

        Self::new(group, artifact, version, classifier, extension).ok_or(())

    }

}

impl fmt::Display for Gav {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.artifact, self.version)?;
        if let Some(classifier) = &self.classifier {
            write!(f, ":{classifier}")?;
        }
        if let Some(extension) = &self.extension {
            write!(f, "@{extension}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Gav {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Gav").field(&format_args!("{self}")).finish()
    }
}

impl<'de> serde::Deserialize<'de> for Gav {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = <Cow<'de, str> as serde::Deserialize>::deserialize(deserializer)?;
        raw.parse().map_err(|()| serde::de::Error::invalid_value(
            serde::de::Unexpected::Str(&raw),
            &"a gav (group:artifact:version[:classifier][@extension])"))
    }
}

impl serde::Serialize for Gav {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

/// URL path formatter for a coordinate.
pub struct GavUrl<'a>(&'a Gav);

impl fmt::Display for GavUrl<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let gav = self.0;
        for group_part in gav.group.split('.') {
            write!(f, "{group_part}/")?;
        }
        write!(f, "{}/{}/{}", gav.artifact, gav.version, gav.file_name())
    }
}

/// Check that a part is not empty, and only has ASCII alphanumerics, `-_+` and dots,
/// but no two consecutive dots.
fn is_valid_part(s: &str) -> bool {
    !s.is_empty()
        && !s.contains("..")
        && s.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'+' | b'.'))
}


#[cfg(test)]
mod tests {

    use std::path::Path;
    use super::Gav;

    fn gav(s: &str) -> Gav {
        s.parse().unwrap()
    }

    #[test]
    fn invalid() {
        for case in [
            "", ":", "::", "a:b", "a:b:", ":b:1", "a::1",
            "a:b:1:", "a:b:1@", "a:b:1:c:d", "a:b:1@x@y",
            "a..b:c:1", "a:/b:1", "a:b:!1",
        ] {
            assert_eq!(case.parse::<Gav>(), Err(()), "{case}");
        }
        assert!(Gav::new("a", "b", "1", Some(""), None).is_none());
    }

    #[test]
    fn parts() {

        let g = gav("foo.bar:baz:0.1.2-beta");
        assert_eq!((g.group(), g.artifact(), g.version()), ("foo.bar", "baz", "0.1.2-beta"));
        assert_eq!(g.classifier(), None);
        assert_eq!(g.extension(), "jar");

        let g = gav("foo.bar:baz:0.1.2-beta:natives@txt");
        assert_eq!(g.classifier(), Some("natives"));
        assert_eq!(g.extension(), "txt");
        assert_eq!(g.to_string(), "foo.bar:baz:0.1.2-beta:natives@txt");

    }

    #[test]
    fn jar_canonicalized() {
        assert_eq!(gav("a.b:c:1@jar"), gav("a.b:c:1"));
        assert_eq!(gav("a.b:c:1@jar").to_string(), "a.b:c:1");
    }

    #[test]
    fn modify() {
        let g = gav("foo.bar:baz:0.1.2-beta");
        assert_eq!(g.with_version("0.1.3").unwrap().to_string(), "foo.bar:baz:0.1.3");
        assert_eq!(g.with_classifier(Some("natives")).unwrap().to_string(), "foo.bar:baz:0.1.2-beta:natives");
        assert_eq!(g.with_classifier(Some("natives")).unwrap().with_classifier(None).unwrap(), g);
    }

    #[test]
    fn url_and_file() {
        let g = gav("foo.bar:baz:0.1.2-beta:natives");
        assert_eq!(g.url().to_string(), "foo/bar/baz/0.1.2-beta/baz-0.1.2-beta-natives.jar");
        assert_eq!(g.file(), Path::new("foo/bar/baz/0.1.2-beta/baz-0.1.2-beta-natives.jar"));
    }

    #[test]
    fn file_round_trip() {
        for raw in [
            "foo.bar:baz:0.1.2-beta",
            "foo.bar:baz:0.1.2-beta:natives-linux",
            "org.lwjgl:lwjgl:3.3.1:natives-macos-arm64",
            "foo:baz-core:1.0@zip",
        ] {
            let g = gav(raw);
            assert_eq!(Gav::from_file(&g.file()), Some(g), "{raw}");
        }
    }

    #[test]
    fn from_file_invalid() {
        for file in [
            "baz/0.1/baz-0.1.jar",
            "foo/baz/0.1/other-0.1.jar",
            "foo/baz/0.1/baz-0.2.jar",
            "foo/baz/0.1/baz-0.1",
            "/foo/baz/0.1/baz-0.1.jar",
            "../baz/0.1/baz-0.1.jar",
        ] {
            assert_eq!(Gav::from_file(Path::new(file)), None, "{file}");
        }
    }

    #[test]
    fn serde() {
        let g: Gav = serde_json::from_str(r#""a.b:c:1:natives""#).unwrap();
        assert_eq!(g, gav("a.b:c:1:natives"));
        assert_eq!(serde_json::to_string(&g).unwrap(), r#""a.b:c:1:natives""#);
        assert!(serde_json::from_str::<Gav>(r#""a.b""#).is_err());
    }

}
