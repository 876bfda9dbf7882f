//! Path joining utilities, installation paths are built from many small parts.

use std::path::{Component, Path, PathBuf};
use std::ffi::OsStr;


/// Extension to the standard [`Path`].
pub trait PathExt {

    /// Join a file name with its extension, `dir.join_with_extension("1.21", "json")`
    /// gives `dir/1.21.json` even if the name contains dots.
    fn join_with_extension<P: AsRef<Path>, S: AsRef<OsStr>>(&self, name: P, extension: S) -> PathBuf;

    /// Return a new path with the given string appended to its last component, without
    /// any separator.
    fn append<S: AsRef<OsStr>>(&self, s: S) -> PathBuf;

}

impl PathExt for Path {

    fn join_with_extension<P: AsRef<Path>, S: AsRef<OsStr>>(&self, name: P, extension: S) -> PathBuf {
        let mut buf = self.join(name).into_os_string();
        buf.push(".");
        buf.push(extension);
        buf.into()
    }

    fn append<S: AsRef<OsStr>>(&self, s: S) -> PathBuf {
        let mut buf = self.as_os_str().to_os_string();
        buf.push(s);
        buf.into()
    }

}

/// Extension to the standard [`PathBuf`] for chained joins without reallocating.
pub trait PathBufExt {

    /// Return this path joined with another one.
    fn joined<P: AsRef<Path>>(self, path: P) -> Self;

}

impl PathBufExt for PathBuf {

    #[inline]
    fn joined<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.push(path);
        self
    }

}

/// Only accept relative paths made of normal components, such paths from untrusted
/// sources can't escape the directory they are joined to.
pub fn check_relative_path(path: &str) -> Option<PathBuf> {
    let path = Path::new(path);
    path.components()
        .all(|component| matches!(component, Component::Normal(_)))
        .then(|| path.to_path_buf())
}


#[cfg(test)]
mod tests {

    use std::path::Path;

    use super::*;

    #[test]
    fn join_and_append() {
        let dir = Path::new("versions");
        assert_eq!(dir.join_with_extension("1.21.4", "json"), Path::new("versions/1.21.4.json"));
        assert_eq!(dir.join("a.jar").append(".part"), Path::new("versions/a.jar.part"));
        assert_eq!(dir.to_path_buf().joined("a").joined("b"), Path::new("versions/a/b"));
    }

    #[test]
    fn relative_path() {
        assert_eq!(check_relative_path("a/b.jar"), Some(Path::new("a/b.jar").to_path_buf()));
        assert_eq!(check_relative_path("./a"), None);
        assert_eq!(check_relative_path("a/../../b"), None);
        assert_eq!(check_relative_path("/etc/passwd"), None);
    }

}
