use std::io::ErrorKind;
use std::path::Path;

use crate::{Error, Result};

/// Ordered set of process names read from a watch-list file.
///
/// Names are whitespace separated; duplicates keep their first position.
/// An empty list disables the watcher that owns it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchList {
    names: Vec<String>,
}

impl WatchList {
    pub fn parse(contents: &str) -> Self {
        let mut names: Vec<String> = Vec::new();
        for name in contents.split_whitespace() {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        Self { names }
    }

    /// Load a watch list; a missing file yields an empty list.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let list = Self::parse(&contents);
                log::info!(
                    "Loaded {} name(s) from {}",
                    list.names.len(),
                    path.display()
                );
                Ok(list)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::debug!("No watch list at {}", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(Error::WatchList {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Load from an optional location, logging instead of failing.
    pub fn load_or_empty(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        match Self::load(path) {
            Ok(list) => list,
            Err(e) => {
                log::warn!("{}; watcher disabled", e);
                Self::default()
            }
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_whitespace_and_duplicates() {
        let list = WatchList::parse("steam  obs\n\tblender steam\n");
        assert_eq!(list.names(), ["steam", "obs", "blender"]);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let list = WatchList::load(&dir.path().join("pauselist")).unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "gamescope").unwrap();
        writeln!(file, "wine64-preloader").unwrap();

        let list = WatchList::load(file.path()).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.names()[1], "wine64-preloader");
    }

    #[test]
    fn test_load_or_empty_without_path() {
        assert!(WatchList::load_or_empty(None).is_empty());
    }
}
