use anyhow::{Context, Result};
use glob::glob;
use rand::rng;
use rand::seq::SliceRandom;
use std::fs;
use std::path::{Path, PathBuf};

/// Extensions treated as still images (shown for the slideshow interval)
const STILL_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp", "tif", "tiff"];

/// Extensions read as playlist files rather than media
const PLAYLIST_EXTENSIONS: &[&str] = &["m3u", "m3u8", "txt"];

/// A single playable entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistEntry {
    File(PathBuf),
    Url(String),
}

impl PlaylistEntry {
    fn parse(entry: &str, base: Option<&Path>) -> Self {
        if is_url(entry) {
            return PlaylistEntry::Url(entry.to_string());
        }

        let expanded = shellexpand::tilde(entry);
        let path = Path::new(expanded.as_ref());
        match base {
            Some(base) if path.is_relative() => PlaylistEntry::File(base.join(path)),
            _ => PlaylistEntry::File(path.to_path_buf()),
        }
    }

    /// Whether this entry is a still image
    pub fn is_still(&self) -> bool {
        let path = match self {
            PlaylistEntry::File(path) => path.as_path(),
            PlaylistEntry::Url(url) => Path::new(url.split(['?', '#']).next().unwrap_or(url)),
        };
        has_extension(path, STILL_EXTENSIONS)
    }

    pub fn display(&self) -> String {
        match self {
            PlaylistEntry::File(path) => path.display().to_string(),
            PlaylistEntry::Url(url) => url.clone(),
        }
    }
}

/// Ordered media entries with wrap-around navigation
#[derive(Debug, Clone)]
pub struct Playlist {
    /// Entries in load order
    entries: Vec<PlaylistEntry>,

    /// Play order (indices into entries)
    order: Vec<usize>,

    /// Current position in `order`
    position: usize,

    /// Whether shuffle is enabled
    shuffle: bool,
}

impl Playlist {
    /// Build a playlist from the `<MEDIA>` argument
    ///
    /// Accepts a URL, a single media file, a playlist file (`.m3u`, `.m3u8`,
    /// `.txt`), a directory scanned for `extensions`, or a glob pattern.
    pub fn from_media(media: &str, extensions: &[String], shuffle: bool) -> Result<Self> {
        let entries = Self::load_entries(media, extensions)?;

        if entries.is_empty() {
            anyhow::bail!("No playable media found in {}", media);
        }

        let playlist = Self::from_entries(entries, shuffle);
        log::info!(
            "Created playlist with {} entries (shuffle: {})",
            playlist.len(),
            shuffle
        );

        Ok(playlist)
    }

    pub fn from_entries(entries: Vec<PlaylistEntry>, shuffle: bool) -> Self {
        let mut playlist = Self {
            order: (0..entries.len()).collect(),
            entries,
            position: 0,
            shuffle,
        };

        if shuffle {
            playlist.generate_shuffle_order();
        }

        playlist
    }

    fn load_entries(media: &str, extensions: &[String]) -> Result<Vec<PlaylistEntry>> {
        if is_url(media) {
            return Ok(vec![PlaylistEntry::Url(media.to_string())]);
        }

        let expanded = shellexpand::tilde(media);
        let path = Path::new(expanded.as_ref());

        if path.is_file() {
            if has_extension(path, PLAYLIST_EXTENSIONS) {
                return Self::read_playlist_file(path);
            }
            return Ok(vec![PlaylistEntry::File(path.to_path_buf())]);
        }

        let mut files = Vec::new();

        if path.is_dir() {
            for ext in extensions {
                let pattern = format!("{}/*.{}", expanded, ext);
                if let Ok(matches) = glob(&pattern) {
                    files.extend(matches.flatten().filter(|entry| entry.is_file()));
                }
            }
        } else {
            let matches = glob(&expanded)
                .with_context(|| format!("Invalid media pattern: {}", media))?;
            files.extend(matches.flatten().filter(|entry| {
                entry.is_file() && Self::has_valid_extension(entry, extensions)
            }));
        }

        files.sort();
        files.dedup();

        Ok(files.into_iter().map(PlaylistEntry::File).collect())
    }

    /// Read a playlist file: one entry per line, `#` starts a comment line
    fn read_playlist_file(path: &Path) -> Result<Vec<PlaylistEntry>> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read playlist {}", path.display()))?;
        Ok(Self::parse_playlist(&contents, path.parent()))
    }

    fn parse_playlist(contents: &str, base: Option<&Path>) -> Vec<PlaylistEntry> {
        contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| PlaylistEntry::parse(line, base))
            .collect()
    }

    /// Check if a file has a valid extension
    fn has_valid_extension(path: &Path, extensions: &[String]) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }

    /// Generate a new shuffle order
    fn generate_shuffle_order(&mut self) {
        let mut rng = rng();
        self.order = (0..self.entries.len()).collect();
        self.order.shuffle(&mut rng);
        self.position = 0;
        log::debug!("Generated new shuffle order");
    }

    /// Get the current entry
    pub fn current(&self) -> &PlaylistEntry {
        &self.entries[self.current_index()]
    }

    /// Index of the current entry in load order, independent of shuffle
    pub fn current_index(&self) -> usize {
        self.order[self.position]
    }

    /// Jump to an entry by load-order index. Out of range indices are
    /// rejected and leave the playlist where it was.
    pub fn select(&mut self, index: usize) -> bool {
        match self.order.iter().position(|&i| i == index) {
            Some(position) => {
                self.position = position;
                true
            }
            None => false,
        }
    }

    /// Move to the next entry. Returns `true` when the playlist wrapped.
    pub fn next(&mut self) -> bool {
        self.position += 1;
        if self.position < self.order.len() {
            return false;
        }

        if self.shuffle && self.entries.len() > 1 {
            self.generate_shuffle_order();
        }
        self.position = 0;
        true
    }

    /// Get the number of entries in the playlist
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the playlist is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn is_url(entry: &str) -> bool {
    entry.split_once("://").is_some_and(|(scheme, _)| {
        !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    })
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(names: &[&str]) -> Vec<PlaylistEntry> {
        names
            .iter()
            .map(|name| PlaylistEntry::File(PathBuf::from(name)))
            .collect()
    }

    #[test]
    fn test_has_valid_extension() {
        let extensions = vec!["mp4".to_string(), "png".to_string()];

        assert!(Playlist::has_valid_extension(Path::new("test.mp4"), &extensions));
        assert!(Playlist::has_valid_extension(Path::new("test.PNG"), &extensions));
        assert!(!Playlist::has_valid_extension(Path::new("test.txt"), &extensions));
    }

    #[test]
    fn test_playlist_navigation() {
        let mut playlist =
            Playlist::from_entries(files(&["/tmp/1.mp4", "/tmp/2.mp4", "/tmp/3.png"]), false);

        assert_eq!(playlist.current(), &PlaylistEntry::File("/tmp/1.mp4".into()));
        assert!(!playlist.next());
        assert_eq!(playlist.current_index(), 1);
        assert!(!playlist.next());
        assert!(playlist.current().is_still());
        assert!(playlist.next());
        assert_eq!(playlist.current_index(), 0);
    }

    #[test]
    fn test_select_by_index() {
        let mut playlist = Playlist::from_entries(files(&["a.mp4", "b.mp4", "c.mp4"]), true);

        assert!(playlist.select(2));
        assert_eq!(playlist.current(), &PlaylistEntry::File("c.mp4".into()));
        assert!(!playlist.select(7));
        assert_eq!(playlist.current_index(), 2);
    }

    #[test]
    fn test_shuffle_visits_every_entry() {
        let mut playlist =
            Playlist::from_entries(files(&["a.mp4", "b.mp4", "c.mp4", "d.mp4"]), true);

        let mut seen = vec![playlist.current_index()];
        while !playlist.next() {
            seen.push(playlist.current_index());
        }
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_parse_playlist_file() {
        let contents = "#EXTM3U\n\
                        # comment\n\
                        intro.mp4\n\
                        \n\
                        /abs/loop.webm\n\
                        https://example.org/stream.m3u8\n";

        let entries = Playlist::parse_playlist(contents, Some(Path::new("/videos")));
        assert_eq!(
            entries,
            vec![
                PlaylistEntry::File("/videos/intro.mp4".into()),
                PlaylistEntry::File("/abs/loop.webm".into()),
                PlaylistEntry::Url("https://example.org/stream.m3u8".into()),
            ]
        );
    }

    #[test]
    fn test_directory_scan_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.webm", "a.mp4", "notes.md", "c.png"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }

        let extensions = vec!["mp4".to_string(), "webm".to_string(), "png".to_string()];
        let playlist =
            Playlist::from_media(dir.path().to_str().unwrap(), &extensions, false).unwrap();

        assert_eq!(playlist.len(), 3);
        assert_eq!(
            playlist.current(),
            &PlaylistEntry::File(dir.path().join("a.mp4"))
        );
    }

    #[test]
    fn test_url_and_missing_media() {
        let playlist = Playlist::from_media("rtsp://camera/live", &[], false).unwrap();
        assert_eq!(playlist.current(), &PlaylistEntry::Url("rtsp://camera/live".into()));

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("*.mp4");
        assert!(Playlist::from_media(missing.to_str().unwrap(), &["mp4".into()], false).is_err());
    }

    #[test]
    fn test_still_detection() {
        assert!(PlaylistEntry::File("a/b.JPG".into()).is_still());
        assert!(!PlaylistEntry::File("a/b.gif".into()).is_still());
        assert!(PlaylistEntry::Url("https://x/y.png?size=2".into()).is_still());
    }
}
