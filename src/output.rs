//! Atomic, no-clobber output files.

use std::ffi::OsString;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::Result;

const MAX_NUMBERED_CANDIDATES: u32 = 10_000;
const TEMP_PREFIX: &str = ".mediasight-";

/// Bytes destined for an output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactContent {
    /// Summary text.
    Text(String),
    /// Encoded image.
    Image(Vec<u8>),
}

impl ArtifactContent {
    /// Raw bytes to write.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Image(bytes) => bytes,
        }
    }
}

/// Content paired with the path it should be written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputArtifact {
    /// Preferred destination; a numbered variant is used if it exists.
    pub path: PathBuf,
    /// What to write.
    pub content: ArtifactContent,
}

impl OutputArtifact {
    /// A text summary artifact.
    pub fn text(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: ArtifactContent::Text(text.into()),
        }
    }

    /// An encoded image artifact.
    pub fn image(path: impl Into<PathBuf>, bytes: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            content: ArtifactContent::Image(bytes),
        }
    }
}

/// Names and writes output files inside a directory.
#[derive(Debug, Clone)]
pub struct OutputWriter {
    dir: PathBuf,
}

impl Default for OutputWriter {
    fn default() -> Self {
        Self::new(".")
    }
}

impl OutputWriter {
    /// Creates a writer rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Output directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<source stem><suffix>.<ext>`, e.g. `clip_summary.txt`.
    pub fn candidate(&self, source: &Path, suffix: &str, ext: &str) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        self.dir.join(format!("{stem}{suffix}.{ext}"))
    }

    /// Writes `artifact` without replacing any existing file.
    ///
    /// If `artifact.path` is taken, `<stem>_1.<ext>`, `<stem>_2.<ext>`, ...
    /// are tried in order. Returns the path actually written.
    pub fn write(&self, artifact: &OutputArtifact) -> Result<PathBuf> {
        write_no_clobber(&artifact.path, artifact.content.as_bytes())
    }
}

/// Writes `bytes` to a temp file next to `path` and renames it into place
/// without overwriting. Returns the final path.
pub fn write_no_clobber(path: &Path, bytes: &[u8]) -> Result<PathBuf> {
    let mut file = staged(path, bytes)?;

    for n in 0..=MAX_NUMBERED_CANDIDATES {
        let target = numbered(path, n);
        match file.persist_noclobber(&target) {
            Ok(_) => {
                tracing::debug!(path = %target.display(), bytes = bytes.len(), "wrote output");
                return Ok(target);
            }
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                tracing::debug!(path = %target.display(), "output exists, trying next name");
                file = e.file;
            }
            Err(e) => return Err(e.error.into()),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free output name near {}", path.display()),
    )
    .into())
}

/// Writes `bytes` to `path` atomically, replacing any existing file.
pub fn write_replace(path: &Path, bytes: &[u8]) -> Result<()> {
    let file = staged(path, bytes)?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Creates a synced temp file holding `bytes` in `path`'s directory.
fn staged(path: &Path, bytes: &[u8]) -> Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut file = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(".tmp")
        .tempfile_in(&dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    Ok(file)
}

/// `path` for `n == 0`, otherwise `<stem>_<n>.<ext>` beside it.
fn numbered(path: &Path, n: u32) -> PathBuf {
    if n == 0 {
        return path.to_path_buf();
    }
    let mut name = OsString::from(path.file_stem().unwrap_or_default());
    name.push(format!("_{n}"));
    if let Some(ext) = path.extension() {
        name.push(".");
        name.push(ext);
    }
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_names() {
        let writer = OutputWriter::new("/out");
        assert_eq!(
            writer.candidate(Path::new("videos/clip.mp4"), "_summary", "txt"),
            PathBuf::from("/out/clip_summary.txt")
        );
        assert_eq!(
            writer.candidate(Path::new("cat.png"), "_emotions", "jpg"),
            PathBuf::from("/out/cat_emotions.jpg")
        );
    }

    #[test]
    fn test_numbered_names() {
        let path = Path::new("/out/cat_analyzed.jpg");
        assert_eq!(numbered(path, 0), path);
        assert_eq!(numbered(path, 2), PathBuf::from("/out/cat_analyzed_2.jpg"));
        assert_eq!(numbered(Path::new("notes"), 1), PathBuf::from("notes_1"));
    }

    #[test]
    fn test_second_write_does_not_clobber() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(dir.path());
        let target = writer.candidate(Path::new("clip.mp4"), "_summary", "txt");

        let first = writer.write(&OutputArtifact::text(&target, "first")).unwrap();
        let second = writer.write(&OutputArtifact::text(&target, "second")).unwrap();

        assert_eq!(first, target);
        assert_ne!(first, second);
        assert_eq!(second, dir.path().join("clip_summary_1.txt"));
        assert_eq!(std::fs::read_to_string(&first).unwrap(), "first");
        assert_eq!(std::fs::read_to_string(&second).unwrap(), "second");
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        write_no_clobber(&path, &[1, 2, 3]).unwrap();
        write_no_clobber(&path, &[4, 5, 6]).unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|n| !n.starts_with(TEMP_PREFIX)));
    }

    #[test]
    fn test_write_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/cat_analyzed.jpg");
        let written = write_no_clobber(&path, b"img").unwrap();
        assert_eq!(written, path);
    }

    #[test]
    fn test_write_replace_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Cat.jpg");
        write_replace(&path, b"old").unwrap();
        write_replace(&path, b"new").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
    }
}
