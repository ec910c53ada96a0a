//! Archives: read-only containers of unit bytes
//!
//! An archive is a directory tree, a zip file on disk, or a zip blob held
//! in memory. Everything above this module only needs two operations on an
//! opened archive: list entries and read an entry's bytes. Entry paths are
//! always `/`-separated and relative to the archive root, with no leading
//! `/` or `./` and no trailing separator.

use crate::symbol;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::ZipArchive;

/// Errors raised while opening or reading an archive
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The archive could not be opened
    #[error("cannot open archive {archive}: {source}")]
    Open {
        /// Archive label
        archive: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The zip container is corrupt or unreadable
    #[error("cannot read zip archive {archive}: {source}")]
    Zip {
        /// Archive label
        archive: String,
        /// Underlying zip error
        #[source]
        source: ZipError,
    },

    /// Walking a directory archive failed
    #[error("cannot walk archive {archive}: {source}")]
    Walk {
        /// Archive label
        archive: String,
        /// Underlying walk error
        #[source]
        source: walkdir::Error,
    },

    /// Reading an entry failed
    #[error("cannot read {path} from {archive}: {source}")]
    Read {
        /// Archive label
        archive: String,
        /// Entry path
        path: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },
}

/// Kind of an archive entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Container of other entries
    Dir,
    /// Leaf with bytes
    File,
}

/// One entry of an opened archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// `/`-separated path relative to the archive root
    pub path: String,
    /// Entry kind
    pub kind: EntryKind,
}

/// Handle to an archive that has not been opened yet
#[derive(Clone)]
pub enum Archive {
    /// Directory tree on disk
    Directory(PathBuf),
    /// Zip file on disk
    Zip(PathBuf),
    /// Zip blob already in memory
    Memory {
        /// Human-readable label used in locations and errors
        label: String,
        /// Raw zip bytes
        bytes: Arc<[u8]>,
    },
}

impl Archive {
    /// Directory archive
    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Archive::Directory(path.into())
    }

    /// Zip file archive
    pub fn zip(path: impl Into<PathBuf>) -> Self {
        Archive::Zip(path.into())
    }

    /// In-memory zip archive
    pub fn memory(label: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Archive::Memory {
            label: label.into(),
            bytes: Arc::from(bytes.into()),
        }
    }

    /// Pick the archive kind from what is on disk: directories are walked,
    /// anything else is read as a zip container.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if path.is_dir() {
            Archive::Directory(path)
        } else {
            Archive::Zip(path)
        }
    }

    /// Label used in unit locations and error messages
    pub fn label(&self) -> String {
        match self {
            Archive::Directory(path) | Archive::Zip(path) => path.display().to_string(),
            Archive::Memory { label, .. } => label.clone(),
        }
    }

    /// Open the archive for listing and reading
    pub fn open(&self) -> Result<OpenArchive, ArchiveError> {
        let label = self.label();
        let inner = match self {
            Archive::Directory(root) => {
                let meta = std::fs::metadata(root).map_err(|source| ArchiveError::Open {
                    archive: label.clone(),
                    source,
                })?;
                if !meta.is_dir() {
                    return Err(ArchiveError::Open {
                        archive: label,
                        source: io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
                    });
                }
                Inner::Directory(root.clone())
            }
            Archive::Zip(path) => {
                let file = File::open(path).map_err(|source| ArchiveError::Open {
                    archive: label.clone(),
                    source,
                })?;
                Inner::Zip(open_zip(&label, Box::new(BufReader::new(file)))?)
            }
            Archive::Memory { bytes, .. } => {
                Inner::Zip(open_zip(&label, Box::new(Cursor::new(bytes.clone())))?)
            }
        };
        Ok(OpenArchive { label, inner })
    }
}

impl fmt::Debug for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Archive::Directory(path) => f.debug_tuple("Directory").field(path).finish(),
            Archive::Zip(path) => f.debug_tuple("Zip").field(path).finish(),
            Archive::Memory { label, bytes } => f
                .debug_struct("Memory")
                .field("label", label)
                .field("len", &bytes.len())
                .finish(),
        }
    }
}

trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

fn open_zip(label: &str, reader: Box<dyn ReadSeek>) -> Result<ZipInner, ArchiveError> {
    let zip = ZipArchive::new(reader).map_err(|source| ArchiveError::Zip {
        archive: label.to_string(),
        source,
    })?;
    let mut files = BTreeMap::new();
    for raw in zip.file_names() {
        if raw.ends_with('/') {
            continue;
        }
        let path = normalize_zip_name(raw);
        if !path.is_empty() {
            files.entry(path.to_string()).or_insert_with(|| raw.to_string());
        }
    }
    Ok(ZipInner { zip, files })
}

/// Strip the leading `/` and `./` segments some zip writers store
fn normalize_zip_name(name: &str) -> &str {
    let mut name = name.trim_end_matches('/');
    loop {
        if let Some(rest) = name.strip_prefix("./") {
            name = rest;
        } else if let Some(rest) = name.strip_prefix('/') {
            name = rest;
        } else {
            return name;
        }
    }
}

struct ZipInner {
    zip: ZipArchive<Box<dyn ReadSeek>>,
    // normalized file path -> name as stored in the container
    files: BTreeMap<String, String>,
}

enum Inner {
    Directory(PathBuf),
    Zip(ZipInner),
}

/// An opened archive
///
/// Holds the underlying file handle (for zip archives) until dropped.
pub struct OpenArchive {
    label: String,
    inner: Inner,
}

impl OpenArchive {
    /// Archive label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// List every entry, directories included
    ///
    /// Zip containers do not always store directory entries, so the parent
    /// directories of every file are synthesized. Entries come back sorted
    /// by path.
    pub fn entries(&self) -> Result<Vec<Entry>, ArchiveError> {
        let mut entries: BTreeMap<String, EntryKind> = BTreeMap::new();
        match &self.inner {
            Inner::Directory(root) => {
                for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
                    let entry = entry.map_err(|source| ArchiveError::Walk {
                        archive: self.label.clone(),
                        source,
                    })?;
                    let Ok(relative) = entry.path().strip_prefix(root) else {
                        continue;
                    };
                    let path = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    let kind = if entry.file_type().is_dir() {
                        EntryKind::Dir
                    } else {
                        EntryKind::File
                    };
                    entries.insert(path, kind);
                }
            }
            Inner::Zip(inner) => {
                for name in inner.zip.file_names() {
                    let is_dir = name.ends_with('/');
                    let path = normalize_zip_name(name);
                    if path.is_empty() {
                        continue;
                    }
                    let kind = if is_dir { EntryKind::Dir } else { EntryKind::File };
                    entries.insert(path.to_string(), kind);
                    let mut parent = path;
                    while let Some((dir, _)) = parent.rsplit_once('/') {
                        entries.insert(dir.to_string(), EntryKind::Dir);
                        parent = dir;
                    }
                }
            }
        }
        Ok(entries
            .into_iter()
            .map(|(path, kind)| Entry { path, kind })
            .collect())
    }

    /// Read the bytes of the file at `path`
    ///
    /// Returns `Ok(None)` when the archive has no such file.
    pub fn read(&mut self, path: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
        let path = path.trim_matches('/');
        let read_error = |source| ArchiveError::Read {
            archive: self.label.clone(),
            path: path.to_string(),
            source,
        };
        match &mut self.inner {
            Inner::Directory(root) => {
                let Some(full) = confined(root, path) else {
                    return Ok(None);
                };
                if !full.is_file() {
                    return Ok(None);
                }
                std::fs::read(&full).map(Some).map_err(read_error)
            }
            Inner::Zip(inner) => {
                let Some(raw) = inner.files.get(path) else {
                    return Ok(None);
                };
                let mut file = match inner.zip.by_name(raw) {
                    Ok(file) => file,
                    Err(ZipError::FileNotFound) => return Ok(None),
                    Err(source) => {
                        return Err(ArchiveError::Zip {
                            archive: self.label.clone(),
                            source,
                        })
                    }
                };
                if file.is_dir() {
                    return Ok(None);
                }
                let mut bytes = Vec::with_capacity(file.size() as usize);
                file.read_to_end(&mut bytes).map_err(read_error)?;
                Ok(Some(bytes))
            }
        }
    }
}

impl fmt::Debug for OpenArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenArchive")
            .field("label", &self.label)
            .finish()
    }
}

/// Join `path` onto `root`, refusing anything that would escape it
fn confined(root: &Path, path: &str) -> Option<PathBuf> {
    let relative = Path::new(path);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }
    Some(root.join(relative))
}

/// Unit bytes found in an archive set
#[derive(Debug, Clone)]
pub struct Located {
    /// Label of the archive the unit came from
    pub archive: String,
    /// Entry path inside that archive
    pub path: String,
    /// Raw unit bytes
    pub bytes: Vec<u8>,
}

/// Ordered list of opened archives searched front to back
///
/// Order models precedence: the first archive containing a unit wins.
#[derive(Debug, Default)]
pub struct ArchiveSet {
    archives: Vec<OpenArchive>,
}

impl ArchiveSet {
    /// Open every archive, failing on the first that cannot be opened
    pub fn open(archives: &[Archive]) -> Result<Self, ArchiveError> {
        let archives = archives
            .iter()
            .map(Archive::open)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { archives })
    }

    /// Find the unit for `symbol` in the first archive that has it
    pub fn find_unit(&mut self, symbol: &str) -> Result<Option<Located>, ArchiveError> {
        let path = symbol::unit_path(symbol);
        for archive in &mut self.archives {
            if let Some(bytes) = archive.read(&path)? {
                return Ok(Some(Located {
                    archive: archive.label().to_string(),
                    path,
                    bytes,
                }));
            }
        }
        Ok(None)
    }

    /// Labels of the archives, in search order
    pub fn labels(&self) -> Vec<&str> {
        self.archives.iter().map(OpenArchive::label).collect()
    }

    /// Number of archives in the set
    pub fn len(&self) -> usize {
        self.archives.len()
    }

    /// Check if the set is empty
    pub fn is_empty(&self) -> bool {
        self.archives.is_empty()
    }
}
