// SPDX-License-Identifier: MIT OR Apache-2.0

//! Filesystem primitives: attribute capture and restore, preserving copies,
//! byte comparison, hard links, recursive listing, atomic writes.

use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{anyhow, Context, Result};
use filetime::FileTime;
use tracing::warn;
use walkdir::WalkDir;

const CHUNK_SIZE: usize = 64 * 1024;

/// The file attributes the engine cares about.
///
/// Captured once per file and threaded through fingerprinting, the pre-link
/// metadata check, and attribute restoration after a copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttrs {
    /// Size in bytes.
    pub len: u64,
    /// Last modification time.
    pub modified: SystemTime,
    /// Last access time, where the filesystem tracks one.
    pub accessed: Option<SystemTime>,
    /// Creation (birth) time, where the filesystem tracks one.
    pub created: Option<SystemTime>,
    /// Whether the file is write-protected.
    pub readonly: bool,
    /// Whether the file is hidden (dot-prefixed name on Unix, the hidden
    /// attribute on Windows).
    pub hidden: bool,
}

impl FileAttrs {
    /// Read the attributes of the file at `path`.
    pub fn probe(path: &Path) -> Result<Self> {
        let metadata =
            fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
        Self::from_metadata(path, &metadata)
    }

    pub fn from_metadata(path: &Path, metadata: &fs::Metadata) -> Result<Self> {
        let modified = metadata
            .modified()
            .with_context(|| format!("read mtime of {}", path.display()))?;
        Ok(Self {
            len: metadata.len(),
            modified,
            accessed: metadata.accessed().ok(),
            created: metadata.created().ok(),
            readonly: metadata.permissions().readonly(),
            hidden: is_hidden(path, metadata),
        })
    }

    /// Creation time as used by fingerprints and the pre-link metadata check.
    ///
    /// A copy cannot carry a birth time through any portable API, so the
    /// modified time stands in wherever the platform does not round-trip
    /// creation times through our copy primitive.
    pub fn effective_created(&self) -> SystemTime {
        #[cfg(windows)]
        {
            self.created.unwrap_or(self.modified)
        }
        #[cfg(not(windows))]
        {
            self.modified
        }
    }

    /// Whether a candidate with these attributes may stand in for a file
    /// with `other`'s attributes via a hard link.
    pub fn matches_linkable(&self, other: &FileAttrs) -> bool {
        self.modified == other.modified
            && self.effective_created() == other.effective_created()
            && self.hidden == other.hidden
    }
}

#[cfg(windows)]
fn is_hidden(_path: &Path, metadata: &fs::Metadata) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
    metadata.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0
}

#[cfg(not(windows))]
fn is_hidden(path: &Path, _metadata: &fs::Metadata) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

/// Copy `src` to `dst`, reproducing content bytes, timestamps, and the
/// read-only flag. Parent directories of `dst` are created on demand.
///
/// Returns the number of bytes copied.
pub fn copy_file_preserving(src: &Path, dst: &Path, attrs: &FileAttrs) -> Result<u64> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let bytes = fs::copy(src, dst)
        .with_context(|| format!("copy {} to {}", src.display(), dst.display()))?;
    restore_attrs(dst, attrs)?;
    Ok(bytes)
}

/// Restore timestamps and the read-only flag on `dst`.
///
/// Timestamps cannot be written through a read-only file, so the flag is
/// cleared first, the times set, and the flag put back in that order.
pub fn restore_attrs(dst: &Path, attrs: &FileAttrs) -> Result<()> {
    set_readonly(dst, false)?;
    let mtime = FileTime::from_system_time(attrs.modified);
    let atime = attrs
        .accessed
        .map(FileTime::from_system_time)
        .unwrap_or(mtime);
    filetime::set_file_times(dst, atime, mtime)
        .with_context(|| format!("set timestamps on {}", dst.display()))?;
    if attrs.readonly {
        set_readonly(dst, true)?;
    }
    Ok(())
}

/// Set or clear write protection on a file.
pub fn set_readonly(path: &Path, readonly: bool) -> Result<()> {
    let metadata =
        fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
    let mut permissions = metadata.permissions();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = permissions.mode();
        permissions.set_mode(if readonly { mode & !0o222 } else { mode | 0o200 });
    }
    #[cfg(not(unix))]
    permissions.set_readonly(readonly);
    fs::set_permissions(path, permissions)
        .with_context(|| format!("set permissions on {}", path.display()))
}

/// Compare two files byte for byte.
pub fn byte_equal(a: &Path, b: &Path) -> Result<bool> {
    let file_a = File::open(a).with_context(|| format!("open {}", a.display()))?;
    let file_b = File::open(b).with_context(|| format!("open {}", b.display()))?;
    if file_a.metadata()?.len() != file_b.metadata()?.len() {
        return Ok(false);
    }

    let mut reader_a = BufReader::new(file_a);
    let mut reader_b = BufReader::new(file_b);
    let mut buf_a = [0u8; CHUNK_SIZE];
    let mut buf_b = [0u8; CHUNK_SIZE];
    loop {
        let read_a = read_full(&mut reader_a, &mut buf_a)
            .with_context(|| format!("read {}", a.display()))?;
        let read_b = read_full(&mut reader_b, &mut buf_b)
            .with_context(|| format!("read {}", b.display()))?;
        if read_a != read_b || buf_a[..read_a] != buf_b[..read_b] {
            return Ok(false);
        }
        if read_a == 0 {
            return Ok(true);
        }
    }
}

/// Fill `buf` as far as the reader allows; a short count means end of stream.
fn read_full(reader: &mut dyn Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let read = reader.read(&mut buf[filled..])?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

/// Create a hard link at `link` referencing `original`'s inode. The link's
/// parent directory is created on demand.
pub fn make_hardlink(original: &Path, link: &Path) -> Result<()> {
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::hard_link(original, link).with_context(|| {
        format!("hard link {} -> {}", link.display(), original.display())
    })
}

/// Whether two paths address the same filesystem object.
#[cfg(unix)]
pub fn same_inode(a: &Path, b: &Path) -> Result<bool> {
    use std::os::unix::fs::MetadataExt;
    let meta_a = fs::symlink_metadata(a).with_context(|| format!("stat {}", a.display()))?;
    let meta_b = fs::symlink_metadata(b).with_context(|| format!("stat {}", b.display()))?;
    Ok(meta_a.dev() == meta_b.dev() && meta_a.ino() == meta_b.ino())
}

#[cfg(not(unix))]
pub fn same_inode(a: &Path, b: &Path) -> Result<bool> {
    Ok(fs::canonicalize(a)? == fs::canonicalize(b)?)
}

/// List every regular file under `root` in lexicographic depth-first order.
/// Symbolic links are not followed and do not appear in the result.
pub fn list_recursive(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "unreadable entry while walking {}", root.display());
                continue;
            }
        };
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Write `bytes` to `path` through a temp file, fsync, then rename.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("cannot atomically write {} without a parent", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("create directory {}", parent.display()))?;

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("linkvault");
    let tmp_path = parent.join(format!(".{}.tmp-{}", file_name, std::process::id()));

    {
        let mut file = File::create(&tmp_path)
            .with_context(|| format!("create {}", tmp_path.display()))?;
        file.write_all(bytes)
            .with_context(|| format!("write {}", tmp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("sync {}", tmp_path.display()))?;
    }

    if let Err(err) = fs::rename(&tmp_path, path) {
        if path.exists() {
            let _ = fs::remove_file(path);
            fs::rename(&tmp_path, path).with_context(|| {
                format!(
                    "replace {} with {} after rename error: {err}",
                    path.display(),
                    tmp_path.display()
                )
            })?;
        } else {
            return Err(err).with_context(|| format!("rename into {}", path.display()));
        }
    }

    Ok(())
}
