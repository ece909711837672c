/*!
 * Path & Filesystem Adapter: a thin capability surface used by every higher
 * layer. Nothing above this module calls `std::fs` directly, so the
 * platform-specific bits (attribute bits, unbuffered I/O alignment) stay in
 * one place.
 */

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::config::{BufferedIoPolicy, UNBUFFERED_THRESHOLD_BYTES};
use crate::error::{Error, Result};

/// Metadata captured at enumeration time; skip decisions compare
/// `(last_write, size)` only, per the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub creation_time: SystemTime,
    pub last_write_time: SystemTime,
    pub size: u64,
}

impl FileInfo {
    /// The equality the pipeline's skip decision is defined over.
    pub fn matches_for_skip(&self, other: &FileInfo) -> bool {
        self.last_write_time == other.last_write_time && self.size == other.size
    }
}

/// Coarse attribute bits preserved when `DirCopyFlags::attributes` is set.
/// Modeled as a bitflag-ish struct rather than a raw platform value so the
/// pipeline and protocol layers stay platform-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Attributes {
    pub readonly: bool,
    pub hidden: bool,
    #[cfg(unix)]
    pub unix_mode: u32,
}

pub fn stat(path: &Path) -> Result<FileInfo> {
    let meta = fs::symlink_metadata(path).map_err(|e| classify_io(path, e))?;
    Ok(FileInfo {
        creation_time: meta.created().unwrap_or(SystemTime::UNIX_EPOCH),
        last_write_time: meta.modified().map_err(|e| Error::io(path, e))?,
        size: meta.len(),
    })
}

pub fn exists(path: &Path) -> bool {
    path.exists()
}

pub fn read_attributes(path: &Path) -> Result<Attributes> {
    let meta = fs::metadata(path).map_err(|e| classify_io(path, e))?;
    let mut attrs = Attributes { readonly: meta.permissions().readonly(), hidden: false, ..Default::default() };
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        attrs.unix_mode = meta.permissions().mode();
    }
    #[cfg(windows)]
    {
        use std::os::windows::fs::MetadataExt;
        const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
        attrs.hidden = meta.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0;
    }
    Ok(attrs)
}

pub fn apply_attributes(path: &Path, attrs: &Attributes) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perm = fs::Permissions::from_mode(attrs.unix_mode);
        fs::set_permissions(path, perm).map_err(|e| classify_io(path, e))?;
    }
    #[cfg(windows)]
    {
        let mut perm = fs::metadata(path).map_err(|e| classify_io(path, e))?.permissions();
        perm.set_readonly(attrs.readonly);
        fs::set_permissions(path, perm).map_err(|e| classify_io(path, e))?;
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = (path, attrs);
    }
    Ok(())
}

/// Whether a file of this size should use unbuffered I/O under the given policy.
pub fn should_use_unbuffered(policy: BufferedIoPolicy, size: u64) -> bool {
    match policy {
        BufferedIoPolicy::Always => false,
        BufferedIoPolicy::Never => true,
        BufferedIoPolicy::Auto => size >= UNBUFFERED_THRESHOLD_BYTES,
    }
}

/// Buffer capacity used when `open_read`/`open_write` is asked for buffered
/// I/O; independent of the caller's own [`crate::buffer::BufferPool`] chunk
/// size, which governs how much is read/written per syscall either way.
const STD_BUFFER_CAPACITY: usize = 64 * 1024;

/// Either a raw file handle or one wrapped in a `std::io` buffer, chosen at
/// open time by [`BufferedIoPolicy`]. Large files skip the extra buffering
/// layer since the caller already streams them through a fixed-size buffer.
enum Backing {
    PlainRead(File),
    PlainWrite(File),
    BufferedRead(io::BufReader<File>),
    BufferedWrite(io::BufWriter<File>),
}

/// An open file plus the path it was opened from, for error messages.
pub struct FileHandle {
    pub(crate) path: PathBuf,
    inner: Backing,
}

/// Read an entire file into memory, reusing `scratch` as the read buffer so
/// callers with a preallocated [`crate::buffer::BufferPool`] avoid an extra
/// allocation per call.
pub fn read_whole(path: &Path, scratch: &mut [u8], buffered: bool) -> Result<Vec<u8>> {
    let mut handle = open_read(path, buffered)?;
    let mut out = Vec::new();
    loop {
        let n = handle.read(scratch)?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&scratch[..n]);
    }
    Ok(out)
}

pub fn open_read(path: &Path, buffered: bool) -> Result<FileHandle> {
    let file = File::open(path).map_err(|e| classify_io(path, e))?;
    let inner = if buffered {
        Backing::BufferedRead(io::BufReader::with_capacity(STD_BUFFER_CAPACITY, file))
    } else {
        Backing::PlainRead(file)
    };
    Ok(FileHandle { path: path.to_owned(), inner })
}

pub fn open_write(path: &Path, buffered: bool) -> Result<FileHandle> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| classify_io(parent, e))?;
    }
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| classify_io(path, e))?;
    let inner = if buffered {
        Backing::BufferedWrite(io::BufWriter::with_capacity(STD_BUFFER_CAPACITY, file))
    } else {
        Backing::PlainWrite(file)
    };
    Ok(FileHandle { path: path.to_owned(), inner })
}

impl FileHandle {
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let result = match &mut self.inner {
            Backing::PlainRead(f) => f.read(buf),
            Backing::BufferedRead(r) => r.read(buf),
            Backing::PlainWrite(_) | Backing::BufferedWrite(_) => {
                unreachable!("read on a write-mode FileHandle")
            }
        };
        result.map_err(|e| classify_io(&self.path, e))
    }

    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let result = match &mut self.inner {
            Backing::PlainWrite(f) => f.write_all(buf),
            Backing::BufferedWrite(w) => w.write_all(buf),
            Backing::PlainRead(_) | Backing::BufferedRead(_) => {
                unreachable!("write on a read-mode FileHandle")
            }
        };
        result.map_err(|e| classify_io(&self.path, e))
    }

    pub fn set_last_write_time(&self, when: SystemTime) -> Result<()> {
        let ft = filetime::FileTime::from_system_time(when);
        filetime::set_file_mtime(&self.path, ft).map_err(|e| classify_io(&self.path, e))
    }

    pub fn sync_and_close(self) -> Result<()> {
        let path = self.path;
        match self.inner {
            Backing::PlainRead(_) | Backing::BufferedRead(_) => Ok(()),
            Backing::PlainWrite(f) => f.sync_all().map_err(|e| classify_io(&path, e)),
            Backing::BufferedWrite(w) => {
                let f = w.into_inner().map_err(|e| classify_io(&path, e.into_error()))?;
                f.sync_all().map_err(|e| classify_io(&path, e))
            }
        }
    }
}

/// Set the last-write time of an already-closed file, used by the pipeline
/// to finalize timestamp parity after a content write completes through a
/// path other than [`FileHandle`] (e.g. a server-streamed write).
pub fn set_last_write_time(path: &Path, when: SystemTime) -> Result<()> {
    let ft = filetime::FileTime::from_system_time(when);
    filetime::set_file_mtime(path, ft).map_err(|e| classify_io(path, e))
}

pub fn delete_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(classify_io(path, e)),
    }
}

pub fn delete_tree(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(classify_io(path, e)),
    }
}

/// Whether link creation failed because the platform/filesystem does not
/// support hardlinks (as opposed to a transient I/O failure).
#[derive(Debug)]
pub enum HardlinkOutcome {
    Created,
    NotSupported,
}

pub fn create_hardlink(link: &Path, target: &Path) -> Result<HardlinkOutcome> {
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent).map_err(|e| classify_io(parent, e))?;
    }
    match fs::hard_link(target, link) {
        Ok(()) => Ok(HardlinkOutcome::Created),
        Err(e) if matches!(e.kind(), io::ErrorKind::Unsupported) => Ok(HardlinkOutcome::NotSupported),
        Err(e) if e.raw_os_error() == Some(18) /* EXDEV: cross-device link */ => {
            Ok(HardlinkOutcome::NotSupported)
        }
        Err(e) => Err(classify_io(link, e)),
    }
}

/// `true` if `path` is itself a symlink (used to detect a symlinked
/// destination directory that must be replaced before writing beneath it).
pub fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path).map(|m| m.file_type().is_symlink()).unwrap_or(false)
}

/// Ensure `path` exists as a real directory. If it currently exists as a
/// symlink and `replace_symlink` is set, the symlink is removed first so
/// nothing is ever written through a stale symlinked destination directory.
pub fn ensure_dir(path: &Path, replace_symlink: bool) -> Result<()> {
    if is_symlink(path) {
        if replace_symlink {
            delete_file(path)?;
        } else {
            return Ok(());
        }
    }
    match fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(classify_io(path, e)),
    }
}

/// One entry returned while enumerating a directory.
pub struct DirEntryInfo {
    pub name: String,
    pub path: PathBuf,
    pub info: FileInfo,
    pub attributes: Attributes,
    pub is_dir: bool,
}

/// Enumerate the immediate children of `dir`. Unlike [`crate::discovery`],
/// this is a single, non-recursive directory listing used by the protocol
/// engine's `FindFiles` handling and by purge.
pub fn enumerate(dir: &Path) -> Result<Vec<DirEntryInfo>> {
    let mut out = Vec::new();
    let entries = fs::read_dir(dir).map_err(|e| classify_io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| classify_io(dir, e))?;
        let path = entry.path();
        let info = stat(&path)?;
        let attributes = read_attributes(&path).unwrap_or_default();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        out.push(DirEntryInfo {
            name: entry.file_name().to_string_lossy().into_owned(),
            path,
            info,
            attributes,
            is_dir,
        });
    }
    Ok(out)
}

fn classify_io(path: &Path, e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::NotFound => Error::NotFound(path.to_owned()),
        io::ErrorKind::PermissionDenied => Error::AccessDenied(path.to_owned()),
        _ => Error::io(path, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn stat_round_trips_size_and_mtime() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, b"hello").unwrap();
        let info = stat(&path).unwrap();
        assert_eq!(info.size, 5);
    }

    #[test]
    fn stat_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let err = stat(&dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn write_then_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("b.txt");
        let mut w = open_write(&path, true).unwrap();
        w.write_all(b"payload").unwrap();
        w.sync_and_close().unwrap();

        let mut r = open_read(&path, true).unwrap();
        let mut buf = [0u8; 7];
        let n = r.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"payload");
    }

    #[test]
    fn write_then_read_back_unbuffered() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.txt");
        let mut w = open_write(&path, false).unwrap();
        w.write_all(b"payload").unwrap();
        w.sync_and_close().unwrap();

        let mut r = open_read(&path, false).unwrap();
        let mut buf = [0u8; 7];
        let n = r.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"payload");
    }

    #[test]
    fn delete_file_is_idempotent_on_missing() {
        let dir = tempdir().unwrap();
        assert!(delete_file(&dir.path().join("nope")).is_ok());
    }

    #[test]
    fn create_hardlink_makes_same_content_visible() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("orig.txt");
        fs::write(&target, b"shared").unwrap();
        let link = dir.path().join("link.txt");
        let outcome = create_hardlink(&link, &target).unwrap();
        assert!(matches!(outcome, HardlinkOutcome::Created));
        assert_eq!(fs::read(&link).unwrap(), b"shared");
    }

    #[test]
    fn ensure_dir_replaces_symlinked_destination() {
        let dir = tempdir().unwrap();
        let real_other = dir.path().join("elsewhere");
        fs::create_dir(&real_other).unwrap();
        let link_dir = dir.path().join("linked");
        #[cfg(unix)]
        std::os::unix::fs::symlink(&real_other, &link_dir).unwrap();
        #[cfg(unix)]
        {
            assert!(is_symlink(&link_dir));
            ensure_dir(&link_dir, true).unwrap();
            assert!(!is_symlink(&link_dir));
            assert!(link_dir.is_dir());
        }
    }

    #[test]
    fn unbuffered_threshold_policy() {
        assert!(!should_use_unbuffered(BufferedIoPolicy::Auto, 1024));
        assert!(should_use_unbuffered(BufferedIoPolicy::Auto, UNBUFFERED_THRESHOLD_BYTES));
        assert!(should_use_unbuffered(BufferedIoPolicy::Never, 1));
        assert!(!should_use_unbuffered(BufferedIoPolicy::Always, UNBUFFERED_THRESHOLD_BYTES));
    }
}
