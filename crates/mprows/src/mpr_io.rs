//! Filesystem abstraction for the row store.
//!
//! The store operates on any [`MprFilesystem`], which hands out seekable
//! [`FileHandle`]s. [`LocalFilesystem`] wraps a directory on disk;
//! [`MemoryFilesystem`] keeps files in process memory and is primarily used
//! by tests. Writers take an advisory [`LockFile`] next to the target path
//! when the filesystem can produce a system path.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::err::MprError;

/// A seekable file handle produced by an [`MprFilesystem`].
pub trait FileHandle: Read + Write + Seek + Send {
    /// Truncates the file to `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

/// Filesystem seam used by the reader and writer.
///
/// `remove` is permitted on local filesystems only; remote/object-store
/// implementations must return an error from it rather than deleting.
pub trait MprFilesystem: Send + Sync {
    /// Returns true if `path` exists.
    fn exists(&self, path: &str) -> bool;

    /// Opens `path` for reading.
    fn open_read(&self, path: &str) -> Result<Box<dyn FileHandle>, MprError>;

    /// Opens `path` for writing. With `truncate` the file is created empty;
    /// otherwise an existing file is opened for in-place update.
    fn open_write(&self, path: &str, truncate: bool) -> Result<Box<dyn FileHandle>, MprError>;

    /// Creates a directory (and parents).
    fn makedir(&self, path: &str) -> Result<(), MprError>;

    /// Removes a file.
    fn remove(&self, path: &str) -> Result<(), MprError>;

    /// Returns the system path backing `path`, when one exists.
    fn getsyspath(&self, path: &str) -> Option<PathBuf>;
}

// ── Local filesystem ───────────────────────────────────────────────

/// An [`MprFilesystem`] rooted at a directory on the local disk.
pub struct LocalFilesystem {
    root: PathBuf,
}

impl LocalFilesystem {
    /// Creates a filesystem rooted at `root`, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, MprError> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }
        Ok(Self { root })
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

struct LocalHandle(File);

impl Read for LocalHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for LocalHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl Seek for LocalHandle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.0.seek(pos)
    }
}

impl FileHandle for LocalHandle {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.0.set_len(len)
    }
}

impl MprFilesystem for LocalFilesystem {
    fn exists(&self, path: &str) -> bool {
        self.resolve(path).exists()
    }

    fn open_read(&self, path: &str) -> Result<Box<dyn FileHandle>, MprError> {
        let f = File::open(self.resolve(path))?;
        Ok(Box::new(LocalHandle(f)))
    }

    fn open_write(&self, path: &str, truncate: bool) -> Result<Box<dyn FileHandle>, MprError> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let f = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(truncate)
            .open(full)?;
        Ok(Box::new(LocalHandle(f)))
    }

    fn makedir(&self, path: &str) -> Result<(), MprError> {
        std::fs::create_dir_all(self.resolve(path))?;
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<(), MprError> {
        std::fs::remove_file(self.resolve(path))?;
        Ok(())
    }

    fn getsyspath(&self, path: &str) -> Option<PathBuf> {
        Some(self.resolve(path))
    }
}

// ── In-memory filesystem ───────────────────────────────────────────

type SharedBuf = Arc<Mutex<Vec<u8>>>;

/// An [`MprFilesystem`] backed by process memory. Used by tests and by
/// callers materializing short-lived files.
#[derive(Default)]
pub struct MemoryFilesystem {
    files: Mutex<HashMap<String, SharedBuf>>,
}

impl MemoryFilesystem {
    /// Creates an empty in-memory filesystem.
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemoryHandle {
    buf: SharedBuf,
    pos: u64,
}

impl Read for MemoryHandle {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let buf = self.buf.lock().expect("memory file poisoned");
        let start = self.pos.min(buf.len() as u64) as usize;
        let n = (buf.len() - start).min(out.len());
        out[..n].copy_from_slice(&buf[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for MemoryHandle {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buf = self.buf.lock().expect("memory file poisoned");
        let start = self.pos as usize;
        if buf.len() < start {
            buf.resize(start, 0);
        }
        let overlap = (buf.len() - start).min(data.len());
        buf[start..start + overlap].copy_from_slice(&data[..overlap]);
        buf.extend_from_slice(&data[overlap..]);
        self.pos += data.len() as u64;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryHandle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.buf.lock().expect("memory file poisoned").len() as i64;
        let new = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::End(n) => len + n,
            SeekFrom::Current(n) => self.pos as i64 + n,
        };
        if new < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start",
            ));
        }
        self.pos = new as u64;
        Ok(self.pos)
    }
}

impl FileHandle for MemoryHandle {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        let mut buf = self.buf.lock().expect("memory file poisoned");
        buf.truncate(len as usize);
        Ok(())
    }
}

impl MprFilesystem for MemoryFilesystem {
    fn exists(&self, path: &str) -> bool {
        self.files
            .lock()
            .expect("memory fs poisoned")
            .contains_key(path)
    }

    fn open_read(&self, path: &str) -> Result<Box<dyn FileHandle>, MprError> {
        let files = self.files.lock().expect("memory fs poisoned");
        let buf = files.get(path).ok_or_else(|| {
            MprError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such file: {path}"),
            ))
        })?;
        Ok(Box::new(MemoryHandle {
            buf: Arc::clone(buf),
            pos: 0,
        }))
    }

    fn open_write(&self, path: &str, truncate: bool) -> Result<Box<dyn FileHandle>, MprError> {
        let mut files = self.files.lock().expect("memory fs poisoned");
        let buf = files
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())));
        if truncate {
            buf.lock().expect("memory file poisoned").clear();
        }
        Ok(Box::new(MemoryHandle {
            buf: Arc::clone(buf),
            pos: 0,
        }))
    }

    fn makedir(&self, _path: &str) -> Result<(), MprError> {
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<(), MprError> {
        let mut files = self.files.lock().expect("memory fs poisoned");
        files.remove(path).ok_or_else(|| {
            MprError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such file: {path}"),
            ))
        })?;
        Ok(())
    }

    fn getsyspath(&self, _path: &str) -> Option<PathBuf> {
        None
    }
}

// ── Writer lockfile ────────────────────────────────────────────────

/// Advisory lock for a writer session: `path + ".lock"` created exclusively,
/// removed on drop.
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Acquires the lock, failing if another writer already holds it.
    pub fn acquire(path: &Path) -> Result<Self, MprError> {
        let lock_path = PathBuf::from(format!("{}.lock", path.display()));
        if let Some(parent) = lock_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(_) => Ok(Self { path: lock_path }),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(MprError::Io(
                io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("writer lock held: {}", lock_path.display()),
                ),
            )),
            Err(e) => Err(MprError::Io(e)),
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_fs_roundtrip() {
        let fs = MemoryFilesystem::new();
        {
            let mut h = fs.open_write("a/b.bin", true).unwrap();
            h.write_all(b"hello").unwrap();
            h.seek(SeekFrom::Start(0)).unwrap();
            h.write_all(b"H").unwrap();
        }
        let mut h = fs.open_read("a/b.bin").unwrap();
        let mut s = String::new();
        h.read_to_string(&mut s).unwrap();
        assert_eq!(s, "Hello");

        fs.remove("a/b.bin").unwrap();
        assert!(!fs.exists("a/b.bin"));
    }

    #[test]
    fn memory_fs_truncate() {
        let fs = MemoryFilesystem::new();
        let mut h = fs.open_write("t.bin", true).unwrap();
        h.write_all(b"0123456789").unwrap();
        h.truncate(4).unwrap();
        h.seek(SeekFrom::Start(0)).unwrap();
        let mut v = Vec::new();
        h.read_to_end(&mut v).unwrap();
        assert_eq!(v, b"0123");
    }
}
