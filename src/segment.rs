//! A single open segment file: one OS file descriptor, blocking positional
//! I/O, with the retry policy described for the volume as a whole.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt as _;
use std::os::unix::io::AsRawFd as _;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::Error;

/// Mode bits for newly created segment files (spec: `0644`).
const SEGMENT_MODE: u32 = 0o644;

/// A handle owning a single open, read-write segment file.
///
/// Closing the descriptor is guaranteed on every exit path because `File`
/// closes its descriptor on `Drop`.
#[derive(Debug)]
pub struct Segment {
    path: PathBuf,
    file: File,
}

impl Segment {
    /// Open the segment file at `path`, creating it (mode `0644`) if absent.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(SEGMENT_MODE)
            .custom_flags(libc::O_CLOEXEC)
            .open(&path)
            .map_err(|source| Error::OpenSegment {
                path: path.clone(),
                source,
            })?;
        debug!("opened segment {}", path.display());
        Ok(Self { path, file })
    }

    /// The current on-disk length of this segment.
    pub fn size(&self) -> io::Result<u64> {
        let meta = self.file.metadata().map_err(|source| Error::StatSegment {
            path: self.path.clone(),
            source,
        })?;
        Ok(meta.len())
    }

    /// The on-disk length of the segment at `path`, without opening it for
    /// read/write. Returns `Ok(0)` if the file does not exist, matching the
    /// "absent segment reads as zero length" treatment used during recovery.
    pub fn size_of(path: &Path) -> io::Result<u64> {
        match std::fs::metadata(path) {
            Ok(m) => Ok(m.len()),
            Err(source) if source.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(source) => Err(Error::StatSegment {
                path: path.to_path_buf(),
                source,
            }
            .into()),
        }
    }

    /// Fill `buf` with the bytes at `[off, off + buf.len())`. Any portion of
    /// the requested range that lies beyond the current end of file is
    /// zero-filled rather than treated as an error.
    pub fn pread(&self, buf: &mut [u8], off: u64) -> io::Result<()> {
        let fd = self.file.as_raw_fd();
        let mut pos = off;
        let mut written = 0usize;
        while written < buf.len() {
            let remaining = &mut buf[written..];
            // SAFETY: `fd` is a valid, open descriptor for the lifetime of
            // this call; `remaining` is a valid writable slice of its stated
            // length.
            let n = unsafe {
                libc::pread(
                    fd,
                    remaining.as_mut_ptr() as *mut libc::c_void,
                    remaining.len(),
                    pos as libc::off_t,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(Error::ReadSegment {
                    path: self.path.clone(),
                    offset: pos,
                    source: err,
                }
                .into());
            }
            if n == 0 {
                // Short read past end-of-file: zero-fill the remainder.
                remaining.fill(0);
                break;
            }
            written += n as usize;
            pos += n as u64;
        }
        Ok(())
    }

    /// Persist all of `buf` at `[off, off + buf.len())`. Returns only once
    /// every byte has been written.
    pub fn pwrite(&self, buf: &[u8], off: u64) -> io::Result<()> {
        let fd = self.file.as_raw_fd();
        let mut pos = off;
        let mut sent = 0usize;
        while sent < buf.len() {
            let remaining = &buf[sent..];
            // SAFETY: `fd` is valid; `remaining` is a valid readable slice.
            let n = unsafe {
                libc::pwrite(
                    fd,
                    remaining.as_ptr() as *const libc::c_void,
                    remaining.len(),
                    pos as libc::off_t,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(Error::WriteSegment {
                    path: self.path.clone(),
                    offset: pos,
                    source: err,
                }
                .into());
            }
            sent += n as usize;
            pos += n as u64;
        }
        Ok(())
    }

    /// Write `buf` at the descriptor's current position, advancing it.
    pub fn write(&self, buf: &[u8]) -> io::Result<()> {
        let fd = self.file.as_raw_fd();
        let mut sent = 0usize;
        while sent < buf.len() {
            let remaining = &buf[sent..];
            // SAFETY: `fd` is valid; `remaining` is a valid readable slice.
            let n = unsafe { libc::write(fd, remaining.as_ptr() as *const libc::c_void, remaining.len()) };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(Error::WriteSegment {
                    path: self.path.clone(),
                    offset: self.tell(),
                    source: err,
                }
                .into());
            }
            sent += n as usize;
        }
        Ok(())
    }

    /// Set the descriptor's current position.
    pub fn seek(&self, off: u64) -> io::Result<()> {
        let fd = self.file.as_raw_fd();
        // SAFETY: `fd` is a valid descriptor.
        let ret = unsafe { libc::lseek(fd, off as libc::off_t, libc::SEEK_SET) };
        if ret < 0 {
            return Err(Error::SeekSegment {
                path: self.path.clone(),
                source: io::Error::last_os_error(),
            }
            .into());
        }
        Ok(())
    }

    /// The descriptor's current position. Best-effort: returns `0` if the
    /// underlying `lseek` fails rather than propagating an error.
    pub fn tell(&self) -> u64 {
        let fd = self.file.as_raw_fd();
        // SAFETY: `fd` is a valid descriptor.
        let ret = unsafe { libc::lseek(fd, 0, libc::SEEK_CUR) };
        if ret < 0 {
            0
        } else {
            ret as u64
        }
    }

    /// Set the file's length to exactly `len`, discarding bytes beyond it
    /// and extending with a hole if it grows.
    pub fn truncate(&self, len: u64) -> io::Result<()> {
        self.file.set_len(len).map_err(|source| Error::TruncateSegment {
            path: self.path.clone(),
            len,
            source,
        })?;
        Ok(())
    }

    /// Make all previously written bytes durable on persistent media.
    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all().map_err(|source| Error::SyncSegment {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }

    /// Remove the segment file at `path` from its directory.
    pub fn unlink(path: &Path) -> io::Result<()> {
        std::fs::remove_file(path).map_err(|source| Error::UnlinkSegment {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    /// The pathname this handle was opened with.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn segment(dir: &tempfile::TempDir, name: &str) -> Segment {
        Segment::open(dir.path().join(name)).unwrap()
    }

    #[test]
    fn open_creates_file_with_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000000.vf");
        let _seg = Segment::open(&path).unwrap();
        assert!(path.exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, SEGMENT_MODE);
        }
    }

    #[test]
    fn pwrite_then_pread_roundtrip() {
        let dir = tempdir().unwrap();
        let seg = segment(&dir, "000000.vf");

        seg.pwrite(b"hello world", 0).unwrap();
        let mut buf = [0u8; 11];
        seg.pread(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn pread_past_eof_zero_fills() {
        let dir = tempdir().unwrap();
        let seg = segment(&dir, "000000.vf");

        seg.pwrite(b"ab", 0).unwrap();
        let mut buf = [0xffu8; 8];
        seg.pread(&mut buf, 0).unwrap();
        assert_eq!(&buf, &[b'a', b'b', 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn pread_entirely_beyond_file_is_all_zero() {
        let dir = tempdir().unwrap();
        let seg = segment(&dir, "000000.vf");

        let mut buf = [1u8; 16];
        seg.pread(&mut buf, 1000).unwrap();
        assert_eq!(buf, [0u8; 16]);
    }

    #[test]
    fn size_reflects_highest_written_offset() {
        let dir = tempdir().unwrap();
        let seg = segment(&dir, "000000.vf");
        seg.pwrite(b"x", 99).unwrap();
        assert_eq!(seg.size().unwrap(), 100);
    }

    #[test]
    fn size_of_missing_file_is_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000005.vf");
        assert_eq!(Segment::size_of(&path).unwrap(), 0);
    }

    #[test]
    fn truncate_shrinks_and_grows() {
        let dir = tempdir().unwrap();
        let seg = segment(&dir, "000000.vf");
        seg.pwrite(&[1u8; 100], 0).unwrap();
        seg.truncate(10).unwrap();
        assert_eq!(seg.size().unwrap(), 10);

        seg.truncate(50).unwrap();
        assert_eq!(seg.size().unwrap(), 50);
        let mut buf = [0xffu8; 40];
        seg.pread(&mut buf, 10).unwrap();
        assert_eq!(buf, [0u8; 40]);
    }

    #[test]
    fn write_advances_position() {
        let dir = tempdir().unwrap();
        let seg = segment(&dir, "000000.vf");
        seg.write(b"abc").unwrap();
        seg.write(b"def").unwrap();
        let mut buf = [0u8; 6];
        seg.pread(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"abcdef");
    }

    #[test]
    fn seek_and_tell() {
        let dir = tempdir().unwrap();
        let seg = segment(&dir, "000000.vf");
        seg.seek(42).unwrap();
        assert_eq!(seg.tell(), 42);
    }

    #[test]
    fn unlink_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000000.vf");
        let _seg = Segment::open(&path).unwrap();
        drop(_seg);
        Segment::unlink(&path).unwrap();
        assert!(!path.exists());
    }
}
