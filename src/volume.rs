//! The segmented volume: a directory of segment files addressed as one flat
//! 64-bit logical address space.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::pool::Pool;
use crate::segment::Segment;

/// Suffix shared by every segment file.
const SEGMENT_SUFFIX: &str = ".vf";

/// [`Volume`] configuration.
///
/// Both parameters are fixed for the lifetime of a volume directory.
/// Reopening an existing directory with a different `segment_shift` than it
/// was created with is undefined, as is running two [`Volume`]s against the
/// same directory concurrently.
#[derive(Clone, Copy, Debug)]
pub struct Options {
    /// `K` in `S = 2^K`: the segment-size shift. Practical range 10..=40.
    ///
    /// Default: 30 (1 GiB segments).
    pub segment_shift: u32,
    /// `P`: the maximum number of concurrently open segment handles.
    ///
    /// Default: 256.
    pub pool_capacity: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            segment_shift: 30,
            pool_capacity: 256,
        }
    }
}

/// A sparse, segmented block volume.
///
/// Exposes one logical, arbitrarily long address space over a directory of
/// fixed-size segment files, transparently sharding reads and writes across
/// segment boundaries and keeping only a bounded number of segment file
/// descriptors open at a time.
pub struct Volume {
    path: PathBuf,
    segment_shift: u32,
    segment_size: u64,
    offset_mask: u64,
    start_mask: u64,
    pool: Pool,
    /// Serialises the dispatch of writes and truncation, and guards mutation
    /// of `provisioned_length`. Always acquired before any lock internal to
    /// `pool` (which holds its own, separate `pool_lock`).
    write_lock: Mutex<()>,
    provisioned_length: AtomicU64,
}

impl Volume {
    /// Open the volume directory at `path`, creating it if absent, and
    /// recover `provisioned_length` from the sizes of any segment files
    /// already present. No segment is opened eagerly; the pool fills
    /// lazily on first access.
    pub fn open(path: impl Into<PathBuf>, options: Options) -> io::Result<Self> {
        let path = path.into();

        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(Error::NotADirectory { path }.into()),
            Err(source) if source.kind() == io::ErrorKind::NotFound => {
                create_dir(&path)?;
            }
            Err(source) => return Err(Error::PathSetup { path, source }.into()),
        }

        let segment_shift = options.segment_shift;
        let segment_size = 1u64 << segment_shift;
        let offset_mask = segment_size - 1;
        let start_mask = !offset_mask;

        let provisioned_length = recover_provisioned_length(&path, segment_shift, segment_size)?;
        debug!(
            "opened volume {} (K={segment_shift}, provisioned_length={provisioned_length})",
            path.display()
        );

        Ok(Self {
            path,
            segment_shift,
            segment_size,
            offset_mask,
            start_mask,
            pool: Pool::new(options.pool_capacity),
            write_lock: Mutex::new(()),
            provisioned_length: AtomicU64::new(provisioned_length),
        })
    }

    /// Snapshot of the provisioned-length counter: one past the highest
    /// logical offset ever accepted by a write (or set by truncate).
    pub fn provisioned_length(&self) -> u64 {
        self.provisioned_length.load(Ordering::SeqCst)
    }

    /// Persist `buf` at `[off, off + buf.len())`. Serialised against other
    /// writers; `provisioned_length` reflects the write's extent once this
    /// call returns (and, per §7, even if it fails partway through).
    pub fn pwrite(&self, buf: &[u8], off: u64) -> io::Result<()> {
        let _guard = self.write_lock.lock();

        let end = off.saturating_add(buf.len() as u64);
        self.provisioned_length.fetch_max(end, Ordering::SeqCst);

        let mut off = off;
        let mut remaining = buf;
        while !remaining.is_empty() {
            let seg = self.get_segment(off)?;
            let in_offset = self.in_segment_offset(off);
            let chunk = self.remaining_in_segment(off).min(remaining.len() as u64) as usize;
            seg.pwrite(&remaining[..chunk], in_offset)?;

            off += chunk as u64;
            remaining = &remaining[chunk..];
        }
        Ok(())
    }

    /// Fill `buf` with the bytes at `[off, off + buf.len())`. Bytes in
    /// segments absent on disk, or beyond a segment's current length, read
    /// as zero. Takes no lock: reads may proceed concurrently with each
    /// other and with writes.
    pub fn pread(&self, buf: &mut [u8], off: u64) -> io::Result<()> {
        let mut off = off;
        let mut remaining = buf;
        while !remaining.is_empty() {
            let seg = self.get_segment(off)?;
            let in_offset = self.in_segment_offset(off);
            let chunk = self.remaining_in_segment(off).min(remaining.len() as u64) as usize;
            let (head, tail) = remaining.split_at_mut(chunk);
            seg.pread(head, in_offset)?;

            off += chunk as u64;
            remaining = tail;
        }
        Ok(())
    }

    /// Fsync every currently open (pooled) segment, then the volume
    /// directory itself, so that segment creation and unlinks are durable
    /// and not just the bytes within them. Segments present on disk but not
    /// currently pooled are not touched: their data was already durable
    /// before eviction.
    pub fn sync(&self) -> io::Result<()> {
        self.pool.sync_all()?;
        self.sync_dir()?;
        Ok(())
    }

    /// Shrink the volume to logical length `new_len`. Every segment whose
    /// start offset is `>= ceil(new_len / S) * S` is unlinked; the segment
    /// that still holds bytes below `new_len` (if any) is truncated to
    /// `new_len & OFFSET_MASK`. `provisioned_length` becomes `new_len`.
    ///
    /// Growing via truncate is not supported; `new_len` must not exceed the
    /// current `provisioned_length`.
    pub fn truncate(&self, new_len: u64) -> io::Result<()> {
        let _guard = self.write_lock.lock();

        let provisioned = self.provisioned_length.load(Ordering::SeqCst);
        assert!(
            new_len <= provisioned,
            "truncate does not support growing the volume (new_len={new_len} > provisioned_length={provisioned})"
        );

        // The lowest segment start that must not survive: ceil(new_len / S) * S.
        let first_removed_start = new_len.saturating_add(self.offset_mask) & self.start_mask;

        let mut end = provisioned & self.start_mask;
        loop {
            if end < first_removed_start {
                break;
            }
            self.pool.evict(end);
            let path = self.segment_path(self.index_of(end));
            match Segment::unlink(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
            match end.checked_sub(self.segment_size) {
                Some(next) => end = next,
                None => break,
            }
        }

        // If new_len doesn't land on a segment boundary, the segment just
        // below `first_removed_start` still holds bytes [0, new_len) and
        // must be shrunk in place rather than removed.
        if new_len & self.offset_mask != 0 {
            let start = new_len & self.start_mask;
            let seg = self.get_segment(start)?;
            seg.truncate(new_len & self.offset_mask)?;
        }

        self.provisioned_length.store(new_len, Ordering::SeqCst);

        // Unlinking a segment file is not durable until the directory entry
        // removal itself is fsynced; without this a crash could resurrect a
        // supposedly-truncated segment.
        self.sync_dir()?;
        Ok(())
    }

    /// Fsync the volume directory's own inode, making prior unlinks and
    /// segment-file creations within it durable.
    fn sync_dir(&self) -> Result<()> {
        let dir = std::fs::File::open(&self.path).map_err(|source| Error::PathSetup {
            path: self.path.clone(),
            source,
        })?;
        dir.sync_all().map_err(|source| Error::PathSetup {
            path: self.path.clone(),
            source,
        })
    }

    fn get_segment(&self, off: u64) -> io::Result<Arc<Segment>> {
        let start = off & self.start_mask;
        let path = self.segment_path(self.index_of(start));
        self.pool.get_or_open(start, || Segment::open(path))
    }

    fn index_of(&self, off: u64) -> u64 {
        off >> self.segment_shift
    }

    fn in_segment_offset(&self, off: u64) -> u64 {
        off & self.offset_mask
    }

    fn remaining_in_segment(&self, off: u64) -> u64 {
        self.segment_size - self.in_segment_offset(off)
    }

    fn segment_path(&self, index: u64) -> PathBuf {
        self.path.join(format!("{index:06}{SEGMENT_SUFFIX}"))
    }
}

fn create_dir(path: &std::path::Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt as _;
        std::fs::DirBuilder::new()
            .mode(0o755)
            .create(path)
            .map_err(|source| Error::PathSetup {
                path: path.to_path_buf(),
                source,
            })
    }
    #[cfg(not(unix))]
    {
        std::fs::create_dir(path).map_err(|source| Error::PathSetup {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Scan the volume directory for segment files matching `%06d.vf` (or any
/// longer run of digits before the suffix) and recover `provisioned_length`
/// as the maximum of `index * S + size_on_disk(segment)` over all of them.
/// Files that don't match the pattern are silently ignored. No segment is
/// opened by this scan.
fn recover_provisioned_length(path: &std::path::Path, segment_shift: u32, segment_size: u64) -> io::Result<u64> {
    let mut provisioned_length = 0u64;

    let entries = std::fs::read_dir(path).map_err(|source| Error::DirScan {
        path: path.to_path_buf(),
        source,
    })?;

    for entry in entries {
        let entry = entry.map_err(|source| Error::DirScan {
            path: path.to_path_buf(),
            source,
        })?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }

        let name = entry.file_name();
        let Some(index) = parse_segment_index(&name.to_string_lossy()) else {
            continue;
        };

        let size = Segment::size_of(&entry.path())?;
        let end = index
            .checked_shl(segment_shift)
            .and_then(|start| start.checked_add(size))
            .unwrap_or(u64::MAX);
        provisioned_length = provisioned_length.max(end);
    }

    Ok(provisioned_length)
}

/// Parse a segment index out of a filename, e.g. `"000042.vf"` -> `Some(42)`.
/// Per spec, the formatter uses a minimum width of six digits, not a
/// maximum, so any non-empty run of ASCII digits before `.vf` is accepted.
fn parse_segment_index(name: &str) -> Option<u64> {
    let digits = name.strip_suffix(SEGMENT_SUFFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
