use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors reported by [`crate::Segment`] and [`crate::Volume`].
///
/// Every variant names the artifact involved (a segment path, or the volume
/// directory) so a caller can log a useful message without reconstructing it
/// from an offset. The underlying OS error is always available via
/// [`std::error::Error::source`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to open segment file {path}")]
    OpenSegment {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to stat segment file {path}")]
    StatSegment {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read segment file {path} at offset {offset}")]
    ReadSegment {
        path: PathBuf,
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("failed to write segment file {path} at offset {offset}")]
    WriteSegment {
        path: PathBuf,
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("failed to seek segment file {path}")]
    SeekSegment {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to truncate segment file {path} to {len}")]
    TruncateSegment {
        path: PathBuf,
        len: u64,
        #[source]
        source: io::Error,
    },

    #[error("failed to sync segment file {path}")]
    SyncSegment {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to unlink segment file {path}")]
    UnlinkSegment {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to stat or create volume directory {path}")]
    PathSetup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("volume path {path} exists and is not a directory")]
    NotADirectory { path: PathBuf },

    #[error("failed to scan volume directory {path}")]
    DirScan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        let kind = match &e {
            Error::NotADirectory { .. } => io::ErrorKind::InvalidInput,
            Error::OpenSegment { source, .. }
            | Error::StatSegment { source, .. }
            | Error::ReadSegment { source, .. }
            | Error::WriteSegment { source, .. }
            | Error::SeekSegment { source, .. }
            | Error::TruncateSegment { source, .. }
            | Error::SyncSegment { source, .. }
            | Error::UnlinkSegment { source, .. }
            | Error::PathSetup { source, .. }
            | Error::DirScan { source, .. } => source.kind(),
        };
        io::Error::new(kind, e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
