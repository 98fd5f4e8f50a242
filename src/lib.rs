//! A sparse, segmented block volume.
//!
//! A [`Volume`] exposes a single flat 64-bit logical address space backed by
//! a directory of fixed-size segment files on a local filesystem. Logical
//! offsets are transparently sharded into per-segment files, and only a
//! bounded subset of segment file descriptors is kept open at any moment.
//!
//! Replication, checksums, encryption, compression, and cross-process
//! locking are out of scope: this crate is the storage primitive a
//! higher-level database, log, or index would be built on top of, not that
//! thing itself.

mod error;
mod pool;
mod segment;
mod volume;

pub use crate::error::Error;
pub use crate::segment::Segment;
pub use crate::volume::{Options, Volume};
