//! Filesystem snapshotting and input fingerprinting for incremental execution.
//!
//! This crate provides the leaf abstractions of the incremental-execution
//! core:
//!
//! - Content hashing (SHA-256) with stable marker signatures
//! - Immutable snapshot trees of filesystem locations, with a visitor
//!   contract for allocation-light traversal
//! - A snapshotter turning disk state into snapshots in deterministic
//!   lexical order
//! - Value snapshots for non-file inputs
//! - Pluggable fingerprinting strategies (absolute / relative / name-only /
//!   ignored × directory sensitivity) producing comparable fingerprint
//!   collections with a single combined hash
//!
//! Everything here is immutable once constructed and safe to share across
//! threads; nothing caches across calls.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fingerprint;
pub mod hash;
pub mod snapshot;
pub mod snapshotter;
pub mod strategies;
pub mod value;

pub use fingerprint::{FingerprintCollection, HashingStrategy, LocationFingerprint};
pub use hash::ContentHash;
pub use snapshot::{
    DirectorySnapshot, FileMetadata, FileSnapshot, FileSystemSnapshot, FileSystemSnapshotVisitor,
    MissingSnapshot,
};
pub use snapshotter::{FileSystemSnapshotter, SnapshotError};
pub use strategies::{DirectorySensitivity, FingerprintingStrategy, PathNormalization};
pub use value::{ValueSnapshot, ValueSnapshotter};
