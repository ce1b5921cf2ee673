//! Certkeeper Core - Shared certificate types
//!
//! This crate holds the data model shared by every certkeeper component:
//! certificate bundles, archive metadata and the distributed-store key layout.
//!
//! Anything that touches the network, subprocesses or the object store lives
//! in the `certkeeper` crate.

mod bundle;
mod keys;
mod metadata;

pub use bundle::*;
pub use keys::*;
pub use metadata::*;

/// Name of the backup archive, both locally and in the object store.
pub const ARCHIVE_FILE_NAME: &str = "certs.tgz";

/// Name of the metadata file embedded in every backup archive.
pub const METADATA_FILE_NAME: &str = "certs.json";
