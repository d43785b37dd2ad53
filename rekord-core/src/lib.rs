//! Content-addressed, encrypted, deduplicating backup repository engine.
//!
//! A repository ([`repository::Repository`]) is a bucketed store of
//! immutable, individually encrypted objects ([`codec`]) named by a keyed
//! content hash ([`oid`]). [`writer::put`] walks a filesystem tree, splits
//! file content into variable-sized chunks ([`chunker`]), uploads whatever
//! isn't already present, and assembles the result bottom-up into a
//! snapshot. [`reader::get`] reverses the process. A local [`cache`] lets
//! repeated backups of an unchanged tree skip re-chunking entirely, and
//! [`concurrency`] bounds how much of this happens at once.

pub mod backend;
pub mod cache;
pub mod chunker;
pub mod codec;
pub mod concurrency;
pub mod entries;
pub mod error;
pub mod keyring;
pub mod oid;
pub mod paths;
pub mod reader;
pub mod repository;
pub mod writer;

pub use error::{Error, Result};
pub use oid::Oid;
pub use repository::Repository;
