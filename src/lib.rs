//! Moves aged rows from an operational table into durable storage.
//!
//! A run selects a cutoff, fetches every row older than it, writes them to a
//! CSV archive, uploads the archive, and only then deletes exactly those rows
//! from the source table. See [`archive::Archiver`].

pub mod archive;
pub mod config;
pub mod db;
#[cfg(feature = "cli")]
pub mod observability;
pub mod records;
pub mod staging;
pub mod storage;
