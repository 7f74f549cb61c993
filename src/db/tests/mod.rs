//! Shared archive source test infrastructure
//!
//! The same test logic runs against every backend:
//!
//! - **Unit tests (SQLite)**: Fast, in-memory tests that run with every `cargo test`
//! - **Integration tests (PostgreSQL, MySQL)**: Testcontainers-based, run with `cargo test -- --ignored`
//!
//! Each backend seeds the same fixture rows (see [`harness::SEED_ROWS`]) and then
//! calls the shared test functions in `archive_source.rs`, which take a
//! `&dyn ArchiveSource` for the archived table and another for its recovery table.
//!
//! # Running tests
//!
//! ```bash
//! cargo test                       # Run fast SQLite tests only
//! cargo test -- --ignored          # Run PostgreSQL/MySQL integration tests (requires Docker)
//! cargo test -- --include-ignored  # Run all tests
//! ```
