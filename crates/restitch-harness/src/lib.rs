//! Test support for the salvage workspace: byte-level database fixtures
//! and deterministic corruption injection.
//!
//! [`FixtureDb`] composes structurally valid database images page by page
//! without going through any SQL layer, so tests control the exact bytes a
//! crawl will see. [`CorruptionPattern`] then damages those images in
//! reproducible, seeded ways.
//!
//! These builders are for tests only. They panic on layouts that cannot
//! exist (rows that do not fit a page, pages that were never allocated)
//! instead of defining error types nobody would handle.

pub mod corruption;
pub mod fixture;

pub use corruption::{CorruptionInjector, CorruptionPattern};
pub use fixture::FixtureDb;
