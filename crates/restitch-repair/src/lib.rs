//! Corruption-tolerant salvage engine for SQLite database files.
//!
//! The engine walks the table b-trees of a damaged source file and re-emits
//! every still-decodable row through an [`Assembler`], the caller-supplied
//! write side that builds the fresh output database. Damage is contained to
//! the smallest subtree that exhibits it: a bad page costs that page, a bad
//! cell costs that cell, and the crawl keeps going either way.
//!
//! The pieces, bottom up:
//!
//! - [`page`] / [`cell`] / [`overflow`]: b-tree page, cell, and
//!   overflow-chain decoding, built to fail with a precise error instead of
//!   panicking on any byte layout.
//! - [`crawler`]: iterative depth-first traversal over table b-trees,
//!   reporting rows and faults to a [`CrawlVisitor`].
//! - [`schema`]: `sqlite_master` and `sqlite_sequence` row interpretation.
//! - [`progress`] / [`report`]: monotonic weighted score, milestone
//!   accounting, and the session fault report.
//! - [`repairman`]: the orchestrator tying it all together, with
//!   [`Repairman::salvage`] as the one-call driver.
//!
//! ```no_run
//! use restitch_repair::{Assembler, Repairman};
//! # fn demo(assembler: &mut dyn Assembler) {
//! let mut repairman = Repairman::new("damaged.sqlite");
//! repairman.set_assembler(assembler);
//! let recovered = repairman.salvage();
//! println!(
//!     "recovered={recovered} score={:.2} faults={}",
//!     repairman.fraction(),
//!     repairman.report().faults().len(),
//! );
//! # }
//! ```

pub mod assembler;
pub mod cell;
pub mod crawler;
pub mod overflow;
pub mod page;
pub mod progress;
pub mod repairman;
pub mod report;
pub mod schema;

pub use assembler::Assembler;
pub use cell::{Cell, CellRef};
pub use crawler::{CrawlVisitor, Crawler};
pub use page::{BtreePageHeader, BtreePageType};
pub use progress::{MilestoneTracker, RepairOptions, ScoreKeeper};
pub use repairman::Repairman;
pub use report::{Fault, SessionReport, SessionState};
pub use schema::{MasterRow, ObjectKind, SchemaEntry, SequenceRow};
