//! `extmerge` is an external merge sort for line-delimited text files.
//!
//! External sorting handles files that do not fit into the main memory (RAM) of a computer.
//! Sorting is achieved in two passes: during the first pass the file is split into bounded-size
//! runs that are sorted in memory and persisted to disk, during the second pass the sorted runs
//! are merged together until a single fully-sorted file remains. Memory stays bounded by the
//! batch capacity while partitioning and by the number of active runs while merging, never by
//! the file size. For more information see
//! [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! `extmerge` supports the following features:
//!
//! * **Any run count:**
//!   the pairwise merge schedule reduces the run list in rounds, carrying an unpaired trailing
//!   run forward, so odd and non-power-of-two run counts merge correctly.
//! * **Two merge strategies:**
//!   round-based pairwise merging (independent pairs of a round run in parallel) or a
//!   single-pass k-way merge over all runs at once.
//! * **Atomic publishing:**
//!   the fully merged run is renamed onto the output path in one step, so a reader never
//!   observes a partially written result.
//! * **Self-cleaning:**
//!   transient run files live in a per-job working directory that is removed on success and on
//!   failure, except after a publish failure where the runs are kept so the sort can be retried.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use extmerge::{MergeStrategy, SortEngineBuilder};
//!
//! fn main() {
//!     let engine = SortEngineBuilder::new()
//!         .with_batch_capacity(500_000)
//!         .with_strategy(MergeStrategy::Pairwise)
//!         .build()
//!         .unwrap();
//!
//!     let sorted = engine.sort(Path::new("input.txt")).unwrap();
//!     println!("sorted file: {}", sorted.display());
//! }
//! ```

pub mod fixture;
pub mod merger;
pub mod run;
pub mod sort;

pub use run::{Run, RunWriter, Workspace};
pub use sort::{MergeStrategy, SortEngine, SortEngineBuilder, SortError, DEFAULT_BATCH_CAPACITY};
