//! The sort engine: partitions the source into runs, drives the merge
//! schedule and atomically publishes the final output.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time;

use rayon::prelude::*;
use thiserror::Error;

use crate::merger;
use crate::run::{Run, RunWriter, Workspace};

/// Default number of lines held in memory before a batch is flushed.
pub const DEFAULT_BATCH_CAPACITY: usize = 100_000;

/// Sorting error.
#[derive(Debug, Error)]
pub enum SortError {
    /// Source path does not exist.
    #[error("source file {path} not found")]
    SourceNotFound { path: PathBuf },
    /// Source path exists but cannot be opened for reading.
    #[error("source file {path} not readable: {source}")]
    SourceUnreadable { path: PathBuf, source: io::Error },
    /// Working directory creation error.
    #[error("working directory error: {0}")]
    Workspace(#[source] io::Error),
    /// The disk filled up while a run or merge output was being written.
    /// The partial file is removed before this error is returned.
    #[error("disk full while writing {path}: {source}")]
    DiskFull { path: PathBuf, source: io::Error },
    /// The atomic rename onto the output path failed. Intermediate runs
    /// are kept on disk so the sort can be retried without data loss.
    #[error("sorted output not published to {path}: {source}")]
    Publish { path: PathBuf, source: io::Error },
    /// Workers thread pool initialization error.
    #[error("thread pool initialization failed: {0}")]
    ThreadPoolBuild(#[from] rayon::ThreadPoolBuildError),
    /// Common I/O error.
    #[error("I/O operation failed: {0}")]
    Io(#[from] io::Error),
}

impl SortError {
    /// Classifies a failed run or merge write. `ENOSPC` gets its own
    /// variant so callers can tell "free some space and retry" apart from
    /// other I/O failures.
    pub(crate) fn from_write(err: io::Error, path: &Path) -> Self {
        if err.kind() == io::ErrorKind::StorageFull {
            SortError::DiskFull {
                path: path.to_path_buf(),
                source: err,
            }
        } else {
            SortError::Io(err)
        }
    }
}

/// Merge scheduling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Round-based pairwise reduction: each round merges consecutive run
    /// pairs left to right, an unpaired trailing run is carried into the
    /// next round, and rounds repeat until one run remains. Correct for
    /// any run count, not only powers of two. Pairs within a round touch
    /// disjoint runs and are merged in parallel.
    Pairwise,
    /// Single-pass k-way merge over all runs at once. Fewer I/O passes
    /// than pairwise rounds when the run count is large.
    KWay,
}

impl Default for MergeStrategy {
    fn default() -> Self {
        MergeStrategy::Pairwise
    }
}

/// Sort engine builder. Provides methods for [`SortEngine`] initialization.
#[derive(Debug, Clone, Default)]
pub struct SortEngineBuilder {
    /// Maximum number of lines per in-memory batch.
    batch_capacity: Option<usize>,
    /// Number of threads to be used to merge run pairs in parallel.
    threads_number: Option<usize>,
    /// Base directory for the transient working directory.
    tmp_dir: Option<Box<Path>>,
    /// Final output path.
    output_path: Option<PathBuf>,
    /// Merge scheduling strategy.
    strategy: Option<MergeStrategy>,
}

impl SortEngineBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        SortEngineBuilder::default()
    }

    /// Builds a [`SortEngine`] instance using provided configuration.
    pub fn build(self) -> Result<SortEngine, SortError> {
        SortEngine::new(
            self.batch_capacity,
            self.threads_number,
            self.tmp_dir,
            self.output_path,
            self.strategy,
        )
    }

    /// Sets the maximum number of lines held in memory before a batch is
    /// sorted and flushed to a run.
    pub fn with_batch_capacity(mut self, batch_capacity: usize) -> SortEngineBuilder {
        self.batch_capacity = Some(batch_capacity);
        return self;
    }

    /// Sets number of threads to be used to merge run pairs in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> SortEngineBuilder {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets the base directory the working directory is created in.
    /// It should reside on the same filesystem as the output path,
    /// otherwise the final rename cannot be atomic and publishing fails.
    pub fn with_tmp_dir(mut self, path: &Path) -> SortEngineBuilder {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets the final output path. Defaults to the source file name
    /// prefixed with `sorted_`, in the source's directory.
    pub fn with_output_path(mut self, path: &Path) -> SortEngineBuilder {
        self.output_path = Some(path.to_path_buf());
        return self;
    }

    /// Sets the merge scheduling strategy.
    pub fn with_strategy(mut self, strategy: MergeStrategy) -> SortEngineBuilder {
        self.strategy = Some(strategy);
        return self;
    }
}

/// External merge sort engine.
///
/// One [`sort`](SortEngine::sort) call is one job: a transient working
/// directory is created next to the output, the source is partitioned
/// into sorted runs, the runs are merged down to one, and the survivor is
/// renamed onto the output path. The working directory is removed on
/// every exit path except a publish failure, where the remaining runs are
/// deliberately kept for a retry.
pub struct SortEngine {
    /// Maximum number of lines per in-memory batch.
    batch_capacity: usize,
    /// Merging thread pool.
    thread_pool: rayon::ThreadPool,
    /// Base directory for the working directory.
    tmp_dir: Option<Box<Path>>,
    /// Final output path.
    output_path: Option<PathBuf>,
    /// Merge scheduling strategy.
    strategy: MergeStrategy,
}

impl SortEngine {
    /// Creates a new sort engine instance.
    ///
    /// # Arguments
    /// * `batch_capacity` - Maximum number of lines per in-memory batch. If the parameter is
    ///   [`None`] the [`DEFAULT_BATCH_CAPACITY`] is used.
    /// * `threads_number` - Number of threads to be used to merge run pairs in parallel. If the
    ///   parameter is [`None`] threads number will be selected based on available CPU core number.
    /// * `tmp_dir` - Base directory for the transient working directory. If the parameter is
    ///   [`None`] the output's parent directory is used, keeping the final rename on one filesystem.
    /// * `output_path` - Final output path. If the parameter is [`None`] the path is derived from
    ///   the source path.
    /// * `strategy` - Merge scheduling strategy, [`MergeStrategy::Pairwise`] by default.
    pub fn new(
        batch_capacity: Option<usize>,
        threads_number: Option<usize>,
        tmp_dir: Option<Box<Path>>,
        output_path: Option<PathBuf>,
        strategy: Option<MergeStrategy>,
    ) -> Result<Self, SortError> {
        return Ok(SortEngine {
            batch_capacity: batch_capacity.unwrap_or(DEFAULT_BATCH_CAPACITY).max(1),
            thread_pool: Self::init_thread_pool(threads_number)?,
            tmp_dir,
            output_path,
            strategy: strategy.unwrap_or_default(),
        });
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, SortError> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder.build()?;

        return Ok(thread_pool);
    }

    /// Sorts the file at `source`, returning the path of the sorted output.
    ///
    /// The output contains every source line exactly once, in
    /// non-decreasing lexicographic order, and is created or replaced
    /// atomically: a reader never observes a partially written file.
    pub fn sort(&self, source: &Path) -> Result<PathBuf, SortError> {
        let started = time::Instant::now();
        let output = self.output_path_for(source);

        let reader = Self::open_source(source)?;
        let workspace = Workspace::create(&self.workspace_base(&output))?;

        match self.run_pipeline(&workspace, reader, &output) {
            Ok(()) => {
                if let Err(err) = workspace.close() {
                    log::warn!("working directory not removed: {}", err);
                }
                log::info!(
                    "sorted {} into {} in {:.3}s",
                    source.display(),
                    output.display(),
                    started.elapsed().as_secs_f64()
                );
                Ok(output)
            }
            Err(err @ SortError::Publish { .. }) => {
                let kept = workspace.keep();
                log::warn!("publishing failed, runs kept in {} for retry", kept.display());
                Err(err)
            }
            Err(err) => {
                if let Err(cleanup_err) = workspace.close() {
                    log::warn!("working directory not cleaned up after failure: {}", cleanup_err);
                }
                Err(err)
            }
        }
    }

    fn run_pipeline(
        &self,
        workspace: &Workspace,
        source: io::BufReader<fs::File>,
        output: &Path,
    ) -> Result<(), SortError> {
        let writer = RunWriter::new(workspace, self.batch_capacity);
        let mut runs = writer.partition(source)?;
        log::info!("partitioning produced {} runs", runs.len());

        let survivor = if runs.is_empty() {
            // an empty source sorts to an empty output
            Run::write(workspace, &[])?
        } else if runs.len() == 1 {
            runs.remove(0)
        } else {
            match self.strategy {
                MergeStrategy::Pairwise => self.merge_rounds(workspace, runs)?,
                MergeStrategy::KWay => merger::merge_all(workspace, runs)?,
            }
        };

        Self::publish(survivor, output)
    }

    /// Reduces the run list with successive merge rounds until one run
    /// remains. Each round pairs consecutive runs; an unpaired trailing
    /// run is carried into the next round, so any run count reduces
    /// correctly. Pairs of the same round merge on the thread pool.
    fn merge_rounds(&self, workspace: &Workspace, mut runs: Vec<Run>) -> Result<Run, SortError> {
        let mut round = 0u32;

        loop {
            let mut pending = runs.into_iter();
            let first_pair = match (pending.next(), pending.next()) {
                (Some(survivor), None) => return Ok(survivor),
                (None, _) => return Run::write(workspace, &[]),
                (Some(left), Some(right)) => (left, right),
            };

            round += 1;

            let mut pairs = vec![first_pair];
            let mut carried = None;
            loop {
                match (pending.next(), pending.next()) {
                    (Some(left), Some(right)) => pairs.push((left, right)),
                    (Some(last), None) => {
                        carried = Some(last);
                        break;
                    }
                    (None, _) => break,
                }
            }
            let before = pairs.len() * 2 + carried.is_some() as usize;

            let mut merged = self.thread_pool.install(|| {
                pairs
                    .into_par_iter()
                    .map(|(left, right)| merger::merge_pair(workspace, left, right))
                    .collect::<Result<Vec<Run>, SortError>>()
            })?;

            if let Some(run) = carried {
                merged.push(run);
            }

            log::debug!("merge round {}: {} -> {} runs", round, before, merged.len());
            runs = merged;
        }
    }

    /// Publishes the final run as the output file. A rename either fully
    /// replaces the output or leaves it untouched.
    fn publish(survivor: Run, output: &Path) -> Result<(), SortError> {
        let run_path = survivor.into_path();
        fs::rename(&run_path, output).map_err(|err| SortError::Publish {
            path: output.to_path_buf(),
            source: err,
        })
    }

    fn open_source(path: &Path) -> Result<io::BufReader<fs::File>, SortError> {
        match fs::File::open(path) {
            Ok(file) => Ok(io::BufReader::new(file)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(SortError::SourceNotFound {
                path: path.to_path_buf(),
            }),
            Err(err) => Err(SortError::SourceUnreadable {
                path: path.to_path_buf(),
                source: err,
            }),
        }
    }

    /// The working directory defaults to a sibling of the output so that
    /// publishing stays a single same-filesystem rename.
    fn workspace_base(&self, output: &Path) -> PathBuf {
        match &self.tmp_dir {
            Some(dir) => dir.to_path_buf(),
            None => match output.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            },
        }
    }

    fn output_path_for(&self, source: &Path) -> PathBuf {
        match &self.output_path {
            Some(path) => path.clone(),
            None => {
                let name = source
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| String::from("output"));
                source.with_file_name(format!("sorted_{}", name))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::path::{Path, PathBuf};

    use rand::seq::SliceRandom;
    use rstest::*;

    use super::{MergeStrategy, SortEngine, SortEngineBuilder, SortError};
    use crate::fixture;

    fn build_engine(base: &Path, batch_capacity: usize, strategy: MergeStrategy) -> SortEngine {
        SortEngineBuilder::new()
            .with_batch_capacity(batch_capacity)
            .with_threads_number(2)
            .with_tmp_dir(base)
            .with_output_path(&base.join("output.txt"))
            .with_strategy(strategy)
            .build()
            .unwrap()
    }

    fn write_shuffled_lines(path: &Path, count: usize) -> Vec<String> {
        let mut lines: Vec<String> = (0..count).map(|n| format!("line-{:04}", n)).collect();
        lines.shuffle(&mut rand::thread_rng());

        let mut content = String::new();
        for line in &lines {
            content.push_str(line);
            content.push('\n');
        }
        fs::write(path, content).unwrap();

        lines
    }

    fn read_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[fixture]
    fn base() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[rstest]
    #[case(MergeStrategy::Pairwise, 10)] // 1 run
    #[case(MergeStrategy::Pairwise, 20)] // 2 runs
    #[case(MergeStrategy::Pairwise, 25)] // 3 runs (odd)
    #[case(MergeStrategy::Pairwise, 40)] // 4 runs (power of two)
    #[case(MergeStrategy::Pairwise, 61)] // 7 runs (non-power-of-two)
    #[case(MergeStrategy::KWay, 25)]
    #[case(MergeStrategy::KWay, 61)]
    fn test_sort(base: tempfile::TempDir, #[case] strategy: MergeStrategy, #[case] line_count: usize) {
        let source = base.path().join("input.txt");
        let mut expected = write_shuffled_lines(&source, line_count);
        expected.sort();

        let engine = build_engine(base.path(), 10, strategy);
        let output = engine.sort(&source).unwrap();

        assert_eq!(read_lines(&output), expected);
    }

    #[rstest]
    fn test_sort_example(base: tempfile::TempDir) {
        let source = base.path().join("input.txt");
        fs::write(&source, "banana\napple\ncherry\ndate\napple\n").unwrap();

        let engine = build_engine(base.path(), 2, MergeStrategy::Pairwise);
        let output = engine.sort(&source).unwrap();

        assert_eq!(
            fs::read_to_string(&output).unwrap(),
            "apple\napple\nbanana\ncherry\ndate\n"
        );
    }

    #[rstest]
    #[case(MergeStrategy::Pairwise)]
    #[case(MergeStrategy::KWay)]
    fn test_sort_empty_source(base: tempfile::TempDir, #[case] strategy: MergeStrategy) {
        let source = base.path().join("input.txt");
        fs::write(&source, "").unwrap();

        let engine = build_engine(base.path(), 10, strategy);
        let output = engine.sort(&source).unwrap();

        assert_eq!(fs::read_to_string(&output).unwrap(), "");
    }

    #[rstest]
    fn test_sort_is_idempotent(base: tempfile::TempDir) {
        let source = base.path().join("input.txt");
        write_shuffled_lines(&source, 35);

        let engine = build_engine(base.path(), 10, MergeStrategy::Pairwise);
        let output = engine.sort(&source).unwrap();
        let first_pass = fs::read_to_string(&output).unwrap();

        let resorted = SortEngineBuilder::new()
            .with_batch_capacity(10)
            .with_tmp_dir(base.path())
            .with_output_path(&base.path().join("resorted.txt"))
            .build()
            .unwrap()
            .sort(&output)
            .unwrap();

        assert_eq!(fs::read_to_string(&resorted).unwrap(), first_pass);
    }

    #[rstest]
    fn test_sort_random_input_multiset(base: tempfile::TempDir) {
        let source = base.path().join("input.txt");
        fixture::generate(&source, 2500, 20, false).unwrap();
        let input_len = fs::metadata(&source).unwrap().len();

        let engine = build_engine(base.path(), 1000, MergeStrategy::Pairwise);
        let output = engine.sort(&source).unwrap();

        let mut expected = read_lines(&source);
        expected.sort();
        let actual = read_lines(&output);

        assert_eq!(actual, expected);
        assert_eq!(fs::metadata(&output).unwrap().len(), input_len);
    }

    #[rstest]
    fn test_sort_replaces_existing_output(base: tempfile::TempDir) {
        let source = base.path().join("input.txt");
        let output_path = base.path().join("output.txt");
        fs::write(&source, "b\na\n").unwrap();
        fs::write(&output_path, "stale content\n").unwrap();

        let engine = build_engine(base.path(), 10, MergeStrategy::Pairwise);
        let output = engine.sort(&source).unwrap();

        assert_eq!(output, output_path);
        assert_eq!(fs::read_to_string(&output).unwrap(), "a\nb\n");
    }

    #[rstest]
    fn test_sort_missing_source(base: tempfile::TempDir) {
        let engine = build_engine(base.path(), 10, MergeStrategy::Pairwise);

        let err = engine.sort(&base.path().join("no-such-file.txt")).unwrap_err();

        assert!(matches!(err, SortError::SourceNotFound { .. }));
    }

    #[rstest]
    #[case(MergeStrategy::Pairwise)]
    #[case(MergeStrategy::KWay)]
    fn test_sort_leaves_no_stray_files(base: tempfile::TempDir, #[case] strategy: MergeStrategy) {
        let source = base.path().join("input.txt");
        write_shuffled_lines(&source, 61);

        let engine = build_engine(base.path(), 10, strategy);
        let output = engine.sort(&source).unwrap();

        let mut remaining: Vec<PathBuf> = fs::read_dir(base.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        remaining.sort();

        assert_eq!(remaining, vec![source, output]);
    }

    #[rstest]
    fn test_failure_cleans_up_workspace(base: tempfile::TempDir) {
        let source = base.path().join("input.bin");
        // invalid UTF-8 makes partitioning fail partway through the source
        fs::write(&source, b"fo\xff\xfe\nbar\n").unwrap();

        let engine = build_engine(base.path(), 1, MergeStrategy::Pairwise);
        let err = engine.sort(&source).unwrap_err();
        assert!(matches!(err, SortError::Io(_)));

        let remaining: Vec<PathBuf> = fs::read_dir(base.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(remaining, vec![source]);
    }

    #[rstest]
    fn test_publish_failure_keeps_runs(base: tempfile::TempDir) {
        let source = base.path().join("input.txt");
        fs::write(&source, "b\na\n").unwrap();

        // output path inside a missing directory makes publishing fail
        let engine = SortEngineBuilder::new()
            .with_batch_capacity(1)
            .with_tmp_dir(base.path())
            .with_output_path(&base.path().join("missing").join("output.txt"))
            .build()
            .unwrap();

        let err = engine.sort(&source).unwrap_err();
        assert!(matches!(err, SortError::Publish { .. }));

        // a publish failure keeps the workspace so the runs survive
        let kept: Vec<PathBuf> = fs::read_dir(base.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.is_dir())
            .collect();
        assert_eq!(kept.len(), 1);
    }

    #[rstest]
    fn test_default_output_path(base: tempfile::TempDir) {
        let source = base.path().join("data.txt");
        fs::write(&source, "b\na\n").unwrap();

        let engine = SortEngineBuilder::new().build().unwrap();
        let output = engine.sort(&source).unwrap();

        assert_eq!(output, base.path().join("sorted_data.txt"));
        assert_eq!(fs::read_to_string(&output).unwrap(), "a\nb\n");
    }
}
