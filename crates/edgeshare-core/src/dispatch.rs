//! Work dispatch: answer every query position, serially or in parallel.
//!
//! Serial mode walks the query list in position order on the calling
//! thread. Parallel mode splits the positions once, up front, into
//! contiguous blocks and hands each block to one worker of a
//! [`WorkerPool`] created for this call only. Workers read the
//! collection through a shared immutable [`NeighbourFinder`] and return
//! their answers tagged by query position. They never share mutable
//! state and never talk to each other.
//!
//! The caller blocks until every worker has returned. Only then are the
//! tagged answers assembled into [`Answers`], which is keyed by query
//! position alone: the worker that produced an answer, and the order in
//! which workers finished, leave no trace in the result.

use std::num::NonZeroUsize;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::matcher::{AdjacencyMatcher, MatcherKind, NeighbourFinder};
use crate::progress::{ProgressConfig, ProgressReporter, ProgressSink};
use crate::types::{NeighbourError, NeighbourResult, PolygonCollection, QuerySet, RuntimeError};

/// How query positions are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// One thread of control, positions in query order.
    Serial,
    /// Isolated workers over disjoint position blocks.
    Parallel {
        /// Upper bound on workers; `None` uses the available processing
        /// units.
        worker_count: Option<NonZeroUsize>,
    },
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::Parallel { worker_count: None }
    }
}

/// Everything [`run`] needs besides the data itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunOptions {
    /// Serial or parallel scheduling.
    pub mode: ExecutionMode,
    /// Neighbour search strategy.
    pub matcher: MatcherKind,
    /// Progress reporting.
    pub progress: ProgressConfig,
}

/// The answer for every query position, indexed by position.
///
/// This is the explicit position-to-artifact mapping: downstream writers
/// name each artifact after its position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answers(Vec<NeighbourResult>);

impl Answers {
    /// Number of answered positions.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no positions.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The answer for `position`.
    #[must_use]
    pub fn get(&self, position: usize) -> Option<&NeighbourResult> {
        self.0.get(position)
    }

    /// Iterate `(position, answer)` pairs in position order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &NeighbourResult)> {
        self.0.iter().enumerate()
    }

    /// Consume into the per-position answers.
    #[must_use]
    pub fn into_vec(self) -> Vec<NeighbourResult> {
        self.0
    }
}

impl From<Vec<NeighbourResult>> for Answers {
    fn from(answers: Vec<NeighbourResult>) -> Self {
        Self(answers)
    }
}

/// A contiguous block of query positions assigned to one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// Worker slot, used for progress labels and error reports only.
    pub worker: usize,
    /// Query positions this worker answers.
    pub positions: Range<usize>,
}

/// Split `n_positions` into at most `workers` non-empty contiguous blocks.
///
/// Block sizes differ by at most one; earlier workers take the extra
/// positions. Every position lands in exactly one block.
#[must_use]
pub fn partition(n_positions: usize, workers: NonZeroUsize) -> Vec<Partition> {
    let used = workers.get().min(n_positions);
    if used == 0 {
        return Vec::new();
    }
    let base = n_positions / used;
    let extra = n_positions % used;

    let mut start = 0;
    (0..used)
        .map(|worker| {
            let size = base + usize::from(worker < extra);
            let block = Partition {
                worker,
                positions: start..start + size,
            };
            start += size;
            block
        })
        .collect()
}

/// A dedicated thread pool that lives for a single engine invocation.
///
/// Created on entry and dropped on return, which joins its threads; no
/// process-global pool is used.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    workers: NonZeroUsize,
}

impl WorkerPool {
    /// Spawn a pool with `workers` threads.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::PoolBuild`] if the threads cannot be
    /// created.
    pub fn new(workers: NonZeroUsize) -> Result<Self, RuntimeError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.get())
            .thread_name(|slot| format!("edgeshare-worker-{slot}"))
            .build()?;
        Ok(Self { pool, workers })
    }

    /// Number of threads in the pool.
    #[must_use]
    pub const fn workers(&self) -> NonZeroUsize {
        self.workers
    }

    /// Run every partition on the pool and wait for all of them.
    ///
    /// Each worker answers its own block and returns the answers tagged
    /// by position. A panicking worker is reported as
    /// [`RuntimeError::WorkerPanicked`] instead of unwinding into the
    /// caller.
    fn run_partitions<F: NeighbourFinder>(
        &self,
        finder: &F,
        queries: &QuerySet,
        partitions: &[Partition],
        progress: ProgressConfig,
        sink: &dyn ProgressSink,
    ) -> Vec<Result<Vec<(usize, NeighbourResult)>, RuntimeError>> {
        self.pool.install(|| {
            partitions
                .par_iter()
                .map(|block| {
                    panic::catch_unwind(AssertUnwindSafe(|| {
                        answer_block(finder, queries, block, progress, sink)
                    }))
                    .map_err(|payload| RuntimeError::WorkerPanicked {
                        worker: block.worker,
                        message: panic_message(payload.as_ref()),
                    })
                })
                .collect()
        })
    }
}

/// The body of one worker: answer each position of `block` in order.
fn answer_block<F: NeighbourFinder>(
    finder: &F,
    queries: &QuerySet,
    block: &Partition,
    progress: ProgressConfig,
    sink: &dyn ProgressSink,
) -> Vec<(usize, NeighbourResult)> {
    let mut reporter =
        ProgressReporter::new(progress, Some(block.worker), block.positions.len(), sink);
    block
        .positions
        .clone()
        .filter_map(|position| {
            let target = queries.get(position)?;
            let answer = finder.neighbours_of(target);
            reporter.record_completed();
            Some((position, answer))
        })
        .collect()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Number of workers to use when none is requested.
fn default_worker_count() -> NonZeroUsize {
    std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
}

/// Answer every position of `queries` with `finder`.
///
/// Indices in `queries` are assumed valid for `finder`; [`run`] checks
/// them before calling this.
///
/// # Errors
///
/// In parallel mode, returns [`RuntimeError::PoolBuild`] if the pool
/// cannot be created, [`RuntimeError::WorkerPanicked`] if any worker
/// fails, and [`RuntimeError::Incomplete`] if any position is left
/// without an answer after every worker has joined.
pub fn dispatch<F: NeighbourFinder>(
    finder: &F,
    queries: &QuerySet,
    mode: ExecutionMode,
    progress: ProgressConfig,
    sink: &dyn ProgressSink,
) -> Result<Answers, RuntimeError> {
    let total = queries.len();
    if total == 0 {
        return Ok(Answers::default());
    }

    match mode {
        ExecutionMode::Serial => {
            let mut reporter = ProgressReporter::new(progress, None, total, sink);
            let answers = queries
                .indices()
                .iter()
                .map(|&target| {
                    let answer = finder.neighbours_of(target);
                    reporter.record_completed();
                    answer
                })
                .collect();
            Ok(Answers(answers))
        }
        ExecutionMode::Parallel { worker_count } => {
            let requested = worker_count.unwrap_or_else(default_worker_count);
            let partitions = partition(total, requested);
            let used = NonZeroUsize::new(partitions.len()).unwrap_or(NonZeroUsize::MIN);
            let pool = WorkerPool::new(used)?;
            tracing::debug!(
                workers = pool.workers().get(),
                positions = total,
                "dispatching query positions"
            );

            let outputs = pool.run_partitions(finder, queries, &partitions, progress, sink);
            drop(pool);

            let mut slots: Vec<Option<NeighbourResult>> = vec![None; total];
            for output in outputs {
                for (position, answer) in output? {
                    if let Some(slot) = slots.get_mut(position) {
                        *slot = Some(answer);
                    }
                }
            }

            let missing = slots.iter().filter(|slot| slot.is_none()).count();
            if missing > 0 {
                return Err(RuntimeError::Incomplete { missing, total });
            }
            Ok(Answers(slots.into_iter().flatten().collect()))
        }
    }
}

/// Validate `queries` against `collection`, then answer every position.
///
/// This is the engine's computation step: it prepares the matcher
/// selected by `options.matcher` for this call only and hands it to
/// [`dispatch`].
///
/// # Errors
///
/// Returns [`NeighbourError::IndexOutOfRange`] before any computation if
/// a query index is invalid, and [`NeighbourError::Runtime`] if parallel
/// execution fails.
pub fn run(
    collection: &PolygonCollection,
    queries: &QuerySet,
    options: &RunOptions,
    sink: &dyn ProgressSink,
) -> Result<Answers, NeighbourError> {
    queries.validate(collection)?;
    if queries.is_empty() {
        return Ok(Answers::default());
    }
    let matcher = AdjacencyMatcher::new(collection, options.matcher);
    Ok(dispatch(
        &matcher,
        queries,
        options.mode,
        options.progress,
        sink,
    )?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::progress::tests::CollectingSink;
    use crate::progress::TracingSink;
    use crate::types::{Point, Polygon};

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn polygon(index: usize, coords: &[(f64, f64)]) -> Polygon {
        Polygon::try_new(
            index,
            coords.iter().map(|&(x, y)| Point::new(x, y)).collect(),
        )
        .unwrap()
    }

    fn fixture() -> PolygonCollection {
        PolygonCollection::new(vec![
            polygon(0, &[(0., -1.), (1., 0.), (0., 1.), (-1., 0.), (0., -1.)]),
            polygon(1, &[(1., 0.), (3., 2.), (2., 3.), (0., 1.), (1., 0.)]),
            polygon(2, &[(3., 2.), (2., 3.), (3., 4.), (4., 3.), (3., 2.)]),
            polygon(3, &[(1., 0.), (3., 2.), (3., 0.), (1., 0.)]),
            polygon(4, &[(3., 2.), (5., 1.5), (3., 0.), (3., 2.)]),
            polygon(5, &[(1.5, 4.), (0., 4.), (0., 2.), (1.5, 2.), (1.5, 4.)]),
        ])
    }

    fn expected_fixture_answers() -> Vec<NeighbourResult> {
        vec![
            NeighbourResult::SharedWith(vec![0, 2, 3]),
            NeighbourResult::SharedWith(vec![3]),
            NeighbourResult::NoNeighbours,
        ]
    }

    /// Finder that fails on one target, standing in for a crashed worker.
    struct FailingFinder {
        poisoned: usize,
    }

    impl NeighbourFinder for FailingFinder {
        fn neighbours_of(&self, target: usize) -> NeighbourResult {
            if target == self.poisoned {
                panic!("cannot answer polygon {target}");
            }
            NeighbourResult::from_indices(vec![target + 1])
        }
    }

    // --- partition tests ---

    #[test]
    fn partition_covers_every_position_once() {
        for n in 0..40 {
            for w in 1..10 {
                let blocks = partition(n, nz(w));
                assert_eq!(blocks.len(), w.min(n));
                let mut covered: Vec<usize> =
                    blocks.iter().flat_map(|b| b.positions.clone()).collect();
                covered.sort_unstable();
                assert_eq!(covered, (0..n).collect::<Vec<_>>(), "n={n} w={w}");
                assert!(blocks.iter().all(|b| !b.positions.is_empty()));
            }
        }
    }

    #[test]
    fn partition_balances_block_sizes() {
        let sizes: Vec<usize> = partition(10, nz(4))
            .iter()
            .map(|b| b.positions.len())
            .collect();
        assert_eq!(sizes, [3, 3, 2, 2]);
    }

    #[test]
    fn partition_more_workers_than_positions() {
        let blocks = partition(3, nz(16));
        assert_eq!(blocks.len(), 3);
        assert!(blocks.iter().all(|b| b.positions.len() == 1));
    }

    // --- run tests ---

    #[test]
    fn serial_fixture() {
        let options = RunOptions {
            mode: ExecutionMode::Serial,
            ..RunOptions::default()
        };
        let answers = run(&fixture(), &QuerySet::new(vec![1, 4, 5]), &options, &TracingSink).unwrap();
        assert_eq!(answers.into_vec(), expected_fixture_answers());
    }

    #[test]
    fn parallel_fixture() {
        let answers = run(
            &fixture(),
            &QuerySet::new(vec![1, 4, 5]),
            &RunOptions::default(),
            &TracingSink,
        )
        .unwrap();
        assert_eq!(answers.into_vec(), expected_fixture_answers());
    }

    #[test]
    fn positions_outnumbering_workers_keep_their_own_answers() {
        // 18 positions over 2 workers: every worker answers nine
        // positions, and each answer must stay at its own position.
        let queries: Vec<usize> = (0..3).flat_map(|_| [1, 4, 5, 0, 2, 3]).collect();
        let queries = QuerySet::new(queries);
        let serial = run(
            &fixture(),
            &queries,
            &RunOptions {
                mode: ExecutionMode::Serial,
                ..RunOptions::default()
            },
            &TracingSink,
        )
        .unwrap();
        let parallel = run(
            &fixture(),
            &queries,
            &RunOptions {
                mode: ExecutionMode::Parallel {
                    worker_count: Some(nz(2)),
                },
                ..RunOptions::default()
            },
            &TracingSink,
        )
        .unwrap();
        assert_eq!(serial, parallel);
        assert_eq!(parallel.len(), 18);
        assert_eq!(parallel.get(6), Some(&NeighbourResult::SharedWith(vec![0, 2, 3])));
        assert_eq!(parallel.get(17), Some(&NeighbourResult::SharedWith(vec![1, 4])));
    }

    #[test]
    fn worker_count_does_not_change_results() {
        let queries = QuerySet::new(vec![5, 4, 3, 2, 1, 0, 1, 1]);
        let reference = run(
            &fixture(),
            &queries,
            &RunOptions {
                mode: ExecutionMode::Serial,
                ..RunOptions::default()
            },
            &TracingSink,
        )
        .unwrap();
        let max = default_worker_count().get().max(4);
        for workers in 1..=max {
            for matcher in [MatcherKind::Scan, MatcherKind::EdgeIndex, MatcherKind::Envelope] {
                let options = RunOptions {
                    mode: ExecutionMode::Parallel {
                        worker_count: Some(nz(workers)),
                    },
                    matcher,
                    ..RunOptions::default()
                };
                let answers = run(&fixture(), &queries, &options, &TracingSink).unwrap();
                assert_eq!(answers, reference, "workers={workers} matcher={matcher:?}");
            }
        }
    }

    #[test]
    fn out_of_range_index_fails_whole_call() {
        let err = run(
            &fixture(),
            &QuerySet::new(vec![1, 6]),
            &RunOptions::default(),
            &TracingSink,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            NeighbourError::IndexOutOfRange {
                position: 1,
                index: 6,
                count: 6
            }
        ));
    }

    #[test]
    fn empty_queries_succeed_trivially() {
        let answers = run(
            &fixture(),
            &QuerySet::default(),
            &RunOptions::default(),
            &TracingSink,
        )
        .unwrap();
        assert!(answers.is_empty());
    }

    #[test]
    fn empty_collection_with_no_queries_succeeds() {
        let answers = run(
            &PolygonCollection::default(),
            &QuerySet::default(),
            &RunOptions::default(),
            &TracingSink,
        )
        .unwrap();
        assert!(answers.is_empty());
    }

    #[test]
    fn empty_collection_with_queries_is_index_error() {
        let err = run(
            &PolygonCollection::default(),
            &QuerySet::new(vec![0]),
            &RunOptions::default(),
            &TracingSink,
        )
        .unwrap_err();
        assert!(matches!(err, NeighbourError::IndexOutOfRange { count: 0, .. }));
    }

    #[test]
    fn worker_panic_fails_the_call() {
        let finder = FailingFinder { poisoned: 7 };
        let queries = QuerySet::new((0..12).collect());
        let err = dispatch(
            &finder,
            &queries,
            ExecutionMode::Parallel {
                worker_count: Some(nz(3)),
            },
            ProgressConfig::default(),
            &TracingSink,
        )
        .unwrap_err();
        // Position 7 sits in the second block (4..8).
        match err {
            RuntimeError::WorkerPanicked { worker, message } => {
                assert_eq!(worker, 1);
                assert!(message.contains("polygon 7"), "message: {message}");
            }
            other => panic!("expected WorkerPanicked, got {other:?}"),
        }
    }

    #[test]
    fn healthy_finder_answers_every_position() {
        let finder = FailingFinder { poisoned: usize::MAX };
        let queries = QuerySet::new((0..12).collect());
        let answers = dispatch(
            &finder,
            &queries,
            ExecutionMode::Parallel {
                worker_count: Some(nz(5)),
            },
            ProgressConfig::default(),
            &TracingSink,
        )
        .unwrap();
        for (position, answer) in answers.iter() {
            assert_eq!(answer.indices(), &[position + 1]);
        }
    }

    #[test]
    fn serial_progress_fires_inline() {
        let sink = CollectingSink::default();
        let queries = QuerySet::new(vec![0, 1, 2, 3, 4, 5]);
        let options = RunOptions {
            mode: ExecutionMode::Serial,
            progress: ProgressConfig::configure(2, true),
            ..RunOptions::default()
        };
        run(&fixture(), &queries, &options, &sink).unwrap();
        let processed: Vec<usize> = sink.lines().iter().map(|l| l.processed).collect();
        assert_eq!(processed, [2, 4, 6]);
    }

    #[test]
    fn parallel_progress_is_per_worker() {
        let sink = CollectingSink::default();
        let queries = QuerySet::new(vec![0, 1, 2, 3, 4, 5]);
        let options = RunOptions {
            mode: ExecutionMode::Parallel {
                worker_count: Some(nz(2)),
            },
            progress: ProgressConfig::configure(1, true),
            ..RunOptions::default()
        };
        run(&fixture(), &queries, &options, &sink).unwrap();
        let mut lines = sink.lines();
        lines.sort_by_key(|l| (l.worker, l.processed));
        assert_eq!(lines.len(), 6);
        assert!(lines.iter().all(|l| l.total == 3));
        assert_eq!(lines[0].worker, Some(0));
        assert_eq!(lines[5].worker, Some(1));
    }

    #[test]
    fn progress_does_not_change_results() {
        let queries = QuerySet::new(vec![1, 4, 5]);
        let quiet = run(&fixture(), &queries, &RunOptions::default(), &TracingSink).unwrap();
        let loud = run(
            &fixture(),
            &queries,
            &RunOptions {
                progress: ProgressConfig::configure(1, true),
                ..RunOptions::default()
            },
            &CollectingSink::default(),
        )
        .unwrap();
        assert_eq!(quiet, loud);
    }
}
