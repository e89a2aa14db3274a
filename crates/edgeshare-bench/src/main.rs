//! edgeshare-bench: CLI tool for timing the neighbour search on synthetic
//! polygon bundles.
//!
//! Generates a bundle of scattered regular polygons, writes it where the
//! engine expects it, runs the engine one or more times, and reports the
//! time spent per polygon. Useful for:
//!
//! - Comparing matcher strategies (`scan`, `edge-index`, `envelope`)
//! - Measuring parallel speedup against the serial path
//! - Checking how bundle size scales with polygon and vertex counts
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin edgeshare-bench -- [OPTIONS]
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::f64::consts::TAU;
use std::fs;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use edgeshare_core::store::encode_bundle;
use edgeshare_core::{MatcherKind, Point};
use edgeshare_io::{EngineConfig, RunSummary};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Neighbour search benchmark for edgeshare.
///
/// Builds a synthetic bundle of regular polygons, runs the engine on it
/// and prints per-run and per-polygon timings.
#[derive(Parser)]
#[command(name = "edgeshare-bench", version)]
struct Cli {
    /// Number of polygons in the generated bundle.
    #[arg(long, short = 'p', default_value_t = 4200)]
    n_polygons: usize,

    /// Number of query positions. Defaults to the number of available
    /// processing units, capped at `--n-polygons`.
    #[arg(long, short = 't')]
    n_test: Option<usize>,

    /// Inclusive range of vertex counts per polygon.
    #[arg(long, num_args = 2, value_names = ["MIN", "MAX"], default_values_t = [24, 420])]
    edge_range: Vec<usize>,

    /// Half-width of the square the polygon centres are scattered over.
    #[arg(long, default_value_t = 100.0)]
    spread: f64,

    /// Seed for polygon placement and query selection.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Run with a worker pool (the default).
    #[arg(long, conflicts_with = "serial")]
    parallel: bool,

    /// Run on the calling thread only.
    #[arg(long)]
    serial: bool,

    /// Upper bound on parallel workers.
    #[arg(long)]
    workers: Option<NonZeroUsize>,

    /// Neighbour search strategy.
    #[arg(long, value_enum, default_value_t = Matcher::EdgeIndex)]
    matcher: Matcher,

    /// Emit a progress line every this many completed positions.
    #[arg(long, default_value_t = EngineConfig::DEFAULT_PROGRESS_STEP_SIZE)]
    progress_step: usize,

    /// Enable progress lines and debug logging.
    #[arg(long)]
    verbose: bool,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Directory for the bundle and the artifacts.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Leave the bundle and artifacts on disk afterwards.
    #[arg(long)]
    keep: bool,

    /// Full engine config as a JSON string.
    ///
    /// When provided, all other engine flags are ignored. The JSON must
    /// be a valid `EngineConfig` serialization; missing fields take
    /// their defaults.
    #[arg(long)]
    config_json: Option<String>,
}

/// Matcher strategy selection.
#[derive(Clone, Copy, ValueEnum)]
enum Matcher {
    /// Compare the target against every other polygon.
    Scan,
    /// Look edges up in a global edge-to-owners index.
    EdgeIndex,
    /// Prefilter candidates by bounding box with an R-tree.
    Envelope,
}

/// Build an [`EngineConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and the
/// individual engine flags are ignored.
fn config_from_cli(cli: &Cli) -> Result<EngineConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    let mut config = EngineConfig {
        progress_step_size: cli.progress_step,
        verbose: cli.verbose,
        parallel: cli.parallel || !cli.serial,
        worker_count: cli.workers,
        matcher: match cli.matcher {
            Matcher::Scan => MatcherKind::Scan,
            Matcher::EdgeIndex => MatcherKind::EdgeIndex,
            Matcher::Envelope => MatcherKind::Envelope,
        },
        ..EngineConfig::default()
    };
    if let Some(ref dir) = cli.output_dir {
        config.input_path = dir.join("polygons_todo.json");
        config.output_dir.clone_from(dir);
    }
    Ok(config)
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "info,edgeshare_core=debug,edgeshare_io=debug"
    } else {
        "warn,edgeshare_bench=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// A regular polygon with `n_vertices` corners on a circle of `radius`
/// around `centre`, closed by repeating the first vertex.
#[allow(clippy::cast_precision_loss)]
fn regular_polygon(n_vertices: usize, centre: Point, radius: f64) -> Vec<Point> {
    let mut ring: Vec<Point> = (0..n_vertices)
        .map(|i| {
            let angle = TAU * i as f64 / n_vertices as f64;
            Point::new(
                angle.sin().mul_add(radius, centre.x),
                angle.cos().mul_add(radius, centre.y),
            )
        })
        .collect();
    if let Some(&first) = ring.first() {
        ring.push(first);
    }
    ring
}

/// Generate polygons and distinct query indices.
fn generate(cli: &Cli, rng: &mut ChaCha8Rng) -> Result<(Vec<Vec<Point>>, Vec<usize>), String> {
    let (min_edges, max_edges) = match cli.edge_range.as_slice() {
        &[lo, hi] if lo >= 3 && lo <= hi => (lo, hi),
        other => return Err(format!("--edge-range needs 3 <= MIN <= MAX, got {other:?}")),
    };
    let n_test = cli.n_test.unwrap_or_else(|| default_query_count(cli.n_polygons));
    if n_test > cli.n_polygons {
        return Err(format!(
            "--n-test ({n_test}) cannot exceed --n-polygons ({})",
            cli.n_polygons
        ));
    }

    let rings = (0..cli.n_polygons)
        .map(|_| {
            let centre = Point::new(
                rng.gen_range(-cli.spread..=cli.spread),
                rng.gen_range(-cli.spread..=cli.spread),
            );
            let n_vertices = rng.gen_range(min_edges..=max_edges);
            regular_polygon(n_vertices, centre, rng.gen_range(0.5..2.0))
        })
        .collect();
    let queries = rand::seq::index::sample(rng, cli.n_polygons, n_test).into_vec();
    Ok((rings, queries))
}

/// One query per available processing unit, never more than there are
/// polygons.
fn default_query_count(n_polygons: usize) -> usize {
    std::thread::available_parallelism()
        .map_or(1, NonZeroUsize::get)
        .min(n_polygons)
}

/// Mean number of distinct vertices per ring.
#[allow(clippy::cast_precision_loss)]
fn mean_polygon_size(rings: &[Vec<Point>]) -> f64 {
    if rings.is_empty() {
        return 0.0;
    }
    let vertices: usize = rings.iter().map(|ring| ring.len().saturating_sub(1)).sum();
    vertices as f64 / rings.len() as f64
}

/// Format a byte count with a binary unit suffix.
#[allow(clippy::cast_precision_loss)]
fn format_bytes(bytes: usize) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Remove the bundle and every artifact a run produced.
fn clean_up(config: &EngineConfig, summary: Option<&RunSummary>) {
    if let Err(e) = fs::remove_file(&config.input_path) {
        eprintln!(
            "Warning: could not remove {}: {e}",
            config.input_path.display()
        );
    }
    for path in summary.map_or(&[][..], |s| s.artifacts.as_slice()) {
        if let Err(e) = fs::remove_file(path) {
            eprintln!("Warning: could not remove {}: {e}", path.display());
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(cli.verbose || config.verbose);

    let mut rng = ChaCha8Rng::seed_from_u64(cli.seed);
    let (rings, queries) = match generate(&cli, &mut rng) {
        Ok(generated) => generated,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };
    tracing::debug!(seed = cli.seed, polygons = rings.len(), queries = queries.len(), "generated bundle");

    let bundle = match serde_json::to_vec(&encode_bundle(&rings, &queries)) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error serializing bundle: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(parent) = config.input_path.parent()
        && let Err(e) = fs::create_dir_all(parent)
    {
        eprintln!("Error creating {}: {e}", parent.display());
        return ExitCode::FAILURE;
    }
    if let Err(e) = fs::write(&config.input_path, &bundle) {
        eprintln!("Error writing {}: {e}", config.input_path.display());
        return ExitCode::FAILURE;
    }

    eprintln!(
        "Bundle: {} ({} polygons, {} queries, {})",
        config.input_path.display(),
        rings.len(),
        queries.len(),
        format_bytes(bundle.len()),
    );
    eprintln!("Avg. polygon size: {:.2} vertices", mean_polygon_size(&rings));
    eprintln!("Config: {config:#?}");
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let mut run_times = Vec::with_capacity(cli.runs);
    let mut last_summary = None;
    for run in 0..cli.runs {
        match edgeshare_io::run(&config) {
            Ok(summary) => {
                let per_polygon = per_polygon(summary.run_time, summary.polygon_count);
                println!(
                    "Run {}/{}: load {:.3}ms, search {:.3}ms, {:.3}us per polygon, {} artifacts",
                    run + 1,
                    cli.runs,
                    summary.load_time.as_secs_f64() * 1000.0,
                    summary.run_time.as_secs_f64() * 1000.0,
                    per_polygon.as_secs_f64() * 1e6,
                    summary.artifacts.len(),
                );
                run_times.push(summary.run_time);
                last_summary = Some(summary);
            }
            Err(e) => {
                eprintln!("Engine error: {e}");
                if !cli.keep {
                    clean_up(&config, last_summary.as_ref());
                }
                return ExitCode::FAILURE;
            }
        }
    }

    if cli.runs > 1 {
        print_multi_run_summary(&run_times, rings.len());
    }

    if cli.keep {
        eprintln!("Kept bundle and artifacts in {}", config.output_dir.display());
    } else {
        clean_up(&config, last_summary.as_ref());
    }
    ExitCode::SUCCESS
}

fn per_polygon(total: Duration, polygons: usize) -> Duration {
    u32::try_from(polygons)
        .ok()
        .filter(|&n| n > 0)
        .map_or(Duration::ZERO, |n| total / n)
}

/// Print aggregated search timings across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(run_times: &[Duration], polygons: usize) {
    if run_times.is_empty() {
        println!("Warning: no runs to summarize");
        return;
    }

    let millis: Vec<f64> = run_times.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
    let min = millis.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = millis.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = millis.iter().sum::<f64>() / millis.len() as f64;

    println!();
    println!("Summary ({} runs)\n{}", run_times.len(), "=".repeat(60));
    println!("Search: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");
    if polygons > 0 {
        println!(
            "Per polygon (mean): {:.3}us",
            mean * 1000.0 / polygons as f64
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_picks_unit() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MiB");
    }

    #[test]
    fn regular_polygon_is_closed() {
        let ring = regular_polygon(5, Point::new(2.0, -1.0), 1.0);
        assert_eq!(ring.len(), 6);
        assert_eq!(ring.first(), ring.last());
    }

    #[test]
    fn generated_queries_are_distinct() {
        let cli = Cli::parse_from(["edgeshare-bench", "--n-polygons", "50", "--n-test", "20"]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let (rings, mut queries) = generate(&cli, &mut rng).unwrap();
        assert_eq!(rings.len(), 50);
        queries.sort_unstable();
        queries.dedup();
        assert_eq!(queries.len(), 20);
        assert!(queries.iter().all(|&q| q < 50));
    }

    #[test]
    fn short_flags_and_default_query_count() {
        let cli = Cli::parse_from(["edgeshare-bench", "-p", "2"]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let (rings, queries) = generate(&cli, &mut rng).unwrap();
        assert_eq!(rings.len(), 2);
        assert_eq!(queries.len(), default_query_count(2));
        assert!((1..=2).contains(&queries.len()));

        let cli = Cli::parse_from(["edgeshare-bench", "-p", "10", "-t", "4"]);
        assert_eq!(generate(&cli, &mut rng).unwrap().1.len(), 4);
    }

    #[test]
    fn explicit_query_count_above_polygons_is_rejected() {
        let cli = Cli::parse_from(["edgeshare-bench", "-p", "3", "-t", "5"]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(generate(&cli, &mut rng).is_err());
    }

    #[test]
    fn mean_polygon_size_ignores_closing_vertex() {
        let rings = [
            regular_polygon(3, Point::new(0.0, 0.0), 1.0),
            regular_polygon(5, Point::new(9.0, 0.0), 1.0),
        ];
        assert!((mean_polygon_size(&rings) - 4.0).abs() < f64::EPSILON);
        assert!(mean_polygon_size(&[]).abs() < f64::EPSILON);
    }

    #[test]
    fn bad_edge_range_is_rejected() {
        let cli = Cli::parse_from(["edgeshare-bench", "--edge-range", "9", "4"]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(generate(&cli, &mut rng).is_err());
    }

    #[test]
    fn config_json_overrides_flags() {
        let cli = Cli::parse_from([
            "edgeshare-bench",
            "--serial",
            "--config-json",
            r#"{"parallel": true, "matcher": "envelope"}"#,
        ]);
        let config = config_from_cli(&cli).unwrap();
        assert!(config.parallel);
        assert_eq!(config.matcher, MatcherKind::Envelope);
    }

    #[test]
    fn output_dir_moves_bundle_and_artifacts() {
        let cli = Cli::parse_from(["edgeshare-bench", "--output-dir", "/scratch", "--serial"]);
        let config = config_from_cli(&cli).unwrap();
        assert_eq!(config.input_path, PathBuf::from("/scratch/polygons_todo.json"));
        assert_eq!(config.output_dir, PathBuf::from("/scratch"));
        assert!(!config.parallel);
    }
}
