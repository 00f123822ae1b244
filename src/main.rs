use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use treenode::consensus::{Aggregation, ConsensusOptions, consensus_with_progress};
use treenode::distances::{DistanceOptions, PruneMode, fill_distance_matrix_with_progress};
use treenode::io::{TreeFormat, read_trees_file, tree_labels, write_matrix_tsv, write_trees_file};
use treenode::nwka::WriteOptions;
use treenode::tree::{LengthType, Tree};

/// Tree distances, consensus trees and format conversion for Newick, NWKA and
/// binary tree files. Inputs may be gzip-compressed; `-` reads stdin / writes stdout.
#[derive(Parser, Debug)]
#[command(name = "treenode", version, about = "Pairwise distances, consensus and conversion for tree files")]
struct Cli {
    /// Quiet mode: only warnings and errors are logged
    #[arg(short = 'q', long = "quiet", global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode: also log engine setup and progress
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a labeled distance matrix (TSV) between all input trees
    Distances(DistancesArgs),
    /// Build the consensus tree of all input trees
    Consensus(ConsensusArgs),
    /// Rewrite a tree file in another format
    Convert(ConvertArgs),
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Path to a Newick / NWKA / binary tree file
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Burn-in by number of trees (drop first N trees)
    #[arg(short = 't', long = "burnin-trees", default_value_t = 0)]
    burnin_trees: usize,
}

#[derive(Args, Debug)]
struct DistancesArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Output path for TSV distance matrix
    #[arg(short = 'o', long = "output")]
    output: PathBuf,

    /// Distance metric to compute
    #[arg(long = "metric", value_enum, default_value_t = MetricArg::Rf)]
    metric: MetricArg,

    /// Leaves each pair of trees is compared on
    #[arg(long = "prune", value_enum, default_value_t = PruneArg::Global)]
    prune: PruneArg,

    /// Worker threads (0 = one per core)
    #[arg(long = "threads", default_value_t = 0)]
    threads: usize,
}

#[derive(Args, Debug)]
struct ConsensusArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Output path for the consensus tree
    #[arg(short = 'o', long = "output", default_value = "-")]
    output: PathBuf,

    /// Minimum clade frequency (0.5 = majority rule, 1 = strict)
    #[arg(long = "threshold", default_value_t = 0.5)]
    threshold: f64,

    /// Average node ages instead of branch lengths
    #[arg(long = "age", default_value_t = false)]
    age: bool,

    /// Combine lengths by median instead of mean
    #[arg(long = "median", default_value_t = false)]
    median: bool,

    /// Output format
    #[arg(long = "format", value_enum, default_value_t = FormatArg::Nwka)]
    format: FormatArg,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Output path; a `.gz` suffix compresses the output
    #[arg(short = 'o', long = "output")]
    output: PathBuf,

    /// Output format
    #[arg(long = "format", value_enum, default_value_t = FormatArg::Binary)]
    format: FormatArg,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum MetricArg { Rf, Weighted, EdgeLength }

#[derive(Copy, Clone, Debug, ValueEnum)]
enum PruneArg { Global, Pairwise }

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FormatArg { Nwka, Newick, Binary }

impl FormatArg {
    fn resolve(self) -> (TreeFormat, WriteOptions) {
        match self {
            FormatArg::Nwka => (TreeFormat::Nwka, WriteOptions::nwka()),
            FormatArg::Newick => (TreeFormat::Nwka, WriteOptions::newick()),
            FormatArg::Binary => (TreeFormat::Binary, WriteOptions::default()),
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    match cli.command {
        Command::Distances(args) => run_distances(args),
        Command::Consensus(args) => run_consensus(args),
        Command::Convert(args) => run_convert(args),
    }
}

/// `-q` / `-v` win over `RUST_LOG`, which wins over the `info` default.
fn init_logging(quiet: bool, verbose: bool) {
    let filter = if quiet {
        EnvFilter::new("warn")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn fail(code: i32, msg: String) -> ! {
    error!("{msg}");
    std::process::exit(code);
}

/// Reads the input trees and applies the burn-in; exits with code 2 when nothing is left.
fn load_trees(args: &InputArgs) -> Vec<Tree> {
    let t0 = Instant::now();
    let trees = match read_trees_file(&args.input) {
        Ok(trees) => trees,
        Err(e) => fail(2, format!("Failed to read {:?}: {e}", args.input)),
    };
    let read = trees.len();
    let trees: Vec<Tree> = trees.into_iter().skip(args.burnin_trees).collect();
    if trees.is_empty() {
        fail(2, format!("No trees left in {:?} after a burn-in of {}.", args.input, args.burnin_trees));
    }
    let read_s = t0.elapsed().as_secs_f64();
    info!("Reading trees {read_s:.3}s");
    info!("Read {read} trees, kept {} after burn-in", trees.len());
    trees
}

fn run_distances(args: DistancesArgs) {
    let trees = load_trees(&args.input);
    let names = tree_labels(&trees);

    let options = DistanceOptions {
        robinson_foulds: matches!(args.metric, MetricArg::Rf),
        weighted_robinson_foulds: matches!(args.metric, MetricArg::Weighted),
        edge_length: matches!(args.metric, MetricArg::EdgeLength),
        prune: match args.prune {
            PruneArg::Global => PruneMode::Global,
            PruneArg::Pairwise => PruneMode::Pairwise,
        },
        max_threads: args.threads,
    };
    let metric_label = match args.metric {
        MetricArg::Rf => "RF",
        MetricArg::Weighted => "Weighted RF",
        MetricArg::EdgeLength => "edge length",
    };

    let t1 = Instant::now();
    info!(
        "Determining distances using {metric_label} for {} combinations",
        names.len() * (names.len() - 1) / 2
    );
    let matrices = fill_distance_matrix_with_progress(&trees, &options, |done, total| {
        if done == total || done % 100_000 == 0 {
            debug!("{done}/{total} pairs compared");
        }
    });
    let matrices = match matrices {
        Ok(m) => m,
        Err(e) => fail(3, format!("Failed to compute distances: {e}")),
    };
    let mat = matrices
        .robinson_foulds
        .or(matrices.weighted_robinson_foulds)
        .or(matrices.edge_length)
        .unwrap_or_default();
    let comp_s = t1.elapsed().as_secs_f64();
    info!("Determining distances using {metric_label} {comp_s:.3}s");

    let t2 = Instant::now();
    if let Err(e) = write_matrix_tsv(&args.output, &names, &mat) {
        fail(4, format!("Failed to write output {:?}: {e}", args.output));
    }
    log_write_done(&args.output, t2.elapsed().as_secs_f64());
}

fn run_consensus(args: ConsensusArgs) {
    let trees = load_trees(&args.input);
    let options = ConsensusOptions {
        threshold: args.threshold,
        length_type: if args.age { LengthType::Age } else { LengthType::Length },
        aggregation: if args.median { Aggregation::Median } else { Aggregation::Mean },
        ..ConsensusOptions::default()
    };

    let t1 = Instant::now();
    info!("Building consensus of {} trees at threshold {}", trees.len(), options.threshold);
    let tree = consensus_with_progress(&trees, &options, |done, total| {
        debug!("{done}/{total} compatibility rows");
    });
    let tree = match tree {
        Ok(t) => t,
        Err(e) => fail(3, format!("Failed to build consensus: {e}")),
    };
    let comp_s = t1.elapsed().as_secs_f64();
    info!("Building consensus {comp_s:.3}s");

    let t2 = Instant::now();
    let (format, write_options) = args.format.resolve();
    if let Err(e) = write_trees_file(&args.output, &[tree], format, &write_options) {
        fail(4, format!("Failed to write output {:?}: {e}", args.output));
    }
    log_write_done(&args.output, t2.elapsed().as_secs_f64());
}

fn run_convert(args: ConvertArgs) {
    let trees = load_trees(&args.input);
    let t1 = Instant::now();
    let (format, write_options) = args.format.resolve();
    if let Err(e) = write_trees_file(&args.output, &trees, format, &write_options) {
        fail(4, format!("Failed to write output {:?}: {e}", args.output));
    }
    log_write_done(&args.output, t1.elapsed().as_secs_f64());
}

fn log_write_done(output: &Path, secs: f64) {
    if output.as_os_str() == "-" {
        info!("Writing to stdout {secs:.3}s");
    } else {
        info!("Writing to output {secs:.3}s");
    }
}
