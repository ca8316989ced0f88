//! gnode: group graph alignments by node
//!
//! Usage: gnode <COMMAND> [OPTIONS]

use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use std::process;

use gnode_reads::commands::{GenerateCommand, GenerateConfig, GroupCommand, MergeCommand};
use gnode_reads::config::{
    GroupConfig, DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_THRESHOLD, DEFAULT_PROGRESS_INTERVAL,
    DEFAULT_SHARDS, DEFAULT_THREADS, DEFAULT_WRITE_ATTEMPTS,
};
use gnode_reads::source::SourceSpec;
use gnode_reads::{GnodeError, RecordFormat, Result};

#[derive(Parser)]
#[command(name = "gnode")]
#[command(version)]
#[command(about = "Group graph alignments by the reference nodes they touch", long_about = None)]
struct Cli {
    /// Number of worker threads (default: 4 for group, number of CPUs for merge)
    #[arg(long, short = 't', global = true)]
    threads: Option<usize>,

    /// Print run statistics to stderr
    #[arg(long, global = true)]
    stats: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Group an alignment stream by node
    Group {
        /// Node index JSON
        #[arg(short = 'n', long)]
        index: PathBuf,

        /// Alignment file (use - for stdin)
        #[arg(short, long, conflicts_with_all = ["exec", "gam"])]
        input: Option<PathBuf>,

        /// Input format: json|frames
        #[arg(short, long, default_value = "json")]
        format: String,

        /// Shell command whose stdout is JSON-lines alignments
        #[arg(short = 'x', long = "command", conflicts_with = "gam")]
        exec: Option<String>,

        /// GAM file, decoded with `vg view -a`
        #[arg(long)]
        gam: Option<PathBuf>,

        /// vg executable used with --gam
        #[arg(long, default_value = "vg")]
        vg: String,

        /// Output JSON file
        #[arg(short, long)]
        output: PathBuf,

        /// Merged records per checkpoint
        #[arg(short = 'B', long, default_value_t = DEFAULT_FLUSH_THRESHOLD)]
        flush_threshold: u64,

        /// Directory for checkpoint files (default: next to the output)
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,

        /// Keep checkpoint files after the final merge
        #[arg(long)]
        keep_checkpoints: bool,

        /// Attempts per checkpoint or output write
        #[arg(long, default_value_t = DEFAULT_WRITE_ATTEMPTS)]
        write_retries: u32,

        /// Number of accumulation shards
        #[arg(long, default_value_t = DEFAULT_SHARDS)]
        shards: usize,

        /// Records per reader-to-worker batch
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        /// Records read between progress messages
        #[arg(long, default_value_t = DEFAULT_PROGRESS_INTERVAL)]
        progress_interval: u64,
    },

    /// Merge leftover checkpoints into an output file
    Merge {
        /// Output JSON file
        #[arg(short, long)]
        output: PathBuf,

        /// Directory to search for checkpoints (default: next to the output)
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,

        /// Keep checkpoint files after merging
        #[arg(long)]
        keep_checkpoints: bool,

        /// Checkpoints to merge, in order (default: discover by name)
        checkpoints: Vec<PathBuf>,
    },

    /// Generate a synthetic node index and alignment stream
    Generate {
        /// Output directory
        #[arg(short, long, default_value = "./gnode_bench_data")]
        output: PathBuf,

        /// Number of indexed nodes
        #[arg(long, default_value = "1000")]
        nodes: u64,

        /// Number of alignment records
        #[arg(long, default_value = "100000")]
        reads: u64,

        /// Random seed for reproducibility
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Stream format: json|frames
        #[arg(long, default_value = "json")]
        format: String,

        /// Minimum mappings per record
        #[arg(long, default_value = "1")]
        mappings_min: usize,

        /// Maximum mappings per record
        #[arg(long, default_value = "8")]
        mappings_max: usize,

        /// Probability that a mapping hits an indexed node
        #[arg(long, default_value = "0.5")]
        hit_rate: f64,

        /// Probability that a record is malformed
        #[arg(long, default_value = "0.0")]
        malformed_rate: f64,

        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}: {}", e.stage(), e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    // Configure thread pool if --threads specified
    if let Some(n) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()
            .map_err(|e| GnodeError::Config(format!("cannot build thread pool: {}", e)))?;
    }

    match cli.command {
        Commands::Group {
            index,
            input,
            format,
            exec,
            gam,
            vg,
            output,
            flush_threshold,
            checkpoint_dir,
            keep_checkpoints,
            write_retries,
            shards,
            batch_size,
            progress_interval,
        } => {
            let format = parse_format(&format)?;
            let source = match (input, exec, gam) {
                (Some(path), None, None) => SourceSpec::File { path, format },
                (None, Some(command), None) => SourceSpec::Command(command),
                (None, None, Some(path)) => SourceSpec::Gam { vg, path },
                _ => {
                    return Err(GnodeError::Config(
                        "exactly one of --input, --command or --gam is required".into(),
                    ))
                }
            };
            // Piped streams are always JSON lines.
            if format != RecordFormat::Json && !matches!(source, SourceSpec::File { .. }) {
                return Err(GnodeError::Config(
                    "--format frames requires --input; --command and --gam produce JSON lines"
                        .into(),
                ));
            }

            let mut config = GroupConfig::new()
                .with_threads(cli.threads.unwrap_or(DEFAULT_THREADS))
                .with_flush_threshold(flush_threshold)
                .with_keep_checkpoints(keep_checkpoints)
                .with_write_attempts(write_retries)
                .with_shards(shards)
                .with_batch_size(batch_size)
                .with_progress_interval(progress_interval);
            if let Some(dir) = checkpoint_dir {
                config = config.with_checkpoint_dir(dir);
            }

            let stats = GroupCommand::new(index, source, &output)
                .with_config(config)
                .run()?;
            info!("Wrote {}", output.display());
            if cli.stats {
                eprintln!("{}", stats);
            }
            Ok(())
        }

        Commands::Merge {
            output,
            checkpoint_dir,
            keep_checkpoints,
            checkpoints,
        } => {
            let mut cmd = MergeCommand::new(&output)
                .with_checkpoints(checkpoints)
                .with_keep_checkpoints(keep_checkpoints)
                .with_threads(cli.threads.unwrap_or_else(rayon::current_num_threads));
            if let Some(dir) = checkpoint_dir {
                cmd = cmd.with_checkpoint_dir(dir);
            }
            let stats = cmd.run()?;
            if cli.stats {
                eprintln!("{}", stats);
            }
            Ok(())
        }

        Commands::Generate {
            output,
            nodes,
            reads,
            seed,
            format,
            mappings_min,
            mappings_max,
            hit_rate,
            malformed_rate,
            force,
        } => {
            let config = GenerateConfig {
                output_dir: output,
                nodes,
                reads,
                seed,
                format: parse_format(&format)?,
                mappings_min,
                mappings_max,
                hit_rate,
                malformed_rate,
                force,
            };
            let stats = GenerateCommand::new(config).run()?;
            if cli.stats {
                eprintln!("{}", stats);
            }
            Ok(())
        }
    }
}

fn parse_format(name: &str) -> Result<RecordFormat> {
    RecordFormat::from_str(name).ok_or_else(|| {
        GnodeError::Config(format!("invalid format '{}'. Use: json, frames", name))
    })
}
