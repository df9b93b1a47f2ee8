use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use dialoguer::Confirm;
use framecull::config::DedupConfig;
use framecull::fingerprint::compare_images;
use framecull::frame::{discover_frames, CandidateFrame, DiscoverOptions, FrameOrder};
use framecull::index::MatchPolicy;
use framecull::pipeline::{run_configured, AdmissionDecision, BatchReport, CancellationToken};
use framecull::report::{self, group_decisions};
use framecull::store::{DryRunStore, FsFrameStore};
use framecull::Strategy;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "framecull",
    version,
    about = "Keep one copy of each visually distinct video frame"
)]
struct Cli {
    /// JSON config file (default: <config dir>/framecull/config.json)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Frame deduplication workflows
    Frames {
        #[command(subcommand)]
        command: FramesCmd,
    },

    /// Work with the decision log of a store
    History {
        #[command(subcommand)]
        command: HistoryCmd,
    },
}

#[derive(Subcommand, Debug)]
enum FramesCmd {
    /// Admit unique frames into a store
    Dedup {
        /// Directory of extracted frames
        #[arg(short, long, value_name = "DIR")]
        input: PathBuf,
        /// Directory unique frames are saved into
        #[arg(short, long, value_name = "DIR")]
        store: PathBuf,
        #[command(flatten)]
        tuning: Tuning,
    },

    /// Show which frames would be kept, without writing anything
    Scan {
        /// Directory of extracted frames
        #[arg(short, long, value_name = "DIR")]
        input: PathBuf,
        #[command(flatten)]
        tuning: Tuning,
    },

    /// Print hash distance and SSIM for two images
    Compare { first: PathBuf, second: PathBuf },
}

#[derive(Subcommand, Debug)]
enum HistoryCmd {
    /// List decision log records
    List {
        /// Store directory
        #[arg(short, long, value_name = "DIR")]
        store: PathBuf,
    },

    /// Delete the decision log
    Clear {
        /// Store directory
        #[arg(short, long, value_name = "DIR")]
        store: PathBuf,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StrategyArg {
    Hash,
    Structural,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PolicyArg {
    First,
    Best,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OrderArg {
    Timestamp,
    Lexical,
}

/// Flags that override the config file.
#[derive(Args, Debug)]
struct Tuning {
    /// Comparison strategy
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,
    /// Largest Hamming distance still treated as a duplicate
    #[arg(long, value_name = "BITS")]
    max_distance: Option<u32>,
    /// Smallest SSIM still treated as a duplicate
    #[arg(long, value_name = "SSIM")]
    threshold: Option<f64>,
    /// Which admitted frame a duplicate is attributed to
    #[arg(long, value_enum)]
    policy: Option<PolicyArg>,
    /// Processing order
    #[arg(long, value_enum)]
    order: Option<OrderArg>,
    /// Walk subdirectories of the input
    #[arg(short, long)]
    recursive: bool,
    /// Fingerprinting threads
    #[arg(long)]
    threads: Option<usize>,
    /// Stop the batch after this many seconds
    #[arg(long, value_name = "SECS")]
    deadline: Option<u64>,
}

impl Tuning {
    fn apply(&self, config: &mut DedupConfig) {
        if let Some(strategy) = self.strategy {
            config.strategy = match strategy {
                StrategyArg::Hash => Strategy::Hash,
                StrategyArg::Structural => Strategy::Structural,
            };
        }
        if let Some(bits) = self.max_distance {
            config.hash.max_distance = bits;
        }
        if let Some(threshold) = self.threshold {
            config.structural.threshold = threshold;
        }
        if let Some(policy) = self.policy {
            config.policy = match policy {
                PolicyArg::First => MatchPolicy::FirstMatch,
                PolicyArg::Best => MatchPolicy::BestMatch,
            };
        }
        if let Some(order) = self.order {
            config.order = match order {
                OrderArg::Timestamp => FrameOrder::Timestamp,
                OrderArg::Lexical => FrameOrder::Lexical,
            };
        }
        if self.threads.is_some() {
            config.threads = self.threads;
        }
        if self.deadline.is_some() {
            config.deadline_secs = self.deadline;
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Frames { command } => match command {
            FramesCmd::Dedup {
                input,
                store,
                tuning,
            } => {
                let config = load_config(cli.config.as_deref(), &tuning)?;
                println!("▶ Deduplicating frames in: {}", input.display());

                let candidates = collect_frames(&input, &config, tuning.recursive, Some(&store))?;
                let frame_store = FsFrameStore::open(&store, &config.store)
                    .with_context(|| format!("Failed to open store {:?}", store))?;

                let progress = progress_bar(candidates.len())?;
                let result = benchmark("admitting frames", || {
                    run_configured(
                        &config,
                        candidates,
                        frame_store,
                        CancellationToken::new(),
                        Some(progress),
                    )
                });

                let (batch, aborted) = match result {
                    Ok(batch) => (batch, None),
                    Err(aborted) => (aborted.report, Some(aborted.cause)),
                };

                let written = report::append_decisions(&store, &batch.decisions)
                    .with_context(|| format!("Failed to write decision log in {:?}", store))?;
                print_summary(&batch);
                println!(
                    "\n✅ Recorded {} decision(s) in {}",
                    written,
                    report::log_path(&store).display()
                );

                if let Some(cause) = aborted {
                    return Err(anyhow::Error::new(cause).context(format!(
                        "Batch stopped with {} frame(s) unprocessed",
                        batch.unprocessed
                    )));
                }
            }

            FramesCmd::Scan { input, tuning } => {
                let config = load_config(cli.config.as_deref(), &tuning)?;
                println!("▶ Scanning frames in: {}", input.display());

                let candidates = collect_frames(&input, &config, tuning.recursive, None)?;
                let store = DryRunStore::new(&input, &config.store);
                let progress = progress_bar(candidates.len())?;
                let result = benchmark("scanning frames", || {
                    run_configured(
                        &config,
                        candidates,
                        store,
                        CancellationToken::new(),
                        Some(progress),
                    )
                });
                let batch = match result {
                    Ok(batch) => batch,
                    Err(aborted) => {
                        eprintln!("⚠️  {}", aborted);
                        aborted.report
                    }
                };

                let groups: Vec<_> = group_decisions(&batch.decisions)
                    .into_iter()
                    .filter(|g| !g.duplicates.is_empty())
                    .collect();
                if groups.is_empty() {
                    println!("No duplicate frames found.");
                } else {
                    println!("Found {} duplicate group(s):", groups.len());
                    for (i, group) in groups.iter().enumerate() {
                        println!("\n✨ Group {}:", i + 1);
                        println!("   🏆 Keeping → {}", group.kept);
                        for frame in &group.duplicates {
                            println!("   ▶ {}", frame);
                        }
                    }
                }
                print_summary(&batch);
                println!("\n⚠️  Scan only; no files were written.");
            }

            FramesCmd::Compare { first, second } => {
                let config = DedupConfig::resolve(cli.config.as_deref())
                    .context("Failed to load config")?;
                let a = image::open(&first).with_context(|| format!("Failed to open {:?}", first))?;
                let b =
                    image::open(&second).with_context(|| format!("Failed to open {:?}", second))?;

                let comparison = compare_images(&a, &b, &config.hash, &config.structural)
                    .context("Failed to compare images")?;
                println!(
                    "Hamming distance: {} (max {}) {}",
                    comparison.hamming,
                    config.hash.max_distance,
                    verdict(comparison.hash_duplicate)
                );
                println!(
                    "SSIM:             {:.4} (min {}) {}",
                    comparison.similarity,
                    config.structural.threshold,
                    verdict(comparison.structural_duplicate)
                );
            }
        },

        Commands::History { command } => match command {
            HistoryCmd::List { store } => {
                let records = report::read_decision_log(&store)
                    .with_context(|| format!("Could not read decision log in {:?}", store))?;
                if records.is_empty() {
                    println!("No decisions recorded in {}", store.display());
                    return Ok(());
                }

                println!("🗂️  Decision log:");
                for (i, rec) in records.iter().enumerate() {
                    let detail = match (&rec.location, &rec.matched_key, &rec.reason) {
                        (Some(location), _, _) => format!("→ {}", location.display()),
                        (_, Some(matched), _) => format!(
                            "≈ {} ({})",
                            matched,
                            rec.score.map(|s| s.to_string()).unwrap_or_default()
                        ),
                        (_, _, Some(reason)) => reason.clone(),
                        _ => String::new(),
                    };
                    println!(
                        "[{}] {} {:?} {} {}",
                        i, rec.recorded_at, rec.outcome, rec.frame, detail
                    );
                }
            }

            HistoryCmd::Clear { store, yes } => {
                let path = report::log_path(&store);
                if !path.exists() {
                    println!("No decision log in {}", store.display());
                    return Ok(());
                }
                let confirmed = yes
                    || Confirm::new()
                        .with_prompt(format!("Delete {}?", path.display()))
                        .default(false)
                        .interact()
                        .context("Failed to read confirmation")?;
                if !confirmed {
                    println!("Aborted; decision log kept.");
                    return Ok(());
                }
                report::clear_decision_log(&store)
                    .with_context(|| format!("Failed to remove {:?}", path))?;
                println!("🧹 Removed {}", path.display());
            }
        },
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "framecull=info",
        1 => "framecull=debug",
        _ => "framecull=trace",
    };
    let filter = if verbose > 0 {
        EnvFilter::new(level)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into())
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();
}

fn load_config(path: Option<&Path>, tuning: &Tuning) -> Result<DedupConfig> {
    let mut config = DedupConfig::resolve(path).context("Failed to load config")?;
    tuning.apply(&mut config);
    config.validate().context("Invalid settings")?;
    Ok(config)
}

/// Discover frames under `input`, skipping `store` if it lives inside it.
fn collect_frames(
    input: &Path,
    config: &DedupConfig,
    recursive: bool,
    store: Option<&Path>,
) -> Result<Vec<CandidateFrame>> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    spinner.set_message("Looking for frames…");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let options = DiscoverOptions {
        order: config.order,
        recursive,
        exclude: store.map(Path::to_path_buf),
    };
    let candidates = discover_frames(input, &options)
        .with_context(|| format!("Failed to read frames from {:?}", input))?;
    spinner.finish_with_message(format!("Found {} frame(s)", candidates.len()));
    Ok(candidates)
}

fn progress_bar(len: usize) -> Result<ProgressBar> {
    let bar = ProgressBar::new(len as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );
    Ok(bar)
}

fn print_summary(batch: &BatchReport) {
    for decision in &batch.decisions {
        if let AdmissionDecision::Invalid { frame, message, .. } = decision {
            eprintln!("⚠️  Skipped {}: {}", frame, message);
        }
    }
    println!(
        "\n📊 {} unique, {} duplicate, {} invalid, {} unprocessed",
        batch.admitted, batch.duplicates, batch.invalid, batch.unprocessed
    );
}

fn verdict(duplicate: bool) -> &'static str {
    if duplicate { "duplicate" } else { "distinct" }
}

/// Run `f()`, print how long it took (with `label`), and return its result.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    println!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}
