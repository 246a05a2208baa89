//! # CLI Module
//!
//! Command-line interface for the photo sorter.
//!
//! ## Usage
//! ```bash
//! # Scan a folder and list duplicate groups
//! photo-sort scan ~/Inbox
//!
//! # Looser matching, JSON output
//! photo-sort scan ~/Inbox --threshold 8 --output json
//!
//! # Write the plan without touching any file
//! photo-sort plan ~/Inbox --library ~/Photos --quarantine ~/Duplicates --out plan.json
//!
//! # Apply it
//! photo-sort apply ~/Inbox --library ~/Photos --quarantine ~/Duplicates --yes
//!
//! # Permanently delete quarantined duplicates
//! photo-sort purge ~/Duplicates --yes
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use photo_sorter::core::cluster::{ClusterKind, ClusterPartition};
use photo_sorter::core::config::{
    BucketRule, FingerprintParams, KeeperRule, PlanPolicy, SorterConfig,
};
use photo_sorter::core::coordinator::{Coordinator, ScanReport};
use photo_sorter::core::executor::{ExecutionReport, PlanExecutor};
use photo_sorter::core::planner::{keeper_order, ActionKind, PlanFlag, SortPlan};
use photo_sorter::core::record::RecordTable;
use photo_sorter::core::store::{InMemoryRecordStore, RecordStore, SqliteRecordStore};
use photo_sorter::error::{Result, SorterError};
use photo_sorter::events::{
    CoordinatorEvent, Event, EventChannel, EventReceiver, ExecuteEvent, ExtractEvent,
};
use std::path::{Path, PathBuf};
use std::thread;

/// Photo Sorter - group near-duplicate photos and file them by date
#[derive(Parser, Debug)]
#[command(name = "photo-sort")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan a folder and report duplicate groups
    Scan {
        #[command(flatten)]
        run: RunArgs,

        /// Output format
        #[arg(short, long, default_value = "pretty")]
        output: OutputFormat,
    },

    /// Scan, cluster and print the sort plan as JSON
    Plan {
        #[command(flatten)]
        run: RunArgs,

        /// Write the plan here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Scan, cluster, plan and move the files
    Apply {
        #[command(flatten)]
        run: RunArgs,

        /// Actually move files (otherwise only the summary is shown)
        #[arg(long)]
        yes: bool,
    },

    /// Permanently delete everything in a quarantine folder
    Purge {
        /// Quarantine folder to empty
        quarantine: PathBuf,

        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

/// Options shared by every command that scans
#[derive(Args, Debug)]
struct RunArgs {
    /// Folder to scan
    root: PathBuf,

    /// Reduced grid side; fingerprints are grid x grid bits
    #[arg(short, long, default_value = "8")]
    grid: u32,

    /// Maximum Hamming distance between similar photos (lower = stricter)
    #[arg(short, long, default_value = "5")]
    threshold: u32,

    /// How to choose the photo kept from each duplicate group
    #[arg(short, long, default_value = "resolution")]
    keeper: Keeper,

    /// Folder layout for filed photos
    #[arg(short, long, default_value = "year-month")]
    bucketing: Bucketing,

    /// Where keepers are filed (default: <ROOT>/Library)
    #[arg(long)]
    library: Option<PathBuf>,

    /// Where duplicates are moved (default: <ROOT>/Quarantine)
    #[arg(long)]
    quarantine: Option<PathBuf>,

    /// Comma-separated extensions to include
    #[arg(long, value_delimiter = ',')]
    extensions: Option<Vec<String>>,

    /// Maximum folder depth below the root
    #[arg(long)]
    depth: Option<usize>,

    /// Extraction threads (default: all cores)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Include hidden files and folders
    #[arg(long)]
    include_hidden: bool,

    /// Follow symbolic links
    #[arg(long)]
    follow_symlinks: bool,

    /// JSON configuration file; replaces every option above except ROOT
    #[arg(long)]
    config: Option<PathBuf>,

    /// State database path (default: one file per root under the data directory)
    #[arg(long)]
    state: Option<PathBuf>,

    /// Do not load or save any state
    #[arg(long, conflicts_with = "state")]
    no_state: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Keeper {
    /// Highest resolution, then earliest capture
    Resolution,
    /// Earliest capture, then highest resolution
    CaptureTime,
    /// Smallest path
    Path,
}

impl From<Keeper> for KeeperRule {
    fn from(keeper: Keeper) -> Self {
        match keeper {
            Keeper::Resolution => KeeperRule::Resolution,
            Keeper::CaptureTime => KeeperRule::CaptureTime,
            Keeper::Path => KeeperRule::Path,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Bucketing {
    /// <library>/2024/photo.jpg
    Year,
    /// <library>/2024/01/photo.jpg
    YearMonth,
    /// <library>/photo.jpg
    Flat,
}

impl From<Bucketing> for BucketRule {
    fn from(bucketing: Bucketing) -> Self {
        match bucketing {
            Bucketing::Year => BucketRule::Year,
            Bucketing::YearMonth => BucketRule::YearMonth,
            Bucketing::Flat => BucketRule::Flat,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable output with colors
    Pretty,
    /// JSON output for scripting
    Json,
    /// Minimal output (non-keeper paths only)
    Minimal,
}

/// Run the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan { run, output } => run_scan(&run, output),
        Commands::Plan { run, out } => run_plan(&run, out.as_deref()),
        Commands::Apply { run, yes } => run_apply(&run, yes),
        Commands::Purge { quarantine, yes } => run_purge(&quarantine, yes),
    }
}

fn build_config(args: &RunArgs) -> Result<SorterConfig> {
    if let Some(path) = &args.config {
        return Ok(SorterConfig::from_json_file(path)?);
    }

    let policy = PlanPolicy {
        keeper_rule: args.keeper.into(),
        bucketing: args.bucketing.into(),
        library_root: args
            .library
            .clone()
            .unwrap_or_else(|| args.root.join("Library")),
        quarantine_root: args
            .quarantine
            .clone()
            .unwrap_or_else(|| args.root.join("Quarantine")),
    };
    let mut config = SorterConfig::new(FingerprintParams::new(args.grid), args.threshold, policy);
    if let Some(extensions) = &args.extensions {
        config.extensions = extensions
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
    }
    config.max_depth = args.depth;
    config.workers = args.workers;
    config.include_hidden = args.include_hidden;
    config.follow_symlinks = args.follow_symlinks;
    Ok(config)
}

fn build_store(args: &RunArgs) -> Box<dyn RecordStore> {
    if args.no_state {
        return Box::new(InMemoryRecordStore::new());
    }
    match args
        .state
        .clone()
        .or_else(|| SqliteRecordStore::default_path(&args.root))
    {
        Some(path) => Box::new(SqliteRecordStore::new(&path)),
        None => {
            tracing::warn!("No data directory found; state will not be saved");
            Box::new(InMemoryRecordStore::new())
        }
    }
}

/// A coordinator whose events drive a progress bar on stderr
struct Session {
    coordinator: Coordinator,
    progress: Option<ProgressBar>,
    events: thread::JoinHandle<()>,
}

impl Session {
    fn open(args: &RunArgs, show_progress: bool) -> Result<Self> {
        let (sender, receiver) = EventChannel::new();
        let coordinator = Coordinator::builder(&args.root, build_config(args)?)
            .store(build_store(args))
            .events(sender)
            .build()?;

        let progress = show_progress.then(|| {
            let pb = ProgressBar::new(0);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("█▓░"),
            );
            pb
        });
        let events = spawn_event_thread(receiver, progress.clone(), args.verbose);

        Ok(Self {
            coordinator,
            progress,
            events,
        })
    }

    fn scan(&mut self) -> Result<ScanReport> {
        let report = self.coordinator.scan()?;
        self.coordinator.save()?;
        Ok(report)
    }

    /// Stop the event thread and clear the progress bar
    fn close(mut self) -> Coordinator {
        self.coordinator.detach_events();
        self.events.join().ok();
        if let Some(pb) = self.progress {
            pb.finish_and_clear();
        }
        self.coordinator
    }
}

fn spawn_event_thread(
    receiver: EventReceiver,
    progress: Option<ProgressBar>,
    verbose: bool,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for event in receiver.iter() {
            let Some(pb) = progress.as_ref() else {
                continue;
            };
            match event {
                Event::Coordinator(CoordinatorEvent::StateChanged { state }) => {
                    pb.set_message(format!("{}", state));
                }
                Event::Coordinator(CoordinatorEvent::PassAborted { message }) => {
                    pb.println(format!("{} {}", style("✗").red(), message));
                }
                Event::Extract(ExtractEvent::Started { total }) => {
                    pb.set_length(total as u64);
                    pb.set_position(0);
                }
                Event::Extract(ExtractEvent::Progress(p)) => {
                    pb.set_position(p.processed as u64);
                    if verbose {
                        pb.set_message(
                            p.current_path
                                .file_name()
                                .unwrap_or_default()
                                .to_string_lossy()
                                .to_string(),
                        );
                    }
                }
                Event::Extract(ExtractEvent::Unreadable { path, message }) if verbose => {
                    pb.println(format!(
                        "  {} {} ({})",
                        style("!").yellow(),
                        display_path(&path),
                        style(message).dim()
                    ));
                }
                Event::Execute(ExecuteEvent::Started { entries }) => {
                    pb.set_length(entries as u64);
                    pb.set_position(0);
                }
                Event::Execute(ExecuteEvent::EntryFinished { index, .. }) => {
                    pb.set_position(index as u64 + 1);
                }
                _ => {}
            }
        }
    })
}

fn run_scan(args: &RunArgs, output: OutputFormat) -> Result<()> {
    let term = Term::stderr();
    let pretty = matches!(output, OutputFormat::Pretty);
    if pretty {
        print_header(&term);
    }

    let mut session = Session::open(args, pretty)?;
    let report = session.scan()?;
    let partition = session.coordinator.cluster()?;
    let coordinator = session.close();

    match output {
        OutputFormat::Pretty => {
            print_scan_report(&term, &report);
            print_partition(&term, &partition, coordinator.records(), coordinator.config());
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "scan": report,
                "records": coordinator.records().len(),
                "unreadable": coordinator.records().unreadable_len(),
                "partition": partition,
            });
            println!("{}", to_json(&output)?);
        }
        OutputFormat::Minimal => {
            let rule = coordinator.config().policy.keeper_rule;
            for cluster in partition.duplicate_groups() {
                let keeper = keeper_of(cluster.members.as_slice(), coordinator.records(), rule);
                for member in &cluster.members {
                    if Some(member) != keeper {
                        println!("{}", member.display());
                    }
                }
            }
        }
    }
    Ok(())
}

fn run_plan(args: &RunArgs, out: Option<&Path>) -> Result<()> {
    let term = Term::stderr();
    print_header(&term);

    let mut session = Session::open(args, true)?;
    let report = session.scan()?;
    let (_, plan) = session.coordinator.cluster_and_plan()?;
    session.close();

    print_scan_report(&term, &report);
    print_plan_summary(&term, &plan, args.verbose);

    let json = to_json(&plan)?;
    match out {
        Some(path) => {
            std::fs::write(path, json).map_err(|e| {
                SorterError::Output(format!("{}: {}", path.display(), e))
            })?;
            term.write_line(&format!(
                "{} Plan written to {}",
                style("✓").green().bold(),
                display_path(path)
            ))
            .ok();
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn run_apply(args: &RunArgs, yes: bool) -> Result<()> {
    let term = Term::stderr();
    print_header(&term);

    let mut session = Session::open(args, true)?;
    let report = session.scan()?;
    let (_, plan) = session.coordinator.cluster_and_plan()?;

    if !yes {
        session.close();
        print_scan_report(&term, &report);
        print_plan_summary(&term, &plan, args.verbose);
        term.write_line(&format!(
            "{}",
            style("Nothing was moved. Re-run with --yes to apply this plan.").dim()
        ))
        .ok();
        return Ok(());
    }

    let execution = session.coordinator.apply(&plan)?;
    session.coordinator.save()?;
    session.close();

    print_scan_report(&term, &report);
    print_plan_summary(&term, &plan, false);
    print_execution(&term, &execution);
    Ok(())
}

fn run_purge(quarantine: &Path, yes: bool) -> Result<()> {
    let term = Term::stderr();
    if !yes {
        term.write_line(&format!(
            "{} This permanently deletes every file in {}. Re-run with --yes to confirm.",
            style("!").yellow().bold(),
            display_path(quarantine)
        ))
        .ok();
        return Ok(());
    }

    let results = PlanExecutor::purge_quarantine(quarantine);
    let mut freed = 0usize;
    for (path, result) in &results {
        match result {
            Ok(()) => freed += 1,
            Err(e) => {
                term.write_line(&format!("  {} {}: {}", style("✗").red(), display_path(path), e))
                    .ok();
            }
        }
    }
    term.write_line(&format!(
        "{} Deleted {} of {} quarantined files",
        style("✓").green().bold(),
        style(freed).cyan(),
        results.len()
    ))
    .ok();
    Ok(())
}

fn print_header(term: &Term) {
    term.write_line(&format!(
        "{} {}",
        style("Photo Sorter").bold().cyan(),
        style(concat!("v", env!("CARGO_PKG_VERSION"))).dim()
    ))
    .ok();
    term.write_line("").ok();
}

fn print_scan_report(term: &Term, report: &ScanReport) {
    let mark = if report.cancelled {
        style("!").yellow().bold()
    } else {
        style("✓").green().bold()
    };
    let title = if report.cancelled {
        "Scan Cancelled"
    } else {
        "Scan Complete"
    };
    term.write_line(&format!("{} {}", mark, title)).ok();
    term.write_line(&format!(
        "  {} new, {} changed, {} removed, {} unchanged in {:.1}s",
        style(report.changes.added).cyan(),
        style(report.changes.modified).cyan(),
        style(report.changes.removed).cyan(),
        style(report.changes.unchanged).dim(),
        report.duration_ms as f64 / 1000.0
    ))
    .ok();
    if report.unreadable > 0 {
        term.write_line(&format!(
            "  {} files could not be read",
            style(report.unreadable).yellow()
        ))
        .ok();
    }
    if report.discarded > 0 {
        term.write_line(&format!(
            "  {} saved records were re-extracted after a settings change",
            style(report.discarded).dim()
        ))
        .ok();
    }
    for error in &report.errors {
        term.write_line(&format!("  {} {}", style("!").yellow(), error))
            .ok();
    }
    term.write_line("").ok();
}

fn keeper_of<'a>(
    members: &'a [PathBuf],
    table: &RecordTable,
    rule: KeeperRule,
) -> Option<&'a PathBuf> {
    members
        .iter()
        .filter(|p| table.get(p).is_some())
        .min_by(|a, b| match (table.get(a), table.get(b)) {
            (Some(ra), Some(rb)) => keeper_order(rule, ra, rb),
            _ => a.cmp(b),
        })
}

fn print_partition(
    term: &Term,
    partition: &ClusterPartition,
    table: &RecordTable,
    config: &SorterConfig,
) {
    let groups: Vec<_> = partition.duplicate_groups().collect();
    term.write_line(&format!(
        "  {} photos in {} clusters, {} duplicate groups",
        style(partition.record_count()).cyan(),
        style(partition.len()).cyan(),
        style(groups.len()).cyan()
    ))
    .ok();
    term.write_line("").ok();

    if groups.is_empty() {
        term.write_line(&format!("  {} No duplicates found!", style("✓").green()))
            .ok();
        return;
    }

    term.write_line(&format!(
        "{}",
        style("Duplicate Groups:").bold().underlined()
    ))
    .ok();
    term.write_line("").ok();

    for (i, cluster) in groups.iter().enumerate() {
        let kind = match cluster.kind {
            ClusterKind::Similar => format!("{} (distance ≤ {})", cluster.kind, cluster.max_distance),
            _ => cluster.kind.to_string(),
        };
        let bytes: u64 = cluster
            .members
            .iter()
            .filter_map(|p| table.get(p))
            .map(|r| r.stamp.size)
            .sum();
        term.write_line(&format!(
            "  {} {} ({} photos, {})",
            style(format!("Group {}:", i + 1)).bold(),
            style(kind).yellow(),
            cluster.len(),
            format_bytes(bytes)
        ))
        .ok();

        let keeper = keeper_of(&cluster.members, table, config.policy.keeper_rule);
        for member in &cluster.members {
            let marker = if Some(member) == keeper {
                style("★").green().to_string()
            } else {
                style("○").dim().to_string()
            };
            term.write_line(&format!("    {} {}", marker, display_path(member)))
                .ok();
        }
        term.write_line("").ok();
    }

    term.write_line(&format!(
        "{}",
        style("No files were moved. Use `plan` to review destinations.").dim()
    ))
    .ok();
}

fn print_plan_summary(term: &Term, plan: &SortPlan, verbose: bool) {
    let summary = &plan.summary;
    term.write_line(&format!(
        "{} Plan {}",
        style("✓").green().bold(),
        style(&plan.id).dim()
    ))
    .ok();
    term.write_line(&format!(
        "  {} to file, {} to quarantine ({}), {} already in place",
        style(summary.filed).cyan(),
        style(summary.quarantined).cyan(),
        style(format_bytes(summary.bytes_quarantined)).yellow(),
        style(summary.unchanged).dim()
    ))
    .ok();
    if summary.capture_fallbacks > 0 {
        term.write_line(&format!(
            "  {} photos have no capture date; their file date was used",
            style(summary.capture_fallbacks).yellow()
        ))
        .ok();
    }
    if summary.renamed > 0 {
        term.write_line(&format!(
            "  {} destinations were renamed to avoid collisions",
            style(summary.renamed).yellow()
        ))
        .ok();
    }

    if verbose {
        term.write_line("").ok();
        for entry in &plan.entries {
            let action = match entry.action {
                ActionKind::File => style("file").green(),
                ActionKind::Quarantine => style("quarantine").yellow(),
            };
            let note = if entry.has_flag(PlanFlag::CaptureTimeFallback) {
                style(" (file date)").dim().to_string()
            } else {
                String::new()
            };
            term.write_line(&format!(
                "  {:>10} {} -> {}{}",
                action,
                display_path(&entry.source),
                display_path(&entry.destination),
                note
            ))
            .ok();
        }
    }
    term.write_line("").ok();
}

fn print_execution(term: &Term, report: &ExecutionReport) {
    term.write_line(&format!(
        "{} Moved {} files in {:.1}s ({} folders created)",
        style("✓").green().bold(),
        style(report.applied()).cyan(),
        report.duration_ms as f64 / 1000.0,
        report.folders_created
    ))
    .ok();
    for outcome in report.failures() {
        if let Err(e) = &outcome.result {
            term.write_line(&format!("  {} {}", style("✗").red(), e)).ok();
        }
    }
    term.write_line("").ok();
    term.write_line(&format!(
        "{}",
        style("Nothing was deleted. Quarantined duplicates can be restored by hand.").dim()
    ))
    .ok();
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| SorterError::Output(e.to_string()))
}

fn display_path(path: &Path) -> String {
    match dirs::home_dir().and_then(|home| path.strip_prefix(home).ok().map(Path::to_path_buf)) {
        Some(rest) => format!("~/{}", rest.display()),
        None => path.display().to_string(),
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
