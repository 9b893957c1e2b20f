use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use media_consolidator_core::{
    apply_movie, apply_series, detect_conflicts, generate_conflict_plans, generate_plans, get_dirty,
    mark_synced, queue_conflict_plan, summarize_pending, EngineConfig, Episode, Executor,
    FallbackTransferer, Inventory, MediaFile, Movie, Outcome, PlanSummary, Series,
    SystemSpaceProbe,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "media-consolidator",
    version,
    about = "Find duplicate and scattered media, plan consolidation, and apply the plans."
)]
struct Cli {
    /// Inventory snapshot file. Created on first write.
    #[arg(
        long,
        global = true,
        default_value = "media-inventory.json",
        value_name = "FILE"
    )]
    inventory: PathBuf,

    /// Engine configuration JSON file.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Validate and report what would happen without touching files.
    #[arg(long, global = true)]
    dry_run: bool,

    /// Remove the source after a successful move (default).
    #[arg(long, global = true, conflicts_with = "keep_source")]
    delete_source: bool,

    /// Copy instead of move; the source stays in place.
    #[arg(long, global = true)]
    keep_source: bool,

    /// Verify a blake3 checksum of every copied file.
    #[arg(long, global = true)]
    verify_checksums: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Load files, series, movies, and episodes from a JSON batch into the inventory.
    Import(ImportArgs),
    /// Rescan series and movies for titles stored at more than one location.
    Detect,
    /// List duplicate groups with the file that would be kept.
    Duplicates(DuplicatesArgs),
    /// Replace pending duplicate plans with a fresh set of delete plans.
    Plan,
    /// Plan merging every location of each conflict into one target.
    Consolidate(ConsolidateArgs),
    /// Execute pending plans.
    Execute(ExecuteArgs),
    /// Show inventory totals, pending plans, and open conflicts.
    Status,
    /// List records whose canonical path changed since the last catalog sync.
    Dirty(DirtyArgs),
}

#[derive(Debug, Args)]
struct ImportArgs {
    /// JSON file with `files`, `series`, `movies`, and `episodes` arrays.
    #[arg(long, value_name = "FILE")]
    input: PathBuf,
}

#[derive(Debug, Args)]
struct DuplicatesArgs {
    /// Optional JSON output file for the duplicate groups.
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ConsolidateArgs {
    /// Only plan this conflict.
    #[arg(long, value_name = "ID")]
    conflict_id: Option<i64>,

    /// Persist proceedable plans as pending move plans.
    #[arg(long)]
    queue: bool,

    /// Optional JSON output file for the generated plans.
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ExecuteArgs {
    /// Execute a single pending plan instead of the whole queue.
    #[arg(long, value_name = "ID")]
    plan_id: Option<i64>,

    /// Optional JSON output file for the execution result.
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct DirtyArgs {
    /// Clear the flags after an external sync completed.
    #[arg(long)]
    mark_synced: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ImportBatch {
    files: Vec<MediaFile>,
    series: Vec<Series>,
    movies: Vec<Movie>,
    episodes: Vec<Episode>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let inventory = Inventory::open(&cli.inventory)
        .with_context(|| format!("failed to open inventory {}", cli.inventory.display()))?;

    match cli.command {
        Commands::Import(args) => run_import_command(&inventory, &config, args),
        Commands::Detect => run_detect_command(&inventory),
        Commands::Duplicates(args) => run_duplicates_command(&inventory, args),
        Commands::Plan => run_plan_command(&inventory),
        Commands::Consolidate(args) => run_consolidate_command(&inventory, &config, args),
        Commands::Execute(args) => run_execute_command(&inventory, &config, args),
        Commands::Status => run_status_command(&inventory),
        Commands::Dirty(args) => run_dirty_command(&inventory, args),
    }
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if cli.dry_run {
        config.dry_run = true;
    }
    if cli.delete_source {
        config.delete_source = true;
    }
    if cli.keep_source {
        config.delete_source = false;
    }
    if cli.verify_checksums {
        config.verify_checksums = true;
    }
    config.validate().context("invalid engine configuration")?;
    Ok(config)
}

fn run_import_command(
    inventory: &Inventory,
    config: &EngineConfig,
    args: ImportArgs,
) -> Result<()> {
    let data = fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let batch: ImportBatch = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse {}", args.input.display()))?;

    let file_count = batch.files.len();
    for mut file in batch.files {
        file.rescore();
        inventory
            .upsert_file(file)
            .context("failed to store media file")?;
    }

    let episode_count = batch.episodes.len();
    for episode in batch.episodes {
        inventory
            .upsert_episode(episode)
            .context("failed to store episode")?;
    }

    let mut conflicts = 0;
    let mut dirty = 0;
    for series in batch.series {
        let outcome = apply_series(inventory, series, config).context("failed to store series")?;
        conflicts += usize::from(outcome.conflict.is_some());
        dirty += usize::from(outcome.marked_dirty);
    }
    for movie in batch.movies {
        let outcome = apply_movie(inventory, movie, config).context("failed to store movie")?;
        conflicts += usize::from(outcome.conflict.is_some());
        dirty += usize::from(outcome.marked_dirty);
    }

    println!(
        "Imported {} file(s) and {} episode(s) from {}; {} conflict update(s), {} record(s) marked dirty.",
        file_count,
        episode_count,
        args.input.display(),
        conflicts,
        dirty
    );
    Ok(())
}

fn run_detect_command(inventory: &Inventory) -> Result<()> {
    let conflicts = detect_conflicts(inventory).context("conflict scan failed")?;
    if conflicts.is_empty() {
        println!("No conflicts found.");
        return Ok(());
    }
    println!("Found {} conflict(s):", conflicts.len());
    for conflict in &conflicts {
        println!(
            "- #{} [{}] {}{}",
            conflict.id,
            conflict.media_type,
            conflict.title,
            conflict
                .year
                .map(|year| format!(" ({year})"))
                .unwrap_or_default()
        );
        for location in &conflict.locations {
            println!("    {}", location.display());
        }
    }
    Ok(())
}

fn run_duplicates_command(inventory: &Inventory, args: DuplicatesArgs) -> Result<()> {
    let mut groups = inventory.find_duplicate_movies()?;
    groups.extend(inventory.find_duplicate_episodes()?);

    if groups.is_empty() {
        println!("No duplicates found.");
    } else {
        let reclaimable: u64 = groups.iter().map(|group| group.space_reclaimable).sum();
        println!(
            "Found {} duplicate group(s), {} reclaimable:",
            groups.len(),
            human_bytes(reclaimable)
        );
        for group in &groups {
            let episode = match (group.season, group.episode) {
                (Some(season), Some(episode)) => format!(" S{season:02}E{episode:02}"),
                _ => String::new(),
            };
            println!(
                "- [{}] {}{} | keep {} (score {}, {})",
                group.media_type,
                group.normalized_title,
                episode,
                group.best.path.display(),
                group.best.quality_score,
                human_bytes(group.best.size_bytes)
            );
            for file in &group.inferior {
                println!(
                    "    drop {} (score {}, {})",
                    file.path.display(),
                    file.quality_score,
                    human_bytes(file.size_bytes)
                );
            }
        }
    }

    if let Some(output) = args.output {
        write_json(&output, &groups)?;
        println!("Duplicate groups written to {}", output.display());
    }
    Ok(())
}

fn run_plan_command(inventory: &Inventory) -> Result<()> {
    let summary = finish(generate_plans(inventory, None), "plan generation")?;
    print_summary(&summary);
    if !summary.manual_review.is_empty() {
        println!(
            "{} non-compliant file(s) need a manual rename:",
            summary.manual_review.len()
        );
        for item in summary.manual_review.iter().take(20) {
            println!("- {}: {}", item.path.display(), item.issues.join(" | "));
        }
    }
    Ok(())
}

fn run_consolidate_command(
    inventory: &Inventory,
    config: &EngineConfig,
    args: ConsolidateArgs,
) -> Result<()> {
    let probe = SystemSpaceProbe::refresh();
    let mut plans = finish(
        generate_conflict_plans(inventory, config, &probe, None),
        "conflict planning",
    )?;
    if let Some(id) = args.conflict_id {
        plans.retain(|plan| plan.conflict_id == id);
        if plans.is_empty() {
            anyhow::bail!("no open conflict with id {id}");
        }
    }

    for plan in &plans {
        let target = plan
            .target
            .as_ref()
            .map(|target| format!("{} ({:?})", target.path.display(), target.reason))
            .unwrap_or_else(|| "none".to_string());
        println!(
            "- #{} [{}] {} -> {} | {} file(s), {} | proceed {}",
            plan.conflict_id,
            plan.media_type,
            plan.title,
            target,
            plan.total_files,
            human_bytes(plan.total_bytes),
            plan.can_proceed
        );
        for reason in &plan.reasons {
            println!("    blocked: {reason}");
        }
        if args.queue {
            let queued = queue_conflict_plan(inventory, plan)
                .with_context(|| format!("failed to queue conflict {}", plan.conflict_id))?;
            println!("    queued {queued} move plan(s)");
        }
    }

    if let Some(output) = args.output {
        write_json(&output, &plans)?;
        println!("Conflict plans written to {}", output.display());
    }
    Ok(())
}

fn run_execute_command(
    inventory: &Inventory,
    config: &EngineConfig,
    args: ExecuteArgs,
) -> Result<()> {
    let transferer = FallbackTransferer::default();
    let executor = Executor::new(inventory, &transferer, config);

    let result = match args.plan_id {
        Some(id) => executor
            .execute_plan_by_id(id)
            .with_context(|| format!("plan {id} failed"))?,
        None => finish(executor.execute_plans(None), "plan execution")?,
    };

    if result.dry_run {
        println!("Dry run {}: nothing was changed.", result.run_id);
        for action in &result.dry_run_actions {
            println!(
                "- would {} #{} {}{}{}",
                action.action,
                action.plan_id,
                action.source.display(),
                action
                    .target
                    .as_ref()
                    .map(|target| format!(" -> {}", target.display()))
                    .unwrap_or_default(),
                action
                    .note
                    .as_ref()
                    .map(|note| format!(" ({note})"))
                    .unwrap_or_default()
            );
        }
    }
    println!(
        "Run {}: {} executed, {} succeeded, {} failed, {} skipped in {} ms.",
        result.run_id,
        result.plans_executed,
        result.plans_succeeded,
        result.plans_failed,
        result.plans_skipped,
        result.duration.as_millis()
    );
    println!(
        "Deleted {}, moved {}, renamed {}; reclaimed {}.",
        result.files_deleted,
        result.files_moved,
        result.files_renamed,
        human_bytes(result.space_reclaimed)
    );
    for error in &result.errors {
        println!("- plan #{}: {}", error.plan_id, error.message);
    }

    if let Some(output) = args.output {
        write_json(&output, &result)?;
        println!("Execution result written to {}", output.display());
    }
    Ok(())
}

fn run_status_command(inventory: &Inventory) -> Result<()> {
    let stats = inventory.get_consolidation_stats()?;
    if let Some(path) = inventory.snapshot_path() {
        println!("Inventory: {}", path.display());
    }
    println!(
        "Files: {} ({}), non-compliant: {} in {} folder(s).",
        stats.total_files,
        human_bytes(stats.total_size_bytes),
        stats.non_compliant_files,
        stats.non_compliant_folders
    );
    println!(
        "Duplicates: {} group(s), {} extra file(s), {} reclaimable.",
        stats.duplicate_groups,
        stats.duplicate_files,
        human_bytes(stats.space_reclaimable)
    );
    print_summary(&summarize_pending(inventory)?);
    println!(
        "Open conflicts: {}, dirty records: {}.",
        inventory.unresolved_conflicts()?.len(),
        get_dirty(inventory)?.len()
    );
    Ok(())
}

fn run_dirty_command(inventory: &Inventory, args: DirtyArgs) -> Result<()> {
    let records = get_dirty(inventory)?;
    if records.is_empty() {
        println!("No dirty records.");
        return Ok(());
    }
    for record in &records {
        println!(
            "- {:?} {} -> {} (priority {}, systems {:?})",
            record.record,
            record.title,
            record.canonical_path.display(),
            record.source_priority,
            record.systems
        );
        if args.mark_synced {
            mark_synced(inventory, record.record)
                .with_context(|| format!("failed to mark {:?} synced", record.record))?;
        }
    }
    if args.mark_synced {
        println!("Marked {} record(s) synced.", records.len());
    }
    Ok(())
}

fn print_summary(summary: &PlanSummary) {
    println!(
        "Pending plans: {} (delete {}, move {}, rename {}), {} to reclaim.",
        summary.total_plans,
        summary.delete_plans,
        summary.move_plans,
        summary.rename_plans,
        human_bytes(summary.space_to_reclaim)
    );
}

/// Logs where a batch stopped before turning its outcome into a plain result.
fn finish<T>(outcome: Outcome<T>, what: &str) -> Result<T> {
    if let Some(err) = &outcome.error {
        warn!(error = %err, "{what} stopped early");
    }
    outcome
        .into_result()
        .with_context(|| format!("{what} failed"))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    fs::write(path, payload).with_context(|| format!("failed to write {}", path.display()))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn human_bytes(value: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if value == 0 {
        return "0 B".to_string();
    }
    let mut size = value as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}
