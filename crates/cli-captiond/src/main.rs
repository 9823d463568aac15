use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use anyhow::{bail, Context, Result};
use captiond::{
    cancel::{self, CancellationToken},
    replace, CaptionConfig, CaptionFormat, CandidateFile, CandidateScanner, KeywordMatcher,
    Pipeline, PipelineError, RunSummary, Scheduler, WorkerPool,
};
use clap::Parser;
use humansize::{format_size, DECIMAL};
use log::{info, warn};

/// Add generated caption tracks to audio and video files
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Files or directories to process (defaults to the configured library roots)
    paths: Vec<PathBuf>,

    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Keyword list, one per line
    #[arg(short, long)]
    keywords: Option<PathBuf>,

    /// Number of concurrent jobs
    #[arg(short, long)]
    workers: Option<usize>,

    /// Number of concurrent stream probes during scanning
    #[arg(long)]
    probe_workers: Option<usize>,

    /// Candidates pulled from the scan per refill
    #[arg(long)]
    batch_size: Option<usize>,

    /// Keep the original file when the output lands at a different path
    #[arg(long)]
    preserve_original: bool,

    /// Caption document format: srt or vtt
    #[arg(long, value_parser = parse_format)]
    format: Option<CaptionFormat>,

    /// Print the schedule without processing anything
    #[arg(long)]
    dry_run: bool,

    /// Rescan every scan_interval_secs until interrupted
    #[arg(long)]
    watch: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_format(s: &str) -> std::result::Result<CaptionFormat, String> {
    match s.to_ascii_lowercase().as_str() {
        "srt" => Ok(CaptionFormat::Srt),
        "vtt" | "webvtt" => Ok(CaptionFormat::WebVtt),
        other => Err(format!("unknown caption format '{}' (expected srt or vtt)", other)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; otherwise info, or debug with --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    let mut cfg = CaptionConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    apply_overrides(&mut cfg, &args);
    cfg.validate().context("Invalid configuration")?;

    let inputs = if args.paths.is_empty() {
        cfg.library_roots.clone()
    } else {
        args.paths.clone()
    };
    if inputs.is_empty() {
        return Err(PipelineError::Configuration("no input paths given and no library roots configured".into()).into());
    }

    let matcher = KeywordMatcher::from_file(&cfg.keywords_file, cfg.keyword_boundary)
        .context("Failed to load keywords")?;

    info!("Caption daemon starting");
    info!("Configuration loaded:");
    info!("  Inputs: {:?}", inputs);
    info!("  Keywords: {} from {}", matcher.keyword_count(), cfg.keywords_file.display());
    info!("  Workers: {} (probe workers: {})", cfg.workers, cfg.probe_workers);
    info!("  Batch size: {}", cfg.batch_size);
    info!("  Caption format: {}", cfg.caption_format.extension());
    info!("  Preserve original: {}", cfg.preserve_original);

    for input in &inputs {
        if !input.exists() {
            warn!("Input does not exist: {}", input.display());
        }
    }

    let mut sweep_roots: Vec<PathBuf> = inputs.iter().filter(|p| p.is_dir()).cloned().collect();
    if let Some(dir) = &cfg.staging_dir {
        sweep_roots.push(dir.clone());
    }
    let swept = replace::sweep_orphaned_staging(&sweep_roots);
    if swept > 0 {
        info!("✅ Startup cleanup removed {} orphaned staging director(y/ies)", swept);
    }

    let token = CancellationToken::new();
    cancel::install_interrupt_handler(token.clone());

    let pipeline = Arc::new(Pipeline::from_config(cfg.clone(), token.clone()));
    let mut scanner = CandidateScanner::new(
        inputs,
        matcher,
        pipeline.inspector(),
        cfg.clone(),
        token.clone(),
    );

    if args.dry_run {
        let schedule = scanner.collect_all(cfg.batch_size).await;
        print_schedule(schedule);
        return Ok(());
    }

    let pool = WorkerPool::new(cfg.workers, token.clone());
    let mut totals = RunSummary::default();
    let mut pass = 0u64;

    loop {
        pass += 1;
        info!("Starting pass {}", pass);

        let scheduler = Arc::new(Scheduler::new(scanner, cfg.batch_size, token.clone()));
        let summary = pool.run(Arc::clone(&scheduler), Arc::clone(&pipeline)).await;
        totals.done += summary.done;
        totals.skipped += summary.skipped;
        totals.failed += summary.failed;
        totals.withdrawn += summary.withdrawn;
        totals.audio_seconds += summary.audio_seconds;

        scanner = match Arc::try_unwrap(scheduler) {
            Ok(scheduler) => scheduler.into_source(),
            Err(_) => bail!("scheduler still referenced after workers exited"),
        };

        if !args.watch || token.stop_requested() {
            break;
        }

        info!("Next scan in {}s", cfg.scan_interval_secs);
        if !wait_for_next_scan(&token, Duration::from_secs(cfg.scan_interval_secs)).await {
            break;
        }
        scanner.restart();
    }

    if pass > 1 {
        info!("Totals over {} passes:", pass);
        totals.log();
    }
    if token.stop_requested() {
        info!("Stopped after interrupt");
    }

    Ok(())
}

fn apply_overrides(cfg: &mut CaptionConfig, args: &Args) {
    if let Some(path) = &args.keywords {
        cfg.keywords_file = path.clone();
    }
    if let Some(workers) = args.workers {
        cfg.workers = workers;
    }
    if let Some(probe_workers) = args.probe_workers {
        cfg.probe_workers = probe_workers;
    }
    if let Some(batch_size) = args.batch_size {
        cfg.batch_size = batch_size;
    }
    if args.preserve_original {
        cfg.preserve_original = true;
    }
    if let Some(format) = args.format {
        cfg.caption_format = format;
    }
}

/// Sleep in short steps so an interrupt ends the wait. Returns false if stopped.
async fn wait_for_next_scan(token: &CancellationToken, interval: Duration) -> bool {
    let step = Duration::from_secs(1);
    let mut waited = Duration::ZERO;
    while waited < interval {
        if token.stop_requested() {
            return false;
        }
        tokio::time::sleep(step).await;
        waited += step;
    }
    !token.stop_requested()
}

fn print_schedule(mut schedule: Vec<CandidateFile>) {
    schedule.sort_by_key(|c| c.size_bytes);

    let total: u64 = schedule.iter().map(|c| c.size_bytes).sum();
    println!("{} candidate(s), {} total", schedule.len(), format_size(total, DECIMAL));
    for (i, candidate) in schedule.iter().enumerate() {
        println!(
            "{:>4}. {:>10}  [{}]  {}",
            i + 1,
            format_size(candidate.size_bytes, DECIMAL),
            candidate.matched_keyword.as_deref().unwrap_or("-"),
            candidate.path.display()
        );
    }
}
