//! CLI entry point for pmcfetch.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::Parser;
use pmcfetch_core::parser::{parse_identifier_string, read_identifier_column};
use pmcfetch_core::{BatchSummary, ClassifyHint, Config, Orchestrator};
use tracing::{debug, info, warn};

mod app_config;
mod cli;
mod progress;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .init();

    debug!(?args, "CLI arguments parsed");

    let loaded = app_config::load_config(args.config.as_deref())?;
    let mut config = Config::default();
    if let Some(file_config) = &loaded.config {
        debug!(path = ?loaded.path, "applying config file");
        file_config.apply_to(&mut config);
    }
    apply_cli_overrides(&mut config, &args);
    config.validate().context("Invalid configuration")?;
    debug!(?config, "effective configuration");

    let (inputs, hint) = gather_inputs(&args)?;
    let report_path = args.report.clone();

    let orchestrator = Orchestrator::from_config(config)
        .await
        .context("Failed to initialize")?;
    maintain_cache(&orchestrator, &args).await?;

    if inputs.is_empty() {
        if !(args.clear_cache || args.prune_cache) {
            info!("No input provided. Pass identifiers as arguments, use --input, or pipe via stdin.");
            info!("Example: pmcfetch PMC3531190 38238491 10.1038/nature12373");
        }
        return Ok(());
    }

    let orchestrator = if args.abstracts {
        orchestrator.with_default_abstracts()?
    } else {
        orchestrator
    };

    info!(inputs = inputs.len(), "pmcfetch starting");

    let abort = orchestrator.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing in-flight downloads");
            abort.abort();
        }
    });

    let use_spinner = progress::should_use_spinner(io::stderr().is_terminal(), args.quiet);
    let (spinner, stop) = progress::spawn_progress_ui(use_spinner, orchestrator.stats());

    let result = orchestrator.run(&inputs, hint).await;

    stop.store(true, Ordering::SeqCst);
    if let Some(handle) = spinner {
        let _ = handle.await;
    }
    let report = result?;

    let report_path: PathBuf = report_path.unwrap_or_else(|| orchestrator.default_report_path());
    report
        .write_json(&report_path)
        .await
        .with_context(|| format!("Failed to write report '{}'", report_path.display()))?;

    log_summary(&report.summary);
    info!(report = %report_path.display(), "report written");

    Ok(())
}

fn apply_cli_overrides(config: &mut Config, args: &Args) {
    if let Some(concurrency) = args.concurrency {
        config.concurrency = usize::from(concurrency);
    }
    if let Some(delay) = args.delay {
        config.delay_seconds = delay;
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir.clone_from(dir);
    }
    if let Some(dir) = &args.cache_dir {
        config.cache_dir.clone_from(dir);
    }
    if args.email.is_some() {
        config.email.clone_from(&args.email);
    }
    if args.api_key.is_some() {
        config.api_key.clone_from(&args.api_key);
    }
    if let Some(source) = args.source {
        config.source_preference = source.into();
    }
    if let Some(default) = args.ambiguous_default {
        config.ambiguous_default = default.into();
    }
    if args.no_rate_limit {
        config.rate_limiting = false;
    }
}

/// Reads identifiers from the CSV file, positional arguments, or stdin.
fn gather_inputs(args: &Args) -> Result<(Vec<String>, Option<ClassifyHint>)> {
    let (mut inputs, hint) = if let Some(path) = &args.input {
        let column = read_identifier_column(path, args.column.as_deref())?;
        info!(column = %column.column, rows = column.values.len(), "read input file");
        let hint = ClassifyHint::from_column_name(&column.column);
        (column.values, hint)
    } else if !args.ids.is_empty() {
        let ids = args
            .ids
            .iter()
            .flat_map(|arg| parse_identifier_string(arg))
            .collect();
        (ids, None)
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read identifiers from stdin")?;
        let ids = buffer.lines().flat_map(parse_identifier_string).collect();
        (ids, None)
    } else {
        (Vec::new(), None)
    };

    if let Some(limit) = args.limit {
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        if inputs.len() > limit {
            info!(limit, dropped = inputs.len() - limit, "applying --limit");
            inputs.truncate(limit);
        }
    }
    Ok((inputs, hint))
}

async fn maintain_cache(orchestrator: &Orchestrator, args: &Args) -> Result<()> {
    let cache = orchestrator.cache();
    if args.clear_cache {
        let removed = cache.clear(None).await.context("Failed to clear cache")?;
        info!(removed, "cache cleared");
    } else if args.prune_cache {
        let removed = cache
            .cleanup_expired(None)
            .await
            .context("Failed to prune cache")?;
        info!(removed, "expired cache entries removed");
    }
    Ok(())
}

fn log_summary(summary: &BatchSummary) {
    info!(
        total = summary.total,
        downloaded = summary.success,
        cached = summary.cache_hit,
        not_open_access = summary.not_open_access,
        failed = summary.source_exhausted,
        unresolved = summary.unresolved,
        invalid = summary.invalid,
        cancelled = summary.cancelled,
        "Download complete"
    );
    if summary.with_file() < summary.total {
        warn!(
            missing = summary.total - summary.with_file(),
            "some inputs did not produce a PDF; see the report for details"
        );
    }
}
