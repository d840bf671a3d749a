//! Command implementations for the ERA5 processor CLI
//!
//! Contains the command dispatch, logging setup, and end-of-run reporting.

use crate::cli::args::{Args, Commands, ExtractArgs, JoinArgs, RunArgs, SortArgs};
use crate::config::{ExtractConfig, JoinConfig, SortConfig};
use crate::error::{Era5Error, Result};
use crate::extract::VariableExtractor;
use crate::join::UnitJoiner;
use crate::models::{RunSummary, UnitKey};
use crate::pipeline::{discovery, BatchOrchestrator};
use crate::schema::VariableRegistry;
use crate::sort::ChronologicalSorter;
use colored::Colorize;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Main command dispatcher
pub async fn run(args: Args) -> Result<()> {
    let Some(command) = args.command else {
        return Ok(());
    };

    match command {
        Commands::Run(run_args) => {
            setup_logging(run_args.get_log_level());
            run_args.validate()?;
            run_pipeline(run_args).await
        }
        Commands::Extract(extract_args) => {
            setup_logging(verbosity_level(extract_args.verbose));
            extract_args.validate()?;
            run_extract(extract_args)
        }
        Commands::Join(join_args) => {
            setup_logging(verbosity_level(join_args.verbose));
            join_args.validate()?;
            run_join(join_args)
        }
        Commands::Sort(sort_args) => {
            setup_logging(verbosity_level(sort_args.verbose));
            sort_args.validate()?;
            run_sort(sort_args).await
        }
    }
}

/// Set up the tracing subscriber from CLI verbosity flags
fn setup_logging(level: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("era5_processor={level}")));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn verbosity_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

async fn run_pipeline(args: RunArgs) -> Result<()> {
    let config = args.to_config();
    let mut orchestrator = BatchOrchestrator::new(&args.input, &args.output, config)?;
    let summary = orchestrator.run().await?;
    print_summary(&summary);
    Ok(())
}

fn run_extract(args: ExtractArgs) -> Result<()> {
    let unit = match (args.year, args.month) {
        (Some(year), Some(month)) => UnitKey::new(year, month),
        _ => discovery::derive_unit_key(&args.input).ok_or_else(|| Era5Error::Discovery {
            path: args.input.clone(),
        })?,
    };

    let mut config = ExtractConfig {
        time_chunk_size: args.chunk,
        decimal_precision: args.decimal_precision,
        prune_constant_columns: !args.keep_constants,
        ..ExtractConfig::default()
    };
    if let Some(list) = args.variables {
        config.include_variables = Some(list.variables);
    }
    if let Some(list) = args.exclude_variables {
        config.exclude_variables = list.variables;
    }

    let extractor = VariableExtractor::new(config);
    let report = extractor.extract_file(&args.input, unit, &args.output)?;

    println!("\n{}", "Extraction Summary".bright_green().bold());
    println!("  {} {}", "Unit:".bright_cyan(), unit);
    println!(
        "  {} {:?}",
        "Extracted:".bright_cyan(),
        report.variables_extracted
    );
    if !report.variables_failed.is_empty() {
        println!(
            "  {} {:?}",
            "Failed:".bright_red(),
            report.variables_failed
        );
    }
    println!(
        "  {} {} segments, {} rows",
        "Written:".bright_cyan(),
        report.segments_written,
        report.rows_written
    );
    Ok(())
}

fn run_join(args: JoinArgs) -> Result<()> {
    let unit = UnitKey::new(args.year, args.month);

    let mut config = JoinConfig {
        chunk_size: args.chunk_size,
        max_rows_in_memory: args.max_memory_rows,
        ..JoinConfig::default()
    };
    if let Some(list) = args.include_vars {
        config.include_variables = Some(list.variables);
    }
    if let Some(list) = args.exclude_vars {
        config.exclude_variables = list.variables;
    }

    let joiner = UnitJoiner::new(config, VariableRegistry::with_defaults())?;
    let report = joiner.join_unit(&args.input, unit, &args.output)?;

    println!("\n{}", "Join Summary".bright_green().bold());
    println!("  {} {}", "Unit:".bright_cyan(), unit);
    println!(
        "  {} {:?}",
        "Joined:".bright_cyan(),
        report.variables_joined
    );
    if !report.variables_skipped.is_empty() {
        println!(
            "  {} {:?}",
            "Skipped:".bright_yellow(),
            report.variables_skipped
        );
    }
    println!(
        "  {} {} rows -> {}",
        "Output:".bright_cyan(),
        report.rows,
        report.output_path.display()
    );
    Ok(())
}

async fn run_sort(args: SortArgs) -> Result<()> {
    let mut files: Vec<PathBuf> = Vec::new();
    for extension in ["csv", "parquet"] {
        let pattern = format!("{}/**/joined_*.{extension}", args.input_dir.display());
        if let Ok(paths) = glob::glob(&pattern) {
            files.extend(paths.filter_map(|p| p.ok()));
        }
    }
    files.sort();

    if files.is_empty() {
        warn!(dir = %args.input_dir.display(), "no joined files found");
        return Ok(());
    }
    info!(files = files.len(), "sorting joined files");

    let sorter = Arc::new(ChronologicalSorter::new(SortConfig {
        chunk_size: args.chunk_size,
        backup: args.backup,
        ..SortConfig::default()
    }));

    let outcomes: Vec<(PathBuf, Result<crate::models::SortReport>)> = stream::iter(files)
        .map(|path| {
            let sorter = Arc::clone(&sorter);
            async move {
                let task_path = path.clone();
                let result = tokio::task::spawn_blocking(move || sorter.sort_file(&task_path))
                    .await
                    .unwrap_or_else(|e| {
                        Err(Era5Error::Task {
                            reason: e.to_string(),
                        })
                    });
                (path, result)
            }
        })
        .buffer_unordered(args.max_workers)
        .collect()
        .await;

    let mut succeeded = 0usize;
    let mut failed = 0usize;
    for (path, result) in outcomes {
        match result {
            Ok(_) => succeeded += 1,
            Err(e) => {
                failed += 1;
                warn!(file = %path.display(), error = %e, "sort failed");
            }
        }
    }

    println!("\n{}", "Sort Summary".bright_green().bold());
    println!("  {} {}", "Sorted:".bright_cyan(), succeeded);
    if failed > 0 {
        println!("  {} {}", "Failed:".bright_red(), failed);
    }
    Ok(())
}

/// End-of-run summary counts per stage
fn print_summary(summary: &RunSummary) {
    println!("\n{}", "Pipeline Summary".bright_green().bold());
    println!(
        "  {} {}",
        "Units discovered:".bright_cyan(),
        summary.units_discovered
    );
    if summary.files_skipped_no_key > 0 {
        println!(
            "  {} {}",
            "Files without (year, month) key:".bright_yellow(),
            summary.files_skipped_no_key
        );
    }
    if summary.units_resumed > 0 {
        println!(
            "  {} {}",
            "Units resumed from disk:".bright_cyan(),
            summary.units_resumed
        );
    }
    println!(
        "  {} {} succeeded, {} failed",
        "Extraction:".bright_cyan(),
        summary.extract_succeeded,
        format_failures(summary.extract_failed)
    );
    println!(
        "  {} {} succeeded, {} failed",
        "Join:".bright_cyan(),
        summary.join_succeeded,
        format_failures(summary.join_failed)
    );
    if summary.units_cleaned > 0 {
        println!(
            "  {} {}",
            "Intermediates cleaned:".bright_cyan(),
            summary.units_cleaned
        );
    }
    println!(
        "  {} {} succeeded, {} failed",
        "Sort:".bright_cyan(),
        summary.sort_succeeded,
        format_failures(summary.sort_failed)
    );

    if summary.is_clean() {
        println!("\n{}", "All stages completed without failures".bright_green());
    } else {
        println!(
            "\n{}",
            "Some units failed; see the logs directory for details".bright_red()
        );
    }
}

fn format_failures(count: usize) -> String {
    if count > 0 {
        count.to_string().bright_red().bold().to_string()
    } else {
        count.to_string()
    }
}
