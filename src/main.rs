//! Backtrans - Batch Translation with Back-Translation Scoring
//!
//! Entry point for the command-line tool: translates a CSV column, scores the
//! round trip and manages the backup sessions that make runs recoverable.

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use backtrans::backup::BackupStore;
use backtrans::cli::{Args, Commands};
use backtrans::config::Config;
use backtrans::dataset::{Dataset, BACK_TRANSLATED_COLUMN};
use backtrans::error::BacktransError;
use backtrans::evaluation::{Evaluator, OllamaEmbedder};
use backtrans::languages::{LanguageMaps, LanguageSelection};
use backtrans::providers::ProviderFactory;
use backtrans::workflow::BatchController;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging to both console and file
    setup_logging(args.verbose)?;

    let config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new("backtrans.toml").exists() {
                info!("Found backtrans.toml in current directory, loading...");
                Config::from_file("backtrans.toml")?
            } else {
                Config::default()
            }
        }
    };

    match args.command {
        Commands::Translate { input, column, language, deepl_code, google_code, output, skip_evaluation } => {
            let dataset = Dataset::from_csv_path(&input)?;

            let column = match column {
                Some(column) => column,
                None => dataset
                    .default_translation_column()
                    .map(str::to_string)
                    .ok_or_else(|| BacktransError::Dataset(
                        "No 'English' column found; choose one with --column".to_string()
                    ))?,
            };

            let selection = match (language, deepl_code, google_code) {
                (Some(name), _, _) => LanguageMaps::load(&config.languages)?.resolve(&name)?,
                (None, Some(deepl), Some(google)) => LanguageSelection::from_codes(deepl, google),
                _ => {
                    return Err(BacktransError::Config(
                        "Pass --language or both --deepl-code and --google-code".to_string()
                    ).into());
                }
            };

            let characters = dataset.count_translatable_characters(&column)?;
            info!("Column '{}': {} rows, {} characters to translate", column, dataset.len(), characters);

            let forward = ProviderFactory::create_forward(&config.forward)?;
            let back = ProviderFactory::create_back(&config.back)?;

            let progress = ProgressBar::new(dataset.len() as u64);
            progress.set_style(
                ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} rows ({eta})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, stopping after the current row");
                    on_interrupt.cancel();
                }
            });

            let controller = BatchController::from_config(&config, forward, back)
                .with_cancellation(cancel)
                .with_observer(Box::new(progress.clone()));

            let file_name = input
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| dataset.name().to_string());

            let outcome = match controller.run(dataset, &column, &selection, &file_name).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    progress.abandon();
                    if e.leaves_partial_backup() {
                        let location = e
                            .session_dir()
                            .unwrap_or(config.backup.root_dir.as_path())
                            .display();
                        eprintln!(
                            "Translation stopped: {}. Partial results are kept under {} (see `backtrans sessions`).",
                            e, location
                        );
                    }
                    return Err(e.into());
                }
            };
            progress.finish();

            let result = if skip_evaluation {
                outcome.dataset
            } else {
                let embedder = OllamaEmbedder::new(&config.evaluation)?;
                embedder.check_availability().await?;
                info!("Evaluating translation quality (semantic and text similarity)...");
                Evaluator::from_config(&embedder, &config.evaluation)
                    .evaluate(outcome.dataset, &column, BACK_TRANSLATED_COLUMN)
                    .await?
            };

            result.save_csv(&output)?;
            println!(
                "Translated {} rows ({} forward errors, {} back errors). Output: {}. Backup: {}",
                result.len(),
                outcome.forward_failures,
                outcome.back_failures,
                output.display(),
                outcome.session_dir.display()
            );
        }
        Commands::Evaluate { input, original_column, back_column, output } => {
            let dataset = Dataset::from_csv_path(&input)?;
            let embedder = OllamaEmbedder::new(&config.evaluation)?;
            embedder.check_availability().await?;

            let result = Evaluator::from_config(&embedder, &config.evaluation)
                .evaluate(dataset, &original_column, &back_column)
                .await?;
            result.save_csv(&output)?;
            println!("Scored {} rows. Output: {}", result.len(), output.display());
        }
        Commands::Languages => {
            let maps = LanguageMaps::load(&config.languages)?;
            for name in maps.names() {
                let selection = maps.resolve(name)?;
                println!("{:<25} {:<8} {:<8}", name, selection.forward_code, selection.back_code);
            }
        }
        Commands::Sessions => {
            let store = BackupStore::new(&config.backup.root_dir);
            let sessions = store.session_summaries()?;

            if sessions.is_empty() {
                println!("No backup sessions found in {}", store.root().display());
            } else {
                let cwd = std::env::current_dir()?;
                println!("{:<45} {:<10} {:<6} {}", "Session", "Status", "Rows", "Path");
                println!("{}", "-".repeat(90));
                for session in sessions {
                    let status = if session.completed { "complete" } else { "partial" };
                    println!(
                        "{:<45} {:<10} {:<6} {}",
                        session.id,
                        status,
                        session.row_snapshots,
                        display_path(&session.path, &cwd).display()
                    );
                }
            }
        }
        Commands::InitConfig { output } => {
            Config::default().save_to_file(&output)?;
            println!("Wrote default configuration to {}", output.display());
        }
    }

    Ok(())
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = std::env::current_dir()?.join(".backtrans").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "backtrans.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Logging initialized - console: {}, file: {}",
          log_level, log_dir.join("backtrans.log").display());

    Ok(())
}

/// Path relative to the working directory when that is shorter
fn display_path(path: &Path, cwd: &Path) -> PathBuf {
    let absolute = if path.is_absolute() { path.to_path_buf() } else { cwd.join(path) };
    pathdiff::diff_paths(&absolute, cwd)
        .filter(|relative| relative.as_os_str().len() < absolute.as_os_str().len())
        .unwrap_or(absolute)
}
