//! kabu-calendar - Japanese earnings calendar aggregator
//!
//! ```bash
//! kabu-calendar calendar 2026-02-13 -o earnings.csv
//! kabu-calendar check
//! kabu-calendar lookup 7203 --ir
//! kabu-calendar config
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kabu_calendar::{Aggregator, AppContext, Calendar, CalendarOptions};
use kabu_common::config::{resolve_config, split_list, SettingsOverrides};
use kabu_common::{LoggingConfig, TomlConfig};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::debug;

/// Command-line arguments for kabu-calendar
#[derive(Parser, Debug)]
#[command(name = "kabu-calendar")]
#[command(about = "Japanese earnings calendar aggregator")]
#[command(version)]
struct Args {
    /// Config file (default: <config_dir>/kabu-calendar/config.toml)
    #[arg(long, global = true, env = "KABU_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Worker bound for parallel stages
    #[arg(long, global = true)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Earnings calendar for DATE (YYYY-MM-DD)
    Calendar {
        date: String,

        /// Skip IR lookups
        #[arg(long)]
        no_ir: bool,

        /// Ignore cached IR datetimes
        #[arg(long)]
        ir_eager: bool,

        /// Skip history inference
        #[arg(long)]
        no_infer: bool,

        /// Comma separated source list
        #[arg(long)]
        sources: Option<String>,

        /// Export to file (.csv, .json, .db)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Stdout format
        #[arg(short, long, value_enum, default_value_t = StdoutFormat::Table)]
        format: StdoutFormat,
    },

    /// Health check every source
    Check,

    /// History and inference for one stock CODE
    Lookup {
        code: String,

        /// Include the IR page
        #[arg(long)]
        ir: bool,

        /// Past announcements to show
        #[arg(long = "history", default_value_t = 8)]
        n_history: usize,
    },

    /// Show the effective configuration
    Config,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum StdoutFormat {
    Table,
    Csv,
    Json,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let overrides = SettingsOverrides {
        max_workers: args.workers,
        log_level: args.log_level.clone(),
        ..SettingsOverrides::default()
    };
    let config = resolve_config(args.config.as_deref(), &overrides)?;
    init_logging(&config.logging)?;
    debug!(?config, "Configuration resolved");

    if let Command::Config = args.command {
        print_config(&config)?;
        return Ok(());
    }

    let ctx = AppContext::new(config.settings.clone())?;
    let aggregator = Aggregator::new(Arc::clone(&ctx));

    match args.command {
        Command::Calendar {
            date,
            no_ir,
            ir_eager,
            no_infer,
            sources,
            output,
            format,
        } => {
            let options = CalendarOptions {
                sources: sources.as_deref().map(split_list),
                infer_from_history: !no_infer,
                include_ir: !no_ir,
                ir_eager,
            };
            let calendar = aggregator.get_calendar(&date, &options).await?;

            match output {
                Some(path) => {
                    calendar.export(&path).await?;
                    println!("Exported {} rows to {}", calendar.len(), path.display());
                }
                None => print_calendar(&calendar, format)?,
            }
        }
        Command::Check => {
            for report in aggregator.check_sources().await {
                let status = if report.ok { "ok" } else { "FAIL" };
                let mut line = format!("  {:<15} {:<6} rows={}", report.name, status, report.rows);
                if let Some(error) = report.error.filter(|_| !report.ok) {
                    line.push_str(&format!("  error={}", error));
                }
                println!("{}", line);
            }
        }
        Command::Lookup { code, ir, n_history } => {
            let report = aggregator.lookup(&code, n_history, ir).await?;
            let inferred = report
                .inference
                .datetime
                .map(|dt| dt.format("%H:%M").to_string())
                .unwrap_or_else(|| "-".to_string());

            println!("Stock: {}", report.code);
            println!("Inferred time: {} (confidence: {})", inferred, report.inference.confidence);
            if report.history().is_empty() {
                println!("No past announcements found.");
            } else {
                println!("Past announcements ({}):", report.history().len());
                for dt in report.history() {
                    println!("  {}", dt.format("%Y-%m-%d %H:%M"));
                }
            }

            if ir {
                match &report.ir_page {
                    Some(page) => {
                        println!("IR page: {}", page.url);
                        println!("  type: {}, via: {}", page.page_type, page.discovered_via);
                    }
                    None => println!("IR page: not found"),
                }
                if let Some(observation) = &report.ir {
                    println!(
                        "IR datetime: {} ({})",
                        observation.datetime.format("%Y-%m-%d %H:%M"),
                        observation.method
                    );
                }
            }
        }
        Command::Config => {}
    }
    Ok(())
}

fn print_calendar(calendar: &Calendar, format: StdoutFormat) -> Result<()> {
    match format {
        StdoutFormat::Table => print!("{}", calendar.to_text_table()),
        StdoutFormat::Json => println!("{}", calendar.to_json_string()?),
        StdoutFormat::Csv => calendar.write_csv(std::io::stdout().lock())?,
    }
    Ok(())
}

fn print_config(config: &TomlConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("Failed to render configuration")?;
    print!("{}", rendered);
    Ok(())
}

/// Install the global subscriber; `RUST_LOG` wins over the configured level
fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    match &logging.file {
        Some(path) => {
            let file = open_log_file(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}
