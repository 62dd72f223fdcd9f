//! Faultline CLI
//!
//! Command-line interface for inspecting, exporting and maintaining logs.

mod i18n;

use anyhow::{bail, Context as _, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use faultline_core::{
    install_panic_hook, BatchCheckResult, CheckResult, Config, Context, ExportFormat,
    FormatterConfig, Hooks, LogQuery, Principal, PurgeReport, RecordFormatter, Service, Trigger,
    TriggerOutcome,
};
use i18n::{t, t_args};
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the diagnostics filter
const LOG_ENV: &str = "FAULTLINE_LOG";

/// Faultline - application error logger
#[derive(Parser)]
#[command(name = "faultline")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value = "pretty", global = true)]
    format: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version information
    Version,
    /// Record an event
    Log {
        /// Log type (error, warning, info, success)
        log_type: String,
        /// Message
        message: String,
        /// Context as a JSON document
        #[arg(long)]
        context: Option<String>,
        /// Force a chat notification
        #[arg(long)]
        alert: bool,
    },
    /// List stored records, most recent first
    List {
        /// Only records of this type
        #[arg(short = 't', long = "type")]
        log_type: Option<String>,
        /// Substring matched against message and context
        #[arg(short, long)]
        search: Option<String>,
        /// From date (YYYY-MM-DD, inclusive)
        #[arg(long, value_parser = parse_date)]
        from: Option<NaiveDate>,
        /// To date (YYYY-MM-DD, inclusive)
        #[arg(long, value_parser = parse_date)]
        to: Option<NaiveDate>,
        /// Page number
        #[arg(short, long, default_value = "1")]
        page: usize,
        /// Records per page
        #[arg(long, default_value = "20")]
        per_page: usize,
        /// Show each record's context
        #[arg(long)]
        show_context: bool,
    },
    /// Export every record
    Export {
        /// Export file format
        #[arg(value_enum)]
        kind: ExportKind,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete every record
    Clear {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
    /// Delete records past the retention window
    Purge,
    /// Check cached JSON files and repair broken ones
    Check {
        /// Only check this file
        #[arg(long)]
        file: Option<String>,
    },
    /// Run recurring jobs that are due
    Tick,
    /// Show or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Pretty,
    Json,
    Compact,
}

impl From<OutputFormat> for faultline_core::OutputFormat {
    fn from(f: OutputFormat) -> Self {
        match f {
            OutputFormat::Pretty => faultline_core::OutputFormat::Pretty,
            OutputFormat::Json => faultline_core::OutputFormat::JsonLines,
            OutputFormat::Compact => faultline_core::OutputFormat::Compact,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum ExportKind {
    Csv,
    Json,
}

impl From<ExportKind> for ExportFormat {
    fn from(k: ExportKind) -> Self {
        match k {
            ExportKind::Csv => ExportFormat::Csv,
            ExportKind::Json => ExportFormat::Json,
        }
    }
}

fn parse_date(raw: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| format!("{raw}: {e}"))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();
    if cli.no_color {
        colored::control::set_override(false);
    }

    let command = match cli.command {
        Some(command) => command,
        None => {
            print_usage();
            return Ok(());
        }
    };

    match command {
        Commands::Version => {
            print_version();
            Ok(())
        }
        Commands::Config { action } => run_config(action, cli.config.as_deref()),
        command => {
            let config = load_config(cli.config.as_deref());
            let service = Service::open(config, Hooks::new()).context(t("error-open-service"))?;
            install_panic_hook(service.capture().clone());
            run(&service, command, cli.format)
        }
    }
}

/// Load the configuration, falling back to defaults when it cannot be read
fn load_config(path: Option<&Path>) -> Config {
    let loaded = match path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };
    loaded
        .unwrap_or_else(|e| {
            warn!(error = %e, "failed to load config, using defaults");
            eprintln!("{}", t_args("warn-config-fallback", &[("error", &e.to_string())]));
            Config::default()
        })
        .with_env_overrides()
}

fn operator() -> Principal {
    let name = std::env::var("USER").unwrap_or_else(|_| "cli".to_string());
    Principal::admin(name)
}

fn run(service: &Service, command: Commands, format: OutputFormat) -> Result<()> {
    match command {
        Commands::Log {
            log_type,
            message,
            context,
            alert,
        } => {
            let context = match context {
                Some(raw) => Context::from(
                    serde_json::from_str::<serde_json::Value>(&raw)
                        .context(t("error-invalid-context"))?,
                ),
                None => Context::Empty,
            };
            let id = service.logger().log(&log_type, &message, context, alert);
            if id == faultline_core::NO_RECORD {
                println!("{}", t("log-not-stored").yellow());
            } else {
                println!("{}", t_args("log-stored", &[("id", &id.to_string())]));
            }
            Ok(())
        }
        Commands::List {
            log_type,
            search,
            from,
            to,
            page,
            per_page,
            show_context,
        } => {
            let query = LogQuery {
                log_type,
                search,
                date_from: from,
                date_to: to,
                page,
                per_page,
            };
            let (records, total) = service.query(query)?;
            let formatter = RecordFormatter::new(FormatterConfig {
                format: format.into(),
                show_timestamps: true,
                use_colors: !colored_disabled(),
                show_context,
            });
            let mut stdout = std::io::stdout().lock();
            for record in &records {
                formatter.write(record, &mut stdout)?;
            }
            if format == OutputFormat::Pretty {
                let pages = total.div_ceil(per_page.max(1)).max(1);
                println!(
                    "{}",
                    t_args(
                        "list-footer",
                        &[
                            ("page", &page.max(1).to_string()),
                            ("pages", &pages.to_string()),
                            ("total", &total.to_string()),
                        ],
                    )
                    .dimmed()
                );
            }
            Ok(())
        }
        Commands::Export { kind, output } => {
            let body = service.export(kind.into())?;
            match output {
                Some(path) => {
                    std::fs::write(&path, body).with_context(|| {
                        format!("{}: {}", t("error-write-export"), path.display())
                    })?;
                    println!(
                        "{}",
                        t_args("export-written", &[("path", &path.display().to_string())])
                    );
                }
                None => print!("{body}"),
            }
            Ok(())
        }
        Commands::Clear { yes } => {
            if !yes {
                bail!(t("error-clear-confirm"));
            }
            let outcome = service.run(Trigger::ClearAll, &operator())?;
            print_outcome(&outcome, format)
        }
        Commands::Purge => {
            let outcome = service.run(Trigger::Purge, &operator())?;
            print_outcome(&outcome, format)
        }
        Commands::Check { file } => {
            let trigger = match file {
                Some(file) => Trigger::CheckFile(file),
                None => Trigger::CheckNow,
            };
            let outcome = service.run(trigger, &operator())?;
            print_outcome(&outcome, format)
        }
        Commands::Tick => {
            let ran = service.tick()?;
            if ran.is_empty() && format != OutputFormat::Json {
                println!("{}", t("tick-nothing-due").dimmed());
            }
            for (job, outcome) in &ran {
                if format != OutputFormat::Json {
                    println!("{}", t_args("tick-job", &[("job", job.name())]).cyan());
                }
                print_outcome(outcome, format)?;
            }
            Ok(())
        }
        Commands::Version | Commands::Config { .. } => Ok(()),
    }
}

fn colored_disabled() -> bool {
    !colored::control::SHOULD_COLORIZE.should_colorize()
}

fn run_config(action: ConfigAction, path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let mut config = load_config(path);
            if !config.checker.api_token.is_empty() {
                config.checker.api_token = faultline_core::sanitize::REDACTED.to_string();
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        ConfigAction::Init { force } => {
            let path = match path {
                Some(path) => path.to_path_buf(),
                None => {
                    Config::ensure_config_dir()?;
                    Config::default_path()?
                }
            };
            if path.exists() && !force {
                bail!(t_args(
                    "error-config-exists",
                    &[("path", &path.display().to_string())]
                ));
            }
            Config::default().save(&path)?;
            println!(
                "{}",
                t_args("config-written", &[("path", &path.display().to_string())])
            );
            Ok(())
        }
    }
}

fn print_outcome(outcome: &TriggerOutcome, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }
    let compact = format == OutputFormat::Compact;
    match outcome {
        TriggerOutcome::Checked(batch) => print_batch(batch, compact),
        TriggerOutcome::CheckedFile(result) => print_check_result(result, compact),
        TriggerOutcome::Cleared(count) => {
            println!("{}", t_args("clear-done", &[("count", &count.to_string())]));
        }
        TriggerOutcome::Purged(report) => print_purge(report),
    }
    Ok(())
}

fn print_batch(batch: &BatchCheckResult, compact: bool) {
    let summary = t_args(
        "check-summary",
        &[
            ("checked", &batch.checked.to_string()),
            ("valid", &batch.valid.to_string()),
            ("repaired", &batch.repaired.to_string()),
            ("failed", &batch.failed.to_string()),
        ],
    );
    if compact {
        println!("{summary}");
    } else {
        println!();
        println!("{}", t("check-title").cyan().bold());
        println!("{}", "\u{2500}".repeat(50));
        println!("  {summary}");
        println!();
    }
    for result in batch.details.values() {
        print_check_result(result, compact);
    }
}

fn print_check_result(result: &CheckResult, compact: bool) {
    let line = match (&result.error, result.repaired) {
        (None, _) => format!("\u{2713} {}", result.file).green().to_string(),
        (Some(error), true) => format!(
            "\u{21bb} {} ({}) {}",
            result.file,
            error,
            t("check-repaired")
        )
        .yellow()
        .to_string(),
        (Some(error), false) => format!(
            "\u{2717} {} ({}) {}: {}",
            result.file,
            error,
            t("check-repair-failed"),
            result.repair_error.as_deref().unwrap_or_default()
        )
        .red()
        .to_string(),
    };
    if compact {
        println!("{line}");
    } else {
        println!("  {line}");
    }
}

fn print_purge(report: &PurgeReport) {
    println!(
        "{}",
        t_args(
            "purge-done",
            &[
                ("records", &report.records.to_string()),
                ("dedup", &report.dedup_entries.to_string()),
                ("files", &report.files.to_string()),
            ],
        )
    );
}

fn print_version() {
    println!(
        "{} v{}",
        t("version-title").cyan().bold(),
        faultline_core::VERSION
    );
    println!("{}", t("version-subtitle"));
    println!();
    println!("{}: {}", t("version-core-label"), faultline_core::NAME);
}

fn print_usage() {
    println!("{}", t("usage-title").cyan().bold());
    println!("{}", t("usage-subtitle"));
    println!();
    println!("{}", t("examples-label").yellow());
    println!("    {}", t("example-log"));
    println!("    {}", t("example-list"));
    println!("    {}", t("example-export"));
    println!("    {}", t("example-check"));
    println!();
    println!("{}", t("usage-help-hint"));
}
