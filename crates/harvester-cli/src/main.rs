//! harvester - multi-stage registry harvester
//!
//! Lists reference combinations, pages through every listing, resolves item
//! identities and fetches their details, then writes one consolidated export
//! per run.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use harvester_core::{LocalSink, Period, ProgressContext, fmt_num, init_logging};
use harvester_http::RegistryConfig;
use harvester_pipeline::{HarvestConfig, Orchestrator, Registry, RunReport, StageTarget, new_run_id};

mod config;

use config::FileConfig;

#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(about = "Multi-stage registry harvester")]
#[command(version)]
struct Cli {
    /// Config file path (default: ./harvester.toml or ~/.config/harvester/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,

    /// Stage to run together with the stages it depends on
    /// (all, combinations, primary, resolve, item-details, resolved-details-a, resolved-details-b)
    #[arg(long, default_value = "all")]
    stage: StageTarget,

    /// Worker pool size per stage
    #[arg(short, long)]
    workers: Option<usize>,

    /// Maximum primary map entries
    #[arg(long)]
    capacity: Option<usize>,

    /// Only harvest these category codes (comma-separated)
    #[arg(long, value_delimiter = ',')]
    categories: Vec<String>,

    /// Output directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Stop starting new work after this many seconds
    #[arg(long)]
    run_timeout: Option<u64>,

    /// Reporting period start (YYYY-MM-DD), requires --end-date
    #[arg(long, requires = "end_date")]
    start_date: Option<NaiveDate>,

    /// Reporting period end (YYYY-MM-DD), requires --start-date
    #[arg(long, requires = "start_date")]
    end_date: Option<NaiveDate>,

    /// Run identifier (default: current UTC timestamp)
    #[arg(long)]
    run_id: Option<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    show_config: bool,
}

impl Cli {
    /// Config file values, overridden by command-line flags
    fn load_config(&self) -> Result<FileConfig> {
        let mut file = match &self.config {
            Some(path) => FileConfig::from_file(path)?,
            None => FileConfig::load()?,
        };
        self.apply_overrides(&mut file.harvest);
        Ok(file)
    }

    fn apply_overrides(&self, config: &mut HarvestConfig) {
        if let Some(workers) = self.workers {
            config.max_workers_per_stage = workers;
        }
        if let Some(capacity) = self.capacity {
            config.primary_map_capacity = Some(capacity);
        }
        if !self.categories.is_empty() {
            config.category_filter = self.categories.clone();
        }
        if let Some(output) = &self.output {
            config.output_dir = output.clone();
        }
        if let Some(secs) = self.run_timeout {
            config.total_run_timeout_secs = Some(secs);
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            config.reporting_period = Some(Period { start, end });
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(ProgressContext::new());
    let multi = if progress.is_tty() {
        Some(progress.multi())
    } else {
        None
    };
    init_logging(cli.quiet, cli.debug, multi);

    let file = match cli.load_config() {
        Ok(file) => file,
        Err(e) => {
            log::error!("Configuration error: {e:#}");
            return ExitCode::from(1);
        }
    };
    if cli.show_config {
        print_config(&file.harvest, file.registry.as_ref());
        return ExitCode::SUCCESS;
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    if let Err(e) = setup_signal_handler(&shutdown) {
        log::warn!("Cannot install signal handlers, Ctrl-C will not finalize: {e}");
    }

    let run_id = cli.run_id.clone().unwrap_or_else(new_run_id);
    let report = match build_registry(file.registry.as_ref(), &file.harvest) {
        Ok(registry) => {
            let sink = Arc::new(LocalSink::new(&file.harvest.output_dir));
            Orchestrator::new(file.harvest, registry, sink)
                .with_target(cli.stage)
                .with_run_id(run_id)
                .with_shutdown_flag(shutdown)
                .with_progress(progress.clone())
                .run()
        }
        Err(e) => {
            log::error!("Cannot start run: {e:#}");
            RunReport::aborted(run_id, cli.stage, format!("{e:#}"))
        }
    };

    if progress.is_tty() {
        report.print();
    } else {
        report.log();
    }
    ExitCode::from(report.exit_code())
}

fn build_registry(registry: Option<&RegistryConfig>, harvest: &HarvestConfig) -> Result<Registry> {
    let registry = registry.context("No [registry] section in configuration")?;
    let built = registry
        .build(harvest.per_request_timeout())
        .context("Invalid registry configuration")?;
    Ok(built)
}

fn setup_signal_handler(flag: &Arc<AtomicBool>) -> std::io::Result<()> {
    // First signal: set graceful shutdown flag
    // Second signal: force exit
    for signal in [signal_hook::consts::SIGTERM, signal_hook::consts::SIGINT] {
        let flag = Arc::clone(flag);
        // SAFETY: AtomicBool::swap and process::exit are async-signal-safe
        unsafe {
            signal_hook::low_level::register(signal, move || {
                if flag.swap(true, Ordering::Relaxed) {
                    std::process::exit(130);
                }
            })?;
        }
    }
    Ok(())
}

fn print_config(harvest: &HarvestConfig, registry: Option<&RegistryConfig>) {
    use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    table.add_row(vec![
        "Output directory",
        &harvest.output_dir.display().to_string(),
    ]);
    table.add_row(vec![
        "Workers per stage",
        &harvest.max_workers_per_stage.to_string(),
    ]);
    table.add_row(vec![
        "Rate limit",
        &format!(
            "{} req/s ({} overrides)",
            harvest.default_requests_per_second,
            harvest.requests_per_second.len()
        ),
    ]);
    table.add_row(vec!["Page size", &harvest.page_size.to_string()]);
    table.add_row(vec![
        "Primary map capacity",
        &harvest
            .primary_map_capacity
            .map_or_else(|| "unbounded".to_string(), fmt_num),
    ]);
    table.add_row(vec![
        "Request timeout",
        &format!("{}s", harvest.per_request_timeout_secs),
    ]);
    table.add_row(vec![
        "Run timeout",
        &harvest
            .total_run_timeout_secs
            .map_or_else(|| "none".to_string(), |s| format!("{s}s")),
    ]);
    table.add_row(vec![
        "Retries",
        &format!(
            "{} attempts, {:?}..{:?} backoff",
            harvest.retry.max_attempts, harvest.retry.base_delay, harvest.retry.max_delay
        ),
    ]);
    table.add_row(vec![
        "Reporting period",
        &harvest
            .reporting_period
            .map_or_else(|| "previous month".to_string(), |p| p.to_string()),
    ]);
    table.add_row(vec![
        "Registry",
        registry.map_or("not configured", |r| r.base_url.as_str()),
    ]);
    table.add_row(vec![
        "Credentials",
        match registry.map(|r| r.credentials()) {
            None | Some(Ok(None)) => "none",
            Some(Ok(Some(_))) => "configured",
            Some(Err(_)) => "missing",
        },
    ]);

    eprintln!("\n{table}");
}
