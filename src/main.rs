//! dspamstat - cached dspam statistics for monitoring agents.
//!
//! Values go to stdout, logs to stderr.

use std::process::ExitCode;

use chrono::{DateTime, Local};
use clap::Parser;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;

use dspamstat::cache::{self, RefreshOutcome, Refresher};
use dspamstat::config::{Cli, Command};
use dspamstat::freshness;
use dspamstat::lock::{self, LockFile};
use dspamstat::query::{self, GraphKind, Selector};
use dspamstat::source::CommandSource;

type BoxError = Box<dyn std::error::Error>;

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is WARN so a plugin run stays silent. Use -q for errors only.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    match format!("dspamstat={}", level).parse::<Directive>() {
        Ok(directive) => filter = filter.add_directive(directive),
        Err(e) => eprintln!("invalid log directive: {}", e),
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Removes held lock files when the process is interrupted or terminated.
fn install_signal_handler() {
    if let Err(e) = ctrlc::set_handler(|| {
        warn!("Received shutdown signal, releasing locks");
        lock::release_all_held();
        std::process::exit(130);
    }) {
        warn!("Failed to set signal handler: {}", e);
    }
}

fn describe_outcome(outcome: &RefreshOutcome) -> String {
    match outcome {
        RefreshOutcome::Fresh { age } => format!("fresh (age {}s)", age.as_secs()),
        RefreshOutcome::Refreshed { records } => format!("refreshed ({} records)", records),
        RefreshOutcome::Degraded { age, error } => {
            format!("serving previous cache (age {}s): {}", age.as_secs(), error)
        }
    }
}

fn run_query(
    cli: &Cli,
    refresher: &Refresher<CommandSource>,
    graph: GraphKind,
    selector: &Selector,
    json: bool,
) -> Result<(), BoxError> {
    let outcome = refresher.ensure(Some(cli.stale_ceiling()))?;
    debug!("Cache: {}", describe_outcome(&outcome));

    let records = cache::load(refresher.config())?;
    let result = query::query(&records, graph, selector)?;
    debug!(graph = %graph, selection = selector.describe(), "query answered");

    if json {
        println!("{}", serde_json::to_string(&result)?);
    } else {
        for line in result.to_value_lines("oca") {
            println!("{}", line);
        }
    }
    Ok(())
}

fn run_status(cli: &Cli) {
    let config = cli.cache_config();
    let state = freshness::check(&config.cache_path, config.max_age);
    println!("cache: {}", config.cache_path.display());
    println!("state: {}", state);

    if let Ok(modified) = std::fs::metadata(&config.cache_path).and_then(|m| m.modified()) {
        let modified: DateTime<Local> = modified.into();
        println!("modified: {}", modified.format("%Y-%m-%d %H:%M:%S %Z"));
    }

    if lock::is_locked(&config.lock_path) {
        match LockFile::holder_pid(&config.lock_path) {
            Some(pid) => println!("lock: held by pid {} ({})", pid, config.lock_path.display()),
            None => println!("lock: held ({})", config.lock_path.display()),
        }
    } else {
        println!("lock: free");
    }
}

fn run(cli: &Cli) -> Result<(), BoxError> {
    let refresher = Refresher::new(cli.cache_config(), cli.source());

    match &cli.command {
        Command::Refresh => {
            let outcome = refresher.refresh()?;
            info!("Cache {}", describe_outcome(&outcome));
            println!("{}", describe_outcome(&outcome));
        }
        Command::Query {
            graph,
            target,
            pattern,
            description,
            json,
        } => {
            let selector = Selector::parse(target, pattern.as_deref(), description.as_deref())?;
            run_query(cli, &refresher, *graph, &selector, *json)?;
        }
        Command::List => {
            refresher.ensure(Some(cli.stale_ceiling()))?;
            for record in cache::load(refresher.config())? {
                if !record.is_total() {
                    println!("{}", record.entity_id);
                }
            }
        }
        Command::Status => run_status(cli),
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.quiet);
    install_signal_handler();

    debug!(
        "dspamstat {} (cache={}, max_age={}s)",
        env!("CARGO_PKG_VERSION"),
        cli.cache.display(),
        cli.max_age
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
