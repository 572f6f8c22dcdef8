//! Hostwatch core CLI.
//!
//! Records events into, and reads them back out of, a durable event store:
//! - `add`: record one event for a subscriber table
//! - `select`: read rows by time window or as a named scheduled query
//! - `expire`: run a retention cycle
//! - `stats`: inspect a subscriber
//! - `config`: show the effective configuration
//!
//! stdout carries the JSON payload; logs and structured errors go to stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use hw_common::{Error, EventTime, Result, Row, StructuredError};
use hw_config::resolve::default_data_dir;
use hw_config::{resolve_config, validate_events, ConfigPaths, EventsConfig};
use hw_core::events::{
    EventFactory, ManualPublisher, QueryRequest, RowSubscriber, SystemClock,
};
use hw_core::exit_codes::ExitCode;
use hw_core::logging::{generate_run_id, init_logging, LogConfig, LogFormat, LogLevel};
use hw_store::{DirStore, Store};
use serde::Serialize;
use tracing::{debug, info_span};

/// Hostwatch - event recording and time-indexed retrieval
#[derive(Parser)]
#[command(name = "hw-core")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Directory holding the event store
    #[arg(long, global = true, env = "HOSTWATCH_DATA")]
    data_dir: Option<PathBuf>,

    /// Path to events.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Log format (human, jsonl)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Record one event
    Add(AddArgs),

    /// Read buffered events
    Select(SelectArgs),

    /// Run a retention cycle now
    Expire(SubscriberArg),

    /// Show subscriber statistics
    Stats(SubscriberArg),

    /// Show the effective configuration and where it came from
    Config,
}

#[derive(Args, Debug)]
struct SubscriberArg {
    /// Subscriber (event table) name, e.g. file_events
    subscriber: String,
}

#[derive(Args, Debug)]
struct AddArgs {
    /// Subscriber (event table) name, e.g. file_events
    subscriber: String,

    /// Event time in unix seconds; defaults to now
    #[arg(long, default_value_t = 0)]
    time: EventTime,

    /// Row field as key=value; repeatable
    #[arg(long = "field", value_parser = parse_field)]
    fields: Vec<(String, String)>,
}

#[derive(Args, Debug)]
struct SelectArgs {
    /// Subscriber (event table) name, e.g. file_events
    subscriber: String,

    /// Inclusive lower time bound
    #[arg(long)]
    start: Option<EventTime>,

    /// Inclusive upper time bound
    #[arg(long)]
    stop: Option<EventTime>,

    /// Read as this scheduled query; without bounds only new events are returned
    #[arg(long)]
    query: Option<String>,
}

fn parse_field(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got {:?}", s)),
    }
}

#[derive(Serialize)]
struct AddOutput {
    subscriber: String,
    eid: String,
}

#[derive(Serialize)]
struct ConfigOutput {
    source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<PathBuf>,
    data_dir: PathBuf,
    config: EventsConfig,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let _ = e.print();
            std::process::exit(ExitCode::UsageError.as_i32());
        }
    };

    let log_config = LogConfig::from_env(cli.global.log_level, cli.global.log_format);
    init_logging(&log_config);

    let run_id = generate_run_id();
    let span = info_span!("hw_core", run_id = %run_id);
    let _entered = span.enter();

    let exit_code = match run(&cli) {
        Ok(()) => ExitCode::Clean,
        Err(err) => {
            eprintln!("{}", StructuredError::from(&err).to_json());
            ExitCode::from(&err)
        }
    };
    debug!(exit_code = %exit_code, "done");
    std::process::exit(exit_code.as_i32());
}

fn run(cli: &Cli) -> Result<()> {
    let paths = resolve_config(cli.global.config.as_deref());
    if let Some(path) = &cli.global.config {
        if paths.events.as_deref() != Some(path.as_path()) {
            return Err(Error::Config(format!("config file not found: {}", path.display())));
        }
    }
    let config = load_config(&paths)?;
    let data_dir = cli
        .global
        .data_dir
        .clone()
        .or_else(|| config.database_path.clone())
        .unwrap_or_else(default_data_dir);

    match &cli.command {
        Commands::Config => print_json(&ConfigOutput {
            source: paths.events_source.to_string(),
            path: paths.events.clone(),
            data_dir,
            config,
        }),
        Commands::Add(args) => {
            let factory = open_factory(config, &data_dir, &args.subscriber)?;
            let row: Row = args.fields.iter().cloned().collect();
            let id = factory.add(&args.subscriber, row, args.time)?;
            factory.end();
            print_json(&AddOutput {
                subscriber: args.subscriber.clone(),
                eid: id.to_key(),
            })
        }
        Commands::Select(args) => {
            let factory = open_factory(config, &data_dir, &args.subscriber)?;
            let request = QueryRequest {
                start: args.start,
                stop: args.stop,
                query: args.query.clone(),
            };
            let rows = factory.gen_rows(&args.subscriber, &request)?;
            factory.end();
            print_json(&rows)
        }
        Commands::Expire(args) => {
            let factory = open_factory(config, &data_dir, &args.subscriber)?;
            let report = factory.expire(&args.subscriber)?;
            factory.end();
            print_json(&report)
        }
        Commands::Stats(args) => {
            let factory = open_factory(config, &data_dir, &args.subscriber)?;
            let stats = factory.stats(&args.subscriber)?;
            factory.end();
            print_json(&stats)
        }
    }
}

fn load_config(paths: &ConfigPaths) -> Result<EventsConfig> {
    let config = EventsConfig::load_or_default(paths.events.as_deref())?;
    validate_events(&config)?;
    debug!(source = %paths.events_source, "configuration loaded");
    Ok(config)
}

fn open_factory(config: EventsConfig, data_dir: &Path, subscriber: &str) -> Result<EventFactory> {
    let store: Arc<dyn Store> = Arc::new(DirStore::open(data_dir)?);
    let factory = EventFactory::new(config, store, Arc::new(SystemClock));
    factory.register_publisher(ManualPublisher)?;
    factory.register_subscriber(RowSubscriber::new(subscriber))?;
    Ok(factory)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
