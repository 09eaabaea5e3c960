//! volu-bq CLI
//!
//! Entry point for the `volu-bq` command-line tool.

use clap::{Args, Parser, Subcommand};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use volu_bq::logging::{self, LogFormat, LogLevel};
use volu_bq::{
    load_config, open_cache, render_csv, AnalysisQuery, AppResult, EffectiveConfig, EnvLayer,
    Overrides,
};
use volu_cache::{EntryStatus, FetchSource};

#[derive(Parser)]
#[command(name = "volu-bq")]
#[command(about = "Cached BigQuery analytics queries", version)]
struct Cli {
    /// Config file (default: ./volu-bq.toml when present)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Cache root directory (overrides cache.dir)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Log level when RUST_LOG is unset
    #[arg(long, value_enum, default_value_t = LogLevel::Warn, global = true)]
    log_level: LogLevel,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Compact, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Flags identifying one cached query.
#[derive(Args)]
struct RequestArgs {
    /// Analysis name; results go under <cache dir>/<analysis>/cache
    #[arg(long, short = 'a')]
    analysis: String,

    /// SQL file to run
    #[arg(long, short = 's')]
    sql: PathBuf,

    /// Query parameter, repeatable: name=value (STRING) or name:TYPE=value
    #[arg(long = "param", short = 'p', value_name = "NAME[:TYPE]=VALUE")]
    params: Vec<String>,

    /// Maximum age of a cached result in hours (default: never stale)
    #[arg(long)]
    ttl_hours: Option<u64>,

    /// Project to run the query in
    #[arg(long)]
    project: Option<String>,

    /// Query location (default: EU)
    #[arg(long)]
    location: Option<String>,

    /// Fail queries that would bill more than this many bytes
    #[arg(long = "max-bytes")]
    max_bytes: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Return a query result, from cache when fresh
    Fetch {
        #[command(flatten)]
        request: RequestArgs,

        /// Ignore any cached result and re-run the query
        #[arg(long)]
        force_refresh: bool,

        /// Write the CSV result here instead of stdout
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// Print the fingerprint and cache path of a query
    Fingerprint {
        #[command(flatten)]
        request: RequestArgs,
    },

    /// Show whether a query has a fresh cached result
    Status {
        #[command(flatten)]
        request: RequestArgs,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show the effective configuration and where it came from
    Config {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.log_level, cli.log_format) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> AppResult<()> {
    let env = EnvLayer::from_process()?;
    let mut overrides = Overrides {
        cache_dir: cli.cache_dir,
        ..Overrides::default()
    };

    match cli.command {
        Commands::Fetch {
            request,
            force_refresh,
            out,
        } => {
            request.apply(&mut overrides);
            let config = load_config(cli.config.as_deref(), &env, &overrides)?;
            let query = request.query()?.with_force_refresh(force_refresh);
            run_fetch(&config, &query, out)
        }
        Commands::Fingerprint { request } => {
            request.apply(&mut overrides);
            let config = load_config(cli.config.as_deref(), &env, &overrides)?;
            let status = inspect(&config, &request.query()?)?;
            println!("{}", status.fingerprint);
            println!("{}", status.path.display());
            Ok(())
        }
        Commands::Status { request, json } => {
            request.apply(&mut overrides);
            let config = load_config(cli.config.as_deref(), &env, &overrides)?;
            let status = inspect(&config, &request.query()?)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
            Ok(())
        }
        Commands::Config { json } => {
            let config = load_config(cli.config.as_deref(), &env, &overrides)?;
            if json {
                println!("{}", config.to_json()?);
            } else {
                print_config(&config)?;
            }
            Ok(())
        }
    }
}

impl RequestArgs {
    fn apply(&self, overrides: &mut Overrides) {
        overrides.ttl_hours = self.ttl_hours;
        overrides.project = self.project.clone();
        overrides.location = self.location.clone();
        overrides.max_bytes_billed = self.max_bytes;
    }

    fn query(&self) -> AppResult<AnalysisQuery> {
        AnalysisQuery::new(&self.analysis, &self.sql, &self.params)
    }
}

fn run_fetch(config: &EffectiveConfig, query: &AnalysisQuery, out: Option<PathBuf>) -> AppResult<()> {
    let settings = config.settings()?;
    let cache = open_cache(&settings);
    let outcome = cache.fetch(&query.request(&settings))?;

    let origin = match outcome.source {
        FetchSource::Cache(_) => "cache",
        FetchSource::Warehouse(_) => "warehouse",
    };
    tracing::info!(
        analysis = %query.analysis,
        fingerprint = %outcome.fingerprint,
        rows = outcome.table.num_rows(),
        origin,
        "fetched"
    );

    let csv = render_csv(&outcome.table)?;
    match out {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, csv)?;
            eprintln!(
                "{} rows from {} -> {}",
                outcome.table.num_rows(),
                origin,
                path.display()
            );
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(&csv)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn inspect(config: &EffectiveConfig, query: &AnalysisQuery) -> AppResult<EntryStatus> {
    let settings = config.settings()?;
    let cache = open_cache(&settings);
    Ok(cache.inspect(&query.request(&settings))?)
}

fn print_status(status: &EntryStatus) {
    println!("Analysis:    {}", status.analysis);
    println!("Fingerprint: {}", status.fingerprint);
    match (&status.stored_path, status.format) {
        (Some(path), Some(format)) => {
            println!("Entry:       {} ({})", path.display(), format);
            if let Some(modified) = status.modified {
                println!("Written:     {}", modified.to_rfc3339());
            }
            if let Some(age) = status.age_seconds {
                println!("Age:         {}s", age);
            }
            println!("Fresh:       {}", if status.fresh { "yes" } else { "no" });
        }
        _ => {
            println!("Entry:       none ({})", status.path.display());
        }
    }
}

fn print_config(config: &EffectiveConfig) -> AppResult<()> {
    println!("Sources:");
    for source in &config.sources {
        let origin = serde_json::to_value(&source.origin)?;
        let origin = origin.as_str().unwrap_or_default();
        match (&source.path, &source.digest) {
            (Some(path), Some(digest)) => println!("  {:<8} {} (sha256 {})", origin, path, digest),
            _ if !source.variables.is_empty() => {
                println!("  {:<8} {}", origin, source.variables.join(", "))
            }
            _ => println!("  {}", origin),
        }
    }
    println!();
    println!("{}", serde_json::to_string_pretty(&config.config)?);
    Ok(())
}
