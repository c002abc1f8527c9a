//! StockPulse - multi-source market data with failover and group analysis
//!
//! A CLI that fetches A-share market data through an ordered list of
//! upstream providers, falls back when one is down, and aggregates member
//! scores into index and industry summaries.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (configuration, every provider unavailable, etc.)

mod analysis;
mod cli;
mod config;
mod error;
mod facade;
mod failover;
mod models;
mod provider;
mod report;

use analysis::{AggregationEngine, EngineConfig, EntityAnalyzer, HistoryScorer};
use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use cli::{Args, Command, OutputFormat};
use config::{Config, DEFAULT_CONFIG_FILE};
use facade::DataFacade;
use provider::{HttpProvider, Provider};
use report::Report;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // No logging needed to write a config file.
    if args.command == Command::InitConfig {
        return handle_init_config(args.output.as_deref());
    }

    init_logging(&args);

    info!("StockPulse v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    if let Err(e) = run(args).await {
        error!("Command failed: {:#}", e);
        eprintln!("\nError: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

/// Handle `init-config`: generate a default stockpulse.toml.
fn handle_init_config(target: Option<&Path>) -> Result<()> {
    let path = target.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));

    if path.exists() {
        eprintln!(
            "{} already exists. Remove it first or edit it manually.",
            path.display()
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Created {} with default settings.", path.display());
    println!("Edit it to point [[providers]] at your data gateways.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Build the facade from config, run one command, release sessions.
async fn run(args: Args) -> Result<()> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config.validate()?;

    let facade = Arc::new(build_facade(&config)?);
    info!("Providers: {}", facade.provider_names().join(" > "));
    let outcome = execute(&args, &config, Arc::clone(&facade)).await;
    debug!("Provider status: {:?}", facade.status());
    facade.shutdown().await;

    let report = outcome?;
    let rendered = match args.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&report),
    };

    match &config.general.output {
        Some(path) => {
            report::write_report(&rendered, path)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            info!("Report saved to {}", path.display());
        }
        None => println!("{}", rendered),
    }
    Ok(())
}

fn build_facade(config: &Config) -> Result<DataFacade> {
    let providers = config
        .providers
        .iter()
        .map(|p| {
            HttpProvider::from_config(p)
                .map(|provider| Arc::new(provider) as Arc<dyn Provider>)
                .with_context(|| format!("Failed to set up provider {}", p.name))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(DataFacade::new(providers, config.failover_config())?)
}

async fn execute(args: &Args, config: &Config, facade: Arc<DataFacade>) -> Result<Report> {
    let report = match &args.command {
        Command::Index { code, limit } => {
            let engine = build_engine(config, facade);
            Report::Group(engine.analyze_index(code, *limit).await?)
        }
        Command::Industry { name, limit } => {
            let engine = build_engine(config, facade);
            Report::Group(engine.analyze_industry(name, *limit).await?)
        }
        Command::Compare { limit } => {
            let engine = build_engine(config, facade);
            Report::Comparison(engine.compare_industries(*limit).await?)
        }
        Command::History {
            code,
            start,
            end,
            days,
            adjust,
        } => {
            let end = end.unwrap_or_else(|| Utc::now().date_naive());
            let start = start.unwrap_or(end - Duration::days(i64::from(*days)));
            Report::History(facade.history(code, start, end, *adjust).await?)
        }
        Command::Info { code } => Report::Record {
            title: format!("Info {}", code),
            record: facade.metadata(code).await?,
        },
        Command::Financials { code } => Report::Record {
            title: format!("Financials {}", code),
            record: facade.financials(code).await?,
        },
        Command::Board { board } => Report::Codes {
            title: format!("Board {}", board),
            codes: facade.board_members(board).await?,
        },
        Command::Concept { name, detail: true } => Report::Records {
            title: format!("Concept {}", name),
            records: facade.concept_member_details(name).await?,
        },
        Command::Concept { name, detail: false } => Report::Codes {
            title: format!("Concept {}", name),
            codes: facade.concept_members(name).await?,
        },
        Command::Flow { code } => Report::Record {
            title: format!("Capital Flow {}", code),
            record: facade.capital_flow(code).await?,
        },
        Command::NorthFlow => Report::Records {
            title: "Northbound Flow".to_string(),
            records: facade.northbound_flow().await?,
        },
        Command::Health => {
            let health = facade.health_check().await;
            for (name, healthy) in &health {
                if !healthy {
                    warn!("Provider {} is unreachable", name);
                }
            }
            Report::Health(health)
        }
        Command::Status => Report::Status(facade.status()),
        Command::InitConfig => unreachable!("init-config is handled before dispatch"),
    };
    Ok(report)
}

fn build_engine(config: &Config, facade: Arc<DataFacade>) -> AggregationEngine {
    let analyzer: Arc<dyn EntityAnalyzer> = Arc::new(HistoryScorer::new(Arc::clone(&facade)));
    AggregationEngine::new(
        facade,
        analyzer,
        config.indices.clone(),
        EngineConfig::from(&config.analysis),
    )
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
