use anyhow::Context;
use clap::Parser;
use sql_tap::catalog::Catalog;
use sql_tap::checkpoint::CheckpointManager;
use sql_tap::state::ReplicationState;
use sql_tap::{Config, Replicator};
use std::io::Write;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "sql-tap")]
#[command(about = "Relational table extractor emitting schema, record and state messages", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    #[arg(short, long, help = "Print the discovered catalog and exit")]
    discover: bool,

    #[arg(long, value_name = "FILE", alias = "properties", help = "Catalog of streams to sync")]
    catalog: Option<PathBuf>,

    #[arg(short, long, value_name = "FILE", help = "State from a previous run")]
    state: Option<PathBuf>,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    if let Err(e) = run(args).await {
        error!("Fatal error: {:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    info!("Loading configuration from {:?}", args.config);
    let config = Config::from_file(&args.config).context("Failed to load configuration")?;

    info!(
        source_host = %config.source.host,
        source_port = %config.source.port,
        source_database = %config.source.database,
        schemas = ?config.source.schemas,
        checkpoint_interval_rows = config.sync.checkpoint_interval_rows,
        "Configuration summary"
    );

    let replicator = Replicator::new(config);

    if args.discover {
        let catalog = replicator.discover().await?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", catalog.to_json_pretty()?)?;
        return Ok(());
    }

    let catalog_path = args
        .catalog
        .context("A catalog is required when not running discovery (--catalog)")?;
    let contents = tokio::fs::read_to_string(&catalog_path)
        .await
        .with_context(|| format!("Failed to read catalog {:?}", catalog_path))?;
    let catalog = Catalog::from_json(&contents)?;

    let state = match &args.state {
        Some(path) => CheckpointManager::new(path).load().await?.unwrap_or_default(),
        None => ReplicationState::default(),
    };

    replicator.run(&catalog, &state, std::io::stdout()).await?;
    Ok(())
}

/// Logs go to stderr; stdout carries the message stream.
fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("sql_tap=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sql_tap=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
