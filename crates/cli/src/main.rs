use anyhow::{Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand};
use flags::{parse_source, DeviceFlag, EmbedMode, IndexBackendFlag};
use serde_json::json;
use skinmatch_catalog::{FeedSource, WearCondition};
use skinmatch_matcher::{NameResolver, Resolution, ResolverConfig, NO_MATCH_MESSAGE};
use std::path::PathBuf;

mod flags;
mod refresh;

#[derive(Parser)]
#[command(name = "skinmatch")]
#[command(about = "Resolve free-text CS2 item names to canonical market names", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ./skinmatch.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding skin_list.txt, skin_name_mapping.json and cache/
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Override embedding backend in this process
    #[arg(long, global = true, value_enum)]
    embed_mode: Option<EmbedMode>,

    /// Override embedding model id
    #[arg(long, global = true)]
    embed_model: Option<String>,

    /// Model directory (overrides SKINMATCH_MODEL_DIR)
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// Inference device
    #[arg(long, global = true, value_enum)]
    device: Option<DeviceFlag>,

    /// Similarity index implementation
    #[arg(long, global = true, value_enum)]
    index_backend: Option<IndexBackendFlag>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve one or more queries to canonical item names
    Match(MatchArgs),

    /// Load or build the embedding cache and the similarity index
    Warm(WarmArgs),

    /// Rebuild the catalog and alias mapping from item feeds
    Refresh(RefreshArgs),

    /// Show the wear-condition vocabulary, or the condition named in a query
    Wear(WearArgs),
}

#[derive(Args)]
struct MatchArgs {
    /// Item names to resolve
    #[arg(required = true)]
    queries: Vec<String>,

    /// Minimum similarity in percent, 0-100 (default: score_cutoff from config)
    #[arg(long)]
    cutoff: Option<u32>,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct WarmArgs {
    /// Re-encode the catalog even if the cache is valid
    #[arg(long)]
    force: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct RefreshArgs {
    /// Write the artifacts without rebuilding the embedding cache
    #[arg(long)]
    skip_embeddings: bool,

    /// Feed as LOCALE=URL (repeatable, first one anchors canonical names).
    /// Non-http values are read as local files.
    #[arg(long = "source-url", value_parser = parse_source)]
    sources: Vec<(String, String)>,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct WearArgs {
    /// Query to inspect
    query: Option<String>,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    // Keep stdout clean for JSON consumers
    let json_output = match &cli.command {
        Commands::Match(args) => args.json,
        Commands::Warm(args) => args.json,
        Commands::Refresh(args) => args.json,
        Commands::Wear(args) => args.json,
    };
    if json_output {
        cli.quiet = true;
    }

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    // ORT is extremely noisy
    if !cli.verbose {
        builder.filter_module("ort", log::LevelFilter::Off);
    }
    builder.target(env_logger::Target::Stderr).init();

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Match(args) => run_match(args, config).await,
        Commands::Warm(args) => run_warm(args, config).await,
        Commands::Refresh(args) => run_refresh(args, config).await,
        Commands::Wear(args) => run_wear(&args),
    }
}

fn load_config(cli: &Cli) -> Result<ResolverConfig> {
    let mut config =
        ResolverConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    if let Some(dir) = &cli.data_dir {
        config.set_data_dir(dir);
    }
    if let Some(mode) = cli.embed_mode {
        config.embedding.mode = mode.as_domain();
    }
    if let Some(model) = &cli.embed_model {
        config.embedding.model = model.clone();
    }
    if let Some(dir) = &cli.model_dir {
        config.embedding.model_dir = Some(dir.clone());
    }
    if let Some(device) = cli.device {
        config.embedding.device = device.as_domain();
    }
    if let Some(backend) = cli.index_backend {
        config.index.backend = backend.as_domain();
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn run_match(args: MatchArgs, config: ResolverConfig) -> Result<()> {
    let cutoff = args.cutoff.unwrap_or(config.score_cutoff);
    let resolver = NameResolver::from_config(config);
    let queries = args.queries;

    let resolutions: Vec<Resolution> = tokio::task::spawn_blocking(move || {
        queries
            .iter()
            .map(|query| resolver.resolve(query, cutoff))
            .collect::<skinmatch_matcher::Result<Vec<_>>>()
    })
    .await
    .context("Match task panicked")?
    .context("Failed to resolve query")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&resolutions)?);
        return Ok(());
    }
    for resolution in &resolutions {
        println!("{}", resolution.canonical_name().unwrap_or(NO_MATCH_MESSAGE));
    }
    Ok(())
}

async fn run_warm(args: WarmArgs, config: ResolverConfig) -> Result<()> {
    let resolver = NameResolver::from_config(config);
    let force = args.force;
    let report = tokio::task::spawn_blocking(move || {
        if force {
            resolver.rebuild()
        } else {
            resolver.warm()
        }
    })
    .await
    .context("Warm task panicked")?
    .context("Failed to build the embedding index")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if let Some(index) = report.index {
        println!(
            "{} rows x {} dims, index {}, model {}",
            report.rows,
            report.dimension,
            index,
            report.model_id.as_deref().unwrap_or("-")
        );
    } else {
        println!("catalog is empty; nothing to index");
    }
    Ok(())
}

async fn run_refresh(args: RefreshArgs, config: ResolverConfig) -> Result<()> {
    let sources: Vec<FeedSource> = if args.sources.is_empty() {
        FeedSource::defaults()
    } else {
        args.sources
            .into_iter()
            .map(|(locale, url)| FeedSource::new(locale, url))
            .collect()
    };

    let summary = refresh::refresh_catalog(&config, &sources).await?;

    let report = if args.skip_embeddings {
        None
    } else {
        let resolver = NameResolver::from_config(config);
        let report = tokio::task::spawn_blocking(move || resolver.rebuild())
            .await
            .context("Rebuild task panicked")?
            .context("Failed to rebuild embeddings")?;
        Some(report)
    };

    if args.json {
        let body = json!({ "refresh": summary, "embeddings": report });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        println!(
            "{} names, {} aliases from {}",
            summary.names,
            summary.aliases,
            summary.locales.join(", ")
        );
        if let Some(report) = report {
            println!("embeddings rebuilt: {} x {}", report.rows, report.dimension);
        }
    }
    Ok(())
}

fn run_wear(args: &WearArgs) -> Result<()> {
    if let Some(query) = &args.query {
        let detected = WearCondition::detect(query);
        if args.json {
            println!("{}", json!({ "query": query, "wear": detected }));
        } else {
            match detected {
                Some(condition) => println!("{condition}"),
                None => println!("no wear condition mentioned"),
            }
        }
        return Ok(());
    }

    if args.json {
        let table: Vec<_> = WearCondition::ALL
            .iter()
            .map(|c| json!({ "condition": c, "label": c.label(), "forms": c.surface_forms() }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&table)?);
    } else {
        for condition in WearCondition::ALL {
            println!("{}: {}", condition.label(), condition.surface_forms().join(", "));
        }
    }
    Ok(())
}
