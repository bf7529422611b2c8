use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use repochecker_core::cache::SystemClock;
use repochecker_core::compare::{DEFAULT_NEW_PROJECT, DEFAULT_OLD_PROJECT};
use repochecker_core::{
    compare_projects, CachePolicy, CompareOptions, Config, MemoCache, ObsClient, PassReport,
    RequestId, ReviewEngine, RpmProvenance, ScriptChecker, SqliteCacheStore,
};
use tracing::{info, warn, Level};

/// Repo checker: gates submit requests on build results and repository consistency
#[derive(Parser, Debug)]
#[command(name = "repochecker")]
#[command(
    about = "Review submit requests against build results and repository consistency",
    long_about = None
)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Build service API URL (overrides OBS_API_URL)
    #[arg(long, global = true)]
    apiurl: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Review the given requests, or every request waiting for this reviewer
    Check(CheckArgs),
    /// Compare the source packages of two projects
    Compare(CompareArgs),
}

#[derive(Parser, Debug)]
struct CheckArgs {
    /// Accept the given requests without reviewing them
    #[arg(long, requires = "ids")]
    skip: bool,

    /// Request ids; non-numeric values are ignored
    ids: Vec<String>,
}

#[derive(Parser, Debug)]
struct CompareArgs {
    /// Project the packages come from
    #[arg(long, default_value = DEFAULT_OLD_PROJECT)]
    old: String,

    /// Project the packages are compared against
    #[arg(long, default_value = DEFAULT_NEW_PROJECT)]
    new: String,

    /// Print the raw diff of every differing package
    #[arg(long)]
    verbose: bool,

    /// Only list packages missing from the new project
    #[arg(long)]
    newonly: bool,
}

fn parse_ids(raw: &[String]) -> Vec<RequestId> {
    raw.iter()
        .filter_map(|id| match id.parse::<u64>() {
            Ok(id) => Some(RequestId(id)),
            Err(_) => {
                warn!("Ignoring non-numeric request id {:?}", id);
                None
            }
        })
        .collect()
}

fn build_engine(config: Config, service: Arc<ObsClient>) -> Result<ReviewEngine> {
    std::fs::create_dir_all(&config.state_dir).with_context(|| {
        format!(
            "Failed to create state directory {}",
            config.state_dir.display()
        )
    })?;
    let db_path = config.cache_db_path();
    let store = SqliteCacheStore::new(&db_path)
        .with_context(|| format!("Failed to open cache database {}", db_path.display()))?;
    let cache = MemoCache::new(
        Arc::new(store),
        Arc::new(SystemClock),
        CachePolicy::default(),
    );

    Ok(ReviewEngine::new(
        service,
        cache,
        Arc::new(RpmProvenance::default()),
        Arc::new(ScriptChecker::new(config.checker_script)),
        config.review,
    ))
}

fn print_report(report: &PassReport) {
    for transition in &report.transitions {
        println!(
            "{} {}: {}",
            transition.request, transition.verdict, transition.message
        );
    }
    for outlier in &report.outliers {
        println!(
            "OUTLIER {} ({}): {}",
            outlier.package,
            outlier.arch,
            outlier.dependencies.join(", ")
        );
    }
}

async fn run_check(config: Config, service: Arc<ObsClient>, args: CheckArgs) -> Result<()> {
    let ids = parse_ids(&args.ids);
    if args.skip && ids.is_empty() {
        bail!("--skip needs at least one numeric request id");
    }

    let engine = build_engine(config, service)?;
    let report = if args.skip {
        engine.skip(&ids).await
    } else {
        engine.run(&ids).await.context("Review pass failed")?
    };

    info!("{} review state changes", report.transitions.len());
    print_report(&report);
    Ok(())
}

async fn run_compare(service: &ObsClient, args: CompareArgs) -> Result<()> {
    let options = CompareOptions {
        old_project: args.old,
        new_project: args.new,
        verbose: args.verbose,
        new_only: args.newonly,
    };
    let report = compare_projects(service, &options).await.with_context(|| {
        format!(
            "Failed to compare {} with {}",
            options.old_project, options.new_project
        )
    })?;
    print!("{}", report);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    let mut config =
        Config::from_env().context("Failed to load configuration from environment variables")?;
    if let Some(api_url) = cli.apiurl {
        config.api_url = api_url;
    }

    let service = Arc::new(
        ObsClient::new(&config.api_url, config.credentials.clone())
            .context("Failed to create build service client")?,
    );

    match cli.command {
        Commands::Check(args) => run_check(config, service, args).await,
        Commands::Compare(args) => run_compare(&service, args).await,
    }
}
