//! scribe CLI: operator interface to the assignment scheduler.

use clap::{Parser, Subcommand};
use scribe_rs::cache::{Housekeeper, HousekeeperConfig};
use scribe_rs::config::Config;
use scribe_rs::db::Db;
use scribe_rs::model::{Mode, PoolKind, WorkItemId, WorkerId};
use scribe_rs::scheduler::{Assignment, NextRequest, Scheduler};
use scribe_rs::telemetry::{TelemetryConfig, init_telemetry};
use secrecy::ExposeSecret;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "scribe", about = "Assign transcription and review work")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending database migrations
    Migrate,
    /// Run the housekeeper daemon (repopulation jobs + periodic sweep)
    Serve,
    /// Pool operations
    Pool {
        #[command(subcommand)]
        action: PoolAction,
    },
    /// Ask for the next assignment
    Next {
        #[command(subcommand)]
        action: NextAction,
    },
    /// Candidate cache operations
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum PoolAction {
    /// Create a pool
    Create {
        slug: String,
        title: String,
        /// "closed" or "open"
        #[arg(long, default_value = "closed")]
        kind: String,
    },
    /// List active pools
    List,
}

#[derive(clap::Args)]
struct Context {
    /// Pool slug
    #[arg(long)]
    pool: String,
    /// Collection the worker is in
    #[arg(long)]
    collection: Option<String>,
    /// Container the worker is in
    #[arg(long)]
    container: Option<String>,
    /// Work item the worker just finished
    #[arg(long)]
    after: Option<i64>,
    /// Reserve the assigned item under a fresh holder token
    #[arg(long)]
    reserve: bool,
}

#[derive(Subcommand)]
enum NextAction {
    /// Next item to transcribe
    Transcribe {
        #[command(flatten)]
        context: Context,
        /// Worker id (anonymous if omitted)
        #[arg(long)]
        worker: Option<i64>,
    },
    /// Next item to review
    Review {
        #[command(flatten)]
        context: Context,
        /// Worker id
        #[arg(long)]
        worker: i64,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Refill a pool's cache for one mode
    Repopulate {
        #[arg(long)]
        pool: String,
        /// "transcribe" or "review"
        #[arg(long)]
        mode: String,
    },
    /// Delete invalid cache rows for a pool
    Prune {
        #[arg(long)]
        pool: String,
    },
    /// Drop every cache row for a pool
    Clear {
        #[arg(long)]
        pool: String,
    },
    /// Show cache row counts for a pool
    Stats {
        #[arg(long)]
        pool: String,
    },
    /// List cached candidates
    List {
        #[arg(long)]
        pool: String,
        #[arg(long, default_value = "transcribe")]
        mode: String,
        /// Maximum rows to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Prune and repopulate every active pool once
    Sweep,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "scribe".to_string(),
        default_filter: config.log_level.clone(),
    })?;

    let db = Db::connect_with(config.database_url.expose_secret(), config.db_max_connections).await?;
    db.migrate().await?;
    db.ensure_repopulate_queue().await?;
    let db = Arc::new(db);
    let scheduler = Scheduler::new(Arc::clone(&db), config.scheduler());

    match cli.command {
        Command::Migrate => {
            println!("Migrations applied.");
            Ok(())
        }
        Command::Serve => cmd_serve(db, &scheduler, &config).await,
        Command::Pool { action } => cmd_pool(&db, action).await,
        Command::Next { action } => cmd_next(&db, &scheduler, action).await,
        Command::Cache { action } => cmd_cache(&db, &scheduler, action).await,
    }
}

async fn cmd_serve(db: Arc<Db>, scheduler: &Scheduler, config: &Config) -> anyhow::Result<()> {
    let housekeeper = Housekeeper::new(
        db,
        scheduler.maintenance(),
        HousekeeperConfig {
            sweep_interval: config.sweep_interval,
            ..HousekeeperConfig::default()
        },
    );

    let hk = housekeeper.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        hk.shutdown();
    });

    housekeeper.run().await?;
    Ok(())
}

async fn cmd_pool(db: &Db, action: PoolAction) -> anyhow::Result<()> {
    match action {
        PoolAction::Create { slug, title, kind } => {
            let kind: PoolKind = kind.parse()?;
            let pool = db.create_pool(&slug, &title, kind).await?;
            println!("Created pool {} ({}, id {})", pool.slug, pool.kind, pool.id);
        }
        PoolAction::List => {
            let pools = db.list_active_pools().await?;
            if pools.is_empty() {
                println!("No active pools.");
                return Ok(());
            }
            println!("{:<6}  {:<24}  {:<6}  TITLE", "ID", "SLUG", "KIND");
            println!("{}", "-".repeat(60));
            for pool in &pools {
                println!(
                    "{:<6}  {:<24}  {:<6}  {}",
                    pool.id, pool.slug, pool.kind, pool.title
                );
            }
        }
    }
    Ok(())
}

async fn cmd_next(db: &Db, scheduler: &Scheduler, action: NextAction) -> anyhow::Result<()> {
    let (context, mode, worker) = match action {
        NextAction::Transcribe { context, worker } => (context, Mode::Transcribe, worker),
        NextAction::Review { context, worker } => (context, Mode::Review, Some(worker)),
    };

    let pool = db.get_pool_by_slug(&context.pool).await?;
    let mut req = NextRequest::new(&pool);
    if let Some(worker) = worker {
        req = req.worker(WorkerId(worker));
    }
    if let Some(ref key) = context.collection {
        req = req.collection(key);
    }
    if let Some(ref key) = context.container {
        req = req.container(key);
    }
    if let Some(after) = context.after {
        req = req.after(WorkItemId(after));
    }
    let token = context.reserve.then(|| uuid::Uuid::new_v4().to_string());
    if let Some(ref token) = token {
        req = req.reserve_for(token);
    }

    let assignment = match (mode, worker) {
        (Mode::Review, Some(worker)) => scheduler.next_reviewable(WorkerId(worker), req).await?,
        _ => scheduler.next_transcribable(req).await?,
    };

    match assignment {
        Some(assignment) => print_assignment(&assignment, token.as_deref()),
        None => println!("No work currently available in '{}'.", pool.slug),
    }
    Ok(())
}

fn print_assignment(assignment: &Assignment, token: Option<&str>) {
    let item = &assignment.item;
    println!("Work Item:  {}", item.id);
    println!("Collection: {}", item.collection_key);
    println!("Container:  {}", item.container_key);
    println!("Sequence:   {}", item.sequence);
    println!("Status:     {}", item.status);
    println!("Source:     {}", assignment.source);
    if let Some(token) = token {
        println!(
            "Reserved:   {} (token {token})",
            if assignment.reserved { "yes" } else { "no" }
        );
    }
}

async fn cmd_cache(db: &Db, scheduler: &Scheduler, action: CacheAction) -> anyhow::Result<()> {
    let maintenance = scheduler.maintenance();
    match action {
        CacheAction::Repopulate { pool, mode } => {
            let mode: Mode = mode.parse()?;
            let pool = db.get_pool_by_slug(&pool).await?;
            let inserted = maintenance.repopulate(&pool, mode).await?;
            println!("Inserted {inserted} {mode} candidate(s) for '{}'.", pool.slug);
        }
        CacheAction::Prune { pool } => {
            let pool = db.get_pool_by_slug(&pool).await?;
            let pruned = maintenance.prune_invalid(pool.id).await?;
            println!("Pruned {pruned} invalid candidate(s) from '{}'.", pool.slug);
        }
        CacheAction::Clear { pool } => {
            let pool = db.get_pool_by_slug(&pool).await?;
            let cleared = maintenance.clear(pool.id).await?;
            println!("Cleared {cleared} candidate(s) from '{}'.", pool.slug);
        }
        CacheAction::Stats { pool } => {
            let pool = db.get_pool_by_slug(&pool).await?;
            let stats = maintenance.cache_stats(pool.id).await?;
            let queued = db.pending_repopulate_jobs(pool.id).await?;
            println!("Pool:          {}", pool.slug);
            println!("Transcribable: {}", stats.transcribable);
            println!("Reviewable:    {}", stats.reviewable);
            println!("Queued jobs:   {queued}");
        }
        CacheAction::List { pool, mode, limit } => {
            let mode: Mode = mode.parse()?;
            let pool = db.get_pool_by_slug(&pool).await?;
            let rows = maintenance.candidates(pool.id, mode).await?;
            if rows.is_empty() {
                println!("No cached {mode} candidates for '{}'.", pool.slug);
                return Ok(());
            }
            println!(
                "{:<8}  {:<20}  {:<20}  {:<5}  {:<12}  CONTRIBUTORS",
                "ITEM", "COLLECTION", "CONTAINER", "SEQ", "STATUS"
            );
            println!("{}", "-".repeat(90));
            for row in rows.iter().take(limit) {
                println!(
                    "{:<8}  {:<20}  {:<20}  {:<5}  {:<12}  {}",
                    row.work_item_id,
                    row.collection_key,
                    row.container_key,
                    row.sequence,
                    row.status,
                    row.contributor_ids.len()
                );
            }
            println!("\n{} row(s)", rows.len());
        }
        CacheAction::Sweep => {
            let report = maintenance.sweep_all().await?;
            println!(
                "Swept {} pool(s): {} inserted, {} pruned, {} failed.",
                report.pools, report.inserted, report.pruned, report.failures
            );
        }
    }
    Ok(())
}
