//! Guidepost - command-line administration for tour staffing and tickets.
//!
//! Runs one engine operation per invocation against the configured store,
//! or against an in-memory store seeded from a JSON file with `--offline`.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use guidepost_core::cache::CacheManager;
use guidepost_core::config::Config;
use guidepost_core::guides::GuideRef;
use guidepost_core::models::Tour;
use guidepost_core::store::{MemoryStore, RecordStore, RestStore};
use guidepost_core::sync::{
    CacheInvalidator, ChannelNotifier, InvalidationQueue, NoopInvalidator, Notification, Severity,
};
use guidepost_core::utils::{format_counts, format_time};
use guidepost_core::{EngineContext, TourSession};

const USAGE: &str = "\
Usage: guidepost [--offline] [--seed <file>] <command>

Commands:
  requirement <tour>                          Tickets the tour needs
  candidates <tour>                           Buckets able to supply the tour
  assign-bucket <bucket> <tour>               Charge the tour's tickets to a bucket
  release-bucket <bucket> <tour>              Give the tour's tickets back
  move <tour> <participant> <from> <to>       Move a participant between groups
  assign-guide <tour> <group> <reference>     Set a group's guide (\"none\" clears)
  correct-counts <tour> <participant> <count> <children>
  resync <tour>                               Reload the tour and refresh the cache

Groups are numbered from 1 as shown by `requirement`.";

/// Notifications buffered while one command runs.
const NOTIFICATION_BUFFER: usize = 64;

// ============================================================================
// Arguments
// ============================================================================

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Requirement { tour: String },
    Candidates { tour: String },
    AssignBucket { bucket: String, tour: String },
    ReleaseBucket { bucket: String, tour: String },
    Move { tour: String, participant: String, from: usize, to: usize },
    AssignGuide { tour: String, group: usize, reference: String },
    CorrectCounts { tour: String, participant: String, count: u32, children: u32 },
    Resync { tour: String },
}

#[derive(Debug, PartialEq, Eq)]
struct Cli {
    offline: bool,
    seed: Option<PathBuf>,
    command: Command,
}

/// Parse a 1-based group number into an index.
fn group_number(s: &str) -> Result<usize> {
    match s.parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n - 1),
        _ => bail!("Invalid group number: {} (groups are numbered from 1)", s),
    }
}

fn count(s: &str) -> Result<u32> {
    s.parse().with_context(|| format!("Invalid count: {}", s))
}

impl Cli {
    fn parse(args: &[String]) -> Result<Self> {
        let mut offline = false;
        let mut seed = None;
        let mut positional: Vec<&str> = Vec::new();

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--offline" => offline = true,
                "--seed" => {
                    let path = iter.next().context("--seed needs a file path")?;
                    seed = Some(PathBuf::from(path));
                }
                flag if flag.starts_with("--") => bail!("Unknown flag: {}", flag),
                other => positional.push(other),
            }
        }

        let command = match positional.as_slice() {
            ["requirement", tour] => Command::Requirement { tour: tour.to_string() },
            ["candidates", tour] => Command::Candidates { tour: tour.to_string() },
            ["assign-bucket", bucket, tour] => Command::AssignBucket {
                bucket: bucket.to_string(),
                tour: tour.to_string(),
            },
            ["release-bucket", bucket, tour] => Command::ReleaseBucket {
                bucket: bucket.to_string(),
                tour: tour.to_string(),
            },
            ["move", tour, participant, from, to] => Command::Move {
                tour: tour.to_string(),
                participant: participant.to_string(),
                from: group_number(from)?,
                to: group_number(to)?,
            },
            ["assign-guide", tour, group, reference @ ..] if !reference.is_empty() => Command::AssignGuide {
                tour: tour.to_string(),
                group: group_number(group)?,
                reference: reference.join(" "),
            },
            ["correct-counts", tour, participant, n, children] => Command::CorrectCounts {
                tour: tour.to_string(),
                participant: participant.to_string(),
                count: count(n)?,
                children: count(children)?,
            },
            ["resync", tour] => Command::Resync { tour: tour.to_string() },
            [] => bail!("No command given"),
            [name, ..] => bail!("Unknown command or wrong arguments: {}", name),
        };

        if seed.is_some() && !offline {
            bail!("--seed only applies with --offline");
        }
        Ok(Self { offline, seed, command })
    }

    fn tour_id(&self) -> &str {
        match &self.command {
            Command::Requirement { tour }
            | Command::Candidates { tour }
            | Command::AssignBucket { tour, .. }
            | Command::ReleaseBucket { tour, .. }
            | Command::Move { tour, .. }
            | Command::AssignGuide { tour, .. }
            | Command::CorrectCounts { tour, .. }
            | Command::Resync { tour } => tour,
        }
    }
}

// ============================================================================
// Setup
// ============================================================================

/// Initialize the tracing subscriber for logging.
/// `RUST_LOG` controls the level; the default is `warn`.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match config.log_to_file.then(|| config.cache_dir()) {
        Some(Ok(dir)) => {
            let appender = tracing_appender::rolling::daily(dir, "guidepost.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        Some(Err(e)) => {
            eprintln!("File logging disabled: {:#}", e);
            (None, None)
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn open_store(cli: &Cli, config: &Config) -> Result<Arc<dyn RecordStore>> {
    if cli.offline {
        let store = match &cli.seed {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read seed file: {}", path.display()))?;
                let tables: HashMap<String, Vec<Value>> = serde_json::from_str(&contents)
                    .with_context(|| format!("Failed to parse seed file: {}", path.display()))?;
                MemoryStore::from_tables(tables)
            }
            None => MemoryStore::new(),
        };
        return Ok(Arc::new(store));
    }

    let url = config
        .store_url
        .as_deref()
        .context("No store URL configured; set GUIDEPOST_STORE_URL or use --offline")?;
    let mut store = RestStore::new(url)?;
    if let Some(ref key) = config.api_key {
        store = store.with_api_key(key.as_str());
    }
    Ok(Arc::new(store))
}

fn open_cache(config: &Config) -> Option<Arc<CacheManager>> {
    let result = config.cache_dir().and_then(CacheManager::new);
    match result {
        Ok(cache) => Some(Arc::new(cache)),
        Err(e) => {
            warn!(error = %e, "Cache unavailable, views will not be snapshotted");
            None
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

fn print_session(session: &TourSession) {
    let tour = session.tour();
    println!("Tour {} at {} on {}", tour.id, tour.location, tour.date);
    for (index, group) in session.groups().iter().enumerate() {
        let guide = group
            .guide_id
            .as_deref()
            .and_then(|id| session.directory().get(id))
            .map(|g| g.name.as_str())
            .unwrap_or("no guide");
        println!(
            "  {}. {} [{}] {} people, {}",
            index + 1,
            group.name,
            format_time(group.entry_time),
            format_counts(group.size, group.child_count),
            guide
        );
    }
}

fn snapshot_tour(cache: Option<&CacheManager>, session: &TourSession) {
    let Some(cache) = cache else {
        return;
    };
    let tour = Tour {
        tour_groups: session.groups().to_vec(),
        ..session.tour().clone()
    };
    if let Err(e) = cache.save_tour(&tour).and_then(|_| cache.save_guides(session.directory().guides())) {
        warn!(tour_id = %tour.id, error = %e, "Failed to snapshot tour");
    }
}

async fn run(cli: Cli, ctx: EngineContext, cache: Option<&CacheManager>) -> Result<()> {
    let mut session = TourSession::load(ctx.clone(), cli.tour_id())
        .await
        .with_context(|| format!("Failed to load tour {}", cli.tour_id()))?;
    let mut allocator = ctx.allocator();

    match &cli.command {
        Command::Requirement { .. } => {
            print_session(&session);
            let need = session.required_tickets();
            println!("Tickets: {} adult, {} child ({} total)", need.adult, need.child, need.total());
            snapshot_tour(cache, &session);
        }
        Command::Candidates { tour } => {
            let required = session.required_tickets().total();
            let candidates = allocator.candidates(session.tour().date, tour, required).await?;
            if let Some(cache) = cache {
                if let Err(e) = cache.save_buckets(&candidates) {
                    warn!(error = %e, "Failed to snapshot buckets");
                }
            }
            if candidates.is_empty() {
                println!("No bucket on {} can supply {} tickets", session.tour().date, required);
            }
            for bucket in candidates {
                println!(
                    "{}  {}  {:?}  {} left  access {}",
                    bucket.id,
                    bucket.reference,
                    bucket.bucket_type,
                    bucket.remaining(),
                    format_time(bucket.access_time)
                );
            }
        }
        Command::AssignBucket { bucket, tour } => {
            let required = session.required_tickets().total();
            let updated = allocator.assign(bucket, tour, required).await?;
            println!("Assigned {} tickets from {} ({})", required, updated.reference, updated.display_usage());
        }
        Command::ReleaseBucket { bucket, tour } => {
            let updated = allocator.release(bucket, tour).await?;
            println!("Released tour {} from {} ({})", tour, updated.reference, updated.display_usage());
        }
        Command::Move { participant, from, to, .. } => {
            let outcome = session.move_participant(participant, *from, *to).await?;
            if outcome.is_noop() {
                println!("Participant is already in group {}", from + 1);
            }
            print_session(&session);
        }
        Command::AssignGuide { group, reference, .. } => {
            session.assign_guide(*group, &GuideRef::parse(reference)).await?;
            print_session(&session);
        }
        Command::CorrectCounts { participant, count, children, .. } => {
            session.correct_counts(participant, *count, *children).await?;
            print_session(&session);
        }
        Command::Resync { .. } => {
            session.resync().await?;
            snapshot_tour(cache, &session);
            print_session(&session);
        }
    }

    if session.needs_resync() || allocator.needs_resync() {
        println!("Some changes could not be saved; run `guidepost resync {}`", session.tour().id);
    }
    Ok(())
}

fn print_notification(notification: &Notification) {
    let tag = match notification.severity {
        Severity::Success => "ok",
        Severity::Warning => "warning",
        Severity::Error => "error",
    };
    eprintln!("[{}] {}", tag, notification.message);
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = Config::load().context("Failed to load configuration")?;
    let _guard = init_tracing(&config);

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{}", USAGE);
        return Ok(());
    }
    let cli = match Cli::parse(&args) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };
    info!(command = ?cli.command, offline = cli.offline, "Guidepost starting");

    let store = open_store(&cli, &config)?;
    let cache = open_cache(&config);
    let sink: Arc<dyn CacheInvalidator> = match &cache {
        Some(cache) => Arc::clone(cache) as Arc<dyn CacheInvalidator>,
        None => Arc::new(NoopInvalidator),
    };
    let queue = Arc::new(InvalidationQueue::new(sink, config.invalidation_delay()));
    let (notifier, mut notifications) = ChannelNotifier::new(NOTIFICATION_BUFFER);
    let ctx = EngineContext::from_config(&config, store, queue.clone(), Arc::new(notifier));

    let result = run(cli, ctx, cache.as_deref()).await;

    // Pending invalidations would be aborted on exit.
    queue.flush();
    while let Ok(notification) = notifications.try_recv() {
        print_notification(&notification);
    }
    result
}
