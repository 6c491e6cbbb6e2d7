use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use futures::future::join_all;
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use docguard::config::{GuardSettings, LoggingConfig};
use docguard::guard::GuardedStore;
use docguard::ratelimit::{Behavior, LimitConfigUpdate, Operation, RateLimiter};
use docguard::store::{CollectionRef, DocumentRef, DocumentStore, MemoryStore, StoreError};

/// Dry-run document database rate limits.
#[derive(Parser, Debug)]
#[command(name = "docguard", version, about)]
struct Cli {
    /// Settings file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit JSON logs
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the effective limits
    Check,
    /// Replay a burst of calls through the guard against an in-memory store
    Simulate(SimulateArgs),
}

#[derive(Args, Debug)]
struct SimulateArgs {
    /// Operation kind to issue
    #[arg(long, value_enum, default_value = "read")]
    op: OpArg,

    /// Document path (reads/sets it) or collection path (queries/adds to it)
    #[arg(long, default_value = "users/alice")]
    path: String,

    /// Number of calls
    #[arg(long, default_value_t = 10)]
    count: u32,

    /// Pause between sequential calls
    #[arg(long, default_value_t = 0)]
    interval_ms: u64,

    /// Issue every call at once instead of one after another
    #[arg(long)]
    concurrent: bool,

    /// Override the configured behavior
    #[arg(long, value_enum)]
    behavior: Option<BehaviorArg>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OpArg {
    Read,
    Write,
}

impl From<OpArg> for Operation {
    fn from(op: OpArg) -> Self {
        match op {
            OpArg::Read => Operation::Read,
            OpArg::Write => Operation::Write,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BehaviorArg {
    Throw,
    Queue,
    Log,
}

impl From<BehaviorArg> for Behavior {
    fn from(behavior: BehaviorArg) -> Self {
        match behavior {
            BehaviorArg::Throw => Behavior::Throw,
            BehaviorArg::Queue => Behavior::Queue,
            BehaviorArg::Log => Behavior::Log,
        }
    }
}

/// What the simulated calls target.
enum Target {
    Document(DocumentRef),
    Collection(CollectionRef),
}

impl Target {
    fn parse(path: &str) -> anyhow::Result<Self> {
        if let Ok(doc) = DocumentRef::new(path) {
            return Ok(Target::Document(doc));
        }
        let collection = CollectionRef::new(path)
            .with_context(|| format!("'{}' is neither a document nor a collection path", path))?;
        Ok(Target::Collection(collection))
    }
}

type Store = GuardedStore<MemoryStore, RateLimiter>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => GuardSettings::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => GuardSettings::default(),
    };

    init_tracing(&settings.logging, cli.json);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let limiter = Arc::new(RateLimiter::with_config(settings.limits));

    match cli.command {
        Command::Check => {
            let config = limiter.config();
            println!("window_ms: {}", config.global.window_ms);
            println!("behavior: {:?}", config.behavior);
            println!(
                "global: read={} write={}",
                describe(config.global.read),
                describe(config.global.write)
            );
            let mut paths: Vec<_> = config.per_collection.iter().collect();
            paths.sort_by(|a, b| a.0.cmp(b.0));
            for (path, limits) in paths {
                println!(
                    "{}: read={} write={}",
                    path,
                    describe(limits.read),
                    describe(limits.write)
                );
            }
        }
        Command::Simulate(args) => simulate(limiter, args).await?,
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if json || logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn describe(limit: Option<u64>) -> String {
    limit.map_or_else(|| "unlimited".to_string(), |l| l.to_string())
}

async fn simulate(limiter: Arc<RateLimiter>, args: SimulateArgs) -> anyhow::Result<()> {
    let violations = Arc::new(AtomicU64::new(0));
    let seen = violations.clone();
    let mut update = LimitConfigUpdate::new().on_limit_exceeded(move |_| {
        seen.fetch_add(1, Ordering::Relaxed);
    });
    if let Some(behavior) = args.behavior {
        update = update.behavior(behavior.into());
    }
    limiter.configure(update);

    let store: Store = GuardedStore::new(MemoryStore::new(), limiter.clone());
    let target = Target::parse(&args.path)?;
    let op = Operation::from(args.op);

    info!(
        op = %op,
        path = %args.path,
        count = args.count,
        concurrent = args.concurrent,
        "Starting simulation"
    );

    let started = Instant::now();
    let outcomes = if args.concurrent {
        join_all((0..args.count).map(|seq| attempt(&store, &target, op, seq))).await
    } else {
        let mut outcomes = Vec::with_capacity(args.count as usize);
        for seq in 0..args.count {
            if seq > 0 && args.interval_ms > 0 {
                tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
            }
            outcomes.push(attempt(&store, &target, op, seq).await);
        }
        outcomes
    };

    let admitted = outcomes.iter().filter(|o| o.is_ok()).count();
    let rejected = outcomes
        .iter()
        .filter(|o| matches!(o, Err(StoreError::Limit(_))))
        .count();

    info!(
        admitted = admitted,
        rejected = rejected,
        violations = violations.load(Ordering::Relaxed),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Simulation finished"
    );
    println!(
        "admitted={} rejected={} violations={} elapsed_ms={}",
        admitted,
        rejected,
        violations.load(Ordering::Relaxed),
        started.elapsed().as_millis()
    );

    Ok(())
}

async fn attempt(store: &Store, target: &Target, op: Operation, seq: u32) -> Result<(), StoreError> {
    let data = json!({ "seq": seq })
        .as_object()
        .cloned()
        .unwrap_or_default();

    let result = match (op, target) {
        (Operation::Read, Target::Document(doc)) => store.get_doc(doc).await.map(|_| ()),
        (Operation::Read, Target::Collection(collection)) => {
            store.get_docs(&collection.query()).await.map(|_| ())
        }
        (Operation::Write, Target::Document(doc)) => store.set_doc(doc, data).await,
        (Operation::Write, Target::Collection(collection)) => {
            store.add_doc(collection, data).await.map(|_| ())
        }
    };

    match &result {
        Ok(()) => debug!(seq = seq, "Call admitted"),
        Err(e) => warn!(seq = seq, error = %e, "Call failed"),
    }
    result
}
