//! respool CLI: drive the controller over a YAML world file.

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use respool_alloc::{covered_total, select_claims_covering_usage_greedy, Decision};
use respool_controller::admission::check_migration;
use respool_controller::{admit, Context, Controller, PoolReconciler};
use respool_core::claim::Claim;
use respool_core::config::{ConfigOverrides, ControllerConfig};
use respool_core::quantity::exhaustion_percent;
use respool_core::resources::ResourceList;
use respool_store::{MemoryStore, NamespaceSelector, World};

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Parser)]
#[command(name = "respool")]
#[command(about = "Multi-tenant resource pool controller", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run controller passes over a world file and print the resulting world
    Run {
        /// Path to the world YAML file
        #[arg(short, long)]
        state: PathBuf,

        /// Number of passes to run
        #[arg(long, default_value_t = 1)]
        cycles: u32,

        /// Keep reconciling on the resync interval until Ctrl-C
        #[arg(long, conflicts_with = "cycles")]
        follow: bool,

        /// Write the resulting world here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Parse a world file and run admission checks on every claim
    Validate {
        #[arg(short, long)]
        state: PathBuf,
    },

    /// Show the decisions one pool cycle would make, without writing them
    Explain {
        #[arg(short, long)]
        state: PathBuf,

        #[arg(short, long)]
        pool: String,
    },

    /// Pick the bound claims that best explain an observed usage vector
    Coverage {
        #[arg(short, long)]
        state: PathBuf,

        /// Observed usage, e.g. cpu=1500m,memory=2Gi
        #[arg(short, long)]
        usage: String,

        /// Only consider claims in this namespace
        #[arg(short, long)]
        namespace: Option<String>,

        /// Only consider claims bound to this pool
        #[arg(short, long)]
        pool: Option<String>,
    },
}

/// Controller settings from the command line; these beat the world file.
#[derive(Args, Debug, Default)]
struct ConfigArgs {
    /// Retries after an optimistic-concurrency conflict
    #[arg(long)]
    conflict_max_retries: Option<usize>,

    /// First conflict backoff (ms)
    #[arg(long)]
    conflict_initial_backoff_ms: Option<u64>,

    /// Conflict backoff ceiling (ms)
    #[arg(long)]
    conflict_max_backoff_ms: Option<u64>,

    /// Pools (and claims) reconciled concurrently
    #[arg(long)]
    max_parallel_pools: Option<usize>,

    /// Mirror writes in flight per pool
    #[arg(long)]
    max_parallel_mirrors: Option<usize>,

    /// Seconds between passes with --follow
    #[arg(long)]
    resync_interval_secs: Option<u64>,
}

impl From<ConfigArgs> for ConfigOverrides {
    fn from(a: ConfigArgs) -> Self {
        ConfigOverrides {
            conflict_max_retries: a.conflict_max_retries,
            conflict_initial_backoff_ms: a.conflict_initial_backoff_ms,
            conflict_max_backoff_ms: a.conflict_max_backoff_ms,
            max_parallel_pools: a.max_parallel_pools,
            max_parallel_mirrors: a.max_parallel_mirrors,
            resync_interval_secs: a.resync_interval_secs,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            state,
            cycles,
            follow,
            output,
            config,
        } => run_world(&state, cycles, follow, output.as_deref(), config.into()).await,
        Commands::Validate { state } => match validate_world(&state).await {
            Ok(()) => {
                println!("✓ World is valid");
                Ok(())
            }
            Err(e) => {
                eprintln!("Validation failed: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Explain { state, pool } => explain_pool(&state, &pool).await,
        Commands::Coverage {
            state,
            usage,
            namespace,
            pool,
        } => coverage(&state, &usage, namespace.as_deref(), pool.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// env, then the world file's `config:` block, then command-line flags.
fn resolve_config(file: &ConfigOverrides, cli: &ConfigOverrides) -> ControllerConfig {
    let mut config = ControllerConfig::from_env();
    file.apply(&mut config);
    cli.apply(&mut config);
    config
}

fn load(state: &Path) -> CliResult<(World, Arc<MemoryStore>)> {
    let world = World::load(state)?;
    let store = Arc::new(MemoryStore::from_world(&world)?);
    Ok((world, store))
}

async fn run_world(
    state: &Path,
    cycles: u32,
    follow: bool,
    output: Option<&Path>,
    flags: ConfigOverrides,
) -> CliResult<()> {
    let (world, store) = load(state)?;
    let config = resolve_config(&world.config, &flags);
    let controller = Controller::new(Context::new(Arc::clone(&store), config)?);

    if follow {
        controller
            .run(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!(error = %e, "cannot listen for Ctrl-C; stopping");
                }
            })
            .await?;
    } else {
        for pass in 1..=cycles {
            let report = controller.run_once().await?;
            for pool in &report.pools {
                let (mut bound, mut queued, mut exhausted) = (0usize, 0usize, 0usize);
                for d in &pool.decisions {
                    match d.decision {
                        Decision::AlreadyBound | Decision::Bound => bound += 1,
                        Decision::Queued { .. } => queued += 1,
                        Decision::Exhausted { .. } => exhausted += 1,
                    }
                }
                eprintln!(
                    "pass {}: pool {}: {} bound, {} queued, {} exhausted, {} disassociated{}",
                    pass,
                    pool.pool,
                    bound,
                    queued,
                    exhausted,
                    pool.gc.disassociated.len(),
                    pool.digest
                        .as_ref()
                        .map(|f| format!(", digest {}", f.short()))
                        .unwrap_or_default(),
                );
            }
            for (subject, err) in &report.failures {
                eprintln!("pass {}: {} failed: {}", pass, subject, err);
            }
        }
    }

    let mut result = store.snapshot().await;
    result.config = world.config;
    let yaml = result.to_yaml()?;
    match output {
        Some(path) => fs::write(path, yaml)?,
        None => print!("{}", yaml),
    }
    Ok(())
}

async fn validate_world(state: &Path) -> CliResult<()> {
    let (world, store) = load(state)?;
    let mut failures = 0usize;

    for claim in world.claims.iter().filter(|c| c.is_active()) {
        let verdict = match check_migration(claim) {
            Err(e) => Err(e),
            Ok(()) if claim.is_bound() => Ok(()),
            Ok(()) => {
                let mut pool = world
                    .pools
                    .iter()
                    .find(|p| p.name() == claim.spec.pool.trim())
                    .cloned();
                if let Some(p) = pool.as_mut() {
                    p.status.namespaces = store.matching_namespaces(&p.spec.selectors).await?;
                }
                admit(claim, pool.as_ref()).map(|_| ())
            }
        };
        if let Err(reason) = verdict {
            failures += 1;
            println!("✗ {}: {}", claim.object_ref(), reason);
        }
    }

    if failures > 0 {
        return Err(format!("{} claim(s) failed admission", failures).into());
    }
    Ok(())
}

async fn explain_pool(state: &Path, pool_name: &str) -> CliResult<()> {
    let (world, store) = load(state)?;
    let config = resolve_config(&world.config, &ConfigOverrides::default());
    let planner = PoolReconciler::new(Context::new(store, config)?);
    let outcome = planner.plan(pool_name).await?;

    let title = format!("Allocation plan for pool {}", pool_name);
    println!("{}", title);
    println!("{}", "=".repeat(title.len()));
    println!();
    println!("Hard:      {}", outcome.ledger.hard());
    println!("Claimed:   {}", outcome.ledger.claimed());
    println!("Available: {}", outcome.ledger.available());
    println!("Digest:    {}", outcome.digest()?);
    let over = outcome.overcommitted();
    if !over.is_empty() {
        let names: Vec<&str> = over.iter().map(|n| n.as_str()).collect();
        println!("Over-committed: {}", names.join(", "));
    }
    println!();

    if !outcome.exhaustions.is_empty() {
        println!("Exhaustion:");
        for (name, ex) in &outcome.exhaustions {
            let pct = exhaustion_percent(ex.requesting, ex.available)
                .map(|p| format!(" ({:.0}%)", p))
                .unwrap_or_default();
            println!(
                "  {}: requesting {} of {} available{}",
                name, ex.requesting, ex.available, pct
            );
        }
        println!();
    }

    println!("Decisions (priority order):");
    for (i, d) in outcome.decisions.iter().enumerate() {
        println!(
            "  {}. {}/{} {} - {}",
            i + 1,
            d.namespace,
            d.name,
            d.decision.reason(),
            d.decision.message(pool_name)
        );
    }
    Ok(())
}

fn coverage(state: &Path, usage: &str, namespace: Option<&str>, pool: Option<&str>) -> CliResult<()> {
    let world = World::load(state)?;
    let usage = ResourceList::parse_compact(usage)?;
    let candidates = coverage_candidates(&world.claims, namespace, pool);
    let selection = select_claims_covering_usage_greedy(&usage, &candidates);

    println!("Usage:     {}", usage);
    println!("Covered:   {}", covered_total(&selection));
    println!("Selected ({} of {} candidates):", selection.selected.len(), candidates.len());
    for claim in &selection.selected {
        println!("  {} {}", claim.object_ref(), claim.spec.resource_claims);
    }
    if !selection.is_complete() {
        println!("Unexplained: {}", selection.unexplained);
    }
    Ok(())
}

/// Active, bound claims, narrowed by namespace and bound pool when given.
fn coverage_candidates(claims: &[Claim], namespace: Option<&str>, pool: Option<&str>) -> Vec<Claim> {
    claims
        .iter()
        .filter(|c| c.is_active() && c.is_bound())
        .filter(|c| namespace.map_or(true, |ns| c.namespace() == ns))
        .filter(|c| {
            pool.map_or(true, |p| {
                c.status.pool.as_ref().is_some_and(|bound| bound.name == p)
            })
        })
        .cloned()
        .collect()
}
