//! mendlog CLI: check repair rules and run them against recorded facts.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use mendlog::module::PredicateKind;
use mendlog::{
    EngineConfig, InMemoryRepairExecutor, MendError, MendResult, Module, QueryContext,
    QueryDispatcher, QueryOptions, RepairExecutor, RepairFacts, RepairPredicates,
};

#[derive(Parser)]
#[command(name = "mendlog", version, about = "Rule-driven repair decisions")]
struct Cli {
    /// Engine configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a rule file and list its predicates.
    Check {
        /// Rule file.
        rules: PathBuf,
    },

    /// Decide a repair for recorded facts, without touching any cluster.
    Run {
        /// Rule file.
        rules: PathBuf,

        /// Repair facts (TOML table, e.g. `ErrorCode = "FO001"`).
        #[arg(long)]
        facts: PathBuf,
    },

    /// Print the solutions of an arbitrary goal.
    Query {
        /// Rule file.
        rules: PathBuf,

        /// Goal, e.g. `member(?X, [1, 2])`.
        goal: String,

        /// Maximum number of solutions to print.
        #[arg(long, default_value = "10")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> MendResult<()> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Check { rules } => {
            let module = compile(&rules, RepairFacts::default(), &config)?;
            println!("{} ({})", module.name(), module.fingerprint());
            for p in module.predicates() {
                let kind = match p.kind {
                    PredicateKind::Rules => "rules",
                    PredicateKind::Dynamic => "dynamic",
                };
                println!("  {:<32} {:<8} {} clause(s)", p.name, kind, p.clauses.len());
            }
        }
        Commands::Run { rules, facts } => {
            let text = std::fs::read_to_string(&facts)
                .map_err(|e| MendError::internal(format!("{}: {e}", facts.display())))?;
            let facts = RepairFacts::from_toml_str(&text)?;
            let memory = Arc::new(InMemoryRepairExecutor::new());
            let executor: Arc<dyn RepairExecutor> = memory.clone();
            let mitigated = mendlog::repair::run_repair_file(&rules, facts, executor, &config).await?;
            println!("mitigated: {mitigated}");
            for task in memory.tasks() {
                println!("  {} {} ({})", task.policy.action, task.repair_id, task.id);
            }
        }
        Commands::Query { rules, goal, limit } => {
            let module = compile(&rules, RepairFacts::default(), &config)?;
            let dispatcher =
                QueryDispatcher::new(Arc::new(module)).with_options(QueryOptions::from(&config));
            let mut query = dispatcher.query_text(&goal, QueryContext::new_root())?;
            let mut found = 0;
            while found < limit {
                let Some(solution) = query.next().await? else {
                    break;
                };
                found += 1;
                let bindings: Vec<String> =
                    solution.iter().map(|(name, term)| format!("?{name} = {term}")).collect();
                println!("{}", if bindings.is_empty() { "yes".to_string() } else { bindings.join(", ") });
            }
            if found == 0 {
                println!("no");
            }
        }
    }
    Ok(())
}

fn compile(path: &Path, facts: RepairFacts, config: &EngineConfig) -> MendResult<Module> {
    let executor: Arc<dyn RepairExecutor> = Arc::new(InMemoryRepairExecutor::new());
    let provider = RepairPredicates::new(Arc::new(facts), executor, config.repair.clone()).provider();
    let name = path
        .file_stem()
        .map_or_else(|| "rules".to_string(), |s| s.to_string_lossy().into_owned());
    Ok(Module::load(&name, path, Arc::new(provider))?)
}
