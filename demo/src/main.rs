//! Conclave renewable-energy reference deployment: demo CLI
//!
//! Runs the standard investment pipeline, the competitive country ranking,
//! or both, and lists the registered agents. Every scenario uses the real
//! Conclave components (registry, workflow engine, trace sink) wired to mock
//! energy data.
//!
//! Usage:
//!   cargo run -p demo -- run-all
//!   cargo run -p demo -- standard --countries USA,Germany,Spain
//!   cargo run -p demo -- competitive --research research.json
//!   cargo run -p demo -- agents --capability peer_review

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use conclave_contracts::{capability::Capability, error::ConclaveResult};
use conclave_core::AgentFilter;
use conclave_ref_energy::{
    agents::{all_agents, build_registry},
    scenarios::{competitive, standard_pipeline, ScenarioOptions},
};

// ── CLI definition ────────────────────────────────────────────────────────────

/// Conclave multi-agent orchestration: renewable-energy demo.
///
/// Each subcommand runs one or both workflows over a set of countries,
/// showing stage routing, fan-out, competitive ranking, and trace integrity.
#[derive(Parser)]
#[command(
    name = "demo",
    about = "Conclave renewable-energy reference demo",
    long_about = "Runs Conclave energy scenarios showing the workflow state machine,\n\
                  concurrent agent fan-out, competitive peer ranking, and trace chain integrity."
)]
struct Cli {
    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct RunArgs {
    /// Policy TOML to use instead of the embedded energy policy.
    #[arg(long, global = true)]
    policy: Option<PathBuf>,

    /// JSON file of research context records.
    #[arg(long, global = true)]
    research: Option<PathBuf>,

    /// Comma-separated country names or ISO3 codes.
    #[arg(long, global = true, value_delimiter = ',')]
    countries: Vec<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Run both workflows in sequence.
    RunAll,
    /// Scenario 1: Standard Investment Pipeline (load, analyze, aggregate, rank).
    Standard,
    /// Scenario 2: Competitive Country Ranking (peer review and hot seat).
    Competitive,
    /// List the registered agents.
    Agents {
        /// Only agents with this capability (e.g. peer_review).
        #[arg(long, value_parser = parse_capability)]
        capability: Option<Capability>,

        /// Only agents whose id, name, description, or tags match.
        #[arg(long)]
        search: Option<String>,
    },
}

fn parse_capability(s: &str) -> Result<Capability, String> {
    Capability::ALL
        .into_iter()
        .find(|c| c.as_str() == s)
        .ok_or_else(|| {
            let names: Vec<&str> = Capability::ALL.iter().map(Capability::as_str).collect();
            format!("unknown capability '{s}'; expected one of: {}", names.join(", "))
        })
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Initialize structured logging.  Set RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    let options = ScenarioOptions {
        policy: cli.run.policy,
        research: cli.run.research,
        countries: cli.run.countries,
    };

    print_banner();

    let result = match cli.command {
        Command::RunAll => run_all(&options).await,
        Command::Standard => standard_pipeline::run_scenario(&options).await,
        Command::Competitive => competitive::run_scenario(&options).await,
        Command::Agents { capability, search } => list_agents(&options, capability, search.as_deref()),
    };

    match result {
        Ok(()) => {
            println!("All selected scenarios completed successfully.");
        }
        Err(e) => {
            eprintln!("Demo error: {}", e);
            std::process::exit(1);
        }
    }
}

// ── Scenario dispatch ─────────────────────────────────────────────────────────

async fn run_all(options: &ScenarioOptions) -> ConclaveResult<()> {
    standard_pipeline::run_scenario(options).await?;
    competitive::run_scenario(options).await?;
    Ok(())
}

fn list_agents(options: &ScenarioOptions, capability: Option<Capability>, search: Option<&str>) -> ConclaveResult<()> {
    let policy = options.policy()?;
    let registry = build_registry(all_agents(), policy.registry.on_duplicate)?;

    let agents = match (capability, search) {
        (_, Some(query)) => registry
            .search(query)
            .into_iter()
            .filter(|d| capability.map_or(true, |c| d.has_capability(c)))
            .collect(),
        (Some(c), None) => registry.list_agents(&AgentFilter::capability(c)),
        (None, None) => registry.list_agents(&AgentFilter::default()),
    };

    println!("=== Registered Agents ===");
    println!();
    for d in &agents {
        let caps: Vec<&str> = d.capabilities.all().map(|c| c.as_str()).collect();
        println!(
            "  {:<18} {:<24} {:<15} {:<14} [{}]",
            d.id.as_str(),
            d.name,
            d.execution_model.to_string(),
            d.business_unit.as_deref().unwrap_or("-"),
            caps.join(", ")
        );
    }
    println!();

    let stats = registry.statistics();
    println!("  Total agents:           {}", stats.total_agents);
    println!("  Enabled agents:         {}", stats.enabled_agents);
    for (unit, count) in &stats.by_business_unit {
        println!("    {:<20} {}", unit, count);
    }
    println!();
    Ok(())
}

// ── Banner ────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("Conclave: Multi-Agent Orchestration Core");
    println!("Renewable-Energy Reference Demo");
    println!("=========================================");
    println!();
    println!("Per stage, the workflow engine:");
    println!("  [1] Checks the stage's required fields are present");
    println!("  [2] Resolves agents by capability from the registry");
    println!("  [3] Fans out over entities with bounded concurrency and per-agent timeouts");
    println!("  [4] Merges keyed results into the workflow state");
    println!("  [5] Routes to the next stage and appends a hash-chained trace record");
    println!();
}
