mod fixture;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use council_coordination::{CouncilConfig, ExpertRoster, HttpExpert, Orchestrator};
use fixture::Fixture;

/// Run one expert-council orchestration and print the result as JSON.
#[derive(Debug, Parser)]
#[command(name = "council-runner", version)]
struct Cli {
    /// Council configuration (TOML).
    #[arg(long)]
    config: PathBuf,

    /// Event fixture (JSON): event, registry, records, participants, standings.
    #[arg(long)]
    fixture: PathBuf,

    /// Write the result here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = CouncilConfig::load(&cli.config)
        .with_context(|| format!("failed to load config {}", cli.config.display()))?;
    let fixture = Fixture::load(&cli.fixture)?;
    let profiles = config.profiles()?;

    let mut roster = ExpertRoster::new();
    for (entry, profile) in config.experts.iter().zip(&profiles) {
        let endpoint = entry
            .endpoint
            .as_deref()
            .with_context(|| format!("expert {} has no endpoint", entry.id))?;
        let expert = HttpExpert::new(endpoint, profile.timeout())
            .with_context(|| format!("failed to build client for {}", entry.id))?;
        info!(expert_id = %entry.id, endpoint, "Expert seated");
        roster.insert(entry.id.clone(), Arc::new(expert));
    }

    let orchestrator = Orchestrator::from_config(
        &config,
        fixture.store(),
        fixture.knowledge(),
        roster,
        fixture.standings(),
    );

    info!(
        event_id = %fixture.event.id,
        experts = profiles.len(),
        "Council run starting"
    );
    let result = orchestrator
        .run(&fixture.event.id, Arc::new(fixture.registry.clone()), &profiles)
        .await?;

    let json = serde_json::to_string_pretty(&result)?;
    match &cli.output {
        Some(path) => {
            std::fs::write(path, &json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "Result written");
        }
        None => println!("{}", json),
    }

    info!(
        run_id = %result.run_id,
        degraded_service = result.degraded_service,
        "Council run complete"
    );
    Ok(())
}
