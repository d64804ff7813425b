use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::Parser;
use serde::Serialize;
use tracing::info;

use modwire::{Container, ContainerConfig, ResolutionReport, RevisionId, UniverseDescriptor};

mod cli;

use cli::{Format, Modwire};

#[derive(Serialize)]
struct WiringOutput {
    revision: String,
    fragments: Vec<RevisionId>,
    wires: Vec<String>,
}

#[derive(Serialize)]
struct Output<'a> {
    wirings: Vec<WiringOutput>,
    report: &'a ResolutionReport,
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "modwire=debug" } else { "modwire=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: Modwire) -> anyhow::Result<bool> {
    let config = match &args.config {
        Some(path) => ContainerConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ContainerConfig::default(),
    };
    let universe = UniverseDescriptor::load(&args.universe)
        .with_context(|| format!("Failed to load universe {}", args.universe.display()))?;

    let container = Container::builder(config).build()?;
    for descriptor in universe.revisions {
        let name = descriptor.symbolic_name.clone();
        container
            .install(descriptor)
            .with_context(|| format!("Failed to install {}", name))?;
    }

    let revisions = container.revisions();
    let mut triggers = Vec::new();
    for name in &args.triggers {
        let matching: Vec<RevisionId> = revisions
            .iter()
            .filter(|r| &r.symbolic_name == name)
            .map(|r| r.id)
            .collect();
        if matching.is_empty() {
            bail!("No revision named {}", name);
        }
        triggers.extend(matching);
    }
    if triggers.is_empty() {
        triggers = revisions.iter().map(|r| r.id).collect();
    }
    info!(revisions = revisions.len(), triggers = triggers.len(), "resolving");

    let report = container.resolve(&triggers, args.mandatory)?;
    println!("{}", report);

    let output = Output {
        wirings: container
            .wirings()
            .iter()
            .map(|wiring| WiringOutput {
                revision: container
                    .revision(wiring.revision)
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| wiring.revision.to_string()),
                fragments: wiring.fragments.clone(),
                wires: wiring.required_wires.iter().map(ToString::to_string).collect(),
            })
            .collect(),
        report: &report,
    };
    match args.format {
        Format::Yaml => {
            let content = serde_yaml::to_string(&output).context("Failed to serialize wirings")?;
            println!("---");
            println!("{}", content);
        }
        Format::Json => {
            let content =
                serde_json::to_string_pretty(&output).context("Failed to serialize wirings")?;
            println!("{}", content);
        }
    }

    Ok(triggers
        .iter()
        .all(|id| report.entries_for(*id).is_empty()))
}

fn main() -> ExitCode {
    let args = Modwire::parse();
    init_logging(args.verbose);

    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
