use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum Format {
    #[default]
    Yaml,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "modwire")]
#[command(about = "Resolve a universe of module revisions and print the wiring")]
pub struct Modwire {
    /// YAML file listing revision descriptors in install order
    #[arg(long)]
    pub universe: PathBuf,

    /// Container configuration (system revision, resolver settings)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Commit nothing unless every trigger resolves
    #[arg(long)]
    pub mandatory: bool,

    /// Symbolic name of a revision to resolve; defaults to every installed revision
    #[arg(long = "trigger", value_name = "SYMBOLIC_NAME")]
    pub triggers: Vec<String>,

    /// Output format for the wiring document
    #[arg(long, value_enum, default_value_t = Format::Yaml)]
    pub format: Format,

    /// Log resolver decisions at debug level
    #[arg(short, long)]
    pub verbose: bool,
}
