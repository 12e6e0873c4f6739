//! stackweave CLI - synthesize infrastructure manifests

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;

use stackweave::{FixSuggestion, Manifest, OutputFormat, StackError, SynthConfig};

#[derive(Parser)]
#[command(name = "stackweave")]
#[command(about = "Synthesize infrastructure manifests into resolved templates")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./stackweave.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a manifest and print the template
    Synth {
        /// Path to manifest YAML file
        file: PathBuf,

        /// Output format
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,

        /// Write the template to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Resolve a manifest and report problems without printing the template
    Validate {
        /// Path to manifest YAML file
        file: PathBuf,
    },
}

fn main() {
    // Logs go to stderr so templates on stdout stay clean
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        Commands::Synth {
            file,
            format,
            output,
        } => synth(&file, format, output.as_deref(), config),
        Commands::Validate { file } => validate(&file, config),
    });

    if let Err(e) = result {
        report_error(&e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<SynthConfig> {
    let config = match path {
        Some(path) => SynthConfig::load(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None => SynthConfig::discover(Path::new("."))?,
    };
    Ok(config.with_env())
}

fn load_manifest(file: &Path) -> Result<Manifest> {
    let yaml = fs::read_to_string(file)
        .with_context(|| format!("Failed to read manifest {:?}", file))?;
    Manifest::from_yaml(&yaml).with_context(|| format!("Failed to parse manifest {:?}", file))
}

fn synth(
    file: &Path,
    format: Option<OutputFormat>,
    output: Option<&Path>,
    config: SynthConfig,
) -> Result<()> {
    let manifest = load_manifest(file)?;
    let mut tree = manifest.build()?;
    let template = tree.synthesize_with(&config)?;
    let rendered = template.render(format.unwrap_or(config.format))?;

    match output {
        Some(path) => {
            fs::write(path, &rendered)
                .with_context(|| format!("Failed to write template {:?}", path))?;
            eprintln!(
                "{} Wrote {} resources to {}",
                "✓".green(),
                template.node_count(),
                path.display()
            );
        }
        None => println!("{}", rendered),
    }
    Ok(())
}

fn validate(file: &Path, config: SynthConfig) -> Result<()> {
    let manifest = load_manifest(file)?;
    let mut tree = manifest.build()?;
    tree.synthesize_with(&config)?;

    println!("{} Manifest '{}' is valid", "✓".green(), file.display());
    println!("  Name: {}", manifest.name);
    println!("  Resources: {}", manifest.resource_count());
    Ok(())
}

fn report_error(e: &anyhow::Error) {
    let Some(err) = e.downcast_ref::<StackError>() else {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        return;
    };

    match err.report() {
        Some(report) => {
            eprintln!(
                "{} [{}] Synthesis found {} problem(s)",
                "Error:".red().bold(),
                err.code(),
                report.len()
            );
            for issue in report.iter() {
                eprintln!(
                    "  {} {} [{}]: {}",
                    "-".red(),
                    issue.node.bold(),
                    issue.kind,
                    issue.message
                );
            }
        }
        None => eprintln!("{} {:#}", "Error:".red().bold(), e),
    }

    if let Some(suggestion) = err.fix_suggestion() {
        eprintln!("  {} {}", "Fix:".yellow(), suggestion);
    }
}
