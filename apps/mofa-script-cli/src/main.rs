//! mofa-script command-line tool.
//!
//! Exit codes: 0 on a complete script, 2 on a partial script, 1 on failure.

mod input;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use clap::{Args, Parser, Subcommand};
use eyre::{Context, Result};

use mofa_script::{
    suggest_improvements, CancellationToken, ChannelReporter, ContinuationOrchestrator,
    GenerationOutcome, GenerationRequest, ModelGateway, OpenaiClient, ProgressEvent, ScriptConfig,
    TemplateRegistry, TruncationDetector,
};

const EXIT_PARTIAL: u8 = 2;

#[derive(Parser)]
#[command(
    name = "mofa-script",
    version,
    about = "Generate long-form podcast scripts, lectures and summaries from text documents"
)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a script from one or more text files
    Generate(GenerateArgs),
    /// List the models offered by the configured endpoint
    Models,
    /// List available templates
    Templates,
}

#[derive(Args)]
struct GenerateArgs {
    /// Source documents (.txt or .md)
    #[arg(short, long = "input", required = true, num_args = 1..)]
    inputs: Vec<PathBuf>,

    /// Template name (defaults to the configured template)
    #[arg(short, long)]
    template: Option<String>,

    /// Model id (defaults to the configured model)
    #[arg(short, long)]
    model: Option<String>,

    /// Number of batch parts
    #[arg(long)]
    parts: Option<usize>,

    /// Skip the single-shot attempt and generate in parts
    #[arg(long)]
    batch: bool,

    /// Total dialogue rounds wanted; sizes the batch when --parts is not given
    #[arg(long)]
    target_rounds: Option<u32>,

    /// Steering text for the model
    #[arg(long)]
    feedback: Option<String>,

    /// A previous script to revise
    #[arg(long)]
    edited: Option<PathBuf>,

    /// Write the script here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Skip quality scoring
    #[arg(long)]
    no_score: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let level_from_env = init_logging();

    let config = match &cli.config {
        Some(path) => ScriptConfig::load_from(Some(path.as_path())),
        None => ScriptConfig::load(),
    }
    .context("Failed to load configuration")?;

    // RUST_LOG, when set, wins over the configured level.
    if !level_from_env {
        match level_filter(&config.log_level) {
            Some(level) => log::set_max_level(level),
            None => log::warn!("Unknown log_level '{}', keeping info", config.log_level),
        }
    }

    let templates = TemplateRegistry::from_config(&config.templates)
        .context("Failed to build template registry")?;

    match cli.command {
        Commands::Generate(args) => generate(config, templates, args).await,
        Commands::Models => list_models(&config).await,
        Commands::Templates => {
            for template in templates.iter() {
                println!("{:<16} {}", template.name, template.description);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Start logging before the configuration is read. Without `RUST_LOG` the
/// logger accepts everything and the global max level (info until the
/// config is loaded) does the filtering. Returns whether `RUST_LOG` was set.
fn init_logging() -> bool {
    let from_env = std::env::var_os(env_logger::DEFAULT_FILTER_ENV).is_some();
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
    if !from_env {
        builder.filter_level(log::LevelFilter::Trace);
    }
    builder.init();
    if !from_env {
        log::set_max_level(log::LevelFilter::Info);
    }
    from_env
}

fn level_filter(level: &str) -> Option<log::LevelFilter> {
    level.trim().parse().ok()
}

async fn list_models(config: &ScriptConfig) -> Result<ExitCode> {
    let gateway = ModelGateway::new(
        Arc::new(OpenaiClient::new(&config.provider)),
        config.retry.clone(),
    );
    let models = gateway
        .list_models(&config.endpoint())
        .await
        .context("Failed to list models")?;
    for model in models {
        println!("{}", model);
    }
    Ok(ExitCode::SUCCESS)
}

async fn generate(
    config: ScriptConfig,
    templates: TemplateRegistry,
    args: GenerateArgs,
) -> Result<ExitCode> {
    let source = input::read_sources(&args.inputs)?;

    let mut params = config.generation.clone();
    if args.parts.is_some() {
        params.num_parts = args.parts;
    }
    if args.target_rounds.is_some() {
        params.target_rounds = args.target_rounds;
    }
    params.force_batch |= args.batch;
    params.score &= !args.no_score;

    let endpoint = config.endpoint();
    if endpoint.api_key.is_empty() {
        log::warn!("No API key configured for provider '{}'", config.provider.id);
    }

    let mut request = GenerationRequest::new(
        source,
        args.template.unwrap_or_else(|| config.default_template.clone()),
        args.model.unwrap_or_else(|| config.default_model.clone()),
        endpoint,
    )
    .with_params(params);
    if let Some(path) = &args.edited {
        let edited = input::read_text(path)?;
        request = request.with_edited_transcript(edited);
    }
    if let Some(feedback) = args.feedback {
        request = request.with_user_feedback(feedback);
    }

    // Progress goes to stderr from its own thread so stdout stays clean.
    let (tx, rx) = crossbeam_channel::unbounded::<ProgressEvent>();
    let printer = thread::spawn(move || {
        for event in rx {
            eprintln!("{}", event);
        }
    });

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, stopping after the current call");
            on_interrupt.cancel();
        }
    });

    let gateway = ModelGateway::new(
        Arc::new(OpenaiClient::new(&config.provider)),
        config.retry.clone(),
    );
    let orchestrator =
        ContinuationOrchestrator::new(gateway, Arc::new(templates), Arc::new(ChannelReporter::new(tx)))
            .with_detector(TruncationDetector::new(config.truncation.clone()));

    let result = orchestrator.generate(&request, &cancel).await;
    // Dropping the orchestrator closes the channel and ends the printer.
    drop(orchestrator);
    if printer.join().is_err() {
        log::debug!("Progress printer panicked");
    }

    let outcome = result.context("Script generation failed")?;
    let code = match &outcome {
        GenerationOutcome::Complete { report, parts, mode, .. } => {
            eprintln!("Done: {} part(s), {} mode", parts, mode);
            if let Some(report) = report {
                eprintln!("Quality: {}", report);
                for suggestion in suggest_improvements(report) {
                    eprintln!("  - {}", suggestion);
                }
            }
            ExitCode::SUCCESS
        }
        GenerationOutcome::Partial {
            completed_parts,
            total_parts,
            reason,
            ..
        } => {
            eprintln!(
                "Partial script: {}/{} part(s) ({})",
                completed_parts, total_parts, reason
            );
            ExitCode::from(EXIT_PARTIAL)
        }
    };

    let transcript = outcome.into_transcript();
    match &args.output {
        Some(path) => std::fs::write(path, &transcript)
            .wrap_err_with(|| format!("Failed to write {}", path.display()))?,
        None => println!("{}", transcript),
    }
    Ok(code)
}
