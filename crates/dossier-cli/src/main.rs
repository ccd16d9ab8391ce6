use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use dossier_core::{ChatOptions, EngineConfig, ReportEngine, ReportStatus};
use dossier_llm::{BackendSettings, OpenAiCompatibleGenerator};
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod logging;

fn build_cli() -> Command {
    Command::new("dossier")
        .version(dossier_core::VERSION)
        .about("Generate multi-section reports with a language model")
        .subcommand_required(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Debug logging with span timings"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file; DOSSIER_* variables override it"),
        )
        .subcommand(
            Command::new("generate")
                .about("Generate a report and write it as Markdown")
                .arg(
                    Arg::new("topic")
                        .long("topic")
                        .required(true)
                        .help("Report topic"),
                )
                .arg(
                    Arg::new("requirements")
                        .long("requirements")
                        .default_value("")
                        .help("Extra instructions for the report"),
                )
                .arg(
                    Arg::new("out")
                        .long("out")
                        .value_parser(value_parser!(PathBuf))
                        .help("Copy the rendered report here"),
                ),
        )
        .subcommand(
            Command::new("chat")
                .about("Ask the model a single question")
                .arg(
                    Arg::new("message")
                        .long("message")
                        .short('m')
                        .required(true)
                        .help("Question to ask"),
                )
                .arg(
                    Arg::new("max-tokens")
                        .long("max-tokens")
                        .value_parser(value_parser!(u32))
                        .help("Output size limit"),
                )
                .arg(
                    Arg::new("temperature")
                        .long("temperature")
                        .value_parser(value_parser!(f32))
                        .help("Sampling temperature"),
                )
                .arg(
                    Arg::new("no-thinking")
                        .long("no-thinking")
                        .action(ArgAction::SetTrue)
                        .help("Disable deliberation"),
                ),
        )
        .subcommand(Command::new("config").about("Print the effective configuration"))
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    let base = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            EngineConfig::from_toml_str(&text)?
        }
        None => EngineConfig::default(),
    };
    Ok(base.overlay_env(|key| std::env::var(key).ok())?)
}

async fn connect_backend() -> anyhow::Result<Arc<OpenAiCompatibleGenerator>> {
    let generator = OpenAiCompatibleGenerator::from_env()?;
    if !generator.probe().await {
        bail!(
            "generation backend at {} is not available",
            generator.settings().base_url
        );
    }
    Ok(Arc::new(generator))
}

async fn run_generate(config: EngineConfig, args: &ArgMatches) -> anyhow::Result<()> {
    let topic = args
        .get_one::<String>("topic")
        .map(String::as_str)
        .unwrap_or_default();
    let requirements = args
        .get_one::<String>("requirements")
        .map(String::as_str)
        .unwrap_or_default();
    let out = args.get_one::<PathBuf>("out");

    let polling = config.polling_interval();
    let engine = ReportEngine::new(config, connect_backend().await?)?;
    let sweeper = engine.start_sweeper();

    let created = engine.create_report(topic, requirements)?;
    let id = created.report_id;
    println!("Report {id} accepted");

    let mut last = None;
    let status = loop {
        tokio::select! {
            () = tokio::time::sleep(polling) => {}
            _ = tokio::signal::ctrl_c() => {
                engine.delete(id)?;
                bail!("interrupted; report {id} discarded");
            }
        }

        let status = engine.status(id)?;
        if last != Some((status.status, status.progress)) {
            println!(
                "[{:>3}%] {} ({}/{} sections)",
                status.progress, status.status, status.sections_completed, status.total_sections
            );
            last = Some((status.status, status.progress));
        }
        if status.status.is_terminal() {
            break status;
        }
    };
    sweeper.abort();

    if status.status == ReportStatus::Error {
        bail!(
            "report failed: {}",
            status.error.as_deref().unwrap_or("unknown error")
        );
    }

    let artifact = engine.download(id)?;
    if let Some(summary) = engine.summary(id)?.summary {
        println!(
            "Completed: {} sections, {} characters in {}",
            summary.total_sections,
            summary.total_words,
            summary
                .generation_duration_formatted
                .as_deref()
                .unwrap_or("-")
        );
    }
    match out {
        Some(path) => {
            std::fs::write(path, &artifact.bytes)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Written to {}", path.display());
        }
        None => println!("Written to {}", artifact.path.display()),
    }
    Ok(())
}

async fn run_chat(config: EngineConfig, args: &ArgMatches) -> anyhow::Result<()> {
    let message = args
        .get_one::<String>("message")
        .map(String::as_str)
        .unwrap_or_default();
    let options = ChatOptions {
        max_tokens: args.get_one::<u32>("max-tokens").copied(),
        temperature: args.get_one::<f32>("temperature").copied(),
        deliberation: args.get_flag("no-thinking").then_some(false),
    };

    let engine = ReportEngine::new(config, connect_backend().await?)?;
    let reply = engine.chat(message, options).await?;
    if let Some(thinking) = &reply.thinking {
        tracing::debug!(%thinking, "model deliberation");
    }
    println!("{}", reply.message);
    Ok(())
}

fn run_config(config: &EngineConfig) -> anyhow::Result<()> {
    let llm = BackendSettings::from_env()?;
    println!("{}", config.to_toml_string()?);
    println!("[llm]\n{}", toml::to_string_pretty(&llm)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = build_cli().get_matches();
    logging::init_tracing(matches.get_flag("verbose"))?;

    let config = load_config(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))?;
    tracing::debug!(?config, "configuration loaded");

    match matches.subcommand() {
        Some(("generate", args)) => run_generate(config, args).await,
        Some(("chat", args)) => run_chat(config, args).await,
        Some(("config", _)) => run_config(&config),
        _ => unreachable!("subcommand_required is set"),
    }
}
