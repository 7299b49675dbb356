use anyhow::Result;
use clap::Parser;
use console::style;
use futures::StreamExt;
use std::io::{Write, stdout};
use std::sync::Arc;
use term_assistant::assistant::{AssistOptions, Assistant};
use term_assistant::config::{self, Config};
use term_assistant::confirm::ConsoleGate;
use term_assistant::context::{self, ContextRequest, SystemEnvironment};
use term_assistant::logging;
use term_assistant::provider::{self, ModelSpec, Provider};
use term_assistant::tool_registry::ToolRegistry;
use tracing::{debug, error, warn};

mod cli;

use cli::{Command, ModelsArgs, TalkArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let command = cli::Cli::parse().into_command();
    let verbose = match &command {
        Command::Talk(args) => args.verbose,
        Command::Models(args) => args.verbose,
    };
    logging::init(verbose)?;
    let config = config::load();

    match command {
        Command::Talk(args) => talk(config, args).await,
        Command::Models(args) => list_models(&config, args).await,
    }
}

async fn talk(config: Config, args: TalkArgs) -> Result<()> {
    let prompt = args.prompt_text();
    if prompt.trim().is_empty() {
        warn!("No prompt given.");
        return Ok(());
    }

    let request = ContextRequest {
        system: args.system.clone(),
        no_context: args.no_context,
        no_pwd: args.no_pwd,
        no_shell: args.no_shell,
        no_history: args.no_history,
        history_size: args.history_size,
        all_panes: args.all_panes,
    };
    let messages = context::build_conversation(&config, &request, &SystemEnvironment, &prompt);
    for message in &messages {
        debug!("{}: {}", message.role, message.text());
    }

    if args.dry_run {
        for message in &messages {
            println!("{} {}", style(format!("{}:", message.role)).green(), message.text());
        }
        return Ok(());
    }

    let model = args.model.as_deref().unwrap_or(&config.default_model);
    let spec = match provider::resolve_model(model, args.provider.as_deref(), &config) {
        Ok(spec) => spec,
        Err(e) => {
            warn!("{e}");
            return Ok(());
        }
    };
    debug!("Using model {spec}");

    let mut options = AssistOptions::from(&config.generation);
    if args.temperature.is_some() {
        options.temperature = args.temperature;
    }
    if args.top_p.is_some() {
        options.top_p = args.top_p;
    }
    if args.no_tools {
        options.with_tools = false;
    }

    let backend: Arc<dyn Provider> = Arc::from(provider::create_provider(&spec, &config)?);
    let assistant = Assistant::new(
        backend,
        Arc::new(ToolRegistry::with_builtin_tools()),
        Arc::new(ConsoleGate),
        options,
    );

    let mut fragments = assistant.assist(messages);
    while let Some(fragment) = fragments.next().await {
        match fragment {
            Ok(fragment) => {
                print!("{fragment}");
                stdout().flush()?;
            }
            Err(e) => {
                error!("{e:#}");
                break;
            }
        }
    }
    Ok(())
}

async fn list_models(config: &Config, args: ModelsArgs) -> Result<()> {
    let usable = provider::usable_providers(config);
    if usable.is_empty() {
        warn!("No provider is configured.");
    }
    for kind in usable {
        let spec = ModelSpec {
            kind,
            model: kind.curated_models().first().copied().unwrap_or_default().to_string(),
        };
        let backend = provider::create_provider(&spec, config)?;
        match backend.list_models(args.full).await {
            Ok(models) => {
                println!("{}", style(kind).green().bold());
                for model in models {
                    println!("  {kind}/{model}");
                }
            }
            Err(e) => warn!("Cannot list {kind} models: {e:#}"),
        }
    }
    Ok(())
}
