use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use openrouter_chat::checker::{self, ModelTarget};
use openrouter_chat::models;
use openrouter_chat::relay::{self, RelayState};
use openrouter_chat::{
    ApiKeySource, Backend, ChatMessage, Config, FileStore, OpenRouterClient, SessionStore,
    UpstreamSettings, WriterSink,
};

mod app;
mod handler;
mod tui;
mod ui;

use app::App;
use tui::{EventHandler, Tui};

const LOG_FILE: &str = "orchat.log";

#[derive(Parser)]
#[command(name = "orchat")]
#[command(version, about = "Chat with OpenRouter models in the terminal, or relay them to a local client")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat (the default)
    Chat {
        /// Model id or catalog name
        #[arg(short, long)]
        model: Option<String>,
        /// Talk to a relay started with `orchat serve` instead of OpenRouter
        #[arg(short, long)]
        relay: Option<String>,
    },
    /// Run the streaming relay
    Serve {
        /// Address to listen on
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Ask one question and stream the answer to stdout
    Ask {
        prompt: String,
        #[arg(short, long)]
        model: Option<String>,
        #[arg(short, long)]
        relay: Option<String>,
    },
    /// List models available on OpenRouter
    Models {
        /// Only models that cost nothing
        #[arg(long)]
        free: bool,
        /// Write `id | name` lines to this file
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Check which models answer
    Check {
        /// Model ids or catalog names (default: the built-in catalog)
        ids: Vec<String>,
        /// Read `id | name` lines from this file
        #[arg(short, long, conflicts_with = "ids")]
        file: Option<PathBuf>,
        /// Rewrite the file with only the working models
        #[arg(long, requires = "file")]
        prune: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Chat {
        model: None,
        relay: None,
    });

    // The TUI owns the terminal, so it logs to a file.
    let _guard = match &command {
        Commands::Chat { .. } => init_file_logging()?,
        Commands::Serve { .. } => init_stderr_logging("openrouter_chat=info,orchat=info")?,
        _ => init_stderr_logging("openrouter_chat=warn,orchat=warn")?,
    };

    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("Ignoring unreadable config: {:#}", e);
        Config::new()
    });

    match command {
        Commands::Chat { model, relay } => run_chat(config, model, relay).await,
        Commands::Serve { bind } => run_serve(config, bind).await,
        Commands::Ask { prompt, model, relay } => run_ask(config, prompt, model, relay).await,
        Commands::Models { free, save } => run_models(config, free, save.as_deref()).await,
        Commands::Check { ids, file, prune } => run_check(config, ids, file.as_deref(), prune).await,
    }
}

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

fn init_stderr_logging(default: &str) -> Result<Option<WorkerGuard>> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default))
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;
    Ok(None)
}

fn init_file_logging() -> Result<Option<WorkerGuard>> {
    let dir = Config::config_dir()?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(&dir, LOG_FILE));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter("openrouter_chat=info,orchat=info"))
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;
    Ok(Some(guard))
}

fn resolve_model(model: Option<String>) -> Option<String> {
    model.map(|m| models::resolve(&m).to_string())
}

async fn run_chat(config: Config, model: Option<String>, relay: Option<String>) -> Result<()> {
    let store = SessionStore::load(FileStore::open_default()?)?;
    let backend = Backend::from_config(&config, relay.as_deref(), &ApiKeySource::default_locations());
    if let Err(e) = &backend {
        tracing::warn!("{}", e);
    }

    // Flag, then the last pick, then the config file
    let model = resolve_model(model)
        .or_else(|| store.selected_model())
        .or_else(|| config.default_model.clone());

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = EventHandler::new();
    let mut app = App::new(store, backend, model, events.sender());

    let result = run_loop(&mut terminal, &mut app, &mut events).await;

    tui::restore()?;
    result
}

async fn run_loop(terminal: &mut Tui, app: &mut App, events: &mut EventHandler) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        match events.next().await {
            Some(event) => handler::handle_event(app, event)?,
            None => break,
        }
    }
    Ok(())
}

async fn run_serve(config: Config, bind: Option<String>) -> Result<()> {
    let bind = bind.unwrap_or_else(|| config.bind_addr().to_string());
    let keys = ApiKeySource::default_locations();
    if let Err(e) = keys.load() {
        tracing::warn!("{}; requests will fail until a key is provided", e);
    }

    let settings = UpstreamSettings::relay_defaults(&bind).with_config(&config);
    relay::run_relay(RelayState::new(keys, settings), &bind).await
}

async fn run_ask(config: Config, prompt: String, model: Option<String>, relay: Option<String>) -> Result<()> {
    let backend = Backend::from_config(&config, relay.as_deref(), &ApiKeySource::default_locations())?;
    let model = resolve_model(model)
        .or_else(|| config.default_model.clone())
        .unwrap_or_else(|| models::DEFAULT_MODEL.to_string());

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut sink = WriterSink::new(std::io::stdout());
    let result = backend
        .stream_reply(&model, &[ChatMessage::user(prompt)], &mut sink, &cancel)
        .await;
    println!();

    match result {
        Ok(text) if text.is_empty() => eprintln!("{}", "(empty reply)".dimmed()),
        Ok(_) => {}
        Err(e) if e.is_cancelled() => eprintln!("{}", "[Generation stopped]".yellow()),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Listing models does not need a key; checking them does.
fn openrouter_client(config: &Config, require_key: bool) -> Result<OpenRouterClient> {
    let key = match ApiKeySource::default_locations().load() {
        Ok(key) => key,
        Err(e) if require_key => return Err(e.into()),
        Err(_) => String::new(),
    };
    let settings = UpstreamSettings::client_defaults().with_config(config);
    Ok(OpenRouterClient::new(&key, settings))
}

async fn run_models(config: Config, free: bool, save: Option<&Path>) -> Result<()> {
    let client = openrouter_client(&config, false)?;
    let mut listed = client.list_models().await?;
    if free {
        listed.retain(|m| m.is_free());
    }

    let heading = if free { "Free models on OpenRouter" } else { "Models on OpenRouter" };
    println!("\n{}", heading.bold().blue());
    println!("{}", "=".repeat(40).dimmed());

    for model in &listed {
        let context = model
            .context_length
            .map(|n| format!("{} tokens", n))
            .unwrap_or_else(|| "N/A".to_string());
        let vision = if model.supports_images() { "vision".green() } else { "text".dimmed() };
        println!("{}  {}", model.id.bold().yellow(), model.name);
        println!("   {} · {}", context.dimmed(), vision);
    }

    println!("\n{} models", listed.len().to_string().bold());

    if let Some(path) = save {
        let lines: Vec<String> = listed.iter().map(|m| format!("{} | {}", m.id, m.name)).collect();
        std::fs::write(path, lines.join("\n"))
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Saved to {}", path.display().to_string().bold());
    }
    Ok(())
}

async fn run_check(config: Config, ids: Vec<String>, file: Option<&Path>, prune: bool) -> Result<()> {
    let client = openrouter_client(&config, true)?;

    let targets = match file {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            checker::parse_model_list(&content)
        }
        None if ids.is_empty() => checker::catalog_targets(),
        None => ids.iter().map(|id| ModelTarget::new(models::resolve(id))).collect(),
    };

    println!("Found {} models. Starting check...", targets.len().to_string().bold());
    println!("{}", "-".repeat(50).dimmed());

    let results = checker::check_models(&client, targets, checker::CHECK_TIMEOUT).await;

    for result in &results {
        match &result.verdict {
            checker::Verdict::Alive => println!("{} {}", "ALIVE".green().bold(), result.target.name),
            checker::Verdict::Dead(reason) => println!(
                "{} {} {}",
                "DEAD ".red().bold(),
                result.target.name,
                format!("({})", reason).dimmed()
            ),
        }
    }

    let working = results.iter().filter(|r| r.is_alive()).count();
    println!("\n{}", "Report".bold().blue());
    println!("Total checked: {}", results.len());
    println!("Working: {}", working.to_string().green());
    println!("Dead: {}", (results.len() - working).to_string().red());

    if let (true, Some(path)) = (prune, file) {
        std::fs::write(path, checker::format_model_list(&results))
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Kept only working models in {}", path.display().to_string().bold());
    }
    Ok(())
}
