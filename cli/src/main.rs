//! Strata CLI binary: run the orchestration service, or issue one-shot
//! routed completions.
//!
//! Subcommands: `run` (serve until SIGINT/SIGTERM), `ask` (single routed
//! completion, optionally streamed), `tools` (list tool schemas).

use clap::{Parser, Subcommand};
use cli::{build_service, default_model, parse_tier};
use config::Settings;
use futures_util::StreamExt;
use strata::provider::{ChatMessage, ChatOptions};
use strata::stream::{StreamOptions, StreamSupervisor};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(about = "Strata: tiered LLM routing, budgets, and cooperating agents")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the orchestration service until interrupted
    Run,
    /// One-shot routed chat completion
    Ask {
        /// User prompt
        prompt: String,
        /// Tier to route on (local_free, cloud_cheap, vision, premium, batch)
        #[arg(long, default_value = "local_free")]
        tier: String,
        /// Model id; defaults per tier
        #[arg(long)]
        model: Option<String>,
        /// Stream tokens as they arrive
        #[arg(long)]
        stream: bool,
        /// Restrict routing to privacy-compatible providers
        #[arg(long)]
        privacy: bool,
    },
    /// Print function-calling schemas for the built-in tools
    Tools,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(e) = config::load_and_apply("strata", None) {
        eprintln!("config error: {e}");
        std::process::exit(1);
    }
    let settings = Settings::from_env();

    let args = Args::parse();
    let outcome = match args.cmd {
        Command::Run => run_service(&settings).await,
        Command::Ask { prompt, tier, model, stream, privacy } => {
            ask(&settings, &prompt, &tier, model, stream, privacy).await
        }
        Command::Tools => list_tools(),
    };

    if let Err(e) = outcome {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run_service(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let service = build_service(settings).await?;

    // Per-user budgets come from the environment default when set.
    if settings.daily_budget_usd > 0.0 {
        tracing::info!(
            limit = settings.daily_budget_usd,
            "default daily budget active for new users"
        );
    }
    tracing::info!(
        agents = service.agents.len(),
        tools = service.registry.list(None, None).len(),
        port = settings.bind_port,
        "strata service up; waiting for shutdown signal"
    );

    let signal_task = service.shutdown.install_signal_handlers();
    service.shutdown.wait_until_complete().await;
    signal_task.abort();

    tracing::info!("service stopped");
    Ok(())
}

async fn ask(
    settings: &Settings,
    prompt: &str,
    tier: &str,
    model: Option<String>,
    stream: bool,
    privacy: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let tier = parse_tier(tier)?;
    let model = model.unwrap_or_else(|| default_model(tier).to_string());
    let router = cli::build_router(settings)?;
    let messages = [ChatMessage::user(prompt)];
    let opts = ChatOptions::default();

    if stream {
        let supervisor = StreamSupervisor::new();
        let source = router.stream_completion(tier, &model, &messages, privacy, true, &opts).await;
        let mut chunks = supervisor.stream(source, StreamOptions::default());
        while let Some(chunk) = chunks.next().await {
            print!("{}", chunk.content);
            use std::io::Write;
            let _ = std::io::stdout().flush();
        }
        println!();
        if let Some(result) = supervisor.last_result() {
            tracing::info!(
                reason = %result.termination_reason,
                tokens = result.total_tokens,
                seconds = result.duration.as_secs_f64(),
                "stream finished"
            );
        }
    } else {
        let response = router.chat_completion(tier, &model, &messages, privacy, true, &opts).await?;
        println!("{}", response.content);
        tracing::info!(
            model = %response.model,
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            finish_reason = %response.finish_reason,
            "completion finished"
        );
    }
    Ok(())
}

fn list_tools() -> Result<(), Box<dyn std::error::Error>> {
    let registry = strata::tools::ToolRegistry::new();
    strata::tools::register_builtin_tools(&registry);
    let schemas = registry.all_schemas();
    println!("{}", serde_json::to_string_pretty(&schemas)?);
    Ok(())
}
