mod agents;
mod config;
mod error;
mod llm_client;
mod orchestrator;
mod registry;
#[cfg(test)]
mod testing;
mod tools;

use std::io::{self, Write};
use std::path::PathBuf;

use agents::{AgentBehavior, AgentRequest, StepUpdate};
use anyhow::Context;
use clap::{Parser, ValueEnum};
use config::AppConfig;
use llm_client::build_llm_client;
use orchestrator::{
    create_react_supervisor, create_supervisor, extract_assistant_content, HandoffOptions,
    OutputMode, RegistryContext,
};
use tokio::sync::mpsc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "ria",
    about = "Supervisor that delegates requests to specialist devops and atlassian workers"
)]
struct Cli {
    /// Optional one-shot prompt; if omitted the CLI enters interactive mode.
    #[arg(short, long)]
    prompt: Option<String>,

    /// How the supervisor reaches its workers.
    #[arg(long, value_enum, default_value_t = Mode::Tools)]
    mode: Mode,

    /// Worker messages kept in the shared transcript (handoff mode only).
    #[arg(long, value_enum, default_value_t = OutputMode::FullHistory)]
    output_mode: OutputMode,

    /// Print each agent's output as it is produced.
    #[arg(long, default_value_t = false)]
    stream: bool,

    /// Use the offline echo model instead of contacting a backend.
    #[arg(long, default_value_t = false)]
    offline: bool,

    /// JSON file with worker prompts; overrides RIA_PROMPTS_FILE.
    #[arg(long)]
    prompts: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Workers are tools; the supervisor only sees their final answers.
    Tools,
    /// Workers take over the shared conversation and hand control back.
    Handoff,
}

/// Builds the supervisor for the selected mode.
fn build_coordinator(context: &RegistryContext, cli: &Cli) -> Box<dyn AgentBehavior> {
    match cli.mode {
        Mode::Tools => Box::new(create_supervisor(context)),
        Mode::Handoff => Box::new(create_react_supervisor(
            context,
            HandoffOptions::for_context(context).with_output_mode(cli.output_mode),
        )),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    let mut config = AppConfig::from_env();
    if let Some(path) = &cli.prompts {
        config.prompts_file = Some(path.clone());
    }

    let llm_client = build_llm_client(&config.llm, cli.offline);
    let context = RegistryContext::from_config(&config, llm_client)
        .await
        .context("Worker registry initialization failed")?;
    info!(
        workers = context.registry().len(),
        mode = ?cli.mode,
        model = %config.llm.model,
        "RIA ready"
    );

    let coordinator = build_coordinator(&context, &cli);

    if let Some(prompt) = cli.prompt {
        run_single(coordinator.as_ref(), prompt, cli.stream).await?;
        return Ok(());
    }

    run_repl(coordinator.as_ref(), cli.stream).await
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}

async fn run_single(
    coordinator: &dyn AgentBehavior,
    prompt: String,
    stream: bool,
) -> anyhow::Result<()> {
    let request = AgentRequest::new(prompt);

    let response = if stream {
        let (sender, receiver) = mpsc::unbounded_channel();
        let printer = tokio::spawn(print_steps(receiver));
        let result = coordinator.stream(request, &sender).await;
        drop(sender);
        printer.await.context("step printer panicked")?;
        result
    } else {
        coordinator.handle(request).await
    };

    let response = response.map_err(|err| {
        error!(error = %err, "Agent request failed");
        err
    })?;

    println!("\nRIA:\n{}\n", response.output());
    Ok(())
}

async fn print_steps(mut receiver: mpsc::UnboundedReceiver<StepUpdate>) {
    while let Some(update) = receiver.recv().await {
        for (agent, content) in extract_assistant_content(std::slice::from_ref(&update)) {
            println!("[{agent}] {content}");
        }
    }
}

async fn run_repl(coordinator: &dyn AgentBehavior, stream: bool) -> anyhow::Result<()> {
    println!("RIA CLI ready. Type 'exit' to quit.\n");
    let stdin = io::stdin();

    loop {
        print!("You > ");
        io::stdout().flush()?;

        let mut buffer = String::new();
        if stdin.read_line(&mut buffer)? == 0 {
            break;
        }
        let trimmed = buffer.trim();

        if trimmed.eq_ignore_ascii_case("exit") {
            info!("User exited CLI");
            break;
        }

        if trimmed.is_empty() {
            continue;
        }

        if let Err(err) = run_single(coordinator, trimmed.to_owned(), stream).await {
            eprintln!("Error: {err:#}");
        }
    }

    Ok(())
}
