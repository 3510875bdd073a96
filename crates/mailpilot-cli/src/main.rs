//! MailPilot CLI
//!
//! Terminal front end for the email assistant. Runs a single
//! instruction with --instruction, or an interactive session otherwise.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use dialoguer::Confirm;
use tokio::io::AsyncBufReadExt;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use mailpilot_core::agent::Agent;
use mailpilot_core::embedding::EmbeddingClient;
use mailpilot_core::llm::CompletionClient;
use mailpilot_core::mail::MailGateway;
use mailpilot_core::policy::ConfirmAction;
use mailpilot_core::tools::ToolExecutor;
use mailpilot_core::{Config, Credentials, Error, Result};

#[derive(Parser)]
#[command(name = "mailpilot")]
#[command(about = "MailPilot - natural language email assistant for your terminal")]
#[command(long_about = "MailPilot turns natural language instructions into mailbox actions \
over IMAP and SMTP, driven by an OpenAI-compatible model.

Credentials come from the environment:
  GMAIL_EMAIL         account address
  GMAIL_APP_PASSWORD  app-specific password (never your account password)
  OPENAI_API_KEY      key for the completion/embedding service

Sending or drafting email always asks for confirmation in the terminal. \
Email bodies are treated as untrusted data; instructions found inside \
emails are never followed.

EXAMPLES:
  mailpilot -i \"summarize my last 3 emails\"
  mailpilot -i \"find the invoice from billing@corp.com and draft a reply\"
  mailpilot                      # interactive session")]
#[command(version)]
struct Cli {
    /// Run a single instruction and exit
    #[arg(short, long)]
    instruction: Option<String>,

    /// Path to config file (default ~/.config/mailpilot/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Terminal confirmation prompt for write-tier actions
struct TerminalConfirmer;

#[async_trait]
impl ConfirmAction for TerminalConfirmer {
    async fn confirm(&self, summary: &str) -> Result<bool> {
        let summary = summary.to_string();
        tokio::task::spawn_blocking(move || {
            println!("\n--- Confirmation required ---");
            println!("{}", summary);
            Confirm::new()
                .with_prompt("Approve this action?")
                .default(false)
                .interact()
        })
        .await
        .map_err(|e| Error::Other(format!("Confirmation task failed: {}", e)))?
        .map_err(|e| Error::Other(format!("Confirmation prompt failed: {}", e)))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mailpilot=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli
        .config
        .or_else(Config::default_path)
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;
    let config = Config::load(&config_path)?;
    debug!("Loaded config from {}", config_path.display());

    let credentials = Credentials::from_env()?;

    let chat = Arc::new(CompletionClient::new(&config.llm, &credentials)?);
    let embedder = Arc::new(EmbeddingClient::new(&config.llm, &credentials)?);
    let gateway = Arc::new(MailGateway::new(&config.mail, &credentials)?);
    let executor = ToolExecutor::new(gateway, embedder, config.agent.search_k);

    let mut agent = Agent::new(
        chat,
        executor,
        Arc::new(TerminalConfirmer),
        &config.llm,
        &config.agent,
        &credentials.email,
    );

    // Ctrl-C requests a stop at the next step boundary.
    let interrupt = agent.interrupt_handle();
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                break;
            }
            interrupt.store(true, Ordering::SeqCst);
            eprintln!("\nInterrupting after the current step...");
        }
    });

    match cli.instruction {
        Some(instruction) => {
            let answer = agent.run_instruction(&instruction).await?;
            println!("{}", answer);
            Ok(())
        }
        None => interactive(agent).await,
    }
}

async fn interactive(mut agent: Agent) -> Result<()> {
    println!("MailPilot interactive session. Type an instruction, or 'quit' to exit.");

    let stdin = tokio::io::stdin();
    let mut lines = tokio::io::BufReader::new(stdin).lines();

    loop {
        print!("mailpilot> ");
        std::io::stdout().flush()?;

        let line = match lines.next_line().await? {
            Some(line) => line,
            None => break,
        };
        let instruction = line.trim();

        if instruction.is_empty() {
            continue;
        }
        if matches!(instruction, "quit" | "exit" | "q") {
            break;
        }

        // Clear any interrupt left over from a previous instruction.
        agent.interrupt_handle().store(false, Ordering::SeqCst);

        match agent.run_instruction(instruction).await {
            Ok(answer) => println!("\n{}\n", answer),
            Err(e) if e.is_auth_failure() => return Err(e),
            Err(e) => eprintln!("error: {}\n", e),
        }
    }

    println!("Goodbye.");
    Ok(())
}
