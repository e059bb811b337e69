//! Certes CLI
//!
//! Runs the deterministic inference pipeline interactively or as a one-shot
//! query. All decisions are made in `certes-core`; this front end only
//! loads configuration, formats responses, and loops on stdin.

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use certes_core::{PipelineController, PipelineState, Response};
use certes_persona::FilePersonaSource;

const BANNER: &str = r"
====================================================================
  CERTES  v0.1.0
  Deterministic symbolic question answering
--------------------------------------------------------------------
  Type /help for commands.  /personas lists personas.
  /persona <id> switches persona.  Type `exit` to quit.
====================================================================
";

#[derive(Parser)]
#[command(name = "certes")]
#[command(author, version, about = "Certes: deterministic symbolic QA pipeline")]
struct Cli {
    /// Persona ID to load on startup
    #[arg(short, long, default_value = "default")]
    persona: String,

    /// Run a single query and exit (non-interactive mode)
    #[arg(short, long)]
    query: Option<String>,

    /// Display the logical proof chain for each response
    #[arg(long)]
    proof: bool,

    /// Display the governance audit entries for each response
    #[arg(long)]
    audit: bool,

    /// Output raw JSON responses
    #[arg(long)]
    json: bool,

    /// Directory containing persona JSON documents
    #[arg(long, default_value = "personas")]
    personas_dir: PathBuf,

    /// Directory containing knowledge domain JSON files
    #[arg(long, default_value = "knowledge")]
    knowledge_dir: PathBuf,

    /// Path to the constitution document
    #[arg(long)]
    constitution: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let source = FilePersonaSource::new(
        cli.personas_dir.clone(),
        cli.knowledge_dir.clone(),
        cli.constitution.as_deref(),
    );
    let mut controller = PipelineController::new(Box::new(source), &cli.persona)
        .context("Certes failed to initialize")?;

    // One-shot mode.
    if let Some(query) = &cli.query {
        let response = controller.process(query);
        print_response(&response, &cli)?;
        std::process::exit(if response.state == PipelineState::Output {
            0
        } else {
            1
        });
    }

    // Interactive mode.
    println!("{BANNER}");
    let active = controller.active_persona();
    println!(
        "Active Persona: {} ({})\nPersona ID:     {}\nDomains:        {}\n",
        active.name.bold(),
        active.archetype,
        active.persona_id,
        if active.domains.is_empty() {
            "General".to_string()
        } else {
            active.domains.join(", ")
        }
    );

    let stdin = io::stdin();
    loop {
        print!("{}", "You > ".cyan().bold());
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            println!("\nCertes session terminated.");
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input.to_lowercase().as_str(), "exit" | "quit" | "q") {
            println!("Certes session terminated.");
            break;
        }

        let response = controller.process(input);
        print_response(&response, &cli)?;
    }

    Ok(())
}

fn print_response(response: &Response, cli: &Cli) -> Result<()> {
    if cli.json {
        println!("{}", serde_json::to_string_pretty(response)?);
        return Ok(());
    }

    let divider = "-".repeat(60);
    println!(
        "\n[{}] Persona: {}",
        match response.state {
            PipelineState::Output => response.state.to_string().green().bold(),
            _ => response.state.to_string().red().bold(),
        },
        response.persona
    );
    println!("{divider}");

    match (&response.answer, &response.halt_reason) {
        (Some(answer), _) => println!("{answer}"),
        (None, Some(reason)) => println!("{} {reason}", "HALT:".red().bold()),
        (None, None) => println!("(no response)"),
    }

    if cli.proof && !response.proof.is_empty() {
        println!("\n-- Proof Chain --");
        for step in &response.proof {
            println!("  {step}");
        }
    }

    if cli.audit && !response.audit.is_empty() {
        println!("\n-- Audit Log --");
        for entry in &response.audit {
            println!("  [{}] {:?}: {}", entry.check, entry.outcome, entry.detail);
        }
    }

    println!("{divider}");
    Ok(())
}
