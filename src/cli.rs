/// CLI entrypoint wiring for the scriptbox binary.
use crate::config::policy::SecurityPolicy;
use crate::exec::Strategy;
use crate::pipeline::{Pipeline, ScriptSubmission};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about = "Validated, sandboxed execution of untrusted Python scripts", long_about = None)]
struct Cli {
    /// Security policy file (JSON); compiled-in defaults when omitted
    #[arg(long, global = true)]
    policy: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and execute a script, printing the normalized response
    Run {
        /// Script file to execute; reads stdin when omitted
        #[arg(long)]
        script: Option<PathBuf>,
        /// Request identifier for log correlation; generated when omitted
        #[arg(long)]
        request_id: Option<String>,
    },
    /// Report which execution strategy this host supports
    Probe,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let policy = match &cli.policy {
        Some(path) => SecurityPolicy::from_json_file(path)
            .with_context(|| format!("loading policy from {}", path.display()))?,
        None => SecurityPolicy::default(),
    };

    match cli.command {
        Commands::Run { script, request_id } => {
            let script_text = match script {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("reading script from {}", path.display()))?,
                None => {
                    let mut buffer = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buffer)
                        .context("reading script from stdin")?;
                    buffer
                }
            };

            let submission = ScriptSubmission {
                request_id: request_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
                script: script_text,
            };

            let pipeline = Pipeline::new(policy);
            let response = pipeline.run(&submission);
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Probe => {
            let strategy = Strategy::probe();
            println!("{}", serde_json::json!({ "strategy": strategy.name() }));
        }
    }

    Ok(())
}
