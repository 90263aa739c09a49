pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use underwrite_core::config::LoadOptions;

#[derive(Debug, Parser)]
#[command(
    name = "underwrite",
    about = "Underwriting assistant operator CLI",
    long_about = "Chat with the underwriting assistant, inspect configuration, run readiness \
                  checks, apply migrations and load demo data.",
    after_help = "Examples:\n  underwrite chat --document claim.txt\n  underwrite doctor --json\n  \
                  underwrite config\n  underwrite seed"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to an underwrite.toml configuration file")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Start an interactive conversation with the assistant")]
    Chat {
        #[arg(long, help = "Text document attached to the first message")]
        document: Option<PathBuf>,
        #[arg(long, help = "Continuation handle of a saved conversation to resume")]
        resume: Option<String>,
    },
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo customers, policies, claims and failure scores")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, model and scoring readiness, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = LoadOptions { config_path: cli.config, ..LoadOptions::default() };

    let result = match cli.command {
        Command::Chat { document, resume } => {
            commands::chat::run(options, document.as_deref(), resume.as_deref())
        }
        Command::Migrate => commands::migrate::run(options),
        Command::Seed => commands::seed::run(options),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(&options) }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(options, json) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
